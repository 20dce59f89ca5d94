pub mod allocator;
pub mod command;
pub mod sync;

pub use crate::instance::instance::InstanceContext;
pub use crate::device::device::DeviceEnvironment;

#[cfg(test)]
pub mod test;
