pub mod id;
pub mod format;
pub mod vk;
