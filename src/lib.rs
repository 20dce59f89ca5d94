//! Compositor rendering core for an OpenXR runtime.
//!
//! The crate accepts client swapchain images through external memory, composites the submitted
//! layers with head mounted display specific distortion and timewarp and arbitrates frame
//! submission between the client and compositor queues.

#[macro_use]
extern crate static_assertions;

#[cfg(not(unix))]
compile_error!("xrc-core shares memory and sync primitives through posix file descriptors and only supports unix targets");

pub mod error;
pub mod types;
pub mod util;
pub mod instance;
pub mod device;
pub mod vk;
pub mod render;
pub mod hmd;
pub mod native;
pub mod client;

pub use util::id::UUID;
pub use util::id::NamedUUID;

pub mod prelude {
    pub use crate::error::{CompositorError, Result};
    pub use crate::device::device::{DeviceContext, DeviceEnvironment, Queue};
    pub use crate::instance::instance::InstanceContext;
    pub use crate::types::*;

    pub type Vec2f32 = nalgebra::Vector2<f32>;
    pub type Vec3f32 = nalgebra::Vector3<f32>;
    pub type Vec4f32 = nalgebra::Vector4<f32>;
    pub type Mat4f32 = nalgebra::Matrix4<f32>;

    pub type Vec2u32 = nalgebra::Vector2<u32>;

    pub type Vec2f64 = nalgebra::Vector2<f64>;
    pub type Vec3f64 = nalgebra::Vector3<f64>;
    pub type Mat4f64 = nalgebra::Matrix4<f64>;
}
