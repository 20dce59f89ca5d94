//! Gpu side of the compositor.
//!
//! [`resources::RenderResources`] holds everything shared between frames. Per frame work is
//! recorded by a [`gfx::GfxRendering`] when using the distortion mesh or a
//! [`compute::ComputeRendering`] when distorting in a compute shader.

pub mod buffer;
pub mod compute;
pub mod gfx;
pub mod image;
pub mod resources;
pub mod shaders;
pub mod target;
pub mod timewarp;
