//! The client side of the compositor.
//!
//! A client renders into [`swapchain::VkClientSwapchain`] images and commits its layers through
//! [`compositor::VkClientCompositor`], which picks how the native compositor waits for the
//! client's gpu work.

pub mod compositor;
pub mod swapchain;
pub mod sync;
