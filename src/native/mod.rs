//! The contract between the client shim and a native compositor.
//!
//! A native compositor owns the swapchain images and the frame loop. Images and sync primitives
//! cross the boundary as file descriptors.

pub mod headless;
pub mod swapchain;

use std::fmt::Debug;
use std::os::unix::io::OwnedFd;
use std::sync::Arc;

use ash::vk;

use crate::prelude::*;
use crate::UUID;

/// The memory backing one swapchain image.
#[derive(Debug)]
pub struct NativeImage {
    pub fd: OwnedFd,
    pub size: u64,
    pub use_dedicated_allocation: bool,
}

pub trait NativeSwapchain: Send + Sync + Debug {
    fn id(&self) -> UUID;

    fn image_count(&self) -> u32;

    fn acquire_image(&self) -> Result<u32>;

    fn wait_image(&self, timeout_ns: u64, index: u32) -> Result<()>;

    fn release_image(&self, index: u32) -> Result<()>;
}

pub trait NativeSemaphore: Send + Sync + Debug {
    fn id(&self) -> UUID;

    /// Blocks until the counter reaches at least `value`.
    fn wait(&self, value: u64, timeout_ns: u64) -> Result<()>;
}

pub type NativeLayer = Layer<Arc<dyn NativeSwapchain>>;

pub trait NativeCompositor: Send + Sync {
    fn supported_formats(&self) -> &[vk::Format];

    fn create_swapchain(&self, info: &SwapchainCreateInfo) -> Result<(Arc<dyn NativeSwapchain>, Vec<NativeImage>)>;

    /// Returns an opaque fd of a timeline semaphore and the object to wait on it.
    fn create_semaphore(&self) -> Result<(OwnedFd, Arc<dyn NativeSemaphore>)>;

    fn begin_session(&self) -> Result<()>;

    fn end_session(&self) -> Result<()>;

    fn wait_frame(&self) -> Result<FrameTiming>;

    fn begin_frame(&self, frame_id: i64) -> Result<()>;

    fn discard_frame(&self, frame_id: i64) -> Result<()>;

    fn layer_begin(&self, frame_id: i64, display_time_ns: u64, blend_mode: BlendMode) -> Result<()>;

    /// Appends a layer to the current frame.
    fn layer(&self, layer: NativeLayer) -> Result<()>;

    fn layer_stereo_projection(&self, data: StereoProjectionData<Arc<dyn NativeSwapchain>>) -> Result<()> {
        self.layer(Layer::StereoProjection(data))
    }

    fn layer_stereo_projection_depth(&self, data: StereoProjectionDepthData<Arc<dyn NativeSwapchain>>) -> Result<()> {
        self.layer(Layer::StereoProjectionDepth(data))
    }

    fn layer_quad(&self, data: QuadData<Arc<dyn NativeSwapchain>>) -> Result<()> {
        self.layer(Layer::Quad(data))
    }

    fn layer_cube(&self, data: CubeData<Arc<dyn NativeSwapchain>>) -> Result<()> {
        self.layer(Layer::Cube(data))
    }

    fn layer_cylinder(&self, data: CylinderData<Arc<dyn NativeSwapchain>>) -> Result<()> {
        self.layer(Layer::Cylinder(data))
    }

    fn layer_equirect1(&self, data: Equirect1Data<Arc<dyn NativeSwapchain>>) -> Result<()> {
        self.layer(Layer::Equirect1(data))
    }

    fn layer_equirect2(&self, data: Equirect2Data<Arc<dyn NativeSwapchain>>) -> Result<()> {
        self.layer(Layer::Equirect2(data))
    }

    /// Commits the frame. If `sync_fd` is a sync fd the compositor waits on it before reading the
    /// images and closes it afterwards.
    fn layer_commit(&self, frame_id: i64, sync_fd: Option<OwnedFd>) -> Result<()>;

    fn layer_commit_with_semaphore(&self, frame_id: i64, semaphore: &Arc<dyn NativeSemaphore>, value: u64) -> Result<()>;

    fn poll_events(&self) -> Option<CompositorEvent>;
}
