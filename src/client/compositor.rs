//! The client compositor. Resolves client swapchains to native ones and synchronizes each
//! commit with the native compositor.

use std::os::unix::io::OwnedFd;
use std::sync::{Arc, Mutex, MutexGuard};

use ash::vk;

use crate::client::swapchain::VkClientSwapchain;
use crate::client::sync::{select_commit_path, CommitCapabilities, CommitPath, TimelineSync};
use crate::native::{NativeCompositor, NativeSwapchain};
use crate::prelude::*;
use crate::vk::sync::Fence;

/// A layer referencing client swapchains.
pub type ClientLayer<'a> = Layer<&'a VkClientSwapchain>;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ClientCompositorConfig {
    pub use_timeline_semaphore: bool,
    pub use_fence_export: bool,
}

impl ClientCompositorConfig {
    /// Only the explicit handle and device wait idle paths.
    pub fn minimal() -> Self {
        Self {
            use_timeline_semaphore: false,
            use_fence_export: false,
        }
    }
}

impl Default for ClientCompositorConfig {
    fn default() -> Self {
        Self {
            use_timeline_semaphore: true,
            use_fence_export: true,
        }
    }
}

pub struct VkClientCompositor {
    env: DeviceEnvironment,
    native: Arc<dyn NativeCompositor>,
    timeline: Mutex<Option<TimelineSync>>,
    fence_export: bool,
}

impl VkClientCompositor {
    pub fn new(env: &DeviceEnvironment, native: Arc<dyn NativeCompositor>, config: ClientCompositorConfig) -> Self {
        let capabilities = env.get_capabilities();

        let timeline = if config.use_timeline_semaphore && capabilities.timeline_semaphore && capabilities.timeline_semaphore_opaque_fd {
            match TimelineSync::new(env, native.as_ref()) {
                Ok(timeline) => Some(timeline),
                Err(err) => {
                    log::warn!("Disabling timeline semaphore commits: {}", err);
                    None
                }
            }
        } else {
            None
        };

        let fence_export = config.use_fence_export && capabilities.external_fence_fd && capabilities.fence_sync_fd_export;

        log::info!("Created client compositor (timeline: {}, fence export: {})", timeline.is_some(), fence_export);
        Self {
            env: env.clone(),
            native,
            timeline: Mutex::new(timeline),
            fence_export,
        }
    }

    pub fn get_env(&self) -> &DeviceEnvironment {
        &self.env
    }

    pub fn get_native(&self) -> &Arc<dyn NativeCompositor> {
        &self.native
    }

    fn lock_timeline(&self) -> MutexGuard<Option<TimelineSync>> {
        self.timeline.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn has_timeline(&self) -> bool {
        self.lock_timeline().is_some()
    }

    /// The value of the last successful timeline commit.
    pub fn timeline_value(&self) -> Option<u64> {
        self.lock_timeline().as_ref().map(TimelineSync::value)
    }

    pub fn capabilities(&self, explicit_sync: bool) -> CommitCapabilities {
        CommitCapabilities {
            explicit_sync,
            timeline_semaphore: self.has_timeline(),
            fence_export: self.fence_export,
        }
    }

    pub fn supported_formats(&self) -> &[vk::Format] {
        self.native.supported_formats()
    }

    pub fn create_swapchain(&self, info: &SwapchainCreateInfo) -> Result<VkClientSwapchain> {
        if !self.native.supported_formats().contains(&info.format) {
            log::error!("Swapchain format {:?} is not supported", info.format);
            return Err(CompositorError::Unsupported("swapchain format"));
        }

        let (native, images) = self.native.create_swapchain(info)?;
        VkClientSwapchain::new(&self.env, native, images, info)
    }

    pub fn begin_session(&self) -> Result<()> {
        self.native.begin_session()
    }

    pub fn end_session(&self) -> Result<()> {
        self.native.end_session()
    }

    pub fn wait_frame(&self) -> Result<FrameTiming> {
        self.native.wait_frame()
    }

    pub fn begin_frame(&self, frame_id: i64) -> Result<()> {
        self.native.begin_frame(frame_id)
    }

    pub fn discard_frame(&self, frame_id: i64) -> Result<()> {
        self.native.discard_frame(frame_id)
    }

    pub fn poll_events(&self) -> Option<CompositorEvent> {
        self.native.poll_events()
    }

    pub fn layer_begin(&self, frame_id: i64, display_time_ns: u64, blend_mode: BlendMode) -> Result<()> {
        self.native.layer_begin(frame_id, display_time_ns, blend_mode)
    }

    /// Forwards any layer after resolving its swapchains.
    pub fn layer(&self, layer: ClientLayer) -> Result<()> {
        let layer = layer.try_map(|swapchain| Ok::<Arc<dyn NativeSwapchain>, CompositorError>(swapchain.native().clone()))?;
        self.native.layer(layer)
    }

    pub fn layer_stereo_projection(&self, data: StereoProjectionData<&VkClientSwapchain>) -> Result<()> {
        self.layer(Layer::StereoProjection(data))
    }

    pub fn layer_stereo_projection_depth(&self, data: StereoProjectionDepthData<&VkClientSwapchain>) -> Result<()> {
        self.layer(Layer::StereoProjectionDepth(data))
    }

    pub fn layer_quad(&self, data: QuadData<&VkClientSwapchain>) -> Result<()> {
        self.layer(Layer::Quad(data))
    }

    pub fn layer_cube(&self, data: CubeData<&VkClientSwapchain>) -> Result<()> {
        self.layer(Layer::Cube(data))
    }

    pub fn layer_cylinder(&self, data: CylinderData<&VkClientSwapchain>) -> Result<()> {
        self.layer(Layer::Cylinder(data))
    }

    pub fn layer_equirect1(&self, data: Equirect1Data<&VkClientSwapchain>) -> Result<()> {
        self.layer(Layer::Equirect1(data))
    }

    pub fn layer_equirect2(&self, data: Equirect2Data<&VkClientSwapchain>) -> Result<()> {
        self.layer(Layer::Equirect2(data))
    }

    /// Commits the frame with the first available sync path and returns the path taken.
    pub fn layer_commit(&self, frame_id: i64, sync_handle: Option<OwnedFd>) -> Result<CommitPath> {
        let path = select_commit_path(self.capabilities(sync_handle.is_some()));
        log::trace!("Committing frame {} through {:?}", frame_id, path);

        match path {
            CommitPath::ExplicitHandle => {
                let fd = sync_handle.ok_or(CompositorError::Gpu(vk::Result::ERROR_UNKNOWN))?;
                self.native.layer_commit(frame_id, Some(fd))?;
            }
            CommitPath::TimelineSemaphore => self.commit_timeline(frame_id)?,
            CommitPath::ExportedFence => self.commit_fence(frame_id)?,
            CommitPath::DeviceWaitIdle => {
                unsafe { self.env.get_queue().device_wait_idle() }.map_err(|err| {
                    log::error!("Failed to wait for device idle on commit: {:?}", err);
                    CompositorError::Gpu(err)
                })?;
                self.native.layer_commit(frame_id, None)?;
            }
        }

        Ok(path)
    }

    fn commit_timeline(&self, frame_id: i64) -> Result<()> {
        let mut guard = self.lock_timeline();
        let timeline = guard.as_mut().ok_or(CompositorError::Gpu(vk::Result::ERROR_UNKNOWN))?;

        let value = timeline.signal(self.env.get_queue())?;
        let native = timeline.native().clone();
        drop(guard);

        self.native.layer_commit_with_semaphore(frame_id, &native, value)
    }

    fn commit_fence(&self, frame_id: i64) -> Result<()> {
        if !self.fence_export {
            return Err(CompositorError::Gpu(vk::Result::ERROR_UNKNOWN));
        }

        let fence = Fence::new_exportable(self.env.get_device().clone())?;
        unsafe { self.env.get_queue().submit(&[], Some(fence.handle())) }.map_err(|err| {
            log::error!("Failed to submit commit fence: {:?}", err);
            CompositorError::FailedToSubmit(err)
        })?;

        // None if the fence already signaled
        let fd = fence.export_sync_fd()?;
        drop(fence);

        self.native.layer_commit(frame_id, fd)
    }
}

assert_impl_all!(VkClientCompositor: Send, Sync);
