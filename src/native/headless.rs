//! An in process native compositor rendering into an offscreen target.
//!
//! Committed frames are rendered synchronously. The first projection layer of a frame is
//! distorted into the target, frames without one clear it.

use std::collections::HashMap;
use std::fmt::{Debug, Formatter};
use std::os::unix::io::OwnedFd;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Instant;

use ash::prelude::VkResult;
use ash::vk;
use concurrent_queue::ConcurrentQueue;

use crate::hmd::HmdOptics;
use crate::native::swapchain::HeadlessSwapchain;
use crate::native::{NativeCompositor, NativeImage, NativeLayer, NativeSemaphore, NativeSwapchain};
use crate::prelude::*;
use crate::render::buffer::RenderBuffer;
use crate::render::compute::{ComputeRendering, ComputeTarget, ProjectionSources};
use crate::render::gfx::{GfxRendering, MeshUbo};
use crate::render::image::{create_image_simple, AllocatedImage};
use crate::render::resources::RenderResources;
use crate::render::shaders::Shaders;
use crate::render::target::{GfxTarget, GfxTargetCache, GfxTargetData};
use crate::util::format::CLIENT_SWAPCHAIN_FORMATS;
use crate::vk::sync::{Fence, TimelineSemaphore};
use crate::UUID;

/// 90Hz
pub const NOMINAL_FRAME_PERIOD_NS: u64 = 11_111_111;

/// Bound on the cpu wait for the client sync primitive and for the frame fence.
pub const CLIENT_WAIT_TIMEOUT_NS: u64 = 1_000_000_000;
pub const FRAME_WAIT_TIMEOUT_NS: u64 = 5_000_000_000;

const MAX_FRAME_STATS: usize = 64;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RenderMode {
    Mesh,
    Compute,
}

#[derive(Copy, Clone, Debug)]
pub struct HeadlessConfig {
    pub mode: RenderMode,

    /// Reproject projection layers to the poses set with
    /// [`HeadlessCompositor::set_display_poses`]. Only used in compute mode.
    pub timewarp: bool,
    pub target_format: vk::Format,
}

impl HeadlessConfig {
    pub fn mesh() -> Self {
        Self::default()
    }

    pub fn compute(timewarp: bool) -> Self {
        Self {
            mode: RenderMode::Compute,
            timewarp,
            ..Self::default()
        }
    }

    pub fn with_target_format(mut self, format: vk::Format) -> Self {
        self.target_format = format;
        self
    }

    fn target_usage(&self) -> vk::ImageUsageFlags {
        let usage = vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_SRC;
        match self.mode {
            RenderMode::Mesh => usage,
            RenderMode::Compute => usage | vk::ImageUsageFlags::STORAGE,
        }
    }

    fn validate(&self) -> Result<()> {
        if !CLIENT_SWAPCHAIN_FORMATS.contains(&self.target_format) {
            return Err(CompositorError::Unsupported("target format"));
        }
        if self.mode == RenderMode::Compute && self.target_format != vk::Format::R8G8B8A8_UNORM {
            return Err(CompositorError::Unsupported("compute targets must use R8G8B8A8_UNORM"));
        }
        Ok(())
    }
}

impl Default for HeadlessConfig {
    fn default() -> Self {
        Self {
            mode: RenderMode::Mesh,
            timewarp: false,
            target_format: vk::Format::R8G8B8A8_UNORM,
        }
    }
}

/// How the compositor waited for the client before reading a frame.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FrameSync {
    Handle,
    Semaphore { value: u64 },
    None,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FrameStats {
    pub frame_id: i64,
    pub sync: FrameSync,
    pub layer_count: usize,
    pub rendered_projection: bool,
}

pub struct HeadlessSemaphore {
    semaphore: TimelineSemaphore,
}

impl NativeSemaphore for HeadlessSemaphore {
    fn id(&self) -> UUID {
        self.semaphore.get_id()
    }

    fn wait(&self, value: u64, timeout_ns: u64) -> Result<()> {
        self.semaphore.wait(value, timeout_ns).map_err(CompositorError::from)
    }
}

impl Debug for HeadlessSemaphore {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeadlessSemaphore").field("semaphore", &self.semaphore).finish()
    }
}

struct FrameState {
    session_running: bool,
    next_frame_id: i64,
    last_display_time_ns: u64,
    begun_frame: Option<i64>,

    /// The frame id passed to `layer_begin` and the layers appended since.
    layer_frame: Option<i64>,
    display_time_ns: u64,
    blend_mode: BlendMode,
    layers: Vec<Layer<Arc<HeadlessSwapchain>>>,
}

impl FrameState {
    fn new() -> Self {
        Self {
            session_running: false,
            next_frame_id: 1,
            last_display_time_ns: 0,
            begun_frame: None,
            layer_frame: None,
            display_time_ns: 0,
            blend_mode: BlendMode::Opaque,
            layers: Vec::new(),
        }
    }
}

struct TargetState {
    /// `UNDEFINED` until a frame was rendered.
    layout: vk::ImageLayout,
}

pub struct HeadlessCompositor {
    env: DeviceEnvironment,
    config: HeadlessConfig,
    optics: HmdOptics,
    resources: Arc<RenderResources>,
    target_cache: GfxTargetCache,

    // Dropped before the target image it renders to
    gfx_target: Option<GfxTarget>,
    target: AllocatedImage,
    target_state: Mutex<TargetState>,

    formats: Vec<vk::Format>,
    swapchains: Mutex<HashMap<UUID, Weak<HeadlessSwapchain>>>,
    display_poses: Mutex<[Pose; 2]>,
    frame: Mutex<FrameState>,
    stats: Mutex<Vec<FrameStats>>,
    events: ConcurrentQueue<CompositorEvent>,
    epoch: Instant,
}

impl HeadlessCompositor {
    pub fn new(env: &DeviceEnvironment, mut optics: HmdOptics, config: HeadlessConfig) -> Result<Arc<Self>> {
        config.validate()?;

        let shaders = Shaders::load(env.get_device().clone())?;
        let resources = RenderResources::init(env, shaders, &mut optics)?;

        let extent = vk::Extent2D { width: optics.screen.x, height: optics.screen.y };
        let target = create_image_simple(env, extent, config.target_format, config.target_usage())?;

        let target_cache = GfxTargetCache::new(resources.clone());
        let gfx_target = match config.mode {
            RenderMode::Mesh => {
                let target_resources = target_cache.get(config.target_format, false)?;
                let data = GfxTargetData {
                    format: config.target_format,
                    is_external: false,
                    width: extent.width,
                    height: extent.height,
                };
                Some(GfxTarget::new(target_resources, target.view(), data)?)
            }
            RenderMode::Compute => None,
        };

        let display_poses = [optics.views[0].head_pose_to_eye, optics.views[1].head_pose_to_eye];

        log::info!("Created headless compositor ({:?}, timewarp: {}) with a {}x{} {:?} target", config.mode, config.timewarp, extent.width, extent.height, config.target_format);

        Ok(Arc::new(Self {
            env: env.clone(),
            config,
            optics,
            resources,
            target_cache,
            gfx_target,
            target,
            target_state: Mutex::new(TargetState { layout: vk::ImageLayout::UNDEFINED }),
            formats: CLIENT_SWAPCHAIN_FORMATS.to_vec(),
            swapchains: Mutex::new(HashMap::new()),
            display_poses: Mutex::new(display_poses),
            frame: Mutex::new(FrameState::new()),
            stats: Mutex::new(Vec::new()),
            events: ConcurrentQueue::unbounded(),
            epoch: Instant::now(),
        }))
    }

    pub fn get_env(&self) -> &DeviceEnvironment {
        &self.env
    }

    pub fn get_config(&self) -> &HeadlessConfig {
        &self.config
    }

    pub fn get_optics(&self) -> &HmdOptics {
        &self.optics
    }

    pub fn get_resources(&self) -> &Arc<RenderResources> {
        &self.resources
    }

    pub fn get_target_cache(&self) -> &GfxTargetCache {
        &self.target_cache
    }

    pub fn target_extent(&self) -> vk::Extent2D {
        self.target.extent()
    }

    /// The head poses frames are reprojected to when timewarp is enabled.
    pub fn set_display_poses(&self, poses: [Pose; 2]) {
        *lock(&self.display_poses) = poses;
    }

    pub fn last_frame_stats(&self) -> Option<FrameStats> {
        lock(&self.stats).last().copied()
    }

    /// Stats of the most recent frames, oldest first.
    pub fn frame_stats(&self) -> Vec<FrameStats> {
        lock(&self.stats).clone()
    }

    pub fn live_swapchain_count(&self) -> usize {
        let mut swapchains = lock(&self.swapchains);
        swapchains.retain(|_, swapchain| swapchain.strong_count() > 0);
        swapchains.len()
    }

    /// Copies the target into host memory. Returns tightly packed RGBA8 rows.
    pub fn read_target(&self) -> Result<Vec<u8>> {
        let extent = self.target.extent();
        let size = extent.width as vk::DeviceSize * extent.height as vk::DeviceSize * 4;

        let mut state = lock(&self.target_state);
        if state.layout == vk::ImageLayout::UNDEFINED {
            log::debug!("Reading headless target before any frame was rendered");
            return Ok(vec![0u8; size as usize]);
        }

        let memory = vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;
        let mut staging = RenderBuffer::new(&self.env, vk::BufferUsageFlags::TRANSFER_DST, memory, size)?;

        let range = vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        };
        let to_transfer = vk::ImageMemoryBarrier::builder()
            .src_access_mask(vk::AccessFlags::MEMORY_WRITE)
            .dst_access_mask(vk::AccessFlags::TRANSFER_READ)
            .old_layout(state.layout)
            .new_layout(vk::ImageLayout::TRANSFER_SRC_OPTIMAL)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(self.target.handle())
            .subresource_range(range)
            .build();
        let to_shader = vk::ImageMemoryBarrier::builder()
            .src_access_mask(vk::AccessFlags::TRANSFER_READ)
            .dst_access_mask(vk::AccessFlags::SHADER_READ)
            .old_layout(vk::ImageLayout::TRANSFER_SRC_OPTIMAL)
            .new_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(self.target.handle())
            .subresource_range(range)
            .build();
        let copy = vk::BufferImageCopy {
            buffer_offset: 0,
            buffer_row_length: 0,
            buffer_image_height: 0,
            image_subresource: vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: 0,
                base_array_layer: 0,
                layer_count: 1,
            },
            image_offset: vk::Offset3D { x: 0, y: 0, z: 0 },
            image_extent: vk::Extent3D { width: extent.width, height: extent.height, depth: 1 },
        };

        let image = self.target.handle();
        let buffer = staging.handle();
        self.env.get_command_pool().submit_one_time(self.env.get_queue(), |device: &ash::Device, cmd: vk::CommandBuffer| unsafe {
            device.cmd_pipeline_barrier(cmd, vk::PipelineStageFlags::ALL_COMMANDS, vk::PipelineStageFlags::TRANSFER, vk::DependencyFlags::empty(), &[], &[], std::slice::from_ref(&to_transfer));
            device.cmd_copy_image_to_buffer(cmd, image, vk::ImageLayout::TRANSFER_SRC_OPTIMAL, buffer, std::slice::from_ref(&copy));
            device.cmd_pipeline_barrier(cmd, vk::PipelineStageFlags::TRANSFER, vk::PipelineStageFlags::ALL_COMMANDS, vk::DependencyFlags::empty(), &[], &[], std::slice::from_ref(&to_shader));
        }).map_err(|err| {
            log::error!("Failed to read back headless target: {:?}", err);
            CompositorError::FailedToSubmit(err)
        })?;
        state.layout = vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL;
        drop(state);

        let mut bytes = staging.read()?;
        if is_bgra(self.config.target_format) {
            for pixel in bytes.chunks_exact_mut(4) {
                pixel.swap(0, 2);
            }
        }
        Ok(bytes)
    }

    fn resolve(&self, swapchain: Arc<dyn NativeSwapchain>) -> Result<Arc<HeadlessSwapchain>> {
        let id = swapchain.id();
        lock(&self.swapchains).get(&id).and_then(Weak::upgrade).ok_or_else(|| {
            log::error!("Swapchain {:?} was not created by this compositor", id);
            CompositorError::InvalidState("swapchain was not created by this compositor")
        })
    }

    fn push_stats(&self, stats: FrameStats) {
        let mut all = lock(&self.stats);
        if all.len() >= MAX_FRAME_STATS {
            all.remove(0);
        }
        all.push(stats);
    }

    fn take_layers(&self, frame_id: i64) -> Result<Vec<Layer<Arc<HeadlessSwapchain>>>> {
        let mut frame = lock(&self.frame);
        if frame.layer_frame != Some(frame_id) {
            log::error!("Commit of frame {} but layers were begun for {:?}", frame_id, frame.layer_frame);
            return Err(CompositorError::InvalidState("commit without layer_begin for the frame"));
        }
        frame.layer_frame = None;
        if frame.begun_frame == Some(frame_id) {
            frame.begun_frame = None;
        }
        log::trace!("Committing frame {} for display at {}ns ({:?})", frame_id, frame.display_time_ns, frame.blend_mode);
        Ok(std::mem::take(&mut frame.layers))
    }

    fn commit(&self, frame_id: i64, sync: FrameSync) -> Result<()> {
        let layers = self.take_layers(frame_id)?;

        let projection = layers.iter().find_map(|layer| layer.projection_views());
        match self.config.mode {
            RenderMode::Mesh => self.render_mesh(projection)?,
            RenderMode::Compute => self.render_compute(projection)?,
        }

        self.push_stats(FrameStats {
            frame_id,
            sync,
            layer_count: layers.len(),
            rendered_projection: projection.is_some(),
        });
        Ok(())
    }

    fn render_mesh(&self, projection: Option<&[ProjectionView<Arc<HeadlessSwapchain>>; 2]>) -> Result<()> {
        let gfx_target = self.gfx_target.as_ref().ok_or(CompositorError::InvalidState("mesh target missing"))?;
        let sampler = self.resources.get_default_sampler();

        let mut rendering = GfxRendering::new(self.resources.clone())?;
        rendering.begin_target(gfx_target)?;
        for view in 0..2 {
            rendering.begin_view(view, &self.optics.views[view].viewport)?;
            if let Some(views) = projection {
                let sub = &views[view].sub;
                let source = source_view(&sub.swapchain, sub.image_index, sub.array_index)?;
                rendering.distortion(view, sampler, source, &MeshUbo::new(&sub.norm_rect))?;
            }
            rendering.end_view()?;
        }
        rendering.end_target()?;

        self.submit_and_wait(rendering.get_command_buffer())
    }

    fn render_compute(&self, projection: Option<&[ProjectionView<Arc<HeadlessSwapchain>>; 2]>) -> Result<()> {
        let target = ComputeTarget {
            image: self.target.handle(),
            view: self.target.view(),
            viewports: [self.optics.views[0].viewport, self.optics.views[1].viewport],
            is_external: false,
        };

        let mut rendering = ComputeRendering::new(self.resources.clone())?;
        rendering.begin()?;
        match projection {
            Some(views) => {
                let sampler = self.resources.get_default_sampler();
                let sources = ProjectionSources {
                    samplers: [sampler; 2],
                    views: [
                        source_view(&views[0].sub.swapchain, views[0].sub.image_index, views[0].sub.array_index)?,
                        source_view(&views[1].sub.swapchain, views[1].sub.image_index, views[1].sub.array_index)?,
                    ],
                    norm_rects: [views[0].sub.norm_rect, views[1].sub.norm_rect],
                };

                if self.config.timewarp {
                    let src_poses = [views[0].pose, views[1].pose];
                    let src_fovs = [views[0].fov, views[1].fov];
                    let new_poses = *lock(&self.display_poses);
                    rendering.projection_timewarp(&sources, &src_poses, &src_fovs, &new_poses, &target)?;
                } else {
                    rendering.projection(&sources, &target)?;
                }
            }
            None => rendering.clear(&target)?,
        }
        rendering.end()?;

        self.submit_and_wait(rendering.get_command_buffer())
    }

    fn submit_and_wait(&self, command_buffer: vk::CommandBuffer) -> Result<()> {
        let fence = Fence::new(self.env.get_device().clone())?;

        // The target layout is only read and written while rendering holds this lock
        let mut state = lock(&self.target_state);

        let command_buffers = [command_buffer];
        let submit = vk::SubmitInfo::builder()
            .command_buffers(&command_buffers)
            .build();
        unsafe { self.env.get_queue().submit(std::slice::from_ref(&submit), Some(fence.handle())) }.map_err(|err| {
            log::error!("Failed to submit headless frame: {:?}", err);
            CompositorError::FailedToSubmit(err)
        })?;

        // Once submitted the command buffer may only be freed after the fence signaled
        drain_on_failure(self.env.get_queue(), fence.wait(FRAME_WAIT_TIMEOUT_NS))?;

        state.layout = vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL;
        Ok(())
    }
}

/// Drains the queue when a frame wait failed, so the frame's command buffers are no longer in use.
fn drain_on_failure(queue: &Queue, wait: VkResult<()>) -> Result<()> {
    wait.map_err(|err| {
        log::error!("Headless frame did not complete: {:?}", err);
        if let Err(idle) = unsafe { queue.wait_idle() } {
            log::error!("Failed to drain queue after frame wait: {:?}", idle);
        }
        CompositorError::from(err)
    })
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn is_bgra(format: vk::Format) -> bool {
    matches!(format, vk::Format::B8G8R8A8_UNORM | vk::Format::B8G8R8A8_SRGB)
}

fn source_view(swapchain: &HeadlessSwapchain, image_index: u32, array_index: u32) -> Result<vk::ImageView> {
    swapchain.get_view(image_index, array_index).ok_or_else(|| {
        log::error!("Sub image {}:{} out of range for {:?}", image_index, array_index, swapchain);
        CompositorError::InvalidState("sub image out of range")
    })
}

impl NativeCompositor for HeadlessCompositor {
    fn supported_formats(&self) -> &[vk::Format] {
        &self.formats
    }

    fn create_swapchain(&self, info: &SwapchainCreateInfo) -> Result<(Arc<dyn NativeSwapchain>, Vec<NativeImage>)> {
        if !self.formats.contains(&info.format) {
            return Err(CompositorError::Unsupported("swapchain format"));
        }

        let (swapchain, images) = HeadlessSwapchain::new(&self.env, info)?;

        let mut swapchains = lock(&self.swapchains);
        swapchains.retain(|_, swapchain| swapchain.strong_count() > 0);
        swapchains.insert(swapchain.id(), Arc::downgrade(&swapchain));

        let swapchain: Arc<dyn NativeSwapchain> = swapchain;
        Ok((swapchain, images))
    }

    fn create_semaphore(&self) -> Result<(OwnedFd, Arc<dyn NativeSemaphore>)> {
        let capabilities = self.env.get_capabilities();
        if !capabilities.timeline_semaphore || !capabilities.timeline_semaphore_opaque_fd {
            return Err(CompositorError::Unsupported("exportable timeline semaphores"));
        }

        let semaphore = TimelineSemaphore::new_exportable(self.env.get_device().clone(), 0)?;
        let fd = semaphore.export_opaque_fd()?;
        log::debug!("Created headless timeline semaphore {:?}", semaphore);

        Ok((fd, Arc::new(HeadlessSemaphore { semaphore })))
    }

    fn begin_session(&self) -> Result<()> {
        let mut frame = lock(&self.frame);
        if frame.session_running {
            return Err(CompositorError::InvalidState("session already running"));
        }
        frame.session_running = true;

        let _ = self.events.push(CompositorEvent::SessionState { visible: true, focused: true });
        log::info!("Headless session started");
        Ok(())
    }

    fn end_session(&self) -> Result<()> {
        let mut frame = lock(&self.frame);
        if !frame.session_running {
            return Err(CompositorError::InvalidState("session not running"));
        }
        frame.session_running = false;
        frame.begun_frame = None;
        frame.layer_frame = None;
        frame.layers.clear();

        let _ = self.events.push(CompositorEvent::SessionState { visible: false, focused: false });
        log::info!("Headless session ended");
        Ok(())
    }

    fn wait_frame(&self) -> Result<FrameTiming> {
        let mut frame = lock(&self.frame);
        if !frame.session_running {
            return Err(CompositorError::InvalidState("wait_frame without a running session"));
        }

        let now = self.epoch.elapsed().as_nanos() as u64;
        let display_time = (now + NOMINAL_FRAME_PERIOD_NS).max(frame.last_display_time_ns + NOMINAL_FRAME_PERIOD_NS);
        frame.last_display_time_ns = display_time;

        let frame_id = frame.next_frame_id;
        frame.next_frame_id += 1;

        Ok(FrameTiming {
            frame_id,
            predicted_display_time_ns: display_time,
            predicted_display_period_ns: NOMINAL_FRAME_PERIOD_NS,
        })
    }

    fn begin_frame(&self, frame_id: i64) -> Result<()> {
        let mut frame = lock(&self.frame);
        if !frame.session_running || frame_id >= frame.next_frame_id {
            return Err(CompositorError::InvalidState("begin_frame of a frame that was not waited for"));
        }
        frame.begun_frame = Some(frame_id);
        Ok(())
    }

    fn discard_frame(&self, frame_id: i64) -> Result<()> {
        let mut frame = lock(&self.frame);
        if frame.begun_frame == Some(frame_id) {
            frame.begun_frame = None;
        }
        if frame.layer_frame == Some(frame_id) {
            frame.layer_frame = None;
            frame.layers.clear();
        }
        log::trace!("Discarded frame {}", frame_id);
        Ok(())
    }

    fn layer_begin(&self, frame_id: i64, display_time_ns: u64, blend_mode: BlendMode) -> Result<()> {
        let mut frame = lock(&self.frame);
        frame.layer_frame = Some(frame_id);
        frame.display_time_ns = display_time_ns;
        frame.blend_mode = blend_mode;
        frame.layers.clear();
        Ok(())
    }

    fn layer(&self, layer: NativeLayer) -> Result<()> {
        let layer = layer.try_map(|swapchain| self.resolve(swapchain))?;

        let mut frame = lock(&self.frame);
        if frame.layer_frame.is_none() {
            return Err(CompositorError::InvalidState("layer without layer_begin"));
        }
        frame.layers.push(layer);
        Ok(())
    }

    fn layer_commit(&self, frame_id: i64, sync_fd: Option<OwnedFd>) -> Result<()> {
        let sync = match sync_fd {
            Some(fd) => {
                let fence = Fence::from_sync_fd(self.env.get_device().clone(), fd)?;
                fence.wait(CLIENT_WAIT_TIMEOUT_NS).map_err(|err| {
                    log::error!("Client fence of frame {} did not signal: {:?}", frame_id, err);
                    CompositorError::from(err)
                })?;
                FrameSync::Handle
            }
            None => FrameSync::None,
        };

        self.commit(frame_id, sync)
    }

    fn layer_commit_with_semaphore(&self, frame_id: i64, semaphore: &Arc<dyn NativeSemaphore>, value: u64) -> Result<()> {
        semaphore.wait(value, CLIENT_WAIT_TIMEOUT_NS).map_err(|err| {
            log::error!("Client semaphore did not reach {} for frame {}: {:?}", value, frame_id, err);
            err
        })?;

        self.commit(frame_id, FrameSync::Semaphore { value })
    }

    fn poll_events(&self) -> Option<CompositorEvent> {
        self.events.pop().ok()
    }
}

impl Drop for HeadlessCompositor {
    fn drop(&mut self) {
        if let Err(err) = unsafe { self.env.get_queue().device_wait_idle() } {
            log::error!("Failed to wait for device idle before destroying headless compositor: {:?}", err);
        }
    }
}

assert_impl_all!(HeadlessCompositor: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hmd::{HmdOptics, NoDistortion};

    #[test]
    fn config_validation() {
        assert!(HeadlessConfig::mesh().validate().is_ok());
        assert!(HeadlessConfig::mesh().with_target_format(vk::Format::B8G8R8A8_SRGB).validate().is_ok());
        assert!(HeadlessConfig::compute(true).validate().is_ok());
        assert!(matches!(
            HeadlessConfig::compute(false).with_target_format(vk::Format::B8G8R8A8_UNORM).validate(),
            Err(CompositorError::Unsupported(_))
        ));
        assert!(matches!(
            HeadlessConfig::mesh().with_target_format(vk::Format::R16G16B16A16_SFLOAT).validate(),
            Err(CompositorError::Unsupported(_))
        ));

        assert!(!HeadlessConfig::mesh().target_usage().contains(vk::ImageUsageFlags::STORAGE));
        assert!(HeadlessConfig::compute(false).target_usage().contains(vk::ImageUsageFlags::STORAGE));
    }

    #[test]
    fn failed_wait_drains_queue() {
        let env = match crate::vk::test::make_headless_instance_device() {
            Some(env) => env,
            None => return,
        };
        let queue = env.get_queue();
        assert!(drain_on_failure(queue, Ok(())).is_ok());

        let fence = Fence::new(env.get_device().clone()).unwrap();
        unsafe { queue.submit(&[], Some(fence.handle())) }.unwrap();

        assert!(matches!(drain_on_failure(queue, Err(vk::Result::TIMEOUT)), Err(CompositorError::Timeout)));
        assert!(fence.wait(0).is_ok());
    }

    fn make_compositor(config: HeadlessConfig) -> Option<Arc<HeadlessCompositor>> {
        let env = crate::vk::test::make_headless_instance_device()?;
        if !env.get_capabilities().external_memory_fd {
            return None;
        }
        let optics = HmdOptics::side_by_side(Vec2u32::new(64, 32), Fov::symmetric(0.7), Arc::new(NoDistortion));
        Some(HeadlessCompositor::new(&env, optics, config).unwrap())
    }

    #[test]
    fn session_and_frame_ids() {
        let compositor = match make_compositor(HeadlessConfig::mesh()) {
            Some(compositor) => compositor,
            None => return,
        };

        assert!(compositor.wait_frame().is_err());
        compositor.begin_session().unwrap();
        assert_eq!(compositor.poll_events(), Some(CompositorEvent::SessionState { visible: true, focused: true }));
        assert_eq!(compositor.poll_events(), None);

        let first = compositor.wait_frame().unwrap();
        let second = compositor.wait_frame().unwrap();
        assert!(second.frame_id > first.frame_id);
        assert!(second.predicted_display_time_ns > first.predicted_display_time_ns);
        assert_eq!(first.predicted_display_period_ns, NOMINAL_FRAME_PERIOD_NS);

        compositor.begin_frame(second.frame_id).unwrap();
        compositor.layer_begin(second.frame_id, second.predicted_display_time_ns, BlendMode::Opaque).unwrap();
        compositor.layer_commit(second.frame_id, None).unwrap();

        let stats = compositor.last_frame_stats().unwrap();
        assert_eq!(stats.frame_id, second.frame_id);
        assert_eq!(stats.sync, FrameSync::None);
        assert_eq!(stats.layer_count, 0);
        assert!(!stats.rendered_projection);

        compositor.end_session().unwrap();
        assert_eq!(compositor.poll_events(), Some(CompositorEvent::SessionState { visible: false, focused: false }));
    }

    #[test]
    fn commit_without_layer_begin() {
        let compositor = match make_compositor(HeadlessConfig::mesh()) {
            Some(compositor) => compositor,
            None => return,
        };

        assert!(matches!(compositor.layer_commit(1, None), Err(CompositorError::InvalidState(_))));
    }
}
