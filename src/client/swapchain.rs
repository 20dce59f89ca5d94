//! Client side view of a native swapchain.
//!
//! The native images are imported into the client device. Handing an image to the client and
//! back is done with pre-recorded layout transitions, the release also hands queue family
//! ownership to the native compositor.

use std::fmt::{Debug, Formatter};
use std::sync::{Arc, Mutex, MutexGuard};

use ash::vk;

use crate::native::{NativeImage, NativeSwapchain};
use crate::prelude::*;
use crate::render::image::image_from_external;
use crate::util::format::{barrier_access_mask, barrier_aspect_mask, barrier_optimal_layout};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ImageState {
    Unused,
    AcquiredByClient,
    CommittedToCompositor,
}

/// Tracks acquire and release pairing per image.
#[derive(Clone, Debug)]
pub struct ImageStates {
    states: Vec<ImageState>,
}

impl ImageStates {
    pub fn new(count: usize) -> Self {
        Self {
            states: vec![ImageState::Unused; count],
        }
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn get(&self, index: u32) -> Option<ImageState> {
        self.states.get(index as usize).copied()
    }

    pub fn check_acquire(&self, index: u32) -> Result<()> {
        match self.get(index) {
            None => Err(CompositorError::InvalidState("image index out of range")),
            Some(ImageState::AcquiredByClient) => Err(CompositorError::InvalidState("image acquired twice")),
            Some(_) => Ok(()),
        }
    }

    pub fn check_release(&self, index: u32) -> Result<()> {
        match self.get(index) {
            None => Err(CompositorError::InvalidState("image index out of range")),
            Some(ImageState::AcquiredByClient) => Ok(()),
            Some(_) => Err(CompositorError::InvalidState("image released without being acquired")),
        }
    }

    /// Marks the image as acquired and returns the state it was in.
    pub fn acquire(&mut self, index: u32) -> Result<ImageState> {
        self.check_acquire(index)?;
        Ok(std::mem::replace(&mut self.states[index as usize], ImageState::AcquiredByClient))
    }

    /// Undoes an [`ImageStates::acquire`] whose follow up work failed.
    pub fn revert_acquire(&mut self, index: u32, previous: ImageState) {
        if let Some(state @ ImageState::AcquiredByClient) = self.states.get_mut(index as usize) {
            *state = previous;
        }
    }

    pub fn release(&mut self, index: u32) -> Result<()> {
        self.check_release(index)?;
        self.states[index as usize] = ImageState::CommittedToCompositor;
        Ok(())
    }
}

fn contract<T>(result: Result<T>) -> Result<T> {
    if let Err(CompositorError::InvalidState(what)) = &result {
        log::error!("Swapchain contract violated: {}", what);
        debug_assert!(false, "Swapchain contract violated: {}", what);
    }
    result
}

pub struct VkClientSwapchain {
    env: DeviceEnvironment,
    native: Arc<dyn NativeSwapchain>,
    info: SwapchainCreateInfo,
    images: Vec<vk::Image>,
    memory: Vec<vk::DeviceMemory>,
    acquire: Vec<vk::CommandBuffer>,
    release: Vec<vk::CommandBuffer>,
    states: Mutex<ImageStates>,
}

impl VkClientSwapchain {
    /// Imports the native images and records the transition command buffers.
    pub fn new(env: &DeviceEnvironment, native: Arc<dyn NativeSwapchain>, native_images: Vec<NativeImage>, info: &SwapchainCreateInfo) -> Result<Self> {
        let count = native_images.len();

        let mut swapchain = Self {
            env: env.clone(),
            native,
            info: *info,
            images: Vec::with_capacity(count),
            memory: Vec::with_capacity(count),
            acquire: Vec::with_capacity(count),
            release: Vec::with_capacity(count),
            states: Mutex::new(ImageStates::new(count)),
        };

        for native_image in native_images {
            let (image, memory) = image_from_external(env, info, native_image)?;
            swapchain.images.push(image);
            swapchain.memory.push(memory);
        }

        swapchain.record_command_buffers()?;

        log::debug!("Imported {} images of native swapchain {:?}", count, swapchain.native.id());
        Ok(swapchain)
    }

    fn record_command_buffers(&mut self) -> Result<()> {
        let device = self.env.vk();
        let pool = self.env.get_command_pool().lock();
        let family = self.env.get_queue().get_queue_family_index();

        let count = self.images.len() as u32;
        self.acquire = pool.allocate(count)?;
        self.release = pool.allocate(count)?;

        let optimal_layout = barrier_optimal_layout(self.info.format);
        let access = barrier_access_mask(self.info.bits);
        let range = vk::ImageSubresourceRange {
            aspect_mask: barrier_aspect_mask(self.info.format),
            base_mip_level: 0,
            level_count: vk::REMAINING_MIP_LEVELS,
            base_array_layer: 0,
            layer_count: vk::REMAINING_ARRAY_LAYERS,
        };

        // Resubmitted while a previous submission may still be pending
        let begin_info = vk::CommandBufferBeginInfo::builder()
            .flags(vk::CommandBufferUsageFlags::SIMULTANEOUS_USE);

        for (index, image) in self.images.iter().enumerate() {
            let acquire = vk::ImageMemoryBarrier::builder()
                .src_access_mask(vk::AccessFlags::empty())
                .dst_access_mask(access)
                .old_layout(vk::ImageLayout::UNDEFINED)
                .new_layout(optimal_layout)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .image(*image)
                .subresource_range(range);

            let release = vk::ImageMemoryBarrier::builder()
                .src_access_mask(access)
                .dst_access_mask(vk::AccessFlags::empty())
                .old_layout(optimal_layout)
                .new_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
                .src_queue_family_index(family)
                .dst_queue_family_index(vk::QUEUE_FAMILY_EXTERNAL)
                .image(*image)
                .subresource_range(range);

            unsafe {
                let cmd = self.acquire[index];
                device.begin_command_buffer(cmd, &begin_info)?;
                device.cmd_pipeline_barrier(cmd, vk::PipelineStageFlags::TOP_OF_PIPE, vk::PipelineStageFlags::ALL_COMMANDS, vk::DependencyFlags::empty(), &[], &[], std::slice::from_ref(&acquire));
                device.end_command_buffer(cmd)?;

                let cmd = self.release[index];
                device.begin_command_buffer(cmd, &begin_info)?;
                device.cmd_pipeline_barrier(cmd, vk::PipelineStageFlags::ALL_COMMANDS, vk::PipelineStageFlags::BOTTOM_OF_PIPE, vk::DependencyFlags::empty(), &[], &[], std::slice::from_ref(&release));
                device.end_command_buffer(cmd)?;
            }
        }

        Ok(())
    }

    fn lock_states(&self) -> MutexGuard<ImageStates> {
        self.states.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn submit(&self, command_buffer: vk::CommandBuffer) -> Result<()> {
        let command_buffers = [command_buffer];
        let submit = vk::SubmitInfo::builder()
            .command_buffers(&command_buffers)
            .build();

        unsafe { self.env.get_queue().submit(std::slice::from_ref(&submit), None) }.map_err(|err| {
            log::error!("Failed to submit swapchain transition: {:?}", err);
            CompositorError::FailedToSubmit(err)
        })
    }

    pub fn acquire_image(&self) -> Result<u32> {
        let index = self.native.acquire_image()?;

        let mut states = self.lock_states();
        let previous = match contract(states.acquire(index)) {
            Ok(previous) => previous,
            Err(err) => {
                drop(states);
                self.release_native(index);
                return Err(err);
            }
        };
        drop(states);

        if let Err(err) = self.submit(self.acquire[index as usize]) {
            self.lock_states().revert_acquire(index, previous);
            self.release_native(index);
            return Err(err);
        }
        log::trace!("Acquired image {} of {:?}", index, self.native.id());
        Ok(index)
    }

    fn release_native(&self, index: u32) {
        if let Err(err) = self.native.release_image(index) {
            log::warn!("Failed to hand image {} back to {:?}: {:?}", index, self.native.id(), err);
        }
    }

    pub fn wait_image(&self, timeout_ns: u64, index: u32) -> Result<()> {
        self.native.wait_image(timeout_ns, index)
    }

    pub fn release_image(&self, index: u32) -> Result<()> {
        let mut states = self.lock_states();
        contract(states.check_release(index))?;

        self.submit(self.release[index as usize])?;
        self.native.release_image(index)?;
        states.release(index)
    }

    pub fn image_state(&self, index: u32) -> Option<ImageState> {
        self.lock_states().get(index)
    }

    pub fn images(&self) -> &[vk::Image] {
        &self.images
    }

    pub fn image_count(&self) -> u32 {
        self.images.len() as u32
    }

    pub fn info(&self) -> &SwapchainCreateInfo {
        &self.info
    }

    pub fn native(&self) -> &Arc<dyn NativeSwapchain> {
        &self.native
    }

    pub fn destroy(self) {
        drop(self)
    }
}

impl Debug for VkClientSwapchain {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VkClientSwapchain")
            .field("native", &self.native.id())
            .field("format", &self.info.format)
            .field("image_count", &self.images.len())
            .finish()
    }
}

impl Drop for VkClientSwapchain {
    fn drop(&mut self) {
        // Submitted transitions may still reference the images
        if let Err(err) = unsafe { self.env.get_queue().device_wait_idle() } {
            log::error!("Failed to wait for device idle before destroying client swapchain: {:?}", err);
        }

        {
            let pool = self.env.get_command_pool().lock();
            pool.free(&self.acquire);
            pool.free(&self.release);
        }

        let device = self.env.vk();
        unsafe {
            for image in self.images.drain(..) {
                device.destroy_image(image, None);
            }
            for memory in self.memory.drain(..) {
                device.free_memory(memory, None);
            }
        }
    }
}

assert_impl_all!(VkClientSwapchain: Send, Sync);

#[cfg(test)]
mod tests {
    use rand::Rng;

    use super::*;

    #[test]
    fn pairing() {
        let mut states = ImageStates::new(3);
        assert_eq!(states.get(0), Some(ImageState::Unused));

        states.acquire(0).unwrap();
        assert!(matches!(states.acquire(0), Err(CompositorError::InvalidState(_))));
        assert!(matches!(states.release(1), Err(CompositorError::InvalidState(_))));

        states.release(0).unwrap();
        assert_eq!(states.get(0), Some(ImageState::CommittedToCompositor));
        assert!(matches!(states.release(0), Err(CompositorError::InvalidState(_))));

        states.acquire(0).unwrap();
        assert!(matches!(states.acquire(3), Err(CompositorError::InvalidState(_))));
        assert!(states.get(3).is_none());
    }

    #[test]
    fn failed_acquire_restores_state() {
        let mut states = ImageStates::new(2);
        let previous = states.acquire(0).unwrap();
        assert_eq!(previous, ImageState::Unused);
        states.revert_acquire(0, previous);
        assert_eq!(states.get(0), Some(ImageState::Unused));

        states.acquire(1).unwrap();
        states.release(1).unwrap();
        let previous = states.acquire(1).unwrap();
        assert_eq!(previous, ImageState::CommittedToCompositor);
        states.revert_acquire(1, previous);
        assert_eq!(states.get(1), Some(ImageState::CommittedToCompositor));

        // Only an acquired image is rolled back
        states.revert_acquire(1, ImageState::Unused);
        assert_eq!(states.get(1), Some(ImageState::CommittedToCompositor));
        states.revert_acquire(5, ImageState::Unused);

        // The restored image can be acquired again
        states.acquire(1).unwrap();
        states.acquire(0).unwrap();
    }

    #[test]
    fn releases_never_exceed_acquires() {
        let mut rng = rand::thread_rng();
        let mut states = ImageStates::new(4);
        let mut acquires = [0u32; 4];
        let mut releases = [0u32; 4];

        for _ in 0..2000 {
            let index = rng.gen_range(0..4u32);
            if rng.gen_bool(0.5) {
                if states.acquire(index).is_ok() {
                    acquires[index as usize] += 1;
                }
            } else if states.release(index).is_ok() {
                releases[index as usize] += 1;
            }

            for i in 0..4 {
                assert!(releases[i] <= acquires[i]);
                assert!(acquires[i] - releases[i] <= 1);
            }
        }
    }
}
