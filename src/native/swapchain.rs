//! Swapchains of the headless compositor.

use std::fmt::{Debug, Formatter};
use std::sync::{Arc, Mutex};

use ash::vk;
use concurrent_queue::ConcurrentQueue;

use crate::native::{NativeImage, NativeSwapchain};
use crate::prelude::*;
use crate::render::image::{create_exportable_image, create_view};
use crate::util::format::barrier_aspect_mask;
use crate::UUID;

pub const HEADLESS_IMAGE_COUNT: u32 = 3;

pub fn image_count_for(info: &SwapchainCreateInfo) -> u32 {
    if info.create.contains(SwapchainCreateFlags::STATIC_IMAGE) {
        1
    } else {
        HEADLESS_IMAGE_COUNT
    }
}

struct SwapchainImage {
    image: vk::Image,
    memory: vk::DeviceMemory,

    /// One 2d view per array layer.
    views: Vec<vk::ImageView>,
}

pub struct HeadlessSwapchain {
    id: UUID,
    env: DeviceEnvironment,
    info: SwapchainCreateInfo,
    images: Vec<SwapchainImage>,
    fifo: ConcurrentQueue<u32>,
    latest_released: Mutex<Option<u32>>,
}

impl HeadlessSwapchain {
    /// Allocates the exportable images and returns a fd for each of them.
    pub fn new(env: &DeviceEnvironment, info: &SwapchainCreateInfo) -> Result<(Arc<Self>, Vec<NativeImage>)> {
        let count = image_count_for(info);

        let mut swapchain = Self {
            id: UUID::new(),
            env: env.clone(),
            info: *info,
            images: Vec::with_capacity(count as usize),
            fifo: ConcurrentQueue::bounded(count as usize),
            latest_released: Mutex::new(None),
        };

        let mut natives = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let (image, memory, fd, size) = create_exportable_image(env, info)?;
            swapchain.images.push(SwapchainImage { image, memory, views: Vec::new() });
            natives.push(NativeImage { fd, size, use_dedicated_allocation: true });

            let views = swapchain.create_views(image)?;
            if let Some(last) = swapchain.images.last_mut() {
                last.views = views;
            }
        }

        swapchain.transition_images()?;

        for index in 0..count {
            // The queue was created with room for every index
            let _ = swapchain.fifo.push(index);
        }

        log::debug!("Created headless swapchain {:?} with {} {:?} images of {}x{}", swapchain.id, count, info.format, info.width, info.height);
        Ok((Arc::new(swapchain), natives))
    }

    fn create_views(&self, image: vk::Image) -> Result<Vec<vk::ImageView>> {
        let device = self.env.get_device();
        let mut views = Vec::with_capacity(self.info.layer_count() as usize);
        for layer in 0..self.info.layer_count() {
            match create_view(device, image, self.info.format, vk::ImageViewType::TYPE_2D, layer, 1) {
                Ok(view) => views.push(view),
                Err(err) => {
                    for view in views {
                        unsafe { device.vk().destroy_image_view(view, None) };
                    }
                    return Err(err);
                }
            }
        }
        Ok(views)
    }

    fn transition_images(&self) -> Result<()> {
        let barriers: Vec<_> = self.images.iter().map(|image| {
            vk::ImageMemoryBarrier::builder()
                .src_access_mask(vk::AccessFlags::empty())
                .dst_access_mask(vk::AccessFlags::SHADER_READ)
                .old_layout(vk::ImageLayout::UNDEFINED)
                .new_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .image(image.image)
                .subresource_range(vk::ImageSubresourceRange {
                    aspect_mask: barrier_aspect_mask(self.info.format),
                    base_mip_level: 0,
                    level_count: vk::REMAINING_MIP_LEVELS,
                    base_array_layer: 0,
                    layer_count: vk::REMAINING_ARRAY_LAYERS,
                })
                .build()
        }).collect();

        self.env.get_command_pool().submit_one_time(self.env.get_queue(), |device: &ash::Device, cmd: vk::CommandBuffer| unsafe {
            device.cmd_pipeline_barrier(
                cmd,
                vk::PipelineStageFlags::TOP_OF_PIPE,
                vk::PipelineStageFlags::ALL_COMMANDS,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &barriers
            );
        }).map_err(|err| {
            log::error!("Failed to transition headless swapchain images: {:?}", err);
            CompositorError::FailedToSubmit(err)
        })
    }

    pub fn info(&self) -> &SwapchainCreateInfo {
        &self.info
    }

    pub fn get_image(&self, index: u32) -> Option<vk::Image> {
        self.images.get(index as usize).map(|image| image.image)
    }

    pub fn get_view(&self, index: u32, array_index: u32) -> Option<vk::ImageView> {
        self.images.get(index as usize).and_then(|image| image.views.get(array_index as usize).copied())
    }

    /// The index most recently handed back by the client.
    pub fn latest_released(&self) -> Option<u32> {
        *self.latest_released.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check_index(&self, index: u32) -> Result<()> {
        if index as usize >= self.images.len() {
            log::error!("Image index {} out of range for swapchain {:?}", index, self.id);
            return Err(CompositorError::InvalidState("swapchain image index out of range"));
        }
        Ok(())
    }
}

impl NativeSwapchain for HeadlessSwapchain {
    fn id(&self) -> UUID {
        self.id
    }

    fn image_count(&self) -> u32 {
        self.images.len() as u32
    }

    fn acquire_image(&self) -> Result<u32> {
        self.fifo.pop().map_err(|_| CompositorError::NoImageAvailable)
    }

    fn wait_image(&self, _timeout_ns: u64, index: u32) -> Result<()> {
        self.check_index(index)
    }

    fn release_image(&self, index: u32) -> Result<()> {
        self.check_index(index)?;
        self.fifo.push(index).map_err(|_| CompositorError::NoImageAvailable)?;
        *self.latest_released.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(index);
        Ok(())
    }
}

impl Debug for HeadlessSwapchain {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeadlessSwapchain")
            .field("id", &self.id)
            .field("format", &self.info.format)
            .field("image_count", &self.images.len())
            .finish()
    }
}

impl Drop for HeadlessSwapchain {
    fn drop(&mut self) {
        if let Err(err) = unsafe { self.env.get_queue().device_wait_idle() } {
            log::error!("Failed to wait for device idle before destroying swapchain {:?}: {:?}", self.id, err);
        }

        let device = self.env.vk();
        for image in self.images.drain(..) {
            unsafe {
                for view in image.views {
                    device.destroy_image_view(view, None);
                }
                device.destroy_image(image.image, None);
                device.free_memory(image.memory, None);
            }
        }
    }
}

assert_impl_all!(HeadlessSwapchain: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_images_have_one_image() {
        let mut info = SwapchainCreateInfo::color(vk::Format::R8G8B8A8_UNORM, 16, 16);
        assert_eq!(image_count_for(&info), 3);

        info.create = SwapchainCreateFlags::STATIC_IMAGE;
        assert_eq!(image_count_for(&info), 1);
    }

    #[test]
    fn fifo_cycle() {
        let env = match crate::vk::test::make_headless_instance_device() {
            Some(env) => env,
            None => return,
        };
        if !env.get_capabilities().external_memory_fd {
            return;
        }

        let info = SwapchainCreateInfo::color(vk::Format::R8G8B8A8_UNORM, 32, 32);
        let (swapchain, images) = HeadlessSwapchain::new(&env, &info).unwrap();
        assert_eq!(images.len(), 3);
        assert_eq!(swapchain.image_count(), 3);

        let indices: Vec<_> = (0..3).map(|_| swapchain.acquire_image().unwrap()).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        assert!(matches!(swapchain.acquire_image(), Err(CompositorError::NoImageAvailable)));

        swapchain.release_image(1).unwrap();
        assert_eq!(swapchain.latest_released(), Some(1));
        assert_eq!(swapchain.acquire_image().unwrap(), 1);
        assert!(swapchain.get_view(0, 0).is_some());
        assert!(swapchain.get_view(0, 1).is_none());
    }
}
