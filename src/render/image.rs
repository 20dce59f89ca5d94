//! Image helpers: import and export of swapchain images through opaque fds and compositor
//! owned images backed by the pooled allocator.

use std::os::unix::io::{FromRawFd, IntoRawFd, OwnedFd};
use std::sync::Arc;

use ash::vk;

use crate::device::device::DeviceContext;
use crate::native::NativeImage;
use crate::prelude::*;
use crate::util::format::{image_usage_from_bits, view_aspect_mask};
use crate::util::vk::find_memory_type_index;
use crate::vk::allocator::{Allocation, AllocationStrategy, Allocator};

pub fn sample_count_flags(count: u32) -> vk::SampleCountFlags {
    match count {
        2 => vk::SampleCountFlags::TYPE_2,
        4 => vk::SampleCountFlags::TYPE_4,
        8 => vk::SampleCountFlags::TYPE_8,
        16 => vk::SampleCountFlags::TYPE_16,
        32 => vk::SampleCountFlags::TYPE_32,
        64 => vk::SampleCountFlags::TYPE_64,
        _ => vk::SampleCountFlags::TYPE_1,
    }
}

fn swapchain_image_flags(info: &SwapchainCreateInfo) -> vk::ImageCreateFlags {
    let mut flags = vk::ImageCreateFlags::empty();
    if info.bits.contains(SwapchainUsageBits::MUTABLE_FORMAT) {
        flags |= vk::ImageCreateFlags::MUTABLE_FORMAT;
    }
    if info.face_count == 6 {
        flags |= vk::ImageCreateFlags::CUBE_COMPATIBLE;
    }
    flags
}

/// Image create info shared by the importing and the exporting side. Both sides must agree on
/// every parameter for the memory to be compatible.
fn swapchain_image_info<'a>(info: &SwapchainCreateInfo) -> vk::ImageCreateInfoBuilder<'a> {
    vk::ImageCreateInfo::builder()
        .flags(swapchain_image_flags(info))
        .image_type(vk::ImageType::TYPE_2D)
        .format(info.format)
        .extent(vk::Extent3D { width: info.width, height: info.height, depth: 1 })
        .mip_levels(info.mip_count.max(1))
        .array_layers(info.layer_count())
        .samples(sample_count_flags(info.sample_count))
        .tiling(vk::ImageTiling::OPTIMAL)
        .usage(image_usage_from_bits(info.bits, info.format))
        .sharing_mode(vk::SharingMode::EXCLUSIVE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
}

fn device_local_type(device: &DeviceContext, requirements: &vk::MemoryRequirements) -> Result<u32> {
    find_memory_type_index(device.get_memory_properties(), requirements.memory_type_bits, vk::MemoryPropertyFlags::DEVICE_LOCAL)
        .or_else(|| find_memory_type_index(device.get_memory_properties(), requirements.memory_type_bits, vk::MemoryPropertyFlags::empty()))
        .ok_or_else(|| {
            log::error!("No memory type for image with type bits {:#X}", requirements.memory_type_bits);
            CompositorError::Gpu(vk::Result::ERROR_FEATURE_NOT_PRESENT)
        })
}

/// Imports a image exported by the native compositor.
///
/// The fd of the native image is consumed if the import succeeds and closed otherwise.
pub fn image_from_external(env: &DeviceEnvironment, info: &SwapchainCreateInfo, native: NativeImage) -> Result<(vk::Image, vk::DeviceMemory)> {
    let device = env.get_device();

    let mut external_info = vk::ExternalMemoryImageCreateInfo::builder()
        .handle_types(vk::ExternalMemoryHandleTypeFlags::OPAQUE_FD);
    let image_info = swapchain_image_info(info)
        .push_next(&mut external_info);

    let image = unsafe { device.vk().create_image(&image_info, None) }.map_err(|err| {
        log::error!("Failed to create image for import: {:?}", err);
        err
    })?;

    let requirements = unsafe { device.vk().get_image_memory_requirements(image) };
    let memory_type = match device_local_type(device, &requirements) {
        Ok(index) => index,
        Err(err) => {
            unsafe { device.vk().destroy_image(image, None) };
            return Err(err);
        }
    };

    let raw_fd = native.fd.into_raw_fd();
    let mut import_info = vk::ImportMemoryFdInfoKHR::builder()
        .handle_type(vk::ExternalMemoryHandleTypeFlags::OPAQUE_FD)
        .fd(raw_fd);
    let mut dedicated_info = vk::MemoryDedicatedAllocateInfo::builder()
        .image(image);

    let mut alloc_info = vk::MemoryAllocateInfo::builder()
        .allocation_size(native.size)
        .memory_type_index(memory_type)
        .push_next(&mut import_info);
    if native.use_dedicated_allocation {
        alloc_info = alloc_info.push_next(&mut dedicated_info);
    }

    let memory = match unsafe { device.vk().allocate_memory(&alloc_info, None) } {
        Ok(memory) => memory,
        Err(err) => {
            log::error!("Failed to import image memory: {:?}", err);
            // Ownership of the fd only transfers on success
            drop(unsafe { OwnedFd::from_raw_fd(raw_fd) });
            unsafe { device.vk().destroy_image(image, None) };
            return Err(err.into());
        }
    };

    if let Err(err) = unsafe { device.vk().bind_image_memory(image, memory, 0) } {
        log::error!("Failed to bind imported image memory: {:?}", err);
        unsafe {
            device.vk().destroy_image(image, None);
            device.vk().free_memory(memory, None);
        }
        return Err(err.into());
    }

    Ok((image, memory))
}

/// Creates a image with dedicated memory that can be shared through a opaque fd.
///
/// Returns the image, its memory, the exported fd and the size of the allocation.
pub fn create_exportable_image(env: &DeviceEnvironment, info: &SwapchainCreateInfo) -> Result<(vk::Image, vk::DeviceMemory, OwnedFd, vk::DeviceSize)> {
    let device = env.get_device();

    let mut external_info = vk::ExternalMemoryImageCreateInfo::builder()
        .handle_types(vk::ExternalMemoryHandleTypeFlags::OPAQUE_FD);
    let image_info = swapchain_image_info(info)
        .push_next(&mut external_info);

    let image = unsafe { device.vk().create_image(&image_info, None) }?;

    let requirements = unsafe { device.vk().get_image_memory_requirements(image) };
    let memory_type = match device_local_type(device, &requirements) {
        Ok(index) => index,
        Err(err) => {
            unsafe { device.vk().destroy_image(image, None) };
            return Err(err);
        }
    };

    let mut export_info = vk::ExportMemoryAllocateInfo::builder()
        .handle_types(vk::ExternalMemoryHandleTypeFlags::OPAQUE_FD);
    let mut dedicated_info = vk::MemoryDedicatedAllocateInfo::builder()
        .image(image);
    let alloc_info = vk::MemoryAllocateInfo::builder()
        .allocation_size(requirements.size)
        .memory_type_index(memory_type)
        .push_next(&mut export_info)
        .push_next(&mut dedicated_info);

    let memory = match unsafe { device.vk().allocate_memory(&alloc_info, None) } {
        Ok(memory) => memory,
        Err(err) => {
            unsafe { device.vk().destroy_image(image, None) };
            return Err(err.into());
        }
    };

    let destroy = || unsafe {
        device.vk().destroy_image(image, None);
        device.vk().free_memory(memory, None);
    };

    if let Err(err) = unsafe { device.vk().bind_image_memory(image, memory, 0) } {
        destroy();
        return Err(err.into());
    }

    match unsafe { device.external().get_memory_fd(device.vk(), memory) } {
        Ok(fd) => Ok((image, memory, fd, requirements.size)),
        Err(err) => {
            log::error!("Failed to export image memory: {:?}", err);
            destroy();
            Err(err.into())
        }
    }
}

pub fn create_view(device: &DeviceContext, image: vk::Image, format: vk::Format, view_type: vk::ImageViewType, base_layer: u32, layer_count: u32) -> Result<vk::ImageView> {
    let info = vk::ImageViewCreateInfo::builder()
        .image(image)
        .view_type(view_type)
        .format(format)
        .components(vk::ComponentMapping::default())
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask: view_aspect_mask(format),
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: base_layer,
            layer_count,
        });

    Ok(unsafe { device.vk().create_image_view(&info, None) }?)
}

/// A clamp to edge sampler without mipmapping.
pub fn create_sampler(device: &DeviceContext, filter: vk::Filter) -> Result<vk::Sampler> {
    let info = vk::SamplerCreateInfo::builder()
        .mag_filter(filter)
        .min_filter(filter)
        .mipmap_mode(vk::SamplerMipmapMode::NEAREST)
        .address_mode_u(vk::SamplerAddressMode::CLAMP_TO_EDGE)
        .address_mode_v(vk::SamplerAddressMode::CLAMP_TO_EDGE)
        .address_mode_w(vk::SamplerAddressMode::CLAMP_TO_EDGE)
        .max_anisotropy(1.0)
        .min_lod(0.0)
        .max_lod(vk::LOD_CLAMP_NONE)
        .border_color(vk::BorderColor::FLOAT_TRANSPARENT_BLACK);

    Ok(unsafe { device.vk().create_sampler(&info, None) }?)
}

/// A single layer 2d image owned by the compositor with a view covering it.
pub struct AllocatedImage {
    device: Arc<DeviceContext>,
    allocator: Arc<Allocator>,
    image: vk::Image,
    view: vk::ImageView,
    allocation: Option<Allocation>,
    extent: vk::Extent2D,
    format: vk::Format,
}

impl AllocatedImage {
    pub fn handle(&self) -> vk::Image {
        self.image
    }

    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn format(&self) -> vk::Format {
        self.format
    }
}

impl Drop for AllocatedImage {
    fn drop(&mut self) {
        unsafe {
            if self.view != vk::ImageView::null() {
                self.device.vk().destroy_image_view(self.view, None);
            }
            self.device.vk().destroy_image(self.image, None);
        }
        if let Some(allocation) = self.allocation.take() {
            self.allocator.free(allocation);
        }
    }
}

/// Creates a optimally tiled gpu only image from the pooled allocator.
pub fn create_image_simple(env: &DeviceEnvironment, extent: vk::Extent2D, format: vk::Format, usage: vk::ImageUsageFlags) -> Result<AllocatedImage> {
    let device = env.get_device().clone();

    let info = vk::ImageCreateInfo::builder()
        .image_type(vk::ImageType::TYPE_2D)
        .format(format)
        .extent(vk::Extent3D { width: extent.width, height: extent.height, depth: 1 })
        .mip_levels(1)
        .array_layers(1)
        .samples(vk::SampleCountFlags::TYPE_1)
        .tiling(vk::ImageTiling::OPTIMAL)
        .usage(usage)
        .sharing_mode(vk::SharingMode::EXCLUSIVE)
        .initial_layout(vk::ImageLayout::UNDEFINED);

    let image = unsafe { device.vk().create_image(&info, None) }?;

    let mut result = AllocatedImage {
        device,
        allocator: env.get_allocator().clone(),
        image,
        view: vk::ImageView::null(),
        allocation: None,
        extent,
        format,
    };

    let allocation = env.get_allocator().allocate_image_memory(image, AllocationStrategy::AutoGpuOnly, "compositor image")?;
    unsafe { result.device.vk().bind_image_memory(image, allocation.memory(), allocation.offset()) }?;
    result.allocation = Some(allocation);

    result.view = create_view(&result.device, image, format, vk::ImageViewType::TYPE_2D, 0, 1)?;
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cube_and_mutable_flags() {
        let mut info = SwapchainCreateInfo::color(vk::Format::R8G8B8A8_SRGB, 64, 64);
        assert_eq!(swapchain_image_flags(&info), vk::ImageCreateFlags::empty());

        info.face_count = 6;
        info.bits = info.bits | SwapchainUsageBits::MUTABLE_FORMAT;
        assert_eq!(swapchain_image_flags(&info), vk::ImageCreateFlags::MUTABLE_FORMAT | vk::ImageCreateFlags::CUBE_COMPATIBLE);
        assert_eq!(info.layer_count(), 6);
    }

    #[test]
    fn sample_counts() {
        assert_eq!(sample_count_flags(0), vk::SampleCountFlags::TYPE_1);
        assert_eq!(sample_count_flags(4), vk::SampleCountFlags::TYPE_4);
        assert_eq!(sample_count_flags(3), vk::SampleCountFlags::TYPE_1);
    }

    #[test]
    fn export_then_import() {
        let env = match crate::vk::test::make_headless_instance_device() {
            Some(env) => env,
            None => return,
        };
        if !env.get_capabilities().external_memory_fd {
            log::warn!("Skipping image import test, no external memory support");
            return;
        }

        let info = SwapchainCreateInfo::color(vk::Format::R8G8B8A8_UNORM, 32, 32);
        let (exported, exported_memory, fd, size) = create_exportable_image(&env, &info).unwrap();

        let (imported, imported_memory) = image_from_external(&env, &info, NativeImage { fd, size, use_dedicated_allocation: true }).unwrap();

        unsafe {
            env.vk().destroy_image(imported, None);
            env.vk().free_memory(imported_memory, None);
            env.vk().destroy_image(exported, None);
            env.vk().free_memory(exported_memory, None);
        }
    }
}
