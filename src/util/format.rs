//! Format and layout tables used when transitioning swapchain images.

use ash::vk;

use crate::types::SwapchainUsageBits;

/// Color formats the client side offers for swapchains.
pub const CLIENT_SWAPCHAIN_FORMATS: [vk::Format; 4] = [
    vk::Format::B8G8R8A8_SRGB,
    vk::Format::R8G8B8A8_SRGB,
    vk::Format::B8G8R8A8_UNORM,
    vk::Format::R8G8B8A8_UNORM,
];

pub fn is_depth_only(format: vk::Format) -> bool {
    matches!(format, vk::Format::D16_UNORM | vk::Format::X8_D24_UNORM_PACK32 | vk::Format::D32_SFLOAT)
}

pub fn is_stencil_only(format: vk::Format) -> bool {
    matches!(format, vk::Format::S8_UINT)
}

pub fn is_depth_stencil(format: vk::Format) -> bool {
    matches!(format, vk::Format::D16_UNORM_S8_UINT | vk::Format::D24_UNORM_S8_UINT | vk::Format::D32_SFLOAT_S8_UINT)
}

pub fn has_depth(format: vk::Format) -> bool {
    is_depth_only(format) || is_depth_stencil(format)
}

pub fn has_stencil(format: vk::Format) -> bool {
    is_stencil_only(format) || is_depth_stencil(format)
}

pub fn is_color(format: vk::Format) -> bool {
    !has_depth(format) && !has_stencil(format)
}

/// The attachment layout a freshly acquired image of the format is transitioned to.
pub fn barrier_optimal_layout(format: vk::Format) -> vk::ImageLayout {
    if is_color(format) {
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
    } else {
        vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
    }
}

/// Accesses the client may perform on a image created with the usage bits.
pub fn barrier_access_mask(bits: SwapchainUsageBits) -> vk::AccessFlags {
    let mut result = vk::AccessFlags::empty();

    if bits.contains(SwapchainUsageBits::UNORDERED_ACCESS) {
        result |= vk::AccessFlags::INPUT_ATTACHMENT_READ;
        if bits.contains(SwapchainUsageBits::COLOR) {
            result |= vk::AccessFlags::COLOR_ATTACHMENT_READ;
        }
        if bits.contains(SwapchainUsageBits::DEPTH_STENCIL) {
            result |= vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ;
        }
    }
    if bits.contains(SwapchainUsageBits::COLOR) {
        result |= vk::AccessFlags::COLOR_ATTACHMENT_WRITE;
    }
    if bits.contains(SwapchainUsageBits::DEPTH_STENCIL) {
        result |= vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE;
    }
    if bits.contains(SwapchainUsageBits::TRANSFER_SRC) {
        result |= vk::AccessFlags::TRANSFER_READ;
    }
    if bits.contains(SwapchainUsageBits::TRANSFER_DST) {
        result |= vk::AccessFlags::TRANSFER_WRITE;
    }
    if bits.contains(SwapchainUsageBits::SAMPLED) {
        result |= vk::AccessFlags::SHADER_READ;
    }

    result
}

/// Aspect mask used in barriers. Depth stencil formats transition both aspects.
pub fn barrier_aspect_mask(format: vk::Format) -> vk::ImageAspectFlags {
    if is_depth_stencil(format) {
        vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
    } else {
        view_aspect_mask(format)
    }
}

/// Aspect mask used for sampled views. Depth stencil formats are viewed as depth only.
pub fn view_aspect_mask(format: vk::Format) -> vk::ImageAspectFlags {
    if has_depth(format) {
        vk::ImageAspectFlags::DEPTH
    } else if has_stencil(format) {
        vk::ImageAspectFlags::STENCIL
    } else {
        vk::ImageAspectFlags::COLOR
    }
}

/// Vulkan image usage needed to back a swapchain created with the usage bits.
pub fn image_usage_from_bits(bits: SwapchainUsageBits, format: vk::Format) -> vk::ImageUsageFlags {
    let mut usage = vk::ImageUsageFlags::empty();

    if bits.contains(SwapchainUsageBits::COLOR) {
        usage |= vk::ImageUsageFlags::COLOR_ATTACHMENT;
    }
    if bits.contains(SwapchainUsageBits::DEPTH_STENCIL) {
        usage |= vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT;
    }
    if bits.contains(SwapchainUsageBits::UNORDERED_ACCESS) {
        usage |= vk::ImageUsageFlags::STORAGE;
    }
    if bits.contains(SwapchainUsageBits::TRANSFER_SRC) {
        usage |= vk::ImageUsageFlags::TRANSFER_SRC;
    }
    if bits.contains(SwapchainUsageBits::TRANSFER_DST) {
        usage |= vk::ImageUsageFlags::TRANSFER_DST;
    }
    if bits.contains(SwapchainUsageBits::INPUT_ATTACHMENT) {
        usage |= vk::ImageUsageFlags::INPUT_ATTACHMENT;
    }

    // The compositor always samples from swapchain images
    usage |= vk::ImageUsageFlags::SAMPLED;
    if is_color(format) {
        // Used to initialise the image layout on the native side
        usage |= vk::ImageUsageFlags::TRANSFER_DST;
    }

    usage
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn optimal_layouts() {
        assert_eq!(barrier_optimal_layout(vk::Format::R8G8B8A8_SRGB), vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
        assert_eq!(barrier_optimal_layout(vk::Format::D32_SFLOAT), vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL);
        assert_eq!(barrier_optimal_layout(vk::Format::D24_UNORM_S8_UINT), vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL);
        assert_eq!(barrier_optimal_layout(vk::Format::S8_UINT), vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL);
    }

    #[test]
    fn access_masks() {
        let color = barrier_access_mask(SwapchainUsageBits::COLOR | SwapchainUsageBits::SAMPLED);
        assert_eq!(color, vk::AccessFlags::COLOR_ATTACHMENT_WRITE | vk::AccessFlags::SHADER_READ);

        let unordered = barrier_access_mask(SwapchainUsageBits::UNORDERED_ACCESS | SwapchainUsageBits::COLOR);
        assert!(unordered.contains(vk::AccessFlags::INPUT_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_READ));
        assert!(!unordered.contains(vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ));

        let transfer = barrier_access_mask(SwapchainUsageBits::TRANSFER_SRC | SwapchainUsageBits::TRANSFER_DST);
        assert_eq!(transfer, vk::AccessFlags::TRANSFER_READ | vk::AccessFlags::TRANSFER_WRITE);

        assert_eq!(barrier_access_mask(SwapchainUsageBits::empty()), vk::AccessFlags::empty());
    }

    #[test]
    fn aspect_masks() {
        assert_eq!(barrier_aspect_mask(vk::Format::D24_UNORM_S8_UINT), vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL);
        assert_eq!(view_aspect_mask(vk::Format::D24_UNORM_S8_UINT), vk::ImageAspectFlags::DEPTH);
        assert_eq!(view_aspect_mask(vk::Format::S8_UINT), vk::ImageAspectFlags::STENCIL);
        assert_eq!(view_aspect_mask(vk::Format::B8G8R8A8_UNORM), vk::ImageAspectFlags::COLOR);
    }
}
