use ash::vk;

use crate::prelude::*;

#[inline]
pub fn make_full_viewport(size: Vec2u32) -> vk::Viewport {
    make_viewport(&RenderViewport::new(0, 0, size[0], size[1]))
}

#[inline]
pub fn make_full_rect(size: Vec2u32) -> vk::Rect2D {
    make_rect(&RenderViewport::new(0, 0, size[0], size[1]))
}

#[inline]
pub fn make_viewport(viewport: &RenderViewport) -> vk::Viewport {
    vk::Viewport {
        x: viewport.x as f32,
        y: viewport.y as f32,
        width: viewport.w as f32,
        height: viewport.h as f32,
        min_depth: 0.0,
        max_depth: 1.0
    }
}

#[inline]
pub fn make_rect(viewport: &RenderViewport) -> vk::Rect2D {
    vk::Rect2D {
        offset: vk::Offset2D{ x: viewport.x as i32, y: viewport.y as i32 },
        extent: vk::Extent2D{ width: viewport.w, height: viewport.h }
    }
}

#[inline]
pub fn full_color_range() -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        base_mip_level: 0,
        level_count: 1,
        base_array_layer: 0,
        layer_count: 1,
    }
}

/// Finds a memory type allowed by `type_bits` that has all of the requested properties.
pub fn find_memory_type_index(
    properties: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    flags: vk::MemoryPropertyFlags
) -> Option<u32> {
    (0..properties.memory_type_count).find(|index| {
        let supported = (type_bits & (1u32 << index)) != 0;
        supported && properties.memory_types[*index as usize].property_flags.contains(flags)
    })
}
