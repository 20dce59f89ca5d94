#![allow(dead_code)]

use std::ffi::CString;
use std::sync::Arc;

use ash::vk;

use xrc_core::client::swapchain::VkClientSwapchain;
use xrc_core::device::init::{create_device, DeviceCreateConfig};
use xrc_core::hmd::{HmdOptics, NoDistortion};
use xrc_core::instance::debug_messenger::{CountingDebugMessenger, MessageCounts};
use xrc_core::instance::init::{create_instance, InstanceCreateConfig};
use xrc_core::native::headless::{HeadlessCompositor, HeadlessConfig};
use xrc_core::prelude::*;

pub const TARGET_WIDTH: u32 = 64;
pub const TARGET_HEIGHT: u32 = 32;

pub const CLIENT_WIDTH: u32 = 32;
pub const CLIENT_HEIGHT: u32 = 32;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn make_instance(messenger: Option<CountingDebugMessenger>) -> Option<Arc<InstanceContext>> {
    init_logging();

    let mut config = InstanceCreateConfig::new(CString::new("XRC Integration Tests").ok()?, vk::make_api_version(0, 0, 1, 0));
    config.enable_validation();
    if let Some(messenger) = messenger {
        config.add_debug_messenger(Box::new(messenger));
    }

    match create_instance(config) {
        Ok(instance) => Some(instance),
        Err(err) => {
            log::warn!("Skipping gpu test, no instance: {:?}", err);
            None
        }
    }
}

fn make_device(instance: Arc<InstanceContext>) -> Option<DeviceEnvironment> {
    match create_device(DeviceCreateConfig::new(), instance) {
        Ok(env) => Some(env),
        Err(err) => {
            log::warn!("Skipping gpu test, no device: {:?}", err);
            None
        }
    }
}

pub fn make_env() -> Option<DeviceEnvironment> {
    make_device(make_instance(None)?)
}

pub fn make_validated_env() -> Option<(DeviceEnvironment, Arc<MessageCounts>)> {
    let (messenger, counts) = CountingDebugMessenger::new();
    let env = make_device(make_instance(Some(messenger))?)?;
    Some((env, counts))
}

pub fn test_optics() -> HmdOptics {
    HmdOptics::side_by_side(Vec2u32::new(TARGET_WIDTH, TARGET_HEIGHT), Fov::symmetric(0.7), Arc::new(NoDistortion))
}

pub fn make_headless(env: &DeviceEnvironment, config: HeadlessConfig) -> Arc<HeadlessCompositor> {
    match HeadlessCompositor::new(env, test_optics(), config) {
        Ok(compositor) => compositor,
        Err(err) => panic!("Failed to create headless compositor {:?}", err),
    }
}

pub fn client_info() -> SwapchainCreateInfo {
    SwapchainCreateInfo::color(vk::Format::R8G8B8A8_UNORM, CLIENT_WIDTH, CLIENT_HEIGHT)
}

/// Clears a acquired color image. The image stays in `COLOR_ATTACHMENT_OPTIMAL`.
pub fn fill_image(env: &DeviceEnvironment, image: vk::Image, color: [f32; 4]) {
    let range = vk::ImageSubresourceRange {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        base_mip_level: 0,
        level_count: 1,
        base_array_layer: 0,
        layer_count: 1,
    };

    let to_transfer = vk::ImageMemoryBarrier::builder()
        .src_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
        .dst_access_mask(vk::AccessFlags::TRANSFER_WRITE)
        .old_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
        .new_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(range)
        .build();
    let to_attachment = vk::ImageMemoryBarrier::builder()
        .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
        .dst_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
        .old_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
        .new_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(range)
        .build();
    let clear = vk::ClearColorValue { float32: color };

    env.get_command_pool().submit_one_time(env.get_queue(), |device: &ash::Device, cmd: vk::CommandBuffer| unsafe {
        device.cmd_pipeline_barrier(cmd, vk::PipelineStageFlags::ALL_COMMANDS, vk::PipelineStageFlags::TRANSFER, vk::DependencyFlags::empty(), &[], &[], std::slice::from_ref(&to_transfer));
        device.cmd_clear_color_image(cmd, image, vk::ImageLayout::TRANSFER_DST_OPTIMAL, &clear, std::slice::from_ref(&range));
        device.cmd_pipeline_barrier(cmd, vk::PipelineStageFlags::TRANSFER, vk::PipelineStageFlags::ALL_COMMANDS, vk::DependencyFlags::empty(), &[], &[], std::slice::from_ref(&to_attachment));
    }).unwrap();
}

/// Both views show the whole image.
pub fn projection(swapchain: &VkClientSwapchain, index: u32) -> StereoProjectionData<&VkClientSwapchain> {
    let view = |_| ProjectionView {
        sub: SubImage {
            swapchain,
            image_index: index,
            array_index: 0,
            rect: RenderViewport::new(0, 0, CLIENT_WIDTH, CLIENT_HEIGHT),
            norm_rect: NormalizedRect::FULL,
        },
        fov: Fov::symmetric(0.7),
        pose: Pose::identity(),
    };

    StereoProjectionData {
        flags: LayerFlags::default(),
        views: [view(0), view(1)],
    }
}

pub fn pixel(bytes: &[u8], x: u32, y: u32) -> [u8; 4] {
    let offset = ((y * TARGET_WIDTH + x) * 4) as usize;
    [bytes[offset], bytes[offset + 1], bytes[offset + 2], bytes[offset + 3]]
}

/// The center pixel of both views.
pub fn view_centers(bytes: &[u8]) -> [[u8; 4]; 2] {
    let y = TARGET_HEIGHT / 2;
    [pixel(bytes, TARGET_WIDTH / 4, y), pixel(bytes, TARGET_WIDTH * 3 / 4, y)]
}
