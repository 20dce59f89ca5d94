use std::os::unix::io::OwnedFd;
use std::sync::Arc;

use xrc_core::client::compositor::{ClientCompositorConfig, VkClientCompositor};
use xrc_core::client::swapchain::VkClientSwapchain;
use xrc_core::client::sync::CommitPath;
use xrc_core::native::headless::{FrameSync, HeadlessCompositor, HeadlessConfig};
use xrc_core::native::NativeCompositor;
use xrc_core::prelude::*;
use xrc_core::vk::sync::Fence;

mod test_common;

fn setup(config: ClientCompositorConfig) -> Option<(DeviceEnvironment, Arc<HeadlessCompositor>, VkClientCompositor)> {
    let env = test_common::make_env()?;
    let headless = test_common::make_headless(&env, HeadlessConfig::mesh());
    let native: Arc<dyn NativeCompositor> = headless.clone();
    let client = VkClientCompositor::new(&env, native, config);

    client.begin_session().unwrap();
    Some((env, headless, client))
}

/// Submits one projection frame and commits it with the given handle.
fn frame(env: &DeviceEnvironment, client: &VkClientCompositor, swapchain: &VkClientSwapchain, sync_handle: Option<OwnedFd>) -> CommitPath {
    let timing = client.wait_frame().unwrap();
    client.begin_frame(timing.frame_id).unwrap();

    let index = swapchain.acquire_image().unwrap();
    swapchain.wait_image(u64::MAX, index).unwrap();
    test_common::fill_image(env, swapchain.images()[index as usize], [0.0, 0.0, 1.0, 1.0]);
    swapchain.release_image(index).unwrap();

    client.layer_begin(timing.frame_id, timing.predicted_display_time_ns, BlendMode::Opaque).unwrap();
    client.layer_stereo_projection(test_common::projection(swapchain, index)).unwrap();
    client.layer_commit(timing.frame_id, sync_handle).unwrap()
}

#[test]
fn timeline_commits() {
    let (env, headless, client) = match setup(ClientCompositorConfig::default()) {
        Some(setup) => setup,
        None => return,
    };
    if !client.has_timeline() {
        log::warn!("Skipping timeline commit test, no timeline semaphore support");
        return;
    }

    let swapchain = client.create_swapchain(&test_common::client_info()).unwrap();
    let mut last = client.timeline_value().unwrap();

    for _ in 0..5 {
        assert_eq!(frame(&env, &client, &swapchain, None), CommitPath::TimelineSemaphore);

        let value = client.timeline_value().unwrap();
        assert_eq!(value, last + 1);
        assert_eq!(headless.last_frame_stats().unwrap().sync, FrameSync::Semaphore { value });
        last = value;
    }

    let pixels = headless.read_target().unwrap();
    assert_eq!(test_common::view_centers(&pixels), [[0, 0, 255, 255]; 2]);
}

#[test]
fn fence_export_commit() {
    let config = ClientCompositorConfig {
        use_timeline_semaphore: false,
        use_fence_export: true,
    };
    let (env, headless, client) = match setup(config) {
        Some(setup) => setup,
        None => return,
    };
    if !client.capabilities(false).fence_export {
        log::warn!("Skipping fence export commit test, sync fd export is not supported");
        return;
    }

    let swapchain = client.create_swapchain(&test_common::client_info()).unwrap();
    assert_eq!(frame(&env, &client, &swapchain, None), CommitPath::ExportedFence);
    assert!(matches!(headless.last_frame_stats().unwrap().sync, FrameSync::Handle | FrameSync::None));
}

#[test]
fn explicit_handle_commit() {
    let (env, headless, client) = match setup(ClientCompositorConfig::default()) {
        Some(setup) => setup,
        None => return,
    };
    let capabilities = env.get_capabilities();
    if !capabilities.external_fence_fd || !capabilities.fence_sync_fd_export {
        log::warn!("Skipping explicit handle commit test, sync fd export is not supported");
        return;
    }

    let swapchain = client.create_swapchain(&test_common::client_info()).unwrap();

    let fence = Fence::new_exportable(env.get_device().clone()).unwrap();
    unsafe { env.get_queue().submit(&[], Some(fence.handle())) }.unwrap();
    let fd = match fence.export_sync_fd().unwrap() {
        Some(fd) => fd,
        None => return,
    };

    // The handle takes precedence over the timeline semaphore
    assert_eq!(frame(&env, &client, &swapchain, Some(fd)), CommitPath::ExplicitHandle);
    assert_eq!(headless.last_frame_stats().unwrap().sync, FrameSync::Handle);
}

#[test]
fn minimal_config_waits_for_idle() {
    let (env, headless, client) = match setup(ClientCompositorConfig::minimal()) {
        Some(setup) => setup,
        None => return,
    };
    assert!(!client.has_timeline());
    assert_eq!(client.timeline_value(), None);

    let swapchain = client.create_swapchain(&test_common::client_info()).unwrap();
    assert_eq!(frame(&env, &client, &swapchain, None), CommitPath::DeviceWaitIdle);
    assert_eq!(headless.last_frame_stats().unwrap().sync, FrameSync::None);
}

#[test]
fn frame_stats_are_bounded() {
    let (_, headless, client) = match setup(ClientCompositorConfig::minimal()) {
        Some(setup) => setup,
        None => return,
    };

    for _ in 0..70 {
        let timing = client.wait_frame().unwrap();
        client.layer_begin(timing.frame_id, timing.predicted_display_time_ns, BlendMode::Opaque).unwrap();
        client.layer_commit(timing.frame_id, None).unwrap();
    }

    let stats = headless.frame_stats();
    assert_eq!(stats.len(), 64);
    assert!(stats.windows(2).all(|pair| pair[1].frame_id == pair[0].frame_id + 1));
    assert_eq!(stats.last().map(|stats| stats.frame_id), Some(70));
}
