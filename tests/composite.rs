use std::sync::Arc;

use xrc_core::client::compositor::{ClientCompositorConfig, VkClientCompositor};
use xrc_core::client::swapchain::VkClientSwapchain;
use xrc_core::native::headless::{HeadlessCompositor, HeadlessConfig};
use xrc_core::native::{NativeCompositor, NativeSwapchain};
use xrc_core::prelude::*;
use xrc_core::UUID;

mod test_common;

const RED: [f32; 4] = [1.0, 0.0, 0.0, 1.0];
const GREEN: [f32; 4] = [0.0, 1.0, 0.0, 1.0];

struct Setup {
    env: DeviceEnvironment,
    headless: Arc<HeadlessCompositor>,
    client: VkClientCompositor,
}

fn setup(config: HeadlessConfig) -> Option<Setup> {
    let env = test_common::make_env()?;
    let headless = test_common::make_headless(&env, config);
    let native: Arc<dyn NativeCompositor> = headless.clone();
    let client = VkClientCompositor::new(&env, native, ClientCompositorConfig::minimal());

    client.begin_session().unwrap();
    Some(Setup { env, headless, client })
}

/// Runs one frame that shows the swapchain filled with `color` in both views.
fn submit_color_frame(setup: &Setup, swapchain: &VkClientSwapchain, color: [f32; 4]) {
    let timing = setup.client.wait_frame().unwrap();
    setup.client.begin_frame(timing.frame_id).unwrap();

    let index = swapchain.acquire_image().unwrap();
    swapchain.wait_image(u64::MAX, index).unwrap();
    test_common::fill_image(&setup.env, swapchain.images()[index as usize], color);
    swapchain.release_image(index).unwrap();

    setup.client.layer_begin(timing.frame_id, timing.predicted_display_time_ns, BlendMode::Opaque).unwrap();
    setup.client.layer_stereo_projection(test_common::projection(swapchain, index)).unwrap();
    setup.client.layer_commit(timing.frame_id, None).unwrap();

    let stats = setup.headless.last_frame_stats().unwrap();
    assert_eq!(stats.frame_id, timing.frame_id);
    assert_eq!(stats.layer_count, 1);
    assert!(stats.rendered_projection);
}

fn composite_color(config: HeadlessConfig) {
    let setup = match setup(config) {
        Some(setup) => setup,
        None => return,
    };

    let swapchain = setup.client.create_swapchain(&test_common::client_info()).unwrap();

    submit_color_frame(&setup, &swapchain, RED);
    let pixels = setup.headless.read_target().unwrap();
    assert_eq!(test_common::view_centers(&pixels), [[255, 0, 0, 255]; 2]);

    // Every image of the fifo goes through the compositor once
    for _ in 0..swapchain.image_count() {
        submit_color_frame(&setup, &swapchain, GREEN);
    }
    let pixels = setup.headless.read_target().unwrap();
    assert_eq!(test_common::view_centers(&pixels), [[0, 255, 0, 255]; 2]);
}

#[test]
fn mesh_composite() {
    composite_color(HeadlessConfig::mesh());
}

#[test]
fn compute_composite() {
    composite_color(HeadlessConfig::compute(false));
}

#[test]
fn compute_timewarp_identity_poses() {
    let setup = match setup(HeadlessConfig::compute(true)) {
        Some(setup) => setup,
        None => return,
    };
    setup.headless.set_display_poses([Pose::identity(); 2]);

    let swapchain = setup.client.create_swapchain(&test_common::client_info()).unwrap();
    submit_color_frame(&setup, &swapchain, RED);

    let pixels = setup.headless.read_target().unwrap();
    assert_eq!(test_common::view_centers(&pixels), [[255, 0, 0, 255]; 2]);
}

#[test]
fn frame_without_projection_clears() {
    for (config, cleared) in [(HeadlessConfig::mesh(), [0, 0, 0, 0]), (HeadlessConfig::compute(false), [0, 0, 0, 255])] {
        let setup = match setup(config) {
            Some(setup) => setup,
            None => return,
        };

        let swapchain = setup.client.create_swapchain(&test_common::client_info()).unwrap();
        submit_color_frame(&setup, &swapchain, RED);

        let timing = setup.client.wait_frame().unwrap();
        setup.client.begin_frame(timing.frame_id).unwrap();
        setup.client.layer_begin(timing.frame_id, timing.predicted_display_time_ns, BlendMode::Opaque).unwrap();
        setup.client.layer_commit(timing.frame_id, None).unwrap();

        let stats = setup.headless.last_frame_stats().unwrap();
        assert_eq!(stats.layer_count, 0);
        assert!(!stats.rendered_projection);

        let pixels = setup.headless.read_target().unwrap();
        assert_eq!(test_common::view_centers(&pixels), [cleared; 2]);
    }
}

#[test]
fn read_before_first_frame() {
    let setup = match setup(HeadlessConfig::mesh()) {
        Some(setup) => setup,
        None => return,
    };

    let extent = setup.headless.target_extent();
    let pixels = setup.headless.read_target().unwrap();
    assert_eq!(pixels.len(), (extent.width * extent.height * 4) as usize);
    assert!(pixels.iter().all(|byte| *byte == 0));
}

#[test]
fn discarded_frame_drops_layers() {
    let setup = match setup(HeadlessConfig::mesh()) {
        Some(setup) => setup,
        None => return,
    };
    let swapchain = setup.client.create_swapchain(&test_common::client_info()).unwrap();

    let timing = setup.client.wait_frame().unwrap();
    setup.client.begin_frame(timing.frame_id).unwrap();
    setup.client.layer_begin(timing.frame_id, timing.predicted_display_time_ns, BlendMode::Opaque).unwrap();
    setup.client.layer_stereo_projection(test_common::projection(&swapchain, 0)).unwrap();
    setup.client.discard_frame(timing.frame_id).unwrap();

    assert!(matches!(setup.client.layer_commit(timing.frame_id, None), Err(CompositorError::InvalidState(_))));
    assert!(setup.headless.last_frame_stats().is_none());
}

#[derive(Debug)]
struct ForeignSwapchain {
    id: UUID,
}

impl NativeSwapchain for ForeignSwapchain {
    fn id(&self) -> UUID {
        self.id
    }

    fn image_count(&self) -> u32 {
        1
    }

    fn acquire_image(&self) -> Result<u32> {
        Ok(0)
    }

    fn wait_image(&self, _timeout_ns: u64, _index: u32) -> Result<()> {
        Ok(())
    }

    fn release_image(&self, _index: u32) -> Result<()> {
        Ok(())
    }
}

#[test]
fn foreign_swapchain_is_rejected() {
    let setup = match setup(HeadlessConfig::mesh()) {
        Some(setup) => setup,
        None => return,
    };

    let timing = setup.client.wait_frame().unwrap();
    setup.client.begin_frame(timing.frame_id).unwrap();
    setup.client.layer_begin(timing.frame_id, timing.predicted_display_time_ns, BlendMode::Opaque).unwrap();

    let foreign: Arc<dyn NativeSwapchain> = Arc::new(ForeignSwapchain { id: UUID::new() });
    let layer = Layer::Quad(QuadData {
        flags: LayerFlags::default(),
        sub: SubImage {
            swapchain: foreign,
            image_index: 0,
            array_index: 0,
            rect: RenderViewport::new(0, 0, 16, 16),
            norm_rect: NormalizedRect::FULL,
        },
        pose: Pose::identity(),
        size: Vec2f32::new(1.0, 1.0),
    });

    assert!(matches!(setup.headless.layer(layer), Err(CompositorError::InvalidState(_))));
}

#[test]
fn unsupported_swapchain_format() {
    let setup = match setup(HeadlessConfig::mesh()) {
        Some(setup) => setup,
        None => return,
    };

    let info = SwapchainCreateInfo::color(ash::vk::Format::R4G4_UNORM_PACK8, 16, 16);
    assert!(matches!(setup.client.create_swapchain(&info), Err(CompositorError::Unsupported(_))));
}

#[test]
fn swapchain_outlives_compositor() {
    let setup = match setup(HeadlessConfig::mesh()) {
        Some(setup) => setup,
        None => return,
    };

    let swapchain = setup.client.create_swapchain(&test_common::client_info()).unwrap();
    submit_color_frame(&setup, &swapchain, RED);
    assert_eq!(setup.headless.live_swapchain_count(), 1);

    drop(setup);
    swapchain.destroy();
}

#[test]
fn compositor_outlives_swapchain() {
    let setup = match setup(HeadlessConfig::mesh()) {
        Some(setup) => setup,
        None => return,
    };

    let swapchain = setup.client.create_swapchain(&test_common::client_info()).unwrap();
    submit_color_frame(&setup, &swapchain, RED);
    swapchain.destroy();

    assert_eq!(setup.headless.live_swapchain_count(), 0);
    setup.client.end_session().unwrap();
}
