use std::sync::Arc;

use ash::vk;

use xrc_core::hmd::{HmdOptics, NoDistortion};
use xrc_core::prelude::*;
use xrc_core::render::gfx::GfxRendering;
use xrc_core::render::image::create_image_simple;
use xrc_core::render::resources::{RenderResources, COMPUTE_POOL_SETS};
use xrc_core::render::shaders::Shaders;
use xrc_core::render::target::{GfxTarget, GfxTargetCache, GfxTargetData};

mod test_common;

#[test]
fn init_and_close_without_validation_errors() {
    let (env, counts) = match test_common::make_validated_env() {
        Some(env) => env,
        None => return,
    };

    {
        let shaders = Shaders::load(env.get_device().clone()).unwrap();
        let mut optics = test_common::test_optics().with_mesh_cells(16);
        let resources = RenderResources::init(&env, shaders, &mut optics).unwrap();

        assert!(resources.get_vbo().is_some());
        assert!(resources.get_ibo().is_some());
        assert_eq!(resources.get_mesh().cells, 16);
        assert!(resources.get_distortion_views().iter().all(|view| *view != vk::ImageView::null()));
        assert_ne!(resources.get_mock_view(), vk::ImageView::null());
        assert_ne!(resources.get_timewarp_pipeline(), resources.get_distortion_pipeline());

        resources.close();
    }

    unsafe { env.get_queue().device_wait_idle() }.unwrap();
    assert_eq!(counts.errors(), 0);
}

#[test]
fn init_twice_on_one_device() {
    let env = match test_common::make_env() {
        Some(env) => env,
        None => return,
    };

    let shaders = Shaders::load(env.get_device().clone()).unwrap();
    for _ in 0..2 {
        let mut optics = HmdOptics::north_star([Fov::symmetric(0.7); 2], [Pose::identity(); 2], Arc::new(NoDistortion));
        let resources = RenderResources::init(&env, shaders.clone(), &mut optics).unwrap();
        assert_eq!(resources.get_mesh().cells, 8);
        resources.close();
    }
}

#[test]
fn compute_sets_are_bounded() {
    let env = match test_common::make_env() {
        Some(env) => env,
        None => return,
    };

    let shaders = Shaders::load(env.get_device().clone()).unwrap();
    let resources = RenderResources::init(&env, shaders, &mut test_common::test_optics()).unwrap();

    let sets: Vec<_> = (0..COMPUTE_POOL_SETS).map(|_| resources.allocate_compute_set().unwrap()).collect();
    assert_eq!(resources.outstanding_compute_sets(), COMPUTE_POOL_SETS);
    assert!(matches!(resources.allocate_compute_set(), Err(CompositorError::Gpu(vk::Result::ERROR_OUT_OF_POOL_MEMORY))));

    for _ in &sets {
        resources.release_compute_set();
    }
    assert_eq!(resources.outstanding_compute_sets(), 0);

    // The pool was reset and hands out sets again
    resources.allocate_compute_set().unwrap();
    resources.release_compute_set();
}

#[test]
fn one_target_per_mesh_rendering() {
    let env = match test_common::make_env() {
        Some(env) => env,
        None => return,
    };

    let shaders = Shaders::load(env.get_device().clone()).unwrap();
    let resources = RenderResources::init(&env, shaders, &mut test_common::test_optics()).unwrap();

    let format = vk::Format::R8G8B8A8_UNORM;
    let extent = vk::Extent2D { width: 16, height: 16 };
    let image = create_image_simple(&env, extent, format, vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::SAMPLED).unwrap();

    let cache = GfxTargetCache::new(resources.clone());
    let target_resources = cache.get(format, false).unwrap();
    assert!(Arc::ptr_eq(&target_resources, &cache.get(format, false).unwrap()));
    assert_eq!(cache.len(), 1);

    let data = GfxTargetData { format, is_external: false, width: extent.width, height: extent.height };
    let target = GfxTarget::new(target_resources, image.view(), data).unwrap();

    let mut rendering = GfxRendering::new(resources.clone()).unwrap();
    rendering.begin_target(&target).unwrap();
    assert!(matches!(rendering.begin_target(&target), Err(CompositorError::InvalidState(_))));
    assert!(matches!(rendering.end_view(), Err(CompositorError::InvalidState(_))));
    rendering.end_target().unwrap();
    assert!(rendering.is_ended());
}
