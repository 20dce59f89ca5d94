use std::sync::Arc;

use xrc_core::client::compositor::{ClientCompositorConfig, VkClientCompositor};
use xrc_core::client::swapchain::{ImageState, VkClientSwapchain};
use xrc_core::native::headless::HeadlessConfig;
use xrc_core::native::NativeCompositor;

mod test_common;

const ITERATIONS: usize = 1000;

fn cycle(swapchain: &VkClientSwapchain) {
    for _ in 0..ITERATIONS {
        let index = swapchain.acquire_image().unwrap();
        swapchain.wait_image(u64::MAX, index).unwrap();
        swapchain.release_image(index).unwrap();
    }
}

#[test]
fn concurrent_swapchains_share_the_queue() {
    let env = match test_common::make_env() {
        Some(env) => env,
        None => return,
    };
    let headless = test_common::make_headless(&env, HeadlessConfig::mesh());
    let native: Arc<dyn NativeCompositor> = headless.clone();
    let client = VkClientCompositor::new(&env, native, ClientCompositorConfig::minimal());

    let first = client.create_swapchain(&test_common::client_info()).unwrap();
    let second = client.create_swapchain(&test_common::client_info()).unwrap();

    std::thread::scope(|scope| {
        scope.spawn(|| cycle(&first));
        scope.spawn(|| cycle(&second));
    });

    unsafe { env.get_queue().wait_idle() }.unwrap();

    for swapchain in [&first, &second] {
        for index in 0..swapchain.image_count() {
            assert_ne!(swapchain.image_state(index), Some(ImageState::AcquiredByClient));
        }
    }
    assert_eq!(headless.live_swapchain_count(), 2);
}
