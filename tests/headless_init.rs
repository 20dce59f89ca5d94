use xrc_core::device::init::{create_device, DeviceCreateConfig};

mod test_common;

#[test]
fn init_device() {
    let env = match test_common::make_env() {
        Some(env) => env,
        None => return,
    };

    let capabilities = env.get_capabilities();
    assert!(capabilities.external_memory_fd);
    log::info!("Device capabilities {:?}", capabilities);

    let queue = env.get_queue();
    assert_eq!(queue.get_queue_family_index(), env.get_command_pool().get_queue_family_index());
    unsafe { queue.wait_idle() }.unwrap();
}

#[test]
fn init_two_devices_on_one_instance() {
    let env = match test_common::make_env() {
        Some(env) => env,
        None => return,
    };

    let second = match create_device(DeviceCreateConfig::new(), env.get_instance().clone()) {
        Ok(second) => second,
        Err(err) => panic!("Failed to create second device {:?}", err),
    };
    assert_eq!(second.get_device().get_physical_device(), env.get_device().get_physical_device());

    drop(env);
    unsafe { second.get_queue().device_wait_idle() }.unwrap();
}
