//! Headless contexts for tests. Every helper returns `None` if the machine has no usable vulkan
//! implementation so gpu tests can skip instead of failing.

use std::ffi::CString;
use std::sync::Arc;

use ash::vk;

use crate::device::device::DeviceEnvironment;
use crate::device::init::{create_device, DeviceCreateConfig};
use crate::instance::debug_messenger::{CountingDebugMessenger, MessageCounts};
use crate::instance::init::{create_instance, InstanceCreateConfig};
use crate::instance::instance::InstanceContext;

fn make_instance(messenger: Option<CountingDebugMessenger>) -> Option<Arc<InstanceContext>> {
    let _ = env_logger::builder().is_test(true).try_init();

    let mut config = InstanceCreateConfig::new(
        CString::new("XRC Tests").ok()?,
        vk::make_api_version(0, 0, 1, 0)
    );
    config.enable_validation();
    if let Some(messenger) = messenger {
        config.add_debug_messenger(Box::new(messenger));
    }

    match create_instance(config) {
        Ok(instance) => Some(instance),
        Err(err) => {
            log::warn!("Skipping gpu test, failed to create instance: {:?}", err);
            None
        }
    }
}

pub fn make_headless_instance() -> Option<Arc<InstanceContext>> {
    make_instance(None)
}

pub fn make_headless_instance_device() -> Option<DeviceEnvironment> {
    let instance = make_headless_instance()?;
    make_device(instance)
}

/// Like [`make_headless_instance_device`] but also counts validation messages.
pub fn make_validated_instance_device() -> Option<(DeviceEnvironment, Arc<MessageCounts>)> {
    let (messenger, counts) = CountingDebugMessenger::new();
    let instance = make_instance(Some(messenger))?;
    Some((make_device(instance)?, counts))
}

fn make_device(instance: Arc<InstanceContext>) -> Option<DeviceEnvironment> {
    match create_device(DeviceCreateConfig::new(), instance) {
        Ok(device) => Some(device),
        Err(err) => {
            log::warn!("Skipping gpu test, failed to create device: {:?}", err);
            None
        }
    }
}
