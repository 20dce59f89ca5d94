use std::collections::HashSet;
use std::ffi::{CStr, CString};
use std::sync::Arc;

use ash::vk;
use ash::vk::PhysicalDeviceType;

use crate::device::device::{DeviceContext, DeviceEnvironment, VkQueueTemplate};
use crate::device::external::{self, DeviceCapabilities};
use crate::instance::instance::{InstanceContext, VulkanVersion};
use crate::vk::allocator::Allocator;

pub type DeviceRatingFn = dyn Fn(&InstanceContext, vk::PhysicalDevice) -> Option<f32>;

pub struct DeviceCreateConfig {
    required_extensions: HashSet<CString>,
    rating_fn: Box<DeviceRatingFn>,
}

impl DeviceCreateConfig {
    pub fn new() -> Self {
        let mut required_extensions = HashSet::new();
        required_extensions.insert(CString::from(external::extension_name(external::EXTERNAL_MEMORY_FD_NAME)));

        Self {
            required_extensions,
            rating_fn: Box::new(Self::default_rating)
        }
    }

    pub fn add_required_extension(&mut self, extension: &CStr) {
        self.required_extensions.insert(CString::from(extension));
    }

    pub fn set_rating_fn(&mut self, rating_fn: Box<DeviceRatingFn>) {
        self.rating_fn = rating_fn;
    }

    fn default_rating(instance: &InstanceContext, device: vk::PhysicalDevice) -> Option<f32> {
        let properties = unsafe { instance.vk().get_physical_device_properties(device) };
        Some(match properties.device_type {
            PhysicalDeviceType::DISCRETE_GPU => 10.0f32,
            PhysicalDeviceType::INTEGRATED_GPU => 5.0f32,
            _ => 0.0f32,
        })
    }
}

#[derive(Debug)]
pub enum DeviceCreateError {
    Vulkan(vk::Result),
    NoSupportedDevice,
}

impl From<vk::Result> for DeviceCreateError {
    fn from(result: vk::Result) -> Self {
        DeviceCreateError::Vulkan(result)
    }
}

/// Creates a device with a single queue supporting graphics and compute.
///
/// The external semaphore and fence fd extensions, timeline semaphores and dynamic sampler array
/// indexing are enabled when the selected device supports them. The result is recorded in the
/// [`DeviceCapabilities`] of the returned context.
pub fn create_device(config: DeviceCreateConfig, instance: Arc<InstanceContext>) -> Result<DeviceEnvironment, DeviceCreateError> {
    if !instance.get_version().is_at_least(VulkanVersion::VK_1_1) {
        log::error!("External memory requires vulkan 1.1 but instance only supports {:?}", instance.get_version());
        return Err(DeviceCreateError::NoSupportedDevice);
    }

    let selected_device = filter_devices(
        unsafe { instance.vk().enumerate_physical_devices()? },
        &*instance,
        &config.required_extensions,
        config.rating_fn.as_ref()
    )?;

    let properties = unsafe { instance.vk().get_physical_device_properties(selected_device.device) };
    log::info!("Selected device {:?} with api version {:?}, capabilities: {:?}",
        unsafe { CStr::from_ptr(properties.device_name.as_ptr()) },
        VulkanVersion::from_raw(properties.api_version),
        selected_device.capabilities
    );

    let mut extensions = config.required_extensions.clone();
    if selected_device.capabilities.external_semaphore_fd {
        extensions.insert(CString::from(external::extension_name(external::EXTERNAL_SEMAPHORE_FD_NAME)));
    }
    if selected_device.capabilities.external_fence_fd {
        extensions.insert(CString::from(external::extension_name(external::EXTERNAL_FENCE_FD_NAME)));
    }
    let extensions_str: Vec<_> = extensions.iter().map(|ext| ext.as_c_str().as_ptr()).collect();

    let features = vk::PhysicalDeviceFeatures::builder()
        .shader_sampled_image_array_dynamic_indexing(selected_device.capabilities.sampled_image_array_dynamic_indexing)
        .build();
    let mut features1_2 = vk::PhysicalDeviceVulkan12Features::builder()
        .timeline_semaphore(selected_device.capabilities.timeline_semaphore)
        .build();

    let priorities = [1.0f32];
    let queue_create_infos = [vk::DeviceQueueCreateInfo::builder()
        .queue_family_index(selected_device.queue_family)
        .queue_priorities(&priorities)
        .build()
    ];

    let mut vk_device_create_info = vk::DeviceCreateInfo::builder()
        .enabled_extension_names(extensions_str.as_slice())
        .queue_create_infos(&queue_create_infos)
        .enabled_features(&features);
    if selected_device.device_version.is_at_least(VulkanVersion::VK_1_2) {
        vk_device_create_info = vk_device_create_info.push_next(&mut features1_2);
    }

    let device = unsafe { instance.vk().create_device(selected_device.device, &vk_device_create_info, None)? };

    let queue = unsafe { device.get_device_queue(selected_device.queue_family, 0) };
    let queue_template = VkQueueTemplate::new(queue, selected_device.queue_family);

    let context = DeviceContext::new(
        instance.clone(),
        device,
        selected_device.device,
        selected_device.capabilities,
        queue_template.clone(),
    );
    let queue = queue_template.promote(context.clone());

    let allocator = Allocator::new(context.clone()).map_err(|err| {
        log::error!("Failed to create allocator: {:?}", err);
        DeviceCreateError::Vulkan(vk::Result::ERROR_INITIALIZATION_FAILED)
    })?;

    Ok(DeviceEnvironment::new(context, queue, Arc::new(allocator))?)
}

fn filter_devices(
    devices: Vec<vk::PhysicalDevice>,
    instance: &InstanceContext,
    required_extensions: &HashSet<CString>,
    rating_fn: &DeviceRatingFn
) -> Result<PhysicalDeviceConfig, DeviceCreateError> {
    let mut best_device: Option<PhysicalDeviceConfig> = None;
    for device in devices {
        if let Some(config) = process_device(instance, device, required_extensions, rating_fn)? {
            best_device = if let Some(old) = best_device {
                if config.rating > old.rating {
                    Some(config)
                } else {
                    Some(old)
                }
            } else {
                Some(config)
            }
        }
    }

    best_device.ok_or(DeviceCreateError::NoSupportedDevice)
}

fn process_device(
    instance: &InstanceContext,
    device: vk::PhysicalDevice,
    required_extensions: &HashSet<CString>,
    rating_fn: &DeviceRatingFn,
) -> Result<Option<PhysicalDeviceConfig>, DeviceCreateError> {
    let properties = unsafe { instance.vk().get_physical_device_properties(device) };
    // Features beyond the instance api version may not be used even if the device supports them
    let device_version = std::cmp::min(VulkanVersion::from_raw(properties.api_version), instance.get_version());
    if !device_version.is_at_least(VulkanVersion::VK_1_1) {
        return Ok(None);
    }

    // Verify extensions
    let available_extensions: HashSet<_> = unsafe { instance.vk().enumerate_device_extension_properties(device)? }
        .into_iter().map(|ext| {
        CString::from(unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) })
    }).collect();

    if !required_extensions.is_subset(&available_extensions) {
        return Ok(None);
    }

    let queue_families = unsafe { instance.vk().get_physical_device_queue_family_properties(device) };
    let queue_family = match select_queue_family(&queue_families) {
        Some(family) => family,
        None => return Ok(None),
    };

    let rating = match rating_fn(instance, device) {
        Some(rating) => rating,
        None => return Ok(None)
    };

    let capabilities = query_capabilities(instance, device, device_version, &available_extensions);

    Ok(Some(PhysicalDeviceConfig {
        device,
        device_version,
        rating,
        queue_family,
        capabilities,
    }))
}

fn select_queue_family(properties: &[vk::QueueFamilyProperties]) -> Option<u32> {
    properties.iter().position(|props| {
        props.queue_count > 0 && props.queue_flags.contains(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE)
    }).map(|family| family as u32)
}

fn query_capabilities(
    instance: &InstanceContext,
    device: vk::PhysicalDevice,
    device_version: VulkanVersion,
    available_extensions: &HashSet<CString>,
) -> DeviceCapabilities {
    let has_extension = |name: &'static [u8]| available_extensions.contains(external::extension_name(name));

    let features = unsafe { instance.vk().get_physical_device_features(device) };

    let timeline_semaphore = if device_version.is_at_least(VulkanVersion::VK_1_2) {
        let mut features1_2 = vk::PhysicalDeviceVulkan12Features::default();
        let mut features2 = vk::PhysicalDeviceFeatures2::builder().push_next(&mut features1_2);
        unsafe { instance.vk().get_physical_device_features2(device, &mut features2) };
        features1_2.timeline_semaphore == vk::TRUE
    } else {
        false
    };

    let external_semaphore_fd = has_extension(external::EXTERNAL_SEMAPHORE_FD_NAME);
    let external_fence_fd = has_extension(external::EXTERNAL_FENCE_FD_NAME);

    let fence_sync_fd_export = external_fence_fd && {
        let info = vk::PhysicalDeviceExternalFenceInfo::builder()
            .handle_type(vk::ExternalFenceHandleTypeFlags::SYNC_FD);
        let mut properties = vk::ExternalFenceProperties::default();
        unsafe { instance.vk().get_physical_device_external_fence_properties(device, &info, &mut properties) };

        properties.external_fence_features.contains(vk::ExternalFenceFeatureFlags::EXPORTABLE | vk::ExternalFenceFeatureFlags::IMPORTABLE)
    };

    let timeline_semaphore_opaque_fd = timeline_semaphore && external_semaphore_fd && {
        let mut type_info = vk::SemaphoreTypeCreateInfo::builder()
            .semaphore_type(vk::SemaphoreType::TIMELINE)
            .initial_value(0);
        let info = vk::PhysicalDeviceExternalSemaphoreInfo::builder()
            .handle_type(vk::ExternalSemaphoreHandleTypeFlags::OPAQUE_FD)
            .push_next(&mut type_info);
        let mut properties = vk::ExternalSemaphoreProperties::default();
        unsafe { instance.vk().get_physical_device_external_semaphore_properties(device, &info, &mut properties) };

        properties.external_semaphore_features.contains(vk::ExternalSemaphoreFeatureFlags::EXPORTABLE | vk::ExternalSemaphoreFeatureFlags::IMPORTABLE)
    };

    DeviceCapabilities {
        timeline_semaphore,
        external_memory_fd: has_extension(external::EXTERNAL_MEMORY_FD_NAME),
        external_semaphore_fd,
        external_fence_fd,
        fence_sync_fd_export,
        timeline_semaphore_opaque_fd,
        sampled_image_array_dynamic_indexing: features.shader_sampled_image_array_dynamic_indexing == vk::TRUE,
    }
}

#[derive(Debug)]
struct PhysicalDeviceConfig {
    device: vk::PhysicalDevice,
    device_version: VulkanVersion,
    rating: f32,
    queue_family: u32,
    capabilities: DeviceCapabilities,
}
