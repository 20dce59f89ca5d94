use std::collections::HashSet;
use std::ffi::{c_void, CStr, CString};
use std::fmt::Debug;
use std::str::Utf8Error;
use std::sync::Arc;

use ash::vk;

use crate::instance::instance::{VulkanVersion, InstanceContext};
use crate::instance::debug_messenger::DebugMessengerCallback;

const VALIDATION_LAYER_NAME: &[u8] = b"VK_LAYER_KHRONOS_validation\0";
const DEBUG_UTILS_EXTENSION_NAME: &[u8] = b"VK_EXT_debug_utils\0";

#[derive(Debug)]
pub struct InstanceCreateConfig {
    application_name: CString,
    application_version: u32,
    debug_messengers: Vec<DebugUtilsMessengerWrapper>,
    enable_validation: bool,
    require_validation: bool,
    required_extensions: HashSet<CString>,
}

impl InstanceCreateConfig {
    pub fn new(application_name: CString, application_version: u32) -> Self {
        Self {
            application_name,
            application_version,
            debug_messengers: Vec::new(),
            enable_validation: false,
            require_validation: false,
            required_extensions: HashSet::new(),
        }
    }

    pub fn add_debug_messenger(&mut self, messenger: Box<dyn DebugMessengerCallback>) {
        self.debug_messengers.push(DebugUtilsMessengerWrapper{ callback: messenger });
    }

    /// Enables the khronos validation layer if it is installed.
    pub fn enable_validation(&mut self) {
        self.enable_validation = true;
    }

    /// Enables the khronos validation layer and fails instance creation if it is not installed.
    pub fn require_validation(&mut self) {
        self.enable_validation = true;
        self.require_validation = true;
    }

    pub fn add_required_extension(&mut self, extension: &CStr) {
        self.required_extensions.insert(CString::from(extension));
    }
}

#[derive(Debug)]
pub enum InstanceCreateError {
    Vulkan(vk::Result),
    Loading(String),
    MissingExtension(CString),
    MissingLayer(CString),
    Utf8Error(Utf8Error),
}

impl From<vk::Result> for InstanceCreateError {
    fn from(result: vk::Result) -> Self {
        InstanceCreateError::Vulkan(result)
    }
}

impl From<Utf8Error> for InstanceCreateError {
    fn from(err: Utf8Error) -> Self {
        InstanceCreateError::Utf8Error(err)
    }
}

impl From<ash::LoadingError> for InstanceCreateError {
    fn from(err: ash::LoadingError) -> Self {
        InstanceCreateError::Loading(format!("{:?}", err))
    }
}

pub fn create_instance(config: InstanceCreateConfig) -> Result<Arc<InstanceContext>, InstanceCreateError> {
    log::info!("Creating vulkan instance with config: {:?}", config);

    let entry = unsafe { ash::Entry::load() }?;

    let vulkan_version;
    if let Some(version) = entry.try_enumerate_instance_version()? {
        vulkan_version = VulkanVersion::from_raw(version);
    } else {
        vulkan_version = VulkanVersion::VK_1_0;
    }
    log::info!("Vulkan instance version: {:?}", vulkan_version);

    // Timeline semaphores and external handles are core in 1.2. Older loaders reject higher api versions.
    let api_version = if vulkan_version.is_at_least(VulkanVersion::VK_1_2) {
        VulkanVersion::VK_1_2
    } else {
        vulkan_version
    };

    let mut required_extensions = config.required_extensions;
    if !config.debug_messengers.is_empty() {
        required_extensions.insert(CString::from(CStr::from_bytes_with_nul(DEBUG_UTILS_EXTENSION_NAME).unwrap_or_default()));
    }

    let available_extensions: HashSet<_> = entry.enumerate_instance_extension_properties(None)?
        .into_iter().map(|ext| {
            CString::from(unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) })
        }).collect();

    let mut required_extensions_str = Vec::with_capacity(required_extensions.len());
    for name in &required_extensions {
        if available_extensions.contains(name) {
            required_extensions_str.push(name.as_c_str().as_ptr())
        } else {
            return Err(InstanceCreateError::MissingExtension(name.clone()));
        }
    }

    let validation_layer = CStr::from_bytes_with_nul(VALIDATION_LAYER_NAME).unwrap_or_default();
    let required_layers = if config.enable_validation {
        let available_layers: HashSet<_> = entry.enumerate_instance_layer_properties()?
            .into_iter().map(|layer| {
                CString::from(unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) })
            }).collect();

        if available_layers.contains(validation_layer) {
            log::info!("Validation layers enabled");
            vec![validation_layer.as_ptr()]
        } else if config.require_validation {
            return Err(InstanceCreateError::MissingLayer(CString::from(validation_layer)));
        } else {
            log::warn!("Validation layers requested but not installed");
            Vec::new()
        }
    } else {
        log::info!("Validation layers disabled");
        Vec::new()
    };

    let engine_name = CStr::from_bytes_with_nul(b"XRC-Core\0").unwrap_or_default();
    let application_info = vk::ApplicationInfo::builder()
        .application_name(config.application_name.as_c_str())
        .application_version(config.application_version)
        .engine_name(engine_name)
        .engine_version(vk::make_api_version(0, 0, 1, 0))
        .api_version(api_version.get_raw());

    let instance_create_info = vk::InstanceCreateInfo::builder()
        .application_info(&application_info)
        .enabled_layer_names(required_layers.as_slice())
        .enabled_extension_names(required_extensions_str.as_slice());

    let instance = unsafe { entry.create_instance(&instance_create_info, None) }?;

    let debug_messengers = config.debug_messengers.into_boxed_slice();
    let debug_utils = if debug_messengers.is_empty() {
        None
    } else {
        let debug_utils = ash::extensions::ext::DebugUtils::new(&entry, &instance);

        let mut handles = Vec::with_capacity(debug_messengers.len());
        for messenger in debug_messengers.iter() {
            let info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
                .message_severity(vk::DebugUtilsMessageSeverityFlagsEXT::INFO | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR)
                .message_type(vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE | vk::DebugUtilsMessageTypeFlagsEXT::GENERAL)
                .pfn_user_callback(Some(debug_utils_messenger_callback_wrapper))
                // Sadly this const to mut cast is necessary since the callback provides a mut pointer
                .user_data(messenger as *const DebugUtilsMessengerWrapper as *mut DebugUtilsMessengerWrapper as *mut c_void);

            match unsafe { debug_utils.create_debug_utils_messenger(&info, None) } {
                Ok(handle) => handles.push(handle),
                Err(err) => {
                    unsafe {
                        for handle in handles {
                            debug_utils.destroy_debug_utils_messenger(handle, None);
                        }
                        instance.destroy_instance(None);
                    }
                    return Err(err.into());
                }
            }
        }

        Some((debug_utils, handles))
    };

    Ok(Arc::new(InstanceContext::new(
        api_version,
        entry,
        instance,
        debug_utils,
        debug_messengers
    )))
}

#[derive(Debug)]
pub struct DebugUtilsMessengerWrapper {
    callback: Box<dyn DebugMessengerCallback>
}

extern "system" fn debug_utils_messenger_callback_wrapper(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_types: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    p_user_data: *mut c_void
) -> vk::Bool32 {
    std::panic::catch_unwind(|| {
        if let Some(callback) = unsafe { (p_user_data as *const DebugUtilsMessengerWrapper).as_ref() } {
            let data = unsafe {
                p_callback_data.as_ref().unwrap_or_else(|| std::process::abort()) // If this is null something went very wrong
            };
            let message = unsafe { CStr::from_ptr(data.p_message) };

            // This is called by c code so we must catch any panics
            callback.callback.on_message(message_severity, message_types, message, data);
        } else {
            log::warn!("Wrapped debug utils messenger was called with null user data!");
        }
    }).unwrap_or_else(|_| {
        log::error!("Debug utils messenger panicked! Aborting...");
        std::process::abort();
    });

    return vk::FALSE;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::debug_messenger::RustLogDebugMessenger;

    #[test]
    fn basic_init() {
        let _ = env_logger::builder().is_test(true).try_init();

        let mut config = InstanceCreateConfig::new(
            CString::from(CStr::from_bytes_with_nul(b"XRCCoreTest\0").unwrap()),
            1,
        );
        config.enable_validation();
        config.add_debug_messenger(Box::new(RustLogDebugMessenger::new()));

        match create_instance(config) {
            Ok(instance) => assert!(instance.get_version().is_at_least(VulkanVersion::VK_1_0)),
            Err(InstanceCreateError::Loading(err)) => log::warn!("No vulkan loader available, skipping: {}", err),
            Err(InstanceCreateError::MissingExtension(ext)) => log::warn!("Missing {:?}, skipping", ext),
            Err(err) => panic!("Instance creation failed: {:?}", err),
        }
    }
}
