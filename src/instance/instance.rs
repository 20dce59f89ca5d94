use std::fmt::{Debug, Formatter};

use ash::vk;

use crate::instance::init::DebugUtilsMessengerWrapper;
use crate::NamedUUID;

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd)]
pub struct VulkanVersion(u32);

impl VulkanVersion {
    pub const VK_1_0: VulkanVersion = VulkanVersion(vk::API_VERSION_1_0);
    pub const VK_1_1: VulkanVersion = VulkanVersion(vk::API_VERSION_1_1);
    pub const VK_1_2: VulkanVersion = VulkanVersion(vk::API_VERSION_1_2);

    pub const fn from_raw(value: u32) -> Self {
        Self(value)
    }

    pub const fn get_major(&self) -> u32 {
        vk::api_version_major(self.0)
    }

    pub const fn get_minor(&self) -> u32 {
        vk::api_version_minor(self.0)
    }

    pub const fn get_raw(&self) -> u32 {
        self.0
    }

    /// Compares major and minor only. Patch levels never affect feature availability.
    pub fn is_at_least(&self, other: VulkanVersion) -> bool {
        (self.get_major(), self.get_minor()) >= (other.get_major(), other.get_minor())
    }
}

impl Debug for VulkanVersion {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&format!("VulkanVersion({}.{}.{})", vk::api_version_major(self.0), vk::api_version_minor(self.0), vk::api_version_patch(self.0)))
    }
}

pub struct InstanceContext {
    id: NamedUUID,
    version: VulkanVersion,
    _entry: ash::Entry,
    instance: ash::Instance,
    debug_utils: Option<(ash::extensions::ext::DebugUtils, Vec<vk::DebugUtilsMessengerEXT>)>,
    _debug_messengers: Box<[DebugUtilsMessengerWrapper]>,
}

impl InstanceContext {
    pub(super) fn new(
        version: VulkanVersion,
        entry: ash::Entry,
        instance: ash::Instance,
        debug_utils: Option<(ash::extensions::ext::DebugUtils, Vec<vk::DebugUtilsMessengerEXT>)>,
        debug_messengers: Box<[DebugUtilsMessengerWrapper]>,
    ) -> Self {
        Self {
            id: NamedUUID::with_str("Instance"),
            version,
            _entry: entry,
            instance,
            debug_utils,
            _debug_messengers: debug_messengers,
        }
    }

    pub fn vk(&self) -> &ash::Instance {
        &self.instance
    }

    pub fn get_version(&self) -> VulkanVersion {
        self.version
    }
}

impl Drop for InstanceContext {
    fn drop(&mut self) {
        unsafe {
            if let Some((debug_utils, messengers)) = self.debug_utils.take() {
                for messenger in messengers {
                    debug_utils.destroy_debug_utils_messenger(messenger, None);
                }
            }
            self.instance.destroy_instance(None);
        }
    }
}

impl PartialEq for InstanceContext {
    fn eq(&self, other: &Self) -> bool {
        self.id.eq(&other.id)
    }
}

impl Eq for InstanceContext {
}

impl Debug for InstanceContext {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceContext")
            .field("id", &self.id)
            .field("version", &self.version)
            .finish()
    }
}

assert_impl_all!(InstanceContext: Send, Sync);
