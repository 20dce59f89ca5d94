use std::fmt::{Debug, Formatter};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use ash::prelude::VkResult;
use ash::vk;

use crate::NamedUUID;
use crate::device::external::{DeviceCapabilities, ExternalFns};
use crate::instance::instance::InstanceContext;
use crate::vk::allocator::Allocator;
use crate::vk::command::CommandPool;

pub struct DeviceContext {
    weak: Weak<DeviceContext>,
    instance: Arc<InstanceContext>,
    id: NamedUUID,
    device: ash::Device,
    physical_device: vk::PhysicalDevice,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    capabilities: DeviceCapabilities,
    external: ExternalFns,
    main_queue: VkQueueTemplate,
}

impl DeviceContext {
    pub(crate) fn new(
        instance: Arc<InstanceContext>,
        device: ash::Device,
        physical_device: vk::PhysicalDevice,
        capabilities: DeviceCapabilities,
        main_queue: VkQueueTemplate,
    ) -> Arc<Self> {
        let memory_properties = unsafe { instance.vk().get_physical_device_memory_properties(physical_device) };
        let external = ExternalFns::load(instance.vk(), &device, &capabilities);

        Arc::new_cyclic(|weak| Self {
            weak: weak.clone(),
            instance,
            id: NamedUUID::with_str("Device"),
            device,
            physical_device,
            memory_properties,
            capabilities,
            external,
            main_queue,
        })
    }

    pub fn get_instance(&self) -> &Arc<InstanceContext> {
        &self.instance
    }

    pub fn vk(&self) -> &ash::Device {
        &self.device
    }

    pub fn get_physical_device(&self) -> &vk::PhysicalDevice {
        &self.physical_device
    }

    pub fn get_memory_properties(&self) -> &vk::PhysicalDeviceMemoryProperties {
        &self.memory_properties
    }

    pub fn get_capabilities(&self) -> &DeviceCapabilities {
        &self.capabilities
    }

    pub fn external(&self) -> &ExternalFns {
        &self.external
    }

    /// Returns the queue. Returns `None` only while the context is being dropped.
    pub fn get_main_queue(&self) -> Option<Queue> {
        self.weak.upgrade().map(|device| self.main_queue.promote(device))
    }
}

impl PartialEq for DeviceContext {
    fn eq(&self, other: &Self) -> bool {
        self.id.eq(&other.id)
    }
}

impl Eq for DeviceContext {
}

impl Debug for DeviceContext {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceContext")
            .field("id", &self.id)
            .field("capabilities", &self.capabilities)
            .finish()
    }
}

impl Drop for DeviceContext {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_device(None);
        }
    }
}

assert_impl_all!(DeviceContext: Send, Sync);

/// Internal struct used to prevent a cyclic dependency between the DeviceContext and the Queue
#[derive(Clone)]
pub(crate) struct VkQueueTemplate {
    queue: Arc<Mutex<vk::Queue>>,
    family: u32,
}

impl VkQueueTemplate {
    pub fn new(queue: vk::Queue, family: u32) -> Self {
        Self {
            queue: Arc::new(Mutex::new(queue)),
            family,
        }
    }

    pub fn promote(&self, device: Arc<DeviceContext>) -> Queue {
        Queue {
            device,
            queue: self.queue.clone(),
            family: self.family
        }
    }
}

/// The single queue shared by the client and compositor sides.
///
/// The raw handle is only reachable through the mutex. Every call that touches the queue,
/// including waiting for the whole device to go idle, holds the lock for its duration.
#[derive(Clone)]
pub struct Queue {
    device: Arc<DeviceContext>,
    queue: Arc<Mutex<vk::Queue>>,
    family: u32,
}

impl Queue {
    pub unsafe fn submit(&self, submits: &[vk::SubmitInfo], fence: Option<vk::Fence>) -> VkResult<()> {
        let fence = fence.unwrap_or(vk::Fence::null());

        let queue = self.lock_queue();
        log::trace!("Submitting {} batches", submits.len());
        self.device.vk().queue_submit(*queue, submits, fence)
    }

    pub unsafe fn wait_idle(&self) -> VkResult<()> {
        let queue = self.lock_queue();
        self.device.vk().queue_wait_idle(*queue)
    }

    /// Waits for the device to go idle while holding the queue lock.
    pub unsafe fn device_wait_idle(&self) -> VkResult<()> {
        let _queue = self.lock_queue();
        self.device.vk().device_wait_idle()
    }

    pub fn lock_queue(&self) -> MutexGuard<vk::Queue> {
        // A poisoned lock still guards a valid handle
        self.queue.lock().unwrap_or_else(|poisoned| {
            log::error!("Queue mutex poisoned");
            poisoned.into_inner()
        })
    }

    pub fn get_queue_family_index(&self) -> u32 {
        self.family
    }

    pub fn get_device(&self) -> &Arc<DeviceContext> {
        &self.device
    }
}

impl Debug for Queue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Queue").field("family", &self.family).finish()
    }
}

assert_impl_all!(Queue: Send, Sync);

/// Everything needed to create and submit gpu work.
#[derive(Clone)]
pub struct DeviceEnvironment {
    instance: Arc<InstanceContext>,
    device: Arc<DeviceContext>,
    allocator: Arc<Allocator>,
    queue: Queue,
    command_pool: Arc<CommandPool>,
}

impl DeviceEnvironment {
    pub(super) fn new(device: Arc<DeviceContext>, queue: Queue, allocator: Arc<Allocator>) -> VkResult<Self> {
        let instance = device.get_instance().clone();
        let command_pool = Arc::new(CommandPool::new(device.clone(), queue.get_queue_family_index())?);

        Ok(Self {
            instance,
            device,
            allocator,
            queue,
            command_pool,
        })
    }

    pub fn vk(&self) -> &ash::Device {
        self.device.vk()
    }

    pub fn get_device(&self) -> &Arc<DeviceContext> {
        &self.device
    }

    pub fn get_instance(&self) -> &Arc<InstanceContext> {
        &self.instance
    }

    pub fn get_allocator(&self) -> &Arc<Allocator> {
        &self.allocator
    }

    pub fn get_queue(&self) -> &Queue {
        &self.queue
    }

    pub fn get_command_pool(&self) -> &Arc<CommandPool> {
        &self.command_pool
    }

    pub fn get_capabilities(&self) -> &DeviceCapabilities {
        self.device.get_capabilities()
    }
}

impl Debug for DeviceEnvironment {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceEnvironment")
            .field("device", &self.device)
            .field("queue", &self.queue)
            .finish()
    }
}

assert_impl_all!(DeviceEnvironment: Send, Sync);
