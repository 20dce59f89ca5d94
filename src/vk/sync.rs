use std::fmt::{Debug, Formatter};
use std::os::unix::io::OwnedFd;
use std::sync::Arc;

use ash::prelude::VkResult;
use ash::vk;

use crate::device::device::DeviceContext;
use crate::UUID;

/// A fence owned by the compositor. Destroyed on drop.
pub struct Fence {
    device: Arc<DeviceContext>,
    handle: vk::Fence,
}

impl Fence {
    pub fn new(device: Arc<DeviceContext>) -> VkResult<Self> {
        let handle = unsafe { device.vk().create_fence(&vk::FenceCreateInfo::builder(), None) }?;
        Ok(Self { device, handle })
    }

    /// Creates a fence whose payload can be exported as a sync fd once it has been submitted.
    pub fn new_exportable(device: Arc<DeviceContext>) -> VkResult<Self> {
        let mut export_info = vk::ExportFenceCreateInfo::builder()
            .handle_types(vk::ExternalFenceHandleTypeFlags::SYNC_FD);
        let info = vk::FenceCreateInfo::builder()
            .push_next(&mut export_info);

        let handle = unsafe { device.vk().create_fence(&info, None) }?;
        Ok(Self { device, handle })
    }

    /// Creates a fence carrying the payload of a sync fd. Takes ownership of the fd.
    pub fn from_sync_fd(device: Arc<DeviceContext>, fd: OwnedFd) -> VkResult<Self> {
        let fence = Self::new(device)?;
        unsafe { fence.device.external().import_fence_sync_fd(fence.device.vk(), fence.handle, fd) }?;
        Ok(fence)
    }

    pub fn handle(&self) -> vk::Fence {
        self.handle
    }

    pub fn wait(&self, timeout_ns: u64) -> VkResult<()> {
        unsafe { self.device.vk().wait_for_fences(std::slice::from_ref(&self.handle), true, timeout_ns) }
    }

    pub fn reset(&self) -> VkResult<()> {
        unsafe { self.device.vk().reset_fences(std::slice::from_ref(&self.handle)) }
    }

    /// Exports the pending payload. Must only be called after the fence was submitted.
    pub fn export_sync_fd(&self) -> VkResult<Option<OwnedFd>> {
        unsafe { self.device.external().get_fence_sync_fd(self.device.vk(), self.handle) }
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        unsafe { self.device.vk().destroy_fence(self.handle, None) };
    }
}

impl Debug for Fence {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("vkFence(Handle: {:?})", self.handle))
    }
}

/// A timeline semaphore owned by the compositor. Destroyed on drop.
pub struct TimelineSemaphore {
    id: UUID,
    device: Arc<DeviceContext>,
    handle: vk::Semaphore,
}

impl TimelineSemaphore {
    pub fn new(device: Arc<DeviceContext>, initial_value: u64) -> VkResult<Self> {
        Self::create(device, initial_value, false)
    }

    /// Creates a timeline semaphore that can be exported as a opaque fd.
    pub fn new_exportable(device: Arc<DeviceContext>, initial_value: u64) -> VkResult<Self> {
        Self::create(device, initial_value, true)
    }

    /// Creates a timeline semaphore and replaces its payload with the imported opaque fd.
    pub fn from_opaque_fd(device: Arc<DeviceContext>, fd: OwnedFd) -> VkResult<Self> {
        let semaphore = Self::create(device, 0, false)?;
        unsafe { semaphore.device.external().import_semaphore_fd(semaphore.device.vk(), semaphore.handle, fd) }?;
        Ok(semaphore)
    }

    fn create(device: Arc<DeviceContext>, initial_value: u64, exportable: bool) -> VkResult<Self> {
        let mut type_info = vk::SemaphoreTypeCreateInfo::builder()
            .semaphore_type(vk::SemaphoreType::TIMELINE)
            .initial_value(initial_value);
        let mut export_info = vk::ExportSemaphoreCreateInfo::builder()
            .handle_types(vk::ExternalSemaphoreHandleTypeFlags::OPAQUE_FD);

        let mut info = vk::SemaphoreCreateInfo::builder()
            .push_next(&mut type_info);
        if exportable {
            info = info.push_next(&mut export_info);
        }

        let handle = unsafe { device.vk().create_semaphore(&info, None) }?;
        Ok(Self { id: UUID::new(), device, handle })
    }

    pub fn get_id(&self) -> UUID {
        self.id
    }

    pub fn handle(&self) -> vk::Semaphore {
        self.handle
    }

    pub fn export_opaque_fd(&self) -> VkResult<OwnedFd> {
        unsafe { self.device.external().get_semaphore_fd(self.device.vk(), self.handle) }
    }

    pub fn value(&self) -> VkResult<u64> {
        unsafe { self.device.vk().get_semaphore_counter_value(self.handle) }
    }

    /// Waits until the counter reaches at least `value`.
    pub fn wait(&self, value: u64, timeout_ns: u64) -> VkResult<()> {
        let semaphores = [self.handle];
        let values = [value];
        let info = vk::SemaphoreWaitInfo::builder()
            .semaphores(&semaphores)
            .values(&values);

        unsafe { self.device.vk().wait_semaphores(&info, timeout_ns) }
    }
}

impl Drop for TimelineSemaphore {
    fn drop(&mut self) {
        unsafe { self.device.vk().destroy_semaphore(self.handle, None) };
    }
}

impl Debug for TimelineSemaphore {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("vkSemaphore(UUID: {:#016X}, Handle: {:#016X})", self.id.get_raw(), ash::vk::Handle::as_raw(self.handle)))
    }
}

assert_impl_all!(Fence: Send, Sync);
assert_impl_all!(TimelineSemaphore: Send, Sync);
