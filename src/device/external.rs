//! Access to the `VK_KHR_external_*_fd` device functions.
//!
//! All handles cross the api as [`OwnedFd`]. Import functions consume the fd only on success,
//! on failure ownership stays with the caller and the fd is closed when it is dropped.

use std::ffi::{c_void, CStr};
use std::os::unix::io::{FromRawFd, IntoRawFd, OwnedFd};

use ash::prelude::VkResult;
use ash::vk;

pub const EXTERNAL_MEMORY_FD_NAME: &[u8] = b"VK_KHR_external_memory_fd\0";
pub const EXTERNAL_SEMAPHORE_FD_NAME: &[u8] = b"VK_KHR_external_semaphore_fd\0";
pub const EXTERNAL_FENCE_FD_NAME: &[u8] = b"VK_KHR_external_fence_fd\0";

pub fn extension_name(raw: &'static [u8]) -> &'static CStr {
    CStr::from_bytes_with_nul(raw).unwrap_or_default()
}

/// What the selected device can do. Filled during device creation.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct DeviceCapabilities {
    pub timeline_semaphore: bool,
    pub external_memory_fd: bool,
    pub external_semaphore_fd: bool,
    pub external_fence_fd: bool,

    /// Fences can be exported as sync fds.
    pub fence_sync_fd_export: bool,

    /// Timeline semaphores can be exported to and imported from opaque fds.
    pub timeline_semaphore_opaque_fd: bool,
    pub sampled_image_array_dynamic_indexing: bool,
}

fn check(result: vk::Result) -> VkResult<()> {
    match result {
        vk::Result::SUCCESS => Ok(()),
        err => Err(err),
    }
}

pub struct ExternalFns {
    memory: Option<vk::KhrExternalMemoryFdFn>,
    semaphore: Option<vk::KhrExternalSemaphoreFdFn>,
    fence: Option<vk::KhrExternalFenceFdFn>,
}

impl ExternalFns {
    pub(crate) fn load(instance: &ash::Instance, device: &ash::Device, capabilities: &DeviceCapabilities) -> Self {
        let load = |name: &CStr| -> *const c_void {
            unsafe { std::mem::transmute(instance.get_device_proc_addr(device.handle(), name.as_ptr())) }
        };

        Self {
            memory: capabilities.external_memory_fd.then(|| vk::KhrExternalMemoryFdFn::load(load)),
            semaphore: capabilities.external_semaphore_fd.then(|| vk::KhrExternalSemaphoreFdFn::load(load)),
            fence: capabilities.external_fence_fd.then(|| vk::KhrExternalFenceFdFn::load(load)),
        }
    }

    pub unsafe fn get_memory_fd(&self, device: &ash::Device, memory: vk::DeviceMemory) -> VkResult<OwnedFd> {
        let fns = self.memory.as_ref().ok_or(vk::Result::ERROR_EXTENSION_NOT_PRESENT)?;

        let info = vk::MemoryGetFdInfoKHR::builder()
            .memory(memory)
            .handle_type(vk::ExternalMemoryHandleTypeFlags::OPAQUE_FD);

        let mut fd = -1;
        check((fns.get_memory_fd_khr)(device.handle(), &*info, &mut fd))?;
        Ok(OwnedFd::from_raw_fd(fd))
    }

    pub unsafe fn get_semaphore_fd(&self, device: &ash::Device, semaphore: vk::Semaphore) -> VkResult<OwnedFd> {
        let fns = self.semaphore.as_ref().ok_or(vk::Result::ERROR_EXTENSION_NOT_PRESENT)?;

        let info = vk::SemaphoreGetFdInfoKHR::builder()
            .semaphore(semaphore)
            .handle_type(vk::ExternalSemaphoreHandleTypeFlags::OPAQUE_FD);

        let mut fd = -1;
        check((fns.get_semaphore_fd_khr)(device.handle(), &*info, &mut fd))?;
        Ok(OwnedFd::from_raw_fd(fd))
    }

    /// Imports a opaque fd permanently into the semaphore.
    pub unsafe fn import_semaphore_fd(&self, device: &ash::Device, semaphore: vk::Semaphore, fd: OwnedFd) -> VkResult<()> {
        let fns = self.semaphore.as_ref().ok_or(vk::Result::ERROR_EXTENSION_NOT_PRESENT)?;

        let raw = fd.into_raw_fd();
        let info = vk::ImportSemaphoreFdInfoKHR::builder()
            .semaphore(semaphore)
            .handle_type(vk::ExternalSemaphoreHandleTypeFlags::OPAQUE_FD)
            .fd(raw);

        let result = check((fns.import_semaphore_fd_khr)(device.handle(), &*info));
        if result.is_err() {
            drop(OwnedFd::from_raw_fd(raw));
        }
        result
    }

    /// Exports a sync fd from a submitted fence.
    ///
    /// A already signaled fence may export `-1`, which is returned as `None`.
    pub unsafe fn get_fence_sync_fd(&self, device: &ash::Device, fence: vk::Fence) -> VkResult<Option<OwnedFd>> {
        let fns = self.fence.as_ref().ok_or(vk::Result::ERROR_EXTENSION_NOT_PRESENT)?;

        let info = vk::FenceGetFdInfoKHR::builder()
            .fence(fence)
            .handle_type(vk::ExternalFenceHandleTypeFlags::SYNC_FD);

        let mut fd = -1;
        check((fns.get_fence_fd_khr)(device.handle(), &*info, &mut fd))?;
        if fd < 0 {
            Ok(None)
        } else {
            Ok(Some(OwnedFd::from_raw_fd(fd)))
        }
    }

    /// Temporarily imports a sync fd into the fence.
    pub unsafe fn import_fence_sync_fd(&self, device: &ash::Device, fence: vk::Fence, fd: OwnedFd) -> VkResult<()> {
        let fns = self.fence.as_ref().ok_or(vk::Result::ERROR_EXTENSION_NOT_PRESENT)?;

        let raw = fd.into_raw_fd();
        let info = vk::ImportFenceFdInfoKHR::builder()
            .fence(fence)
            .flags(vk::FenceImportFlags::TEMPORARY)
            .handle_type(vk::ExternalFenceHandleTypeFlags::SYNC_FD)
            .fd(raw);

        let result = check((fns.import_fence_fd_khr)(device.handle(), &*info));
        if result.is_err() {
            drop(OwnedFd::from_raw_fd(raw));
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_names() {
        assert_eq!(extension_name(EXTERNAL_MEMORY_FD_NAME).to_str().unwrap(), "VK_KHR_external_memory_fd");
        assert_eq!(extension_name(EXTERNAL_FENCE_FD_NAME).to_str().unwrap(), "VK_KHR_external_fence_fd");
    }

    #[test]
    fn check_maps_results() {
        assert_eq!(check(vk::Result::SUCCESS), Ok(()));
        assert_eq!(check(vk::Result::ERROR_INVALID_EXTERNAL_HANDLE), Err(vk::Result::ERROR_INVALID_EXTERNAL_HANDLE));
    }
}
