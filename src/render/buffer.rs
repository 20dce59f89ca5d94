//! Buffers backed by a dedicated device memory allocation.

use std::ffi::c_void;
use std::ptr::NonNull;
use std::sync::Arc;

use ash::vk;

use crate::device::device::DeviceContext;
use crate::prelude::*;
use crate::util::vk::find_memory_type_index;

/// A buffer with its own device memory.
///
/// `size` is the size requested by the caller. The memory backing it may be larger, writes are
/// allowed up to `allocation_size`.
pub struct RenderBuffer {
    device: Arc<DeviceContext>,
    buffer: vk::Buffer,
    memory: vk::DeviceMemory,
    size: vk::DeviceSize,
    allocation_size: vk::DeviceSize,
    alignment: vk::DeviceSize,
    mapped: Option<NonNull<c_void>>,
}

// The mapped pointer is only dereferenced through &mut self
unsafe impl Send for RenderBuffer {}
unsafe impl Sync for RenderBuffer {}

impl RenderBuffer {
    pub fn new(env: &DeviceEnvironment, usage: vk::BufferUsageFlags, memory_properties: vk::MemoryPropertyFlags, size: vk::DeviceSize) -> Result<Self> {
        let device = env.get_device().clone();

        let info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { device.vk().create_buffer(&info, None) }.map_err(|err| {
            log::error!("Failed to create buffer of {} bytes: {:?}", size, err);
            err
        })?;

        let requirements = unsafe { device.vk().get_buffer_memory_requirements(buffer) };
        let memory_type = match find_memory_type_index(device.get_memory_properties(), requirements.memory_type_bits, memory_properties) {
            Some(index) => index,
            None => {
                log::error!("No memory type with {:?} for buffer", memory_properties);
                unsafe { device.vk().destroy_buffer(buffer, None) };
                return Err(CompositorError::Gpu(vk::Result::ERROR_FEATURE_NOT_PRESENT));
            }
        };

        let alloc_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type);

        let memory = match unsafe { device.vk().allocate_memory(&alloc_info, None) } {
            Ok(memory) => memory,
            Err(err) => {
                log::error!("Failed to allocate {} bytes of buffer memory: {:?}", requirements.size, err);
                unsafe { device.vk().destroy_buffer(buffer, None) };
                return Err(err.into());
            }
        };

        // From here on drop cleans up
        let result = Self {
            device,
            buffer,
            memory,
            size,
            allocation_size: requirements.size,
            alignment: requirements.alignment,
            mapped: None,
        };

        unsafe { result.device.vk().bind_buffer_memory(buffer, memory, 0) }?;
        Ok(result)
    }

    /// Creates a buffer of exactly `data.len()` bytes and fills it. The memory properties must
    /// include `HOST_VISIBLE`.
    pub fn new_with_data(env: &DeviceEnvironment, usage: vk::BufferUsageFlags, memory_properties: vk::MemoryPropertyFlags, data: &[u8]) -> Result<Self> {
        let mut buffer = Self::new(env, usage, memory_properties, data.len() as vk::DeviceSize)?;
        buffer.write(data)?;
        Ok(buffer)
    }

    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    pub fn allocation_size(&self) -> vk::DeviceSize {
        self.allocation_size
    }

    pub fn alignment(&self) -> vk::DeviceSize {
        self.alignment
    }

    pub fn is_mapped(&self) -> bool {
        self.mapped.is_some()
    }

    /// Maps the whole allocation. Mapping a already mapped buffer returns the existing pointer.
    pub fn map(&mut self) -> Result<NonNull<c_void>> {
        if let Some(ptr) = self.mapped {
            return Ok(ptr);
        }

        let ptr = unsafe { self.device.vk().map_memory(self.memory, 0, vk::WHOLE_SIZE, vk::MemoryMapFlags::empty()) }?;
        let ptr = NonNull::new(ptr).ok_or(CompositorError::Gpu(vk::Result::ERROR_MEMORY_MAP_FAILED))?;
        self.mapped = Some(ptr);
        Ok(ptr)
    }

    pub fn unmap(&mut self) {
        if self.mapped.take().is_some() {
            unsafe { self.device.vk().unmap_memory(self.memory) };
        }
    }

    /// Maps the buffer, writes and leaves it mapped.
    pub fn map_and_write(&mut self, data: &[u8]) -> Result<()> {
        self.check_size(data.len())?;
        let ptr = self.map()?;
        unsafe { self.copy_to(ptr, data) };
        Ok(())
    }

    /// Writes to the start of the buffer. A unmapped buffer is mapped for the duration of the
    /// write, a mapped one stays mapped.
    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        self.check_size(data.len())?;

        let was_mapped = self.is_mapped();
        let ptr = self.map()?;
        unsafe { self.copy_to(ptr, data) };
        if !was_mapped {
            self.unmap();
        }
        Ok(())
    }

    /// Copies `size` bytes out of the buffer.
    pub fn read(&mut self) -> Result<Vec<u8>> {
        let was_mapped = self.is_mapped();
        let ptr = self.map()?;

        let range = vk::MappedMemoryRange::builder()
            .memory(self.memory)
            .offset(0)
            .size(vk::WHOLE_SIZE);
        unsafe { self.device.vk().invalidate_mapped_memory_ranges(std::slice::from_ref(&range)) }?;

        let mut result = vec![0u8; self.size as usize];
        unsafe { std::ptr::copy_nonoverlapping(ptr.as_ptr() as *const u8, result.as_mut_ptr(), result.len()) };

        if !was_mapped {
            self.unmap();
        }
        Ok(result)
    }

    fn check_size(&self, len: usize) -> Result<()> {
        if len as vk::DeviceSize > self.allocation_size {
            log::error!("Write of {} bytes into buffer with a allocation of {} bytes", len, self.allocation_size);
            return Err(CompositorError::OutOfDeviceMemory);
        }
        Ok(())
    }

    unsafe fn copy_to(&self, ptr: NonNull<c_void>, data: &[u8]) {
        std::ptr::copy_nonoverlapping(data.as_ptr(), ptr.as_ptr() as *mut u8, data.len());
    }
}

impl Drop for RenderBuffer {
    fn drop(&mut self) {
        self.unmap();
        unsafe {
            self.device.vk().destroy_buffer(self.buffer, None);
            self.device.vk().free_memory(self.memory, None);
        }
    }
}

assert_impl_all!(RenderBuffer: Send, Sync);
