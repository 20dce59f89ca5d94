use std::ffi::c_void;
use std::ptr::NonNull;
use std::sync::{Arc, Mutex, MutexGuard};

use ash::vk;
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::{AllocationCreateDesc, AllocatorCreateDesc};

use crate::device::device::DeviceContext;

#[derive(Debug)]
pub enum AllocationError {
    GpuAllocator(gpu_allocator::AllocationError),
}

impl From<gpu_allocator::AllocationError> for AllocationError {
    fn from(err: gpu_allocator::AllocationError) -> Self {
        Self::GpuAllocator(err)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AllocationStrategy {
    /// Automatically select memory that is only used by the gpu
    AutoGpuOnly,

    /// Automatically select memory that is used by both gpu and cpu
    AutoGpuCpu,

    /// Memory the gpu writes and the cpu reads back
    AutoCpuReadback,
}

impl AllocationStrategy {
    fn location(&self) -> MemoryLocation {
        match self {
            AllocationStrategy::AutoGpuOnly => MemoryLocation::GpuOnly,
            AllocationStrategy::AutoGpuCpu => MemoryLocation::CpuToGpu,
            AllocationStrategy::AutoCpuReadback => MemoryLocation::GpuToCpu,
        }
    }
}

/// Pooled memory for compositor owned buffers and images.
///
/// Memory shared with other processes needs dedicated exportable allocations and does not go
/// through this allocator. The gpu allocator is dropped before the device it was created from.
pub struct Allocator {
    allocator: Mutex<gpu_allocator::vulkan::Allocator>,
    device: Arc<DeviceContext>,
}

impl Allocator {
    pub fn new(device: Arc<DeviceContext>) -> Result<Self, AllocationError> {
        let allocator = gpu_allocator::vulkan::Allocator::new(&AllocatorCreateDesc{
            instance: device.get_instance().vk().clone(),
            device: device.vk().clone(),
            physical_device: *device.get_physical_device(),
            debug_settings: Default::default(),
            buffer_device_address: false
        })?;

        Ok(Self {
            allocator: Mutex::new(allocator),
            device,
        })
    }

    fn lock(&self) -> MutexGuard<gpu_allocator::vulkan::Allocator> {
        self.allocator.lock().unwrap_or_else(|poisoned| {
            log::error!("Allocator mutex poisoned");
            poisoned.into_inner()
        })
    }

    pub fn allocate_buffer_memory(&self, buffer: vk::Buffer, strategy: AllocationStrategy, name: &str) -> Result<Allocation, AllocationError> {
        let requirements = unsafe {
            self.device.vk().get_buffer_memory_requirements(buffer)
        };

        let alloc_desc = AllocationCreateDesc{
            name,
            requirements,
            location: strategy.location(),
            linear: true
        };

        let alloc = self.lock().allocate(&alloc_desc)?;

        Ok(Allocation::new(alloc))
    }

    pub fn allocate_image_memory(&self, image: vk::Image, strategy: AllocationStrategy, name: &str) -> Result<Allocation, AllocationError> {
        let location = strategy.location();
        let requirements = unsafe {
            self.device.vk().get_image_memory_requirements(image)
        };

        let alloc_desc = AllocationCreateDesc{
            name,
            requirements,
            location,
            // If image is accessed by the cpu it has to be linear
            linear: location != MemoryLocation::GpuOnly,
        };

        let alloc = self.lock().allocate(&alloc_desc)?;

        Ok(Allocation::new(alloc))
    }

    pub fn free(&self, allocation: Allocation) {
        if let Err(err) = self.lock().free(allocation.alloc) {
            log::error!("Failed to free allocation: {:?}", err);
        }
    }
}

pub struct Allocation {
    alloc: gpu_allocator::vulkan::Allocation,
}

impl Allocation {
    fn new(alloc: gpu_allocator::vulkan::Allocation) -> Self {
        Self {
            alloc,
        }
    }

    pub fn mapped_ptr(&self) -> Option<NonNull<c_void>> {
        self.alloc.mapped_ptr()
    }

    pub fn mapped_slice(&self) -> Option<&[u8]> {
        self.alloc.mapped_slice()
    }

    pub fn mapped_slice_mut(&mut self) -> Option<&mut [u8]> {
        self.alloc.mapped_slice_mut()
    }

    pub fn memory(&self) -> vk::DeviceMemory {
        unsafe { self.alloc.memory() }
    }

    pub fn offset(&self) -> vk::DeviceSize {
        self.alloc.offset()
    }

    pub fn size(&self) -> vk::DeviceSize {
        self.alloc.size()
    }
}
