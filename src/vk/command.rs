use std::sync::{Arc, Mutex, MutexGuard};

use ash::prelude::VkResult;
use ash::vk;

use crate::device::device::{DeviceContext, Queue};

/// A command pool together with the mutex that externally synchronizes it.
///
/// Allocating, recording into, resetting and freeing any buffer of the pool must happen while
/// the lock returned by [`CommandPool::lock`] is held.
pub struct CommandPool {
    device: Arc<DeviceContext>,
    pool: Mutex<vk::CommandPool>,
    family: u32,
}

impl CommandPool {
    pub fn new(device: Arc<DeviceContext>, family: u32) -> VkResult<Self> {
        let info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(family)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);

        let pool = unsafe { device.vk().create_command_pool(&info, None) }?;

        Ok(Self {
            device,
            pool: Mutex::new(pool),
            family,
        })
    }

    pub fn lock(&self) -> CommandPoolGuard {
        let guard = self.pool.lock().unwrap_or_else(|poisoned| {
            log::error!("Command pool mutex poisoned");
            poisoned.into_inner()
        });

        CommandPoolGuard {
            device: &self.device,
            pool: guard,
        }
    }

    pub fn get_queue_family_index(&self) -> u32 {
        self.family
    }

    /// Records a single use command buffer, submits it and waits for it to complete.
    pub fn submit_one_time<F>(&self, queue: &Queue, record: F) -> VkResult<()> where F: FnOnce(&ash::Device, vk::CommandBuffer) {
        let device = self.device.vk();

        let cmd = {
            let pool = self.lock();
            let cmd = pool.allocate(1)?[0];

            let begin_info = vk::CommandBufferBeginInfo::builder()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);

            let result = unsafe { device.begin_command_buffer(cmd, &begin_info) }.and_then(|_| {
                record(device, cmd);
                unsafe { device.end_command_buffer(cmd) }
            });
            if let Err(err) = result {
                pool.free(&[cmd]);
                return Err(err);
            }
            cmd
        };

        let result = self.submit_and_wait(queue, cmd);
        self.lock().free(&[cmd]);
        result
    }

    fn submit_and_wait(&self, queue: &Queue, cmd: vk::CommandBuffer) -> VkResult<()> {
        let device = self.device.vk();

        let fence = unsafe { device.create_fence(&vk::FenceCreateInfo::builder(), None) }?;
        let command_buffers = [cmd];
        let submit = vk::SubmitInfo::builder()
            .command_buffers(&command_buffers)
            .build();

        let result = unsafe { queue.submit(std::slice::from_ref(&submit), Some(fence)) }
            .and_then(|_| unsafe { device.wait_for_fences(std::slice::from_ref(&fence), true, u64::MAX) });

        unsafe { device.destroy_fence(fence, None) };
        result
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        let pool = self.pool.get_mut().map(|pool| *pool).unwrap_or_else(|poisoned| *poisoned.into_inner());
        unsafe {
            self.device.vk().destroy_command_pool(pool, None);
        }
    }
}

assert_impl_all!(CommandPool: Send, Sync);

pub struct CommandPoolGuard<'a> {
    device: &'a Arc<DeviceContext>,
    pool: MutexGuard<'a, vk::CommandPool>,
}

impl<'a> CommandPoolGuard<'a> {
    pub fn handle(&self) -> vk::CommandPool {
        *self.pool
    }

    pub fn allocate(&self, count: u32) -> VkResult<Vec<vk::CommandBuffer>> {
        let info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(*self.pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);

        unsafe { self.device.vk().allocate_command_buffers(&info) }
    }

    pub fn free(&self, command_buffers: &[vk::CommandBuffer]) {
        if !command_buffers.is_empty() {
            unsafe { self.device.vk().free_command_buffers(*self.pool, command_buffers) };
        }
    }
}
