//! Commit path selection and the shared timeline semaphore.

use std::fmt::{Debug, Formatter};
use std::sync::Arc;

use ash::vk;

use crate::native::{NativeCompositor, NativeSemaphore};
use crate::prelude::*;
use crate::vk::sync::TimelineSemaphore;

/// What is available to synchronize a commit with the native compositor.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct CommitCapabilities {
    /// The client passed its own sync fd.
    pub explicit_sync: bool,
    pub timeline_semaphore: bool,
    pub fence_export: bool,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum CommitPath {
    ExplicitHandle,
    TimelineSemaphore,
    ExportedFence,
    DeviceWaitIdle,
}

/// Picks the first available path in order of preference.
pub fn select_commit_path(capabilities: CommitCapabilities) -> CommitPath {
    if capabilities.explicit_sync {
        CommitPath::ExplicitHandle
    } else if capabilities.timeline_semaphore {
        CommitPath::TimelineSemaphore
    } else if capabilities.fence_export {
        CommitPath::ExportedFence
    } else {
        CommitPath::DeviceWaitIdle
    }
}

/// A strictly increasing timeline value.
#[derive(Debug)]
pub struct TimelineCounter {
    value: u64,
}

impl TimelineCounter {
    pub fn new(initial: u64) -> Self {
        Self { value: initial }
    }

    pub fn value(&self) -> u64 {
        self.value
    }

    /// Calls `submit` with the next value. The counter only moves if `submit` succeeds.
    pub fn advance<F>(&mut self, submit: F) -> Result<u64> where F: FnOnce(u64) -> Result<()> {
        let next = self.value + 1;
        submit(next)?;
        self.value = next;
        Ok(next)
    }
}

/// A timeline semaphore created by the native compositor and imported into the client device.
pub struct TimelineSync {
    semaphore: TimelineSemaphore,
    native: Arc<dyn NativeSemaphore>,
    counter: TimelineCounter,
}

impl TimelineSync {
    pub fn new(env: &DeviceEnvironment, native: &dyn NativeCompositor) -> Result<Self> {
        let capabilities = env.get_capabilities();
        if !capabilities.timeline_semaphore || !capabilities.timeline_semaphore_opaque_fd {
            return Err(CompositorError::Unsupported("timeline semaphore import"));
        }

        let (fd, native) = native.create_semaphore()?;
        let semaphore = TimelineSemaphore::from_opaque_fd(env.get_device().clone(), fd)?;
        let counter = TimelineCounter::new(semaphore.value()?);

        log::debug!("Imported timeline semaphore {:?} for native semaphore {:?}", semaphore, native.id());
        Ok(Self {
            semaphore,
            native,
            counter,
        })
    }

    pub fn value(&self) -> u64 {
        self.counter.value()
    }

    pub fn native(&self) -> &Arc<dyn NativeSemaphore> {
        &self.native
    }

    /// Submits a signal of the next value without waits or a fence and returns the value.
    pub fn signal(&mut self, queue: &Queue) -> Result<u64> {
        let semaphore = self.semaphore.handle();
        self.counter.advance(|value| {
            let signal_values = [value];
            let signal_semaphores = [semaphore];
            let mut timeline_info = vk::TimelineSemaphoreSubmitInfo::builder()
                .signal_semaphore_values(&signal_values);
            let submit = vk::SubmitInfo::builder()
                .signal_semaphores(&signal_semaphores)
                .push_next(&mut timeline_info)
                .build();

            unsafe { queue.submit(std::slice::from_ref(&submit), None) }.map_err(|err| {
                log::error!("Failed to signal timeline semaphore to {}: {:?}", value, err);
                CompositorError::FailedToSubmit(err)
            })
        })
    }
}

impl Debug for TimelineSync {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimelineSync")
            .field("semaphore", &self.semaphore)
            .field("value", &self.counter.value())
            .finish()
    }
}
