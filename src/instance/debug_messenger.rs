use std::ffi::CStr;
use std::fmt::Debug;
use std::panic::{RefUnwindSafe, UnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use ash::vk;

pub trait DebugMessengerCallback: Send + Sync + UnwindSafe + RefUnwindSafe + Debug {
    fn on_message(
        &self,
        message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
        message_types: vk::DebugUtilsMessageTypeFlagsEXT,
        message: &CStr,
        data: &vk::DebugUtilsMessengerCallbackDataEXT,
    );
}

#[derive(Debug)]
pub struct RustLogDebugMessenger {
}

impl RustLogDebugMessenger {
    pub fn new() -> Self {
        Self {
        }
    }
}

impl DebugMessengerCallback for RustLogDebugMessenger {
    fn on_message(&self, message_severity: vk::DebugUtilsMessageSeverityFlagsEXT, _: vk::DebugUtilsMessageTypeFlagsEXT, message: &CStr, _: &vk::DebugUtilsMessengerCallbackDataEXT) {
        if message_severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
            log::error!("{:?}", message);
        } else if message_severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
            log::warn!("{:?}", message);
        } else if message_severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
            log::info!("{:?}", message);
        } else {
            log::trace!("{:?}", message);
        }
    }
}

/// Counters shared between a [`CountingDebugMessenger`] and whoever wants to inspect them.
#[derive(Debug, Default)]
pub struct MessageCounts {
    errors: AtomicU32,
    warnings: AtomicU32,
}

impl MessageCounts {
    pub fn errors(&self) -> u32 {
        self.errors.load(Ordering::Acquire)
    }

    pub fn warnings(&self) -> u32 {
        self.warnings.load(Ordering::Acquire)
    }
}

/// Logs like [`RustLogDebugMessenger`] and counts validation errors and warnings.
#[derive(Debug)]
pub struct CountingDebugMessenger {
    counts: Arc<MessageCounts>,
    log: RustLogDebugMessenger,
}

impl CountingDebugMessenger {
    pub fn new() -> (Self, Arc<MessageCounts>) {
        let counts = Arc::new(MessageCounts::default());
        (Self { counts: counts.clone(), log: RustLogDebugMessenger::new() }, counts)
    }
}

impl DebugMessengerCallback for CountingDebugMessenger {
    fn on_message(&self, message_severity: vk::DebugUtilsMessageSeverityFlagsEXT, message_types: vk::DebugUtilsMessageTypeFlagsEXT, message: &CStr, data: &vk::DebugUtilsMessengerCallbackDataEXT) {
        if message_severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
            self.counts.errors.fetch_add(1, Ordering::AcqRel);
        } else if message_severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
            self.counts.warnings.fetch_add(1, Ordering::AcqRel);
        }
        self.log.on_message(message_severity, message_types, message, data);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_by_severity() {
        let (messenger, counts) = CountingDebugMessenger::new();
        let message = CStr::from_bytes_with_nul(b"test message\0").unwrap();
        let data = vk::DebugUtilsMessengerCallbackDataEXT::default();

        messenger.on_message(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR, vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION, message, &data);
        messenger.on_message(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING, vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION, message, &data);
        messenger.on_message(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING, vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE, message, &data);
        messenger.on_message(vk::DebugUtilsMessageSeverityFlagsEXT::INFO, vk::DebugUtilsMessageTypeFlagsEXT::GENERAL, message, &data);

        assert_eq!(counts.errors(), 1);
        assert_eq!(counts.warnings(), 2);
    }
}
