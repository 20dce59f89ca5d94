//! Process wide unique identifiers for compositor objects.

use std::fmt::{Debug, Formatter};
use std::num::NonZeroU64;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UUID(NonZeroU64);

static NEXT_UUID: AtomicU64 = AtomicU64::new(1);

impl UUID {
    /// Returns a id that has not been handed out before in this process.
    pub fn new() -> Self {
        let raw = NEXT_UUID.fetch_add(1, AtomicOrdering::Relaxed);
        // Mix the counter so ids of different objects do not look sequential in logs
        let mixed = xxhash_rust::xxh3::xxh3_64(&raw.to_le_bytes());
        Self(NonZeroU64::new(mixed).unwrap_or(NonZeroU64::MIN))
    }

    pub const fn get_raw(&self) -> u64 {
        self.0.get()
    }
}

impl Debug for UUID {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("UUID({:#016X})", self.get_raw()))
    }
}

/// A UUID with a attached name used for debugging and logging. Every id is unique per call.
#[derive(Clone)]
pub struct NamedUUID {
    name: &'static str,
    id: UUID,
}

impl NamedUUID {
    pub fn with_str(name: &'static str) -> NamedUUID {
        NamedUUID { name, id: UUID::new() }
    }

    pub fn get_name(&self) -> &str {
        self.name
    }

    pub fn get_uuid(&self) -> UUID {
        self.id
    }
}

impl PartialEq for NamedUUID {
    fn eq(&self, other: &Self) -> bool {
        self.id.eq(&other.id)
    }
}

impl Eq for NamedUUID {
}

impl Debug for NamedUUID {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("NamedUUID{{\"{}\", {:?}}}", self.name, &self.id))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use super::*;

    #[test]
    fn unique_ids() {
        let ids: HashSet<_> = (0..1000).map(|_| UUID::new()).collect();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn named_ids() {
        let a = NamedUUID::with_str("Swapchain");
        let b = NamedUUID::with_str("Swapchain");
        assert_ne!(a, b);
        assert_eq!(a, a.clone());
        assert_eq!(a.get_name(), "Swapchain");
        assert_ne!(a.get_uuid(), b.get_uuid());
        assert!(format!("{:?}", a).starts_with("NamedUUID{\"Swapchain\", UUID(0x"));
    }
}
