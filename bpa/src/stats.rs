use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Node-wide bundle counters.
#[derive(Default)]
pub struct Statistics {
    pub incoming: AtomicU64,
    pub duplicates: AtomicU64,
    pub outgoing: AtomicU64,
    pub delivered: AtomicU64,
    pub failed: AtomicU64,
    pub broken: AtomicU64,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct StatisticsSnapshot {
    pub incoming: u64,
    pub duplicates: u64,
    pub outgoing: u64,
    pub delivered: u64,
    pub failed: u64,
    pub broken: u64,
    /// Bundles currently in the store.
    pub stored: u64,
}

impl Statistics {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, stored: u64) -> StatisticsSnapshot {
        StatisticsSnapshot {
            incoming: self.incoming.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            outgoing: self.outgoing.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            broken: self.broken.load(Ordering::Relaxed),
            stored,
        }
    }
}
