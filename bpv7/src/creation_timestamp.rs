use crate::dtn_time::DtnTime;
use std::sync::atomic::{AtomicU64, Ordering};

// Sequence counter shared by all bundles sourced from this process, so two
// bundles created within the same millisecond still get distinct ids.
static SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// The `(time, sequence)` pair from the primary block.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CreationTimestamp {
    pub time: DtnTime,
    pub sequence: u64,
}

impl CreationTimestamp {
    pub fn now() -> Self {
        Self {
            time: DtnTime::now(),
            sequence: SEQUENCE.fetch_add(1, Ordering::Relaxed),
        }
    }

    pub fn new(time: DtnTime, sequence: u64) -> Self {
        Self { time, sequence }
    }
}

impl std::fmt::Display for CreationTimestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.time, self.sequence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_is_monotonic() {
        let a = CreationTimestamp::now();
        let b = CreationTimestamp::now();
        assert!(b.sequence > a.sequence);
    }
}
