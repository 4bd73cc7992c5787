/// Offset between the DTN epoch (2000-01-01T00:00:00Z) and the Unix epoch.
const DTN_EPOCH_UNIX_MS: u64 = 946_684_800_000;

const DTN_EPOCH: time::OffsetDateTime = time::macros::datetime!(2000-01-01 00:00:00 UTC);

/// A point in time expressed as milliseconds since the DTN epoch.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DtnTime {
    millisecs: u64,
}

impl DtnTime {
    pub fn now() -> Self {
        Self {
            millisecs: ((time::OffsetDateTime::now_utc() - DTN_EPOCH).whole_milliseconds()).max(0)
                as u64,
        }
    }

    pub fn new(millisecs: u64) -> Self {
        Self { millisecs }
    }

    pub fn millisecs(&self) -> u64 {
        self.millisecs
    }

    pub fn as_unix_millis(&self) -> u64 {
        self.millisecs + DTN_EPOCH_UNIX_MS
    }
}

impl std::fmt::Display for DtnTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.millisecs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn epoch_offset() {
        assert_eq!(DtnTime::new(0).as_unix_millis(), 946_684_800_000);
    }

    #[test]
    fn now_is_after_epoch() {
        assert!(DtnTime::now().millisecs() > 0);
    }
}
