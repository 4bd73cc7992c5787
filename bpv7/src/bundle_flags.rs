/// Decoded bundle processing control flags (RFC 9171 §4.2.3).
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq)]
pub struct BundleFlags {
    pub is_admin_record: bool,
    pub do_not_fragment: bool,
    pub receipt_report_requested: bool,
    pub forward_report_requested: bool,
    pub delivery_report_requested: bool,
    pub delete_report_requested: bool,
    pub unrecognised: u64,
}

impl From<u64> for BundleFlags {
    fn from(value: u64) -> Self {
        let mut flags = Self::default();
        for b in 0..=20 {
            if value & (1 << b) != 0 {
                match b {
                    1 => flags.is_admin_record = true,
                    2 => flags.do_not_fragment = true,
                    14 => flags.receipt_report_requested = true,
                    16 => flags.forward_report_requested = true,
                    17 => flags.delivery_report_requested = true,
                    18 => flags.delete_report_requested = true,
                    b => flags.unrecognised |= 1 << b,
                }
            }
        }
        flags.unrecognised |= value & !((1 << 21) - 1);
        flags
    }
}

impl From<BundleFlags> for u64 {
    fn from(value: BundleFlags) -> Self {
        let mut flags = value.unrecognised;
        if value.is_admin_record {
            flags |= 1 << 1;
        }
        if value.do_not_fragment {
            flags |= 1 << 2;
        }
        if value.receipt_report_requested {
            flags |= 1 << 14;
        }
        if value.forward_report_requested {
            flags |= 1 << 16;
        }
        if value.delivery_report_requested {
            flags |= 1 << 17;
        }
        if value.delete_report_requested {
            flags |= 1 << 18;
        }
        flags
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let flags = BundleFlags {
            is_admin_record: true,
            delivery_report_requested: true,
            ..Default::default()
        };
        assert_eq!(BundleFlags::from(u64::from(flags)), flags);
    }

    #[test]
    fn unrecognised_preserved() {
        let raw = (1 << 1) | (1 << 13) | (1 << 25);
        assert_eq!(u64::from(BundleFlags::from(raw)), raw);
    }
}
