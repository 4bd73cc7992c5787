use crate::{
    block::Block,
    bundle::{Bundle, PrimaryBlock},
    creation_timestamp::CreationTimestamp,
    eid::Eid,
    BlockFlags, BlockType, BundleFlags,
};

/// Builds a new bundle with a payload block.
pub struct Builder {
    source: Eid,
    destination: Eid,
    report_to: Eid,
    flags: BundleFlags,
    lifetime: u64,
    timestamp: Option<CreationTimestamp>,
    payload: Vec<u8>,
}

impl Builder {
    pub fn new(source: Eid, destination: Eid) -> Self {
        Self {
            report_to: source.clone(),
            source,
            destination,
            flags: BundleFlags::default(),
            lifetime: 3600,
            timestamp: None,
            payload: Vec::new(),
        }
    }

    pub fn report_to(mut self, report_to: Eid) -> Self {
        self.report_to = report_to;
        self
    }

    pub fn flags(mut self, flags: BundleFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Lifetime in seconds. Default one hour.
    pub fn lifetime(mut self, lifetime: u64) -> Self {
        self.lifetime = lifetime;
        self
    }

    pub fn timestamp(mut self, timestamp: CreationTimestamp) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = payload;
        self
    }

    pub fn build(self) -> Bundle {
        Bundle {
            primary: PrimaryBlock {
                flags: self.flags,
                destination: self.destination,
                source: self.source,
                report_to: self.report_to,
                timestamp: self.timestamp.unwrap_or_else(CreationTimestamp::now),
                lifetime: self.lifetime,
            },
            blocks: vec![Block {
                block_type: BlockType::Payload,
                number: 1,
                flags: BlockFlags::default(),
                data: self.payload,
            }],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let bundle = Builder::new(
            "dtn://a/app".parse().unwrap(),
            "dtn://b/app".parse().unwrap(),
        )
        .payload(b"x".to_vec())
        .build();

        assert_eq!(bundle.primary.lifetime, 3600);
        assert_eq!(bundle.primary.report_to, bundle.primary.source);
        assert_eq!(bundle.payload().unwrap(), b"x");
    }

    #[test]
    fn distinct_ids() {
        let mk = || {
            Builder::new(
                "dtn://a/app".parse().unwrap(),
                "dtn://b/app".parse().unwrap(),
            )
            .build()
        };
        assert_ne!(mk().id(), mk().id());
    }
}
