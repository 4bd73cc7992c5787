mod parse;

#[cfg(test)]
mod codec_tests;

use crate::{
    block::Block, cbor, creation_timestamp::CreationTimestamp, dtn_time::DtnTime, eid::Eid,
    BlockType, BundleFlags,
};

/// The canonical bundle identifier: `(source, creation timestamp)`.
///
/// Rendered as `<source>-<creation millis>-<sequence>`, the form every
/// store key, seen-cache entry and management API response uses.
#[derive(Debug, Clone, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct Id {
    pub source: Eid,
    pub timestamp: CreationTimestamp,
}

impl std::fmt::Display for Id {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.source, self.timestamp)
    }
}

/// The immutable fields of the primary block this agent reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrimaryBlock {
    pub flags: BundleFlags,
    pub destination: Eid,
    pub source: Eid,
    pub report_to: Eid,
    pub timestamp: CreationTimestamp,
    /// Lifetime in seconds.
    pub lifetime: u64,
}

/// A decoded bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bundle {
    pub primary: PrimaryBlock,
    pub blocks: Vec<Block>,
}

impl Bundle {
    pub fn id(&self) -> Id {
        Id {
            source: self.primary.source.clone(),
            timestamp: self.primary.timestamp,
        }
    }

    /// The payload block contents, if the bundle carries one.
    pub fn payload(&self) -> Option<&[u8]> {
        self.blocks
            .iter()
            .find(|b| b.block_type == BlockType::Payload)
            .map(|b| b.data.as_slice())
    }

    /// Expiry check: a bundle is dead once `now` passes creation + lifetime.
    pub fn is_expired(&self, now: DtnTime) -> bool {
        now.millisecs() > self.primary.timestamp.time.millisecs() + self.primary.lifetime * 1000
    }

    pub fn is_admin_record(&self) -> bool {
        self.primary.flags.is_admin_record
    }

    pub fn to_cbor(&self) -> Vec<u8> {
        let mut encoder = cbor::encode::Encoder::new();
        encoder.emit_array(1 + self.blocks.len());

        // Primary block: [version, flags, crc-type, dest, source, report-to,
        // [time, seq], lifetime]
        encoder.emit_array(8);
        encoder.emit_uint(7);
        encoder.emit_uint(self.primary.flags.into());
        encoder.emit_uint(0);
        self.primary.destination.emit_cbor(&mut encoder);
        self.primary.source.emit_cbor(&mut encoder);
        self.primary.report_to.emit_cbor(&mut encoder);
        encoder.emit_array(2);
        encoder.emit_uint(self.primary.timestamp.time.millisecs());
        encoder.emit_uint(self.primary.timestamp.sequence);
        encoder.emit_uint(self.primary.lifetime);

        for block in &self.blocks {
            block.emit_cbor(&mut encoder);
        }
        encoder.build()
    }
}
