/// Canonical block types the processor recognises.
///
/// Anything else is carried opaquely and runs the unknown-block escalation
/// ladder on reception.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum BlockType {
    Payload,
    PreviousNode,
    BundleAge,
    HopCount,
    Unrecognised(u64),
}

impl BlockType {
    pub fn is_known(&self) -> bool {
        !matches!(self, BlockType::Unrecognised(_))
    }
}

impl From<u64> for BlockType {
    fn from(value: u64) -> Self {
        match value {
            1 => BlockType::Payload,
            6 => BlockType::PreviousNode,
            7 => BlockType::BundleAge,
            10 => BlockType::HopCount,
            v => BlockType::Unrecognised(v),
        }
    }
}

impl From<BlockType> for u64 {
    fn from(value: BlockType) -> Self {
        match value {
            BlockType::Payload => 1,
            BlockType::PreviousNode => 6,
            BlockType::BundleAge => 7,
            BlockType::HopCount => 10,
            BlockType::Unrecognised(v) => v,
        }
    }
}
