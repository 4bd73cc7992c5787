use crate::{cbor, BlockFlags, BlockType};

/// A canonical (non-primary) block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub block_type: BlockType,
    pub number: u64,
    pub flags: BlockFlags,
    pub data: Vec<u8>,
}

impl Block {
    pub(crate) fn emit_cbor(&self, encoder: &mut cbor::encode::Encoder) {
        // [type, number, flags, crc-type, data]
        encoder.emit_array(5);
        encoder.emit_uint(self.block_type.into());
        encoder.emit_uint(self.number);
        encoder.emit_uint(self.flags.into());
        encoder.emit_uint(0);
        encoder.emit_bytes(&self.data);
    }

    pub(crate) fn parse_cbor(decoder: &mut cbor::decode::Decoder) -> Result<Self, crate::Error> {
        let len = decoder.parse_array()?;
        let block_type = BlockType::from(decoder.parse_uint()?);
        let number = decoder.parse_uint()?;
        let flags = BlockFlags::from(decoder.parse_uint()?);
        let crc_type = decoder.parse_uint()?;
        let data = decoder.parse_bytes()?.to_vec();

        // Skip a trailing CRC value if one is declared
        if crc_type != 0 {
            decoder.skip_item()?;
        }
        if let cbor::decode::ArrayLen::Indefinite = len {
            decoder.at_break()?;
        }

        Ok(Self {
            block_type,
            number,
            flags,
            data,
        })
    }
}
