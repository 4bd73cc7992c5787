use super::*;
use crate::Error;
use cbor::decode::{ArrayLen, Decoder};

impl Bundle {
    pub fn from_cbor(data: &[u8]) -> Result<Self, Error> {
        let mut decoder = Decoder::new(data);
        let outer = decoder.parse_array().map_err(|_| Error::NotAnArray)?;

        let primary = parse_primary(&mut decoder)?;

        let mut blocks = Vec::new();
        match outer {
            ArrayLen::Definite(n) => {
                for _ in 1..n {
                    blocks.push(Block::parse_cbor(&mut decoder)?);
                }
            }
            ArrayLen::Indefinite => {
                while !decoder.at_break()? {
                    blocks.push(Block::parse_cbor(&mut decoder)?);
                }
            }
        }

        let mut seen_numbers = std::collections::HashSet::new();
        for block in &blocks {
            if !seen_numbers.insert(block.number) {
                return Err(Error::DuplicateBlockNumber(block.number));
            }
        }
        match blocks.iter().position(|b| b.block_type == BlockType::Payload) {
            None => return Err(Error::MissingPayload),
            Some(n) if n + 1 != blocks.len() => return Err(Error::PayloadNotFinal),
            _ => {}
        }

        Ok(Self { primary, blocks })
    }
}

fn parse_primary(decoder: &mut Decoder) -> Result<PrimaryBlock, Error> {
    let len = decoder.parse_array()?;
    let version = decoder.parse_uint()?;
    if version != 7 {
        return Err(Error::UnsupportedVersion(version));
    }
    let flags = BundleFlags::from(decoder.parse_uint()?);
    // CRC type; any trailing CRC value is consumed by the tail loop below
    decoder.parse_uint()?;
    let destination = Eid::parse_cbor(decoder)?;
    let source = Eid::parse_cbor(decoder)?;
    let report_to = Eid::parse_cbor(decoder)?;
    decoder.parse_array()?;
    let timestamp = CreationTimestamp::new(
        DtnTime::new(decoder.parse_uint()?),
        decoder.parse_uint()?,
    );
    let lifetime = decoder.parse_uint()?;

    // Fragment offset/length and CRC are not produced by this agent, but
    // tolerate them from other encoders.
    match len {
        ArrayLen::Definite(n) => {
            for _ in 8..n {
                decoder.skip_item()?;
            }
        }
        ArrayLen::Indefinite => {
            while !decoder.at_break()? {
                decoder.skip_item()?;
            }
        }
    }
    Ok(PrimaryBlock {
        flags,
        destination,
        source,
        report_to,
        timestamp,
        lifetime,
    })
}
