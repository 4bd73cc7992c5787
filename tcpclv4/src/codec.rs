//! Post-handshake message framing: one type byte, then a type-specific
//! body with big-endian multi-byte integers.

use thiserror::Error;
use tokio_util::{
    bytes::{Buf, BufMut, BytesMut},
    codec::{Decoder, Encoder},
};

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid message type {0}")]
    InvalidMessageType(u8),

    #[error("Invalid node id in SESS_INIT: {0}")]
    InvalidNodeId(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[repr(u8)]
#[allow(clippy::upper_case_acronyms)]
#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    XFER_SEGMENT = 1,
    XFER_ACK = 2,
    XFER_REFUSE = 3,
    KEEPALIVE = 4,
    SESS_TERM = 5,
    MSG_REJECT = 6,
    SESS_INIT = 7,
}

impl TryFrom<u8> for MessageType {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::XFER_SEGMENT),
            2 => Ok(Self::XFER_ACK),
            3 => Ok(Self::XFER_REFUSE),
            4 => Ok(Self::KEEPALIVE),
            5 => Ok(Self::SESS_TERM),
            6 => Ok(Self::MSG_REJECT),
            7 => Ok(Self::SESS_INIT),
            n => Err(Error::InvalidMessageType(n)),
        }
    }
}

/// The session extension item this implementation recognises.
pub const SESS_EXT_KEEPALIVE: u16 = 0x0001;

/// The transfer extension item this implementation recognises.
pub const XFER_EXT_TRANSFER_LENGTH: u16 = 0x0001;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionItem {
    pub flags: u8,
    pub item_type: u16,
    pub value: Vec<u8>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SessionInitMessage {
    pub keepalive_interval: u16,
    pub segment_mru: u64,
    pub transfer_mru: u64,
    pub node_id: Option<mule_bpv7::eid::Eid>,
    pub extensions: Vec<ExtensionItem>,
}

impl SessionInitMessage {
    /// The keepalive this peer asks for: the extension wins over the
    /// header field when present and well-formed.
    pub fn requested_keepalive(&self) -> u16 {
        self.extensions
            .iter()
            .find(|e| e.item_type == SESS_EXT_KEEPALIVE && e.value.len() == 2)
            .map(|e| u16::from_be_bytes([e.value[0], e.value[1]]))
            .unwrap_or(self.keepalive_interval)
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TransferFlags {
    pub start: bool,
    pub end: bool,
}

impl From<u8> for TransferFlags {
    fn from(value: u8) -> Self {
        Self {
            start: value & 0x01 != 0,
            end: value & 0x02 != 0,
        }
    }
}

impl From<TransferFlags> for u8 {
    fn from(value: TransferFlags) -> Self {
        let mut flags = 0;
        if value.start {
            flags |= 0x01;
        }
        if value.end {
            flags |= 0x02;
        }
        flags
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TransferSegmentMessage {
    pub flags: TransferFlags,
    pub transfer_id: u64,
    /// Present only on START segments.
    pub extensions: Vec<ExtensionItem>,
    pub data: Vec<u8>,
}

impl TransferSegmentMessage {
    /// Total transfer byte count from the transfer-length extension.
    pub fn transfer_length(&self) -> Option<u64> {
        self.extensions
            .iter()
            .find(|e| e.item_type == XFER_EXT_TRANSFER_LENGTH && e.value.len() == 8)
            .map(|e| u64::from_be_bytes(e.value[..8].try_into().unwrap()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferAckMessage {
    pub flags: TransferFlags,
    pub transfer_id: u64,
    pub acknowledged_length: u64,
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferRefuseReason {
    Unknown = 0x00,
    Completed = 0x01,
    NoResources = 0x02,
    Retransmit = 0x03,
    NotAcceptable = 0x04,
    ExtensionFailure = 0x05,
    SessionTerminating = 0x06,
}

impl From<u8> for TransferRefuseReason {
    fn from(value: u8) -> Self {
        match value {
            0x01 => Self::Completed,
            0x02 => Self::NoResources,
            0x03 => Self::Retransmit,
            0x04 => Self::NotAcceptable,
            0x05 => Self::ExtensionFailure,
            0x06 => Self::SessionTerminating,
            _ => Self::Unknown,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferRefuseMessage {
    pub reason: TransferRefuseReason,
    pub transfer_id: u64,
}

#[repr(u8)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum SessionTermReason {
    #[default]
    Unknown = 0x00,
    IdleTimeout = 0x01,
    VersionMismatch = 0x02,
    Busy = 0x03,
    ContactFailure = 0x04,
    ResourceExhaustion = 0x05,
}

impl From<u8> for SessionTermReason {
    fn from(value: u8) -> Self {
        match value {
            0x01 => Self::IdleTimeout,
            0x02 => Self::VersionMismatch,
            0x03 => Self::Busy,
            0x04 => Self::ContactFailure,
            0x05 => Self::ResourceExhaustion,
            _ => Self::Unknown,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SessionTermMessage {
    /// Bit 0: this message replies to a peer's SESS_TERM.
    pub flags: u8,
    pub reason: SessionTermReason,
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageRejectReason {
    Unknown = 0x01,
    Unsupported = 0x02,
    Unexpected = 0x03,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageRejectMessage {
    pub reason: MessageRejectReason,
    pub rejected_type: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    SessionInit(SessionInitMessage),
    TransferSegment(TransferSegmentMessage),
    TransferAck(TransferAckMessage),
    TransferRefuse(TransferRefuseMessage),
    Keepalive,
    SessionTerm(SessionTermMessage),
    Reject(MessageRejectMessage),
}

impl Message {
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::SessionInit(_) => MessageType::SESS_INIT,
            Message::TransferSegment(_) => MessageType::XFER_SEGMENT,
            Message::TransferAck(_) => MessageType::XFER_ACK,
            Message::TransferRefuse(_) => MessageType::XFER_REFUSE,
            Message::Keepalive => MessageType::KEEPALIVE,
            Message::SessionTerm(_) => MessageType::SESS_TERM,
            Message::Reject(_) => MessageType::MSG_REJECT,
        }
    }
}

fn put_extensions(dst: &mut BytesMut, extensions: &[ExtensionItem]) {
    let total: usize = extensions.iter().map(|e| 7 + e.value.len()).sum();
    dst.put_u32(total as u32);
    for ext in extensions {
        dst.put_u8(ext.flags);
        dst.put_u16(ext.item_type);
        dst.put_u32(ext.value.len() as u32);
        dst.put(ext.value.as_slice());
    }
}

/// Returns `None` until a whole extension block is buffered.
fn get_extensions(src: &mut BytesMut) -> Option<Vec<ExtensionItem>> {
    if src.len() < 4 {
        return None;
    }
    let total = u32::from_be_bytes(src[..4].try_into().unwrap()) as usize;
    if src.len() < 4 + total {
        return None;
    }
    src.advance(4);
    let mut block = src.split_to(total);

    let mut extensions = Vec::new();
    while block.len() >= 7 {
        let flags = block.get_u8();
        let item_type = block.get_u16();
        let len = block.get_u32() as usize;
        if block.len() < len {
            break;
        }
        extensions.push(ExtensionItem {
            flags,
            item_type,
            value: block.split_to(len).to_vec(),
        });
    }
    Some(extensions)
}

#[derive(Debug, Default)]
pub struct MessageCodec {}

impl Decoder for MessageCodec {
    type Item = Message;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Message>, Error> {
        if src.is_empty() {
            return Ok(None);
        }

        // Work on a clone; commit by advancing the real buffer only once a
        // whole message is available
        let mut buf = src.clone();
        let header = buf.get_u8();
        let message = match MessageType::try_from(header) {
            Err(e) => {
                // Poisoned stream; skip the byte so the session can reject
                src.advance(1);
                return Err(e);
            }
            Ok(MessageType::KEEPALIVE) => Some(Message::Keepalive),
            Ok(MessageType::SESS_INIT) => decode_session_init(&mut buf)?,
            Ok(MessageType::XFER_SEGMENT) => decode_transfer_segment(&mut buf),
            Ok(MessageType::XFER_ACK) => {
                if buf.len() < 17 {
                    None
                } else {
                    Some(Message::TransferAck(TransferAckMessage {
                        flags: buf.get_u8().into(),
                        transfer_id: buf.get_u64(),
                        acknowledged_length: buf.get_u64(),
                    }))
                }
            }
            Ok(MessageType::XFER_REFUSE) => {
                if buf.len() < 9 {
                    None
                } else {
                    Some(Message::TransferRefuse(TransferRefuseMessage {
                        reason: buf.get_u8().into(),
                        transfer_id: buf.get_u64(),
                    }))
                }
            }
            Ok(MessageType::SESS_TERM) => {
                if buf.len() < 2 {
                    None
                } else {
                    Some(Message::SessionTerm(SessionTermMessage {
                        flags: buf.get_u8(),
                        reason: buf.get_u8().into(),
                    }))
                }
            }
            Ok(MessageType::MSG_REJECT) => {
                if buf.len() < 2 {
                    None
                } else {
                    Some(Message::Reject(MessageRejectMessage {
                        reason: match buf.get_u8() {
                            0x02 => MessageRejectReason::Unsupported,
                            0x03 => MessageRejectReason::Unexpected,
                            _ => MessageRejectReason::Unknown,
                        },
                        rejected_type: buf.get_u8(),
                    }))
                }
            }
        };

        match message {
            None => Ok(None),
            Some(message) => {
                let consumed = src.len() - buf.len();
                src.advance(consumed);
                Ok(Some(message))
            }
        }
    }
}

fn decode_session_init(buf: &mut BytesMut) -> Result<Option<Message>, Error> {
    if buf.len() < 20 {
        return Ok(None);
    }
    let keepalive_interval = buf.get_u16();
    let segment_mru = buf.get_u64();
    let transfer_mru = buf.get_u64();
    let node_id_len = buf.get_u16() as usize;
    if buf.len() < node_id_len {
        return Ok(None);
    }
    let node_id = if node_id_len > 0 {
        let raw = buf.split_to(node_id_len);
        Some(
            std::str::from_utf8(&raw)
                .map_err(|e| Error::InvalidNodeId(e.to_string()))?
                .parse()
                .map_err(|e: mule_bpv7::eid::EidError| Error::InvalidNodeId(e.to_string()))?,
        )
    } else {
        None
    };
    let Some(extensions) = get_extensions(buf) else {
        return Ok(None);
    };

    Ok(Some(Message::SessionInit(SessionInitMessage {
        keepalive_interval,
        segment_mru,
        transfer_mru,
        node_id,
        extensions,
    })))
}

fn decode_transfer_segment(buf: &mut BytesMut) -> Option<Message> {
    if buf.len() < 9 {
        return None;
    }
    let flags = TransferFlags::from(buf.get_u8());
    let transfer_id = buf.get_u64();

    // Extension block rides only on START segments
    let extensions = if flags.start { get_extensions(buf)? } else { Vec::new() };

    if buf.len() < 8 {
        return None;
    }
    let data_len = buf.get_u64() as usize;
    if buf.len() < data_len {
        return None;
    }
    let data = buf.split_to(data_len).to_vec();

    Some(Message::TransferSegment(TransferSegmentMessage {
        flags,
        transfer_id,
        extensions,
        data,
    }))
}

impl Encoder<Message> for MessageCodec {
    type Error = Error;

    fn encode(&mut self, msg: Message, dst: &mut BytesMut) -> Result<(), Error> {
        dst.put_u8(msg.message_type() as u8);
        match msg {
            Message::Keepalive => {}
            Message::SessionInit(msg) => {
                dst.put_u16(msg.keepalive_interval);
                dst.put_u64(msg.segment_mru);
                dst.put_u64(msg.transfer_mru);
                match &msg.node_id {
                    Some(node_id) => {
                        let s = node_id.to_string();
                        dst.put_u16(s.len() as u16);
                        dst.put(s.as_bytes());
                    }
                    None => dst.put_u16(0),
                }
                put_extensions(dst, &msg.extensions);
            }
            Message::TransferSegment(msg) => {
                dst.put_u8(msg.flags.into());
                dst.put_u64(msg.transfer_id);
                if msg.flags.start {
                    put_extensions(dst, &msg.extensions);
                }
                dst.put_u64(msg.data.len() as u64);
                dst.put(msg.data.as_slice());
            }
            Message::TransferAck(msg) => {
                dst.put_u8(msg.flags.into());
                dst.put_u64(msg.transfer_id);
                dst.put_u64(msg.acknowledged_length);
            }
            Message::TransferRefuse(msg) => {
                dst.put_u8(msg.reason as u8);
                dst.put_u64(msg.transfer_id);
            }
            Message::SessionTerm(msg) => {
                dst.put_u8(msg.flags);
                dst.put_u8(msg.reason as u8);
            }
            Message::Reject(msg) => {
                dst.put_u8(msg.reason as u8);
                dst.put_u8(msg.rejected_type);
            }
        }
        Ok(())
    }
}

/// The transfer-length extension for a bundle of `len` bytes.
pub fn transfer_length_extension(len: u64) -> ExtensionItem {
    ExtensionItem {
        flags: 0,
        item_type: XFER_EXT_TRANSFER_LENGTH,
        value: len.to_be_bytes().to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(msg: Message) -> Message {
        let mut codec = MessageCodec::default();
        let mut buf = BytesMut::new();
        codec.encode(msg, &mut buf).unwrap();
        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert!(buf.is_empty(), "decoder left bytes behind");
        decoded
    }

    #[test]
    fn session_init_round_trip() {
        let msg = Message::SessionInit(SessionInitMessage {
            keepalive_interval: 60,
            segment_mru: 1 << 20,
            transfer_mru: 1 << 24,
            node_id: Some("dtn://n1".parse().unwrap()),
            extensions: vec![ExtensionItem {
                flags: 0,
                item_type: SESS_EXT_KEEPALIVE,
                value: vec![0, 30],
            }],
        });
        let decoded = round_trip(msg.clone());
        assert_eq!(decoded, msg);
        let Message::SessionInit(init) = decoded else {
            unreachable!()
        };
        assert_eq!(init.requested_keepalive(), 30);
    }

    #[test]
    fn transfer_segment_round_trip() {
        let msg = Message::TransferSegment(TransferSegmentMessage {
            flags: TransferFlags {
                start: true,
                end: true,
            },
            transfer_id: 42,
            extensions: vec![transfer_length_extension(5)],
            data: vec![1, 2, 3, 4, 5],
        });
        let decoded = round_trip(msg.clone());
        assert_eq!(decoded, msg);
        let Message::TransferSegment(seg) = decoded else {
            unreachable!()
        };
        assert_eq!(seg.transfer_length(), Some(5));
    }

    #[test]
    fn non_start_segment_has_no_extensions() {
        let msg = Message::TransferSegment(TransferSegmentMessage {
            flags: TransferFlags {
                start: false,
                end: true,
            },
            transfer_id: 42,
            extensions: Vec::new(),
            data: vec![9, 9],
        });
        assert_eq!(round_trip(msg.clone()), msg);
    }

    #[test]
    fn small_messages_round_trip() {
        for msg in [
            Message::Keepalive,
            Message::TransferAck(TransferAckMessage {
                flags: TransferFlags {
                    start: true,
                    end: true,
                },
                transfer_id: 7,
                acknowledged_length: 512,
            }),
            Message::TransferRefuse(TransferRefuseMessage {
                reason: TransferRefuseReason::NoResources,
                transfer_id: 7,
            }),
            Message::SessionTerm(SessionTermMessage {
                flags: 0,
                reason: SessionTermReason::IdleTimeout,
            }),
            Message::Reject(MessageRejectMessage {
                reason: MessageRejectReason::Unexpected,
                rejected_type: 9,
            }),
        ] {
            assert_eq!(round_trip(msg.clone()), msg);
        }
    }

    #[test]
    fn partial_input_yields_none() {
        let mut codec = MessageCodec::default();
        let msg = Message::TransferSegment(TransferSegmentMessage {
            flags: TransferFlags {
                start: true,
                end: true,
            },
            transfer_id: 1,
            extensions: Vec::new(),
            data: vec![0; 100],
        });
        let mut buf = BytesMut::new();
        codec.encode(msg.clone(), &mut buf).unwrap();

        // Feed the frame one prefix at a time
        let full = buf.clone();
        for cut in 1..full.len() {
            let mut partial = BytesMut::from(&full[..cut]);
            assert!(codec.decode(&mut partial).unwrap().is_none(), "cut at {cut}");
        }
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap(), msg);
    }

    #[test]
    fn unknown_type_is_an_error() {
        let mut codec = MessageCodec::default();
        let mut buf = BytesMut::from(&[0x99u8, 0x00][..]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(Error::InvalidMessageType(0x99))
        ));
        // The poisoned byte was consumed
        assert_eq!(buf.len(), 1);
    }

    #[test]
    fn unknown_extensions_are_carried() {
        let msg = Message::TransferSegment(TransferSegmentMessage {
            flags: TransferFlags {
                start: true,
                end: true,
            },
            transfer_id: 3,
            extensions: vec![ExtensionItem {
                flags: 0,
                item_type: 0x7fff,
                value: vec![1, 2, 3],
            }],
            data: vec![8],
        });
        let Message::TransferSegment(seg) = round_trip(msg) else {
            unreachable!()
        };
        assert_eq!(seg.transfer_length(), None);
        assert_eq!(seg.extensions.len(), 1);
    }
}
