/*!
TCP Convergence Layer version 4 ([RFC 9174](https://www.rfc-editor.org/rfc/rfc9174.html)).

A framed, keepalived, session-based reliable bundle link. Emission always
uses single-segment transfers (`START|END` in one `XFER_SEGMENT`);
reception reassembles multi-segment transfers up to the negotiated MRU.
*/

pub mod cla;
pub mod codec;
pub mod connect;
pub mod listen;
pub mod session;

pub use cla::TcpClConvergenceLayer;

/// Magic bytes opening every contact header.
pub const CONTACT_MAGIC: [u8; 4] = *b"dtn!";

/// The protocol version this crate speaks.
pub const PROTOCOL_VERSION: u8 = 4;

pub const DEFAULT_PORT: u16 = 4556;
pub const DEFAULT_KEEPALIVE_SECS: u16 = 60;

/// Both sides advertise this segment/transfer MRU.
pub const DEFAULT_MRU: u64 = 64 * 1024 * 1024;
