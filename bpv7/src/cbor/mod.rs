//! A compact CBOR reader/writer, sufficient for the subset of CBOR that
//! BPv7 bundles and administrative records use.

pub mod decode;
pub mod encode;
