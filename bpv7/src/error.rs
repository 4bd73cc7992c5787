use thiserror::Error;

/// Top-level error for bundle parsing and validation.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Bundle is not a CBOR array")]
    NotAnArray,

    #[error("Unsupported bundle protocol version {0}")]
    UnsupportedVersion(u64),

    #[error("Bundle has no payload block")]
    MissingPayload,

    #[error("Payload must be the final block")]
    PayloadNotFinal,

    #[error("Duplicate block number {0}")]
    DuplicateBlockNumber(u64),

    #[error("Invalid endpoint id: {0}")]
    InvalidEid(#[from] crate::eid::EidError),

    #[error("Invalid administrative record: {0}")]
    InvalidAdminRecord(#[from] crate::status_report::StatusReportError),

    #[error(transparent)]
    InvalidCbor(#[from] crate::cbor::decode::Error),
}
