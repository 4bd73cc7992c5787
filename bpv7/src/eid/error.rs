use thiserror::Error;

#[derive(Error, Debug)]
pub enum EidError {
    #[error("Unsupported EID scheme '{0}'")]
    UnsupportedScheme(String),

    #[error("Missing scheme separator")]
    MissingScheme,

    #[error("Empty node name")]
    EmptyNodeName,

    #[error("Non-ASCII character in dtn EID")]
    NonAscii,

    #[error("Invalid scheme-specific part '{0}'")]
    InvalidSsp(String),

    #[error("Invalid ipn number: {0}")]
    InvalidIpnNumber(#[from] std::num::ParseIntError),

    #[error(transparent)]
    InvalidCbor(#[from] crate::cbor::decode::Error),
}
