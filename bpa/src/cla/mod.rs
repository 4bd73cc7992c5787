pub mod http;
pub mod http_pull;
pub mod registry;
pub mod udp;

pub use registry::ClaRegistry;

use crate::async_trait;
use crate::peer::Peer;
use mule_bpv7::{bundle::Bundle, eid::Eid};
use std::time::Instant;
use thiserror::Error;

/// A specialized `Result` type for CLA operations.
pub type Result<T> = core::result::Result<T, ClaError>;

#[derive(Error, Debug)]
pub enum ClaError {
    #[error("Invalid peer address: {0}")]
    InvalidPeerAddress(String),

    #[error("Connection is not active")]
    ConnectionNotActive,

    #[error("Connection cancelled")]
    ConnectionCancelled,

    #[error("Connection closed by peer")]
    ConnectionClosed,

    #[error("Incomplete data on the wire")]
    IncompleteData,

    #[error("Protocol violation: {0}")]
    InvalidProtocol(String),

    #[error("Unsupported protocol version {0}")]
    UnsupportedVersion(u8),

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Bundle of {actual} bytes exceeds the CLA limit of {max}")]
    BundleTooLarge { actual: usize, max: usize },

    #[error("HTTP request failed with status {0}")]
    Http(u16),

    #[error("Operation not supported: {0}")]
    OperationNotSupported(&'static str),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// One live link through a CLA.
#[derive(Debug, Clone)]
pub struct Connection {
    pub id: String,
    pub remote_eid: Option<Eid>,
    pub remote_address: String,
    pub cla_type: &'static str,
    pub established_at: Instant,
}

/// A bundle arriving from the wire, tagged with the connection it used.
#[derive(Debug)]
pub struct IncomingBundle {
    pub bundle: Bundle,
    pub connection: Connection,
}

pub type IngressSender = tokio::sync::mpsc::UnboundedSender<IncomingBundle>;
pub type IngressReceiver = tokio::sync::mpsc::UnboundedReceiver<IncomingBundle>;

/// The convergence-layer contract.
///
/// The core registers a CLA, takes its incoming stream exactly once, and
/// funnels every received bundle into the processor.
#[async_trait]
pub trait ConvergenceLayer: Send + Sync {
    /// Unique instance id, e.g. `tcp:0.0.0.0:4556`.
    fn id(&self) -> String;

    /// CLA family name as advertised by peers: `tcp`, `udp`, `http`, `httppull`.
    fn name(&self) -> &'static str;

    async fn start(&self) -> Result<()>;
    async fn stop(&self);

    async fn send_bundle(&self, bundle: &Bundle, peer: &Peer) -> Result<()>;

    /// True when this CLA has an address to dial the peer on.
    fn can_reach(&self, peer: &Peer) -> bool {
        peer.cla_list.iter().any(|(name, _)| name == self.name())
    }

    fn connections(&self) -> Vec<Connection>;

    /// The incoming bundle stream; yields `None` after the first call, or
    /// for CLAs that cannot actively receive.
    fn take_incoming(&self) -> Option<IngressReceiver>;
}

/// Resolves the dial address for a peer on a given CLA family.
pub fn peer_socket_addr(peer: &Peer, family: &str, default_port: u16) -> String {
    let port = peer
        .cla_list
        .iter()
        .find(|(name, _)| name == family)
        .and_then(|(_, port)| *port)
        .unwrap_or(default_port);
    format!("{}:{}", peer.address, port)
}
