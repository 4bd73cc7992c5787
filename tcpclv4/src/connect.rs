//! Contact header and SESS_INIT exchange, active and passive sides.

use crate::codec::{Message, MessageCodec, SessionInitMessage};
use crate::session::SessionParams;
use crate::{CONTACT_MAGIC, DEFAULT_MRU, PROTOCOL_VERSION};
use futures::{SinkExt, StreamExt};
use mule_bpa::cla::ClaError;
use mule_bpv7::eid::Eid;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tracing::{debug, trace};

/// Local knobs for the handshake.
#[derive(Debug, Clone)]
pub struct HandshakeConfig {
    pub node_id: Eid,
    pub keepalive_secs: u16,
}

/// The six byte contact header: magic, version, flags.
///
/// The active side sends first then reads; the passive side inverts the
/// order. Both verify magic and version before proceeding.
pub async fn contact_exchange(stream: &mut TcpStream, active: bool) -> Result<(), ClaError> {
    let ours = [
        CONTACT_MAGIC[0],
        CONTACT_MAGIC[1],
        CONTACT_MAGIC[2],
        CONTACT_MAGIC[3],
        PROTOCOL_VERSION,
        0,
    ];
    let mut theirs = [0u8; 6];

    if active {
        stream.write_all(&ours).await?;
        stream.read_exact(&mut theirs).await?;
    } else {
        stream.read_exact(&mut theirs).await?;
        stream.write_all(&ours).await?;
    }

    if theirs[..4] != CONTACT_MAGIC {
        return Err(ClaError::InvalidProtocol(format!(
            "bad contact magic {:02x?}",
            &theirs[..4]
        )));
    }
    if theirs[4] != PROTOCOL_VERSION {
        return Err(ClaError::UnsupportedVersion(theirs[4]));
    }
    trace!("Contact header exchanged");
    Ok(())
}

/// SESS_INIT both ways; returns the negotiated session parameters.
pub async fn session_init_exchange(
    framed: &mut Framed<TcpStream, MessageCodec>,
    active: bool,
    config: &HandshakeConfig,
) -> Result<SessionParams, ClaError> {
    let ours = Message::SessionInit(SessionInitMessage {
        keepalive_interval: config.keepalive_secs,
        segment_mru: DEFAULT_MRU,
        transfer_mru: DEFAULT_MRU,
        node_id: Some(config.node_id.clone()),
        extensions: Vec::new(),
    });

    let theirs = if active {
        framed
            .send(ours)
            .await
            .map_err(|e| ClaError::InvalidMessage(e.to_string()))?;
        recv_session_init(framed).await?
    } else {
        let theirs = recv_session_init(framed).await?;
        framed
            .send(ours)
            .await
            .map_err(|e| ClaError::InvalidMessage(e.to_string()))?;
        theirs
    };

    let keepalive_secs = config.keepalive_secs.min(theirs.requested_keepalive());
    let params = SessionParams {
        keepalive: (keepalive_secs > 0)
            .then(|| tokio::time::Duration::from_secs(keepalive_secs as u64)),
        segment_mru: theirs.segment_mru as usize,
        transfer_mru: DEFAULT_MRU as usize,
        peer_node: theirs.node_id,
    };
    debug!(
        "Session established with {:?}, keepalive {:?}",
        params.peer_node, params.keepalive
    );
    Ok(params)
}

async fn recv_session_init(
    framed: &mut Framed<TcpStream, MessageCodec>,
) -> Result<SessionInitMessage, ClaError> {
    match framed.next().await {
        Some(Ok(Message::SessionInit(init))) => Ok(init),
        Some(Ok(msg)) => Err(ClaError::InvalidMessage(format!(
            "expected SESS_INIT, got {:?}",
            msg.message_type()
        ))),
        Some(Err(e)) => Err(ClaError::InvalidMessage(e.to_string())),
        None => Err(ClaError::ConnectionClosed),
    }
}

/// Dials a peer and runs the active-side handshake.
pub async fn connect(
    addr: &str,
    config: &HandshakeConfig,
) -> Result<(Framed<TcpStream, MessageCodec>, SessionParams), ClaError> {
    let mut stream = TcpStream::connect(addr)
        .await
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::InvalidInput => ClaError::InvalidPeerAddress(addr.to_string()),
            _ => ClaError::Io(e),
        })?;
    contact_exchange(&mut stream, true).await?;

    let mut framed = Framed::new(stream, MessageCodec::default());
    let params = session_init_exchange(&mut framed, true, config).await?;
    Ok((framed, params))
}
