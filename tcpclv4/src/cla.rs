use crate::codec::MessageCodec;
use crate::connect::{self, HandshakeConfig};
use crate::listen;
use crate::session::{ForwardRequest, Session, SessionParams};
use crate::DEFAULT_PORT;
use mule_bpa::async_trait;
use mule_bpa::cla::{
    peer_socket_addr, ClaError, Connection, ConvergenceLayer, IngressReceiver, IngressSender,
    Result,
};
use mule_bpa::peer::{Peer, PeerKind, PeerManager};
use mule_bpv7::{bundle::Bundle, eid::Eid};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

struct SessionHandle {
    to_session: tokio::sync::mpsc::Sender<ForwardRequest>,
    connection: Connection,
}

struct Shared {
    bind: String,
    port: u16,
    handshake: HandshakeConfig,
    peers: Arc<PeerManager>,
    incoming: IngressSender,
    /// Live sessions keyed by peer node name (or remote address when the
    /// peer sent no node id).
    sessions: Mutex<HashMap<String, SessionHandle>>,
    local_port: Mutex<Option<u16>>,
    cancel_token: CancellationToken,
    task_tracker: TaskTracker,
}

/// The TCPCLv4 convergence layer: listener plus on-demand outbound
/// sessions, one per peer.
pub struct TcpClConvergenceLayer {
    shared: Arc<Shared>,
    receiver: Mutex<Option<IngressReceiver>>,
}

impl TcpClConvergenceLayer {
    pub fn new(
        bind: impl Into<String>,
        port: u16,
        keepalive_secs: u16,
        node_id: Eid,
        peers: Arc<PeerManager>,
    ) -> Self {
        let (incoming, receiver) = tokio::sync::mpsc::unbounded_channel();
        Self {
            shared: Arc::new(Shared {
                bind: bind.into(),
                port,
                handshake: HandshakeConfig {
                    node_id,
                    keepalive_secs,
                },
                peers,
                incoming,
                sessions: Mutex::new(HashMap::new()),
                local_port: Mutex::new(None),
                cancel_token: CancellationToken::new(),
                task_tracker: TaskTracker::new(),
            }),
            receiver: Mutex::new(Some(receiver)),
        }
    }

    /// The port actually bound; differs from the configured one when 0.
    pub fn local_port(&self) -> Option<u16> {
        *self.shared.local_port.lock().expect("tcpcl lock poisoned")
    }
}

impl Shared {
    fn session_key(params: &SessionParams, remote_addr: &str) -> String {
        params
            .peer_node
            .as_ref()
            .and_then(Eid::node_name)
            .unwrap_or_else(|| remote_addr.to_string())
    }

    /// Registers the session, spawns its run loop, and cleans up after it.
    fn adopt_session(
        self: &Arc<Self>,
        framed: Framed<TcpStream, MessageCodec>,
        params: SessionParams,
        remote_addr: String,
    ) -> SessionHandle {
        let key = Self::session_key(&params, &remote_addr);
        let connection = Connection {
            id: format!("tcp:{remote_addr}"),
            remote_eid: params.peer_node.clone(),
            remote_address: remote_addr.clone(),
            cla_type: "tcp",
            established_at: Instant::now(),
        };

        // A freshly handshaken neighbour is a peer we can route through
        if let Some(peer_node) = &params.peer_node {
            let host = remote_addr
                .rsplit_once(':')
                .map(|(host, _)| host.to_string())
                .unwrap_or_else(|| remote_addr.clone());
            let mut peer = Peer::new(peer_node.clone(), host, PeerKind::Dynamic);
            peer.cla_list.push(("tcp".into(), None));
            self.peers.add_or_update(peer);
            self.peers.notify_connection(peer_node, true);
        }

        let (to_session, from_cla) = tokio::sync::mpsc::channel(16);
        let handle = SessionHandle {
            to_session,
            connection: connection.clone(),
        };

        let session = Session::new(
            framed,
            params.clone(),
            self.incoming.clone(),
            connection,
            from_cla,
            self.cancel_token.clone(),
        );

        let shared = self.clone();
        let peer_node = params.peer_node.clone();
        self.task_tracker.spawn(async move {
            session.run().await;
            shared
                .sessions
                .lock()
                .expect("tcpcl lock poisoned")
                .remove(&key);
            if let Some(peer_node) = &peer_node {
                shared.peers.notify_connection(peer_node, false);
                shared.peers.record_failure(peer_node);
            }
            debug!("Session with {key} closed");
        });
        handle
    }

    async fn open_session(
        self: &Arc<Self>,
        peer: &Peer,
    ) -> Result<tokio::sync::mpsc::Sender<ForwardRequest>> {
        let target = peer_socket_addr(peer, "tcp", DEFAULT_PORT);

        if let Some(handle) = self
            .sessions
            .lock()
            .expect("tcpcl lock poisoned")
            .get(&peer.node_name())
        {
            return Ok(handle.to_session.clone());
        }

        let (framed, params) = connect::connect(&target, &self.handshake).await?;
        info!("Outbound TCPCL session established with {target}");

        let handle = self.adopt_session(framed, params.clone(), target.clone());
        let sender = handle.to_session.clone();
        self.sessions
            .lock()
            .expect("tcpcl lock poisoned")
            .insert(Self::session_key(&params, &target), handle);
        Ok(sender)
    }
}

#[async_trait]
impl ConvergenceLayer for TcpClConvergenceLayer {
    fn id(&self) -> String {
        format!("tcp:{}:{}", self.shared.bind, self.shared.port)
    }

    fn name(&self) -> &'static str {
        "tcp"
    }

    async fn start(&self) -> Result<()> {
        let listener = listen::bind_listener(&self.shared.bind, self.shared.port)?;
        let local_port = listener.local_addr()?.port();
        *self.shared.local_port.lock().expect("tcpcl lock poisoned") = Some(local_port);
        info!("TCPCL listening on {}:{local_port}", self.shared.bind);

        let shared = self.shared.clone();
        self.shared.task_tracker.spawn(async move {
            loop {
                let (stream, remote) = tokio::select! {
                    r = listener.accept() => match r {
                        Ok(v) => v,
                        Err(e) => {
                            warn!("Accept failed: {e}");
                            continue;
                        }
                    },
                    _ = shared.cancel_token.cancelled() => break,
                };

                let shared = shared.clone();
                shared.clone().task_tracker.spawn(async move {
                    let mut stream = stream;
                    if let Err(e) = connect::contact_exchange(&mut stream, false).await {
                        warn!("Contact header exchange with {remote} failed: {e}");
                        return;
                    }
                    let mut framed = Framed::new(stream, MessageCodec::default());
                    let params = match connect::session_init_exchange(
                        &mut framed,
                        false,
                        &shared.handshake,
                    )
                    .await
                    {
                        Ok(params) => params,
                        Err(e) => {
                            warn!("Session negotiation with {remote} failed: {e}");
                            return;
                        }
                    };
                    info!("Inbound TCPCL session established from {remote}");

                    let remote_addr = remote.to_string();
                    let key = Shared::session_key(&params, &remote_addr);
                    let handle = shared.adopt_session(framed, params, remote_addr);
                    shared
                        .sessions
                        .lock()
                        .expect("tcpcl lock poisoned")
                        .insert(key, handle);
                });
            }
        });
        Ok(())
    }

    async fn stop(&self) {
        self.shared.cancel_token.cancel();
        self.shared.task_tracker.close();
        self.shared.task_tracker.wait().await;
        self.shared
            .sessions
            .lock()
            .expect("tcpcl lock poisoned")
            .clear();
    }

    async fn send_bundle(&self, bundle: &Bundle, peer: &Peer) -> Result<()> {
        let to_session = self.shared.open_session(peer).await?;
        let (result_tx, result_rx) = tokio::sync::oneshot::channel();

        to_session
            .send((bundle.to_cbor(), result_tx))
            .await
            .map_err(|_| ClaError::ConnectionClosed)?;

        // The session reports once the segment hit the wire; awaiting the
        // XFER_ACK is deliberately not part of the send path
        match result_rx.await {
            Ok(true) => Ok(()),
            _ => Err(ClaError::ConnectionClosed),
        }
    }

    fn connections(&self) -> Vec<Connection> {
        self.shared
            .sessions
            .lock()
            .expect("tcpcl lock poisoned")
            .values()
            .map(|h| h.connection.clone())
            .collect()
    }

    fn take_incoming(&self) -> Option<IngressReceiver> {
        self.receiver.lock().expect("tcpcl lock poisoned").take()
    }
}
