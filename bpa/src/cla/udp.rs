use super::*;
use std::sync::{Arc, Mutex};
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

pub const DEFAULT_PORT: u16 = 4556;
pub const MAX_DATAGRAM: usize = 65535;

/// One datagram, one encoded bundle. No acks, no retries, no peer identity
/// on the wire; received connections carry a synthetic id derived from the
/// source address.
pub struct UdpConvergenceLayer {
    bind: String,
    port: u16,
    max_bundle_size: usize,
    socket: Mutex<Option<Arc<UdpSocket>>>,
    incoming: IngressSender,
    receiver: Mutex<Option<IngressReceiver>>,
    cancel_token: CancellationToken,
    task_tracker: TaskTracker,
}

impl UdpConvergenceLayer {
    pub fn new(bind: impl Into<String>, port: u16, max_bundle_size: usize) -> Self {
        let (incoming, receiver) = tokio::sync::mpsc::unbounded_channel();
        Self {
            bind: bind.into(),
            port,
            max_bundle_size: max_bundle_size.min(MAX_DATAGRAM),
            socket: Mutex::new(None),
            incoming,
            receiver: Mutex::new(Some(receiver)),
            cancel_token: CancellationToken::new(),
            task_tracker: TaskTracker::new(),
        }
    }

    async fn outbound_socket(&self) -> Result<Arc<UdpSocket>> {
        if let Some(socket) = self.socket.lock().expect("udp lock poisoned").clone() {
            return Ok(socket);
        }
        // Not listening; send from an ephemeral port
        Ok(Arc::new(UdpSocket::bind("0.0.0.0:0").await?))
    }
}

#[async_trait]
impl ConvergenceLayer for UdpConvergenceLayer {
    fn id(&self) -> String {
        format!("udp:{}:{}", self.bind, self.port)
    }

    fn name(&self) -> &'static str {
        "udp"
    }

    async fn start(&self) -> Result<()> {
        let socket = Arc::new(UdpSocket::bind((self.bind.as_str(), self.port)).await?);
        info!("UDP CLA listening on {}:{}", self.bind, self.port);
        *self.socket.lock().expect("udp lock poisoned") = Some(socket.clone());

        let incoming = self.incoming.clone();
        let cancel_token = self.cancel_token.clone();
        self.task_tracker.spawn(async move {
            let mut buf = vec![0u8; MAX_DATAGRAM];
            loop {
                let (len, from) = tokio::select! {
                    r = socket.recv_from(&mut buf) => match r {
                        Ok(v) => v,
                        Err(e) => {
                            warn!("UDP receive failed: {e}");
                            continue;
                        }
                    },
                    _ = cancel_token.cancelled() => break,
                };

                match Bundle::from_cbor(&buf[..len]) {
                    Ok(bundle) => {
                        debug!("Received {len} byte bundle datagram from {from}");
                        _ = incoming.send(IncomingBundle {
                            bundle,
                            connection: Connection {
                                id: format!("udp:{from}"),
                                remote_eid: None,
                                remote_address: from.to_string(),
                                cla_type: "udp",
                                established_at: Instant::now(),
                            },
                        });
                    }
                    Err(e) => {
                        // One bad datagram never takes the listener down
                        warn!("Dropping undecodable datagram from {from}: {e}");
                    }
                }
            }
        });
        Ok(())
    }

    async fn stop(&self) {
        self.cancel_token.cancel();
        self.task_tracker.close();
        self.task_tracker.wait().await;
        *self.socket.lock().expect("udp lock poisoned") = None;
    }

    async fn send_bundle(&self, bundle: &Bundle, peer: &Peer) -> Result<()> {
        let data = bundle.to_cbor();
        if data.len() > self.max_bundle_size {
            return Err(ClaError::BundleTooLarge {
                actual: data.len(),
                max: self.max_bundle_size,
            });
        }

        let target = peer_socket_addr(peer, self.name(), DEFAULT_PORT);
        let socket = self.outbound_socket().await?;
        socket.send_to(&data, &target).await?;
        debug!("Sent {} byte bundle datagram to {target}", data.len());
        Ok(())
    }

    fn connections(&self) -> Vec<Connection> {
        Vec::new()
    }

    fn take_incoming(&self) -> Option<IngressReceiver> {
        self.receiver.lock().expect("udp lock poisoned").take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::PeerKind;
    use mule_bpv7::builder::Builder;

    fn bundle_with_payload(len: usize) -> Bundle {
        Builder::new(
            "dtn://a/app".parse().unwrap(),
            "dtn://b/app".parse().unwrap(),
        )
        .payload(vec![0u8; len])
        .build()
    }

    #[tokio::test]
    async fn oversize_send_fails() {
        let cla = UdpConvergenceLayer::new("127.0.0.1", 0, 100);
        let peer = Peer::new("dtn://b".parse().unwrap(), "127.0.0.1", PeerKind::Static);
        assert!(matches!(
            cla.send_bundle(&bundle_with_payload(200), &peer).await,
            Err(ClaError::BundleTooLarge { .. })
        ));
    }

    #[tokio::test]
    async fn datagram_round_trip() {
        let receiver_cla = UdpConvergenceLayer::new("127.0.0.1", 0, MAX_DATAGRAM);
        // Bind on an ephemeral port, then learn it
        receiver_cla.start().await.unwrap();
        let port = {
            let guard = receiver_cla.socket.lock().unwrap();
            guard.as_ref().unwrap().local_addr().unwrap().port()
        };
        let mut incoming = receiver_cla.take_incoming().unwrap();

        let sender = UdpConvergenceLayer::new("127.0.0.1", 0, MAX_DATAGRAM);
        let mut peer = Peer::new("dtn://b".parse().unwrap(), "127.0.0.1", PeerKind::Static);
        peer.cla_list.push(("udp".into(), Some(port)));

        let bundle = bundle_with_payload(64);
        sender.send_bundle(&bundle, &peer).await.unwrap();

        let received = incoming.recv().await.unwrap();
        assert_eq!(received.bundle, bundle);
        assert_eq!(received.connection.cla_type, "udp");
        receiver_cla.stop().await;
    }
}
