use super::*;
use crate::peer::PeerManager;
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Deserialize)]
struct BundleListing {
    bundles: Vec<String>,
}

/// Periodically scrapes each known peer's bundle listing and downloads
/// anything not seen before. Sending is unsupported.
pub struct HttpPullConvergenceLayer {
    client: reqwest::Client,
    peers: std::sync::Arc<PeerManager>,
    poll_interval: Duration,
    known: std::sync::Arc<Mutex<HashSet<String>>>,
    incoming: IngressSender,
    receiver: Mutex<Option<IngressReceiver>>,
    cancel_token: CancellationToken,
    task_tracker: TaskTracker,
}

impl HttpPullConvergenceLayer {
    pub fn new(peers: std::sync::Arc<PeerManager>, poll_interval: Duration) -> Self {
        let (incoming, receiver) = tokio::sync::mpsc::unbounded_channel();
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(5))
                .build()
                .expect("http client construction cannot fail"),
            peers,
            poll_interval,
            known: Default::default(),
            incoming,
            receiver: Mutex::new(Some(receiver)),
            cancel_token: CancellationToken::new(),
            task_tracker: TaskTracker::new(),
        }
    }

    async fn poll_peer(
        client: &reqwest::Client,
        known: &Mutex<HashSet<String>>,
        incoming: &IngressSender,
        peer: &Peer,
    ) {
        let base = peer_socket_addr(peer, "httppull", http::DEFAULT_PORT);
        let listing = match client
            .get(format!("http://{base}/status/bundles"))
            .send()
            .await
        {
            Ok(r) => match r.json::<BundleListing>().await {
                Ok(listing) => listing,
                Err(e) => {
                    warn!("Bad bundle listing from {base}: {e}");
                    return;
                }
            },
            Err(e) => {
                debug!("Pull poll of {base} failed: {e}");
                return;
            }
        };

        let fresh = {
            let known = known.lock().expect("pull lock poisoned");
            listing
                .bundles
                .into_iter()
                .filter(|id| !known.contains(id))
                .collect::<Vec<_>>()
        };

        for id in fresh {
            let response = match client
                .get(format!("http://{base}/download"))
                .query(&[("bundle", id.as_str())])
                .send()
                .await
            {
                Ok(r) if r.status().is_success() => r,
                Ok(r) => {
                    warn!("Download of {id} from {base} returned {}", r.status());
                    continue;
                }
                Err(e) => {
                    warn!("Download of {id} from {base} failed: {e}");
                    continue;
                }
            };
            let data = match response.bytes().await {
                Ok(b) => b,
                Err(e) => {
                    warn!("Download of {id} from {base} truncated: {e}");
                    continue;
                }
            };
            match Bundle::from_cbor(&data) {
                Ok(bundle) => {
                    known.lock().expect("pull lock poisoned").insert(id);
                    _ = incoming.send(IncomingBundle {
                        bundle,
                        connection: Connection {
                            id: format!("httppull:{base}"),
                            remote_eid: Some(peer.eid.clone()),
                            remote_address: base.clone(),
                            cla_type: "httppull",
                            established_at: Instant::now(),
                        },
                    });
                }
                Err(e) => warn!("Undecodable bundle {id} from {base}: {e}"),
            }
        }
    }
}

#[async_trait]
impl ConvergenceLayer for HttpPullConvergenceLayer {
    fn id(&self) -> String {
        "httppull:poll".into()
    }

    fn name(&self) -> &'static str {
        "httppull"
    }

    async fn start(&self) -> Result<()> {
        info!(
            "HTTP pull CLA polling every {}s",
            self.poll_interval.as_secs()
        );
        let client = self.client.clone();
        let peers = self.peers.clone();
        let known = self.known.clone();
        let incoming = self.incoming.clone();
        let poll_interval = self.poll_interval;
        let cancel_token = self.cancel_token.clone();
        self.task_tracker.spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(poll_interval) => {}
                    _ = cancel_token.cancelled() => break,
                }
                for peer in peers.get_all() {
                    Self::poll_peer(&client, &known, &incoming, &peer).await;
                }
            }
        });
        Ok(())
    }

    async fn stop(&self) {
        self.cancel_token.cancel();
        self.task_tracker.close();
        self.task_tracker.wait().await;
    }

    async fn send_bundle(&self, _bundle: &Bundle, _peer: &Peer) -> Result<()> {
        Err(ClaError::OperationNotSupported(
            "the pull CLA cannot send bundles",
        ))
    }

    fn connections(&self) -> Vec<Connection> {
        Vec::new()
    }

    fn take_incoming(&self) -> Option<IngressReceiver> {
        self.receiver.lock().expect("pull lock poisoned").take()
    }
}
