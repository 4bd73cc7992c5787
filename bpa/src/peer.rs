use mule_bpv7::eid::Eid;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, trace};

/// How a peer became known to us.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerKind {
    /// Preconfigured; never pruned for failures.
    Static,
    /// Discovered at runtime; pruned after repeated send failures.
    Dynamic,
}

impl std::fmt::Display for PeerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PeerKind::Static => write!(f, "static"),
            PeerKind::Dynamic => write!(f, "dynamic"),
        }
    }
}

/// A known neighbour node.
#[derive(Debug, Clone)]
pub struct Peer {
    pub eid: Eid,
    /// Host name or IP the CLAs dial.
    pub address: String,
    pub kind: PeerKind,
    pub announce_period: Option<Duration>,
    /// `(cla family name, port)` pairs this peer listens on.
    pub cla_list: Vec<(String, Option<u16>)>,
    /// Well-known service tag to name.
    pub services: HashMap<u8, String>,
    pub last_contact: Instant,
    pub fail_count: u32,
}

impl Peer {
    pub fn new(eid: Eid, address: impl Into<String>, kind: PeerKind) -> Self {
        Self {
            eid,
            address: address.into(),
            kind,
            announce_period: None,
            cla_list: Vec::new(),
            services: HashMap::new(),
            last_contact: Instant::now(),
            fail_count: 0,
        }
    }

    pub fn node_name(&self) -> String {
        self.eid.node_name().unwrap_or_default()
    }

    /// First advertised CLA, in announcement order.
    pub fn first_cla(&self) -> Option<&(String, Option<u16>)> {
        self.cla_list.first()
    }
}

#[derive(Debug, Clone)]
pub enum PeerEvent {
    Discovered(Peer),
    Updated(Peer),
    Lost(Peer),
    ConnectionEstablished(Eid),
    ConnectionLost(Eid),
}

/// Tracks known peers and publishes lifecycle events.
///
/// The event stream is single-consumer: the core takes the receiver once
/// and pumps notifications into the routing agent.
pub struct PeerManager {
    peers: Mutex<HashMap<String, Peer>>,
    events: tokio::sync::mpsc::UnboundedSender<PeerEvent>,
    receiver: Mutex<Option<tokio::sync::mpsc::UnboundedReceiver<PeerEvent>>>,
    peer_timeout: Duration,
    cancel_token: CancellationToken,
    task_tracker: TaskTracker,
}

const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

impl PeerManager {
    pub fn new(peer_timeout: Duration) -> Self {
        let (events, receiver) = tokio::sync::mpsc::unbounded_channel();
        Self {
            peers: Mutex::new(HashMap::new()),
            events,
            receiver: Mutex::new(Some(receiver)),
            peer_timeout,
            cancel_token: CancellationToken::new(),
            task_tracker: TaskTracker::new(),
        }
    }

    /// The event stream; yields `None` after the first call.
    pub fn take_events(&self) -> Option<tokio::sync::mpsc::UnboundedReceiver<PeerEvent>> {
        self.receiver.lock().expect("peer lock poisoned").take()
    }

    /// Starts the background stale-peer sweep.
    pub fn start(self: &std::sync::Arc<Self>) {
        let manager = self.clone();
        self.task_tracker.spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(SWEEP_INTERVAL) => {}
                    _ = manager.cancel_token.cancelled() => break,
                }
                manager.sweep_stale();
            }
        });
    }

    pub async fn shutdown(&self) {
        self.cancel_token.cancel();
        self.task_tracker.close();
        self.task_tracker.wait().await;
    }

    /// Inserts or refreshes a peer; refreshes `last_contact` and resets the
    /// failure counter either way.
    pub fn add_or_update(&self, mut peer: Peer) {
        peer.last_contact = Instant::now();
        peer.fail_count = 0;
        let name = peer.node_name();
        let event = {
            let mut peers = self.peers.lock().expect("peer lock poisoned");
            match peers.insert(name.clone(), peer.clone()) {
                None => {
                    info!("Discovered new peer {}", peer.eid);
                    PeerEvent::Discovered(peer)
                }
                Some(_) => {
                    trace!("Refreshed peer {}", peer.eid);
                    PeerEvent::Updated(peer)
                }
            }
        };
        _ = self.events.send(event);
    }

    pub fn remove(&self, eid: &Eid) {
        let removed = {
            let mut peers = self.peers.lock().expect("peer lock poisoned");
            eid.node_name().and_then(|name| peers.remove(&name))
        };
        if let Some(peer) = removed {
            info!("Removed peer {}", peer.eid);
            _ = self.events.send(PeerEvent::Lost(peer));
        }
    }

    pub fn record_success(&self, eid: &Eid) {
        let mut peers = self.peers.lock().expect("peer lock poisoned");
        if let Some(peer) = eid.node_name().and_then(|n| peers.get_mut(&n)) {
            peer.last_contact = Instant::now();
            peer.fail_count = 0;
        }
    }

    pub fn record_failure(&self, eid: &Eid) {
        let mut peers = self.peers.lock().expect("peer lock poisoned");
        if let Some(peer) = eid.node_name().and_then(|n| peers.get_mut(&n)) {
            peer.fail_count += 1;
            debug!(
                "Send to {} failed, fail_count now {}",
                peer.eid, peer.fail_count
            );
        }
    }

    pub fn get_all(&self) -> Vec<Peer> {
        self.peers
            .lock()
            .expect("peer lock poisoned")
            .values()
            .cloned()
            .collect()
    }

    pub fn get_peer(&self, eid: &Eid) -> Option<Peer> {
        let peers = self.peers.lock().expect("peer lock poisoned");
        eid.node_name().and_then(|n| peers.get(&n).cloned())
    }

    pub fn get_peer_by_node(&self, node_name: &str) -> Option<Peer> {
        self.peers
            .lock()
            .expect("peer lock poisoned")
            .get(node_name)
            .cloned()
    }

    /// Removes every peer whose last contact is older than the timeout.
    pub fn sweep_stale(&self) {
        let stale = {
            let mut peers = self.peers.lock().expect("peer lock poisoned");
            let stale_names = peers
                .iter()
                .filter(|(_, p)| p.last_contact.elapsed() > self.peer_timeout)
                .map(|(n, _)| n.clone())
                .collect::<Vec<_>>();
            stale_names
                .into_iter()
                .filter_map(|n| peers.remove(&n))
                .collect::<Vec<_>>()
        };
        for peer in stale {
            info!("Peer {} timed out", peer.eid);
            _ = self.events.send(PeerEvent::Lost(peer));
        }
    }

    /// Removes dynamic peers that keep failing; the janitor calls this.
    pub fn prune_failing(&self, max_failures: u32) {
        let pruned = {
            let mut peers = self.peers.lock().expect("peer lock poisoned");
            let names = peers
                .iter()
                .filter(|(_, p)| p.kind == PeerKind::Dynamic && p.fail_count > max_failures)
                .map(|(n, _)| n.clone())
                .collect::<Vec<_>>();
            names
                .into_iter()
                .filter_map(|n| peers.remove(&n))
                .collect::<Vec<_>>()
        };
        for peer in pruned {
            info!(
                "Pruned peer {} after {} failed sends",
                peer.eid, peer.fail_count
            );
            _ = self.events.send(PeerEvent::Lost(peer));
        }
    }

    pub fn notify_connection(&self, eid: &Eid, established: bool) {
        _ = self.events.send(if established {
            PeerEvent::ConnectionEstablished(eid.clone())
        } else {
            PeerEvent::ConnectionLost(eid.clone())
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(eid: &str) -> Peer {
        Peer::new(eid.parse().unwrap(), "127.0.0.1", PeerKind::Dynamic)
    }

    #[tokio::test]
    async fn discovery_then_update_events() {
        let manager = PeerManager::new(Duration::from_secs(60));
        let mut events = manager.take_events().unwrap();
        assert!(manager.take_events().is_none());

        manager.add_or_update(peer("dtn://n2"));
        manager.add_or_update(peer("dtn://n2"));
        assert!(matches!(events.recv().await, Some(PeerEvent::Discovered(_))));
        assert!(matches!(events.recv().await, Some(PeerEvent::Updated(_))));
        assert_eq!(manager.get_all().len(), 1);
    }

    #[tokio::test]
    async fn removal_emits_lost() {
        let manager = PeerManager::new(Duration::from_secs(60));
        let mut events = manager.take_events().unwrap();
        let p = peer("dtn://n2");
        manager.add_or_update(p.clone());
        manager.remove(&p.eid);
        assert!(matches!(events.recv().await, Some(PeerEvent::Discovered(_))));
        assert!(matches!(events.recv().await, Some(PeerEvent::Lost(_))));
        assert!(manager.get_peer(&p.eid).is_none());
    }

    #[tokio::test]
    async fn failure_accounting() {
        let manager = PeerManager::new(Duration::from_secs(60));
        let p = peer("dtn://n2");
        manager.add_or_update(p.clone());

        for _ in 0..4 {
            manager.record_failure(&p.eid);
        }
        assert_eq!(manager.get_peer(&p.eid).unwrap().fail_count, 4);

        manager.record_success(&p.eid);
        assert_eq!(manager.get_peer(&p.eid).unwrap().fail_count, 0);
    }

    #[tokio::test]
    async fn prune_failing_is_dynamic_only() {
        let manager = PeerManager::new(Duration::from_secs(60));
        let mut fixed = peer("dtn://keep");
        fixed.kind = PeerKind::Static;
        manager.add_or_update(fixed);
        manager.add_or_update(peer("dtn://drop"));

        for _ in 0..4 {
            manager.record_failure(&"dtn://keep".parse().unwrap());
            manager.record_failure(&"dtn://drop".parse().unwrap());
        }
        manager.prune_failing(3);

        assert!(manager.get_peer_by_node("keep").is_some());
        assert!(manager.get_peer_by_node("drop").is_none());
    }

    #[tokio::test]
    async fn stale_sweep() {
        let manager = PeerManager::new(Duration::from_millis(1));
        manager.add_or_update(peer("dtn://n2"));
        tokio::time::sleep(Duration::from_millis(10)).await;
        manager.sweep_stale();
        assert!(manager.get_all().is_empty());
    }
}
