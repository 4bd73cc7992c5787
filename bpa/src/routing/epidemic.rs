use super::*;
use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;
use tracing::trace;

/// Tracked bundle histories are capped; the oldest entry goes first.
const HISTORY_CAP: usize = 10_000;

/// Forward every bundle to every peer exactly once.
///
/// Per bundle we remember which peers have already been attempted, so a
/// peer is selected at most once per bundle lifetime. A `Lost` peer is
/// purged from all histories, so a re-discovered peer is eligible again.
#[derive(Default)]
pub struct EpidemicRouting {
    inner: Mutex<State>,
}

#[derive(Default)]
struct State {
    history: std::collections::HashMap<String, HashSet<String>>,
    order: VecDeque<String>,
}

impl State {
    fn history_for(&mut self, bundle_id: &str) -> &mut HashSet<String> {
        if !self.history.contains_key(bundle_id) {
            self.order.push_back(bundle_id.to_string());
            if self.order.len() > HISTORY_CAP {
                if let Some(evicted) = self.order.pop_front() {
                    self.history.remove(&evicted);
                }
            }
        }
        self.history.entry(bundle_id.to_string()).or_default()
    }
}

impl EpidemicRouting {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RoutingAgent for EpidemicRouting {
    fn name(&self) -> &'static str {
        "epidemic"
    }

    fn next_hops(&self, bundle: &Bundle, ctx: &RoutingContext) -> Vec<Peer> {
        let bundle_id = bundle.id().to_string();
        let mut state = self.inner.lock().expect("epidemic lock poisoned");
        let history = state.history_for(&bundle_id);

        // Destination in direct reach beats spreading further
        let selected = if let Some(direct) = direct_peer(&ctx.peers, bundle) {
            if history.contains(&direct.node_name()) {
                Vec::new()
            } else {
                vec![direct.clone()]
            }
        } else {
            reachable(&ctx.peers)
                .filter(|p| !history.contains(&p.node_name()))
                .cloned()
                .collect()
        };

        for peer in &selected {
            history.insert(peer.node_name());
        }
        trace!(
            "Epidemic selected {} next hops for {bundle_id}",
            selected.len()
        );
        selected
    }

    fn handle_notification(&self, notification: RoutingNotification) {
        let mut state = self.inner.lock().expect("epidemic lock poisoned");
        match notification {
            RoutingNotification::IncomingBundle {
                bundle_id,
                from_node: Some(from_node),
            } => {
                // Never offer a bundle back to whoever gave it to us
                state.history_for(&bundle_id).insert(from_node);
            }
            RoutingNotification::PeerLost(node_name) => {
                for history in state.history.values_mut() {
                    history.remove(&node_name);
                }
            }
            RoutingNotification::SendingFailed {
                bundle_id,
                node_name,
            } => {
                // Allow the janitor's re-forward pass another attempt
                if let Some(history) = state.history.get_mut(&bundle_id) {
                    history.remove(&node_name);
                }
            }
            _ => {}
        }
    }

    fn state(&self) -> std::collections::HashMap<String, String> {
        let state = self.inner.lock().expect("epidemic lock poisoned");
        std::collections::HashMap::from([(
            "bundles_tracked".to_string(),
            state.history.len().to_string(),
        )])
    }
}
