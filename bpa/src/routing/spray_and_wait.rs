use super::*;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use tracing::trace;

pub const DEFAULT_COPIES: u32 = 7;

/// Binary spray-and-wait.
///
/// A locally sourced bundle starts with `L` copies, a relayed one with a
/// single copy. While more than one copy remains we spray half the
/// remainder at each new peer; down to one copy we wait until the
/// destination itself is in direct reach.
pub struct SprayAndWaitRouting {
    num_copies: u32,
    inner: Mutex<HashMap<String, SprayState>>,
}

struct SprayState {
    remaining: u32,
    sprayed_to: HashSet<String>,
}

impl SprayAndWaitRouting {
    pub fn new(num_copies: u32) -> Self {
        Self {
            num_copies: num_copies.max(1),
            inner: Mutex::new(HashMap::new()),
        }
    }

    #[cfg(test)]
    fn remaining(&self, bundle_id: &str) -> Option<u32> {
        self.inner
            .lock()
            .unwrap()
            .get(bundle_id)
            .map(|s| s.remaining)
    }
}

impl Default for SprayAndWaitRouting {
    fn default() -> Self {
        Self::new(DEFAULT_COPIES)
    }
}

impl RoutingAgent for SprayAndWaitRouting {
    fn name(&self) -> &'static str {
        "sprayandwait"
    }

    fn next_hops(&self, bundle: &Bundle, ctx: &RoutingContext) -> Vec<Peer> {
        let bundle_id = bundle.id().to_string();
        let mut states = self.inner.lock().expect("spray lock poisoned");
        let state = states.entry(bundle_id.clone()).or_insert_with(|| SprayState {
            remaining: if ctx.local_source { self.num_copies } else { 1 },
            sprayed_to: HashSet::new(),
        });

        if state.remaining < 2 {
            // Wait phase: direct delivery only
            if let Some(direct) = direct_peer(&ctx.peers, bundle) {
                if state.remaining > 0 {
                    state.remaining = 0;
                    state.sprayed_to.insert(direct.node_name());
                    trace!("Wait phase direct delivery of {bundle_id}");
                    return vec![direct.clone()];
                }
            }
            return Vec::new();
        }

        // Spray phase: half the remaining copies per fresh peer, keeping at
        // least one for the wait phase
        let mut hops = Vec::new();
        for peer in reachable(&ctx.peers) {
            if state.remaining < 2 {
                break;
            }
            if state.sprayed_to.contains(&peer.node_name()) {
                continue;
            }
            let given = (state.remaining / 2).max(1);
            state.remaining -= given;
            state.sprayed_to.insert(peer.node_name());
            trace!(
                "Sprayed {given} copies of {bundle_id} to {}, {} remaining",
                peer.node_name(),
                state.remaining
            );
            hops.push(peer.clone());
        }
        hops
    }

    fn handle_notification(&self, notification: RoutingNotification) {
        if let RoutingNotification::SendingFailed {
            bundle_id,
            node_name,
        } = notification
        {
            let mut states = self.inner.lock().expect("spray lock poisoned");
            if let Some(state) = states.get_mut(&bundle_id) {
                state.sprayed_to.remove(&node_name);
            }
        }
    }

    fn state(&self) -> HashMap<String, String> {
        let states = self.inner.lock().expect("spray lock poisoned");
        HashMap::from([
            ("bundles_tracked".to_string(), states.len().to_string()),
            ("num_copies".to_string(), self.num_copies.to_string()),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_util::*;
    use super::*;

    #[test]
    fn halves_copies_per_peer() {
        let router = SprayAndWaitRouting::new(7);
        let b = bundle("dtn://n1/app", "dtn://far/app");
        let id = b.id().to_string();

        let hops = router.next_hops(&b, &ctx(vec![peer("n2")]));
        assert_eq!(hops.len(), 1);
        assert_eq!(router.remaining(&id), Some(4));

        let hops = router.next_hops(&b, &ctx(vec![peer("n3"), peer("n4")]));
        assert_eq!(hops.len(), 2);
        // 4 -> gave 2 -> 2 -> gave 1 -> 1
        assert_eq!(router.remaining(&id), Some(1));
    }

    #[test]
    fn received_bundles_get_one_copy() {
        let router = SprayAndWaitRouting::new(7);
        let b = bundle("dtn://other/app", "dtn://far/app");
        let mut c = ctx(vec![peer("n2")]);
        c.local_source = false;

        // One copy means wait phase: n2 is not the destination
        assert!(router.next_hops(&b, &c).is_empty());
        assert_eq!(router.remaining(&b.id().to_string()), Some(1));
    }

    #[test]
    fn wait_phase_delivers_direct() {
        let router = SprayAndWaitRouting::new(7);
        let b = bundle("dtn://other/app", "dtn://n9/app");
        let mut c = ctx(vec![peer("n9")]);
        c.local_source = false;

        let hops = router.next_hops(&b, &c);
        assert_eq!(hops.len(), 1);
        assert_eq!(hops[0].node_name(), "n9");
        assert_eq!(router.remaining(&b.id().to_string()), Some(0));

        // Copies exhausted; nothing further
        assert!(router.next_hops(&b, &c).is_empty());
    }

    #[test]
    fn never_sprays_same_peer_twice() {
        let router = SprayAndWaitRouting::new(8);
        let b = bundle("dtn://n1/app", "dtn://far/app");
        let c = ctx(vec![peer("n2")]);

        assert_eq!(router.next_hops(&b, &c).len(), 1);
        assert!(router.next_hops(&b, &c).is_empty());
    }

    #[test]
    fn copies_conserved() {
        let router = SprayAndWaitRouting::new(7);
        let b = bundle("dtn://n1/app", "dtn://far/app");
        let id = b.id().to_string();
        let c = ctx(vec![peer("n2"), peer("n3"), peer("n4"), peer("n5")]);

        let hops = router.next_hops(&b, &c);
        // 7 -> 3 given (4 left) -> 2 given (2 left) -> 1 given (1 left):
        // wait phase before the fourth peer is reached
        assert_eq!(hops.len(), 3);
        assert_eq!(router.remaining(&id), Some(1));
    }
}
