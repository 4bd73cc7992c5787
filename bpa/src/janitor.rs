use crate::core::DtnCore;
use crate::store::Constraints;
use mule_bpv7::dtn_time::DtnTime;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, trace, warn};

const MAX_PEER_FAILURES: u32 = 3;

/// Spawns the periodic maintenance loop: expire stored bundles, prune dead
/// peers, retry forwarding for anything still holding a route.
pub fn spawn(core: Arc<DtnCore>, cancel_token: CancellationToken, tracker: &TaskTracker) {
    let interval = core.config.janitor_interval;
    tracker.spawn(async move {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = cancel_token.cancelled() => break,
            }
            run_once(&core).await;
        }
    });
}

pub async fn run_once(core: &Arc<DtnCore>) {
    expire_bundles(core).await;
    core.peers.prune_failing(MAX_PEER_FAILURES);
    core.peers.sweep_stale();
    reforward(core).await;
}

async fn expire_bundles(core: &Arc<DtnCore>) {
    let now = DtnTime::now();
    for id in core.store.all_ids().await {
        let expired = match core.store.get_bundle(&id).await {
            Some(bundle) => bundle.is_expired(now),
            // Metadata without bytes is a leftover; collect it too
            None => true,
        };
        let deleted = core
            .store
            .get_metadata(&id)
            .await
            .map(|p| p.constraints.contains(Constraints::DELETED))
            .unwrap_or(false);

        if expired || deleted {
            debug!("Janitor removing {} bundle {id}", if expired { "expired" } else { "delivered" });
            if let Err(e) = core.store.remove(&id).await {
                warn!("Janitor failed to remove {id}: {e}");
            }
        }
    }
}

/// One more forwarding attempt for every bundle that still has somewhere
/// to go. Skipped entirely when no CLA is up.
async fn reforward(core: &Arc<DtnCore>) {
    if core.cla_registry.is_empty() {
        return;
    }

    let now = DtnTime::now();
    for pack in core.store.all_bundles().await {
        if pack.constraints.contains(Constraints::DELETED) {
            continue;
        }
        if core.is_local_endpoint(&pack.destination) {
            continue;
        }
        let Some(bundle) = core.store.get_bundle(&pack.id).await else {
            continue;
        };
        if bundle.is_expired(now) {
            continue;
        }

        let decision = core.get_routing_decision(&bundle);
        if !decision.is_local_delivery && !decision.next_hops.is_empty() {
            trace!(
                "Janitor re-forwarding {} to {} peers",
                pack.id,
                decision.next_hops.len()
            );
            core.send_bundle(&bundle, &decision.next_hops).await;
        }
    }
}
