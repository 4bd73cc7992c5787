use crate::cla::Connection;
use crate::core::DtnCore;
use crate::peer::Peer;
use crate::routing::RoutingNotification;
use crate::stats::Statistics;
use crate::store::{Constraints, StoreError};
use mule_bpv7::{
    bundle::Bundle,
    dtn_time::DtnTime,
    eid::Eid,
    status_report::{
        AdministrativeRecord, BundleStatusReport, StatusAssertion, StatusReportReason,
    },
    builder::Builder,
    BundleFlags,
};
use std::collections::{HashSet, VecDeque};
use std::sync::{Mutex, RwLock, Weak};
use thiserror::Error;
use tracing::{debug, info, trace, warn};

/// A specialized `Result` type for processor operations.
pub type Result<T> = core::result::Result<T, ProcessingError>;

#[derive(Error, Debug)]
pub enum ProcessingError {
    #[error("Processor has no core reference")]
    NoCoreReference,

    #[error("Source {0} is not a local endpoint")]
    InvalidSource(Eid),

    #[error("Bundle {0} has expired")]
    BundleExpired(String),

    #[error("Bundle {0} already received")]
    DuplicateBundle(String),

    #[error("Bundle {0} deleted by block processing")]
    BundleDeleted(String),

    #[error("Invalid administrative record: {0}")]
    InvalidAdministrativeRecord(String),

    #[error("No local endpoint for {0}")]
    NoLocalEndpoint(Eid),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Which status a report asserts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StatusKind {
    Received,
    Forwarded,
    Delivered,
    Deleted,
}

const SEEN_CAP: usize = 10_000;

/// Bounded duplicate-reception cache. Drops the oldest id on overflow;
/// survival across restarts is not required.
struct SeenCache {
    set: HashSet<String>,
    order: VecDeque<String>,
}

impl SeenCache {
    fn new() -> Self {
        Self {
            set: HashSet::new(),
            order: VecDeque::new(),
        }
    }

    /// False if the id was already present.
    fn insert(&mut self, id: &str) -> bool {
        if !self.set.insert(id.to_string()) {
            return false;
        }
        self.order.push_back(id.to_string());
        if self.order.len() > SEEN_CAP {
            if let Some(evicted) = self.order.pop_front() {
                self.set.remove(&evicted);
            }
        }
        true
    }
}

/// The bundle state machine: reception, dispatch, forwarding, delivery and
/// status reporting.
///
/// The core owns the processor; the processor reaches back through a weak
/// handle set once at wiring time.
pub struct BundleProcessor {
    core: RwLock<Weak<DtnCore>>,
    seen: Mutex<SeenCache>,
}

impl Default for BundleProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl BundleProcessor {
    pub fn new() -> Self {
        Self {
            core: RwLock::new(Weak::new()),
            seen: Mutex::new(SeenCache::new()),
        }
    }

    pub fn set_core(&self, core: &std::sync::Arc<DtnCore>) {
        *self.core.write().expect("processor lock poisoned") = std::sync::Arc::downgrade(core);
    }

    fn core(&self) -> Result<std::sync::Arc<DtnCore>> {
        self.core
            .read()
            .expect("processor lock poisoned")
            .upgrade()
            .ok_or(ProcessingError::NoCoreReference)
    }

    /// Handles a bundle arriving from a CLA.
    pub async fn receive(&self, mut bundle: Bundle, from: Option<Connection>) -> Result<()> {
        let core = self.core()?;
        let id = bundle.id().to_string();

        let first_sighting = self.seen.lock().expect("processor lock poisoned").insert(&id);
        if !first_sighting {
            Statistics::bump(&core.stats.duplicates);
            debug!("Ignoring duplicate bundle {id}");
            return Err(ProcessingError::DuplicateBundle(id));
        }

        if bundle.is_expired(DtnTime::now()) {
            if bundle.primary.flags.delete_report_requested {
                self.send_status_report(
                    &core,
                    &bundle,
                    StatusKind::Deleted,
                    StatusReportReason::LifetimeExpired,
                )
                .await;
            }
            return Err(ProcessingError::BundleExpired(id));
        }

        core.store.push(&bundle).await?;
        Statistics::bump(&core.stats.incoming);

        self.set_constraints(&core, &id, Constraints::none()).await?;

        // Tell the router who handed us this bundle, for loop prevention
        core.routing.handle_notification(RoutingNotification::IncomingBundle {
            bundle_id: id.clone(),
            from_node: from
                .as_ref()
                .and_then(|c| c.remote_eid.as_ref())
                .and_then(Eid::node_name),
        });

        if bundle.primary.flags.receipt_report_requested {
            self.send_status_report(
                &core,
                &bundle,
                StatusKind::Received,
                StatusReportReason::NoInformation,
            )
            .await;
        }

        if bundle.is_admin_record() {
            return self.handle_admin_record(&core, &bundle, &id).await;
        }

        self.check_blocks(&core, &mut bundle, &id).await?;

        self.add_constraint(&core, &id, Constraints::DISPATCH_PENDING)
            .await?;
        self.dispatch(&bundle, &id).await
    }

    /// Handles a locally originated bundle.
    pub async fn transmit(&self, bundle: Bundle) -> Result<()> {
        let core = self.core()?;
        let id = bundle.id().to_string();

        if !core.is_local_endpoint(&bundle.primary.source) {
            return Err(ProcessingError::InvalidSource(bundle.primary.source));
        }
        if bundle.is_expired(DtnTime::now()) {
            return Err(ProcessingError::BundleExpired(id));
        }

        core.store.push(&bundle).await?;
        self.set_constraints(&core, &id, Constraints::DISPATCH_PENDING)
            .await?;
        self.dispatch(&bundle, &id).await
    }

    /// Routes a bundle to local delivery or forwarding.
    pub async fn dispatch(&self, bundle: &Bundle, id: &str) -> Result<()> {
        let core = self.core()?;

        // A deleted bundle is past routing; it only awaits the janitor
        if let Some(pack) = core.store.get_metadata(id).await {
            if pack.constraints.contains(Constraints::DELETED) {
                return Ok(());
            }
        }

        self.remove_constraint(&core, id, Constraints::DISPATCH_PENDING)
            .await?;

        let decision = core.get_routing_decision(bundle);
        if decision.is_local_delivery {
            return self.local_delivery(bundle, id).await;
        }
        if !decision.next_hops.is_empty() {
            self.add_constraint(&core, id, Constraints::FORWARD_PENDING)
                .await?;
            return self.forward(bundle, id, decision.next_hops).await;
        }

        trace!("No route for {id}, bundle parked in store");
        if bundle.primary.flags.delete_report_requested
            && !bundle.primary.destination.is_none()
        {
            self.send_status_report(
                &core,
                bundle,
                StatusKind::Deleted,
                StatusReportReason::NoRouteToDestination,
            )
            .await;
        }
        Statistics::bump(&core.stats.failed);
        Ok(())
    }

    /// Pushes a bundle out through the best CLA per peer.
    async fn forward(&self, bundle: &Bundle, id: &str, peers: Vec<Peer>) -> Result<()> {
        let core = self.core()?;

        // The routing decision may have raced the clock
        if bundle.is_expired(DtnTime::now()) {
            if bundle.primary.flags.delete_report_requested {
                self.send_status_report(
                    &core,
                    bundle,
                    StatusKind::Deleted,
                    StatusReportReason::LifetimeExpired,
                )
                .await;
            }
            self.add_constraint(&core, id, Constraints::DELETED).await?;
            return Err(ProcessingError::BundleExpired(id.to_string()));
        }

        for peer in &peers {
            let mut sent = false;
            for cla in core.cla_registry.find_clas_for_peer(peer) {
                match cla.send_bundle(bundle, peer).await {
                    Ok(()) => {
                        debug!("Forwarded {id} to {} via {}", peer.eid, cla.id());
                        core.peers.record_success(&peer.eid);
                        Statistics::bump(&core.stats.outgoing);
                        sent = true;
                        break;
                    }
                    Err(e) => {
                        warn!("CLA {} failed to send {id} to {}: {e}", cla.id(), peer.eid);
                    }
                }
            }
            if !sent {
                core.peers.record_failure(&peer.eid);
                core.routing
                    .handle_notification(RoutingNotification::SendingFailed {
                        bundle_id: id.to_string(),
                        node_name: peer.node_name(),
                    });
            }
        }

        // Cleared only after the whole peer list has been tried
        self.remove_constraint(&core, id, Constraints::FORWARD_PENDING)
            .await?;

        if bundle.primary.flags.forward_report_requested {
            self.send_status_report(
                &core,
                bundle,
                StatusKind::Forwarded,
                StatusReportReason::NoInformation,
            )
            .await;
        }
        Ok(())
    }

    /// Hands a bundle to the application agent.
    async fn local_delivery(&self, bundle: &Bundle, id: &str) -> Result<()> {
        let core = self.core()?;

        if !core.is_local_endpoint(&bundle.primary.destination) {
            return Err(ProcessingError::NoLocalEndpoint(
                bundle.primary.destination.clone(),
            ));
        }

        let delivered = core.app_agent.deliver_bundle(bundle.clone());
        trace!(
            "Bundle {id} {} locally",
            if delivered { "delivered" } else { "queued" }
        );
        Statistics::bump(&core.stats.delivered);

        if bundle.primary.flags.delivery_report_requested {
            self.send_status_report(
                &core,
                bundle,
                StatusKind::Delivered,
                StatusReportReason::NoInformation,
            )
            .await;
        }

        // Leave the corpse for the janitor
        self.add_constraint(&core, id, Constraints::DELETED).await
    }

    /// Unknown-block escalation ladder.
    async fn check_blocks(&self, core: &DtnCore, bundle: &mut Bundle, id: &str) -> Result<()> {
        let mut remove_numbers = Vec::new();
        for block in &bundle.blocks {
            if matches!(u64::from(block.block_type), 1 | 2 | 6 | 7) {
                continue;
            }
            if block.flags.delete_bundle_on_failure {
                if bundle.primary.flags.delete_report_requested {
                    self.send_status_report(
                        core,
                        bundle,
                        StatusKind::Deleted,
                        StatusReportReason::BlockUnintelligible,
                    )
                    .await;
                }
                self.add_constraint(core, id, Constraints::DELETED).await?;
                core.store.remove(id).await?;
                return Err(ProcessingError::BundleDeleted(id.to_string()));
            }
            if block.flags.report_on_failure {
                self.send_status_report(
                    core,
                    bundle,
                    StatusKind::Received,
                    StatusReportReason::BlockUnintelligible,
                )
                .await;
            } else if block.flags.delete_block_on_failure {
                remove_numbers.push(block.number);
            }
        }

        if !remove_numbers.is_empty() {
            info!(
                "Stripping {} unintelligible blocks from {id}",
                remove_numbers.len()
            );
            bundle.blocks.retain(|b| !remove_numbers.contains(&b.number));
            core.store.push(bundle).await?;
        }
        Ok(())
    }

    /// Administrative records terminate here; they are never forwarded.
    async fn handle_admin_record(&self, core: &DtnCore, bundle: &Bundle, id: &str) -> Result<()> {
        let payload = bundle.payload().ok_or_else(|| {
            ProcessingError::InvalidAdministrativeRecord("no payload block".into())
        })?;
        let record = AdministrativeRecord::from_cbor(payload)
            .map_err(|e| ProcessingError::InvalidAdministrativeRecord(e.to_string()))?;

        let AdministrativeRecord::BundleStatusReport(report) = record;
        let reported = format!("{}-{}", report.source, report.timestamp);
        info!(
            "Status report from {} about {reported}: received={} forwarded={} delivered={} deleted={} reason={:?}",
            bundle.primary.source,
            report.received.is_some(),
            report.forwarded.is_some(),
            report.delivered.is_some(),
            report.deleted.is_some(),
            report.reason,
        );

        // A delivery confirmation means downstream custody is moot
        if report.delivered.is_some() && core.store.has_item(&reported).await {
            debug!("Bundle {reported} was delivered remotely, removing from store");
            _ = core.store.remove(&reported).await;
        }

        // The record itself is spent
        self.add_constraint(core, id, Constraints::DELETED).await
    }

    /// Builds and transmits a status report about `bundle`, when enabled.
    async fn send_status_report(
        &self,
        core: &DtnCore,
        bundle: &Bundle,
        kind: StatusKind,
        reason: StatusReportReason,
    ) {
        if !core.config.generate_status_reports
            || bundle.primary.report_to.is_none()
            || bundle.is_admin_record()
        {
            return;
        }

        let assertion = Some(StatusAssertion(Some(DtnTime::now())));
        let mut report = BundleStatusReport {
            reason,
            source: bundle.primary.source.clone(),
            timestamp: bundle.primary.timestamp,
            ..Default::default()
        };
        match kind {
            StatusKind::Received => report.received = assertion,
            StatusKind::Forwarded => report.forwarded = assertion,
            StatusKind::Delivered => report.delivered = assertion,
            StatusKind::Deleted => report.deleted = assertion,
        }

        let report_bundle = Builder::new(
            core.node_id.clone(),
            bundle.primary.report_to.clone(),
        )
        .flags(BundleFlags {
            is_admin_record: true,
            ..Default::default()
        })
        .payload(AdministrativeRecord::BundleStatusReport(report).to_cbor())
        .build();

        debug!(
            "Reporting bundle {} as {kind:?} to {}",
            bundle.id(),
            bundle.primary.report_to
        );

        // Fully recursive into the pipeline
        if let Err(e) = Box::pin(self.transmit(report_bundle)).await {
            warn!("Failed to transmit status report: {e}");
        }
    }

    async fn set_constraints(&self, core: &DtnCore, id: &str, constraints: Constraints) -> Result<()> {
        if let Some(mut pack) = core.store.get_metadata(id).await {
            pack.constraints = constraints;
            core.store.update_metadata(&pack).await?;
        }
        Ok(())
    }

    async fn add_constraint(&self, core: &DtnCore, id: &str, constraint: Constraints) -> Result<()> {
        if let Some(mut pack) = core.store.get_metadata(id).await {
            pack.constraints.insert(constraint);
            core.store.update_metadata(&pack).await?;
        }
        Ok(())
    }

    async fn remove_constraint(&self, core: &DtnCore, id: &str, constraint: Constraints) -> Result<()> {
        if let Some(mut pack) = core.store.get_metadata(id).await {
            pack.constraints.remove(constraint);
            core.store.update_metadata(&pack).await?;
        }
        Ok(())
    }
}
