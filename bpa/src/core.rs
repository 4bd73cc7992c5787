use crate::app_agent::{AppAgentError, ApplicationAgent};
use crate::cla::{self, ClaRegistry, ConvergenceLayer};
use crate::config::Config;
use crate::janitor;
use crate::peer::{Peer, PeerEvent, PeerManager};
use crate::processor::{BundleProcessor, ProcessingError};
use crate::routing::{RoutingAgent, RoutingContext, RoutingDecision, RoutingNotification};
use crate::service::ServiceRegistry;
use crate::stats::Statistics;
use crate::store::BundleStore;
use mule_bpv7::{bundle::Bundle, eid::Eid};
use std::sync::{Arc, RwLock};
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

/// The orchestrator: owns every subsystem, holds node identity and the
/// statistics counters.
///
/// Ownership runs one way: the core owns processor, router, store, peer
/// manager and CLAs. The processor's back-pointer is a weak handle; routers
/// and the janitor only ever see per-call context.
pub struct DtnCore {
    pub node_id: Eid,
    pub config: Config,
    pub store: Arc<dyn BundleStore>,
    pub processor: Arc<BundleProcessor>,
    pub cla_registry: Arc<ClaRegistry>,
    pub peers: Arc<PeerManager>,
    pub services: Arc<ServiceRegistry>,
    pub app_agent: Arc<ApplicationAgent>,
    pub routing: Arc<dyn RoutingAgent>,
    pub stats: Statistics,
    local_endpoints: RwLock<Vec<Eid>>,
    started_at: Instant,
    cancel_token: CancellationToken,
    task_tracker: TaskTracker,
}

impl DtnCore {
    pub fn new(
        config: Config,
        store: Arc<dyn BundleStore>,
        routing: Arc<dyn RoutingAgent>,
    ) -> Arc<Self> {
        let node_id = config.node_id.clone();
        let core = Arc::new(Self {
            peers: Arc::new(PeerManager::new(config.peer_timeout)),
            store,
            processor: Arc::new(BundleProcessor::new()),
            cla_registry: Arc::new(ClaRegistry::new()),
            services: Arc::new(ServiceRegistry::new()),
            app_agent: Arc::new(ApplicationAgent::new()),
            routing,
            stats: Statistics::default(),
            local_endpoints: RwLock::new(vec![node_id.clone()]),
            node_id,
            config,
            started_at: Instant::now(),
            cancel_token: CancellationToken::new(),
            task_tracker: TaskTracker::new(),
        });
        core.processor.set_core(&core);
        core
    }

    /// Starts the background machinery: peer sweep, peer-event pump and
    /// the janitor.
    pub fn start(self: &Arc<Self>) {
        info!("Node {} starting", self.node_id);
        self.peers.start();

        if let Some(mut events) = self.peers.take_events() {
            let core = self.clone();
            self.task_tracker.spawn(async move {
                loop {
                    let event = tokio::select! {
                        e = events.recv() => match e {
                            Some(e) => e,
                            None => break,
                        },
                        _ = core.cancel_token.cancelled() => break,
                    };
                    match event {
                        PeerEvent::Discovered(peer) | PeerEvent::Updated(peer) => {
                            core.routing
                                .handle_notification(RoutingNotification::PeerEncountered(peer));
                        }
                        PeerEvent::Lost(peer) => {
                            core.routing
                                .handle_notification(RoutingNotification::PeerLost(
                                    peer.node_name(),
                                ));
                        }
                        PeerEvent::ConnectionEstablished(eid)
                        | PeerEvent::ConnectionLost(eid) => {
                            debug!("Connection state change for {eid}");
                        }
                    }
                }
            });
        }

        janitor::spawn(
            self.clone(),
            self.cancel_token.clone(),
            &self.task_tracker,
        );
    }

    /// Stops CLAs first (no more sources), then the background tasks.
    pub async fn shutdown(&self) {
        info!("Node {} stopping", self.node_id);
        self.cla_registry.shutdown().await;
        self.cancel_token.cancel();
        self.task_tracker.close();
        self.task_tracker.wait().await;
        self.peers.shutdown().await;
        info!("Node {} stopped", self.node_id);
    }

    pub fn uptime(&self) -> std::time::Duration {
        self.started_at.elapsed()
    }

    /// A locally originated bundle enters the pipeline.
    pub async fn submit_bundle(&self, bundle: Bundle) -> Result<(), ProcessingError> {
        Statistics::bump(&self.stats.incoming);
        self.processor.transmit(bundle).await
    }

    pub fn get_routing_decision(&self, bundle: &Bundle) -> RoutingDecision {
        let ctx = RoutingContext {
            is_local: self.is_local_endpoint(&bundle.primary.destination),
            local_source: self.is_local_endpoint(&bundle.primary.source),
            peers: self.peers.get_all(),
        };
        self.routing.decide(bundle, &ctx)
    }

    /// Raw send used by the janitor's re-forward pass: iterate peers, pick
    /// a CLA each, track peer health and stats.
    pub async fn send_bundle(&self, bundle: &Bundle, peers: &[Peer]) {
        let id = bundle.id().to_string();
        for peer in peers {
            let mut sent = false;
            for cla in self.cla_registry.find_clas_for_peer(peer) {
                match cla.send_bundle(bundle, peer).await {
                    Ok(()) => {
                        self.peers.record_success(&peer.eid);
                        Statistics::bump(&self.stats.outgoing);
                        sent = true;
                        break;
                    }
                    Err(e) => {
                        warn!("CLA {} failed to send {id} to {}: {e}", cla.id(), peer.eid);
                    }
                }
            }
            if !sent {
                self.peers.record_failure(&peer.eid);
                self.routing
                    .handle_notification(RoutingNotification::SendingFailed {
                        bundle_id: id.clone(),
                        node_name: peer.node_name(),
                    });
            }
        }
    }

    pub fn register_endpoint(&self, eid: Eid) -> Result<(), AppAgentError> {
        self.app_agent.register(eid.clone())?;
        let mut endpoints = self.local_endpoints.write().expect("core lock poisoned");
        if !endpoints.contains(&eid) {
            endpoints.push(eid);
        }
        Ok(())
    }

    pub fn unregister_endpoint(&self, eid: &Eid) -> Result<(), AppAgentError> {
        self.app_agent.unregister(eid)?;
        self.local_endpoints
            .write()
            .expect("core lock poisoned")
            .retain(|e| e != eid);
        Ok(())
    }

    /// Exact or pattern match against the local endpoint set.
    pub fn is_local_endpoint(&self, eid: &Eid) -> bool {
        self.local_endpoints
            .read()
            .expect("core lock poisoned")
            .iter()
            .any(|local| eid == local || eid.matches_pattern(local))
    }

    pub fn local_endpoints(&self) -> Vec<Eid> {
        self.local_endpoints
            .read()
            .expect("core lock poisoned")
            .clone()
    }

    /// Starts a CLA and funnels its incoming stream into the processor.
    pub async fn register_cla(
        self: &Arc<Self>,
        cla: Arc<dyn ConvergenceLayer>,
    ) -> cla::Result<()> {
        cla.start().await?;
        let incoming = cla.take_incoming();
        if let Err(e) = self.cla_registry.register(cla) {
            return Err(cla::ClaError::InvalidMessage(e.to_string()));
        }

        if let Some(mut incoming) = incoming {
            let core = self.clone();
            self.task_tracker.spawn(async move {
                loop {
                    let received = tokio::select! {
                        r = incoming.recv() => match r {
                            Some(r) => r,
                            None => break,
                        },
                        _ = core.cancel_token.cancelled() => break,
                    };

                    if core.config.parallel_bundle_processing {
                        let core = core.clone();
                        tokio::spawn(async move {
                            core.receive_from_cla(received).await;
                        });
                    } else {
                        core.receive_from_cla(received).await;
                    }
                }
            });
        }
        Ok(())
    }

    async fn receive_from_cla(&self, received: cla::IncomingBundle) {
        let connection = received.connection.clone();
        if let Err(e) = self
            .processor
            .receive(received.bundle, Some(received.connection))
            .await
        {
            match e {
                ProcessingError::DuplicateBundle(_) => {}
                ProcessingError::InvalidAdministrativeRecord(_) => {
                    Statistics::bump(&self.stats.broken);
                    error!("Broken bundle from {}: {e}", connection.remote_address);
                }
                e => warn!("Failed to process bundle from {}: {e}", connection.remote_address),
            }
        }
    }
}
