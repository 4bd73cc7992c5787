mod api;
mod settings;

use mule_bpa::cla::http::HttpConvergenceLayer;
use mule_bpa::cla::http_pull::HttpPullConvergenceLayer;
use mule_bpa::cla::udp::UdpConvergenceLayer;
use mule_bpa::config::{ClaConfig, Config, StoreBackend};
use mule_bpa::core::DtnCore;
use mule_bpa::peer::{Peer, PeerKind};
use mule_bpa::routing::{
    EpidemicRouting, FloodingRouting, RoutingAgent, SinkRouting, SprayAndWaitRouting,
    StaticRouting,
};
use mule_bpa::service::Service;
use mule_bpa::store::{BundleStore, InMemoryStore};
use mule_tcpclv4::TcpClConvergenceLayer;
use std::sync::Arc;
use tracing::{error, info, warn};

fn make_routing(config: &Config) -> Arc<dyn RoutingAgent> {
    let settings = |alg: &str, key: &str| {
        config
            .routing_settings
            .get(alg)
            .and_then(|s| s.get(key))
            .cloned()
    };

    match config.routing.as_str() {
        "epidemic" => Arc::new(EpidemicRouting::new()),
        "flooding" => Arc::new(FloodingRouting::new()),
        "sink" => Arc::new(SinkRouting::new()),
        "sprayandwait" => {
            let copies = settings("sprayandwait", "num_copies")
                .and_then(|v| v.parse().ok())
                .unwrap_or(mule_bpa::routing::spray_and_wait::DEFAULT_COPIES);
            Arc::new(SprayAndWaitRouting::new(copies))
        }
        "static" => match settings("static", "routes") {
            Some(path) => Arc::new(StaticRouting::from_file(path.into())),
            None => {
                warn!("Static routing configured without a routes file");
                Arc::new(StaticRouting::new(Vec::new()))
            }
        },
        other => panic!("Unknown routing algorithm '{other}'"),
    }
}

async fn register_clas(core: &Arc<DtnCore>) {
    for cla in &core.config.clas {
        let result = match cla {
            ClaConfig::Tcp {
                bind,
                port,
                keepalive_secs,
            } => {
                core.register_cla(Arc::new(TcpClConvergenceLayer::new(
                    bind.clone(),
                    *port,
                    *keepalive_secs,
                    core.node_id.clone(),
                    core.peers.clone(),
                )))
                .await
            }
            ClaConfig::Udp {
                bind,
                port,
                max_bundle_size,
            } => {
                core.register_cla(Arc::new(UdpConvergenceLayer::new(
                    bind.clone(),
                    *port,
                    *max_bundle_size,
                )))
                .await
            }
            ClaConfig::Http { max_retries } => {
                core.register_cla(Arc::new(HttpConvergenceLayer::new(*max_retries)))
                    .await
            }
            ClaConfig::HttpPull { poll_interval } => {
                core.register_cla(Arc::new(HttpPullConvergenceLayer::new(
                    core.peers.clone(),
                    *poll_interval,
                )))
                .await
            }
        };
        // A CLA that cannot bind is lost, but the daemon carries on
        if let Err(e) = result {
            error!("Failed to start CLA {cla:?}: {e}");
        }
    }
}

fn register_locals(core: &Arc<DtnCore>) {
    for endpoint in &core.config.endpoints {
        let eid = if endpoint.contains(':') {
            endpoint.clone()
        } else {
            // Bare names hang off the node id
            format!("{}/{}", core.node_id, endpoint)
        };
        match eid.parse() {
            Ok(eid) => {
                if let Err(e) = core.register_endpoint(eid) {
                    warn!("Failed to register endpoint '{endpoint}': {e}");
                }
            }
            Err(e) => warn!("Invalid endpoint '{endpoint}' in configuration: {e}"),
        }
    }

    for (tag, name) in &core.config.services {
        match format!("{}/{}", core.node_id, name).parse() {
            Ok(endpoint) => core.services.register(Service {
                tag: *tag,
                endpoint,
                description: name.clone(),
            }),
            Err(e) => warn!("Invalid service '{name}' in configuration: {e}"),
        }
    }

    for peer in &core.config.statics {
        match peer.eid.parse() {
            Ok(eid) => {
                let mut p = Peer::new(eid, peer.address.clone(), PeerKind::Static);
                p.cla_list = peer.cla_list.clone();
                core.peers.add_or_update(p);
            }
            Err(e) => warn!("Invalid static peer '{}': {e}", peer.eid),
        }
    }
}

/// Re-dispatch bundles a previous run left in flight.
async fn recover(core: &Arc<DtnCore>, store: &Arc<mule_sqlite_storage::Storage>) {
    let pending = match store.pending_ids() {
        Ok(pending) => pending,
        Err(e) => {
            error!("Store recovery failed: {e}");
            return;
        }
    };
    if pending.is_empty() {
        return;
    }
    info!("Recovering {} in-flight bundles", pending.len());
    for id in pending {
        if let Some(bundle) = core.store.get_bundle(&id).await {
            if let Err(e) = core.processor.dispatch(&bundle, &id).await {
                warn!("Failed to re-dispatch {id}: {e}");
            }
        }
    }
}

#[tokio::main]
async fn main() {
    let Some(config) = settings::init() else {
        return;
    };

    let sqlite = match config.db {
        StoreBackend::Sqlite => Some(Arc::new(
            mule_sqlite_storage::Storage::open(&config.workdir)
                .expect("Failed to open the bundle store"),
        )),
        StoreBackend::Mem => None,
    };
    let store: Arc<dyn BundleStore> = match &sqlite {
        Some(sqlite) => sqlite.clone(),
        None => Arc::new(InMemoryStore::new()),
    };
    let routing = make_routing(&config);

    let web_port = config.web_port;
    let core = DtnCore::new(config, store, routing);

    register_locals(&core);
    register_clas(&core).await;
    if let Some(sqlite) = &sqlite {
        recover(&core, sqlite).await;
    }
    core.start();

    // Management API plus shutdown signals
    let cancel_token = tokio_util::sync::CancellationToken::new();
    let mut task_set = tokio::task::JoinSet::new();

    {
        let core = core.clone();
        let cancel_token = cancel_token.clone();
        task_set.spawn(async move {
            if let Err(e) = api::serve(core, web_port, cancel_token.clone()).await {
                error!("Management API failed: {e}");
                cancel_token.cancel();
            }
        });
    }

    {
        let core = core.clone();
        let cancel_token = cancel_token.clone();
        task_set.spawn(async move {
            tokio::select! {
                _ = shutdown_signal() => {
                    info!("Received shutdown signal, stopping...");
                    cancel_token.cancel();
                }
                _ = cancel_token.cancelled() => {}
            }
            core.shutdown().await;
        });
    }

    info!("Started successfully");
    while let Some(r) = task_set.join_next().await {
        if let Err(e) = r {
            error!("Task terminated unexpectedly: {e}");
        }
    }
    info!("Stopped");
}

async fn shutdown_signal() {
    let terminate = async {
        #[cfg(unix)]
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to register signal handler")
            .recv()
            .await;
        #[cfg(not(unix))]
        std::future::pending::<()>().await;
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = terminate => {}
    }
}
