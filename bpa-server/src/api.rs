//! The management HTTP API, plus the HTTP CLA ingress endpoints
//! (`/push`, `/status/bundles`, `/download`) so a neighbour's push or pull
//! CLA can reach this node without a separate listener.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Html;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use base64::prelude::*;
use mule_bpa::core::DtnCore;
use mule_bpa::stats::Statistics;
use mule_bpv7::builder::Builder;
use mule_bpv7::bundle::Bundle;
use mule_bpv7::eid::Eid;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

pub async fn serve(
    core: Arc<DtnCore>,
    port: u16,
    cancel_token: CancellationToken,
) -> anyhow::Result<()> {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/", get(handle_landing))
        .route("/test", get(handle_test))
        .route("/status", get(handle_status))
        .route("/stats", get(handle_stats))
        .route("/bundles", get(handle_bundles))
        .route("/bundles/{id}", delete(handle_delete_bundle))
        .route("/peers", get(handle_peers))
        .route("/register", get(handle_register))
        .route("/unregister", get(handle_unregister))
        .route("/send", post(handle_send))
        .route("/endpoint", get(handle_endpoint))
        .route("/push", post(handle_push))
        .route("/status/bundles", get(handle_status_bundles))
        .route("/download", get(handle_download))
        .layer(cors)
        .with_state(core);

    let listener = tokio::net::TcpListener::bind(("127.0.0.1", port)).await?;
    info!("Management API listening on 127.0.0.1:{port}");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel_token.cancelled().await })
        .await?;
    Ok(())
}

// Legacy contract: errors are plain text lines with HTTP 200
fn error_text(msg: impl std::fmt::Display) -> String {
    format!("Error: {msg}")
}

async fn handle_landing() -> Html<&'static str> {
    Html(
        r#"<html><head><title>mule</title></head><body>
<h1>mule bundle agent</h1>
<ul>
<li><a href="/status">status</a></li>
<li><a href="/stats">stats</a></li>
<li><a href="/bundles">bundles</a></li>
<li><a href="/peers">peers</a></li>
</ul>
</body></html>"#,
    )
}

async fn handle_test() -> &'static str {
    "Test route working"
}

#[derive(Serialize)]
struct StatusSummary {
    incoming: u64,
    outgoing: u64,
    delivered: u64,
    stored: u64,
}

#[derive(Serialize)]
struct StatusResponse {
    #[serde(rename = "nodeId")]
    node_id: String,
    uptime: u64,
    version: &'static str,
    statistics: StatusSummary,
}

async fn handle_status(State(core): State<Arc<DtnCore>>) -> Json<StatusResponse> {
    let snapshot = core.stats.snapshot(core.store.count().await);
    Json(StatusResponse {
        node_id: core.node_id.to_string(),
        uptime: core.uptime().as_secs(),
        version: env!("CARGO_PKG_VERSION"),
        statistics: StatusSummary {
            incoming: snapshot.incoming,
            outgoing: snapshot.outgoing,
            delivered: snapshot.delivered,
            stored: snapshot.stored,
        },
    })
}

async fn handle_stats(
    State(core): State<Arc<DtnCore>>,
) -> Json<mule_bpa::stats::StatisticsSnapshot> {
    Json(core.stats.snapshot(core.store.count().await))
}

#[derive(Serialize)]
struct BundlesResponse {
    count: u64,
    bundles: Vec<String>,
}

async fn handle_bundles(State(core): State<Arc<DtnCore>>) -> Json<BundlesResponse> {
    let bundles = core.store.all_ids().await;
    Json(BundlesResponse {
        count: bundles.len() as u64,
        bundles,
    })
}

async fn handle_delete_bundle(
    State(core): State<Arc<DtnCore>>,
    Path(id): Path<String>,
) -> (StatusCode, String) {
    match core.store.remove(&id).await {
        Ok(()) => (StatusCode::OK, format!("Removed bundle {id}")),
        Err(e) => (StatusCode::NOT_FOUND, error_text(e)),
    }
}

#[derive(Serialize)]
struct PeerInfo {
    eid: String,
    #[serde(rename = "type")]
    peer_type: String,
    #[serde(rename = "lastContact")]
    last_contact: u64,
    services: std::collections::HashMap<u8, String>,
}

#[derive(Serialize)]
struct PeersResponse {
    count: u64,
    peers: Vec<PeerInfo>,
}

async fn handle_peers(State(core): State<Arc<DtnCore>>) -> Json<PeersResponse> {
    let peers = core
        .peers
        .get_all()
        .into_iter()
        .map(|p| PeerInfo {
            eid: p.eid.to_string(),
            peer_type: p.kind.to_string(),
            last_contact: p.last_contact.elapsed().as_secs(),
            services: p.services.clone(),
        })
        .collect::<Vec<_>>();
    Json(PeersResponse {
        count: peers.len() as u64,
        peers,
    })
}

#[derive(Deserialize)]
struct EndpointQuery {
    endpoint: String,
}

async fn handle_register(
    State(core): State<Arc<DtnCore>>,
    Query(query): Query<EndpointQuery>,
) -> String {
    let eid: Eid = match query.endpoint.parse() {
        Ok(eid) => eid,
        Err(e) => return error_text(e),
    };
    match core.register_endpoint(eid) {
        Ok(()) => format!("Registered {}", query.endpoint),
        Err(e) => error_text(e),
    }
}

async fn handle_unregister(
    State(core): State<Arc<DtnCore>>,
    Query(query): Query<EndpointQuery>,
) -> String {
    let eid: Eid = match query.endpoint.parse() {
        Ok(eid) => eid,
        Err(e) => return error_text(e),
    };
    match core.unregister_endpoint(&eid) {
        Ok(()) => format!("Unregistered {}", query.endpoint),
        Err(e) => error_text(e),
    }
}

#[derive(Deserialize)]
struct SendQuery {
    dst: String,
    src: String,
    /// Lifetime in milliseconds, the legacy UI unit.
    lifetime: Option<u64>,
}

async fn handle_send(
    State(core): State<Arc<DtnCore>>,
    Query(query): Query<SendQuery>,
    body: axum::body::Bytes,
) -> String {
    let dst: Eid = match query.dst.parse() {
        Ok(eid) => eid,
        Err(e) => return error_text(e),
    };
    let src: Eid = match query.src.parse() {
        Ok(eid) => eid,
        Err(e) => return error_text(e),
    };

    let lifetime_secs = query.lifetime.map(|ms| ms / 1000).unwrap_or(3600).max(1);
    let bundle = Builder::new(src, dst)
        .lifetime(lifetime_secs)
        .payload(body.to_vec())
        .build();
    let id = bundle.id().to_string();

    match core.submit_bundle(bundle).await {
        Ok(()) => format!("Sent payload with {} bytes. Bundle id: {id}", body.len()),
        Err(e) => error_text(e),
    }
}

async fn handle_endpoint(
    State(core): State<Arc<DtnCore>>,
    Query(query): Query<EndpointQuery>,
) -> String {
    let eid: Eid = match query.endpoint.parse() {
        Ok(eid) => eid,
        Err(e) => return error_text(e),
    };
    match core.app_agent.poll(&eid) {
        Some(bundle) => BASE64_STANDARD.encode(bundle.to_cbor()),
        None => "Nothing to receive".to_string(),
    }
}

async fn handle_push(State(core): State<Arc<DtnCore>>, body: axum::body::Bytes) -> String {
    let bundle = match Bundle::from_cbor(&body) {
        Ok(bundle) => bundle,
        Err(e) => {
            Statistics::bump(&core.stats.broken);
            return error_text(e);
        }
    };
    match core.processor.receive(bundle, None).await {
        Ok(()) => format!("Received {} bytes", body.len()),
        Err(e) => error_text(e),
    }
}

#[derive(Serialize)]
struct BundleListing {
    bundles: Vec<String>,
}

async fn handle_status_bundles(State(core): State<Arc<DtnCore>>) -> Json<BundleListing> {
    Json(BundleListing {
        bundles: core.store.all_ids().await,
    })
}

#[derive(Deserialize)]
struct DownloadQuery {
    bundle: String,
}

async fn handle_download(
    State(core): State<Arc<DtnCore>>,
    Query(query): Query<DownloadQuery>,
) -> (StatusCode, Vec<u8>) {
    match core.store.get_bundle(&query.bundle).await {
        Some(bundle) => (StatusCode::OK, bundle.to_cbor()),
        None => (
            StatusCode::NOT_FOUND,
            error_text("no such bundle").into_bytes(),
        ),
    }
}
