pub mod epidemic;
pub mod flooding;
pub mod sink;
pub mod spray_and_wait;
pub mod static_routing;

pub use epidemic::EpidemicRouting;
pub use flooding::FloodingRouting;
pub use sink::SinkRouting;
pub use spray_and_wait::SprayAndWaitRouting;
pub use static_routing::StaticRouting;

use crate::peer::Peer;
use mule_bpv7::bundle::Bundle;
use std::collections::HashMap;

/// What the core hands a router per decision: a peer snapshot plus the
/// locality facts only the core can establish.
///
/// Routers never hold a reference back into the core; everything a
/// decision needs rides in here.
pub struct RoutingContext {
    /// The bundle's destination is a registered local endpoint.
    pub is_local: bool,
    /// The bundle's source is one of our own endpoints.
    pub local_source: bool,
    pub peers: Vec<Peer>,
}

#[derive(Debug, Clone)]
pub struct RoutingDecision {
    pub bundle_id: String,
    pub next_hops: Vec<Peer>,
    pub is_local_delivery: bool,
}

/// Events the core pushes into the routing agent.
#[derive(Debug, Clone)]
pub enum RoutingNotification {
    PeerEncountered(Peer),
    /// Node name of a lost peer.
    PeerLost(String),
    /// A bundle arrived, possibly tagged with the node that sent it to us.
    IncomingBundle {
        bundle_id: String,
        from_node: Option<String>,
    },
    /// A send attempt to a peer failed after CLA retries.
    SendingFailed {
        bundle_id: String,
        node_name: String,
    },
    /// Re-read external route configuration.
    Reload,
}

/// Next-hop selection.
pub trait RoutingAgent: Send + Sync {
    fn name(&self) -> &'static str;

    /// Peers to forward to; only called for non-local destinations.
    fn next_hops(&self, bundle: &Bundle, ctx: &RoutingContext) -> Vec<Peer>;

    fn handle_notification(&self, _notification: RoutingNotification) {}

    /// Introspection for the management API.
    fn state(&self) -> HashMap<String, String> {
        HashMap::new()
    }

    /// The full decision: local delivery short-circuits every algorithm.
    fn decide(&self, bundle: &Bundle, ctx: &RoutingContext) -> RoutingDecision {
        let bundle_id = bundle.id().to_string();
        if ctx.is_local {
            return RoutingDecision {
                bundle_id,
                next_hops: Vec::new(),
                is_local_delivery: true,
            };
        }
        RoutingDecision {
            bundle_id,
            next_hops: self.next_hops(bundle, ctx),
            is_local_delivery: false,
        }
    }
}

/// Peers that are actually reachable: at least one CLA advertised.
pub(crate) fn reachable<'a>(peers: &'a [Peer]) -> impl Iterator<Item = &'a Peer> {
    peers.iter().filter(|p| !p.cla_list.is_empty())
}

/// The peer hosting the bundle's destination node, if we see it directly.
pub(crate) fn direct_peer<'a>(peers: &'a [Peer], bundle: &Bundle) -> Option<&'a Peer> {
    let dest_node = bundle.primary.destination.node_name()?;
    reachable(peers).find(|p| p.node_name() == dest_node)
}

#[cfg(test)]
pub(crate) mod test_util {
    use super::*;
    use crate::peer::PeerKind;
    use mule_bpv7::builder::Builder;

    pub fn peer(node: &str) -> Peer {
        let mut p = Peer::new(
            format!("dtn://{node}").parse().unwrap(),
            "127.0.0.1",
            PeerKind::Dynamic,
        );
        p.cla_list.push(("tcp".into(), Some(4556)));
        p
    }

    pub fn bundle(src: &str, dst: &str) -> Bundle {
        Builder::new(src.parse().unwrap(), dst.parse().unwrap())
            .payload(b"test".to_vec())
            .build()
    }

    pub fn ctx(peers: Vec<Peer>) -> RoutingContext {
        RoutingContext {
            is_local: false,
            local_source: true,
            peers,
        }
    }
}
