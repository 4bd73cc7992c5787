mod parse;

use super::*;
use mule_bpv7::eid::Eid;
use std::path::PathBuf;
use std::sync::RwLock;
use tracing::{debug, error, info};

/// One rule from the route table.
#[derive(Debug, Clone)]
pub struct StaticRoute {
    pub index: u32,
    pub source_pattern: String,
    pub destination_pattern: String,
    pub via: Eid,
}

struct CompiledRoute {
    route: StaticRoute,
    source: regex::Regex,
    destination: regex::Regex,
}

/// Glob with `*` and `?`, anchored at both ends.
fn glob_to_regex(pattern: &str) -> Result<regex::Regex, regex::Error> {
    let mut re = String::with_capacity(pattern.len() + 8);
    re.push('^');
    for c in pattern.chars() {
        match c {
            '*' => re.push_str(".*"),
            '?' => re.push('.'),
            c => re.push_str(&regex::escape(&c.to_string())),
        }
    }
    re.push('$');
    regex::Regex::new(&re)
}

fn compile(mut routes: Vec<StaticRoute>) -> Vec<CompiledRoute> {
    routes.sort_by_key(|r| r.index);
    routes
        .into_iter()
        .filter_map(|route| {
            let source = glob_to_regex(&route.source_pattern)
                .inspect_err(|e| error!("Bad source pattern in route #{}: {e}", route.index))
                .ok()?;
            let destination = glob_to_regex(&route.destination_pattern)
                .inspect_err(|e| error!("Bad destination pattern in route #{}: {e}", route.index))
                .ok()?;
            Some(CompiledRoute {
                route,
                source,
                destination,
            })
        })
        .collect()
}

/// First-match routing over an ordered rule table. No fallback: a bundle
/// matching no rule, or whose via-peer is absent, gets no next hops.
pub struct StaticRouting {
    routes: RwLock<Vec<CompiledRoute>>,
    routes_file: Option<PathBuf>,
}

impl StaticRouting {
    pub fn new(routes: Vec<StaticRoute>) -> Self {
        Self {
            routes: RwLock::new(compile(routes)),
            routes_file: None,
        }
    }

    pub fn from_file(path: PathBuf) -> Self {
        let router = Self {
            routes: RwLock::new(Vec::new()),
            routes_file: Some(path),
        };
        router.reload();
        router
    }

    fn reload(&self) {
        let Some(path) = &self.routes_file else {
            return;
        };
        match std::fs::read(path) {
            Ok(data) => match parse::parse_routes(&data) {
                Ok(routes) => {
                    info!("Loaded {} static routes from {}", routes.len(), path.display());
                    *self.routes.write().expect("routes lock poisoned") = compile(routes);
                }
                Err(e) => error!("Failed to parse routes file {}: {e}", path.display()),
            },
            Err(e) => error!("Failed to read routes file {}: {e}", path.display()),
        }
    }
}

impl RoutingAgent for StaticRouting {
    fn name(&self) -> &'static str {
        "static"
    }

    fn next_hops(&self, bundle: &Bundle, ctx: &RoutingContext) -> Vec<Peer> {
        let source = bundle.primary.source.to_string();
        let destination = bundle.primary.destination.to_string();

        let routes = self.routes.read().expect("routes lock poisoned");
        let Some(matched) = routes
            .iter()
            .find(|r| r.source.is_match(&source) && r.destination.is_match(&destination))
        else {
            return Vec::new();
        };

        let via_node = matched.route.via.node_name().unwrap_or_default();
        match reachable(&ctx.peers).find(|p| p.node_name() == via_node) {
            Some(peer) => {
                debug!(
                    "Route #{} forwards {destination} via {}",
                    matched.route.index, matched.route.via
                );
                vec![peer.clone()]
            }
            None => Vec::new(),
        }
    }

    fn handle_notification(&self, notification: RoutingNotification) {
        if matches!(notification, RoutingNotification::Reload) {
            self.reload();
        }
    }

    fn state(&self) -> HashMap<String, String> {
        let routes = self.routes.read().expect("routes lock poisoned");
        routes
            .iter()
            .map(|r| {
                (
                    format!("#{}", r.route.index),
                    format!(
                        "{} {} via {}",
                        r.route.source_pattern, r.route.destination_pattern, r.route.via
                    ),
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_util::*;
    use super::*;

    fn route(index: u32, src: &str, dst: &str, via: &str) -> StaticRoute {
        StaticRoute {
            index,
            source_pattern: src.into(),
            destination_pattern: dst.into(),
            via: via.parse().unwrap(),
        }
    }

    #[test]
    fn first_matching_rule_wins() {
        let router = StaticRouting::new(vec![
            route(20, "*", "*", "dtn://n5"),
            route(10, "*", "dtn://node3/*", "dtn://n2"),
        ]);
        let b = bundle("dtn://node2/app", "dtn://node3/app");
        let c = ctx(vec![peer("n2"), peer("n5")]);

        let hops = router.next_hops(&b, &c);
        assert_eq!(hops.len(), 1);
        assert_eq!(hops[0].node_name(), "n2");
    }

    #[test]
    fn deterministic_across_calls() {
        let router = StaticRouting::new(vec![route(10, "*", "dtn://node3/*", "dtn://n2")]);
        let b = bundle("dtn://node2/app", "dtn://node3/app");
        let c = ctx(vec![peer("n2"), peer("n3"), peer("n4")]);

        for _ in 0..5 {
            let hops = router.next_hops(&b, &c);
            assert_eq!(hops.len(), 1);
            assert_eq!(hops[0].node_name(), "n2");
        }
    }

    #[test]
    fn no_match_no_fallback() {
        let router = StaticRouting::new(vec![route(10, "*", "dtn://node3/*", "dtn://n2")]);
        let b = bundle("dtn://node2/app", "dtn://elsewhere/app");
        assert!(router.next_hops(&b, &ctx(vec![peer("n2")])).is_empty());
    }

    #[test]
    fn absent_via_peer_yields_nothing() {
        let router = StaticRouting::new(vec![route(10, "*", "*", "dtn://gone")]);
        let b = bundle("dtn://node2/app", "dtn://node3/app");
        assert!(router.next_hops(&b, &ctx(vec![peer("n2")])).is_empty());
    }

    #[test]
    fn question_mark_glob() {
        let router = StaticRouting::new(vec![route(10, "*", "dtn://node?/app", "dtn://n2")]);
        let c = ctx(vec![peer("n2")]);
        assert_eq!(
            router
                .next_hops(&bundle("dtn://x/app", "dtn://node3/app"), &c)
                .len(),
            1
        );
        assert!(router
            .next_hops(&bundle("dtn://x/app", "dtn://node33/app"), &c)
            .is_empty());
    }
}
