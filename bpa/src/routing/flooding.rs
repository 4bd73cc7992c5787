use super::*;

/// Returns every reachable peer on every call. No history, no suppression;
/// a noise/robustness baseline.
#[derive(Default)]
pub struct FloodingRouting;

impl FloodingRouting {
    pub fn new() -> Self {
        Self
    }
}

impl RoutingAgent for FloodingRouting {
    fn name(&self) -> &'static str {
        "flooding"
    }

    fn next_hops(&self, _bundle: &Bundle, ctx: &RoutingContext) -> Vec<Peer> {
        reachable(&ctx.peers).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_util::*;
    use super::*;

    #[test]
    fn always_returns_everyone() {
        let router = FloodingRouting::new();
        let b = bundle("dtn://n1/app", "dtn://far/app");
        let c = ctx(vec![peer("n2"), peer("n3")]);
        assert_eq!(router.next_hops(&b, &c).len(), 2);
        assert_eq!(router.next_hops(&b, &c).len(), 2);
    }

    #[test]
    fn skips_peers_without_clas() {
        let router = FloodingRouting::new();
        let b = bundle("dtn://n1/app", "dtn://far/app");
        let mut unreachable = peer("n2");
        unreachable.cla_list.clear();
        assert!(router.next_hops(&b, &ctx(vec![unreachable])).is_empty());
    }
}
