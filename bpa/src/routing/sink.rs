use super::*;

/// Never forwards anything; useful as a terminal test endpoint.
#[derive(Default)]
pub struct SinkRouting;

impl SinkRouting {
    pub fn new() -> Self {
        Self
    }
}

impl RoutingAgent for SinkRouting {
    fn name(&self) -> &'static str {
        "sink"
    }

    fn next_hops(&self, _bundle: &Bundle, _ctx: &RoutingContext) -> Vec<Peer> {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_util::*;
    use super::*;

    #[test]
    fn drops_everything() {
        let router = SinkRouting::new();
        let b = bundle("dtn://n1/app", "dtn://far/app");
        assert!(router.next_hops(&b, &ctx(vec![peer("n2")])).is_empty());
    }

    #[test]
    fn local_delivery_still_happens() {
        let router = SinkRouting::new();
        let b = bundle("dtn://n1/app", "dtn://me/app");
        let mut c = ctx(vec![]);
        c.is_local = true;
        assert!(router.decide(&b, &c).is_local_delivery);
    }
}
