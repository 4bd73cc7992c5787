use mule_bpv7::{bundle::Bundle, eid::Eid};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use thiserror::Error;
use tracing::{debug, info, trace, warn};

/// Bundles parked for a not-yet-registered endpoint are capped per endpoint;
/// the oldest is dropped on overflow.
const MAX_PENDING: usize = 100;

#[derive(Error, Debug)]
pub enum AppAgentError {
    #[error("Endpoint {0} is already registered")]
    AlreadyRegistered(Eid),

    #[error("Endpoint {0} is not registered")]
    NotRegistered(Eid),

    #[error("Invalid endpoint pattern {0}")]
    InvalidPattern(Eid),
}

/// Where a delivered bundle goes: a pull queue or a push delegate.
enum EndpointSink {
    Queue(VecDeque<Bundle>),
    Delegate(Box<dyn Fn(Bundle) + Send + Sync>),
}

struct Registration {
    eid: Eid,
    sink: EndpointSink,
}

/// The local delivery endpoint registry.
///
/// Registration order is preserved: when no exact match exists, the first
/// registered endpoint whose pattern matches the destination wins.
#[derive(Default)]
pub struct ApplicationAgent {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    registrations: Vec<Registration>,
    pending: HashMap<String, VecDeque<Bundle>>,
}

impl ApplicationAgent {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a pull endpoint. Bundles parked for it are drained into
    /// the fresh queue in FIFO order.
    pub fn register(&self, eid: Eid) -> Result<(), AppAgentError> {
        self.register_sink(eid, None)
    }

    /// Registers a push endpoint; the delegate is invoked per delivery.
    pub fn register_with_delegate(
        &self,
        eid: Eid,
        delegate: Box<dyn Fn(Bundle) + Send + Sync>,
    ) -> Result<(), AppAgentError> {
        self.register_sink(eid, Some(delegate))
    }

    fn register_sink(
        &self,
        eid: Eid,
        delegate: Option<Box<dyn Fn(Bundle) + Send + Sync>>,
    ) -> Result<(), AppAgentError> {
        if !eid.is_valid_pattern() {
            return Err(AppAgentError::InvalidPattern(eid));
        }
        let mut inner = self.inner.lock().expect("app agent lock poisoned");
        if inner.registrations.iter().any(|r| r.eid == eid) {
            return Err(AppAgentError::AlreadyRegistered(eid));
        }

        let parked = inner.pending.remove(&eid.to_string()).unwrap_or_default();
        if !parked.is_empty() {
            debug!("Draining {} parked bundles into {eid}", parked.len());
        }
        let sink = match delegate {
            Some(delegate) => {
                for bundle in parked {
                    delegate(bundle);
                }
                EndpointSink::Delegate(delegate)
            }
            None => EndpointSink::Queue(parked),
        };

        info!("Registered application endpoint {eid}");
        inner.registrations.push(Registration { eid, sink });
        Ok(())
    }

    pub fn unregister(&self, eid: &Eid) -> Result<(), AppAgentError> {
        let mut inner = self.inner.lock().expect("app agent lock poisoned");
        let before = inner.registrations.len();
        inner.registrations.retain(|r| r.eid != *eid);
        if inner.registrations.len() == before {
            return Err(AppAgentError::NotRegistered(eid.clone()));
        }
        info!("Unregistered application endpoint {eid}");
        Ok(())
    }

    /// Delivers to an endpoint, or parks the bundle for one.
    ///
    /// Returns `true` iff the bundle reached a registered endpoint (not
    /// merely parked).
    pub fn deliver_bundle(&self, bundle: Bundle) -> bool {
        let destination = bundle.primary.destination.clone();
        let mut inner = self.inner.lock().expect("app agent lock poisoned");

        // Pattern pass is separate so an exact registration always beats an
        // earlier wildcard one
        let slot = inner
            .registrations
            .iter()
            .position(|r| r.eid == destination)
            .or_else(|| {
                inner
                    .registrations
                    .iter()
                    .position(|r| destination.matches_pattern(&r.eid))
            });

        match slot.map(|i| &mut inner.registrations[i].sink) {
            Some(EndpointSink::Queue(queue)) => {
                trace!("Delivered bundle to local endpoint {destination}");
                queue.push_back(bundle);
                true
            }
            Some(EndpointSink::Delegate(delegate)) => {
                trace!("Delivered bundle to delegate endpoint {destination}");
                delegate(bundle);
                true
            }
            None => {
                let parked = inner.pending.entry(destination.to_string()).or_default();
                if parked.len() >= MAX_PENDING {
                    warn!("Pending queue for {destination} full, dropping oldest");
                    parked.pop_front();
                }
                parked.push_back(bundle);
                false
            }
        }
    }

    /// Next queued bundle for an endpoint, registered or parked.
    pub fn poll(&self, eid: &Eid) -> Option<Bundle> {
        let mut inner = self.inner.lock().expect("app agent lock poisoned");
        if let Some(Registration {
            sink: EndpointSink::Queue(queue),
            ..
        }) = inner.registrations.iter_mut().find(|r| r.eid == *eid)
        {
            return queue.pop_front();
        }
        inner
            .pending
            .get_mut(&eid.to_string())
            .and_then(VecDeque::pop_front)
    }

    pub fn is_registered(&self, eid: &Eid) -> bool {
        self.inner
            .lock()
            .expect("app agent lock poisoned")
            .registrations
            .iter()
            .any(|r| r.eid == *eid)
    }

    pub fn registered_endpoints(&self) -> Vec<Eid> {
        self.inner
            .lock()
            .expect("app agent lock poisoned")
            .registrations
            .iter()
            .map(|r| r.eid.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mule_bpv7::builder::Builder;

    fn bundle_to(dst: &str) -> Bundle {
        Builder::new("dtn://src/app".parse().unwrap(), dst.parse().unwrap())
            .payload(b"data".to_vec())
            .build()
    }

    #[test]
    fn exact_delivery() {
        let agent = ApplicationAgent::new();
        agent.register("dtn://n1/echo".parse().unwrap()).unwrap();

        assert!(agent.deliver_bundle(bundle_to("dtn://n1/echo")));
        let polled = agent.poll(&"dtn://n1/echo".parse().unwrap()).unwrap();
        assert_eq!(polled.primary.destination.to_string(), "dtn://n1/echo");
    }

    #[test]
    fn pattern_delivery() {
        let agent = ApplicationAgent::new();
        agent.register("dtn://n1/*".parse().unwrap()).unwrap();
        assert!(agent.deliver_bundle(bundle_to("dtn://n1/anything")));
        assert!(agent.poll(&"dtn://n1/*".parse().unwrap()).is_some());
    }

    #[test]
    fn exact_beats_pattern() {
        let agent = ApplicationAgent::new();
        agent.register("dtn://n1/*".parse().unwrap()).unwrap();
        agent.register("dtn://n1/echo".parse().unwrap()).unwrap();

        agent.deliver_bundle(bundle_to("dtn://n1/echo"));
        assert!(agent.poll(&"dtn://n1/*".parse().unwrap()).is_none());
        assert!(agent.poll(&"dtn://n1/echo".parse().unwrap()).is_some());
    }

    #[test]
    fn parked_until_registration() {
        let agent = ApplicationAgent::new();
        assert!(!agent.deliver_bundle(bundle_to("dtn://n1/late")));
        assert!(!agent.deliver_bundle(bundle_to("dtn://n1/late")));

        agent.register("dtn://n1/late".parse().unwrap()).unwrap();
        let eid = "dtn://n1/late".parse().unwrap();
        assert!(agent.poll(&eid).is_some());
        assert!(agent.poll(&eid).is_some());
        assert!(agent.poll(&eid).is_none());
    }

    #[test]
    fn pending_overflow_drops_oldest() {
        let agent = ApplicationAgent::new();
        for i in 0..=MAX_PENDING {
            let mut b = bundle_to("dtn://n1/late");
            b.blocks[0].data = i.to_string().into_bytes();
            agent.deliver_bundle(b);
        }
        agent.register("dtn://n1/late".parse().unwrap()).unwrap();

        let eid = "dtn://n1/late".parse().unwrap();
        let first = agent.poll(&eid).unwrap();
        assert_eq!(first.payload().unwrap(), b"1");
    }

    #[test]
    fn delegate_invoked() {
        let agent = ApplicationAgent::new();
        let delivered = std::sync::Arc::new(Mutex::new(Vec::new()));
        let sink = delivered.clone();
        agent
            .register_with_delegate(
                "dtn://n1/push".parse().unwrap(),
                Box::new(move |b| sink.lock().unwrap().push(b)),
            )
            .unwrap();

        assert!(agent.deliver_bundle(bundle_to("dtn://n1/push")));
        assert_eq!(delivered.lock().unwrap().len(), 1);
    }

    #[test]
    fn duplicate_registration_rejected() {
        let agent = ApplicationAgent::new();
        let eid: Eid = "dtn://n1/echo".parse().unwrap();
        agent.register(eid.clone()).unwrap();
        assert!(matches!(
            agent.register(eid),
            Err(AppAgentError::AlreadyRegistered(_))
        ));
    }
}
