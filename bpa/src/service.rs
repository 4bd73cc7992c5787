use mule_bpv7::eid::Eid;
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::info;

/// A well-known service advertised by this node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Service {
    pub tag: u8,
    pub endpoint: Eid,
    pub description: String,
}

/// Service tag to endpoint lookup. A tag uniquely identifies a service
/// within the node; re-registering a tag overwrites it.
#[derive(Default)]
pub struct ServiceRegistry {
    services: RwLock<HashMap<u8, Service>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, service: Service) {
        info!(
            "Registered service {} ({}) at {}",
            service.tag, service.description, service.endpoint
        );
        self.services
            .write()
            .expect("service lock poisoned")
            .insert(service.tag, service);
    }

    pub fn lookup(&self, tag: u8) -> Option<Service> {
        self.services
            .read()
            .expect("service lock poisoned")
            .get(&tag)
            .cloned()
    }

    pub fn all(&self) -> Vec<Service> {
        let mut services = self
            .services
            .read()
            .expect("service lock poisoned")
            .values()
            .cloned()
            .collect::<Vec<_>>();
        services.sort_by_key(|s| s.tag);
        services
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_overwrites_tag() {
        let registry = ServiceRegistry::new();
        registry.register(Service {
            tag: 7,
            endpoint: "dtn://n1/ping".parse().unwrap(),
            description: "ping".into(),
        });
        registry.register(Service {
            tag: 7,
            endpoint: "dtn://n1/echo".parse().unwrap(),
            description: "echo".into(),
        });

        assert_eq!(registry.all().len(), 1);
        assert_eq!(
            registry.lookup(7).unwrap().endpoint.to_string(),
            "dtn://n1/echo"
        );
        assert!(registry.lookup(8).is_none());
    }
}
