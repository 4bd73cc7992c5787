use super::*;
use std::sync::{Arc, RwLock};
use tracing::info;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("A CLA with id {0} is already registered")]
    AlreadyExists(String),
}

/// Registered CLAs in registration order; forwarding tries them in that
/// order, first success wins.
#[derive(Default)]
pub struct ClaRegistry {
    clas: RwLock<Vec<Arc<dyn ConvergenceLayer>>>,
}

impl ClaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, cla: Arc<dyn ConvergenceLayer>) -> core::result::Result<(), RegistryError> {
        let mut clas = self.clas.write().expect("cla registry lock poisoned");
        if clas.iter().any(|c| c.id() == cla.id()) {
            return Err(RegistryError::AlreadyExists(cla.id()));
        }
        info!("Registered CLA {}", cla.id());
        clas.push(cla);
        Ok(())
    }

    pub fn all(&self) -> Vec<Arc<dyn ConvergenceLayer>> {
        self.clas
            .read()
            .expect("cla registry lock poisoned")
            .clone()
    }

    pub fn is_empty(&self) -> bool {
        self.clas.read().expect("cla registry lock poisoned").is_empty()
    }

    /// CLAs that can reach the peer, in registration order.
    pub fn find_clas_for_peer(&self, peer: &Peer) -> Vec<Arc<dyn ConvergenceLayer>> {
        self.clas
            .read()
            .expect("cla registry lock poisoned")
            .iter()
            .filter(|c| c.can_reach(peer))
            .cloned()
            .collect()
    }

    pub async fn shutdown(&self) {
        let clas = self.all();
        for cla in clas {
            cla.stop().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::{Peer, PeerKind};

    struct FakeCla(&'static str);

    #[async_trait]
    impl ConvergenceLayer for FakeCla {
        fn id(&self) -> String {
            format!("{}:test", self.0)
        }
        fn name(&self) -> &'static str {
            self.0
        }
        async fn start(&self) -> Result<()> {
            Ok(())
        }
        async fn stop(&self) {}
        async fn send_bundle(&self, _: &Bundle, _: &Peer) -> Result<()> {
            Ok(())
        }
        fn connections(&self) -> Vec<Connection> {
            Vec::new()
        }
        fn take_incoming(&self) -> Option<IngressReceiver> {
            None
        }
    }

    #[test]
    fn registration_order_and_reach() {
        let registry = ClaRegistry::new();
        registry.register(Arc::new(FakeCla("tcp"))).unwrap();
        registry.register(Arc::new(FakeCla("udp"))).unwrap();
        assert!(registry.register(Arc::new(FakeCla("tcp"))).is_err());

        let mut peer = Peer::new("dtn://n2".parse().unwrap(), "127.0.0.1", PeerKind::Static);
        peer.cla_list.push(("udp".into(), Some(4556)));

        let reachable = registry.find_clas_for_peer(&peer);
        assert_eq!(reachable.len(), 1);
        assert_eq!(reachable[0].name(), "udp");
    }
}
