use super::*;
use std::collections::HashMap;
use std::sync::Mutex;

/// Hash-table backed store; nothing survives a restart.
#[derive(Default)]
pub struct InMemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    bundles: HashMap<String, Vec<u8>>,
    metadata: HashMap<String, BundlePack>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BundleStore for InMemoryStore {
    async fn push(&self, bundle: &Bundle) -> Result<()> {
        let data = bundle.to_cbor();
        let id = bundle.id().to_string();
        let mut inner = self.inner.lock().expect("store lock poisoned");
        inner
            .metadata
            .entry(id.clone())
            .or_insert_with(|| BundlePack::new(bundle, data.len() as u64));
        inner.bundles.insert(id, data);
        Ok(())
    }

    async fn update_metadata(&self, pack: &BundlePack) -> Result<()> {
        let mut inner = self.inner.lock().expect("store lock poisoned");
        match inner.metadata.get_mut(&pack.id) {
            Some(existing) => {
                *existing = pack.clone();
                Ok(())
            }
            None => Err(StoreError::BundleNotFound(pack.id.clone())),
        }
    }

    async fn remove(&self, id: &str) -> Result<()> {
        let mut inner = self.inner.lock().expect("store lock poisoned");
        inner.metadata.remove(id);
        inner
            .bundles
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| StoreError::BundleNotFound(id.to_string()))
    }

    async fn count(&self) -> u64 {
        self.inner.lock().expect("store lock poisoned").bundles.len() as u64
    }

    async fn all_ids(&self) -> Vec<String> {
        self.inner
            .lock()
            .expect("store lock poisoned")
            .metadata
            .keys()
            .cloned()
            .collect()
    }

    async fn all_bundles(&self) -> Vec<BundlePack> {
        self.inner
            .lock()
            .expect("store lock poisoned")
            .metadata
            .values()
            .cloned()
            .collect()
    }

    async fn has_item(&self, id: &str) -> bool {
        self.inner
            .lock()
            .expect("store lock poisoned")
            .metadata
            .contains_key(id)
    }

    async fn get_bundle(&self, id: &str) -> Option<Bundle> {
        let data = self
            .inner
            .lock()
            .expect("store lock poisoned")
            .bundles
            .get(id)
            .cloned()?;
        Bundle::from_cbor(&data).ok()
    }

    async fn get_metadata(&self, id: &str) -> Option<BundlePack> {
        self.inner
            .lock()
            .expect("store lock poisoned")
            .metadata
            .get(id)
            .cloned()
    }
}
