use super::*;
use mule_bpv7::builder::Builder;
use mule_bpv7::creation_timestamp::CreationTimestamp;
use mule_bpv7::dtn_time::DtnTime;

fn bundle_at(seq: u64) -> Bundle {
    Builder::new(
        "dtn://a/app".parse().unwrap(),
        "dtn://b/app".parse().unwrap(),
    )
    .timestamp(CreationTimestamp::new(DtnTime::new(5000), seq))
    .payload(b"payload".to_vec())
    .build()
}

#[tokio::test]
async fn push_and_get_round_trip() {
    let store = InMemoryStore::new();
    let bundle = bundle_at(0);
    store.push(&bundle).await.unwrap();

    let id = bundle.id().to_string();
    let loaded = store.get_bundle(&id).await.unwrap();
    assert_eq!(loaded.to_cbor(), bundle.to_cbor());

    let pack = store.get_metadata(&id).await.unwrap();
    assert_eq!(pack.size, bundle.to_cbor().len() as u64);
    assert_eq!(pack.destination, bundle.primary.destination);
}

#[tokio::test]
async fn ids_differ_iff_source_and_timestamp_differ() {
    let store = InMemoryStore::new();
    let a = bundle_at(0);
    let b = bundle_at(1);
    store.push(&a).await.unwrap();
    store.push(&b).await.unwrap();
    assert_eq!(store.count().await, 2);
    assert_ne!(a.id().to_string(), b.id().to_string());
}

#[tokio::test]
async fn second_push_keeps_constraints() {
    let store = InMemoryStore::new();
    let bundle = bundle_at(0);
    let id = bundle.id().to_string();
    store.push(&bundle).await.unwrap();

    let mut pack = store.get_metadata(&id).await.unwrap();
    pack.constraints.insert(Constraints::FORWARD_PENDING);
    store.update_metadata(&pack).await.unwrap();

    store.push(&bundle).await.unwrap();
    let pack = store.get_metadata(&id).await.unwrap();
    assert!(pack.constraints.contains(Constraints::FORWARD_PENDING));
}

#[tokio::test]
async fn update_metadata_requires_presence() {
    let store = InMemoryStore::new();
    let pack = BundlePack::new(&bundle_at(0), 7);
    assert!(matches!(
        store.update_metadata(&pack).await,
        Err(StoreError::BundleNotFound(_))
    ));
}

#[tokio::test]
async fn remove_is_final() {
    let store = InMemoryStore::new();
    let bundle = bundle_at(0);
    let id = bundle.id().to_string();
    store.push(&bundle).await.unwrap();
    store.remove(&id).await.unwrap();
    assert_eq!(store.count().await, 0);
    assert!(!store.has_item(&id).await);
    assert!(matches!(
        store.remove(&id).await,
        Err(StoreError::BundleNotFound(_))
    ));
}

#[test]
fn constraint_bits() {
    let mut c = Constraints::none();
    assert!(c.is_empty());
    c.insert(Constraints::DISPATCH_PENDING);
    c.insert(Constraints::DELETED);
    assert!(c.contains(Constraints::DISPATCH_PENDING));
    assert!(!c.contains(Constraints::FORWARD_PENDING));
    c.remove(Constraints::DISPATCH_PENDING);
    assert!(!c.contains(Constraints::DISPATCH_PENDING));
    assert_eq!(Constraints::from_bits(c.bits()), c);
    assert_eq!(c.to_string(), "deleted");
}
