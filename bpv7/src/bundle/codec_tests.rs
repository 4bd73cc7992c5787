use super::*;
use crate::builder::Builder;

fn test_bundle() -> Bundle {
    Builder::new(
        "dtn://n1/ping".parse().unwrap(),
        "dtn://n2/echo".parse().unwrap(),
    )
    .lifetime(3600)
    .payload(b"Hello, DTN!".to_vec())
    .build()
}

#[test]
fn round_trip() {
    let bundle = test_bundle();
    let data = bundle.to_cbor();
    let parsed = Bundle::from_cbor(&data).unwrap();
    assert_eq!(parsed, bundle);
    assert_eq!(parsed.to_cbor(), data);
}

#[test]
fn id_format() {
    let bundle = test_bundle();
    let id = bundle.id();
    assert_eq!(
        id.to_string(),
        format!(
            "dtn://n1/ping-{}-{}",
            bundle.primary.timestamp.time,
            bundle.primary.timestamp.sequence
        )
    );
}

#[test]
fn payload_access() {
    assert_eq!(test_bundle().payload().unwrap(), b"Hello, DTN!");
}

#[test]
fn expiry() {
    let bundle = test_bundle();
    let created = bundle.primary.timestamp.time;
    assert!(!bundle.is_expired(created));
    assert!(!bundle.is_expired(DtnTime::new(created.millisecs() + 3600 * 1000)));
    assert!(bundle.is_expired(DtnTime::new(created.millisecs() + 3600 * 1000 + 1)));
}

#[test]
fn rejects_garbage() {
    assert!(Bundle::from_cbor(&[0x01, 0x02]).is_err());
    assert!(Bundle::from_cbor(&[]).is_err());
}

#[test]
fn rejects_missing_payload() {
    let mut bundle = test_bundle();
    bundle.blocks.clear();
    let data = bundle.to_cbor();
    assert!(matches!(
        Bundle::from_cbor(&data),
        Err(crate::Error::MissingPayload)
    ));
}

#[test]
fn tolerates_indefinite_outer_array() {
    let bundle = test_bundle();
    let data = bundle.to_cbor();
    // Rewrap the definite outer array as indefinite
    let mut indefinite = vec![0x9f];
    indefinite.extend_from_slice(&data[1..]);
    indefinite.push(0xff);
    assert_eq!(Bundle::from_cbor(&indefinite).unwrap(), bundle);
}
