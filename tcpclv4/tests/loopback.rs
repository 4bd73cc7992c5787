//! Two agents talking RFC 9174 over loopback.

use mule_bpa::cla::ConvergenceLayer;
use mule_bpa::peer::{Peer, PeerKind, PeerManager};
use mule_bpv7::builder::Builder;
use mule_bpv7::bundle::Bundle;
use mule_tcpclv4::TcpClConvergenceLayer;
use std::sync::Arc;
use std::time::Duration;

fn agent(node: &str) -> (TcpClConvergenceLayer, Arc<PeerManager>) {
    let peers = Arc::new(PeerManager::new(Duration::from_secs(60)));
    let cla = TcpClConvergenceLayer::new(
        "127.0.0.1",
        0,
        60,
        format!("dtn://{node}").parse().unwrap(),
        peers.clone(),
    );
    (cla, peers)
}

fn test_bundle(payload: &[u8]) -> Bundle {
    Builder::new(
        "dtn://a/app".parse().unwrap(),
        "dtn://b/app".parse().unwrap(),
    )
    .payload(payload.to_vec())
    .build()
}

#[tokio::test]
async fn handshake_and_single_transfer() {
    let (receiver_cla, receiver_peers) = agent("b");
    receiver_cla.start().await.unwrap();
    let port = receiver_cla.local_port().unwrap();
    let mut incoming = receiver_cla.take_incoming().unwrap();

    let (sender_cla, _) = agent("a");
    let mut peer = Peer::new("dtn://b".parse().unwrap(), "127.0.0.1", PeerKind::Static);
    peer.cla_list.push(("tcp".into(), Some(port)));

    let bundle = test_bundle(b"over tcp");
    sender_cla.send_bundle(&bundle, &peer).await.unwrap();

    let received = tokio::time::timeout(Duration::from_secs(5), incoming.recv())
        .await
        .expect("timed out")
        .expect("stream closed");
    assert_eq!(received.bundle, bundle);
    assert_eq!(received.connection.cla_type, "tcp");
    assert_eq!(
        received.connection.remote_eid.as_ref().map(|e| e.to_string()),
        Some("dtn://a".to_string())
    );

    // The passive side learned its neighbour from the handshake
    assert!(receiver_peers.get_peer_by_node("a").is_some());

    sender_cla.stop().await;
    receiver_cla.stop().await;
}

#[tokio::test]
async fn session_is_reused_for_multiple_bundles() {
    let (receiver_cla, _) = agent("b");
    receiver_cla.start().await.unwrap();
    let port = receiver_cla.local_port().unwrap();
    let mut incoming = receiver_cla.take_incoming().unwrap();

    let (sender_cla, _) = agent("a");
    let mut peer = Peer::new("dtn://b".parse().unwrap(), "127.0.0.1", PeerKind::Static);
    peer.cla_list.push(("tcp".into(), Some(port)));

    for i in 0..3u8 {
        sender_cla
            .send_bundle(&test_bundle(&[i; 16]), &peer)
            .await
            .unwrap();
    }
    for _ in 0..3 {
        tokio::time::timeout(Duration::from_secs(5), incoming.recv())
            .await
            .expect("timed out")
            .expect("stream closed");
    }

    assert_eq!(sender_cla.connections().len(), 1);

    sender_cla.stop().await;
    receiver_cla.stop().await;
}

#[tokio::test]
async fn connect_to_nothing_fails() {
    let (sender_cla, _) = agent("a");
    let mut peer = Peer::new("dtn://b".parse().unwrap(), "127.0.0.1", PeerKind::Static);
    // An unroutable port: bind one, learn it, drop it
    let probe = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = probe.local_addr().unwrap().port();
    drop(probe);
    peer.cla_list.push(("tcp".into(), Some(port)));

    assert!(sender_cla
        .send_bundle(&test_bundle(b"nope"), &peer)
        .await
        .is_err());
}
