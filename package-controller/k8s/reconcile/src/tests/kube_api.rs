use super::FakeCluster;
use crate::KubeApiPeers;
use uds_package_controller_core::network::{host_peer, open_peer};

#[tokio::test(flavor = "current_thread")]
async fn caches_discovered_addresses() {
    let cluster = FakeCluster::default();
    cluster.set_api_server_addresses(&["10.0.0.1:6443", "[fd00::1]:443"]);
    let peers = KubeApiPeers::new(None);

    let resolved = peers.resolve(&cluster).await;
    assert_eq!(
        resolved,
        vec![host_peer("10.0.0.1/32"), host_peer("fd00::1/128")]
    );
    assert!(peers.is_cached());

    // Later changes are not observed once an address is cached.
    cluster.set_api_server_addresses(&["10.0.0.2:6443"]);
    assert_eq!(peers.resolve(&cluster).await, resolved);
    assert_eq!(cluster.discoveries(), 1);
}

#[tokio::test(flavor = "current_thread")]
async fn failed_discovery_is_retried() {
    let _tracing = super::init_tracing();
    let cluster = FakeCluster::default();
    let peers = KubeApiPeers::new(None);

    assert_eq!(peers.resolve(&cluster).await, vec![open_peer()]);
    assert!(!peers.is_cached());
    assert_eq!(peers.resolve(&cluster).await, vec![open_peer()]);
    assert_eq!(cluster.discoveries(), 2);

    cluster.set_api_server_addresses(&["172.18.0.2:6443"]);
    assert_eq!(peers.resolve(&cluster).await, vec![host_peer("172.18.0.2/32")]);
    assert!(peers.is_cached());
}

#[tokio::test(flavor = "current_thread")]
async fn empty_discovery_is_not_cached() {
    let cluster = FakeCluster::default();
    let peers = KubeApiPeers::new(None);

    cluster.set_api_server_addresses(&[]);
    assert_eq!(peers.resolve(&cluster).await, vec![open_peer()]);
    assert!(!peers.is_cached());

    cluster.set_api_server_addresses(&["kubernetes.default.svc:443"]);
    assert_eq!(peers.resolve(&cluster).await, vec![open_peer()]);
    assert!(!peers.is_cached());
}

#[tokio::test(flavor = "current_thread")]
async fn static_cidr_skips_discovery() {
    let cluster = FakeCluster::default();
    cluster.set_api_server_addresses(&["10.0.0.1:6443"]);
    let peers = KubeApiPeers::new(Some("192.168.0.0/16".parse().expect("valid cidr")));

    assert_eq!(peers.resolve(&cluster).await, vec![host_peer("192.168.0.0/16")]);
    assert_eq!(cluster.discoveries(), 0);
}

#[tokio::test(flavor = "current_thread")]
async fn clones_share_the_cache() {
    let cluster = FakeCluster::default();
    cluster.set_api_server_addresses(&["10.0.0.1:6443"]);
    let peers = KubeApiPeers::new(None);
    let clone = peers.clone();

    peers.resolve(&cluster).await;
    assert!(clone.is_cached());
    clone.resolve(&cluster).await;
    assert_eq!(cluster.discoveries(), 1);
}
