use crate::Cluster;
use parking_lot::RwLock;
use std::{
    net::{IpAddr, SocketAddr},
    sync::Arc,
};
use uds_package_controller_core::network::{host_peer, open_peer};
use uds_package_controller_k8s_api::{Cidr, NetworkPolicyPeer};

/// Resolves the API server's addresses for use as NetworkPolicy peers.
///
/// The first non-empty discovery result is kept for the life of the
/// process. When discovery fails or yields nothing, an open peer is
/// returned and the next call tries again.
#[derive(Clone, Debug, Default)]
pub struct KubeApiPeers {
    static_cidr: Option<Cidr>,
    cache: Arc<RwLock<Option<Vec<NetworkPolicyPeer>>>>,
}

// === impl KubeApiPeers ===

impl KubeApiPeers {
    /// Uses `cidr` in place of discovery when set.
    pub fn new(static_cidr: Option<Cidr>) -> Self {
        Self {
            static_cidr,
            cache: Default::default(),
        }
    }

    pub async fn resolve<C: Cluster>(&self, cluster: &C) -> Vec<NetworkPolicyPeer> {
        if let Some(cidr) = self.static_cidr {
            return vec![host_peer(&cidr.to_block())];
        }

        let cached = self.cache.read().clone();
        if let Some(peers) = cached {
            return peers;
        }

        match cluster.api_server_addresses().await {
            Ok(addrs) => {
                let peers = addrs
                    .iter()
                    .filter_map(|addr| parse_server_address(addr))
                    .map(|ip| host_peer(&Cidr::Addr(ip).to_block()))
                    .collect::<Vec<_>>();
                if !peers.is_empty() {
                    tracing::debug!(?addrs, "Resolved API server addresses");
                    return self.cache.write().get_or_insert(peers).clone();
                }
                tracing::warn!(?addrs, "No API server IP addresses discovered; allowing 0.0.0.0/0");
            }
            Err(error) => {
                tracing::warn!(%error, "Failed to discover API server addresses; allowing 0.0.0.0/0");
            }
        }

        vec![open_peer()]
    }

    #[cfg(test)]
    pub(crate) fn is_cached(&self) -> bool {
        self.cache.read().is_some()
    }
}

/// Extracts the IP from a `host:port`, `[v6]:port`, or bare host address.
/// Host names are not resolved.
fn parse_server_address(addr: &str) -> Option<IpAddr> {
    if let Ok(sa) = addr.parse::<SocketAddr>() {
        return Some(sa.ip());
    }
    let host = addr.trim_start_matches('[').trim_end_matches(']');
    host.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("10.0.0.1:6443", Some("10.0.0.1"))]
    #[case("[fd00::1]:443", Some("fd00::1"))]
    #[case("172.18.0.2", Some("172.18.0.2"))]
    #[case("[fd00::2]", Some("fd00::2"))]
    #[case("kubernetes.default.svc:443", None)]
    #[case("", None)]
    fn parses_server_addresses(#[case] addr: &str, #[case] ip: Option<&str>) {
        assert_eq!(
            parse_server_address(addr),
            ip.map(|ip| ip.parse::<IpAddr>().unwrap())
        );
    }
}
