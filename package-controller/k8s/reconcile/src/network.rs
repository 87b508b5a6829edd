use crate::{orphans::purge_orphans, Cluster, KubeApiPeers, Result};
use uds_package_controller_core::{network, ClusterInfo, Owner};
use uds_package_controller_k8s_api::{Labels, NetworkPolicy, Package};

/// Applies the package's NetworkPolicies and deletes those left over from
/// earlier generations. Returns the number of policies applied.
pub async fn reconcile<C: Cluster>(
    cluster: &C,
    pkg: &Package,
    owner: &Owner,
    info: &ClusterInfo,
    kube_api: &KubeApiPeers,
) -> Result<usize> {
    let peers = kube_api.resolve(cluster).await;
    let policies = network::policies(pkg, owner, info, &peers);

    for np in &policies {
        cluster.apply(np).await?;
    }

    let selector = Labels::from(owner.selector());
    match purge_orphans::<NetworkPolicy, _>(cluster, &owner.namespace, &selector, &owner.generation)
        .await
    {
        Ok(0) => {}
        Ok(deleted) => tracing::info!(deleted, "Deleted stale NetworkPolicies"),
        Err(error) => tracing::warn!(%error, "Failed to purge stale NetworkPolicies"),
    }

    Ok(policies.len())
}
