//! NetworkPolicy synthesis.
//!
//! A package's namespace is isolated by a deny-all policy; every other
//! policy admits one kind of traffic. The baseline rules come first, then
//! the package's custom `allow` entries, then one ingress rule per expose
//! entry.

mod defaults;
mod generate;

pub use self::generate::{generate, host_peer, open_peer, CLOUD_METADATA_CIDR};
use crate::{
    k8s::{labels::Map, NetworkPolicy, NetworkPolicyPeer, Package},
    sanitize_resource_name, ClusterInfo, Owner,
};

/// Returns the full desired set of NetworkPolicies for a package, labelled
/// for the owner's current generation.
pub fn policies(
    pkg: &Package,
    owner: &Owner,
    cluster: &ClusterInfo,
    kube_api: &[NetworkPolicyPeer],
) -> Vec<NetworkPolicy> {
    let ns = owner.namespace.as_str();

    let deny = defaults::deny_all(ns, format!("deny-{}-default", owner.name));
    let allows = defaults::baseline(&pkg.defaults())
        .into_iter()
        .chain(pkg.allow().iter().cloned())
        .chain(pkg.expose().iter().map(defaults::expose))
        .map(|allow| {
            let mut np = generate(ns, &allow, cluster, kube_api);
            let name = np.metadata.name.take().unwrap_or_default();
            np.metadata.name = Some(format!("allow-{}-{}", owner.name, name));
            np
        });

    std::iter::once(deny)
        .chain(allows)
        .map(|np| finalize(np, owner))
        .collect()
}

fn finalize(mut np: NetworkPolicy, owner: &Owner) -> NetworkPolicy {
    let name = sanitize_resource_name(np.metadata.name.as_deref().unwrap_or_default());
    let mut labels: Map = np.metadata.labels.take().unwrap_or_default();
    labels.extend(owner.labels());

    np.metadata = crate::k8s::ObjectMeta {
        labels: Some(labels),
        annotations: np.metadata.annotations.take(),
        ..owner.metadata(name)
    };
    np
}
