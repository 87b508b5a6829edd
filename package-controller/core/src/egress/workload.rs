//! The egress objects owned by a single package.

use super::{shared::external_service_entry, HostResource, HostResourceMap};
use crate::{
    k8s::{
        istio::{
            sidecar::{OutboundTrafficPolicy, OutboundTrafficPolicyMode, WorkloadSelector},
            ServiceEntry, Sidecar, SidecarSpec,
        },
        labels::Map,
        package::{Allow, Direction},
    },
    names, sanitize_resource_name, Owner,
};
use ahash::AHashSet;
use sha2::{Digest, Sha256};

/// Hex digits of the selector digest appended to a Sidecar's name.
const SELECTOR_HASH_LEN: usize = 10;

#[derive(Clone, Debug, Default)]
pub struct WorkloadEgress {
    pub service_entries: Vec<ServiceEntry>,
    pub sidecars: Vec<Sidecar>,
}

/// Builds a ServiceEntry per host the package reaches and a `REGISTRY_ONLY`
/// Sidecar per distinct workload selector among its egress allows.
///
/// An allow entry without a selector names the namespace's default workload.
/// Hosts declared in `network.egress` apply to the default workload too.
pub fn resources(
    hosts: &HostResourceMap,
    allow: &[Allow],
    declares_default: bool,
    owner: &Owner,
) -> WorkloadEgress {
    let service_entries = hosts
        .iter()
        .map(|(host, resource)| service_entry(host, resource, owner))
        .collect();

    let selectors = allow
        .iter()
        .filter(|a| a.direction == Direction::Egress && a.remote_host.is_some())
        .map(|a| a.selector.as_ref().filter(|s| !s.is_empty()))
        .chain(declares_default.then_some(None));

    let mut seen = AHashSet::new();
    let sidecars = selectors
        .filter(|selector| seen.insert(*selector))
        .map(|selector| sidecar(selector, owner))
        .collect();

    WorkloadEgress {
        service_entries,
        sidecars,
    }
}

pub fn service_entry(host: &str, resource: &HostResource, owner: &Owner) -> ServiceEntry {
    let ports = resource
        .port_protocol
        .iter()
        .map(|pp| format!("{}-{}", pp.port, pp.protocol.to_string().to_lowercase()))
        .collect::<Vec<_>>()
        .join("-");
    let name = sanitize_resource_name(&format!("{}-egress-{host}-{ports}", owner.name));

    ServiceEntry {
        metadata: owner.metadata(name),
        spec: external_service_entry(host, &resource.port_protocol),
    }
}

pub fn sidecar(selector: Option<&Map>, owner: &Owner) -> Sidecar {
    Sidecar {
        metadata: owner.metadata(sidecar_name(&owner.name, selector)),
        spec: SidecarSpec {
            workload_selector: selector.map(|labels| WorkloadSelector {
                labels: labels.clone(),
            }),
            outbound_traffic_policy: Some(OutboundTrafficPolicy {
                mode: OutboundTrafficPolicyMode::RegistryOnly,
            }),
        },
    }
}

/// Names the Sidecar scoping a package's workload.
///
/// A selector's labels are readable in the name but may collapse together
/// when sanitized, e.g. `app=my-app` and `app-my=app`, so the name ends with
/// a digest of the selector.
pub fn sidecar_name(pkg: &str, selector: Option<&Map>) -> String {
    let Some(labels) = selector else {
        return sanitize_resource_name(&format!("{pkg}-egress-default"));
    };

    let mut hasher = Sha256::new();
    for (k, v) in labels {
        hasher.update(k.as_bytes());
        hasher.update(b"=");
        hasher.update(v.as_bytes());
        hasher.update(b"\n");
    }
    let digest = format!("{:x}", hasher.finalize());

    let readable = labels
        .iter()
        .map(|(k, v)| format!("{k}-{v}"))
        .collect::<Vec<_>>()
        .join("-");
    let mut name = sanitize_resource_name(&format!("{pkg}-egress-{readable}"));
    name.truncate(names::MAX_NAME_LEN - SELECTOR_HASH_LEN - 1);
    let name = name.trim_end_matches('-');
    format!("{name}-{}", &digest[..SELECTOR_HASH_LEN])
}
