//! Egress to hosts outside the cluster.
//!
//! Packages declare the external hosts they reach. Each package gets a
//! ServiceEntry per host and a `REGISTRY_ONLY` Sidecar per workload, so
//! that its workloads can reach only what they declared. The routing
//! through the shared egress gateway is shared by every package: one
//! Gateway, VirtualService and ServiceEntry per host, no matter how many
//! packages use it.

pub mod shared;
pub mod workload;

use crate::k8s::{
    package::{Direction, RemoteProtocol},
    Package, ResourceExt,
};
use std::collections::BTreeMap;

/// Marks the shared egress objects as owned by this controller, in place of
/// a package name.
pub const SHARED_PACKAGE_ID: &str = "shared-egress-resource";

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PortProtocol {
    pub port: u16,
    pub protocol: RemoteProtocol,
}

/// The ports a single package reaches on a host.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HostResource {
    pub port_protocol: Vec<PortProtocol>,
}

/// Host name -> ports, for a single package.
pub type HostResourceMap = BTreeMap<String, HostResource>;

/// Package id -> hosts, across all packages.
pub type PackageHostMap = BTreeMap<String, HostResourceMap>;

/// The package-agnostic view of a host used to emit the shared objects.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EgressResource {
    pub packages: Vec<String>,
    pub port_protocols: Vec<PortProtocol>,
}

pub type EgressResourceMap = BTreeMap<String, EgressResource>;

/// Annotates shared objects with each package that relies on them.
pub fn user_annotation(pkg_id: &str) -> String {
    format!("uds.dev/user-{pkg_id}")
}

/// Collects the external hosts a package declares, both as `remoteHost`
/// allow entries and in `network.egress`.
pub fn host_resource_map(pkg: &Package) -> HostResourceMap {
    let mut hosts = HostResourceMap::new();

    for allow in pkg.allow() {
        let host = match allow.remote_host.as_deref() {
            Some(host) if allow.direction == Direction::Egress => host,
            _ => continue,
        };
        let protocol = allow.remote_protocol.unwrap_or_default();
        let ports = allow
            .ports
            .iter()
            .flatten()
            .chain(allow.port.iter())
            .copied()
            .collect::<Vec<_>>();
        if ports.is_empty() {
            insert(&mut hosts, host, default_port(protocol), protocol);
        }
        for port in ports {
            insert(&mut hosts, host, port, protocol);
        }
    }

    if let Some(network) = pkg.network() {
        for (host, ports) in &network.egress {
            if ports.is_empty() {
                let protocol = RemoteProtocol::default();
                insert(&mut hosts, host, default_port(protocol), protocol);
            }
            for p in ports {
                let port = p.port.unwrap_or_else(|| default_port(p.protocol));
                insert(&mut hosts, host, port, p.protocol);
            }
        }
    }

    tracing::trace!(package = %pkg.name_any(), hosts = hosts.len(), "Collected egress hosts");
    hosts
}

/// Groups every package's hosts by host, merging the packages and
/// de-duplicating the ports.
pub fn remap(packages: &PackageHostMap) -> EgressResourceMap {
    let mut resources = EgressResourceMap::new();
    for (pkg_id, hosts) in packages {
        for (host, resource) in hosts {
            let entry = resources.entry(host.clone()).or_default();
            if !entry.packages.contains(pkg_id) {
                entry.packages.push(pkg_id.clone());
            }
            for pp in &resource.port_protocol {
                if !entry.port_protocols.contains(pp) {
                    entry.port_protocols.push(*pp);
                }
            }
        }
    }
    resources
}

fn insert(hosts: &mut HostResourceMap, host: &str, port: u16, protocol: RemoteProtocol) {
    let pp = PortProtocol { port, protocol };
    let resource = hosts.entry(host.to_string()).or_default();
    if !resource.port_protocol.contains(&pp) {
        resource.port_protocol.push(pp);
    }
}

fn default_port(protocol: RemoteProtocol) -> u16 {
    match protocol {
        RemoteProtocol::Tls => 443,
        RemoteProtocol::Http => 80,
    }
}
