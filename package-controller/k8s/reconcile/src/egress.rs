//! Egress through the shared egress gateway.

use crate::{orphans::purge_orphans, Cluster, Error, Result};
use tokio::sync::Mutex;
use uds_package_controller_core::{
    egress::{self, shared, workload, HostResourceMap, PackageHostMap},
    ClusterInfo, Owner,
};
use uds_package_controller_k8s_api::{
    istio::{Gateway, ServiceEntry, VirtualService},
    labels::Map,
    package::Allow,
    Labels, ResourceExt,
};

/// The egress hosts of every package, and the generation the shared egress
/// objects were last written at.
///
/// Passes over the shared objects are serialized so that concurrent package
/// reconciliations cannot interleave applies with purges.
#[derive(Debug)]
pub struct SharedEgress {
    state: Mutex<State>,
}

#[derive(Debug, Default)]
struct State {
    packages: PackageHostMap,
    generation: u64,
}

// === impl SharedEgress ===

impl SharedEgress {
    /// Starts counting generations after `generation`. Seeding the counter
    /// past any earlier process's keeps shared objects from a previous run
    /// from looking current.
    pub fn new(generation: u64) -> Self {
        Self {
            state: Mutex::new(State {
                packages: PackageHostMap::new(),
                generation,
            }),
        }
    }

    /// Records the package's hosts and, if they changed, rewrites the shared
    /// objects for all packages.
    ///
    /// The package's previous hosts are restored if the rewrite fails, so the
    /// next update for the package is checked and applied again.
    pub async fn update<C: Cluster>(
        &self,
        cluster: &C,
        info: &ClusterInfo,
        pkg_id: &str,
        hosts: HostResourceMap,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        let previous = if hosts.is_empty() {
            match state.packages.remove(pkg_id) {
                Some(previous) => Some(previous),
                None => return Ok(()),
            }
        } else if state.packages.get(pkg_id) == Some(&hosts) {
            return Ok(());
        } else {
            state.packages.insert(pkg_id.to_string(), hosts)
        };

        if let Err(error) = state.sync(cluster, info).await {
            match previous {
                Some(previous) => state.packages.insert(pkg_id.to_string(), previous),
                None => state.packages.remove(pkg_id),
            };
            return Err(error);
        }
        Ok(())
    }

    /// Records hosts whose shared objects are already in place, without
    /// rewriting anything. Used at startup so the first pass does not purge
    /// objects of packages that have not been seen yet.
    pub async fn restore(&self, packages: impl IntoIterator<Item = (String, HostResourceMap)>) {
        let mut state = self.state.lock().await;
        for (pkg_id, hosts) in packages {
            if !hosts.is_empty() {
                state.packages.insert(pkg_id, hosts);
            }
        }
    }

    /// Forgets the package and rewrites the shared objects without it.
    pub async fn remove<C: Cluster>(
        &self,
        cluster: &C,
        info: &ClusterInfo,
        pkg_id: &str,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        state.packages.remove(pkg_id);
        state.sync(cluster, info).await
    }

    pub async fn generation(&self) -> u64 {
        self.state.lock().await.generation
    }

    /// The number of distinct hosts routed through the egress gateway.
    pub async fn hosts(&self) -> usize {
        egress::remap(&self.state.lock().await.packages).len()
    }
}

impl Default for SharedEgress {
    fn default() -> Self {
        Self::new(0)
    }
}

// === impl State ===

impl State {
    async fn sync<C: Cluster>(&mut self, cluster: &C, info: &ClusterInfo) -> Result<()> {
        self.generation += 1;
        let generation = self.generation;
        tracing::debug!(generation, packages = self.packages.len(), "Syncing shared egress");

        apply_sidecar_egress_resources(cluster, info, &self.packages, generation).await?;
        purge_sidecar_egress_resources(cluster, info, generation).await
    }
}

/// Checks that the egress gateway is installed and listens on every port
/// the hosts are reached on.
pub async fn validate_egress_gateway<C: Cluster>(
    cluster: &C,
    info: &ClusterInfo,
    hosts: &HostResourceMap,
) -> Result<()> {
    let namespace = info.egress_namespace.as_str();
    match cluster.namespace(namespace).await {
        Ok(Some(_)) => {}
        Ok(None) => {
            return Err(Error::EgressGatewayDisabled {
                namespace: namespace.to_string(),
            })
        }
        Err(Error::Kube(source)) => {
            return Err(Error::EgressNamespace {
                namespace: namespace.to_string(),
                source,
            })
        }
        Err(error) => return Err(error),
    }

    let service = cluster
        .service(namespace, &info.egress_service)
        .await?
        .ok_or_else(|| Error::EgressService {
            namespace: namespace.to_string(),
            name: info.egress_service.clone(),
        })?;
    let ports = service
        .spec
        .and_then(|spec| spec.ports)
        .unwrap_or_default();

    for (host, resource) in hosts {
        for pp in &resource.port_protocol {
            if !ports.iter().any(|p| p.port == i32::from(pp.port)) {
                tracing::error!(%host, port = pp.port, "Egress gateway does not expose port");
                return Err(Error::EgressPortNotExposed {
                    host: host.clone(),
                    port: pp.port,
                });
            }
        }
    }

    Ok(())
}

/// Applies a Gateway, VirtualService and ServiceEntry for every host any
/// package reaches. Fails without writing a host's objects if another actor
/// already routes that host.
pub async fn apply_sidecar_egress_resources<C: Cluster>(
    cluster: &C,
    info: &ClusterInfo,
    packages: &PackageHostMap,
    generation: u64,
) -> Result<()> {
    for (host, resource) in egress::remap(packages) {
        check_host_conflicts(cluster, info, &host).await?;

        let gateway = shared::gateway(&host, &resource, generation, info);
        cluster
            .apply(&gateway)
            .await
            .map_err(|e| apply_error("Gateway", &host, e))?;

        let vs = shared::virtual_service(&host, &resource, generation, info);
        cluster
            .apply(&vs)
            .await
            .map_err(|e| apply_error("VirtualService", &host, e))?;

        let se = shared::service_entry(&host, &resource, generation, info);
        cluster
            .apply(&se)
            .await
            .map_err(|e| apply_error("ServiceEntry", &host, e))?;

        tracing::debug!(%host, generation, packages = ?resource.packages, "Applied shared egress");
    }
    Ok(())
}

/// Deletes the shared egress objects not written at `generation`.
pub async fn purge_sidecar_egress_resources<C: Cluster>(
    cluster: &C,
    info: &ClusterInfo,
    generation: u64,
) -> Result<()> {
    let ns = info.egress_namespace.as_str();
    let selector = Labels::from(shared::selector());
    let generation = generation.to_string();

    let purged = async {
        purge_orphans::<Gateway, _>(cluster, ns, &selector, &generation).await?;
        purge_orphans::<VirtualService, _>(cluster, ns, &selector, &generation).await?;
        purge_orphans::<ServiceEntry, _>(cluster, ns, &selector, &generation).await
    };
    if let Err(error) = purged.await {
        tracing::error!(%error, "Failed to purge orphaned sidecar egress resources");
        return Err(Error::PurgeSharedEgress(Box::new(error)));
    }
    Ok(())
}

/// Applies the package's ServiceEntries and `REGISTRY_ONLY` Sidecars.
pub async fn create_sidecar_workload_egress_resources<C: Cluster>(
    cluster: &C,
    hosts: &HostResourceMap,
    allow: &[Allow],
    declares_default: bool,
    owner: &Owner,
) -> Result<()> {
    let workload::WorkloadEgress {
        service_entries,
        sidecars,
    } = workload::resources(hosts, allow, declares_default, owner);

    for se in &service_entries {
        cluster.apply(se).await?;
    }
    for sidecar in &sidecars {
        cluster.apply(sidecar).await?;
    }
    Ok(())
}

/// Fails if a Gateway or VirtualService that this controller did not write
/// for `host` already claims it.
async fn check_host_conflicts<C: Cluster>(
    cluster: &C,
    info: &ClusterInfo,
    host: &str,
) -> Result<()> {
    let ours = Labels::from(shared::selector());
    let is_ours = |name: &str, namespace: &str, labels: &Map, expected: &str| {
        name == expected && namespace == info.egress_namespace && ours.matches(labels)
    };

    let gateway_name = shared::gateway_name(host);
    for gw in cluster.list::<Gateway>(None, &Labels::default()).await? {
        let (name, namespace) = (gw.name_any(), gw.namespace().unwrap_or_default());
        if is_ours(&name, &namespace, gw.labels(), &gateway_name) || !gw.spec.claims_host(host) {
            continue;
        }
        tracing::error!(%host, %namespace, %name, "Found existing Gateway with matching host");
        return Err(Error::HostConflict {
            kind: "Gateway",
            name,
            namespace,
            host: host.to_string(),
        });
    }

    let vs_name = shared::virtual_service_name(host);
    for vs in cluster.list::<VirtualService>(None, &Labels::default()).await? {
        let (name, namespace) = (vs.name_any(), vs.namespace().unwrap_or_default());
        if is_ours(&name, &namespace, vs.labels(), &vs_name) || !vs.spec.claims_host(host) {
            continue;
        }
        tracing::error!(%host, %namespace, %name, "Found existing VirtualService with matching host");
        return Err(Error::HostConflict {
            kind: "VirtualService",
            name,
            namespace,
            host: host.to_string(),
        });
    }

    Ok(())
}

fn apply_error(kind: &'static str, host: &str, error: Error) -> Error {
    tracing::error!(%host, %error, "Failed to apply {kind}");
    Error::ApplyHost {
        kind,
        host: host.to_string(),
        source: Box::new(error),
    }
}
