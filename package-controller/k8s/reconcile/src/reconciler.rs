use crate::{
    egress::{self, SharedEgress},
    metrics::Outcome,
    network,
    orphans::purge_orphans,
    routes, status, Cluster, Error, KubeApiPeers, ReconcileMetrics, Result,
};
use std::time::{Duration, Instant};
use uds_package_controller_core::{egress::host_resource_map, ClusterInfo, Owner};
use uds_package_controller_k8s_api::{
    istio::{ServiceEntry, Sidecar, VirtualService},
    package::Phase,
    Labels, Package, PackageStatus, ResourceExt,
};

/// Drives a package's generated objects toward its spec and reports the
/// outcome on its status.
pub struct Reconciler<C> {
    cluster: C,
    info: ClusterInfo,
    kube_api: KubeApiPeers,
    egress: SharedEgress,
    max_retries: u32,
    retry_backoff: Duration,
    metrics: ReconcileMetrics,
}

// === impl Reconciler ===

impl<C: Cluster> Reconciler<C> {
    pub fn new(
        cluster: C,
        info: ClusterInfo,
        kube_api: KubeApiPeers,
        egress: SharedEgress,
        metrics: ReconcileMetrics,
    ) -> Self {
        Self {
            cluster,
            info,
            kube_api,
            egress,
            max_retries: 5,
            retry_backoff: Duration::from_secs(5),
            metrics,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Sets the delay added per failed attempt before a package is retried.
    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    pub fn cluster(&self) -> &C {
        &self.cluster
    }

    #[cfg(test)]
    pub(crate) fn metrics(&self) -> &ReconcileMetrics {
        &self.metrics
    }

    /// Registers the egress hosts of packages that are already `Ready` at
    /// their current generation.
    pub async fn restore(&self, packages: &[Package]) {
        let ready = packages
            .iter()
            .filter(|pkg| pkg.metadata.deletion_timestamp.is_none())
            .filter(|pkg| status::current_phase(pkg) == Some(Phase::Ready))
            .map(|pkg| (pkg.id(), host_resource_map(pkg)))
            .collect::<Vec<_>>();
        let restored = ready.len();
        self.egress.restore(ready).await;

        let hosts = self.egress.hosts().await;
        self.metrics.set_egress_hosts(hosts);
        tracing::info!(packages = restored, hosts, "Restored shared egress hosts");
    }

    /// Reconciles the package's current generation unless it is already
    /// `Ready` or has exhausted its retries.
    pub async fn reconcile(&self, pkg: &Package) -> Result<()> {
        let namespace = pkg.namespace().ok_or(Error::MissingMetadata("namespace"))?;
        let name = pkg.name_any();
        let generation = pkg.metadata.generation;
        let started = Instant::now();

        match status::current_phase(pkg) {
            Some(Phase::Ready) => {
                tracing::debug!(?generation, "Already reconciled");
                // Restores the package's hosts after a restart.
                let hosts = host_resource_map(pkg);
                self.egress
                    .update(&self.cluster, &self.info, &pkg.id(), hosts)
                    .await?;
                self.metrics.set_egress_hosts(self.egress.hosts().await);
                self.metrics.reconciled(Outcome::Skipped, started.elapsed());
                return Ok(());
            }
            Some(Phase::Failed) => {
                tracing::debug!(?generation, "Retries exhausted; waiting for a spec change");
                self.metrics.reconciled(Outcome::Skipped, started.elapsed());
                return Ok(());
            }
            Some(Phase::Retrying) => {
                let attempt = status::prior_attempts(pkg);
                let delay = status::retry_backoff(self.retry_backoff, attempt);
                tracing::info!(attempt, ?delay, "Retrying");
                tokio::time::sleep(delay).await;
            }
            _ => {}
        }

        let attempt = status::prior_attempts(pkg);
        self.patch_status(&namespace, &name, status::pending(generation, attempt))
            .await?;

        match self.run(pkg, &namespace).await {
            Ok((endpoints, count)) => {
                tracing::info!(?generation, policies = count, ?endpoints, "Reconciled");
                self.patch_status(&namespace, &name, status::ready(generation, endpoints, count))
                    .await?;
                self.metrics.reconciled(Outcome::Ready, started.elapsed());
                Ok(())
            }
            Err(error) => {
                let attempt = attempt + 1;
                let status = status::failed(generation, attempt, self.max_retries);
                let outcome = match status.phase {
                    Some(Phase::Failed) => Outcome::Failed,
                    _ => Outcome::Retrying,
                };
                tracing::error!(%error, attempt, max_retries = self.max_retries, "Failed to reconcile");
                if let Err(error) = self.patch_status(&namespace, &name, status).await {
                    tracing::warn!(%error, "Failed to record reconcile failure");
                }
                self.metrics.reconciled(outcome, started.elapsed());
                Err(error)
            }
        }
    }

    /// Stops routing the package's hosts through the egress gateway. The
    /// package's own objects are removed with it by their owner references.
    pub async fn remove(&self, pkg: &Package) -> Result<()> {
        let namespace = pkg.namespace().ok_or(Error::MissingMetadata("namespace"))?;
        let name = pkg.name_any();

        self.patch_status(&namespace, &name, status::phase(Phase::Removing))
            .await?;

        match self.egress.remove(&self.cluster, &self.info, &pkg.id()).await {
            Ok(()) => {
                tracing::info!("Removed");
                self.metrics.set_egress_hosts(self.egress.hosts().await);
                self.metrics.removed(Outcome::Removed);
                Ok(())
            }
            Err(error) => {
                tracing::error!(%error, "Failed to remove");
                if let Err(error) = self
                    .patch_status(&namespace, &name, status::phase(Phase::RemovalFailed))
                    .await
                {
                    tracing::warn!(%error, "Failed to record removal failure");
                }
                self.metrics.removed(Outcome::Failed);
                Err(error)
            }
        }
    }

    async fn run(&self, pkg: &Package, namespace: &str) -> Result<(Vec<String>, usize)> {
        let owner = Owner::new(pkg, namespace);

        let count =
            network::reconcile(&self.cluster, pkg, &owner, &self.info, &self.kube_api).await?;
        let endpoints = routes::reconcile(&self.cluster, pkg, &owner, &self.info).await?;

        let hosts = host_resource_map(pkg);
        if !hosts.is_empty() {
            egress::validate_egress_gateway(&self.cluster, &self.info, &hosts).await?;
        }
        let declares_default = pkg.network().is_some_and(|n| !n.egress.is_empty());
        egress::create_sidecar_workload_egress_resources(
            &self.cluster,
            &hosts,
            pkg.allow(),
            declares_default,
            &owner,
        )
        .await?;

        if let Err(error) = self.purge_mesh_orphans(&owner).await {
            tracing::warn!(%error, "Failed to purge stale mesh resources");
        }

        self.egress
            .update(&self.cluster, &self.info, &pkg.id(), hosts)
            .await?;
        self.metrics.set_egress_hosts(self.egress.hosts().await);

        Ok((endpoints, count))
    }

    async fn purge_mesh_orphans(&self, owner: &Owner) -> Result<()> {
        let selector = Labels::from(owner.selector());
        let ns = owner.namespace.as_str();
        let generation = owner.generation.as_str();

        let cluster = &self.cluster;
        let mut deleted =
            purge_orphans::<VirtualService, _>(cluster, ns, &selector, generation).await?;
        deleted += purge_orphans::<ServiceEntry, _>(cluster, ns, &selector, generation).await?;
        deleted += purge_orphans::<Sidecar, _>(cluster, ns, &selector, generation).await?;
        if deleted > 0 {
            tracing::info!(deleted, "Deleted stale mesh resources");
        }
        Ok(())
    }

    async fn patch_status(&self, namespace: &str, name: &str, status: PackageStatus) -> Result<()> {
        tracing::debug!(phase = ?status.phase, "Updating status");
        self.cluster
            .patch_package_status(namespace, name, &status)
            .await
    }
}
