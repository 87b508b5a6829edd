use crate::{
    controller,
    core::ClusterInfo,
    k8s::{
        istio::{Gateway, ServiceEntry, Sidecar, VirtualService},
        Api, Cidr, Client, ListParams, Package, Resource,
    },
    reconcile::{KubeApiPeers, KubeCluster, ReconcileMetrics, Reconciler, SharedEgress},
};
use anyhow::{bail, Result};
use clap::Parser;
use prometheus_client::registry::Registry;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{info_span, Instrument};

#[derive(Debug, Parser)]
#[clap(name = "package", about = "A UDS Package controller")]
pub struct Args {
    #[clap(
        long,
        default_value = "uds=info,warn",
        env = "UDS_PACKAGE_CONTROLLER_LOG"
    )]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    #[clap(flatten)]
    admin: kubert::AdminArgs,

    /// The domain tenant hosts are exposed under.
    #[clap(long, default_value = "uds.dev", env = "UDS_DOMAIN")]
    domain: String,

    /// The domain admin hosts are exposed under. Defaults to `admin.<domain>`.
    #[clap(long, env = "UDS_ADMIN_DOMAIN")]
    admin_domain: Option<String>,

    #[clap(long, default_value = "cluster.local")]
    cluster_domain: String,

    /// A fixed network for the API server, in place of discovering its
    /// addresses.
    #[clap(long, env = "UDS_KUBEAPI_CIDR")]
    kube_api_cidr: Option<Cidr>,

    #[clap(long, default_value = "istio-egress-gateway")]
    egress_gateway_namespace: String,

    #[clap(long, default_value = "egressgateway")]
    egress_gateway_service: String,

    #[clap(long, default_value = "uds-package-controller")]
    field_manager: String,

    /// The number of failed attempts after which a package generation is
    /// marked `Failed`.
    #[clap(long, default_value = "5")]
    max_retries: u32,

    #[clap(long, default_value = "5000")]
    patch_timeout_ms: u64,
}

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            admin,
            client,
            log_level,
            log_format,
            domain,
            admin_domain,
            cluster_domain,
            kube_api_cidr,
            egress_gateway_namespace,
            egress_gateway_service,
            field_manager,
            max_retries,
            patch_timeout_ms,
        } = self;

        let admin_domain = admin_domain.unwrap_or_else(|| format!("admin.{domain}"));
        let cluster_info = ClusterInfo {
            domain,
            admin_domain,
            dns_domain: cluster_domain,
            egress_namespace: egress_gateway_namespace,
            egress_service: egress_gateway_service,
        };

        let mut prom = <Registry>::default();
        let metrics = ReconcileMetrics::register(prom.sub_registry_with_prefix("package"));
        let rt_metrics = kubert::RuntimeMetrics::register(prom.sub_registry_with_prefix("kube"));

        let runtime = kubert::Runtime::builder()
            .with_log(log_level, log_format)
            .with_metrics(rt_metrics)
            .with_admin(admin.into_builder().with_prometheus(prom))
            .with_client(client)
            .build()
            .await?;

        let client = runtime.client();
        warn_if_missing::<Gateway>(&client).await;
        warn_if_missing::<VirtualService>(&client).await;
        warn_if_missing::<ServiceEntry>(&client).await;
        warn_if_missing::<Sidecar>(&client).await;

        // Shared egress objects from an earlier process carry smaller
        // generations than any this process writes.
        let egress_generation = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();

        let cluster = KubeCluster::new(
            client.clone(),
            field_manager,
            Duration::from_millis(patch_timeout_ms),
        );
        let reconciler = Reconciler::new(
            cluster,
            cluster_info,
            KubeApiPeers::new(kube_api_cidr),
            SharedEgress::new(egress_generation),
            metrics,
        )
        .with_max_retries(max_retries);

        match Api::<Package>::all(client.clone())
            .list(&ListParams::default())
            .await
        {
            Ok(packages) => reconciler.restore(&packages.items).await,
            Err(error) => {
                tracing::warn!(%error, "Failed to list packages; shared egress starts empty")
            }
        }

        tokio::spawn(
            controller::run(client, reconciler, runtime.shutdown_handle())
                .instrument(info_span!("packages")),
        );

        // Block the main thread on the shutdown signal. Once it fires, wait for the background tasks to
        // complete before exiting.
        if runtime.run().await.is_err() {
            bail!("Aborted");
        }

        Ok(())
    }
}

async fn warn_if_missing<T>(client: &Client)
where
    T: Resource,
    T::DynamicType: Default,
{
    let dt = Default::default();
    let exists = client
        .list_api_group_resources(&T::api_version(&dt))
        .await
        .ok()
        .iter()
        .flat_map(|r| r.resources.iter())
        .any(|r| r.kind == T::kind(&dt));
    if !exists {
        tracing::warn!(
            kind = %T::kind(&dt),
            "Istio resource kind not found; packages will fail to reconcile"
        );
    }
}
