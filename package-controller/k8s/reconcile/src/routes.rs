use crate::{Cluster, Result};
use uds_package_controller_core::{
    routes::{self, ExposeRoutes},
    ClusterInfo, Owner,
};
use uds_package_controller_k8s_api::Package;

/// Applies a VirtualService and ServiceEntry for each expose entry.
/// Returns the exposed hosts.
pub async fn reconcile<C: Cluster>(
    cluster: &C,
    pkg: &Package,
    owner: &Owner,
    info: &ClusterInfo,
) -> Result<Vec<String>> {
    let mut endpoints = Vec::new();
    for ExposeRoutes {
        fqdn,
        virtual_service,
        service_entry,
    } in routes::routes(pkg, owner, info)
    {
        cluster.apply(&virtual_service).await?;
        cluster.apply(&service_entry).await?;
        if !endpoints.contains(&fqdn) {
            endpoints.push(fqdn);
        }
    }
    Ok(endpoints)
}
