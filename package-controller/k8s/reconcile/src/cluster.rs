use crate::{Error, Result};
use k8s::{
    Api, Client, DeleteParams, Labels, ListParams, Namespace, NamespaceResourceScope, Package,
    PackageStatus, Patch, PatchParams, Resource, Service,
};
use serde::{de::DeserializeOwned, Serialize};
use std::{fmt::Debug, time::Duration};
use uds_package_controller_k8s_api as k8s;

/// A namespaced resource this controller writes.
pub trait Managed:
    Resource<Scope = NamespaceResourceScope, DynamicType = ()>
    + Clone
    + Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
}

impl<K> Managed for K where
    K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
        + Clone
        + Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static
{
}

/// The cluster operations reconciliation depends on.
#[async_trait::async_trait]
pub trait Cluster: Send + Sync + 'static {
    /// Applies the object with server-side apply, taking ownership of any
    /// conflicting fields.
    async fn apply<K: Managed>(&self, obj: &K) -> Result<()>;

    /// Lists objects matching `labels`, in a single namespace or across all
    /// of them.
    async fn list<K: Managed>(&self, namespace: Option<&str>, labels: &Labels) -> Result<Vec<K>>;

    /// Deletes an object. Deleting an object that does not exist succeeds.
    async fn delete<K: Managed>(&self, namespace: &str, name: &str) -> Result<()>;

    async fn namespace(&self, name: &str) -> Result<Option<Namespace>>;

    async fn service(&self, namespace: &str, name: &str) -> Result<Option<Service>>;

    /// The addresses the API server advertises to clients, as `host:port`.
    async fn api_server_addresses(&self) -> Result<Vec<String>>;

    async fn patch_package_status(
        &self,
        namespace: &str,
        name: &str,
        status: &PackageStatus,
    ) -> Result<()>;
}

/// A [`Cluster`] backed by the Kubernetes API.
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
    field_manager: String,
    patch_timeout: Duration,
}

// === impl KubeCluster ===

impl KubeCluster {
    pub fn new(client: Client, field_manager: impl ToString, patch_timeout: Duration) -> Self {
        Self {
            client,
            field_manager: field_manager.to_string(),
            patch_timeout,
        }
    }

    fn api<K: Managed>(&self, namespace: Option<&str>) -> Api<K> {
        match namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        }
    }
}

#[async_trait::async_trait]
impl Cluster for KubeCluster {
    async fn apply<K: Managed>(&self, obj: &K) -> Result<()> {
        let meta = obj.meta();
        let name = meta.name.as_deref().ok_or(Error::MissingMetadata("name"))?;
        let ns = meta
            .namespace
            .as_deref()
            .ok_or(Error::MissingMetadata("namespace"))?;

        let params = PatchParams::apply(&self.field_manager).force();
        self.api::<K>(Some(ns))
            .patch(name, &params, &Patch::Apply(obj))
            .await?;
        tracing::debug!(kind = %K::kind(&()), namespace = %ns, %name, "Applied");
        Ok(())
    }

    async fn list<K: Managed>(&self, namespace: Option<&str>, labels: &Labels) -> Result<Vec<K>> {
        let params = ListParams::default().labels(&labels.to_selector());
        let list = self.api::<K>(namespace).list(&params).await?;
        Ok(list.items)
    }

    async fn delete<K: Managed>(&self, namespace: &str, name: &str) -> Result<()> {
        match self
            .api::<K>(Some(namespace))
            .delete(name, &DeleteParams::default())
            .await
        {
            Ok(_) => {}
            Err(kube::Error::Api(rsp)) if rsp.code == 404 => {}
            Err(error) => return Err(error.into()),
        }
        tracing::debug!(kind = %K::kind(&()), %namespace, %name, "Deleted");
        Ok(())
    }

    async fn namespace(&self, name: &str) -> Result<Option<Namespace>> {
        let ns = Api::<Namespace>::all(self.client.clone())
            .get_opt(name)
            .await?;
        Ok(ns)
    }

    async fn service(&self, namespace: &str, name: &str) -> Result<Option<Service>> {
        let svc = Api::<Service>::namespaced(self.client.clone(), namespace)
            .get_opt(name)
            .await?;
        Ok(svc)
    }

    async fn api_server_addresses(&self) -> Result<Vec<String>> {
        let versions = self.client.list_core_api_versions().await?;
        Ok(versions
            .server_address_by_client_cidrs
            .into_iter()
            .map(|addr| addr.server_address)
            .collect())
    }

    async fn patch_package_status(
        &self,
        namespace: &str,
        name: &str,
        status: &PackageStatus,
    ) -> Result<()> {
        let api = Api::<Package>::namespaced(self.client.clone(), namespace);
        let patch = make_patch(name, status);
        match tokio::time::timeout(
            self.patch_timeout,
            api.patch_status(name, &PatchParams::default(), &patch),
        )
        .await
        {
            Ok(res) => {
                res?;
                Ok(())
            }
            Err(_) => Err(Error::StatusTimeout {
                namespace: namespace.to_string(),
                name: name.to_string(),
            }),
        }
    }
}

pub(crate) fn make_patch(name: &str, status: &PackageStatus) -> Patch<serde_json::Value> {
    let value = serde_json::json!({
        "apiVersion": Package::api_version(&()),
        "kind": Package::kind(&()),
        "name": name,
        "status": status,
    });
    Patch::Merge(value)
}
