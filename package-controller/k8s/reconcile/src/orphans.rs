use crate::{Cluster, Managed, Result};
use uds_package_controller_k8s_api::{Labels, ResourceExt, GENERATION_LABEL};

/// Deletes the objects selected by `selector` that were not written at
/// `generation`. Returns the number of objects deleted.
pub async fn purge_orphans<K: Managed, C: Cluster>(
    cluster: &C,
    namespace: &str,
    selector: &Labels,
    generation: &str,
) -> Result<usize> {
    let objects = cluster.list::<K>(Some(namespace), selector).await?;

    let mut deleted = 0;
    for obj in objects {
        if obj.labels().get(GENERATION_LABEL).map(String::as_str) == Some(generation) {
            continue;
        }
        let name = obj.name_any();
        tracing::debug!(kind = %K::kind(&()), %namespace, %name, "Deleting orphan");
        cluster.delete::<K>(namespace, &name).await?;
        deleted += 1;
    }

    Ok(deleted)
}
