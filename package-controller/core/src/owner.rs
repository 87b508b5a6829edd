use crate::k8s::{
    labels::Map, ObjectMeta, OwnerReference, Package, ResourceExt, GENERATION_LABEL,
    PACKAGE_LABEL,
};

/// Identifies the package that objects are generated for, and the
/// generation they are generated at.
#[derive(Clone, Debug, PartialEq)]
pub struct Owner {
    pub name: String,
    pub namespace: String,
    pub generation: String,
    pub references: Vec<OwnerReference>,
}

impl Owner {
    /// Describes objects generated for `pkg` into `namespace`.
    pub fn new(pkg: &Package, namespace: impl Into<String>) -> Self {
        Self {
            name: pkg.name_any(),
            namespace: namespace.into(),
            generation: pkg.generation_label(),
            references: pkg.owner_references(),
        }
    }

    /// Labels that select every object owned by the package, regardless of
    /// generation.
    pub fn selector(&self) -> Map {
        Some((PACKAGE_LABEL.to_string(), self.name.clone()))
            .into_iter()
            .collect()
    }

    pub fn labels(&self) -> Map {
        let mut labels = self.selector();
        labels.insert(GENERATION_LABEL.to_string(), self.generation.clone());
        labels
    }

    /// Metadata for an owned object named `name` in the package namespace.
    pub fn metadata(&self, name: impl Into<String>) -> ObjectMeta {
        ObjectMeta {
            name: Some(name.into()),
            namespace: Some(self.namespace.clone()),
            labels: Some(self.labels()),
            owner_references: Some(self.references.clone()),
            ..Default::default()
        }
    }
}
