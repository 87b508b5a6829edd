#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod cidr;
pub mod istio;
pub mod labels;
pub mod package;

pub use self::{
    cidr::Cidr,
    labels::Labels,
    package::{Package, PackageSpec, PackageStatus},
};
pub use k8s_openapi::{
    api::{
        self,
        core::v1::{Namespace, Service, ServicePort, ServiceSpec},
        networking::v1::{
            IPBlock, NetworkPolicy, NetworkPolicyEgressRule, NetworkPolicyIngressRule,
            NetworkPolicyPeer, NetworkPolicyPort, NetworkPolicySpec,
        },
    },
    apimachinery::pkg::{
        apis::meta::v1::{LabelSelector, OwnerReference},
        util::intstr::IntOrString,
    },
    NamespaceResourceScope,
};
pub use kube::{
    api::{Api, DeleteParams, ListParams, ObjectMeta, Patch, PatchParams, ResourceExt},
    runtime::watcher,
    Client, Error, Resource,
};

/// Label carrying the name of the package that owns a generated object.
pub const PACKAGE_LABEL: &str = "uds/package";

/// Label carrying the generation an object was last written for.
pub const GENERATION_LABEL: &str = "uds/generation";

/// Label naming the peer generator of a custom network policy.
pub const GENERATED_LABEL: &str = "uds/generated";

pub const DESCRIPTION_ANNOTATION: &str = "uds/description";
