use crate::{
    cidr::Cidr,
    istio::virtual_service::{HttpMatchRequest, HttpRetry, HttpRewrite},
    labels::Map,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{CustomResource, Resource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt};

/// Declares what a tenant application exposes through the mesh gateways and
/// which traffic it is allowed to send and receive.
#[derive(Clone, Debug, Default, PartialEq, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "uds.dev",
    version = "v1alpha1",
    kind = "Package",
    plural = "packages",
    shortname = "pkg",
    status = "PackageStatus",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct PackageSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<Network>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Network {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub expose: Vec<Expose>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allow: Vec<Allow>,

    /// External hosts this package sends traffic to, keyed by host name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub egress: BTreeMap<String, Vec<EgressPort>>,

    #[serde(default)]
    pub defaults: Defaults,
}

/// Toggles for the baseline policies every package receives.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Defaults {
    #[serde(default = "enabled")]
    pub allow_dns: bool,

    #[serde(default = "enabled")]
    pub allow_intra_namespace: bool,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Allow {
    pub direction: Direction,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Extra labels set on the generated policy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<Map>,

    /// Pods in the package namespace the rule applies to. Unset selects all
    /// pods.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<Map>,

    /// `*` or an empty string selects every namespace.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_namespace: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_selector: Option<Map>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_generated: Option<RemoteGenerated>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_cidr: Option<Cidr>,

    /// An external host reached through the egress gateway.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_host: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_protocol: Option<RemoteProtocol>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ports: Option<Vec<u16>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<Protocol>,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Expose {
    #[serde(default)]
    pub gateway: Gateway,

    /// The host name, prefixed to the gateway's domain.
    pub host: String,

    pub service: String,

    pub port: u16,

    /// The container port, when it differs from the service port.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_port: Option<u16>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<Map>,

    #[serde(default)]
    pub mode: RouteMode,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub r#match: Vec<HttpMatchRequest>,

    #[serde(
        default,
        rename = "advancedHTTP",
        skip_serializing_if = "Option::is_none"
    )]
    pub advanced_http: Option<AdvancedHttp>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AdvancedHttp {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub r#match: Vec<HttpMatchRequest>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rewrite: Option<HttpRewrite>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retries: Option<HttpRetry>,
}

/// A port/protocol pair on an external host.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EgressPort {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    #[serde(default)]
    pub protocol: RemoteProtocol,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Deserialize, Serialize, JsonSchema)]
pub enum Direction {
    Ingress,
    Egress,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Deserialize, Serialize, JsonSchema)]
pub enum RemoteGenerated {
    #[serde(rename = "KubeAPI")]
    KubeApi,
    KubeNodes,
    IntraNamespace,
    CloudMetadata,
    Anywhere,
}

#[derive(
    Copy, Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize, JsonSchema,
)]
pub enum RemoteProtocol {
    #[default]
    #[serde(rename = "TLS")]
    Tls,
    #[serde(rename = "HTTP")]
    Http,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Deserialize, Serialize, JsonSchema)]
pub enum Protocol {
    #[default]
    #[serde(rename = "TCP")]
    Tcp,
    #[serde(rename = "UDP")]
    Udp,
    #[serde(rename = "SCTP")]
    Sctp,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Gateway {
    Admin,
    #[default]
    Tenant,
    Passthrough,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum RouteMode {
    #[default]
    Http,
    Tcp,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PackageStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<Phase>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_attempt: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoints: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_policy_count: Option<u32>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub enum Phase {
    Pending,
    Ready,
    Failed,
    Retrying,
    Removing,
    RemovalFailed,
}

fn enabled() -> bool {
    true
}

// === impl Package ===

impl Package {
    /// The generation of the spec, as written to the `uds/generation` label.
    pub fn generation_label(&self) -> String {
        self.metadata.generation.unwrap_or(0).to_string()
    }

    /// Identifies the package across namespaces, e.g. `app-tenant`.
    pub fn id(&self) -> String {
        format!(
            "{}-{}",
            self.name_any(),
            self.namespace().unwrap_or_default()
        )
    }

    /// References the package as the (non-controlling) owner of a generated
    /// object so that deleting the package cascades.
    pub fn owner_references(&self) -> Vec<OwnerReference> {
        self.owner_ref(&()).into_iter().collect()
    }

    pub fn network(&self) -> Option<&Network> {
        self.spec.network.as_ref()
    }

    pub fn allow(&self) -> &[Allow] {
        self.network().map(|n| n.allow.as_slice()).unwrap_or_default()
    }

    pub fn expose(&self) -> &[Expose] {
        self.network().map(|n| n.expose.as_slice()).unwrap_or_default()
    }

    pub fn defaults(&self) -> Defaults {
        self.network().map(|n| n.defaults.clone()).unwrap_or_default()
    }

    /// Returns true if this generation has already been reconciled.
    pub fn is_reconciled(&self) -> bool {
        self.status.as_ref().is_some_and(|status| {
            status.phase == Some(Phase::Ready)
                && status.observed_generation.is_some()
                && status.observed_generation == self.metadata.generation
        })
    }

    pub fn retry_attempt(&self) -> u32 {
        self.status
            .as_ref()
            .and_then(|s| s.retry_attempt)
            .unwrap_or(0)
    }
}

// === impl Defaults ===

impl Default for Defaults {
    fn default() -> Self {
        Self {
            allow_dns: true,
            allow_intra_namespace: true,
        }
    }
}

// === impl Expose ===

impl Expose {
    /// Matches declared on the expose entry, preferring the advanced block.
    pub fn matches(&self) -> &[HttpMatchRequest] {
        match self.advanced_http.as_ref() {
            Some(advanced) if !advanced.r#match.is_empty() => &advanced.r#match,
            _ => &self.r#match,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ingress => f.write_str("Ingress"),
            Self::Egress => f.write_str("Egress"),
        }
    }
}

impl fmt::Display for RemoteGenerated {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::KubeApi => f.write_str("KubeAPI"),
            Self::KubeNodes => f.write_str("KubeNodes"),
            Self::IntraNamespace => f.write_str("IntraNamespace"),
            Self::CloudMetadata => f.write_str("CloudMetadata"),
            Self::Anywhere => f.write_str("Anywhere"),
        }
    }
}

impl fmt::Display for RemoteProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tls => f.write_str("TLS"),
            Self::Http => f.write_str("HTTP"),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp => f.write_str("TCP"),
            Self::Udp => f.write_str("UDP"),
            Self::Sctp => f.write_str("SCTP"),
        }
    }
}

impl fmt::Display for Gateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Admin => f.write_str("admin"),
            Self::Tenant => f.write_str("tenant"),
            Self::Passthrough => f.write_str("passthrough"),
        }
    }
}
