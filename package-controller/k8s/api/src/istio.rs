//! The subset of the Istio networking API this controller writes and
//! inspects. Fields that are never read or written are omitted so that
//! objects created by other actors still deserialize.

pub mod gateway;
pub mod service_entry;
pub mod sidecar;
pub mod virtual_service;

pub use self::{
    gateway::{Gateway, GatewaySpec},
    service_entry::{ServiceEntry, ServiceEntrySpec},
    sidecar::{Sidecar, SidecarSpec},
    virtual_service::{VirtualService, VirtualServiceSpec},
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub const GROUP: &str = "networking.istio.io";

/// A named, protocol-tagged port as used by Gateway servers and
/// ServiceEntries.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Port {
    pub number: u16,

    #[serde(default)]
    pub protocol: String,

    #[serde(default)]
    pub name: String,
}
