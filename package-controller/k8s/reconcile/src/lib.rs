//! Applies the objects synthesized for a `Package` to the cluster and
//! removes those it no longer wants.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod cluster;
pub mod egress;
mod error;
mod kube_api;
mod metrics;
pub mod network;
mod orphans;
mod reconciler;
pub mod routes;
mod status;


pub use self::{
    cluster::{Cluster, KubeCluster, Managed},
    egress::SharedEgress,
    error::{Error, Result},
    kube_api::KubeApiPeers,
    metrics::ReconcileMetrics,
    orphans::purge_orphans,
    reconciler::Reconciler,
};
