//! Pure synthesis of the cluster objects derived from a `Package`.
//!
//! Nothing in this crate talks to the API server: every function maps a
//! package (plus cluster configuration) onto the exact set of objects that
//! should exist, named and labelled so that re-applying them is idempotent
//! and stale ones can be found by their generation label.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod cluster_info;
pub mod egress;
pub mod names;
pub mod network;
mod owner;
pub mod routes;

pub use self::{cluster_info::ClusterInfo, names::sanitize_resource_name, owner::Owner};
pub use uds_package_controller_k8s_api as k8s;
