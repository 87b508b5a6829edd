#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub use uds_package_controller_core as core;
pub use uds_package_controller_k8s_api as k8s;
pub use uds_package_controller_k8s_reconcile as reconcile;

mod args;
mod controller;

pub use self::{args::Args, controller::FINALIZER};
