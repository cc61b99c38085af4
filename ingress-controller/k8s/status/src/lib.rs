//! Keeps the `status.loadBalancer` of served Ingresses in line with where the proxy runs.
//!
//! Every replica publishes independently; there is no leader. Syncs are jittered so replicas
//! do not write at the same moment, and on shutdown each replica withdraws only its own
//! address.

#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

mod address;
mod api;
mod metrics;
mod reconcile;


pub use self::{
    address::{load_balancer_ingress, node_address, pod_address, service_addresses, AddressError},
    api::{KubeStatusApi, StatusApi},
    metrics::StatusMetrics,
    reconcile::{Reconciler, StatusConfig},
};
