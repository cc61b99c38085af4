//! Maintains a local mirror of the cluster resources that feed the proxy configuration.
//!
//! Watches are driven by `kubert::index`, which calls into [`Index`] for every applied, deleted,
//! or re-listed resource. The index updates its [`Cache`], decides whether the change can affect
//! the proxy configuration and, if so, asks the work queue for a recompute. The queue's worker
//! then calls [`resolve`] against a consistent snapshot of the cache.

#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

mod cache;
mod event;
mod index;
mod metrics;
mod reference;
mod resolve;
mod tls;

#[cfg(test)]
mod tests;

pub use self::{
    cache::{Cache, Store},
    event::{Change, Deleted, Notification},
    index::{Index, SharedIndex},
    metrics::IndexMetrics,
    reference::is_relevant,
    resolve::{resolve, ResolveError},
    tls::{TlsError, TlsResolver},
};
use h2_ingress_k8s_api::{self as k8s, ResourceId};
use std::path::PathBuf;

/// Settings that decide which resources the controller cares about.
#[derive(Clone, Debug)]
pub struct Config {
    /// Serves requests that match no rule.
    pub default_backend_service: ResourceId,

    /// The credential presented when no SNI-specific credential matches.
    pub default_tls_secret: Option<ResourceId>,

    /// Ingresses asking for another class are ignored.
    pub ingress_class: String,

    /// Holds free-form proxy tuning options.
    pub proxy_config_map: Option<ResourceId>,

    /// Where TLS material is materialized for the proxy.
    pub conf_dir: PathBuf,
}

impl Config {
    /// Returns true if the Ingress is unclassed or asks for this controller's class.
    pub fn class_in_scope(&self, ingress: &k8s::Ingress) -> bool {
        let class = k8s::ingress_class(ingress);
        class.is_empty() || class == self.ingress_class
    }
}
