//! Core types shared by the ingress controller crates.
//!
//! The [`IngressConfig`] is the model handed to the proxy on every recompute. It is built from
//! scratch by the resolver, passed to a [`ProxyManager`], and then dropped: nothing in the
//! controller mutates a model in place once it has been handed off.

#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod queue;
pub mod rate_limit;
mod tls;
mod upstream;

pub use self::{
    tls::{PemFile, TlsCred},
    upstream::{Affinity, InvalidAffinity, InvalidProtocol, Protocol, Upstream, UpstreamServer},
};
use anyhow::Result;
use serde::Serialize;
use std::collections::BTreeMap;

/// The name of the upstream that catches requests no rule matches.
pub const DEFAULT_HOST: &str = "";
pub const DEFAULT_PATH: &str = "/";

/// A complete proxy configuration.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngressConfig {
    /// Whether the proxy terminates TLS at all.
    pub tls: bool,

    pub default_tls_cred: Option<TlsCred>,

    /// Additional credentials selected by SNI. Sorted and unique by name; never contains the
    /// default credential.
    pub sub_tls_creds: Vec<TlsCred>,

    /// Sorted by name. Exactly one upstream is the default (empty host, `/` path).
    pub upstreams: Vec<Upstream>,

    /// Free-form proxy tuning options.
    pub options: BTreeMap<String, String>,
}

/// Applies configurations to a proxy process.
#[async_trait::async_trait]
pub trait ProxyManager: Send + Sync {
    /// Merges tuning options into a freshly resolved configuration.
    fn read_config(&self, config: &mut IngressConfig, options: &BTreeMap<String, String>) {
        config.options = options.clone();
    }

    /// Applies `config` if it differs from what the proxy currently runs.
    ///
    /// Returns `true` if the proxy was reloaded.
    async fn check_and_reload(&self, config: &IngressConfig) -> Result<bool>;
}

// === impl IngressConfig ===

impl IngressConfig {
    pub fn default_upstream(&self) -> Option<&Upstream> {
        self.upstreams.iter().find(|u| u.is_default())
    }

    /// Iterates over all TLS credentials, starting with the default.
    pub fn tls_creds(&self) -> impl Iterator<Item = &TlsCred> {
        self.default_tls_cred.iter().chain(self.sub_tls_creds.iter())
    }
}
