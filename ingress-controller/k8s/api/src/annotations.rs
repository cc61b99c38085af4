//! Per-Ingress overrides carried in annotations.
//!
//! Each annotation holds a JSON or YAML document. A `default-*` annotation provides values that
//! apply to every entry that does not set them itself.

use crate::duration::Timeout;
use serde::{de, Deserialize, Deserializer};
use std::{collections::BTreeMap, fmt};

pub const BACKEND_CONFIG: &str = "ingress.h2-ingress.io/backend-config";
pub const DEFAULT_BACKEND_CONFIG: &str = "ingress.h2-ingress.io/default-backend-config";
pub const PATH_CONFIG: &str = "ingress.h2-ingress.io/path-config";
pub const DEFAULT_PATH_CONFIG: &str = "ingress.h2-ingress.io/default-path-config";

#[derive(Debug, thiserror::Error)]
#[error("invalid {key} annotation: {source}")]
pub struct AnnotationError {
    pub key: &'static str,
    #[source]
    pub source: serde_yaml::Error,
}

/// Backend settings for one service port. Protocol and affinity names are validated when the
/// backend is resolved.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortBackendConfig {
    pub proto: Option<String>,
    pub tls: Option<bool>,
    pub sni: Option<String>,
    pub dns: Option<bool>,
    pub affinity: Option<String>,
}

/// Settings for a single `host/path` route.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathConfig {
    pub read_timeout: Option<Timeout>,
    pub write_timeout: Option<Timeout>,
    #[serde(rename = "redirectIfNotTLS")]
    pub redirect_if_not_tls: Option<bool>,
}

/// Maps a service name and a backend port (as written in the Ingress) to its settings.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BackendConfigMapper {
    pub default: Option<PortBackendConfig>,
    pub mapping: BTreeMap<String, BTreeMap<String, PortBackendConfig>>,
}

/// Maps a `host/path` key to its route settings.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PathConfigMapper {
    pub default: Option<PathConfig>,
    pub mapping: BTreeMap<String, PathConfig>,
}

/// A map key that YAML may render as an integer, as in `80: {proto: h2}`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
struct PortKey(String);

// === impl PortBackendConfig ===

impl PortBackendConfig {
    /// Fills every unset field from `defaults`.
    pub fn merge(&mut self, defaults: &Self) {
        fn fill<T: Clone>(field: &mut Option<T>, default: &Option<T>) {
            if field.is_none() {
                field.clone_from(default);
            }
        }
        fill(&mut self.proto, &defaults.proto);
        fill(&mut self.tls, &defaults.tls);
        fill(&mut self.sni, &defaults.sni);
        fill(&mut self.dns, &defaults.dns);
        fill(&mut self.affinity, &defaults.affinity);
    }
}

// === impl PathConfig ===

impl PathConfig {
    pub fn merge(&mut self, defaults: &Self) {
        self.read_timeout = self.read_timeout.or(defaults.read_timeout);
        self.write_timeout = self.write_timeout.or(defaults.write_timeout);
        self.redirect_if_not_tls = self.redirect_if_not_tls.or(defaults.redirect_if_not_tls);
    }
}

// === impl BackendConfigMapper ===

impl BackendConfigMapper {
    pub fn from_annotations(
        annotations: &BTreeMap<String, String>,
    ) -> Result<Self, AnnotationError> {
        let default = parse::<PortBackendConfig>(annotations, DEFAULT_BACKEND_CONFIG)?;
        let raw = parse::<BTreeMap<String, BTreeMap<PortKey, PortBackendConfig>>>(
            annotations,
            BACKEND_CONFIG,
        )?
        .unwrap_or_default();

        let mapping = raw
            .into_iter()
            .map(|(svc, ports)| {
                let ports = ports
                    .into_iter()
                    .map(|(PortKey(port), mut config)| {
                        if let Some(default) = default.as_ref() {
                            config.merge(default);
                        }
                        (port, config)
                    })
                    .collect();
                (svc, ports)
            })
            .collect();

        Ok(Self { default, mapping })
    }

    /// Returns the settings for `service` on `port`, falling back to the annotation default.
    pub fn config_for(&self, service: &str, port: &str) -> PortBackendConfig {
        self.mapping
            .get(service)
            .and_then(|ports| ports.get(port))
            .or(self.default.as_ref())
            .cloned()
            .unwrap_or_default()
    }
}

// === impl PathConfigMapper ===

impl PathConfigMapper {
    pub fn from_annotations(
        annotations: &BTreeMap<String, String>,
    ) -> Result<Self, AnnotationError> {
        let default = parse::<PathConfig>(annotations, DEFAULT_PATH_CONFIG)?;
        let raw = parse::<BTreeMap<String, PathConfig>>(annotations, PATH_CONFIG)?
            .unwrap_or_default();

        let mapping = raw
            .into_iter()
            .map(|(key, mut config)| {
                if let Some(default) = default.as_ref() {
                    config.merge(default);
                }
                // A bare host applies to the host's root path.
                let key = if key.contains('/') {
                    key
                } else {
                    format!("{key}/")
                };
                (key, config)
            })
            .collect();

        Ok(Self { default, mapping })
    }

    pub fn config_for(&self, host: &str, path: &str) -> PathConfig {
        self.mapping
            .get(&format!("{host}{path}"))
            .or(self.default.as_ref())
            .cloned()
            .unwrap_or_default()
    }
}

fn parse<T: de::DeserializeOwned>(
    annotations: &BTreeMap<String, String>,
    key: &'static str,
) -> Result<Option<T>, AnnotationError> {
    let Some(value) = annotations.get(key).filter(|v| !v.trim().is_empty()) else {
        return Ok(None);
    };

    if let Ok(parsed) = serde_json::from_str(value) {
        return Ok(Some(parsed));
    }
    serde_yaml::from_str(value)
        .map(Some)
        .map_err(|source| AnnotationError { key, source })
}

// === impl PortKey ===

impl<'de> Deserialize<'de> for PortKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct Visitor;

        impl de::Visitor<'_> for Visitor {
            type Value = PortKey;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a port number or name")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<PortKey, E> {
                Ok(PortKey(v.to_string()))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<PortKey, E> {
                Ok(PortKey(v.to_string()))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<PortKey, E> {
                Ok(PortKey(v.to_string()))
            }
        }

        deserializer.deserialize_any(Visitor)
    }
}
