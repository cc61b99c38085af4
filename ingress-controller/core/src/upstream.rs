use serde::Serialize;
use std::{fmt, str::FromStr, time::Duration};

/// The application protocol spoken to a backend.
#[derive(Copy, Clone, Debug, Default, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum Protocol {
    #[serde(rename = "h2")]
    H2,
    #[default]
    #[serde(rename = "http/1.1")]
    Http1,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("unsupported backend protocol: {0:?}")]
pub struct InvalidProtocol(pub String);

/// Session affinity for a backend group.
#[derive(Copy, Clone, Debug, Default, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Affinity {
    #[default]
    None,
    Ip,
    Cookie,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("unsupported session affinity: {0:?}")]
pub struct InvalidAffinity(pub String);

/// A single backend address.
#[derive(Clone, Debug, Hash, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpstreamServer {
    pub address: String,
    pub port: u16,
    pub protocol: Protocol,
    pub tls: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sni: Option<String>,
    pub dns: bool,
    pub affinity: Affinity,
}

/// A routable destination group: a host and path prefix served by a set of backends.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Upstream {
    pub name: String,
    pub host: String,
    pub path: String,
    pub redirect_if_not_tls: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_timeout: Option<Duration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub write_timeout: Option<Duration>,
    pub backends: Vec<UpstreamServer>,
}

// === impl Protocol ===

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::H2 => "h2",
            Self::Http1 => "http/1.1",
        }
    }
}

impl FromStr for Protocol {
    type Err = InvalidProtocol;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "h2" => Ok(Self::H2),
            "http/1.1" => Ok(Self::Http1),
            s => Err(InvalidProtocol(s.to_string())),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// === impl Affinity ===

impl FromStr for Affinity {
    type Err = InvalidAffinity;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "none" => Ok(Self::None),
            "ip" => Ok(Self::Ip),
            "cookie" => Ok(Self::Cookie),
            s => Err(InvalidAffinity(s.to_string())),
        }
    }
}

// === impl UpstreamServer ===

impl UpstreamServer {
    /// A plain HTTP/1.1 backend.
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
            protocol: Protocol::Http1,
            tls: false,
            sni: None,
            dns: false,
            affinity: Affinity::None,
        }
    }

    /// The backend used when nothing else can serve the default route.
    pub fn placeholder() -> Self {
        Self::new("127.0.0.1", 8181)
    }
}

// === impl Upstream ===

impl Upstream {
    pub fn is_default(&self) -> bool {
        self.host == crate::DEFAULT_HOST && self.path == crate::DEFAULT_PATH
    }

    /// Sorts backends by address and port, dropping duplicate address:port pairs.
    ///
    /// When duplicates carry different settings, the first one in input order wins.
    pub fn normalize_backends(&mut self) {
        self.backends
            .sort_by(|a, b| (a.address.as_str(), a.port).cmp(&(b.address.as_str(), b.port)));
        self.backends
            .dedup_by(|b, a| a.address == b.address && a.port == b.port);
    }
}
