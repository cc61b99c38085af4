use serde::Serialize;
use std::path::PathBuf;

/// A PEM file as it is materialized for the proxy.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PemFile {
    pub path: PathBuf,

    /// Hex-encoded SHA-256 of the file contents.
    pub checksum: String,
}

/// A validated certificate and private key pair.
///
/// The name is derived from the originating Secret, so resolving the same Secret twice yields the
/// same identity and the same paths.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TlsCred {
    pub name: String,
    pub key: PemFile,
    pub cert: PemFile,

    #[serde(skip)]
    pub key_pem: Vec<u8>,

    #[serde(skip)]
    pub cert_pem: Vec<u8>,
}
