use crate::k8s::{self, ResourceId};
use h2_ingress_core::{PemFile, TlsCred};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

const CERT_KEY: &str = "tls.crt";
const KEY_KEY: &str = "tls.key";

/// Validates TLS Secrets and describes where their material is materialized.
#[derive(Clone, Debug)]
pub struct TlsResolver {
    tls_dir: PathBuf,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TlsError {
    #[error("secret {0} not found")]
    NotFound(ResourceId),

    #[error("secret {0} has no tls.crt")]
    MissingCertificate(ResourceId),

    #[error("secret {0} has no tls.key")]
    MissingKey(ResourceId),

    #[error("secret {secret} has no valid certificate: {reason}")]
    InvalidCertificate { secret: ResourceId, reason: String },

    #[error("certificate in secret {0} names no subject or DNS names")]
    NoNames(ResourceId),

    #[error("secret {secret} has no valid private key: {reason}")]
    InvalidKey { secret: ResourceId, reason: String },
}

impl TlsResolver {
    pub fn new(conf_dir: &Path) -> Self {
        Self {
            tls_dir: conf_dir.join("tls"),
        }
    }

    /// Looks up and validates the Secret `id`.
    pub fn resolve_id(
        &self,
        secrets: &crate::Store<k8s::Secret>,
        id: &ResourceId,
    ) -> Result<TlsCred, TlsError> {
        let secret = secrets
            .get(id)
            .ok_or_else(|| TlsError::NotFound(id.clone()))?;
        self.resolve(id, secret)
    }

    pub fn resolve(&self, id: &ResourceId, secret: &k8s::Secret) -> Result<TlsCred, TlsError> {
        let data = secret.data.as_ref();
        let cert = data
            .and_then(|d| d.get(CERT_KEY))
            .ok_or_else(|| TlsError::MissingCertificate(id.clone()))?;
        let key = data
            .and_then(|d| d.get(KEY_KEY))
            .ok_or_else(|| TlsError::MissingKey(id.clone()))?;

        let names = certificate_names(&cert.0).map_err(|reason| TlsError::InvalidCertificate {
            secret: id.clone(),
            reason,
        })?;
        if names.is_empty() {
            return Err(TlsError::NoNames(id.clone()));
        }
        check_private_key(&key.0).map_err(|reason| TlsError::InvalidKey {
            secret: id.clone(),
            reason,
        })?;

        let stem = format!("{}_{}", id.namespace, id.name);
        Ok(TlsCred {
            name: id.to_string(),
            key: PemFile {
                path: self.tls_dir.join(format!("{stem}.key")),
                checksum: checksum(&key.0),
            },
            cert: PemFile {
                path: self.tls_dir.join(format!("{stem}.crt")),
                checksum: checksum(&cert.0),
            },
            key_pem: key.0.clone(),
            cert_pem: cert.0.clone(),
        })
    }
}

/// Parses every certificate in a PEM bundle, returning the subject common names and DNS
/// alternative names they carry.
fn certificate_names(pem: &[u8]) -> Result<Vec<String>, String> {
    let ders = rustls_pemfile::certs(&mut &*pem)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| e.to_string())?;
    if ders.is_empty() {
        return Err("no PEM-encoded certificate".to_string());
    }

    let mut names = Vec::new();
    for der in &ders {
        let (_, cert) = x509_parser::parse_x509_certificate(der.as_ref())
            .map_err(|e| format!("failed to parse certificate: {e}"))?;

        names.extend(
            cert.subject()
                .iter_common_name()
                .filter_map(|cn| cn.as_str().ok())
                .map(str::to_string),
        );
        if let Ok(Some(san)) = cert.subject_alternative_name() {
            names.extend(san.value.general_names.iter().filter_map(|name| match name {
                x509_parser::extensions::GeneralName::DNSName(dns) => Some(dns.to_string()),
                _ => None,
            }));
        }
    }
    Ok(names)
}

fn check_private_key(pem: &[u8]) -> Result<(), String> {
    match rustls_pemfile::private_key(&mut &*pem) {
        Ok(Some(_)) => Ok(()),
        Ok(None) => Err("no PEM-encoded private key".to_string()),
        Err(e) => Err(e.to_string()),
    }
}

fn checksum(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}
