use crate::core::{IngressConfig, ProxyManager};
use anyhow::{Context, Result};
use std::{
    io,
    path::{Path, PathBuf},
};

const CONFIG_FILE: &str = "ingress.json";

/// Materializes configurations on disk for a proxy that watches its configuration directory.
///
/// TLS material is written to the paths recorded in each credential and the model itself to
/// `ingress.json`. A configuration counts as applied once that file holds it.
#[derive(Clone, Debug)]
pub struct FileManager {
    conf_dir: PathBuf,
}

impl FileManager {
    pub fn new(conf_dir: impl Into<PathBuf>) -> Self {
        Self {
            conf_dir: conf_dir.into(),
        }
    }

    fn config_path(&self) -> PathBuf {
        self.conf_dir.join(CONFIG_FILE)
    }
}

#[async_trait::async_trait]
impl ProxyManager for FileManager {
    async fn check_and_reload(&self, config: &IngressConfig) -> Result<bool> {
        for cred in config.tls_creds() {
            write_if_changed(&cred.cert.path, &cred.cert_pem).await?;
            write_if_changed(&cred.key.path, &cred.key_pem).await?;
        }

        let mut json = serde_json::to_vec_pretty(config)?;
        json.push(b'\n');
        let changed = write_if_changed(&self.config_path(), &json).await?;
        if changed {
            tracing::info!(
                path = %self.config_path().display(),
                upstreams = config.upstreams.len(),
                tls = config.tls,
                "Wrote proxy configuration"
            );
        }
        Ok(changed)
    }
}

/// Replaces the file at `path` unless it already holds `contents`.
///
/// The new contents are written to a sibling file and renamed into place, so readers never
/// observe a partial file.
async fn write_if_changed(path: &Path, contents: &[u8]) -> Result<bool> {
    match tokio::fs::read(path).await {
        Ok(current) if current == contents => return Ok(false),
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e).with_context(|| format!("reading {}", path.display())),
    }

    if let Some(dir) = path.parent() {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("creating {}", dir.display()))?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    tokio::fs::write(&tmp, contents)
        .await
        .with_context(|| format!("writing {}", tmp.display()))?;
    tokio::fs::rename(&tmp, path)
        .await
        .with_context(|| format!("renaming {} to {}", tmp.display(), path.display()))?;
    Ok(true)
}
