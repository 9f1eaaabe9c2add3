//! Remote file resource: downloaded to a fixed local path when absent.

use std::path::PathBuf;

use async_trait::async_trait;
use dedalus_core::ResourceSpec;
use semver::Version;
use serde::Deserialize;
use sha2::{Digest, Sha256};

use super::{Resource, decode_config};
use crate::{Error, Result};

#[derive(Debug, Clone, Deserialize)]
struct RemoteFileConfig {
    local_path: PathBuf,
    remote_url: String,
}

/// A file fetched over HTTP to `local_path` if it is not there yet.
pub struct RemoteFileResource {
    config: RemoteFileConfig,
    client: reqwest::Client,
}

impl RemoteFileResource {
    /// Plugin name.
    pub const NAME: &'static str = "remote_file";
    /// Plugin version.
    pub const VERSION: Version = Version::new(0, 1, 0);

    /// Decode the spec's config blob into a plugin instance.
    ///
    /// # Errors
    ///
    /// Returns a config decode error for a malformed blob.
    pub fn construct(spec: &ResourceSpec) -> Result<Box<dyn Resource>> {
        let config = decode_config::<RemoteFileConfig>(Self::NAME, &spec.config)?;
        Ok(Box::new(Self {
            config,
            client: reqwest::Client::new(),
        }))
    }
}

#[async_trait]
impl Resource for RemoteFileResource {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn version(&self) -> Version {
        Self::VERSION
    }

    async fn is_installed(&self) -> Result<bool> {
        Ok(tokio::fs::try_exists(&self.config.local_path)
            .await
            .unwrap_or(false))
    }

    async fn local_version(&self) -> Result<Option<String>> {
        if !self.is_installed().await? {
            return Ok(None);
        }
        let bytes = tokio::fs::read(&self.config.local_path).await.map_err(|source| {
            Error::io(
                format!("hashing {}", self.config.local_path.display()),
                source,
            )
        })?;
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        Ok(Some(hex::encode(hasher.finalize())))
    }

    async fn force_install(&self) -> Result<()> {
        let url = &self.config.remote_url;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|source| Error::Download {
                url: url.clone(),
                source,
            })?;
        let bytes = response.bytes().await.map_err(|source| Error::Download {
            url: url.clone(),
            source,
        })?;
        if let Some(parent) = self.config.local_path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|source| {
                Error::io(format!("creating {}", parent.display()), source)
            })?;
        }
        tokio::fs::write(&self.config.local_path, &bytes)
            .await
            .map_err(|source| {
                Error::io(
                    format!("writing {}", self.config.local_path.display()),
                    source,
                )
            })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_existing_file_skips_download() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cached.bin");
        std::fs::write(&path, b"cached").unwrap();

        // The URL is unreachable; ensure() must not try it for a present file.
        let resource = RemoteFileResource::construct(&ResourceSpec {
            name: RemoteFileResource::NAME.to_string(),
            min_version: Version::new(0, 0, 0),
            config: serde_json::json!({
                "local_path": path,
                "remote_url": "http://127.0.0.1:1/never"
            }),
        })
        .unwrap();
        resource.ensure().await.unwrap();
        assert!(resource.local_version().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_unreachable_url_fails_install() {
        let dir = tempfile::tempdir().unwrap();
        let resource = RemoteFileResource::construct(&ResourceSpec {
            name: RemoteFileResource::NAME.to_string(),
            min_version: Version::new(0, 0, 0),
            config: serde_json::json!({
                "local_path": dir.path().join("absent.bin"),
                "remote_url": "http://127.0.0.1:1/never"
            }),
        })
        .unwrap();
        assert!(matches!(
            resource.ensure().await,
            Err(Error::Download { .. })
        ));
    }
}
