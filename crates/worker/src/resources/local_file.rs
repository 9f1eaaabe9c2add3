//! Local file resource: a file that must already exist on the host.

use std::path::PathBuf;

use async_trait::async_trait;
use dedalus_core::ResourceSpec;
use semver::Version;
use serde::Deserialize;
use sha2::{Digest, Sha256};

use super::{Resource, decode_config};
use crate::{Error, Result};

#[derive(Debug, Clone, Deserialize)]
struct LocalFileConfig {
    local_path: PathBuf,
}

/// A file expected at a fixed path; its version is the content hash.
pub struct LocalFileResource {
    config: LocalFileConfig,
}

impl LocalFileResource {
    /// Plugin name.
    pub const NAME: &'static str = "local_file";
    /// Plugin version.
    pub const VERSION: Version = Version::new(0, 1, 0);

    /// Decode the spec's config blob into a plugin instance.
    ///
    /// # Errors
    ///
    /// Returns a config decode error for a malformed blob.
    pub fn construct(spec: &ResourceSpec) -> Result<Box<dyn Resource>> {
        let config = decode_config::<LocalFileConfig>(Self::NAME, &spec.config)?;
        Ok(Box::new(Self { config }))
    }
}

#[async_trait]
impl Resource for LocalFileResource {
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
        let path = self.config.local_path.clone();
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|source| Error::io(format!("hashing {}", path.display()), source))?;
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        Ok(Some(hex::encode(hasher.finalize())))
    }

    async fn force_install(&self) -> Result<()> {
        Err(Error::ResourceNonInstallable {
            name: Self::NAME.to_string(),
            reason: format!(
                "file {} is expected to exist already",
                self.config.local_path.display()
            ),
        })
    }
}
