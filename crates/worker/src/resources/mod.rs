//! Resource plugins: things a task needs on the host before it runs.
//!
//! Plugins are registered in a static registry keyed by name; each
//! registration carries a semver version and a constructor that decodes the
//! task's opaque config blob into the plugin's typed config.

mod local_file;
mod remote_file;

use std::collections::HashMap;

use async_trait::async_trait;
use dedalus_core::ResourceSpec;
use semver::Version;

use crate::{Error, Result};

pub use local_file::LocalFileResource;
pub use remote_file::RemoteFileResource;

/// A resource a task depends on.
#[async_trait]
pub trait Resource: Send + Sync {
    /// Plugin name.
    fn name(&self) -> &'static str;

    /// Plugin version.
    fn version(&self) -> Version;

    /// Whether the resource is already present on this host.
    async fn is_installed(&self) -> Result<bool>;

    /// Local version identifier (a content hash for files), if present.
    async fn local_version(&self) -> Result<Option<String>>;

    /// Install the resource unconditionally.
    ///
    /// # Errors
    ///
    /// [`Error::ResourceNonInstallable`] when the plugin has no way to
    /// materialize the resource.
    async fn force_install(&self) -> Result<()>;

    /// Install the resource if it is not installed yet.
    ///
    /// # Errors
    ///
    /// Propagates [`Resource::force_install`] failures.
    async fn ensure(&self) -> Result<()> {
        if !self.is_installed().await? {
            self.force_install().await?;
        }
        Ok(())
    }
}

type ResourceFactory = fn(&ResourceSpec) -> Result<Box<dyn Resource>>;

struct Registration {
    version: Version,
    construct: ResourceFactory,
}

/// Registry of resource plugins, keyed by name.
#[derive(Default)]
pub struct ResourceRegistry {
    plugins: HashMap<&'static str, Vec<Registration>>,
}

impl ResourceRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The registry with all built-in resources.
    #[must_use]
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(
            LocalFileResource::NAME,
            LocalFileResource::VERSION,
            LocalFileResource::construct,
        );
        registry.register(
            RemoteFileResource::NAME,
            RemoteFileResource::VERSION,
            RemoteFileResource::construct,
        );
        registry
    }

    /// Register a plugin version. Versions of one name are kept ordered,
    /// newest last.
    pub fn register(&mut self, name: &'static str, version: Version, construct: ResourceFactory) {
        let versions = self.plugins.entry(name).or_default();
        versions.push(Registration { version, construct });
        versions.sort_by(|a, b| a.version.cmp(&b.version));
    }

    /// Construct the newest registered version of `spec.name`, requiring it
    /// to satisfy `spec.min_version`.
    ///
    /// # Errors
    ///
    /// [`Error::ResourceNotFound`] for an unknown name,
    /// [`Error::PluginVersionNotFound`] when every registered version is too
    /// old, or the plugin's own config decode error.
    pub fn construct(&self, spec: &ResourceSpec) -> Result<Box<dyn Resource>> {
        let newest = self
            .plugins
            .get(spec.name.as_str())
            .and_then(|versions| versions.last())
            .ok_or_else(|| Error::ResourceNotFound {
                name: spec.name.clone(),
            })?;
        if newest.version < spec.min_version {
            return Err(Error::PluginVersionNotFound {
                name: spec.name.clone(),
                needed: spec.min_version.clone(),
                available: newest.version.clone(),
            });
        }
        (newest.construct)(spec)
    }

    /// Registered plugin names.
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.plugins.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

pub(crate) fn decode_config<T: serde::de::DeserializeOwned>(
    plugin: &str,
    config: &serde_json::Value,
) -> Result<T> {
    serde_json::from_value(config.clone()).map_err(|source| Error::PluginConfig {
        plugin: plugin.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(name: &str, min_version: &str) -> ResourceSpec {
        ResourceSpec {
            name: name.to_string(),
            min_version: Version::parse(min_version).unwrap(),
            config: serde_json::json!({"local_path": "/tmp/x"}),
        }
    }

    #[test]
    fn test_builtin_names() {
        let registry = ResourceRegistry::builtin();
        assert_eq!(registry.names(), vec!["local_file", "remote_file"]);
    }

    #[test]
    fn test_unknown_resource() {
        let registry = ResourceRegistry::builtin();
        assert!(matches!(
            registry.construct(&spec("nothing", "0.0.0")),
            Err(Error::ResourceNotFound { .. })
        ));
    }

    #[test]
    fn test_min_version_too_new() {
        let registry = ResourceRegistry::builtin();
        assert!(matches!(
            registry.construct(&spec("local_file", "99.0.0")),
            Err(Error::PluginVersionNotFound { .. })
        ));
    }

    #[test]
    fn test_newest_version_wins() {
        fn v1(_: &ResourceSpec) -> Result<Box<dyn Resource>> {
            LocalFileResource::construct(&spec("local_file", "0.0.0"))
        }
        let mut registry = ResourceRegistry::new();
        registry.register("local_file", Version::new(0, 1, 0), v1);
        registry.register("local_file", Version::new(0, 2, 0), LocalFileResource::construct);
        let resource = registry.construct(&spec("local_file", "0.2.0")).unwrap();
        assert_eq!(resource.name(), "local_file");
    }

    #[test]
    fn test_config_decode_error_names_plugin() {
        let registry = ResourceRegistry::builtin();
        let bad = ResourceSpec {
            name: "local_file".to_string(),
            min_version: Version::new(0, 0, 0),
            config: serde_json::json!({"wrong_key": true}),
        };
        match registry.construct(&bad) {
            Err(Error::PluginConfig { plugin, .. }) => assert_eq!(plugin, "local_file"),
            other => panic!("expected config error, got {:?}", other.map(|_| ())),
        }
    }
}
