//! Host configuration.
//!
//! A [`HostConfig`] can be built in code or read from TOML:
//!
//! ```toml
//! arena_base = 1048576
//!
//! [policy]
//! strict = true
//! warn_only = false
//!
//! [providers]
//! fs_root = "./data"
//! allow_hosts = ["api.example.com"]
//!
//! [[links]]
//! name = "symbols"
//! path = "symbols.wasm"
//! copy_fat_pointers = ["lookup"]
//!
//! [[links]]
//! name = "query"
//! path = "query.wasm"
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use covenant_abi::DEFAULT_ARENA_BASE;
use covenant_capability::GatePolicy;
use covenant_core::{EngineConfig, ResourceLimits};
use covenant_providers::{FsAccess, HostPattern, HttpNetwork, ProviderSet, ScopedFilesystem};
use serde::{Deserialize, Serialize};

use crate::error::{HostError, HostResult};

/// The co-resident modules of a default Covenant deployment, in load order.
pub const DEFAULT_LINK_ORDER: [&str; 3] = ["symbols", "query", "mutation"];

/// Everything needed to build a [`Host`](crate::Host).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Engine settings.
    pub engine: EngineConfig,
    /// Store limits.
    pub limits: ResourceLimits,
    /// Enforcement policy.
    pub policy: GatePolicy,
    /// Offset where each instance's arena starts.
    pub arena_base: u32,
    /// Provider settings.
    pub providers: ProviderConfig,
    /// Modules to load and link, in dependency order.
    pub links: Vec<LinkSpec>,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            limits: ResourceLimits::default(),
            policy: GatePolicy::default(),
            arena_base: DEFAULT_ARENA_BASE,
            providers: ProviderConfig::default(),
            links: Vec::new(),
        }
    }
}

impl HostConfig {
    /// Parse a configuration from TOML.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::Config`] when the document is not valid.
    pub fn from_toml_str(source: &str) -> HostResult<Self> {
        toml::from_str(source).map_err(|e| HostError::Config(e.to_string()))
    }

    /// Read a configuration file.
    ///
    /// Relative module and filesystem paths are resolved against the
    /// file's directory.
    ///
    /// # Errors
    ///
    /// Fails when the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> HostResult<Self> {
        let source = std::fs::read_to_string(path)?;
        let mut config = Self::from_toml_str(&source)?;

        if let Some(dir) = path.parent() {
            config.resolve_paths(dir);
        }
        Ok(config)
    }

    /// Render as TOML.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::Config`] if serialization fails.
    pub fn to_toml_string(&self) -> HostResult<String> {
        toml::to_string_pretty(self).map_err(|e| HostError::Config(e.to_string()))
    }

    /// Make every relative path absolute under `dir`.
    pub fn resolve_paths(&mut self, dir: &Path) {
        for link in &mut self.links {
            if link.path.is_relative() {
                link.path = dir.join(&link.path);
            }
        }
        if let Some(root) = &mut self.providers.fs_root {
            if root.is_relative() {
                *root = dir.join(&*root);
            }
        }
    }
}

/// One module of a linked set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkSpec {
    /// Registry name, and the import namespace dependents use for it.
    pub name: String,
    /// Path to the compiled module.
    pub path: PathBuf,
    /// Exports whose `i64` arguments and results are fat pointers that
    /// must be copied between instances.
    ///
    /// Copying is opt-in. A peer export not listed here receives and returns
    /// raw `i64`s, so a string or collection passed through it is read in
    /// the wrong memory.
    #[serde(default)]
    pub copy_fat_pointers: Vec<String>,
}

impl LinkSpec {
    /// A module at `path` with no fat pointer copying.
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            copy_fat_pointers: Vec::new(),
        }
    }

    /// Copy fat pointers passed to and returned from `export`.
    pub fn copying(mut self, export: impl Into<String>) -> Self {
        self.copy_fat_pointers.push(export.into());
        self
    }

    /// The default `symbols`, `query`, `mutation` set, read from
    /// `<dir>/<name>.wasm`.
    ///
    /// No export copies fat pointers. Add them with [`LinkSpec::copying`]
    /// for every export that takes or returns strings or collections.
    pub fn default_set(dir: &Path) -> Vec<LinkSpec> {
        DEFAULT_LINK_ORDER
            .iter()
            .map(|name| LinkSpec::new(*name, dir.join(format!("{name}.wasm"))))
            .collect()
    }
}

/// Settings for the default providers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Root the filesystem provider is scoped to. No filesystem when unset.
    pub fs_root: Option<PathBuf>,
    /// Allow writes under `fs_root`.
    pub fs_writable: bool,
    /// Hosts the network provider may reach. Offline when empty.
    pub allow_hosts: Vec<String>,
}

impl ProviderConfig {
    /// Build the provider set these settings describe.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::Provider`] if the HTTP client cannot be built.
    pub fn build(&self) -> HostResult<ProviderSet> {
        let mut providers = ProviderSet::new();

        if let Some(root) = &self.fs_root {
            let access = if self.fs_writable {
                FsAccess::read_write()
            } else {
                FsAccess::read_only()
            };
            providers = providers.with_filesystem(Arc::new(ScopedFilesystem::new(root, access)));
        }

        if !self.allow_hosts.is_empty() {
            let patterns = self.allow_hosts.iter().map(|h| HostPattern::parse(h)).collect();
            let network = HttpNetwork::new(patterns).map_err(|e| HostError::Provider(e.to_string()))?;
            providers = providers.with_network(Arc::new(network));
        }

        Ok(providers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_linked_config() {
        let config = HostConfig::from_toml_str(
            r#"
            arena_base = 65536

            [policy]
            warn_only = true

            [[links]]
            name = "symbols"
            path = "symbols.wasm"
            copy_fat_pointers = ["lookup"]

            [[links]]
            name = "query"
            path = "/opt/covenant/query.wasm"
            "#,
        )
        .unwrap();

        assert_eq!(config.arena_base, 65536);
        assert_eq!(config.policy, GatePolicy::warn_only());
        assert_eq!(config.links.len(), 2);
        assert_eq!(config.links[0].copy_fat_pointers, vec!["lookup".to_string()]);
        assert!(config.links[1].copy_fat_pointers.is_empty());
    }

    #[test]
    fn test_defaults_when_empty() {
        let config = HostConfig::from_toml_str("").unwrap();

        assert_eq!(config.arena_base, DEFAULT_ARENA_BASE);
        assert_eq!(config.policy, GatePolicy::strict());
        assert!(config.links.is_empty());
        assert!(config.providers.fs_root.is_none());
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let result = HostConfig::from_toml_str("links = 3");
        assert!(matches!(result, Err(HostError::Config(_))));
    }

    #[test]
    fn test_relative_paths_resolve_against_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("host.toml");
        std::fs::write(
            &path,
            r#"
            [providers]
            fs_root = "data"

            [[links]]
            name = "symbols"
            path = "symbols.wasm"
            "#,
        )
        .unwrap();

        let config = HostConfig::from_file(&path).unwrap();
        assert_eq!(config.links[0].path, dir.path().join("symbols.wasm"));
        assert_eq!(config.providers.fs_root, Some(dir.path().join("data")));
    }

    #[test]
    fn test_default_link_set() {
        let specs = LinkSpec::default_set(Path::new("/mods"));
        let names: Vec<_> = specs.iter().map(|s| s.name.as_str()).collect();

        assert_eq!(names, DEFAULT_LINK_ORDER);
        assert_eq!(specs[2].path, Path::new("/mods/mutation.wasm"));
        assert!(specs.iter().all(|s| s.copy_fat_pointers.is_empty()));

        let symbols = specs[0].clone().copying("lookup").copying("describe");
        assert_eq!(symbols.copy_fat_pointers, vec!["lookup", "describe"]);
    }

    #[test]
    fn test_round_trips_through_toml() {
        let mut config = HostConfig::default();
        config.links.push(LinkSpec::new("symbols", "symbols.wasm").copying("lookup"));

        let parsed = HostConfig::from_toml_str(&config.to_toml_string().unwrap()).unwrap();
        assert_eq!(parsed.links, config.links);
    }
}
