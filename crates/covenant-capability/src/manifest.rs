//! Capability manifests.
//!
//! A manifest is the set of host imports one module instance may call. It
//! is computed once per load from the module's embedded symbols and never
//! changes for the lifetime of that instance.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::effect::{Effect, effects_to_imports};
use crate::import_id::ImportId;
use crate::symbol::{EmbeddableSymbol, parse_symbols};

/// Where a manifest came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ManifestSource {
    /// Parsed from the module's embedded metadata.
    Embedded {
        /// Number of symbol records read.
        symbols: usize,
    },
    /// The module has no metadata export, or no memory to read it from.
    NoMetadata,
    /// Metadata was present but could not be read or parsed.
    Degraded {
        /// What went wrong.
        reason: String,
    },
    /// Assembled by the host rather than read from the module.
    Explicit,
}

/// Build the allow-set for a list of symbols.
///
/// The result depends only on the set of declared effects, so any
/// permutation of `symbols` yields the same set.
pub fn build_manifest_from_symbols(symbols: &[EmbeddableSymbol]) -> BTreeSet<ImportId> {
    effects_to_imports(
        symbols
            .iter()
            .flat_map(|s| s.effects.iter().map(String::as_str)),
    )
}

/// The imports a module instance is authorized to call.
///
/// # Example
///
/// ```
/// use covenant_capability::{CapabilityManifest, EmbeddableSymbol, ImportId};
///
/// let symbols = vec![EmbeddableSymbol::new("fetch_user", "function").with_effects(["network"])];
/// let manifest = CapabilityManifest::from_symbols(&symbols);
///
/// assert!(manifest.permits(&ImportId::new("http.get")));
/// assert!(!manifest.permits(&ImportId::new("db.execute_query")));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityManifest {
    imports: BTreeSet<ImportId>,
    effects: BTreeSet<String>,
    source: ManifestSource,
}

impl CapabilityManifest {
    /// An empty manifest: every gated import is denied.
    pub fn deny_all(source: ManifestSource) -> Self {
        Self {
            imports: BTreeSet::new(),
            effects: BTreeSet::new(),
            source,
        }
    }

    /// The manifest of a module without readable metadata.
    pub fn no_metadata() -> Self {
        Self::deny_all(ManifestSource::NoMetadata)
    }

    /// The manifest of a module whose metadata could not be used.
    pub fn degraded(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        warn!(reason = %reason, "Capability metadata unusable, denying all gated imports");
        Self::deny_all(ManifestSource::Degraded { reason })
    }

    /// Build a manifest from embedded symbols.
    pub fn from_symbols(symbols: &[EmbeddableSymbol]) -> Self {
        let imports = build_manifest_from_symbols(symbols);
        let effects: BTreeSet<String> = symbols
            .iter()
            .flat_map(|s| s.effects.iter())
            .map(|e| Effect::parse(e).name().to_string())
            .collect();

        debug!(
            symbols = symbols.len(),
            effects = effects.len(),
            imports = imports.len(),
            "Built capability manifest"
        );

        Self {
            imports,
            effects,
            source: ManifestSource::Embedded {
                symbols: symbols.len(),
            },
        }
    }

    /// Build a manifest from the embedded JSON document.
    ///
    /// Parse failures are not errors: they yield a degraded, deny-all
    /// manifest.
    pub fn from_json(json: &str) -> Self {
        match parse_symbols(json) {
            Ok(symbols) => Self::from_symbols(&symbols),
            Err(e) => Self::degraded(format!("invalid symbol metadata: {e}")),
        }
    }

    /// Start an explicit manifest.
    pub fn builder() -> ManifestBuilder {
        ManifestBuilder::default()
    }

    /// Check whether `import` is granted.
    pub fn permits(&self, import: &ImportId) -> bool {
        self.imports.contains(import)
    }

    /// Iterate over the granted imports in sorted order.
    pub fn imports(&self) -> impl Iterator<Item = &ImportId> {
        self.imports.iter()
    }

    /// The canonical names of the declared effects.
    pub fn effects(&self) -> impl Iterator<Item = &str> {
        self.effects.iter().map(String::as_str)
    }

    /// Where the manifest came from.
    pub fn source(&self) -> &ManifestSource {
        &self.source
    }

    /// True when the manifest was not built from readable metadata.
    pub fn is_degraded(&self) -> bool {
        matches!(self.source, ManifestSource::Degraded { .. })
    }

    /// Number of granted imports.
    pub fn len(&self) -> usize {
        self.imports.len()
    }

    /// True when nothing is granted.
    pub fn is_empty(&self) -> bool {
        self.imports.is_empty()
    }
}

/// Builder for explicit manifests.
#[derive(Debug, Default)]
pub struct ManifestBuilder {
    imports: BTreeSet<ImportId>,
    effects: BTreeSet<String>,
}

impl ManifestBuilder {
    /// Grant every import of an effect.
    pub fn with_effect(mut self, name: &str) -> Self {
        let effect = Effect::parse(name);
        self.imports.extend(effect.imports());
        self.effects.insert(effect.name().to_string());
        self
    }

    /// Grant a single import.
    pub fn with_import(mut self, import: impl Into<ImportId>) -> Self {
        self.imports.insert(import.into());
        self
    }

    /// Build the manifest.
    pub fn build(self) -> CapabilityManifest {
        CapabilityManifest {
            imports: self.imports,
            effects: self.effects,
            source: ManifestSource::Explicit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn symbol(id: &str, effects: &[&str]) -> EmbeddableSymbol {
        EmbeddableSymbol::new(id, "function").with_effects(effects.iter().copied())
    }

    #[test]
    fn test_manifest_is_order_independent() {
        let a = symbol("a", &["network"]);
        let b = symbol("b", &["console", "time"]);
        let c = symbol("c", &["database"]);

        let forward = CapabilityManifest::from_symbols(&[a.clone(), b.clone(), c.clone()]);
        let reversed = CapabilityManifest::from_symbols(&[c.clone(), b.clone(), a.clone()]);
        let shuffled = CapabilityManifest::from_symbols(&[b, a, c]);

        assert_eq!(forward, reversed);
        assert_eq!(forward, shuffled);
    }

    #[test]
    fn test_network_only() {
        let manifest = CapabilityManifest::from_symbols(&[symbol("fetch", &["network"])]);

        let granted: Vec<&str> = manifest.imports().map(ImportId::as_str).collect();
        assert_eq!(granted, vec!["http.fetch", "http.get", "http.post"]);
        assert!(!manifest.permits(&ImportId::new("db.execute_query")));
        assert_eq!(manifest.effects().collect::<Vec<_>>(), vec!["network"]);
    }

    #[test]
    fn test_union_over_symbols() {
        let manifest = CapabilityManifest::from_symbols(&[
            symbol("pure", &[]),
            symbol("log", &["console"]),
            symbol("save", &["std.storage"]),
        ]);

        assert!(manifest.permits(&ImportId::new("console.println")));
        assert!(manifest.permits(&ImportId::new("std.storage.kv.set")));
        assert!(!manifest.permits(&ImportId::new("fs.read")));
    }

    #[test]
    fn test_invalid_json_degrades() {
        let manifest = CapabilityManifest::from_json("{not json");

        assert!(manifest.is_empty());
        assert!(manifest.is_degraded());
    }

    #[test]
    fn test_from_json() {
        let manifest = CapabilityManifest::from_json(r#"[{"id":"main","effects":["filesystem"]}]"#);

        assert_eq!(manifest.source(), &ManifestSource::Embedded { symbols: 1 });
        assert!(manifest.permits(&ImportId::new("fs.read_dir")));
    }

    #[test]
    fn test_builder() {
        let manifest = CapabilityManifest::builder()
            .with_effect("crypto")
            .with_import("custom.thing")
            .build();

        assert!(manifest.permits(&ImportId::new("std.crypto.sign")));
        assert!(manifest.permits(&ImportId::new("custom.thing")));
        assert_eq!(manifest.source(), &ManifestSource::Explicit);
    }
}
