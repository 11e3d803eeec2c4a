//! Effects and the static effect-to-imports table.
//!
//! This table is a convention shared with the Covenant compiler: a symbol
//! that declares an effect may call exactly the imports listed for it. The
//! host never re-derives it from the binary.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::import_id::ImportId;

const DATABASE_IMPORTS: &[&str] = &["db.execute_query"];

const NETWORK_IMPORTS: &[&str] = &["http.get", "http.post", "http.fetch"];

const FILESYSTEM_IMPORTS: &[&str] = &[
    "fs.read",
    "fs.write",
    "fs.delete",
    "fs.exists",
    "fs.read_dir",
    "fs.create_dir",
    "fs.remove_dir",
    "fs.mkdir",
    "fs.remove",
    "fs.rename",
    "fs.stat",
    "fs.copy",
];

const CONSOLE_IMPORTS: &[&str] = &[
    "console.println",
    "console.print",
    "console.eprintln",
    "console.eprint",
    "env.log",
];

const STORAGE_IMPORTS: &[&str] = &[
    "std.storage.kv.get",
    "std.storage.kv.set",
    "std.storage.kv.delete",
    "std.storage.kv.has",
    "std.storage.kv.list",
    "std.storage.kv.clear",
    "std.storage.doc.put",
    "std.storage.doc.get",
    "std.storage.doc.delete",
    "std.storage.doc.query",
    "std.storage.doc.count",
    "std.storage.doc.create_index",
];

const TIME_IMPORTS: &[&str] = &["std.time.now", "std.time.sleep", "env.now"];

const RANDOM_IMPORTS: &[&str] = &["std.random.int", "std.random.float", "std.random.bytes"];

const CRYPTO_IMPORTS: &[&str] = &["std.crypto.hash", "std.crypto.sign", "std.crypto.verify"];

/// Namespaces whose every function is a gated host effect.
pub const GATED_NAMESPACES: &[&str] = &[
    "db",
    "http",
    "fs",
    "console",
    "std.storage.kv",
    "std.storage.doc",
    "std.time",
    "std.random",
    "std.crypto",
];

/// Namespaces of pure runtime intrinsics, bound without consulting the
/// manifest.
pub const INTRINSIC_NAMESPACES: &[&str] = &["mem", "text", "list", "map", "path", "std.text"];

/// The memory import guests may use to share the host's view of memory.
pub const ENV_MEMORY: &str = "env.memory";

/// A named capability category declared by guest code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Effect {
    /// `database`
    Database,
    /// `network`
    Network,
    /// `filesystem`
    Filesystem,
    /// `console`
    Console,
    /// `std.storage`
    Storage,
    /// `std.time`
    Time,
    /// `std.random`
    Random,
    /// `std.crypto`
    Crypto,
    /// An effect the host has no table entry for. It grants the import of
    /// the same name.
    Custom(String),
}

impl Effect {
    /// Every effect with a table entry.
    pub const KNOWN: [Effect; 8] = [
        Effect::Database,
        Effect::Network,
        Effect::Filesystem,
        Effect::Console,
        Effect::Storage,
        Effect::Time,
        Effect::Random,
        Effect::Crypto,
    ];

    /// Resolve an effect name, accepting the short aliases `storage`,
    /// `time`, `random` and `crypto`.
    pub fn parse(name: &str) -> Self {
        match name {
            "database" => Self::Database,
            "network" => Self::Network,
            "filesystem" => Self::Filesystem,
            "console" => Self::Console,
            "std.storage" | "storage" => Self::Storage,
            "std.time" | "time" => Self::Time,
            "std.random" | "random" => Self::Random,
            "std.crypto" | "crypto" => Self::Crypto,
            other => Self::Custom(other.to_string()),
        }
    }

    /// The canonical effect name.
    pub fn name(&self) -> &str {
        match self {
            Self::Database => "database",
            Self::Network => "network",
            Self::Filesystem => "filesystem",
            Self::Console => "console",
            Self::Storage => "std.storage",
            Self::Time => "std.time",
            Self::Random => "std.random",
            Self::Crypto => "std.crypto",
            Self::Custom(name) => name,
        }
    }

    fn table(&self) -> &'static [&'static str] {
        match self {
            Self::Database => DATABASE_IMPORTS,
            Self::Network => NETWORK_IMPORTS,
            Self::Filesystem => FILESYSTEM_IMPORTS,
            Self::Console => CONSOLE_IMPORTS,
            Self::Storage => STORAGE_IMPORTS,
            Self::Time => TIME_IMPORTS,
            Self::Random => RANDOM_IMPORTS,
            Self::Crypto => CRYPTO_IMPORTS,
            Self::Custom(_) => &[],
        }
    }

    /// The imports this effect grants.
    pub fn imports(&self) -> Vec<ImportId> {
        match self {
            Self::Custom(name) => vec![ImportId::new(name.clone())],
            known => known.table().iter().map(|s| ImportId::new(*s)).collect(),
        }
    }

    /// The known effect whose table lists `import`, if any.
    pub fn granting(import: &ImportId) -> Option<Effect> {
        Self::KNOWN
            .into_iter()
            .find(|effect| effect.table().iter().any(|s| *s == import.as_str()))
    }
}

impl fmt::Display for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Union the imports granted by a list of effect names.
pub fn effects_to_imports<'a, I>(effects: I) -> BTreeSet<ImportId>
where
    I: IntoIterator<Item = &'a str>,
{
    effects
        .into_iter()
        .flat_map(|name| Effect::parse(name).imports())
        .collect()
}

fn in_namespace(ns: &str, candidates: &[&str]) -> bool {
    candidates.iter().any(|c| {
        ns == *c || (ns.len() > c.len() && ns.starts_with(c) && ns.as_bytes()[c.len()] == b'.')
    })
}

/// True when calling `import` requires a manifest grant.
pub fn is_gated(import: &ImportId) -> bool {
    in_namespace(import.namespace(), GATED_NAMESPACES) || Effect::granting(import).is_some()
}

/// True for runtime intrinsics that are always bound.
pub fn is_intrinsic(import: &ImportId) -> bool {
    import.as_str() == ENV_MEMORY || in_namespace(import.namespace(), INTRINSIC_NAMESPACES)
}

/// True when `name` would shadow a host namespace if used as a module name.
pub fn is_reserved_namespace(name: &str) -> bool {
    in_namespace(name, GATED_NAMESPACES)
        || in_namespace(name, INTRINSIC_NAMESPACES)
        || name == "env"
        || name == "std"
        || GATED_NAMESPACES
            .iter()
            .chain(INTRINSIC_NAMESPACES)
            .any(|ns| ns.starts_with(name) && ns.as_bytes().get(name.len()) == Some(&b'.'))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(items: &[&'static str]) -> BTreeSet<ImportId> {
        items.iter().map(|s| ImportId::new(*s)).collect()
    }

    #[test]
    fn test_network_grants_exactly_http() {
        assert_eq!(
            effects_to_imports(["network"]),
            ids(&["http.fetch", "http.get", "http.post"])
        );
    }

    #[test]
    fn test_aliases_resolve_to_std_effects() {
        assert_eq!(Effect::parse("time"), Effect::Time);
        assert_eq!(Effect::parse("std.crypto"), Effect::Crypto);
        assert_eq!(effects_to_imports(["random"]), effects_to_imports(["std.random"]));
    }

    #[test]
    fn test_unknown_effect_maps_to_itself() {
        assert_eq!(effects_to_imports(["custom.effect"]), ids(&["custom.effect"]));
        assert!(effects_to_imports([]).is_empty());
    }

    #[test]
    fn test_gating() {
        assert!(is_gated(&ImportId::new("db.execute_query")));
        assert!(is_gated(&ImportId::new("std.storage.kv.get")));
        assert!(is_gated(&ImportId::new("fs.anything_new")));
        assert!(is_gated(&ImportId::new("env.log")));
        assert!(!is_gated(&ImportId::new("env.memory")));
        assert!(!is_gated(&ImportId::new("text.upper")));
        assert!(!is_gated(&ImportId::new("std.text.regex_match")));
    }

    #[test]
    fn test_intrinsics() {
        assert!(is_intrinsic(&ImportId::new("mem.alloc")));
        assert!(is_intrinsic(&ImportId::new("std.text.regex_match")));
        assert!(is_intrinsic(&ImportId::new("env.memory")));
        assert!(!is_intrinsic(&ImportId::new("env.log")));
        assert!(!is_intrinsic(&ImportId::new("texts.upper")));
    }

    #[test]
    fn test_reserved_namespaces() {
        for name in ["fs", "http", "mem", "std", "env", "std.storage", "console"] {
            assert!(is_reserved_namespace(name), "{name} should be reserved");
        }
        for name in ["symbols", "query", "mutation", "files"] {
            assert!(!is_reserved_namespace(name), "{name} should be free");
        }
    }

    #[test]
    fn test_granting_effect() {
        assert_eq!(Effect::granting(&ImportId::new("env.now")), Some(Effect::Time));
        assert_eq!(Effect::granting(&ImportId::new("text.upper")), None);
    }
}
