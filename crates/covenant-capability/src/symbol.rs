//! The per-symbol metadata record the compiler embeds in guest binaries.

use serde::{Deserialize, Serialize};

/// One declared function or snippet, as embedded by the compiler.
///
/// Every field defaults when absent so that records from older or newer
/// compilers still parse. Only [`effects`](Self::effects) feeds the
/// capability manifest; the rest is carried for tooling.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddableSymbol {
    /// Symbol ID, e.g. `auth.login`.
    pub id: String,
    /// Symbol kind, e.g. `function`, `struct`, `extern`.
    pub kind: String,
    /// Source line.
    pub line: u32,
    /// Declared effects.
    pub effects: Vec<String>,
    /// Transitive effect closure computed by the compiler.
    pub effect_closure: Vec<String>,
    /// Functions this symbol calls.
    pub calls: Vec<String>,
    /// Types this symbol references.
    pub references: Vec<String>,
    /// Functions that call this symbol.
    pub called_by: Vec<String>,
    /// Symbols that reference this type.
    pub referenced_by: Vec<String>,
    /// Requirements declared in the snippet.
    pub requirements: Vec<String>,
    /// Tests declared in the snippet.
    pub tests: Vec<String>,
    /// Requirements covered, for test snippets.
    pub covers: Vec<String>,
    /// Imports the compiler expects this symbol to need.
    pub required_capabilities: Vec<String>,
}

impl EmbeddableSymbol {
    /// Create a symbol with an ID and kind.
    pub fn new(id: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            ..Self::default()
        }
    }

    /// Add declared effects.
    pub fn with_effects<I, S>(mut self, effects: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.effects.extend(effects.into_iter().map(Into::into));
        self
    }
}

/// Parse the JSON array a module's metadata export points at.
///
/// # Errors
///
/// Returns an error if `json` is not an array of symbol records.
pub fn parse_symbols(json: &str) -> serde_json::Result<Vec<EmbeddableSymbol>> {
    serde_json::from_str(json)
}
