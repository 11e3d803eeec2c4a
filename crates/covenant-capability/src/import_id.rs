//! Fully-qualified import identifiers.

use std::borrow::Cow;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{CapabilityError, CapabilityResult};

/// A fully-qualified host import, `namespace.function`.
///
/// The namespace is everything before the last dot, so
/// `std.storage.kv.get` has namespace `std.storage.kv` and function `get`.
/// That matches how a guest names the import: the wasm import module is the
/// namespace and the import name is the function.
///
/// # Example
///
/// ```
/// use covenant_capability::ImportId;
///
/// let id = ImportId::new("std.storage.kv.get");
/// assert_eq!(id.namespace(), "std.storage.kv");
/// assert_eq!(id.function(), "get");
/// assert_eq!(ImportId::from_parts("http", "get"), ImportId::new("http.get"));
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImportId(Cow<'static, str>);

impl ImportId {
    /// Create an import identifier.
    pub fn new(id: impl Into<Cow<'static, str>>) -> Self {
        Self(id.into())
    }

    /// Join a wasm import module and name.
    pub fn from_parts(namespace: &str, function: &str) -> Self {
        Self(Cow::Owned(format!("{namespace}.{function}")))
    }

    /// Parse an identifier, requiring both a namespace and a function.
    ///
    /// # Errors
    ///
    /// Returns [`CapabilityError::InvalidImportId`] when either half is empty.
    pub fn parse(id: &str) -> CapabilityResult<Self> {
        match id.rsplit_once('.') {
            Some((ns, func)) if !ns.is_empty() && !func.is_empty() => Ok(Self::new(id.to_string())),
            _ => Err(CapabilityError::InvalidImportId(id.to_string())),
        }
    }

    /// Get the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The namespace (wasm import module).
    pub fn namespace(&self) -> &str {
        self.0.rsplit_once('.').map_or("", |(ns, _)| ns)
    }

    /// The function (wasm import name).
    pub fn function(&self) -> &str {
        self.0.rsplit_once('.').map_or(&self.0, |(_, func)| func)
    }
}

impl fmt::Display for ImportId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&'static str> for ImportId {
    fn from(s: &'static str) -> Self {
        Self::new(s)
    }
}

impl From<String> for ImportId {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl AsRef<str> for ImportId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_on_last_dot() {
        let id = ImportId::new("console.println");
        assert_eq!(id.namespace(), "console");
        assert_eq!(id.function(), "println");

        let bare = ImportId::new("custom");
        assert_eq!(bare.namespace(), "");
        assert_eq!(bare.function(), "custom");
    }

    #[test]
    fn test_parse_rejects_partial_ids() {
        assert!(ImportId::parse("fs.read").is_ok());
        assert!(ImportId::parse("fs.").is_err());
        assert!(ImportId::parse(".read").is_err());
        assert!(ImportId::parse("read").is_err());
    }

    #[test]
    fn test_owned_and_static_compare_equal() {
        assert_eq!(ImportId::from_parts("db", "execute_query"), ImportId::from("db.execute_query"));
    }
}
