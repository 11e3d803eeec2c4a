//! Key-value and document storage: `std.storage.kv.*`, `std.storage.doc.*`.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use covenant_abi::AbiValue;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde_json::Value;

use crate::error::{HostCallError, HostCallResult};
use crate::function::{FunctionKind, HostFunctionTable, host_functions};

/// A string key-value store.
pub trait KvStore: Send + Sync {
    /// Get a value.
    fn get(&self, key: &str) -> HostCallResult<Option<String>>;
    /// Set a value.
    fn set(&self, key: &str, value: &str) -> HostCallResult<()>;
    /// Delete a key, returning whether it existed.
    fn delete(&self, key: &str) -> HostCallResult<bool>;
    /// Check whether a key exists.
    fn has(&self, key: &str) -> HostCallResult<bool>;
    /// List keys starting with `prefix`, sorted.
    fn list(&self, prefix: &str) -> HostCallResult<Vec<String>>;
    /// Remove every key.
    fn clear(&self) -> HostCallResult<()>;
}

/// An in-memory key-value store.
#[derive(Debug, Default)]
pub struct MemoryKvStore {
    entries: DashMap<String, String>,
}

impl MemoryKvStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl KvStore for MemoryKvStore {
    fn get(&self, key: &str) -> HostCallResult<Option<String>> {
        Ok(self.entries.get(key).map(|v| v.value().clone()))
    }

    fn set(&self, key: &str, value: &str) -> HostCallResult<()> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, key: &str) -> HostCallResult<bool> {
        Ok(self.entries.remove(key).is_some())
    }

    fn has(&self, key: &str) -> HostCallResult<bool> {
        Ok(self.entries.contains_key(key))
    }

    fn list(&self, prefix: &str) -> HostCallResult<Vec<String>> {
        let mut keys: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.key().starts_with(prefix))
            .map(|e| e.key().clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    fn clear(&self) -> HostCallResult<()> {
        self.entries.clear();
        Ok(())
    }
}

/// A JSON document store organised in collections.
pub trait DocStore: Send + Sync {
    /// Insert or replace a document.
    fn put(&self, collection: &str, id: &str, document: &str) -> HostCallResult<()>;
    /// Fetch a document as JSON.
    fn get(&self, collection: &str, id: &str) -> HostCallResult<Option<String>>;
    /// Delete a document, returning whether it existed.
    fn delete(&self, collection: &str, id: &str) -> HostCallResult<bool>;
    /// Return every document whose fields equal those of `filter`, a JSON
    /// object. Results are ordered by document ID.
    fn query(&self, collection: &str, filter: &str) -> HostCallResult<Vec<String>>;
    /// Number of documents in a collection.
    fn count(&self, collection: &str) -> HostCallResult<u64>;
    /// Declare an index on a top-level field.
    fn create_index(&self, collection: &str, field: &str) -> HostCallResult<()>;
}

#[derive(Debug, Default)]
struct Collection {
    documents: BTreeMap<String, Value>,
    indexes: BTreeSet<String>,
}

/// An in-memory document store.
#[derive(Debug, Default)]
pub struct MemoryDocStore {
    collections: RwLock<HashMap<String, Collection>>,
}

impl MemoryDocStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fields indexed on a collection.
    pub fn indexes(&self, collection: &str) -> Vec<String> {
        self.collections
            .read()
            .get(collection)
            .map(|c| c.indexes.iter().cloned().collect())
            .unwrap_or_default()
    }
}

fn parse_json(text: &str, what: &str) -> HostCallResult<Value> {
    serde_json::from_str(text).map_err(|e| HostCallError::InvalidInput(format!("{what}: {e}")))
}

fn matches_filter(document: &Value, filter: &serde_json::Map<String, Value>) -> bool {
    filter
        .iter()
        .all(|(field, expected)| document.get(field) == Some(expected))
}

impl DocStore for MemoryDocStore {
    fn put(&self, collection: &str, id: &str, document: &str) -> HostCallResult<()> {
        let value = parse_json(document, "document is not valid JSON")?;
        if !value.is_object() {
            return Err(HostCallError::InvalidInput("document must be a JSON object".into()));
        }

        self.collections
            .write()
            .entry(collection.to_string())
            .or_default()
            .documents
            .insert(id.to_string(), value);
        Ok(())
    }

    fn get(&self, collection: &str, id: &str) -> HostCallResult<Option<String>> {
        Ok(self
            .collections
            .read()
            .get(collection)
            .and_then(|c| c.documents.get(id))
            .map(Value::to_string))
    }

    fn delete(&self, collection: &str, id: &str) -> HostCallResult<bool> {
        Ok(self
            .collections
            .write()
            .get_mut(collection)
            .is_some_and(|c| c.documents.remove(id).is_some()))
    }

    fn query(&self, collection: &str, filter: &str) -> HostCallResult<Vec<String>> {
        let filter = if filter.trim().is_empty() {
            serde_json::Map::new()
        } else {
            match parse_json(filter, "filter is not valid JSON")? {
                Value::Object(map) => map,
                _ => {
                    return Err(HostCallError::InvalidInput(
                        "filter must be a JSON object".into(),
                    ));
                }
            }
        };

        Ok(self
            .collections
            .read()
            .get(collection)
            .map(|c| {
                c.documents
                    .values()
                    .filter(|doc| matches_filter(doc, &filter))
                    .map(Value::to_string)
                    .collect()
            })
            .unwrap_or_default())
    }

    fn count(&self, collection: &str) -> HostCallResult<u64> {
        Ok(self
            .collections
            .read()
            .get(collection)
            .map_or(0, |c| c.documents.len() as u64))
    }

    fn create_index(&self, collection: &str, field: &str) -> HostCallResult<()> {
        self.collections
            .write()
            .entry(collection.to_string())
            .or_default()
            .indexes
            .insert(field.to_string());
        Ok(())
    }
}

pub(crate) fn register_kv(table: &mut HostFunctionTable, kv: Arc<dyn KvStore>) {
    host_functions!(table, FunctionKind::Effect, "std.storage.kv", with kv, {
        "get" => (Str) -> Str, move |a| Ok(AbiValue::Str(kv.get(a.str(0)?)?.unwrap_or_default()));
        "set" => (Str, Str) -> Unit, move |a| {
            kv.set(a.str(0)?, a.str(1)?)?;
            Ok(AbiValue::Unit)
        };
        "delete" => (Str) -> Bool, move |a| Ok(AbiValue::Bool(kv.delete(a.str(0)?)?));
        "has" => (Str) -> Bool, move |a| Ok(AbiValue::Bool(kv.has(a.str(0)?)?));
        "list" => (Str) -> List, move |a| Ok(AbiValue::List(kv.list(a.str(0)?)?));
        "clear" => () -> Unit, move |_a| {
            kv.clear()?;
            Ok(AbiValue::Unit)
        };
    });
}

pub(crate) fn register_doc(table: &mut HostFunctionTable, docs: Arc<dyn DocStore>) {
    host_functions!(table, FunctionKind::Effect, "std.storage.doc", with docs, {
        "put" => (Str, Str, Str) -> Unit, move |a| {
            docs.put(a.str(0)?, a.str(1)?, a.str(2)?)?;
            Ok(AbiValue::Unit)
        };
        "get" => (Str, Str) -> Str, move |a| {
            Ok(AbiValue::Str(docs.get(a.str(0)?, a.str(1)?)?.unwrap_or_default()))
        };
        "delete" => (Str, Str) -> Bool, move |a| Ok(AbiValue::Bool(docs.delete(a.str(0)?, a.str(1)?)?));
        "query" => (Str, Str) -> List, move |a| Ok(AbiValue::List(docs.query(a.str(0)?, a.str(1)?)?));
        "count" => (Str) -> Int, move |a| {
            Ok(AbiValue::Int(i64::try_from(docs.count(a.str(0)?)?).unwrap_or(i64::MAX)))
        };
        "create_index" => (Str, Str) -> Unit, move |a| {
            docs.create_index(a.str(0)?, a.str(1)?)?;
            Ok(AbiValue::Unit)
        };
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kv_prefix_listing() {
        let kv = MemoryKvStore::new();
        kv.set("user:2", "bob").unwrap();
        kv.set("user:1", "alice").unwrap();
        kv.set("session:9", "x").unwrap();

        assert_eq!(kv.list("user:").unwrap(), vec!["user:1", "user:2"]);
        assert_eq!(kv.get("user:1").unwrap().as_deref(), Some("alice"));
        assert!(kv.delete("user:1").unwrap());
        assert!(!kv.delete("user:1").unwrap());

        kv.clear().unwrap();
        assert!(kv.is_empty());
    }

    #[test]
    fn test_doc_query_by_equality() {
        let docs = MemoryDocStore::new();
        docs.put("users", "1", r#"{"name":"ada","role":"admin"}"#).unwrap();
        docs.put("users", "2", r#"{"name":"bob","role":"user"}"#).unwrap();
        docs.put("users", "3", r#"{"name":"eve","role":"admin"}"#).unwrap();

        let admins = docs.query("users", r#"{"role":"admin"}"#).unwrap();
        assert_eq!(admins.len(), 2);
        assert!(admins[0].contains("ada"));
        assert!(admins[1].contains("eve"));

        assert_eq!(docs.query("users", "").unwrap().len(), 3);
        assert_eq!(docs.count("users").unwrap(), 3);
        assert_eq!(docs.count("missing").unwrap(), 0);
    }

    #[test]
    fn test_doc_rejects_non_objects() {
        let docs = MemoryDocStore::new();

        assert!(matches!(docs.put("c", "1", "[1,2]"), Err(HostCallError::InvalidInput(_))));
        assert!(matches!(docs.query("c", "3"), Err(HostCallError::InvalidInput(_))));
    }

    #[test]
    fn test_doc_indexes_recorded() {
        let docs = MemoryDocStore::new();
        docs.create_index("users", "email").unwrap();
        assert_eq!(docs.indexes("users"), vec!["email"]);
    }
}
