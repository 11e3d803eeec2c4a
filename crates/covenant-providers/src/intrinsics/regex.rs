//! Regular expressions under `std.text`.

use std::sync::Arc;

use covenant_abi::AbiValue;
use dashmap::DashMap;
use regex::Regex;

use crate::error::{HostCallError, HostCallResult};
use crate::function::{FunctionKind, HostFunctionTable, host_functions};

const MAX_CACHED: usize = 256;

/// Compiled patterns, shared by every `std.text` call of one table.
#[derive(Debug, Default)]
pub struct RegexCache {
    compiled: DashMap<String, Regex>,
}

impl RegexCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile `pattern`, reusing an earlier compilation.
    ///
    /// # Errors
    ///
    /// Returns [`HostCallError::InvalidInput`] for invalid patterns.
    pub fn get(&self, pattern: &str) -> HostCallResult<Regex> {
        if let Some(re) = self.compiled.get(pattern) {
            return Ok(re.clone());
        }

        let re = Regex::new(pattern)
            .map_err(|e| HostCallError::InvalidInput(format!("invalid regex: {e}")))?;
        if self.compiled.len() >= MAX_CACHED {
            self.compiled.clear();
        }
        self.compiled.insert(pattern.to_string(), re.clone());
        Ok(re)
    }
}

pub(super) fn register(table: &mut HostFunctionTable) {
    let cache = Arc::new(RegexCache::new());

    host_functions!(table, FunctionKind::Intrinsic, "std.text", with cache, {
        "regex_match" => (Str, Str) -> Bool, move |a| {
            Ok(AbiValue::Bool(cache.get(a.str(0)?)?.is_match(a.str(1)?)))
        };
        "regex_find" => (Str, Str) -> Str, move |a| {
            let found = cache.get(a.str(0)?)?.find(a.str(1)?).map(|m| m.as_str().to_string());
            Ok(AbiValue::Str(found.unwrap_or_default()))
        };
        "regex_find_all" => (Str, Str) -> List, move |a| {
            let re = cache.get(a.str(0)?)?;
            Ok(AbiValue::List(re.find_iter(a.str(1)?).map(|m| m.as_str().to_string()).collect()))
        };
        "regex_replace" => (Str, Str, Str) -> Str, move |a| {
            let re = cache.get(a.str(0)?)?;
            Ok(AbiValue::Str(re.replace_all(a.str(1)?, a.str(2)?).into_owned()))
        };
        "regex_split" => (Str, Str) -> List, move |a| {
            let re = cache.get(a.str(0)?)?;
            Ok(AbiValue::List(re.split(a.str(1)?).map(String::from).collect()))
        };
        "regex_captures" => (Str, Str) -> List, move |a| {
            let re = cache.get(a.str(0)?)?;
            let groups = re
                .captures(a.str(1)?)
                .map(|caps| {
                    caps.iter()
                        .map(|m| m.map(|m| m.as_str().to_string()).unwrap_or_default())
                        .collect()
                })
                .unwrap_or_default();
            Ok(AbiValue::List(groups))
        };
    });
}

#[cfg(test)]
mod tests {
    use super::super::testing::{call, list, s};
    use super::*;

    #[test]
    fn test_match_and_find() {
        assert_eq!(
            call("std.text.regex_match", &[s(r"^\d{3}$"), s("123")]).unwrap(),
            AbiValue::Bool(true)
        );
        assert_eq!(
            call("std.text.regex_find", &[s(r"\d+"), s("abc 42 x 7")]).unwrap(),
            s("42")
        );
        assert_eq!(
            call("std.text.regex_find_all", &[s(r"\d+"), s("abc 42 x 7")]).unwrap(),
            list(&["42", "7"])
        );
    }

    #[test]
    fn test_replace_and_captures() {
        assert_eq!(
            call("std.text.regex_replace", &[s(r"(\w+)@(\w+)"), s("ann@host"), s("$2:$1")]).unwrap(),
            s("host:ann")
        );
        assert_eq!(
            call("std.text.regex_captures", &[s(r"(\w+)=(\d+)"), s("x=10")]).unwrap(),
            list(&["x=10", "x", "10"])
        );
    }

    #[test]
    fn test_invalid_pattern() {
        let err = call("std.text.regex_match", &[s("("), s("x")]).unwrap_err();
        assert!(matches!(err, HostCallError::InvalidInput(_)));
    }

    #[test]
    fn test_cache_reuses_compilation() {
        let cache = RegexCache::new();
        cache.get("a+").unwrap();
        cache.get("a+").unwrap();
        assert_eq!(cache.compiled.len(), 1);
    }
}
