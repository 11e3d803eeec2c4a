//! Subcommands and the pieces they share.

use std::path::Path;

use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::Serialize;
use serde_json::json;

use covenant_host::prelude::*;

use crate::OutputFormat;

pub mod inspect;
pub mod link;
pub mod run;
pub mod validate;

/// Read the host configuration at `path`, or use defaults.
pub fn load_config(path: Option<&Path>) -> Result<HostConfig> {
    match path {
        Some(path) => HostConfig::from_file(path)
            .with_context(|| format!("Failed to read configuration from {}", path.display())),
        None => Ok(HostConfig::default()),
    }
}

/// Name a module after its file stem.
pub fn module_name(path: &Path, explicit: Option<&str>) -> Result<String> {
    if let Some(name) = explicit {
        return Ok(name.to_string());
    }
    path.file_stem()
        .and_then(|s| s.to_str())
        .map(String::from)
        .with_context(|| format!("Cannot derive a module name from {}", path.display()))
}

/// How to decode an export's result.
#[derive(Clone, Copy, Debug, Default, ValueEnum)]
pub enum ReturnType {
    /// No result
    #[default]
    Unit,
    /// `i32` boolean
    Bool,
    /// `i64` integer
    Int,
    /// `f64` float
    Float,
    /// Fat pointer to a UTF-8 string
    Str,
    /// Fat pointer to a list of strings
    List,
    /// Fat pointer to a list of string lists
    NestedList,
    /// Fat pointer to string pairs
    Map,
}

impl From<ReturnType> for AbiType {
    fn from(ty: ReturnType) -> Self {
        match ty {
            ReturnType::Unit => AbiType::Unit,
            ReturnType::Bool => AbiType::Bool,
            ReturnType::Int => AbiType::Int,
            ReturnType::Float => AbiType::Float,
            ReturnType::Str => AbiType::Str,
            ReturnType::List => AbiType::List,
            ReturnType::NestedList => AbiType::NestedList,
            ReturnType::Map => AbiType::Map,
        }
    }
}

/// Call `export` with string arguments and decode its result.
pub fn call_export(
    host: &mut Host,
    handle: &ModuleHandle,
    export: &str,
    args: &[String],
    returns: ReturnType,
) -> HostResult<AbiValue> {
    let args: Vec<AbiValue> = args.iter().cloned().map(AbiValue::Str).collect();
    host.call_with(handle, export, &args, returns.into())
}

pub fn value_to_json(value: &AbiValue) -> serde_json::Value {
    match value {
        AbiValue::Unit => serde_json::Value::Null,
        AbiValue::Bool(b) => json!(b),
        AbiValue::Int(i) => json!(i),
        AbiValue::Float(f) => json!(f),
        AbiValue::Str(s) => json!(s),
        AbiValue::List(items) => json!(items),
        AbiValue::NestedList(rows) => json!(rows),
        AbiValue::Map(pairs) => {
            let object: serde_json::Map<String, serde_json::Value> =
                pairs.iter().map(|(k, v)| (k.clone(), json!(v))).collect();
            serde_json::Value::Object(object)
        }
    }
}

pub fn print_json<T: Serialize>(value: &T, format: OutputFormat) -> Result<()> {
    let text = match format {
        OutputFormat::JsonCompact => serde_json::to_string(value)?,
        _ => serde_json::to_string_pretty(value)?,
    };
    println!("{text}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_name_from_stem() {
        assert_eq!(module_name(Path::new("out/symbols.wasm"), None).unwrap(), "symbols");
        assert_eq!(module_name(Path::new("a.wasm"), Some("query")).unwrap(), "query");
    }

    #[test]
    fn test_map_renders_as_object() {
        let value = AbiValue::Map(vec![("k".into(), "v".into())]);
        assert_eq!(value_to_json(&value), json!({"k": "v"}));
        assert_eq!(value_to_json(&AbiValue::Unit), serde_json::Value::Null);
    }
}
