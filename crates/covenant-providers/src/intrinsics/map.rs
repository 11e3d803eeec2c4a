use covenant_abi::AbiValue;

use crate::function::{FunctionKind, HostFunctionTable, host_functions};

fn lookup<'a>(pairs: &'a [(String, String)], key: &str) -> Option<&'a str> {
    // Later entries shadow earlier ones.
    pairs.iter().rev().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
}

pub(super) fn register(table: &mut HostFunctionTable) {
    host_functions!(table, FunctionKind::Intrinsic, "map", {
        "len" => (Map) -> Int, |a| Ok(AbiValue::Int(a.map(0)?.len() as i64));
        "get" => (Map, Str) -> Str, |a| Ok(AbiValue::from(lookup(a.map(0)?, a.str(1)?).unwrap_or_default()));
        "has" => (Map, Str) -> Bool, |a| Ok(AbiValue::Bool(lookup(a.map(0)?, a.str(1)?).is_some()));
        "keys" => (Map) -> List, |a| Ok(AbiValue::List(a.map(0)?.iter().map(|(k, _)| k.clone()).collect()));
        "values" => (Map) -> List, |a| Ok(AbiValue::List(a.map(0)?.iter().map(|(_, v)| v.clone()).collect()));
        "insert" => (Map, Str, Str) -> Map, |a| {
            let (key, value) = (a.str(1)?, a.str(2)?);
            let mut pairs: Vec<_> = a.map(0)?.iter().filter(|(k, _)| k != key).cloned().collect();
            pairs.push((key.to_string(), value.to_string()));
            Ok(AbiValue::Map(pairs))
        };
    });
}
