use covenant_abi::AbiValue;

use crate::error::{HostCallError, HostCallResult};
use crate::function::{FunctionKind, HostFunctionTable, host_functions};

fn index(list: &[String], i: i64) -> HostCallResult<&str> {
    usize::try_from(i)
        .ok()
        .and_then(|i| list.get(i))
        .map(String::as_str)
        .ok_or_else(|| HostCallError::InvalidInput(format!("index {i} out of range for length {}", list.len())))
}

pub(super) fn register(table: &mut HostFunctionTable) {
    host_functions!(table, FunctionKind::Intrinsic, "list", {
        "len" => (List) -> Int, |a| Ok(AbiValue::Int(a.list(0)?.len() as i64));
        "get" => (List, Int) -> Str, |a| Ok(AbiValue::from(index(a.list(0)?, a.int(1)?)?));
        "first" => (List) -> Str, |a| Ok(AbiValue::Str(a.list(0)?.first().cloned().unwrap_or_default()));
        "last" => (List) -> Str, |a| Ok(AbiValue::Str(a.list(0)?.last().cloned().unwrap_or_default()));
        "append" => (List, Str) -> List, |a| {
            let mut items = a.list(0)?.to_vec();
            items.push(a.str(1)?.to_string());
            Ok(AbiValue::List(items))
        };
        "concat" => (List, List) -> List, |a| Ok(AbiValue::List([a.list(0)?, a.list(1)?].concat()));
        "contains" => (List, Str) -> Bool, |a| {
            let needle = a.str(1)?;
            Ok(AbiValue::Bool(a.list(0)?.iter().any(|s| s == needle)))
        };
        "index_of" => (List, Str) -> Int, |a| {
            let needle = a.str(1)?;
            let pos = a.list(0)?.iter().position(|s| s == needle);
            Ok(AbiValue::Int(pos.map_or(-1, |p| p as i64)))
        };
        "reverse" => (List) -> List, |a| Ok(AbiValue::List(a.list(0)?.iter().rev().cloned().collect()));
        "flatten" => (NestedList) -> List, |a| Ok(AbiValue::List(a.nested_list(0)?.concat()));
    });
}

#[cfg(test)]
mod tests {
    use super::super::testing::{call, list, s};
    use covenant_abi::AbiValue;

    #[test]
    fn test_access() {
        let items = list(&["a", "b", "c"]);
        assert_eq!(call("list.len", &[items.clone()]).unwrap(), AbiValue::Int(3));
        assert_eq!(call("list.get", &[items.clone(), AbiValue::Int(1)]).unwrap(), s("b"));
        assert_eq!(call("list.last", &[items.clone()]).unwrap(), s("c"));
        assert!(call("list.get", &[items.clone(), AbiValue::Int(3)]).is_err());
        assert!(call("list.get", &[items, AbiValue::Int(-1)]).is_err());
        assert_eq!(call("list.first", &[list(&[])]).unwrap(), s(""));
    }

    #[test]
    fn test_building() {
        assert_eq!(
            call("list.append", &[list(&["a"]), s("b")]).unwrap(),
            list(&["a", "b"])
        );
        assert_eq!(
            call("list.index_of", &[list(&["a", "b"]), s("z")]).unwrap(),
            AbiValue::Int(-1)
        );

        let nested = AbiValue::NestedList(vec![vec!["a".into()], vec![], vec!["b".into(), "c".into()]]);
        assert_eq!(call("list.flatten", &[nested]).unwrap(), list(&["a", "b", "c"]));
    }
}
