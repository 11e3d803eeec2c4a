use covenant_abi::AbiValue;

use crate::error::{HostCallError, HostCallResult};
use crate::function::{FunctionKind, HostFunctionTable, host_functions};

/// Upper bound on strings built by `text.repeat` and `text.pad`.
const MAX_BUILT_LEN: usize = 16 << 20;

fn char_index(s: &str, index: i64) -> usize {
    let count = s.chars().count() as i64;
    let idx = if index < 0 { count + index } else { index };
    idx.clamp(0, count) as usize
}

fn slice(s: &str, start: i64, end: i64) -> String {
    let (start, end) = (char_index(s, start), char_index(s, end));
    if start >= end {
        return String::new();
    }
    s.chars().skip(start).take(end - start).collect()
}

fn built_len(unit: usize, times: usize) -> HostCallResult<usize> {
    unit.checked_mul(times)
        .filter(|n| *n <= MAX_BUILT_LEN)
        .ok_or_else(|| HostCallError::InvalidInput("result too large".into()))
}

fn count(n: i64) -> HostCallResult<usize> {
    usize::try_from(n).map_err(|_| HostCallError::InvalidInput(format!("negative count {n}")))
}

fn pad(s: &str, width: i64, fill: &str, at_start: bool) -> HostCallResult<String> {
    let width = count(width)?;
    let len = s.chars().count();
    let fill_char = fill.chars().next().unwrap_or(' ');
    if len >= width {
        return Ok(s.to_string());
    }

    let padding: String = std::iter::repeat_n(fill_char, built_len(1, width - len)?).collect();
    Ok(if at_start {
        padding + s
    } else {
        format!("{s}{padding}")
    })
}

pub(super) fn register(table: &mut HostFunctionTable) {
    host_functions!(table, FunctionKind::Intrinsic, "text", {
        "len" => (Str) -> Int, |a| Ok(AbiValue::Int(a.str(0)?.chars().count() as i64));
        "upper" => (Str) -> Str, |a| Ok(AbiValue::Str(a.str(0)?.to_uppercase()));
        "lower" => (Str) -> Str, |a| Ok(AbiValue::Str(a.str(0)?.to_lowercase()));
        "trim" => (Str) -> Str, |a| Ok(AbiValue::Str(a.str(0)?.trim().to_string()));
        "concat" => (Str, Str) -> Str, |a| Ok(AbiValue::Str(format!("{}{}", a.str(0)?, a.str(1)?)));
        "contains" => (Str, Str) -> Bool, |a| Ok(AbiValue::Bool(a.str(0)?.contains(a.str(1)?)));
        "starts_with" => (Str, Str) -> Bool, |a| Ok(AbiValue::Bool(a.str(0)?.starts_with(a.str(1)?)));
        "ends_with" => (Str, Str) -> Bool, |a| Ok(AbiValue::Bool(a.str(0)?.ends_with(a.str(1)?)));
        "slice" => (Str, Int, Int) -> Str, |a| Ok(AbiValue::Str(slice(a.str(0)?, a.int(1)?, a.int(2)?)));
        "replace" => (Str, Str, Str) -> Str, |a| {
            let (s, from, to) = (a.str(0)?, a.str(1)?, a.str(2)?);
            if from.is_empty() {
                return Ok(AbiValue::Str(s.to_string()));
            }
            Ok(AbiValue::Str(s.replace(from, to)))
        };
        "split" => (Str, Str) -> List, |a| {
            let (s, sep) = (a.str(0)?, a.str(1)?);
            let parts = if sep.is_empty() {
                s.chars().map(String::from).collect()
            } else {
                s.split(sep).map(String::from).collect()
            };
            Ok(AbiValue::List(parts))
        };
        "join" => (List, Str) -> Str, |a| Ok(AbiValue::Str(a.list(0)?.join(a.str(1)?)));
        "repeat" => (Str, Int) -> Str, |a| {
            let s = a.str(0)?;
            let times = count(a.int(1)?)?;
            built_len(s.len(), times)?;
            Ok(AbiValue::Str(s.repeat(times)))
        };
        "pad" => (Str, Int, Str) -> Str, |a| Ok(AbiValue::Str(pad(a.str(0)?, a.int(1)?, a.str(2)?, false)?));
        "pad_start" => (Str, Int, Str) -> Str, |a| Ok(AbiValue::Str(pad(a.str(0)?, a.int(1)?, a.str(2)?, true)?));
    });
}
