//! ABI value model and the lowering of host signatures to wasm types.
//!
//! Import lowering, as emitted by the Covenant compiler:
//!
//! | type | as parameter | as result |
//! |---|---|---|
//! | string, list, nested list, map | `(i32 ptr, i32 len)` | `i64` fat pointer |
//! | int, bool | `i32` (or `i64`) | `i64` (or `i32`) |
//! | float | `f64` | `f64` |
//! | unit | n/a | nothing |

use serde::{Deserialize, Serialize};
use wasmtime::{FuncType, Val, ValType};

use crate::error::{AbiError, AbiResult};
use crate::fatptr::FatPtr;
use crate::marshal::Marshaller;

/// The type of a value crossing the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbiType {
    /// No value. Only valid as a result.
    Unit,
    /// Boolean encoded as `0`/`1`.
    Bool,
    /// Integer.
    Int,
    /// 64-bit float.
    Float,
    /// UTF-8 string.
    Str,
    /// Collection of strings.
    List,
    /// Collection of string collections.
    NestedList,
    /// Collection of alternating keys and values.
    Map,
}

impl AbiType {
    /// True for types passed by fat pointer.
    pub fn is_indirect(self) -> bool {
        matches!(self, Self::Str | Self::List | Self::NestedList | Self::Map)
    }
}

impl std::fmt::Display for AbiType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Unit => "unit",
            Self::Bool => "bool",
            Self::Int => "int",
            Self::Float => "float",
            Self::Str => "str",
            Self::List => "list",
            Self::NestedList => "nested_list",
            Self::Map => "map",
        };
        f.write_str(name)
    }
}

/// A value crossing the boundary, decoded on the host side.
#[derive(Debug, Clone, PartialEq)]
pub enum AbiValue {
    /// No value.
    Unit,
    /// A boolean.
    Bool(bool),
    /// An integer.
    Int(i64),
    /// A float.
    Float(f64),
    /// A string.
    Str(String),
    /// A list of strings.
    List(Vec<String>),
    /// A list of lists of strings.
    NestedList(Vec<Vec<String>>),
    /// Ordered key/value pairs.
    Map(Vec<(String, String)>),
}

impl AbiValue {
    /// The type of this value.
    pub fn ty(&self) -> AbiType {
        match self {
            Self::Unit => AbiType::Unit,
            Self::Bool(_) => AbiType::Bool,
            Self::Int(_) => AbiType::Int,
            Self::Float(_) => AbiType::Float,
            Self::Str(_) => AbiType::Str,
            Self::List(_) => AbiType::List,
            Self::NestedList(_) => AbiType::NestedList,
            Self::Map(_) => AbiType::Map,
        }
    }

    /// The safe default of a type: zero, false, or empty.
    pub fn default_for(ty: AbiType) -> Self {
        match ty {
            AbiType::Unit => Self::Unit,
            AbiType::Bool => Self::Bool(false),
            AbiType::Int => Self::Int(0),
            AbiType::Float => Self::Float(0.0),
            AbiType::Str => Self::Str(String::new()),
            AbiType::List => Self::List(Vec::new()),
            AbiType::NestedList => Self::NestedList(Vec::new()),
            AbiType::Map => Self::Map(Vec::new()),
        }
    }

    /// Borrow as a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Read as an integer; booleans widen to `0`/`1`.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            Self::Bool(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    /// Read as a boolean; integers are true when non-zero.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            Self::Int(v) => Some(*v != 0),
            _ => None,
        }
    }

    /// Read as a float.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            _ => None,
        }
    }

    /// Borrow as a list of strings.
    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    /// Borrow as a nested list.
    pub fn as_nested_list(&self) -> Option<&[Vec<String>]> {
        match self {
            Self::NestedList(groups) => Some(groups),
            _ => None,
        }
    }

    /// Borrow as key/value pairs.
    pub fn as_map(&self) -> Option<&[(String, String)]> {
        match self {
            Self::Map(pairs) => Some(pairs),
            _ => None,
        }
    }
}

impl From<String> for AbiValue {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<&str> for AbiValue {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<i64> for AbiValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<bool> for AbiValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<f64> for AbiValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<Vec<String>> for AbiValue {
    fn from(items: Vec<String>) -> Self {
        Self::List(items)
    }
}

impl From<()> for AbiValue {
    fn from(_: ()) -> Self {
        Self::Unit
    }
}

/// The ABI-level signature of a host function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    /// Parameter types, in order.
    pub params: Vec<AbiType>,
    /// Result type.
    pub result: AbiType,
}

impl Signature {
    /// Create a signature.
    pub fn new(params: impl Into<Vec<AbiType>>, result: AbiType) -> Self {
        Self {
            params: params.into(),
            result,
        }
    }

    /// The canonical wasm parameter types of this signature.
    pub fn lowered_params(&self) -> Vec<ValType> {
        let mut out = Vec::new();
        for ty in &self.params {
            match ty {
                AbiType::Unit => {}
                AbiType::Bool | AbiType::Int => out.push(ValType::I32),
                AbiType::Float => out.push(ValType::F64),
                _ => {
                    out.push(ValType::I32);
                    out.push(ValType::I32);
                }
            }
        }
        out
    }

    /// The canonical wasm result types of this signature.
    pub fn lowered_results(&self) -> Vec<ValType> {
        match self.result {
            AbiType::Unit => Vec::new(),
            AbiType::Float => vec![ValType::F64],
            _ => vec![ValType::I64],
        }
    }

    /// Check whether a guest import type is a valid lowering of this
    /// signature.
    pub fn accepts(&self, ty: &FuncType) -> bool {
        let params: Vec<ValType> = ty.params().collect();
        let mut slots = params.iter();

        for abi in &self.params {
            let ok = match abi {
                AbiType::Unit => false,
                AbiType::Bool | AbiType::Int => slots.next().is_some_and(is_integer),
                AbiType::Float => slots.next().is_some_and(is_f64),
                _ => slots.next().is_some_and(is_i32) && slots.next().is_some_and(is_i32),
            };
            if !ok {
                return false;
            }
        }
        if slots.next().is_some() {
            return false;
        }

        let results: Vec<ValType> = ty.results().collect();
        match (self.result, results.as_slice()) {
            (AbiType::Unit, []) => true,
            (AbiType::Float, [r]) => is_f64(r),
            (AbiType::Bool | AbiType::Int, [r]) => is_integer(r),
            (t, [r]) if t.is_indirect() => is_i64(r),
            _ => false,
        }
    }
}

impl std::fmt::Display for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("(")?;
        for (i, p) in self.params.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{p}")?;
        }
        write!(f, ") -> {}", self.result)
    }
}

fn is_i32(ty: &ValType) -> bool {
    matches!(ty, ValType::I32)
}

fn is_i64(ty: &ValType) -> bool {
    matches!(ty, ValType::I64)
}

fn is_f64(ty: &ValType) -> bool {
    matches!(ty, ValType::F64)
}

fn is_integer(ty: &ValType) -> bool {
    matches!(ty, ValType::I32 | ValType::I64)
}

fn val_name(val: &Val) -> &'static str {
    match val {
        Val::I32(_) => "i32",
        Val::I64(_) => "i64",
        Val::F32(_) => "f32",
        Val::F64(_) => "f64",
        Val::V128(_) => "v128",
        _ => "ref",
    }
}

fn mismatch(expected: impl std::fmt::Display, found: impl std::fmt::Display) -> AbiError {
    AbiError::TypeMismatch {
        expected: expected.to_string(),
        found: found.to_string(),
    }
}

/// The zero value of a wasm type, if it has one.
pub fn zero_val(ty: &ValType) -> Option<Val> {
    match ty {
        ValType::I32 => Some(Val::I32(0)),
        ValType::I64 => Some(Val::I64(0)),
        ValType::F32 => Some(Val::F32(0)),
        ValType::F64 => Some(Val::F64(0)),
        ValType::V128 => Some(Val::V128(0u128.into())),
        _ => None,
    }
}

/// Decode the raw arguments of a guest call according to `sig`.
///
/// # Errors
///
/// Fails when an argument has an unexpected wasm type or refers to memory
/// that cannot be decoded.
pub fn lift_params(m: &Marshaller<'_>, sig: &Signature, args: &[Val]) -> AbiResult<Vec<AbiValue>> {
    let mut raw = args.iter();
    let mut out = Vec::with_capacity(sig.params.len());

    for ty in &sig.params {
        let value = match ty {
            AbiType::Unit => AbiValue::Unit,
            AbiType::Int => AbiValue::Int(next_integer(&mut raw, *ty)?),
            AbiType::Bool => AbiValue::Bool(next_integer(&mut raw, *ty)? != 0),
            AbiType::Float => match raw.next() {
                Some(Val::F64(bits)) => AbiValue::Float(f64::from_bits(*bits)),
                other => return Err(mismatch("f64", other.map_or("nothing", val_name))),
            },
            indirect => {
                let ptr = next_i32(&mut raw)? as u32;
                let len = next_i32(&mut raw)? as u32;
                read_indirect(m, *indirect, FatPtr::new(ptr, len))?
            }
        };
        out.push(value);
    }

    Ok(out)
}

fn next_integer<'v>(raw: &mut impl Iterator<Item = &'v Val>, ty: AbiType) -> AbiResult<i64> {
    match raw.next() {
        Some(Val::I32(v)) => Ok(i64::from(*v)),
        Some(Val::I64(v)) => Ok(*v),
        other => Err(mismatch(ty, other.map_or("nothing", val_name))),
    }
}

fn next_i32<'v>(raw: &mut impl Iterator<Item = &'v Val>) -> AbiResult<i32> {
    match raw.next() {
        Some(Val::I32(v)) => Ok(*v),
        other => Err(mismatch("i32", other.map_or("nothing", val_name))),
    }
}

/// Decode the value a fat pointer refers to.
pub fn read_indirect(m: &Marshaller<'_>, ty: AbiType, fp: FatPtr) -> AbiResult<AbiValue> {
    Ok(match ty {
        AbiType::Str => AbiValue::Str(m.read_string(fp)?),
        AbiType::List => AbiValue::List(m.read_collection(fp)?),
        AbiType::NestedList => AbiValue::NestedList(m.read_nested_collection(fp)?),
        AbiType::Map => AbiValue::Map(m.read_map(fp)?),
        other => return Err(mismatch("indirect type", other)),
    })
}

/// Write a value into guest memory and return its fat pointer.
pub fn write_indirect(m: &mut Marshaller<'_>, value: &AbiValue) -> AbiResult<FatPtr> {
    match value {
        AbiValue::Str(s) => m.write_string(s),
        AbiValue::List(items) => m.write_collection(items),
        AbiValue::NestedList(groups) => m.write_nested_collection(groups),
        AbiValue::Map(pairs) => m.write_map(pairs),
        other => Err(mismatch("indirect value", other.ty())),
    }
}

/// Encode a host result into the guest's declared result slot.
///
/// `slot` is the guest's declared result type, or `None` for a unit result.
///
/// # Errors
///
/// Fails when the value does not fit the declared slot or cannot be
/// written to guest memory.
pub fn lower_result(
    m: &mut Marshaller<'_>,
    value: &AbiValue,
    slot: Option<&ValType>,
) -> AbiResult<Option<Val>> {
    let Some(slot) = slot else {
        return Ok(None);
    };

    let val = match (value, slot) {
        (AbiValue::Unit, ty) => zero_val(ty).ok_or_else(|| mismatch("unit", "ref"))?,
        (AbiValue::Int(v), ValType::I64) => Val::I64(*v),
        (AbiValue::Int(v), ValType::I32) => Val::I32(*v as i32),
        (AbiValue::Bool(b), ValType::I64) => Val::I64(i64::from(*b)),
        (AbiValue::Bool(b), ValType::I32) => Val::I32(i32::from(*b)),
        (AbiValue::Float(v), ValType::F64) => Val::F64(v.to_bits()),
        (v, ValType::I64) if v.ty().is_indirect() => Val::I64(write_indirect(m, v)?.to_i64()),
        (v, _) => return Err(mismatch(v.ty(), "declared result slot")),
    };
    Ok(Some(val))
}

/// Encode arguments for a call into a guest export whose parameter types
/// are `slots`.
///
/// Indirect values are written into the callee's arena and passed either as
/// an `(i32, i32)` pair or as a single `i64` fat pointer, whichever the
/// export declares.
pub fn lower_params(
    m: &mut Marshaller<'_>,
    values: &[AbiValue],
    slots: &[ValType],
) -> AbiResult<Vec<Val>> {
    let mut out = Vec::with_capacity(slots.len());
    let mut idx = 0;

    for value in values {
        let slot = slots
            .get(idx)
            .ok_or_else(|| mismatch("fewer arguments", "extra value"))?;

        match (value, slot) {
            (AbiValue::Int(v), ValType::I32) => out.push(Val::I32(*v as i32)),
            (AbiValue::Int(v), ValType::I64) => out.push(Val::I64(*v)),
            (AbiValue::Bool(b), ValType::I32) => out.push(Val::I32(i32::from(*b))),
            (AbiValue::Bool(b), ValType::I64) => out.push(Val::I64(i64::from(*b))),
            (AbiValue::Float(v), ValType::F64) => out.push(Val::F64(v.to_bits())),
            (AbiValue::Float(v), ValType::F32) => out.push(Val::F32((*v as f32).to_bits())),
            (v, ValType::I64) if v.ty().is_indirect() => {
                out.push(Val::I64(write_indirect(m, v)?.to_i64()));
            }
            (v, ValType::I32) if v.ty().is_indirect() && matches!(slots.get(idx + 1), Some(ValType::I32)) => {
                let fp = write_indirect(m, v)?;
                out.push(Val::I32(fp.ptr as i32));
                out.push(Val::I32(fp.len as i32));
                idx += 1;
            }
            (v, _) => return Err(mismatch(v.ty(), "export parameter")),
        }
        idx += 1;
    }

    if idx != slots.len() {
        return Err(mismatch(format!("{} parameter slots", slots.len()), idx));
    }
    Ok(out)
}

/// Decode the results of a guest export call as a value of type `ty`.
///
/// Indirect types expect a single `i64` fat pointer into the callee's
/// memory.
///
/// # Errors
///
/// Fails when the results do not have the shape `ty` lowers to.
pub fn lift_result(m: &Marshaller<'_>, ty: AbiType, results: &[Val]) -> AbiResult<AbiValue> {
    let first = results.first();
    Ok(match (ty, first) {
        (AbiType::Unit, _) => AbiValue::Unit,
        (AbiType::Int, Some(Val::I32(v))) => AbiValue::Int(i64::from(*v)),
        (AbiType::Int, Some(Val::I64(v))) => AbiValue::Int(*v),
        (AbiType::Bool, Some(Val::I32(v))) => AbiValue::Bool(*v != 0),
        (AbiType::Bool, Some(Val::I64(v))) => AbiValue::Bool(*v != 0),
        (AbiType::Float, Some(Val::F64(bits))) => AbiValue::Float(f64::from_bits(*bits)),
        (AbiType::Float, Some(Val::F32(bits))) => AbiValue::Float(f64::from(f32::from_bits(*bits))),
        (indirect, Some(Val::I64(raw))) if indirect.is_indirect() => {
            read_indirect(m, indirect, FatPtr::from_i64(*raw))?
        }
        (ty, other) => return Err(mismatch(ty, other.map_or("nothing", val_name))),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::Arena;
    use crate::memory::VecMemory;
    use wasmtime::Engine;

    fn func_type(params: &[ValType], results: &[ValType]) -> FuncType {
        FuncType::new(&Engine::default(), params.iter().cloned(), results.iter().cloned())
    }

    #[test]
    fn test_signature_accepts_canonical_lowering() {
        let sig = Signature::new([AbiType::Str, AbiType::Int], AbiType::Str);
        let ty = func_type(&sig.lowered_params(), &sig.lowered_results());

        assert!(sig.accepts(&ty));
        assert_eq!(sig.to_string(), "(str, int) -> str");
    }

    #[test]
    fn test_signature_accepts_integer_widths() {
        let sig = Signature::new([AbiType::Int], AbiType::Bool);

        assert!(sig.accepts(&func_type(&[ValType::I64], &[ValType::I32])));
        assert!(sig.accepts(&func_type(&[ValType::I32], &[ValType::I64])));
        assert!(!sig.accepts(&func_type(&[ValType::F64], &[ValType::I64])));
        assert!(!sig.accepts(&func_type(&[ValType::I32], &[])));
    }

    #[test]
    fn test_signature_rejects_wrong_arity() {
        let sig = Signature::new([AbiType::Str], AbiType::Unit);

        assert!(sig.accepts(&func_type(&[ValType::I32, ValType::I32], &[])));
        assert!(!sig.accepts(&func_type(&[ValType::I32], &[])));
        assert!(!sig.accepts(&func_type(&[ValType::I32, ValType::I32, ValType::I32], &[])));
        assert!(!sig.accepts(&func_type(&[ValType::I32, ValType::I32], &[ValType::I64])));
    }

    #[test]
    fn test_lift_and_lower() {
        let mut mem = VecMemory::default();
        let mut arena = Arena::new(1024);
        let mut m = Marshaller::new(&mut mem, &mut arena);

        let fp = m.write_string("héllo").unwrap();
        let sig = Signature::new([AbiType::Str, AbiType::Int, AbiType::Bool], AbiType::Str);
        let args = [
            Val::I32(fp.ptr as i32),
            Val::I32(fp.len as i32),
            Val::I64(-7),
            Val::I32(1),
        ];

        let values = lift_params(&m, &sig, &args).unwrap();
        assert_eq!(
            values,
            vec![AbiValue::from("héllo"), AbiValue::Int(-7), AbiValue::Bool(true)]
        );

        let out = lower_result(&mut m, &AbiValue::from("bye"), Some(&ValType::I64))
            .unwrap()
            .unwrap();
        let Val::I64(raw) = out else {
            panic!("expected i64 result");
        };
        assert_eq!(m.read_string(FatPtr::from_i64(raw)).unwrap(), "bye");
    }

    #[test]
    fn test_lift_rejects_wrong_wasm_type() {
        let mut arena = Arena::new(1024);
        let m = Marshaller::detached(&mut arena);
        let sig = Signature::new([AbiType::Float], AbiType::Unit);

        let result = lift_params(&m, &sig, &[Val::I32(1)]);
        assert!(matches!(result, Err(AbiError::TypeMismatch { .. })));
    }

    #[test]
    fn test_lower_params_for_either_string_convention() {
        let mut mem = VecMemory::default();
        let mut arena = Arena::new(1024);
        let mut m = Marshaller::new(&mut mem, &mut arena);

        let pair = lower_params(&mut m, &[AbiValue::from("ab")], &[ValType::I32, ValType::I32])
            .unwrap();
        assert_eq!(pair.len(), 2);

        let packed = lower_params(&mut m, &[AbiValue::from("ab")], &[ValType::I64]).unwrap();
        let Val::I64(raw) = packed[0] else {
            panic!("expected i64 argument");
        };
        assert_eq!(m.read_string(FatPtr::from_i64(raw)).unwrap(), "ab");
    }

    #[test]
    fn test_defaults_are_empty() {
        assert_eq!(AbiValue::default_for(AbiType::Str), AbiValue::Str(String::new()));
        assert_eq!(AbiValue::default_for(AbiType::Int), AbiValue::Int(0));
        assert!(matches!(zero_val(&ValType::I64), Some(Val::I64(0))));
    }

    #[test]
    fn test_lift_result_reads_fat_pointer() {
        let mut memory = VecMemory::default();
        let mut arena = Arena::new(1024);
        let mut m = Marshaller::new(&mut memory, &mut arena);
        let fp = m.write_string("symbols").unwrap();

        let value = lift_result(&m, AbiType::Str, &[Val::I64(fp.to_i64())]).unwrap();
        assert_eq!(value, AbiValue::Str("symbols".into()));

        assert_eq!(lift_result(&m, AbiType::Int, &[Val::I32(-3)]).unwrap(), AbiValue::Int(-3));
        assert_eq!(lift_result(&m, AbiType::Bool, &[Val::I64(1)]).unwrap(), AbiValue::Bool(true));
        assert_eq!(lift_result(&m, AbiType::Unit, &[]).unwrap(), AbiValue::Unit);
        assert!(lift_result(&m, AbiType::Str, &[Val::I32(4)]).is_err());
    }
}
