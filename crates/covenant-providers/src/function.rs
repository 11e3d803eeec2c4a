//! Host functions and the table the gate binds imports from.

use std::collections::HashMap;
use std::sync::Arc;

use covenant_abi::{AbiValue, Signature};
use covenant_capability::ImportId;
use tracing::debug;

use crate::error::{HostCallError, HostCallResult};

/// The callable behind a host function.
pub type HostHandler = Arc<dyn Fn(&[AbiValue]) -> HostCallResult<AbiValue> + Send + Sync>;

/// Whether a function needs a manifest grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionKind {
    /// An effectful host capability; bound only when granted.
    Effect,
    /// A pure runtime intrinsic; always bound.
    Intrinsic,
}

/// A host function with its ABI signature.
#[derive(Clone)]
pub struct HostFunction {
    id: ImportId,
    signature: Signature,
    kind: FunctionKind,
    handler: HostHandler,
}

impl HostFunction {
    /// Create a host function.
    pub fn new<F>(id: impl Into<ImportId>, signature: Signature, kind: FunctionKind, handler: F) -> Self
    where
        F: Fn(&[AbiValue]) -> HostCallResult<AbiValue> + Send + Sync + 'static,
    {
        Self {
            id: id.into(),
            signature,
            kind,
            handler: Arc::new(handler),
        }
    }

    /// The import this function implements.
    pub fn id(&self) -> &ImportId {
        &self.id
    }

    /// The ABI signature.
    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// Whether the function is gated.
    pub fn kind(&self) -> FunctionKind {
        self.kind
    }

    /// Invoke the handler.
    pub fn call(&self, args: &[AbiValue]) -> HostCallResult<AbiValue> {
        (self.handler)(args)
    }
}

impl std::fmt::Debug for HostFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostFunction")
            .field("id", &self.id)
            .field("signature", &self.signature)
            .field("kind", &self.kind)
            .finish()
    }
}

/// Every host function available for binding, keyed by import.
#[derive(Debug, Clone, Default)]
pub struct HostFunctionTable {
    functions: HashMap<ImportId, HostFunction>,
}

impl HostFunctionTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a function, replacing any previous one for the same import.
    pub fn insert(&mut self, function: HostFunction) {
        debug!(import = %function.id, kind = ?function.kind, "Registered host function");
        self.functions.insert(function.id.clone(), function);
    }

    /// Look up a function.
    pub fn get(&self, id: &ImportId) -> Option<&HostFunction> {
        self.functions.get(id)
    }

    /// Check whether a function is registered.
    pub fn contains(&self, id: &ImportId) -> bool {
        self.functions.contains_key(id)
    }

    /// Iterate over registered functions.
    pub fn iter(&self) -> impl Iterator<Item = &HostFunction> {
        self.functions.values()
    }

    /// Number of registered functions.
    pub fn len(&self) -> usize {
        self.functions.len()
    }

    /// True when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

/// Typed access to decoded arguments.
#[derive(Debug, Clone, Copy)]
pub struct Args<'a>(&'a [AbiValue]);

impl<'a> Args<'a> {
    /// Wrap decoded arguments.
    pub fn new(values: &'a [AbiValue]) -> Self {
        Self(values)
    }

    fn get(&self, index: usize, expected: &'static str) -> HostCallResult<&'a AbiValue> {
        self.0
            .get(index)
            .ok_or(HostCallError::InvalidArgument { index, expected })
    }

    /// A string argument.
    pub fn str(&self, index: usize) -> HostCallResult<&'a str> {
        self.get(index, "str")?
            .as_str()
            .ok_or(HostCallError::InvalidArgument {
                index,
                expected: "str",
            })
    }

    /// An integer argument.
    pub fn int(&self, index: usize) -> HostCallResult<i64> {
        self.get(index, "int")?
            .as_int()
            .ok_or(HostCallError::InvalidArgument {
                index,
                expected: "int",
            })
    }

    /// A boolean argument.
    pub fn bool(&self, index: usize) -> HostCallResult<bool> {
        self.get(index, "bool")?
            .as_bool()
            .ok_or(HostCallError::InvalidArgument {
                index,
                expected: "bool",
            })
    }

    /// A float argument.
    pub fn float(&self, index: usize) -> HostCallResult<f64> {
        self.get(index, "float")?
            .as_float()
            .ok_or(HostCallError::InvalidArgument {
                index,
                expected: "float",
            })
    }

    /// A list argument.
    pub fn list(&self, index: usize) -> HostCallResult<&'a [String]> {
        self.get(index, "list")?
            .as_list()
            .ok_or(HostCallError::InvalidArgument {
                index,
                expected: "list",
            })
    }

    /// A nested list argument.
    pub fn nested_list(&self, index: usize) -> HostCallResult<&'a [Vec<String>]> {
        self.get(index, "nested_list")?
            .as_nested_list()
            .ok_or(HostCallError::InvalidArgument {
                index,
                expected: "nested_list",
            })
    }

    /// A map argument.
    pub fn map(&self, index: usize) -> HostCallResult<&'a [(String, String)]> {
        self.get(index, "map")?
            .as_map()
            .ok_or(HostCallError::InvalidArgument {
                index,
                expected: "map",
            })
    }
}

/// Pin a closure to the handler shape so its argument type is inferred.
pub(crate) fn handler<F>(f: F) -> F
where
    F: Fn(Args<'_>) -> HostCallResult<AbiValue>,
{
    f
}

/// Register functions with a common kind into a table.
///
/// Each entry is `name => (params) -> result, handler`, where the handler
/// receives [`Args`]. With `with state`, every handler gets its own clone
/// of the `Arc` named `state`.
macro_rules! host_functions {
    (@one $table:expr, $kind:expr, $ns:literal, $name:literal, ($($param:ident),*), $result:ident, $handler:expr) => {{
        let handler = $crate::function::handler($handler);
        $table.insert($crate::HostFunction::new(
            concat!($ns, ".", $name),
            ::covenant_abi::Signature::new(
                ::std::vec::Vec::<::covenant_abi::AbiType>::from([
                    $(::covenant_abi::AbiType::$param),*
                ]),
                ::covenant_abi::AbiType::$result,
            ),
            $kind,
            move |values: &[::covenant_abi::AbiValue]| handler($crate::Args::new(values)),
        ));
    }};
    ($table:expr, $kind:expr, $ns:literal, with $state:ident, {
        $($name:literal => ($($param:ident),*) -> $result:ident, $handler:expr;)*
    }) => {
        $(
            {
                let $state = ::std::sync::Arc::clone(&$state);
                $crate::function::host_functions!(@one $table, $kind, $ns, $name, ($($param),*), $result, $handler);
            }
        )*
    };
    ($table:expr, $kind:expr, $ns:literal, {
        $($name:literal => ($($param:ident),*) -> $result:ident, $handler:expr;)*
    }) => {
        $(
            $crate::function::host_functions!(@one $table, $kind, $ns, $name, ($($param),*), $result, $handler);
        )*
    };
}

pub(crate) use host_functions;

#[cfg(test)]
mod tests {
    use super::*;
    use covenant_abi::AbiType;

    #[test]
    fn test_table_lookup_and_call() {
        let mut table = HostFunctionTable::new();
        table.insert(HostFunction::new(
            "text.shout",
            Signature::new([AbiType::Str], AbiType::Str),
            FunctionKind::Intrinsic,
            |values| {
                let s = Args::new(values).str(0)?;
                Ok(AbiValue::Str(s.to_uppercase()))
            },
        ));

        let f = table.get(&ImportId::new("text.shout")).unwrap();
        assert_eq!(f.kind(), FunctionKind::Intrinsic);
        assert_eq!(f.call(&[AbiValue::from("hi")]).unwrap(), AbiValue::from("HI"));
    }

    #[test]
    fn test_args_type_errors() {
        let values = [AbiValue::Int(3)];
        let args = Args::new(&values);

        assert_eq!(args.int(0).unwrap(), 3);
        assert!(args.bool(0).unwrap());
        assert!(matches!(
            args.str(0),
            Err(HostCallError::InvalidArgument { index: 0, expected: "str" })
        ));
        assert!(matches!(args.int(1), Err(HostCallError::InvalidArgument { index: 1, .. })));
    }
}
