//! Database access: `db.execute_query`.

use std::sync::Arc;

use covenant_abi::AbiValue;

use crate::error::{HostCallError, HostCallResult};
use crate::function::{FunctionKind, HostFunctionTable, host_functions};

/// A query backend.
///
/// Results are returned to the guest as a JSON document.
pub trait Database: Send + Sync {
    /// Execute `query` and return the result set as JSON.
    fn execute_query(&self, query: &str) -> HostCallResult<String>;
}

/// The default backend: no database is attached.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailableDatabase;

impl Database for UnavailableDatabase {
    fn execute_query(&self, _query: &str) -> HostCallResult<String> {
        Err(HostCallError::Unavailable(
            "no database is attached to this host".into(),
        ))
    }
}

pub(crate) fn register(table: &mut HostFunctionTable, db: Arc<dyn Database>) {
    host_functions!(table, FunctionKind::Effect, "db", with db, {
        "execute_query" => (Str) -> Str, move |a| Ok(AbiValue::Str(db.execute_query(a.str(0)?)?));
    });
}
