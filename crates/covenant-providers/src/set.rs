//! The set of providers a host binds imports against.

use std::sync::Arc;

use tracing::debug;

use crate::clock::{self, Clock, SystemClock};
use crate::console::{self, Console, TracingConsole};
use crate::crypto::{self, Crypto, DefaultCrypto};
use crate::database::{self, Database, UnavailableDatabase};
use crate::filesystem::{self, Filesystem, NoFilesystem};
use crate::function::{HostFunction, HostFunctionTable};
use crate::intrinsics;
use crate::network::{self, Network, OfflineNetwork};
use crate::random::{self, OsRandom, RandomSource};
use crate::storage::{self, DocStore, KvStore, MemoryDocStore, MemoryKvStore};

/// One implementation per effect, plus any extra host functions.
///
/// The defaults are safe to hand to untrusted guests: no filesystem, no
/// network, no database, in-memory storage.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use covenant_providers::{BufferedConsole, FixedClock, ProviderSet};
///
/// let providers = ProviderSet::new()
///     .with_console(Arc::new(BufferedConsole::new()))
///     .with_clock(Arc::new(FixedClock::new(0)));
///
/// let table = providers.host_functions();
/// assert!(table.contains(&"std.time.now".into()));
/// ```
#[derive(Clone)]
pub struct ProviderSet {
    console: Arc<dyn Console>,
    filesystem: Arc<dyn Filesystem>,
    network: Arc<dyn Network>,
    database: Arc<dyn Database>,
    kv: Arc<dyn KvStore>,
    docs: Arc<dyn DocStore>,
    clock: Arc<dyn Clock>,
    random: Arc<dyn RandomSource>,
    crypto: Arc<dyn Crypto>,
    extra: Vec<HostFunction>,
}

impl Default for ProviderSet {
    fn default() -> Self {
        Self {
            console: Arc::new(TracingConsole),
            filesystem: Arc::new(NoFilesystem),
            network: Arc::new(OfflineNetwork),
            database: Arc::new(UnavailableDatabase),
            kv: Arc::new(MemoryKvStore::new()),
            docs: Arc::new(MemoryDocStore::new()),
            clock: Arc::new(SystemClock),
            random: Arc::new(OsRandom),
            crypto: Arc::new(DefaultCrypto),
            extra: Vec::new(),
        }
    }
}

impl ProviderSet {
    /// Create a set with the default providers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the console.
    pub fn with_console(mut self, console: Arc<dyn Console>) -> Self {
        self.console = console;
        self
    }

    /// Replace the filesystem.
    pub fn with_filesystem(mut self, filesystem: Arc<dyn Filesystem>) -> Self {
        self.filesystem = filesystem;
        self
    }

    /// Replace the network.
    pub fn with_network(mut self, network: Arc<dyn Network>) -> Self {
        self.network = network;
        self
    }

    /// Replace the database.
    pub fn with_database(mut self, database: Arc<dyn Database>) -> Self {
        self.database = database;
        self
    }

    /// Replace the key-value store.
    pub fn with_kv_store(mut self, kv: Arc<dyn KvStore>) -> Self {
        self.kv = kv;
        self
    }

    /// Replace the document store.
    pub fn with_doc_store(mut self, docs: Arc<dyn DocStore>) -> Self {
        self.docs = docs;
        self
    }

    /// Replace the clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replace the random source.
    pub fn with_random(mut self, random: Arc<dyn RandomSource>) -> Self {
        self.random = random;
        self
    }

    /// Replace the crypto provider.
    pub fn with_crypto(mut self, crypto: Arc<dyn Crypto>) -> Self {
        self.crypto = crypto;
        self
    }

    /// Add a host function. It overrides any built-in with the same import.
    pub fn with_function(mut self, function: HostFunction) -> Self {
        self.extra.push(function);
        self
    }

    /// Build the table of every host function this set provides.
    pub fn host_functions(&self) -> HostFunctionTable {
        let mut table = HostFunctionTable::new();

        intrinsics::register_all(&mut table);
        console::register(&mut table, Arc::clone(&self.console));
        filesystem::register(&mut table, Arc::clone(&self.filesystem));
        network::register(&mut table, Arc::clone(&self.network));
        database::register(&mut table, Arc::clone(&self.database));
        storage::register_kv(&mut table, Arc::clone(&self.kv));
        storage::register_doc(&mut table, Arc::clone(&self.docs));
        clock::register(&mut table, Arc::clone(&self.clock));
        random::register(&mut table, Arc::clone(&self.random));
        crypto::register(&mut table, Arc::clone(&self.crypto));

        for function in &self.extra {
            table.insert(function.clone());
        }

        debug!(functions = table.len(), "Built host function table");
        table
    }
}

impl std::fmt::Debug for ProviderSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderSet")
            .field("extra", &self.extra.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::console::BufferedConsole;
    use crate::function::FunctionKind;
    use covenant_abi::{AbiType, AbiValue, Signature};
    use covenant_capability::{Effect, ImportId, is_gated};

    #[test]
    fn test_every_gated_import_has_a_provider() {
        let table = ProviderSet::new().host_functions();

        for effect in Effect::KNOWN {
            for import in effect.imports() {
                assert!(table.contains(&import), "no provider for {import}");
            }
        }
    }

    #[test]
    fn test_kinds_follow_gating() {
        let table = ProviderSet::new().host_functions();

        for function in table.iter() {
            let gated = is_gated(function.id());
            assert_eq!(
                function.kind() == FunctionKind::Effect,
                gated,
                "{} kind disagrees with gating",
                function.id()
            );
        }
    }

    #[test]
    fn test_custom_console_receives_output() {
        let console = Arc::new(BufferedConsole::new());
        let table = ProviderSet::new().with_console(console.clone()).host_functions();

        table
            .get(&ImportId::new("console.println"))
            .unwrap()
            .call(&[AbiValue::from("hello")])
            .unwrap();

        assert_eq!(console.lines(), vec!["hello".to_string()]);
    }

    #[test]
    fn test_extra_function_overrides_builtin() {
        let table = ProviderSet::new()
            .with_function(HostFunction::new(
                "std.time.now",
                Signature::new(Vec::<AbiType>::new(), AbiType::Int),
                FunctionKind::Effect,
                |_| Ok(AbiValue::Int(7)),
            ))
            .host_functions();

        let now = table.get(&ImportId::new("std.time.now")).unwrap().call(&[]).unwrap();
        assert_eq!(now, AbiValue::Int(7));
    }
}
