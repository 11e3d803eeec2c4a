//! # Covenant Host
//!
//! Runs WebAssembly modules produced by the Covenant compiler under the
//! capabilities they declare.
//!
//! Every module embeds a list of its symbols and the effects each one
//! declares. The host reads that list before granting anything, and binds
//! only the host functions those effects name:
//!
//! 1. **Compile** the module once.
//! 2. **Probe**: instantiate it against inert imports and call
//!    `_cov_get_symbol_metadata` to build its manifest.
//! 3. **Link**: instantiate it again against imports filtered by the
//!    manifest, run `_initialize`, and register it.
//!
//! Modules loaded together call each other directly, and any module can be
//! hot swapped without disturbing the others.
//!
//! ## Quick Start
//!
//! ```no_run
//! use covenant_host::prelude::*;
//!
//! let mut host = Host::builder()
//!     .with_on_denied(|import| eprintln!("denied: {import}"))
//!     .build()?;
//!
//! let handle = host.load_module("symbols", "symbols.wasm")?;
//! let name = host.call_with(&handle, "describe", &[AbiValue::Str("main".into())], AbiType::Str)?;
//! println!("{name:?}");
//! # Ok::<(), HostError>(())
//! ```
//!
//! ## Enforcement
//!
//! | policy | ungranted gated import |
//! |---|---|
//! | strict (default) | traps; the call fails with [`HostError::CapabilityDenied`] |
//! | warn only | logs, reports, returns `0`/empty |
//! | permissive | bound to the real host function |
//!
//! Every denial is reported through the `on_denied` callback and as a
//! [`HostEvent::CapabilityDenied`](covenant_observe::HostEvent) whatever the
//! policy.

use std::sync::Arc;

use covenant_abi::DEFAULT_ARENA_BASE;
use covenant_capability::{GatePolicy, ImportId};
use covenant_core::{CovenantEngine, EngineConfig, IntoShared, ResourceLimits, StorePurpose, new_store};
use covenant_gate::{CapabilityGate, DeniedCallback};
use covenant_observe::{EventDispatcher, EventSubscriber, MetricsCollector};
use covenant_providers::ProviderSet;

pub mod config;
pub mod error;
pub mod extract;
pub mod handle;
pub mod host;
mod loader;
pub mod registry;

pub use config::{DEFAULT_LINK_ORDER, HostConfig, LinkSpec, ProviderConfig};
pub use error::{HostError, HostResult};
pub use extract::{INITIALIZE_EXPORT, METADATA_EXPORT, extract_manifest};
pub use handle::ModuleHandle;
pub use host::Host;
pub use registry::{ModuleEntry, Registry};

// Re-export the layers a host is assembled from.
pub use covenant_abi;
pub use covenant_capability;
pub use covenant_core;
pub use covenant_gate;
pub use covenant_observe;
pub use covenant_providers;

/// Builder for configuring a [`Host`].
pub struct HostBuilder {
    engine_config: EngineConfig,
    limits: ResourceLimits,
    policy: GatePolicy,
    providers: ProviderSet,
    on_denied: Option<DeniedCallback>,
    subscribers: Vec<Arc<dyn EventSubscriber>>,
    arena_base: u32,
}

impl HostBuilder {
    /// Create a builder with default configuration: strict enforcement and
    /// the default providers.
    pub fn new() -> Self {
        Self {
            engine_config: EngineConfig::default(),
            limits: ResourceLimits::default(),
            policy: GatePolicy::default(),
            providers: ProviderSet::new(),
            on_denied: None,
            subscribers: Vec::new(),
            arena_base: DEFAULT_ARENA_BASE,
        }
    }

    /// Start from a configuration.
    ///
    /// # Errors
    ///
    /// Fails when the configured providers cannot be built.
    pub fn from_config(config: &HostConfig) -> HostResult<Self> {
        Ok(Self::new()
            .with_engine_config(config.engine.clone())
            .with_limits(config.limits.clone())
            .with_policy(config.policy)
            .with_arena_base(config.arena_base)
            .with_providers(config.providers.build()?))
    }

    // Engine and store

    /// Set the engine configuration.
    pub fn with_engine_config(mut self, config: EngineConfig) -> Self {
        self.engine_config = config;
        self
    }

    /// Set the store limits.
    pub fn with_limits(mut self, limits: ResourceLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Set the maximum size of each linear memory in bytes.
    pub fn with_memory_limit(mut self, bytes: usize) -> Self {
        self.limits.max_memory_bytes = bytes;
        self
    }

    /// Set the offset each instance's arena starts at.
    pub fn with_arena_base(mut self, base: u32) -> Self {
        self.arena_base = base;
        self
    }

    // Enforcement

    /// Set the enforcement policy.
    pub fn with_policy(mut self, policy: GatePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Log and return defaults on denied calls instead of trapping.
    pub fn warn_only(self) -> Self {
        self.with_policy(GatePolicy::warn_only())
    }

    /// Bind every import regardless of manifests.
    pub fn permissive(self) -> Self {
        self.with_policy(GatePolicy::permissive())
    }

    /// Call `f` with the import name on every denied call.
    pub fn with_on_denied<F>(mut self, f: F) -> Self
    where
        F: Fn(&ImportId) + Send + Sync + 'static,
    {
        let callback: DeniedCallback = Arc::new(f);
        self.on_denied = Some(callback);
        self
    }

    // Providers and observability

    /// Set the host function providers.
    pub fn with_providers(mut self, providers: ProviderSet) -> Self {
        self.providers = providers;
        self
    }

    /// Add an event subscriber.
    pub fn with_event_subscriber(mut self, subscriber: Arc<dyn EventSubscriber>) -> Self {
        self.subscribers.push(subscriber);
        self
    }

    /// Build the host.
    ///
    /// # Errors
    ///
    /// Fails when the engine cannot be created.
    pub fn build(self) -> HostResult<Host> {
        let engine = CovenantEngine::new(self.engine_config)?.into_shared();

        let events = Arc::new(EventDispatcher::new());
        let metrics = Arc::new(MetricsCollector::new());
        events.subscribe(metrics.clone());
        for subscriber in self.subscribers {
            events.subscribe(subscriber);
        }

        let mut gate = CapabilityGate::new(self.providers.host_functions())
            .with_policy(self.policy)
            .with_events(Arc::clone(&events));
        if let Some(on_denied) = self.on_denied {
            gate = gate.with_on_denied(on_denied);
        }

        let store = new_store(&engine, StorePurpose::Live, &self.limits);

        Ok(Host::from_parts(
            engine,
            self.limits,
            store,
            gate,
            events,
            metrics,
            self.arena_base,
        ))
    }
}

impl Default for HostBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl Host {
    /// Create a host builder.
    pub fn builder() -> HostBuilder {
        HostBuilder::new()
    }

    /// Create a host with default configuration.
    ///
    /// # Errors
    ///
    /// Fails when the engine cannot be created.
    pub fn with_defaults() -> HostResult<Host> {
        HostBuilder::new().build()
    }

    /// Create a host from a configuration, without loading its links.
    ///
    /// # Errors
    ///
    /// Fails when the providers or the engine cannot be built.
    pub fn from_config(config: &HostConfig) -> HostResult<Host> {
        HostBuilder::from_config(config)?.build()
    }
}

/// Prelude for common imports.
pub mod prelude {
    pub use crate::{Host, HostBuilder, HostConfig, HostError, HostResult, LinkSpec, ModuleHandle};
    pub use covenant_abi::{AbiType, AbiValue, FatPtr};
    pub use covenant_capability::{CapabilityManifest, EmbeddableSymbol, GatePolicy, ImportId};
    pub use covenant_observe::{BindingKind, CollectingSubscriber, EventSubscriber, HostEvent, LoadReport};
    pub use covenant_providers::ProviderSet;
}
