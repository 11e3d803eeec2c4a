//! Counters for host calls, denials and module lifecycle.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use covenant_capability::ImportId;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::events::{EventSubscriber, HostEvent};

#[derive(Debug, Default)]
struct CallCounter {
    calls: u64,
    errors: u64,
    total: Duration,
}

/// Collects host metrics.
///
/// Feed it directly through the `record_*` methods, or subscribe it to an
/// [`EventDispatcher`](crate::EventDispatcher) and let events drive it.
#[derive(Debug, Default)]
pub struct MetricsCollector {
    host_calls: DashMap<ImportId, CallCounter>,
    denials: DashMap<ImportId, u64>,
    arena_bytes: DashMap<String, u32>,
    loads: AtomicU64,
    swaps: AtomicU64,
    failed_loads: AtomicU64,
    degraded_manifests: AtomicU64,
}

impl MetricsCollector {
    /// Create a new metrics collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a completed host call.
    pub fn record_host_call(&self, import: &ImportId, duration: Duration, ok: bool) {
        let mut counter = self.host_calls.entry(import.clone()).or_default();
        counter.calls += 1;
        counter.total += duration;
        if !ok {
            counter.errors += 1;
        }
    }

    /// Record a denied call.
    pub fn record_denial(&self, import: &ImportId) {
        *self.denials.entry(import.clone()).or_insert(0) += 1;
    }

    /// Record the bytes a module's arena has handed out.
    pub fn record_arena_bytes(&self, module: &str, bytes: u32) {
        self.arena_bytes.insert(module.to_string(), bytes);
    }

    /// Record a successful load.
    pub fn record_load(&self) {
        self.loads.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a successful swap.
    pub fn record_swap(&self) {
        self.swaps.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a failed load or swap.
    pub fn record_failed_load(&self) {
        self.failed_loads.fetch_add(1, Ordering::Relaxed);
    }

    /// Number of times `import` was denied.
    pub fn denials_of(&self, import: &ImportId) -> u64 {
        self.denials.get(import).map_or(0, |n| *n)
    }

    /// Number of completed calls to `import`.
    pub fn calls_to(&self, import: &ImportId) -> u64 {
        self.host_calls.get(import).map_or(0, |c| c.calls)
    }

    /// Get a snapshot of all metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let host_calls = self
            .host_calls
            .iter()
            .map(|entry| {
                let c = entry.value();
                (
                    entry.key().to_string(),
                    HostCallMetrics {
                        calls: c.calls,
                        errors: c.errors,
                        total_micros: c.total.as_micros() as u64,
                    },
                )
            })
            .collect();

        MetricsSnapshot {
            host_calls,
            denials: self
                .denials
                .iter()
                .map(|e| (e.key().to_string(), *e.value()))
                .collect(),
            arena_bytes: self
                .arena_bytes
                .iter()
                .map(|e| (e.key().clone(), *e.value()))
                .collect(),
            loads: self.loads.load(Ordering::Relaxed),
            swaps: self.swaps.load(Ordering::Relaxed),
            failed_loads: self.failed_loads.load(Ordering::Relaxed),
            degraded_manifests: self.degraded_manifests.load(Ordering::Relaxed),
        }
    }

    /// Reset all metrics.
    pub fn reset(&self) {
        self.host_calls.clear();
        self.denials.clear();
        self.arena_bytes.clear();
        self.loads.store(0, Ordering::Relaxed);
        self.swaps.store(0, Ordering::Relaxed);
        self.failed_loads.store(0, Ordering::Relaxed);
        self.degraded_manifests.store(0, Ordering::Relaxed);
    }
}

impl EventSubscriber for MetricsCollector {
    fn on_event(&self, event: &HostEvent) {
        match event {
            HostEvent::ModuleLoaded { .. } => self.record_load(),
            HostEvent::ModuleSwapped { .. } => self.record_swap(),
            HostEvent::LoadFailed { .. } => self.record_failed_load(),
            HostEvent::ManifestDegraded { .. } => {
                self.degraded_manifests.fetch_add(1, Ordering::Relaxed);
            }
            HostEvent::CapabilityDenied { import, .. } => self.record_denial(import),
            HostEvent::HostCall {
                import,
                duration,
                ok,
                ..
            } => self.record_host_call(import, *duration, *ok),
            HostEvent::ModuleInitialized { .. } => {}
        }
    }
}

/// Snapshot of collected metrics. Maps are keyed by import or module name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Per-import call statistics.
    pub host_calls: BTreeMap<String, HostCallMetrics>,
    /// Per-import denial counts.
    pub denials: BTreeMap<String, u64>,
    /// Arena bytes in use per module.
    pub arena_bytes: BTreeMap<String, u32>,
    /// Successful loads, swaps included.
    pub loads: u64,
    /// Successful swaps.
    pub swaps: u64,
    /// Failed loads and swaps.
    pub failed_loads: u64,
    /// Loads that fell back to a deny-all manifest.
    pub degraded_manifests: u64,
}

impl MetricsSnapshot {
    /// Total denials across all imports.
    pub fn total_denials(&self) -> u64 {
        self.denials.values().sum()
    }

    /// Total host calls across all imports.
    pub fn total_host_calls(&self) -> u64 {
        self.host_calls.values().map(|m| m.calls).sum()
    }
}

/// Call statistics for one import.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostCallMetrics {
    /// Completed calls.
    pub calls: u64,
    /// Calls that returned an error.
    pub errors: u64,
    /// Time spent in the host function, in microseconds.
    pub total_micros: u64,
}
