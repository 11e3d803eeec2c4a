//! Observable events emitted by the host.

use std::sync::Arc;
use std::time::{Duration, Instant};

use covenant_capability::{EnforcementMode, ImportId};
use parking_lot::RwLock;

/// Events that can be observed while loading modules and serving calls.
#[derive(Debug, Clone)]
pub enum HostEvent {
    /// A module finished both load phases and is live.
    ModuleLoaded {
        /// Registry name.
        module: String,
        /// Registry generation of the new instance.
        generation: u64,
        /// Imports granted by the manifest.
        granted: usize,
        /// Gated imports bound to denial stubs.
        denied: usize,
    },
    /// A module was replaced by a newly loaded instance.
    ModuleSwapped {
        /// Registry name.
        module: String,
        /// Generation that was dropped.
        from_generation: u64,
        /// Generation now live.
        to_generation: u64,
    },
    /// Loading (or swapping) a module failed; nothing was registered.
    LoadFailed {
        /// Registry name.
        module: String,
        /// Error message.
        reason: String,
    },
    /// Metadata could not be read and the module runs deny-all.
    ManifestDegraded {
        /// Registry name.
        module: String,
        /// Why extraction failed.
        reason: String,
    },
    /// A guest called an import its manifest does not grant.
    CapabilityDenied {
        /// Registry name of the calling module.
        module: String,
        /// The denied import.
        import: ImportId,
        /// Enforcement mode at the time of the call.
        mode: EnforcementMode,
    },
    /// A bound host function returned.
    HostCall {
        /// Registry name of the calling module.
        module: String,
        /// The import that was called.
        import: ImportId,
        /// Time spent in the host function.
        duration: Duration,
        /// Whether it returned without error.
        ok: bool,
    },
    /// The `_initialize` export ran.
    ModuleInitialized {
        /// Registry name.
        module: String,
    },
}

impl HostEvent {
    /// Get the event type name.
    pub fn event_type(&self) -> &'static str {
        match self {
            HostEvent::ModuleLoaded { .. } => "module_loaded",
            HostEvent::ModuleSwapped { .. } => "module_swapped",
            HostEvent::LoadFailed { .. } => "load_failed",
            HostEvent::ManifestDegraded { .. } => "manifest_degraded",
            HostEvent::CapabilityDenied { .. } => "capability_denied",
            HostEvent::HostCall { .. } => "host_call",
            HostEvent::ModuleInitialized { .. } => "module_initialized",
        }
    }

    /// The module the event is about.
    pub fn module(&self) -> &str {
        match self {
            HostEvent::ModuleLoaded { module, .. }
            | HostEvent::ModuleSwapped { module, .. }
            | HostEvent::LoadFailed { module, .. }
            | HostEvent::ManifestDegraded { module, .. }
            | HostEvent::CapabilityDenied { module, .. }
            | HostEvent::HostCall { module, .. }
            | HostEvent::ModuleInitialized { module } => module,
        }
    }
}

/// Subscriber for host events.
pub trait EventSubscriber: Send + Sync {
    /// Called when an event occurs.
    fn on_event(&self, event: &HostEvent);

    /// Event types this subscriber wants. `None` receives everything.
    fn event_filter(&self) -> Option<Vec<&'static str>> {
        None
    }
}

/// Mirrors every event into `tracing`.
pub struct LoggingSubscriber {
    /// Level for routine events. Denials and failures always log at `warn`.
    pub log_level: tracing::Level,
}

impl LoggingSubscriber {
    /// Create a new logging subscriber.
    pub fn new() -> Self {
        Self {
            log_level: tracing::Level::DEBUG,
        }
    }

    /// Set the level for routine events.
    pub fn with_level(mut self, level: tracing::Level) -> Self {
        self.log_level = level;
        self
    }

    fn routine(&self, event: &HostEvent, message: &str) {
        macro_rules! emit {
            ($lvl:ident) => {
                tracing::$lvl!(event = event.event_type(), module = event.module(), "{}", message)
            };
        }
        match self.log_level {
            tracing::Level::ERROR => emit!(error),
            tracing::Level::WARN => emit!(warn),
            tracing::Level::INFO => emit!(info),
            tracing::Level::DEBUG => emit!(debug),
            tracing::Level::TRACE => emit!(trace),
        }
    }
}

impl Default for LoggingSubscriber {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSubscriber for LoggingSubscriber {
    fn on_event(&self, event: &HostEvent) {
        match event {
            HostEvent::ModuleLoaded {
                generation,
                granted,
                denied,
                ..
            } => self.routine(
                event,
                &format!("Module loaded (generation {generation}, {granted} granted, {denied} denied)"),
            ),
            HostEvent::ModuleSwapped {
                from_generation,
                to_generation,
                ..
            } => self.routine(
                event,
                &format!("Module swapped ({from_generation} -> {to_generation})"),
            ),
            HostEvent::ModuleInitialized { .. } => self.routine(event, "Module initialized"),
            HostEvent::LoadFailed { module, reason } => {
                tracing::warn!(event = "load_failed", module = %module, reason = %reason, "Module load failed");
            }
            HostEvent::ManifestDegraded { module, reason } => {
                tracing::warn!(event = "manifest_degraded", module = %module, reason = %reason, "Manifest degraded to deny-all");
            }
            HostEvent::CapabilityDenied { module, import, mode } => {
                tracing::warn!(event = "capability_denied", module = %module, import = %import, mode = ?mode, "Capability denied");
            }
            HostEvent::HostCall {
                module,
                import,
                duration,
                ok,
            } => {
                tracing::trace!(
                    event = "host_call",
                    module = %module,
                    import = %import,
                    duration_us = duration.as_micros(),
                    ok = ok,
                    "Host function called"
                );
            }
        }
    }
}

/// A subscriber that collects events for later analysis.
pub struct CollectingSubscriber {
    events: RwLock<Vec<(Instant, HostEvent)>>,
    max_events: usize,
}

impl CollectingSubscriber {
    /// Create a new collecting subscriber.
    pub fn new(max_events: usize) -> Self {
        Self {
            events: RwLock::new(Vec::new()),
            max_events,
        }
    }

    /// Get collected events.
    pub fn events(&self) -> Vec<(Instant, HostEvent)> {
        self.events.read().clone()
    }

    /// Collected events of one type, without timestamps.
    pub fn of_type(&self, event_type: &str) -> Vec<HostEvent> {
        self.events
            .read()
            .iter()
            .filter(|(_, e)| e.event_type() == event_type)
            .map(|(_, e)| e.clone())
            .collect()
    }

    /// Imports named by collected denial events, in order.
    pub fn denied_imports(&self) -> Vec<ImportId> {
        self.events
            .read()
            .iter()
            .filter_map(|(_, e)| match e {
                HostEvent::CapabilityDenied { import, .. } => Some(import.clone()),
                _ => None,
            })
            .collect()
    }

    /// Clear collected events.
    pub fn clear(&self) {
        self.events.write().clear();
    }

    /// Get event count.
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }
}

impl Default for CollectingSubscriber {
    fn default() -> Self {
        Self::new(10_000)
    }
}

impl EventSubscriber for CollectingSubscriber {
    fn on_event(&self, event: &HostEvent) {
        let mut events = self.events.write();
        if events.len() < self.max_events {
            events.push((Instant::now(), event.clone()));
        }
    }
}

/// Event dispatcher that manages subscribers.
#[derive(Default)]
pub struct EventDispatcher {
    subscribers: RwLock<Vec<Arc<dyn EventSubscriber>>>,
}

impl EventDispatcher {
    /// Create a new event dispatcher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a subscriber.
    pub fn subscribe(&self, subscriber: Arc<dyn EventSubscriber>) {
        self.subscribers.write().push(subscriber);
    }

    /// Remove all subscribers.
    pub fn clear_subscribers(&self) {
        self.subscribers.write().clear();
    }

    /// Get subscriber count.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Emit an event to all subscribers.
    pub fn emit(&self, event: HostEvent) {
        // Subscribers may emit in turn; never hold the lock across a callback.
        let subscribers = self.subscribers.read().clone();
        for subscriber in &subscribers {
            if let Some(filter) = subscriber.event_filter() {
                if !filter.contains(&event.event_type()) {
                    continue;
                }
            }
            subscriber.on_event(&event);
        }
    }
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn denied(import: &'static str) -> HostEvent {
        HostEvent::CapabilityDenied {
            module: "query".to_string(),
            import: ImportId::new(import),
            mode: EnforcementMode::Deny,
        }
    }

    #[test]
    fn test_event_type_and_module() {
        let event = HostEvent::ModuleInitialized {
            module: "symbols".to_string(),
        };
        assert_eq!(event.event_type(), "module_initialized");
        assert_eq!(event.module(), "symbols");
    }

    #[test]
    fn test_collecting_subscriber_max_events() {
        let subscriber = CollectingSubscriber::new(2);
        for _ in 0..5 {
            subscriber.on_event(&denied("http.get"));
        }
        assert_eq!(subscriber.len(), 2);
    }

    #[test]
    fn test_denied_imports() {
        let subscriber = CollectingSubscriber::default();
        subscriber.on_event(&denied("http.get"));
        subscriber.on_event(&HostEvent::ModuleInitialized {
            module: "query".to_string(),
        });
        subscriber.on_event(&denied("db.execute_query"));

        assert_eq!(
            subscriber.denied_imports(),
            vec![ImportId::new("http.get"), ImportId::new("db.execute_query")]
        );
        assert_eq!(subscriber.of_type("module_initialized").len(), 1);
    }

    struct DenialsOnly(CollectingSubscriber);

    impl EventSubscriber for DenialsOnly {
        fn on_event(&self, event: &HostEvent) {
            self.0.on_event(event);
        }

        fn event_filter(&self) -> Option<Vec<&'static str>> {
            Some(vec!["capability_denied"])
        }
    }

    #[test]
    fn test_dispatcher_applies_filters() {
        let dispatcher = EventDispatcher::new();
        let all = Arc::new(CollectingSubscriber::default());
        let filtered = Arc::new(DenialsOnly(CollectingSubscriber::default()));

        dispatcher.subscribe(Arc::clone(&all) as Arc<dyn EventSubscriber>);
        dispatcher.subscribe(Arc::clone(&filtered) as Arc<dyn EventSubscriber>);

        dispatcher.emit(denied("fs.read"));
        dispatcher.emit(HostEvent::LoadFailed {
            module: "query".to_string(),
            reason: "bad magic".to_string(),
        });

        assert_eq!(all.len(), 2);
        assert_eq!(filtered.0.len(), 1);
    }
}
