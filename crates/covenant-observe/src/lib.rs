//! Covenant Observability
//!
//! - [`EventDispatcher`]: fan-out of [`HostEvent`]s to subscribers
//! - [`MetricsCollector`]: host call, denial and lifecycle counters
//! - [`LoadReport`]: how each import of a loaded module was bound
//!
//! # Event Subscription
//!
//! ```
//! use std::sync::Arc;
//! use covenant_observe::{CollectingSubscriber, EventDispatcher, HostEvent};
//!
//! let dispatcher = EventDispatcher::new();
//! let collector = Arc::new(CollectingSubscriber::new(100));
//! dispatcher.subscribe(collector.clone());
//!
//! dispatcher.emit(HostEvent::ModuleInitialized {
//!     module: "symbols".to_string(),
//! });
//! assert_eq!(collector.len(), 1);
//! ```

pub mod events;
pub mod metrics;
pub mod report;

pub use events::{CollectingSubscriber, EventDispatcher, EventSubscriber, HostEvent, LoggingSubscriber};
pub use metrics::{HostCallMetrics, MetricsCollector, MetricsSnapshot};
pub use report::{BindingKind, BindingRecord, LoadReport};
