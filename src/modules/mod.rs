//! Cross-cutting services module
//!
//! Observes script executions: structured events and execution metrics.

pub mod events;
pub mod metrics;

// Re-export commonly used types
pub use events::{
    BridgeEvent, DocumentRetiredEvent, EventDispatcher, EventHandler, ExecutionFinishedEvent,
    ExecutionStartedEvent, LoggingHandler, MetricsHandler,
};
pub use metrics::{ExecutionMode, GlobalStats, MetricsCollector, MetricsSnapshot, ModeStats};
