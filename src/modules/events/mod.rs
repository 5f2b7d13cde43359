//! Event system for script executions.
//!
//! Provides hooks for metrics, logging and custom reactions around the
//! bridge's activity.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

use super::metrics::{ExecutionMode, MetricsCollector};
use crate::execution::fault::Status;
use crate::host::DocumentId;

/// A script is about to run.
#[derive(Debug, Clone)]
pub struct ExecutionStartedEvent {
    pub mode: ExecutionMode,
    pub document: DocumentId,
    pub argument_count: usize,
    pub timestamp: DateTime<Utc>,
}

/// A script reached its terminal outcome.
#[derive(Debug, Clone)]
pub struct ExecutionFinishedEvent {
    pub mode: ExecutionMode,
    pub document: DocumentId,
    pub status: Status,
    pub message: Option<String>,
    pub latency: Duration,
    pub timestamp: DateTime<Utc>,
}

/// The host replaced its document; handles of the old one were released.
#[derive(Debug, Clone)]
pub struct DocumentRetiredEvent {
    pub previous: DocumentId,
    pub current: DocumentId,
    pub released_handles: usize,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub enum BridgeEvent {
    ExecutionStarted(ExecutionStartedEvent),
    ExecutionFinished(ExecutionFinishedEvent),
    DocumentRetired(DocumentRetiredEvent),
}

/// Trait implemented by event handlers.
pub trait EventHandler: Send + Sync {
    fn handle(&self, event: &BridgeEvent);
}

/// Dispatcher that broadcasts events to registered handlers.
#[derive(Default)]
pub struct EventDispatcher {
    handlers: Vec<Arc<dyn EventHandler>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self { handlers: Vec::new() }
    }

    pub fn register_handler(&mut self, handler: Arc<dyn EventHandler>) {
        self.handlers.push(handler);
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    pub fn dispatch(&self, event: BridgeEvent) {
        for handler in &self.handlers {
            handler.handle(&event);
        }
    }
}

/// Logs events using the `log` crate.
#[derive(Debug)]
pub struct LoggingHandler;

impl EventHandler for LoggingHandler {
    fn handle(&self, event: &BridgeEvent) {
        match event {
            BridgeEvent::ExecutionStarted(started) => {
                log::debug!(
                    "-> {} script on {} with {} argument(s)",
                    started.mode,
                    started.document,
                    started.argument_count
                );
            }
            BridgeEvent::ExecutionFinished(finished) if finished.status.is_success() => {
                log::debug!(
                    "<- {} script on {} succeeded ({:.3}s)",
                    finished.mode,
                    finished.document,
                    finished.latency.as_secs_f64()
                );
            }
            BridgeEvent::ExecutionFinished(finished) => {
                log::info!(
                    "<- {} script on {} failed with {}: {} ({:.3}s)",
                    finished.mode,
                    finished.document,
                    finished.status.as_str(),
                    finished.message.as_deref().unwrap_or(""),
                    finished.latency.as_secs_f64()
                );
            }
            BridgeEvent::DocumentRetired(retired) => {
                log::info!(
                    "{} replaced by {}, released {} element handle(s)",
                    retired.previous,
                    retired.current,
                    retired.released_handles
                );
            }
        }
    }
}

/// Metrics handler that feeds the metrics collector.
#[derive(Clone, Debug)]
pub struct MetricsHandler {
    metrics: MetricsCollector,
}

impl MetricsHandler {
    pub fn new(metrics: MetricsCollector) -> Self {
        Self { metrics }
    }
}

impl EventHandler for MetricsHandler {
    fn handle(&self, event: &BridgeEvent) {
        match event {
            BridgeEvent::ExecutionFinished(finished) => {
                self.metrics
                    .record_execution(finished.mode, finished.status, finished.latency);
            }
            BridgeEvent::DocumentRetired(_) => self.metrics.record_document_retired(),
            BridgeEvent::ExecutionStarted(_) => {}
        }
    }
}
