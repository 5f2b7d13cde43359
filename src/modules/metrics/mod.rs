//! Execution metrics.
//!
//! Aggregated totals plus per-mode statistics with latency percentiles and
//! fault counts keyed by status.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::execution::fault::Status;

/// Which entry point ran a script.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    Sync,
    Async,
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionMode::Sync => f.write_str("sync"),
            ExecutionMode::Async => f.write_str("async"),
        }
    }
}

/// Aggregated metrics across both modes.
#[derive(Debug, Clone)]
pub struct GlobalStats {
    pub started_at: DateTime<Utc>,
    pub total_executions: u64,
    pub successes: u64,
    pub faults: u64,
    pub documents_retired: u64,
}

impl Default for GlobalStats {
    fn default() -> Self {
        Self {
            started_at: Utc::now(),
            total_executions: 0,
            successes: 0,
            faults: 0,
            documents_retired: 0,
        }
    }
}

/// Mode-scoped metrics snapshot.
#[derive(Debug, Clone)]
pub struct ModeStats {
    pub mode: ExecutionMode,
    pub total_executions: u64,
    pub successes: u64,
    pub faults_by_status: HashMap<Status, u64>,
    pub average_latency: Option<Duration>,
    pub p95_latency: Option<Duration>,
    pub last_status: Option<Status>,
}

impl ModeStats {
    fn from_accumulator(mode: ExecutionMode, acc: &ModeAccumulator) -> Self {
        let (avg, p95) = acc.latency_stats();
        Self {
            mode,
            total_executions: acc.total_executions,
            successes: acc.successes,
            faults_by_status: acc.faults.clone(),
            average_latency: avg,
            p95_latency: p95,
            last_status: acc.last_status,
        }
    }

    pub fn faults(&self) -> u64 {
        self.faults_by_status.values().sum()
    }
}

#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub global: GlobalStats,
    pub modes: Vec<ModeStats>,
}

impl MetricsSnapshot {
    pub fn mode(&self, mode: ExecutionMode) -> Option<&ModeStats> {
        self.modes.iter().find(|stats| stats.mode == mode)
    }
}

#[derive(Debug)]
struct ModeAccumulator {
    total_executions: u64,
    successes: u64,
    faults: HashMap<Status, u64>,
    latencies: VecDeque<Duration>,
    max_window: usize,
    last_status: Option<Status>,
}

impl ModeAccumulator {
    fn new(max_window: usize) -> Self {
        Self {
            total_executions: 0,
            successes: 0,
            faults: HashMap::new(),
            latencies: VecDeque::with_capacity(max_window),
            max_window,
            last_status: None,
        }
    }

    fn record(&mut self, status: Status, latency: Duration) {
        self.total_executions += 1;
        self.last_status = Some(status);

        if status.is_success() {
            self.successes += 1;
        } else {
            *self.faults.entry(status).or_insert(0) += 1;
        }

        if self.latencies.len() == self.max_window {
            self.latencies.pop_front();
        }
        self.latencies.push_back(latency);
    }

    fn latency_stats(&self) -> (Option<Duration>, Option<Duration>) {
        if self.latencies.is_empty() {
            return (None, None);
        }
        let mut samples: Vec<_> = self.latencies.iter().cloned().collect();
        samples.sort_unstable();
        let avg = samples.iter().map(|d| d.as_secs_f64()).sum::<f64>() / samples.len() as f64;
        let p95_index = ((samples.len() as f64 * 0.95).ceil() as usize).saturating_sub(1);
        (Some(Duration::from_secs_f64(avg)), Some(samples[p95_index]))
    }
}

#[derive(Debug)]
struct MetricsState {
    global: GlobalStats,
    max_window: usize,
    modes: HashMap<ExecutionMode, ModeAccumulator>,
}

impl MetricsState {
    fn new(max_window: usize) -> Self {
        Self {
            global: GlobalStats::default(),
            max_window,
            modes: HashMap::new(),
        }
    }

    fn accumulator_mut(&mut self, mode: ExecutionMode) -> &mut ModeAccumulator {
        let window = self.max_window;
        self.modes
            .entry(mode)
            .or_insert_with(|| ModeAccumulator::new(window))
    }
}

/// Thread-safe metrics collector shared by the bridge and its handlers.
#[derive(Clone, Debug)]
pub struct MetricsCollector {
    inner: Arc<Mutex<MetricsState>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::with_window(128)
    }

    pub fn with_window(window: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(MetricsState::new(window.max(16)))),
        }
    }

    fn state(&self) -> MutexGuard<'_, MetricsState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn record_execution(&self, mode: ExecutionMode, status: Status, latency: Duration) {
        let mut guard = self.state();
        guard.global.total_executions += 1;
        if status.is_success() {
            guard.global.successes += 1;
        } else {
            guard.global.faults += 1;
        }
        guard.accumulator_mut(mode).record(status, latency);
    }

    pub fn record_document_retired(&self) {
        self.state().global.documents_retired += 1;
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let guard = self.state();
        let mut modes: Vec<_> = guard
            .modes
            .iter()
            .map(|(mode, acc)| ModeStats::from_accumulator(*mode, acc))
            .collect();
        modes.sort_by_key(|stats| stats.mode == ExecutionMode::Async);
        MetricsSnapshot {
            global: guard.global.clone(),
            modes,
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_successes_and_faults_per_mode() {
        let metrics = MetricsCollector::new();
        metrics.record_execution(ExecutionMode::Sync, Status::Success, Duration::from_millis(2));
        metrics.record_execution(
            ExecutionMode::Async,
            Status::ScriptTimeoutFault,
            Duration::from_millis(100),
        );
        metrics.record_execution(
            ExecutionMode::Async,
            Status::ScriptTimeoutFault,
            Duration::from_millis(120),
        );
        metrics.record_document_retired();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.global.total_executions, 3);
        assert_eq!(snapshot.global.faults, 2);
        assert_eq!(snapshot.global.documents_retired, 1);

        let sync = snapshot.mode(ExecutionMode::Sync).unwrap();
        assert_eq!(sync.successes, 1);
        assert_eq!(sync.faults(), 0);

        let async_stats = snapshot.mode(ExecutionMode::Async).unwrap();
        assert_eq!(async_stats.faults_by_status[&Status::ScriptTimeoutFault], 2);
        assert_eq!(async_stats.p95_latency, Some(Duration::from_millis(120)));
        assert_eq!(async_stats.last_status, Some(Status::ScriptTimeoutFault));
    }

    #[test]
    fn latency_window_is_bounded() {
        let metrics = MetricsCollector::with_window(16);
        for millis in 0..40 {
            metrics.record_execution(
                ExecutionMode::Sync,
                Status::Success,
                Duration::from_millis(millis),
            );
        }
        let snapshot = metrics.snapshot();
        let sync = snapshot.mode(ExecutionMode::Sync).unwrap();
        assert_eq!(sync.total_executions, 40);
        // Only the last 16 samples (24..=39 ms) are kept.
        assert_eq!(sync.p95_latency, Some(Duration::from_millis(39)));
        assert!(sync.average_latency.unwrap() >= Duration::from_millis(31));
    }
}
