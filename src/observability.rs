use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::{info, warn};

/// Workflow engine and gate counters
#[derive(Debug, Default)]
pub struct WorkflowMetrics {
    pub transitions_applied: AtomicU64,
    pub concurrent_conflicts: AtomicU64,
    pub transitions_rejected: AtomicU64,
    pub events_emitted: AtomicU64,
    pub emission_failures: AtomicU64,
    pub gate_fail_open: AtomicU64,
    pub gate_fail_closed: AtomicU64,
}

impl WorkflowMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_applied(&self) {
        self.transitions_applied.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_conflict(&self) {
        self.concurrent_conflicts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.transitions_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_emission(&self) {
        self.events_emitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_emission_failure(&self) {
        self.emission_failures.fetch_add(1, Ordering::Relaxed);
        warn!("Automation event emission failed");
    }

    pub fn record_gate_fail_open(&self) {
        self.gate_fail_open.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_gate_fail_closed(&self) {
        self.gate_fail_closed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_stats(&self) -> WorkflowStats {
        WorkflowStats {
            transitions_applied: self.transitions_applied.load(Ordering::Relaxed),
            concurrent_conflicts: self.concurrent_conflicts.load(Ordering::Relaxed),
            transitions_rejected: self.transitions_rejected.load(Ordering::Relaxed),
            events_emitted: self.events_emitted.load(Ordering::Relaxed),
            emission_failures: self.emission_failures.load(Ordering::Relaxed),
            gate_fail_open: self.gate_fail_open.load(Ordering::Relaxed),
            gate_fail_closed: self.gate_fail_closed.load(Ordering::Relaxed),
        }
    }

    pub fn log_stats(&self) {
        let stats = self.get_stats();
        info!(
            "Workflow metrics: applied={}, conflicts={}, rejected={}, emitted={}, emission_failures={}, gate_fail_open={}, gate_fail_closed={}",
            stats.transitions_applied,
            stats.concurrent_conflicts,
            stats.transitions_rejected,
            stats.events_emitted,
            stats.emission_failures,
            stats.gate_fail_open,
            stats.gate_fail_closed
        );
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkflowStats {
    pub transitions_applied: u64,
    pub concurrent_conflicts: u64,
    pub transitions_rejected: u64,
    pub events_emitted: u64,
    pub emission_failures: u64,
    pub gate_fail_open: u64,
    pub gate_fail_closed: u64,
}

/// Global metrics instance
static WORKFLOW_METRICS: std::sync::LazyLock<WorkflowMetrics> =
    std::sync::LazyLock::new(WorkflowMetrics::new);

pub fn workflow_metrics() -> &'static WorkflowMetrics {
    &WORKFLOW_METRICS
}

/// Time an operation and log its duration
pub struct OperationTimer {
    operation: &'static str,
    start: Instant,
}

impl OperationTimer {
    pub fn new(operation: &'static str) -> Self {
        Self {
            operation,
            start: Instant::now(),
        }
    }

    pub fn finish(self) {
        let duration = self.start.elapsed();
        info!(
            operation = self.operation,
            duration_ms = duration.as_millis() as u64,
            "Operation completed"
        );
    }
}
