// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Core types shared across the coordinator engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Worker identifier, assigned on first `Register`.
pub type WorkerId = String;

/// Test identifier, a freshly generated UUID at submission time.
pub type TestId = String;

/// Result type for coordinator engine operations.
pub type DistributedResult<T> = Result<T, DistributedError>;

/// Canonical failure reasons recorded against a test's terminal state.
pub mod failure_reason {
    /// No worker could be gathered before the dispatch deadline.
    pub const NO_WORKERS_AVAILABLE: &str = "NoWorkersAvailable";
    /// The outbound assignment RPC failed at the transport layer.
    pub const ASSIGNMENT_FAILED: &str = "AssignmentFailed";
    /// A single worker returned `accepted=false`.
    pub const WORKER_REJECTED: &str = "WorkerRejected";
    /// Every gathered worker rejected the assignment.
    pub const ALL_WORKERS_REJECTED: &str = "AllWorkersRejected";
}

/// Errors raised by the coordinator engine.
///
/// Variants line up with the error taxonomy: Validation and Backpressure are
/// surfaced synchronously to the submitter; Transport and WorkerRejection are
/// handled locally and only bubble up as a terminal test status; Persistence
/// is logged without unwinding in-memory state; Timeout reflects a
/// deadline the caller should expect; Internal signals a programmer error.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
pub enum DistributedError {
    /// Rejected at submission time: unknown mode, bad weights, empty fields.
    #[error("validation error: {0}")]
    Validation(String),

    /// Intake Queue was full after the bounded wait.
    #[error("backpressure: {0}")]
    Backpressure(String),

    /// Could not reach a worker (register dial, assignment dial).
    #[error("transport error: {0}")]
    Transport(String),

    /// A worker explicitly rejected an assignment.
    #[error("worker rejected assignment: {0}")]
    WorkerRejection(String),

    /// A store write failed; engine state still advances.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// A deadline elapsed (worker gather, stuck-test age).
    #[error("timeout: {0}")]
    Timeout(String),

    /// Worker unknown to the registry.
    #[error("worker not found: {0}")]
    WorkerNotFound(WorkerId),

    /// Test unknown to the test store.
    #[error("test not found: {0}")]
    TestNotFound(TestId),

    /// Invariant violation; callers should treat this as fatal.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Lifecycle status of a registered worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    /// Registered and eligible to take an assignment.
    Ready,
    /// Currently executing a test.
    Busy,
    /// Wrapping up its current test (reported by the worker itself).
    Finishing,
    /// Reported an internal error.
    Error,
    /// Missed its liveness window; terminal until re-register.
    Offline,
}

impl fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ready => write!(f, "ready"),
            Self::Busy => write!(f, "busy"),
            Self::Finishing => write!(f, "finishing"),
            Self::Error => write!(f, "error"),
            Self::Offline => write!(f, "offline"),
        }
    }
}

/// Authoritative record of a known worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Worker {
    /// Worker ID, opaque, assigned on first register.
    pub id: WorkerId,
    /// Worker's `host:port`.
    pub address: String,
    /// Current lifecycle status.
    pub status: WorkerStatus,
    /// Last heartbeat/status-update time.
    pub last_seen: DateTime<Utc>,
    /// Test currently assigned to this worker, if any.
    pub current_test_id: Option<TestId>,
    /// Last progress message reported via StreamStatus.
    pub last_progress_message: String,
    /// Requests completed so far on the current (or last) test.
    pub completed_requests: u64,
    /// Total requests issued so far on the current (or last) test.
    pub total_requests: u64,
    /// Time this worker first registered.
    pub registered_at: DateTime<Utc>,
}

impl Worker {
    /// Construct a freshly registered worker record.
    pub fn new(id: WorkerId, address: String) -> Self {
        let now = Utc::now();
        Self {
            id,
            address,
            status: WorkerStatus::Ready,
            last_seen: now,
            current_test_id: None,
            last_progress_message: String::new(),
            completed_requests: 0,
            total_requests: 0,
            registered_at: now,
        }
    }

    /// A worker is healthy if it has been seen within `timeout_seconds` and
    /// is not already OFFLINE.
    pub fn is_healthy(&self, timeout_seconds: i64) -> bool {
        let elapsed = Utc::now().signed_duration_since(self.last_seen).num_seconds();
        elapsed < timeout_seconds && self.status != WorkerStatus::Offline
    }
}

/// How a test's total rate is distributed across its assigned workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateDistributionMode {
    /// Split the total as evenly as possible; remainder to the first indices.
    Shared,
    /// Every worker gets the full requested rate.
    Same,
    /// Rate split proportionally to caller-supplied weights.
    Weighted,
    /// Rate ramps linearly from the first to the last worker.
    Ramped,
    /// A front group gets 70% of the rate, the rest share the remaining 30%.
    Burst,
}

impl RateDistributionMode {
    /// Parse the wire string used on the submission surface.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "shared" => Some(Self::Shared),
            "same" => Some(Self::Same),
            "weighted" => Some(Self::Weighted),
            "ramped" => Some(Self::Ramped),
            "burst" => Some(Self::Burst),
            _ => None,
        }
    }
}

/// Lifecycle status of a submitted test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestStatus {
    /// Admitted, waiting in the Intake Queue or for workers to be gathered.
    Pending,
    /// At least one assignment has been accepted.
    Running,
    /// Every assigned worker completed successfully.
    Completed,
    /// Some assigned workers completed, some failed.
    PartiallyFailed,
    /// No assigned worker completed.
    Failed,
}

impl TestStatus {
    /// Terminal statuses are write-once from a running state.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::PartiallyFailed | Self::Failed)
    }
}

/// A caller-submitted load test specification and its mutable runtime state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Test {
    /// Freshly generated UUID at submission.
    pub id: TestId,
    /// Human-readable name.
    pub name: String,
    /// Identity of the submitter, recorded without further authorisation.
    pub requester_id: String,
    /// Human-readable duration, e.g. "30s", "5m".
    pub duration: String,
    /// Total requested rate in requests/second.
    pub total_rate: u32,
    /// Number of workers requested.
    pub worker_count: u32,
    /// Rate-distribution mode.
    pub rate_distribution: RateDistributionMode,
    /// Per-worker weights, required iff `rate_distribution == Weighted`.
    pub rate_weights: Option<Vec<f64>>,
    /// Opaque base64 targets payload, handed to workers unmodified.
    pub targets_base64: String,
    /// Opaque JSON attack-options payload, handed to workers unmodified.
    pub attack_options_json: String,
    /// Time of submission.
    pub created_at: DateTime<Utc>,
    /// Current lifecycle status.
    pub status: TestStatus,
    /// Workers whose assignment was accepted.
    pub assigned_workers: Vec<WorkerId>,
    /// Workers that submitted a result.
    pub completed_workers: Vec<WorkerId>,
    /// Workers that failed, rejected, or went offline mid-assignment.
    pub failed_workers: Vec<WorkerId>,
    /// Canonical reason string set on a FAILED/PARTIALLY_FAILED transition.
    pub failure_reason: Option<String>,
}

impl Test {
    /// Append `worker_id` to `assigned_workers` if not already present.
    pub fn add_assigned(&mut self, worker_id: &str) {
        if !self.assigned_workers.iter().any(|w| w == worker_id) {
            self.assigned_workers.push(worker_id.to_string());
        }
    }

    /// Append `worker_id` to `completed_workers` if not already present.
    /// Set-append semantics: duplicates are ignored (§4.6 idempotence).
    pub fn add_completed(&mut self, worker_id: &str) {
        if !self.completed_workers.iter().any(|w| w == worker_id) {
            self.completed_workers.push(worker_id.to_string());
        }
    }

    /// Append `worker_id` to `failed_workers` if not already present.
    pub fn add_failed(&mut self, worker_id: &str) {
        if !self.failed_workers.iter().any(|w| w == worker_id) {
            self.failed_workers.push(worker_id.to_string());
        }
    }
}

/// A status-code histogram: code string (e.g. "200", "503") to count.
pub type StatusCodeHistogram = HashMap<String, u64>;

/// A single worker's report for one test, created on `SubmitResult`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResult {
    /// Result row identity.
    pub id: String,
    /// Test this result belongs to.
    pub test_id: TestId,
    /// Worker that produced this result.
    pub worker_id: WorkerId,
    /// Opaque engine-specific metric blob, base64.
    pub engine_metrics_base64: String,
    /// Time the result was recorded.
    pub timestamp: DateTime<Utc>,
    /// Total requests the worker attempted.
    pub total_requests: u64,
    /// Requests that completed without error.
    pub completed_requests: u64,
    /// Wall-clock duration the worker spent running the test.
    pub duration_ms: u64,
    /// `completed_requests / total_requests`, in [0, 1].
    pub success_rate: f64,
    /// Mean per-request latency in milliseconds.
    pub average_latency_ms: f64,
    /// 95th-percentile per-request latency in milliseconds.
    pub p95_latency_ms: f64,
    /// HTTP status code counts observed by this worker.
    pub status_code_counts: StatusCodeHistogram,
}

/// Overall status recorded on an `AggregatedResult`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AggregatedStatus {
    /// No failed requests across any worker.
    CompletedSuccess,
    /// At least one failed request across the worker set.
    CompletedWithErrors,
}

/// Cross-worker aggregate for a test, one row per test, upserted on every
/// `SubmitResult` for that test.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatedResult {
    /// The test this aggregate belongs to; also its storage key.
    pub test_id: TestId,
    /// Sum of all workers' `total_requests`.
    pub total_requests: u64,
    /// Sum of all workers' `completed_requests`.
    pub successful_requests: u64,
    /// `total_requests - successful_requests`.
    pub failed_requests: u64,
    /// Mean of workers' `average_latency_ms`.
    pub avg_latency_ms: f64,
    /// Mean of workers' `p95_latency_ms` (a documented approximation of a
    /// true global p95 — see Design Notes).
    pub p95_latency_ms: f64,
    /// Non-2xx status codes summed across all workers' histograms.
    pub error_rate_histogram: StatusCodeHistogram,
    /// Mean of workers' `duration_ms`.
    pub avg_duration_ms: f64,
    /// Coarse pass/fail summary.
    pub overall_status: AggregatedStatus,
    /// Time this aggregate was last computed.
    pub completed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_healthy_within_window() {
        let worker = Worker::new("w1".into(), "127.0.0.1:9000".into());
        assert!(worker.is_healthy(30));
    }

    #[test]
    fn worker_unhealthy_once_offline() {
        let mut worker = Worker::new("w1".into(), "127.0.0.1:9000".into());
        worker.status = WorkerStatus::Offline;
        assert!(!worker.is_healthy(30));
    }

    #[test]
    fn rate_mode_parses_known_strings() {
        assert_eq!(RateDistributionMode::parse("shared"), Some(RateDistributionMode::Shared));
        assert_eq!(RateDistributionMode::parse("weighted"), Some(RateDistributionMode::Weighted));
        assert_eq!(RateDistributionMode::parse("round-robin"), None);
    }

    #[test]
    fn test_status_terminal_classification() {
        assert!(TestStatus::Completed.is_terminal());
        assert!(TestStatus::PartiallyFailed.is_terminal());
        assert!(TestStatus::Failed.is_terminal());
        assert!(!TestStatus::Running.is_terminal());
        assert!(!TestStatus::Pending.is_terminal());
    }

    #[test]
    fn test_append_helpers_are_set_semantic() {
        let mut test = Test {
            id: "t1".into(),
            name: "n".into(),
            requester_id: "u1".into(),
            duration: "30s".into(),
            total_rate: 30,
            worker_count: 3,
            rate_distribution: RateDistributionMode::Shared,
            rate_weights: None,
            targets_base64: String::new(),
            attack_options_json: String::new(),
            created_at: Utc::now(),
            status: TestStatus::Pending,
            assigned_workers: vec![],
            completed_workers: vec![],
            failed_workers: vec![],
            failure_reason: None,
        };

        test.add_completed("w1");
        test.add_completed("w1");
        assert_eq!(test.completed_workers, vec!["w1".to_string()]);
    }
}
