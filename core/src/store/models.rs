// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Row types for the Postgres-backed store. Each maps one-to-one onto a
//! migration table and converts to/from the corresponding engine type in
//! [`crate::distributed::types`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::distributed::types::{
    AggregatedResult, AggregatedStatus, RateDistributionMode, StatusCodeHistogram, Test,
    TestResult, TestStatus, Worker, WorkerStatus,
};
use crate::store::error::{StoreError, StoreResult};

/// `workers` row.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct WorkerRow {
    pub id: String,
    pub address: String,
    pub status: String,
    pub last_seen: DateTime<Utc>,
    pub current_test_id: Option<String>,
    pub last_progress_message: String,
    pub completed_requests: i64,
    pub total_requests: i64,
    pub registered_at: DateTime<Utc>,
}

impl From<&Worker> for WorkerRow {
    fn from(w: &Worker) -> Self {
        Self {
            id: w.id.clone(),
            address: w.address.clone(),
            status: w.status.to_string(),
            last_seen: w.last_seen,
            current_test_id: w.current_test_id.clone(),
            last_progress_message: w.last_progress_message.clone(),
            completed_requests: w.completed_requests as i64,
            total_requests: w.total_requests as i64,
            registered_at: w.registered_at,
        }
    }
}

impl TryFrom<WorkerRow> for Worker {
    type Error = StoreError;

    fn try_from(row: WorkerRow) -> StoreResult<Self> {
        let status = parse_worker_status(&row.status)?;
        Ok(Worker {
            id: row.id,
            address: row.address,
            status,
            last_seen: row.last_seen,
            current_test_id: row.current_test_id,
            last_progress_message: row.last_progress_message,
            completed_requests: row.completed_requests as u64,
            total_requests: row.total_requests as u64,
            registered_at: row.registered_at,
        })
    }
}

fn parse_worker_status(s: &str) -> StoreResult<WorkerStatus> {
    match s {
        "ready" => Ok(WorkerStatus::Ready),
        "busy" => Ok(WorkerStatus::Busy),
        "finishing" => Ok(WorkerStatus::Finishing),
        "error" => Ok(WorkerStatus::Error),
        "offline" => Ok(WorkerStatus::Offline),
        other => Err(StoreError::InternalError(format!(
            "unknown worker status in row: {other}"
        ))),
    }
}

/// `tests` row.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct TestRow {
    pub id: String,
    pub name: String,
    pub requester_id: String,
    pub duration: String,
    pub total_rate: i32,
    pub worker_count: i32,
    pub rate_distribution: String,
    pub rate_weights: Option<serde_json::Value>,
    pub targets_base64: String,
    pub attack_options_json: String,
    pub created_at: DateTime<Utc>,
    pub status: String,
    pub assigned_workers: Vec<String>,
    pub completed_workers: Vec<String>,
    pub failed_workers: Vec<String>,
    pub failure_reason: Option<String>,
}

impl From<&Test> for TestRow {
    fn from(t: &Test) -> Self {
        Self {
            id: t.id.clone(),
            name: t.name.clone(),
            requester_id: t.requester_id.clone(),
            duration: t.duration.clone(),
            total_rate: t.total_rate as i32,
            worker_count: t.worker_count as i32,
            rate_distribution: rate_mode_to_str(t.rate_distribution).to_string(),
            rate_weights: t
                .rate_weights
                .as_ref()
                .map(|w| serde_json::to_value(w).unwrap_or(serde_json::Value::Null)),
            targets_base64: t.targets_base64.clone(),
            attack_options_json: t.attack_options_json.clone(),
            created_at: t.created_at,
            status: test_status_to_str(t.status).to_string(),
            assigned_workers: t.assigned_workers.clone(),
            completed_workers: t.completed_workers.clone(),
            failed_workers: t.failed_workers.clone(),
            failure_reason: t.failure_reason.clone(),
        }
    }
}

impl TryFrom<TestRow> for Test {
    type Error = StoreError;

    fn try_from(row: TestRow) -> StoreResult<Self> {
        let rate_distribution = RateDistributionMode::parse(&row.rate_distribution)
            .ok_or_else(|| {
                StoreError::InternalError(format!(
                    "unknown rate distribution in row: {}",
                    row.rate_distribution
                ))
            })?;
        let status = parse_test_status(&row.status)?;
        let rate_weights = row
            .rate_weights
            .map(|v| serde_json::from_value::<Vec<f64>>(v))
            .transpose()
            .map_err(|e| StoreError::InternalError(format!("bad rate_weights json: {e}")))?;

        Ok(Test {
            id: row.id,
            name: row.name,
            requester_id: row.requester_id,
            duration: row.duration,
            total_rate: row.total_rate as u32,
            worker_count: row.worker_count as u32,
            rate_distribution,
            rate_weights,
            targets_base64: row.targets_base64,
            attack_options_json: row.attack_options_json,
            created_at: row.created_at,
            status,
            assigned_workers: row.assigned_workers,
            completed_workers: row.completed_workers,
            failed_workers: row.failed_workers,
            failure_reason: row.failure_reason,
        })
    }
}

fn rate_mode_to_str(mode: RateDistributionMode) -> &'static str {
    match mode {
        RateDistributionMode::Shared => "shared",
        RateDistributionMode::Same => "same",
        RateDistributionMode::Weighted => "weighted",
        RateDistributionMode::Ramped => "ramped",
        RateDistributionMode::Burst => "burst",
    }
}

fn test_status_to_str(status: TestStatus) -> &'static str {
    match status {
        TestStatus::Pending => "pending",
        TestStatus::Running => "running",
        TestStatus::Completed => "completed",
        TestStatus::PartiallyFailed => "partially_failed",
        TestStatus::Failed => "failed",
    }
}

fn parse_test_status(s: &str) -> StoreResult<TestStatus> {
    match s {
        "pending" => Ok(TestStatus::Pending),
        "running" => Ok(TestStatus::Running),
        "completed" => Ok(TestStatus::Completed),
        "partially_failed" => Ok(TestStatus::PartiallyFailed),
        "failed" => Ok(TestStatus::Failed),
        other => Err(StoreError::InternalError(format!(
            "unknown test status in row: {other}"
        ))),
    }
}

/// `test_results` row.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct TestResultRow {
    pub id: String,
    pub test_id: String,
    pub worker_id: String,
    pub engine_metrics_base64: String,
    pub timestamp: DateTime<Utc>,
    pub total_requests: i64,
    pub completed_requests: i64,
    pub duration_ms: i64,
    pub success_rate: f64,
    pub average_latency_ms: f64,
    pub p95_latency_ms: f64,
    pub status_code_counts: serde_json::Value,
}

impl From<&TestResult> for TestResultRow {
    fn from(r: &TestResult) -> Self {
        Self {
            id: r.id.clone(),
            test_id: r.test_id.clone(),
            worker_id: r.worker_id.clone(),
            engine_metrics_base64: r.engine_metrics_base64.clone(),
            timestamp: r.timestamp,
            total_requests: r.total_requests as i64,
            completed_requests: r.completed_requests as i64,
            duration_ms: r.duration_ms as i64,
            success_rate: r.success_rate,
            average_latency_ms: r.average_latency_ms,
            p95_latency_ms: r.p95_latency_ms,
            status_code_counts: serde_json::to_value(&r.status_code_counts)
                .unwrap_or(serde_json::Value::Null),
        }
    }
}

impl TryFrom<TestResultRow> for TestResult {
    type Error = StoreError;

    fn try_from(row: TestResultRow) -> StoreResult<Self> {
        let status_code_counts: StatusCodeHistogram =
            serde_json::from_value(row.status_code_counts)
                .map_err(|e| StoreError::InternalError(format!("bad status_code_counts: {e}")))?;
        Ok(TestResult {
            id: row.id,
            test_id: row.test_id,
            worker_id: row.worker_id,
            engine_metrics_base64: row.engine_metrics_base64,
            timestamp: row.timestamp,
            total_requests: row.total_requests as u64,
            completed_requests: row.completed_requests as u64,
            duration_ms: row.duration_ms as u64,
            success_rate: row.success_rate,
            average_latency_ms: row.average_latency_ms,
            p95_latency_ms: row.p95_latency_ms,
            status_code_counts,
        })
    }
}

/// `aggregated_results` row.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct AggregatedResultRow {
    pub test_id: String,
    pub total_requests: i64,
    pub successful_requests: i64,
    pub failed_requests: i64,
    pub avg_latency_ms: f64,
    pub p95_latency_ms: f64,
    pub error_rate_histogram: serde_json::Value,
    pub avg_duration_ms: f64,
    pub overall_status: String,
    pub completed_at: DateTime<Utc>,
}

impl From<&AggregatedResult> for AggregatedResultRow {
    fn from(a: &AggregatedResult) -> Self {
        Self {
            test_id: a.test_id.clone(),
            total_requests: a.total_requests as i64,
            successful_requests: a.successful_requests as i64,
            failed_requests: a.failed_requests as i64,
            avg_latency_ms: a.avg_latency_ms,
            p95_latency_ms: a.p95_latency_ms,
            error_rate_histogram: serde_json::to_value(&a.error_rate_histogram)
                .unwrap_or(serde_json::Value::Null),
            avg_duration_ms: a.avg_duration_ms,
            overall_status: match a.overall_status {
                AggregatedStatus::CompletedSuccess => "COMPLETED_SUCCESS".to_string(),
                AggregatedStatus::CompletedWithErrors => "COMPLETED_WITH_ERRORS".to_string(),
            },
            completed_at: a.completed_at,
        }
    }
}

impl TryFrom<AggregatedResultRow> for AggregatedResult {
    type Error = StoreError;

    fn try_from(row: AggregatedResultRow) -> StoreResult<Self> {
        let overall_status = match row.overall_status.as_str() {
            "COMPLETED_SUCCESS" => AggregatedStatus::CompletedSuccess,
            "COMPLETED_WITH_ERRORS" => AggregatedStatus::CompletedWithErrors,
            other => {
                return Err(StoreError::InternalError(format!(
                    "unknown overall_status in row: {other}"
                )))
            }
        };
        let error_rate_histogram: StatusCodeHistogram =
            serde_json::from_value(row.error_rate_histogram).map_err(|e| {
                StoreError::InternalError(format!("bad error_rate_histogram: {e}"))
            })?;

        Ok(AggregatedResult {
            test_id: row.test_id,
            total_requests: row.total_requests as u64,
            successful_requests: row.successful_requests as u64,
            failed_requests: row.failed_requests as u64,
            avg_latency_ms: row.avg_latency_ms,
            p95_latency_ms: row.p95_latency_ms,
            error_rate_histogram,
            avg_duration_ms: row.avg_duration_ms,
            overall_status,
            completed_at: row.completed_at,
        })
    }
}
