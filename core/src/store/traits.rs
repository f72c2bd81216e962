// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The persistence contract the engine consumes (§6). Two implementations
//! exist: [`crate::store::postgres`] for production and
//! [`crate::store::memory`] for the default no-database mode and tests.

use async_trait::async_trait;

use crate::distributed::types::{AggregatedResult, Test, TestResult, Worker};
use crate::store::error::StoreResult;

/// Durable record of known workers.
#[cfg_attr(any(test, feature = "test-support"), mockall::automock)]
#[async_trait]
pub trait WorkerRepo: Send + Sync {
    /// Persist a newly registered worker.
    async fn register(&self, worker: &Worker) -> StoreResult<()>;
    /// Persist a status/heartbeat update for an existing worker.
    async fn update_status(&self, worker: &Worker) -> StoreResult<()>;
    /// Persist a worker's transition to OFFLINE.
    async fn mark_offline(&self, worker: &Worker) -> StoreResult<()>;
    /// Fetch a worker by ID.
    async fn get_by_id(&self, id: &str) -> StoreResult<Worker>;
    /// Fetch every known worker.
    async fn get_all(&self) -> StoreResult<Vec<Worker>>;
    /// Fetch every worker currently READY.
    async fn get_all_ready(&self) -> StoreResult<Vec<Worker>>;
}

/// A page of tests, returned by [`TestRepo::get_paginated`].
#[derive(Debug, Clone)]
pub struct TestPage {
    /// Tests in this page, in descending `created_at` order.
    pub items: Vec<Test>,
    /// Total number of tests across all pages.
    pub total: u64,
}

/// Durable record of submitted tests and their per-worker assignment lists.
///
/// `add_assigned`, `add_completed`, and `add_failed` must be set-semantic:
/// appending an already-present worker ID is a no-op (§6).
#[cfg_attr(any(test, feature = "test-support"), mockall::automock)]
#[async_trait]
pub trait TestRepo: Send + Sync {
    /// Persist a newly admitted test.
    async fn save(&self, test: &Test) -> StoreResult<()>;
    /// Persist a status transition (and, incidentally, any other mutated
    /// field on `test` — callers pass the full current row).
    async fn update_status(&self, test: &Test) -> StoreResult<()>;
    /// Fetch a test by ID.
    async fn get_by_id(&self, id: &str) -> StoreResult<Test>;
    /// Fetch every known test.
    async fn get_all(&self) -> StoreResult<Vec<Test>>;
    /// Fetch a page of tests.
    async fn get_paginated(&self, offset: u64, limit: u64) -> StoreResult<TestPage>;
    /// Idempotently append `worker_id` to `assigned_workers`.
    async fn add_assigned(&self, test_id: &str, worker_id: &str) -> StoreResult<()>;
    /// Idempotently append `worker_id` to `completed_workers`.
    async fn add_completed(&self, test_id: &str, worker_id: &str) -> StoreResult<()>;
    /// Idempotently append `worker_id` to `failed_workers`.
    async fn add_failed(&self, test_id: &str, worker_id: &str) -> StoreResult<()>;
}

/// Durable record of per-worker result submissions.
#[cfg_attr(any(test, feature = "test-support"), mockall::automock)]
#[async_trait]
pub trait ResultRepo: Send + Sync {
    /// Persist a per-worker result. Idempotent on `(test_id, worker_id)`
    /// (§4.6): a duplicate submission must not create a second visible row.
    async fn save_test_result(&self, result: &TestResult) -> StoreResult<()>;
    /// Fetch every result recorded for `test_id`.
    async fn get_by_test_id(&self, test_id: &str) -> StoreResult<Vec<TestResult>>;
    /// Delete every result recorded for `test_id`.
    async fn delete_by_test_id(&self, test_id: &str) -> StoreResult<()>;
}

/// Durable record of cross-worker aggregates, one row per test.
#[cfg_attr(any(test, feature = "test-support"), mockall::automock)]
#[async_trait]
pub trait AggregatedRepo: Send + Sync {
    /// Upsert the aggregate for `result.test_id`.
    async fn save(&self, result: &AggregatedResult) -> StoreResult<()>;
    /// Fetch the aggregate for `test_id`, if one has been computed.
    async fn get_by_test_id(&self, test_id: &str) -> StoreResult<AggregatedResult>;
    /// Fetch every computed aggregate.
    async fn get_all(&self) -> StoreResult<Vec<AggregatedResult>>;
}
