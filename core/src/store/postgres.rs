// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Postgres-backed store implementations, one repository struct per table.
//!
//! Queries are built with `sqlx::query_as` rather than the `query_as!`
//! macro family: the macro checks query shape against a live database (or a
//! checked-in `sqlx-data.json`) at compile time, which this workspace does
//! not maintain.

use async_trait::async_trait;
use sqlx::PgPool;

use crate::distributed::types::{AggregatedResult, Test, TestResult, Worker};
use crate::store::error::{StoreError, StoreResult};
use crate::store::models::{AggregatedResultRow, TestResultRow, TestRow, WorkerRow};
use crate::store::traits::{AggregatedRepo, ResultRepo, TestPage, TestRepo, WorkerRepo};

/// Postgres-backed [`WorkerRepo`].
pub struct PgWorkerRepo {
    pool: PgPool,
}

impl PgWorkerRepo {
    /// Build a repo over an existing pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl WorkerRepo for PgWorkerRepo {
    async fn register(&self, worker: &Worker) -> StoreResult<()> {
        let row = WorkerRow::from(worker);
        sqlx::query(
            r#"
            INSERT INTO workers (
                id, address, status, last_seen, current_test_id,
                last_progress_message, completed_requests, total_requests, registered_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (id) DO UPDATE SET
                address = EXCLUDED.address,
                status = EXCLUDED.status,
                last_seen = EXCLUDED.last_seen
            "#,
        )
        .bind(row.id)
        .bind(row.address)
        .bind(row.status)
        .bind(row.last_seen)
        .bind(row.current_test_id)
        .bind(row.last_progress_message)
        .bind(row.completed_requests)
        .bind(row.total_requests)
        .bind(row.registered_at)
        .execute(&self.pool)
        .await
        .map_err(StoreError::from)?;
        Ok(())
    }

    async fn update_status(&self, worker: &Worker) -> StoreResult<()> {
        let row = WorkerRow::from(worker);
        sqlx::query(
            r#"
            UPDATE workers
            SET status = $2,
                last_seen = $3,
                current_test_id = $4,
                last_progress_message = $5,
                completed_requests = $6,
                total_requests = $7
            WHERE id = $1
            "#,
        )
        .bind(row.id)
        .bind(row.status)
        .bind(row.last_seen)
        .bind(row.current_test_id)
        .bind(row.last_progress_message)
        .bind(row.completed_requests)
        .bind(row.total_requests)
        .execute(&self.pool)
        .await
        .map_err(StoreError::from)?;
        Ok(())
    }

    async fn mark_offline(&self, worker: &Worker) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE workers SET status = 'offline', last_seen = $2 WHERE id = $1
            "#,
        )
        .bind(&worker.id)
        .bind(worker.last_seen)
        .execute(&self.pool)
        .await
        .map_err(StoreError::from)?;
        Ok(())
    }

    async fn get_by_id(&self, id: &str) -> StoreResult<Worker> {
        let row: WorkerRow = sqlx::query_as("SELECT * FROM workers WHERE id = $1")
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(StoreError::from)?;
        Worker::try_from(row)
    }

    async fn get_all(&self) -> StoreResult<Vec<Worker>> {
        let rows: Vec<WorkerRow> =
            sqlx::query_as("SELECT * FROM workers ORDER BY registered_at DESC")
                .fetch_all(&self.pool)
                .await
                .map_err(StoreError::from)?;
        rows.into_iter().map(Worker::try_from).collect()
    }

    async fn get_all_ready(&self) -> StoreResult<Vec<Worker>> {
        let rows: Vec<WorkerRow> = sqlx::query_as(
            "SELECT * FROM workers WHERE status = 'ready' ORDER BY registered_at DESC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::from)?;
        rows.into_iter().map(Worker::try_from).collect()
    }
}

/// Postgres-backed [`TestRepo`].
pub struct PgTestRepo {
    pool: PgPool,
}

impl PgTestRepo {
    /// Build a repo over an existing pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn append_worker(&self, column: &str, test_id: &str, worker_id: &str) -> StoreResult<()> {
        let sql = format!(
            "UPDATE tests SET {column} = array_append({column}, $2) \
             WHERE id = $1 AND NOT ($2 = ANY({column}))"
        );
        sqlx::query(&sql)
            .bind(test_id)
            .bind(worker_id)
            .execute(&self.pool)
            .await
            .map_err(StoreError::from)?;
        Ok(())
    }
}

#[async_trait]
impl TestRepo for PgTestRepo {
    async fn save(&self, test: &Test) -> StoreResult<()> {
        let row = TestRow::from(test);
        sqlx::query(
            r#"
            INSERT INTO tests (
                id, name, requester_id, duration, total_rate, worker_count,
                rate_distribution, rate_weights, targets_base64, attack_options_json,
                created_at, status, assigned_workers, completed_workers, failed_workers,
                failure_reason
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            "#,
        )
        .bind(row.id)
        .bind(row.name)
        .bind(row.requester_id)
        .bind(row.duration)
        .bind(row.total_rate)
        .bind(row.worker_count)
        .bind(row.rate_distribution)
        .bind(row.rate_weights)
        .bind(row.targets_base64)
        .bind(row.attack_options_json)
        .bind(row.created_at)
        .bind(row.status)
        .bind(row.assigned_workers)
        .bind(row.completed_workers)
        .bind(row.failed_workers)
        .bind(row.failure_reason)
        .execute(&self.pool)
        .await
        .map_err(StoreError::from)?;
        Ok(())
    }

    async fn update_status(&self, test: &Test) -> StoreResult<()> {
        let row = TestRow::from(test);
        sqlx::query(
            r#"
            UPDATE tests SET status = $2, failure_reason = $3 WHERE id = $1
            "#,
        )
        .bind(row.id)
        .bind(row.status)
        .bind(row.failure_reason)
        .execute(&self.pool)
        .await
        .map_err(StoreError::from)?;
        Ok(())
    }

    async fn get_by_id(&self, id: &str) -> StoreResult<Test> {
        let row: TestRow = sqlx::query_as("SELECT * FROM tests WHERE id = $1")
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(StoreError::from)?;
        Test::try_from(row)
    }

    async fn get_all(&self) -> StoreResult<Vec<Test>> {
        let rows: Vec<TestRow> = sqlx::query_as("SELECT * FROM tests ORDER BY created_at DESC")
            .fetch_all(&self.pool)
            .await
            .map_err(StoreError::from)?;
        rows.into_iter().map(Test::try_from).collect()
    }

    async fn get_paginated(&self, offset: u64, limit: u64) -> StoreResult<TestPage> {
        let rows: Vec<TestRow> = sqlx::query_as(
            "SELECT * FROM tests ORDER BY created_at DESC OFFSET $1 LIMIT $2",
        )
        .bind(offset as i64)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::from)?;

        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tests")
            .fetch_one(&self.pool)
            .await
            .map_err(StoreError::from)?;

        let items = rows.into_iter().map(Test::try_from).collect::<StoreResult<Vec<_>>>()?;
        Ok(TestPage {
            items,
            total: total as u64,
        })
    }

    async fn add_assigned(&self, test_id: &str, worker_id: &str) -> StoreResult<()> {
        self.append_worker("assigned_workers", test_id, worker_id).await
    }

    async fn add_completed(&self, test_id: &str, worker_id: &str) -> StoreResult<()> {
        self.append_worker("completed_workers", test_id, worker_id).await
    }

    async fn add_failed(&self, test_id: &str, worker_id: &str) -> StoreResult<()> {
        self.append_worker("failed_workers", test_id, worker_id).await
    }
}

/// Postgres-backed [`ResultRepo`].
pub struct PgResultRepo {
    pool: PgPool,
}

impl PgResultRepo {
    /// Build a repo over an existing pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ResultRepo for PgResultRepo {
    async fn save_test_result(&self, result: &TestResult) -> StoreResult<()> {
        let row = TestResultRow::from(result);
        sqlx::query(
            r#"
            INSERT INTO test_results (
                id, test_id, worker_id, engine_metrics_base64, timestamp,
                total_requests, completed_requests, duration_ms, success_rate,
                average_latency_ms, p95_latency_ms, status_code_counts
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (test_id, worker_id) DO NOTHING
            "#,
        )
        .bind(row.id)
        .bind(row.test_id)
        .bind(row.worker_id)
        .bind(row.engine_metrics_base64)
        .bind(row.timestamp)
        .bind(row.total_requests)
        .bind(row.completed_requests)
        .bind(row.duration_ms)
        .bind(row.success_rate)
        .bind(row.average_latency_ms)
        .bind(row.p95_latency_ms)
        .bind(row.status_code_counts)
        .execute(&self.pool)
        .await
        .map_err(StoreError::from)?;
        Ok(())
    }

    async fn get_by_test_id(&self, test_id: &str) -> StoreResult<Vec<TestResult>> {
        let rows: Vec<TestResultRow> =
            sqlx::query_as("SELECT * FROM test_results WHERE test_id = $1 ORDER BY timestamp")
                .bind(test_id)
                .fetch_all(&self.pool)
                .await
                .map_err(StoreError::from)?;
        rows.into_iter().map(TestResult::try_from).collect()
    }

    async fn delete_by_test_id(&self, test_id: &str) -> StoreResult<()> {
        sqlx::query("DELETE FROM test_results WHERE test_id = $1")
            .bind(test_id)
            .execute(&self.pool)
            .await
            .map_err(StoreError::from)?;
        Ok(())
    }
}

/// Postgres-backed [`AggregatedRepo`].
pub struct PgAggregatedRepo {
    pool: PgPool,
}

impl PgAggregatedRepo {
    /// Build a repo over an existing pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AggregatedRepo for PgAggregatedRepo {
    async fn save(&self, result: &AggregatedResult) -> StoreResult<()> {
        let row = AggregatedResultRow::from(result);
        sqlx::query(
            r#"
            INSERT INTO aggregated_results (
                test_id, total_requests, successful_requests, failed_requests,
                avg_latency_ms, p95_latency_ms, error_rate_histogram, avg_duration_ms,
                overall_status, completed_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (test_id) DO UPDATE SET
                total_requests = EXCLUDED.total_requests,
                successful_requests = EXCLUDED.successful_requests,
                failed_requests = EXCLUDED.failed_requests,
                avg_latency_ms = EXCLUDED.avg_latency_ms,
                p95_latency_ms = EXCLUDED.p95_latency_ms,
                error_rate_histogram = EXCLUDED.error_rate_histogram,
                avg_duration_ms = EXCLUDED.avg_duration_ms,
                overall_status = EXCLUDED.overall_status,
                completed_at = EXCLUDED.completed_at
            "#,
        )
        .bind(row.test_id)
        .bind(row.total_requests)
        .bind(row.successful_requests)
        .bind(row.failed_requests)
        .bind(row.avg_latency_ms)
        .bind(row.p95_latency_ms)
        .bind(row.error_rate_histogram)
        .bind(row.avg_duration_ms)
        .bind(row.overall_status)
        .bind(row.completed_at)
        .execute(&self.pool)
        .await
        .map_err(StoreError::from)?;
        Ok(())
    }

    async fn get_by_test_id(&self, test_id: &str) -> StoreResult<AggregatedResult> {
        let row: AggregatedResultRow =
            sqlx::query_as("SELECT * FROM aggregated_results WHERE test_id = $1")
                .bind(test_id)
                .fetch_one(&self.pool)
                .await
                .map_err(StoreError::from)?;
        AggregatedResult::try_from(row)
    }

    async fn get_all(&self) -> StoreResult<Vec<AggregatedResult>> {
        let rows: Vec<AggregatedResultRow> =
            sqlx::query_as("SELECT * FROM aggregated_results ORDER BY completed_at DESC")
                .fetch_all(&self.pool)
                .await
                .map_err(StoreError::from)?;
        rows.into_iter().map(AggregatedResult::try_from).collect()
    }
}
