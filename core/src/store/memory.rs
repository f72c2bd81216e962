// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! In-memory store implementations. Used by the coordinator binary's default
//! no-database mode and by the test suite.

use async_trait::async_trait;
use dashmap::DashMap;

use crate::distributed::types::{AggregatedResult, Test, TestResult, Worker};
use crate::store::error::{StoreError, StoreResult};
use crate::store::traits::{AggregatedRepo, ResultRepo, TestPage, TestRepo, WorkerRepo};

/// In-memory [`WorkerRepo`].
#[derive(Default)]
pub struct InMemoryWorkerRepo {
    workers: DashMap<String, Worker>,
}

impl InMemoryWorkerRepo {
    /// Build an empty repo.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WorkerRepo for InMemoryWorkerRepo {
    async fn register(&self, worker: &Worker) -> StoreResult<()> {
        self.workers.insert(worker.id.clone(), worker.clone());
        Ok(())
    }

    async fn update_status(&self, worker: &Worker) -> StoreResult<()> {
        self.workers.insert(worker.id.clone(), worker.clone());
        Ok(())
    }

    async fn mark_offline(&self, worker: &Worker) -> StoreResult<()> {
        self.workers.insert(worker.id.clone(), worker.clone());
        Ok(())
    }

    async fn get_by_id(&self, id: &str) -> StoreResult<Worker> {
        self.workers
            .get(id)
            .map(|w| w.clone())
            .ok_or_else(|| StoreError::NotFound(format!("worker {id}")))
    }

    async fn get_all(&self) -> StoreResult<Vec<Worker>> {
        Ok(self.workers.iter().map(|w| w.clone()).collect())
    }

    async fn get_all_ready(&self) -> StoreResult<Vec<Worker>> {
        Ok(self
            .workers
            .iter()
            .filter(|w| w.status == crate::distributed::types::WorkerStatus::Ready)
            .map(|w| w.clone())
            .collect())
    }
}

/// In-memory [`TestRepo`].
#[derive(Default)]
pub struct InMemoryTestRepo {
    tests: DashMap<String, Test>,
}

impl InMemoryTestRepo {
    /// Build an empty repo.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TestRepo for InMemoryTestRepo {
    async fn save(&self, test: &Test) -> StoreResult<()> {
        if self.tests.contains_key(&test.id) {
            return Err(StoreError::DuplicateKey(format!("test {}", test.id)));
        }
        self.tests.insert(test.id.clone(), test.clone());
        Ok(())
    }

    async fn update_status(&self, test: &Test) -> StoreResult<()> {
        self.tests.insert(test.id.clone(), test.clone());
        Ok(())
    }

    async fn get_by_id(&self, id: &str) -> StoreResult<Test> {
        self.tests
            .get(id)
            .map(|t| t.clone())
            .ok_or_else(|| StoreError::NotFound(format!("test {id}")))
    }

    async fn get_all(&self) -> StoreResult<Vec<Test>> {
        Ok(self.tests.iter().map(|t| t.clone()).collect())
    }

    async fn get_paginated(&self, offset: u64, limit: u64) -> StoreResult<TestPage> {
        let mut items: Vec<Test> = self.tests.iter().map(|t| t.clone()).collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let total = items.len() as u64;
        let page = items
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect();
        Ok(TestPage { items: page, total })
    }

    async fn add_assigned(&self, test_id: &str, worker_id: &str) -> StoreResult<()> {
        let mut test = self
            .tests
            .get_mut(test_id)
            .ok_or_else(|| StoreError::NotFound(format!("test {test_id}")))?;
        test.add_assigned(worker_id);
        Ok(())
    }

    async fn add_completed(&self, test_id: &str, worker_id: &str) -> StoreResult<()> {
        let mut test = self
            .tests
            .get_mut(test_id)
            .ok_or_else(|| StoreError::NotFound(format!("test {test_id}")))?;
        test.add_completed(worker_id);
        Ok(())
    }

    async fn add_failed(&self, test_id: &str, worker_id: &str) -> StoreResult<()> {
        let mut test = self
            .tests
            .get_mut(test_id)
            .ok_or_else(|| StoreError::NotFound(format!("test {test_id}")))?;
        test.add_failed(worker_id);
        Ok(())
    }
}

/// In-memory [`ResultRepo`], keyed by `(test_id, worker_id)` for idempotent
/// saves (§4.6).
#[derive(Default)]
pub struct InMemoryResultRepo {
    results: DashMap<(String, String), TestResult>,
}

impl InMemoryResultRepo {
    /// Build an empty repo.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ResultRepo for InMemoryResultRepo {
    async fn save_test_result(&self, result: &TestResult) -> StoreResult<()> {
        let key = (result.test_id.clone(), result.worker_id.clone());
        self.results.insert(key, result.clone());
        Ok(())
    }

    async fn get_by_test_id(&self, test_id: &str) -> StoreResult<Vec<TestResult>> {
        Ok(self
            .results
            .iter()
            .filter(|entry| entry.key().0 == test_id)
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn delete_by_test_id(&self, test_id: &str) -> StoreResult<()> {
        self.results.retain(|key, _| key.0 != test_id);
        Ok(())
    }
}

/// In-memory [`AggregatedRepo`].
#[derive(Default)]
pub struct InMemoryAggregatedRepo {
    aggregates: DashMap<String, AggregatedResult>,
}

impl InMemoryAggregatedRepo {
    /// Build an empty repo.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AggregatedRepo for InMemoryAggregatedRepo {
    async fn save(&self, result: &AggregatedResult) -> StoreResult<()> {
        self.aggregates
            .insert(result.test_id.clone(), result.clone());
        Ok(())
    }

    async fn get_by_test_id(&self, test_id: &str) -> StoreResult<AggregatedResult> {
        self.aggregates
            .get(test_id)
            .map(|a| a.clone())
            .ok_or_else(|| StoreError::NotFound(format!("aggregate for test {test_id}")))
    }

    async fn get_all(&self) -> StoreResult<Vec<AggregatedResult>> {
        Ok(self.aggregates.iter().map(|a| a.clone()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributed::types::{RateDistributionMode, TestStatus};
    use chrono::Utc;

    fn sample_test(id: &str) -> Test {
        Test {
            id: id.to_string(),
            name: "load".into(),
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
        }
    }

    #[tokio::test]
    async fn worker_repo_round_trips() {
        let repo = InMemoryWorkerRepo::new();
        let worker = Worker::new("w1".into(), "127.0.0.1:9000".into());
        repo.register(&worker).await.unwrap();
        assert_eq!(repo.get_by_id("w1").await.unwrap().id, "w1");
        assert!(repo.get_by_id("missing").await.is_err());
    }

    #[tokio::test]
    async fn test_repo_rejects_duplicate_save() {
        let repo = InMemoryTestRepo::new();
        repo.save(&sample_test("t1")).await.unwrap();
        let err = repo.save(&sample_test("t1")).await.unwrap_err();
        assert!(err.is_duplicate_key());
    }

    #[tokio::test]
    async fn test_repo_add_assigned_is_set_semantic() {
        let repo = InMemoryTestRepo::new();
        repo.save(&sample_test("t1")).await.unwrap();
        repo.add_assigned("t1", "w1").await.unwrap();
        repo.add_assigned("t1", "w1").await.unwrap();
        let test = repo.get_by_id("t1").await.unwrap();
        assert_eq!(test.assigned_workers, vec!["w1".to_string()]);
    }

    #[tokio::test]
    async fn result_repo_save_is_idempotent_per_worker() {
        let repo = InMemoryResultRepo::new();
        let result = TestResult {
            id: "r1".into(),
            test_id: "t1".into(),
            worker_id: "w1".into(),
            total_requests: 100,
            completed_requests: 100,
            duration_ms: 1000,
            success_rate: 1.0,
            average_latency_ms: 5.0,
            p95_latency_ms: 10.0,
            engine_metrics_base64: String::new(),
            status_code_counts: Default::default(),
            timestamp: Utc::now(),
        };
        repo.save_test_result(&result).await.unwrap();
        repo.save_test_result(&result).await.unwrap();
        assert_eq!(repo.get_by_test_id("t1").await.unwrap().len(), 1);
    }
}
