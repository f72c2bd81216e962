// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The Coordinator: wires the engine's components together and exposes the
//! submission surface consumed by the HTTP handler collaborator (§6).

use std::sync::Arc;
use uuid::Uuid;

use crate::distributed::availability::AvailabilitySet;
use crate::distributed::completion::CompletionEngine;
use crate::distributed::dispatcher::Dispatcher;
use crate::distributed::queue::IntakeQueue;
use crate::distributed::reconciler::Reconciler;
use crate::distributed::registry::WorkerRegistry;
use crate::distributed::transport::WorkerTransportFactory;
use crate::distributed::types::{
    DistributedError, RateDistributionMode, Test, TestId, TestResult, TestStatus, Worker,
    WorkerId, WorkerStatus,
};
use crate::store::traits::{AggregatedRepo, ResultRepo, TestPage, TestRepo, WorkerRepo};

/// Caller-submitted load test specification (§6 `SubmitTest`).
#[derive(Debug, Clone)]
pub struct TestSpec {
    /// Human-readable name.
    pub name: String,
    /// Human-readable duration, e.g. "30s", "5m".
    pub duration: String,
    /// Total requested rate in requests/second.
    pub rate_per_second: u32,
    /// Number of workers requested. `0` normalises to `1`.
    pub worker_count: u32,
    /// Rate-distribution mode name; defaults to `"shared"` if empty.
    pub rate_distribution: String,
    /// Per-worker weights, required iff `rate_distribution == "weighted"`.
    pub rate_weights: Option<Vec<f64>>,
    /// Opaque base64 targets payload, handed to workers unmodified.
    pub targets_base64: String,
    /// Opaque JSON attack-options payload, handed to workers unmodified.
    pub attack_options_json: String,
}

/// A point-in-time view of registry and test-store state (§6
/// `DashboardSnapshot`).
#[derive(Debug, Clone)]
pub struct DashboardSnapshot {
    /// Number of known workers, any status.
    pub total_workers: usize,
    /// Number of workers currently READY.
    pub ready_count: usize,
    /// Number of workers currently BUSY.
    pub busy_count: usize,
    /// Non-terminal tests.
    pub active_tests: Vec<Test>,
    /// Every known worker.
    pub worker_summaries: Vec<Worker>,
}

/// The coordinator engine: owns the Intake Queue, Availability Set, Worker
/// Registry, and the Dispatcher/Reconciler/CompletionEngine collaborators
/// built over them.
pub struct Coordinator {
    queue: Arc<IntakeQueue>,
    availability: Arc<AvailabilitySet>,
    registry: Arc<WorkerRegistry>,
    test_repo: Arc<dyn TestRepo>,
    result_repo: Arc<dyn ResultRepo>,
    aggregated_repo: Arc<dyn AggregatedRepo>,
    completion_engine: Arc<CompletionEngine>,
    dispatcher: Arc<Dispatcher>,
    reconciler: Arc<Reconciler>,
}

impl Coordinator {
    /// Build a coordinator over durable stores and a worker-dial factory,
    /// with default Intake Queue / Availability Set capacities.
    pub fn new(
        worker_repo: Arc<dyn WorkerRepo>,
        test_repo: Arc<dyn TestRepo>,
        result_repo: Arc<dyn ResultRepo>,
        aggregated_repo: Arc<dyn AggregatedRepo>,
        transport_factory: Arc<dyn WorkerTransportFactory>,
    ) -> Arc<Self> {
        Self::with_capacities(
            worker_repo,
            test_repo,
            result_repo,
            aggregated_repo,
            transport_factory,
            crate::distributed::queue::DEFAULT_CAPACITY,
            crate::distributed::availability::DEFAULT_CAPACITY,
        )
    }

    /// Build a coordinator with explicit Intake Queue / Availability Set
    /// capacities, for configuration-driven deployments and tests.
    pub fn with_capacities(
        worker_repo: Arc<dyn WorkerRepo>,
        test_repo: Arc<dyn TestRepo>,
        result_repo: Arc<dyn ResultRepo>,
        aggregated_repo: Arc<dyn AggregatedRepo>,
        transport_factory: Arc<dyn WorkerTransportFactory>,
        queue_capacity: usize,
        availability_capacity: usize,
    ) -> Arc<Self> {
        let queue = Arc::new(IntakeQueue::with_capacity(queue_capacity));
        let availability = Arc::new(AvailabilitySet::with_capacity(availability_capacity));
        let registry = Arc::new(WorkerRegistry::new(
            Arc::clone(&availability),
            transport_factory,
            worker_repo,
        ));
        let completion_engine = Arc::new(CompletionEngine::new(
            Arc::clone(&test_repo),
            Arc::clone(&result_repo),
            Arc::clone(&aggregated_repo),
            Arc::clone(&registry),
        ));
        let reconciler = Arc::new(Reconciler::new(
            Arc::clone(&registry),
            Arc::clone(&queue),
            Arc::clone(&test_repo),
            Arc::clone(&aggregated_repo),
            Arc::clone(&completion_engine),
        ));
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&queue),
            Arc::clone(&availability),
            Arc::clone(&registry),
            Arc::clone(&test_repo),
            Arc::clone(&reconciler),
        ));

        Arc::new(Self {
            queue,
            availability,
            registry,
            test_repo,
            result_repo,
            aggregated_repo,
            completion_engine,
            dispatcher,
            reconciler,
        })
    }

    /// Spawn the Dispatcher loop and the orphan-aggregation loop as
    /// background tasks. Callers keep the returned handles to await a clean
    /// shutdown.
    pub fn spawn_background_tasks(self: &Arc<Self>) -> Vec<tokio::task::JoinHandle<()>> {
        let dispatcher = Arc::clone(&self.dispatcher);
        let reconciler = Arc::clone(&self.reconciler);
        vec![
            tokio::spawn(async move { dispatcher.run().await }),
            tokio::spawn(async move { reconciler.run_orphan_aggregation_loop().await }),
        ]
    }

    /// Register a worker at `address` (§4.1).
    pub async fn register_worker(&self, id: WorkerId, address: String) -> Result<(), DistributedError> {
        self.registry.register(id, address).await
    }

    /// Apply an inbound `StreamStatus` update (§4.1).
    #[allow(clippy::too_many_arguments)]
    pub async fn update_worker_status(
        &self,
        id: &str,
        status: WorkerStatus,
        current_test_id: Option<TestId>,
        progress_msg: String,
        completed_requests: u64,
        total_requests: u64,
    ) {
        self.registry
            .update_status(id, status, current_test_id, progress_msg, completed_requests, total_requests)
            .await;
    }

    /// Validate and admit a new test (§6 `SubmitTest`, §7 Validation /
    /// Backpressure).
    pub async fn submit_test(&self, requester_id: String, spec: TestSpec) -> Result<TestId, DistributedError> {
        let worker_count = spec.worker_count.max(1);
        let rate_distribution = if spec.rate_distribution.is_empty() {
            "shared"
        } else {
            &spec.rate_distribution
        };
        let rate_distribution = RateDistributionMode::parse(rate_distribution)
            .ok_or_else(|| DistributedError::Validation(format!("unknown rate distribution mode: {rate_distribution}")))?;

        if rate_distribution == RateDistributionMode::Weighted {
            let weights = spec
                .rate_weights
                .as_ref()
                .ok_or_else(|| DistributedError::Validation("weighted mode requires rate_weights".into()))?;
            if weights.len() != worker_count as usize {
                return Err(DistributedError::Validation(format!(
                    "rate_weights length {} does not match worker_count {worker_count}",
                    weights.len()
                )));
            }
            if weights.iter().any(|w| *w <= 0.0) {
                return Err(DistributedError::Validation("all rate_weights must be positive".into()));
            }
        }

        let test = Test {
            id: Uuid::new_v4().to_string(),
            name: spec.name,
            requester_id,
            duration: spec.duration,
            total_rate: spec.rate_per_second,
            worker_count,
            rate_distribution,
            rate_weights: spec.rate_weights,
            targets_base64: spec.targets_base64,
            attack_options_json: spec.attack_options_json,
            created_at: chrono::Utc::now(),
            status: TestStatus::Pending,
            assigned_workers: vec![],
            completed_workers: vec![],
            failed_workers: vec![],
            failure_reason: None,
        };

        self.test_repo
            .save(&test)
            .await
            .map_err(|err| DistributedError::Persistence(err.to_string()))?;

        self.queue.submit(test.clone()).await?;

        Ok(test.id)
    }

    /// Handle an inbound `SubmitResult` call (§4.6).
    pub async fn submit_result(&self, result: TestResult) -> Result<(), DistributedError> {
        self.completion_engine.submit_result(result).await
    }

    /// Fetch a test by ID.
    pub async fn get_test(&self, id: &str) -> Result<Test, DistributedError> {
        self.test_repo
            .get_by_id(id)
            .await
            .map_err(|_| DistributedError::TestNotFound(id.to_string()))
    }

    /// List tests, paginated.
    pub async fn list_tests(&self, offset: u64, limit: u64) -> Result<TestPage, DistributedError> {
        self.test_repo
            .get_paginated(offset, limit)
            .await
            .map_err(|err| DistributedError::Persistence(err.to_string()))
    }

    /// Fetch every result recorded for a test.
    pub async fn get_results_by_test(&self, test_id: &str) -> Result<Vec<TestResult>, DistributedError> {
        self.result_repo
            .get_by_test_id(test_id)
            .await
            .map_err(|err| DistributedError::Persistence(err.to_string()))
    }

    /// Fetch the aggregate computed for a test.
    pub async fn get_aggregated(&self, test_id: &str) -> Result<crate::distributed::types::AggregatedResult, DistributedError> {
        self.aggregated_repo
            .get_by_test_id(test_id)
            .await
            .map_err(|_| DistributedError::TestNotFound(test_id.to_string()))
    }

    /// Build a point-in-time dashboard view (§6 `DashboardSnapshot`).
    pub async fn dashboard_snapshot(&self) -> DashboardSnapshot {
        let worker_summaries = self.registry.get_all();
        let ready_count = worker_summaries.iter().filter(|w| w.status == WorkerStatus::Ready).count();
        let busy_count = worker_summaries.iter().filter(|w| w.status == WorkerStatus::Busy).count();

        let active_tests = self
            .test_repo
            .get_all()
            .await
            .unwrap_or_default()
            .into_iter()
            .filter(|t| !t.status.is_terminal())
            .collect();

        DashboardSnapshot {
            total_workers: worker_summaries.len(),
            ready_count,
            busy_count,
            active_tests,
            worker_summaries,
        }
    }

    /// The Availability Set, for callers that need direct visibility (tests,
    /// diagnostics).
    pub fn availability(&self) -> &Arc<AvailabilitySet> {
        &self.availability
    }

    /// The Worker Registry, for callers that need direct visibility (tests,
    /// the RPC server's status-stream handler).
    pub fn registry(&self) -> &Arc<WorkerRegistry> {
        &self.registry
    }

    /// The Test Store, for tests that need to seed state the live dispatch
    /// path would otherwise take real time to reach.
    pub fn test_repo(&self) -> &Arc<dyn TestRepo> {
        &self.test_repo
    }

    /// The Reconciler, for tests that want to drive a sweep directly instead
    /// of waiting on the Dispatcher's idle tick.
    pub fn reconciler(&self) -> &Arc<Reconciler> {
        &self.reconciler
    }
}
