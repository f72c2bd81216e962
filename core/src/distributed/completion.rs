// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The Completion Engine (§4.6) and Test Completion State Machine (§4.7).

use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::distributed::registry::WorkerRegistry;
use crate::distributed::types::{DistributedError, Test, TestId, TestResult, TestStatus};
use crate::store::traits::{AggregatedRepo, ResultRepo, TestRepo};

/// Deadline for the detached completion/aggregation follow-up spawned from
/// `SubmitResult` (§4.6 step 3, §5 "each with its own 30-second deadline").
pub const FOLLOWUP_DEADLINE: Duration = Duration::from_secs(30);

/// Evaluate the next status for a test given the current counts (§4.7).
/// Returns `None` when the test is already terminal or should remain
/// RUNNING — i.e. no write is needed.
pub fn evaluate_completion(status: TestStatus, assigned: usize, completed: usize, failed: usize) -> Option<TestStatus> {
    if status.is_terminal() {
        return None;
    }
    if completed + failed < assigned {
        return None;
    }
    if completed == assigned {
        Some(TestStatus::Completed)
    } else if completed > 0 {
        Some(TestStatus::PartiallyFailed)
    } else {
        Some(TestStatus::Failed)
    }
}

/// Handles inbound `SubmitResult` calls: persists the result, records
/// completion, and triggers the completion/aggregation follow-up.
pub struct CompletionEngine {
    test_repo: Arc<dyn TestRepo>,
    result_repo: Arc<dyn ResultRepo>,
    aggregated_repo: Arc<dyn AggregatedRepo>,
    registry: Arc<WorkerRegistry>,
}

impl CompletionEngine {
    /// Build a completion engine over the stores and registry it coordinates.
    pub fn new(
        test_repo: Arc<dyn TestRepo>,
        result_repo: Arc<dyn ResultRepo>,
        aggregated_repo: Arc<dyn AggregatedRepo>,
        registry: Arc<WorkerRegistry>,
    ) -> Self {
        Self {
            test_repo,
            result_repo,
            aggregated_repo,
            registry,
        }
    }

    /// Handle one `SubmitResult` call synchronously for steps 1-2, then
    /// detach the completion/aggregation follow-up (§4.6 step 3).
    ///
    /// Returns an error only when the result itself could not be persisted —
    /// the worker should then retry the call.
    pub async fn submit_result(self: &Arc<Self>, result: TestResult) -> Result<(), DistributedError> {
        self.result_repo
            .save_test_result(&result)
            .await
            .map_err(|err| DistributedError::Persistence(err.to_string()))?;

        let test_id = result.test_id.clone();
        let worker_id = result.worker_id.clone();

        if let Err(err) = self.test_repo.add_completed(&test_id, &worker_id).await {
            warn!(test_id = %test_id, worker_id = %worker_id, error = %err, "failed to record completed worker");
        }

        let engine = Arc::clone(self);
        tokio::spawn(async move {
            match tokio::time::timeout(FOLLOWUP_DEADLINE, engine.evaluate_and_aggregate(&test_id)).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => warn!(test_id = %test_id, error = %err, "completion follow-up failed"),
                Err(_elapsed) => warn!(test_id = %test_id, "completion follow-up timed out"),
            }
        });

        Ok(())
    }

    /// Re-evaluate a test's terminal status and recompute its aggregate.
    /// Exposed directly so the Reconciler can reuse the same logic.
    pub async fn evaluate_and_aggregate(&self, test_id: &TestId) -> Result<(), DistributedError> {
        let mut test = self
            .test_repo
            .get_by_id(test_id)
            .await
            .map_err(|err| DistributedError::Persistence(err.to_string()))?;

        self.apply_transition(&mut test).await?;
        self.recompute_aggregate(test_id).await?;
        Ok(())
    }

    /// Apply §4.7 to `test` and persist the transition if one occurred.
    pub async fn apply_transition(&self, test: &mut Test) -> Result<(), DistributedError> {
        let next = evaluate_completion(
            test.status,
            test.assigned_workers.len(),
            test.completed_workers.len(),
            test.failed_workers.len(),
        );

        let Some(next_status) = next else {
            return Ok(());
        };

        test.status = next_status;
        if let Err(err) = self.test_repo.update_status(test).await {
            warn!(test_id = %test.id, error = %err, "failed to persist terminal status");
        }

        for worker_id in &test.assigned_workers {
            self.registry
                .set_in_memory_status(worker_id, crate::distributed::types::WorkerStatus::Ready, None, String::new());
        }

        info!(test_id = %test.id, status = %format!("{next_status:?}"), "test reached terminal status");
        Ok(())
    }

    async fn recompute_aggregate(&self, test_id: &TestId) -> Result<(), DistributedError> {
        let results = self
            .result_repo
            .get_by_test_id(test_id)
            .await
            .map_err(|err| DistributedError::Persistence(err.to_string()))?;

        if let Some(aggregate) = crate::distributed::aggregator::aggregate(test_id, &results) {
            if let Err(err) = self.aggregated_repo.save(&aggregate).await {
                warn!(test_id = %test_id, error = %err, "failed to persist aggregate");
            }
        }

        Ok(())
    }
}
