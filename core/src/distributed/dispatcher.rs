// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The Dispatcher (§4.4): a single long-running task that pulls admitted
//! tests off the Intake Queue, gathers workers, plans rates, and fans out
//! assignments (§4.5).

use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::distributed::availability::AvailabilitySet;
use crate::distributed::queue::IntakeQueue;
use crate::distributed::rateplan::plan_rates;
use crate::distributed::reconciler::Reconciler;
use crate::distributed::registry::WorkerRegistry;
use crate::distributed::transport::{AssignTestRequest, ASSIGN_TEST_DEADLINE};
use crate::distributed::types::{failure_reason, Test, TestStatus, WorkerId, WorkerStatus};
use crate::store::traits::TestRepo;

/// Deadline for gathering `T.worker_count` workers from the Availability Set.
pub const GATHER_DEADLINE: Duration = Duration::from_secs(30);

/// How long the Dispatcher waits on the Intake Queue before running an idle
/// Reconciler tick (§4.4: "every 10 seconds of idle").
pub const IDLE_TICK: Duration = Duration::from_secs(10);

/// Drives tests from admission through assignment.
pub struct Dispatcher {
    queue: Arc<IntakeQueue>,
    availability: Arc<AvailabilitySet>,
    registry: Arc<WorkerRegistry>,
    test_repo: Arc<dyn TestRepo>,
    reconciler: Arc<Reconciler>,
}

impl Dispatcher {
    /// Build a dispatcher over the shared singletons it drives.
    pub fn new(
        queue: Arc<IntakeQueue>,
        availability: Arc<AvailabilitySet>,
        registry: Arc<WorkerRegistry>,
        test_repo: Arc<dyn TestRepo>,
        reconciler: Arc<Reconciler>,
    ) -> Self {
        Self {
            queue,
            availability,
            registry,
            test_repo,
            reconciler,
        }
    }

    /// Run the dispatch loop until the Intake Queue's producers are all
    /// dropped (coordinator shutdown).
    pub async fn run(&self) {
        info!("dispatcher started");
        loop {
            match tokio::time::timeout(IDLE_TICK, self.queue.next()).await {
                Ok(Some(test)) => self.dispatch_one(test).await,
                Ok(None) => {
                    info!("intake queue closed, dispatcher exiting");
                    return;
                }
                Err(_elapsed) => {
                    self.reconciler.run_idle_tick().await;
                }
            }
        }
    }

    async fn dispatch_one(&self, mut test: Test) {
        let gathered = self.gather_workers(test.worker_count as usize).await;

        if gathered.is_empty() {
            if self.queue.try_requeue(test.clone()) {
                info!(test_id = %test.id, "no workers available, requeued test");
                return;
            }
            test.status = TestStatus::Failed;
            test.failure_reason = Some(failure_reason::NO_WORKERS_AVAILABLE.to_string());
            self.persist_status(&test).await;
            warn!(test_id = %test.id, "no workers available, requeue dropped, test failed");
            return;
        }

        let rates = match plan_rates(
            test.total_rate,
            gathered.len() as u32,
            test.rate_distribution,
            test.rate_weights.as_deref(),
        ) {
            Ok(rates) => rates,
            Err(err) => {
                test.status = TestStatus::Failed;
                test.failure_reason = Some(err.to_string());
                self.persist_status(&test).await;
                warn!(test_id = %test.id, error = %err, "rate planning failed post-gather");
                return;
            }
        };

        test.status = TestStatus::Running;
        self.persist_status(&test).await;

        self.fan_out(&mut test, &gathered, &rates).await;
    }

    /// Repeatedly `Take` from the Availability Set until `count` workers are
    /// gathered or [`GATHER_DEADLINE`] elapses.
    async fn gather_workers(&self, count: usize) -> Vec<WorkerId> {
        let deadline = Instant::now() + GATHER_DEADLINE;
        let mut gathered = Vec::with_capacity(count);

        while gathered.len() < count {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match tokio::time::timeout(remaining, self.availability.take()).await {
                Ok(Some(id)) => {
                    self.availability.remove(&id);
                    gathered.push(id);
                }
                Ok(None) | Err(_) => break,
            }
        }

        gathered
    }

    async fn fan_out(&self, test: &mut Test, workers: &[WorkerId], rates: &[u32]) {
        let request_base = AssignTestRequest::from_test(test, 0);

        let outcomes = join_all(workers.iter().zip(rates.iter()).map(|(worker_id, rate)| {
            let worker_id = worker_id.clone();
            let mut request = request_base.clone();
            request.rate_per_second = *rate;
            self.assign_one(worker_id, request)
        }))
        .await;

        let mut accepted_any = false;
        for (worker_id, accepted) in outcomes {
            if accepted {
                accepted_any = true;
                test.add_assigned(&worker_id);
                if let Err(err) = self.test_repo.add_assigned(&test.id, &worker_id).await {
                    warn!(test_id = %test.id, worker_id = %worker_id, error = %err, "failed to persist assignment");
                }
            } else {
                test.add_failed(&worker_id);
                if let Err(err) = self.test_repo.add_failed(&test.id, &worker_id).await {
                    warn!(test_id = %test.id, worker_id = %worker_id, error = %err, "failed to persist failed-worker");
                }
            }
        }

        if !accepted_any {
            test.status = TestStatus::Failed;
            test.failure_reason = Some(failure_reason::ALL_WORKERS_REJECTED.to_string());
            self.persist_status(test).await;
            warn!(test_id = %test.id, "every gathered worker rejected assignment");
        }
    }

    /// Assign `test` to `worker_id`, returning whether the assignment was
    /// accepted. Implements §4.5 steps (a)-(e); acceptance (f) is handled by
    /// the caller so the Test Store write stays out of this per-worker path.
    async fn assign_one(&self, worker_id: WorkerId, request: AssignTestRequest) -> (WorkerId, bool) {
        let channel = match self.registry.channel(&worker_id) {
            Some(channel) => channel,
            None => {
                self.registry.mark_offline(&worker_id).await;
                return (worker_id, false);
            }
        };

        self.registry.set_in_memory_status(
            &worker_id,
            WorkerStatus::Busy,
            Some(request.test_id.clone()),
            format!("assigned test {}", request.test_id),
        );

        let outcome = tokio::time::timeout(ASSIGN_TEST_DEADLINE, channel.assign_test(request)).await;

        match outcome {
            Ok(Ok(response)) if response.accepted => (worker_id, true),
            Ok(Ok(_response)) => {
                self.registry.set_in_memory_status(
                    &worker_id,
                    WorkerStatus::Ready,
                    None,
                    String::new(),
                );
                self.availability.add(&worker_id);
                (worker_id, false)
            }
            Ok(Err(_transport_err)) => {
                self.registry.mark_offline(&worker_id).await;
                (worker_id, false)
            }
            Err(_elapsed) => {
                self.registry.mark_offline(&worker_id).await;
                (worker_id, false)
            }
        }
    }

    async fn persist_status(&self, test: &Test) {
        if let Err(err) = self.test_repo.update_status(test).await {
            warn!(test_id = %test.id, error = %err, "failed to persist test status");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributed::completion::CompletionEngine;
    use crate::distributed::transport::fake::FakeTransport;
    use crate::distributed::transport::WorkerTransportFactory;
    use crate::distributed::types::{DistributedError, RateDistributionMode};
    use crate::store::memory::{InMemoryAggregatedRepo, InMemoryResultRepo, InMemoryTestRepo, InMemoryWorkerRepo};
    use async_trait::async_trait;
    use chrono::Utc;
    use dashmap::DashMap;

    #[derive(Default)]
    struct ScriptedFactory {
        scripted: DashMap<String, Arc<dyn crate::distributed::transport::WorkerTransport>>,
    }

    #[async_trait]
    impl WorkerTransportFactory for ScriptedFactory {
        async fn connect(
            &self,
            address: &str,
        ) -> Result<Arc<dyn crate::distributed::transport::WorkerTransport>, DistributedError> {
            Ok(self
                .scripted
                .get(address)
                .map(|t| t.clone())
                .unwrap_or_else(FakeTransport::accepting))
        }
    }

    fn sample_test(worker_count: u32) -> Test {
        Test {
            id: "t1".into(),
            name: "load".into(),
            requester_id: "u1".into(),
            duration: "30s".into(),
            total_rate: 30,
            worker_count,
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

    fn build(factory: Arc<ScriptedFactory>) -> (Arc<Dispatcher>, Arc<WorkerRegistry>, Arc<AvailabilitySet>, Arc<IntakeQueue>, Arc<dyn TestRepo>) {
        let availability = Arc::new(AvailabilitySet::new());
        let queue = Arc::new(IntakeQueue::new());
        let registry = Arc::new(WorkerRegistry::new(
            Arc::clone(&availability),
            factory,
            Arc::new(InMemoryWorkerRepo::new()),
        ));
        let test_repo: Arc<dyn TestRepo> = Arc::new(InMemoryTestRepo::new());
        let completion_engine = Arc::new(CompletionEngine::new(
            Arc::clone(&test_repo),
            Arc::new(InMemoryResultRepo::new()),
            Arc::new(InMemoryAggregatedRepo::new()),
            Arc::clone(&registry),
        ));
        let reconciler = Arc::new(Reconciler::new(
            Arc::clone(&registry),
            Arc::clone(&queue),
            Arc::clone(&test_repo),
            Arc::new(InMemoryAggregatedRepo::new()),
            completion_engine,
        ));
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&queue),
            Arc::clone(&availability),
            Arc::clone(&registry),
            Arc::clone(&test_repo),
            reconciler,
        ));
        (dispatcher, registry, availability, queue, test_repo)
    }

    #[tokio::test]
    async fn dispatch_one_assigns_every_gathered_worker() {
        let factory = Arc::new(ScriptedFactory::default());
        let (dispatcher, registry, _availability, _queue, test_repo) = build(factory);

        registry.register("w1".into(), "w1".into()).await.unwrap();
        registry.register("w2".into(), "w2".into()).await.unwrap();
        test_repo.save(&sample_test(2)).await.unwrap();

        dispatcher.dispatch_one(sample_test(2)).await;

        let test = test_repo.get_by_id("t1").await.unwrap();
        assert_eq!(test.status, TestStatus::Running);
        assert_eq!(test.assigned_workers.len(), 2);
        assert!(test.failed_workers.is_empty());
    }

    #[tokio::test]
    async fn dispatch_one_fails_test_when_every_worker_rejects() {
        let factory = Arc::new(ScriptedFactory::default());
        factory.scripted.insert("w1".into(), FakeTransport::rejecting("busy"));
        let (dispatcher, registry, _availability, _queue, test_repo) = build(factory);

        registry.register("w1".into(), "w1".into()).await.unwrap();
        test_repo.save(&sample_test(1)).await.unwrap();

        dispatcher.dispatch_one(sample_test(1)).await;

        let test = test_repo.get_by_id("t1").await.unwrap();
        assert_eq!(test.status, TestStatus::Failed);
        assert_eq!(test.failure_reason, Some(failure_reason::ALL_WORKERS_REJECTED.to_string()));
        assert_eq!(test.failed_workers, vec!["w1".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn dispatch_one_requeues_when_no_workers_are_gathered() {
        let factory = Arc::new(ScriptedFactory::default());
        let (dispatcher, _registry, _availability, queue, test_repo) = build(factory);
        test_repo.save(&sample_test(1)).await.unwrap();

        let handle = tokio::spawn(async move { dispatcher.dispatch_one(sample_test(1)).await });
        tokio::time::advance(GATHER_DEADLINE + Duration::from_secs(1)).await;
        handle.await.unwrap();

        // Nothing was ever gathered, so `dispatch_one` falls back to
        // `try_requeue`; the test should be sitting back on the queue rather
        // than persisted as failed.
        let requeued = queue.next().await.unwrap();
        assert_eq!(requeued.id, "t1");
    }
}
