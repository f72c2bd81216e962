// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The Reconciler (§4.9): stale-worker, stuck-test, and orphan-aggregation
//! sweeps. The first two run on the Dispatcher's idle tick; orphan
//! aggregation runs on its own periodic loop.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::distributed::completion::CompletionEngine;
use crate::distributed::queue::IntakeQueue;
use crate::distributed::registry::WorkerRegistry;
use crate::distributed::types::{TestStatus, WorkerStatus};
use crate::store::traits::{AggregatedRepo, TestRepo};

/// A worker not seen within this many seconds is considered stale (§4.9).
pub const STALE_WORKER_TIMEOUT_SECS: i64 = 30;

/// A RUNNING/PENDING test older than this is a stuck-test candidate.
pub const STUCK_TEST_AGE: Duration = Duration::from_secs(30 * 60);

/// Grace period added to a test's own declared duration before it is
/// considered overdue.
pub const DURATION_GRACE: Duration = Duration::from_secs(5 * 60);

/// Interval of the standalone orphan-aggregation loop.
pub const ORPHAN_AGGREGATION_INTERVAL: Duration = Duration::from_secs(2 * 60);

/// Runs the three §4.9 sweeps against the shared stores and registry.
pub struct Reconciler {
    registry: Arc<WorkerRegistry>,
    queue: Arc<IntakeQueue>,
    test_repo: Arc<dyn TestRepo>,
    aggregated_repo: Arc<dyn AggregatedRepo>,
    completion_engine: Arc<CompletionEngine>,
}

impl Reconciler {
    /// Build a reconciler over the stores and registry it sweeps.
    pub fn new(
        registry: Arc<WorkerRegistry>,
        queue: Arc<IntakeQueue>,
        test_repo: Arc<dyn TestRepo>,
        aggregated_repo: Arc<dyn AggregatedRepo>,
        completion_engine: Arc<CompletionEngine>,
    ) -> Self {
        Self {
            registry,
            queue,
            test_repo,
            aggregated_repo,
            completion_engine,
        }
    }

    /// Run the stale-worker and stuck-test sweeps. Called from the
    /// Dispatcher on every 10-second idle tick.
    pub async fn run_idle_tick(&self) {
        self.sweep_stale_workers().await;
        self.sweep_stuck_tests().await;
    }

    /// Run the standalone orphan-aggregation loop until cancelled.
    pub async fn run_orphan_aggregation_loop(&self) {
        let mut ticker = tokio::time::interval(ORPHAN_AGGREGATION_INTERVAL);
        loop {
            ticker.tick().await;
            self.sweep_orphan_aggregations().await;
        }
    }

    async fn sweep_stale_workers(&self) {
        for worker in self.registry.get_all() {
            if worker.status == WorkerStatus::Offline {
                continue;
            }
            if worker.is_healthy(STALE_WORKER_TIMEOUT_SECS) {
                continue;
            }

            warn!(worker_id = %worker.id, "worker stale, marking offline");
            self.registry.mark_offline(&worker.id).await;

            let Some(test_id) = worker.current_test_id.clone() else {
                continue;
            };

            let test = match self.test_repo.get_by_id(&test_id).await {
                Ok(test) => test,
                Err(err) => {
                    warn!(test_id = %test_id, error = %err, "stale-worker sweep could not load test");
                    continue;
                }
            };
            if test.status.is_terminal() {
                continue;
            }

            if let Err(err) = self.test_repo.add_failed(&test_id, &worker.id).await {
                warn!(test_id = %test_id, worker_id = %worker.id, error = %err, "failed to record stale worker as failed");
            }

            let mut test = test;
            test.add_failed(&worker.id);
            if let Err(err) = self.completion_engine.apply_transition(&mut test).await {
                warn!(test_id = %test_id, error = %err, "completion transition failed during stale sweep");
            }

            if !test.status.is_terminal() {
                self.queue.try_requeue(test);
            }
        }
    }

    async fn sweep_stuck_tests(&self) {
        let tests = match self.test_repo.get_all().await {
            Ok(tests) => tests,
            Err(err) => {
                warn!(error = %err, "stuck-test sweep could not list tests");
                return;
            }
        };

        let active_workers = self.registry.get_all();

        for mut test in tests {
            if test.status.is_terminal() {
                continue;
            }
            if !matches!(test.status, TestStatus::Running | TestStatus::Pending) {
                continue;
            }

            let age = Utc::now().signed_duration_since(test.created_at);
            let too_old = age.num_seconds() > STUCK_TEST_AGE.as_secs() as i64;

            let duration_overdue = parse_duration_secs(&test.duration)
                .map(|secs| age.num_seconds() > secs + DURATION_GRACE.as_secs() as i64)
                .unwrap_or(false);

            let assigned_exceeds_active = {
                let active_for_test = active_workers
                    .iter()
                    .filter(|w| {
                        w.status != WorkerStatus::Offline
                            && w.current_test_id.as_deref() == Some(test.id.as_str())
                    })
                    .count();
                test.assigned_workers.len() > active_for_test
            };

            if !too_old && !duration_overdue && !assigned_exceeds_active {
                continue;
            }

            info!(test_id = %test.id, too_old, duration_overdue, assigned_exceeds_active, "stuck-test candidate");

            for worker_id in test.assigned_workers.clone() {
                let already_reported =
                    test.completed_workers.contains(&worker_id) || test.failed_workers.contains(&worker_id);
                if already_reported {
                    continue;
                }
                let still_active = active_workers.iter().any(|w| {
                    w.id == worker_id
                        && w.status != WorkerStatus::Offline
                        && w.current_test_id.as_deref() == Some(test.id.as_str())
                });
                if still_active && !too_old && !duration_overdue {
                    continue;
                }
                test.add_failed(&worker_id);
                if let Err(err) = self.test_repo.add_failed(&test.id, &worker_id).await {
                    warn!(test_id = %test.id, worker_id = %worker_id, error = %err, "failed to record timed-out worker");
                }
            }

            if let Err(err) = self.completion_engine.apply_transition(&mut test).await {
                warn!(test_id = %test.id, error = %err, "completion transition failed during stuck-test sweep");
            }
        }
    }

    async fn sweep_orphan_aggregations(&self) {
        let tests = match self.test_repo.get_all().await {
            Ok(tests) => tests,
            Err(err) => {
                warn!(error = %err, "orphan-aggregation sweep could not list tests");
                return;
            }
        };

        for test in tests.iter().filter(|t| t.status.is_terminal()) {
            if self.aggregated_repo.get_by_test_id(&test.id).await.is_ok() {
                continue;
            }
            info!(test_id = %test.id, "scheduling orphan aggregation");
            if let Err(err) = self.completion_engine.evaluate_and_aggregate(&test.id).await {
                warn!(test_id = %test.id, error = %err, "orphan aggregation failed");
            }
        }
    }
}

/// Parse a human-readable duration like "30s", "5m", "1h" into seconds.
/// Returns `None` for anything it cannot parse; callers treat that as "no
/// duration-based timeout applies".
fn parse_duration_secs(s: &str) -> Option<i64> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    match s.chars().next_back() {
        Some('s') => s[..s.len() - 1].parse().ok(),
        Some('m') => s[..s.len() - 1].parse::<i64>().ok().map(|v| v * 60),
        Some('h') => s[..s.len() - 1].parse::<i64>().ok().map(|v| v * 3600),
        _ => s.parse().ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_seconds_minutes_hours() {
        assert_eq!(parse_duration_secs("30s"), Some(30));
        assert_eq!(parse_duration_secs("5m"), Some(300));
        assert_eq!(parse_duration_secs("1h"), Some(3600));
    }

    #[test]
    fn bare_number_is_treated_as_seconds() {
        assert_eq!(parse_duration_secs("45"), Some(45));
    }

    #[test]
    fn garbage_yields_none() {
        assert_eq!(parse_duration_secs(""), None);
        assert_eq!(parse_duration_secs("abc"), None);
    }
}
