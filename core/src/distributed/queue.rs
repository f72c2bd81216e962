// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The Intake Queue (§3/§4.4): a bounded FIFO of admitted tests awaiting
//! dispatch.

use std::time::Duration;
use tokio::sync::{mpsc, Mutex as AsyncMutex};

use crate::distributed::types::{DistributedError, Test};

/// Default bounded capacity for the Intake Queue.
pub const DEFAULT_CAPACITY: usize = 100;

/// How long `submit` waits for room before failing with `Backpressure`.
pub const SUBMIT_WAIT: Duration = Duration::from_secs(5);

/// A bounded, ordered queue of [`Test`] values awaiting dispatch.
pub struct IntakeQueue {
    tx: mpsc::Sender<Test>,
    rx: AsyncMutex<mpsc::Receiver<Test>>,
}

impl IntakeQueue {
    /// Build a queue with the default bounded capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Build a queue with an explicit bounded capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            tx,
            rx: AsyncMutex::new(rx),
        }
    }

    /// Admit `test`, waiting up to [`SUBMIT_WAIT`] for room. Fails with
    /// [`DistributedError::Backpressure`] if the queue is still full after
    /// the wait.
    pub async fn submit(&self, test: Test) -> Result<(), DistributedError> {
        tokio::time::timeout(SUBMIT_WAIT, self.tx.send(test))
            .await
            .map_err(|_| {
                DistributedError::Backpressure("intake queue full after 5s wait".into())
            })?
            .map_err(|_| DistributedError::Internal("intake queue closed".into()))
    }

    /// Re-enqueue `test` without blocking. Used by the Dispatcher on a
    /// dispatch failure; drops the test silently if the queue is full
    /// (§4.4: "best-effort, non-blocking").
    pub fn try_requeue(&self, test: Test) -> bool {
        self.tx.try_send(test).is_ok()
    }

    /// Block until the next test is available. Returns `None` only once
    /// every producer handle has been dropped (coordinator shutdown).
    pub async fn next(&self) -> Option<Test> {
        self.rx.lock().await.recv().await
    }
}

impl Default for IntakeQueue {
    fn default() -> Self {
        Self::new()
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
    async fn submit_then_next_round_trips() {
        let queue = IntakeQueue::new();
        queue.submit(sample_test("t1")).await.unwrap();
        let test = queue.next().await.unwrap();
        assert_eq!(test.id, "t1");
    }

    #[tokio::test(start_paused = true)]
    async fn submit_fails_with_backpressure_when_full() {
        let queue = IntakeQueue::with_capacity(1);
        queue.submit(sample_test("t1")).await.unwrap();

        let err = queue.submit(sample_test("t2")).await.unwrap_err();
        assert!(matches!(err, DistributedError::Backpressure(_)));
    }

    #[tokio::test]
    async fn try_requeue_is_best_effort() {
        let queue = IntakeQueue::with_capacity(1);
        assert!(queue.try_requeue(sample_test("t1")));
        assert!(!queue.try_requeue(sample_test("t2")));
    }
}
