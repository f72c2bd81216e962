// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The Coordinator's outbound view of a worker: one long-lived connection
//! per worker, opened at Register and closed at MarkOffline (§5 "Outbound
//! channels").

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::distributed::types::{DistributedError, Test};

/// A single assignment request, the outbound-facing counterpart of
/// `AssignTest` in §6.
#[derive(Debug, Clone)]
pub struct AssignTestRequest {
    /// Test identity.
    pub test_id: String,
    /// Opaque JSON attack-options payload.
    pub attack_options_json: String,
    /// Human-readable duration, e.g. "30s".
    pub duration: String,
    /// This worker's share of the total rate.
    pub rate_per_second: u32,
    /// Opaque base64 targets payload.
    pub targets_base64: String,
}

impl AssignTestRequest {
    /// Build the per-worker assignment request for `test` carrying `rate`.
    pub fn from_test(test: &Test, rate: u32) -> Self {
        Self {
            test_id: test.id.clone(),
            attack_options_json: test.attack_options_json.clone(),
            duration: test.duration.clone(),
            rate_per_second: rate,
            targets_base64: test.targets_base64.clone(),
        }
    }
}

/// The worker's reply to `AssignTest`.
#[derive(Debug, Clone)]
pub struct AssignTestResponse {
    /// Whether the worker accepted the assignment.
    pub accepted: bool,
    /// Human-readable rejection reason, if any.
    pub message: String,
}

/// Deadline applied to the outbound `AssignTest` RPC (§5).
pub const ASSIGN_TEST_DEADLINE: Duration = Duration::from_secs(15);

/// The Coordinator's outbound channel to a single worker.
///
/// Implementations wrap one connection; `assign_test` is the only operation
/// the engine needs against it.
#[async_trait]
pub trait WorkerTransport: Send + Sync {
    /// Issue `AssignTest` against this worker with the shared deadline.
    async fn assign_test(
        &self,
        request: AssignTestRequest,
    ) -> Result<AssignTestResponse, DistributedError>;
}

/// Dials a worker's advertised address and returns a usable transport, or a
/// `Transport` error if the dial fails or blocks past a short deadline
/// (§4.1: "if the dial blocks or fails, the register is rejected").
#[async_trait]
pub trait WorkerTransportFactory: Send + Sync {
    /// Dial `address` and return a connected transport handle.
    async fn connect(&self, address: &str) -> Result<Arc<dyn WorkerTransport>, DistributedError>;
}

#[cfg(any(test, feature = "test-support"))]
pub mod fake {
    //! An in-memory `WorkerTransport` used by the engine's own test suite.

    use super::*;
    use parking_lot::Mutex;

    /// A transport double whose behaviour is controlled by the test.
    pub struct FakeTransport {
        /// Response to return, or an error to simulate.
        pub outcome: Mutex<Option<Result<AssignTestResponse, DistributedError>>>,
    }

    impl FakeTransport {
        /// A transport that always accepts.
        pub fn accepting() -> Arc<Self> {
            Arc::new(Self {
                outcome: Mutex::new(Some(Ok(AssignTestResponse {
                    accepted: true,
                    message: String::new(),
                }))),
            })
        }

        /// A transport that always rejects.
        pub fn rejecting(message: &str) -> Arc<Self> {
            Arc::new(Self {
                outcome: Mutex::new(Some(Ok(AssignTestResponse {
                    accepted: false,
                    message: message.to_string(),
                }))),
            })
        }

        /// A transport that always fails at the transport layer.
        pub fn failing(message: &str) -> Arc<Self> {
            Arc::new(Self {
                outcome: Mutex::new(Some(Err(DistributedError::Transport(
                    message.to_string(),
                )))),
            })
        }
    }

    #[async_trait]
    impl WorkerTransport for FakeTransport {
        async fn assign_test(
            &self,
            _request: AssignTestRequest,
        ) -> Result<AssignTestResponse, DistributedError> {
            match self.outcome.lock().clone() {
                Some(outcome) => outcome,
                None => Ok(AssignTestResponse {
                    accepted: true,
                    message: String::new(),
                }),
            }
        }
    }
}
