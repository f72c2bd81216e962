// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! # Distributed load-test control plane
//!
//! A Coordinator dispatches HTTP load tests across a dynamic set of Worker
//! agents. Workers register over gRPC, the Coordinator gathers them from an
//! [`availability::AvailabilitySet`] as tests arrive on the
//! [`queue::IntakeQueue`], plans per-worker rates (§4.3 in design docs, see
//! [`rateplan`]), and fans assignments out in parallel
//! ([`dispatcher::Dispatcher`]). Workers report progress and final results
//! back; the [`completion::CompletionEngine`] and [`aggregator`] turn those
//! into terminal test status and cross-worker aggregates, and the
//! [`reconciler::Reconciler`] sweeps stale workers, stuck tests, and orphan
//! aggregations.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                          Coordinator                              │
//! │                                                                    │
//! │   SubmitTest          Intake Queue        Availability Set         │
//! │       │            (bounded FIFO)      (dedup FIFO of worker IDs) │
//! │       ▼                   │                      │                │
//! │  Worker Registry  ───►  Dispatcher  ◄─────────────┘                │
//! │  (status, outbound       │   │                                    │
//! │   channel table)         │   └──► Assignment RPC Fan-out          │
//! │       ▲                  ▼                                        │
//! │       │            Reconciler (idle tick + orphan-aggregation)    │
//! │       │                                                            │
//! │  SubmitResult ──► Completion Engine ──► Aggregator ──► stores      │
//! └──────────────────────────────────────────────────────────────────┘
//! ```

pub mod aggregator;
pub mod availability;
pub mod completion;
pub mod coordinator;
pub mod dispatcher;
pub mod queue;
pub mod rateplan;
pub mod reconciler;
pub mod registry;
pub mod rpc;
pub mod transport;
pub mod types;

pub use aggregator::aggregate;
pub use availability::{AddOutcome, AvailabilitySet};
pub use completion::{evaluate_completion, CompletionEngine};
pub use coordinator::{Coordinator, DashboardSnapshot, TestSpec};
pub use dispatcher::Dispatcher;
pub use queue::IntakeQueue;
pub use rateplan::plan_rates;
pub use reconciler::Reconciler;
pub use registry::WorkerRegistry;
pub use transport::{WorkerTransport, WorkerTransportFactory};
pub use types::{
    AggregatedResult, AggregatedStatus, DistributedError, DistributedResult, RateDistributionMode,
    Test, TestId, TestResult, TestStatus, Worker, WorkerId, WorkerStatus,
};
