// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The Worker Registry (§4.1): authoritative in-memory state of each known
//! worker, backed by a concurrent map and an outbound-channel table.

use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::distributed::availability::AvailabilitySet;
use crate::distributed::transport::{WorkerTransport, WorkerTransportFactory};
use crate::distributed::types::{DistributedError, Worker, WorkerId, WorkerStatus};
use crate::store::traits::WorkerRepo;

/// Authoritative registry of known workers, plus the outbound channel table
/// used to reach each of them.
pub struct WorkerRegistry {
    workers: DashMap<WorkerId, Worker>,
    channels: DashMap<WorkerId, Arc<dyn WorkerTransport>>,
    availability: Arc<AvailabilitySet>,
    transport_factory: Arc<dyn WorkerTransportFactory>,
    store: Arc<dyn WorkerRepo>,
}

impl WorkerRegistry {
    /// Build a registry over a shared Availability Set, a transport factory
    /// used to dial newly-registered workers, and a durable store.
    pub fn new(
        availability: Arc<AvailabilitySet>,
        transport_factory: Arc<dyn WorkerTransportFactory>,
        store: Arc<dyn WorkerRepo>,
    ) -> Self {
        Self {
            workers: DashMap::new(),
            channels: DashMap::new(),
            availability,
            transport_factory,
            store,
        }
    }

    /// Register a new worker at `address`. Dials the worker first; if the
    /// dial fails, the register is rejected with `Transport` and nothing is
    /// stored (§4.1).
    pub async fn register(&self, id: WorkerId, address: String) -> Result<(), DistributedError> {
        let transport = self.transport_factory.connect(&address).await?;

        let worker = Worker::new(id.clone(), address);

        if let Err(err) = self.store.register(&worker).await {
            warn!(worker_id = %id, error = %err, "failed to persist worker registration");
        }

        self.workers.insert(id.clone(), worker);
        self.channels.insert(id.clone(), transport);
        self.availability.add(&id);

        info!(worker_id = %id, "worker registered");
        Ok(())
    }

    /// Apply a `StreamStatus` update: persist the new row, refresh
    /// last-seen, and re-enter the Availability Set if the worker just
    /// became READY.
    pub async fn update_status(
        &self,
        id: &str,
        status: WorkerStatus,
        current_test_id: Option<String>,
        progress_msg: String,
        completed_requests: u64,
        total_requests: u64,
    ) {
        let became_ready = {
            let mut entry = match self.workers.get_mut(id) {
                Some(entry) => entry,
                None => {
                    warn!(worker_id = %id, "status update for unknown worker ignored");
                    return;
                }
            };
            let became_ready = status == WorkerStatus::Ready && entry.status != WorkerStatus::Ready;
            entry.status = status;
            entry.current_test_id = current_test_id;
            entry.last_progress_message = progress_msg;
            entry.completed_requests = completed_requests;
            entry.total_requests = total_requests;
            entry.last_seen = Utc::now();
            became_ready
        };

        if let Some(worker) = self.workers.get(id) {
            if let Err(err) = self.store.update_status(&worker).await {
                warn!(worker_id = %id, error = %err, "failed to persist status update");
            }
        }

        if became_ready {
            self.availability.add(id);
        }
    }

    /// Mark `id` OFFLINE: set status, close the outbound channel, and leave
    /// the Availability Set untouched (the Reconciler ensures no stale ID
    /// remains there).
    pub async fn mark_offline(&self, id: &str) {
        if let Some(mut worker) = self.workers.get_mut(id) {
            worker.status = WorkerStatus::Offline;
            worker.last_seen = Utc::now();
        } else {
            return;
        }

        self.channels.remove(id);

        if let Some(worker) = self.workers.get(id) {
            if let Err(err) = self.store.mark_offline(&worker).await {
                warn!(worker_id = %id, error = %err, "failed to persist offline transition");
            }
        }

        debug!(worker_id = %id, "worker marked offline");
    }

    /// Look up a worker by ID.
    pub fn get(&self, id: &str) -> Option<Worker> {
        self.workers.get(id).map(|w| w.clone())
    }

    /// Every worker currently READY.
    pub fn get_all_ready(&self) -> Vec<Worker> {
        self.workers
            .iter()
            .filter(|w| w.status == WorkerStatus::Ready)
            .map(|w| w.clone())
            .collect()
    }

    /// Every known worker, regardless of status.
    pub fn get_all(&self) -> Vec<Worker> {
        self.workers.iter().map(|w| w.clone()).collect()
    }

    /// The outbound transport handle for `id`, if the worker is currently
    /// reachable.
    pub fn channel(&self, id: &str) -> Option<Arc<dyn WorkerTransport>> {
        self.channels.get(id).map(|c| c.clone())
    }

    /// Insert `worker` directly, bypassing `register`'s dial step. Used by
    /// tests that need to control `last_seen` precisely (e.g. simulating a
    /// stale worker without a real-time wait).
    #[cfg(any(test, feature = "test-support"))]
    pub fn insert_for_test(&self, worker: Worker) {
        self.availability.add(&worker.id);
        self.workers.insert(worker.id.clone(), worker);
    }

    /// Set `id`'s status and bookkeeping directly (used by the Dispatcher to
    /// mark a worker BUSY on assignment, and by the Completion Engine to
    /// reset a worker back to READY).
    pub fn set_in_memory_status(
        &self,
        id: &str,
        status: WorkerStatus,
        current_test_id: Option<String>,
        progress_msg: String,
    ) {
        if let Some(mut worker) = self.workers.get_mut(id) {
            worker.status = status;
            worker.current_test_id = current_test_id;
            worker.last_progress_message = progress_msg;
            worker.last_seen = Utc::now();
        }
    }
}
