// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The Availability Set (§4.2): a deduplicated FIFO of worker IDs currently
//! eligible to take an assignment.

use parking_lot::Mutex;
use std::collections::HashSet;
use tokio::sync::{mpsc, Mutex as AsyncMutex};

use crate::distributed::types::WorkerId;

/// Default bounded capacity for the Availability Set's channel.
pub const DEFAULT_CAPACITY: usize = 200;

/// Outcome of an [`AvailabilitySet::add`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// The ID was not present; it is now queued.
    Added,
    /// The ID was already present; this call was a no-op.
    AlreadyPresent,
    /// The ID was not present and the flag was flipped, but the channel was
    /// full; the flag was reverted and the add is reported as deferred.
    Deferred,
}

/// A mapping from worker ID to a "present" flag, paired with an ordered
/// channel carrying IDs that transitioned false→true.
///
/// One mutex guards the present set (§5: "guarded by one mutex protecting
/// the present map; the channels themselves are safe for concurrent
/// producers/consumers").
pub struct AvailabilitySet {
    present: Mutex<HashSet<WorkerId>>,
    tx: mpsc::Sender<WorkerId>,
    rx: AsyncMutex<mpsc::Receiver<WorkerId>>,
}

impl AvailabilitySet {
    /// Build a set with the default bounded capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Build a set with an explicit bounded capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            present: Mutex::new(HashSet::new()),
            tx,
            rx: AsyncMutex::new(rx),
        }
    }

    /// Add `id`. A no-op if already present; otherwise flips the flag and
    /// tries to enqueue — if the channel is full, the flag is reverted and
    /// the add is reported as [`AddOutcome::Deferred`].
    pub fn add(&self, id: &str) -> AddOutcome {
        {
            let mut present = self.present.lock();
            if present.contains(id) {
                return AddOutcome::AlreadyPresent;
            }
            present.insert(id.to_string());
        }

        match self.tx.try_send(id.to_string()) {
            Ok(()) => AddOutcome::Added,
            Err(_) => {
                self.present.lock().remove(id);
                AddOutcome::Deferred
            }
        }
    }

    /// Block until the next available worker ID arrives. Returns `None` only
    /// if every producer handle has been dropped (coordinator shutdown).
    ///
    /// The caller must call [`AvailabilitySet::remove`] once it has decided
    /// to treat the worker as assigned, to clear the present flag.
    pub async fn take(&self) -> Option<WorkerId> {
        self.rx.lock().await.recv().await
    }

    /// Clear the present flag for `id`. Called by the Dispatcher after a
    /// successful [`AvailabilitySet::take`].
    pub fn remove(&self, id: &str) {
        self.present.lock().remove(id);
    }

    /// Whether `id` is currently flagged present.
    pub fn contains(&self, id: &str) -> bool {
        self.present.lock().contains(id)
    }

    /// Number of IDs currently flagged present.
    pub fn len(&self) -> usize {
        self.present.lock().len()
    }

    /// Whether the present set is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for AvailabilitySet {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn add_is_idempotent_while_present() {
        let set = AvailabilitySet::new();
        assert_eq!(set.add("w1"), AddOutcome::Added);
        assert_eq!(set.add("w1"), AddOutcome::AlreadyPresent);
        assert_eq!(set.len(), 1);
    }

    #[tokio::test]
    async fn take_then_remove_clears_present_flag() {
        let set = AvailabilitySet::new();
        set.add("w1");
        let taken = set.take().await.unwrap();
        assert_eq!(taken, "w1");
        assert!(set.contains("w1"));
        set.remove("w1");
        assert!(!set.contains("w1"));
    }

    #[tokio::test]
    async fn take_observes_fifo_order() {
        let set = AvailabilitySet::new();
        set.add("w1");
        set.add("w2");
        set.add("w3");

        assert_eq!(set.take().await.unwrap(), "w1");
        assert_eq!(set.take().await.unwrap(), "w2");
        assert_eq!(set.take().await.unwrap(), "w3");
    }

    #[tokio::test]
    async fn add_defers_when_channel_full() {
        let set = AvailabilitySet::with_capacity(1);
        assert_eq!(set.add("w1"), AddOutcome::Added);
        assert_eq!(set.add("w2"), AddOutcome::Deferred);
        assert!(!set.contains("w2"));
    }
}
