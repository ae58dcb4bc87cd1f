use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::warn;

use crate::batch::{BatchId, BatchOutcome, PendingBatch};
use crate::retry::{RetryDecision, RetryPolicy};

/// Registry of in-flight batches keyed by identity: the single source of
/// truth for what the pipeline still owes a verdict. A batch lives here from
/// assembly until its terminal transition; removal and the terminal
/// transition happen under one lock acquisition.
#[derive(Clone, Default)]
pub struct PendingTable {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    batches: HashMap<BatchId, PendingBatch>,
    closed: bool,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // Poisoning requires a panic inside one of the short critical
        // sections below, none of which call outside this module.
        self.inner.lock().expect("poisoned PendingTable mutex")
    }

    /// Register a freshly assembled batch. Ids are generated fresh per batch,
    /// so a key can never be present already. Returns false without inserting
    /// once the table is closed by shutdown.
    pub fn insert(&self, id: BatchId, batch: PendingBatch) -> bool {
        let mut inner = self.lock();
        if inner.closed {
            return false;
        }
        let previous = inner.batches.insert(id, batch);
        debug_assert!(previous.is_none(), "batch id collision");
        true
    }

    /// Run `f` against the entry for `id` under the table lock.
    /// Returns None if the id is unknown.
    pub fn with_entry<T>(&self, id: BatchId, f: impl FnOnce(&mut PendingBatch) -> T) -> Option<T> {
        self.lock().batches.get_mut(&id).map(f)
    }

    /// Remove the entry for `id`, resolving it with `outcome` in the same
    /// critical section.
    pub fn remove_resolving(&self, id: BatchId, outcome: BatchOutcome) -> bool {
        match self.lock().batches.remove(&id) {
            Some(mut batch) => {
                batch.resolve(outcome);
                true
            }
            None => false,
        }
    }

    /// Remove the entry for `id` without resolving it. Used when the waiter
    /// itself gives up (timeout or cancellation) and nobody is left to wake.
    pub fn remove(&self, id: BatchId) -> bool {
        self.lock().batches.remove(&id).is_some()
    }

    /// Handle a fail verdict for `id`: increment its failure count and apply
    /// the retry decision, all in one critical section. A terminal drop
    /// removes the entry and resolves its producer with failure. Returns the
    /// new count and the decision, or None for an unknown id.
    pub fn on_fail(&self, id: BatchId, policy: &RetryPolicy) -> Option<(i32, RetryDecision)> {
        let mut inner = self.lock();
        let decision = {
            let batch = inner.batches.get_mut(&id)?;
            batch.failure_count += 1;
            (batch.failure_count, policy.decide(batch.failure_count))
        };
        if decision.1 == RetryDecision::Drop {
            if let Some(mut batch) = inner.batches.remove(&id) {
                batch.resolve(BatchOutcome::Dropped);
            }
        }
        Some(decision)
    }

    pub fn len(&self) -> usize {
        self.lock().batches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Shutdown sweep: refuse further inserts, force every remaining entry to
    /// dropped and wake its producer, then clear the table.
    pub fn drain(&self) {
        let mut inner = self.lock();
        inner.closed = true;
        let remaining = inner.batches.len();
        if remaining > 0 {
            warn!("dropping {} still-pending batches on shutdown", remaining);
        }
        for (_, mut batch) in inner.batches.drain() {
            batch.resolve(BatchOutcome::Dropped);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Partition, RawMessage};

    fn pending_batch() -> (PendingBatch, tokio::sync::oneshot::Receiver<BatchOutcome>) {
        PendingBatch::new(
            vec![RawMessage::new("events", "payload")],
            Partition::new("events", "broker-a", 0),
        )
    }

    #[tokio::test]
    async fn test_insert_and_remove_resolving() {
        let table = PendingTable::new();
        let (batch, rx) = pending_batch();
        let id = BatchId::fresh();

        assert!(table.insert(id, batch));
        assert_eq!(table.len(), 1);

        assert!(table.remove_resolving(id, BatchOutcome::Succeeded));
        assert!(table.is_empty());
        assert_eq!(rx.await.unwrap(), BatchOutcome::Succeeded);

        // Unknown id after removal.
        assert!(!table.remove_resolving(id, BatchOutcome::Succeeded));
    }

    #[tokio::test]
    async fn test_drain_resolves_everything_and_closes() {
        let table = PendingTable::new();
        let mut receivers = Vec::new();
        for _ in 0..3 {
            let (batch, rx) = pending_batch();
            assert!(table.insert(BatchId::fresh(), batch));
            receivers.push(rx);
        }

        table.drain();
        assert!(table.is_empty());
        for rx in receivers {
            assert_eq!(rx.await.unwrap(), BatchOutcome::Dropped);
        }

        // No inserts after shutdown begins.
        let (batch, _rx) = pending_batch();
        assert!(!table.insert(BatchId::fresh(), batch));
    }

    #[tokio::test]
    async fn test_on_fail_requeues_then_drops() {
        let table = PendingTable::new();
        let (batch, rx) = pending_batch();
        let id = BatchId::fresh();
        table.insert(id, batch);
        let policy = RetryPolicy::new(2);

        assert_eq!(table.on_fail(id, &policy), Some((1, RetryDecision::Requeue)));
        assert_eq!(table.len(), 1);

        assert_eq!(table.on_fail(id, &policy), Some((2, RetryDecision::Drop)));
        assert!(table.is_empty());
        assert_eq!(rx.await.unwrap(), BatchOutcome::Dropped);

        assert_eq!(table.on_fail(id, &policy), None);
    }

    #[tokio::test]
    async fn test_with_entry_mutates_under_lock() {
        let table = PendingTable::new();
        let (batch, _rx) = pending_batch();
        let id = BatchId::fresh();
        table.insert(id, batch);

        let count = table.with_entry(id, |batch| {
            batch.failure_count += 1;
            batch.failure_count
        });
        assert_eq!(count, Some(1));
        assert_eq!(table.with_entry(BatchId::fresh(), |_| ()), None);
    }
}
