use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::batch::{BatchId, BatchOutcome, Emission, PendingBatch};
use crate::config::Config;
use crate::error::SpoutError;
use crate::message::{Partition, RawMessage};
use crate::outbox::Outbox;
use crate::pending::PendingTable;
use crate::retry::{RetryDecision, RetryPolicy};
use crate::source::{ConsumptionMode, DeliveryListener, PushSource};

/// The push-to-pull delivery adapter.
///
/// Producers owned by the broker client push chunks in through [`deliver`],
/// which blocks them until the chunk's batch reaches a terminal outcome: that
/// blocking wait is the backpressure. The host scheduler pulls batches out
/// one at a time through [`next_batch`] and later reports [`ack`] or [`fail`]
/// by correlation token. Failed batches are re-queued until the retry bound
/// is reached, then dropped and their producer released with failure.
///
/// [`deliver`]: BatchSpout::deliver
/// [`next_batch`]: BatchSpout::next_batch
/// [`ack`]: BatchSpout::ack
/// [`fail`]: BatchSpout::fail
pub struct BatchSpout {
    pending: PendingTable,
    outbox: Outbox,
    retry_policy: RetryPolicy,
    mode: ConsumptionMode,
    completion_timeout: Option<Duration>,
    source: Mutex<Option<Box<dyn PushSource>>>,
}

/// Field layout of the emitted payload, for hosts that want a static
/// declaration of what [`Emission`] carries.
pub const OUTPUT_FIELDS: &[&str] = &["messages"];

impl BatchSpout {
    pub fn new(config: &Config) -> Self {
        Self {
            pending: PendingTable::new(),
            outbox: Outbox::new(),
            retry_policy: RetryPolicy::new(config.max_failures),
            mode: config.consumption_mode,
            completion_timeout: config.completion_timeout.map(|timeout| timeout.0),
            source: Mutex::new(None),
        }
    }

    pub fn mode(&self) -> ConsumptionMode {
        self.mode
    }

    /// Number of batches currently awaiting a terminal outcome.
    pub fn pending_batches(&self) -> usize {
        self.pending.len()
    }

    /// Static description of the emitted payload's field layout.
    pub fn output_shape(&self) -> &'static [&'static str] {
        OUTPUT_FIELDS
    }

    /// Start consuming from the given push source. The source calls back
    /// into this spout through the listener on its own producer tasks.
    /// A source that cannot start is fatal.
    pub async fn open(self: Arc<Self>, mut source: Box<dyn PushSource>) -> Result<(), SpoutError> {
        let listener = DeliveryListener::new(Arc::clone(&self), self.mode);
        source
            .start(listener)
            .await
            .map_err(|error| SpoutError::Init(error.to_string()))?;

        *self.source.lock().await = Some(source);
        info!(mode = %self.mode, "push source started");
        Ok(())
    }

    /// Entry point for the push side: wrap one chunk into a batch, queue it
    /// for emission, and block until the pipeline is done with it.
    ///
    /// Returns true if the batch succeeded, false if it was dropped, timed
    /// out, or the spout is shutting down. An empty chunk is a no-op that
    /// succeeds immediately.
    pub async fn deliver(&self, messages: Vec<RawMessage>, partition: Partition) -> bool {
        if messages.is_empty() {
            return true;
        }

        let labels = [("topic", partition.topic.clone())];
        let id = BatchId::fresh();
        let (batch, completion) = PendingBatch::new(messages, partition);

        if !self.pending.insert(id, batch) {
            debug!(batch = %id, "refusing delivery, spout is shut down");
            return false;
        }
        self.outbox.enqueue(id);
        metrics::counter!("spout_batches_assembled", &labels).increment(1);
        metrics::gauge!("spout_pending_batches").set(self.pending.len() as f64);

        let outcome = match self.completion_timeout {
            Some(timeout) => match tokio::time::timeout(timeout, completion).await {
                Ok(received) => received,
                Err(_) => {
                    // Nobody is waiting on this batch anymore: take it out of
                    // the table and report the unit failed, same as a
                    // processing failure.
                    self.pending.remove(id);
                    warn!(batch = %id, "timed out waiting for completion");
                    metrics::counter!("spout_batches_timed_out", &labels).increment(1);
                    return false;
                }
            },
            None => completion.await,
        };

        match outcome {
            Ok(BatchOutcome::Succeeded) => true,
            Ok(BatchOutcome::Dropped) => false,
            // The sender was dropped without resolving: shutdown raced our
            // insert. The table has already been swept.
            Err(_) => false,
        }
    }

    /// Pull one batch for emission. Returns None once the spout is shut
    /// down. Ids whose batch was resolved between enqueue and dequeue are
    /// skipped. A batch is never handed out a second time while an earlier
    /// emission of it is awaiting its verdict: ids enter the outbox only at
    /// assembly and on a fail verdict.
    pub async fn next_batch(&self) -> Option<Emission> {
        loop {
            let id = self.outbox.dequeue().await?;
            let emission = self.pending.with_entry(id, |batch| Emission {
                messages: batch.messages.clone(),
                token: id,
            });
            match emission {
                Some(emission) => {
                    metrics::counter!("spout_batches_emitted").increment(1);
                    return Some(emission);
                }
                None => debug!(batch = %id, "skipping already-resolved batch"),
            }
        }
    }

    /// Success verdict from the downstream sink. Unknown tokens are logged
    /// and ignored: the batch may already have been resolved by shutdown or
    /// a prior verdict.
    pub fn ack(&self, token: BatchId) {
        if self.pending.remove_resolving(token, BatchOutcome::Succeeded) {
            metrics::counter!("spout_batches_acked").increment(1);
        } else {
            warn!(batch = %token, "ack for unknown batch");
        }
        metrics::gauge!("spout_pending_batches").set(self.pending.len() as f64);
    }

    /// Failure verdict from the downstream sink: retry up to the configured
    /// bound, then drop. Unknown tokens are logged and ignored.
    pub fn fail(&self, token: BatchId) {
        match self.pending.on_fail(token, &self.retry_policy) {
            Some((failure_count, RetryDecision::Requeue)) => {
                info!(batch = %token, failure_count, "re-queueing failed batch");
                metrics::counter!("spout_batches_retried").increment(1);
                self.outbox.enqueue(token);
            }
            Some((failure_count, RetryDecision::Drop)) => {
                info!(batch = %token, failure_count, "dropping batch, retries exhausted");
                metrics::counter!("spout_batches_dropped").increment(1);
            }
            None => warn!(batch = %token, "fail for unknown batch"),
        }
        metrics::gauge!("spout_pending_batches").set(self.pending.len() as f64);
    }

    /// Stop accepting new pushes, keeping all in-flight state.
    pub async fn pause(&self) {
        if let Some(source) = self.source.lock().await.as_mut() {
            source.suspend().await;
        }
    }

    /// Resume accepting pushes after a pause.
    pub async fn resume(&self) {
        if let Some(source) = self.source.lock().await.as_mut() {
            source.resume().await;
        }
    }

    /// Fail-closed shutdown: stop the pull side, force every pending batch
    /// to dropped so all blocked producers wake, and tear down the source
    /// subscription.
    pub async fn shutdown(&self) {
        info!("shutting down spout");
        self.outbox.close();
        self.pending.drain();
        if let Some(mut source) = self.source.lock().await.take() {
            source.shutdown().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_config;

    fn chunk(n: usize) -> Vec<RawMessage> {
        (0..n)
            .map(|i| RawMessage::new("events", format!("payload-{}", i)))
            .collect()
    }

    fn partition() -> Partition {
        Partition::new("events", "broker-a", 0)
    }

    #[tokio::test]
    async fn test_empty_chunk_is_a_successful_noop() {
        let spout = BatchSpout::new(&test_config(5, None));

        assert!(spout.deliver(Vec::new(), partition()).await);
        assert_eq!(spout.pending_batches(), 0);
    }

    #[tokio::test]
    async fn test_deliver_then_ack_releases_the_producer_with_success() {
        let spout = Arc::new(BatchSpout::new(&test_config(5, None)));

        let producer = {
            let spout = spout.clone();
            tokio::spawn(async move { spout.deliver(chunk(3), partition()).await })
        };

        let emission = spout.next_batch().await.unwrap();
        assert_eq!(emission.messages.len(), 3);
        assert_eq!(spout.pending_batches(), 1);

        spout.ack(emission.token);
        assert!(producer.await.unwrap());
        assert_eq!(spout.pending_batches(), 0);
    }

    #[tokio::test]
    async fn test_retry_bound_of_two_drops_on_the_second_fail() {
        let spout = Arc::new(BatchSpout::new(&test_config(2, None)));

        let producer = {
            let spout = spout.clone();
            tokio::spawn(async move { spout.deliver(chunk(1), partition()).await })
        };

        let first = spout.next_batch().await.unwrap();
        spout.fail(first.token);

        // First fail re-queues: the same id comes out again.
        let second = spout.next_batch().await.unwrap();
        assert_eq!(second.token, first.token);
        spout.fail(second.token);

        // Second fail reaches the bound: dropped, producer released.
        assert!(!producer.await.unwrap());
        assert_eq!(spout.pending_batches(), 0);
    }

    #[tokio::test]
    async fn test_zero_retry_bound_drops_on_the_first_fail() {
        let spout = Arc::new(BatchSpout::new(&test_config(0, None)));

        let producer = {
            let spout = spout.clone();
            tokio::spawn(async move { spout.deliver(chunk(1), partition()).await })
        };

        let emission = spout.next_batch().await.unwrap();
        spout.fail(emission.token);

        assert!(!producer.await.unwrap());
        assert_eq!(spout.pending_batches(), 0);
    }

    #[tokio::test]
    async fn test_negative_retry_bound_keeps_requeueing() {
        let spout = Arc::new(BatchSpout::new(&test_config(-1, None)));

        let _producer = {
            let spout = spout.clone();
            tokio::spawn(async move { spout.deliver(chunk(1), partition()).await })
        };

        let mut token = None;
        for _ in 0..25 {
            let emission = spout.next_batch().await.unwrap();
            if let Some(token) = token {
                assert_eq!(emission.token, token);
            }
            token = Some(emission.token);
            spout.fail(emission.token);
        }
        // Still pending and still re-queued.
        assert_eq!(spout.pending_batches(), 1);

        let failure_count = spout
            .pending
            .with_entry(token.unwrap(), |batch| batch.failure_count)
            .unwrap();
        assert_eq!(failure_count, 25);
    }

    #[tokio::test]
    async fn test_failure_count_is_monotonic() {
        let spout = Arc::new(BatchSpout::new(&test_config(-1, None)));

        let _producer = {
            let spout = spout.clone();
            tokio::spawn(async move { spout.deliver(chunk(1), partition()).await })
        };

        let mut previous = 0;
        for _ in 0..5 {
            let emission = spout.next_batch().await.unwrap();
            spout.fail(emission.token);
            let count = spout
                .pending
                .with_entry(emission.token, |batch| batch.failure_count)
                .unwrap();
            assert!(count > previous);
            previous = count;
        }
    }

    #[tokio::test]
    async fn test_single_flight_no_second_emission_while_unresolved() {
        let spout = Arc::new(BatchSpout::new(&test_config(5, None)));

        let _producer = {
            let spout = spout.clone();
            tokio::spawn(async move { spout.deliver(chunk(1), partition()).await })
        };

        let emission = spout.next_batch().await.unwrap();

        // The only copy of the id was dequeued; with its verdict still
        // outstanding nothing else may come out.
        let second = tokio::time::timeout(Duration::from_millis(50), spout.next_batch()).await;
        assert!(second.is_err(), "batch emitted twice while unresolved");

        spout.ack(emission.token);
    }

    #[tokio::test]
    async fn test_shutdown_releases_all_waiters_with_failure() {
        let spout = Arc::new(BatchSpout::new(&test_config(5, None)));

        let producers: Vec<_> = (0..4)
            .map(|queue_id| {
                let spout = spout.clone();
                tokio::spawn(async move {
                    spout
                        .deliver(chunk(1), Partition::new("events", "broker-a", queue_id))
                        .await
                })
            })
            .collect();

        // Wait for all four to be registered before sweeping.
        while spout.pending_batches() < 4 {
            tokio::task::yield_now().await;
        }

        spout.shutdown().await;

        for released in futures::future::join_all(producers).await {
            assert!(!released.unwrap());
        }
        assert_eq!(spout.pending_batches(), 0);
        assert!(spout.next_batch().await.is_none());
    }

    #[tokio::test]
    async fn test_delivery_after_shutdown_is_refused() {
        let spout = BatchSpout::new(&test_config(5, None));
        spout.shutdown().await;

        assert!(!spout.deliver(chunk(1), partition()).await);
        assert_eq!(spout.pending_batches(), 0);
    }

    #[tokio::test]
    async fn test_unknown_tokens_are_ignored() {
        let spout = BatchSpout::new(&test_config(5, None));

        // Neither may panic or create state.
        spout.ack(BatchId::fresh());
        spout.fail(BatchId::fresh());
        assert_eq!(spout.pending_batches(), 0);
    }

    #[tokio::test]
    async fn test_completion_timeout_is_a_failure_for_that_unit() {
        let spout = Arc::new(BatchSpout::new(&test_config(
            5,
            Some(Duration::from_millis(20)),
        )));

        // No consumer ever picks the batch up, so the wait must time out.
        assert!(!spout.deliver(chunk(1), partition()).await);
        assert_eq!(spout.pending_batches(), 0);
    }

    #[tokio::test]
    async fn test_next_batch_skips_ids_resolved_in_the_outbox() {
        let spout = Arc::new(BatchSpout::new(&test_config(5, None)));

        let _first = {
            let spout = spout.clone();
            tokio::spawn(async move { spout.deliver(chunk(1), partition()).await })
        };
        while spout.pending_batches() < 1 {
            tokio::task::yield_now().await;
        }

        // Resolve the queued batch behind the outbox's back, then push
        // another one: the stale id must be skipped.
        let stale = spout.next_batch().await.unwrap().token;
        spout.fail(stale);
        spout.ack(stale);

        let _second = {
            let spout = spout.clone();
            tokio::spawn(async move { spout.deliver(chunk(2), partition()).await })
        };

        let emission = spout.next_batch().await.unwrap();
        assert_eq!(emission.messages.len(), 2);
        spout.ack(emission.token);
    }
}
