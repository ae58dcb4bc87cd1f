use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use tokio::sync::oneshot;
use uuid::Uuid;

use crate::error::ParseBatchStateError;
use crate::message::{Partition, RawMessage};

/// Process-unique identity of a batch, handed to the downstream sink as the
/// correlation token and presented back on ack/fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BatchId(Uuid);

impl BatchId {
    pub fn fresh() -> Self {
        Self(Uuid::now_v7())
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Enumeration of possible states for a batch.
/// Pending: sitting in the outbox or in flight downstream, verdict unknown.
/// Succeeded: acknowledged by the downstream sink.
/// Dropped: failed terminally, either by exhausting retries or by shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    Pending,
    Succeeded,
    Dropped,
}

/// Allow casting BatchState from strings.
impl FromStr for BatchState {
    type Err = ParseBatchStateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(BatchState::Pending),
            "succeeded" => Ok(BatchState::Succeeded),
            "dropped" => Ok(BatchState::Dropped),
            invalid => Err(ParseBatchStateError(invalid.to_owned())),
        }
    }
}

/// The terminal verdict delivered through a batch's completion channel to the
/// producer blocked in `deliver`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    Succeeded,
    Dropped,
}

/// A batch tracked by the pending table, from assembly until its terminal
/// transition.
pub struct PendingBatch {
    pub messages: Arc<Vec<RawMessage>>,
    pub partition: Partition,
    pub state: BatchState,
    /// Incremented by exactly 1 on every fail verdict, never reset.
    pub failure_count: i32,
    /// Taken exactly once, on the terminal transition.
    pub completion: Option<oneshot::Sender<BatchOutcome>>,
}

impl PendingBatch {
    pub fn new(
        messages: Vec<RawMessage>,
        partition: Partition,
    ) -> (Self, oneshot::Receiver<BatchOutcome>) {
        let (tx, rx) = oneshot::channel();
        let batch = Self {
            messages: Arc::new(messages),
            partition,
            state: BatchState::Pending,
            failure_count: 0,
            completion: Some(tx),
        };
        (batch, rx)
    }

    /// Mark the batch terminal and wake its producer. The receiver may be
    /// gone already (timed-out or cancelled wait); that is not an error.
    pub fn resolve(&mut self, outcome: BatchOutcome) {
        self.state = match outcome {
            BatchOutcome::Succeeded => BatchState::Succeeded,
            BatchOutcome::Dropped => BatchState::Dropped,
        };
        if let Some(sender) = self.completion.take() {
            _ = sender.send(outcome);
        }
    }
}

/// One pull-side item: the payload of a single batch plus its correlation
/// token. The messages are shared with the pending table, not copied.
#[derive(Clone)]
pub struct Emission {
    pub messages: Arc<Vec<RawMessage>>,
    pub token: BatchId,
}
