use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::ParseConsumptionModeError;
use crate::message::{Partition, RawMessage};
use crate::spout::BatchSpout;

/// How the broker client schedules deliveries, selected once at start.
/// Ordered: one delivery stream per partition; the producer task that pushed
/// a chunk is the one blocked on its outcome, so the next chunk for that
/// partition is not fetched until the prior verdict is known.
/// Concurrent: multiple partitions in flight at once, no cross-partition
/// ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumptionMode {
    Ordered,
    Concurrent,
}

/// Allow casting ConsumptionMode from strings.
impl FromStr for ConsumptionMode {
    type Err = ParseConsumptionModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ordered" => Ok(ConsumptionMode::Ordered),
            "concurrent" => Ok(ConsumptionMode::Concurrent),
            invalid => Err(ParseConsumptionModeError(invalid.to_owned())),
        }
    }
}

impl fmt::Display for ConsumptionMode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ConsumptionMode::Ordered => write!(f, "ordered"),
            ConsumptionMode::Concurrent => write!(f, "concurrent"),
        }
    }
}

/// Verdict handed back to the broker client for one pushed chunk. The broker
/// uses this for its own low-level redelivery, independent of this core's
/// retry accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryVerdict {
    /// The chunk was fully processed.
    Success,
    /// Ordered mode only: briefly suspend this one partition instead of
    /// spinning on the stalled batch.
    SuspendCurrentQueue,
    /// Concurrent mode only: redeliver later, other partitions unaffected.
    RetryLater,
}

/// The callback a [`PushSource`] invokes from its producer tasks, one call
/// per pushed chunk. Maps the chunk's outcome to the verdict dialect of the
/// configured mode.
#[derive(Clone)]
pub struct DeliveryListener {
    spout: Arc<BatchSpout>,
    mode: ConsumptionMode,
}

impl DeliveryListener {
    pub(crate) fn new(spout: Arc<BatchSpout>, mode: ConsumptionMode) -> Self {
        Self { spout, mode }
    }

    pub fn mode(&self) -> ConsumptionMode {
        self.mode
    }

    /// Process one pushed chunk, blocking the calling task until its batch
    /// reaches a terminal outcome.
    pub async fn on_delivery(
        &self,
        messages: Vec<RawMessage>,
        partition: Partition,
    ) -> DeliveryVerdict {
        if self.spout.deliver(messages, partition).await {
            DeliveryVerdict::Success
        } else {
            match self.mode {
                ConsumptionMode::Ordered => DeliveryVerdict::SuspendCurrentQueue,
                ConsumptionMode::Concurrent => DeliveryVerdict::RetryLater,
            }
        }
    }
}

/// The push-based broker client, owned and started by the spout. The
/// implementation is expected to call `listener.on_delivery` from its own
/// producer tasks and honor suspend/resume/shutdown without losing its
/// subscription state (except for shutdown, which is final).
#[async_trait]
pub trait PushSource: Send + Sync {
    async fn start(
        &mut self,
        listener: DeliveryListener,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;

    /// Stop pushing new chunks, keeping the subscription.
    async fn suspend(&mut self);

    /// Resume pushing after a suspend.
    async fn resume(&mut self);

    /// Tear down the subscription.
    async fn shutdown(&mut self);
}
