//! Push-to-pull delivery bridge for a push-based message broker.
//!
//! A broker client pushes chunks of raw messages from its own producer
//! tasks; a pull-based host scheduler wants to request one batch at a time
//! and report success or failure later by token. [`BatchSpout`] sits in the
//! middle: it wraps each pushed chunk into a tracked batch, blocks the
//! pushing task until that batch reaches a terminal outcome (the
//! backpressure), re-queues failed batches up to a configured bound, and
//! releases everything on shutdown.

pub mod batch;
pub mod config;
pub mod error;
pub mod message;
pub mod outbox;
pub mod pending;
pub mod retry;
pub mod sink;
pub mod source;
pub mod spout;

pub use batch::{BatchId, BatchOutcome, BatchState, Emission};
pub use config::Config;
pub use error::SpoutError;
pub use message::{Partition, RawMessage};
pub use retry::{RetryDecision, RetryPolicy};
pub use sink::{drive, BatchSink, PrintSink, SinkError};
pub use source::{ConsumptionMode, DeliveryListener, DeliveryVerdict, PushSource};
pub use spout::BatchSpout;
