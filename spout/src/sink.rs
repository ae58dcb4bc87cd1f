use async_trait::async_trait;
use thiserror::Error;
use tracing::warn;

use crate::batch::Emission;
use crate::spout::BatchSpout;

/// The error a sink returns when it cannot take an emission. Treated as a
/// fail verdict for that batch by [`drive`]; sinks that hand the payload to
/// an asynchronous downstream report verdicts through ack/fail instead.
#[derive(Error, Debug)]
#[error("failed to emit batch: {0}")]
pub struct SinkError(pub String);

/// The downstream, pull-fed side of the bridge.
#[async_trait]
pub trait BatchSink {
    async fn emit(&self, emission: Emission) -> Result<(), SinkError>;
}

/// A sink that logs every emission and immediately acknowledges. Only useful
/// for wiring checks and tests.
pub struct PrintSink {}

#[async_trait]
impl BatchSink for PrintSink {
    async fn emit(&self, emission: Emission) -> Result<(), SinkError> {
        tracing::info!(
            token = %emission.token,
            messages = emission.messages.len(),
            "emitting batch"
        );
        Ok(())
    }
}

/// Drain the spout into a sink, one batch per step, until shutdown. Hosts
/// with their own pull cadence call [`BatchSpout::next_batch`] directly; this
/// loop is for hosts that just want the spout pumped. A sink error counts as
/// a fail verdict for that batch.
pub async fn drive<S: BatchSink>(spout: &BatchSpout, sink: &S) {
    while let Some(emission) = spout.next_batch().await {
        let token = emission.token;
        if let Err(error) = sink.emit(emission).await {
            warn!(batch = %token, "sink refused batch: {}", error);
            spout.fail(token);
        }
    }
}
