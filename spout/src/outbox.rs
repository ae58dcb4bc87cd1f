use tokio::sync::{mpsc, watch, Mutex};

use crate::batch::BatchId;

/// FIFO hand-off queue from batch assembly to emission. Capacity is
/// unbounded: in-flight work is bounded per partition by the producer's
/// blocking wait, not by this queue. A single logical consumer drains it;
/// the receiver sits behind an async mutex so concurrent drain attempts
/// serialize instead of racing.
pub struct Outbox {
    sender: mpsc::UnboundedSender<BatchId>,
    receiver: Mutex<mpsc::UnboundedReceiver<BatchId>>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl Default for Outbox {
    fn default() -> Self {
        Self::new()
    }
}

impl Outbox {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            sender,
            receiver: Mutex::new(receiver),
            shutdown_tx,
            shutdown_rx,
        }
    }

    /// Queue a batch id for emission. Never blocks. Ids queued after close
    /// are discarded.
    pub fn enqueue(&self, id: BatchId) {
        if *self.shutdown_rx.borrow() {
            return;
        }
        // The receiver lives as long as self, so send cannot fail here.
        _ = self.sender.send(id);
    }

    /// Wait for the next batch id. Returns None without yielding an item
    /// once the outbox is closed.
    pub async fn dequeue(&self) -> Option<BatchId> {
        let mut shutdown = self.shutdown_rx.clone();
        if *shutdown.borrow() {
            return None;
        }
        let mut receiver = self.receiver.lock().await;
        tokio::select! {
            id = receiver.recv() => id,
            _ = shutdown.changed() => None,
        }
    }

    /// Unblock the consumer and refuse further ids.
    pub fn close(&self) {
        _ = self.shutdown_tx.send(true);
    }

    pub fn is_closed(&self) -> bool {
        *self.shutdown_rx.borrow()
    }
}
