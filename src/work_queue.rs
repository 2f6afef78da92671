use tokio::sync::mpsc::{error::TryRecvError, UnboundedReceiver, UnboundedSender};
use tokio::sync::Mutex;
use tracing::error;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum WorkQueueError {
    #[error("work queue is closed")]
    Closed,
}

/// FIFO queue shared between request handlers and background loops.
pub struct WorkQueue<T> {
    tx: UnboundedSender<T>,
    rx: Mutex<UnboundedReceiver<T>>,
}

impl<T> WorkQueue<T> {
    #[tracing::instrument(name = "WorkQueue::new", skip_all)]
    pub fn new() -> Self {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();

        Self {
            tx,
            rx: Mutex::new(rx),
        }
    }

    #[tracing::instrument(name = "WorkQueue::append", skip_all)]
    pub fn append(&self, value: T) -> Result<(), WorkQueueError> {
        self.tx.send(value).map_err(|_| WorkQueueError::Closed)
    }

    /// Returns the oldest item without waiting, `None` when the queue is empty.
    #[tracing::instrument(name = "WorkQueue::next", skip_all)]
    pub async fn next(&self) -> Option<T> {
        let mut rx = self.rx.lock().await;
        match rx.try_recv() {
            Ok(value) => Some(value),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                error!("work queue sender dropped, this is a bug");
                None
            }
        }
    }

    pub async fn len(&self) -> usize {
        self.rx.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl<T> Default for WorkQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
