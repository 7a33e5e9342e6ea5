//! Decoupling queue between the session router and the work dispatcher.

use tokio::sync::mpsc;

use crate::core::errors::ApiError;

/// One queued unit of work: a single inbound question to process.
/// `thread_id` absent means a new thread must be created.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkItem {
    pub connection_id: String,
    pub thread_id: Option<String>,
    pub question: String,
    pub user_id: String,
}

#[derive(Clone)]
pub struct WorkQueue {
    tx: mpsc::Sender<WorkItem>,
}

pub fn work_queue(depth: usize) -> (WorkQueue, mpsc::Receiver<WorkItem>) {
    let (tx, rx) = mpsc::channel(depth.max(1));
    (WorkQueue { tx }, rx)
}

impl WorkQueue {
    pub async fn enqueue(&self, item: WorkItem) -> Result<(), ApiError> {
        self.tx
            .send(item)
            .await
            .map_err(|_| ApiError::Internal("work queue closed".to_string()))
    }
}
