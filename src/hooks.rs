//! Extension hooks for integrating the processor into host applications.
//!
//! The engine stays storage-agnostic. Callers can inject:
//! - Per-item side effects after every AI merge or assignment change
//!   (persistence, live UI updates)
//! - Window-level progress reporting

use crate::model::WorkItem;

#[derive(Debug, thiserror::Error)]
pub enum ObserverError {
    #[error("{0}")]
    Message(String),
}

/// Notified with the updated item after every AI merge and every assignment
/// change.
///
/// Failures are logged and never abort a run or undo the change.
#[async_trait::async_trait]
pub trait ItemObserver: Send + Sync {
    async fn on_item_updated(&self, item: &WorkItem) -> Result<(), ObserverError>;
}

/// Notified after each window with `(processed_so_far, total)`.
pub trait ProgressObserver: Send + Sync {
    fn on_progress(&self, processed: usize, total: usize);
}

impl<F> ProgressObserver for F
where
    F: Fn(usize, usize) + Send + Sync,
{
    fn on_progress(&self, processed: usize, total: usize) {
        self(processed, total)
    }
}
