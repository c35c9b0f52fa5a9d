use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn, Instrument, Span};

use crate::{BlobStore, StoreError};

/// Best-effort background deletion of transient chunk objects.
///
/// Deletions run detached from the request that scheduled them, with at most
/// `concurrency` in flight. Failures are logged and counted, never returned:
/// a leftover chunk object is an orphan, not an error.
#[derive(Clone)]
pub struct CleanupQueue {
    store: Arc<dyn BlobStore>,
    semaphore: Arc<Semaphore>,
    tracker: TaskTracker,
    failures: Arc<AtomicU64>,
}

impl CleanupQueue {
    pub fn new(store: Arc<dyn BlobStore>, concurrency: usize) -> Self {
        Self {
            store,
            semaphore: Arc::new(Semaphore::new(concurrency.max(1))),
            tracker: TaskTracker::new(),
            failures: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Queue deletion of `keys`. Must be called from within a tokio runtime.
    pub fn schedule(&self, keys: Vec<String>) {
        if keys.is_empty() {
            return;
        }
        debug!(count = keys.len(), "Scheduling transient object cleanup");

        // Deletions log under the span that scheduled them.
        let span = Span::current();
        for key in keys {
            let store = Arc::clone(&self.store);
            let semaphore = Arc::clone(&self.semaphore);
            let failures = Arc::clone(&self.failures);

            let task = async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return;
                };
                match store.delete(&key).await {
                    Ok(()) => debug!(%key, "Deleted transient object"),
                    Err(StoreError::NotFound { .. }) => {
                        debug!(%key, "Transient object already gone")
                    }
                    Err(error) => {
                        failures.fetch_add(1, Ordering::Relaxed);
                        warn!(%key, %error, "Failed to delete transient object");
                    }
                }
            };
            self.tracker.spawn(task.instrument(span.clone()));
        }
    }

    /// Number of deletions currently queued or running
    pub fn pending(&self) -> usize {
        self.tracker.len()
    }

    /// Deletions that failed since this queue was created
    pub fn failed_deletions(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Wait until every scheduled deletion has finished.
    pub async fn wait_idle(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }
}

impl std::fmt::Debug for CleanupQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CleanupQueue")
            .field("pending", &self.tracker.len())
            .field("available_permits", &self.semaphore.available_permits())
            .finish()
    }
}
