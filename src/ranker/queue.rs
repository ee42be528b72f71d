use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::recommendations::{RecommendationBatch, RecommendationStore};

/// Handle onto the background batch writer. Cloning shares the same worker.
#[derive(Debug, Clone)]
pub struct PersistenceQueue {
    sender: mpsc::Sender<RecommendationBatch>,
}

impl PersistenceQueue {
    /// Starts the writer task. It stops once every queue handle is dropped and
    /// the backlog is drained.
    pub fn spawn(
        store: Arc<dyn RecommendationStore>,
        capacity: usize,
        write_timeout: Duration,
    ) -> (Self, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let worker = tokio::spawn(run_worker(receiver, store, write_timeout));
        (Self { sender }, worker)
    }

    /// Hands `batch` to the writer without waiting. Returns `false` when the
    /// batch was dropped because the queue is full or closed.
    pub fn enqueue(&self, batch: RecommendationBatch) -> bool {
        match self.sender.try_send(batch) {
            Ok(()) => true,
            Err(TrySendError::Full(batch)) => {
                warn!(
                    incident_id = %batch.incident_id,
                    "persistence queue full, dropping recommendation batch"
                );
                false
            }
            Err(TrySendError::Closed(batch)) => {
                warn!(
                    incident_id = %batch.incident_id,
                    "persistence worker stopped, dropping recommendation batch"
                );
                false
            }
        }
    }
}

async fn run_worker(
    mut receiver: mpsc::Receiver<RecommendationBatch>,
    store: Arc<dyn RecommendationStore>,
    write_timeout: Duration,
) {
    while let Some(batch) = receiver.recv().await {
        persist_batch(store.as_ref(), &batch, write_timeout).await;
    }
}

async fn persist_batch(
    store: &dyn RecommendationStore,
    batch: &RecommendationBatch,
    write_timeout: Duration,
) {
    match tokio::time::timeout(write_timeout, store.insert_batch(batch)).await {
        Ok(Ok(id)) => {
            info!(
                incident_id = %batch.incident_id,
                batch_id = %id,
                candidates = batch.recommendations.len(),
                "stored recommendation batch"
            );
        }
        Ok(Err(err)) => {
            warn!(
                incident_id = %batch.incident_id,
                "failed storing recommendation batch: {err:#}"
            );
        }
        Err(_) => {
            warn!(
                incident_id = %batch.incident_id,
                timeout_ms = write_timeout.as_millis() as u64,
                "timed out storing recommendation batch"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use anyhow::{anyhow, Result};
    use async_trait::async_trait;

    use super::PersistenceQueue;
    use crate::recommendations::memory::InMemoryRecommendationStore;
    use crate::recommendations::{RecommendationBatch, RecommendationStore};

    struct FlakyStore {
        calls: AtomicUsize,
        inner: InMemoryRecommendationStore,
    }

    #[async_trait]
    impl RecommendationStore for FlakyStore {
        async fn insert_batch(&self, batch: &RecommendationBatch) -> Result<String> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(anyhow!("store offline"));
            }
            self.inner.insert_batch(batch).await
        }
    }

    struct StuckStore;

    #[async_trait]
    impl RecommendationStore for StuckStore {
        async fn insert_batch(&self, _batch: &RecommendationBatch) -> Result<String> {
            std::future::pending::<()>().await;
            Ok(String::new())
        }
    }

    #[tokio::test]
    async fn failed_write_does_not_stop_the_worker() {
        let store = Arc::new(FlakyStore {
            calls: AtomicUsize::new(0),
            inner: InMemoryRecommendationStore::new(),
        });
        let (queue, worker) = PersistenceQueue::spawn(store.clone(), 8, Duration::from_secs(1));
        assert!(queue.enqueue(RecommendationBatch::pending("first", Vec::new())));
        assert!(queue.enqueue(RecommendationBatch::pending("second", Vec::new())));
        drop(queue);
        worker.await.expect("worker panicked");

        assert_eq!(store.calls.load(Ordering::SeqCst), 2);
        let stored = store.inner.batches().await;
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].batch.incident_id, "second");
    }

    #[tokio::test]
    async fn full_queue_drops_instead_of_blocking() {
        let (queue, _worker) =
            PersistenceQueue::spawn(Arc::new(StuckStore), 1, Duration::from_secs(60));
        let accepted = (0..3)
            .map(|i| queue.enqueue(RecommendationBatch::pending(format!("inc-{i}"), Vec::new())))
            .collect::<Vec<_>>();
        assert!(accepted[0]);
        assert!(accepted.iter().any(|ok| !ok));
    }

    #[tokio::test]
    async fn slow_store_is_cut_off_by_timeout() {
        let (queue, worker) =
            PersistenceQueue::spawn(Arc::new(StuckStore), 4, Duration::from_millis(20));
        assert!(queue.enqueue(RecommendationBatch::pending("inc", Vec::new())));
        drop(queue);
        tokio::time::timeout(Duration::from_secs(5), worker)
            .await
            .expect("worker should finish after the write timeout")
            .expect("worker panicked");
    }
}
