//! Bounded, fire-and-forget tier-2 write queue.
//!
//! The latency budget (§4.8: "orchestrator must not block on ... tier-2
//! writes") and the "async fire-and-forget" design note (§9) mean tier-2
//! writes are never spawned as detached `tokio::spawn` orphans. Instead
//! they are posted to a bounded channel drained by a fixed pool of
//! background workers; a full channel drops the write and logs, rather
//! than applying backpressure to the caller.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use gateway_store::SharedStore;
use tokio::sync::mpsc;
use tracing::warn;

/// A single deferred tier-2 mutation.
enum WriteJob {
    Set { key: String, value: String, ttl_secs: u64 },
    Del { key: String },
}

/// Handle for enqueuing fire-and-forget tier-2 writes.
///
/// Cloning shares the same bounded channel and drop counter across every
/// call site; dropping every clone (and the worker tasks finishing their
/// drain) is how the queue shuts down.
#[derive(Clone)]
pub struct WriteQueue {
    tx: mpsc::Sender<WriteJob>,
    dropped: Arc<AtomicU64>,
}

impl WriteQueue {
    /// Spawn `worker_count` background tasks draining a channel of
    /// capacity `channel_capacity` against `store`.
    #[must_use]
    pub fn spawn(store: Arc<dyn SharedStore>, worker_count: usize, channel_capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(channel_capacity);
        let dropped = Arc::new(AtomicU64::new(0));
        let rx = Arc::new(tokio::sync::Mutex::new(rx));

        for worker_id in 0..worker_count {
            let rx = Arc::clone(&rx);
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                loop {
                    let job = { rx.lock().await.recv().await };
                    let Some(job) = job else { break };
                    match job {
                        WriteJob::Set { key, value, ttl_secs } => {
                            if let Err(e) = store.setex(&key, &value, ttl_secs).await {
                                warn!(worker_id, %key, error = %e, "tier-2 fire-and-forget write failed");
                            }
                        }
                        WriteJob::Del { key } => {
                            if let Err(e) = store.del(&key).await {
                                warn!(worker_id, %key, error = %e, "tier-2 fire-and-forget delete failed");
                            }
                        }
                    }
                }
            });
        }

        Self { tx, dropped }
    }

    /// Enqueue a tier-2 `setex`. Never blocks: if every worker is behind
    /// and the channel is full, the write is dropped and counted.
    pub fn enqueue_set(&self, key: String, value: String, ttl_secs: u64) {
        if self.tx.try_send(WriteJob::Set { key, value, ttl_secs }).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            warn!("tier-2 write queue full, dropping fire-and-forget set");
        }
    }

    /// Enqueue a tier-2 `del`. Same overflow semantics as [`Self::enqueue_set`].
    pub fn enqueue_del(&self, key: String) {
        if self.tx.try_send(WriteJob::Del { key }).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            warn!("tier-2 write queue full, dropping fire-and-forget del");
        }
    }

    /// Total writes dropped due to a full channel since construction.
    #[must_use]
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_store::InProcessStore;
    use std::time::Duration;

    #[tokio::test]
    async fn enqueued_set_eventually_lands_in_store() {
        let store: Arc<dyn SharedStore> = Arc::new(InProcessStore::new());
        let queue = WriteQueue::spawn(Arc::clone(&store), 2, 16);
        queue.enqueue_set("k".into(), "v".into(), 60);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(store.get("k").await.expect("get succeeds"), Some("v".to_owned()));
    }

    #[tokio::test]
    async fn enqueued_del_eventually_removes_from_store() {
        let store: Arc<dyn SharedStore> = Arc::new(InProcessStore::new());
        store.setex("k", "v", 60).await.expect("setex succeeds");
        let queue = WriteQueue::spawn(Arc::clone(&store), 1, 16);
        queue.enqueue_del("k".into());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(store.get("k").await.expect("get succeeds"), None);
    }

    #[tokio::test]
    async fn full_channel_drops_and_counts_instead_of_blocking() {
        let store: Arc<dyn SharedStore> = Arc::new(InProcessStore::new());
        // Zero workers: nothing ever drains, so the tiny channel fills immediately.
        let queue = WriteQueue::spawn(store, 0, 1);
        queue.enqueue_set("a".into(), "1".into(), 60);
        queue.enqueue_set("b".into(), "1".into(), 60);
        queue.enqueue_set("c".into(), "1".into(), 60);
        assert!(queue.dropped_count() >= 1);
    }
}
