//! Background snapshot writer.
//!
//! Mutations hand their snapshot to [`Persister::submit`] and return immediately. A
//! single writer task drains the queue, keeps only the newest snapshot per key, writes
//! it, and reports the outcome on a watch channel.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, watch};

use crate::store::{KeyValueStore, Snapshot};

/// Outcome of the most recent write.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PersistStatus {
    /// Highest submitted generation that has been written (or failed).
    pub generation: u64,
    /// Error of that write, if it failed.
    pub error: Option<String>,
}

struct Job {
    generation: u64,
    key: String,
    snapshot: Snapshot,
}

/// Handle to the writer task. Dropping every handle ends the task after it drains.
#[derive(Debug)]
pub struct Persister {
    tx: mpsc::UnboundedSender<Job>,
    status: watch::Receiver<PersistStatus>,
    submitted: AtomicU64,
}

impl Persister {
    pub fn spawn(store: Arc<dyn KeyValueStore>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (status_tx, status) = watch::channel(PersistStatus::default());
        tokio::spawn(writer(store, rx, status_tx));
        Self {
            tx,
            status,
            submitted: AtomicU64::new(0),
        }
    }

    /// Queue `snapshot` for writing under `key`. Returns its generation.
    pub fn submit(&self, key: String, snapshot: Snapshot) -> u64 {
        let generation = self.submitted.fetch_add(1, Ordering::SeqCst) + 1;
        if self
            .tx
            .send(Job {
                generation,
                key,
                snapshot,
            })
            .is_err()
        {
            tracing::error!(generation, "Snapshot writer is gone; snapshot dropped");
        }
        generation
    }

    pub fn subscribe(&self) -> watch::Receiver<PersistStatus> {
        self.status.clone()
    }

    /// Wait until every snapshot submitted so far has been handled.
    pub async fn flush(&self) -> PersistStatus {
        let wanted = self.submitted.load(Ordering::SeqCst);
        let mut status = self.status.clone();
        if status.wait_for(|s| s.generation >= wanted).await.is_err() {
            tracing::warn!(generation = wanted, "Snapshot writer stopped before flushing");
        }
        let current = status.borrow().clone();
        current
    }
}

async fn writer(
    store: Arc<dyn KeyValueStore>,
    mut rx: mpsc::UnboundedReceiver<Job>,
    status: watch::Sender<PersistStatus>,
) {
    while let Some(first) = rx.recv().await {
        let mut newest = BTreeMap::new();
        let mut generation = first.generation;
        newest.insert(first.key.clone(), first);
        while let Ok(job) = rx.try_recv() {
            generation = generation.max(job.generation);
            match newest.get(&job.key) {
                Some(kept) if kept.generation > job.generation => {}
                _ => {
                    newest.insert(job.key.clone(), job);
                }
            }
        }

        let mut error = None;
        for (key, job) in newest {
            if let Err(e) = write(store.as_ref(), &key, &job.snapshot).await {
                tracing::error!(key = %key, generation = job.generation, error = %e, "Snapshot write failed");
                metrics::counter!("gateway_snapshot_writes_total", "outcome" => "error").increment(1);
                error = Some(e.to_string());
            } else {
                tracing::debug!(key = %key, generation = job.generation, "Snapshot written");
                metrics::counter!("gateway_snapshot_writes_total", "outcome" => "ok").increment(1);
            }
        }

        status.send_replace(PersistStatus { generation, error });
    }
    tracing::debug!("Snapshot writer stopped");
}

async fn write(
    store: &dyn KeyValueStore,
    key: &str,
    snapshot: &Snapshot,
) -> Result<(), crate::store::StoreError> {
    let raw = snapshot.to_json(key)?;
    store.set(key, raw, None).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, StoreError};
    use async_trait::async_trait;
    use std::time::Duration;

    fn snapshot(version: &str) -> Snapshot {
        Snapshot {
            version: version.into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn flush_waits_for_newest_write() {
        let store = MemoryStore::new();
        let persister = Persister::spawn(Arc::new(store.clone()));

        persister.submit("k".into(), snapshot("1"));
        persister.submit("k".into(), snapshot("2"));
        let status = persister.flush().await;

        assert_eq!(status.generation, 2);
        assert!(status.error.is_none());
        let stored = Snapshot::load(&store, "k").await.unwrap().unwrap();
        assert_eq!(stored.version, "2");
    }

    struct FailingStore;

    #[async_trait]
    impl KeyValueStore for FailingStore {
        async fn get(&self, _key: &str) -> Result<Option<String>, StoreError> {
            Ok(None)
        }

        async fn set(&self, _key: &str, _value: String, _ttl: Option<Duration>) -> Result<(), StoreError> {
            Err(StoreError::Backend("disk full".into()))
        }

        async fn exists(&self, _key: &str) -> Result<bool, StoreError> {
            Ok(false)
        }
    }

    #[tokio::test]
    async fn failures_are_reported_not_lost() {
        let persister = Persister::spawn(Arc::new(FailingStore));
        let mut status = persister.subscribe();

        let generation = persister.submit("k".into(), snapshot("1"));
        status.wait_for(|s| s.generation >= generation).await.unwrap();

        let current = status.borrow().clone();
        assert!(current.error.unwrap().contains("disk full"));
    }

    #[tokio::test]
    async fn flush_without_submissions_returns_immediately() {
        let persister = Persister::spawn(Arc::new(MemoryStore::new()));
        let status = tokio::time::timeout(Duration::from_secs(1), persister.flush())
            .await
            .unwrap();
        assert_eq!(status.generation, 0);
    }
}
