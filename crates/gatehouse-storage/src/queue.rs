//! Bounded, disk-mirrored FIFO of locally decided events.
//!
//! # On-disk format
//!
//! ```json
//! {
//!   "saved_at": "2024-05-01T08:00:00Z",
//!   "queue_size": 1,
//!   "queue_data": [
//!     {"id": 0, "event": {...}, "decision_at_enqueue": {...},
//!      "sync_attempts": 0, "enqueued_at": "2024-05-01T08:00:00Z"}
//!   ]
//! }
//! ```
//!
//! The file is rewritten in full (temp file + rename) while the queue lock is
//! held, so it always matches a snapshot the process actually had. It is read
//! once, at startup.
//!
//! # Drain
//!
//! [`OfflineStore::drain_once`] publishes oldest-first. The front item is only
//! removed after its publish succeeded; on failure its `sync_attempts` grows,
//! it stays at the front and the cycle stops, so nothing enqueued after it is
//! attempted first.

use std::collections::VecDeque;
use std::fmt::Display;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use gatehouse_core::constants::{DEFAULT_MAX_QUEUE_SIZE, DEFAULT_QUEUE_FILE};
use gatehouse_core::retry::{BackoffPolicy, retry_with_backoff};
use gatehouse_core::{AuthDecision, CredentialEvent};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::error::{StorageError, StorageResult};

/// An event settled by the local policy, waiting to be reported.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedEvent {
    id: u64,
    event: CredentialEvent,
    decision_at_enqueue: AuthDecision,
    sync_attempts: u32,
    enqueued_at: DateTime<Utc>,
}

impl QueuedEvent {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn event(&self) -> &CredentialEvent {
        &self.event
    }

    pub fn decision(&self) -> &AuthDecision {
        &self.decision_at_enqueue
    }

    pub fn sync_attempts(&self) -> u32 {
        self.sync_attempts
    }

    pub fn enqueued_at(&self) -> DateTime<Utc> {
        self.enqueued_at
    }
}

/// The persisted queue document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueFile {
    pub saved_at: DateTime<Utc>,
    pub queue_size: usize,
    pub queue_data: Vec<QueuedEvent>,
}

impl QueueFile {
    fn snapshot(queue: &VecDeque<QueuedEvent>) -> Self {
        Self {
            saved_at: Utc::now(),
            queue_size: queue.len(),
            queue_data: queue.iter().cloned().collect(),
        }
    }

    /// Read a queue document.
    ///
    /// # Errors
    ///
    /// [`StorageError::Persistence`] if the file cannot be read,
    /// [`StorageError::Json`] if it is not a queue document.
    pub async fn read(path: &Path) -> StorageResult<Self> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| StorageError::persistence(path, e))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Write the document atomically (temp file, then rename).
    ///
    /// # Errors
    ///
    /// [`StorageError::Persistence`] on any I/O failure.
    pub async fn write(&self, path: &Path) -> StorageResult<()> {
        let json = serde_json::to_vec_pretty(self)?;

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::persistence(parent, e))?;
        }

        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &json)
            .await
            .map_err(|e| StorageError::persistence(&tmp, e))?;
        tokio::fs::rename(&tmp, path)
            .await
            .map_err(|e| StorageError::persistence(path, e))?;
        Ok(())
    }
}

/// Offline store settings.
#[derive(Debug, Clone, PartialEq)]
pub struct OfflineStoreConfig {
    /// Queue file; `None` keeps the queue in memory only.
    pub path: Option<PathBuf>,
    pub max_size: usize,
    /// Publish attempts per item within one drain cycle.
    pub item_attempts: u32,
    /// Spacing of those attempts.
    pub item_backoff: BackoffPolicy,
}

impl Default for OfflineStoreConfig {
    fn default() -> Self {
        Self {
            path: Some(PathBuf::from(DEFAULT_QUEUE_FILE)),
            max_size: DEFAULT_MAX_QUEUE_SIZE,
            item_attempts: 2,
            item_backoff: BackoffPolicy::constant(Duration::from_millis(250)),
        }
    }
}

impl OfflineStoreConfig {
    pub fn in_memory(max_size: usize) -> Self {
        Self {
            path: None,
            max_size,
            ..Self::default()
        }
    }

    pub fn persisted(path: impl Into<PathBuf>, max_size: usize) -> Self {
        Self {
            path: Some(path.into()),
            max_size,
            ..Self::default()
        }
    }

    pub fn item_attempts(mut self, attempts: u32) -> Self {
        self.item_attempts = attempts;
        self
    }

    pub fn item_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.item_backoff = backoff;
        self
    }
}

/// Counters of the offline queue.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: usize,
    pub max_size: usize,
    pub total_enqueued: u64,
    pub total_evicted: u64,
    pub total_synced: u64,
    pub failed_sync_attempts: u64,
    pub last_sync_attempt: Option<DateTime<Utc>>,
    pub last_successful_sync: Option<DateTime<Utc>>,
}

/// Result of one drain cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub synced: usize,
    /// The cycle stopped on a publish failure.
    pub failed: bool,
    pub remaining: usize,
}

#[derive(Debug, Default)]
struct StoreState {
    queue: VecDeque<QueuedEvent>,
    next_id: u64,
    stats: QueueStats,
}

#[derive(Debug)]
struct StoreInner {
    config: OfflineStoreConfig,
    state: Mutex<StoreState>,
    /// Serializes drains so an item is never published by two at once.
    drain: Mutex<()>,
}

/// The offline queue.
///
/// Cloning is cheap; clones share the queue and its lock.
#[derive(Debug, Clone)]
pub struct OfflineStore {
    inner: Arc<StoreInner>,
}

impl OfflineStore {
    /// Open the store, loading the queue file if there is one.
    ///
    /// A missing, unreadable or corrupt file yields an empty queue; the
    /// problem is logged. A file holding more than `max_size` items keeps the
    /// newest ones.
    ///
    /// # Errors
    ///
    /// [`StorageError::Configuration`] for a zero `max_size`.
    pub async fn open(config: OfflineStoreConfig) -> StorageResult<Self> {
        if config.max_size == 0 {
            return Err(StorageError::Configuration(
                "offline queue max size must be at least 1".to_string(),
            ));
        }

        let mut state = StoreState {
            stats: QueueStats {
                max_size: config.max_size,
                ..QueueStats::default()
            },
            ..StoreState::default()
        };

        if let Some(path) = &config.path {
            match QueueFile::read(path).await {
                Ok(file) => {
                    let mut queue: VecDeque<QueuedEvent> = file.queue_data.into();
                    let excess = queue.len().saturating_sub(config.max_size);
                    if excess > 0 {
                        warn!(excess, max_size = config.max_size, "queue file over capacity, dropping oldest");
                        queue.drain(..excess);
                    }
                    state.next_id = queue.iter().map(|q| q.id + 1).max().unwrap_or(0);
                    info!(path = %path.display(), pending = queue.len(), saved_at = %file.saved_at, "offline queue loaded");
                    state.queue = queue;
                }
                Err(StorageError::Persistence { source, .. })
                    if source.kind() == std::io::ErrorKind::NotFound =>
                {
                    debug!(path = %path.display(), "no queue file, starting empty");
                }
                Err(e) => {
                    error!(path = %path.display(), error = %e, "queue file unusable, starting empty");
                }
            }
        }
        state.stats.pending = state.queue.len();

        Ok(Self {
            inner: Arc::new(StoreInner {
                config,
                state: Mutex::new(state),
                drain: Mutex::new(()),
            }),
        })
    }

    pub fn config(&self) -> &OfflineStoreConfig {
        &self.inner.config
    }

    pub fn max_size(&self) -> usize {
        self.inner.config.max_size
    }

    /// Append a locally decided event, evicting the oldest when full.
    ///
    /// Never fails: a persistence error is logged and the in-memory queue
    /// remains authoritative. Returns the id of the queued item.
    pub async fn enqueue(&self, event: CredentialEvent, decision: AuthDecision) -> u64 {
        let mut state = self.inner.state.lock().await;

        let id = state.next_id;
        state.next_id += 1;

        while state.queue.len() >= self.inner.config.max_size {
            if let Some(evicted) = state.queue.pop_front() {
                state.stats.total_evicted += 1;
                warn!(
                    evicted_id = evicted.id,
                    credential_id = %evicted.event.credential_id(),
                    "offline queue full, oldest event evicted"
                );
            }
        }

        debug!(id, credential_id = %event.credential_id(), "event queued for sync");
        state.queue.push_back(QueuedEvent {
            id,
            event,
            decision_at_enqueue: decision,
            sync_attempts: 0,
            enqueued_at: Utc::now(),
        });
        state.stats.total_enqueued += 1;
        state.stats.pending = state.queue.len();

        self.persist_logged(&state).await;
        id
    }

    pub async fn len(&self) -> usize {
        self.inner.state.lock().await.queue.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.state.lock().await.queue.is_empty()
    }

    /// Queued items, oldest first.
    pub async fn snapshot(&self) -> Vec<QueuedEvent> {
        self.inner.state.lock().await.queue.iter().cloned().collect()
    }

    pub async fn stats(&self) -> QueueStats {
        self.inner.state.lock().await.stats.clone()
    }

    /// Drop every queued item. Returns how many were dropped.
    pub async fn clear(&self) -> usize {
        let mut state = self.inner.state.lock().await;
        let cleared = state.queue.len();
        state.queue.clear();
        state.stats.pending = 0;
        info!(cleared, "offline queue cleared");
        self.persist_logged(&state).await;
        cleared
    }

    /// Write the current queue to `path` in the queue file format.
    ///
    /// # Errors
    ///
    /// [`StorageError::Persistence`] if the file cannot be written.
    pub async fn export(&self, path: &Path) -> StorageResult<usize> {
        let state = self.inner.state.lock().await;
        let file = QueueFile::snapshot(&state.queue);
        file.write(path).await?;
        info!(path = %path.display(), items = file.queue_size, "offline queue exported");
        Ok(file.queue_size)
    }

    /// Rewrite the queue file now.
    ///
    /// # Errors
    ///
    /// [`StorageError::Persistence`] if the file cannot be written.
    pub async fn persist(&self) -> StorageResult<()> {
        let state = self.inner.state.lock().await;
        self.write_locked(&state).await
    }

    /// Publish queued items oldest-first until the queue is empty or a
    /// publish fails.
    ///
    /// `publish` receives a copy of the front item whose `sync_attempts`
    /// counts the failures so far. Concurrent calls run one after the other.
    pub async fn drain_once<F, Fut, E>(&self, mut publish: F) -> DrainReport
    where
        F: FnMut(QueuedEvent) -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: Display,
    {
        let _draining = self.inner.drain.lock().await;
        let config = &self.inner.config;
        let mut report = DrainReport::default();

        loop {
            let front = {
                let mut state = self.inner.state.lock().await;
                state.stats.last_sync_attempt = Some(Utc::now());
                state.queue.front().cloned()
            };
            let Some(front) = front else { break };

            let result = retry_with_backoff(&config.item_backoff, config.item_attempts, |attempt| {
                let mut item = front.clone();
                item.sync_attempts += attempt;
                let publishing = publish(item);
                let id = front.id;
                async move {
                    let outcome = publishing.await;
                    if outcome.is_err() {
                        self.record_failed_attempt(id).await;
                    }
                    outcome
                }
            })
            .await;

            match result {
                Ok(()) => {
                    let mut state = self.inner.state.lock().await;
                    if let Some(pos) = state.queue.iter().position(|q| q.id == front.id) {
                        state.queue.remove(pos);
                    }
                    state.stats.total_synced += 1;
                    state.stats.last_successful_sync = Some(Utc::now());
                    state.stats.pending = state.queue.len();
                    report.synced += 1;
                }
                Err(e) => {
                    let attempts = e.attempts();
                    let last_error = e.into_inner();
                    warn!(
                        id = front.id,
                        credential_id = %front.event.credential_id(),
                        attempts,
                        error = %last_error,
                        "offline sync failed, keeping event at the front"
                    );
                    report.failed = true;
                    break;
                }
            }
        }

        let state = self.inner.state.lock().await;
        report.remaining = state.queue.len();
        if report.synced > 0 || report.failed {
            self.persist_logged(&state).await;
        }
        if report.synced > 0 {
            info!(synced = report.synced, remaining = report.remaining, "offline events synced");
        }
        report
    }

    async fn record_failed_attempt(&self, id: u64) {
        let mut state = self.inner.state.lock().await;
        state.stats.failed_sync_attempts += 1;
        if let Some(item) = state.queue.iter_mut().find(|q| q.id == id) {
            item.sync_attempts += 1;
        }
    }

    async fn persist_logged(&self, state: &StoreState) {
        if let Err(e) = self.write_locked(state).await {
            error!(error = %e, "offline queue not persisted, keeping it in memory");
        }
    }

    async fn write_locked(&self, state: &StoreState) -> StorageResult<()> {
        match &self.inner.config.path {
            Some(path) => QueueFile::snapshot(&state.queue).write(path).await,
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gatehouse_core::{CredentialId, Direction, ReaderId};
    use std::sync::Mutex as StdMutex;
    use tempfile::TempDir;

    fn event(uid: &str) -> CredentialEvent {
        CredentialEvent::new(
            CredentialId::new(uid).unwrap(),
            ReaderId::new("in").unwrap(),
            Direction::Entry,
            vec![0x01],
        )
    }

    fn allow() -> AuthDecision {
        AuthDecision::local_fallback(true, "Offline access granted", 0)
    }

    async fn memory_store(max: usize) -> OfflineStore {
        let config = OfflineStoreConfig::in_memory(max)
            .item_backoff(BackoffPolicy::constant(Duration::from_millis(10)));
        OfflineStore::open(config).await.unwrap()
    }

    fn ids(items: &[QueuedEvent]) -> Vec<String> {
        items
            .iter()
            .map(|q| q.event().credential_id().to_string())
            .collect()
    }

    #[tokio::test]
    async fn test_zero_capacity_rejected() {
        let result = OfflineStore::open(OfflineStoreConfig::in_memory(0)).await;
        assert!(matches!(result, Err(StorageError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_eviction_drops_oldest() {
        let store = memory_store(2).await;
        store.enqueue(event("E1"), allow()).await;
        store.enqueue(event("E2"), allow()).await;
        store.enqueue(event("E3"), allow()).await;

        assert_eq!(ids(&store.snapshot().await), vec!["E2", "E3"]);
        let stats = store.stats().await;
        assert_eq!(stats.total_evicted, 1);
        assert_eq!(stats.total_enqueued, 3);
        assert_eq!(stats.pending, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_retries_failed_item_before_later_ones() {
        let store = memory_store(10).await;
        for uid in ["E1", "E2", "E3"] {
            store.enqueue(event(uid), allow()).await;
        }

        let attempts = StdMutex::new(Vec::new());
        let mut fail_first = true;
        let report = store
            .drain_once(|item: QueuedEvent| {
                let fail = std::mem::take(&mut fail_first);
                attempts
                    .lock()
                    .unwrap()
                    .push((item.event().credential_id().to_string(), fail));
                async move { if fail { Err("broker down") } else { Ok(()) } }
            })
            .await;

        assert_eq!(
            attempts.into_inner().unwrap(),
            vec![
                ("E1".to_string(), true),
                ("E1".to_string(), false),
                ("E2".to_string(), false),
                ("E3".to_string(), false),
            ]
        );
        assert_eq!(report, DrainReport { synced: 3, failed: false, remaining: 0 });
        assert_eq!(store.stats().await.failed_sync_attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_cycle_keeps_item_at_front() {
        let store = memory_store(10).await;
        store.enqueue(event("E1"), allow()).await;
        store.enqueue(event("E2"), allow()).await;

        let report = store
            .drain_once(|_item: QueuedEvent| async { Err::<(), _>("down") })
            .await;
        assert!(report.failed);
        assert_eq!(report.synced, 0);

        let items = store.snapshot().await;
        assert_eq!(ids(&items), vec!["E1", "E2"]);
        assert_eq!(items[0].sync_attempts(), 2);
        assert_eq!(items[1].sync_attempts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_publish_sees_attempt_count() {
        let store = memory_store(10).await;
        store.enqueue(event("E1"), allow()).await;

        let seen = StdMutex::new(Vec::new());
        store
            .drain_once(|item: QueuedEvent| {
                seen.lock().unwrap().push(item.sync_attempts());
                async { Err::<(), _>("down") }
            })
            .await;
        store
            .drain_once(|item: QueuedEvent| {
                seen.lock().unwrap().push(item.sync_attempts());
                async { Ok::<(), &str>(()) }
            })
            .await;

        assert_eq!(seen.into_inner().unwrap(), vec![0, 1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_drains_publish_once() {
        let store = memory_store(10).await;
        store.enqueue(event("E1"), allow()).await;

        let published = StdMutex::new(Vec::new());
        let publish = |item: QueuedEvent| {
            published.lock().unwrap().push(item.id());
            async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok::<(), &str>(())
            }
        };
        let (first, second) = tokio::join!(store.drain_once(publish), store.drain_once(publish));

        assert_eq!(published.into_inner().unwrap().len(), 1);
        assert_eq!(first.synced + second.synced, 1);
        assert_eq!(second.remaining, 0);
        assert_eq!(store.stats().await.total_synced, 1);
    }

    #[tokio::test]
    async fn test_queue_survives_restart() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("logs").join("offline_queue.json");

        let store = OfflineStore::open(OfflineStoreConfig::persisted(&path, 10))
            .await
            .unwrap();
        store.enqueue(event("E1"), allow()).await;
        store.enqueue(event("E2"), allow()).await;
        drop(store);

        let file = QueueFile::read(&path).await.unwrap();
        assert_eq!(file.queue_size, 2);
        assert_eq!(file.queue_data.len(), 2);

        let reopened = OfflineStore::open(OfflineStoreConfig::persisted(&path, 10))
            .await
            .unwrap();
        assert_eq!(ids(&reopened.snapshot().await), vec!["E1", "E2"]);

        // ids keep growing after a reload
        let id = reopened.enqueue(event("E3"), allow()).await;
        assert_eq!(id, 2);
    }

    #[tokio::test]
    async fn test_oversized_file_keeps_newest() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("queue.json");

        let store = OfflineStore::open(OfflineStoreConfig::persisted(&path, 5))
            .await
            .unwrap();
        for uid in ["E1", "E2", "E3", "E4"] {
            store.enqueue(event(uid), allow()).await;
        }

        let smaller = OfflineStore::open(OfflineStoreConfig::persisted(&path, 2))
            .await
            .unwrap();
        assert_eq!(ids(&smaller.snapshot().await), vec!["E3", "E4"]);
    }

    #[tokio::test]
    async fn test_corrupt_file_starts_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("queue.json");
        tokio::fs::write(&path, b"{ not a queue").await.unwrap();

        let store = OfflineStore::open(OfflineStoreConfig::persisted(&path, 5))
            .await
            .unwrap();
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_unwritable_path_does_not_block_enqueue() {
        let dir = TempDir::new().unwrap();
        // a file where the parent directory should be
        let blocker = dir.path().join("blocker");
        tokio::fs::write(&blocker, b"x").await.unwrap();
        let path = blocker.join("queue.json");

        let store = OfflineStore::open(OfflineStoreConfig::persisted(&path, 5))
            .await
            .unwrap();
        store.enqueue(event("E1"), allow()).await;
        assert_eq!(store.len().await, 1);
        assert!(store.persist().await.is_err());
    }

    #[tokio::test]
    async fn test_clear_and_export() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("queue.json");
        let export = dir.path().join("export.json");

        let store = OfflineStore::open(OfflineStoreConfig::persisted(&path, 5))
            .await
            .unwrap();
        store.enqueue(event("E1"), allow()).await;

        assert_eq!(store.export(&export).await.unwrap(), 1);
        assert_eq!(QueueFile::read(&export).await.unwrap().queue_size, 1);

        assert_eq!(store.clear().await, 1);
        assert!(store.is_empty().await);
        assert_eq!(QueueFile::read(&path).await.unwrap().queue_size, 0);
    }
}
