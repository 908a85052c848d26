//! Offline side of the gate.
//!
//! This crate decides credential events when the authority cannot, keeps
//! those locally settled events in a bounded queue mirrored to disk, and
//! reports them once connectivity returns.
//!
//! # Architecture
//!
//! - [`AccessDecisionPolicy`] - routes each event to the authority when online,
//!   otherwise to the static [`FallbackPolicy`] and the [`OfflineStore`]
//! - [`OfflineStore`] - bounded FIFO with oldest-first eviction, rewritten in
//!   full to a JSON file after every change
//! - [`DrainWorker`] - republishes queued events oldest-first, on an interval
//!   and on reconnect
//!
//! # Core Concepts
//!
//! ## Exactly one decision
//!
//! [`AccessDecisionPolicy::decide`] cannot fail. Authority timeouts and
//! transport errors degrade to the local fallback, and queue persistence
//! errors are logged by the store without delaying the answer.
//!
//! ## Ordering
//!
//! Drain preserves enqueue order. An item whose publish fails stays at the
//! front and the cycle stops, so it is retried before anything behind it.
//!
//! # Examples
//!
//! ```no_run
//! use gatehouse_storage::{OfflineStore, OfflineStoreConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = OfflineStore::open(OfflineStoreConfig::persisted("logs/offline_queue.json", 1000)).await?;
//! println!("{} events waiting", store.len().await);
//! # Ok(())
//! # }
//! ```

pub mod drain;
pub mod error;
pub mod policy;
pub mod queue;

pub use drain::{DrainConfig, DrainWorker};
pub use error::{StorageError, StorageResult};
pub use policy::{AccessDecisionPolicy, FallbackPolicy, OFFLINE_DENIED, OFFLINE_GRANTED};
pub use queue::{
    DrainReport, OfflineStore, OfflineStoreConfig, QueueFile, QueueStats, QueuedEvent,
};
