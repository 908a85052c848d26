//! Reader multiplexer.
//!
//! Runs every registered [`CredentialReader`] in its own task and merges
//! their accepted events into one bounded queue consumed by the decision
//! loop.
//!
//! ```text
//! ┌──────────┐       ┌──────────────────────┐
//! │ Reader   │──────►│                      │
//! │ "in"     │       │  EventQueue          │
//! └──────────┘       │  (bounded, drops     │──────► decision loop
//! ┌──────────┐       │   oldest when full)  │
//! │ Reader   │──────►│                      │
//! │ "out"    │       └──────────────────────┘
//! └──────────┘
//! ```
//!
//! Readers never wait on a full queue: the oldest pending event is dropped
//! so hardware polling keeps its cadence. Events from one reader keep their
//! read order; across readers only arrival order is kept.
//!
//! # Examples
//!
//! ```no_run
//! use gatehouse_core::{Direction, ReaderId};
//! use gatehouse_hardware::devices::AnyUidReader;
//! use gatehouse_hardware::mock::MockReader;
//! use gatehouse_hardware::multiplexer::{MultiplexerConfig, ReaderMultiplexer};
//! use gatehouse_hardware::reader::{CredentialReader, ReaderConfig};
//! use gatehouse_hardware::HardwareHandle;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let (hardware, _gpio) = HardwareHandle::simulated();
//! let (device, card) = MockReader::new("in", 0, 0);
//! let config = ReaderConfig::new(ReaderId::new("in")?, Direction::Entry);
//!
//! let mut multiplexer = ReaderMultiplexer::new(MultiplexerConfig::default());
//! multiplexer.register(CredentialReader::new(config, AnyUidReader::Mock(device), &hardware));
//!
//! let mut handle = multiplexer.start();
//! card.present(vec![0xAA, 0xBB, 0xCC]).await?;
//! let event = handle.recv().await;
//! handle.shutdown().await;
//! # Ok(())
//! # }
//! ```

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use gatehouse_core::CredentialEvent;
use gatehouse_core::constants::DEFAULT_EVENT_QUEUE_CAPACITY;
use tokio::sync::Notify;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::Result;
use crate::reader::{CredentialReader, ReaderStats};

#[derive(Debug)]
struct QueueState {
    items: VecDeque<CredentialEvent>,
    closed: bool,
}

#[derive(Debug)]
struct Shared {
    state: Mutex<QueueState>,
    notify: Notify,
    capacity: usize,
    senders: AtomicUsize,
    dropped: AtomicU64,
}

impl Shared {
    fn lock(&self) -> std::sync::MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn close(&self) {
        self.lock().closed = true;
        self.notify.notify_one();
    }
}

/// Result of pushing into the event queue.
#[derive(Debug, Clone, PartialEq)]
pub enum PushOutcome {
    /// The event was queued without loss.
    Queued,
    /// The queue was full; the returned oldest event was discarded.
    DroppedOldest(CredentialEvent),
    /// The consumer is gone; the event was not queued.
    Closed,
}

/// Create a bounded drop-oldest event queue.
///
/// A `capacity` of zero is treated as one.
pub fn event_queue(capacity: usize) -> (EventSender, EventReceiver) {
    let shared = Arc::new(Shared {
        state: Mutex::new(QueueState {
            items: VecDeque::with_capacity(capacity.max(1)),
            closed: false,
        }),
        notify: Notify::new(),
        capacity: capacity.max(1),
        senders: AtomicUsize::new(1),
        dropped: AtomicU64::new(0),
    });
    (
        EventSender {
            shared: Arc::clone(&shared),
        },
        EventReceiver { shared },
    )
}

/// Producer side of the event queue, one clone per reader.
#[derive(Debug)]
pub struct EventSender {
    shared: Arc<Shared>,
}

impl EventSender {
    /// Push an event without ever waiting.
    pub fn push(&self, event: CredentialEvent) -> PushOutcome {
        let outcome = {
            let mut state = self.shared.lock();
            if state.closed {
                return PushOutcome::Closed;
            }
            let dropped = if state.items.len() >= self.shared.capacity {
                state.items.pop_front()
            } else {
                None
            };
            state.items.push_back(event);
            match dropped {
                Some(old) => {
                    self.shared.dropped.fetch_add(1, Ordering::Relaxed);
                    PushOutcome::DroppedOldest(old)
                }
                None => PushOutcome::Queued,
            }
        };
        self.shared.notify.notify_one();
        outcome
    }
}

impl Clone for EventSender {
    fn clone(&self) -> Self {
        self.shared.senders.fetch_add(1, Ordering::AcqRel);
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl Drop for EventSender {
    fn drop(&mut self) {
        if self.shared.senders.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.shared.close();
        }
    }
}

/// Consumer side of the event queue.
#[derive(Debug)]
pub struct EventReceiver {
    shared: Arc<Shared>,
}

impl EventReceiver {
    /// Wait for the next event.
    ///
    /// Returns `None` once the queue is closed and empty.
    pub async fn recv(&mut self) -> Option<CredentialEvent> {
        loop {
            {
                let mut state = self.shared.lock();
                if let Some(event) = state.items.pop_front() {
                    return Some(event);
                }
                if state.closed {
                    return None;
                }
            }
            self.shared.notify.notified().await;
        }
    }

    /// Take the next event if one is pending.
    pub fn try_recv(&mut self) -> Option<CredentialEvent> {
        self.shared.lock().items.pop_front()
    }

    /// Stop accepting events and discard what is pending.
    ///
    /// Returns the number of discarded events.
    pub fn close(&mut self) -> usize {
        let mut state = self.shared.lock();
        state.closed = true;
        let discarded = state.items.len();
        state.items.clear();
        discarded
    }

    /// Number of pending events.
    pub fn len(&self) -> usize {
        self.shared.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Events dropped because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }
}

impl Drop for EventReceiver {
    fn drop(&mut self) {
        self.shared.lock().closed = true;
    }
}

/// Configuration of the multiplexer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MultiplexerConfig {
    /// Capacity of the merged event queue.
    pub queue_capacity: usize,
}

impl Default for MultiplexerConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_EVENT_QUEUE_CAPACITY,
        }
    }
}

/// Collects readers before they are started.
#[derive(Debug)]
pub struct ReaderMultiplexer {
    config: MultiplexerConfig,
    readers: Vec<CredentialReader>,
}

impl ReaderMultiplexer {
    pub fn new(config: MultiplexerConfig) -> Self {
        Self {
            config,
            readers: Vec::new(),
        }
    }

    /// Register a reader.
    pub fn register(&mut self, reader: CredentialReader) {
        debug!(reader_id = %reader.reader_id(), "reader registered");
        self.readers.push(reader);
    }

    pub fn reader_count(&self) -> usize {
        self.readers.len()
    }

    /// Spawn one task per reader and return the consuming handle.
    pub fn start(self) -> MultiplexerHandle {
        let (sender, events) = event_queue(self.config.queue_capacity);
        let cancel = CancellationToken::new();
        let mut tasks = JoinSet::new();

        for reader in self.readers {
            tasks.spawn(reader.run(sender.clone(), cancel.child_token()));
        }
        drop(sender);

        info!(
            readers = tasks.len(),
            capacity = self.config.queue_capacity,
            "reader multiplexer started"
        );

        MultiplexerHandle {
            events,
            tasks,
            cancel,
        }
    }
}

/// Running readers plus the merged event stream.
#[derive(Debug)]
pub struct MultiplexerHandle {
    events: EventReceiver,
    tasks: JoinSet<Result<ReaderStats>>,
    cancel: CancellationToken,
}

impl MultiplexerHandle {
    /// Receive the next accepted event from any reader.
    ///
    /// Returns `None` when all readers have stopped and the queue is drained.
    pub async fn recv(&mut self) -> Option<CredentialEvent> {
        self.events.recv().await
    }

    /// Token that stops every reader when cancelled.
    pub fn reader_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Number of events dropped under backpressure so far.
    pub fn dropped_events(&self) -> u64 {
        self.events.dropped()
    }

    /// Stop the readers, discard pending events and wait for every task.
    pub async fn shutdown(mut self) -> ShutdownSummary {
        self.cancel.cancel();
        let discarded = self.events.close();

        let mut summary = ShutdownSummary {
            discarded_events: discarded,
            dropped_events: self.events.dropped(),
            ..ShutdownSummary::default()
        };

        while let Some(result) = self.tasks.join_next().await {
            match Self::classify_task_result(result) {
                TaskTermination::Success(stats) => {
                    summary.stopped += 1;
                    summary.accepted += stats.accepted;
                    summary.faults += stats.faults;
                }
                TaskTermination::Error => summary.errored += 1,
                TaskTermination::Panic => summary.panicked += 1,
                TaskTermination::Cancelled => summary.stopped += 1,
            }
        }

        if summary.errored > 0 || summary.panicked > 0 {
            warn!(
                errored = summary.errored,
                panicked = summary.panicked,
                "readers terminated abnormally"
            );
        }
        info!(
            stopped = summary.stopped,
            discarded = summary.discarded_events,
            dropped = summary.dropped_events,
            "reader multiplexer stopped"
        );
        summary
    }

    /// Classify the termination status of a task.
    fn classify_task_result(
        result: std::result::Result<Result<ReaderStats>, tokio::task::JoinError>,
    ) -> TaskTermination {
        match result {
            Ok(Ok(stats)) => TaskTermination::Success(stats),
            Ok(Err(_)) => TaskTermination::Error,
            Err(e) if e.is_cancelled() => TaskTermination::Cancelled,
            Err(_) => TaskTermination::Panic,
        }
    }
}

/// Task termination classification for shutdown handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskTermination {
    Success(ReaderStats),
    Error,
    Cancelled,
    Panic,
}

/// What happened to the readers during shutdown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownSummary {
    pub stopped: usize,
    pub errored: usize,
    pub panicked: usize,
    pub accepted: u64,
    pub faults: u64,
    pub discarded_events: usize,
    pub dropped_events: u64,
}
