//! Debounced credential reader.
//!
//! A [`CredentialReader`] wraps one physical reader. Each poll holds the
//! reader's bus lock for one transaction, normalizes the raw UID and runs it
//! through a [`Debouncer`]. Only accepted reads become [`CredentialEvent`]s.
//!
//! ```text
//! read_uid ─► None ─────────────────────────► ReadOutcome::Idle
//!        └──► Some(raw) ─► UidFormat ─► Debouncer ─┬─► Suppressed
//!                                                  └─► Accepted(CredentialEvent)
//! ```

use std::collections::HashMap;
use std::time::Duration;

use gatehouse_core::constants::{
    DEFAULT_DEBOUNCE_WINDOW, DEFAULT_READER_POLL_INTERVAL, READER_FAULT_BACKOFF,
};
use gatehouse_core::{CredentialEvent, CredentialId, Direction, ReaderId, UidFormat};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

use crate::devices::AnyUidReader;
use crate::handle::{BusLock, HardwareHandle};
use crate::multiplexer::{EventSender, PushOutcome};
use crate::traits::UidReader;
use crate::{HardwareError, Result};

/// Configuration of one reader.
#[derive(Debug, Clone, PartialEq)]
pub struct ReaderConfig {
    /// Logical identity reported in every event.
    pub reader_id: ReaderId,

    /// Passage direction served by the reader.
    pub direction: Direction,

    /// Repeated reads of one UID inside this window are suppressed.
    pub debounce_window: Duration,

    /// Minimum delay between two polls.
    pub poll_interval: Duration,

    /// How raw UID bytes become a credential id.
    pub uid_format: UidFormat,
}

impl ReaderConfig {
    /// Configuration with default timings.
    pub fn new(reader_id: ReaderId, direction: Direction) -> Self {
        Self {
            reader_id,
            direction,
            debounce_window: DEFAULT_DEBOUNCE_WINDOW,
            poll_interval: DEFAULT_READER_POLL_INTERVAL,
            uid_format: UidFormat::default(),
        }
    }

    pub fn debounce_window(mut self, window: Duration) -> Self {
        self.debounce_window = window;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn uid_format(mut self, format: UidFormat) -> Self {
        self.uid_format = format;
        self
    }
}

/// Per-reader duplicate suppression.
///
/// The window is measured from the last *accepted* read of a UID; suppressed
/// reads do not extend it.
#[derive(Debug)]
pub struct Debouncer {
    window: Duration,
    last_accepted: HashMap<CredentialId, Instant>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_accepted: HashMap::new(),
        }
    }

    /// Returns `true` if `id` read at `now` should be forwarded.
    pub fn accept(&mut self, id: &CredentialId, now: Instant) -> bool {
        self.last_accepted
            .retain(|_, accepted| now.saturating_duration_since(*accepted) <= self.window);

        if self.last_accepted.contains_key(id) {
            return false;
        }
        self.last_accepted.insert(id.clone(), now);
        true
    }

    /// Number of UIDs currently inside their window.
    pub fn tracked(&self) -> usize {
        self.last_accepted.len()
    }
}

/// Result of a single poll.
#[derive(Debug, Clone, PartialEq)]
pub enum ReadOutcome {
    /// No card in the field.
    Idle,
    /// A card was read but suppressed by debounce.
    Suppressed(CredentialId),
    /// A card was read and accepted.
    Accepted(CredentialEvent),
}

/// Counters kept by a running reader.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReaderStats {
    pub accepted: u64,
    pub suppressed: u64,
    pub faults: u64,
}

/// One physical reader plus its debounce state.
#[derive(Debug)]
pub struct CredentialReader {
    config: ReaderConfig,
    device: AnyUidReader,
    bus: BusLock,
    debouncer: Debouncer,
    stats: ReaderStats,
}

impl CredentialReader {
    /// Bind `device` to the bus it reports in its [`ReaderInfo`](crate::ReaderInfo).
    pub fn new(config: ReaderConfig, device: AnyUidReader, hardware: &HardwareHandle) -> Self {
        let bus = hardware.bus(device.info().bus);
        let debouncer = Debouncer::new(config.debounce_window);
        Self {
            config,
            device,
            bus,
            debouncer,
            stats: ReaderStats::default(),
        }
    }

    pub fn reader_id(&self) -> &ReaderId {
        &self.config.reader_id
    }

    pub fn config(&self) -> &ReaderConfig {
        &self.config
    }

    pub fn stats(&self) -> ReaderStats {
        self.stats
    }

    /// Poll the device once.
    ///
    /// # Errors
    ///
    /// Returns the device error for a genuine fault, or
    /// [`HardwareError::InvalidData`] when the UID cannot be normalized.
    pub async fn poll_once(&mut self) -> Result<ReadOutcome> {
        let raw = {
            let _bus = self.bus.acquire().await;
            self.device.read_uid().await?
        };

        let Some(raw) = raw else {
            return Ok(ReadOutcome::Idle);
        };

        let credential_id = self
            .config
            .uid_format
            .normalize(&raw)
            .map_err(|e| HardwareError::invalid_data(e.to_string()))?;

        if !self.debouncer.accept(&credential_id, Instant::now()) {
            self.stats.suppressed += 1;
            return Ok(ReadOutcome::Suppressed(credential_id));
        }

        self.stats.accepted += 1;
        Ok(ReadOutcome::Accepted(CredentialEvent::new(
            credential_id,
            self.config.reader_id.clone(),
            self.config.direction,
            raw,
        )))
    }

    /// Poll until cancelled, pushing accepted events into `sink`.
    ///
    /// Transient faults are logged and polling resumes after a pause. The
    /// loop ends on cancellation, when the event queue is closed, or when
    /// the device reports it is disconnected.
    ///
    /// # Errors
    ///
    /// Returns [`HardwareError::Disconnected`] if the device goes away.
    #[instrument(name = "reader", skip_all, fields(reader_id = %self.config.reader_id))]
    pub async fn run(mut self, sink: EventSender, cancel: CancellationToken) -> Result<ReaderStats> {
        info!(direction = %self.config.direction, "reader started");

        loop {
            if cancel.is_cancelled() {
                break;
            }
            let started = Instant::now();

            match self.poll_once().await {
                Ok(ReadOutcome::Accepted(event)) => {
                    debug!(credential_id = %event.credential_id(), "credential accepted");
                    match sink.push(event) {
                        PushOutcome::Queued => {}
                        PushOutcome::DroppedOldest(dropped) => {
                            warn!(
                                dropped_credential = %dropped.credential_id(),
                                dropped_reader = %dropped.reader_id(),
                                "event queue full, dropped oldest pending event"
                            );
                        }
                        PushOutcome::Closed => break,
                    }
                }
                Ok(ReadOutcome::Suppressed(credential_id)) => {
                    trace!(%credential_id, "debounced");
                }
                Ok(ReadOutcome::Idle) => {}
                Err(HardwareError::Disconnected { device }) => {
                    warn!(%device, "reader disconnected, stopping");
                    return Err(HardwareError::Disconnected { device });
                }
                Err(e) => {
                    self.stats.faults += 1;
                    warn!(error = %e, "reader fault");
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(READER_FAULT_BACKOFF) => {}
                    }
                    continue;
                }
            }

            let remaining = self.config.poll_interval.saturating_sub(started.elapsed());
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(remaining) => {}
            }
        }

        info!(
            accepted = self.stats.accepted,
            suppressed = self.stats.suppressed,
            faults = self.stats.faults,
            "reader stopped"
        );
        Ok(self.stats)
    }
}
