//! Verified relay actuation.
//!
//! A [`RelayActuator`] owns one output pin. Every level it writes is read
//! back after a settle delay; a failed write or a mismatch sends the relay to
//! `Verifying`, where the set-and-read-back cycle is retried with backoff
//! before the relay is declared `Faulted`.
//!
//! # Supersession
//!
//! Each request (`activate`, `force_off`) takes a new generation number. A
//! deactivation timer or a retry loop only acts while its generation is still
//! the latest one, so a newer request replaces an older one instead of
//! stacking a second timer.
//!
//! ```text
//! activate(5s) ─ gen 1 ─► Active, timer(gen 1, t0+5s)
//! activate(2s) ─ gen 2 ─► Active, timer(gen 2, t1+2s)   timer gen 1 is stale
//! force_off()  ─ gen 3 ─► Idle                          timer gen 2 is stale
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError};
use std::time::Duration;

use gatehouse_core::constants::{
    DEFAULT_RELAY_ACTIVE_TIME, DEFAULT_SETTLE_DELAY, DEFAULT_VERIFY_ATTEMPTS,
};
use gatehouse_core::retry::{BackoffPolicy, RetryError, retry_with_backoff_while};
use gatehouse_hardware::{HardwareError, HardwareHandle, Level, OutputPin, PinId};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

use crate::error::{RelayError, Result};
use crate::state::{RelayState, RelayStateMachine, StateTransition};

/// Configuration of one relay.
#[derive(Debug, Clone, PartialEq)]
pub struct RelayConfig {
    /// Identity used in logs, status and manual-open requests.
    pub relay_id: String,

    /// Output pin driving the relay coil.
    pub pin: PinId,

    /// Pulse length when the caller does not ask for one.
    pub active_duration: Duration,

    /// The relay is energized by a LOW level.
    pub active_low: bool,

    /// Delay between writing the pin and reading it back.
    pub settle_delay: Duration,

    /// Retries of the set-and-read-back cycle in `Verifying`.
    pub verify_attempts: u32,

    /// Spacing of those retries.
    pub verify_backoff: BackoffPolicy,
}

impl RelayConfig {
    pub fn new(relay_id: impl Into<String>, pin: PinId) -> Self {
        Self {
            relay_id: relay_id.into(),
            pin,
            active_duration: DEFAULT_RELAY_ACTIVE_TIME,
            active_low: false,
            settle_delay: DEFAULT_SETTLE_DELAY,
            verify_attempts: DEFAULT_VERIFY_ATTEMPTS,
            verify_backoff: BackoffPolicy::default(),
        }
    }

    pub fn active_duration(mut self, duration: Duration) -> Self {
        self.active_duration = duration;
        self
    }

    pub fn active_low(mut self, active_low: bool) -> Self {
        self.active_low = active_low;
        self
    }

    pub fn settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    pub fn verify_attempts(mut self, attempts: u32) -> Self {
        self.verify_attempts = attempts;
        self
    }

    pub fn verify_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.verify_backoff = backoff;
        self
    }
}

/// Serializable snapshot of a relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayStatus {
    pub relay_id: String,
    pub pin: PinId,
    pub state: RelayState,
    pub active_low: bool,
    pub active_duration_ms: u64,
    pub activations: u64,
    pub faults: u64,
    pub last_error: Option<String>,
}

/// Why a verification attempt failed.
#[derive(Debug)]
enum VerifyError {
    /// A newer request took over.
    Stale,
    Hardware(HardwareError),
}

/// State guarded by the per-relay lock.
#[derive(Debug)]
struct Core {
    machine: RelayStateMachine,
    timer: Option<JoinHandle<()>>,
    deadline: Option<Instant>,
}

struct Inner {
    config: RelayConfig,
    pin: OutputPin,
    core: Mutex<Core>,
    generation: AtomicU64,
    state_tx: watch::Sender<RelayState>,
    activations: AtomicU64,
    faults: AtomicU64,
    last_error: std::sync::Mutex<Option<String>>,
}

/// One physical relay.
///
/// Cloning is cheap; clones drive the same relay and share its lock.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use gatehouse_hardware::{HardwareHandle, Level};
/// use gatehouse_relay::{RelayActuator, RelayConfig, RelayState};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let (hardware, gpio) = HardwareHandle::simulated();
///     let relay = RelayActuator::new(RelayConfig::new("in", 17), &hardware)?;
///
///     relay.activate(Duration::from_secs(2)).await?;
///     assert_eq!(relay.state(), RelayState::Active);
///     assert_eq!(gpio.level(17), Some(Level::High));
///
///     relay.force_off().await?;
///     assert_eq!(gpio.level(17), Some(Level::Low));
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct RelayActuator {
    inner: Arc<Inner>,
}

impl RelayActuator {
    /// Claim the relay pin and drive it to the safe level.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Hardware`] if the pin is already claimed or
    /// cannot be configured.
    pub fn new(config: RelayConfig, hardware: &HardwareHandle) -> Result<Self> {
        let pin = hardware.claim_output(config.pin, Level::inactive(config.active_low))?;
        let (state_tx, _) = watch::channel(RelayState::Idle);

        info!(
            relay_id = %config.relay_id,
            pin = config.pin,
            active_low = config.active_low,
            "relay initialized at safe level"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                pin,
                core: Mutex::new(Core {
                    machine: RelayStateMachine::new(),
                    timer: None,
                    deadline: None,
                }),
                generation: AtomicU64::new(0),
                state_tx,
                activations: AtomicU64::new(0),
                faults: AtomicU64::new(0),
                last_error: std::sync::Mutex::new(None),
            }),
        })
    }

    pub fn relay_id(&self) -> &str {
        &self.inner.config.relay_id
    }

    pub fn config(&self) -> &RelayConfig {
        &self.inner.config
    }

    /// Energize the relay for `duration`.
    ///
    /// Returns once the active level has been read back. If the relay is
    /// already engaged, its timer is restarted with `duration`.
    ///
    /// # Errors
    ///
    /// - [`RelayError::Faulted`] if the active level could not be verified.
    /// - [`RelayError::Superseded`] if a newer request arrived first.
    pub async fn activate(&self, duration: Duration) -> Result<()> {
        let inner = &self.inner;
        let generation = inner.next_generation();
        let mut core = inner.core.lock().await;

        if inner.is_stale(generation) {
            return Err(inner.superseded());
        }

        if let Some(timer) = core.timer.take() {
            timer.abort();
            debug!(relay_id = %inner.config.relay_id, "superseding running timer");
        }
        core.deadline = None;

        inner.transition(&mut core, RelayState::Activating)?;
        let active = Level::active(inner.config.active_low);

        match inner
            .drive(&mut core, active, Some(generation), RelayState::Active)
            .await
        {
            Ok(()) => {
                let deadline = Instant::now() + duration;
                core.deadline = Some(deadline);
                core.timer = Some(self.spawn_timer(generation, deadline));
                inner.activations.fetch_add(1, Ordering::Relaxed);
                info!(
                    relay_id = %inner.config.relay_id,
                    duration_ms = duration.as_millis() as u64,
                    "relay active"
                );
                Ok(())
            }
            Err(e @ RelayError::Superseded { .. }) => Err(e),
            Err(e) => {
                if let Err(release) = inner.pin.set(Level::inactive(inner.config.active_low)) {
                    warn!(
                        relay_id = %inner.config.relay_id,
                        error = %release,
                        "could not release faulted relay"
                    );
                }
                Err(e)
            }
        }
    }

    /// Energize the relay for its configured duration.
    ///
    /// # Errors
    ///
    /// See [`activate`](Self::activate).
    pub async fn pulse(&self) -> Result<()> {
        self.activate(self.inner.config.active_duration).await
    }

    /// Drive the safe level now, cancelling any running timer.
    ///
    /// Works from every state, including `Faulted`.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Faulted`] if the safe level could not be verified.
    pub async fn force_off(&self) -> Result<()> {
        let inner = &self.inner;
        inner.next_generation();
        let mut core = inner.core.lock().await;

        if let Some(timer) = core.timer.take() {
            timer.abort();
        }
        core.deadline = None;

        inner.transition(&mut core, RelayState::Deactivating)?;
        let inactive = Level::inactive(inner.config.active_low);
        inner.drive(&mut core, inactive, None, RelayState::Idle).await?;
        info!(relay_id = %inner.config.relay_id, "relay forced off");
        Ok(())
    }

    /// Clear a fault and return the relay to the safe level.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Faulted`] if the safe level still cannot be verified.
    pub async fn reset_to_safe_state(&self) -> Result<()> {
        info!(
            relay_id = %self.inner.config.relay_id,
            from = %self.state(),
            "resetting relay to safe state"
        );
        *self
            .inner
            .last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;
        self.force_off().await
    }

    /// Current state.
    pub fn state(&self) -> RelayState {
        *self.inner.state_tx.borrow()
    }

    /// Observe state changes.
    pub fn subscribe(&self) -> watch::Receiver<RelayState> {
        self.inner.state_tx.subscribe()
    }

    /// Time left before the relay releases, if it is active.
    pub async fn remaining(&self) -> Option<Duration> {
        let core = self.inner.core.lock().await;
        core.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Recent transitions, oldest first.
    pub async fn history(&self) -> Vec<StateTransition> {
        self.inner.core.lock().await.machine.history().copied().collect()
    }

    pub fn status(&self) -> RelayStatus {
        let config = &self.inner.config;
        RelayStatus {
            relay_id: config.relay_id.clone(),
            pin: config.pin,
            state: self.state(),
            active_low: config.active_low,
            active_duration_ms: config.active_duration.as_millis() as u64,
            activations: self.inner.activations.load(Ordering::Relaxed),
            faults: self.inner.faults.load(Ordering::Relaxed),
            last_error: self
                .inner
                .last_error
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
        }
    }

    fn spawn_timer(&self, generation: u64, deadline: Instant) -> JoinHandle<()> {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            inner.expire(generation).await;
        })
    }
}

impl Inner {
    fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn is_stale(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) != generation
    }

    fn superseded(&self) -> RelayError {
        RelayError::Superseded {
            relay_id: self.config.relay_id.clone(),
        }
    }

    fn transition(&self, core: &mut Core, target: RelayState) -> Result<()> {
        let from = core.machine.current();
        core.machine.transition_to(target)?;
        if from != target {
            trace!(relay_id = %self.config.relay_id, %from, to = %target, "relay transition");
            self.state_tx.send_replace(target);
        }
        Ok(())
    }

    /// Deactivate when the timer of `generation` fires.
    async fn expire(&self, generation: u64) {
        let mut core = self.core.lock().await;
        if self.is_stale(generation) {
            trace!(relay_id = %self.config.relay_id, generation, "stale timer ignored");
            return;
        }
        // this task's own handle; dropping it detaches
        core.timer = None;
        core.deadline = None;

        if let Err(e) = self.transition(&mut core, RelayState::Deactivating) {
            error!(relay_id = %self.config.relay_id, error = %e, "cannot deactivate relay");
            return;
        }

        let inactive = Level::inactive(self.config.active_low);
        match self
            .drive(&mut core, inactive, Some(generation), RelayState::Idle)
            .await
        {
            Ok(()) => info!(relay_id = %self.config.relay_id, "relay released"),
            Err(RelayError::Superseded { .. }) => {
                debug!(relay_id = %self.config.relay_id, "release superseded");
            }
            Err(_) => {}
        }
    }

    /// Set `level`, verify it, and settle in `settled` on success.
    ///
    /// With `Some(generation)` the attempt is abandoned as soon as a newer
    /// request exists.
    async fn drive(
        &self,
        core: &mut Core,
        level: Level,
        generation: Option<u64>,
        settled: RelayState,
    ) -> Result<()> {
        let this = self;
        let stale = move || generation.is_some_and(|g| this.is_stale(g));

        if stale() {
            return Err(self.superseded());
        }

        let first_error = match self.set_and_verify(level).await {
            Ok(()) => {
                self.transition(core, settled)?;
                return Ok(());
            }
            Err(e) => e,
        };

        warn!(
            relay_id = %self.config.relay_id,
            %level,
            error = %first_error,
            "relay verification failed, retrying"
        );
        self.transition(core, RelayState::Verifying)?;

        let result = retry_with_backoff_while(
            &self.config.verify_backoff,
            self.config.verify_attempts,
            |_attempt| async move {
                if stale() {
                    return Err(VerifyError::Stale);
                }
                this.set_and_verify(level).await.map_err(VerifyError::Hardware)
            },
            |e| !matches!(e, VerifyError::Stale),
        )
        .await;

        match result {
            Ok(()) => {
                self.transition(core, settled)?;
                info!(relay_id = %self.config.relay_id, %level, "relay verified after retry");
                Ok(())
            }
            Err(RetryError::Aborted { .. }) => Err(self.superseded()),
            Err(RetryError::Exhausted { attempts, last }) => {
                let last_error = match last {
                    VerifyError::Hardware(e) => e.to_string(),
                    VerifyError::Stale => "superseded".to_string(),
                };
                self.transition(core, RelayState::Faulted)?;
                self.faults.fetch_add(1, Ordering::Relaxed);
                *self.last_error.lock().unwrap_or_else(PoisonError::into_inner) =
                    Some(last_error.clone());

                let attempts = attempts + 1;
                error!(
                    relay_id = %self.config.relay_id,
                    pin = self.config.pin,
                    %level,
                    attempts,
                    error = %last_error,
                    "relay faulted"
                );
                Err(RelayError::Faulted {
                    relay_id: self.config.relay_id.clone(),
                    attempts,
                    last_error,
                })
            }
        }
    }

    async fn set_and_verify(&self, level: Level) -> std::result::Result<(), HardwareError> {
        self.pin.set(level)?;
        tokio::time::sleep(self.config.settle_delay).await;

        let observed = self.pin.get()?;
        if observed != level {
            return Err(HardwareError::invalid_data(format!(
                "pin {} read back {observed}, expected {level}",
                self.config.pin
            )));
        }
        Ok(())
    }
}

impl fmt::Debug for RelayActuator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayActuator")
            .field("relay_id", &self.inner.config.relay_id)
            .field("pin", &self.inner.config.pin)
            .field("state", &self.state())
            .finish()
    }
}
