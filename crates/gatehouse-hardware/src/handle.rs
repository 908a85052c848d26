//! Explicit hardware ownership.
//!
//! A [`HardwareHandle`] is created once at startup and passed into every
//! reader and relay at construction. It hands out exclusive [`OutputPin`]
//! claims and per-bus [`BusLock`]s; there is no ambient global GPIO state.
//!
//! ```text
//!                  HardwareHandle
//!                 /      |       \
//!   OutputPin(17)  OutputPin(27)  BusLock(0) ── shared by readers on SPI0
//!        │               │            │
//!   RelayActuator   RelayActuator   CredentialReader × N
//! ```

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::OwnedMutexGuard;
use tracing::debug;

use crate::mock::MockGpio;
use crate::traits::GpioBackend;
use crate::types::{BusId, Level, PinId};
use crate::{HardwareError, Result};

/// Shared entry point to the board's GPIO and buses.
///
/// Cloning the handle is cheap; all clones share the same claims.
///
/// # Examples
///
/// ```
/// use gatehouse_hardware::{HardwareHandle, Level};
///
/// let (hardware, gpio) = HardwareHandle::simulated();
/// let pin = hardware.claim_output(17, Level::Low).unwrap();
///
/// // A second claim of the same pin is refused.
/// assert!(hardware.claim_output(17, Level::Low).is_err());
///
/// pin.set(Level::High).unwrap();
/// assert_eq!(gpio.level(17), Some(Level::High));
/// ```
#[derive(Clone)]
pub struct HardwareHandle {
    gpio: Arc<dyn GpioBackend>,
    claimed: Arc<Mutex<HashSet<PinId>>>,
    buses: Arc<Mutex<HashMap<BusId, BusLock>>>,
}

impl HardwareHandle {
    /// Wrap a GPIO backend.
    pub fn new(gpio: Arc<dyn GpioBackend>) -> Self {
        Self {
            gpio,
            claimed: Arc::new(Mutex::new(HashSet::new())),
            buses: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Handle backed by an in-memory [`MockGpio`].
    ///
    /// The returned `MockGpio` shares state with the handle and can be used
    /// to inspect levels or inject faults.
    pub fn simulated() -> (Self, MockGpio) {
        let gpio = MockGpio::new();
        (Self::new(Arc::new(gpio.clone())), gpio)
    }

    /// Claim `pin` as an output, driving it to `initial`.
    ///
    /// # Errors
    ///
    /// Returns [`HardwareError::PinConflict`] if the pin is already claimed,
    /// or the backend error if the pin cannot be configured.
    pub fn claim_output(&self, pin: PinId, initial: Level) -> Result<OutputPin> {
        {
            let mut claimed = self.claimed.lock().unwrap_or_else(PoisonError::into_inner);
            if !claimed.insert(pin) {
                return Err(HardwareError::PinConflict { pin });
            }
        }

        if let Err(e) = self.gpio.setup_output(pin, initial) {
            self.claimed
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&pin);
            return Err(e);
        }

        debug!(pin, level = %initial, "output pin claimed");
        Ok(OutputPin {
            pin,
            gpio: Arc::clone(&self.gpio),
            claimed: Arc::clone(&self.claimed),
        })
    }

    /// Lock guarding transactions on `bus`.
    ///
    /// Every caller asking for the same bus gets the same lock.
    pub fn bus(&self, bus: BusId) -> BusLock {
        self.buses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(bus)
            .or_insert_with(|| BusLock::new(bus))
            .clone()
    }

    /// Pins currently claimed, sorted.
    pub fn claimed_pins(&self) -> Vec<PinId> {
        let mut pins: Vec<PinId> = self
            .claimed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .copied()
            .collect();
        pins.sort_unstable();
        pins
    }
}

impl fmt::Debug for HardwareHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HardwareHandle")
            .field("gpio", &self.gpio)
            .field("claimed", &self.claimed_pins())
            .finish()
    }
}

/// Exclusive claim on one output pin.
///
/// Dropping the claim releases the pin.
pub struct OutputPin {
    pin: PinId,
    gpio: Arc<dyn GpioBackend>,
    claimed: Arc<Mutex<HashSet<PinId>>>,
}

impl OutputPin {
    /// Pin number.
    pub fn pin(&self) -> PinId {
        self.pin
    }

    /// Drive the pin.
    ///
    /// # Errors
    ///
    /// Propagates the backend write error.
    pub fn set(&self, level: Level) -> Result<()> {
        self.gpio.set(self.pin, level)
    }

    /// Read the pin back.
    ///
    /// # Errors
    ///
    /// Propagates the backend read error.
    pub fn get(&self) -> Result<Level> {
        self.gpio.get(self.pin)
    }
}

impl fmt::Debug for OutputPin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputPin").field("pin", &self.pin).finish()
    }
}

impl Drop for OutputPin {
    fn drop(&mut self) {
        self.gpio.release(self.pin);
        self.claimed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.pin);
    }
}

/// Serializes transactions on one shared bus.
///
/// Each reader holds the lock for exactly one `read_uid` transaction.
#[derive(Clone, Debug)]
pub struct BusLock {
    bus: BusId,
    lock: Arc<tokio::sync::Mutex<()>>,
}

impl BusLock {
    fn new(bus: BusId) -> Self {
        Self {
            bus,
            lock: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    /// Bus number.
    pub fn bus(&self) -> BusId {
        self.bus
    }

    /// Wait for exclusive use of the bus.
    pub async fn acquire(&self) -> OwnedMutexGuard<()> {
        Arc::clone(&self.lock).lock_owned().await
    }

    /// Whether some reader is inside a transaction right now.
    pub fn is_busy(&self) -> bool {
        self.lock.try_lock().is_err()
    }
}
