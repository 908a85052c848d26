//! In-memory GPIO backend.
//!
//! Keeps pin levels in a map and lets tests inject the two failure modes a
//! relay can show on real boards: a write that errors out, and a pin that
//! reads back a different level than the one written (welded contact,
//! broken driver).

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use crate::traits::GpioBackend;
use crate::types::{Level, PinId};
use crate::{HardwareError, Result};

#[derive(Debug, Default)]
struct PinState {
    level: Option<Level>,
    stuck_at: Option<Level>,
    failing_sets: u32,
    failing_reads: bool,
    writes: Vec<Level>,
}

/// Simulated GPIO controller.
///
/// Clones share state, so one clone can live inside a
/// [`HardwareHandle`](crate::HardwareHandle) while the test keeps another.
#[derive(Debug, Clone, Default)]
pub struct MockGpio {
    pins: Arc<Mutex<HashMap<PinId, PinState>>>,
}

impl MockGpio {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_pin<T>(&self, pin: PinId, f: impl FnOnce(&mut PinState) -> T) -> T {
        let mut pins = self.pins.lock().unwrap_or_else(PoisonError::into_inner);
        f(pins.entry(pin).or_default())
    }

    /// Level last written to `pin`, if any.
    pub fn level(&self, pin: PinId) -> Option<Level> {
        self.with_pin(pin, |state| state.level)
    }

    /// Every level successfully written to `pin`, oldest first.
    pub fn writes(&self, pin: PinId) -> Vec<Level> {
        self.with_pin(pin, |state| state.writes.clone())
    }

    /// Make the next `count` writes to `pin` fail.
    pub fn fail_next_sets(&self, pin: PinId, count: u32) {
        self.with_pin(pin, |state| state.failing_sets = count);
    }

    /// Make reads of `pin` report `level` regardless of what was written.
    ///
    /// `None` restores normal behavior.
    pub fn stick_at(&self, pin: PinId, level: Option<Level>) {
        self.with_pin(pin, |state| state.stuck_at = level);
    }

    /// Make reads of `pin` fail until cleared.
    pub fn fail_reads(&self, pin: PinId, failing: bool) {
        self.with_pin(pin, |state| state.failing_reads = failing);
    }
}

impl GpioBackend for MockGpio {
    fn setup_output(&self, pin: PinId, initial: Level) -> Result<()> {
        self.with_pin(pin, |state| {
            state.level = Some(initial);
            state.writes.push(initial);
        });
        Ok(())
    }

    fn set(&self, pin: PinId, level: Level) -> Result<()> {
        self.with_pin(pin, |state| {
            if state.failing_sets > 0 {
                state.failing_sets -= 1;
                return Err(HardwareError::communication(format!(
                    "simulated write failure on pin {pin}"
                )));
            }
            state.level = Some(level);
            state.writes.push(level);
            Ok(())
        })
    }

    fn get(&self, pin: PinId) -> Result<Level> {
        self.with_pin(pin, |state| {
            if state.failing_reads {
                return Err(HardwareError::communication(format!(
                    "simulated read failure on pin {pin}"
                )));
            }
            state
                .stuck_at
                .or(state.level)
                .ok_or_else(|| HardwareError::configuration(format!("pin {pin} is not an output")))
        })
    }

    fn release(&self, pin: PinId) {
        self.with_pin(pin, |state| state.level = None);
    }
}
