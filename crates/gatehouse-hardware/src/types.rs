//! Common types shared across hardware device implementations.

use serde::{Deserialize, Serialize};
use std::fmt;

/// GPIO pin number (BCM numbering on the reference board).
pub type PinId = u8;

/// Identifier of a shared communication bus (SPI bus number).
pub type BusId = u8;

/// Electrical level of a GPIO pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Low,
    High,
}

impl Level {
    /// The opposite level.
    #[must_use]
    pub fn inverted(self) -> Self {
        match self {
            Level::Low => Level::High,
            Level::High => Level::Low,
        }
    }

    /// Level that energizes a relay with the given polarity.
    #[must_use]
    pub fn active(active_low: bool) -> Self {
        if active_low { Level::Low } else { Level::High }
    }

    /// Level that releases a relay with the given polarity.
    #[must_use]
    pub fn inactive(active_low: bool) -> Self {
        Self::active(active_low).inverted()
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Level::Low => write!(f, "LOW"),
            Level::High => write!(f, "HIGH"),
        }
    }
}

/// Reader device information.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReaderInfo {
    /// Reader name (e.g., "MFRC522").
    pub name: String,

    /// Bus the reader is attached to.
    pub bus: BusId,

    /// Chip-select line of the reader on that bus.
    pub chip_select: u8,
}

impl ReaderInfo {
    /// Create a new ReaderInfo.
    pub fn new(name: impl Into<String>, bus: BusId, chip_select: u8) -> Self {
        Self {
            name: name.into(),
            bus,
            chip_select,
        }
    }
}
