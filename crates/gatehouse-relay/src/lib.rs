//! Relay actuation for the gatehouse access gate.
//!
//! - [`RelayActuator`]: one relay, driven through a verified state machine
//!   with bounded retry. A newer request supersedes an in-flight one.
//! - [`RelayBank`]: every relay of the gate, addressed by id or passage
//!   direction, with a concurrent emergency stop.
//!
//! A relay that cannot reach the requested level ends up
//! [`RelayState::Faulted`] and reports [`RelayError::Faulted`]. That is a
//! hardware fault of the gate, never an access denial.

pub mod actuator;
pub mod bank;
pub mod error;
pub mod state;

pub use actuator::{RelayActuator, RelayConfig, RelayStatus};
pub use bank::{RelayBank, RelayBankBuilder};
pub use error::{RelayError, Result};
pub use state::{RelayState, RelayStateMachine, StateTransition};
