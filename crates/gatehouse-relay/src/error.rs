//! Relay errors.
//!
//! [`RelayError::Faulted`] is the hardware fault of a relay that could not
//! be driven to the requested level after bounded retries. It is reported to
//! the caller and logged, and is never to be confused with an access denial.

use gatehouse_hardware::HardwareError;

use crate::state::RelayState;

/// Result type alias for relay operations.
pub type Result<T> = std::result::Result<T, RelayError>;

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// The relay did not reach the requested level after every retry.
    #[error("Relay {relay_id} faulted after {attempts} attempts: {last_error}")]
    Faulted {
        relay_id: String,
        attempts: u32,
        last_error: String,
    },

    /// A newer request (activation or force-off) took over this one.
    #[error("Request on relay {relay_id} was superseded")]
    Superseded { relay_id: String },

    #[error("Invalid relay state transition from {from} to {to}")]
    InvalidTransition { from: RelayState, to: RelayState },

    #[error("Unknown relay: {0}")]
    UnknownRelay(String),

    #[error("Duplicate relay id: {0}")]
    DuplicateRelay(String),

    #[error("No relay configured")]
    NoRelay,

    #[error(transparent)]
    Hardware(#[from] HardwareError),
}

impl RelayError {
    /// Whether the error is a hardware fault of the relay.
    pub fn is_fault(&self) -> bool {
        matches!(self, RelayError::Faulted { .. } | RelayError::Hardware(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_faulted_display() {
        let error = RelayError::Faulted {
            relay_id: "in".to_string(),
            attempts: 4,
            last_error: "read back LOW, expected HIGH".to_string(),
        };
        assert!(error.is_fault());
        assert_eq!(
            error.to_string(),
            "Relay in faulted after 4 attempts: read back LOW, expected HIGH"
        );
    }

    #[test]
    fn test_superseded_is_not_fault() {
        let error = RelayError::Superseded {
            relay_id: "out".to_string(),
        };
        assert!(!error.is_fault());
    }
}
