//! Relay state machine.
//!
//! ```text
//!            activate                 set ok                 timer / superseded
//!   Idle ─────────────► Activating ───────────► Active ─────────────────────► Deactivating
//!    ▲                      │                    │  ▲                               │
//!    │                      │ set failed         │  └──── superseded (re-drive) ────┤
//!    │                      ▼                    │                                  │ set failed
//!    │                  Verifying ◄──────────────┼──────────────────────────────────┘
//!    │                   │     │                 │
//!    │         verified  │     │ retries spent   │
//!    └───────────────────┘     ▼                 │
//!                            Faulted ── activate / reset ──► Activating / Deactivating
//! ```
//!
//! `force_off` may enter `Deactivating` from any state.

use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::error::{RelayError, Result};

/// Maximum number of state transitions to keep in history.
const MAX_HISTORY_SIZE: usize = 32;

/// States of one relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelayState {
    /// Released, at the safe level.
    Idle,

    /// Driving the active level and waiting for read-back.
    Activating,

    /// Energized; a deactivation timer is running.
    Active,

    /// Driving the safe level and waiting for read-back.
    Deactivating,

    /// A set or read-back failed; retrying with backoff.
    Verifying,

    /// Retries exhausted. Stays here until an activation or reset.
    Faulted,
}

impl fmt::Display for RelayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state_str = match self {
            RelayState::Idle => "Idle",
            RelayState::Activating => "Activating",
            RelayState::Active => "Active",
            RelayState::Deactivating => "Deactivating",
            RelayState::Verifying => "Verifying",
            RelayState::Faulted => "Faulted",
        };
        write!(f, "{}", state_str)
    }
}

impl RelayState {
    /// Check if transition to target state is valid from this state.
    ///
    /// # Examples
    ///
    /// ```
    /// use gatehouse_relay::RelayState;
    ///
    /// assert!(RelayState::Idle.can_transition_to(&RelayState::Activating));
    /// assert!(!RelayState::Idle.can_transition_to(&RelayState::Active));
    /// ```
    pub fn can_transition_to(&self, target: &RelayState) -> bool {
        matches!(
            (self, target),
            // force_off enters Deactivating from anywhere
            (_, RelayState::Deactivating)
            | (RelayState::Idle, RelayState::Activating)
            | (RelayState::Activating, RelayState::Active | RelayState::Verifying)
            | (RelayState::Active, RelayState::Activating)
            | (RelayState::Deactivating, RelayState::Idle | RelayState::Verifying | RelayState::Activating)
            | (RelayState::Verifying, RelayState::Active | RelayState::Idle | RelayState::Faulted | RelayState::Activating)
            | (RelayState::Faulted, RelayState::Activating)
        )
    }

    /// Whether the relay is between requests.
    pub fn is_idle(&self) -> bool {
        matches!(self, RelayState::Idle)
    }

    /// Whether the relay is energized or being energized.
    pub fn is_engaged(&self) -> bool {
        matches!(self, RelayState::Activating | RelayState::Active)
    }
}

/// Represents a single state transition with timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateTransition {
    pub from: RelayState,
    pub to: RelayState,
    pub at: Instant,
}

impl StateTransition {
    /// Time since the transition happened.
    pub fn elapsed(&self) -> Duration {
        self.at.elapsed()
    }
}

/// Current state plus a short transition history.
///
/// Not thread-safe by itself; the actuator keeps it behind its per-relay lock.
#[derive(Debug, Clone)]
pub struct RelayStateMachine {
    current: RelayState,
    history: VecDeque<StateTransition>,
}

impl RelayStateMachine {
    pub fn new() -> Self {
        Self {
            current: RelayState::Idle,
            history: VecDeque::with_capacity(MAX_HISTORY_SIZE),
        }
    }

    pub fn current(&self) -> RelayState {
        self.current
    }

    /// Most recent transitions, oldest first.
    pub fn history(&self) -> impl Iterator<Item = &StateTransition> {
        self.history.iter()
    }

    /// Move to `target`.
    ///
    /// Transitioning to the current state is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::InvalidTransition`] if the table forbids it.
    pub fn transition_to(&mut self, target: RelayState) -> Result<()> {
        if self.current == target {
            return Ok(());
        }
        if !self.current.can_transition_to(&target) {
            return Err(RelayError::InvalidTransition {
                from: self.current,
                to: target,
            });
        }

        if self.history.len() >= MAX_HISTORY_SIZE {
            self.history.pop_front();
        }
        self.history.push_back(StateTransition {
            from: self.current,
            to: target,
            at: Instant::now(),
        });
        self.current = target;
        Ok(())
    }
}

impl Default for RelayStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(RelayState::Idle, RelayState::Activating)]
    #[case(RelayState::Activating, RelayState::Active)]
    #[case(RelayState::Activating, RelayState::Verifying)]
    #[case(RelayState::Active, RelayState::Deactivating)]
    #[case(RelayState::Active, RelayState::Activating)]
    #[case(RelayState::Deactivating, RelayState::Idle)]
    #[case(RelayState::Verifying, RelayState::Faulted)]
    #[case(RelayState::Faulted, RelayState::Activating)]
    #[case(RelayState::Faulted, RelayState::Deactivating)]
    #[case(RelayState::Idle, RelayState::Deactivating)]
    fn test_valid_transitions(#[case] from: RelayState, #[case] to: RelayState) {
        assert!(from.can_transition_to(&to), "{from} -> {to}");
    }

    #[rstest]
    #[case(RelayState::Idle, RelayState::Active)]
    #[case(RelayState::Idle, RelayState::Faulted)]
    #[case(RelayState::Active, RelayState::Idle)]
    #[case(RelayState::Faulted, RelayState::Idle)]
    #[case(RelayState::Activating, RelayState::Idle)]
    fn test_invalid_transitions(#[case] from: RelayState, #[case] to: RelayState) {
        assert!(!from.can_transition_to(&to), "{from} -> {to}");
    }

    #[test]
    fn test_machine_records_history() {
        let mut machine = RelayStateMachine::new();
        machine.transition_to(RelayState::Activating).unwrap();
        machine.transition_to(RelayState::Active).unwrap();
        machine.transition_to(RelayState::Deactivating).unwrap();
        machine.transition_to(RelayState::Idle).unwrap();

        let path: Vec<_> = machine.history().map(|t| t.to).collect();
        assert_eq!(
            path,
            vec![
                RelayState::Activating,
                RelayState::Active,
                RelayState::Deactivating,
                RelayState::Idle
            ]
        );
    }

    #[test]
    fn test_invalid_transition_is_rejected() {
        let mut machine = RelayStateMachine::new();
        let err = machine.transition_to(RelayState::Active).unwrap_err();
        assert!(matches!(err, RelayError::InvalidTransition { .. }));
        assert_eq!(machine.current(), RelayState::Idle);
    }

    #[test]
    fn test_history_is_bounded() {
        let mut machine = RelayStateMachine::new();
        for _ in 0..MAX_HISTORY_SIZE {
            machine.transition_to(RelayState::Activating).unwrap();
            machine.transition_to(RelayState::Active).unwrap();
            machine.transition_to(RelayState::Deactivating).unwrap();
            machine.transition_to(RelayState::Idle).unwrap();
        }
        assert_eq!(machine.history().count(), MAX_HISTORY_SIZE);
    }

    #[test]
    fn test_same_state_is_noop() {
        let mut machine = RelayStateMachine::new();
        machine.transition_to(RelayState::Idle).unwrap();
        assert_eq!(machine.history().count(), 0);
    }
}
