//! The set of relays of one gate.

use std::sync::Arc;
use std::time::Duration;

use gatehouse_core::Direction;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::actuator::{RelayActuator, RelayStatus};
use crate::error::{RelayError, Result};

#[derive(Debug, Clone)]
struct Slot {
    relay: RelayActuator,
    direction: Option<Direction>,
}

/// Relays addressed by id or by passage direction.
///
/// Cloning is cheap; clones share the same relays.
#[derive(Debug, Clone, Default)]
pub struct RelayBank {
    slots: Arc<Vec<Slot>>,
}

/// Builder for [`RelayBank`].
#[derive(Debug, Default)]
pub struct RelayBankBuilder {
    slots: Vec<Slot>,
}

impl RelayBankBuilder {
    /// Add a relay, optionally bound to a passage direction.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::DuplicateRelay`] if the id is already present.
    pub fn add(mut self, relay: RelayActuator, direction: Option<Direction>) -> Result<Self> {
        if self.slots.iter().any(|s| s.relay.relay_id() == relay.relay_id()) {
            return Err(RelayError::DuplicateRelay(relay.relay_id().to_string()));
        }
        self.slots.push(Slot { relay, direction });
        Ok(self)
    }

    pub fn build(self) -> RelayBank {
        RelayBank {
            slots: Arc::new(self.slots),
        }
    }
}

impl RelayBank {
    pub fn builder() -> RelayBankBuilder {
        RelayBankBuilder::default()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn get(&self, relay_id: &str) -> Option<&RelayActuator> {
        self.slots
            .iter()
            .find(|s| s.relay.relay_id() == relay_id)
            .map(|s| &s.relay)
    }

    pub fn relays(&self) -> impl Iterator<Item = &RelayActuator> {
        self.slots.iter().map(|s| &s.relay)
    }

    /// Relay that opens the passage in `direction`.
    ///
    /// Falls back to the first relay when none is bound to the direction.
    pub fn for_direction(&self, direction: Direction) -> Option<&RelayActuator> {
        self.slots
            .iter()
            .find(|s| s.direction == Some(direction))
            .or_else(|| self.slots.first())
            .map(|s| &s.relay)
    }

    /// Open the passage for `direction`.
    ///
    /// `duration` defaults to the relay's configured pulse. Returns the id of
    /// the relay that was driven.
    ///
    /// # Errors
    ///
    /// [`RelayError::NoRelay`] for an empty bank, otherwise the actuator's error.
    pub async fn activate_for(
        &self,
        direction: Direction,
        duration: Option<Duration>,
    ) -> Result<String> {
        let relay = self.for_direction(direction).ok_or(RelayError::NoRelay)?;
        let duration = duration.unwrap_or(relay.config().active_duration);
        relay.activate(duration).await?;
        Ok(relay.relay_id().to_string())
    }

    /// Open one relay by id.
    ///
    /// # Errors
    ///
    /// [`RelayError::UnknownRelay`] if no relay has that id.
    pub async fn activate(&self, relay_id: &str, duration: Option<Duration>) -> Result<()> {
        let relay = self
            .get(relay_id)
            .ok_or_else(|| RelayError::UnknownRelay(relay_id.to_string()))?;
        let duration = duration.unwrap_or(relay.config().active_duration);
        relay.activate(duration).await
    }

    /// Force every relay to its safe level concurrently.
    ///
    /// Returns the ids of relays that could not be verified off.
    pub async fn emergency_stop(&self) -> Vec<String> {
        warn!(relays = self.len(), "emergency stop");

        let mut tasks = JoinSet::new();
        for relay in self.relays().cloned() {
            tasks.spawn(async move {
                let result = relay.force_off().await;
                (relay.relay_id().to_string(), result)
            });
        }

        let mut failed = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(()))) => {}
                Ok((relay_id, Err(e))) => {
                    error!(%relay_id, error = %e, "relay did not reach safe level");
                    failed.push(relay_id);
                }
                Err(e) => error!(error = %e, "force-off task failed"),
            }
        }
        failed.sort();

        if failed.is_empty() {
            info!("all relays at safe level");
        }
        failed
    }

    pub fn statuses(&self) -> Vec<RelayStatus> {
        self.relays().map(RelayActuator::status).collect()
    }
}
