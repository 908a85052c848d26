//! The decision loop.
//!
//! [`AccessController`] is the only caller of the decision policy and of
//! relay activation for reader events. It holds no decision logic: it asks
//! the policy, opens the relay for the event's direction on a grant, and
//! reports the outcome to the [`AccessLogger`].

use std::sync::Arc;
use std::time::Instant;

use gatehouse_core::{AuthDecision, CredentialEvent, elapsed_ms};
use gatehouse_hardware::MultiplexerHandle;
use gatehouse_relay::{RelayBank, RelayError};
use gatehouse_storage::AccessDecisionPolicy;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::logger::{AccessLogger, Actuation, Severity, SystemEventKind};

/// Decision and actuation for one event.
#[derive(Debug, Clone, PartialEq)]
pub struct AccessOutcome {
    pub decision: AuthDecision,
    pub actuation: Actuation,
    /// From the start of the decision to the end of the actuation attempt.
    pub latency_ms: u32,
}

/// Decides each reader event and drives the relay bound to its direction.
///
/// [`Gate`](crate::Gate) assembles one from a validated configuration. Built
/// directly, it accepts any [`RelayBank`], including an empty one, in which
/// case grants end in [`Actuation::NoRelay`].
#[derive(Debug, Clone)]
pub struct AccessController {
    policy: AccessDecisionPolicy,
    relays: RelayBank,
    logger: Arc<dyn AccessLogger>,
}

impl AccessController {
    pub fn new(
        policy: AccessDecisionPolicy,
        relays: RelayBank,
        logger: Arc<dyn AccessLogger>,
    ) -> Self {
        Self {
            policy,
            relays,
            logger,
        }
    }

    pub fn policy(&self) -> &AccessDecisionPolicy {
        &self.policy
    }

    pub fn relays(&self) -> &RelayBank {
        &self.relays
    }

    /// Decide one event, actuate on a grant and log the outcome.
    #[instrument(
        name = "access",
        skip_all,
        fields(
            credential_id = %event.credential_id(),
            reader_id = %event.reader_id(),
            direction = %event.direction()
        )
    )]
    pub async fn handle_event(&self, event: &CredentialEvent) -> AccessOutcome {
        let started = Instant::now();
        let decision = self.policy.decide(event).await;

        let actuation = if decision.is_authorized() {
            self.actuate(event).await
        } else {
            Actuation::NotRequested
        };

        let latency_ms = elapsed_ms(started.elapsed());
        self.logger
            .record_access(event, &decision, &actuation, latency_ms);

        AccessOutcome {
            decision,
            actuation,
            latency_ms,
        }
    }

    async fn actuate(&self, event: &CredentialEvent) -> Actuation {
        let direction = event.direction();
        match self.relays.activate_for(direction, None).await {
            Ok(relay_id) => {
                debug!(relay_id = %relay_id, "relay activated");
                Actuation::Activated { relay_id }
            }
            Err(RelayError::NoRelay) => {
                warn!("access granted but no relay is configured");
                Actuation::NoRelay
            }
            Err(e) => {
                let relay_id = self
                    .relays
                    .for_direction(direction)
                    .map(|relay| relay.relay_id().to_string())
                    .unwrap_or_default();
                if matches!(e, RelayError::Superseded { .. }) {
                    // emergency stop or a manual request took the relay
                    warn!(relay_id = %relay_id, "activation superseded");
                } else {
                    error!(relay_id = %relay_id, error = %e, "relay activation failed");
                    self.logger.record_system_event(
                        SystemEventKind::RelayFault,
                        &format!("relay {relay_id} faulted: {e}"),
                        Severity::Error,
                    );
                }
                Actuation::Faulted {
                    relay_id,
                    reason: e.to_string(),
                }
            }
        }
    }

    /// Process reader events until `cancel` fires or the readers are gone.
    ///
    /// An event already being processed is finished before returning, so an
    /// in-flight authorization either completes or times out. Returns the
    /// number of events processed.
    #[instrument(name = "decision_loop", skip_all)]
    pub async fn run(&self, events: &mut MultiplexerHandle, cancel: CancellationToken) -> u64 {
        let mut processed = 0u64;
        info!("decision loop started");

        loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => event,
                    None => {
                        debug!("reader stream ended");
                        break;
                    }
                },
            };
            self.handle_event(&event).await;
            processed += 1;
        }

        info!(processed, "decision loop stopped");
        processed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::logger::MemoryAccessLogger;
    use gatehouse_core::{CredentialId, DecisionSource, Direction, ReaderId};
    use gatehouse_hardware::{HardwareHandle, Level};
    use gatehouse_hardware::mock::MockGpio;
    use gatehouse_network::{
        AnyProbe, AuthorizationClient, ConnectivityMonitor, ManualProbe, MemoryTransport,
    };
    use gatehouse_protocol::TopicSet;
    use gatehouse_relay::{RelayActuator, RelayConfig};
    use gatehouse_storage::{FallbackPolicy, OfflineStore, OfflineStoreConfig};

    struct Fixture {
        controller: AccessController,
        logger: MemoryAccessLogger,
        gpio: MockGpio,
    }

    async fn fixture(fallback: FallbackPolicy, with_relay: bool) -> Fixture {
        let (hardware, gpio) = HardwareHandle::simulated();
        let mut bank = RelayBank::builder();
        if with_relay {
            let relay = RelayActuator::new(RelayConfig::new("in", 18), &hardware).unwrap();
            bank = bank.add(relay, Some(Direction::Entry)).unwrap();
        }

        let (transport, _broker, _incoming) = MemoryTransport::new();
        let client = AuthorizationClient::new(
            transport.into(),
            TopicSet::for_gate("01").unwrap(),
            Duration::from_secs(5),
        );
        let (_monitor, connectivity) = ConnectivityMonitor::new(
            AnyProbe::Manual(ManualProbe::new(false)),
            Duration::from_secs(30),
        );
        let store = OfflineStore::open(OfflineStoreConfig::in_memory(10))
            .await
            .unwrap();
        let policy = AccessDecisionPolicy::new(client, connectivity, store, fallback);

        let logger = MemoryAccessLogger::new();
        Fixture {
            controller: AccessController::new(policy, bank.build(), Arc::new(logger.clone())),
            logger,
            gpio,
        }
    }

    fn event(direction: Direction) -> CredentialEvent {
        CredentialEvent::new(
            CredentialId::new("AABBCC").unwrap(),
            ReaderId::new("in").unwrap(),
            direction,
            vec![0xAA, 0xBB, 0xCC],
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_grant_activates_relay() {
        let f = fixture(FallbackPolicy::Allow, true).await;

        let outcome = f.controller.handle_event(&event(Direction::Entry)).await;
        assert!(outcome.decision.is_authorized());
        assert_eq!(
            outcome.actuation,
            Actuation::Activated {
                relay_id: "in".to_string()
            }
        );
        assert_eq!(f.gpio.level(18), Some(Level::High));

        let records = f.logger.accesses();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].source, DecisionSource::LocalFallback);
        assert!(records[0].actuated());
    }

    #[tokio::test(start_paused = true)]
    async fn test_denial_leaves_relay_alone() {
        let f = fixture(FallbackPolicy::Deny, true).await;

        let outcome = f.controller.handle_event(&event(Direction::Entry)).await;
        assert_eq!(outcome.actuation, Actuation::NotRequested);
        assert_eq!(f.gpio.writes(18), vec![Level::Low]);
        assert!(!f.logger.accesses()[0].actuated());
    }

    #[tokio::test(start_paused = true)]
    async fn test_relay_fault_is_not_a_denial() {
        let f = fixture(FallbackPolicy::Allow, true).await;
        f.gpio.stick_at(18, Some(Level::Low));

        let outcome = f.controller.handle_event(&event(Direction::Entry)).await;
        assert!(outcome.decision.is_authorized());
        assert!(matches!(outcome.actuation, Actuation::Faulted { ref relay_id, .. } if relay_id == "in"));
        assert_eq!(f.logger.system_events_of(SystemEventKind::RelayFault).len(), 1);

        let record = &f.logger.accesses()[0];
        assert!(record.authorized);
        assert!(!record.actuated());
    }

    #[tokio::test(start_paused = true)]
    async fn test_grant_without_relay() {
        let f = fixture(FallbackPolicy::Allow, false).await;
        let outcome = f.controller.handle_event(&event(Direction::Exit)).await;
        assert_eq!(outcome.actuation, Actuation::NoRelay);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exit_falls_back_to_first_relay() {
        let f = fixture(FallbackPolicy::Allow, true).await;
        let outcome = f.controller.handle_event(&event(Direction::Exit)).await;
        assert!(outcome.actuation.actuated());
    }
}
