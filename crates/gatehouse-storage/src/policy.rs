use std::time::Instant;

use gatehouse_core::{AuthDecision, CredentialEvent, elapsed_ms};
use gatehouse_network::{AuthorizationClient, ConnectivityHandle};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::queue::OfflineStore;

/// Message attached to an offline grant.
pub const OFFLINE_GRANTED: &str = "Offline access granted";

/// Message attached to an offline denial.
pub const OFFLINE_DENIED: &str = "Offline access denied";

/// Static decision applied while the authority cannot be asked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FallbackPolicy {
    #[default]
    Allow,
    Deny,
}

impl FallbackPolicy {
    pub fn allows(self) -> bool {
        matches!(self, FallbackPolicy::Allow)
    }
}

/// Access decision policy
///
/// Routes every credential event to exactly one decision.
///
/// # Decision Flow
///
/// 1. **Connectivity**: read the monitor's last known state
/// 2. **Remote**: when online, ask the authority through [`AuthorizationClient`]
/// 3. **Remote failure**: a timeout, transport error or superseded request is
///    logged and treated exactly like being offline
/// 4. **Local fallback**: apply the static [`FallbackPolicy`]
/// 5. **Queue**: enqueue the event with its local decision in the
///    [`OfflineStore`], granted or not, for later reconciliation
///
/// Remote decisions are never queued. Persistence failures inside the store
/// are logged there and never delay the decision.
///
/// # Examples
///
/// ```no_run
/// use std::time::Duration;
/// use gatehouse_network::{AnyProbe, AuthorizationClient, ConnectivityMonitor, ManualProbe, MemoryTransport};
/// use gatehouse_protocol::TopicSet;
/// use gatehouse_storage::{AccessDecisionPolicy, FallbackPolicy, OfflineStore, OfflineStoreConfig};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let (transport, _broker, _incoming) = MemoryTransport::new();
/// let client = AuthorizationClient::with_default_timeout(transport.into(), TopicSet::for_gate("01")?);
/// let (_monitor, connectivity) =
///     ConnectivityMonitor::new(AnyProbe::Manual(ManualProbe::new(false)), Duration::from_secs(30));
/// let store = OfflineStore::open(OfflineStoreConfig::in_memory(1000)).await?;
///
/// let policy = AccessDecisionPolicy::new(client, connectivity, store, FallbackPolicy::Deny);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct AccessDecisionPolicy {
    client: AuthorizationClient,
    connectivity: ConnectivityHandle,
    store: OfflineStore,
    fallback: FallbackPolicy,
}

impl AccessDecisionPolicy {
    pub fn new(
        client: AuthorizationClient,
        connectivity: ConnectivityHandle,
        store: OfflineStore,
        fallback: FallbackPolicy,
    ) -> Self {
        Self {
            client,
            connectivity,
            store,
            fallback,
        }
    }

    pub fn fallback(&self) -> FallbackPolicy {
        self.fallback
    }

    pub fn store(&self) -> &OfflineStore {
        &self.store
    }

    pub fn client(&self) -> &AuthorizationClient {
        &self.client
    }

    pub fn connectivity(&self) -> &ConnectivityHandle {
        &self.connectivity
    }

    /// Decide one credential event.
    ///
    /// Always returns a decision; remote failures degrade to the local
    /// fallback.
    #[instrument(
        name = "decide",
        skip_all,
        fields(credential_id = %event.credential_id(), reader_id = %event.reader_id())
    )]
    pub async fn decide(&self, event: &CredentialEvent) -> AuthDecision {
        let started = Instant::now();

        if self.connectivity.is_online() {
            match self.client.authorize(event).await {
                Ok(decision) => return decision,
                Err(e) if e.is_timeout() => {
                    warn!(error = %e, "authority did not answer, applying local fallback");
                }
                Err(e) => {
                    warn!(error = %e, "authorization failed, applying local fallback");
                }
            }
        } else {
            debug!("gate offline, applying local fallback");
        }

        let authorized = self.fallback.allows();
        let message = if authorized {
            OFFLINE_GRANTED
        } else {
            OFFLINE_DENIED
        };
        let decision =
            AuthDecision::local_fallback(authorized, message, elapsed_ms(started.elapsed()));

        self.store.enqueue(event.clone(), decision.clone()).await;
        let pending = self.store.len().await;
        self.client.set_pending_sync(pending);
        info!(authorized, pending, "event settled locally and queued");

        decision
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::queue::OfflineStoreConfig;
    use gatehouse_core::{CredentialId, DecisionSource, Direction, ReaderId};
    use gatehouse_network::{
        AnyProbe, ConnectivityMonitor, ManualProbe, MemoryTransport, MemoryTransportHandle,
    };
    use gatehouse_protocol::{AuthReply, AuthRequest, TopicSet, WireMessage};
    use rstest::rstest;
    use tokio_util::sync::CancellationToken;

    struct Fixture {
        policy: AccessDecisionPolicy,
        _monitor: ConnectivityMonitor,
        broker: MemoryTransportHandle,
        cancel: CancellationToken,
    }

    async fn fixture(online: bool, fallback: FallbackPolicy) -> Fixture {
        let (transport, broker, incoming) = MemoryTransport::new();
        let client = AuthorizationClient::new(
            transport.into(),
            TopicSet::for_gate("01").unwrap(),
            Duration::from_secs(5),
        );
        let cancel = CancellationToken::new();
        client.spawn_reply_dispatcher(incoming, cancel.clone());

        let (monitor, connectivity) = ConnectivityMonitor::new(
            AnyProbe::Manual(ManualProbe::new(online)),
            Duration::from_secs(30),
        );
        monitor.probe_now().await;

        let store = OfflineStore::open(OfflineStoreConfig::in_memory(10))
            .await
            .unwrap();
        Fixture {
            policy: AccessDecisionPolicy::new(client, connectivity, store, fallback),
            _monitor: monitor,
            broker,
            cancel,
        }
    }

    fn event(uid: &str) -> CredentialEvent {
        CredentialEvent::new(
            CredentialId::new(uid).unwrap(),
            ReaderId::new("in").unwrap(),
            Direction::Entry,
            vec![0xAA, 0xBB, 0xCC],
        )
    }

    #[rstest]
    #[case::allow(FallbackPolicy::Allow, true, OFFLINE_GRANTED)]
    #[case::deny(FallbackPolicy::Deny, false, OFFLINE_DENIED)]
    #[tokio::test]
    async fn test_offline_applies_fallback_and_queues(
        #[case] fallback: FallbackPolicy,
        #[case] authorized: bool,
        #[case] message: &str,
    ) {
        let f = fixture(false, fallback).await;

        let decision = f.policy.decide(&event("AABBCC")).await;
        assert_eq!(decision.is_authorized(), authorized);
        assert_eq!(decision.source(), DecisionSource::LocalFallback);
        assert_eq!(decision.message(), message);

        let queued = f.policy.store().snapshot().await;
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].event().credential_id().as_str(), "AABBCC");
        assert_eq!(queued[0].decision(), &decision);
        assert!(f.broker.published().is_empty());
        f.cancel.cancel();
    }

    #[tokio::test]
    async fn test_online_uses_remote_decision_without_queueing() {
        let f = fixture(true, FallbackPolicy::Deny).await;
        let mut broker = f.broker;
        let authority = tokio::spawn(async move {
            let message = broker.next_published_on("gate/01/badge").await.unwrap();
            let request = AuthRequest::decode(&message.payload).unwrap();
            let reply = AuthReply::new(request.credential_id, true, "welcome");
            broker
                .deliver("gate/01/auth_response", reply.encode().unwrap())
                .await
                .unwrap();
        });

        let decision = f.policy.decide(&event("AABBCC")).await;
        assert!(decision.is_authorized());
        assert_eq!(decision.source(), DecisionSource::Remote);
        assert!(f.policy.store().is_empty().await);

        authority.await.unwrap();
        f.cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_remote_timeout_falls_back() {
        let f = fixture(true, FallbackPolicy::Allow).await;

        let decision = f.policy.decide(&event("AABBCC")).await;
        assert_eq!(decision.source(), DecisionSource::LocalFallback);
        assert!(decision.is_authorized());
        assert_eq!(f.policy.store().len().await, 1);
        f.cancel.cancel();
    }

    #[tokio::test]
    async fn test_transport_failure_falls_back() {
        let f = fixture(true, FallbackPolicy::Deny).await;
        f.broker.set_connected(false);

        let decision = f.policy.decide(&event("AABBCC")).await;
        assert_eq!(decision.source(), DecisionSource::LocalFallback);
        assert!(!decision.is_authorized());
        assert_eq!(f.policy.store().len().await, 1);
        f.cancel.cancel();
    }

    #[test]
    fn test_fallback_policy_serde() {
        let parsed: FallbackPolicy = serde_json::from_str("\"deny\"").unwrap();
        assert_eq!(parsed, FallbackPolicy::Deny);
        assert!(FallbackPolicy::default().allows());
    }
}
