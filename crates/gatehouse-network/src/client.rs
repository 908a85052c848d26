//! Request/reply correlation over publish/subscribe.
//!
//! ```text
//!  authorize(event)                                reply dispatcher task
//!   │ register {credential_id -> oneshot}               │
//!   │ publish  gate/{id}/badge  ──────► authority       │
//!   │ publish  gate/{id}/status (best effort)           │
//!   │ wait (deadline) ◄──── oneshot ◄─── handle_reply ◄─┘ gate/{id}/auth_response
//! ```
//!
//! The correlation is registered before the request leaves, so a reply can
//! never arrive ahead of its entry. Every pending entry carries a ticket; a
//! caller that times out removes its own ticket only, never a newer request
//! for the same credential. Late, duplicate and unknown replies are dropped.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use gatehouse_core::constants::DEFAULT_AUTH_TIMEOUT;
use gatehouse_core::{AuthDecision, CredentialEvent, CredentialId, elapsed_ms};
use gatehouse_protocol::{
    AuthReply, AuthRequest, GateStatus, StatusMessage, TopicKind, TopicSet, WireMessage,
};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

use crate::error::{AuthError, TransportError};
use crate::transport::{AnyTransport, Incoming};

/// What happened to one incoming reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyDisposition {
    /// Handed to the waiting caller.
    Fulfilled,
    /// No caller waits for this credential any more.
    Unmatched,
    /// The payload failed validation.
    Malformed,
}

#[derive(Debug)]
struct Pending {
    ticket: u64,
    deadline: Instant,
    slot: oneshot::Sender<AuthReply>,
}

#[derive(Debug)]
struct ClientInner {
    transport: AnyTransport,
    topics: TopicSet,
    timeout: Duration,
    pending: Mutex<HashMap<CredentialId, Pending>>,
    next_ticket: AtomicU64,
    pending_sync: AtomicUsize,
}

impl ClientInner {
    fn pending(&self) -> MutexGuard<'_, HashMap<CredentialId, Pending>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Remove the entry for `credential_id` if it still belongs to `ticket`.
    fn remove_own(&self, credential_id: &CredentialId, ticket: u64) -> bool {
        let mut pending = self.pending();
        match pending.get(credential_id) {
            Some(entry) if entry.ticket == ticket => {
                pending.remove(credential_id);
                true
            }
            _ => false,
        }
    }
}

/// Client of the remote decision authority.
///
/// Cloning is cheap; clones share the correlation table.
#[derive(Debug, Clone)]
pub struct AuthorizationClient {
    inner: Arc<ClientInner>,
}

impl AuthorizationClient {
    pub fn new(transport: AnyTransport, topics: TopicSet, timeout: Duration) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                transport,
                topics,
                timeout,
                pending: Mutex::new(HashMap::new()),
                next_ticket: AtomicU64::new(0),
                pending_sync: AtomicUsize::new(0),
            }),
        }
    }

    /// Client with the default reply timeout.
    pub fn with_default_timeout(transport: AnyTransport, topics: TopicSet) -> Self {
        Self::new(transport, topics, DEFAULT_AUTH_TIMEOUT)
    }

    pub fn topics(&self) -> &TopicSet {
        &self.inner.topics
    }

    pub fn timeout(&self) -> Duration {
        self.inner.timeout
    }

    pub fn transport(&self) -> &AnyTransport {
        &self.inner.transport
    }

    /// Topics the transport must subscribe to.
    pub fn subscriptions(&self) -> Vec<String> {
        vec![self.inner.topics.reply().to_string()]
    }

    /// Requests waiting for a reply.
    pub fn pending_count(&self) -> usize {
        self.inner.pending().len()
    }

    /// Offline backlog size reported in heartbeats.
    pub fn set_pending_sync(&self, pending: usize) {
        self.inner.pending_sync.store(pending, Ordering::Relaxed);
    }

    /// Ask the authority about `event` and wait for its reply.
    ///
    /// Suspends only the calling task, for at most the configured timeout.
    ///
    /// # Errors
    ///
    /// - [`AuthError::Transport`] if the request could not be published.
    /// - [`AuthError::Timeout`] if no reply arrived in time. A reply arriving
    ///   later is discarded.
    /// - [`AuthError::Superseded`] if another request for the same credential
    ///   replaced this one while it waited.
    #[instrument(
        name = "authorize",
        skip_all,
        fields(credential_id = %event.credential_id(), reader_id = %event.reader_id())
    )]
    pub async fn authorize(&self, event: &CredentialEvent) -> Result<AuthDecision, AuthError> {
        let inner = &self.inner;
        let started = Instant::now();
        let deadline = started + inner.timeout;
        let credential_id = event.credential_id().clone();
        let payload = AuthRequest::from_event(event)
            .encode()
            .map_err(TransportError::from)?;

        let ticket = inner.next_ticket.fetch_add(1, Ordering::Relaxed);
        let (slot, mut result) = oneshot::channel();
        let replaced = inner.pending().insert(
            credential_id.clone(),
            Pending {
                ticket,
                deadline,
                slot,
            },
        );
        if replaced.is_some() {
            debug!("superseding pending request for the same credential");
        }

        if let Err(e) = inner.transport.publish(inner.topics.request(), payload).await {
            inner.remove_own(&credential_id, ticket);
            debug!(error = %e, "authorization request not published");
            return Err(e.into());
        }
        trace!("authorization request published");

        self.publish_status(GateStatus::Online).await;

        match tokio::time::timeout_at(deadline, &mut result).await {
            Ok(Ok(reply)) => {
                let decision = reply.decision(elapsed_ms(started.elapsed()));
                debug!(
                    authorized = decision.is_authorized(),
                    latency_ms = decision.latency_ms(),
                    "authorization reply received"
                );
                Ok(decision)
            }
            Ok(Err(_)) => Err(AuthError::Superseded { credential_id }),
            Err(_) => {
                if !inner.remove_own(&credential_id, ticket) {
                    // the dispatcher took the entry; the reply may already be in the slot
                    if let Ok(reply) = result.try_recv() {
                        return Ok(reply.decision(elapsed_ms(started.elapsed())));
                    }
                }
                debug!(timeout_ms = inner.timeout.as_millis() as u64, "authorization timed out");
                Err(AuthError::Timeout {
                    credential_id,
                    timeout_ms: inner.timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Route one reply payload to its waiting caller.
    pub fn handle_reply(&self, payload: &[u8]) -> ReplyDisposition {
        let reply = match AuthReply::decode(payload) {
            Ok(reply) => reply,
            Err(e) => {
                warn!(error = %e, bytes = payload.len(), "malformed authorization reply");
                return ReplyDisposition::Malformed;
            }
        };

        let entry = self.inner.pending().remove(&reply.credential_id);
        match entry {
            Some(entry) if entry.deadline > Instant::now() => {
                let credential_id = reply.credential_id.clone();
                if entry.slot.send(reply).is_err() {
                    debug!(%credential_id, "caller stopped waiting before the reply");
                    return ReplyDisposition::Unmatched;
                }
                ReplyDisposition::Fulfilled
            }
            Some(_) => {
                debug!(credential_id = %reply.credential_id, "reply arrived after the deadline");
                ReplyDisposition::Unmatched
            }
            None => {
                debug!(credential_id = %reply.credential_id, "unmatched reply discarded");
                ReplyDisposition::Unmatched
            }
        }
    }

    /// Start the task feeding incoming messages to [`handle_reply`](Self::handle_reply).
    pub fn spawn_reply_dispatcher(
        &self,
        incoming: Incoming,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let client = self.clone();
        tokio::spawn(async move { client.dispatch_replies(incoming, cancel).await })
    }

    #[instrument(name = "reply_dispatcher", skip_all, fields(gate_id = %self.inner.topics.gate_id()))]
    async fn dispatch_replies(&self, mut incoming: Incoming, cancel: CancellationToken) {
        loop {
            let message = tokio::select! {
                _ = cancel.cancelled() => break,
                message = incoming.recv() => match message {
                    Some(message) => message,
                    None => break,
                },
            };

            match self.inner.topics.classify(&message.topic) {
                Ok(TopicKind::Reply) => {
                    self.handle_reply(&message.payload);
                }
                Ok(kind) => trace!(?kind, "ignoring message on own topic"),
                Err(e) => debug!(error = %e, "ignoring message"),
            }
        }
        debug!("reply dispatcher stopped");
    }

    /// Publish a queued event without waiting for any reply.
    ///
    /// # Errors
    ///
    /// Returns the transport error; the caller keeps the event queued.
    pub async fn publish_sync(&self, request: &AuthRequest) -> Result<(), TransportError> {
        let payload = request.encode()?;
        self.inner
            .transport
            .publish(self.inner.topics.request(), payload)
            .await
    }

    /// Publish a heartbeat. Failures are logged and otherwise ignored.
    pub async fn publish_status(&self, status: GateStatus) {
        let message = StatusMessage::now(
            status,
            self.inner.topics.gate_id(),
            self.inner.pending_sync.load(Ordering::Relaxed),
        );
        let payload = match message.encode() {
            Ok(payload) => payload,
            Err(e) => {
                debug!(error = %e, "status not encoded");
                return;
            }
        };
        match self
            .inner
            .transport
            .publish(self.inner.topics.status(), payload)
            .await
        {
            Ok(()) => trace!(?status, "status published"),
            Err(e) => debug!(error = %e, "status not published"),
        }
    }

    /// Drop every pending correlation; waiting callers see `Superseded`.
    pub fn abandon_pending(&self) -> usize {
        let mut pending = self.inner.pending();
        let count = pending.len();
        pending.clear();
        if count > 0 {
            info!(count, "abandoned pending authorization requests");
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{MemoryTransport, MemoryTransportHandle};
    use gatehouse_core::{DecisionSource, Direction, ReaderId};

    fn client(timeout: Duration) -> (AuthorizationClient, MemoryTransportHandle, Incoming) {
        let (transport, handle, incoming) = MemoryTransport::new();
        let client =
            AuthorizationClient::new(transport.into(), TopicSet::for_gate("01").unwrap(), timeout);
        (client, handle, incoming)
    }

    fn event(uid: &str) -> CredentialEvent {
        CredentialEvent::new(
            CredentialId::new(uid).unwrap(),
            ReaderId::new("in").unwrap(),
            Direction::Entry,
            vec![0xAA, 0xBB, 0xCC],
        )
    }

    fn reply(uid: &str, authorized: bool) -> Vec<u8> {
        AuthReply::new(CredentialId::new(uid).unwrap(), authorized, "ok")
            .encode()
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_reply_fulfills_pending_request() {
        let (client, mut authority, _incoming) = client(Duration::from_secs(5));

        let waiting = {
            let client = client.clone();
            tokio::spawn(async move { client.authorize(&event("AABBCC")).await })
        };

        let request = authority.next_published_on("gate/01/badge").await.unwrap();
        let request = AuthRequest::decode(&request.payload).unwrap();
        assert_eq!(request.credential_id.as_str(), "AABBCC");
        assert_eq!(client.pending_count(), 1);

        assert_eq!(
            client.handle_reply(&reply("AABBCC", true)),
            ReplyDisposition::Fulfilled
        );

        let decision = waiting.await.unwrap().unwrap();
        assert!(decision.is_authorized());
        assert_eq!(decision.source(), DecisionSource::Remote);
        assert_eq!(client.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_discards_late_reply() {
        let (client, _authority, _incoming) = client(Duration::from_secs(5));

        let err = client.authorize(&event("AABBCC")).await.unwrap_err();
        assert!(matches!(err, AuthError::Timeout { timeout_ms: 5000, .. }));
        assert_eq!(client.pending_count(), 0);

        assert_eq!(
            client.handle_reply(&reply("AABBCC", true)),
            ReplyDisposition::Unmatched
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_reply_is_ignored() {
        let (client, mut authority, _incoming) = client(Duration::from_secs(5));
        let waiting = {
            let client = client.clone();
            tokio::spawn(async move { client.authorize(&event("AB")).await })
        };
        authority.next_published_on("gate/01/badge").await.unwrap();

        assert_eq!(client.handle_reply(&reply("AB", false)), ReplyDisposition::Fulfilled);
        assert_eq!(client.handle_reply(&reply("AB", true)), ReplyDisposition::Unmatched);
        assert!(!waiting.await.unwrap().unwrap().is_authorized());
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_reply() {
        let (client, _authority, _incoming) = client(Duration::from_secs(5));
        assert_eq!(client.handle_reply(b"{not json"), ReplyDisposition::Malformed);
        assert_eq!(
            client.handle_reply(br#"{"credential_id":"AB"}"#),
            ReplyDisposition::Malformed
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_publish_failure_is_transport_error() {
        let (client, authority, _incoming) = client(Duration::from_secs(5));
        authority.fail_next_publishes(1);

        let err = client.authorize(&event("AB")).await.unwrap_err();
        assert!(matches!(err, AuthError::Transport(TransportError::PublishFailed { .. })));
        assert_eq!(client.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_request_supersedes_first() {
        let (client, mut authority, _incoming) = client(Duration::from_secs(5));

        let first = {
            let client = client.clone();
            tokio::spawn(async move { client.authorize(&event("AB")).await })
        };
        authority.next_published_on("gate/01/badge").await.unwrap();

        let second = {
            let client = client.clone();
            tokio::spawn(async move { client.authorize(&event("AB")).await })
        };
        authority.next_published_on("gate/01/badge").await.unwrap();

        assert!(matches!(
            first.await.unwrap(),
            Err(AuthError::Superseded { .. })
        ));
        assert_eq!(client.handle_reply(&reply("AB", true)), ReplyDisposition::Fulfilled);
        assert!(second.await.unwrap().unwrap().is_authorized());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatcher_routes_reply_topic_only() {
        let (client, mut authority, incoming) = client(Duration::from_secs(5));
        let cancel = CancellationToken::new();
        let dispatcher = client.spawn_reply_dispatcher(incoming, cancel.clone());

        let waiting = {
            let client = client.clone();
            tokio::spawn(async move { client.authorize(&event("AB")).await })
        };
        authority.next_published_on("gate/01/badge").await.unwrap();

        authority.deliver("gate/02/auth_response", reply("AB", false)).await.unwrap();
        authority.deliver("gate/01/auth_response", reply("AB", true)).await.unwrap();

        assert!(waiting.await.unwrap().unwrap().is_authorized());
        cancel.cancel();
        dispatcher.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_reports_pending_sync() {
        let (client, authority, _incoming) = client(Duration::from_secs(5));
        client.set_pending_sync(4);
        client.publish_status(GateStatus::Offline).await;

        let payloads = authority.delivered_on("gate/01/status");
        let status = StatusMessage::decode(&payloads[0]).unwrap();
        assert_eq!(status.status, GateStatus::Offline);
        assert_eq!(status.pending_sync, 4);
    }
}
