//! Access log collaborator.
//!
//! The controller reports every decision and every system-level event through
//! [`AccessLogger`]. Logging never feeds back into the decision: methods
//! return nothing and implementations swallow their own failures.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use gatehouse_core::{AuthDecision, CredentialEvent, DecisionSource, Direction};
use serde::Serialize;
use tracing::{error, info, warn};

/// Target of the structured access records.
pub const ACCESS_TARGET: &str = "gatehouse::access";

/// What the relay did for one decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Actuation {
    /// The decision was a denial.
    NotRequested,
    /// The relay reached its active level.
    Activated { relay_id: String },
    /// The relay could not be driven; distinct from a denial.
    Faulted { relay_id: String, reason: String },
    /// Access was granted but the relay bank is empty.
    ///
    /// A started [`Gate`](crate::Gate) always has a relay, since validation
    /// rejects a configuration without one. Only an [`AccessController`]
    /// assembled by hand around an empty [`RelayBank`] reports this.
    ///
    /// [`AccessController`]: crate::AccessController
    /// [`RelayBank`]: gatehouse_relay::RelayBank
    NoRelay,
}

impl Actuation {
    /// Whether the gate was physically opened.
    pub fn actuated(&self) -> bool {
        matches!(self, Actuation::Activated { .. })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Actuation::NotRequested => "not_requested",
            Actuation::Activated { .. } => "activated",
            Actuation::Faulted { .. } => "faulted",
            Actuation::NoRelay => "no_relay",
        }
    }

    fn relay_id(&self) -> Option<&str> {
        match self {
            Actuation::Activated { relay_id } | Actuation::Faulted { relay_id, .. } => {
                Some(relay_id)
            }
            _ => None,
        }
    }
}

impl fmt::Display for Actuation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemEventKind {
    Startup,
    Shutdown,
    ConnectivityChanged,
    RelayFault,
    QueuePersistence,
    ReaderFault,
}

impl SystemEventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SystemEventKind::Startup => "startup",
            SystemEventKind::Shutdown => "shutdown",
            SystemEventKind::ConnectivityChanged => "connectivity_changed",
            SystemEventKind::RelayFault => "relay_fault",
            SystemEventKind::QueuePersistence => "queue_persistence",
            SystemEventKind::ReaderFault => "reader_fault",
        }
    }
}

impl fmt::Display for SystemEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// Sink for access and system records.
pub trait AccessLogger: Send + Sync + fmt::Debug {
    /// One record per decision, after any actuation attempt.
    fn record_access(
        &self,
        event: &CredentialEvent,
        decision: &AuthDecision,
        actuation: &Actuation,
        latency_ms: u32,
    );

    fn record_system_event(&self, kind: SystemEventKind, message: &str, severity: Severity);
}

/// Writes records as `tracing` events under [`ACCESS_TARGET`].
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAccessLogger;

impl AccessLogger for TracingAccessLogger {
    fn record_access(
        &self,
        event: &CredentialEvent,
        decision: &AuthDecision,
        actuation: &Actuation,
        latency_ms: u32,
    ) {
        let relay_id = actuation.relay_id().unwrap_or("-");
        if let Actuation::Faulted { reason, .. } = actuation {
            error!(
                target: ACCESS_TARGET,
                credential_id = %event.credential_id(),
                reader_id = %event.reader_id(),
                direction = %event.direction(),
                authorized = decision.is_authorized(),
                source = %decision.source(),
                actuation = %actuation,
                relay_id,
                reason = %reason,
                latency_ms,
                "access granted but relay faulted"
            );
            return;
        }
        info!(
            target: ACCESS_TARGET,
            credential_id = %event.credential_id(),
            reader_id = %event.reader_id(),
            direction = %event.direction(),
            authorized = decision.is_authorized(),
            source = %decision.source(),
            message = decision.message(),
            actuation = %actuation,
            relay_id,
            latency_ms,
            "{}",
            if decision.is_authorized() { "access granted" } else { "access denied" }
        );
    }

    fn record_system_event(&self, kind: SystemEventKind, message: &str, severity: Severity) {
        match severity {
            Severity::Info => info!(target: ACCESS_TARGET, kind = %kind, "{message}"),
            Severity::Warning => warn!(target: ACCESS_TARGET, kind = %kind, "{message}"),
            Severity::Error => error!(target: ACCESS_TARGET, kind = %kind, "{message}"),
        }
    }
}

/// One captured access record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccessRecord {
    pub credential_id: String,
    pub reader_id: String,
    pub direction: Direction,
    pub authorized: bool,
    pub source: DecisionSource,
    pub message: String,
    pub actuation: Actuation,
    pub latency_ms: u32,
}

impl AccessRecord {
    pub fn actuated(&self) -> bool {
        self.actuation.actuated()
    }
}

/// One captured system record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SystemRecord {
    pub kind: SystemEventKind,
    pub message: String,
    pub severity: Severity,
}

#[derive(Debug, Default)]
struct Records {
    accesses: Vec<AccessRecord>,
    system: Vec<SystemRecord>,
}

/// Keeps records in memory. Clones share the same records.
#[derive(Debug, Clone, Default)]
pub struct MemoryAccessLogger {
    records: Arc<Mutex<Records>>,
}

impl MemoryAccessLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn accesses(&self) -> Vec<AccessRecord> {
        self.lock().accesses.clone()
    }

    pub fn system_events(&self) -> Vec<SystemRecord> {
        self.lock().system.clone()
    }

    /// System records of one kind.
    pub fn system_events_of(&self, kind: SystemEventKind) -> Vec<SystemRecord> {
        self.lock()
            .system
            .iter()
            .filter(|r| r.kind == kind)
            .cloned()
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Records> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl AccessLogger for MemoryAccessLogger {
    fn record_access(
        &self,
        event: &CredentialEvent,
        decision: &AuthDecision,
        actuation: &Actuation,
        latency_ms: u32,
    ) {
        self.lock().accesses.push(AccessRecord {
            credential_id: event.credential_id().to_string(),
            reader_id: event.reader_id().to_string(),
            direction: event.direction(),
            authorized: decision.is_authorized(),
            source: decision.source(),
            message: decision.message().to_string(),
            actuation: actuation.clone(),
            latency_ms,
        });
    }

    fn record_system_event(&self, kind: SystemEventKind, message: &str, severity: Severity) {
        self.lock().system.push(SystemRecord {
            kind,
            message: message.to_string(),
            severity,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gatehouse_core::{CredentialId, ReaderId};
    use rstest::rstest;

    fn event() -> CredentialEvent {
        CredentialEvent::new(
            CredentialId::new("AABBCC").unwrap(),
            ReaderId::new("in").unwrap(),
            Direction::Entry,
            vec![0xAA, 0xBB, 0xCC],
        )
    }

    #[rstest]
    #[case(Actuation::NotRequested, false)]
    #[case(Actuation::Activated { relay_id: "in".into() }, true)]
    #[case(Actuation::Faulted { relay_id: "in".into(), reason: "stuck".into() }, false)]
    #[case(Actuation::NoRelay, false)]
    fn test_actuated(#[case] actuation: Actuation, #[case] expected: bool) {
        assert_eq!(actuation.actuated(), expected);
    }

    #[test]
    fn test_memory_logger_captures_records() {
        let logger = MemoryAccessLogger::new();
        let shared = logger.clone();
        let decision = AuthDecision::remote(true, "welcome", 12);

        logger.record_access(
            &event(),
            &decision,
            &Actuation::Activated {
                relay_id: "in".into(),
            },
            15,
        );
        logger.record_system_event(SystemEventKind::Startup, "started", Severity::Info);

        let accesses = shared.accesses();
        assert_eq!(accesses.len(), 1);
        assert_eq!(accesses[0].credential_id, "AABBCC");
        assert_eq!(accesses[0].source, DecisionSource::Remote);
        assert!(accesses[0].actuated());
        assert_eq!(shared.system_events_of(SystemEventKind::Startup).len(), 1);
        assert!(shared.system_events_of(SystemEventKind::Shutdown).is_empty());
    }

    #[test]
    fn test_tracing_logger_accepts_every_outcome() {
        let logger = TracingAccessLogger;
        let decision = AuthDecision::local_fallback(false, "Offline access denied", 0);
        for actuation in [
            Actuation::NotRequested,
            Actuation::NoRelay,
            Actuation::Faulted {
                relay_id: "out".into(),
                reason: "read back LOW".into(),
            },
        ] {
            logger.record_access(&event(), &decision, &actuation, 3);
        }
        logger.record_system_event(SystemEventKind::RelayFault, "relay out faulted", Severity::Error);
    }
}
