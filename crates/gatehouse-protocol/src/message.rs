//! Typed JSON messages exchanged with the decision authority.
//!
//! Request (gate -> authority):
//!
//! ```json
//! {"credential_id":"04A1B2C3","reader_id":"in","direction":"in",
//!  "timestamp":"2024-05-01T08:00:00Z","raw_payload":"04A1B2C3"}
//! ```
//!
//! Reply (authority -> gate):
//!
//! ```json
//! {"credential_id":"04A1B2C3","authorized":true,"message":"Welcome"}
//! ```
//!
//! Every message is checked when decoded. Identifiers go through the same
//! validating constructors as locally produced ones, so a reply carrying an
//! unusable credential id fails here rather than in the correlation table.

use chrono::{DateTime, Utc};
use gatehouse_core::{AuthDecision, CredentialEvent, CredentialId, Direction, ReaderId};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{ProtocolError, Result};

/// Longest reply message kept; longer text is cut at a char boundary.
pub const MAX_MESSAGE_LENGTH: usize = 256;

/// Encoding and validated decoding shared by all wire messages.
pub trait WireMessage: Serialize + DeserializeOwned {
    /// Checks beyond what the types already enforce.
    fn validate(&self) -> Result<()> {
        Ok(())
    }

    fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parse and validate a payload.
    ///
    /// # Errors
    ///
    /// [`ProtocolError::NotUtf8`], [`ProtocolError::Json`] or the
    /// message-specific validation error.
    fn decode(payload: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(payload).map_err(|_| ProtocolError::NotUtf8)?;
        let message: Self = serde_json::from_str(text.trim())?;
        message.validate()?;
        Ok(message)
    }
}

/// Local outcome attached to an event republished from the offline queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfflineAnnotation {
    pub authorized: bool,
    pub decided_at: DateTime<Utc>,
    pub sync_attempts: u32,
}

/// Authorization request for one credential event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthRequest {
    pub credential_id: CredentialId,
    pub reader_id: ReaderId,
    pub direction: Direction,
    pub timestamp: DateTime<Utc>,
    #[serde(with = "gatehouse_core::types::hex_bytes")]
    pub raw_payload: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offline: Option<OfflineAnnotation>,
}

impl AuthRequest {
    pub fn from_event(event: &CredentialEvent) -> Self {
        Self {
            credential_id: event.credential_id().clone(),
            reader_id: event.reader_id().clone(),
            direction: event.direction(),
            timestamp: event.timestamp(),
            raw_payload: event.raw_payload().to_vec(),
            offline: None,
        }
    }

    /// Republication of an event already settled by the local policy.
    pub fn offline_sync(
        event: &CredentialEvent,
        decision: &AuthDecision,
        decided_at: DateTime<Utc>,
        sync_attempts: u32,
    ) -> Self {
        Self {
            offline: Some(OfflineAnnotation {
                authorized: decision.is_authorized(),
                decided_at,
                sync_attempts,
            }),
            ..Self::from_event(event)
        }
    }

    pub fn is_offline_sync(&self) -> bool {
        self.offline.is_some()
    }
}

impl WireMessage for AuthRequest {}

/// Authority's answer to an [`AuthRequest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthReply {
    pub credential_id: CredentialId,
    pub authorized: bool,
    #[serde(default)]
    pub message: String,
}

impl AuthReply {
    pub fn new(credential_id: CredentialId, authorized: bool, message: impl Into<String>) -> Self {
        Self {
            credential_id,
            authorized,
            message: message.into(),
        }
    }

    pub fn decision(&self, latency_ms: u32) -> AuthDecision {
        AuthDecision::remote(self.authorized, bounded(self.message.trim()), latency_ms)
    }
}

impl WireMessage for AuthReply {
    fn validate(&self) -> Result<()> {
        if self.message.chars().any(|c| c.is_control() && c != '\n') {
            return Err(ProtocolError::invalid_field(
                "message",
                "contains control characters",
            ));
        }
        Ok(())
    }
}

fn bounded(message: &str) -> String {
    match message.char_indices().nth(MAX_MESSAGE_LENGTH) {
        Some((cut, _)) => message[..cut].to_string(),
        None => message.to_string(),
    }
}

/// Reachability reported in a heartbeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GateStatus {
    Online,
    Offline,
}

/// Heartbeat published on the status topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusMessage {
    pub status: GateStatus,
    pub timestamp: DateTime<Utc>,
    pub gate_id: String,
    pub pending_sync: usize,
}

impl StatusMessage {
    pub fn now(status: GateStatus, gate_id: impl Into<String>, pending_sync: usize) -> Self {
        Self {
            status,
            timestamp: Utc::now(),
            gate_id: gate_id.into(),
            pending_sync,
        }
    }
}

impl WireMessage for StatusMessage {
    fn validate(&self) -> Result<()> {
        if self.gate_id.is_empty() {
            return Err(ProtocolError::invalid_field("gate_id", "must not be empty"));
        }
        Ok(())
    }
}
