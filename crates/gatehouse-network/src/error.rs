//! Network errors.
//!
//! [`AuthError`] is what a caller of `authorize` sees. Both of its failure
//! variants are recoverable: the decision policy falls back to the local
//! rule on either.

use gatehouse_core::CredentialId;
use gatehouse_protocol::ProtocolError;
use thiserror::Error;

/// Failure to move a message through the transport.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Not connected to broker")]
    NotConnected,

    #[error("Publish to {topic} failed: {message}")]
    PublishFailed { topic: String, message: String },

    #[error("Transport closed")]
    Closed,

    #[error("Cannot encode message: {0}")]
    Encode(#[from] ProtocolError),
}

impl TransportError {
    pub fn publish_failed(topic: &str, message: impl Into<String>) -> Self {
        Self::PublishFailed {
            topic: topic.to_string(),
            message: message.into(),
        }
    }
}

/// Failure of one authorization round trip.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("No reply for credential {credential_id} within {timeout_ms}ms")]
    Timeout {
        credential_id: CredentialId,
        timeout_ms: u64,
    },

    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A newer request for the same credential replaced this one.
    #[error("Request for credential {credential_id} was superseded")]
    Superseded { credential_id: CredentialId },
}

impl AuthError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, AuthError::Timeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_display() {
        let err = AuthError::Timeout {
            credential_id: CredentialId::new("AABBCC").unwrap(),
            timeout_ms: 5000,
        };
        assert_eq!(err.to_string(), "No reply for credential AABBCC within 5000ms");
        assert!(err.is_timeout());
    }

    #[test]
    fn test_transport_error_converts() {
        let err: AuthError = TransportError::NotConnected.into();
        assert!(matches!(err, AuthError::Transport(TransportError::NotConnected)));
        assert!(!err.is_timeout());
    }
}
