use thiserror::Error;

/// Result type alias for wire message handling.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors raised while encoding or decoding wire messages.
///
/// A message that fails to decode is rejected at the boundary; nothing
/// downstream ever sees a partially valid message.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Malformed JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid field {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("Payload is not valid UTF-8")]
    NotUtf8,

    #[error("Topic {topic} does not belong to gate {gate_id}")]
    ForeignTopic { topic: String, gate_id: String },
}

impl ProtocolError {
    pub fn invalid_field(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field,
            reason: reason.into(),
        }
    }
}
