use crate::{
    Result,
    constants::{MAX_CREDENTIAL_LENGTH, MAX_READER_ID_LENGTH, MIN_CREDENTIAL_LENGTH},
    error::Error,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use subtle::ConstantTimeEq;

/// Normalized credential identifier (upper-case, ASCII alphanumeric).
///
/// # Security
/// This type implements constant-time comparison to prevent timing attacks
/// when credential identifiers are compared during reply correlation.
#[derive(Debug, Clone, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CredentialId(String);

impl CredentialId {
    /// Create a new credential identifier with validation.
    ///
    /// The value is normalized (trimmed and converted to uppercase) before validation.
    ///
    /// # Errors
    /// Returns `Error::InvalidCredential` if:
    /// - The length is not between 1-32 characters
    /// - The value contains anything but ASCII letters and digits
    pub fn new(value: &str) -> Result<Self> {
        let value = value.trim().to_ascii_uppercase();

        let len = value.len();
        if !(MIN_CREDENTIAL_LENGTH..=MAX_CREDENTIAL_LENGTH).contains(&len) {
            return Err(Error::InvalidCredential(format!(
                "Credential must be {MIN_CREDENTIAL_LENGTH}-{MAX_CREDENTIAL_LENGTH} chars, got {len}"
            )));
        }

        if !value.bytes().all(|b| b.is_ascii_alphanumeric()) {
            return Err(Error::InvalidCredential(format!(
                "Credential must be ASCII alphanumeric: {value}"
            )));
        }

        Ok(CredentialId(value))
    }

    /// Get the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CredentialId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for CredentialId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        CredentialId::new(s)
    }
}

impl TryFrom<String> for CredentialId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        CredentialId::new(&value)
    }
}

impl From<CredentialId> for String {
    fn from(id: CredentialId) -> Self {
        id.0
    }
}

/// Constant-time comparison implementation for CredentialId
impl PartialEq for CredentialId {
    fn eq(&self, other: &Self) -> bool {
        self.0.as_bytes().ct_eq(other.0.as_bytes()).into()
    }
}

impl std::hash::Hash for CredentialId {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}

/// Logical identity of a reader (`"in"`, `"out"`, `"lobby-east"`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ReaderId(String);

impl ReaderId {
    /// Create a reader identifier.
    ///
    /// # Errors
    /// Returns `Error::InvalidReaderId` if the id is empty, longer than 32
    /// characters or contains whitespace.
    pub fn new(id: &str) -> Result<Self> {
        let id = id.trim();
        if id.is_empty() || id.len() > MAX_READER_ID_LENGTH {
            return Err(Error::InvalidReaderId(format!(
                "Reader id must be 1-{MAX_READER_ID_LENGTH} chars, got {}",
                id.len()
            )));
        }
        if id.chars().any(char::is_whitespace) {
            return Err(Error::InvalidReaderId(format!(
                "Reader id must not contain whitespace: {id:?}"
            )));
        }
        Ok(ReaderId(id.to_string()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ReaderId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for ReaderId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        ReaderId::new(s)
    }
}

impl TryFrom<String> for ReaderId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        ReaderId::new(&value)
    }
}

impl From<ReaderId> for String {
    fn from(id: ReaderId) -> Self {
        id.0
    }
}

/// Passage direction a reader or relay is bound to.
///
/// Serialized as `"in"` / `"out"` on the wire and in configuration files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// Side A of the gate.
    #[serde(rename = "in", alias = "entry", alias = "a")]
    Entry,
    /// Side B of the gate.
    #[serde(rename = "out", alias = "exit", alias = "b")]
    Exit,
}

impl Direction {
    /// Wire name of the direction.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Entry => "in",
            Direction::Exit => "out",
        }
    }

    /// Returns `true` if direction is Entry.
    #[inline]
    #[must_use]
    pub fn is_entry(self) -> bool {
        matches!(self, Direction::Entry)
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Direction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "in" | "entry" | "a" => Ok(Direction::Entry),
            "out" | "exit" | "b" => Ok(Direction::Exit),
            other => Err(Error::InvalidDirection(other.to_string())),
        }
    }
}

/// One accepted credential presentation.
///
/// Produced by a reader after normalization and debounce. Immutable once
/// created: fields are only reachable through accessors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CredentialEvent {
    credential_id: CredentialId,
    reader_id: ReaderId,
    direction: Direction,
    #[serde(with = "crate::types::hex_bytes")]
    raw_payload: Vec<u8>,
    observed_at: DateTime<Utc>,
}

impl CredentialEvent {
    /// Create an event observed now.
    pub fn new(
        credential_id: CredentialId,
        reader_id: ReaderId,
        direction: Direction,
        raw_payload: Vec<u8>,
    ) -> Self {
        Self::observed_at(credential_id, reader_id, direction, raw_payload, Utc::now())
    }

    /// Create an event with an explicit observation timestamp.
    pub fn observed_at(
        credential_id: CredentialId,
        reader_id: ReaderId,
        direction: Direction,
        raw_payload: Vec<u8>,
        observed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            credential_id,
            reader_id,
            direction,
            raw_payload,
            observed_at,
        }
    }

    #[must_use]
    pub fn credential_id(&self) -> &CredentialId {
        &self.credential_id
    }

    #[must_use]
    pub fn reader_id(&self) -> &ReaderId {
        &self.reader_id
    }

    #[must_use]
    pub fn direction(&self) -> Direction {
        self.direction
    }

    #[must_use]
    pub fn raw_payload(&self) -> &[u8] {
        &self.raw_payload
    }

    /// Raw payload as upper-case hex.
    #[must_use]
    pub fn raw_payload_hex(&self) -> String {
        hex_bytes::encode(&self.raw_payload)
    }

    #[must_use]
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.observed_at
    }
}

/// Who settled an access decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionSource {
    /// The remote authority replied in time.
    Remote,
    /// The local offline policy decided.
    LocalFallback,
}

impl fmt::Display for DecisionSource {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            DecisionSource::Remote => write!(f, "Remote"),
            DecisionSource::LocalFallback => write!(f, "LocalFallback"),
        }
    }
}

/// Outcome of deciding one [`CredentialEvent`].
///
/// Exactly one decision exists per event and it is never mutated after
/// creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthDecision {
    authorized: bool,
    message: String,
    source: DecisionSource,
    latency_ms: u32,
}

impl AuthDecision {
    /// Decision returned by the remote authority.
    pub fn remote(authorized: bool, message: impl Into<String>, latency_ms: u32) -> Self {
        Self {
            authorized,
            message: message.into(),
            source: DecisionSource::Remote,
            latency_ms,
        }
    }

    /// Decision taken by the local fallback policy.
    pub fn local_fallback(authorized: bool, message: impl Into<String>, latency_ms: u32) -> Self {
        Self {
            authorized,
            message: message.into(),
            source: DecisionSource::LocalFallback,
            latency_ms,
        }
    }

    #[must_use]
    pub fn is_authorized(&self) -> bool {
        self.authorized
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    #[must_use]
    pub fn source(&self) -> DecisionSource {
        self.source
    }

    #[must_use]
    pub fn latency_ms(&self) -> u32 {
        self.latency_ms
    }
}

/// Saturating conversion of an elapsed duration to whole milliseconds.
#[must_use]
pub fn elapsed_ms(elapsed: std::time::Duration) -> u32 {
    u32::try_from(elapsed.as_millis()).unwrap_or(u32::MAX)
}

/// Upper-case hex encoding used for raw payloads on disk and on the wire.
pub mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer, de::Error as _};

    /// Encode bytes as upper-case hex.
    #[must_use]
    pub fn encode(bytes: &[u8]) -> String {
        hex::encode_upper(bytes)
    }

    /// Decode a hex string (either case, surrounding whitespace ignored).
    ///
    /// # Errors
    /// Returns [`hex::FromHexError`] for an odd length or a non-hex character.
    pub fn decode(text: &str) -> Result<Vec<u8>, hex::FromHexError> {
        hex::decode(text.trim())
    }

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        decode(&text).map_err(D::Error::custom)
    }
}
