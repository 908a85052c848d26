//! Wire protocol between a gate and its decision authority.
//!
//! Messages are JSON over a publish/subscribe transport, on three topics
//! scoped to the gate (see [`TopicSet`]). All decoding goes through
//! [`WireMessage::decode`], which validates the message before handing it out.

pub mod error;
pub mod message;
pub mod topic;

pub use error::{ProtocolError, Result};
pub use message::{
    AuthReply, AuthRequest, GateStatus, MAX_MESSAGE_LENGTH, OfflineAnnotation, StatusMessage,
    WireMessage,
};
pub use topic::{TopicKind, TopicSet};
