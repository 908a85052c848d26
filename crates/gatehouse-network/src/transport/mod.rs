//! Publish/subscribe transports.
//!
//! The authorization client only needs two things from a transport: publish
//! a payload on a topic, and a stream of incoming messages. Incoming
//! messages arrive on an [`Incoming`] channel created together with the
//! transport, so the dispatcher task owns the receiving side outright.

pub mod memory;
pub mod mqtt;

use tokio::sync::mpsc;

use crate::error::TransportError;

pub use memory::{MemoryTransport, MemoryTransportHandle, PublishedMessage};
pub use mqtt::{MqttConfig, MqttTransport};

/// Capacity of the incoming-message channel.
pub const INCOMING_CAPACITY: usize = 64;

/// One message received from the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Receiving side of a transport.
pub type Incoming = mpsc::Receiver<IncomingMessage>;

/// Transport selected at startup.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum AnyTransport {
    Mqtt(MqttTransport),
    Memory(MemoryTransport),
}

impl AnyTransport {
    /// Publish `payload` on `topic`.
    ///
    /// # Errors
    ///
    /// [`TransportError::NotConnected`] while the broker link is down, or
    /// [`TransportError::PublishFailed`] if the transport refuses the message.
    pub async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        match self {
            AnyTransport::Mqtt(t) => t.publish(topic, payload).await,
            AnyTransport::Memory(t) => t.publish(topic, payload).await,
        }
    }

    pub fn is_connected(&self) -> bool {
        match self {
            AnyTransport::Mqtt(t) => t.is_connected(),
            AnyTransport::Memory(t) => t.is_connected(),
        }
    }

    /// Close the link to the broker.
    pub async fn disconnect(&self) {
        match self {
            AnyTransport::Mqtt(t) => t.disconnect().await,
            AnyTransport::Memory(t) => t.disconnect(),
        }
    }
}

impl From<MqttTransport> for AnyTransport {
    fn from(transport: MqttTransport) -> Self {
        AnyTransport::Mqtt(transport)
    }
}

impl From<MemoryTransport> for AnyTransport {
    fn from(transport: MemoryTransport) -> Self {
        AnyTransport::Memory(transport)
    }
}
