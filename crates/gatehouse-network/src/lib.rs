//! Link between the gate and its decision authority.
//!
//! - [`transport`]: MQTT (via `rumqttc`) and an in-memory broker behind
//!   [`AnyTransport`].
//! - [`AuthorizationClient`]: publishes a credential event and correlates
//!   the asynchronous reply by credential id, under a timeout.
//! - [`ConnectivityMonitor`]: periodic reachability probe; single writer of
//!   the Online/Offline state read through [`ConnectivityHandle`].

pub mod client;
pub mod error;
pub mod monitor;
pub mod transport;

pub use client::{AuthorizationClient, ReplyDisposition};
pub use error::{AuthError, TransportError};
pub use monitor::{
    AnyProbe, ConnectivityHandle, ConnectivityMonitor, ConnectivityState, ManualProbe, TcpProbe,
};
pub use transport::{
    AnyTransport, Incoming, IncomingMessage, MemoryTransport, MemoryTransportHandle, MqttConfig,
    MqttTransport, PublishedMessage,
};
