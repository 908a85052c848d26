//! In-process transport.
//!
//! Stands in for the broker in tests and in the offline demo. The
//! [`MemoryTransportHandle`] plays the authority's side: it sees every publish
//! attempt and can deliver replies back to the gate.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;
use tracing::trace;

use super::{INCOMING_CAPACITY, Incoming, IncomingMessage};
use crate::error::TransportError;

/// One publish attempt seen by the in-memory broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    /// `false` when the attempt was failed on purpose.
    pub delivered: bool,
}

#[derive(Debug)]
struct BrokerState {
    log: Vec<PublishedMessage>,
    failing_publishes: u32,
    connected: bool,
}

#[derive(Debug)]
struct Shared {
    state: Mutex<BrokerState>,
    published_tx: mpsc::UnboundedSender<PublishedMessage>,
}

impl Shared {
    fn state(&self) -> std::sync::MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Gate side of the in-memory broker.
#[derive(Debug, Clone)]
pub struct MemoryTransport {
    shared: Arc<Shared>,
}

/// Authority side of the in-memory broker.
#[derive(Debug)]
pub struct MemoryTransportHandle {
    shared: Arc<Shared>,
    incoming: mpsc::Sender<IncomingMessage>,
    published_rx: mpsc::UnboundedReceiver<PublishedMessage>,
}

impl MemoryTransport {
    /// A connected transport, its control handle, and its incoming stream.
    pub fn new() -> (Self, MemoryTransportHandle, Incoming) {
        let (published_tx, published_rx) = mpsc::unbounded_channel();
        let (incoming_tx, incoming_rx) = mpsc::channel(INCOMING_CAPACITY);
        let shared = Arc::new(Shared {
            state: Mutex::new(BrokerState {
                log: Vec::new(),
                failing_publishes: 0,
                connected: true,
            }),
            published_tx,
        });

        let handle = MemoryTransportHandle {
            shared: Arc::clone(&shared),
            incoming: incoming_tx,
            published_rx,
        };
        (Self { shared }, handle, incoming_rx)
    }

    pub async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        let message = {
            let mut state = self.shared.state();
            if !state.connected {
                return Err(TransportError::NotConnected);
            }
            if state.failing_publishes > 0 {
                state.failing_publishes -= 1;
                state.log.push(PublishedMessage {
                    topic: topic.to_string(),
                    payload,
                    delivered: false,
                });
                return Err(TransportError::publish_failed(topic, "simulated publish failure"));
            }
            let message = PublishedMessage {
                topic: topic.to_string(),
                payload,
                delivered: true,
            };
            state.log.push(message.clone());
            message
        };

        trace!(topic, bytes = message.payload.len(), "memory publish");
        // the handle may be gone; the log still has the message
        let _ = self.shared.published_tx.send(message);
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.shared.state().connected
    }

    pub fn disconnect(&self) {
        self.shared.state().connected = false;
    }
}

impl MemoryTransportHandle {
    /// Deliver a message to the gate as if it came from the broker.
    ///
    /// # Errors
    ///
    /// [`TransportError::Closed`] once the gate dropped its incoming stream.
    pub async fn deliver(&self, topic: &str, payload: impl Into<Vec<u8>>) -> Result<(), TransportError> {
        self.incoming
            .send(IncomingMessage {
                topic: topic.to_string(),
                payload: payload.into(),
            })
            .await
            .map_err(|_| TransportError::Closed)
    }

    /// Wait for the next successfully published message.
    pub async fn next_published(&mut self) -> Option<PublishedMessage> {
        self.published_rx.recv().await
    }

    /// Next successfully published message on `topic`, skipping others.
    pub async fn next_published_on(&mut self, topic: &str) -> Option<PublishedMessage> {
        while let Some(message) = self.published_rx.recv().await {
            if message.topic == topic {
                return Some(message);
            }
        }
        None
    }

    /// Every publish attempt so far, including failed ones, oldest first.
    pub fn published(&self) -> Vec<PublishedMessage> {
        self.shared.state().log.clone()
    }

    /// Payloads successfully published on `topic`, oldest first.
    pub fn delivered_on(&self, topic: &str) -> Vec<Vec<u8>> {
        self.shared
            .state()
            .log
            .iter()
            .filter(|m| m.delivered && m.topic == topic)
            .map(|m| m.payload.clone())
            .collect()
    }

    /// Fail the next `count` publish attempts.
    pub fn fail_next_publishes(&self, count: u32) {
        self.shared.state().failing_publishes = count;
    }

    pub fn set_connected(&self, connected: bool) {
        self.shared.state().connected = connected;
    }
}
