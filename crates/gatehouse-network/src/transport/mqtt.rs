//! MQTT transport over `rumqttc`.
//!
//! ```text
//!   MqttTransport::publish ──try_publish──► AsyncClient ──► EventLoop ──► broker
//!                                                              │
//!   Incoming (mpsc) ◄──────── Publish packets ─────────────────┘
//! ```
//!
//! The event loop runs in its own task. It re-subscribes on every ConnAck
//! (sessions are clean) and backs off between reconnect attempts. Publishing
//! never waits on the broker: while the link is down it fails fast with
//! [`TransportError::NotConnected`] so the decision path can fall back.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use gatehouse_core::constants::{DEFAULT_MQTT_KEEP_ALIVE, DEFAULT_MQTT_PORT};
use gatehouse_core::retry::BackoffPolicy;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS, Transport};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

use super::{INCOMING_CAPACITY, Incoming, IncomingMessage};
use crate::error::TransportError;

/// Outgoing request buffer between the client and its event loop.
const REQUEST_CAPACITY: usize = 64;

/// How long the event loop keeps flushing after a disconnect request.
const DISCONNECT_GRACE: Duration = Duration::from_secs(1);

/// Broker connection settings.
#[derive(Debug, Clone, PartialEq)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub tls: bool,
    pub keep_alive: Duration,
    /// Spacing of reconnect attempts after the link drops.
    pub reconnect: BackoffPolicy,
}

impl MqttConfig {
    pub fn new(host: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_MQTT_PORT,
            client_id: client_id.into(),
            username: None,
            password: None,
            tls: false,
            keep_alive: DEFAULT_MQTT_KEEP_ALIVE,
            reconnect: BackoffPolicy {
                first: Duration::from_secs(1),
                max: Duration::from_secs(30),
                factor: 2.0,
            },
        }
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    pub fn tls(mut self, tls: bool) -> Self {
        self.tls = tls;
        self
    }

    pub fn keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    /// `host:port`, as used by the reachability probe.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    fn options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(&self.client_id, &self.host, self.port);
        options.set_keep_alive(self.keep_alive);
        options.set_clean_session(true);
        if let (Some(username), Some(password)) = (&self.username, &self.password) {
            options.set_credentials(username, password);
        }
        if self.tls {
            options.set_transport(Transport::tls_with_default_config());
        }
        options
    }
}

/// Publishing side of an MQTT connection.
#[derive(Debug, Clone)]
pub struct MqttTransport {
    client: AsyncClient,
    connected: Arc<AtomicBool>,
}

impl MqttTransport {
    /// Start the connection.
    ///
    /// Returns the transport, the stream of messages received on
    /// `subscriptions`, and the event-loop task, which ends when `cancel`
    /// fires.
    pub fn start(
        config: &MqttConfig,
        subscriptions: Vec<String>,
        cancel: CancellationToken,
    ) -> (Self, Incoming, JoinHandle<()>) {
        let (client, eventloop) = AsyncClient::new(config.options(), REQUEST_CAPACITY);
        let (incoming_tx, incoming_rx) = mpsc::channel(INCOMING_CAPACITY);
        let connected = Arc::new(AtomicBool::new(false));

        info!(
            broker = %config.endpoint(),
            client_id = %config.client_id,
            tls = config.tls,
            "starting MQTT connection"
        );

        let task = tokio::spawn(run_event_loop(
            eventloop,
            client.clone(),
            EventLoopContext {
                broker: config.endpoint(),
                subscriptions,
                connected: Arc::clone(&connected),
                incoming: incoming_tx,
                reconnect: config.reconnect,
            },
            cancel,
        ));

        (Self { client, connected }, incoming_rx, task)
    }

    pub async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        self.client
            .try_publish(topic, QoS::AtLeastOnce, false, payload)
            .map_err(|e| TransportError::publish_failed(topic, e.to_string()))
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub async fn disconnect(&self) {
        self.connected.store(false, Ordering::Release);
        if let Err(e) = self.client.try_disconnect() {
            debug!(error = %e, "disconnect request not queued");
        }
    }
}

struct EventLoopContext {
    broker: String,
    subscriptions: Vec<String>,
    connected: Arc<AtomicBool>,
    incoming: mpsc::Sender<IncomingMessage>,
    reconnect: BackoffPolicy,
}

#[instrument(name = "mqtt_event_loop", skip_all, fields(broker = %ctx.broker))]
async fn run_event_loop(
    mut eventloop: EventLoop,
    client: AsyncClient,
    ctx: EventLoopContext,
    cancel: CancellationToken,
) {
    let mut failures: u32 = 0;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("shutdown signal received");
                break;
            }
            event = eventloop.poll() => match event {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    failures = 0;
                    ctx.connected.store(true, Ordering::Release);
                    info!("connected to MQTT broker");
                    for topic in &ctx.subscriptions {
                        if let Err(e) = client.try_subscribe(topic, QoS::AtLeastOnce) {
                            warn!(%topic, error = %e, "subscribe request not queued");
                        }
                    }
                }
                Ok(Event::Incoming(Packet::SubAck(_))) => {
                    debug!("subscription acknowledged");
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    trace!(topic = %publish.topic, bytes = publish.payload.len(), "message received");
                    let message = IncomingMessage {
                        topic: publish.topic.clone(),
                        payload: publish.payload.to_vec(),
                    };
                    if ctx.incoming.send(message).await.is_err() {
                        debug!("incoming stream closed, message dropped");
                    }
                }
                Ok(Event::Incoming(Packet::Disconnect)) => {
                    ctx.connected.store(false, Ordering::Release);
                    warn!("broker closed the connection");
                }
                Ok(_) => {}
                Err(e) => {
                    ctx.connected.store(false, Ordering::Release);
                    let delay = ctx.reconnect.next(failures);
                    failures = failures.saturating_add(1);
                    warn!(
                        error = %e,
                        attempt = failures,
                        retry_in_ms = delay.as_millis() as u64,
                        "MQTT connection error"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    // flush queued publishes (the offline heartbeat) before leaving
    ctx.connected.store(false, Ordering::Release);
    let _ = client.try_disconnect();
    let _ = tokio::time::timeout(DISCONNECT_GRACE, async {
        while eventloop.poll().await.is_ok() {}
    })
    .await;
    info!("MQTT connection closed");
}
