//! Reachability of the decision authority.
//!
//! ```text
//!            probe ok
//!   Offline ─────────► Online   (drain signal fired)
//!      ▲                 │
//!      └──── probe failed┘
//! ```
//!
//! The [`ConnectivityMonitor`] is the only writer of [`ConnectivityState`].
//! Everyone else holds a [`ConnectivityHandle`], which can read the state,
//! wait for changes, and wait for the drain signal.
//!
//! A probe is one bounded attempt. A failed probe is the normal way of
//! learning that the gate is offline, so it is logged at debug level and
//! never raised as an error.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use gatehouse_core::constants::{DEFAULT_PROBE_INTERVAL, DEFAULT_PROBE_TIMEOUT};
use tokio::net::TcpStream;
use tokio::sync::{Notify, watch};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Last known reachability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectivityState {
    pub online: bool,
    /// `None` until the first probe completes.
    pub last_checked_at: Option<DateTime<Utc>>,
}

impl ConnectivityState {
    fn initial() -> Self {
        Self {
            online: false,
            last_checked_at: None,
        }
    }
}

/// TCP connect to the authority endpoint.
#[derive(Debug, Clone)]
pub struct TcpProbe {
    endpoint: String,
    timeout: Duration,
}

impl TcpProbe {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn probe(&self) -> bool {
        match tokio::time::timeout(self.timeout, TcpStream::connect(&self.endpoint)).await {
            Ok(Ok(_stream)) => true,
            Ok(Err(e)) => {
                debug!(endpoint = %self.endpoint, error = %e, "probe failed");
                false
            }
            Err(_) => {
                debug!(
                    endpoint = %self.endpoint,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "probe timed out"
                );
                false
            }
        }
    }
}

/// Probe whose result is set by hand.
#[derive(Debug, Clone, Default)]
pub struct ManualProbe {
    reachable: Arc<AtomicBool>,
}

impl ManualProbe {
    pub fn new(reachable: bool) -> Self {
        Self {
            reachable: Arc::new(AtomicBool::new(reachable)),
        }
    }

    /// Result of the following probes.
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::Release);
    }

    fn probe(&self) -> bool {
        self.reachable.load(Ordering::Acquire)
    }
}

/// Probe selected at startup.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum AnyProbe {
    Tcp(TcpProbe),
    Manual(ManualProbe),
}

impl AnyProbe {
    /// One bounded reachability check.
    pub async fn probe(&self) -> bool {
        match self {
            AnyProbe::Tcp(p) => p.probe().await,
            AnyProbe::Manual(p) => p.probe(),
        }
    }
}

/// Read side of the connectivity state.
#[derive(Debug, Clone)]
pub struct ConnectivityHandle {
    state: watch::Receiver<ConnectivityState>,
    drain: Arc<Notify>,
}

impl ConnectivityHandle {
    pub fn state(&self) -> ConnectivityState {
        *self.state.borrow()
    }

    pub fn is_online(&self) -> bool {
        self.state.borrow().online
    }

    /// Wait for the next state change.
    ///
    /// Returns `None` once the monitor is gone.
    pub async fn changed(&mut self) -> Option<ConnectivityState> {
        self.state.changed().await.ok()?;
        Some(*self.state.borrow_and_update())
    }

    /// Wait until the gate comes back online.
    pub async fn drain_requested(&self) {
        self.drain.notified().await;
    }
}

/// Periodic reachability prober. Sole writer of [`ConnectivityState`].
#[derive(Debug)]
pub struct ConnectivityMonitor {
    probe: AnyProbe,
    interval: Duration,
    state: watch::Sender<ConnectivityState>,
    drain: Arc<Notify>,
}

impl ConnectivityMonitor {
    /// Monitor starting Offline until the first probe.
    pub fn new(probe: AnyProbe, interval: Duration) -> (Self, ConnectivityHandle) {
        let (state, rx) = watch::channel(ConnectivityState::initial());
        let drain = Arc::new(Notify::new());
        let handle = ConnectivityHandle {
            state: rx,
            drain: Arc::clone(&drain),
        };
        (
            Self {
                probe,
                interval,
                state,
                drain,
            },
            handle,
        )
    }

    /// Monitor with the default probe interval.
    pub fn with_default_interval(probe: AnyProbe) -> (Self, ConnectivityHandle) {
        Self::new(probe, DEFAULT_PROBE_INTERVAL)
    }

    /// Another read handle.
    pub fn handle(&self) -> ConnectivityHandle {
        ConnectivityHandle {
            state: self.state.subscribe(),
            drain: Arc::clone(&self.drain),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Probe once and publish the result. Returns the new `online` value.
    pub async fn probe_now(&self) -> bool {
        let online = self.probe.probe().await;
        let checked_at = Utc::now();
        let was_online = self.state.borrow().online;

        self.state.send_modify(|state| {
            state.online = online;
            state.last_checked_at = Some(checked_at);
        });

        match (was_online, online) {
            (false, true) => {
                info!("authority reachable, gate online");
                self.drain.notify_one();
            }
            (true, false) => warn!("authority unreachable, gate offline"),
            _ => {}
        }
        online
    }

    /// Probe immediately, then every interval, until `cancel` fires.
    #[instrument(name = "connectivity_monitor", skip_all, fields(interval_ms = self.interval.as_millis() as u64))]
    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.probe_now().await;
                }
            }
        }
        debug!("connectivity monitor stopped");
    }
}
