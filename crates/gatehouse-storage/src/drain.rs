//! Background reconciliation of the offline queue.
//!
//! The worker wakes on a fixed interval and whenever the connectivity monitor
//! reports the gate back online. While online it drains the queue through
//! [`AuthorizationClient::publish_sync`], republishing each event with its
//! offline annotation. Consecutive failed cycles stretch the interval with
//! the shared backoff policy, up to a cap; a good cycle resets it.

use std::time::Duration;

use gatehouse_core::constants::{DEFAULT_DRAIN_INTERVAL, MAX_DRAIN_INTERVAL};
use gatehouse_core::retry::BackoffPolicy;
use gatehouse_network::{AuthorizationClient, ConnectivityHandle};
use gatehouse_protocol::AuthRequest;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::queue::{DrainReport, OfflineStore, QueuedEvent};

/// Drain worker settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrainConfig {
    pub enabled: bool,
    pub interval: Duration,
    /// Upper bound of the stretched interval after failures.
    pub max_interval: Duration,
}

impl Default for DrainConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: DEFAULT_DRAIN_INTERVAL,
            max_interval: MAX_DRAIN_INTERVAL,
        }
    }
}

impl DrainConfig {
    fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy {
            first: self.interval,
            max: self.max_interval.max(self.interval),
            factor: 2.0,
        }
    }
}

/// Republishes queued events to the authority.
#[derive(Debug, Clone)]
pub struct DrainWorker {
    store: OfflineStore,
    client: AuthorizationClient,
    connectivity: ConnectivityHandle,
    config: DrainConfig,
}

impl DrainWorker {
    pub fn new(
        store: OfflineStore,
        client: AuthorizationClient,
        connectivity: ConnectivityHandle,
        config: DrainConfig,
    ) -> Self {
        Self {
            store,
            client,
            connectivity,
            config,
        }
    }

    /// Run one drain cycle now, whatever the connectivity state.
    pub async fn drain_now(&self) -> DrainReport {
        let client = &self.client;
        let report = self
            .store
            .drain_once(|item: QueuedEvent| {
                let request = AuthRequest::offline_sync(
                    item.event(),
                    item.decision(),
                    item.enqueued_at(),
                    item.sync_attempts(),
                );
                async move { client.publish_sync(&request).await }
            })
            .await;
        self.client.set_pending_sync(report.remaining);
        report
    }

    /// Drain periodically and on reconnect until `cancel` fires.
    #[instrument(name = "drain_worker", skip_all)]
    pub async fn run(self, cancel: CancellationToken) {
        if !self.config.enabled {
            info!("offline drain disabled, events are only persisted");
            cancel.cancelled().await;
            return;
        }

        let backoff = self.config.backoff();
        let mut failures: u32 = 0;
        let mut delay = self.config.interval;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
                _ = self.connectivity.drain_requested() => {
                    debug!("drain requested by reconnect");
                }
            }

            if !self.connectivity.is_online() {
                failures = 0;
                delay = self.config.interval;
                continue;
            }
            if self.store.is_empty().await {
                continue;
            }

            let report = self.drain_now().await;
            if report.failed {
                delay = backoff.next(failures + 1);
                failures = failures.saturating_add(1);
                debug!(failures, next_in_ms = delay.as_millis() as u64, "drain cycle failed");
            } else {
                failures = 0;
                delay = self.config.interval;
            }
        }
        debug!("drain worker stopped");
    }
}
