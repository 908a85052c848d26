//! Gate runtime: assembly, background tasks and the shutdown sequence.
//!
//! ```text
//! readers ──► ReaderMultiplexer ──► AccessController ──► RelayBank
//!                                        │
//!                               AccessDecisionPolicy
//!                          ┌─────────────┼──────────────┐
//!               AuthorizationClient  Connectivity   OfflineStore
//!                     │   ▲              Monitor         ▲
//!                 transport│reply dispatcher            DrainWorker
//! ```
//!
//! Shutdown order:
//!
//! 1. stop the readers, so no new events are accepted
//! 2. let the decision loop finish the event in flight
//! 3. force every relay to its safe level
//! 4. stop the drain worker, then one best-effort drain of the offline
//!    queue when online
//! 5. persist the queue and publish an `offline` status
//! 6. stop the background tasks and close the transport

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use gatehouse_hardware::devices::AnyUidReader;
use gatehouse_hardware::{
    CredentialReader, HardwareHandle, MultiplexerConfig, MultiplexerHandle, ReaderMultiplexer,
    ShutdownSummary,
};
use gatehouse_network::{
    AnyProbe, AnyTransport, AuthorizationClient, ConnectivityHandle, ConnectivityMonitor, Incoming,
};
use gatehouse_protocol::GateStatus;
use gatehouse_relay::{RelayActuator, RelayBank, RelayError};
use gatehouse_storage::{AccessDecisionPolicy, DrainReport, DrainWorker, OfflineStore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::config::GateConfig;
use crate::controller::AccessController;
use crate::error::{GateError, Result};
use crate::logger::{AccessLogger, Severity, SystemEventKind};

/// Physical side of the gate.
#[derive(Debug)]
pub struct GateDevices {
    pub hardware: HardwareHandle,
    /// Reader devices keyed by the reader id of the configuration.
    pub readers: HashMap<String, AnyUidReader>,
}

/// Link to the authority.
#[derive(Debug)]
pub struct GateLink {
    pub transport: AnyTransport,
    /// Messages received on the reply topic.
    pub incoming: Incoming,
    pub probe: AnyProbe,
}

/// What the shutdown sequence did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Events handled by the decision loop since start.
    pub processed: u64,
    pub readers: ShutdownSummary,
    /// Relays that could not be verified off.
    pub relays_not_off: Vec<String>,
    /// `None` when offline or nothing was queued.
    pub final_drain: Option<DrainReport>,
    /// Events left in the offline queue.
    pub pending: usize,
}

/// A running gate.
#[derive(Debug)]
pub struct Gate {
    config: GateConfig,
    client: AuthorizationClient,
    connectivity: ConnectivityHandle,
    store: OfflineStore,
    relays: RelayBank,
    drain: DrainWorker,
    drain_token: CancellationToken,
    drain_task: JoinHandle<()>,
    logger: Arc<dyn AccessLogger>,
    reader_token: CancellationToken,
    loop_token: CancellationToken,
    background: CancellationToken,
    decision_loop: JoinHandle<(MultiplexerHandle, u64)>,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl Gate {
    /// Validate `config`, build every component and start the tasks.
    ///
    /// # Errors
    ///
    /// Any configuration problem, a reader without a device, a relay pin
    /// that cannot be claimed, or an unusable queue configuration. Nothing
    /// keeps running when this fails.
    #[instrument(name = "gate_start", skip_all, fields(gate_id = %config.gate.id))]
    pub async fn start(
        config: GateConfig,
        devices: GateDevices,
        link: GateLink,
        logger: Arc<dyn AccessLogger>,
    ) -> Result<Self> {
        config.validate()?;
        let topics = config.topics()?;
        let GateDevices {
            hardware,
            readers: mut reader_devices,
        } = devices;

        let relays = build_relays(&config, &hardware)?;

        let mut multiplexer = ReaderMultiplexer::new(MultiplexerConfig::default());
        for reader_config in config.reader_configs()? {
            let id = reader_config.reader_id.to_string();
            let device = reader_devices
                .remove(&id)
                .ok_or_else(|| GateError::MissingReader(id.clone()))?;
            multiplexer.register(CredentialReader::new(reader_config, device, &hardware));
        }
        if !reader_devices.is_empty() {
            warn!(
                unused = ?reader_devices.keys().collect::<Vec<_>>(),
                "reader devices without configuration are ignored"
            );
        }

        let store = OfflineStore::open(config.store_config()).await?;
        let client = AuthorizationClient::new(link.transport, topics, config.auth_timeout());
        client.set_pending_sync(store.len().await);

        let background = CancellationToken::new();
        let mut tasks = Vec::new();
        tasks.push((
            "reply_dispatcher",
            client.spawn_reply_dispatcher(link.incoming, background.child_token()),
        ));

        let (monitor, connectivity) = ConnectivityMonitor::new(link.probe, config.probe_interval());
        tasks.push(("connectivity_monitor", tokio::spawn(monitor.run(background.child_token()))));
        tasks.push((
            "connectivity_watcher",
            tokio::spawn(watch_connectivity(
                connectivity.clone(),
                client.clone(),
                Arc::clone(&logger),
                background.child_token(),
            )),
        ));

        let drain = DrainWorker::new(
            store.clone(),
            client.clone(),
            connectivity.clone(),
            config.drain_config(),
        );
        let drain_token = background.child_token();
        let drain_task = tokio::spawn(drain.clone().run(drain_token.clone()));

        let policy = AccessDecisionPolicy::new(
            client.clone(),
            connectivity.clone(),
            store.clone(),
            config.offline.fallback,
        );
        let controller = AccessController::new(policy, relays.clone(), Arc::clone(&logger));

        let reader_count = multiplexer.reader_count();
        let mut events = multiplexer.start();
        let reader_token = events.reader_token();
        let loop_token = CancellationToken::new();
        let decision_loop = {
            let cancel = loop_token.clone();
            tokio::spawn(async move {
                let processed = controller.run(&mut events, cancel).await;
                (events, processed)
            })
        };

        let message = format!(
            "gate {} started with {} readers and {} relays",
            config.gate.id,
            reader_count,
            relays.len()
        );
        info!(readers = reader_count, relays = relays.len(), "gate started");
        logger.record_system_event(SystemEventKind::Startup, &message, Severity::Info);

        Ok(Self {
            config,
            client,
            connectivity,
            store,
            relays,
            drain,
            drain_token,
            drain_task,
            logger,
            reader_token,
            loop_token,
            background,
            decision_loop,
            tasks,
        })
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    pub fn client(&self) -> &AuthorizationClient {
        &self.client
    }

    pub fn connectivity(&self) -> &ConnectivityHandle {
        &self.connectivity
    }

    pub fn store(&self) -> &OfflineStore {
        &self.store
    }

    pub fn relays(&self) -> &RelayBank {
        &self.relays
    }

    /// Open one relay on request of an external command channel.
    ///
    /// # Errors
    ///
    /// [`RelayError::UnknownRelay`] or the actuator's failure.
    pub async fn manual_open(
        &self,
        relay_id: &str,
        duration: Option<Duration>,
    ) -> std::result::Result<(), RelayError> {
        info!(relay_id, "manual open requested");
        self.relays.activate(relay_id, duration).await
    }

    /// Run one drain cycle now.
    pub async fn drain_now(&self) -> DrainReport {
        self.drain.drain_now().await
    }

    /// Stop the gate in safe order.
    #[instrument(name = "gate_shutdown", skip_all, fields(gate_id = %self.config.gate.id))]
    pub async fn shutdown(self) -> ShutdownReport {
        info!("gate shutting down");
        self.logger
            .record_system_event(SystemEventKind::Shutdown, "shutdown requested", Severity::Info);

        self.reader_token.cancel();
        self.loop_token.cancel();
        let (readers, processed) = match self.decision_loop.await {
            Ok((events, processed)) => (events.shutdown().await, processed),
            Err(e) => {
                error!(error = %e, "decision loop ended abnormally");
                (ShutdownSummary::default(), 0)
            }
        };
        if readers.errored > 0 || readers.panicked > 0 {
            self.logger.record_system_event(
                SystemEventKind::ReaderFault,
                &format!(
                    "{} readers failed, {} panicked",
                    readers.errored, readers.panicked
                ),
                Severity::Warning,
            );
        }

        let relays_not_off = self.relays.emergency_stop().await;
        if !relays_not_off.is_empty() {
            self.logger.record_system_event(
                SystemEventKind::RelayFault,
                &format!("relays not verified off: {}", relays_not_off.join(", ")),
                Severity::Error,
            );
        }

        self.drain_token.cancel();
        if let Err(e) = self.drain_task.await {
            warn!(task = "drain_worker", error = %e, "background task ended abnormally");
        }
        let final_drain = if self.connectivity.is_online() && !self.store.is_empty().await {
            debug!("final drain");
            Some(self.drain.drain_now().await)
        } else {
            None
        };

        if let Err(e) = self.store.persist().await {
            error!(error = %e, "offline queue not persisted at shutdown");
            self.logger.record_system_event(
                SystemEventKind::QueuePersistence,
                &format!("offline queue not persisted: {e}"),
                Severity::Error,
            );
        }
        let pending = self.store.len().await;
        self.client.set_pending_sync(pending);
        self.client.publish_status(GateStatus::Offline).await;
        self.client.abandon_pending();

        self.background.cancel();
        for (name, task) in self.tasks {
            if let Err(e) = task.await {
                warn!(task = name, error = %e, "background task ended abnormally");
            }
        }
        self.client.transport().disconnect().await;

        info!(processed, pending, "gate stopped");
        self.logger.record_system_event(
            SystemEventKind::Shutdown,
            &format!("gate stopped, {pending} events pending sync"),
            Severity::Info,
        );

        ShutdownReport {
            processed,
            readers,
            relays_not_off,
            final_drain,
            pending,
        }
    }
}

fn build_relays(config: &GateConfig, hardware: &HardwareHandle) -> Result<RelayBank> {
    let mut bank = RelayBank::builder();
    for (relay_config, direction) in config.relay_configs() {
        let relay = RelayActuator::new(relay_config, hardware)?;
        bank = bank.add(relay, direction)?;
    }
    Ok(bank.build())
}

/// Report connectivity changes and announce the gate when it comes online.
#[instrument(name = "connectivity_watcher", skip_all)]
async fn watch_connectivity(
    mut connectivity: ConnectivityHandle,
    client: AuthorizationClient,
    logger: Arc<dyn AccessLogger>,
    cancel: CancellationToken,
) {
    let mut online = connectivity.is_online();
    loop {
        let state = tokio::select! {
            _ = cancel.cancelled() => break,
            state = connectivity.changed() => match state {
                Some(state) => state,
                None => break,
            },
        };
        if state.online == online {
            continue;
        }
        online = state.online;

        if online {
            client.publish_status(GateStatus::Online).await;
            logger.record_system_event(
                SystemEventKind::ConnectivityChanged,
                "authority reachable, gate online",
                Severity::Info,
            );
        } else {
            logger.record_system_event(
                SystemEventKind::ConnectivityChanged,
                "authority unreachable, gate offline",
                Severity::Warning,
            );
        }
    }
}
