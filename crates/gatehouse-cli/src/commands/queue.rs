//! `queue` subcommands.
//!
//! Operate on the persisted queue file of the configured gate. Run them while
//! the gate is stopped: a running gate rewrites the file on every change.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use gatehouse_network::{AuthorizationClient, ConnectivityMonitor, MqttTransport};
use gatehouse_storage::{DrainWorker, OfflineStore, QueuedEvent};
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::{join_event_loop, load_config, runtime};

/// How long `sync` waits for the broker session.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

async fn open_store(path: &Path) -> Result<(OfflineStore, String)> {
    let config = load_config(path)?;
    let location = config.offline.queue_file.display().to_string();
    let store = OfflineStore::open(config.store_config())
        .await
        .with_context(|| format!("failed to open offline queue {location}"))?;
    Ok((store, location))
}

pub fn status(path: &Path) -> Result<()> {
    runtime()?.block_on(async {
        let (store, location) = open_store(path).await?;
        let stats = store.stats().await;
        println!("queue file: {location}");
        println!("pending:    {} of {}", stats.pending, stats.max_size);
        if let Some(oldest) = store.snapshot().await.first() {
            println!("oldest:     {}", oldest.enqueued_at().to_rfc3339());
        }
        Ok(())
    })
}

pub fn show(path: &Path, json: bool) -> Result<()> {
    runtime()?.block_on(async {
        let (store, _) = open_store(path).await?;
        let items = store.snapshot().await;
        if json {
            println!(
                "{}",
                serde_json::to_string_pretty(&items).context("failed to encode queue")?
            );
            return Ok(());
        }
        if items.is_empty() {
            println!("offline queue is empty");
        }
        for item in &items {
            println!("{}", describe(item));
        }
        Ok(())
    })
}

pub fn clear(path: &Path) -> Result<()> {
    runtime()?.block_on(async {
        let (store, location) = open_store(path).await?;
        let cleared = store.clear().await;
        store
            .persist()
            .await
            .with_context(|| format!("failed to rewrite {location}"))?;
        println!("dropped {cleared} queued events");
        Ok(())
    })
}

pub fn export(path: &Path, destination: &Path) -> Result<()> {
    runtime()?.block_on(async {
        let (store, _) = open_store(path).await?;
        let exported = store
            .export(destination)
            .await
            .with_context(|| format!("failed to export to {}", destination.display()))?;
        println!("exported {exported} events to {}", destination.display());
        Ok(())
    })
}

/// Connect, drain once and persist what is left.
pub fn sync(path: &Path) -> Result<()> {
    let config = load_config(path)?;
    runtime()?.block_on(async move {
        let store = OfflineStore::open(config.store_config())
            .await
            .context("failed to open offline queue")?;
        if store.is_empty().await {
            println!("offline queue is empty");
            return Ok(());
        }

        let (monitor, connectivity) = ConnectivityMonitor::new(config.probe(), config.probe_interval());
        if !monitor.probe_now().await {
            bail!("broker {} is unreachable", config.mqtt_config().endpoint());
        }

        let cancel = CancellationToken::new();
        let topics = config.topics()?;
        let (transport, _incoming, event_loop) = MqttTransport::start(
            &config.mqtt_config(),
            vec![topics.reply().to_string()],
            cancel.child_token(),
        );
        let client = AuthorizationClient::new(transport.clone().into(), topics, config.auth_timeout());

        let connected = tokio::time::timeout(CONNECT_TIMEOUT, async {
            while !transport.is_connected() {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        })
        .await;
        if connected.is_err() {
            cancel.cancel();
            join_event_loop(event_loop).await;
            bail!("no broker session within {}s", CONNECT_TIMEOUT.as_secs());
        }

        let worker = DrainWorker::new(store.clone(), client.clone(), connectivity, config.drain_config());
        let report = worker.drain_now().await;
        info!(synced = report.synced, remaining = report.remaining, "manual sync finished");

        client.transport().disconnect().await;
        cancel.cancel();
        join_event_loop(event_loop).await;
        store.persist().await.context("failed to persist offline queue")?;

        println!(
            "synced {} events, {} remaining{}",
            report.synced,
            report.remaining,
            if report.failed { " (stopped at a failed publish)" } else { "" }
        );
        Ok(())
    })
}

fn describe(item: &QueuedEvent) -> String {
    let event = item.event();
    let decision = item.decision();
    format!(
        "#{} {} {} {} via {} {} (sync attempts {})",
        item.id(),
        item.enqueued_at().to_rfc3339(),
        event.credential_id(),
        event.direction(),
        event.reader_id(),
        if decision.is_authorized() { "granted" } else { "denied" },
        item.sync_attempts()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use gatehouse_core::{AuthDecision, CredentialEvent, CredentialId, Direction, ReaderId};
    use gatehouse_storage::OfflineStoreConfig;

    #[tokio::test]
    async fn test_describe_queued_event() {
        let store = OfflineStore::open(OfflineStoreConfig::in_memory(4)).await.unwrap();
        store
            .enqueue(
                CredentialEvent::new(
                    CredentialId::new("AABBCC").unwrap(),
                    ReaderId::new("in").unwrap(),
                    Direction::Entry,
                    vec![0xAA, 0xBB, 0xCC],
                ),
                AuthDecision::local_fallback(false, "Offline access denied", 0),
            )
            .await;

        let line = describe(&store.snapshot().await[0]);
        assert!(line.contains("AABBCC in via in denied"));
        assert!(line.ends_with("(sync attempts 0)"));
    }
}
