//! `run`: a gate on simulated hardware.
//!
//! Readers and relays are simulated, the broker is real. Each stdin line
//! `<reader_id> <uid-hex>` presents a card to that reader. `ctrl-c` runs the
//! shutdown sequence.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use gatehouse_controller::{Gate, GateDevices, GateLink, ShutdownReport, TracingAccessLogger};
use gatehouse_core::hex_bytes;
use gatehouse_hardware::HardwareHandle;
use gatehouse_hardware::devices::AnyUidReader;
use gatehouse_hardware::mock::{MockReader, MockReaderHandle};
use gatehouse_network::MqttTransport;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::{join_event_loop, load_config, runtime};

pub fn run(path: &Path) -> Result<()> {
    let config = load_config(path)?;
    runtime()?.block_on(async move {
        let (hardware, _gpio) = HardwareHandle::simulated();
        let mut readers = HashMap::new();
        let mut cards = HashMap::new();
        for reader in &config.readers {
            let (device, handle) = MockReader::new(&reader.id, reader.bus, reader.chip_select);
            readers.insert(reader.id.clone(), AnyUidReader::from(device));
            cards.insert(reader.id.clone(), handle);
        }

        let cancel = CancellationToken::new();
        let topics = config.topics()?;
        let (transport, incoming, event_loop) = MqttTransport::start(
            &config.mqtt_config(),
            vec![topics.reply().to_string()],
            cancel.child_token(),
        );
        let probe = config.probe();

        let gate = Gate::start(
            config,
            GateDevices { hardware, readers },
            GateLink {
                transport: transport.into(),
                incoming,
                probe,
            },
            Arc::new(TracingAccessLogger),
        )
        .await
        .context("failed to start gate")?;
        println!("gate running; type `<reader_id> <uid-hex>` to present a card, ctrl-c to stop");

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut stdin_open = true;
        loop {
            tokio::select! {
                signal = tokio::signal::ctrl_c() => {
                    signal.context("failed to listen for ctrl-c")?;
                    break;
                }
                line = lines.next_line(), if stdin_open => match line {
                    Ok(Some(line)) => {
                        if let Err(e) = present(&cards, &line).await {
                            warn!(error = %e, "card not presented");
                        }
                    }
                    Ok(None) => {
                        info!("stdin closed, waiting for ctrl-c");
                        stdin_open = false;
                    }
                    Err(e) => {
                        warn!(error = %e, "stdin read failed");
                        stdin_open = false;
                    }
                },
            }
        }

        let report = gate.shutdown().await;
        cancel.cancel();
        join_event_loop(event_loop).await;
        print_report(&report);
        Ok(())
    })
}

async fn present(cards: &HashMap<String, MockReaderHandle>, line: &str) -> Result<()> {
    let Some((reader_id, uid)) = parse_line(line)? else {
        return Ok(());
    };
    let card = cards
        .get(reader_id)
        .ok_or_else(|| anyhow!("unknown reader {reader_id:?}"))?;
    card.present(uid).await?;
    Ok(())
}

/// Split `<reader_id> <uid-hex>`. Blank lines and `#` comments yield `None`.
fn parse_line(line: &str) -> Result<Option<(&str, Vec<u8>)>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    let mut parts = line.split_whitespace();
    let (Some(reader_id), Some(uid), None) = (parts.next(), parts.next(), parts.next()) else {
        return Err(anyhow!("expected `<reader_id> <uid-hex>`, got {line:?}"));
    };
    let uid = hex_bytes::decode(uid).with_context(|| format!("bad uid {uid:?}"))?;
    if uid.is_empty() {
        return Err(anyhow!("empty uid"));
    }
    Ok(Some((reader_id, uid)))
}

fn print_report(report: &ShutdownReport) {
    println!("processed {} events", report.processed);
    println!(
        "readers: {} stopped, {} errored, {} panicked",
        report.readers.stopped, report.readers.errored, report.readers.panicked
    );
    if !report.relays_not_off.is_empty() {
        println!("relays not verified off: {}", report.relays_not_off.join(", "));
    }
    if let Some(drain) = &report.final_drain {
        println!("final drain synced {} events", drain.synced);
    }
    println!("{} events pending sync", report.pending);
}
