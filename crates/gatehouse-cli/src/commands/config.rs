//! `check-config` and `probe`.

use std::path::Path;

use anyhow::{Result, bail};
use gatehouse_controller::GateConfig;

use super::{load_config, runtime};

/// Validate the configuration and print what the gate would run with.
pub fn check(path: &Path) -> Result<()> {
    let config = load_config(path)?;
    print!("{}", summary(&config));
    println!("configuration OK");
    Ok(())
}

/// Probe the broker endpoint once.
pub fn probe(path: &Path) -> Result<()> {
    let config = load_config(path)?;
    let endpoint = config.mqtt_config().endpoint();

    let reachable = runtime()?.block_on(async { config.probe().probe().await });
    if !reachable {
        bail!("broker {endpoint} is unreachable");
    }
    println!("broker {endpoint} is reachable");
    Ok(())
}

fn summary(config: &GateConfig) -> String {
    let mut out = String::new();
    let mqtt = config.mqtt_config();
    out.push_str(&format!("gate:      {}\n", config.gate.id));
    out.push_str(&format!(
        "broker:    {} (client id {}, tls {})\n",
        mqtt.endpoint(),
        mqtt.client_id,
        mqtt.tls
    ));
    out.push_str(&format!(
        "offline:   fallback {:?}, queue {} (max {})\n",
        config.offline.fallback,
        config.offline.queue_file.display(),
        config.offline.max_queue_size
    ));
    out.push_str(&format!("uid:       {:?}\n", config.uid));
    for reader in &config.readers {
        out.push_str(&format!(
            "reader:    {} {} on bus {} cs {}\n",
            reader.id, reader.direction, reader.bus, reader.chip_select
        ));
    }
    for relay in &config.relays {
        let direction = relay
            .direction
            .map_or_else(|| "any".to_string(), |d| d.to_string());
        out.push_str(&format!(
            "relay:     {} {} on pin {} for {}ms\n",
            relay.id, direction, relay.pin, relay.active_ms
        ));
    }
    out
}
