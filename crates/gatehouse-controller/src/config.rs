//! Gate configuration.
//!
//! Loaded from a TOML file. Every section and most keys have defaults, so a
//! file naming one reader and one relay is enough. Durations are integer
//! milliseconds in `*_ms` keys.
//!
//! ```toml
//! [gate]
//! id = "01"
//!
//! [mqtt]
//! host = "broker.local"
//!
//! [offline]
//! fallback = "deny"
//!
//! [uid]
//! format = "take_last"
//! length = 8
//!
//! [[readers]]
//! id = "in"
//! direction = "in"
//!
//! [[relays]]
//! id = "in"
//! direction = "in"
//! pin = 18
//! ```
//!
//! [`GateConfig::validate`] runs before anything is started. A gate with a
//! configuration problem does not start.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use gatehouse_core::constants::{
    DEFAULT_AUTH_TIMEOUT, DEFAULT_DEBOUNCE_WINDOW, DEFAULT_DRAIN_INTERVAL,
    DEFAULT_MAX_QUEUE_SIZE, DEFAULT_MQTT_KEEP_ALIVE, DEFAULT_MQTT_PORT, DEFAULT_PROBE_INTERVAL,
    DEFAULT_PROBE_TIMEOUT, DEFAULT_QUEUE_FILE, DEFAULT_READER_POLL_INTERVAL,
    DEFAULT_RELAY_ACTIVE_TIME, DEFAULT_SETTLE_DELAY, DEFAULT_VERIFY_ATTEMPTS, MAX_DRAIN_INTERVAL,
};
use gatehouse_core::{Direction, ReaderId, UidFormat};
use gatehouse_hardware::{BusId, PinId, ReaderConfig};
use gatehouse_network::{AnyProbe, MqttConfig, TcpProbe};
use gatehouse_protocol::TopicSet;
use gatehouse_relay::RelayConfig;
use gatehouse_storage::{DrainConfig, FallbackPolicy, OfflineStoreConfig};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

fn millis(duration: Duration) -> u64 {
    duration.as_millis() as u64
}

/// Top-level gate configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GateConfig {
    #[serde(default)]
    pub gate: GateSection,

    #[serde(default)]
    pub mqtt: MqttSection,

    #[serde(default)]
    pub authorization: AuthorizationSection,

    #[serde(default)]
    pub offline: OfflineSection,

    /// UID normalization shared by every reader.
    #[serde(default)]
    pub uid: UidFormat,

    #[serde(default)]
    pub readers: Vec<ReaderSection>,

    #[serde(default)]
    pub relays: Vec<RelaySection>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateSection {
    /// Scopes the MQTT topics: `gate/{id}/...`.
    pub id: String,
}

impl Default for GateSection {
    fn default() -> Self {
        Self {
            id: "01".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttSection {
    pub host: String,
    pub port: u16,
    /// Defaults to `gatehouse-{gate.id}`.
    pub client_id: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub tls: bool,
    pub keep_alive_ms: u64,
}

impl Default for MqttSection {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: DEFAULT_MQTT_PORT,
            client_id: None,
            username: None,
            password: None,
            tls: false,
            keep_alive_ms: millis(DEFAULT_MQTT_KEEP_ALIVE),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthorizationSection {
    pub timeout_ms: u64,
}

impl Default for AuthorizationSection {
    fn default() -> Self {
        Self {
            timeout_ms: millis(DEFAULT_AUTH_TIMEOUT),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OfflineSection {
    pub fallback: FallbackPolicy,
    pub max_queue_size: usize,
    pub queue_file: PathBuf,
    pub probe_interval_ms: u64,
    pub probe_timeout_ms: u64,
    pub drain_interval_ms: u64,
    pub max_drain_interval_ms: u64,
    pub drain_enabled: bool,
}

impl Default for OfflineSection {
    fn default() -> Self {
        Self {
            fallback: FallbackPolicy::Allow,
            max_queue_size: DEFAULT_MAX_QUEUE_SIZE,
            queue_file: PathBuf::from(DEFAULT_QUEUE_FILE),
            probe_interval_ms: millis(DEFAULT_PROBE_INTERVAL),
            probe_timeout_ms: millis(DEFAULT_PROBE_TIMEOUT),
            drain_interval_ms: millis(DEFAULT_DRAIN_INTERVAL),
            max_drain_interval_ms: millis(MAX_DRAIN_INTERVAL),
            drain_enabled: true,
        }
    }
}

/// One `[[readers]]` entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReaderSection {
    pub id: String,

    pub direction: Direction,

    #[serde(default)]
    pub bus: BusId,

    #[serde(default)]
    pub chip_select: u8,

    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_debounce_ms() -> u64 {
    millis(DEFAULT_DEBOUNCE_WINDOW)
}

fn default_poll_interval_ms() -> u64 {
    millis(DEFAULT_READER_POLL_INTERVAL)
}

/// One `[[relays]]` entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelaySection {
    pub id: String,

    /// Direction served by this relay; unbound relays are only used as the
    /// fallback for directions without one.
    #[serde(default)]
    pub direction: Option<Direction>,

    pub pin: PinId,

    #[serde(default = "default_active_ms")]
    pub active_ms: u64,

    #[serde(default)]
    pub active_low: bool,

    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,

    #[serde(default = "default_verify_attempts")]
    pub verify_attempts: u32,
}

fn default_active_ms() -> u64 {
    millis(DEFAULT_RELAY_ACTIVE_TIME)
}

fn default_settle_ms() -> u64 {
    millis(DEFAULT_SETTLE_DELAY)
}

fn default_verify_attempts() -> u32 {
    DEFAULT_VERIFY_ATTEMPTS
}

impl GateConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed. The result is
    /// not validated.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::io(path, e))?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed TOML or mistyped values.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Check everything that would otherwise fail at runtime.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Validation`] listing every problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut problems = Vec::new();

        if let Err(e) = TopicSet::for_gate(&self.gate.id) {
            problems.push(format!("gate.id: {e}"));
        }
        if self.mqtt.host.trim().is_empty() {
            problems.push("mqtt.host must not be empty".to_string());
        }
        if self.authorization.timeout_ms == 0 {
            problems.push("authorization.timeout_ms must be greater than zero".to_string());
        }

        let offline = &self.offline;
        if offline.max_queue_size == 0 {
            problems.push("offline.max_queue_size must be at least 1".to_string());
        }
        for (key, value) in [
            ("probe_interval_ms", offline.probe_interval_ms),
            ("probe_timeout_ms", offline.probe_timeout_ms),
            ("drain_interval_ms", offline.drain_interval_ms),
        ] {
            if value == 0 {
                problems.push(format!("offline.{key} must be greater than zero"));
            }
        }

        if self.readers.is_empty() {
            problems.push("at least one reader must be configured".to_string());
        }
        let mut reader_ids = HashSet::new();
        for reader in &self.readers {
            if let Err(e) = ReaderId::new(&reader.id) {
                problems.push(format!("reader {:?}: {e}", reader.id));
            }
            if !reader_ids.insert(reader.id.as_str()) {
                problems.push(format!("duplicate reader id {:?}", reader.id));
            }
            for (key, value) in [
                ("poll_interval_ms", reader.poll_interval_ms),
                ("debounce_ms", reader.debounce_ms),
            ] {
                if value == 0 {
                    problems.push(format!("reader {:?}: {key} must be greater than zero", reader.id));
                }
            }
        }

        if self.relays.is_empty() {
            problems.push("at least one relay must be configured".to_string());
        }
        let mut relay_ids = HashSet::new();
        let mut pins = HashSet::new();
        for relay in &self.relays {
            if relay.id.trim().is_empty() {
                problems.push("relay id must not be empty".to_string());
            }
            if !relay_ids.insert(relay.id.as_str()) {
                problems.push(format!("duplicate relay id {:?}", relay.id));
            }
            if !pins.insert(relay.pin) {
                problems.push(format!("relay {:?}: pin {} is already used", relay.id, relay.pin));
            }
            for (key, value) in [("active_ms", relay.active_ms), ("settle_ms", relay.settle_ms)] {
                if value == 0 {
                    problems.push(format!("relay {:?}: {key} must be greater than zero", relay.id));
                }
            }
            if relay.verify_attempts == 0 {
                problems.push(format!("relay {:?}: verify_attempts must be at least 1", relay.id));
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::validation(problems.join("; ")))
        }
    }

    /// Topics of this gate.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Validation`] for an unusable gate id.
    pub fn topics(&self) -> Result<TopicSet, ConfigError> {
        TopicSet::for_gate(&self.gate.id)
            .map_err(|e| ConfigError::validation(format!("gate.id: {e}")))
    }

    pub fn auth_timeout(&self) -> Duration {
        Duration::from_millis(self.authorization.timeout_ms)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.offline.probe_interval_ms)
    }

    pub fn mqtt_config(&self) -> MqttConfig {
        let mqtt = &self.mqtt;
        let client_id = mqtt
            .client_id
            .clone()
            .unwrap_or_else(|| format!("gatehouse-{}", self.gate.id));
        let mut config = MqttConfig::new(&mqtt.host, client_id)
            .port(mqtt.port)
            .tls(mqtt.tls)
            .keep_alive(Duration::from_millis(mqtt.keep_alive_ms));
        if let Some(username) = &mqtt.username {
            config = config.credentials(username, mqtt.password.clone().unwrap_or_default());
        }
        config
    }

    /// TCP probe against the broker endpoint.
    pub fn probe(&self) -> AnyProbe {
        AnyProbe::Tcp(
            TcpProbe::new(self.mqtt_config().endpoint())
                .timeout(Duration::from_millis(self.offline.probe_timeout_ms)),
        )
    }

    pub fn store_config(&self) -> OfflineStoreConfig {
        OfflineStoreConfig::persisted(&self.offline.queue_file, self.offline.max_queue_size)
    }

    pub fn drain_config(&self) -> DrainConfig {
        DrainConfig {
            enabled: self.offline.drain_enabled,
            interval: Duration::from_millis(self.offline.drain_interval_ms),
            max_interval: Duration::from_millis(self.offline.max_drain_interval_ms),
        }
    }

    /// Reader configurations, in file order.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Validation`] for an invalid reader id.
    pub fn reader_configs(&self) -> Result<Vec<ReaderConfig>, ConfigError> {
        self.readers
            .iter()
            .map(|reader| {
                let id = ReaderId::new(&reader.id)
                    .map_err(|e| ConfigError::validation(format!("reader {:?}: {e}", reader.id)))?;
                Ok(ReaderConfig::new(id, reader.direction)
                    .debounce_window(Duration::from_millis(reader.debounce_ms))
                    .poll_interval(Duration::from_millis(reader.poll_interval_ms))
                    .uid_format(self.uid))
            })
            .collect()
    }

    /// Relay configurations with their direction binding, in file order.
    pub fn relay_configs(&self) -> Vec<(RelayConfig, Option<Direction>)> {
        self.relays
            .iter()
            .map(|relay| {
                let config = RelayConfig::new(&relay.id, relay.pin)
                    .active_duration(Duration::from_millis(relay.active_ms))
                    .active_low(relay.active_low)
                    .settle_delay(Duration::from_millis(relay.settle_ms))
                    .verify_attempts(relay.verify_attempts);
                (config, relay.direction)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::io::Write;

    const MINIMAL: &str = r#"
        [[readers]]
        id = "in"
        direction = "in"

        [[relays]]
        id = "in"
        direction = "in"
        pin = 18
    "#;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = GateConfig::from_toml_str(MINIMAL).unwrap();
        config.validate().unwrap();

        assert_eq!(config.gate.id, "01");
        assert_eq!(config.auth_timeout(), Duration::from_secs(5));
        assert_eq!(config.offline.max_queue_size, 1000);
        assert_eq!(config.offline.fallback, FallbackPolicy::Allow);
        assert_eq!(config.uid, UidFormat::Hex);
        assert_eq!(config.mqtt_config().endpoint(), "localhost:1883");
        assert_eq!(config.mqtt_config().client_id, "gatehouse-01");

        let readers = config.reader_configs().unwrap();
        assert_eq!(readers[0].debounce_window, Duration::from_secs(2));
        let relays = config.relay_configs();
        assert_eq!(relays[0].0.active_duration, Duration::from_secs(2));
        assert_eq!(relays[0].1, Some(Direction::Entry));
    }

    #[test]
    fn test_full_config() {
        let config = GateConfig::from_toml_str(
            r#"
            [gate]
            id = "north"

            [mqtt]
            host = "broker.local"
            port = 8883
            client_id = "north-gate"
            username = "gate"
            password = "secret"
            tls = true

            [authorization]
            timeout_ms = 3000

            [offline]
            fallback = "deny"
            max_queue_size = 50
            queue_file = "/var/lib/gatehouse/queue.json"
            drain_enabled = false

            [uid]
            format = "take_last"
            length = 8

            [[readers]]
            id = "in"
            direction = "in"
            bus = 0
            chip_select = 0
            debounce_ms = 1500

            [[readers]]
            id = "out"
            direction = "out"
            chip_select = 1

            [[relays]]
            id = "in"
            direction = "in"
            pin = 18
            active_ms = 3000

            [[relays]]
            id = "out"
            direction = "out"
            pin = 23
            active_low = true
            "#,
        )
        .unwrap();
        config.validate().unwrap();

        assert_eq!(config.topics().unwrap().request(), "gate/north/badge");
        assert_eq!(config.offline.fallback, FallbackPolicy::Deny);
        assert_eq!(config.uid, UidFormat::TakeLast { length: 8 });
        assert!(!config.drain_config().enabled);
        assert_eq!(config.store_config().max_size, 50);

        let mqtt = config.mqtt_config();
        assert_eq!(mqtt.endpoint(), "broker.local:8883");
        assert_eq!(mqtt.username.as_deref(), Some("gate"));
        assert!(mqtt.tls);

        let readers = config.reader_configs().unwrap();
        assert_eq!(readers.len(), 2);
        assert_eq!(readers[1].direction, Direction::Exit);
        assert_eq!(readers[1].uid_format, UidFormat::TakeLast { length: 8 });

        let relays = config.relay_configs();
        assert!(relays[1].0.active_low);
        assert_eq!(relays[0].0.active_duration, Duration::from_secs(3));
    }

    #[rstest]
    #[case::no_readers(
        "[[relays]]\nid = \"in\"\npin = 18\n",
        "at least one reader"
    )]
    #[case::no_relays(
        "[[readers]]\nid = \"in\"\ndirection = \"in\"\n",
        "at least one relay"
    )]
    #[case::duplicate_pin(
        "[[readers]]\nid = \"in\"\ndirection = \"in\"\n[[relays]]\nid = \"a\"\npin = 18\n[[relays]]\nid = \"b\"\npin = 18\n",
        "pin 18 is already used"
    )]
    #[case::duplicate_reader(
        "[[readers]]\nid = \"in\"\ndirection = \"in\"\n[[readers]]\nid = \"in\"\ndirection = \"out\"\n[[relays]]\nid = \"a\"\npin = 18\n",
        "duplicate reader id"
    )]
    #[case::zero_timeout(
        "[authorization]\ntimeout_ms = 0\n[[readers]]\nid = \"in\"\ndirection = \"in\"\n[[relays]]\nid = \"a\"\npin = 18\n",
        "timeout_ms"
    )]
    #[case::zero_queue(
        "[offline]\nmax_queue_size = 0\n[[readers]]\nid = \"in\"\ndirection = \"in\"\n[[relays]]\nid = \"a\"\npin = 18\n",
        "max_queue_size"
    )]
    #[case::bad_gate_id(
        "[gate]\nid = \"a/b\"\n[[readers]]\nid = \"in\"\ndirection = \"in\"\n[[relays]]\nid = \"a\"\npin = 18\n",
        "gate.id"
    )]
    #[case::zero_debounce(
        "[[readers]]\nid = \"in\"\ndirection = \"in\"\ndebounce_ms = 0\n[[relays]]\nid = \"a\"\npin = 18\n",
        "reader \"in\": debounce_ms must be greater than zero"
    )]
    #[case::zero_settle(
        "[[readers]]\nid = \"in\"\ndirection = \"in\"\n[[relays]]\nid = \"a\"\npin = 18\nsettle_ms = 0\n",
        "relay \"a\": settle_ms must be greater than zero"
    )]
    #[case::zero_active(
        "[[readers]]\nid = \"in\"\ndirection = \"in\"\n[[relays]]\nid = \"a\"\npin = 18\nactive_ms = 0\n",
        "relay \"a\": active_ms must be greater than zero"
    )]
    fn test_validation_rejects(#[case] toml: &str, #[case] expected: &str) {
        let config = GateConfig::from_toml_str(toml).unwrap();
        let err = config.validate().unwrap_err();
        assert!(
            err.to_string().contains(expected),
            "{err} does not mention {expected}"
        );
    }

    #[test]
    fn test_empty_config_reports_every_problem() {
        let err = GateConfig::default().validate().unwrap_err().to_string();
        assert!(err.contains("reader"));
        assert!(err.contains("relay"));
    }

    #[test]
    fn test_parse_error() {
        let err = GateConfig::from_toml_str("[[relays]]\nid = \"in\"\npin = \"eighteen\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(MINIMAL.as_bytes()).unwrap();
        let config = GateConfig::from_file(file.path()).unwrap();
        assert_eq!(config.readers.len(), 1);

        let err = GateConfig::from_file(Path::new("/nonexistent/gatehouse.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
