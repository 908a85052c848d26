//! Default values shared across the gate.
//!
//! These mirror the timings the gate has always shipped with. Every one of
//! them can be overridden through the TOML configuration.

use std::time::Duration;

/// Minimum length of a normalized credential identifier.
pub const MIN_CREDENTIAL_LENGTH: usize = 1;

/// Maximum length of a normalized credential identifier (hex characters).
///
/// 7-byte double size UIDs render as 14 characters, 10-byte triple size as 20.
/// 32 leaves room for vendor-specific payloads.
pub const MAX_CREDENTIAL_LENGTH: usize = 32;

/// Maximum length of a reader identifier.
pub const MAX_READER_ID_LENGTH: usize = 32;

/// Window during which repeated reads of the same UID on the same reader are
/// suppressed.
pub const DEFAULT_DEBOUNCE_WINDOW: Duration = Duration::from_secs(2);

/// Delay between two hardware polls of a single reader.
pub const DEFAULT_READER_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Pause after a reader fault before polling again.
pub const READER_FAULT_BACKOFF: Duration = Duration::from_secs(1);

/// Capacity of the merged reader event queue.
pub const DEFAULT_EVENT_QUEUE_CAPACITY: usize = 32;

/// Hard timeout for a remote authorization round trip.
pub const DEFAULT_AUTH_TIMEOUT: Duration = Duration::from_secs(5);

/// Maximum number of events retained by the offline store.
pub const DEFAULT_MAX_QUEUE_SIZE: usize = 1000;

/// Interval between two connectivity probes.
pub const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_secs(30);

/// Timeout of a single connectivity probe.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Interval between two offline drain ticks.
pub const DEFAULT_DRAIN_INTERVAL: Duration = Duration::from_secs(10);

/// Upper bound of the drain interval after repeated failed cycles.
pub const MAX_DRAIN_INTERVAL: Duration = Duration::from_secs(120);

/// How long a relay stays energized when no duration is requested.
pub const DEFAULT_RELAY_ACTIVE_TIME: Duration = Duration::from_secs(2);

/// Delay between setting a pin and reading it back.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(20);

/// Number of backoff retries of a set-and-read-back cycle before a relay is
/// marked faulted.
pub const DEFAULT_VERIFY_ATTEMPTS: u32 = 3;

/// Default MQTT broker port.
pub const DEFAULT_MQTT_PORT: u16 = 1883;

/// Default MQTT keep-alive.
pub const DEFAULT_MQTT_KEEP_ALIVE: Duration = Duration::from_secs(60);

/// Default location of the persisted offline queue.
pub const DEFAULT_QUEUE_FILE: &str = "logs/offline_queue.json";

/// Topic root under which every gate publishes.
pub const TOPIC_ROOT: &str = "gate";

/// Topic suffix for authorization requests.
pub const TOPIC_REQUEST: &str = "badge";

/// Topic suffix for authorization replies.
pub const TOPIC_REPLY: &str = "auth_response";

/// Topic suffix for status heartbeats.
pub const TOPIC_STATUS: &str = "status";
