//! Gate orchestration.
//!
//! Wires readers, the decision policy, relays and the authority link into a
//! running [`Gate`]:
//!
//! - [`config`]: TOML configuration and startup validation
//! - [`controller`]: the single decision loop
//! - [`logger`]: the access log collaborator
//! - [`gate`]: assembly, background tasks and ordered shutdown

pub mod config;
pub mod controller;
pub mod error;
pub mod gate;
pub mod logger;

pub use config::GateConfig;
pub use controller::{AccessController, AccessOutcome};
pub use error::{ConfigError, GateError, Result};
pub use gate::{Gate, GateDevices, GateLink, ShutdownReport};
pub use logger::{
    AccessLogger, AccessRecord, Actuation, MemoryAccessLogger, Severity, SystemEventKind,
    SystemRecord, TracingAccessLogger,
};
