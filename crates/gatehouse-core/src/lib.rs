//! Core types shared by every gatehouse crate.
//!
//! The types here describe a single credential presentation as it travels
//! from a reader, through the access decision, to the relay and the offline
//! queue:
//!
//! ```text
//! raw UID bytes ──UidFormat──► CredentialId ──► CredentialEvent ──► AuthDecision
//! ```
//!
//! The [`retry`] module holds the bounded retry-with-backoff combinator used
//! by relay verification and the offline drain.

pub mod constants;
pub mod error;
pub mod retry;
pub mod types;
pub mod uid;

pub use error::{Error, Result};
pub use retry::{BackoffPolicy, RetryError, retry_with_backoff};
pub use types::*;
pub use uid::UidFormat;

/// Version info
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
