//! Hardware trait definitions.
//!
//! Two seams separate the gate logic from the board:
//!
//! - [`UidReader`]: a contactless reader polled for the UID of a presented
//!   card. Uses native `async fn` (Rust 1.90 + Edition 2024 RPITIT), so it is
//!   dispatched through [`AnyUidReader`](crate::devices::AnyUidReader).
//! - [`GpioBackend`]: set and read back digital output levels. Setting a pin
//!   is a single register write, so the trait is synchronous and object-safe
//!   and is shared as `Arc<dyn GpioBackend>` inside a
//!   [`HardwareHandle`](crate::handle::HardwareHandle).

#![allow(async_fn_in_trait)]

use crate::types::{Level, PinId, ReaderInfo};
use crate::Result;

/// Contactless credential reader.
///
/// **NOTE**: This trait is NOT object-safe because `async fn` methods return
/// opaque futures. Use [`AnyUidReader`](crate::devices::AnyUidReader) for
/// runtime dispatch.
///
/// # Examples
///
/// ```no_run
/// use gatehouse_hardware::traits::UidReader;
/// use gatehouse_hardware::Result;
///
/// async fn wait_for_card<R: UidReader>(reader: &mut R) -> Result<Vec<u8>> {
///     loop {
///         if let Some(uid) = reader.read_uid().await? {
///             return Ok(uid);
///         }
///         tokio::time::sleep(std::time::Duration::from_millis(100)).await;
///     }
/// }
/// ```
pub trait UidReader: Send + Sync {
    /// Poll the reader once.
    ///
    /// Returns `Ok(None)` when no card is in the field. Must not wait for a
    /// card to appear.
    ///
    /// # Errors
    ///
    /// Returns an error only for genuine faults (bus failure, disconnected
    /// device, corrupted frame).
    async fn read_uid(&mut self) -> Result<Option<Vec<u8>>>;

    /// Static information about the reader.
    fn info(&self) -> ReaderInfo;
}

/// Digital output/input backend.
///
/// Implementations must be cheap to call; the relay actuator calls them while
/// holding its per-relay lock.
pub trait GpioBackend: Send + Sync + std::fmt::Debug {
    /// Configure `pin` as an output with an initial level.
    ///
    /// # Errors
    ///
    /// Returns an error if the pin cannot be exported or configured.
    fn setup_output(&self, pin: PinId, initial: Level) -> Result<()>;

    /// Drive `pin` to `level`.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn set(&self, pin: PinId, level: Level) -> Result<()>;

    /// Read the current level of `pin`.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    fn get(&self, pin: PinId) -> Result<Level>;

    /// Release `pin`.
    fn release(&self, pin: PinId);
}
