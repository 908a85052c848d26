//! Hardware abstraction layer for the gatehouse access gate.
//!
//! This crate owns everything between the board and a [`CredentialEvent`]:
//!
//! - [`HardwareHandle`]: explicit owner of GPIO pins and shared buses, passed
//!   into every reader and relay at construction.
//! - [`traits::UidReader`] and [`traits::GpioBackend`]: the two hardware
//!   seams, with in-memory implementations in [`mock`].
//! - [`reader::CredentialReader`]: one debounced poll loop per reader.
//! - [`multiplexer::ReaderMultiplexer`]: runs the readers concurrently and
//!   merges their output into one bounded stream.
//!
//! # Design Philosophy
//!
//! - **Async-first**: reader polling uses native `async fn` in traits
//!   (Rust 1.90 + Edition 2024 RPITIT) with enum dispatch in [`devices`].
//! - **No globals**: pins are claimed through a handle and released on drop.
//! - **Faults are not absence**: "no card in the field" is `Ok(None)`; errors
//!   are reserved for genuine faults.
//!
//! # Example
//!
//! ```no_run
//! use gatehouse_core::{Direction, ReaderId};
//! use gatehouse_hardware::{HardwareHandle, ReadOutcome};
//! use gatehouse_hardware::devices::AnyUidReader;
//! use gatehouse_hardware::mock::MockReader;
//! use gatehouse_hardware::reader::{CredentialReader, ReaderConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let (hardware, _gpio) = HardwareHandle::simulated();
//! let (device, card) = MockReader::new("in", 0, 0);
//! let mut reader = CredentialReader::new(
//!     ReaderConfig::new(ReaderId::new("in")?, Direction::Entry),
//!     AnyUidReader::Mock(device),
//!     &hardware,
//! );
//!
//! card.present(vec![0x04, 0xA1, 0xB2, 0xC3]).await?;
//! if let ReadOutcome::Accepted(event) = reader.poll_once().await? {
//!     println!("{} at {}", event.credential_id(), event.reader_id());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! [`CredentialEvent`]: gatehouse_core::CredentialEvent

pub mod devices;
pub mod error;
pub mod handle;
pub mod mock;
pub mod multiplexer;
pub mod reader;
pub mod traits;
pub mod types;

// Re-export commonly used types for convenience
pub use error::{HardwareError, Result};
pub use handle::{BusLock, HardwareHandle, OutputPin};
pub use multiplexer::{
    EventReceiver, EventSender, MultiplexerConfig, MultiplexerHandle, PushOutcome,
    ReaderMultiplexer, ShutdownSummary, event_queue,
};
pub use reader::{CredentialReader, Debouncer, ReadOutcome, ReaderConfig, ReaderStats};
pub use traits::{GpioBackend, UidReader};
pub use types::{BusId, Level, PinId, ReaderInfo};
