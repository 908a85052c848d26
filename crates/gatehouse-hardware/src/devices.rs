//! Enum wrappers for reader dispatch.
//!
//! Native `async fn` in traits are not object-safe, so readers cannot be
//! stored as `Box<dyn UidReader>`. [`AnyUidReader`] provides concrete type
//! dispatch instead, one variant per supported driver.
//!
//! # Examples
//!
//! ```
//! use gatehouse_hardware::devices::AnyUidReader;
//! use gatehouse_hardware::mock::MockReader;
//!
//! let (reader, _handle) = MockReader::new("reader-in", 0, 0);
//! let any_reader = AnyUidReader::Mock(reader);
//! ```

use crate::Result;
use crate::mock::MockReader;
use crate::traits::UidReader;
use crate::types::ReaderInfo;

/// Enum wrapper for reader device dispatch.
#[derive(Debug)]
#[non_exhaustive]
pub enum AnyUidReader {
    /// Mock reader for development and testing.
    Mock(MockReader),
}

impl UidReader for AnyUidReader {
    async fn read_uid(&mut self) -> Result<Option<Vec<u8>>> {
        match self {
            Self::Mock(device) => device.read_uid().await,
        }
    }

    fn info(&self) -> ReaderInfo {
        match self {
            Self::Mock(device) => device.info(),
        }
    }
}

impl From<MockReader> for AnyUidReader {
    fn from(reader: MockReader) -> Self {
        Self::Mock(reader)
    }
}
