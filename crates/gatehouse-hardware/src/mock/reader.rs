//! Mock contactless reader for testing and development.
//!
//! The reader side implements [`UidReader`] with a non-blocking poll; the
//! handle side lets a test or the CLI simulate cards entering the field.

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;

use crate::traits::UidReader;
use crate::types::{BusId, ReaderInfo};
use crate::{HardwareError, Result};

/// Internal event type for the mock reader.
#[derive(Debug, Clone)]
enum FieldEvent {
    CardPresented(Vec<u8>),
    Fault(String),
}

/// Mock reader.
///
/// # Examples
///
/// ```
/// use gatehouse_hardware::mock::MockReader;
/// use gatehouse_hardware::traits::UidReader;
///
/// #[tokio::main]
/// async fn main() -> gatehouse_hardware::Result<()> {
///     let (mut reader, handle) = MockReader::new("reader-in", 0, 0);
///
///     // Nothing in the field yet
///     assert_eq!(reader.read_uid().await?, None);
///
///     handle.present(vec![0xAA, 0xBB, 0xCC]).await?;
///     assert_eq!(reader.read_uid().await?, Some(vec![0xAA, 0xBB, 0xCC]));
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct MockReader {
    event_rx: mpsc::Receiver<FieldEvent>,
    info: ReaderInfo,
}

impl MockReader {
    /// Create a mock reader attached to `bus` on chip-select `chip_select`.
    ///
    /// Returns a tuple of (MockReader, MockReaderHandle) where the handle
    /// can be used to simulate card presentations.
    pub fn new(name: impl Into<String>, bus: BusId, chip_select: u8) -> (Self, MockReaderHandle) {
        let (event_tx, event_rx) = mpsc::channel(32);
        let info = ReaderInfo::new(name, bus, chip_select);

        let reader = Self {
            event_rx,
            info: info.clone(),
        };

        (reader, MockReaderHandle { event_tx, info })
    }
}

impl UidReader for MockReader {
    async fn read_uid(&mut self) -> Result<Option<Vec<u8>>> {
        match self.event_rx.try_recv() {
            Ok(FieldEvent::CardPresented(uid)) => Ok(Some(uid)),
            Ok(FieldEvent::Fault(message)) => Err(HardwareError::communication(message)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(HardwareError::disconnected(&self.info.name)),
        }
    }

    fn info(&self) -> ReaderInfo {
        self.info.clone()
    }
}

/// Handle for controlling a mock reader.
#[derive(Debug, Clone)]
pub struct MockReaderHandle {
    event_tx: mpsc::Sender<FieldEvent>,
    info: ReaderInfo,
}

impl MockReaderHandle {
    /// Present a card; the next poll of the reader returns its UID.
    ///
    /// # Errors
    ///
    /// Returns an error if the reader has been dropped.
    pub async fn present(&self, uid: impl Into<Vec<u8>>) -> Result<()> {
        self.send(FieldEvent::CardPresented(uid.into())).await
    }

    /// Keep a card in the field for `polls` consecutive polls.
    ///
    /// # Errors
    ///
    /// Returns an error if the reader has been dropped.
    pub async fn hold(&self, uid: impl Into<Vec<u8>>, polls: usize) -> Result<()> {
        let uid = uid.into();
        for _ in 0..polls {
            self.send(FieldEvent::CardPresented(uid.clone())).await?;
        }
        Ok(())
    }

    /// Make the next poll fail with a communication error.
    ///
    /// # Errors
    ///
    /// Returns an error if the reader has been dropped.
    pub async fn inject_fault(&self, message: impl Into<String>) -> Result<()> {
        self.send(FieldEvent::Fault(message.into())).await
    }

    /// Name of the simulated reader.
    pub fn name(&self) -> &str {
        &self.info.name
    }

    async fn send(&self, event: FieldEvent) -> Result<()> {
        self.event_tx
            .send(event)
            .await
            .map_err(|_| HardwareError::disconnected(&self.info.name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_empty_field_reads_none() {
        let (mut reader, _handle) = MockReader::new("in", 0, 0);
        assert_eq!(reader.read_uid().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_presented_cards_are_read_in_order() {
        let (mut reader, handle) = MockReader::new("in", 0, 0);
        handle.present(vec![0x01]).await.unwrap();
        handle.present(vec![0x02]).await.unwrap();

        assert_eq!(reader.read_uid().await.unwrap(), Some(vec![0x01]));
        assert_eq!(reader.read_uid().await.unwrap(), Some(vec![0x02]));
        assert_eq!(reader.read_uid().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_fault_is_an_error() {
        let (mut reader, handle) = MockReader::new("in", 0, 0);
        handle.inject_fault("CRC mismatch").await.unwrap();
        assert!(matches!(
            reader.read_uid().await,
            Err(HardwareError::CommunicationError { .. })
        ));
    }

    #[tokio::test]
    async fn test_dropped_handle_disconnects() {
        let (mut reader, handle) = MockReader::new("in", 0, 1);
        drop(handle);
        assert!(matches!(
            reader.read_uid().await,
            Err(HardwareError::Disconnected { .. })
        ));
        assert_eq!(reader.info().chip_select, 1);
    }
}
