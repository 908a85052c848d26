//! Reader behavior across faults and UID formats, through the multiplexer.
//!
//! Run with: cargo test --package gatehouse-hardware --test reader_faults

use std::time::Duration;

use gatehouse_core::{Direction, ReaderId, UidFormat};
use gatehouse_hardware::devices::AnyUidReader;
use gatehouse_hardware::mock::{MockReader, MockReaderHandle};
use gatehouse_hardware::{
    CredentialReader, HardwareHandle, MultiplexerConfig, MultiplexerHandle, ReaderConfig,
    ReaderMultiplexer,
};

fn gate(format: UidFormat) -> (MultiplexerHandle, MockReaderHandle) {
    let (hardware, _gpio) = HardwareHandle::simulated();
    let (device, card) = MockReader::new("in", 0, 0);
    let config =
        ReaderConfig::new(ReaderId::new("in").unwrap(), Direction::Entry).uid_format(format);

    let mut multiplexer = ReaderMultiplexer::new(MultiplexerConfig::default());
    multiplexer.register(CredentialReader::new(
        config,
        AnyUidReader::from(device),
        &hardware,
    ));
    (multiplexer.start(), card)
}

#[tokio::test(start_paused = true)]
async fn test_transient_fault_does_not_stop_reader() {
    let (mut events, card) = gate(UidFormat::Hex);

    card.inject_fault("crc error").await.unwrap();
    card.present(vec![0x04, 0xA1, 0xB2]).await.unwrap();

    let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.credential_id().as_str(), "04A1B2");
    assert_eq!(event.raw_payload(), &[0x04, 0xA1, 0xB2]);

    let summary = events.shutdown().await;
    assert_eq!(summary.stopped, 1);
    assert_eq!(summary.errored, 0);
    assert_eq!(summary.faults, 1);
    assert_eq!(summary.accepted, 1);
}

#[tokio::test(start_paused = true)]
async fn test_configured_format_shapes_credential() {
    let (mut events, card) = gate(UidFormat::TakeLast { length: 4 });

    card.present(vec![0x04, 0xA1, 0xB2, 0xC3]).await.unwrap();

    let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.credential_id().as_str(), "B2C3");
    events.shutdown().await;
}
