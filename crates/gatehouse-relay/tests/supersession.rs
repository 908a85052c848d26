//! Timing behavior of relay activation under paused time.

use std::time::Duration;

use gatehouse_hardware::{HardwareHandle, Level};
use gatehouse_relay::{RelayActuator, RelayConfig, RelayError, RelayState};
use tokio::time::Instant;

const PIN: u8 = 17;

fn relay(hardware: &HardwareHandle) -> RelayActuator {
    RelayActuator::new(RelayConfig::new("in", PIN), hardware).unwrap()
}

/// Wait until the relay reports `state`, returning when it did.
async fn wait_for(relay: &RelayActuator, state: RelayState) -> Instant {
    let mut rx = relay.subscribe();
    rx.wait_for(|s| *s == state).await.unwrap();
    Instant::now()
}

#[tokio::test(start_paused = true)]
async fn test_second_activation_supersedes_first() {
    let (hardware, gpio) = HardwareHandle::simulated();
    let relay = relay(&hardware);
    let start = Instant::now();

    relay.activate(Duration::from_secs(5)).await.unwrap();
    tokio::time::sleep_until(start + Duration::from_secs(1)).await;
    relay.activate(Duration::from_secs(2)).await.unwrap();

    let released = wait_for(&relay, RelayState::Idle).await;
    let elapsed = released - start;
    assert!(
        elapsed >= Duration::from_secs(3) && elapsed < Duration::from_millis(3200),
        "released after {elapsed:?}"
    );
    assert_eq!(gpio.level(PIN), Some(Level::Low));

    // The first timer must not fire a second release at 5s.
    tokio::time::sleep_until(start + Duration::from_secs(6)).await;
    let releases = gpio
        .writes(PIN)
        .windows(2)
        .filter(|w| w[0] == Level::High && w[1] == Level::Low)
        .count();
    assert_eq!(releases, 1);
    assert_eq!(relay.status().activations, 2);
}

#[tokio::test(start_paused = true)]
async fn test_longer_activation_extends_pulse() {
    let (hardware, _gpio) = HardwareHandle::simulated();
    let relay = relay(&hardware);
    let start = Instant::now();

    relay.activate(Duration::from_secs(2)).await.unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    relay.activate(Duration::from_secs(4)).await.unwrap();

    tokio::time::sleep_until(start + Duration::from_millis(2500)).await;
    assert_eq!(relay.state(), RelayState::Active);

    let released = wait_for(&relay, RelayState::Idle).await;
    assert!(released - start >= Duration::from_secs(5));
}

#[tokio::test(start_paused = true)]
async fn test_force_off_wins_over_retrying_activation() {
    let (hardware, gpio) = HardwareHandle::simulated();
    let relay = RelayActuator::new(
        RelayConfig::new("in", PIN).verify_attempts(10),
        &hardware,
    )
    .unwrap();
    gpio.fail_next_sets(PIN, 4);

    let activating = {
        let relay = relay.clone();
        tokio::spawn(async move { relay.activate(Duration::from_secs(5)).await })
    };
    // let the activation enter its retry loop
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(relay.state(), RelayState::Verifying);

    let stopping = {
        let relay = relay.clone();
        tokio::spawn(async move { relay.force_off().await })
    };

    let activation = activating.await.unwrap();
    assert!(matches!(activation, Err(RelayError::Superseded { .. })));
    stopping.await.unwrap().unwrap();

    assert_eq!(relay.state(), RelayState::Idle);
    assert_eq!(gpio.level(PIN), Some(Level::Low));
}

#[tokio::test(start_paused = true)]
async fn test_fault_is_not_fatal() {
    let (hardware, gpio) = HardwareHandle::simulated();
    let relay = relay(&hardware);

    gpio.fail_reads(PIN, true);
    let err = relay.activate(Duration::from_secs(1)).await.unwrap_err();
    assert!(err.is_fault());
    assert_eq!(relay.state(), RelayState::Faulted);

    gpio.fail_reads(PIN, false);
    relay.reset_to_safe_state().await.unwrap();
    relay.activate(Duration::from_secs(1)).await.unwrap();
    assert_eq!(relay.state(), RelayState::Active);
}
