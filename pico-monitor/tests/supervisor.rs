//! Process-boundary escalation: setup failures, panics and exhaustion all
//! end in a single restart request after the cool-down

use pico_monitor::{FatalError, SessionError};
use pico_monitor_devkit::{Call, SensorScript, TestHarness};
use std::time::Duration;
use tokio::time::Instant;

const COOLDOWN: Duration = Duration::from_secs(15);

#[tokio::test(start_paused = true)]
async fn test_setup_failure_restarts_without_retry() {
    let harness = TestHarness::new();
    harness.link.fail_next(1);
    harness
        .session
        .script_open(Err(SessionError::Refused("server unavailable".to_string())));

    let started = Instant::now();
    harness.supervisor(COOLDOWN).run().await.unwrap();

    assert!(started.elapsed() >= COOLDOWN);
    let reasons = harness.restarter.reasons();
    assert_eq!(reasons.len(), 1);
    assert!(matches!(&reasons[0], FatalError::Setup(detail) if detail.starts_with("link:")));

    // One association attempt, no open, no loop iteration
    assert_eq!(harness.calls.calls(), vec![Call::Associate]);
    assert_eq!(harness.sensors.snapshot_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_panic_during_setup_restarts() {
    let harness = TestHarness::new();
    harness.link.panic_next("wifi driver binding wedged");

    let started = Instant::now();
    harness.supervisor(COOLDOWN).run().await.unwrap();

    assert!(started.elapsed() >= COOLDOWN);
    assert_eq!(
        harness.restarter.reasons(),
        vec![FatalError::Escaped("wifi driver binding wedged".to_string())]
    );
    assert_eq!(harness.calls.calls(), vec![Call::Associate]);
    assert_eq!(harness.sensors.snapshot_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_panic_in_loop_is_contained() {
    let harness = TestHarness::new();
    harness
        .sensors
        .script(SensorScript::Read)
        .script(SensorScript::Panic("sensor bus wedged".to_string()));

    harness.supervisor(COOLDOWN).run().await.unwrap();

    assert_eq!(
        harness.restarter.reasons(),
        vec![FatalError::Escaped("sensor bus wedged".to_string())]
    );
    assert_eq!(harness.session.published().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_exhaustion_escalates_to_restart() {
    let harness = TestHarness::new();
    harness
        .sensors
        .script(SensorScript::Exhausted)
        .script(SensorScript::Exhausted);

    harness.supervisor(COOLDOWN).run().await.unwrap();

    let reasons = harness.restarter.reasons();
    assert_eq!(reasons.len(), 1);
    assert!(matches!(reasons[0], FatalError::ResourceExhausted(_)));
    assert_eq!(harness.sensors.reclaims(), 2);
    assert!(harness.session.published().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_drive_reports_without_restarting() {
    let harness = TestHarness::new();
    harness.sensors.script(SensorScript::Exhausted).script(SensorScript::Exhausted);

    let mut supervisor = harness.supervisor(COOLDOWN);
    let fatal = supervisor.drive().await;

    assert!(matches!(fatal, FatalError::ResourceExhausted(_)));
    assert!(harness.restarter.reasons().is_empty());
    assert!(supervisor.orchestrator().state().link_associated);
}
