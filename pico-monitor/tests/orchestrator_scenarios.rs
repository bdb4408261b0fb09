//! Telemetry loop behaviour against scripted collaborators

use pico_monitor::orchestrator::{Phase, StepOutcome};
use pico_monitor::{FatalError, SessionError};
use pico_monitor_devkit::sensor_stub::{SensorScript, FAKE_HEADROOM_BYTES, FAKE_UNIQUE_ID};
use pico_monitor_devkit::{Call, TestHarness};
use serde_json::json;
use std::time::Duration;

/// Every open saw the link up, every publish saw link and session up
fn assert_layering(harness: &TestHarness) {
    for call in harness.calls.calls() {
        match call {
            Call::Open { link_up } => assert!(link_up, "session opened with the link down"),
            Call::Publish {
                link_up,
                session_open,
            } => {
                assert!(link_up, "publish attempted with the link down");
                assert!(session_open, "publish attempted on a closed session");
            }
            _ => {}
        }
    }
}

#[tokio::test]
async fn test_link_repaired_after_two_failures() {
    let harness = TestHarness::new();
    harness.link.fail_next(2);
    let mut orchestrator = harness.orchestrator();

    assert_eq!(orchestrator.phase(), Phase::LinkDown);
    assert_eq!(orchestrator.step().await, StepOutcome::LinkRetry);
    assert_eq!(orchestrator.step().await, StepOutcome::LinkRetry);
    assert_eq!(orchestrator.state().reconnect_count, 0);
    assert_eq!(harness.calls.count(|c| matches!(c, Call::Publish { .. })), 0);
    assert_eq!(harness.sensors.snapshot_calls(), 0);

    assert_eq!(orchestrator.step().await, StepOutcome::LinkRepaired);
    assert_eq!(orchestrator.state().reconnect_count, 1);
    assert_eq!(orchestrator.phase(), Phase::SessionDown);

    assert_eq!(orchestrator.step().await, StepOutcome::SessionOpened);
    assert_eq!(orchestrator.step().await, StepOutcome::Published);
    assert_eq!(orchestrator.phase(), Phase::Operational);
    assert_eq!(harness.link.attempts(), 3);
    assert_layering(&harness);
}

#[tokio::test]
async fn test_link_loss_drops_session_first() {
    let harness = TestHarness::new();
    let mut orchestrator = harness.connected().await;
    assert_eq!(orchestrator.state().reconnect_count, 0);

    harness.link.drop_link();
    assert_eq!(orchestrator.step().await, StepOutcome::LinkRepaired);
    assert_eq!(harness.calls.calls(), vec![Call::Close, Call::Associate]);
    assert!(!orchestrator.state().session_open);

    assert_eq!(orchestrator.step().await, StepOutcome::SessionOpened);
    assert_eq!(orchestrator.step().await, StepOutcome::Published);
    assert_eq!(orchestrator.state().reconnect_count, 1);
    assert_layering(&harness);
}

#[tokio::test]
async fn test_no_publish_while_session_closed() {
    let harness = TestHarness::new();
    let mut orchestrator = harness.connected().await;

    harness.session.hang_up();
    harness
        .session
        .script_open(Err(SessionError::Refused("not authorized".to_string())))
        .script_open(Err(SessionError::Timeout(10)));

    assert_eq!(orchestrator.step().await, StepOutcome::SessionRetry);
    assert_eq!(orchestrator.step().await, StepOutcome::SessionRetry);
    assert_eq!(harness.calls.count(|c| matches!(c, Call::Publish { .. })), 0);
    assert_eq!(orchestrator.state().reconnect_count, 0);

    assert_eq!(orchestrator.step().await, StepOutcome::SessionOpened);
    assert_eq!(orchestrator.step().await, StepOutcome::Published);
    assert_eq!(harness.session.published().len(), 1);
    assert_layering(&harness);
}

#[tokio::test]
async fn test_error_counter_resets_only_on_success() {
    let harness = TestHarness::new();
    let mut orchestrator = harness.connected().await;
    harness
        .session
        .script_publish(Err(SessionError::Transport("connection reset".to_string())));

    assert_eq!(
        orchestrator.step().await,
        StepOutcome::PublishFailed {
            consecutive_errors: 1
        }
    );

    // Reopening the session is not a success
    assert_eq!(orchestrator.step().await, StepOutcome::SessionOpened);
    assert_eq!(orchestrator.state().consecutive_publish_errors, 1);

    assert_eq!(orchestrator.step().await, StepOutcome::Published);
    assert_eq!(orchestrator.state().consecutive_publish_errors, 0);
    assert_eq!(orchestrator.success_rate(), 50.0);

    // The snapshot carries the counters as they stood before the publish
    let readouts = harness.sensors.readouts();
    assert_eq!(readouts[0].consecutive_publish_errors, 0);
    assert_eq!(readouts[1].consecutive_publish_errors, 1);
    assert_eq!(harness.last_field("publish_error_count"), Some(json!(1)));
}

#[tokio::test]
async fn test_threshold_forces_one_close() {
    let harness = TestHarness::new();
    let mut orchestrator = harness.connected().await;
    harness
        .session
        .script_publish(Err(SessionError::Timeout(10)))
        .script_publish(Err(SessionError::Refused("server unavailable".to_string())))
        .script_publish(Err(SessionError::Transport(
            "connection reset by peer".to_string(),
        )));

    assert_eq!(
        orchestrator.step().await,
        StepOutcome::PublishFailed {
            consecutive_errors: 1
        }
    );
    assert_eq!(
        orchestrator.step().await,
        StepOutcome::PublishFailed {
            consecutive_errors: 2
        }
    );
    assert_eq!(harness.calls.count(|c| *c == Call::Close), 0);

    assert_eq!(
        orchestrator.step().await,
        StepOutcome::SessionReset {
            consecutive_errors: 3
        }
    );
    assert_eq!(orchestrator.state().consecutive_publish_errors, 3);
    assert!(!orchestrator.state().session_open);
    assert_eq!(harness.calls.count(|c| *c == Call::Close), 1);

    assert_eq!(orchestrator.step().await, StepOutcome::SessionOpened);
    assert_eq!(orchestrator.step().await, StepOutcome::Published);
    assert_eq!(orchestrator.state().consecutive_publish_errors, 0);
    assert_eq!(harness.calls.count(|c| *c == Call::Close), 1);
    assert_layering(&harness);
}

#[tokio::test]
async fn test_threshold_when_every_failure_drops_session() {
    let harness = TestHarness::new();
    let mut orchestrator = harness.connected().await;
    harness
        .session
        .drop_on_any_failure()
        .script_publish(Err(SessionError::Timeout(10)))
        .script_publish(Err(SessionError::Refused("server unavailable".to_string())))
        .script_publish(Err(SessionError::Transport(
            "connection reset by peer".to_string(),
        )));

    let mut outcomes = Vec::new();
    for _ in 0..5 {
        outcomes.push(orchestrator.step().await);
    }
    assert_eq!(
        outcomes,
        vec![
            StepOutcome::PublishFailed { consecutive_errors: 1 },
            StepOutcome::SessionOpened,
            StepOutcome::PublishFailed { consecutive_errors: 2 },
            StepOutcome::SessionOpened,
            StepOutcome::SessionReset { consecutive_errors: 3 },
        ]
    );
    assert_eq!(orchestrator.state().consecutive_publish_errors, 3);
    assert_eq!(harness.calls.count(|c| *c == Call::Close), 1);

    assert_eq!(orchestrator.step().await, StepOutcome::SessionOpened);
    assert_eq!(orchestrator.step().await, StepOutcome::Published);
    assert_eq!(orchestrator.state().consecutive_publish_errors, 0);
    assert_eq!(harness.calls.count(|c| *c == Call::Close), 1);
    assert_layering(&harness);
}

#[tokio::test]
async fn test_one_close_per_threshold_crossing() {
    let harness = TestHarness::new();
    let mut orchestrator = harness.connected().await;
    for _ in 0..6 {
        harness.session.script_publish(Err(SessionError::Timeout(10)));
    }

    let mut outcomes = Vec::new();
    for _ in 0..7 {
        outcomes.push(orchestrator.step().await);
    }

    assert_eq!(
        outcomes,
        vec![
            StepOutcome::PublishFailed { consecutive_errors: 1 },
            StepOutcome::PublishFailed { consecutive_errors: 2 },
            StepOutcome::SessionReset { consecutive_errors: 3 },
            StepOutcome::SessionOpened,
            StepOutcome::PublishFailed { consecutive_errors: 4 },
            StepOutcome::PublishFailed { consecutive_errors: 5 },
            StepOutcome::SessionReset { consecutive_errors: 6 },
        ]
    );
    assert_eq!(harness.session.close_calls(), 2);
}

#[tokio::test]
async fn test_degraded_phase_above_threshold() {
    let harness = TestHarness::new();
    let mut orchestrator = harness.connected().await;
    for _ in 0..4 {
        harness.session.script_publish(Err(SessionError::Timeout(10)));
    }

    for _ in 0..3 {
        orchestrator.step().await;
    }
    assert_eq!(orchestrator.phase(), Phase::SessionDown);
    orchestrator.step().await;
    assert_eq!(orchestrator.phase(), Phase::Degraded);
    assert_eq!(
        orchestrator.step().await,
        StepOutcome::PublishFailed {
            consecutive_errors: 4
        }
    );
    assert_eq!(orchestrator.step().await, StepOutcome::Published);
    assert_eq!(orchestrator.phase(), Phase::Operational);
}

#[tokio::test]
async fn test_exhaustion_leaves_counters_alone() {
    let harness = TestHarness::new();
    let mut orchestrator = harness.connected().await;
    harness.sensors.script(SensorScript::Exhausted);
    let before = *orchestrator.state();

    assert_eq!(
        orchestrator.step().await,
        StepOutcome::Faulted {
            headroom_bytes: FAKE_HEADROOM_BYTES
        }
    );
    assert_eq!(*orchestrator.state(), before);
    assert_eq!(orchestrator.phase(), Phase::Faulted);
    assert_eq!(harness.sensors.reclaims(), 1);
    assert!(harness.calls.calls().is_empty());

    // The next iteration starts from the link again
    harness.link.drop_link();
    assert_eq!(orchestrator.step().await, StepOutcome::LinkRepaired);
    assert_eq!(harness.calls.calls(), vec![Call::Close, Call::Associate]);
}

#[tokio::test]
async fn test_publish_exhaustion_is_a_fault() {
    let harness = TestHarness::new();
    let mut orchestrator = harness.connected().await;
    harness
        .session
        .script_publish(Err(SessionError::Exhausted("payload buffer".to_string())));

    assert!(matches!(
        orchestrator.step().await,
        StepOutcome::Faulted { .. }
    ));
    assert_eq!(orchestrator.state().consecutive_publish_errors, 0);
    assert_eq!(harness.sensors.reclaims(), 1);
    assert!(orchestrator.state().session_open);
}

#[tokio::test]
async fn test_persistent_exhaustion_escalates() {
    let harness = TestHarness::new();
    let mut orchestrator = harness.connected().await;
    harness
        .sensors
        .script(SensorScript::Exhausted)
        .script(SensorScript::Read)
        .script(SensorScript::Exhausted)
        .script(SensorScript::Exhausted);

    assert!(matches!(orchestrator.step().await, StepOutcome::Faulted { .. }));
    assert_eq!(orchestrator.step().await, StepOutcome::Published);
    assert!(matches!(orchestrator.step().await, StepOutcome::Faulted { .. }));
    assert!(matches!(
        orchestrator.step().await,
        StepOutcome::Fatal(FatalError::ResourceExhausted(_))
    ));
    assert_eq!(harness.sensors.reclaims(), 3);
}

#[tokio::test]
async fn test_retries_between_faults_end_the_streak() {
    let harness = TestHarness::new();
    let mut orchestrator = harness.connected().await;
    harness
        .sensors
        .script(SensorScript::Exhausted)
        .script(SensorScript::Exhausted);

    assert!(matches!(orchestrator.step().await, StepOutcome::Faulted { .. }));

    harness.link.drop_link();
    harness.link.fail_next(1);
    assert_eq!(orchestrator.step().await, StepOutcome::LinkRetry);
    assert_eq!(orchestrator.step().await, StepOutcome::LinkRepaired);
    assert_eq!(orchestrator.step().await, StepOutcome::SessionOpened);

    assert!(matches!(orchestrator.step().await, StepOutcome::Faulted { .. }));
    assert_eq!(harness.sensors.reclaims(), 2);
    assert_eq!(orchestrator.step().await, StepOutcome::Published);
}

#[tokio::test]
async fn test_unexpected_snapshot_error_resets_session() {
    let harness = TestHarness::new();
    let mut orchestrator = harness.connected().await;
    harness
        .sensors
        .script(SensorScript::Unexpected("thermal zone vanished".to_string()));

    assert_eq!(
        orchestrator.step().await,
        StepOutcome::CycleFailed {
            consecutive_errors: 1
        }
    );
    assert_eq!(harness.calls.calls(), vec![Call::Close]);
    assert!(!orchestrator.state().session_open);
    assert_eq!(orchestrator.success_rate(), 0.0);

    assert_eq!(orchestrator.step().await, StepOutcome::SessionOpened);
    assert_eq!(orchestrator.step().await, StepOutcome::Published);
}

#[tokio::test]
async fn test_setup_failure_is_fatal() {
    let harness = TestHarness::new();
    harness.link.fail_next(1);
    let mut orchestrator = harness.orchestrator();

    match orchestrator.setup().await {
        Err(FatalError::Setup(detail)) => assert!(detail.starts_with("link:")),
        other => panic!("expected a setup failure, got {:?}", other),
    }
    assert_eq!(harness.calls.calls(), vec![Call::Associate]);
    assert_eq!(orchestrator.state().reconnect_count, 0);
}

#[tokio::test]
async fn test_setup_session_failure_is_fatal() {
    let harness = TestHarness::new();
    harness.link.restore();
    harness
        .session
        .script_open(Err(SessionError::Refused("bad client id".to_string())));
    let mut orchestrator = harness.orchestrator();

    match orchestrator.setup().await {
        Err(FatalError::Setup(detail)) => assert!(detail.starts_with("session:")),
        other => panic!("expected a setup failure, got {:?}", other),
    }
    // An already associated link is not joined again
    assert_eq!(harness.calls.calls(), vec![Call::Open { link_up: true }]);
}

#[tokio::test]
async fn test_payload_reflects_connectivity() {
    let harness = TestHarness::new();
    let mut orchestrator = harness.connected().await;
    harness.link.drop_link();

    orchestrator.step().await;
    orchestrator.step().await;
    assert_eq!(orchestrator.step().await, StepOutcome::Published);

    assert_eq!(harness.last_field("wifi_connected"), Some(json!(1)));
    assert_eq!(harness.last_field("wifi_status"), Some(json!(3)));
    assert_eq!(harness.last_field("wifi_reconnect_count"), Some(json!(1)));
    assert_eq!(harness.last_field("publish_success_rate"), Some(json!(100.0)));
    assert_eq!(harness.last_field("sys_unique_id"), Some(json!(FAKE_UNIQUE_ID)));

    let payload = harness.session.last_payload_json().unwrap();
    assert_eq!(payload.as_object().unwrap().len(), 18);
}

#[tokio::test(start_paused = true)]
async fn test_run_publishes_every_interval() {
    let harness = TestHarness::new();
    let mut orchestrator = harness.connected().await;

    let result = tokio::time::timeout(Duration::from_secs(35), orchestrator.run()).await;
    assert!(result.is_err(), "loop ended on its own");

    // t = 0, 10, 20, 30
    assert_eq!(harness.session.published().len(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_run_backs_off_while_link_down() {
    let harness = TestHarness::new();
    harness.link.fail_next(100);
    let mut orchestrator = harness.orchestrator();

    let result = tokio::time::timeout(Duration::from_secs(45), orchestrator.run()).await;
    assert!(result.is_err());

    // t = 0, 10, 20, 30, 40
    assert_eq!(harness.link.attempts(), 5);
    assert!(harness.session.published().is_empty());
}
