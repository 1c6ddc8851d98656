mod common;

use ampwise::coordinator::{ControlAction, PolicyKind};
use ampwise::error::AmpwiseError;
use ampwise::sequencer::OperationOutcome;
use common::{CURRENT, Harness, SWITCH, at, test_config};
use std::time::Duration;

fn secs(s: u64) -> Duration {
    Duration::from_secs(s)
}

fn charging_at(h: &Harness, amps: &str) {
    h.host.seed([(SWITCH, "on"), (CURRENT, amps)]);
}

#[tokio::test]
async fn decrease_runs_off_set_on_with_settle_waits() {
    let h = Harness::new(at(12, 0, 0));
    charging_at(&h, "16");
    let grant = h.grant(PolicyKind::SolarSurplus, ControlAction::TurnOn);

    let outcome = h
        .ctx
        .sequencer
        .set_amperage(&grant, 13, "surplus dropped")
        .await
        .unwrap();

    assert_eq!(outcome, OperationOutcome::Executed);
    assert_eq!(
        h.host.call_log(),
        vec![
            "switch.turn_off",
            "number.set_value=13",
            "switch.turn_on"
        ]
    );
    assert_eq!(h.clock.sleeps(), vec![secs(5), secs(2)]);
    let snapshot = h.ctx.sequencer.snapshot();
    assert!(snapshot.is_on);
    assert_eq!(snapshot.current_amperage, Some(13));
    assert_eq!(snapshot.last_operation_at, Some(at(12, 0, 7)));
}

#[tokio::test]
async fn increase_is_a_single_set() {
    let h = Harness::new(at(12, 0, 0));
    charging_at(&h, "10");
    let grant = h.grant(PolicyKind::SolarSurplus, ControlAction::TurnOn);

    h.ctx
        .sequencer
        .set_amperage(&grant, 16, "more sun")
        .await
        .unwrap();

    assert_eq!(h.host.call_log(), vec!["number.set_value=16"]);
    assert_eq!(h.clock.sleeps(), vec![secs(2)]);
    assert_eq!(h.ctx.sequencer.current_amperage(), Some(16));
}

#[tokio::test]
async fn requests_snap_to_permitted_levels() {
    let h = Harness::new(at(12, 0, 0));
    charging_at(&h, "10");
    let grant = h.grant(PolicyKind::SolarSurplus, ControlAction::TurnOn);

    h.ctx.sequencer.set_amperage(&grant, 12, "snap").await.unwrap();
    assert_eq!(h.host.call_log(), vec!["number.set_value=13"]);

    // Equidistant between 6 and 8 goes to the lower level
    let h = Harness::new(at(12, 0, 0));
    let grant = h.grant(PolicyKind::SolarSurplus, ControlAction::TurnOn);
    h.ctx.sequencer.start(&grant, Some(7), "snap").await.unwrap();
    assert_eq!(
        h.host.call_log(),
        vec!["number.set_value=6", "switch.turn_on"]
    );
    assert_eq!(h.clock.sleeps(), vec![secs(2), secs(5)]);
}

#[tokio::test]
async fn start_without_target_only_switches_on() {
    let h = Harness::new(at(12, 0, 0));
    let grant = h.grant(PolicyKind::Override, ControlAction::TurnOn);

    h.ctx.sequencer.start(&grant, None, "override").await.unwrap();

    assert_eq!(h.host.call_log(), vec!["switch.turn_on"]);
    assert!(h.ctx.sequencer.is_on());
}

#[tokio::test]
async fn operations_matching_current_state_are_noops() {
    let h = Harness::new(at(12, 0, 0));
    charging_at(&h, "16");
    let on = h.grant(PolicyKind::SolarSurplus, ControlAction::TurnOn);

    let outcome = h.ctx.sequencer.set_amperage(&on, 16, "same").await.unwrap();
    assert_eq!(outcome, OperationOutcome::NoOp);
    let outcome = h.ctx.sequencer.start(&on, Some(16), "same").await.unwrap();
    assert_eq!(outcome, OperationOutcome::NoOp);

    h.host.seed([(SWITCH, "off")]);
    let off = h.grant(PolicyKind::SolarSurplus, ControlAction::TurnOff);
    let outcome = h.ctx.sequencer.stop(&off, "already off").await.unwrap();
    assert_eq!(outcome, OperationOutcome::NoOp);

    assert!(h.host.calls().is_empty());
    assert!(h.ctx.sequencer.snapshot().last_operation_at.is_none());
}

#[tokio::test]
async fn early_operation_is_queued_and_drained_after_the_interval() {
    let h = Harness::new(at(12, 0, 0));
    let seq = h.ctx.sequencer.clone();
    let on = h.grant(PolicyKind::SolarSurplus, ControlAction::TurnOn);

    assert_eq!(
        seq.start(&on, None, "sun").await.unwrap(),
        OperationOutcome::Executed
    );
    assert_eq!(seq.queue_size(), 0);

    let outcome = seq.set_amperage(&on, 10, "cloud").await.unwrap();
    assert_eq!(outcome, OperationOutcome::Queued);
    assert_eq!(seq.queue_size(), 1);
    assert_eq!(seq.pending()[0].target_amperage, Some(10));

    seq.wait_idle().await;

    assert_eq!(seq.queue_size(), 0);
    assert_eq!(
        h.host.call_log(),
        vec![
            "switch.turn_on",
            "switch.turn_off",
            "number.set_value=10",
            "switch.turn_on"
        ]
    );
    // start settles 5s, the drain waits out the rest of the 30s interval
    assert_eq!(h.clock.sleeps(), vec![secs(5), secs(30), secs(5), secs(2)]);

    let calls = h.host.calls();
    let first_done = calls[0].at.unwrap() + chrono::Duration::seconds(5);
    let queued_began = calls[1].at.unwrap();
    assert!(queued_began - first_done >= chrono::Duration::seconds(30));
}

#[tokio::test]
async fn queued_operations_keep_their_order() {
    let h = Harness::new(at(12, 0, 0));
    let seq = h.ctx.sequencer.clone();
    let on = h.grant(PolicyKind::SolarSurplus, ControlAction::TurnOn);

    seq.start(&on, Some(10), "sun").await.unwrap();
    seq.set_amperage(&on, 16, "more sun").await.unwrap();
    let off = h.grant(PolicyKind::SolarSurplus, ControlAction::TurnOff);
    seq.stop(&off, "sunset").await.unwrap();
    assert_eq!(seq.queue_size(), 2);

    seq.wait_idle().await;

    assert_eq!(
        h.host.call_log(),
        vec![
            "number.set_value=10",
            "switch.turn_on",
            "number.set_value=16",
            "switch.turn_off"
        ]
    );
    assert!(!seq.is_on());
}

#[tokio::test]
async fn full_queue_rejects_new_operations() {
    let mut config = test_config();
    config.charger.queue_capacity = 2;
    let h = Harness::with_config(at(12, 0, 0), config);
    let seq = h.ctx.sequencer.clone();
    let on = h.grant(PolicyKind::SolarSurplus, ControlAction::TurnOn);

    seq.start(&on, None, "sun").await.unwrap();
    assert_eq!(
        seq.set_amperage(&on, 10, "a").await.unwrap(),
        OperationOutcome::Queued
    );
    assert_eq!(
        seq.set_amperage(&on, 8, "b").await.unwrap(),
        OperationOutcome::Queued
    );

    let err = seq.set_amperage(&on, 6, "c").await.unwrap_err();
    assert!(matches!(err, AmpwiseError::QueueFull { capacity: 2 }));
    assert_eq!(seq.queue_size(), 2);
}

#[tokio::test]
async fn zero_interval_disables_rate_limiting() {
    let mut config = test_config();
    config.charger.min_operation_interval_seconds = 0.0;
    let h = Harness::with_config(at(12, 0, 0), config);
    let seq = h.ctx.sequencer.clone();
    let on = h.grant(PolicyKind::SolarSurplus, ControlAction::TurnOn);

    seq.start(&on, None, "sun").await.unwrap();
    let outcome = seq.set_amperage(&on, 20, "more").await.unwrap();

    assert_eq!(outcome, OperationOutcome::Executed);
    assert_eq!(seq.queue_size(), 0);
}

#[tokio::test]
async fn grant_must_authorize_the_direction() {
    let h = Harness::new(at(12, 0, 0));
    let off = h.grant(PolicyKind::SmartBlocker, ControlAction::TurnOff);

    let err = h
        .ctx
        .sequencer
        .start(&off, None, "wrong grant")
        .await
        .unwrap_err();

    assert!(matches!(err, AmpwiseError::Validation { ref field, .. } if field == "grant"));
    assert!(h.host.calls().is_empty());
}

#[tokio::test]
async fn failed_actuator_call_is_reported() {
    let h = Harness::new(at(12, 0, 0));
    h.host.fail_service("switch.turn_on", "relay stuck");
    let on = h.grant(PolicyKind::SolarSurplus, ControlAction::TurnOn);

    let err = h.ctx.sequencer.start(&on, None, "sun").await.unwrap_err();

    assert!(err.is_actuator_failure());
    assert!(!h.ctx.sequencer.is_on());
    // The attempt still counts for rate limiting
    assert!(h.ctx.sequencer.seconds_since_last_operation().is_some());
}

#[tokio::test(start_paused = true)]
async fn unacknowledged_call_times_out() {
    let h = Harness::new(at(12, 0, 0));
    h.host.hang_service("switch.turn_on");
    let on = h.grant(PolicyKind::SolarSurplus, ControlAction::TurnOn);

    let err = h.ctx.sequencer.start(&on, None, "sun").await.unwrap_err();

    assert!(matches!(err, AmpwiseError::Timeout { .. }));
    assert!(err.to_string().contains("switch.turn_on"));
}

#[tokio::test]
async fn refresh_keeps_cached_values_when_unreadable() {
    let h = Harness::new(at(12, 0, 0));
    charging_at(&h, "16");
    let seq = &h.ctx.sequencer;
    assert_eq!(seq.refresh().current_amperage, Some(16));

    h.host.seed([(CURRENT, "unavailable"), (SWITCH, "unknown")]);
    let snapshot = seq.refresh();
    assert!(snapshot.is_on);
    assert_eq!(snapshot.current_amperage, Some(16));
}

#[tokio::test]
async fn overlapping_operations_never_interleave() {
    let mut config = test_config();
    config.charger.min_operation_interval_seconds = 0.0;
    let h = Harness::with_config(at(12, 0, 0), config);
    charging_at(&h, "16");
    let solar = h.grant(PolicyKind::SolarSurplus, ControlAction::TurnOn);
    let night = h.grant(PolicyKind::NightCharge, ControlAction::TurnOn);

    let seq = h.ctx.sequencer.clone();
    let decrease =
        tokio::spawn(async move { seq.set_amperage(&solar, 10, "surplus dropped").await });
    let seq = h.ctx.sequencer.clone();
    let raise = tokio::spawn(async move { seq.set_amperage(&night, 13, "night session").await });

    assert_eq!(decrease.await.unwrap().unwrap(), OperationOutcome::Executed);
    assert_eq!(raise.await.unwrap().unwrap(), OperationOutcome::Executed);

    // The second operation waited for the whole safe sequence
    assert_eq!(
        h.host.call_log(),
        vec![
            "switch.turn_off",
            "number.set_value=10",
            "switch.turn_on",
            "number.set_value=13"
        ]
    );
    assert_eq!(h.ctx.sequencer.current_amperage(), Some(13));
}
