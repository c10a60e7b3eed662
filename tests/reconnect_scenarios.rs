mod common;

use core::sync::atomic::Ordering;

use common::{collaborators, drive, ManualTime, RecordingHooks, TestController};
use voxlink::config::{ReconnectConfig, WatchdogConfig};
use voxlink::events::{
    event_for_disconnect, ReconnectEvent, RecoveryStage, SessionDisconnectCode,
};
use voxlink::reconnect_manager::RecoveryOutcome;
use voxlink::system_state::ReconnectShared;
use voxlink::ux::UxState;
use voxlink::watchdog::WatchdogBank;

use RecoveryStage::*;

#[test]
fn network_loss_walks_every_stage_back_to_idle() {
    let time = ManualTime::new();
    let hooks = RecordingHooks::default();
    let shared = ReconnectShared::new(&hooks);
    let bank = WatchdogBank::new(&WatchdogConfig::default());
    let mut controller = TestController::new(
        collaborators(&time),
        &shared,
        &bank,
        &hooks,
        &time,
        ReconnectConfig::default(),
    );

    assert!(shared.raise_event(ReconnectEvent::NetworkLoss));
    assert_eq!(hooks.reconnecting_audio.load(Ordering::SeqCst), 1);
    assert_eq!(hooks.clock_reverts.load(Ordering::SeqCst), 1);

    let outcome = drive(&time, controller.process_next());

    assert_eq!(outcome, RecoveryOutcome::Recovered);
    assert_eq!(
        hooks.stages(),
        vec![
            LinkLoss,
            LinkFix,
            TransportReconnect,
            OtaDisconnect,
            OtaReconnect,
            SessionReconnect,
            LinkUp,
            Idle
        ]
    );
    assert!(hooks.resets().is_empty());
    assert_eq!(hooks.offline_aborts.load(Ordering::SeqCst), 1);
    assert_eq!(hooks.ux().last(), Some(&UxState::Connected));

    let drivers = controller.collaborators();
    assert_eq!(drivers.link.reconnects, 1);
    assert_eq!(drivers.transport.connects, 1);
    assert_eq!(drivers.transport.resyncs, 1);
    assert_eq!(drivers.ota.connects, 1);
    assert_eq!(drivers.session.connects, 1);
    assert_eq!(
        drivers.session.registrations,
        vec![Some("speaker-01".to_string())]
    );
    assert_eq!(
        drivers.session.syncs,
        vec![(40, vec!["alarm-0700".to_string()])]
    );
    assert!(drivers.session.connected);

    assert_eq!(controller.current_stage(), Idle);
    assert_eq!(bank.next_deadline(), None);
    assert!(!shared.is_event_pending());
}

#[test]
fn link_that_cannot_be_restored_reboots() {
    let time = ManualTime::new();
    let hooks = RecordingHooks::default();
    let shared = ReconnectShared::new(&hooks);
    let bank = WatchdogBank::new(&WatchdogConfig::default());
    let mut drivers = collaborators(&time);
    drivers.link.fail = true;
    let mut controller = TestController::new(
        drivers,
        &shared,
        &bank,
        &hooks,
        &time,
        ReconnectConfig::default(),
    );

    let outcome = drive(&time, controller.recover(ReconnectEvent::NetworkLoss));

    assert_eq!(outcome, RecoveryOutcome::Rebooted);
    assert_eq!(hooks.stages(), vec![LinkLoss, LinkFix, FatalReboot]);
    assert_eq!(hooks.resets(), vec!["Reconnection failed at link level"]);
    assert_eq!(hooks.ux().last(), Some(&UxState::SystemFault));
    assert_eq!(controller.collaborators().transport.connects, 0);
    assert!(!shared.raise_event(ReconnectEvent::TransportDisconnect));
}

#[test]
fn failed_transport_connect_is_fatal() {
    let time = ManualTime::new();
    let hooks = RecordingHooks::default();
    let shared = ReconnectShared::new(&hooks);
    let bank = WatchdogBank::new(&WatchdogConfig::default());
    let mut drivers = collaborators(&time);
    drivers.transport.fail_connect = true;
    let mut controller = TestController::new(
        drivers,
        &shared,
        &bank,
        &hooks,
        &time,
        ReconnectConfig::default(),
    );

    let outcome = drive(&time, controller.recover(ReconnectEvent::TransportDisconnect));

    assert_eq!(outcome, RecoveryOutcome::Rebooted);
    assert_eq!(hooks.stages(), vec![TransportReconnect, FatalReboot]);
    assert_eq!(hooks.resets().len(), 1);
}

#[test]
fn ota_connect_gives_up_after_three_attempts_and_restarts_from_link_loss() {
    let time = ManualTime::new();
    let hooks = RecordingHooks::default();
    let shared = ReconnectShared::new(&hooks);
    let bank = WatchdogBank::new(&WatchdogConfig::default());
    let mut drivers = collaborators(&time);
    drivers.ota.connect_failures = 3;
    let mut controller = TestController::new(
        drivers,
        &shared,
        &bank,
        &hooks,
        &time,
        ReconnectConfig::default(),
    );

    let outcome = drive(&time, controller.recover(ReconnectEvent::TransportDisconnect));

    assert_eq!(outcome, RecoveryOutcome::Recovered);
    assert_eq!(
        hooks.stages(),
        vec![
            TransportReconnect,
            OtaDisconnect,
            OtaReconnect,
            LinkLoss,
            LinkFix,
            TransportReconnect,
            OtaDisconnect,
            OtaReconnect,
            SessionReconnect,
            LinkUp,
            Idle
        ]
    );
    // Three failures on the first entry, success on the first try of the second
    assert_eq!(controller.collaborators().ota.connects, 4);
    assert_eq!(controller.collaborators().transport.connects, 2);
}

#[test]
fn session_connect_retries_with_a_pause_and_is_bounded_per_entry() {
    let time = ManualTime::new();
    let hooks = RecordingHooks::default();
    let shared = ReconnectShared::new(&hooks);
    let bank = WatchdogBank::new(&WatchdogConfig::default());
    let mut drivers = collaborators(&time);
    drivers.session.connect_failures = 5;
    let mut controller = TestController::new(
        drivers,
        &shared,
        &bank,
        &hooks,
        &time,
        ReconnectConfig::default(),
    );

    let outcome = drive(&time, controller.recover(ReconnectEvent::TransportDisconnect));

    assert_eq!(outcome, RecoveryOutcome::Recovered);
    let stages = hooks.stages();
    assert_eq!(
        stages.iter().filter(|s| **s == SessionReconnect).count(),
        2
    );
    assert_eq!(stages.iter().filter(|s| **s == LinkLoss).count(), 1);
    assert_eq!(controller.collaborators().session.connects, 6);
    // Every attempt waits 500 ms first
    assert!(time.now_ms() >= 6 * 500);
    assert!(hooks.resets().is_empty());
}

#[test]
fn protocol_fault_is_echoed_when_closing_the_session() {
    let time = ManualTime::new();
    let hooks = RecordingHooks::default();
    let shared = ReconnectShared::new(&hooks);
    let bank = WatchdogBank::new(&WatchdogConfig::default());
    let mut controller = TestController::new(
        collaborators(&time),
        &shared,
        &bank,
        &hooks,
        &time,
        ReconnectConfig::default(),
    );

    let event = event_for_disconnect(SessionDisconnectCode::InvalidSequence)
        .expect("protocol faults raise an event");
    assert!(shared.raise_event(event));
    let outcome = drive(&time, controller.process_next());

    assert_eq!(outcome, RecoveryOutcome::Recovered);
    assert_eq!(
        hooks.stages(),
        vec![SessionDisconnect, SessionReconnect, LinkUp, Idle]
    );
    let session = &controller.collaborators().session;
    assert_eq!(
        session.disconnect_codes,
        vec![SessionDisconnectCode::InvalidSequence]
    );
    assert_eq!(session.terminations, 1);
    assert_eq!(controller.collaborators().transport.connects, 0);
}

#[test]
fn plain_session_drop_closes_with_going_offline() {
    let time = ManualTime::new();
    let hooks = RecordingHooks::default();
    let shared = ReconnectShared::new(&hooks);
    let bank = WatchdogBank::new(&WatchdogConfig::default());
    let mut controller = TestController::new(
        collaborators(&time),
        &shared,
        &bank,
        &hooks,
        &time,
        ReconnectConfig::default(),
    );

    drive(&time, controller.recover(ReconnectEvent::SessionDisconnect));
    // The code from the first cycle must not leak into the next one
    drive(&time, controller.recover(ReconnectEvent::SessionDisconnect));

    assert_eq!(
        controller.collaborators().session.disconnect_codes,
        vec![
            SessionDisconnectCode::GoingOffline,
            SessionDisconnectCode::GoingOffline
        ]
    );
}

#[test]
fn failed_session_disconnect_falls_back_to_a_full_rebuild() {
    let time = ManualTime::new();
    let hooks = RecordingHooks::default();
    let shared = ReconnectShared::new(&hooks);
    let bank = WatchdogBank::new(&WatchdogConfig::default());
    let mut drivers = collaborators(&time);
    drivers.session.fail_disconnect = true;
    let mut controller = TestController::new(
        drivers,
        &shared,
        &bank,
        &hooks,
        &time,
        ReconnectConfig::default(),
    );

    let outcome = drive(&time, controller.recover(ReconnectEvent::MessageTampered));

    assert_eq!(outcome, RecoveryOutcome::Recovered);
    assert_eq!(
        hooks.stages(),
        vec![
            SessionDisconnect,
            LinkLoss,
            LinkFix,
            TransportReconnect,
            OtaDisconnect,
            OtaReconnect,
            SessionReconnect,
            LinkUp,
            Idle
        ]
    );
    assert_eq!(
        controller.collaborators().session.disconnect_codes,
        vec![SessionDisconnectCode::MessageTampered]
    );
}

#[test]
fn ota_disconnect_failure_restarts_from_link_loss() {
    let time = ManualTime::new();
    let hooks = RecordingHooks::default();
    let shared = ReconnectShared::new(&hooks);
    let bank = WatchdogBank::new(&WatchdogConfig::default());
    let mut drivers = collaborators(&time);
    drivers.ota.disconnect_failures = 1;
    let mut controller = TestController::new(
        drivers,
        &shared,
        &bank,
        &hooks,
        &time,
        ReconnectConfig::default(),
    );

    let outcome = drive(&time, controller.recover(ReconnectEvent::TransportDisconnect));

    assert_eq!(outcome, RecoveryOutcome::Recovered);
    assert_eq!(
        hooks.stages(),
        vec![
            TransportReconnect,
            OtaDisconnect,
            LinkLoss,
            LinkFix,
            TransportReconnect,
            OtaDisconnect,
            OtaReconnect,
            SessionReconnect,
            LinkUp,
            Idle
        ]
    );
    assert_eq!(controller.collaborators().ota.disconnects, 2);
    assert_eq!(controller.collaborators().ota.connects, 1);
}

#[test]
fn resync_failure_only_warns() {
    let time = ManualTime::new();
    let hooks = RecordingHooks::default();
    let shared = ReconnectShared::new(&hooks);
    let bank = WatchdogBank::new(&WatchdogConfig::default());
    let mut drivers = collaborators(&time);
    drivers.transport.fail_resync = true;
    let mut controller = TestController::new(
        drivers,
        &shared,
        &bank,
        &hooks,
        &time,
        ReconnectConfig::default(),
    );

    let outcome = drive(&time, controller.recover(ReconnectEvent::TransportDisconnect));

    assert_eq!(outcome, RecoveryOutcome::Recovered);
    assert_eq!(controller.collaborators().transport.resyncs, 1);
    assert_eq!(hooks.stages()[1], OtaDisconnect);
}

#[test]
fn missing_registration_still_attempts_the_session() {
    let time = ManualTime::new();
    let hooks = RecordingHooks::default();
    let shared = ReconnectShared::new(&hooks);
    let bank = WatchdogBank::new(&WatchdogConfig::default());
    let mut drivers = collaborators(&time);
    drivers.credentials.missing = true;
    let mut controller = TestController::new(
        drivers,
        &shared,
        &bank,
        &hooks,
        &time,
        ReconnectConfig::default(),
    );

    let outcome = drive(&time, controller.recover(ReconnectEvent::SessionDisconnect));

    assert_eq!(outcome, RecoveryOutcome::Recovered);
    assert_eq!(controller.collaborators().credentials.loads, 1);
    assert_eq!(controller.collaborators().session.registrations, vec![None]);
}

#[test]
fn events_raised_mid_cycle_are_dropped() {
    let time = ManualTime::new();
    let hooks = RecordingHooks::default();
    let shared = ReconnectShared::new(&hooks);
    let bank = WatchdogBank::new(&WatchdogConfig::default());
    let mut drivers = collaborators(&time);
    drivers.transport.raise_during_connect = Some(&shared);
    let mut controller = TestController::new(
        drivers,
        &shared,
        &bank,
        &hooks,
        &time,
        ReconnectConfig::default(),
    );

    assert!(shared.raise_event(ReconnectEvent::TransportDisconnect));
    assert!(!shared.raise_event(ReconnectEvent::NetworkLoss));
    drive(&time, controller.process_next());

    assert_eq!(controller.collaborators().transport.mid_cycle_raises, vec![false]);
    assert_eq!(hooks.reconnecting_audio.load(Ordering::SeqCst), 1);
    assert_eq!(hooks.stages().first(), Some(&TransportReconnect));
    assert_eq!(hooks.stages().last(), Some(&Idle));

    // Back at Idle the gate is open again
    assert!(shared.raise_event(ReconnectEvent::NetworkLoss));
    assert_eq!(hooks.reconnecting_audio.load(Ordering::SeqCst), 2);
}
