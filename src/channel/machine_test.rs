use super::*;

const HEARTBEAT: Duration = Duration::from_secs(30);
const RETRY_DELAY: Duration = Duration::from_secs(3);

fn config() -> ChannelConfig {
    ChannelConfig { reconnect_interval: RETRY_DELAY, max_reconnect_attempts: 5, heartbeat_interval: HEARTBEAT }
}

fn machine() -> ChannelMachine {
    ChannelMachine::new("s-1/presenter", config(), true)
}

/// Machine that has completed one successful open on conn 1.
fn connected() -> ChannelMachine {
    let mut m = machine();
    assert_eq!(m.handle(Event::Connect), vec![Effect::Open(1)]);
    assert_eq!(m.handle(Event::Opened(1)), vec![Effect::StartHeartbeat(HEARTBEAT)]);
    m
}

// =============================================================
// connect / open
// =============================================================

#[test]
fn starts_disconnected() {
    let m = machine();
    assert_eq!(m.status(), ConnectionStatus::Disconnected);
    assert_eq!(m.retry_count(), 0);
    assert!(m.current_conn().is_none());
}

#[test]
fn connect_opens_transport() {
    let mut m = machine();
    assert_eq!(m.handle(Event::Connect), vec![Effect::Open(1)]);
    assert_eq!(m.status(), ConnectionStatus::Connecting);
    assert_eq!(m.current_conn(), Some(1));
}

#[test]
fn connect_is_noop_while_attempt_in_flight() {
    let mut m = machine();
    m.handle(Event::Connect);
    assert!(m.handle(Event::Connect).is_empty());
    assert_eq!(m.current_conn(), Some(1));
}

#[test]
fn connect_is_noop_when_already_connected() {
    let mut m = connected();
    assert!(m.handle(Event::Connect).is_empty());
}

#[test]
fn disabled_channel_ignores_connect() {
    let mut m = ChannelMachine::new("s-1/analytics", config(), false);
    assert!(m.handle(Event::Connect).is_empty());
    assert_eq!(m.status(), ConnectionStatus::Disconnected);
}

#[test]
fn open_connects_and_starts_heartbeat() {
    let m = connected();
    assert_eq!(m.status(), ConnectionStatus::Connected);
    assert!(m.heartbeat_running());
}

#[test]
fn zero_heartbeat_interval_skips_heartbeat() {
    let cfg = ChannelConfig { heartbeat_interval: Duration::ZERO, ..config() };
    let mut m = ChannelMachine::new("s-1/display", cfg, true);
    m.handle(Event::Connect);
    assert!(m.handle(Event::Opened(1)).is_empty());
    assert!(!m.heartbeat_running());
    assert!(m.handle(Event::HeartbeatTick).is_empty());
}

#[test]
fn heartbeat_tick_pings_only_when_connected() {
    let mut m = connected();
    assert_eq!(m.handle(Event::HeartbeatTick), vec![Effect::SendPing]);

    let mut m = machine();
    m.handle(Event::Connect);
    assert!(m.handle(Event::HeartbeatTick).is_empty());
}

// =============================================================
// inbound frames
// =============================================================

#[test]
fn valid_frame_is_delivered() {
    let mut m = connected();
    let fx = m.handle(Event::Frame(1, r#"{"type":"presenter_status","data":{"phase":"live"}}"#.to_owned()));
    let [Effect::Deliver(msg)] = fx.as_slice() else {
        panic!("expected one delivery, got {fx:?}");
    };
    assert_eq!(msg.kind, InboundKind::PresenterStatus);
    assert_eq!(msg.payload["phase"], "live");
}

#[test]
fn pong_is_swallowed() {
    let mut m = connected();
    assert!(m.handle(Event::Frame(1, r#"{"type":"pong","data":{}}"#.to_owned())).is_empty());
}

#[test]
fn malformed_frame_is_dropped() {
    let mut m = connected();
    assert!(m.handle(Event::Frame(1, "<html>".to_owned())).is_empty());
    assert_eq!(m.status(), ConnectionStatus::Connected);
}

#[test]
fn frame_from_superseded_connection_is_ignored() {
    let mut m = connected();
    m.handle(Event::Reconnect);
    assert!(m.handle(Event::Frame(1, r#"{"type":"activity"}"#.to_owned())).is_empty());
}

// =============================================================
// close / reconnect
// =============================================================

#[test]
fn unexpected_close_schedules_reconnect() {
    let mut m = connected();
    let fx = m.handle(Event::Closed(1));
    assert_eq!(fx, vec![Effect::StopHeartbeat, Effect::ScheduleReconnect(RETRY_DELAY)]);
    assert_eq!(m.status(), ConnectionStatus::Reconnecting);
    assert_eq!(m.retry_count(), 1);
    assert!(m.reconnect_pending());

    assert_eq!(m.handle(Event::ReconnectDue), vec![Effect::Open(2)]);
    assert_eq!(m.status(), ConnectionStatus::Connecting);
}

#[test]
fn successful_open_resets_retry_counter() {
    let mut m = connected();
    m.handle(Event::Closed(1));
    m.handle(Event::ReconnectDue);
    m.handle(Event::Opened(2));
    assert_eq!(m.retry_count(), 0);
}

#[test]
fn exhausted_retries_settle_disconnected() {
    let mut m = machine();
    m.handle(Event::Connect);

    for attempt in 1..=5 {
        let conn = m.current_conn().expect("open in flight");
        let fx = m.handle(Event::Closed(conn));
        assert_eq!(fx, vec![Effect::ScheduleReconnect(RETRY_DELAY)], "attempt {attempt}");
        assert_eq!(m.retry_count(), attempt);
        m.handle(Event::ReconnectDue);
    }

    let conn = m.current_conn().expect("final attempt in flight");
    assert!(m.handle(Event::Closed(conn)).is_empty());
    assert_eq!(m.status(), ConnectionStatus::Disconnected);
    assert!(!m.reconnect_pending());
    assert!(m.current_conn().is_none());
}

#[test]
fn error_then_close_reconnects() {
    let mut m = connected();
    assert_eq!(m.handle(Event::TransportError(1, "reset".to_owned())), vec![Effect::StopHeartbeat]);
    assert_eq!(m.status(), ConnectionStatus::Error);
    assert_eq!(m.handle(Event::Closed(1)), vec![Effect::ScheduleReconnect(RETRY_DELAY)]);
}

#[test]
fn error_alone_does_not_schedule_reconnect() {
    let mut m = connected();
    let fx = m.handle(Event::TransportError(1, "reset".to_owned()));
    assert!(!fx.iter().any(|e| matches!(e, Effect::ScheduleReconnect(_))));
    assert!(!m.reconnect_pending());
}

#[test]
fn construction_failure_sets_error_without_retry() {
    let mut m = machine();
    m.handle(Event::Connect);
    assert!(m.handle(Event::OpenFailed(1, "bad url".to_owned())).is_empty());
    assert_eq!(m.status(), ConnectionStatus::Error);
    assert!(!m.reconnect_pending());
}

// =============================================================
// manual disconnect / reconnect
// =============================================================

#[test]
fn manual_disconnect_never_reconnects() {
    let mut m = connected();
    assert_eq!(m.handle(Event::Disconnect), vec![Effect::StopHeartbeat, Effect::Close(1)]);
    assert_eq!(m.status(), ConnectionStatus::Closing);
    assert!(m.is_manually_closed());

    assert!(m.handle(Event::Closed(1)).is_empty());
    assert_eq!(m.status(), ConnectionStatus::Disconnected);
    assert!(m.handle(Event::ReconnectDue).is_empty());
}

#[test]
fn manual_disconnect_cancels_pending_reconnect() {
    let mut m = connected();
    m.handle(Event::Closed(1));
    assert!(m.reconnect_pending());

    assert_eq!(m.handle(Event::Disconnect), vec![Effect::CancelReconnect]);
    assert_eq!(m.status(), ConnectionStatus::Disconnected);
    assert!(m.handle(Event::ReconnectDue).is_empty());
}

#[test]
fn manual_disconnect_during_connecting_settles_on_open_failure() {
    let mut m = machine();
    m.handle(Event::Connect);
    assert_eq!(m.handle(Event::Disconnect), vec![Effect::Close(1)]);
    assert!(m.handle(Event::OpenFailed(1, "bad url".to_owned())).is_empty());
    assert_eq!(m.status(), ConnectionStatus::Disconnected);
}

#[test]
fn reconnect_resets_counter_and_ignores_old_close() {
    let mut m = connected();
    m.handle(Event::Closed(1));
    m.handle(Event::ReconnectDue);
    m.handle(Event::Closed(2));
    assert_eq!(m.retry_count(), 2);

    let fx = m.handle(Event::Reconnect);
    assert_eq!(fx, vec![Effect::CancelReconnect, Effect::Open(3)]);
    assert_eq!(m.retry_count(), 0);
    assert!(!m.is_manually_closed());

    m.handle(Event::Opened(3));
    let fx = m.handle(Event::Reconnect);
    assert_eq!(fx, vec![Effect::StopHeartbeat, Effect::Close(3), Effect::Open(4)]);
    assert!(m.handle(Event::Closed(3)).is_empty());
    assert_eq!(m.status(), ConnectionStatus::Connecting);
}

#[test]
fn set_enabled_false_tears_down_and_true_reconnects() {
    let mut m = connected();
    assert_eq!(m.handle(Event::SetEnabled(false)), vec![Effect::StopHeartbeat, Effect::Close(1)]);
    m.handle(Event::Closed(1));
    assert_eq!(m.status(), ConnectionStatus::Disconnected);

    assert_eq!(m.handle(Event::SetEnabled(true)), vec![Effect::Open(2)]);
}

// =============================================================
// environment signals
// =============================================================

#[test]
fn hidden_then_visible_toggles_heartbeat_without_reconnect() {
    let mut m = connected();
    assert_eq!(m.handle(Event::Env(EnvSignal::Hidden)), vec![Effect::StopHeartbeat]);
    assert!(!m.heartbeat_running());
    assert!(m.handle(Event::HeartbeatTick).is_empty());

    assert_eq!(m.handle(Event::Env(EnvSignal::Visible)), vec![Effect::StartHeartbeat(HEARTBEAT)]);
    assert_eq!(m.status(), ConnectionStatus::Connected);
    assert_eq!(m.current_conn(), Some(1));
}

#[test]
fn open_while_hidden_defers_heartbeat_until_visible() {
    let mut m = machine();
    m.handle(Event::Env(EnvSignal::Hidden));
    m.handle(Event::Connect);
    assert!(m.handle(Event::Opened(1)).is_empty());
    assert_eq!(m.handle(Event::Env(EnvSignal::Visible)), vec![Effect::StartHeartbeat(HEARTBEAT)]);
}

#[test]
fn visible_while_disconnected_triggers_connect() {
    let mut m = machine();
    assert_eq!(m.handle(Event::Env(EnvSignal::Visible)), vec![Effect::Open(1)]);
}

#[test]
fn visible_after_manual_disconnect_stays_down() {
    let mut m = machine();
    m.handle(Event::Disconnect);
    assert!(m.handle(Event::Env(EnvSignal::Visible)).is_empty());
}

#[test]
fn offline_forces_disconnected_immediately() {
    let mut m = connected();
    let fx = m.handle(Event::Env(EnvSignal::Offline));
    assert_eq!(fx, vec![Effect::StopHeartbeat, Effect::Close(1)]);
    assert_eq!(m.status(), ConnectionStatus::Disconnected);

    // The socket's own close arrives later and must not schedule a retry.
    assert!(m.handle(Event::Closed(1)).is_empty());
    assert!(!m.reconnect_pending());
}

#[test]
fn online_reconnects_when_disconnected() {
    let mut m = connected();
    m.handle(Event::Env(EnvSignal::Offline));
    assert_eq!(m.handle(Event::Env(EnvSignal::Online)), vec![Effect::Open(2)]);
    assert_eq!(m.status(), ConnectionStatus::Connecting);
}

#[test]
fn online_revives_exhausted_channel() {
    let cfg = ChannelConfig { max_reconnect_attempts: 0, ..config() };
    let mut m = ChannelMachine::new("s-1/analytics", cfg, true);
    m.handle(Event::Connect);
    m.handle(Event::Closed(1));
    assert_eq!(m.status(), ConnectionStatus::Disconnected);

    assert_eq!(m.handle(Event::Env(EnvSignal::Online)), vec![Effect::Open(2)]);
    assert_eq!(m.retry_count(), 0);
}

#[test]
fn online_while_connected_is_ignored() {
    let mut m = connected();
    assert!(m.handle(Event::Env(EnvSignal::Online)).is_empty());
}
