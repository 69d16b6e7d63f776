use super::*;

fn sample_frame() -> Frame {
    Frame {
        kind: "presenter_status".to_owned(),
        data: serde_json::json!({
            "phase": "live",
            "results_visible": true,
            "focused_question_index": 2,
            "nested": {"k": "v"},
        }),
        timestamp: Some("2026-03-01T12:00:00Z".to_owned()),
    }
}

#[test]
fn encode_uses_type_key_on_the_wire() {
    let text = encode_frame(&sample_frame());
    let value: Value = serde_json::from_str(&text).expect("json");
    assert_eq!(value["type"], "presenter_status");
    assert!(value.get("kind").is_none());
    assert_eq!(value["timestamp"], "2026-03-01T12:00:00Z");
}

#[test]
fn encode_decode_round_trip_preserves_frame() {
    let frame = sample_frame();
    let decoded = decode_frame(&encode_frame(&frame)).expect("decode should succeed");
    assert_eq!(decoded, frame);
}

#[test]
fn decode_defaults_missing_data_to_empty_object() {
    let frame = decode_frame(r#"{"type":"analytics_updated"}"#).expect("decode");
    assert_eq!(frame.data, serde_json::json!({}));
    assert!(frame.timestamp.is_none());
}

#[test]
fn decode_normalizes_null_data() {
    let frame = decode_frame(r#"{"type":"pong","data":null}"#).expect("decode");
    assert_eq!(frame.data, serde_json::json!({}));
}

#[test]
fn decode_rejects_malformed_json() {
    let err = decode_frame("{not json").expect_err("should fail");
    assert!(matches!(err, CodecError::Decode(_)));
}

#[test]
fn decode_rejects_missing_type() {
    let err = decode_frame(r#"{"data":{}}"#).expect_err("should fail");
    assert!(matches!(err, CodecError::Decode(_)));
}

#[test]
fn decode_rejects_blank_type() {
    let err = decode_frame(r#"{"type":"  ","data":{}}"#).expect_err("should fail");
    assert!(matches!(err, CodecError::MissingType));
}

#[test]
fn decode_rejects_non_object_data() {
    let err = decode_frame(r#"{"type":"activity","data":[1,2]}"#).expect_err("should fail");
    assert!(matches!(err, CodecError::InvalidData("array")));
}

#[test]
fn ping_frame_is_heartbeat_and_stamped() {
    let ping = Frame::ping();
    assert!(ping.is_heartbeat());
    assert_eq!(ping.kind, PING);
    assert!(ping.sent_at().is_some());
}

#[test]
fn sent_at_ignores_garbage_timestamp() {
    let mut frame = sample_frame();
    frame.timestamp = Some("yesterday".to_owned());
    assert!(frame.sent_at().is_none());
}

#[test]
fn inbound_kind_parses_known_and_unknown() {
    assert_eq!(InboundKind::parse("analytics_updated"), InboundKind::AnalyticsUpdated);
    assert_eq!(InboundKind::parse("question_focus"), InboundKind::QuestionFocus);
    assert_eq!(
        InboundKind::parse("survey_archived"),
        InboundKind::Other("survey_archived".to_owned())
    );
    assert_eq!(InboundKind::parse("response_update").as_str(), "response_update");
}

#[test]
fn presenter_command_from_str_covers_all() {
    for cmd in PresenterCommand::ALL {
        assert_eq!(cmd.as_str().parse::<PresenterCommand>().expect("parse"), cmd);
    }
    assert!("reboot_survey".parse::<PresenterCommand>().is_err());
}

#[test]
fn presenter_command_frame_defaults_to_empty_data() {
    let frame = PresenterCommand::PauseSurvey.to_frame(None);
    assert_eq!(frame.kind, "pause_survey");
    assert_eq!(frame.data, serde_json::json!({}));

    let frame = PresenterCommand::NextQuestion.to_frame(Some(serde_json::json!({"question_index": 3})));
    assert_eq!(frame.data["question_index"], 3);
}
