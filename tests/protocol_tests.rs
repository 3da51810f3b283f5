use firefleet::protocol::{
    decode_frame, encode_frame, Ack, AckStatus, Frame, GeoPoint, Message, MissionParams,
    ProtocolError, ReportedState, StatusReport, MAX_FRAME_SIZE,
};

#[test]
fn test_request_frame_round_trip() {
    let frame = Frame::Request {
        seq: 42,
        message: Message::MissionAssign {
            task_id: "TASK-20260825-0001".to_string(),
            waypoints: vec![GeoPoint::new(37.0, -122.0, 50.0)],
            area: vec![
                GeoPoint::new(37.0, -122.0, 0.0),
                GeoPoint::new(37.01, -121.99, 0.0),
            ],
            params: MissionParams::default(),
        },
    };
    let line = encode_frame(&frame).unwrap();
    assert!(!line.contains('\n'));

    match decode_frame(&line).unwrap() {
        Frame::Request { seq, message } => {
            assert_eq!(seq, 42);
            match message {
                Message::MissionAssign { task_id, waypoints, .. } => {
                    assert_eq!(task_id, "TASK-20260825-0001");
                    assert_eq!(waypoints.len(), 1);
                }
                other => panic!("wrong message kind: {}", other.label()),
            }
        }
        _ => panic!("wrong frame kind"),
    }
}

#[test]
fn test_wire_format_is_snake_case_tagged() {
    let line = encode_frame(&Frame::Request {
        seq: 1,
        message: Message::MissionStart,
    })
    .unwrap();
    let value: serde_json::Value = serde_json::from_str(&line).unwrap();
    assert_eq!(value["frame"], "request");
    assert_eq!(value["seq"], 1);
    assert_eq!(value["message"]["type"], "mission_start");
}

#[test]
fn test_response_frame_carries_status_and_report() {
    let mut ack = Ack::accepted(7);
    ack.report = Some(StatusReport {
        unit_id: "scout-1".to_string(),
        state: ReportedState::Executing,
        battery: 0.82,
        position: GeoPoint::new(37.0, -122.0, 50.0),
        task_id: Some("TASK-20260825-0001".to_string()),
        timestamp_ms: 1_700_000_000_000,
    });
    let line = encode_frame(&Frame::Response(ack)).unwrap();

    match decode_frame(&line).unwrap() {
        Frame::Response(ack) => {
            assert_eq!(ack.seq, 7);
            assert_eq!(ack.status, AckStatus::Accepted);
            let report = ack.report.expect("status request answer");
            assert_eq!(report.state, ReportedState::Executing);
            assert!((report.battery - 0.82).abs() < f64::EPSILON);
        }
        _ => panic!("wrong frame kind"),
    }
}

#[test]
fn test_busy_and_rejected_acks() {
    let busy = Ack::busy(3, "TASK-20260825-0002");
    assert_eq!(busy.status, AckStatus::Busy);
    assert!(busy.message.as_deref().unwrap().contains("TASK-20260825-0002"));

    let rejected = Ack::rejected(4, "confirmation token mismatch");
    assert_eq!(rejected.status, AckStatus::Rejected);
    assert_eq!(rejected.message.as_deref(), Some("confirmation token mismatch"));
}

#[test]
fn test_oversized_frame_rejected_both_ways() {
    let frame = Frame::Request {
        seq: 1,
        message: Message::MissionAssign {
            task_id: "TASK-20260825-0001".to_string(),
            waypoints: (0..200)
                .map(|i| GeoPoint::new(37.0 + i as f64 * 0.0001, -122.0, 50.0))
                .collect(),
            area: Vec::new(),
            params: MissionParams::default(),
        },
    };
    assert_eq!(encode_frame(&frame).unwrap_err(), ProtocolError::FrameTooLarge);

    let long_line = "x".repeat(MAX_FRAME_SIZE + 1);
    assert_eq!(decode_frame(&long_line).unwrap_err(), ProtocolError::FrameTooLarge);
}

#[test]
fn test_malformed_json_rejected() {
    assert_eq!(decode_frame("{not json").unwrap_err(), ProtocolError::InvalidJson);
    assert_eq!(
        decode_frame(r#"{"frame":"request","seq":"one"}"#).unwrap_err(),
        ProtocolError::InvalidJson
    );
}

#[test]
fn test_kill_token_travels_on_the_wire() {
    let line = encode_frame(&Frame::Request {
        seq: 9,
        message: Message::Kill {
            confirm_token: "KILL-scout-1".to_string(),
        },
    })
    .unwrap();
    let value: serde_json::Value = serde_json::from_str(&line).unwrap();
    assert_eq!(value["message"]["type"], "kill");
    assert_eq!(value["message"]["confirm_token"], "KILL-scout-1");
}

#[test]
fn test_geopoint_distance_sanity() {
    let a = GeoPoint::new(37.0, -122.0, 0.0);
    let b = GeoPoint::new(37.001, -122.0, 0.0);
    let d = a.distance_m(&b);
    // One millidegree of latitude is ~111 m.
    assert!((d - 111.0).abs() < 2.0, "got {}", d);
    assert!(a.distance_m(&a) < f64::EPSILON);
}
