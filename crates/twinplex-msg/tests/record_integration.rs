//! ---
//! ems_section: "15-testing-qa-runbook"
//! ems_subsection: "integration-tests"
//! ems_type: "source"
//! ems_scope: "tests"
//! ems_description: "Telemetry record encoding integration checks."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use twinplex_msg::{
    ActuatorData, ConnectionStateData, RecordHeader, TelemetryRecord, CONNECTION_STATE_TYPE_ID,
};

#[test]
fn connection_state_survives_cbor() -> anyhow::Result<()> {
    let mut state = ConnectionStateData::new("edge-7");
    state.client_id = "edge-7-client".into();
    state.msg_in_count = 42;
    state.set_connected(true);
    let record = TelemetryRecord::from(state);

    let decoded = TelemetryRecord::from_cbor(&record.to_cbor()?)?;
    assert_eq!(decoded, record);
    match decoded {
        TelemetryRecord::ConnectionState(state) => {
            assert!(state.is_client_connected);
            assert!(!state.is_client_disconnected);
            assert_eq!(state.header.type_id, CONNECTION_STATE_TYPE_ID);
        }
        other => panic!("unexpected variant {}", other.kind()),
    }
    Ok(())
}

#[test]
fn sparse_json_fills_defaults() -> anyhow::Result<()> {
    let raw = r#"{
        "kind": "actuator",
        "data": { "device_id": "valve-3", "timestamp": "2024-05-01T12:00:00Z", "command": 2 }
    }"#;
    let record = TelemetryRecord::from_json(raw)?;
    let expected = ActuatorData::new(
        RecordHeader::new("", "valve-3").with_timestamp("2024-05-01T12:00:00Z".parse()?),
        2,
        0.0,
    );
    assert_eq!(record, TelemetryRecord::Actuator(expected));
    Ok(())
}

#[test]
fn sparse_connection_state_uses_broker_defaults() -> anyhow::Result<()> {
    let raw = r#"{
        "kind": "connection_state",
        "data": { "device_id": "d1", "timestamp": "2024-05-01T12:00:00Z", "is_client_connected": true }
    }"#;
    match TelemetryRecord::from_json(raw)? {
        TelemetryRecord::ConnectionState(state) => {
            assert_eq!(state.header.device_id, "d1");
            assert_eq!(state.host_name, "localhost");
            assert_eq!(state.host_port, 1883);
            assert!(state.client_id.is_empty());
            assert!(state.is_client_connected);
        }
        other => panic!("unexpected variant {}", other.kind()),
    }
    Ok(())
}

#[test]
fn malformed_json_is_an_error() {
    assert!(TelemetryRecord::from_json(r#"{"kind":"unknown","data":{}}"#).is_err());
}
