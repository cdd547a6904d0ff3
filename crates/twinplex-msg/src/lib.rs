//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Telemetry record model and listener capabilities."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! Typed telemetry payloads shared by the router and the historian, plus the
//! listener capabilities both sides implement.

pub mod listener;
pub mod logging;
pub mod types;

/// Shared result type for record encoding.
pub type Result<T> = std::result::Result<T, TelemetryError>;

/// Errors raised while encoding or decoding telemetry records.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// Wrapper for JSON serialization or deserialization problems.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    /// Wrapper for CBOR serialization or deserialization problems.
    #[error("cbor serialization error: {0}")]
    Cbor(#[from] serde_cbor::Error),
}

pub use listener::{
    DataContextListener, SystemStatusListener, UserEventListener, UserEventType,
};
pub use logging::{log_record, RecordDirection, TelemetryMetricsExporter};
pub use types::{
    ActuatorData, ConnectionStateData, MessageData, RecordHeader, SensorData,
    SystemPerformanceData, TelemetryRecord, CONNECTION_STATE_TYPE_ID, DEFAULT_TYPE_CATEGORY_ID,
    DEFAULT_TYPE_ID, NOT_SET, SYSTEM_TYPE_CATEGORY_ID, UUID_PLACEHOLDER,
};
