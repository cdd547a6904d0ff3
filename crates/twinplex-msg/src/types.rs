//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Telemetry record variants and their JSON/CBOR codecs."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Result;

/// Placeholder device identifier carried by unconfigured publishers.
pub const NOT_SET: &str = "Not-Set";
/// Placeholder device identifier carried by template payloads.
pub const UUID_PLACEHOLDER: &str = "UUID";
/// Category assigned to records without an explicit classification.
pub const DEFAULT_TYPE_CATEGORY_ID: i32 = 0;
/// Type assigned to records without an explicit classification.
pub const DEFAULT_TYPE_ID: i32 = 0;
/// Category of system-level records such as connection state.
pub const SYSTEM_TYPE_CATEGORY_ID: i32 = 8000;
/// Type of connection-state records.
pub const CONNECTION_STATE_TYPE_ID: i32 = 8002;

const DEFAULT_HOST_NAME: &str = "localhost";
const DEFAULT_HOST_PORT: u16 = 1883;

fn default_host_name() -> String {
    DEFAULT_HOST_NAME.to_owned()
}

fn default_host_port() -> u16 {
    DEFAULT_HOST_PORT
}

/// Identity and classification fields shared by every record variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordHeader {
    /// Human readable record name.
    #[serde(default)]
    pub name: String,
    /// Device the record originates from. May be empty for malformed input.
    #[serde(default)]
    pub device_id: String,
    /// Location of the device.
    #[serde(default)]
    pub location_id: String,
    /// Configuration category of the record.
    #[serde(default)]
    pub type_category_id: i32,
    /// Configuration type within the category.
    #[serde(default)]
    pub type_id: i32,
    /// Publisher supplied status code.
    #[serde(default)]
    pub status_code: i32,
    /// When the record was produced.
    pub timestamp: DateTime<Utc>,
}

impl RecordHeader {
    /// Header stamped now with default classification.
    pub fn new(name: impl Into<String>, device_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            device_id: device_id.into(),
            location_id: String::new(),
            type_category_id: DEFAULT_TYPE_CATEGORY_ID,
            type_id: DEFAULT_TYPE_ID,
            status_code: 0,
            timestamp: Utc::now(),
        }
    }

    /// Set the location identifier.
    pub fn with_location(mut self, location_id: impl Into<String>) -> Self {
        self.location_id = location_id.into();
        self
    }

    /// Set the category and type identifiers.
    pub fn with_type(mut self, type_category_id: i32, type_id: i32) -> Self {
        self.type_category_id = type_category_id;
        self.type_id = type_id;
        self
    }

    /// Override the production timestamp.
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// Command or state report for an actuator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActuatorData {
    /// Shared record fields.
    #[serde(flatten)]
    pub header: RecordHeader,
    /// Command code understood by the device.
    #[serde(default)]
    pub command: i32,
    /// Free-form state payload.
    #[serde(default)]
    pub state_data: String,
    /// Commanded or reported value.
    #[serde(default)]
    pub value: f64,
    /// Whether this is the device's response to a command.
    #[serde(default)]
    pub is_response: bool,
}

impl ActuatorData {
    /// Actuator command with the given value.
    pub fn new(header: RecordHeader, command: i32, value: f64) -> Self {
        Self {
            header,
            command,
            state_data: String::new(),
            value,
            is_response: false,
        }
    }
}

/// Single sensor reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorData {
    /// Shared record fields.
    #[serde(flatten)]
    pub header: RecordHeader,
    /// Measured value.
    #[serde(default)]
    pub value: f64,
}

impl SensorData {
    /// Sensor reading with the given value.
    pub fn new(header: RecordHeader, value: f64) -> Self {
        Self { header, value }
    }
}

/// Host utilisation sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemPerformanceData {
    /// Shared record fields.
    #[serde(flatten)]
    pub header: RecordHeader,
    /// CPU utilisation, percent.
    #[serde(default)]
    pub cpu_utilization: f64,
    /// Memory utilisation, percent.
    #[serde(default)]
    pub memory_utilization: f64,
    /// Disk utilisation, percent.
    #[serde(default)]
    pub disk_utilization: f64,
}

/// Text message emitted by a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageData {
    /// Shared record fields.
    #[serde(flatten)]
    pub header: RecordHeader,
    /// Message body.
    #[serde(default)]
    pub message: String,
}

/// Last known connection state of a device or client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionStateData {
    /// Shared record fields.
    #[serde(flatten)]
    pub header: RecordHeader,
    /// Broker host.
    #[serde(default = "default_host_name")]
    pub host_name: String,
    /// Broker port.
    #[serde(default = "default_host_port")]
    pub host_port: u16,
    /// Client identifier at the broker.
    #[serde(default)]
    pub client_id: String,
    /// Topic or resource prefix used by the client.
    #[serde(default)]
    pub resource_prefix: String,
    /// Last status message.
    #[serde(default)]
    pub message: String,
    /// Messages received by the client.
    #[serde(default)]
    pub msg_in_count: u64,
    /// Messages sent by the client.
    #[serde(default)]
    pub msg_out_count: u64,
    /// Connection attempt in progress.
    #[serde(default)]
    pub is_client_connecting: bool,
    /// Client is connected.
    #[serde(default)]
    pub is_client_connected: bool,
    /// Client reported a disconnect.
    #[serde(default)]
    pub is_client_disconnected: bool,
    /// Synthetic "re-read state now" notification, never a real device event.
    #[serde(default)]
    pub is_internal_message: bool,
}

impl ConnectionStateData {
    /// Disconnected state row for `device_id`.
    pub fn new(device_id: impl Into<String>) -> Self {
        let header = RecordHeader::new("ConnectionState", device_id)
            .with_type(SYSTEM_TYPE_CATEGORY_ID, CONNECTION_STATE_TYPE_ID);
        Self {
            header,
            host_name: DEFAULT_HOST_NAME.to_owned(),
            host_port: DEFAULT_HOST_PORT,
            client_id: String::new(),
            resource_prefix: String::new(),
            message: String::new(),
            msg_in_count: 0,
            msg_out_count: 0,
            is_client_connecting: false,
            is_client_connected: false,
            is_client_disconnected: false,
            is_internal_message: false,
        }
    }

    /// Synthetic notification asking listeners to re-read the device roster.
    pub fn internal_notification(device_id: impl Into<String>) -> Self {
        let mut state = Self::new(device_id);
        state.is_internal_message = true;
        state
    }

    /// Mark the client connected and clear the other connection flags.
    pub fn set_connected(&mut self, connected: bool) {
        self.is_client_connected = connected;
        self.is_client_connecting = false;
        self.is_client_disconnected = !connected;
    }

    /// Overwrite every field from an authoritative connection-state record.
    pub fn update_from(&mut self, other: &ConnectionStateData) {
        self.clone_from(other);
    }

    /// Copy the descriptive header fields of another record.
    ///
    /// Category and type identifiers stay those of a connection-state row.
    pub fn merge_header(&mut self, header: &RecordHeader) {
        self.header.name.clone_from(&header.name);
        self.header.device_id.clone_from(&header.device_id);
        self.header.location_id.clone_from(&header.location_id);
        self.header.status_code = header.status_code;
        self.header.timestamp = header.timestamp;
    }
}

/// One timestamped telemetry event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum TelemetryRecord {
    /// Actuator command or response.
    Actuator(ActuatorData),
    /// Sensor reading.
    Sensor(SensorData),
    /// Connection state of a device or client.
    ConnectionState(ConnectionStateData),
    /// Host performance sample.
    SystemPerformance(SystemPerformanceData),
    /// Device text message.
    Message(MessageData),
}

impl TelemetryRecord {
    /// Shared fields of the wrapped variant.
    pub fn header(&self) -> &RecordHeader {
        match self {
            TelemetryRecord::Actuator(data) => &data.header,
            TelemetryRecord::Sensor(data) => &data.header,
            TelemetryRecord::ConnectionState(data) => &data.header,
            TelemetryRecord::SystemPerformance(data) => &data.header,
            TelemetryRecord::Message(data) => &data.header,
        }
    }

    /// Device identifier of the wrapped variant.
    pub fn device_id(&self) -> &str {
        &self.header().device_id
    }

    /// Production timestamp of the wrapped variant.
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.header().timestamp
    }

    /// Variant tag as a static string.
    pub fn kind(&self) -> &'static str {
        match self {
            TelemetryRecord::Actuator(_) => "actuator",
            TelemetryRecord::Sensor(_) => "sensor",
            TelemetryRecord::ConnectionState(_) => "connection_state",
            TelemetryRecord::SystemPerformance(_) => "system_performance",
            TelemetryRecord::Message(_) => "message",
        }
    }

    /// True for synthetic connection-state notifications.
    pub fn is_internal(&self) -> bool {
        matches!(self, TelemetryRecord::ConnectionState(state) if state.is_internal_message)
    }

    /// Encode as JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode from JSON.
    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Encode as CBOR.
    pub fn to_cbor(&self) -> Result<Vec<u8>> {
        Ok(serde_cbor::to_vec(self)?)
    }

    /// Decode from CBOR.
    pub fn from_cbor(raw: &[u8]) -> Result<Self> {
        Ok(serde_cbor::from_slice(raw)?)
    }
}

impl From<ActuatorData> for TelemetryRecord {
    fn from(value: ActuatorData) -> Self {
        TelemetryRecord::Actuator(value)
    }
}

impl From<SensorData> for TelemetryRecord {
    fn from(value: SensorData) -> Self {
        TelemetryRecord::Sensor(value)
    }
}

impl From<ConnectionStateData> for TelemetryRecord {
    fn from(value: ConnectionStateData) -> Self {
        TelemetryRecord::ConnectionState(value)
    }
}

impl From<SystemPerformanceData> for TelemetryRecord {
    fn from(value: SystemPerformanceData) -> Self {
        TelemetryRecord::SystemPerformance(value)
    }
}

impl From<MessageData> for TelemetryRecord {
    fn from(value: MessageData) -> Self {
        TelemetryRecord::Message(value)
    }
}
