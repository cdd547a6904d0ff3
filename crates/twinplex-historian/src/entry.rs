//! ---
//! ems_section: "03-persistence-logging"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Timestamped historian cache entry."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use twinplex_common::time::epoch_millis_delta;
use twinplex_msg::TelemetryRecord;

/// One recorded telemetry event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistorianCacheEntry {
    /// Timestamp the entry is ordered and paced by.
    pub recorded_at: DateTime<Utc>,
    /// Device the record was recorded under.
    pub device_id: String,
    /// The wrapped record.
    pub record: TelemetryRecord,
}

impl HistorianCacheEntry {
    /// Wrap a record, keyed by its own timestamp and device.
    pub fn new(record: TelemetryRecord) -> Self {
        Self {
            recorded_at: record.timestamp(),
            device_id: record.device_id().to_owned(),
            record,
        }
    }

    /// Approximate in-memory footprint: encoded record plus encoded timestamp.
    pub fn approx_byte_count(&self) -> usize {
        let payload = serde_json::to_string(&self.record)
            .map(|json| json.len())
            .unwrap_or_default();
        payload
            + self
                .recorded_at
                .to_rfc3339_opts(SecondsFormat::Millis, true)
                .len()
    }

    /// Absolute gap between this entry and `other`.
    pub fn elapsed_between(&self, other: &HistorianCacheEntry) -> Duration {
        epoch_millis_delta(self.recorded_at, other.recorded_at)
    }
}
