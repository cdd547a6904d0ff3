//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Structured logging and metrics for telemetry flow."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use prometheus::{IntCounter, IntCounterVec, Opts, Registry};
use tracing::debug;

use crate::types::TelemetryRecord;

/// Direction of the record movement, used for consistent logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordDirection {
    /// Record entering the router.
    Inbound,
    /// Record announced as sent to a remote party.
    Outbound,
    /// Record emitted by a historian player.
    Replay,
}

/// Emit a structured log entry for record activity.
pub fn log_record(direction: RecordDirection, record: &TelemetryRecord) {
    let header = record.header();
    debug!(
        device_id = %header.device_id,
        location_id = %header.location_id,
        kind = record.kind(),
        type_category_id = header.type_category_id,
        type_id = header.type_id,
        timestamp = %header.timestamp,
        direction = ?direction,
        "telemetry activity"
    );
}

/// Prometheus metric handles for telemetry routing.
pub struct TelemetryMetricsExporter {
    received: IntCounterVec,
    dispatched: IntCounter,
    dropped: IntCounter,
    listener_panics: IntCounter,
}

impl TelemetryMetricsExporter {
    /// Register telemetry metrics with the provided registry.
    pub fn register(registry: &Registry) -> Result<Self, prometheus::Error> {
        let received = IntCounterVec::new(
            Opts::new(
                "telemetry_records_received_total",
                "Telemetry records accepted by the router",
            ),
            &["kind"],
        )?;
        let dispatched = IntCounter::with_opts(Opts::new(
            "telemetry_listener_dispatches_total",
            "Listener invocations performed by the router",
        ))?;
        let dropped = IntCounter::with_opts(Opts::new(
            "telemetry_records_dropped_total",
            "Records discarded at the router boundary",
        ))?;
        let listener_panics = IntCounter::with_opts(Opts::new(
            "telemetry_listener_panics_total",
            "Listener invocations that panicked and were isolated",
        ))?;

        registry.register(Box::new(received.clone()))?;
        registry.register(Box::new(dispatched.clone()))?;
        registry.register(Box::new(dropped.clone()))?;
        registry.register(Box::new(listener_panics.clone()))?;

        Ok(Self {
            received,
            dispatched,
            dropped,
            listener_panics,
        })
    }

    /// Record an accepted record.
    pub fn observe_received(&self, record: &TelemetryRecord) {
        self.received.with_label_values(&[record.kind()]).inc();
    }

    /// Record listener invocations.
    pub fn observe_dispatched(&self, count: usize) {
        self.dispatched.inc_by(count as u64);
    }

    /// Record a dropped record.
    pub fn observe_dropped(&self) {
        self.dropped.inc();
    }

    /// Record an isolated listener panic.
    pub fn observe_listener_panic(&self) {
        self.listener_panics.inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{RecordHeader, SensorData};

    #[test]
    fn exporter_records_counts() {
        let registry = Registry::new();
        let metrics = TelemetryMetricsExporter::register(&registry).expect("register metrics");
        let record: TelemetryRecord = SensorData::new(RecordHeader::new("Temp", "d1"), 1.0).into();
        metrics.observe_received(&record);
        metrics.observe_dispatched(3);
        metrics.observe_dropped();
        metrics.observe_listener_panic();
        log_record(RecordDirection::Inbound, &record);

        let families = registry.gather();
        let dispatched = families
            .iter()
            .find(|f| f.get_name() == "telemetry_listener_dispatches_total")
            .expect("dispatch family");
        assert_eq!(dispatched.get_metric()[0].get_counter().get_value(), 3.0);
        assert!(families
            .iter()
            .any(|f| f.get_name() == "telemetry_records_received_total"));
    }

    #[test]
    fn double_registration_is_rejected() {
        let registry = Registry::new();
        TelemetryMetricsExporter::register(&registry).expect("first registration");
        assert!(TelemetryMetricsExporter::register(&registry).is_err());
    }
}
