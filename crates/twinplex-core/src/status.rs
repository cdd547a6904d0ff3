//! ---
//! ems_section: "03-persistence-logging"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "System-status listener writing every callback to tracing."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::error::Error as StdError;

use tracing::{debug, error, info, trace, warn};
use twinplex_msg::{
    ConnectionStateData, SystemStatusListener, TelemetryRecord, UserEventListener, UserEventType,
};

/// Default status sink; maps each callback onto the matching tracing level.
#[derive(Debug, Clone)]
pub struct TracingStatusListener {
    label: String,
}

impl TracingStatusListener {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

impl Default for TracingStatusListener {
    fn default() -> Self {
        Self::new("plexus")
    }
}

impl SystemStatusListener for TracingStatusListener {
    fn log_debug(&self, message: &str) {
        debug!(listener = %self.label, "{message}");
    }

    fn log_warning(&self, message: &str) {
        warn!(listener = %self.label, "{message}");
    }

    fn log_error(&self, message: &str, cause: Option<&(dyn StdError + 'static)>) {
        match cause {
            Some(cause) => error!(listener = %self.label, error = %cause, "{message}"),
            None => error!(listener = %self.label, "{message}"),
        }
    }

    fn on_data_received(&self, record: &TelemetryRecord) {
        trace!(
            listener = %self.label,
            device_id = %record.device_id(),
            kind = record.kind(),
            "data received"
        );
    }

    fn on_data_sent(&self, state: &ConnectionStateData) {
        debug!(
            listener = %self.label,
            device_id = %state.header.device_id,
            msg_out_count = state.msg_out_count,
            "data sent"
        );
    }

    fn on_status_update(&self, state: &ConnectionStateData) {
        if state.is_internal_message {
            debug!(listener = %self.label, "device roster changed");
            return;
        }
        info!(
            listener = %self.label,
            device_id = %state.header.device_id,
            connected = state.is_client_connected,
            host = %state.host_name,
            port = state.host_port,
            "connection status"
        );
    }

    fn on_model_update(&self) {
        info!(listener = %self.label, "model definitions updated");
    }
}

impl UserEventListener for TracingStatusListener {
    fn handle_user_event(&self, event: UserEventType) {
        info!(listener = %self.label, event = ?event, "user event");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn every_callback_is_safe_without_a_subscriber() {
        let listener = TracingStatusListener::new("test");
        let cause = io::Error::new(io::ErrorKind::Other, "disk full");
        listener.log_debug("debug");
        listener.log_warning("warning");
        listener.log_error("error", Some(&cause));
        listener.log_error("error", None);
        listener.on_status_update(&ConnectionStateData::new("d1"));
        listener.on_status_update(&ConnectionStateData::internal_notification("twinplex"));
        listener.on_data_sent(&ConnectionStateData::new("d1"));
        listener.on_model_update();
        listener.handle_user_event(UserEventType::Pause);
        assert_eq!(listener.label(), "test");
    }
}
