//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Listener traits for data, status and user events."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::error::Error as StdError;

use serde::{Deserialize, Serialize};

use crate::types::{ConnectionStateData, TelemetryRecord};

/// Operator driven events forwarded to user-event listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserEventType {
    /// Start or resume an activity.
    Start,
    /// Stop an activity.
    Stop,
    /// Pause an activity.
    Pause,
    /// Resume a paused activity.
    Resume,
    /// Reset to the initial state.
    Reset,
    /// Re-read cached views.
    Refresh,
}

/// Receives device telemetry (actuator, sensor, performance and message records).
pub trait DataContextListener: Send + Sync {
    /// Handle one telemetry record.
    fn handle_telemetry(&self, record: &TelemetryRecord);
}

/// Receives status, logging and connection notifications.
///
/// Every hook defaults to a no-op so implementors only override what they use.
pub trait SystemStatusListener: Send + Sync {
    /// Debug level status text.
    fn log_debug(&self, _message: &str) {}

    /// Warning level status text.
    fn log_warning(&self, _message: &str) {}

    /// Error level status text with an optional cause.
    fn log_error(&self, _message: &str, _cause: Option<&(dyn StdError + 'static)>) {}

    /// A record pushed by a data source such as a historian player.
    fn on_data_received(&self, _record: &TelemetryRecord) {}

    /// A connection-state record was sent outward.
    fn on_data_sent(&self, _state: &ConnectionStateData) {}

    /// Connection state changed, or the device roster should be re-read.
    fn on_status_update(&self, _state: &ConnectionStateData) {}

    /// Model definitions were reloaded.
    fn on_model_update(&self) {}
}

/// Receives operator events.
pub trait UserEventListener: Send + Sync {
    /// Handle one operator event.
    fn handle_user_event(&self, event: UserEventType);
}
