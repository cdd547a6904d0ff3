//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Event plexus routing, device state, and listener fan-out."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Process-wide telemetry router for the twin runtime.
//!
//! The [`EventPlexus`] accepts telemetry records, keeps the device and
//! connection caches current, hands records to the model collaborator and
//! fans them out to registered listeners. Historian players replay through
//! the same entry point, so downstream listeners cannot tell replay from live
//! data.

pub mod collaborators;
pub mod lifecycle;
pub mod plexus;
pub mod registry;
pub mod state;
pub mod status;

/// Result alias for plexus operations.
pub type Result<T> = std::result::Result<T, PlexusError>;

/// Errors surfaced by the few fallible plexus operations.
///
/// Ingestion and dispatch never fail; see [`EventPlexus::on_data_received`].
#[derive(Debug, thiserror::Error)]
pub enum PlexusError {
    #[error("historian error: {0}")]
    Historian(#[from] twinplex_historian::HistorianError),
    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
    #[error("metrics already registered for plexus {0}")]
    MetricsAlreadyRegistered(uuid::Uuid),
}

pub use collaborators::{
    ConfigTypeLookup, ModelResolver, RemoteStateProcessor, ResourceName, SyncKeyModelResolver,
    TypeIdentifiers, TypeTableLookup,
};
pub use lifecycle::PlexusRegistry;
pub use plexus::{EventPlexus, PlexusCollaborators};
pub use registry::{DispatchReport, ListenerRegistry};
pub use state::DeviceStateCache;
pub use status::TracingStatusListener;
