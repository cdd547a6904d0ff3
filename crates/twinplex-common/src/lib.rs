//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Shared primitives and utilities for the twin runtime."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Shared primitives for the twinplex workspace.
//! This crate exposes configuration loading, tracing bootstrap and the
//! time-window helpers consumed by the router and the historian.

pub mod config;
pub mod logging;
pub mod time;

pub use config::{AppConfig, HistorianConfig, LoggingConfig, PlaybackConfig, PlexusConfig};
pub use logging::{init_tracing, LogFormat};
pub use time::{epoch_millis_delta, TimeWindow};
