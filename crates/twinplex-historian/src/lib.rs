//! ---
//! ems_section: "03-persistence-logging"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Telemetry historian caches, storage bindings, and playback."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! Records telemetry streams into named caches, persists them through a storer
//! capability and replays them at an adjustable pace.

/// Result alias used throughout the historian crate.
pub type Result<T> = std::result::Result<T, HistorianError>;

/// Error type for the historian subsystem.
#[derive(Debug, thiserror::Error)]
pub enum HistorianError {
    /// Wrapper for IO errors encountered while reading/writing cache files.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Wrapper for JSON serialization issues.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    /// Wrapper for CBOR serialization issues.
    #[error("cbor serialization error: {0}")]
    Cbor(#[from] serde_cbor::Error),
    /// Reported when a stored cache fails integrity verification.
    #[error("cache '{0}' hash mismatch")]
    HashMismatch(String),
    /// No storer capability is bound to the player.
    #[error("no data storer bound to historian cache '{0}'")]
    NoStorer(String),
    /// Nothing to persist.
    #[error("historian cache '{0}' has no entries")]
    EmptyCache(String),
}

pub mod cache;
pub mod delay;
pub mod entry;
pub mod manager;
pub mod player;
pub mod storer;

pub use cache::{normalize_cache_name, HistorianCache};
pub use delay::{calculate_delay_factor, scale_interval};
pub use entry::HistorianCacheEntry;
pub use manager::HistorianManager;
pub use player::{HistorianPlayer, PlaybackState, PlayerOptions};
pub use storer::{CacheFormat, DataLoader, DataStorer, FileCacheStore, CACHE_FILE_VERSION};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_messages_name_the_cache() {
        let err = HistorianError::NoStorer("lab_cache".into());
        assert_eq!(
            format!("{err}"),
            "no data storer bound to historian cache 'lab_cache'"
        );
    }
}
