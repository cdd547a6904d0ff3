//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Process-wide plexus slot with get-or-create and terminate."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tracing::{debug, info};
use twinplex_common::AppConfig;

use crate::plexus::{EventPlexus, PlexusCollaborators};

#[derive(Default)]
enum Lifecycle {
    #[default]
    Uninitialized,
    Ready(Arc<EventPlexus>),
    Terminated,
}

/// Slot holding at most one plexus over its lifetime.
///
/// The first `get_or_create_with` constructs; later callers share that
/// instance. After `terminate` every request yields `None`.
#[derive(Default)]
pub struct PlexusRegistry {
    slot: Mutex<Lifecycle>,
}

static GLOBAL: Lazy<PlexusRegistry> = Lazy::new(PlexusRegistry::new);

impl PlexusRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide registry behind [`EventPlexus::instance`].
    pub fn global() -> &'static PlexusRegistry {
        &GLOBAL
    }

    pub fn get_or_create_with<F>(&self, init: F) -> Option<Arc<EventPlexus>>
    where
        F: FnOnce() -> Arc<EventPlexus>,
    {
        let mut slot = self.slot.lock();
        match &*slot {
            Lifecycle::Ready(plexus) => Some(Arc::clone(plexus)),
            Lifecycle::Terminated => {
                debug!("plexus requested after termination");
                None
            }
            Lifecycle::Uninitialized => {
                let plexus = init();
                *slot = Lifecycle::Ready(Arc::clone(&plexus));
                Some(plexus)
            }
        }
    }

    /// Current instance without constructing one.
    pub fn get(&self) -> Option<Arc<EventPlexus>> {
        match &*self.slot.lock() {
            Lifecycle::Ready(plexus) => Some(Arc::clone(plexus)),
            _ => None,
        }
    }

    pub fn is_terminated(&self) -> bool {
        matches!(*self.slot.lock(), Lifecycle::Terminated)
    }

    /// Move to the terminal state, shutting down the live instance if any.
    /// Returns true when an instance was shut down.
    pub fn terminate(&self) -> bool {
        let previous = std::mem::replace(&mut *self.slot.lock(), Lifecycle::Terminated);
        match previous {
            Lifecycle::Ready(plexus) => {
                plexus.shutdown();
                info!(guid = %plexus.guid(), "plexus terminated");
                true
            }
            _ => false,
        }
    }
}

impl EventPlexus {
    /// Shared instance, built from default configuration on first use.
    pub fn instance() -> Option<Arc<EventPlexus>> {
        PlexusRegistry::global().get_or_create_with(|| {
            let config = AppConfig::default();
            let collaborators = PlexusCollaborators::for_config(&config);
            EventPlexus::new(&config, collaborators)
        })
    }

    /// Build the shared instance from `config`. An existing instance is
    /// returned unchanged.
    pub fn init_global(
        config: &AppConfig,
        collaborators: PlexusCollaborators,
    ) -> Option<Arc<EventPlexus>> {
        PlexusRegistry::global().get_or_create_with(|| EventPlexus::new(config, collaborators))
    }

    pub fn terminate_global() -> bool {
        PlexusRegistry::global().terminate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(dir: &tempfile::TempDir) -> Arc<EventPlexus> {
        let mut config = AppConfig::default();
        config.historian.root_path = dir.path().to_path_buf();
        let collaborators = PlexusCollaborators::for_config(&config);
        EventPlexus::new(&config, collaborators)
    }

    #[test]
    fn first_caller_constructs_and_others_share() {
        let dir = tempfile::tempdir().unwrap();
        let registry = PlexusRegistry::new();
        assert!(registry.get().is_none());

        let first = registry.get_or_create_with(|| build(&dir)).unwrap();
        let second = registry
            .get_or_create_with(|| panic!("must not construct twice"))
            .unwrap();
        assert_eq!(first.guid(), second.guid());
    }

    #[test]
    fn terminated_registry_never_recreates() {
        let dir = tempfile::tempdir().unwrap();
        let registry = PlexusRegistry::new();
        let plexus = registry.get_or_create_with(|| build(&dir)).unwrap();
        plexus.register_user_event_listener(Arc::new(crate::TracingStatusListener::default()));

        assert!(registry.terminate());
        assert!(registry.is_terminated());
        assert_eq!(plexus.listener_counts(), (0, 0, 0));
        assert!(registry.get_or_create_with(|| build(&dir)).is_none());
        assert!(!registry.terminate());
    }

    #[test]
    fn terminate_before_first_use_blocks_construction() {
        let registry = PlexusRegistry::new();
        assert!(!registry.terminate());
        assert!(registry
            .get_or_create_with(|| panic!("must not construct"))
            .is_none());
    }
}
