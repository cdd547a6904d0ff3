//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Event plexus: ingestion, state upkeep, delegation and fan-out."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::collections::BTreeSet;
use std::error::Error as StdError;
use std::path::PathBuf;
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use once_cell::sync::OnceCell;
use prometheus::Registry;
use tracing::{debug, info, warn};
use twinplex_common::AppConfig;
use twinplex_historian::{HistorianCacheEntry, HistorianManager, HistorianPlayer};
use twinplex_msg::{
    log_record, ConnectionStateData, DataContextListener, RecordDirection, SystemStatusListener,
    TelemetryMetricsExporter, TelemetryRecord, UserEventListener, UserEventType,
};
use uuid::Uuid;

use crate::collaborators::{
    ConfigTypeLookup, ModelResolver, RemoteStateProcessor, ResourceName, SyncKeyModelResolver,
    TypeIdentifiers, TypeTableLookup,
};
use crate::registry::{DispatchReport, ListenerRegistry};
use crate::state::DeviceStateCache;
use crate::{PlexusError, Result};

/// Model and configuration-type collaborators handed to a new plexus.
#[derive(Clone)]
pub struct PlexusCollaborators {
    pub models: Arc<dyn ModelResolver>,
    pub config_types: Arc<dyn ConfigTypeLookup>,
}

impl PlexusCollaborators {
    /// File-backed defaults keyed on the configured self id.
    pub fn for_config(config: &AppConfig) -> Self {
        Self {
            models: Arc::new(SyncKeyModelResolver::new(config.plexus.self_device_id.clone())),
            config_types: Arc::new(TypeTableLookup::new()),
        }
    }
}

/// Router shared by every producer and consumer of telemetry in the process.
///
/// Ingestion never fails. Records without a device id are dropped, panicking
/// listeners are isolated and missing collaborators turn into `false` returns.
pub struct EventPlexus {
    guid: Uuid,
    self_device_id: String,
    state: DeviceStateCache,
    listeners: ListenerRegistry,
    remote: OnceCell<Arc<dyn RemoteStateProcessor>>,
    models: Arc<dyn ModelResolver>,
    config_types: Arc<dyn ConfigTypeLookup>,
    historian: HistorianManager,
    metrics: OnceCell<TelemetryMetricsExporter>,
    self_ref: Weak<EventPlexus>,
}

/// Playback listener handed to historian players; replays enter the plexus
/// through the live ingestion path.
struct PlaybackRelay {
    plexus: Weak<EventPlexus>,
}

impl SystemStatusListener for PlaybackRelay {
    fn on_data_received(&self, record: &TelemetryRecord) {
        if let Some(plexus) = self.plexus.upgrade() {
            plexus.on_data_received(record);
        }
    }
}

impl EventPlexus {
    pub fn new(config: &AppConfig, collaborators: PlexusCollaborators) -> Arc<Self> {
        let self_device_id = config.plexus.self_device_id.clone();
        let plexus = Arc::new_cyclic(|weak| Self {
            guid: Uuid::new_v4(),
            state: DeviceStateCache::new(&self_device_id, config.plexus.test_device_ids.iter().cloned()),
            listeners: ListenerRegistry::new(),
            remote: OnceCell::new(),
            models: collaborators.models,
            config_types: collaborators.config_types,
            historian: HistorianManager::new(&config.historian, self_device_id.clone()),
            metrics: OnceCell::new(),
            self_ref: weak.clone(),
            self_device_id,
        });
        info!(
            guid = %plexus.guid,
            self_device_id = %plexus.self_device_id,
            historian_root = %plexus.historian.root_path().display(),
            "event plexus constructed"
        );
        plexus
    }

    /// Identifier unique to this instance, for session correlation.
    pub fn guid(&self) -> Uuid {
        self.guid
    }

    pub fn self_device_id(&self) -> &str {
        &self.self_device_id
    }

    pub fn historian(&self) -> &HistorianManager {
        &self.historian
    }

    pub fn register_data_context_listener(&self, listener: Arc<dyn DataContextListener>) {
        self.listeners.register_data_context(listener);
    }

    pub fn register_system_status_listener(&self, listener: Arc<dyn SystemStatusListener>) {
        self.listeners.register_system_status(listener);
    }

    pub fn register_user_event_listener(&self, listener: Arc<dyn UserEventListener>) {
        self.listeners.register_user_event(listener);
    }

    pub fn unregister_data_context_listener(&self, listener: &Arc<dyn DataContextListener>) -> bool {
        self.listeners.unregister_data_context(listener)
    }

    pub fn unregister_system_status_listener(&self, listener: &Arc<dyn SystemStatusListener>) -> bool {
        self.listeners.unregister_system_status(listener)
    }

    pub fn unregister_user_event_listener(&self, listener: &Arc<dyn UserEventListener>) -> bool {
        self.listeners.unregister_user_event(listener)
    }

    pub fn clear_all_listeners(&self) {
        self.listeners.clear_all();
    }

    /// Registration counts as `(data_context, system_status, user_event)`.
    pub fn listener_counts(&self) -> (usize, usize, usize) {
        self.listeners.counts()
    }

    /// Bind the transport command path. Only the first call takes effect.
    pub fn set_remote_command_processor(&self, processor: Arc<dyn RemoteStateProcessor>) -> bool {
        let bound = self.remote.set(processor).is_ok();
        if bound {
            info!(guid = %self.guid, "remote state processor bound");
        } else {
            debug!(guid = %self.guid, "remote state processor already bound; ignoring");
        }
        bound
    }

    pub fn has_remote_command_processor(&self) -> bool {
        self.remote.get().is_some()
    }

    /// Ingest one record: update the caches, then fan it out.
    ///
    /// Connection-state records go to system-status listeners through
    /// `on_status_update`; every other variant goes to data-context listeners.
    pub fn on_data_received(&self, record: &TelemetryRecord) {
        if record.device_id().trim().is_empty() {
            debug!(kind = record.kind(), "record without device id dropped");
            if let Some(metrics) = self.metrics.get() {
                metrics.observe_dropped();
            }
            return;
        }
        log_record(RecordDirection::Inbound, record);
        if let Some(metrics) = self.metrics.get() {
            metrics.observe_received(record);
        }

        self.update_internal_state(record);

        let report = match record {
            TelemetryRecord::ConnectionState(state) => self
                .listeners
                .dispatch_system_status(|listener| listener.on_status_update(state)),
            other => self
                .listeners
                .dispatch_data_context(|listener| listener.handle_telemetry(other)),
        };
        self.observe(report);
    }

    /// Ingest a JSON encoded record. Malformed payloads are dropped.
    pub fn on_raw_data_received(&self, raw: &str) -> bool {
        match TelemetryRecord::from_json(raw) {
            Ok(record) => {
                self.on_data_received(&record);
                true
            }
            Err(err) => {
                debug!(error = %err, "malformed telemetry payload dropped");
                if let Some(metrics) = self.metrics.get() {
                    metrics.observe_dropped();
                }
                false
            }
        }
    }

    pub fn on_status_update(&self, state: &ConnectionStateData) {
        self.on_data_received(&TelemetryRecord::ConnectionState(state.clone()));
    }

    /// Announce an outbound message. Sends never touch connection state.
    pub fn on_data_sent(&self, state: &ConnectionStateData) {
        let report = self
            .listeners
            .dispatch_system_status(|listener| listener.on_data_sent(state));
        self.observe(report);
    }

    pub fn on_model_update_event(&self) {
        let report = self
            .listeners
            .dispatch_system_status(|listener| listener.on_model_update());
        self.observe(report);
    }

    pub fn on_user_event(&self, event: UserEventType) {
        debug!(event = ?event, "user event");
        let report = self
            .listeners
            .dispatch_user_event(|listener| listener.handle_user_event(event));
        self.observe(report);
    }

    pub fn log_debug(&self, message: &str) {
        if message.trim().is_empty() {
            return;
        }
        let report = self
            .listeners
            .dispatch_system_status(|listener| listener.log_debug(message));
        self.observe(report);
    }

    pub fn log_warning(&self, message: &str) {
        if message.trim().is_empty() {
            return;
        }
        let report = self
            .listeners
            .dispatch_system_status(|listener| listener.log_warning(message));
        self.observe(report);
    }

    pub fn log_error(&self, message: &str, cause: Option<&(dyn StdError + 'static)>) {
        if message.trim().is_empty() {
            return;
        }
        let report = self
            .listeners
            .dispatch_system_status(|listener| listener.log_error(message, cause));
        self.observe(report);
    }

    pub fn process_state_update_to_physical_thing(&self, resource: &ResourceName) -> bool {
        match self.remote("state update") {
            Some(processor) => {
                debug!(resource = %resource, "forwarding state update");
                processor.send_state_update_to_physical_thing(resource)
            }
            None => false,
        }
    }

    pub fn process_live_data_feed_engage_request(
        &self,
        state: Option<&ConnectionStateData>,
        enable: bool,
    ) -> bool {
        match self.remote("live data feed") {
            Some(processor) => {
                processor.enable_live_data_feed(state, enable);
                true
            }
            None => false,
        }
    }

    pub fn process_simulated_data_feed_engage_request(&self, enable: bool) -> bool {
        match self.remote("simulated data feed") {
            Some(processor) => {
                processor.enable_simulated_data_feed(enable);
                true
            }
            None => false,
        }
    }

    pub fn start_connection_resources(&self) -> bool {
        self.remote("start connection resources")
            .map(|processor| processor.start_connection_resources())
            .unwrap_or(false)
    }

    pub fn stop_connection_resources(&self) -> bool {
        self.remote("stop connection resources")
            .map(|processor| processor.stop_connection_resources())
            .unwrap_or(false)
    }

    /// Fold the device ids of `entries` into the known set, then ask
    /// status listeners to re-read the roster. Returns the number of new ids.
    pub fn update_device_id_content(&self, entries: &[HistorianCacheEntry]) -> usize {
        let added = entries
            .iter()
            .filter(|entry| self.state.update_device_id(entry.record.device_id()))
            .count();
        debug!(entries = entries.len(), added, "device ids folded from historian cache");

        let notice = ConnectionStateData::internal_notification(self.self_device_id.clone());
        let report = self
            .listeners
            .dispatch_system_status(|listener| listener.on_status_update(&notice));
        self.observe(report);
        added
    }

    /// Point the model collaborator at new definitions; notifies listeners on success.
    pub fn load_digital_twin_models(&self, paths: &[PathBuf]) -> bool {
        if self.models.update_model_file_paths(paths) {
            info!(paths = paths.len(), "digital twin models reloaded");
            self.on_model_update_event();
            true
        } else {
            warn!(paths = paths.len(), "digital twin models not reloaded");
            false
        }
    }

    pub fn load_config_type_mapping_models(&self, paths: &[PathBuf]) -> bool {
        if self.config_types.update_config_type_file_paths(paths) {
            info!(paths = paths.len(), "config type mappings reloaded");
            self.on_model_update_event();
            true
        } else {
            warn!(paths = paths.len(), "config type mappings not reloaded");
            false
        }
    }

    pub fn lookup_type_by_name(&self, name: &str) -> Option<TypeIdentifiers> {
        self.config_types.lookup_type_by_name(name)
    }

    /// Player for a named cache, loaded from disk on first use and wired to
    /// replay through this plexus.
    pub fn data_historian_player(&self, cache_name: &str) -> Result<Arc<HistorianPlayer>> {
        let player = self.historian.player(cache_name, true)?;
        self.attach_player(&player);
        Ok(player)
    }

    /// Player over a fresh, generated cache name.
    pub fn create_data_historian_player(&self) -> Arc<HistorianPlayer> {
        let player = self.historian.create_player();
        self.attach_player(&player);
        player
    }

    pub fn known_device_ids(&self) -> BTreeSet<String> {
        self.state.known_device_ids()
    }

    pub fn test_device_ids(&self) -> BTreeSet<String> {
        self.state.test_device_ids()
    }

    pub fn is_known_device(&self, device_id: &str) -> bool {
        self.state.is_known_device(device_id)
    }

    pub fn connection_state(&self, device_id: &str) -> Option<ConnectionStateData> {
        self.state.connection_state(device_id)
    }

    pub fn connection_states(&self) -> IndexMap<String, ConnectionStateData> {
        self.state.connection_states()
    }

    pub fn data_sync_keys(&self) -> Vec<String> {
        self.state.data_sync_keys()
    }

    /// Export routing counters through `registry`. Allowed once per instance.
    pub fn register_metrics(&self, registry: &Registry) -> Result<()> {
        if self.metrics.get().is_some() {
            return Err(PlexusError::MetricsAlreadyRegistered(self.guid));
        }
        let exporter = TelemetryMetricsExporter::register(registry)?;
        self.metrics
            .set(exporter)
            .map_err(|_| PlexusError::MetricsAlreadyRegistered(self.guid))
    }

    /// Drop every listener and halt all playback.
    pub fn shutdown(&self) {
        self.listeners.clear_all();
        self.historian.stop_all();
        info!(guid = %self.guid, "event plexus shut down");
    }

    fn update_internal_state(&self, record: &TelemetryRecord) {
        if record.is_internal() {
            return;
        }
        self.state.update_device_id_set(record);
        self.state.update_connection_state_cache(record);
        if self.state.is_test_device(record.device_id()) {
            return;
        }
        if self
            .state
            .update_data_sync_key_cache(record, self.models.as_ref())
        {
            debug!(device_id = %record.device_id(), kind = record.kind(), "new data sync key");
        }
        self.models.handle_incoming_telemetry(record);
    }

    fn remote(&self, operation: &'static str) -> Option<&Arc<dyn RemoteStateProcessor>> {
        let processor = self.remote.get();
        if processor.is_none() {
            warn!(operation, "no remote state processor bound");
            self.log_warning(&format!(
                "{operation} ignored: no remote state processor bound"
            ));
        }
        processor
    }

    fn attach_player(&self, player: &Arc<HistorianPlayer>) {
        player.set_playback_listener(Arc::new(PlaybackRelay {
            plexus: self.self_ref.clone(),
        }));
        self.update_device_id_content(&player.cache().entries());
    }

    fn observe(&self, report: DispatchReport) {
        let Some(metrics) = self.metrics.get() else {
            return;
        };
        metrics.observe_dispatched(report.delivered);
        for _ in 0..report.panicked {
            metrics.observe_listener_panic();
        }
    }
}

impl std::fmt::Debug for EventPlexus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventPlexus")
            .field("guid", &self.guid)
            .field("self_device_id", &self.self_device_id)
            .field("listeners", &self.listeners.counts())
            .field("remote_bound", &self.has_remote_command_processor())
            .finish()
    }
}
