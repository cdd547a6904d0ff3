//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Device identity, connection state, and sync key caches."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::collections::{BTreeSet, HashSet};

use indexmap::{IndexMap, IndexSet};
use parking_lot::RwLock;
use tracing::{debug, trace};
use twinplex_msg::{ConnectionStateData, TelemetryRecord};

use crate::collaborators::ModelResolver;

/// Caches derived from the telemetry stream.
///
/// Each table has its own guard and readers only ever receive copies. Only the
/// plexus mutates the tables. Rows are never removed: a device that goes
/// silent stays marked connected until a connection-state record says otherwise.
#[derive(Debug)]
pub struct DeviceStateCache {
    test_ids: HashSet<String>,
    known_ids: RwLock<BTreeSet<String>>,
    connections: RwLock<IndexMap<String, ConnectionStateData>>,
    sync_keys: RwLock<IndexSet<String>>,
}

impl DeviceStateCache {
    /// Cache seeded with `self_id`; `test_ids` are never tracked.
    pub fn new<I, S>(self_id: &str, test_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let test_ids: HashSet<String> = test_ids.into_iter().map(Into::into).collect();
        let mut known = BTreeSet::new();
        if !self_id.is_empty() && !test_ids.contains(self_id) {
            known.insert(self_id.to_owned());
        }
        Self {
            test_ids,
            known_ids: RwLock::new(known),
            connections: RwLock::new(IndexMap::new()),
            sync_keys: RwLock::new(IndexSet::new()),
        }
    }

    pub fn is_test_device(&self, device_id: &str) -> bool {
        self.test_ids.contains(device_id)
    }

    fn is_trackable(&self, device_id: &str) -> bool {
        !device_id.is_empty() && !self.is_test_device(device_id)
    }

    /// Add a device id to the known set. Returns true when it was new.
    pub(crate) fn update_device_id(&self, device_id: &str) -> bool {
        if !self.is_trackable(device_id) {
            return false;
        }
        let inserted = self.known_ids.write().insert(device_id.to_owned());
        if inserted {
            debug!(device_id = %device_id, "new device id registered");
        }
        inserted
    }

    pub(crate) fn update_device_id_set(&self, record: &TelemetryRecord) -> bool {
        self.update_device_id(record.device_id())
    }

    /// Reconcile the connection row of the record's device.
    ///
    /// Connection-state records overwrite the row verbatim. Any other record
    /// merges its header and marks the device connected.
    pub(crate) fn update_connection_state_cache(&self, record: &TelemetryRecord) {
        let device_id = record.device_id();
        if !self.is_trackable(device_id) {
            return;
        }
        let mut connections = self.connections.write();
        let row = connections
            .entry(device_id.to_owned())
            .or_insert_with(|| ConnectionStateData::new(device_id));
        match record {
            TelemetryRecord::ConnectionState(state) => row.update_from(state),
            other => {
                row.merge_header(other.header());
                row.set_connected(true);
            }
        }
        trace!(device_id = %device_id, connected = row.is_client_connected, "connection state updated");
    }

    /// Add the record's sync key. Returns true when it was new.
    pub(crate) fn update_data_sync_key_cache(
        &self,
        record: &TelemetryRecord,
        resolver: &dyn ModelResolver,
    ) -> bool {
        if !self.is_trackable(record.device_id()) {
            return false;
        }
        let key = resolver.generate_data_sync_key(record);
        if self.sync_keys.read().contains(&key) {
            return false;
        }
        self.sync_keys.write().insert(key)
    }

    pub fn known_device_ids(&self) -> BTreeSet<String> {
        self.known_ids.read().clone()
    }

    pub fn test_device_ids(&self) -> BTreeSet<String> {
        self.test_ids.iter().cloned().collect()
    }

    pub fn is_known_device(&self, device_id: &str) -> bool {
        self.known_ids.read().contains(device_id)
    }

    pub fn connection_state(&self, device_id: &str) -> Option<ConnectionStateData> {
        self.connections.read().get(device_id).cloned()
    }

    /// Every connection row, in first-sighting order.
    pub fn connection_states(&self) -> IndexMap<String, ConnectionStateData> {
        self.connections.read().clone()
    }

    /// Every sync key, in first-sighting order.
    pub fn data_sync_keys(&self) -> Vec<String> {
        self.sync_keys.read().iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::SyncKeyModelResolver;
    use twinplex_msg::{ActuatorData, RecordHeader, SensorData};

    fn cache() -> DeviceStateCache {
        DeviceStateCache::new("twinplex", ["Not-Set", "UUID"])
    }

    fn sensor(device: &str) -> TelemetryRecord {
        SensorData::new(RecordHeader::new("Temp", device).with_location("lab"), 1.0).into()
    }

    #[test]
    fn seeded_with_self_id() {
        let cache = cache();
        assert_eq!(
            cache.known_device_ids().into_iter().collect::<Vec<_>>(),
            vec!["twinplex"]
        );
    }

    #[test]
    fn test_and_empty_ids_are_never_tracked() {
        let cache = cache();
        let resolver = SyncKeyModelResolver::new("twinplex");
        for device in ["Not-Set", "UUID", ""] {
            let record = sensor(device);
            assert!(!cache.update_device_id_set(&record));
            cache.update_connection_state_cache(&record);
            assert!(!cache.update_data_sync_key_cache(&record, &resolver));
            assert!(!cache.is_known_device(device));
            assert!(cache.connection_state(device).is_none());
        }
        assert!(cache.data_sync_keys().is_empty());
    }

    #[test]
    fn telemetry_marks_device_connected_and_merges_header() {
        let cache = cache();
        cache.update_connection_state_cache(&sensor("d1"));

        let row = cache.connection_state("d1").expect("row created");
        assert!(row.is_client_connected);
        assert!(!row.is_client_disconnected);
        assert_eq!(row.header.location_id, "lab");
    }

    #[test]
    fn connection_state_record_is_authoritative() {
        let cache = cache();
        cache.update_connection_state_cache(&sensor("d1"));

        let mut update = ConnectionStateData::new("d1");
        update.set_connected(false);
        update.client_id = "d1-client".into();
        cache.update_connection_state_cache(&update.clone().into());

        let row = cache.connection_state("d1").expect("row kept");
        assert_eq!(row, update);

        let actuator: TelemetryRecord =
            ActuatorData::new(RecordHeader::new("Valve", "d1"), 1, 0.5).into();
        cache.update_connection_state_cache(&actuator);
        assert!(cache.connection_state("d1").expect("row kept").is_client_connected);
    }

    #[test]
    fn sync_keys_are_unique_per_device_and_type() {
        let cache = cache();
        let resolver = SyncKeyModelResolver::new("twinplex");
        assert!(cache.update_data_sync_key_cache(&sensor("d1"), &resolver));
        assert!(!cache.update_data_sync_key_cache(&sensor("d1"), &resolver));
        assert!(cache.update_data_sync_key_cache(&sensor("d2"), &resolver));
        assert_eq!(
            cache.data_sync_keys(),
            vec!["d1:0:0:twinplex", "d2:0:0:twinplex"]
        );
    }

    #[test]
    fn snapshots_are_detached_copies() {
        let cache = cache();
        let before = cache.known_device_ids();
        cache.update_device_id("d1");
        assert!(!before.contains("d1"));
        assert!(cache.known_device_ids().contains("d1"));
    }
}
