//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Capabilities the plexus delegates to."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use twinplex_msg::{ConnectionStateData, TelemetryRecord};

/// Addressable resource on a remote device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceName {
    pub device_id: String,
    pub resource: String,
    #[serde(default)]
    pub type_category_id: i32,
    #[serde(default)]
    pub type_id: i32,
    /// Encoded state to push, if any.
    #[serde(default)]
    pub payload: Option<String>,
}

impl ResourceName {
    pub fn new(device_id: impl Into<String>, resource: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            resource: resource.into(),
            type_category_id: 0,
            type_id: 0,
            payload: None,
        }
    }

    pub fn with_payload(mut self, payload: impl Into<String>) -> Self {
        self.payload = Some(payload.into());
        self
    }
}

impl fmt::Display for ResourceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.device_id, self.resource)
    }
}

/// Transport-side command path. Bound at most once per plexus.
pub trait RemoteStateProcessor: Send + Sync {
    fn send_state_update_to_physical_thing(&self, resource: &ResourceName) -> bool;
    fn enable_live_data_feed(&self, state: Option<&ConnectionStateData>, enable: bool);
    fn enable_simulated_data_feed(&self, enable: bool);
    fn start_connection_resources(&self) -> bool;
    fn stop_connection_resources(&self) -> bool;
}

/// Model-definition boundary.
pub trait ModelResolver: Send + Sync {
    /// Replace the model search paths. Returns true when the models reloaded.
    fn update_model_file_paths(&self, paths: &[PathBuf]) -> bool;

    /// Key naming the model state `record` updates.
    fn generate_data_sync_key(&self, record: &TelemetryRecord) -> String;

    /// Forward a record to the model layer.
    fn handle_incoming_telemetry(&self, _record: &TelemetryRecord) -> bool {
        false
    }
}

/// Category and type identifiers of a configuration type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeIdentifiers {
    pub type_category_id: i32,
    pub type_id: i32,
}

/// Configuration-type mapping boundary.
pub trait ConfigTypeLookup: Send + Sync {
    fn lookup_type_by_name(&self, name: &str) -> Option<TypeIdentifiers>;

    /// Replace the mapping files. Returns true when the mappings reloaded.
    fn update_config_type_file_paths(&self, paths: &[PathBuf]) -> bool;
}

/// Resolver that only derives sync keys and tracks the configured model paths.
///
/// Keys have the form `device:category:type:owner`; a blank device id is
/// replaced with the owner.
#[derive(Debug)]
pub struct SyncKeyModelResolver {
    owner: String,
    paths: RwLock<Vec<PathBuf>>,
}

impl SyncKeyModelResolver {
    pub fn new(owner: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            paths: RwLock::new(Vec::new()),
        }
    }

    pub fn model_paths(&self) -> Vec<PathBuf> {
        self.paths.read().clone()
    }
}

impl ModelResolver for SyncKeyModelResolver {
    fn update_model_file_paths(&self, paths: &[PathBuf]) -> bool {
        if paths.is_empty() {
            return false;
        }
        if let Some(missing) = paths.iter().find(|path| !path.exists()) {
            warn!(path = %missing.display(), "model path does not exist");
            return false;
        }
        *self.paths.write() = paths.to_vec();
        debug!(count = paths.len(), "model paths updated");
        true
    }

    fn generate_data_sync_key(&self, record: &TelemetryRecord) -> String {
        let header = record.header();
        let device = header.device_id.trim();
        let device = if device.is_empty() { self.owner.as_str() } else { device };
        format!(
            "{}:{}:{}:{}",
            device, header.type_category_id, header.type_id, self.owner
        )
    }
}

/// Name to type-identifier table loaded from TOML or JSON files.
///
/// Each file is a flat map, e.g. `TempSensor = { type_category_id = 1000, type_id = 1013 }`.
#[derive(Debug, Default)]
pub struct TypeTableLookup {
    table: RwLock<IndexMap<String, TypeIdentifiers>>,
}

impl TypeTableLookup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, name: impl Into<String>, ids: TypeIdentifiers) {
        self.table.write().insert(name.into(), ids);
    }

    fn read_table(path: &Path) -> Option<IndexMap<String, TypeIdentifiers>> {
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "unable to read config type table");
                return None;
            }
        };
        let parsed: std::result::Result<IndexMap<String, TypeIdentifiers>, String> =
            match path.extension().and_then(|ext| ext.to_str()) {
                Some("json") => serde_json::from_str(&contents).map_err(|err| err.to_string()),
                _ => toml::from_str(&contents).map_err(|err| err.to_string()),
            };
        parsed
            .map_err(|err| warn!(path = %path.display(), error = %err, "invalid config type table"))
            .ok()
    }
}

impl ConfigTypeLookup for TypeTableLookup {
    fn lookup_type_by_name(&self, name: &str) -> Option<TypeIdentifiers> {
        self.table.read().get(name).copied()
    }

    fn update_config_type_file_paths(&self, paths: &[PathBuf]) -> bool {
        if paths.is_empty() {
            return false;
        }
        let mut merged = IndexMap::new();
        for path in paths {
            match Self::read_table(path) {
                Some(table) => merged.extend(table),
                None => return false,
            }
        }
        debug!(entries = merged.len(), files = paths.len(), "config type table reloaded");
        *self.table.write() = merged;
        true
    }
}
