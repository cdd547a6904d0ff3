//! ---
//! ems_section: "03-persistence-logging"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Storage capabilities and the file-backed cache store."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::fs::{self, File};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::cache::normalize_cache_name;
use crate::entry::HistorianCacheEntry;
use crate::{HistorianError, Result};

/// Current cache file envelope version.
pub const CACHE_FILE_VERSION: u16 = 1;

/// Persists a cache snapshot.
pub trait DataStorer: Send + Sync {
    /// Persist `entries` under `cache_name`, returning the bytes written.
    fn store_data_cache(&self, cache_name: &str, entries: &[HistorianCacheEntry]) -> Result<usize>;
}

/// Reads a previously persisted cache.
pub trait DataLoader: Send + Sync {
    /// Entries stored under `cache_name`, or `None` when nothing was stored.
    fn load_data_cache(&self, cache_name: &str) -> Result<Option<Vec<HistorianCacheEntry>>>;
}

/// On-disk encoding of cache files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheFormat {
    /// Pretty printed JSON, `.json`.
    #[default]
    Json,
    /// CBOR, `.cbor`.
    Cbor,
}

impl CacheFormat {
    fn extension(self) -> &'static str {
        match self {
            CacheFormat::Json => "json",
            CacheFormat::Cbor => "cbor",
        }
    }

    fn from_path(path: &Path) -> Option<Self> {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Some(CacheFormat::Json),
            Some("cbor") => Some(CacheFormat::Cbor),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheEnvelope {
    version: u16,
    created_at: DateTime<Utc>,
    cache_name: String,
    hash: String,
    entries: Vec<HistorianCacheEntry>,
}

/// Stores each cache as one hashed envelope file under a root directory.
#[derive(Debug, Clone)]
pub struct FileCacheStore {
    root: PathBuf,
    format: CacheFormat,
}

impl FileCacheStore {
    /// Store rooted at `root`, writing `format` files.
    pub fn new(root: impl Into<PathBuf>, format: CacheFormat) -> Self {
        Self {
            root: root.into(),
            format,
        }
    }

    /// Directory holding the cache files.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// File that backs `cache_name`.
    pub fn cache_path(&self, cache_name: &str) -> PathBuf {
        self.root.join(format!(
            "{}.{}",
            normalize_cache_name(cache_name),
            self.format.extension()
        ))
    }

    /// Names of caches present under the root, sorted.
    pub fn stored_cache_names(&self) -> Result<Vec<String>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for entry in WalkDir::new(&self.root).min_depth(1).max_depth(1) {
            let entry = entry.map_err(|err| {
                HistorianError::Io(
                    err.into_io_error()
                        .unwrap_or_else(|| std::io::Error::other("directory walk failed")),
                )
            })?;
            let path = entry.path();
            if entry.file_type().is_file() && CacheFormat::from_path(path).is_some() {
                if let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) {
                    names.push(stem.to_owned());
                }
            }
        }
        names.sort();
        names.dedup();
        Ok(names)
    }

    /// Check a stored cache without keeping its entries.
    pub fn verify(&self, cache_name: &str) -> bool {
        self.read_envelope(&self.cache_path(cache_name))
            .and_then(|envelope| Ok(compute_hash(&envelope.entries)? == envelope.hash))
            .unwrap_or(false)
    }

    fn read_envelope(&self, path: &Path) -> Result<CacheEnvelope> {
        let mut file = File::open(path)?;
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;
        let envelope = match CacheFormat::from_path(path).unwrap_or(self.format) {
            CacheFormat::Cbor => serde_cbor::from_slice(&bytes)?,
            CacheFormat::Json => serde_json::from_slice(&bytes)?,
        };
        Ok(envelope)
    }
}

impl DataStorer for FileCacheStore {
    fn store_data_cache(&self, cache_name: &str, entries: &[HistorianCacheEntry]) -> Result<usize> {
        fs::create_dir_all(&self.root)?;
        let path = self.cache_path(cache_name);

        let envelope = CacheEnvelope {
            version: CACHE_FILE_VERSION,
            created_at: Utc::now(),
            cache_name: normalize_cache_name(cache_name),
            hash: compute_hash(entries)?,
            entries: entries.to_vec(),
        };

        let bytes = match self.format {
            CacheFormat::Cbor => serde_cbor::to_vec(&envelope)?,
            CacheFormat::Json => serde_json::to_vec_pretty(&envelope)?,
        };
        let mut writer = BufWriter::new(File::create(&path)?);
        writer.write_all(&bytes)?;
        writer.flush()?;

        info!(cache = %envelope.cache_name, path = %path.display(), entries = entries.len(), bytes = bytes.len(), "historian cache stored");
        Ok(bytes.len())
    }
}

impl DataLoader for FileCacheStore {
    fn load_data_cache(&self, cache_name: &str) -> Result<Option<Vec<HistorianCacheEntry>>> {
        let path = self.cache_path(cache_name);
        if !path.exists() {
            debug!(cache = %cache_name, path = %path.display(), "no stored historian cache");
            return Ok(None);
        }

        let envelope = self.read_envelope(&path)?;
        if compute_hash(&envelope.entries)? != envelope.hash {
            return Err(HistorianError::HashMismatch(envelope.cache_name));
        }
        debug!(cache = %envelope.cache_name, entries = envelope.entries.len(), version = envelope.version, "historian cache loaded");
        Ok(Some(envelope.entries))
    }
}

fn compute_hash(entries: &[HistorianCacheEntry]) -> Result<String> {
    let serialized = serde_json::to_vec(entries)?;
    let mut hasher = Sha256::new();
    hasher.update(serialized);
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use twinplex_msg::{RecordHeader, SensorData};

    fn entries() -> Vec<HistorianCacheEntry> {
        (0..3)
            .map(|i| {
                HistorianCacheEntry::new(
                    SensorData::new(RecordHeader::new("Temp", "d1"), f64::from(i)).into(),
                )
            })
            .collect()
    }

    #[test]
    fn json_store_and_load() {
        let dir = tempdir().unwrap();
        let store = FileCacheStore::new(dir.path(), CacheFormat::Json);

        let original = entries();
        let written = store.store_data_cache("run.json", &original).unwrap();
        assert!(written > 0);
        assert!(dir.path().join("run.json").exists());
        assert!(store.verify("run"));

        let loaded = store.load_data_cache("run").unwrap().expect("stored cache");
        assert_eq!(loaded, original);
    }

    #[test]
    fn cbor_store_and_load() {
        let dir = tempdir().unwrap();
        let store = FileCacheStore::new(dir.path(), CacheFormat::Cbor);
        let original = entries();

        store.store_data_cache("bin", &original).unwrap();
        let loaded = store.load_data_cache("bin").unwrap().expect("stored cache");
        assert_eq!(loaded, original);
    }

    #[test]
    fn missing_cache_loads_as_none() {
        let dir = tempdir().unwrap();
        let store = FileCacheStore::new(dir.path(), CacheFormat::Json);
        assert!(store.load_data_cache("absent").unwrap().is_none());
        assert!(store.stored_cache_names().unwrap().is_empty());
    }

    #[test]
    fn tampered_cache_is_rejected() {
        let dir = tempdir().unwrap();
        let store = FileCacheStore::new(dir.path(), CacheFormat::Json);
        store.store_data_cache("run", &entries()).unwrap();

        let path = store.cache_path("run");
        let mut envelope: serde_json::Value =
            serde_json::from_reader(File::open(&path).unwrap()).unwrap();
        envelope["entries"][0]["device_id"] = serde_json::json!("intruder");
        fs::write(&path, serde_json::to_vec_pretty(&envelope).unwrap()).unwrap();

        assert!(!store.verify("run"));
        assert!(matches!(
            store.load_data_cache("run"),
            Err(HistorianError::HashMismatch(name)) if name == "run"
        ));
    }

    #[test]
    fn lists_stored_cache_names() {
        let dir = tempdir().unwrap();
        let store = FileCacheStore::new(dir.path(), CacheFormat::Json);
        store.store_data_cache("beta", &entries()).unwrap();
        store.store_data_cache("alpha", &entries()).unwrap();
        fs::write(dir.path().join("notes.txt"), b"ignored").unwrap();

        assert_eq!(store.stored_cache_names().unwrap(), vec!["alpha", "beta"]);
    }
}
