//! ---
//! ems_section: "03-persistence-logging"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Ordered in-memory cache of recorded entries."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use twinplex_common::TimeWindow;
use uuid::Uuid;

use crate::entry::HistorianCacheEntry;

const CACHE_NAME_INFIX: &str = "DataHistorianCache";
const JSON_SUFFIX: &str = ".json";

/// Strip surrounding whitespace and a trailing `.json` from a cache name.
pub fn normalize_cache_name(name: &str) -> String {
    let trimmed = name.trim();
    trimmed
        .strip_suffix(JSON_SUFFIX)
        .unwrap_or(trimmed)
        .to_owned()
}

#[derive(Debug, Default)]
struct CacheInner {
    display_name: String,
    entries: Vec<HistorianCacheEntry>,
    memory_usage: usize,
}

/// Named, ordered collection of recorded telemetry.
///
/// Appends and reads share one guard, so a store or replay never observes a
/// partially written sequence.
#[derive(Debug)]
pub struct HistorianCache {
    name: String,
    file_name: PathBuf,
    inner: RwLock<CacheInner>,
}

impl HistorianCache {
    /// Empty cache named `name`, backed by `<root>/<name>.json`.
    pub fn new(name: &str, root: &Path) -> Self {
        let name = normalize_cache_name(name);
        let file_name = root.join(format!("{name}{JSON_SUFFIX}"));
        Self {
            inner: RwLock::new(CacheInner {
                display_name: name.clone(),
                ..CacheInner::default()
            }),
            name,
            file_name,
        }
    }

    /// Empty cache with a generated `<owner>_DataHistorianCache_<id>` name.
    pub fn with_generated_name(owner: &str, root: &Path) -> Self {
        let id = Uuid::new_v4().simple().to_string();
        let name = format!("{owner}_{CACHE_NAME_INFIX}_{}", &id[..8]);
        Self::new(&name, root)
    }

    /// Cache identifier.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Backing storage file.
    pub fn file_name(&self) -> &Path {
        &self.file_name
    }

    /// Operator facing label.
    pub fn display_name(&self) -> String {
        self.inner.read().display_name.clone()
    }

    /// Replace the operator facing label. Blank names are ignored.
    pub fn set_display_name(&self, display_name: &str) {
        if !display_name.trim().is_empty() {
            self.inner.write().display_name = display_name.trim().to_owned();
        }
    }

    /// Append one entry at the end.
    pub fn append(&self, entry: HistorianCacheEntry) {
        let bytes = entry.approx_byte_count();
        let mut inner = self.inner.write();
        inner.entries.push(entry);
        inner.memory_usage += bytes;
    }

    /// Append a batch atomically with respect to readers.
    pub fn extend(&self, entries: Vec<HistorianCacheEntry>) {
        let bytes: usize = entries.iter().map(HistorianCacheEntry::approx_byte_count).sum();
        let mut inner = self.inner.write();
        inner.entries.extend(entries);
        inner.memory_usage += bytes;
    }

    /// Drop every entry and reset the memory counter.
    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.entries.clear();
        inner.memory_usage = 0;
    }

    /// Entry at `index`, if any.
    pub fn entry_at(&self, index: usize) -> Option<HistorianCacheEntry> {
        self.inner.read().entries.get(index).cloned()
    }

    /// Copy of the full entry sequence.
    pub fn entries(&self) -> Vec<HistorianCacheEntry> {
        self.inner.read().entries.clone()
    }

    /// Entries whose timestamps fall inside `window`, in recorded order.
    pub fn entries_in_window(&self, window: &TimeWindow) -> Vec<HistorianCacheEntry> {
        self.inner
            .read()
            .entries
            .iter()
            .filter(|entry| window.contains(entry.recorded_at))
            .cloned()
            .collect()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    /// True when nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.inner.read().entries.is_empty()
    }

    /// Approximate bytes held by the entries.
    pub fn memory_usage(&self) -> usize {
        self.inner.read().memory_usage
    }
}
