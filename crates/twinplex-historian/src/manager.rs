//! ---
//! ems_section: "03-persistence-logging"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Table of historian players keyed by cache name."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::path::Path;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;
use tracing::{debug, info};
use twinplex_common::HistorianConfig;

use crate::cache::{normalize_cache_name, HistorianCache};
use crate::player::{HistorianPlayer, PlayerOptions};
use crate::storer::{CacheFormat, FileCacheStore};
use crate::Result;

/// Owns every historian player of the process and their shared file store.
pub struct HistorianManager {
    owner: String,
    options: PlayerOptions,
    store: Arc<FileCacheStore>,
    players: RwLock<IndexMap<String, Arc<HistorianPlayer>>>,
}

impl HistorianManager {
    /// Manager storing caches under `config.root_path`; `owner` prefixes generated names.
    pub fn new(config: &HistorianConfig, owner: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            options: PlayerOptions::from_config(config),
            store: Arc::new(FileCacheStore::new(&config.root_path, CacheFormat::Json)),
            players: RwLock::new(IndexMap::new()),
        }
    }

    /// Directory holding persisted caches.
    pub fn root_path(&self) -> &Path {
        self.store.root()
    }

    /// File store shared by every player.
    pub fn store(&self) -> &Arc<FileCacheStore> {
        &self.store
    }

    /// New player over a freshly named empty cache.
    pub fn create_player(&self) -> Arc<HistorianPlayer> {
        let cache = HistorianCache::with_generated_name(&self.owner, self.store.root());
        self.insert(cache)
    }

    /// Player for `cache_name`, creating it on first request.
    ///
    /// A newly created player is filled from the file store when
    /// `load_from_persistence` is set.
    pub fn player(&self, cache_name: &str, load_from_persistence: bool) -> Result<Arc<HistorianPlayer>> {
        let name = normalize_cache_name(cache_name);
        if let Some(existing) = self.players.read().get(&name) {
            return Ok(Arc::clone(existing));
        }

        let cache = HistorianCache::new(&name, self.store.root());
        let candidate = self.build_player(cache);
        if load_from_persistence {
            candidate.load_historian_cache(self.store.as_ref())?;
        }

        let mut players = self.players.write();
        // Another caller may have won the race while the cache was loading.
        let player = players
            .entry(name.clone())
            .or_insert_with(|| {
                debug!(cache = %name, "historian player registered");
                candidate
            })
            .clone();
        Ok(player)
    }

    /// Player for `cache_name` if one exists.
    pub fn existing_player(&self, cache_name: &str) -> Option<Arc<HistorianPlayer>> {
        self.players
            .read()
            .get(&normalize_cache_name(cache_name))
            .cloned()
    }

    /// Stop, clear and forget the player for `cache_name`.
    pub fn reset_and_remove(&self, cache_name: &str) -> bool {
        let removed = self
            .players
            .write()
            .shift_remove(&normalize_cache_name(cache_name));
        match removed {
            Some(player) => {
                player.reset(true);
                info!(cache = %cache_name, "historian player removed");
                true
            }
            None => false,
        }
    }

    /// True when the named player is currently playing.
    pub fn is_cache_replaying(&self, cache_name: &str) -> bool {
        self.existing_player(cache_name)
            .map(|player| player.is_playing())
            .unwrap_or(false)
    }

    /// Stop every player, keeping their caches.
    pub fn stop_all(&self) {
        let players: Vec<_> = self.players.read().values().cloned().collect();
        for player in players {
            player.stop();
        }
    }

    /// Names of the loaded caches, in creation order.
    pub fn cache_names(&self) -> Vec<String> {
        self.players.read().keys().cloned().collect()
    }

    /// Names of caches persisted under the root directory.
    pub fn stored_cache_names(&self) -> Result<Vec<String>> {
        self.store.stored_cache_names()
    }

    /// Approximate bytes held across every loaded cache.
    pub fn total_memory_usage(&self) -> usize {
        self.players
            .read()
            .values()
            .map(|player| player.cache_memory_usage())
            .sum()
    }

    fn build_player(&self, cache: HistorianCache) -> Arc<HistorianPlayer> {
        Arc::new(
            HistorianPlayer::new(Arc::new(cache), self.options.clone())
                .with_storer(self.store.clone()),
        )
    }

    fn insert(&self, cache: HistorianCache) -> Arc<HistorianPlayer> {
        let name = cache.name().to_owned();
        let player = self.build_player(cache);
        self.players.write().insert(name.clone(), Arc::clone(&player));
        debug!(cache = %name, "historian player registered");
        player
    }
}
