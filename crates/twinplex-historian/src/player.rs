//! ---
//! ems_section: "03-persistence-logging"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Recording and paced playback over a historian cache."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::cell::Cell;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use twinplex_common::{HistorianConfig, PlaybackConfig};
use twinplex_msg::{
    log_record, ConnectionStateData, DataContextListener, RecordDirection, SystemStatusListener,
    TelemetryRecord,
};

use crate::cache::HistorianCache;
use crate::delay::{calculate_delay_factor, scale_interval};
use crate::entry::HistorianCacheEntry;
use crate::storer::{DataLoader, DataStorer};
use crate::{HistorianError, Result};

thread_local! {
    // Player currently emitting on this thread; its own replay is never re-recorded.
    static EMITTING: Cell<usize> = const { Cell::new(0) };
}

/// Lifecycle of a player's playback clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackState {
    /// Idle with the cursor at the start.
    Stopped,
    /// The background clock is emitting entries.
    Playing,
    /// Emission halted, cursor preserved.
    Paused,
}

/// Recording and pacing options for a player.
#[derive(Debug, Clone)]
pub struct PlayerOptions {
    /// Append incoming records to the cache.
    pub cache_filling_enabled: bool,
    /// Ignore connection-state and message records while recording.
    pub cache_only_data_events: bool,
    /// Restart from the first entry instead of stopping at the end.
    pub loop_at_end: bool,
    /// Clock tuning.
    pub playback: PlaybackConfig,
}

impl PlayerOptions {
    /// Options taken from the historian configuration section.
    pub fn from_config(config: &HistorianConfig) -> Self {
        Self {
            cache_filling_enabled: true,
            cache_only_data_events: config.cache_only_data_events,
            loop_at_end: config.loop_at_end,
            playback: config.playback.clone(),
        }
    }
}

impl Default for PlayerOptions {
    fn default() -> Self {
        Self::from_config(&HistorianConfig::default())
    }
}

#[derive(Debug)]
struct Control {
    state: PlaybackState,
    cursor: usize,
    last_processed: Option<usize>,
    delay_factor: f64,
    multiplier: f64,
    loop_at_end: bool,
    generation: u64,
}

struct Shared {
    cache: Arc<HistorianCache>,
    control: Mutex<Control>,
    wake: Condvar,
    listener: RwLock<Option<Arc<dyn SystemStatusListener>>>,
    base_interval: Option<Duration>,
    max_interval: Duration,
}

impl Shared {
    fn id(self: &Arc<Self>) -> usize {
        Arc::as_ptr(self) as usize
    }

    fn emit(self: &Arc<Self>, index: usize, entry: &HistorianCacheEntry) {
        let Some(listener) = self.listener.read().clone() else {
            debug!(cache = %self.cache.name(), index, "no playback listener bound; entry skipped");
            return;
        };
        log_record(RecordDirection::Replay, &entry.record);

        let previous = EMITTING.with(|cell| cell.replace(self.id()));
        let outcome = catch_unwind(AssertUnwindSafe(|| listener.on_data_received(&entry.record)));
        EMITTING.with(|cell| cell.set(previous));

        if outcome.is_err() {
            warn!(cache = %self.cache.name(), index, device_id = %entry.device_id, "playback listener panicked");
        }
    }

    /// Gap to wait after emitting `index`, before the speed multiplier.
    fn base_interval_after(&self, index: usize, entry: &HistorianCacheEntry) -> Duration {
        if let Some(fixed) = self.base_interval {
            return fixed;
        }
        self.cache
            .entry_at(index + 1)
            .map(|next| entry.elapsed_between(&next).min(self.max_interval))
            .unwrap_or(Duration::ZERO)
    }

    /// Take the entry under the cursor, advancing it. `None` means the clock must end.
    fn advance(&self, control: &mut Control) -> Option<(usize, HistorianCacheEntry)> {
        let mut index = control.cursor;
        let entry = match self.cache.entry_at(index) {
            Some(entry) => entry,
            None if control.loop_at_end && index > 0 => {
                debug!(cache = %self.cache.name(), "end of cache reached; looping");
                index = 0;
                self.cache.entry_at(0)?
            }
            None => return None,
        };
        control.cursor = index + 1;
        control.last_processed = Some(index);
        Some((index, entry))
    }

    fn run(self: Arc<Self>, generation: u64) {
        info!(cache = %self.cache.name(), generation, "playback clock started");
        loop {
            let (index, entry) = {
                let mut control = self.control.lock();
                loop {
                    if control.generation != generation || control.state == PlaybackState::Stopped {
                        debug!(cache = %self.cache.name(), generation, "playback clock cancelled");
                        return;
                    }
                    if control.state == PlaybackState::Playing {
                        break;
                    }
                    self.wake.wait(&mut control);
                }
                match self.advance(&mut control) {
                    Some(next) => next,
                    None => {
                        control.state = PlaybackState::Stopped;
                        control.cursor = 0;
                        control.generation += 1;
                        info!(cache = %self.cache.name(), "end of cache reached; playback stopped");
                        return;
                    }
                }
            };

            self.emit(index, &entry);

            let base = self.base_interval_after(index, &entry);
            let mut control = self.control.lock();
            let delay = scale_interval(base, control.multiplier, self.max_interval);
            let deadline = Instant::now() + delay;
            while control.generation == generation && control.state == PlaybackState::Playing {
                if self.wake.wait_until(&mut control, deadline).timed_out() {
                    break;
                }
            }
        }
    }
}

/// Records telemetry into a [`HistorianCache`] and replays it to a listener.
///
/// Playback runs on a dedicated thread. `pause` and `stop` wake the thread out
/// of its inter-entry delay, so they take effect before the next emission.
pub struct HistorianPlayer {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
    storer: Option<Arc<dyn DataStorer>>,
    cache_filling_enabled: AtomicBool,
    cache_only_data_events: AtomicBool,
}

impl HistorianPlayer {
    /// Player over `cache` with no storer bound.
    pub fn new(cache: Arc<HistorianCache>, options: PlayerOptions) -> Self {
        let delay_factor = options.playback.delay_factor;
        let control = Control {
            state: PlaybackState::Stopped,
            cursor: 0,
            last_processed: None,
            delay_factor,
            multiplier: calculate_delay_factor(delay_factor),
            loop_at_end: options.loop_at_end,
            generation: 0,
        };
        Self {
            shared: Arc::new(Shared {
                cache,
                control: Mutex::new(control),
                wake: Condvar::new(),
                listener: RwLock::new(None),
                base_interval: options.playback.base_interval,
                max_interval: options.playback.max_interval,
            }),
            worker: Mutex::new(None),
            storer: None,
            cache_filling_enabled: AtomicBool::new(options.cache_filling_enabled),
            cache_only_data_events: AtomicBool::new(options.cache_only_data_events),
        }
    }

    /// Bind the storer used by [`HistorianPlayer::store_historian_cache`].
    pub fn with_storer(mut self, storer: Arc<dyn DataStorer>) -> Self {
        self.storer = Some(storer);
        self
    }

    /// Shared cache this player records into and replays from.
    pub fn cache(&self) -> &Arc<HistorianCache> {
        &self.shared.cache
    }

    /// Route replayed records to `listener`, replacing any previous one.
    pub fn set_playback_listener(&self, listener: Arc<dyn SystemStatusListener>) {
        *self.shared.listener.write() = Some(listener);
    }

    /// Detach the playback listener.
    pub fn clear_playback_listener(&self) {
        self.shared.listener.write().take();
    }

    /// Current lifecycle state.
    pub fn state(&self) -> PlaybackState {
        self.shared.control.lock().state
    }

    /// True while the clock is emitting.
    pub fn is_playing(&self) -> bool {
        self.state() == PlaybackState::Playing
    }

    /// Index of the next entry to emit.
    pub fn cursor(&self) -> usize {
        self.shared.control.lock().cursor
    }

    /// Index of the most recently emitted entry.
    pub fn last_processed_index(&self) -> Option<usize> {
        self.shared.control.lock().last_processed
    }

    /// Start or resume playback. Calling it while playing is a no-op.
    ///
    /// Returns false only when the playback thread could not be spawned.
    pub fn play(&self) -> bool {
        let generation = {
            let mut control = self.shared.control.lock();
            match control.state {
                PlaybackState::Playing => return true,
                PlaybackState::Paused => {
                    control.state = PlaybackState::Playing;
                    self.shared.wake.notify_all();
                    info!(cache = %self.shared.cache.name(), cursor = control.cursor, "playback resumed");
                    return true;
                }
                PlaybackState::Stopped => {
                    control.state = PlaybackState::Playing;
                    control.generation += 1;
                    control.generation
                }
            }
        };

        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name(format!("historian-{}", self.shared.cache.name()))
            .spawn(move || shared.run(generation));

        match spawned {
            Ok(handle) => {
                let previous = self.worker.lock().replace(handle);
                if let Some(previous) = previous {
                    if previous.is_finished() {
                        let _ = previous.join();
                    }
                }
                true
            }
            Err(err) => {
                let mut control = self.shared.control.lock();
                if control.generation == generation {
                    control.state = PlaybackState::Stopped;
                }
                warn!(cache = %self.shared.cache.name(), error = %err, "failed to spawn playback thread");
                false
            }
        }
    }

    /// Halt emission, keeping the cursor. Only meaningful while playing.
    pub fn pause(&self) -> bool {
        let mut control = self.shared.control.lock();
        if control.state != PlaybackState::Playing {
            return false;
        }
        control.state = PlaybackState::Paused;
        self.shared.wake.notify_all();
        info!(cache = %self.shared.cache.name(), cursor = control.cursor, "playback paused");
        true
    }

    /// Return to `Stopped` and rewind the cursor, from any state.
    pub fn stop(&self) {
        {
            let mut control = self.shared.control.lock();
            let was = control.state;
            control.state = PlaybackState::Stopped;
            control.cursor = 0;
            control.generation += 1;
            self.shared.wake.notify_all();
            if was != PlaybackState::Stopped {
                info!(cache = %self.shared.cache.name(), "playback stopped");
            }
        }
        self.join_worker();
    }

    /// Stop playback and optionally drop every recorded entry.
    pub fn reset(&self, clear_cache: bool) {
        self.stop();
        self.shared.control.lock().last_processed = None;
        if clear_cache {
            self.shared.cache.clear();
            info!(cache = %self.shared.cache.name(), "historian cache cleared");
        }
    }

    /// Emit the entry under the cursor by hand. Ignored while playing.
    ///
    /// Returns false when the end of the cache was reached, rewinding the cursor.
    pub fn trigger_next(&self) -> bool {
        let next = {
            let mut control = self.shared.control.lock();
            if control.state == PlaybackState::Playing {
                return false;
            }
            let next = self.shared.advance(&mut control);
            if next.is_none() {
                control.cursor = 0;
            }
            next
        };
        match next {
            Some((index, entry)) => {
                self.shared.emit(index, &entry);
                true
            }
            None => false,
        }
    }

    /// Move the cursor while not playing. The index is capped at the cache length.
    pub fn set_starting_index(&self, index: usize) -> bool {
        let mut control = self.shared.control.lock();
        if control.state == PlaybackState::Playing {
            return false;
        }
        control.cursor = index.min(self.shared.cache.len());
        true
    }

    /// Change playback speed. Takes effect from the next inter-entry delay.
    pub fn set_playback_delay_factor(&self, factor: f64) {
        let mut control = self.shared.control.lock();
        control.delay_factor = factor;
        control.multiplier = calculate_delay_factor(factor);
        debug!(cache = %self.shared.cache.name(), factor, multiplier = control.multiplier, "playback delay factor updated");
    }

    /// Factor last requested through [`HistorianPlayer::set_playback_delay_factor`].
    pub fn delay_factor(&self) -> f64 {
        self.shared.control.lock().delay_factor
    }

    /// Multiplier currently applied to inter-entry delays.
    pub fn delay_multiplier(&self) -> f64 {
        self.shared.control.lock().multiplier
    }

    /// Toggle looping back to the first entry at the end of the cache.
    pub fn set_loop_at_end(&self, enabled: bool) {
        self.shared.control.lock().loop_at_end = enabled;
    }

    /// Toggle recording of incoming records.
    pub fn set_cache_filling_enabled(&self, enabled: bool) {
        self.cache_filling_enabled.store(enabled, Ordering::Relaxed);
    }

    /// True when incoming records are appended.
    pub fn is_cache_filling_enabled(&self) -> bool {
        self.cache_filling_enabled.load(Ordering::Relaxed)
    }

    /// Toggle skipping of connection-state and message records while recording.
    pub fn set_cache_only_data_events(&self, enabled: bool) {
        self.cache_only_data_events.store(enabled, Ordering::Relaxed);
    }

    /// Append a record to the cache. Returns whether it was recorded.
    ///
    /// Recording works in every playback state. Synthetic notifications and
    /// records this player is replaying on the current thread are skipped.
    pub fn record(&self, record: TelemetryRecord) -> bool {
        if !self.is_cache_filling_enabled() || record.is_internal() {
            return false;
        }
        if EMITTING.with(|cell| cell.get()) == self.shared.id() {
            return false;
        }
        if self.cache_only_data_events.load(Ordering::Relaxed)
            && matches!(
                record,
                TelemetryRecord::ConnectionState(_) | TelemetryRecord::Message(_)
            )
        {
            return false;
        }
        self.shared.cache.append(HistorianCacheEntry::new(record));
        true
    }

    /// Persist a snapshot of the cache through the bound storer.
    pub fn store_historian_cache(&self) -> Result<usize> {
        let name = self.shared.cache.name().to_owned();
        let storer = self
            .storer
            .as_ref()
            .ok_or_else(|| HistorianError::NoStorer(name.clone()))?;
        let entries = self.shared.cache.entries();
        if entries.is_empty() {
            return Err(HistorianError::EmptyCache(name));
        }
        match storer.store_data_cache(&name, &entries) {
            Ok(bytes) => {
                info!(cache = %name, entries = entries.len(), bytes, "historian cache persisted");
                Ok(bytes)
            }
            Err(err) => {
                warn!(cache = %name, error = %err, "failed to persist historian cache");
                Err(err)
            }
        }
    }

    /// Stop playback and append everything `loader` holds for this cache.
    pub fn load_historian_cache(&self, loader: &dyn DataLoader) -> Result<usize> {
        self.stop();
        let name = self.shared.cache.name().to_owned();
        match loader.load_data_cache(&name)? {
            Some(entries) => {
                let count = entries.len();
                self.shared.cache.extend(entries);
                info!(cache = %name, entries = count, "historian cache loaded");
                Ok(count)
            }
            None => Ok(0),
        }
    }

    /// Backing storage file of the cache.
    pub fn cache_file_name(&self) -> PathBuf {
        self.shared.cache.file_name().to_path_buf()
    }

    /// Number of recorded entries.
    pub fn cache_size(&self) -> usize {
        self.shared.cache.len()
    }

    /// Approximate bytes held by the cache.
    pub fn cache_memory_usage(&self) -> usize {
        self.shared.cache.memory_usage()
    }

    /// Operator facing label of the cache.
    pub fn display_name(&self) -> String {
        self.shared.cache.display_name()
    }

    fn join_worker(&self) {
        let Some(handle) = self.worker.lock().take() else {
            return;
        };
        // A listener may stop the player from inside a replayed callback.
        if handle.thread().id() == thread::current().id() {
            return;
        }
        if handle.join().is_err() {
            warn!(cache = %self.shared.cache.name(), "playback thread terminated abnormally");
        }
    }
}

impl DataContextListener for HistorianPlayer {
    fn handle_telemetry(&self, record: &TelemetryRecord) {
        self.record(record.clone());
    }
}

impl SystemStatusListener for HistorianPlayer {
    fn on_data_received(&self, record: &TelemetryRecord) {
        self.record(record.clone());
    }

    fn on_status_update(&self, state: &ConnectionStateData) {
        self.record(state.clone().into());
    }
}

impl Drop for HistorianPlayer {
    fn drop(&mut self) {
        {
            let mut control = self.shared.control.lock();
            control.state = PlaybackState::Stopped;
            control.generation += 1;
            self.shared.wake.notify_all();
        }
        self.join_worker();
    }
}

impl std::fmt::Debug for HistorianPlayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HistorianPlayer")
            .field("cache", &self.shared.cache.name())
            .field("state", &self.state())
            .field("cursor", &self.cursor())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use twinplex_msg::{MessageData, RecordHeader, SensorData};

    #[derive(Default)]
    struct Collector {
        seen: Mutex<Vec<f64>>,
    }

    impl SystemStatusListener for Collector {
        fn on_data_received(&self, record: &TelemetryRecord) {
            if let TelemetryRecord::Sensor(sensor) = record {
                self.seen.lock().push(sensor.value);
            }
        }
    }

    fn sensor(value: f64) -> TelemetryRecord {
        SensorData::new(RecordHeader::new("Temp", "d1"), value).into()
    }

    fn player_with(values: &[f64]) -> HistorianPlayer {
        let cache = Arc::new(HistorianCache::new("unit", Path::new(".")));
        let player = HistorianPlayer::new(cache, PlayerOptions::default());
        for value in values {
            player.record(sensor(*value));
        }
        player
    }

    #[test]
    fn manual_stepping_walks_the_cache_then_rewinds() {
        let player = player_with(&[1.0, 2.0]);
        let collector = Arc::new(Collector::default());
        player.set_playback_listener(collector.clone());

        assert!(player.trigger_next());
        assert!(player.trigger_next());
        assert_eq!(player.last_processed_index(), Some(1));
        assert!(!player.trigger_next());
        assert_eq!(player.cursor(), 0);
        assert_eq!(*collector.seen.lock(), vec![1.0, 2.0]);
    }

    #[test]
    fn pause_requires_playing() {
        let player = player_with(&[]);
        assert!(!player.pause());
        assert_eq!(player.state(), PlaybackState::Stopped);
    }

    #[test]
    fn delay_factor_is_mapped_through_policy() {
        let player = player_with(&[]);
        player.set_playback_delay_factor(-5.0);
        assert_eq!(player.delay_factor(), -5.0);
        assert_eq!(player.delay_multiplier(), 5.0);
        player.set_playback_delay_factor(0.3);
        assert_eq!(player.delay_multiplier(), 1.0);
    }

    #[test]
    fn recording_filters() {
        let player = player_with(&[]);
        let message: TelemetryRecord = MessageData {
            header: RecordHeader::new("Msg", "d1"),
            message: "hi".into(),
        }
        .into();

        assert!(player.record(message.clone()));
        assert!(!player.record(ConnectionStateData::internal_notification("self").into()));

        player.set_cache_only_data_events(true);
        assert!(!player.record(message));
        assert!(player.record(sensor(1.0)));

        player.set_cache_filling_enabled(false);
        assert!(!player.record(sensor(2.0)));
        assert_eq!(player.cache_size(), 2);
    }

    #[test]
    fn starting_index_is_capped() {
        let player = player_with(&[1.0, 2.0, 3.0]);
        assert!(player.set_starting_index(10));
        assert_eq!(player.cursor(), 3);
        assert!(player.set_starting_index(1));
        assert_eq!(player.cursor(), 1);
    }

    #[test]
    fn store_without_storer_fails() {
        let player = player_with(&[1.0]);
        assert!(matches!(
            player.store_historian_cache(),
            Err(HistorianError::NoStorer(name)) if name == "unit"
        ));
    }

    #[test]
    fn reset_can_clear_the_cache() {
        let player = player_with(&[1.0, 2.0]);
        player.reset(false);
        assert_eq!(player.cache_size(), 2);
        player.reset(true);
        assert_eq!(player.cache_size(), 0);
        assert_eq!(player.cache_memory_usage(), 0);
    }
}
