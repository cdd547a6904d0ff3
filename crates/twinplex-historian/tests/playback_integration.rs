//! ---
//! ems_section: "15-testing-qa-runbook"
//! ems_subsection: "integration-tests"
//! ems_type: "source"
//! ems_scope: "tests"
//! ems_description: "Historian playback clock and persistence integration checks."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::path::Path;
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tempfile::tempdir;
use twinplex_common::{HistorianConfig, PlaybackConfig};
use twinplex_historian::{
    HistorianCache, HistorianManager, HistorianPlayer, PlaybackState, PlayerOptions,
};
use twinplex_msg::{RecordHeader, SensorData, SystemStatusListener, TelemetryRecord};

#[derive(Default)]
struct Collector {
    seen: Mutex<Vec<f64>>,
}

impl Collector {
    fn values(&self) -> Vec<f64> {
        self.seen.lock().clone()
    }
}

impl SystemStatusListener for Collector {
    fn on_data_received(&self, record: &TelemetryRecord) {
        if let TelemetryRecord::Sensor(sensor) = record {
            self.seen.lock().push(sensor.value);
        }
    }
}

fn options(interval_ms: u64) -> PlayerOptions {
    PlayerOptions {
        playback: PlaybackConfig {
            base_interval: Some(Duration::from_millis(interval_ms)),
            ..PlaybackConfig::default()
        },
        ..PlayerOptions::default()
    }
}

fn recorded_player(count: usize, interval_ms: u64) -> (HistorianPlayer, Arc<Collector>) {
    let cache = Arc::new(HistorianCache::new("integration", Path::new(".")));
    let player = HistorianPlayer::new(cache, options(interval_ms));
    for i in 0..count {
        player.record(SensorData::new(RecordHeader::new("Temp", "d1"), i as f64).into());
    }
    let collector = Arc::new(Collector::default());
    player.set_playback_listener(collector.clone());
    (player, collector)
}

fn wait_for(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

#[test]
fn plays_every_entry_in_order_then_stops() {
    let (player, collector) = recorded_player(5, 5);
    assert!(player.play());

    assert!(wait_for(Duration::from_secs(5), || player.state()
        == PlaybackState::Stopped));
    assert_eq!(collector.values(), vec![0.0, 1.0, 2.0, 3.0, 4.0]);
    assert_eq!(player.cursor(), 0);
    assert_eq!(player.last_processed_index(), Some(4));
}

#[test]
fn pause_resume_stop_never_duplicates() {
    let (player, collector) = recorded_player(50, 20);

    assert!(player.play());
    assert!(wait_for(Duration::from_secs(5), || !collector
        .values()
        .is_empty()));
    assert!(player.pause());
    assert_eq!(player.state(), PlaybackState::Paused);

    // The in-flight delay is cut short and nothing else is emitted while paused.
    thread::sleep(Duration::from_millis(30));
    let paused_at = collector.values().len();
    thread::sleep(Duration::from_millis(100));
    assert_eq!(collector.values().len(), paused_at);
    let cursor = player.cursor();
    assert_eq!(cursor, paused_at);

    assert!(player.play());
    assert!(player.play(), "play while playing is a no-op");
    assert!(wait_for(Duration::from_secs(5), || collector.values().len()
        > paused_at));
    player.stop();

    assert_eq!(player.state(), PlaybackState::Stopped);
    assert_eq!(player.cursor(), 0);
    let values = collector.values();
    let expected: Vec<f64> = (0..values.len()).map(|i| i as f64).collect();
    assert_eq!(values, expected, "each entry emitted once, in order");
}

#[test]
fn speed_factor_shortens_the_clock() {
    let (player, collector) = recorded_player(10, 100);
    player.set_playback_delay_factor(20.0);
    assert_eq!(player.delay_multiplier(), 0.05);

    let started = Instant::now();
    assert!(player.play());
    assert!(wait_for(Duration::from_secs(5), || player.state()
        == PlaybackState::Stopped));
    assert_eq!(collector.values().len(), 10);
    assert!(started.elapsed() < Duration::from_millis(900));
}

#[test]
fn loop_at_end_keeps_playing_until_stopped() {
    let (player, collector) = recorded_player(3, 2);
    player.set_loop_at_end(true);
    assert!(player.play());

    assert!(wait_for(Duration::from_secs(5), || collector.values().len() >= 7));
    assert!(player.is_playing());
    player.stop();

    let values = collector.values();
    assert_eq!(&values[..6], &[0.0, 1.0, 2.0, 0.0, 1.0, 2.0]);
}

struct StopOnFirst {
    player: Mutex<Weak<HistorianPlayer>>,
    seen: Mutex<usize>,
}

impl SystemStatusListener for StopOnFirst {
    fn on_data_received(&self, _record: &TelemetryRecord) {
        *self.seen.lock() += 1;
        if let Some(player) = self.player.lock().upgrade() {
            player.stop();
        }
    }
}

#[test]
fn listener_may_stop_playback_from_its_callback() {
    let (player, _) = recorded_player(5, 50);
    let player = Arc::new(player);
    let listener = Arc::new(StopOnFirst {
        player: Mutex::new(Arc::downgrade(&player)),
        seen: Mutex::new(0),
    });
    player.set_playback_listener(listener.clone());

    assert!(player.play());
    assert!(wait_for(Duration::from_secs(5), || player.state()
        == PlaybackState::Stopped));
    thread::sleep(Duration::from_millis(120));
    assert_eq!(*listener.seen.lock(), 1);
    assert_eq!(player.cursor(), 0);
}

#[test]
fn stored_cache_reloads_into_a_new_manager() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let config = HistorianConfig {
        root_path: dir.path().to_path_buf(),
        ..HistorianConfig::default()
    };

    let recorder = HistorianManager::new(&config, "twinplex");
    let player = recorder.player("morning", false)?;
    for i in 0..4 {
        player.record(SensorData::new(RecordHeader::new("Temp", "d9"), f64::from(i)).into());
    }
    let bytes = player.store_historian_cache()?;
    assert!(bytes > 0);
    assert_eq!(recorder.stored_cache_names()?, vec!["morning"]);

    let replayer = HistorianManager::new(&config, "twinplex");
    let restored = replayer.player("morning.json", true)?;
    assert_eq!(restored.cache_size(), 4);
    assert_eq!(restored.cache().entries(), player.cache().entries());
    assert_eq!(restored.cache_memory_usage(), player.cache_memory_usage());
    Ok(())
}

fn recorded_with_gaps(
    gaps_ms: &[i64],
    playback: PlaybackConfig,
) -> (HistorianPlayer, Arc<Collector>) {
    let cache = Arc::new(HistorianCache::new("gaps", Path::new(".")));
    let player = HistorianPlayer::new(
        cache,
        PlayerOptions {
            playback,
            ..PlayerOptions::default()
        },
    );
    let start: chrono::DateTime<chrono::Utc> = "2024-05-01T12:00:00Z".parse().unwrap();
    let mut offset = 0;
    for (i, gap) in std::iter::once(&0).chain(gaps_ms).enumerate() {
        offset += gap;
        let header = RecordHeader::new("Temp", "d1")
            .with_timestamp(start + chrono::Duration::milliseconds(offset));
        player.record(SensorData::new(header, i as f64).into());
    }
    let collector = Arc::new(Collector::default());
    player.set_playback_listener(collector.clone());
    (player, collector)
}

fn timed_run(player: &HistorianPlayer) -> Duration {
    let started = Instant::now();
    assert!(player.play());
    assert!(wait_for(Duration::from_secs(10), || player.state()
        == PlaybackState::Stopped));
    started.elapsed()
}

#[test]
fn recorded_gaps_pace_playback_by_default() {
    let (player, collector) = recorded_with_gaps(&[100, 100, 100], PlaybackConfig::default());
    let normal = timed_run(&player);
    assert_eq!(collector.values(), vec![0.0, 1.0, 2.0, 3.0]);
    assert!(normal >= Duration::from_millis(280), "normal speed took {normal:?}");
    assert!(normal < Duration::from_millis(550), "normal speed took {normal:?}");

    player.set_playback_delay_factor(-2.0);
    let slowed = timed_run(&player);
    assert_eq!(collector.values().len(), 8);
    assert!(slowed >= Duration::from_millis(570), "half speed took {slowed:?}");
    assert!(slowed < Duration::from_millis(1_100), "half speed took {slowed:?}");
}

#[test]
fn recorded_gaps_clamp_to_max_interval() {
    let playback = PlaybackConfig {
        max_interval: Duration::from_millis(50),
        ..PlaybackConfig::default()
    };
    let (player, collector) = recorded_with_gaps(&[10_000, 10_000, 10_000], playback);
    let elapsed = timed_run(&player);
    assert_eq!(collector.values().len(), 4);
    assert!(elapsed >= Duration::from_millis(140), "clamped run took {elapsed:?}");
    assert!(elapsed < Duration::from_secs(2), "clamped run took {elapsed:?}");
}
