//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "binary"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Replay command driving a historian player through the plexus."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::io::Write;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use clap::Args;
use tracing::{info, warn};
use twinplex_common::AppConfig;
use twinplex_core::{EventPlexus, PlexusCollaborators, TracingStatusListener};
use twinplex_historian::PlaybackState;
use twinplex_msg::{DataContextListener, TelemetryRecord};

#[derive(Debug, Args)]
pub struct ReplayArgs {
    /// Cache name, with or without the `.json` suffix.
    pub cache: String,
    /// Speed factor: >= 1 speeds up, <= -1 slows down, anything between is normal speed.
    #[arg(long, default_value_t = 1.0, allow_negative_numbers = true)]
    pub speed: f64,
    /// Fixed delay between entries instead of the recorded gaps.
    #[arg(long, value_name = "MILLIS")]
    pub interval_ms: Option<u64>,
    /// Start over at the end of the cache until interrupted.
    #[arg(long = "loop")]
    pub loop_at_end: bool,
    /// Index of the first entry to replay.
    #[arg(long, default_value_t = 0)]
    pub start: usize,
}

/// Writes every replayed data record to stdout as one JSON line.
struct StdoutSink;

impl DataContextListener for StdoutSink {
    fn handle_telemetry(&self, record: &TelemetryRecord) {
        match record.to_json() {
            Ok(line) => {
                let mut stdout = std::io::stdout().lock();
                if let Err(err) = writeln!(stdout, "{line}") {
                    warn!(error = %err, "unable to write replayed record");
                }
            }
            Err(err) => warn!(error = %err, "unable to encode replayed record"),
        }
    }
}

pub fn run(mut config: AppConfig, args: &ReplayArgs) -> Result<()> {
    if let Some(interval) = args.interval_ms {
        config.historian.playback.base_interval = Some(Duration::from_millis(interval));
    }
    config.historian.loop_at_end |= args.loop_at_end;

    let plexus = EventPlexus::init_global(&config, PlexusCollaborators::for_config(&config))
        .ok_or_else(|| anyhow!("event plexus already terminated"))?;
    let status = Arc::new(TracingStatusListener::new("replay"));
    plexus.register_system_status_listener(status.clone());
    plexus.register_user_event_listener(status);
    plexus.register_data_context_listener(Arc::new(StdoutSink));

    let player = plexus.data_historian_player(&args.cache)?;
    if player.cache_size() == 0 {
        EventPlexus::terminate_global();
        bail!("cache {} is empty or does not exist", args.cache);
    }
    player.set_playback_delay_factor(args.speed);
    player.set_starting_index(args.start);
    info!(
        cache = %args.cache,
        entries = player.cache_size(),
        speed = args.speed,
        multiplier = player.delay_multiplier(),
        devices = plexus.known_device_ids().len(),
        "starting replay"
    );

    player.play();
    while player.state() != PlaybackState::Stopped {
        thread::sleep(Duration::from_millis(50));
    }

    info!(
        cache = %args.cache,
        last_index = ?player.last_processed_index(),
        "replay finished"
    );
    EventPlexus::terminate_global();
    Ok(())
}
