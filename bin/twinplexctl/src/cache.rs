//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "binary"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Cache listing, inspection and import commands."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::collections::BTreeSet;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::Args;
use serde::Serialize;
use tracing::{info, warn};
use twinplex_common::AppConfig;
use twinplex_core::{EventPlexus, PlexusCollaborators};
use twinplex_historian::{HistorianCacheEntry, HistorianManager};
use twinplex_msg::{DataContextListener, SystemStatusListener};

#[derive(Debug, Args)]
pub struct InspectArgs {
    /// Cache name, with or without the `.json` suffix.
    pub cache: String,
    /// Print the summary as JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct ImportArgs {
    /// File with one JSON encoded telemetry record per line.
    #[arg(value_name = "FILE")]
    pub input: PathBuf,
    /// Target cache; appended to when it already exists.
    #[arg(long)]
    pub cache: String,
    /// Skip connection-state and message records.
    #[arg(long)]
    pub data_only: bool,
}

#[derive(Debug, Serialize)]
struct CacheSummary {
    name: String,
    display_name: String,
    file: PathBuf,
    entries: usize,
    memory_usage: usize,
    devices: BTreeSet<String>,
    first_recorded: Option<DateTime<Utc>>,
    last_recorded: Option<DateTime<Utc>>,
}

impl CacheSummary {
    fn from_entries(
        name: String,
        display_name: String,
        file: PathBuf,
        memory_usage: usize,
        entries: &[HistorianCacheEntry],
    ) -> Self {
        Self {
            name,
            display_name,
            file,
            entries: entries.len(),
            memory_usage,
            devices: entries.iter().map(|entry| entry.device_id.clone()).collect(),
            first_recorded: entries.first().map(|entry| entry.recorded_at),
            last_recorded: entries.last().map(|entry| entry.recorded_at),
        }
    }
}

pub fn list(config: &AppConfig) -> Result<()> {
    let manager = HistorianManager::new(&config.historian, config.plexus.self_device_id.clone());
    let names = manager
        .stored_cache_names()
        .with_context(|| format!("unable to scan {}", manager.root_path().display()))?;
    if names.is_empty() {
        println!("no caches under {}", manager.root_path().display());
    }
    for name in names {
        println!("{name}");
    }
    Ok(())
}

pub fn inspect(config: &AppConfig, args: &InspectArgs) -> Result<()> {
    let manager = HistorianManager::new(&config.historian, config.plexus.self_device_id.clone());
    let player = manager
        .player(&args.cache, true)
        .with_context(|| format!("unable to load cache {}", args.cache))?;
    if player.cache_size() == 0 {
        bail!("cache {} is empty or does not exist", args.cache);
    }

    let summary = CacheSummary::from_entries(
        player.cache().name().to_owned(),
        player.display_name(),
        player.cache_file_name(),
        player.cache_memory_usage(),
        &player.cache().entries(),
    );
    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("cache:        {}", summary.name);
    println!("display name: {}", summary.display_name);
    println!("file:         {}", summary.file.display());
    println!("entries:      {}", summary.entries);
    println!("memory:       {} bytes", summary.memory_usage);
    if let (Some(first), Some(last)) = (summary.first_recorded, summary.last_recorded) {
        println!("span:         {first} .. {last}");
    }
    println!(
        "devices:      {}",
        summary.devices.into_iter().collect::<Vec<_>>().join(", ")
    );
    Ok(())
}

/// Feed every line through the plexus with the cache's player listening,
/// then persist the cache.
pub fn import(config: &AppConfig, args: &ImportArgs) -> Result<()> {
    let plexus = EventPlexus::new(config, PlexusCollaborators::for_config(config));
    let player = plexus.data_historian_player(&args.cache)?;
    player.set_cache_only_data_events(args.data_only);

    let as_data: Arc<dyn DataContextListener> = player.clone();
    let as_status: Arc<dyn SystemStatusListener> = player.clone();
    plexus.register_data_context_listener(as_data.clone());
    plexus.register_system_status_listener(as_status.clone());

    let file = File::open(&args.input)
        .with_context(|| format!("unable to open {}", args.input.display()))?;
    let before = player.cache_size();
    let mut rejected = 0usize;
    for (number, line) in BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("unable to read {}", args.input.display()))?;
        if line.trim().is_empty() {
            continue;
        }
        if !plexus.on_raw_data_received(&line) {
            rejected += 1;
            warn!(line = number + 1, "rejected malformed record");
        }
    }

    plexus.unregister_data_context_listener(&as_data);
    plexus.unregister_system_status_listener(&as_status);

    let recorded = player.cache_size() - before;
    let bytes = player.store_historian_cache()?;
    info!(cache = %args.cache, recorded, rejected, bytes, "import complete");
    println!(
        "recorded {recorded} records into {} ({rejected} rejected, {bytes} bytes)",
        player.cache_file_name().display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use twinplex_msg::{ConnectionStateData, RecordHeader, SensorData, TelemetryRecord};

    fn config_at(root: &std::path::Path) -> AppConfig {
        let mut config = AppConfig::default();
        config.historian.root_path = root.to_path_buf();
        config
    }

    fn write_lines(path: &std::path::Path, records: &[TelemetryRecord]) {
        let mut file = File::create(path).unwrap();
        for record in records {
            writeln!(file, "{}", record.to_json().unwrap()).unwrap();
        }
        writeln!(file).unwrap();
        writeln!(file, "{{not json").unwrap();
    }

    #[test]
    fn import_then_inspect_and_list() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_at(&dir.path().join("caches"));
        let input = dir.path().join("feed.jsonl");
        let mut state = ConnectionStateData::new("pump-2");
        state.set_connected(true);
        write_lines(
            &input,
            &[
                SensorData::new(RecordHeader::new("Temp", "pump-1"), 20.5).into(),
                SensorData::new(RecordHeader::new("Temp", "pump-2"), 21.0).into(),
                state.into(),
            ],
        );

        let args = ImportArgs {
            input: input.clone(),
            cache: "bench".into(),
            data_only: false,
        };
        import(&config, &args).unwrap();

        let manager =
            HistorianManager::new(&config.historian, config.plexus.self_device_id.clone());
        assert_eq!(manager.stored_cache_names().unwrap(), vec!["bench".to_owned()]);
        let player = manager.player("bench", true).unwrap();
        assert_eq!(player.cache_size(), 3);

        let summary = CacheSummary::from_entries(
            player.cache().name().to_owned(),
            player.display_name(),
            player.cache_file_name(),
            player.cache_memory_usage(),
            &player.cache().entries(),
        );
        assert_eq!(summary.entries, 3);
        assert_eq!(
            summary.devices.into_iter().collect::<Vec<_>>(),
            vec!["pump-1".to_owned(), "pump-2".to_owned()]
        );
        assert!(summary.first_recorded.is_some() && summary.last_recorded.is_some());

        inspect(
            &config,
            &InspectArgs {
                cache: "bench.json".into(),
                json: true,
            },
        )
        .unwrap();
        list(&config).unwrap();
    }

    #[test]
    fn data_only_import_skips_connection_rows() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_at(dir.path());
        let input = dir.path().join("feed.jsonl");
        write_lines(
            &input,
            &[
                SensorData::new(RecordHeader::new("Temp", "pump-1"), 20.5).into(),
                ConnectionStateData::new("pump-1").into(),
            ],
        );

        import(
            &config,
            &ImportArgs {
                input,
                cache: "data_only".into(),
                data_only: true,
            },
        )
        .unwrap();

        let manager =
            HistorianManager::new(&config.historian, config.plexus.self_device_id.clone());
        assert_eq!(manager.player("data_only", true).unwrap().cache_size(), 1);
    }

    #[test]
    fn inspecting_a_missing_cache_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = inspect(
            &config_at(dir.path()),
            &InspectArgs {
                cache: "absent".into(),
                json: false,
            },
        )
        .unwrap_err();
        assert!(err.to_string().contains("absent"));
    }
}
