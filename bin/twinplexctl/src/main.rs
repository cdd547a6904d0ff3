//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "binary"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Operator CLI for historian caches and replay."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;
use twinplex_common::{init_tracing, AppConfig};

mod cache;
mod replay;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "twinplex historian and replay utility",
    long_about = None
)]
struct Cli {
    #[arg(long, value_name = "FILE", global = true, help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "List caches persisted under the historian root")]
    List,
    #[command(about = "Summarise one persisted cache")]
    Inspect(cache::InspectArgs),
    #[command(about = "Record a JSON-lines telemetry file into a cache")]
    Import(cache::ImportArgs),
    #[command(about = "Replay a cache through the event plexus")]
    Replay(replay::ReplayArgs),
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;
    init_tracing("twinplexctl", &config.logging)?;
    info!(
        self_device_id = %config.plexus.self_device_id,
        historian_root = %config.historian.root_path.display(),
        "configuration loaded"
    );

    match cli.command {
        Commands::List => cache::list(&config)?,
        Commands::Inspect(args) => cache::inspect(&config, &args)?,
        Commands::Import(args) => cache::import(&config, &args)?,
        Commands::Replay(args) => replay::run(config, &args)?,
    }
    Ok(())
}

/// Explicit path or `TWINPLEX_CONFIG` must load; otherwise fall back to the
/// reference file and finally to built-in defaults.
fn load_config(explicit: Option<&PathBuf>) -> Result<AppConfig> {
    let mut candidates = Vec::new();
    if let Some(path) = explicit {
        candidates.push(path.clone());
    }
    candidates.push(PathBuf::from("configs/twinplex.toml"));

    let required = explicit.is_some() || std::env::var_os(AppConfig::ENV_CONFIG_PATH).is_some();
    let config = match AppConfig::load_with_source(&candidates) {
        Ok(loaded) => loaded.config,
        Err(err) if required => return Err(err),
        Err(_) => AppConfig::default(),
    };
    config.validate()?;
    Ok(config)
}
