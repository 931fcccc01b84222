use crate::backup::{export_backup_with_config, import_backup_with_config};
use crate::config::ResolvedConfig;
use crate::efficiency::recalculate;
use crate::errors::{AppError, AppResult};
use crate::models::ExportSelection;
use crate::store::{BackupStore, MemoryStore};
use crate::utils::{format_duration, format_size};
use clap::{Arg, ArgAction, ArgMatches, Command};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

// CLI metadata constants
const APP_VERSION: &str = env!("CARGO_PKG_VERSION");
const APP_AUTHOR: &str = env!("CARGO_PKG_AUTHORS");
const APP_ABOUT: &str = env!("CARGO_PKG_DESCRIPTION");
const DEFAULT_USER: &str = "local";

fn archive_arg() -> Arg<'static> {
    Arg::new("archive")
        .help("Backup archive (JSON export or XML app backup)")
        .required(true)
        .value_parser(clap::value_parser!(PathBuf))
}

fn config_arg() -> Arg<'static> {
    Arg::new("config")
        .long("config")
        .help("Path to a TOML configuration file")
        .value_parser(clap::value_parser!(PathBuf))
        .action(ArgAction::Set)
}

fn user_arg() -> Arg<'static> {
    Arg::new("user")
        .short('u')
        .long("user")
        .help("Username the backup is imported for")
        .default_value(DEFAULT_USER)
        .action(ArgAction::Set)
}

pub fn build_command() -> Command<'static> {
    Command::new("fuel-backup")
        .version(APP_VERSION)
        .author(APP_AUTHOR)
        .about(APP_ABOUT)
        .subcommand(
            Command::new("inspect")
                .about("Import a backup into memory and print what it contains")
                .arg(archive_arg())
                .arg(user_arg())
                .arg(config_arg()),
        )
        .subcommand(
            Command::new("convert")
                .about("Import a backup and write it back out as a JSON archive")
                .after_help("Example:\n  fuel-backup convert acar-backup.abp export.zip")
                .arg(archive_arg())
                .arg(
                    Arg::new("output")
                        .help("Path of the zip archive to write")
                        .required(true)
                        .value_parser(clap::value_parser!(PathBuf)),
                )
                .arg(user_arg())
                .arg(config_arg()),
        )
        .subcommand(
            Command::new("recalc")
                .about("Print recalculated fuel efficiency for every fillup")
                .arg(archive_arg())
                .arg(config_arg()),
        )
}

/// Parses command-line arguments and runs the selected subcommand.
///
/// - `inspect`: import into an in-memory store and print record counts
/// - `convert`: import, then export the same data as a JSON archive
/// - `recalc`: import and print per-fillup efficiency by vehicle
pub async fn cli() -> AppResult<()> {
    let cmd = build_command();
    let mut cmd_for_help = cmd.clone();
    let matches = cmd.get_matches();

    match matches.subcommand() {
        Some(("inspect", sub)) => inspect(sub).await,
        Some(("convert", sub)) => convert(sub).await,
        Some(("recalc", sub)) => recalc(sub).await,
        _ => cmd_for_help
            .print_help()
            .map_err(|e| AppError::IoError(format!("Failed to print help: {e}"))),
    }
}

fn load_config(sub: &ArgMatches) -> AppResult<ResolvedConfig> {
    match sub.get_one::<PathBuf>("config") {
        Some(path) => ResolvedConfig::from_toml_file(path),
        None => Ok(ResolvedConfig::default()),
    }
}

fn required_path<'a>(sub: &'a ArgMatches, name: &str) -> AppResult<&'a Path> {
    sub.get_one::<PathBuf>(name)
        .map(PathBuf::as_path)
        .ok_or_else(|| AppError::InvalidInput(format!("Missing argument <{name}>")))
}

fn username(sub: &ArgMatches) -> &str {
    sub.get_one::<String>("user")
        .map(String::as_str)
        .unwrap_or(DEFAULT_USER)
}

async fn import_into_memory(
    archive: &Path,
    username: &str,
    config: &ResolvedConfig,
) -> AppResult<MemoryStore> {
    let store = MemoryStore::new();
    let counts = import_backup_with_config(&store, username, archive, config).await?;
    info!(
        archive = %archive.display(),
        vehicles = counts.vehicles,
        fillups = counts.fillups,
        events = counts.events,
        "Backup loaded"
    );
    Ok(store)
}

async fn inspect(sub: &ArgMatches) -> AppResult<()> {
    let config = load_config(sub)?;
    let archive = required_path(sub, "archive")?;
    let user = username(sub);
    let store = import_into_memory(archive, user, &config).await?;

    let types = store.find_user_types(user).await?;
    println!(
        "event subtypes: {}, fuel types: {}, trip types: {}",
        types.event_subtypes.len(),
        types.fuel_types.len(),
        types.trip_types.len()
    );
    for vehicle in store.find_vehicles(user).await? {
        let fillups = store.find_fillups(user, &vehicle.id).await?;
        let events = store.find_events(user, &vehicle.id).await?;
        println!(
            "{} ({}): {} fillups, {} events",
            vehicle.name,
            vehicle.id,
            fillups.len(),
            events.len()
        );
    }
    Ok(())
}

async fn convert(sub: &ArgMatches) -> AppResult<()> {
    let started = Instant::now();
    let config = load_config(sub)?;
    let archive = required_path(sub, "archive")?;
    let output = required_path(sub, "output")?;
    let user = username(sub);
    let store = import_into_memory(archive, user, &config).await?;

    let mut file = tokio::fs::File::create(output).await.map_err(|e| {
        AppError::IoError(format!("Failed to create {}: {e}", output.display()))
    })?;
    let written = export_backup_with_config(Arc::new(store), ExportSelection::all(user), &config)
        .write_to(&mut file)
        .await?;

    info!(
        output = %output.display(),
        size = %format_size(written),
        elapsed = %format_duration(started.elapsed()),
        "Archive written"
    );
    Ok(())
}

async fn recalc(sub: &ArgMatches) -> AppResult<()> {
    let config = load_config(sub)?;
    let archive = required_path(sub, "archive")?;
    let store = import_into_memory(archive, DEFAULT_USER, &config).await?;

    for vehicle in store.find_vehicles(DEFAULT_USER).await? {
        println!("{} ({})", vehicle.name, vehicle.id);
        let fillups = recalculate(store.find_fillups(DEFAULT_USER, &vehicle.id).await?);
        for fillup in fillups {
            let efficiency = fillup
                .fuel_efficiency
                .map(|e| e.round_dp(2).to_string())
                .unwrap_or_else(|| "-".to_string());
            println!(
                "  {:>10} {:>12} {:>8} {}",
                fillup.date, fillup.odometer_reading, fillup.volume, efficiency
            );
        }
    }
    Ok(())
}
