// src/main.rs
//! triprec - record GPS trips from gpsd or a serial receiver

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};
use trip_recorder::{
    display::{SessionEnd, TerminalDisplay},
    gps::{FeedAgent, FeedWatcher, GpsFeed},
    permission::{self, ConfiguredPermissions, PermissionProvider, PermissionScope},
    source::{BackgroundFixSource, ForegroundFixSource, ManualAgent, ManualWatcher},
    trips::{export, ExportFormat, TripExporter},
    CompletedTrip, FixBuffer, RecorderConfig, RecorderParts, RecorderService, SqliteTripStore,
    TripError, TripStore,
};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum FormatArg {
    Csv,
    Gpx,
    Geojson,
}

impl From<FormatArg> for ExportFormat {
    fn from(arg: FormatArg) -> Self {
        match arg {
            FormatArg::Csv => ExportFormat::Csv,
            FormatArg::Gpx => ExportFormat::Gpx,
            FormatArg::Geojson => ExportFormat::GeoJson,
        }
    }
}

#[derive(Parser)]
#[command(name = "triprec")]
#[command(about = "Record GPS trips that survive restarts", long_about = None)]
struct Cli {
    /// Config file (default: ~/.config/trip-recorder/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start or continue a trip with a live status view
    Record,
    /// Show whether an unfinished trip is buffered
    Status,
    /// Push the fixes of an exported CSV through the recorder and save the trip
    Replay {
        /// CSV with latitude,longitude,timestamp rows
        file: PathBuf,
    },
    /// Manage completed trips
    Trips {
        #[command(subcommand)]
        action: TripsAction,
    },
    /// Export a completed trip
    Export {
        id: i64,
        #[arg(long, value_enum, default_value = "csv")]
        format: FormatArg,
        /// Output directory (default: configured export_dir)
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Drop the buffered trip without saving it
    Discard,
    /// Show or change the GPS source
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    Show,
    /// Read fixes from a gpsd daemon
    Gpsd {
        host: String,
        #[arg(long, default_value_t = 2947)]
        port: u16,
    },
    /// Read NMEA sentences from a serial receiver
    Serial {
        port: String,
        #[arg(long, default_value_t = 9600)]
        baud: u32,
    },
}

#[derive(Subcommand)]
enum TripsAction {
    List,
    Show { id: i64 },
    Delete { id: i64 },
    Clear,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config_path = match cli.config {
        Some(path) => path,
        None => RecorderConfig::get_config_path()?,
    };
    let config = RecorderConfig::load_from(&config_path).context("Failed to load configuration")?;

    match cli.command {
        Commands::Record => record(&config).await,
        Commands::Status => status(&config),
        Commands::Replay { file } => replay(&config, &file).await,
        Commands::Trips { action } => trips(&config, action),
        Commands::Export { id, format, out } => export_trip(&config, id, format.into(), out),
        Commands::Discard => discard(&config),
        Commands::Config { action } => configure(config, &config_path, action),
    }
}

fn open_buffer(config: &RecorderConfig) -> anyhow::Result<FixBuffer> {
    let dir = config.data_dir()?;
    FixBuffer::open(&dir)
        .with_context(|| format!("Failed to open trip buffer in {}", dir.display()))
}

fn open_store(config: &RecorderConfig) -> anyhow::Result<SqliteTripStore> {
    let path = config.trips_db_path()?;
    SqliteTripStore::open(&path).with_context(|| format!("Failed to open {}", path.display()))
}

fn print_saved(trip: &Option<CompletedTrip>) {
    match trip {
        Some(trip) => println!(
            "Saved trip {}: {} fixes, {}, {:.2} km",
            trip.id,
            trip.points.len(),
            trip.format_duration(),
            trip.distance_km()
        ),
        None => println!("No fixes recorded, nothing saved."),
    }
}

async fn record(config: &RecorderConfig) -> anyhow::Result<()> {
    let feed = GpsFeed::from_config(config)?;
    let permissions: Arc<dyn PermissionProvider> = Arc::new(config.permissions());
    let status = permissions.check_and_request();
    for scope in [PermissionScope::Foreground, PermissionScope::Background] {
        if let Some(text) = permission::guidance(scope, status.get(scope)) {
            println!("{}", text);
        }
    }

    let parts = RecorderParts {
        buffer: open_buffer(config)?,
        foreground: Arc::new(ForegroundFixSource::new(
            Arc::new(FeedWatcher::new(feed.clone())),
            permissions.clone(),
        )),
        background: Arc::new(BackgroundFixSource::new(
            Arc::new(FeedAgent::new(feed.clone())),
            permissions,
        )),
        store: Arc::new(open_store(config)?),
    };
    let (handle, task) = RecorderService::spawn(parts, config.reconcile_interval());

    let restored = handle.status().await?;
    if !restored.state.is_recording() {
        if let Err(e) = handle.start().await {
            if let TripError::PermissionDenied { scope, state } = &e {
                if let Some(text) = permission::guidance(*scope, *state) {
                    println!("{}", text);
                }
            }
            handle.shutdown();
            task.await?;
            return Err(e).context("Could not start recording");
        }
    }

    let end = TerminalDisplay::new(feed.describe()).run(&handle).await;
    handle.shutdown();
    task.await?;

    match end? {
        SessionEnd::Saved(trip) => print_saved(&trip),
        SessionEnd::Left => println!("Trip left buffered; run `triprec record` to continue."),
    }
    Ok(())
}

fn status(config: &RecorderConfig) -> anyhow::Result<()> {
    let buffer = open_buffer(config)?;
    if !buffer.has_unfinished_trip() {
        println!("No unfinished trip.");
        return Ok(());
    }

    let fixes = buffer.list();
    println!("Unfinished trip with {} fixes", fixes.len());
    if let (Some(first), Some(last)) = (fixes.first(), fixes.last()) {
        println!("  From: {}", first.timestamp.format("%Y-%m-%d %H:%M:%S UTC"));
        println!("  To:   {}", last.timestamp.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    println!("  Session active: {}", buffer.is_active());
    println!("  Background:     {}", buffer.background_mode());
    Ok(())
}

async fn replay(config: &RecorderConfig, file: &Path) -> anyhow::Result<()> {
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let fixes = export::parse_csv(&content)?;
    if fixes.is_empty() {
        bail!("{} contains no fixes", file.display());
    }

    let buffer = open_buffer(config)?;
    if buffer.has_unfinished_trip() {
        bail!(
            "An unfinished trip is buffered; finish it with `triprec record` \
             or drop it with `triprec discard`"
        );
    }

    let watcher = Arc::new(ManualWatcher::new());
    let permissions: Arc<dyn PermissionProvider> = Arc::new(ConfiguredPermissions::all_granted());
    let parts = RecorderParts {
        buffer,
        foreground: Arc::new(ForegroundFixSource::new(watcher.clone(), permissions.clone())),
        background: Arc::new(BackgroundFixSource::new(
            Arc::new(ManualAgent::unavailable()),
            permissions,
        )),
        store: Arc::new(open_store(config)?),
    };
    let (handle, task) = RecorderService::spawn(parts, config.reconcile_interval());

    handle.start().await?;
    for fix in &fixes {
        watcher.push(*fix);
    }
    let saved = handle.stop().await;
    handle.shutdown();
    task.await?;

    print_saved(&saved?);
    Ok(())
}

fn trips(config: &RecorderConfig, action: TripsAction) -> anyhow::Result<()> {
    let store = open_store(config)?;
    match action {
        TripsAction::List => {
            let trips = store.list_all()?;
            if trips.is_empty() {
                println!("No trips recorded.");
            }
            for trip in trips {
                println!(
                    "{:>5}  {}  {:>12}  {:>9.2} km  {:>6} fixes",
                    trip.id,
                    trip.start_time.format("%Y-%m-%d %H:%M"),
                    trip.format_duration(),
                    trip.distance_km(),
                    trip.points.len()
                );
            }
        }
        TripsAction::Show { id } => {
            let trip = store.get(id)?.ok_or(TripError::TripNotFound(id))?;
            println!("Trip {}", trip.id);
            println!("  Start:    {}", trip.start_time.format("%Y-%m-%d %H:%M:%S UTC"));
            println!("  Duration: {}", trip.format_duration());
            println!("  Distance: {:.2} km", trip.distance_km());
            println!("  Fixes:    {}", trip.points.len());
        }
        TripsAction::Delete { id } => {
            if !store.delete(id)? {
                return Err(TripError::TripNotFound(id).into());
            }
            println!("Deleted trip {}", id);
        }
        TripsAction::Clear => {
            let removed = store.clear_all()?;
            println!("Deleted {} trips", removed);
        }
    }
    Ok(())
}

fn export_trip(
    config: &RecorderConfig,
    id: i64,
    format: ExportFormat,
    out: Option<PathBuf>,
) -> anyhow::Result<()> {
    let store = open_store(config)?;
    let trip = store.get(id)?.ok_or(TripError::TripNotFound(id))?;
    let out_dir = match out {
        Some(dir) => dir,
        None => config.export_dir()?,
    };

    let path = TripExporter::new(out_dir).export(&trip, format)?;
    println!("Exported trip {} as {} to {}", id, format.display_name(), path.display());
    Ok(())
}

fn discard(config: &RecorderConfig) -> anyhow::Result<()> {
    let buffer = open_buffer(config)?;
    if !buffer.has_unfinished_trip() {
        println!("No unfinished trip.");
        return Ok(());
    }
    let count = buffer.len();
    buffer.clear()?;
    println!("Discarded unfinished trip with {} fixes", count);
    Ok(())
}

fn configure(mut config: RecorderConfig, path: &Path, action: ConfigAction) -> anyhow::Result<()> {
    let changed = match action {
        ConfigAction::Show => false,
        ConfigAction::Gpsd { host, port } => {
            config.update_gpsd(host, port);
            true
        }
        ConfigAction::Serial { port, baud } => {
            config.update_serial(port, baud);
            true
        }
    };
    if changed {
        config.save_to(path).with_context(|| format!("Failed to write {}", path.display()))?;
        println!("Saved {}", path.display());
    }
    println!("Source: {}", GpsFeed::from_config(&config)?.describe());
    Ok(())
}
