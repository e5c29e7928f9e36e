mod bridge;
mod clock;
mod config;
mod db;
mod error;
mod events;
mod history;
mod ledger;
mod presence;
mod reconcile;
mod sensing;
mod tracker;
mod utils;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};
use tokio_util::sync::CancellationToken;

pub use bridge::{run_bridge, Bridge, BridgeLocation, BridgeMessage, BridgeScanner};
pub use clock::{Clock, SystemClock, TokioClock};
pub use config::{ConfigStore, TrackerConfig};
pub use db::Database;
pub use error::{PresenceError, SensorError};
pub use events::TrackerEvent;
pub use history::HistorySummary;
pub use ledger::{format_hms, DailySnapshot, Interval, SessionRecord, TimeAccrualLedger};
pub use presence::{
    AbsenceReason, PresencePolicy, PresenceState, PresenceStateMachine, ProximityReading,
    SignalKind, SignalUpdate, Transition,
};
pub use reconcile::{
    next_flush_after, AttendanceHistory, DailyRecordSubmission, FlushOutcome, HistoryEntry,
    HttpSink, ReconciliationScheduler, RemoteSink,
};
pub use sensing::{
    Advertisement, BeaconScanner, GeoPoint, Geofence, LocationProvider, SeenDevice,
    SensingController, SensorProviders, SignalReport,
};
pub use tracker::{recover_from_checkpoint, RecoveredLedger, TrackerController, TrackerSnapshot};

#[derive(Debug, Parser)]
#[command(name = "presence-ledger", about = "Workplace presence tracking and daily attendance flush")]
pub struct Cli {
    /// JSON configuration file; defaults apply when it does not exist.
    #[arg(long, env = "PRESENCE_LEDGER_CONFIG", default_value = "presence-ledger.json")]
    pub config: PathBuf,

    /// Print the attendance history summary and exit.
    #[arg(long)]
    pub history: bool,
}

pub fn run(cli: Cli) -> Result<()> {
    // Initialize logging (reads RUST_LOG env var)
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    info!("presence-ledger starting up...");

    let store = ConfigStore::new(cli.config.clone())?;
    let config = store.config();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;

    if cli.history {
        return runtime.block_on(print_history(&config));
    }
    runtime.block_on(run_tracker(config))
}

async fn print_history(config: &TrackerConfig) -> Result<()> {
    let sink = HttpSink::new(&config.sink_base_url, config.request_timeout())?;
    let history = sink.fetch_history(&config.employee_id).await?;
    let summary = HistorySummary::from_history(history);
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

async fn run_tracker(config: TrackerConfig) -> Result<()> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let database = config
        .database_path
        .clone()
        .map(Database::new)
        .transpose()?;

    let sink: Arc<dyn RemoteSink> = Arc::new(HttpSink::new(
        &config.sink_base_url,
        config.request_timeout(),
    )?);
    let scheduler = Arc::new(ReconciliationScheduler::new(
        sink,
        database.clone(),
        config.employee_id.clone(),
        config.flush_hour,
        config.flush_minute,
    ));

    // Resume the day a previous run was tracking, or queue it if its flush was missed.
    // A missed day that cannot be queued stops startup so the checkpoint survives.
    let recovered = match &database {
        Some(db) => recover_from_checkpoint(db, &scheduler, clock.now())
            .await
            .context("ledger recovery failed")?,
        None => RecoveredLedger::default(),
    };

    let tracker = TrackerController::start(&config, scheduler, database, clock.clone(), recovered);

    let location = Arc::new(BridgeLocation::default());
    let scanner = Arc::new(BridgeScanner::default());
    let mut sensing = SensingController::new();
    sensing
        .start_sensing(
            &config,
            SensorProviders {
                location: location.clone(),
                scanner: scanner.clone(),
            },
            clock,
            tracker.report_sender(),
        )
        .await?;

    let cancel_token = CancellationToken::new();
    let bridge = Bridge {
        location: &*location,
        scanner: &*scanner,
        tracker: tracker.report_sender(),
    };
    let stdin = tokio::io::BufReader::new(tokio::io::stdin());

    tokio::select! {
        result = run_bridge(stdin, bridge, cancel_token.clone()) => {
            if let Err(err) = result {
                warn!("Bridge stopped: {err:#}");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted; shutting down");
            cancel_token.cancel();
        }
    }

    sensing.stop_sensing().await?;
    tracker.shutdown().await?;
    Ok(())
}
