use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{self, Duration, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::clock::Clock;
use crate::config::TrackerConfig;
use crate::db::{Database, LedgerCheckpoint};
use crate::error::PresenceError;
use crate::events::TrackerEvent;
use crate::presence::{PresencePolicy, SignalUpdate};
use crate::reconcile::{AttendanceHistory, ReconciliationScheduler};
use crate::sensing::SignalReport;

use super::engine::{Effects, TrackerCore, TrackerSnapshot};
use super::recovery::RecoveredLedger;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_error, log_info, log_warn};

const REPORT_QUEUE: usize = 64;
const EVENT_QUEUE: usize = 128;
const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Everything the loop task needs, moved into it at start.
struct LoopContext {
    core: Arc<Mutex<TrackerCore>>,
    scheduler: Arc<ReconciliationScheduler>,
    db: Option<Database>,
    clock: Arc<dyn Clock>,
    events: broadcast::Sender<TrackerEvent>,
    cancel_token: CancellationToken,
}

/// Owns the tracker loop: signal updates, accrual ticks and the daily flush
/// are all serialized through one task.
pub struct TrackerController {
    core: Arc<Mutex<TrackerCore>>,
    scheduler: Arc<ReconciliationScheduler>,
    clock: Arc<dyn Clock>,
    reports: mpsc::Sender<SignalReport>,
    events: broadcast::Sender<TrackerEvent>,
    cancel_token: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl TrackerController {
    /// Spawns the loop. Must be called from within a tokio runtime.
    pub fn start(
        config: &TrackerConfig,
        scheduler: Arc<ReconciliationScheduler>,
        db: Option<Database>,
        clock: Arc<dyn Clock>,
        recovered: RecoveredLedger,
    ) -> Self {
        let policy = PresencePolicy {
            rssi_threshold: config.rssi_threshold,
            staleness: config.staleness(),
        };
        let next_flush_at = scheduler.next_fire_after(clock.now());
        log_info!(
            "tracker starting for {}; first flush at {next_flush_at}",
            scheduler.employee_id()
        );

        let core = Arc::new(Mutex::new(TrackerCore::new(
            policy,
            recovered.ledger,
            recovered.revision,
            config.effective_heartbeat_ticks(),
            next_flush_at,
        )));
        let (reports_tx, reports_rx) = mpsc::channel(REPORT_QUEUE);
        let (events, _) = broadcast::channel(EVENT_QUEUE);
        let cancel_token = CancellationToken::new();

        let ctx = LoopContext {
            core: core.clone(),
            scheduler: scheduler.clone(),
            db,
            clock: clock.clone(),
            events: events.clone(),
            cancel_token: cancel_token.clone(),
        };
        let handle = tokio::spawn(run_loop(ctx, reports_rx, next_flush_at));

        Self {
            core,
            scheduler,
            clock,
            reports: reports_tx,
            events,
            cancel_token,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Sender the sensor adapters report through.
    pub fn report_sender(&self) -> mpsc::Sender<SignalReport> {
        self.reports.clone()
    }

    /// Result of an on-demand identity check.
    pub async fn report_identity(&self, verified: bool) -> Result<()> {
        self.reports
            .send(SignalReport::Observed(SignalUpdate::Identity { verified }))
            .await
            .map_err(|_| anyhow!("tracker is not running"))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TrackerEvent> {
        self.events.subscribe()
    }

    pub async fn snapshot(&self) -> TrackerSnapshot {
        let now = self.clock.now();
        self.core.lock().await.snapshot(now)
    }

    pub async fn fetch_history(&self) -> Result<AttendanceHistory, PresenceError> {
        self.scheduler
            .sink()
            .fetch_history(self.scheduler.employee_id())
            .await
    }

    pub fn is_running(&self) -> bool {
        !self.cancel_token.is_cancelled()
    }

    /// Cancels every timer and waits for the loop to exit. In-flight
    /// submissions finish on their own; their results are dropped.
    pub async fn shutdown(&self) -> Result<()> {
        self.cancel_token.cancel();
        if let Some(handle) = self.handle.lock().await.take() {
            handle.await.context("tracker loop failed to join")?;
        }
        log_info!("tracker stopped");
        Ok(())
    }
}

fn until(clock: &dyn Clock, target: DateTime<Utc>) -> Duration {
    (target - clock.now()).to_std().unwrap_or(Duration::ZERO)
}

async fn run_loop(
    ctx: LoopContext,
    mut reports: mpsc::Receiver<SignalReport>,
    mut flush_due_at: DateTime<Utc>,
) {
    let mut ticker = time::interval_at(Instant::now() + TICK_INTERVAL, TICK_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Burst);

    let flush_timer = time::sleep(until(ctx.clock.as_ref(), flush_due_at));
    tokio::pin!(flush_timer);

    let mut reports_open = true;

    loop {
        tokio::select! {
            _ = ctx.cancel_token.cancelled() => {
                break;
            }
            _ = ticker.tick() => {
                let now = ctx.clock.now();
                let effects = ctx.core.lock().await.accrual_tick(now);
                ctx.dispatch(effects, flush_due_at).await;
            }
            report = reports.recv(), if reports_open => {
                match report {
                    Some(report) => {
                        let now = ctx.clock.now();
                        let effects = ctx.core.lock().await.handle_report(report, now);
                        ctx.dispatch(effects, flush_due_at).await;
                    }
                    None => {
                        log_warn!("all signal sources closed; accrual continues on last values");
                        reports_open = false;
                    }
                }
            }
            _ = &mut flush_timer => {
                let at = flush_due_at;
                let (submission, effects) = {
                    let mut core = ctx.core.lock().await;
                    let (submission, effects) = core.flush(&ctx.scheduler, at);
                    flush_due_at = core.next_flush_at();
                    (submission, effects)
                };
                ctx.dispatch(effects, flush_due_at).await;
                flush_timer
                    .as_mut()
                    .reset(Instant::now() + until(ctx.clock.as_ref(), flush_due_at));

                let scheduler = ctx.scheduler.clone();
                let events = ctx.events.clone();
                let cancel_token = ctx.cancel_token.clone();
                tokio::spawn(async move {
                    let outcome = scheduler.submit(submission).await;
                    if cancel_token.is_cancelled() {
                        return;
                    }
                    let date = outcome.submission.date;
                    let event = match outcome.result {
                        Ok(()) => TrackerEvent::FlushCompleted {
                            date,
                            total_minutes: outcome.submission.total_minutes,
                            resubmitted: outcome.resubmitted,
                        },
                        Err(err) => TrackerEvent::FlushFailed {
                            date,
                            error: err.to_string(),
                            queued: outcome.queued,
                        },
                    };
                    let _ = events.send(event);
                });
            }
        }
    }

    log_info!("tracker loop shutting down");
}

impl LoopContext {
    async fn dispatch(&self, effects: Effects, flush_due_at: DateTime<Utc>) {
        for event in effects.events {
            // no subscribers is fine
            let _ = self.events.send(event);
        }

        if !effects.checkpoint {
            return;
        }
        let Some(db) = self.db.clone() else {
            return;
        };

        let checkpoint = {
            let mut core = self.core.lock().await;
            LedgerCheckpoint {
                revision: core.next_revision(),
                flush_due_at,
                record: core.ledger().record().clone(),
                updated_at: self.clock.now(),
            }
        };
        tokio::spawn(async move {
            match db.save_checkpoint(&checkpoint).await {
                Ok(true) => {}
                Ok(false) => log_warn!(
                    "checkpoint rev {} dropped: a newer revision is stored",
                    checkpoint.revision
                ),
                Err(err) => log_error!("failed to checkpoint ledger: {err:#}"),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TokioClock;
    use crate::presence::{PresenceState, ProximityReading};
    use crate::reconcile::sink::testing::RecordingSink;
    use chrono::{Local, TimeZone};
    use tempfile::TempDir;

    fn config() -> TrackerConfig {
        TrackerConfig {
            flush_hour: 18,
            flush_minute: 56,
            ..TrackerConfig::default()
        }
    }

    fn start(
        base: DateTime<Utc>,
        config: &TrackerConfig,
        sink: Arc<RecordingSink>,
        db: Option<Database>,
    ) -> TrackerController {
        let scheduler = Arc::new(ReconciliationScheduler::new(
            sink,
            db.clone(),
            config.employee_id.clone(),
            config.flush_hour,
            config.flush_minute,
        ));
        TrackerController::start(
            config,
            scheduler,
            db,
            Arc::new(TokioClock::starting_at(base)),
            RecoveredLedger::default(),
        )
    }

    async fn beacon(controller: &TrackerController, observed_at: DateTime<Utc>) {
        controller
            .report_sender()
            .send(SignalReport::Observed(SignalUpdate::Proximity(
                ProximityReading {
                    signal_strength: -60,
                    observed_at,
                },
            )))
            .await
            .unwrap();
    }

    async fn arrive(controller: &TrackerController, at: DateTime<Utc>) {
        controller
            .report_sender()
            .send(SignalReport::Observed(SignalUpdate::Geofence { inside: true }))
            .await
            .unwrap();
        beacon(controller, at).await;
        controller.report_identity(true).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn stale_beacon_closes_entry_after_window() {
        let base = Utc.with_ymd_and_hms(2026, 10, 18, 3, 0, 0).unwrap();
        let controller = start(base, &config(), Arc::new(RecordingSink::default()), None);
        let mut events = controller.subscribe();

        arrive(&controller, base).await;
        time::sleep(Duration::from_secs(10)).await;
        beacon(&controller, base + chrono::Duration::seconds(10)).await;
        time::sleep(Duration::from_secs(10)).await;
        beacon(&controller, base + chrono::Duration::seconds(20)).await;
        time::sleep(Duration::from_millis(15_500)).await;

        let snapshot = controller.snapshot().await;
        assert_eq!(snapshot.state, PresenceState::Absent);
        assert_eq!(snapshot.accumulated_seconds, 30);
        assert_eq!(snapshot.accumulated_display, "00:00:30");
        assert_eq!(snapshot.intervals.len(), 1);
        assert_eq!(snapshot.intervals[0].entry, base);
        assert_eq!(
            snapshot.intervals[0].exit,
            Some(base + chrono::Duration::seconds(31))
        );

        let first = events.recv().await.unwrap();
        assert!(matches!(
            first,
            TrackerEvent::StateChanged { state: PresenceState::Present, .. }
        ));

        controller.shutdown().await.unwrap();
        assert!(!controller.is_running());
        assert!(controller.report_identity(true).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn daily_flush_submits_and_rearms_with_carry_over() {
        let base = Local
            .with_ymd_and_hms(2026, 10, 18, 18, 54, 30)
            .unwrap()
            .with_timezone(&Utc);
        let config = TrackerConfig {
            staleness_seconds: 3_600,
            ..config()
        };
        let sink = Arc::new(RecordingSink::default());
        let controller = start(base, &config, sink.clone(), None);
        let mut events = controller.subscribe();

        let flush_at = controller.snapshot().await.next_flush_at;
        assert_eq!(flush_at, base + chrono::Duration::seconds(90));

        arrive(&controller, base).await;
        time::sleep(Duration::from_secs(95)).await;

        let submitted = sink.submitted();
        assert_eq!(submitted.len(), 1);
        assert_eq!(submitted[0].total_minutes, 1);
        assert_eq!(submitted[0].entry_times, vec![base]);
        assert_eq!(submitted[0].date, base.with_timezone(&Local).date_naive());

        let snapshot = controller.snapshot().await;
        assert_eq!(snapshot.state, PresenceState::Present);
        assert_eq!(snapshot.intervals[0].entry, flush_at);
        assert!(snapshot.next_flush_at > flush_at + chrono::Duration::hours(23));

        let mut completed = false;
        while let Ok(event) = events.try_recv() {
            if let TrackerEvent::FlushCompleted { total_minutes, .. } = event {
                assert_eq!(total_minutes, 1);
                completed = true;
            }
        }
        assert!(completed);

        controller.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn failed_flush_is_reported_and_queued() {
        let dir = TempDir::new().unwrap();
        let db = Database::new(dir.path().join("ledger.sqlite3")).unwrap();
        let base = Local
            .with_ymd_and_hms(2026, 10, 18, 18, 55, 50)
            .unwrap()
            .with_timezone(&Utc);
        let sink = Arc::new(RecordingSink::default());
        sink.fail_next("503 Service Unavailable");
        let controller = start(base, &config(), sink, Some(db.clone()));
        let mut events = controller.subscribe();

        time::sleep(Duration::from_secs(11)).await;
        // the outbox write runs on the database thread, outside tokio's clock
        let mut failed = None;
        for _ in 0..100 {
            while let Ok(event) = events.try_recv() {
                if let TrackerEvent::FlushFailed { queued, .. } = event {
                    failed = Some(queued);
                }
            }
            if failed.is_some() {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(10));
            tokio::task::yield_now().await;
        }
        assert_eq!(failed, Some(true));
        assert_eq!(db.list_pending_flushes().await.unwrap().len(), 1);

        controller.shutdown().await.unwrap();
    }
}
