//! Daily flush: take the day's record out of the ledger, submit it, and keep
//! anything the sink did not acknowledge in the outbox for the next firing.

use std::sync::Arc;

use chrono::{DateTime, Local, Utc};

use crate::db::{Database, PendingFlush};
use crate::error::PresenceError;
use crate::ledger::TimeAccrualLedger;

use super::schedule::next_flush_after;
use super::sink::{DailyRecordSubmission, RemoteSink};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_error, log_info, log_warn};

/// Result of one firing's network work.
#[derive(Debug, Clone, PartialEq)]
pub struct FlushOutcome {
    pub submission: DailyRecordSubmission,
    pub result: Result<(), PresenceError>,
    /// The failed submission was stored for the next firing.
    pub queued: bool,
    /// Outbox entries from earlier firings that were accepted this time.
    pub resubmitted: usize,
    /// Outbox entries that failed again and stay queued.
    pub still_pending: usize,
}

pub struct ReconciliationScheduler {
    sink: Arc<dyn RemoteSink>,
    db: Option<Database>,
    employee_id: String,
    flush_hour: u32,
    flush_minute: u32,
}

impl ReconciliationScheduler {
    pub fn new(
        sink: Arc<dyn RemoteSink>,
        db: Option<Database>,
        employee_id: impl Into<String>,
        flush_hour: u32,
        flush_minute: u32,
    ) -> Self {
        Self {
            sink,
            db,
            employee_id: employee_id.into(),
            flush_hour,
            flush_minute,
        }
    }

    pub fn sink(&self) -> &Arc<dyn RemoteSink> {
        &self.sink
    }

    pub fn employee_id(&self) -> &str {
        &self.employee_id
    }

    /// Next flush instant strictly after `now`, in local wall-clock time.
    pub fn next_fire_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        next_flush_after(&now.with_timezone(&Local), self.flush_hour, self.flush_minute)
            .with_timezone(&Utc)
    }

    /// Takes the day's record out of the ledger. Runs inside the tracker loop
    /// so no accrual tick can interleave with the reset.
    pub fn fire(&self, ledger: &mut TimeAccrualLedger, at: DateTime<Utc>) -> DailyRecordSubmission {
        let snapshot = ledger.flush_and_reset();
        let date = at.with_timezone(&Local).date_naive();
        log_info!(
            "flushing {} for {date}: {} entries, {} min",
            self.employee_id,
            snapshot.record.entry_times.len(),
            snapshot.total_minutes
        );
        DailyRecordSubmission::from_snapshot(&self.employee_id, date, snapshot)
    }

    /// Resubmits earlier failures once, then submits `submission`. A failed
    /// submission goes to the outbox when a database is configured; it is not
    /// retried before the next firing.
    pub async fn submit(&self, submission: DailyRecordSubmission) -> FlushOutcome {
        let (resubmitted, still_pending) = self.drain_outbox().await;

        let result = self
            .sink
            .submit_daily_record(&submission)
            .await
            .map(|_| ());

        let mut queued = false;
        if let Err(err) = &result {
            log_error!("flush for {} failed: {err}", submission.date);
            queued = self.enqueue(&submission, &err.to_string(), Utc::now()).await;
        }

        FlushOutcome {
            submission,
            result,
            queued,
            resubmitted,
            still_pending,
        }
    }

    /// Stores a submission for the next firing. Returns whether it was stored.
    pub async fn enqueue(&self, submission: &DailyRecordSubmission, error: &str, at: DateTime<Utc>) -> bool {
        let Some(db) = &self.db else {
            log_warn!(
                "no outbox configured; record for {} is dropped",
                submission.date
            );
            return false;
        };

        let pending = PendingFlush {
            submission: submission.clone(),
            attempts: 1,
            last_error: Some(error.to_string()),
            created_at: at,
            updated_at: at,
        };
        match db.insert_pending_flush(&pending).await {
            Ok(()) => {
                log_info!("record for {} queued for the next flush", submission.date);
                true
            }
            Err(err) => {
                log_error!("failed to queue record for {}: {err:#}", submission.date);
                false
            }
        }
    }

    async fn drain_outbox(&self) -> (usize, usize) {
        let Some(db) = &self.db else {
            return (0, 0);
        };

        let pending = match db.list_pending_flushes().await {
            Ok(pending) => pending,
            Err(err) => {
                log_error!("failed to read outbox: {err:#}");
                return (0, 0);
            }
        };

        let mut resubmitted = 0;
        let mut still_pending = 0;
        for entry in pending {
            let flush_id = entry.submission.flush_id;
            match self.sink.submit_daily_record(&entry.submission).await {
                Ok(_) => {
                    resubmitted += 1;
                    log_info!(
                        "queued record for {} accepted after {} attempt(s)",
                        entry.submission.date,
                        entry.attempts + 1
                    );
                    if let Err(err) = db.remove_pending_flush(flush_id).await {
                        log_error!("failed to remove delivered record {flush_id}: {err:#}");
                    }
                }
                Err(err) => {
                    still_pending += 1;
                    log_warn!("queued record for {} failed again: {err}", entry.submission.date);
                    if let Err(db_err) = db
                        .record_pending_failure(flush_id, &err.to_string(), Utc::now())
                        .await
                    {
                        log_error!("failed to update queued record {flush_id}: {db_err:#}");
                    }
                }
            }
        }
        (resubmitted, still_pending)
    }
}
