use anyhow::{bail, Result};
use chrono::{DateTime, Local, Utc};

use crate::db::Database;
use crate::ledger::{DailySnapshot, SessionRecord, TimeAccrualLedger};
use crate::reconcile::{DailyRecordSubmission, ReconciliationScheduler};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

/// Ledger state to resume from after a restart.
#[derive(Debug, Default)]
pub struct RecoveredLedger {
    pub ledger: TimeAccrualLedger,
    /// Last stored checkpoint revision; new checkpoints continue above it.
    pub revision: u64,
}

/// Restores the checkpoint left by a previous run.
///
/// A checkpoint whose flush instant is still ahead is resumed; an entry that
/// was open when the process died is closed at the checkpoint time, so
/// presence has to be re-established. A checkpoint whose flush instant has
/// passed is a missed flush and goes to the outbox for the next firing; if
/// the outbox refuses it, the checkpoint is kept and an error returned.
///
/// A checkpoint row that cannot be read is cleared, so the fresh run's
/// revisions are not shadowed by the unreadable one.
pub async fn recover_from_checkpoint(
    db: &Database,
    scheduler: &ReconciliationScheduler,
    now: DateTime<Utc>,
) -> Result<RecoveredLedger> {
    let checkpoint = match db.load_checkpoint().await {
        Ok(Some(checkpoint)) => checkpoint,
        Ok(None) => return Ok(RecoveredLedger::default()),
        Err(err) => {
            log_warn!("discarding unreadable checkpoint: {err:#}");
            db.clear_checkpoint().await?;
            return Ok(RecoveredLedger::default());
        }
    };

    let mut record = checkpoint.record;
    if !record.is_consistent() {
        log_warn!("discarding inconsistent checkpoint rev {}", checkpoint.revision);
        db.clear_checkpoint().await?;
        return Ok(RecoveredLedger::default());
    }
    close_open_entry(&mut record, checkpoint.updated_at);

    if checkpoint.flush_due_at <= now {
        if !record.is_empty() {
            let date = checkpoint.flush_due_at.with_timezone(&Local).date_naive();
            let submission = DailyRecordSubmission::from_snapshot(
                scheduler.employee_id(),
                date,
                DailySnapshot::from_record(record),
            );
            log_info!(
                "flush for {date} was missed while stopped; queueing {} min",
                submission.total_minutes
            );
            let queued = scheduler
                .enqueue(&submission, "flush missed while stopped", now)
                .await;
            if !queued {
                bail!(
                    "could not queue missed flush for {date}; checkpoint rev {} kept",
                    checkpoint.revision
                );
            }
        }
        db.clear_checkpoint().await?;
        return Ok(RecoveredLedger::default());
    }

    log_info!(
        "resuming ledger from checkpoint rev {} ({}s accrued)",
        checkpoint.revision,
        record.accumulated_seconds
    );
    let ledger = TimeAccrualLedger::restore(record)?;
    Ok(RecoveredLedger {
        ledger,
        revision: checkpoint.revision,
    })
}

fn close_open_entry(record: &mut SessionRecord, at: DateTime<Utc>) {
    if record.has_open_entry() {
        record.exit_times.push(at);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::LedgerCheckpoint;
    use crate::reconcile::sink::testing::RecordingSink;
    use chrono::{Duration, TimeZone};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 18, 9, 0, 0).unwrap() + Duration::seconds(secs)
    }

    fn setup() -> (TempDir, Database, ReconciliationScheduler) {
        let dir = TempDir::new().unwrap();
        let db = Database::new(dir.path().join("ledger.sqlite3")).unwrap();
        let scheduler = ReconciliationScheduler::new(
            Arc::new(RecordingSink::default()),
            Some(db.clone()),
            "EMP003",
            18,
            56,
        );
        (dir, db, scheduler)
    }

    fn checkpoint(flush_due_at: DateTime<Utc>) -> LedgerCheckpoint {
        LedgerCheckpoint {
            revision: 42,
            flush_due_at,
            record: SessionRecord {
                entry_times: vec![t(0)],
                exit_times: vec![],
                accumulated_seconds: 600,
            },
            updated_at: t(600),
        }
    }

    #[tokio::test]
    async fn empty_database_starts_fresh() {
        let (_dir, db, scheduler) = setup();
        let recovered = recover_from_checkpoint(&db, &scheduler, t(0)).await.unwrap();
        assert!(recovered.ledger.record().is_empty());
        assert_eq!(recovered.revision, 0);
    }

    #[tokio::test]
    async fn same_day_checkpoint_resumes_with_entry_closed() {
        let (_dir, db, scheduler) = setup();
        db.save_checkpoint(&checkpoint(t(36_000))).await.unwrap();

        let recovered = recover_from_checkpoint(&db, &scheduler, t(900)).await.unwrap();
        let record = recovered.ledger.record();
        assert_eq!(record.entry_times, vec![t(0)]);
        assert_eq!(record.exit_times, vec![t(600)]);
        assert_eq!(record.accumulated_seconds, 600);
        assert_eq!(recovered.revision, 42);
        assert!(db.list_pending_flushes().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn overdue_checkpoint_becomes_pending_flush() {
        let (_dir, db, scheduler) = setup();
        db.save_checkpoint(&checkpoint(t(3_600))).await.unwrap();

        let recovered = recover_from_checkpoint(&db, &scheduler, t(90_000)).await.unwrap();
        assert!(recovered.ledger.record().is_empty());
        assert!(db.load_checkpoint().await.unwrap().is_none());

        let pending = db.list_pending_flushes().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].submission.total_minutes, 10);
        assert_eq!(pending[0].submission.exit_times, vec![t(600)]);
    }

    #[tokio::test]
    async fn overdue_checkpoint_is_kept_when_outbox_rejects_it() {
        let (_dir, db, scheduler) = setup();
        db.save_checkpoint(&checkpoint(t(3_600))).await.unwrap();
        db.execute(|conn| {
            conn.execute_batch("DROP TABLE pending_flushes")?;
            Ok(())
        })
        .await
        .unwrap();

        let result = recover_from_checkpoint(&db, &scheduler, t(90_000)).await;
        assert!(result.is_err());

        let kept = db.load_checkpoint().await.unwrap().unwrap();
        assert_eq!(kept.revision, 42);
        assert_eq!(kept.record.accumulated_seconds, 600);
    }

    #[tokio::test]
    async fn unreadable_checkpoint_is_cleared_so_new_revisions_land() {
        let (_dir, db, scheduler) = setup();
        let mut stored = checkpoint(t(36_000));
        stored.revision = 500;
        db.save_checkpoint(&stored).await.unwrap();
        db.execute(|conn| {
            conn.execute("UPDATE ledger_checkpoint SET entry_times = 'not json'", [])?;
            Ok(())
        })
        .await
        .unwrap();

        let recovered = recover_from_checkpoint(&db, &scheduler, t(900)).await.unwrap();
        assert_eq!(recovered.revision, 0);
        assert!(recovered.ledger.record().is_empty());
        assert!(db.load_checkpoint().await.unwrap().is_none());

        let mut fresh = checkpoint(t(36_000));
        fresh.revision = 1;
        assert!(db.save_checkpoint(&fresh).await.unwrap());
        assert_eq!(db.load_checkpoint().await.unwrap().unwrap().revision, 1);
    }
}
