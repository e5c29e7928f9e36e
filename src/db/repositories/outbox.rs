use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Row};
use uuid::Uuid;

use crate::db::{
    connection::Database,
    helpers::{parse_datetime, to_u64},
    models::PendingFlush,
};
use crate::reconcile::DailyRecordSubmission;

fn row_to_pending(row: &Row) -> Result<PendingFlush> {
    let id: String = row.get("id")?;
    let payload: String = row.get("payload")?;
    let attempts: i64 = row.get("attempts")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;

    let mut submission: DailyRecordSubmission =
        serde_json::from_str(&payload).context("failed to parse pending flush payload")?;
    submission.flush_id =
        Uuid::parse_str(&id).with_context(|| format!("invalid pending flush id '{id}'"))?;

    Ok(PendingFlush {
        submission,
        attempts: u32::try_from(to_u64(attempts, "attempts")?).unwrap_or(u32::MAX),
        last_error: row.get("last_error")?,
        created_at: parse_datetime(&created_at, "created_at")?,
        updated_at: parse_datetime(&updated_at, "updated_at")?,
    })
}

impl Database {
    /// Stores a record whose submission failed. Re-inserting the same flush id
    /// only refreshes the error.
    pub async fn insert_pending_flush(&self, pending: &PendingFlush) -> Result<()> {
        let pending = pending.clone();
        self.execute(move |conn| {
            let payload = serde_json::to_string(&pending.submission)
                .context("failed to encode pending flush payload")?;
            conn.execute(
                "INSERT INTO pending_flushes (id, employee_id, date, payload, attempts, last_error, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(id) DO UPDATE SET
                     last_error = excluded.last_error,
                     updated_at = excluded.updated_at",
                params![
                    pending.submission.flush_id.to_string(),
                    pending.submission.employee_id,
                    pending.submission.date.to_string(),
                    payload,
                    i64::from(pending.attempts),
                    pending.last_error,
                    pending.created_at.to_rfc3339(),
                    pending.updated_at.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
        .await
    }

    /// Oldest first.
    pub async fn list_pending_flushes(&self) -> Result<Vec<PendingFlush>> {
        self.execute(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, payload, attempts, last_error, created_at, updated_at
                 FROM pending_flushes
                 ORDER BY created_at ASC, id ASC",
            )?;
            let mut rows = stmt.query([])?;
            let mut pending = Vec::new();
            while let Some(row) = rows.next()? {
                pending.push(row_to_pending(row)?);
            }
            Ok(pending)
        })
        .await
    }

    pub async fn record_pending_failure(
        &self,
        flush_id: Uuid,
        error: &str,
        failed_at: DateTime<Utc>,
    ) -> Result<()> {
        let error = error.to_string();
        self.execute(move |conn| {
            conn.execute(
                "UPDATE pending_flushes
                 SET attempts = attempts + 1,
                     last_error = ?1,
                     updated_at = ?2
                 WHERE id = ?3",
                params![error, failed_at.to_rfc3339(), flush_id.to_string()],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn remove_pending_flush(&self, flush_id: Uuid) -> Result<()> {
        self.execute(move |conn| {
            conn.execute(
                "DELETE FROM pending_flushes WHERE id = ?1",
                params![flush_id.to_string()],
            )?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone};
    use tempfile::TempDir;

    fn pending(day: u32, created_min: u32) -> PendingFlush {
        let created_at = Utc.with_ymd_and_hms(2026, 10, day, 13, created_min, 0).unwrap();
        PendingFlush {
            submission: DailyRecordSubmission {
                flush_id: Uuid::new_v4(),
                employee_id: "EMP003".into(),
                date: NaiveDate::from_ymd_opt(2026, 10, day).unwrap(),
                total_minutes: 480,
                entry_times: vec![Utc.with_ymd_and_hms(2026, 10, day, 3, 30, 0).unwrap()],
                exit_times: vec![Utc.with_ymd_and_hms(2026, 10, day, 11, 30, 0).unwrap()],
            },
            attempts: 1,
            last_error: Some("sync failure: 503".into()),
            created_at,
            updated_at: created_at,
        }
    }

    #[tokio::test]
    async fn pending_flushes_round_trip_oldest_first() {
        let dir = TempDir::new().unwrap();
        let db = Database::new(dir.path().join("ledger.sqlite3")).unwrap();

        let later = pending(17, 30);
        let earlier = pending(16, 30);
        db.insert_pending_flush(&later).await.unwrap();
        db.insert_pending_flush(&earlier).await.unwrap();

        let listed = db.list_pending_flushes().await.unwrap();
        assert_eq!(listed, vec![earlier.clone(), later.clone()]);

        db.remove_pending_flush(earlier.submission.flush_id).await.unwrap();
        let listed = db.list_pending_flushes().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].submission.flush_id, later.submission.flush_id);
    }

    #[tokio::test]
    async fn failure_bumps_attempts() {
        let dir = TempDir::new().unwrap();
        let db = Database::new(dir.path().join("ledger.sqlite3")).unwrap();
        let item = pending(16, 0);
        db.insert_pending_flush(&item).await.unwrap();

        let failed_at = Utc.with_ymd_and_hms(2026, 10, 17, 13, 26, 0).unwrap();
        db.record_pending_failure(item.submission.flush_id, "timeout", failed_at)
            .await
            .unwrap();

        let listed = db.list_pending_flushes().await.unwrap();
        assert_eq!(listed[0].attempts, 2);
        assert_eq!(listed[0].last_error.as_deref(), Some("timeout"));
        assert_eq!(listed[0].updated_at, failed_at);
    }
}
