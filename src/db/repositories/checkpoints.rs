use anyhow::Result;
use rusqlite::{params, Row};

use crate::db::{
    connection::Database,
    helpers::{parse_datetime, timestamps_from_json, timestamps_to_json, to_i64, to_u64},
    models::LedgerCheckpoint,
};
use crate::ledger::SessionRecord;

fn row_to_checkpoint(row: &Row) -> Result<LedgerCheckpoint> {
    let revision: i64 = row.get("revision")?;
    let flush_due_at: String = row.get("flush_due_at")?;
    let entry_times: String = row.get("entry_times")?;
    let exit_times: String = row.get("exit_times")?;
    let accumulated_seconds: i64 = row.get("accumulated_seconds")?;
    let updated_at: String = row.get("updated_at")?;

    Ok(LedgerCheckpoint {
        revision: to_u64(revision, "revision")?,
        flush_due_at: parse_datetime(&flush_due_at, "flush_due_at")?,
        record: SessionRecord {
            entry_times: timestamps_from_json(&entry_times, "entry_times")?,
            exit_times: timestamps_from_json(&exit_times, "exit_times")?,
            accumulated_seconds: to_u64(accumulated_seconds, "accumulated_seconds")?,
        },
        updated_at: parse_datetime(&updated_at, "updated_at")?,
    })
}

impl Database {
    /// Upserts the checkpoint unless a newer revision is already stored.
    /// Returns `false` when the write was dropped for that reason.
    pub async fn save_checkpoint(&self, checkpoint: &LedgerCheckpoint) -> Result<bool> {
        let checkpoint = checkpoint.clone();
        self.execute(move |conn| {
            let changed = conn.execute(
                "INSERT INTO ledger_checkpoint (id, revision, flush_due_at, entry_times, exit_times, accumulated_seconds, updated_at)
                 VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(id) DO UPDATE SET
                     revision = excluded.revision,
                     flush_due_at = excluded.flush_due_at,
                     entry_times = excluded.entry_times,
                     exit_times = excluded.exit_times,
                     accumulated_seconds = excluded.accumulated_seconds,
                     updated_at = excluded.updated_at
                 WHERE excluded.revision >= ledger_checkpoint.revision",
                params![
                    to_i64(checkpoint.revision)?,
                    checkpoint.flush_due_at.to_rfc3339(),
                    timestamps_to_json(&checkpoint.record.entry_times)?,
                    timestamps_to_json(&checkpoint.record.exit_times)?,
                    to_i64(checkpoint.record.accumulated_seconds)?,
                    checkpoint.updated_at.to_rfc3339(),
                ],
            )?;
            Ok(changed > 0)
        })
        .await
    }

    pub async fn load_checkpoint(&self) -> Result<Option<LedgerCheckpoint>> {
        self.execute(|conn| {
            let mut stmt = conn.prepare(
                "SELECT revision, flush_due_at, entry_times, exit_times, accumulated_seconds, updated_at
                 FROM ledger_checkpoint
                 WHERE id = 1",
            )?;
            let mut rows = stmt.query([])?;
            let checkpoint = match rows.next()? {
                Some(row) => Some(row_to_checkpoint(row)?),
                None => None,
            };
            Ok(checkpoint)
        })
        .await
    }

    pub async fn clear_checkpoint(&self) -> Result<()> {
        self.execute(|conn| {
            conn.execute("DELETE FROM ledger_checkpoint", [])?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    fn checkpoint(revision: u64, seconds: u64) -> LedgerCheckpoint {
        let at = Utc.with_ymd_and_hms(2026, 10, 18, 9, 0, 0).unwrap();
        LedgerCheckpoint {
            revision,
            flush_due_at: Utc.with_ymd_and_hms(2026, 10, 18, 13, 26, 0).unwrap(),
            record: SessionRecord {
                entry_times: vec![at],
                exit_times: vec![],
                accumulated_seconds: seconds,
            },
            updated_at: at,
        }
    }

    #[tokio::test]
    async fn save_load_and_clear() {
        let dir = TempDir::new().unwrap();
        let db = Database::new(dir.path().join("ledger.sqlite3")).unwrap();

        assert!(db.load_checkpoint().await.unwrap().is_none());

        let saved = checkpoint(1, 42);
        db.save_checkpoint(&saved).await.unwrap();
        assert_eq!(db.load_checkpoint().await.unwrap(), Some(saved));

        db.clear_checkpoint().await.unwrap();
        assert!(db.load_checkpoint().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn older_revision_does_not_overwrite() {
        let dir = TempDir::new().unwrap();
        let db = Database::new(dir.path().join("ledger.sqlite3")).unwrap();

        assert!(db.save_checkpoint(&checkpoint(5, 100)).await.unwrap());
        assert!(!db.save_checkpoint(&checkpoint(4, 90)).await.unwrap());
        let loaded = db.load_checkpoint().await.unwrap().unwrap();
        assert_eq!(loaded.revision, 5);
        assert_eq!(loaded.record.accumulated_seconds, 100);

        assert!(db.save_checkpoint(&checkpoint(6, 110)).await.unwrap());
        let loaded = db.load_checkpoint().await.unwrap().unwrap();
        assert_eq!(loaded.record.accumulated_seconds, 110);
    }
}
