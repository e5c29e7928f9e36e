use chrono::{DateTime, Utc};

use crate::error::PresenceError;

use super::record::{DailySnapshot, SessionRecord};

/// Sole writer of the day's [`SessionRecord`].
#[derive(Debug, Clone, Default)]
pub struct TimeAccrualLedger {
    record: SessionRecord,
}

impl TimeAccrualLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resumes from a persisted record. Records whose entry/exit arrays do not
    /// pair up are rejected.
    pub fn restore(record: SessionRecord) -> Result<Self, PresenceError> {
        if !record.is_consistent() {
            return Err(PresenceError::InvalidTransition(format!(
                "cannot restore record with {} entries and {} exits",
                record.entry_times.len(),
                record.exit_times.len()
            )));
        }
        Ok(Self { record })
    }

    pub fn record(&self) -> &SessionRecord {
        &self.record
    }

    pub fn accumulated_seconds(&self) -> u64 {
        self.record.accumulated_seconds
    }

    pub fn has_open_entry(&self) -> bool {
        self.record.has_open_entry()
    }

    pub fn on_enter(&mut self, timestamp: DateTime<Utc>) -> Result<(), PresenceError> {
        if self.record.has_open_entry() {
            return Err(PresenceError::InvalidTransition(format!(
                "entry at {timestamp} while entry at {} is still open",
                self.record
                    .entry_times
                    .last()
                    .map(|at| at.to_rfc3339())
                    .unwrap_or_default()
            )));
        }
        self.record.entry_times.push(timestamp);
        Ok(())
    }

    pub fn on_exit(&mut self, timestamp: DateTime<Utc>) -> Result<(), PresenceError> {
        if !self.record.has_open_entry() {
            return Err(PresenceError::InvalidTransition(format!(
                "exit at {timestamp} without an open entry"
            )));
        }
        self.record.exit_times.push(timestamp);
        Ok(())
    }

    /// One elapsed second of presence. Only valid while an entry is open.
    pub fn tick(&mut self) -> Result<(), PresenceError> {
        if !self.record.has_open_entry() {
            return Err(PresenceError::InvalidTransition(
                "accrual tick while absent".into(),
            ));
        }
        self.record.accumulated_seconds = self.record.accumulated_seconds.saturating_add(1);
        Ok(())
    }

    /// Takes the day's record and leaves the ledger empty.
    pub fn flush_and_reset(&mut self) -> DailySnapshot {
        DailySnapshot::from_record(std::mem::take(&mut self.record))
    }
}
