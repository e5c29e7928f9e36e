use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::PresenceError;
use crate::ledger::DailySnapshot;

/// Body of the daily attendance submission.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DailyRecordSubmission {
    /// Sent as the idempotency key, not in the body.
    #[serde(skip)]
    pub flush_id: Uuid,
    pub employee_id: String,
    pub date: NaiveDate,
    #[serde(rename = "total_time")]
    pub total_minutes: u64,
    pub entry_times: Vec<DateTime<Utc>>,
    pub exit_times: Vec<DateTime<Utc>>,
}

impl DailyRecordSubmission {
    pub fn from_snapshot(employee_id: &str, date: NaiveDate, snapshot: DailySnapshot) -> Self {
        Self {
            flush_id: Uuid::new_v4(),
            employee_id: employee_id.to_string(),
            date,
            total_minutes: snapshot.total_minutes,
            entry_times: snapshot.record.entry_times,
            exit_times: snapshot.record.exit_times,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SinkAck {
    pub status: u16,
    pub body: serde_json::Value,
}

/// One day of stored attendance, as served back for display.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoryEntry {
    pub date: String,
    /// Minutes.
    #[serde(default)]
    pub total_time: f64,
    #[serde(default)]
    pub entry_times: Vec<String>,
    #[serde(default)]
    pub exit_times: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AttendanceHistory {
    #[serde(default)]
    pub employee_name: Option<String>,
    pub attendance: Vec<HistoryEntry>,
}

/// Remote attendance store.
#[async_trait]
pub trait RemoteSink: Send + Sync {
    async fn submit_daily_record(
        &self,
        submission: &DailyRecordSubmission,
    ) -> Result<SinkAck, PresenceError>;

    async fn fetch_history(&self, employee_id: &str) -> Result<AttendanceHistory, PresenceError>;
}
