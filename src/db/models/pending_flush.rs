use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::reconcile::DailyRecordSubmission;

/// A daily record the sink has not acknowledged yet.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PendingFlush {
    pub submission: DailyRecordSubmission,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
