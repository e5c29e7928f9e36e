use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ledger::SessionRecord;

/// Persisted copy of the in-progress day, written on transitions and every
/// few accrual ticks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LedgerCheckpoint {
    /// Monotonic per process; an older revision never overwrites a newer one.
    pub revision: u64,
    /// Flush instant the record is waiting for.
    pub flush_due_at: DateTime<Utc>,
    pub record: SessionRecord,
    pub updated_at: DateTime<Utc>,
}
