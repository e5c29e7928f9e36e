use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One attendance day. `entry_times[i]` pairs with `exit_times[i]`; at most
/// the last entry is unmatched.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub entry_times: Vec<DateTime<Utc>>,
    pub exit_times: Vec<DateTime<Utc>>,
    pub accumulated_seconds: u64,
}

/// An entry with its matching exit, or `None` while ongoing.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Interval {
    pub entry: DateTime<Utc>,
    pub exit: Option<DateTime<Utc>>,
}

impl SessionRecord {
    pub fn has_open_entry(&self) -> bool {
        self.entry_times.len() == self.exit_times.len() + 1
    }

    pub fn is_empty(&self) -> bool {
        self.entry_times.is_empty() && self.exit_times.is_empty() && self.accumulated_seconds == 0
    }

    /// `len(exit) <= len(entry) <= len(exit) + 1`.
    pub fn is_consistent(&self) -> bool {
        let entries = self.entry_times.len();
        let exits = self.exit_times.len();
        exits <= entries && entries <= exits + 1
    }

    pub fn intervals(&self) -> Vec<Interval> {
        self.entry_times
            .iter()
            .enumerate()
            .map(|(index, entry)| Interval {
                entry: *entry,
                exit: self.exit_times.get(index).copied(),
            })
            .collect()
    }
}

/// Immutable copy of a day's record handed to the reconciliation path.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DailySnapshot {
    pub record: SessionRecord,
    pub total_minutes: u64,
}

impl DailySnapshot {
    pub fn from_record(record: SessionRecord) -> Self {
        let total_minutes = record.accumulated_seconds / 60;
        Self {
            record,
            total_minutes,
        }
    }
}
