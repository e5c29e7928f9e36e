use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use crate::presence::{AbsenceReason, PresenceState, SignalKind};

/// Broadcast to display components. Receivers that lag simply miss events;
/// `TrackerController::snapshot` is the source of truth.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum TrackerEvent {
    #[serde(rename_all = "camelCase")]
    StateChanged {
        state: PresenceState,
        at: DateTime<Utc>,
        accumulated_seconds: u64,
        reason: Option<AbsenceReason>,
    },
    #[serde(rename_all = "camelCase")]
    Heartbeat {
        state: PresenceState,
        accumulated_seconds: u64,
        display: String,
    },
    /// Raised once per signal until that signal recovers.
    #[serde(rename_all = "camelCase")]
    Notice { signal: SignalKind, message: String },
    #[serde(rename_all = "camelCase")]
    FlushCompleted {
        date: NaiveDate,
        total_minutes: u64,
        resubmitted: usize,
    },
    #[serde(rename_all = "camelCase")]
    FlushFailed {
        date: NaiveDate,
        error: String,
        queued: bool,
    },
}
