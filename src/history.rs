use serde::Serialize;

use crate::reconcile::{AttendanceHistory, HistoryEntry};

/// Totals shown alongside the attendance list.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HistorySummary {
    pub employee_name: Option<String>,
    pub total_hours: f64,
    pub average_daily_hours: f64,
    pub days_present: usize,
    pub days: Vec<HistoryEntry>,
}

impl HistorySummary {
    /// `total_time` is stored in minutes. Days with no recorded time do not
    /// count as present.
    pub fn from_history(history: AttendanceHistory) -> Self {
        let total_minutes: f64 = history
            .attendance
            .iter()
            .map(|day| day.total_time.max(0.0))
            .sum();
        let days_present = history
            .attendance
            .iter()
            .filter(|day| day.total_time > 0.0)
            .count();
        let total_hours = total_minutes / 60.0;
        let average_daily_hours = if days_present == 0 {
            0.0
        } else {
            total_hours / days_present as f64
        };

        Self {
            employee_name: history.employee_name,
            total_hours,
            average_daily_hours,
            days_present,
            days: history.attendance,
        }
    }
}
