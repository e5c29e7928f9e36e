use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum PresenceState {
    #[default]
    Absent,
    Present,
}

impl PresenceState {
    pub fn is_present(self) -> bool {
        self == PresenceState::Present
    }
}

/// Emitted exactly once per change of the derived state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Transition {
    Entered { at: DateTime<Utc> },
    Exited { at: DateTime<Utc> },
}

impl Transition {
    pub fn at(&self) -> DateTime<Utc> {
        match self {
            Transition::Entered { at } | Transition::Exited { at } => *at,
        }
    }

    pub fn resulting_state(&self) -> PresenceState {
        match self {
            Transition::Entered { .. } => PresenceState::Present,
            Transition::Exited { .. } => PresenceState::Absent,
        }
    }
}

/// First failing condition, in the order the status line reports them.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum AbsenceReason {
    OutsideGeofence,
    OutOfBeaconRange,
    IdentityNotVerified,
}

impl AbsenceReason {
    pub fn message(self) -> &'static str {
        match self {
            AbsenceReason::OutsideGeofence => "Outside geofence.",
            AbsenceReason::OutOfBeaconRange => "Outside beacon range.",
            AbsenceReason::IdentityNotVerified => "Identity not verified.",
        }
    }
}
