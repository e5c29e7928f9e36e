use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum SignalKind {
    Geofence,
    Proximity,
    Identity,
}

impl SignalKind {
    pub const ALL: [SignalKind; 3] = [
        SignalKind::Geofence,
        SignalKind::Proximity,
        SignalKind::Identity,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SignalKind::Geofence => "geofence",
            SignalKind::Proximity => "proximity",
            SignalKind::Identity => "identity",
        }
    }
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Latest sighting of the configured beacon.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProximityReading {
    pub signal_strength: i16,
    pub observed_at: DateTime<Utc>,
}

/// One observation from a sensor adapter.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "signal", rename_all = "camelCase")]
pub enum SignalUpdate {
    Geofence { inside: bool },
    Proximity(ProximityReading),
    Identity { verified: bool },
    /// The adapter lost access to its sensor; the signal reads false until
    /// a fresh observation arrives.
    Unavailable { kind: SignalKind },
}

impl SignalUpdate {
    pub fn kind(&self) -> SignalKind {
        match self {
            SignalUpdate::Geofence { .. } => SignalKind::Geofence,
            SignalUpdate::Proximity(_) => SignalKind::Proximity,
            SignalUpdate::Identity { .. } => SignalKind::Identity,
            SignalUpdate::Unavailable { kind } => *kind,
        }
    }
}

/// Most recent observed value of each signal.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SignalBoard {
    pub geofence: bool,
    pub proximity: Option<ProximityReading>,
    pub identity: bool,
}

impl SignalBoard {
    /// Applies `update` in stream order. A proximity reading older than the
    /// one already held is dropped.
    pub fn apply(&mut self, update: SignalUpdate) -> bool {
        match update {
            SignalUpdate::Geofence { inside } => self.geofence = inside,
            SignalUpdate::Proximity(reading) => {
                if let Some(current) = self.proximity {
                    if reading.observed_at < current.observed_at {
                        return false;
                    }
                }
                self.proximity = Some(reading);
            }
            SignalUpdate::Identity { verified } => self.identity = verified,
            SignalUpdate::Unavailable { kind } => match kind {
                SignalKind::Geofence => self.geofence = false,
                SignalKind::Proximity => self.proximity = None,
                SignalKind::Identity => self.identity = false,
            },
        }
        true
    }
}
