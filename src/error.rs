//! Error types for presence tracking.
//!
//! Sensor and sink failures are recovered where they happen and never stop
//! the tracker loop. `InvalidTransition` is the only variant that points at a
//! logic defect.

use serde::Serialize;
use thiserror::Error;

use crate::presence::SignalKind;

/// Failures reported by a sensor adapter.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SensorError {
    /// The platform refused access (location or radio permission).
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// The radio or location hardware is off or missing.
    #[error("hardware unavailable: {0}")]
    Hardware(String),

    /// A single read failed; the next poll may succeed.
    #[error("read failed: {0}")]
    ReadFailed(String),
}

impl SensorError {
    /// Whether the failure should force the signal false instead of keeping
    /// the last known value.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, SensorError::PermissionDenied(_) | SensorError::Hardware(_))
    }
}

/// Core error type for the presence ledger.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum PresenceError {
    /// A sensor adapter cannot deliver readings at all.
    #[error("{signal} sensor unavailable: {reason}")]
    SensorUnavailable { signal: SignalKind, reason: String },

    /// A ledger mutation that would break the entry/exit pairing.
    #[error("invalid ledger transition: {0}")]
    InvalidTransition(String),

    /// The remote sink rejected the flush or could not be reached.
    #[error("sync failure: {0}")]
    SyncFailure(String),

    /// Configuration failed validation.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl From<reqwest::Error> for PresenceError {
    fn from(err: reqwest::Error) -> Self {
        PresenceError::SyncFailure(err.to_string())
    }
}
