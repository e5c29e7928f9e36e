pub mod beacons;
pub mod controller;
pub mod geo;
pub mod loop_worker;
pub mod providers;

pub use beacons::SeenDevice;
pub use controller::{SensingController, SensorProviders};
pub use geo::{GeoPoint, Geofence};
pub use providers::{Advertisement, BeaconScanner, LocationProvider};

use crate::error::SensorError;
use crate::presence::{SignalKind, SignalUpdate};

/// What an adapter hands to the tracker loop.
#[derive(Debug, Clone, PartialEq)]
pub enum SignalReport {
    Observed(SignalUpdate),
    Failed { kind: SignalKind, error: SensorError },
}
