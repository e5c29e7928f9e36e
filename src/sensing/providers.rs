use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::SensorError;

use super::geo::GeoPoint;

/// Platform location source, polled by the geofence loop.
#[async_trait]
pub trait LocationProvider: Send + Sync {
    async fn current_position(&self) -> Result<GeoPoint, SensorError>;
}

/// One advertisement heard during a radio scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Advertisement {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub signal_strength: i16,
}

/// Platform radio scanner. Each call returns what was heard since the last one.
#[async_trait]
pub trait BeaconScanner: Send + Sync {
    async fn scan(&self) -> Result<Vec<Advertisement>, SensorError>;
}
