use std::sync::Arc;

use anyhow::{bail, Context, Result};
use log::info;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::clock::Clock;
use crate::config::TrackerConfig;

use super::beacons::{BeaconTable, SeenDevice};
use super::geo::Geofence;
use super::loop_worker::{geofence_loop, proximity_loop, ProximitySettings};
use super::providers::{BeaconScanner, LocationProvider};
use super::SignalReport;

/// Platform sources the adapters poll.
#[derive(Clone)]
pub struct SensorProviders {
    pub location: Arc<dyn LocationProvider>,
    pub scanner: Arc<dyn BeaconScanner>,
}

/// Owns the geofence and proximity adapter tasks.
pub struct SensingController {
    handles: Vec<JoinHandle<()>>,
    cancel_token: Option<CancellationToken>,
    beacons: Arc<Mutex<BeaconTable>>,
}

impl SensingController {
    pub fn new() -> Self {
        Self {
            handles: Vec::new(),
            cancel_token: None,
            beacons: Arc::new(Mutex::new(BeaconTable::new())),
        }
    }

    pub fn is_running(&self) -> bool {
        self.cancel_token.is_some()
    }

    pub async fn start_sensing(
        &mut self,
        config: &TrackerConfig,
        providers: SensorProviders,
        clock: Arc<dyn Clock>,
        reports: mpsc::Sender<SignalReport>,
    ) -> Result<()> {
        if self.is_running() {
            bail!("sensing already active");
        }

        info!(
            "Starting sensor adapters (poll {}s, scan {}s, beacon {})",
            config.poll_interval_seconds, config.scan_interval_seconds, config.beacon_id
        );

        // A fresh table so readings from an earlier run cannot look current.
        *self.beacons.lock().await = BeaconTable::new();

        let cancel_token = CancellationToken::new();

        let fence = Geofence {
            center: config.center,
            radius_meters: config.radius_meters,
        };
        self.handles.push(tokio::spawn(geofence_loop(
            providers.location,
            fence,
            config.poll_interval(),
            reports.clone(),
            cancel_token.clone(),
        )));

        let settings = ProximitySettings {
            target_id: config.beacon_id.clone(),
            staleness: config.staleness(),
            scan_interval: config.scan_interval(),
            sweep_interval: config.sweep_interval(),
        };
        self.handles.push(tokio::spawn(proximity_loop(
            providers.scanner,
            self.beacons.clone(),
            settings,
            clock,
            reports,
            cancel_token.clone(),
        )));

        self.cancel_token = Some(cancel_token);
        Ok(())
    }

    /// Devices heard within the staleness window, strongest first.
    pub async fn nearby_devices(&self) -> Vec<SeenDevice> {
        self.beacons.lock().await.nearby()
    }

    pub async fn stop_sensing(&mut self) -> Result<()> {
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }

        for handle in self.handles.drain(..) {
            handle
                .await
                .context("sensor adapter task failed to join")?;
        }
        Ok(())
    }
}

impl Default for SensingController {
    fn default() -> Self {
        Self::new()
    }
}
