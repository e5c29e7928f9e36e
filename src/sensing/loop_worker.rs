use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio::time::{Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::clock::Clock;
use crate::error::SensorError;
use crate::presence::{ProximityReading, SignalKind, SignalUpdate};

use super::beacons::BeaconTable;
use super::geo::Geofence;
use super::providers::{BeaconScanner, LocationProvider};
use super::SignalReport;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

const PROVIDER_TIMEOUT_SECS: u64 = 10;

/// Polls the location provider and reports geofence containment.
pub async fn geofence_loop(
    provider: Arc<dyn LocationProvider>,
    fence: Geofence,
    poll_interval: Duration,
    reports: mpsc::Sender<SignalReport>,
    cancel_token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let fut = provider.current_position();
                let report = match tokio::time::timeout(Duration::from_secs(PROVIDER_TIMEOUT_SECS), fut).await {
                    Ok(Ok(point)) => {
                        let inside = fence.contains(point);
                        log_debug!("geofence poll at ({:.5}, {:.5}): inside={inside}", point.latitude, point.longitude);
                        SignalReport::Observed(SignalUpdate::Geofence { inside })
                    }
                    Ok(Err(err)) => {
                        log_warn!("location read failed: {err}");
                        SignalReport::Failed { kind: SignalKind::Geofence, error: err }
                    }
                    Err(_) => {
                        log_warn!("location read timeout (> {}s)", PROVIDER_TIMEOUT_SECS);
                        SignalReport::Failed {
                            kind: SignalKind::Geofence,
                            error: SensorError::ReadFailed("location read timed out".into()),
                        }
                    }
                };

                if reports.send(report).await.is_err() {
                    log_info!("geofence loop: tracker stopped listening");
                    break;
                }
            }
            _ = cancel_token.cancelled() => {
                log_info!("geofence loop shutting down");
                break;
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProximitySettings {
    pub target_id: String,
    pub staleness: chrono::Duration,
    pub scan_interval: Duration,
    pub sweep_interval: Duration,
}

/// Scans for advertisements, keeps the nearby-device table, and forwards
/// every sighting of the target beacon with its observation time.
pub async fn proximity_loop(
    scanner: Arc<dyn BeaconScanner>,
    table: Arc<Mutex<BeaconTable>>,
    settings: ProximitySettings,
    clock: Arc<dyn Clock>,
    reports: mpsc::Sender<SignalReport>,
    cancel_token: CancellationToken,
) {
    let mut scan_ticker = tokio::time::interval(settings.scan_interval);
    scan_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut sweep_ticker = tokio::time::interval(settings.sweep_interval);
    sweep_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = scan_ticker.tick() => {
                let fut = scanner.scan();
                let report = match tokio::time::timeout(Duration::from_secs(PROVIDER_TIMEOUT_SECS), fut).await {
                    Ok(Ok(advertisements)) => {
                        let observed_at = clock.now();
                        let mut guard = table.lock().await;
                        for advertisement in &advertisements {
                            guard.record(advertisement, observed_at);
                        }
                        drop(guard);

                        advertisements
                            .iter()
                            .filter(|adv| adv.id.eq_ignore_ascii_case(&settings.target_id))
                            .map(|adv| adv.signal_strength)
                            .max()
                            .map(|signal_strength| {
                                log_debug!("target beacon heard at {signal_strength} dBm");
                                SignalReport::Observed(SignalUpdate::Proximity(ProximityReading {
                                    signal_strength,
                                    observed_at,
                                }))
                            })
                    }
                    Ok(Err(err)) => {
                        log_warn!("beacon scan failed: {err}");
                        Some(SignalReport::Failed { kind: SignalKind::Proximity, error: err })
                    }
                    Err(_) => {
                        log_warn!("beacon scan timeout (> {}s)", PROVIDER_TIMEOUT_SECS);
                        Some(SignalReport::Failed {
                            kind: SignalKind::Proximity,
                            error: SensorError::ReadFailed("scan timed out".into()),
                        })
                    }
                };

                if let Some(report) = report {
                    if reports.send(report).await.is_err() {
                        log_info!("proximity loop: tracker stopped listening");
                        break;
                    }
                }
            }
            _ = sweep_ticker.tick() => {
                let removed = table.lock().await.sweep(clock.now(), settings.staleness);
                if removed > 0 {
                    log_debug!("expired {removed} stale device(s)");
                }
            }
            _ = cancel_token.cancelled() => {
                log_info!("proximity loop shutting down");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TokioClock;
    use crate::sensing::geo::GeoPoint;
    use crate::sensing::providers::Advertisement;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};

    struct FixedLocation(Result<GeoPoint, SensorError>);

    #[async_trait]
    impl LocationProvider for FixedLocation {
        async fn current_position(&self) -> Result<GeoPoint, SensorError> {
            self.0.clone()
        }
    }

    struct FixedScan(Vec<Advertisement>);

    #[async_trait]
    impl BeaconScanner for FixedScan {
        async fn scan(&self) -> Result<Vec<Advertisement>, SensorError> {
            Ok(self.0.clone())
        }
    }

    const CENTER: GeoPoint = GeoPoint {
        latitude: 22.44368,
        longitude: 88.415173,
    };

    #[tokio::test(start_paused = true)]
    async fn geofence_loop_reports_inside() {
        let (tx, mut rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let fence = Geofence {
            center: CENTER,
            radius_meters: 1000.0,
        };
        let handle = tokio::spawn(geofence_loop(
            Arc::new(FixedLocation(Ok(CENTER))),
            fence,
            Duration::from_secs(5),
            tx,
            cancel.clone(),
        ));

        let report = rx.recv().await.unwrap();
        assert_eq!(
            report,
            SignalReport::Observed(SignalUpdate::Geofence { inside: true })
        );

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn geofence_loop_forwards_provider_errors() {
        let (tx, mut rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let denied = SensorError::PermissionDenied("location".into());
        let handle = tokio::spawn(geofence_loop(
            Arc::new(FixedLocation(Err(denied.clone()))),
            Geofence {
                center: CENTER,
                radius_meters: 1000.0,
            },
            Duration::from_secs(5),
            tx,
            cancel.clone(),
        ));

        assert_eq!(
            rx.recv().await.unwrap(),
            SignalReport::Failed {
                kind: SignalKind::Geofence,
                error: denied
            }
        );
        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn proximity_loop_forwards_target_and_fills_table() {
        let (tx, mut rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let table = Arc::new(Mutex::new(BeaconTable::new()));
        let base = Utc.with_ymd_and_hms(2026, 10, 18, 9, 0, 0).unwrap();
        let scanner = FixedScan(vec![
            Advertisement {
                id: "75:5e:d6:eb:41:84".into(),
                name: Some("door".into()),
                signal_strength: -62,
            },
            Advertisement {
                id: "11:22:33:44:55:66".into(),
                name: None,
                signal_strength: -40,
            },
        ]);

        let handle = tokio::spawn(proximity_loop(
            Arc::new(scanner),
            table.clone(),
            ProximitySettings {
                target_id: "75:5E:D6:EB:41:84".into(),
                staleness: chrono::Duration::seconds(10),
                scan_interval: Duration::from_secs(15),
                sweep_interval: Duration::from_secs(5),
            },
            Arc::new(TokioClock::starting_at(base)),
            tx,
            cancel.clone(),
        ));

        match rx.recv().await.unwrap() {
            SignalReport::Observed(SignalUpdate::Proximity(reading)) => {
                assert_eq!(reading.signal_strength, -62);
                assert_eq!(reading.observed_at, base);
            }
            other => panic!("unexpected report {other:?}"),
        }
        assert_eq!(table.lock().await.len(), 2);

        cancel.cancel();
        handle.await.unwrap();
    }
}
