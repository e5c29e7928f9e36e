//! Line-delimited JSON bridge from a platform helper process.
//!
//! Each stdin line is one message:
//! ```text
//! {"type":"location","latitude":22.4437,"longitude":88.4152}
//! {"type":"scan","devices":[{"id":"75:5E:D6:EB:41:84","signalStrength":-61}]}
//! {"type":"identity","verified":true}
//! {"type":"sensorError","signal":"proximity","error":"hardware","message":"bluetooth off"}
//! ```
//! Location and scan messages feed the adapter loops, which keep their own
//! cadence; identity results and identity errors go straight to the tracker.

use std::sync::{Mutex, PoisonError};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::SensorError;
use crate::presence::{SignalKind, SignalUpdate};
use crate::sensing::{Advertisement, BeaconScanner, GeoPoint, LocationProvider, SignalReport};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BridgeErrorKind {
    PermissionDenied,
    Hardware,
    ReadFailed,
}

impl BridgeErrorKind {
    fn into_sensor_error(self, message: String) -> SensorError {
        match self {
            BridgeErrorKind::PermissionDenied => SensorError::PermissionDenied(message),
            BridgeErrorKind::Hardware => SensorError::Hardware(message),
            BridgeErrorKind::ReadFailed => SensorError::ReadFailed(message),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum BridgeMessage {
    Location { latitude: f64, longitude: f64 },
    Scan { devices: Vec<Advertisement> },
    Identity { verified: bool },
    #[serde(rename_all = "camelCase")]
    SensorError {
        signal: SignalKind,
        error: BridgeErrorKind,
        #[serde(default)]
        message: String,
    },
}

/// Latest position pushed by the helper.
#[derive(Default)]
pub struct BridgeLocation {
    latest: Mutex<Option<Result<GeoPoint, SensorError>>>,
}

impl BridgeLocation {
    fn push(&self, value: Result<GeoPoint, SensorError>) {
        *self.latest.lock().unwrap_or_else(PoisonError::into_inner) = Some(value);
    }
}

#[async_trait]
impl LocationProvider for BridgeLocation {
    async fn current_position(&self) -> Result<GeoPoint, SensorError> {
        self.latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .unwrap_or_else(|| Err(SensorError::ReadFailed("no location fix yet".into())))
    }
}

/// Advertisements pushed since the last scan.
#[derive(Default)]
pub struct BridgeScanner {
    heard: Mutex<Vec<Advertisement>>,
    failure: Mutex<Option<SensorError>>,
}

impl BridgeScanner {
    fn push(&self, devices: Vec<Advertisement>) {
        *self.failure.lock().unwrap_or_else(PoisonError::into_inner) = None;
        self.heard
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(devices);
    }

    fn fail(&self, error: SensorError) {
        *self.failure.lock().unwrap_or_else(PoisonError::into_inner) = Some(error);
    }
}

#[async_trait]
impl BeaconScanner for BridgeScanner {
    async fn scan(&self) -> Result<Vec<Advertisement>, SensorError> {
        if let Some(error) = self.failure.lock().unwrap_or_else(PoisonError::into_inner).take() {
            return Err(error);
        }
        Ok(std::mem::take(
            &mut *self.heard.lock().unwrap_or_else(PoisonError::into_inner),
        ))
    }
}

pub struct Bridge<'a> {
    pub location: &'a BridgeLocation,
    pub scanner: &'a BridgeScanner,
    pub tracker: mpsc::Sender<SignalReport>,
}

impl Bridge<'_> {
    async fn dispatch(&self, message: BridgeMessage) -> Result<()> {
        match message {
            BridgeMessage::Location {
                latitude,
                longitude,
            } => self.location.push(Ok(GeoPoint {
                latitude,
                longitude,
            })),
            BridgeMessage::Scan { devices } => self.scanner.push(devices),
            BridgeMessage::Identity { verified } => {
                self.tracker
                    .send(SignalReport::Observed(SignalUpdate::Identity { verified }))
                    .await
                    .context("tracker stopped")?;
            }
            BridgeMessage::SensorError {
                signal,
                error,
                message,
            } => {
                let error = error.into_sensor_error(message);
                match signal {
                    SignalKind::Geofence => self.location.push(Err(error)),
                    SignalKind::Proximity => self.scanner.fail(error),
                    SignalKind::Identity => {
                        self.tracker
                            .send(SignalReport::Failed {
                                kind: SignalKind::Identity,
                                error,
                            })
                            .await
                            .context("tracker stopped")?;
                    }
                }
            }
        }
        Ok(())
    }
}

/// Reads messages until EOF or cancellation. Malformed lines are skipped.
/// Returns the number of messages applied.
pub async fn run_bridge<R>(reader: R, bridge: Bridge<'_>, cancel_token: CancellationToken) -> Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut applied = 0;

    loop {
        let line = tokio::select! {
            _ = cancel_token.cancelled() => break,
            line = lines.next_line() => line.context("failed to read bridge input")?,
        };
        let Some(line) = line else {
            log_info!("bridge input closed after {applied} message(s)");
            break;
        };
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        match serde_json::from_str::<BridgeMessage>(trimmed) {
            Ok(message) => {
                log_debug!("bridge message: {message:?}");
                bridge.dispatch(message).await?;
                applied += 1;
            }
            Err(err) => log_warn!("skipping malformed bridge line: {err}"),
        }
    }
    Ok(applied)
}
