use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::PathBuf,
    sync::{PoisonError, RwLock},
    time::Duration,
};

use crate::error::PresenceError;
use crate::sensing::GeoPoint;

/// Longest accepted beacon freshness window.
pub const MAX_STALENESS_SECONDS: u64 = 86_400;

/// Tuning and identity for one tracked workplace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TrackerConfig {
    pub employee_id: String,
    pub center: GeoPoint,
    pub radius_meters: f64,
    pub beacon_id: String,
    /// A reading counts as "in range" only when strictly above this value.
    pub rssi_threshold: i16,
    pub staleness_seconds: u64,
    pub poll_interval_seconds: u64,
    pub scan_interval_seconds: u64,
    pub sweep_interval_seconds: u64,
    pub flush_hour: u32,
    pub flush_minute: u32,
    pub sink_base_url: String,
    pub request_timeout_seconds: u64,
    /// Ledger checkpoint cadence, in accrual ticks.
    pub heartbeat_every_ticks: u32,
    /// Enables the ledger checkpoint and the pending-flush outbox.
    pub database_path: Option<PathBuf>,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            employee_id: "EMP003".into(),
            center: GeoPoint {
                latitude: 22.44368,
                longitude: 88.415173,
            },
            radius_meters: 1000.0,
            beacon_id: "75:5E:D6:EB:41:84".into(),
            rssi_threshold: -70,
            staleness_seconds: 10,
            poll_interval_seconds: 5,
            scan_interval_seconds: 15,
            sweep_interval_seconds: 5,
            flush_hour: 18,
            flush_minute: 56,
            sink_base_url: "https://idx-backendattendance-1890784-k27k4ovjaq-ue.a.run.app".into(),
            request_timeout_seconds: 30,
            heartbeat_every_ticks: 10,
            database_path: None,
        }
    }
}

impl TrackerConfig {
    pub fn validate(&self) -> Result<(), PresenceError> {
        let invalid = |message: String| Err(PresenceError::Config(message));

        if self.employee_id.trim().is_empty() {
            return invalid("employeeId must not be empty".into());
        }
        if self.beacon_id.trim().is_empty() {
            return invalid("beaconId must not be empty".into());
        }
        if !(self.radius_meters.is_finite() && self.radius_meters > 0.0) {
            return invalid(format!("radiusMeters must be positive, got {}", self.radius_meters));
        }
        if !(-90.0..=90.0).contains(&self.center.latitude)
            || !(-180.0..=180.0).contains(&self.center.longitude)
        {
            return invalid(format!(
                "center ({}, {}) is not a valid coordinate",
                self.center.latitude, self.center.longitude
            ));
        }
        for (name, value) in [
            ("stalenessSeconds", self.staleness_seconds),
            ("pollIntervalSeconds", self.poll_interval_seconds),
            ("scanIntervalSeconds", self.scan_interval_seconds),
            ("sweepIntervalSeconds", self.sweep_interval_seconds),
            ("requestTimeoutSeconds", self.request_timeout_seconds),
        ] {
            if value == 0 {
                return invalid(format!("{name} must be greater than zero"));
            }
        }
        if self.staleness_seconds > MAX_STALENESS_SECONDS {
            return invalid(format!(
                "stalenessSeconds must be at most {MAX_STALENESS_SECONDS}, got {}",
                self.staleness_seconds
            ));
        }
        if self.heartbeat_every_ticks == 0 {
            return invalid("heartbeatEveryTicks must be greater than zero".into());
        }
        if self.flush_hour > 23 {
            return invalid(format!("flushHour must be 0-23, got {}", self.flush_hour));
        }
        if self.flush_minute > 59 {
            return invalid(format!("flushMinute must be 0-59, got {}", self.flush_minute));
        }
        Ok(())
    }

    /// Clamped to [`MAX_STALENESS_SECONDS`] for configs that skipped validation.
    pub fn staleness(&self) -> chrono::Duration {
        let seconds = self.staleness_seconds.min(MAX_STALENESS_SECONDS);
        i64::try_from(seconds)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .unwrap_or_else(chrono::Duration::zero)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds)
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_seconds)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    /// Checkpoint on every tick when `PRESENCE_LEDGER_DEBUG` is set.
    pub fn effective_heartbeat_ticks(&self) -> u32 {
        let debug_mode = std::env::var("PRESENCE_LEDGER_DEBUG")
            .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        if debug_mode {
            1
        } else {
            self.heartbeat_every_ticks
        }
    }
}

/// JSON-file backed configuration.
pub struct ConfigStore {
    path: PathBuf,
    data: RwLock<TrackerConfig>,
}

impl ConfigStore {
    /// Loads `path`, falling back to defaults when the file does not exist.
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            read_config(&path)?
        } else {
            TrackerConfig::default()
        };
        data.validate()
            .with_context(|| format!("Invalid configuration in {}", path.display()))?;

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn config(&self) -> TrackerConfig {
        self.data
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn update(&self, config: TrackerConfig) -> Result<()> {
        config.validate()?;
        let mut guard = self.data.write().unwrap_or_else(PoisonError::into_inner);
        self.persist(&config)?;
        *guard = config;
        Ok(())
    }

    pub fn reload(&self) -> Result<()> {
        let data = read_config(&self.path)?;
        data.validate()?;
        let mut guard = self.data.write().unwrap_or_else(PoisonError::into_inner);
        *guard = data;
        Ok(())
    }

    fn persist(&self, data: &TrackerConfig) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create config directory {}", parent.display())
                })?;
            }
        }
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write config to {}", self.path.display()))
    }
}

fn read_config(path: &PathBuf) -> Result<TrackerConfig> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config from {}", path.display()))?;
    serde_json::from_str(&contents)
        .with_context(|| format!("Failed to parse config from {}", path.display()))
}
