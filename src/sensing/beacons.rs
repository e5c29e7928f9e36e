use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use super::providers::Advertisement;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeenDevice {
    pub id: String,
    pub name: Option<String>,
    pub signal_strength: i16,
    pub last_seen: DateTime<Utc>,
}

/// Devices heard recently, keyed by radio address.
#[derive(Debug, Default)]
pub struct BeaconTable {
    devices: HashMap<String, SeenDevice>,
}

impl BeaconTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upserts the device with its latest strength and sighting time.
    pub fn record(&mut self, advertisement: &Advertisement, seen_at: DateTime<Utc>) {
        let entry = self
            .devices
            .entry(advertisement.id.clone())
            .or_insert_with(|| SeenDevice {
                id: advertisement.id.clone(),
                name: advertisement.name.clone(),
                signal_strength: advertisement.signal_strength,
                last_seen: seen_at,
            });
        entry.signal_strength = advertisement.signal_strength;
        entry.last_seen = seen_at;
        if advertisement.name.is_some() {
            entry.name = advertisement.name.clone();
        }
    }

    /// Drops devices unseen for longer than `staleness`. Returns how many went.
    pub fn sweep(&mut self, now: DateTime<Utc>, staleness: Duration) -> usize {
        let before = self.devices.len();
        self.devices
            .retain(|_, device| now - device.last_seen <= staleness);
        before - self.devices.len()
    }

    #[cfg(test)]
    pub fn get(&self, id: &str) -> Option<&SeenDevice> {
        self.devices.get(id)
    }

    /// Strongest first.
    pub fn nearby(&self) -> Vec<SeenDevice> {
        let mut devices: Vec<SeenDevice> = self.devices.values().cloned().collect();
        devices.sort_by(|a, b| {
            b.signal_strength
                .cmp(&a.signal_strength)
                .then_with(|| a.id.cmp(&b.id))
        });
        devices
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 18, 9, 0, 0).unwrap() + Duration::seconds(secs)
    }

    fn adv(id: &str, rssi: i16) -> Advertisement {
        Advertisement {
            id: id.into(),
            name: None,
            signal_strength: rssi,
        }
    }

    #[test]
    fn record_updates_existing_device() {
        let mut table = BeaconTable::new();
        table.record(&adv("AA", -80), t(0));
        table.record(&adv("AA", -60), t(5));
        assert_eq!(table.len(), 1);
        let device = table.get("AA").unwrap();
        assert_eq!(device.signal_strength, -60);
        assert_eq!(device.last_seen, t(5));
    }

    #[test]
    fn sweep_expires_devices_older_than_window() {
        let mut table = BeaconTable::new();
        table.record(&adv("old", -50), t(0));
        table.record(&adv("edge", -50), t(5));
        table.record(&adv("fresh", -50), t(12));

        let removed = table.sweep(t(15), Duration::seconds(10));
        assert_eq!(removed, 1);
        assert!(table.get("old").is_none());
        assert!(table.get("edge").is_some());
        assert!(table.get("fresh").is_some());
    }

    #[test]
    fn nearby_sorts_strongest_first() {
        let mut table = BeaconTable::new();
        table.record(&adv("far", -90), t(0));
        table.record(&adv("near", -40), t(0));
        table.record(&adv("mid", -65), t(0));
        let ids: Vec<String> = table.nearby().into_iter().map(|d| d.id).collect();
        assert_eq!(ids, vec!["near", "mid", "far"]);
    }
}
