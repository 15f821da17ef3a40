//! Process-wide system status.
//!
//! The store is the only place status lives. Writers go through named
//! mutators; the alarm triple (`alarm_active`, `intrusion_count`,
//! `last_event`) is only touched by the alarm state machine.

use crate::zone::{Zone, ZoneSpec};
use crate::{clock_string, datetime_string, Modality};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

pub const DEFAULT_SENSITIVITY: f64 = 50.0;
pub const DEFAULT_LOCATION_NAME: &str = "Construction Site Alpha";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LastEvent {
    /// `YYYY-MM-DD HH:MM:SS` (UTC).
    pub timestamp: String,
    pub modality: Modality,
    /// e.g. `Intrusion (Vision) @ 14:02:11`.
    pub description: String,
}

impl LastEvent {
    pub fn at(epoch_s: u64, modality: Modality) -> Self {
        Self {
            timestamp: datetime_string(epoch_s),
            modality,
            description: format!("{} @ {}", modality.event_title(), clock_string(epoch_s)),
        }
    }
}

/// Where seismic samples are coming from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IngestMode {
    Starting,
    Live,
    Simulated,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
}

impl Default for Location {
    fn default() -> Self {
        Self {
            name: DEFAULT_LOCATION_NAME.to_string(),
            latitude: 0.0,
            longitude: 0.0,
        }
    }
}

/// Partial location update; absent fields keep their value.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct LocationUpdate {
    pub name: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

/// Serializable snapshot returned by `GET /api/status`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SystemStatus {
    pub connected: bool,
    pub alarm_active: bool,
    pub intrusion_count: u64,
    pub last_event: Option<LastEvent>,
    pub sensitivity: f64,
    pub zones: Vec<Zone>,
    pub camera_source: String,
    pub location: Location,
    pub ingest_mode: IngestMode,
}

#[derive(Debug)]
struct StatusInner {
    connected: bool,
    alarm_active: bool,
    intrusion_count: u64,
    last_event: Option<LastEvent>,
    sensitivity: f64,
    zones: Arc<Vec<Zone>>,
    next_zone: u64,
    camera_source: String,
    location: Location,
    ingest_mode: IngestMode,
}

/// Cloneable handle to the guarded status record.
#[derive(Clone, Debug)]
pub struct StatusStore {
    inner: Arc<RwLock<StatusInner>>,
}

impl Default for StatusStore {
    fn default() -> Self {
        Self::new(DEFAULT_SENSITIVITY, "0")
    }
}

impl StatusStore {
    pub fn new(sensitivity: f64, camera_source: &str) -> Self {
        Self {
            inner: Arc::new(RwLock::new(StatusInner {
                connected: false,
                alarm_active: false,
                intrusion_count: 0,
                last_event: None,
                sensitivity: clamp_sensitivity(sensitivity),
                zones: Arc::new(Vec::new()),
                next_zone: 1,
                camera_source: camera_source.to_string(),
                location: Location::default(),
                ingest_mode: IngestMode::Starting,
            })),
        }
    }

    // Every mutation leaves the record consistent, so a poisoned lock still
    // holds valid data.
    fn read(&self) -> RwLockReadGuard<'_, StatusInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, StatusInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> SystemStatus {
        let inner = self.read();
        SystemStatus {
            connected: inner.connected,
            alarm_active: inner.alarm_active,
            intrusion_count: inner.intrusion_count,
            last_event: inner.last_event.clone(),
            sensitivity: inner.sensitivity,
            zones: inner.zones.as_ref().clone(),
            camera_source: inner.camera_source.clone(),
            location: inner.location.clone(),
            ingest_mode: inner.ingest_mode,
        }
    }

    pub fn alarm_active(&self) -> bool {
        self.read().alarm_active
    }

    pub fn intrusion_count(&self) -> u64 {
        self.read().intrusion_count
    }

    /// `(alarm_active, intrusion_count)` read together.
    pub fn alarm_summary(&self) -> (bool, u64) {
        let inner = self.read();
        (inner.alarm_active, inner.intrusion_count)
    }

    pub fn sensitivity(&self) -> f64 {
        self.read().sensitivity
    }

    /// Stores the sensitivity clamped to `[0, 100]` and returns the stored value.
    pub fn set_sensitivity(&self, value: f64) -> f64 {
        let value = clamp_sensitivity(value);
        self.write().sensitivity = value;
        value
    }

    pub fn connected(&self) -> bool {
        self.read().connected
    }

    pub fn set_connected(&self, connected: bool) {
        self.write().connected = connected;
    }

    pub fn ingest_mode(&self) -> IngestMode {
        self.read().ingest_mode
    }

    pub fn set_ingest_mode(&self, mode: IngestMode) {
        self.write().ingest_mode = mode;
    }

    /// Snapshot of the zone list. Cheap: the list is shared until the next add.
    pub fn zones(&self) -> Arc<Vec<Zone>> {
        Arc::clone(&self.read().zones)
    }

    /// Appends a zone and returns the full list after the append. Zones
    /// without an id get the next free `zone:<n>`.
    pub fn add_zone(&self, spec: ZoneSpec) -> Result<Vec<Zone>> {
        let mut inner = self.write();
        let zone = if spec.id.is_some() {
            spec.into_zone(String::new())
        } else {
            let mut n = inner.next_zone;
            while inner.zones.iter().any(|z| z.id == format!("zone:{}", n)) {
                n += 1;
            }
            inner.next_zone = n + 1;
            spec.into_zone(format!("zone:{}", n))
        };
        if inner.zones.iter().any(|z| z.id == zone.id) {
            return Err(anyhow::anyhow!("zone '{}' already exists", zone.id));
        }
        let mut zones = inner.zones.as_ref().clone();
        zones.push(zone);
        inner.zones = Arc::new(zones);
        Ok(inner.zones.as_ref().clone())
    }

    pub fn location(&self) -> Location {
        self.read().location.clone()
    }

    pub fn update_location(&self, update: LocationUpdate) -> Location {
        let mut inner = self.write();
        if let Some(name) = update.name {
            inner.location.name = name;
        }
        if let Some(latitude) = update.latitude {
            inner.location.latitude = latitude;
        }
        if let Some(longitude) = update.longitude {
            inner.location.longitude = longitude;
        }
        inner.location.clone()
    }

    pub fn camera_source(&self) -> String {
        self.read().camera_source.clone()
    }

    pub fn set_camera_source(&self, source: &str) {
        self.write().camera_source = source.to_string();
    }

    /// Raises the alarm if idle: sets the flag, bumps the count and records the
    /// event in one critical section. Returns `None` when already active.
    pub(crate) fn activate(&self, modality: Modality, epoch_s: u64) -> Option<LastEvent> {
        let mut inner = self.write();
        if inner.alarm_active {
            return None;
        }
        let event = LastEvent::at(epoch_s, modality);
        inner.alarm_active = true;
        inner.intrusion_count += 1;
        inner.last_event = Some(event.clone());
        Some(event)
    }

    /// Clears the alarm flag. Returns whether it was set.
    pub(crate) fn deactivate(&self) -> bool {
        let mut inner = self.write();
        std::mem::replace(&mut inner.alarm_active, false)
    }
}

fn clamp_sensitivity(value: f64) -> f64 {
    if value.is_nan() {
        return DEFAULT_SENSITIVITY;
    }
    value.clamp(0.0, 100.0)
}
