//! Perimeter Guard
//!
//! This crate implements the fusion/alarm engine of a perimeter-intrusion guard.
//!
//! # Architecture
//!
//! Two independent modalities feed one debounced alarm:
//!
//! 1. **Vision**: frames from a hot-swappable capture source are run through a
//!    person detector and tested against geofenced zones.
//! 2. **Seismic**: sample batches delivered over MQTT are band-pass filtered
//!    and compared against an energy threshold derived from the sensitivity dial.
//!
//! Both producers send commands over one channel to the alarm state machine,
//! which is the only writer of the alarm triple (`alarm_active`,
//! `intrusion_count`, `last_event`) and the only caller of the actuator queue.
//!
//! # Module Structure
//!
//! - `zone`: rect/polygon containment
//! - `capture`: capture source, device openers, placeholder frames
//! - `detect`: detection capability and backends
//! - `processor`: the frame processing loop
//! - `seismic`: seismic ingestion pipeline and filters
//! - `alarm` / `actuator`: state machine and bounded actuation queue
//! - `status`: the guarded process-wide status record
//! - `frame`: single-writer latest-frame cache for streaming
//! - `transport`: MQTT subscriber and simulated seismic source
//! - `api`: HTTP surface

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

pub mod actuator;
pub mod alarm;
pub mod api;
pub mod capture;
pub mod config;
pub mod detect;
pub mod frame;
pub mod overlay;
pub mod persistence;
pub mod processor;
pub mod seismic;
pub mod status;
pub mod transport;
pub mod zone;

pub use actuator::{select_actuator, Actuator, ActuatorQueue, ActuatorWorker, SimulatedBuzzer};
pub use alarm::{
    AlarmCommand, AlarmHandle, AlarmInbox, AlarmState, AlarmStateMachine, AlarmWorker, Transition,
};
pub use capture::{CaptureDevices, CaptureHandle, CaptureSource, SourceSpec, SystemDevices};
pub use detect::{Detection, Detector, ObjectClass, SimulatedDetector};
pub use frame::{frame_buffer, FrameReader, FrameWriter, PublishedFrame};
pub use persistence::PersistenceCounter;
pub use processor::{FrameProcessor, ProcessorConfig, ProcessorHandle, StepOutcome};
pub use seismic::{IngestOutcome, SeismicPipeline};
pub use status::{IngestMode, LastEvent, Location, LocationUpdate, StatusStore, SystemStatus};
pub use zone::{is_box_in_zone, is_point_in_zone, BoundingBox, Point, Zone, ZoneShape, ZoneSpec};

// -------------------- Modalities --------------------

/// Detection source that can raise the alarm.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    Vision,
    Seismic,
}

impl Modality {
    /// Human-readable event title used in `last_event` descriptions.
    pub fn event_title(&self) -> &'static str {
        match self {
            Self::Vision => "Intrusion (Vision)",
            Self::Seismic => "Seismic Activity",
        }
    }
}

impl std::fmt::Display for Modality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Vision => write!(f, "vision"),
            Self::Seismic => write!(f, "seismic"),
        }
    }
}

// -------------------- Wall Clock --------------------

/// Seconds since the Unix epoch. A clock before 1970 reads as zero.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Formats the time-of-day of an epoch timestamp as `HH:MM:SS` (UTC).
pub fn clock_string(epoch_s: u64) -> String {
    let secs_of_day = epoch_s % 86_400;
    format!(
        "{:02}:{:02}:{:02}",
        secs_of_day / 3600,
        (secs_of_day % 3600) / 60,
        secs_of_day % 60
    )
}

/// Formats an epoch timestamp as `YYYY-MM-DD HH:MM:SS` (UTC).
pub fn datetime_string(epoch_s: u64) -> String {
    let days = (epoch_s / 86_400) as i64;
    let (year, month, day) = civil_from_days(days);
    format!(
        "{:04}-{:02}-{:02} {}",
        year,
        month,
        day,
        clock_string(epoch_s)
    )
}

// Days since 1970-01-01 to a proleptic Gregorian date.
fn civil_from_days(days: i64) -> (i64, u32, u32) {
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let month = (if mp < 10 { mp + 3 } else { mp - 9 }) as u32;
    let year = yoe + era * 400 + i64::from(month <= 2);
    (year, month, day)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_string_wraps_at_midnight() {
        assert_eq!(clock_string(0), "00:00:00");
        assert_eq!(clock_string(86_399), "23:59:59");
        assert_eq!(clock_string(86_400 + 3_661), "01:01:01");
    }

    #[test]
    fn datetime_string_matches_known_dates() {
        assert_eq!(datetime_string(0), "1970-01-01 00:00:00");
        // 2024-02-29 12:00:00 UTC
        assert_eq!(datetime_string(1_709_208_000), "2024-02-29 12:00:00");
    }

    #[test]
    fn modality_serializes_lowercase() {
        let json = serde_json::to_string(&Modality::Seismic).unwrap();
        assert_eq!(json, "\"seismic\"");
        assert_eq!(Modality::Vision.to_string(), "vision");
    }
}
