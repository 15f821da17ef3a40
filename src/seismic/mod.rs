//! Seismic ingestion: decode, filter, threshold, trigger.
//!
//! Each transport message carries one batch of samples as
//! `{"data": [x0, x1, ...]}`. A batch is a footfall when the energy of the
//! filtered samples (sum of squares) exceeds `101 - sensitivity`, so raising
//! the sensitivity dial lowers the bar.

mod filter;

pub use filter::{BandPass, PassThrough, SignalFilter};

use serde_json::Value;

use crate::alarm::AlarmHandle;
use crate::persistence::PersistenceCounter;
use crate::status::StatusStore;
use crate::Modality;

/// One footfall batch is enough by default.
pub const DEFAULT_SEISMIC_PERSISTENCE: u32 = 1;

#[derive(Clone, Debug, PartialEq)]
pub enum IngestOutcome {
    /// Payload was absent, empty or malformed. Nothing changed.
    Ignored,
    Quiet {
        energy: f64,
        threshold: f64,
    },
    Footfall {
        energy: f64,
        threshold: f64,
        /// A trigger was sent to the alarm.
        triggered: bool,
    },
}

pub struct SeismicPipeline {
    filter: Box<dyn SignalFilter>,
    status: StatusStore,
    alarm: AlarmHandle,
    persistence: PersistenceCounter,
}

impl SeismicPipeline {
    pub fn new(filter: Box<dyn SignalFilter>, status: StatusStore, alarm: AlarmHandle) -> Self {
        Self {
            filter,
            status,
            alarm,
            persistence: PersistenceCounter::new(DEFAULT_SEISMIC_PERSISTENCE),
        }
    }

    /// Number of consecutive footfall batches required to trigger.
    pub fn with_persistence(mut self, threshold: u32) -> Self {
        self.persistence = PersistenceCounter::new(threshold);
        self
    }

    /// The transport reached its source.
    pub fn mark_connected(&self) {
        self.status.set_connected(true);
    }

    pub fn persistence(&self) -> &PersistenceCounter {
        &self.persistence
    }

    /// Handles one raw transport message.
    pub fn ingest(&mut self, payload: &[u8]) -> IngestOutcome {
        match decode_batch(payload) {
            Some(samples) => self.ingest_samples(&samples),
            None => {
                log::debug!("seismic payload ignored ({} bytes)", payload.len());
                IngestOutcome::Ignored
            }
        }
    }

    /// Handles one decoded batch.
    pub fn ingest_samples(&mut self, samples: &[f64]) -> IngestOutcome {
        if samples.is_empty() {
            return IngestOutcome::Ignored;
        }
        self.status.set_connected(true);

        let filtered = match self.filter.apply(samples) {
            Ok(out) if out.len() == samples.len() => out,
            Ok(out) => {
                log::warn!(
                    "{} returned {} samples for {}; using raw batch",
                    self.filter.name(),
                    out.len(),
                    samples.len()
                );
                samples.to_vec()
            }
            Err(err) => {
                log::warn!("{} failed: {:#}; using raw batch", self.filter.name(), err);
                samples.to_vec()
            }
        };

        let energy = signal_energy(&filtered);
        let threshold = footfall_threshold(self.status.sensitivity());
        if !is_footfall(energy, threshold) {
            self.persistence.observe(false);
            return IngestOutcome::Quiet { energy, threshold };
        }

        self.persistence.observe(true);
        log::info!(
            "footfall detected: energy {:.2}, threshold {:.2}",
            energy,
            threshold
        );
        let mut triggered = false;
        let alarm = self.status.alarm_summary();
        if self.persistence.should_trigger(alarm) {
            match self.alarm.trigger(Modality::Seismic) {
                Ok(()) => {
                    self.persistence.triggered(alarm.1);
                    triggered = true;
                }
                Err(err) => log::error!("seismic trigger not delivered: {:#}", err),
            }
        }
        IngestOutcome::Footfall {
            energy,
            threshold,
            triggered,
        }
    }
}

/// Energy threshold for a sensitivity in `[0, 100]`.
pub fn footfall_threshold(sensitivity: f64) -> f64 {
    101.0 - sensitivity
}

pub fn signal_energy(samples: &[f64]) -> f64 {
    samples.iter().map(|x| x * x).sum()
}

/// Strictly greater: energy equal to the threshold is not a footfall.
pub fn is_footfall(energy: f64, threshold: f64) -> bool {
    energy > threshold
}

/// Extracts the `data` array. Numeric strings are accepted; any other
/// non-numeric entry makes the whole batch malformed.
pub fn decode_batch(payload: &[u8]) -> Option<Vec<f64>> {
    let message: Value = serde_json::from_slice(payload).ok()?;
    let data = message.get("data")?.as_array()?;
    if data.is_empty() {
        return None;
    }
    data.iter()
        .map(|entry| match entry {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        })
        .filter(|v| v.map_or(true, f64::is_finite))
        .collect()
}
