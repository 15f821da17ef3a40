use anyhow::Result;
use image::RgbImage;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::detect::backend::Detector;
use crate::detect::result::Detection;
use crate::zone::BoundingBox;

const DEFAULT_RATE: f64 = 0.05;
const PERSON_W: f32 = 50.0;
const PERSON_H: f32 = 100.0;
const PERSON_CONFIDENCE: f32 = 0.92;

/// Detector used when no model is configured.
///
/// Occasionally reports a 50x100 person at a random position inside the frame.
pub struct SimulatedDetector {
    rng: StdRng,
    rate: f64,
}

impl SimulatedDetector {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
            rate: DEFAULT_RATE,
        }
    }

    /// Deterministic detector for tests.
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            rate: DEFAULT_RATE,
        }
    }

    /// Probability per frame of reporting a person, clamped to `[0, 1]`.
    pub fn with_rate(mut self, rate: f64) -> Self {
        self.rate = rate.clamp(0.0, 1.0);
        self
    }
}

impl Default for SimulatedDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl Detector for SimulatedDetector {
    fn name(&self) -> &'static str {
        "simulated"
    }

    fn detect(&mut self, frame: &RgbImage, confidence_floor: f32) -> Result<Vec<Detection>> {
        if PERSON_CONFIDENCE < confidence_floor || !self.rng.gen_bool(self.rate) {
            return Ok(Vec::new());
        }
        let max_x = (frame.width() as f32 - PERSON_W).max(0.0);
        let max_y = (frame.height() as f32 - PERSON_H).max(0.0);
        let x = self.rng.gen_range(0.0..=max_x).floor();
        let y = self.rng.gen_range(0.0..=max_y).floor();
        Ok(vec![Detection::person(
            BoundingBox::new(x, y, x + PERSON_W, y + PERSON_H),
            PERSON_CONFIDENCE,
        )])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn always_and_never_rates() {
        let frame = RgbImage::new(600, 300);
        let mut always = SimulatedDetector::seeded(7).with_rate(1.0);
        let found = always.detect(&frame, 0.5).unwrap();
        assert_eq!(found.len(), 1);
        let det = &found[0];
        assert!(det.is_person());
        assert!(det.bbox.x2 <= 600.0 && det.bbox.y2 <= 300.0);
        assert_eq!(det.bbox.width(), 50.0);

        let mut never = SimulatedDetector::seeded(7).with_rate(0.0);
        assert!(never.detect(&frame, 0.5).unwrap().is_empty());
    }

    #[test]
    fn respects_confidence_floor() {
        let frame = RgbImage::new(600, 300);
        let mut det = SimulatedDetector::seeded(1).with_rate(1.0);
        assert!(det.detect(&frame, 0.95).unwrap().is_empty());
    }
}
