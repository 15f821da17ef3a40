use anyhow::Result;
use image::RgbImage;

use crate::detect::result::Detection;

/// Object detection capability.
///
/// The frame processor owns exactly one detector, chosen at startup, and calls
/// it from its own thread.
pub trait Detector: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on a decoded frame.
    ///
    /// Boxes are in frame pixel coordinates. Detections with a confidence
    /// below `confidence_floor` must not be returned.
    fn detect(&mut self, frame: &RgbImage, confidence_floor: f32) -> Result<Vec<Detection>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
