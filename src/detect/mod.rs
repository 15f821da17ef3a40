mod backend;
mod backends;
mod result;

pub use backend::Detector;
pub use backends::SimulatedDetector;
pub use result::{Detection, ObjectClass};

#[cfg(feature = "backend-tract")]
pub use backends::TractDetector;

/// Detections below this confidence are dropped before zone logic.
pub const DEFAULT_CONFIDENCE_FLOOR: f32 = 0.5;
