use anyhow::Result;
use image::{Rgb, RgbImage};

use super::CaptureHandle;
use crate::overlay;

/// Synthetic scene for `stub://` sources.
///
/// A slowly shifting gradient with a bright block walking across the frame.
/// The backdrop changes every 50 frames.
pub struct SyntheticScene {
    name: String,
    width: u32,
    height: u32,
    frame_count: u64,
    scene_state: u8,
}

impl SyntheticScene {
    pub fn new(name: &str, width: u32, height: u32) -> Self {
        log::info!("capture: {} is a synthetic scene ({}x{})", name, width, height);
        Self {
            name: name.trim_start_matches("stub://").to_string(),
            width: width.max(1),
            height: height.max(1),
            frame_count: 0,
            scene_state: 0,
        }
    }

    pub fn frames_captured(&self) -> u64 {
        self.frame_count
    }
}

impl CaptureHandle for SyntheticScene {
    fn read(&mut self) -> Result<RgbImage> {
        self.frame_count += 1;
        if self.frame_count % 50 == 0 {
            self.scene_state = self.scene_state.wrapping_add(1);
        }
        let shade = self.scene_state.wrapping_mul(16);
        let (w, h) = (self.width, self.height);
        let mut img = RgbImage::from_fn(w, h, |x, y| {
            let g = ((x * 64 / w) as u8).wrapping_add(shade);
            let b = ((y * 64 / h) as u8).wrapping_add(40);
            Rgb([20, g, b])
        });

        let block = (w / 10).max(1);
        let span = u64::from(w.saturating_sub(block).max(1));
        let x = (self.frame_count * 4 % span) as u32;
        overlay::fill_rect(&mut img, x, h / 2, block, block, Rgb([230, 230, 230]));
        overlay::draw_text(&mut img, 8, 8, &self.name, 1, overlay::WHITE);
        Ok(img)
    }
}
