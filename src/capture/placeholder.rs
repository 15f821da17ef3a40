use image::{Rgb, RgbImage};
use rand::Rng;

use crate::overlay::{self, BAR, GREEN, GREY, RED};

pub const PLACEHOLDER_WIDTH: u32 = 600;
pub const PLACEHOLDER_HEIGHT: u32 = 300;

const NOISE_MAX: u8 = 30;
const SIGNAL_YELLOW: Rgb<u8> = Rgb([255, 255, 0]);

/// Baseline 1x1 grey JPEG served when even the placeholder cannot be encoded.
pub const FALLBACK_JPEG: &[u8] = &[
    0xFF, 0xD8, // SOI
    0xFF, 0xDB, 0x00, 0x43, 0x00, // DQT, table 0
    0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01,
    0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01,
    0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01,
    0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01,
    0x01, 0x01, 0x01, 0x01, // 64 entries
    0xFF, 0xC0, 0x00, 0x0B, 0x08, 0x00, 0x01, 0x00, 0x01, 0x01, 0x01, 0x11, 0x00, // SOF0 1x1 gray
    0xFF, 0xC4, 0x00, 0x14, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, // DHT DC0: one 1-bit code
    0xFF, 0xC4, 0x00, 0x14, 0x10, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, // DHT AC0: EOB only
    0xFF, 0xDA, 0x00, 0x08, 0x01, 0x01, 0x00, 0x00, 0x3F, 0x00, // SOS
    0x3F, // DC diff 0, EOB, padding
    0xFF, 0xD9, // EOI
];

/// "No signal" frame: dark noise, a status bar, the offline banner and a
/// live timestamp so viewers can tell the stream is still running.
pub fn placeholder_frame(epoch_s: u64) -> RgbImage {
    let mut rng = rand::thread_rng();
    let mut img = RgbImage::from_fn(PLACEHOLDER_WIDTH, PLACEHOLDER_HEIGHT, |_, _| {
        Rgb([
            rng.gen_range(0..NOISE_MAX),
            rng.gen_range(0..NOISE_MAX),
            rng.gen_range(0..NOISE_MAX),
        ])
    });
    overlay::fill_rect(&mut img, 0, 0, PLACEHOLDER_WIDTH, 40, BAR);

    let title = "NO SIGNAL - CAMERA OFFLINE";
    let subtitle = "RUNNING IN SIMULATION MODE";
    draw_centered(&mut img, 130, title, 2, RED);
    draw_centered(&mut img, 165, subtitle, 1, GREY);

    let stamp = format!("LIVE FEED: {}", crate::datetime_string(epoch_s));
    overlay::draw_text(&mut img, 10, 16, &stamp, 1, GREEN);
    overlay::draw_text(&mut img, 420, 16, "SIGNAL: [|||||   ] 60%", 1, SIGNAL_YELLOW);
    img
}

fn draw_centered(img: &mut RgbImage, y: i64, text: &str, scale: u32, color: Rgb<u8>) {
    let x = (i64::from(img.width()) - i64::from(overlay::text_width(text, scale))) / 2;
    overlay::draw_text(img, x.max(0), y, text, scale, color);
}
