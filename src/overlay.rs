//! Raster annotation for the live feed.
//!
//! Everything here draws straight into an `RgbImage`: outlines, filled bars,
//! polygon edges and a built-in 5x7 bitmap font. Text is upper-cased; glyphs
//! outside the font render as `?`.

use image::{Rgb, RgbImage};

use crate::detect::{Detection, ObjectClass};
use crate::zone::{Zone, ZoneShape};

pub const GREEN: Rgb<u8> = Rgb([0, 255, 0]);
pub const ORANGE: Rgb<u8> = Rgb([255, 165, 0]);
pub const RED: Rgb<u8> = Rgb([255, 0, 0]);
pub const ZONE_BLUE: Rgb<u8> = Rgb([59, 130, 246]);
pub const YELLOW: Rgb<u8> = Rgb([255, 220, 0]);
pub const WHITE: Rgb<u8> = Rgb([255, 255, 255]);
pub const GREY: Rgb<u8> = Rgb([200, 200, 200]);
pub const BAR: Rgb<u8> = Rgb([40, 40, 40]);

const GLYPH_W: u32 = 5;
const GLYPH_H: u32 = 7;

/// One detection as seen by the processing loop.
#[derive(Clone, Debug)]
pub struct MarkedDetection<'a> {
    pub detection: &'a Detection,
    /// Person whose box centre lies in a zone.
    pub in_zone: bool,
}

/// Draws zones, detection boxes with labels, the in-zone warning and, while
/// the alarm is active, a red banner across the top of the frame.
pub fn annotate(frame: &mut RgbImage, zones: &[Zone], marked: &[MarkedDetection<'_>], alarm: bool) {
    for zone in zones {
        draw_zone(frame, zone, ZONE_BLUE);
    }
    for mark in marked {
        let det = mark.detection;
        let (x1, y1) = (det.bbox.x1 as i64, det.bbox.y1 as i64);
        let (x2, y2) = (det.bbox.x2 as i64, det.bbox.y2 as i64);
        let color = class_color(det.class);
        draw_rect(frame, x1, y1, x2, y2, color, 2);
        let label = format!("{} {:.2}", det.label, det.confidence);
        draw_text(frame, x1, y1.saturating_sub(10), &label, 1, color);
        if mark.in_zone {
            draw_rect(frame, x1, y1, x2, y2, RED, 3);
            draw_text(frame, x1, y2.saturating_add(8), "HUMAN IN ZONE!", 2, RED);
        } else if det.class != ObjectClass::Person {
            let note = format!("{} (ignored)", det.label);
            draw_text(frame, x1, y2.saturating_add(6), &note, 1, color);
        }
    }
    if alarm {
        let banner = "ALARM ACTIVE";
        fill_rect(frame, 0, 0, frame.width(), 22, RED);
        let x = (frame.width() as i64 - text_width(banner, 2) as i64) / 2;
        draw_text(frame, x.max(4), 4, banner, 2, WHITE);
    }
}

/// Box colour per detected class.
pub fn class_color(class: ObjectClass) -> Rgb<u8> {
    match class {
        ObjectClass::Person => GREEN,
        ObjectClass::Vehicle => ORANGE,
        ObjectClass::Animal => YELLOW,
        ObjectClass::Unknown => GREY,
    }
}

pub fn draw_zone(frame: &mut RgbImage, zone: &Zone, color: Rgb<u8>) {
    match &zone.shape {
        ZoneShape::Rect { x, y, w, h } => draw_rect(
            frame,
            *x as i64,
            *y as i64,
            (x + w) as i64,
            (y + h) as i64,
            color,
            2,
        ),
        ZoneShape::Polygon { points } => {
            if points.len() < 2 {
                return;
            }
            for (i, a) in points.iter().enumerate() {
                let b = points[(i + 1) % points.len()];
                draw_line(frame, (a.x, a.y), (b.x, b.y), color);
            }
        }
    }
}

fn put(frame: &mut RgbImage, x: i64, y: i64, color: Rgb<u8>) {
    if x >= 0 && y >= 0 && x < i64::from(frame.width()) && y < i64::from(frame.height()) {
        frame.put_pixel(x as u32, y as u32, color);
    }
}

/// Outline with the given stroke width growing inward. Clipped to the frame.
pub fn draw_rect(
    frame: &mut RgbImage,
    x1: i64,
    y1: i64,
    x2: i64,
    y2: i64,
    color: Rgb<u8>,
    thickness: u32,
) {
    // Edges pulled in to just past the border stay invisible, so the loops
    // below never walk more than the frame.
    let pad = i64::from(thickness) + 1;
    let (w, h) = (i64::from(frame.width()), i64::from(frame.height()));
    let (x1, x2) = (x1.min(x2).clamp(-pad, w + pad), x1.max(x2).clamp(-pad, w + pad));
    let (y1, y2) = (y1.min(y2).clamp(-pad, h + pad), y1.max(y2).clamp(-pad, h + pad));
    for t in 0..i64::from(thickness) {
        if x1 + t > x2 - t || y1 + t > y2 - t {
            break;
        }
        for x in (x1 + t).max(0)..=(x2 - t).min(w - 1) {
            put(frame, x, y1 + t, color);
            put(frame, x, y2 - t, color);
        }
        for y in (y1 + t).max(0)..=(y2 - t).min(h - 1) {
            put(frame, x1 + t, y, color);
            put(frame, x2 - t, y, color);
        }
    }
}

pub fn fill_rect(frame: &mut RgbImage, x: u32, y: u32, w: u32, h: u32, color: Rgb<u8>) {
    let x_end = x.saturating_add(w).min(frame.width());
    let y_end = y.saturating_add(h).min(frame.height());
    for py in y..y_end {
        for px in x..x_end {
            frame.put_pixel(px, py, color);
        }
    }
}

/// Bresenham line between two points in frame coordinates. The segment is
/// clipped to the frame first, so every step lands on a visible pixel.
pub fn draw_line(frame: &mut RgbImage, from: (f64, f64), to: (f64, f64), color: Rgb<u8>) {
    let Some((from, to)) = clip_segment(from, to, frame.width(), frame.height()) else {
        return;
    };
    let (mut x0, mut y0) = from;
    let (x1, y1) = to;
    let dx = (x1 - x0).abs();
    let dy = -(y1 - y0).abs();
    let sx = if x0 < x1 { 1 } else { -1 };
    let sy = if y0 < y1 { 1 } else { -1 };
    let mut err = dx + dy;
    loop {
        put(frame, x0, y0, color);
        if x0 == x1 && y0 == y1 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x0 += sx;
        }
        if e2 <= dx {
            err += dx;
            y0 += sy;
        }
    }
}

type PixelSegment = ((i64, i64), (i64, i64));

const LEFT: u8 = 1;
const RIGHT: u8 = 2;
const ABOVE: u8 = 4;
const BELOW: u8 = 8;

/// Cohen-Sutherland clip of `from -> to` against `[0, width-1] x [0, height-1]`.
/// Endpoints outside the frame are moved onto the border they cross, so the
/// result stays exact however far away the original vertices were.
fn clip_segment(
    from: (f64, f64),
    to: (f64, f64),
    width: u32,
    height: u32,
) -> Option<PixelSegment> {
    if width == 0 || height == 0 {
        return None;
    }
    let (xmax, ymax) = (f64::from(width - 1), f64::from(height - 1));
    let region = |(x, y): (f64, f64)| -> Option<u8> {
        if !x.is_finite() || !y.is_finite() {
            return None;
        }
        let mut code = 0;
        if x < 0.0 {
            code |= LEFT;
        } else if x > xmax {
            code |= RIGHT;
        }
        if y < 0.0 {
            code |= ABOVE;
        } else if y > ymax {
            code |= BELOW;
        }
        Some(code)
    };
    let (mut a, mut b) = (from, to);
    // Each pass pins one endpoint to one border; four borders per endpoint.
    for _ in 0..8 {
        let (ca, cb) = (region(a)?, region(b)?);
        if (ca | cb) == 0 {
            let pixel = |(x, y): (f64, f64)| {
                (x.clamp(0.0, xmax).round() as i64, y.clamp(0.0, ymax).round() as i64)
            };
            return Some((pixel(a), pixel(b)));
        }
        if (ca & cb) != 0 {
            return None;
        }
        let outside = if ca != 0 { ca } else { cb };
        let (dx, dy) = (b.0 - a.0, b.1 - a.1);
        let moved = if outside & ABOVE != 0 {
            (a.0 - dx * a.1 / dy, 0.0)
        } else if outside & BELOW != 0 {
            (a.0 + dx * (ymax - a.1) / dy, ymax)
        } else if outside & LEFT != 0 {
            (0.0, a.1 - dy * a.0 / dx)
        } else {
            (xmax, a.1 + dy * (xmax - a.0) / dx)
        };
        if outside == ca {
            a = moved;
        } else {
            b = moved;
        }
    }
    None
}

/// Width in pixels of `text` at `scale`, including one column of spacing per glyph.
pub fn text_width(text: &str, scale: u32) -> u32 {
    text.chars().count() as u32 * (GLYPH_W + 1) * scale.max(1)
}

/// Draws `text` with its top-left corner at `(x, y)`.
pub fn draw_text(frame: &mut RgbImage, x: i64, y: i64, text: &str, scale: u32, color: Rgb<u8>) {
    let scale = i64::from(scale.max(1));
    if y >= i64::from(frame.height()) || y.saturating_add(i64::from(GLYPH_H) * scale) < 0 {
        return;
    }
    let mut cursor = x;
    for ch in text.chars() {
        if cursor >= i64::from(frame.width()) {
            break;
        }
        let rows = glyph(ch);
        for (row, bits) in rows.iter().enumerate() {
            for col in 0..GLYPH_W {
                if bits & (0x10 >> col) == 0 {
                    continue;
                }
                let px = cursor.saturating_add(i64::from(col) * scale);
                let py = y.saturating_add(row as i64 * scale);
                for oy in 0..scale {
                    for ox in 0..scale {
                        put(frame, px.saturating_add(ox), py.saturating_add(oy), color);
                    }
                }
            }
        }
        cursor = cursor.saturating_add(i64::from(GLYPH_W + 1) * scale);
    }
}

/// Height in pixels of one text line at `scale`.
pub fn text_height(scale: u32) -> u32 {
    GLYPH_H * scale.max(1)
}

fn glyph(ch: char) -> [u8; GLYPH_H as usize] {
    match ch.to_ascii_uppercase() {
        ' ' => [0x00; 7],
        'A' => [0x0E, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'B' => [0x1E, 0x11, 0x11, 0x1E, 0x11, 0x11, 0x1E],
        'C' => [0x0E, 0x11, 0x10, 0x10, 0x10, 0x11, 0x0E],
        'D' => [0x1E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x1E],
        'E' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x1F],
        'F' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x10],
        'G' => [0x0E, 0x11, 0x10, 0x17, 0x11, 0x11, 0x0F],
        'H' => [0x11, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'I' => [0x0E, 0x04, 0x04, 0x04, 0x04, 0x04, 0x0E],
        'J' => [0x07, 0x02, 0x02, 0x02, 0x02, 0x12, 0x0C],
        'K' => [0x11, 0x12, 0x14, 0x18, 0x14, 0x12, 0x11],
        'L' => [0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x1F],
        'M' => [0x11, 0x1B, 0x15, 0x15, 0x11, 0x11, 0x11],
        'N' => [0x11, 0x11, 0x19, 0x15, 0x13, 0x11, 0x11],
        'O' => [0x0E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'P' => [0x1E, 0x11, 0x11, 0x1E, 0x10, 0x10, 0x10],
        'Q' => [0x0E, 0x11, 0x11, 0x11, 0x15, 0x12, 0x0D],
        'R' => [0x1E, 0x11, 0x11, 0x1E, 0x14, 0x12, 0x11],
        'S' => [0x0F, 0x10, 0x10, 0x0E, 0x01, 0x01, 0x1E],
        'T' => [0x1F, 0x04, 0x04, 0x04, 0x04, 0x04, 0x04],
        'U' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'V' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x0A, 0x04],
        'W' => [0x11, 0x11, 0x11, 0x15, 0x15, 0x15, 0x0A],
        'X' => [0x11, 0x11, 0x0A, 0x04, 0x0A, 0x11, 0x11],
        'Y' => [0x11, 0x11, 0x11, 0x0A, 0x04, 0x04, 0x04],
        'Z' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x10, 0x1F],
        '0' => [0x0E, 0x11, 0x13, 0x15, 0x19, 0x11, 0x0E],
        '1' => [0x04, 0x0C, 0x04, 0x04, 0x04, 0x04, 0x0E],
        '2' => [0x0E, 0x11, 0x01, 0x02, 0x04, 0x08, 0x1F],
        '3' => [0x1F, 0x02, 0x04, 0x02, 0x01, 0x11, 0x0E],
        '4' => [0x02, 0x06, 0x0A, 0x12, 0x1F, 0x02, 0x02],
        '5' => [0x1F, 0x10, 0x1E, 0x01, 0x01, 0x11, 0x0E],
        '6' => [0x06, 0x08, 0x10, 0x1E, 0x11, 0x11, 0x0E],
        '7' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x08, 0x08],
        '8' => [0x0E, 0x11, 0x11, 0x0E, 0x11, 0x11, 0x0E],
        '9' => [0x0E, 0x11, 0x11, 0x0F, 0x01, 0x02, 0x0C],
        ':' => [0x00, 0x0C, 0x0C, 0x00, 0x0C, 0x0C, 0x00],
        '-' => [0x00, 0x00, 0x00, 0x1F, 0x00, 0x00, 0x00],
        '.' => [0x00, 0x00, 0x00, 0x00, 0x00, 0x0C, 0x0C],
        '!' => [0x04, 0x04, 0x04, 0x04, 0x04, 0x00, 0x04],
        '%' => [0x18, 0x19, 0x02, 0x04, 0x08, 0x13, 0x03],
        '(' => [0x02, 0x04, 0x08, 0x08, 0x08, 0x04, 0x02],
        ')' => [0x08, 0x04, 0x02, 0x02, 0x02, 0x04, 0x08],
        '[' => [0x0E, 0x08, 0x08, 0x08, 0x08, 0x08, 0x0E],
        ']' => [0x0E, 0x02, 0x02, 0x02, 0x02, 0x02, 0x0E],
        '/' => [0x00, 0x01, 0x02, 0x04, 0x08, 0x10, 0x00],
        '|' => [0x04, 0x04, 0x04, 0x04, 0x04, 0x04, 0x04],
        '_' => [0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x1F],
        _ => [0x0E, 0x11, 0x01, 0x02, 0x04, 0x00, 0x04],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zone::BoundingBox;

    #[test]
    fn rect_outline_is_clipped() {
        let mut img = RgbImage::new(20, 20);
        draw_rect(&mut img, -5, 2, 10, 30, RED, 1);
        assert_eq!(*img.get_pixel(10, 5), RED);
        assert_eq!(*img.get_pixel(0, 2), RED);
        assert_eq!(*img.get_pixel(5, 5), Rgb([0, 0, 0]));
    }

    #[test]
    fn text_marks_pixels_inside_extent() {
        let mut img = RgbImage::new(40, 10);
        draw_text(&mut img, 1, 1, "HI", 1, WHITE);
        let lit = img.pixels().filter(|p| **p == WHITE).count();
        assert!(lit > 10);
        assert_eq!(text_width("HI", 1), 12);
        assert_eq!(*img.get_pixel(39, 9), Rgb([0, 0, 0]));
    }

    #[test]
    fn in_zone_person_is_drawn_red() {
        let mut img = RgbImage::new(200, 200);
        let det = Detection::person(BoundingBox::new(20.0, 40.0, 70.0, 140.0), 0.9);
        let marked = [MarkedDetection {
            detection: &det,
            in_zone: true,
        }];
        let zone = Zone::rect("zone:a", 0.0, 0.0, 150.0, 150.0);
        annotate(&mut img, std::slice::from_ref(&zone), &marked, true);
        assert_eq!(*img.get_pixel(20, 60), RED);
        assert_eq!(*img.get_pixel(2, 20), RED);
    }

    #[test]
    fn far_off_zones_draw_only_visible_pixels() {
        let mut img = RgbImage::new(64, 48);
        let spike = Zone::polygon(
            "zone:spike",
            vec![
                crate::zone::Point::new(-1e300, 0.0),
                crate::zone::Point::new(1e300, 0.0),
                crate::zone::Point::new(0.0, 10.0),
            ],
        );
        let huge = Zone::rect("zone:huge", 0.0, 0.0, 2e8, 2e8);
        let started = std::time::Instant::now();
        annotate(&mut img, &[spike, huge], &[], false);
        assert!(started.elapsed() < std::time::Duration::from_secs(1));
        // top edge of both zones runs along y = 0
        assert_eq!(*img.get_pixel(30, 0), ZONE_BLUE);
        assert_eq!(*img.get_pixel(30, 30), Rgb([0, 0, 0]));
    }

    #[test]
    fn line_is_clipped_to_frame() {
        let mut img = RgbImage::new(10, 10);
        draw_line(&mut img, (-100.0, 5.0), (100.0, 5.0), RED);
        assert!((0..10).all(|x| *img.get_pixel(x, 5) == RED));
        draw_line(&mut img, (-5.0, -5.0), (-1.0, 20.0), WHITE);
        assert!(img.pixels().all(|p| *p != WHITE));
        draw_line(&mut img, (f64::NAN, 0.0), (3.0, 3.0), WHITE);
        assert!(img.pixels().all(|p| *p != WHITE));
    }

    #[test]
    fn ignored_detections_use_class_colour() {
        let mut img = RgbImage::new(120, 120);
        let truck = Detection::new("truck", BoundingBox::new(10.0, 20.0, 50.0, 60.0), 0.8);
        let dog = Detection::new("dog", BoundingBox::new(60.0, 20.0, 100.0, 60.0), 0.8);
        let marked = [
            MarkedDetection { detection: &truck, in_zone: false },
            MarkedDetection { detection: &dog, in_zone: false },
        ];
        annotate(&mut img, &[], &marked, false);
        assert_eq!(*img.get_pixel(10, 40), ORANGE);
        assert_eq!(*img.get_pixel(60, 40), YELLOW);
        assert_eq!(class_color(ObjectClass::Unknown), GREY);
    }
}
