//! Geofenced zones and containment tests.
//!
//! Zones are drawn on the dashboard in frame pixel coordinates. A detection is
//! "in" a zone when the centre of its bounding box is inside the zone shape.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::convert::TryFrom;
use std::sync::OnceLock;

/// Accepted by [`is_box_in_zone`] for API compatibility. Containment is a
/// centre-point test, so the value does not influence the result.
pub const DEFAULT_OVERLAP_THRESHOLD: f32 = 0.5;

/// Largest coordinate magnitude a submitted zone may use, in pixels.
pub const MAX_ZONE_COORD: f64 = 100_000.0;

const EDGE_EPSILON: f64 = 1e-9;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Axis-aligned detection box in pixel coordinates, `x1 < x2`, `y1 < y2`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn center(&self) -> Point {
        Point {
            x: f64::from(self.x1 + self.x2) / 2.0,
            y: f64::from(self.y1 + self.y2) / 2.0,
        }
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ZoneShape {
    Rect { x: f64, y: f64, w: f64, h: f64 },
    Polygon { points: Vec<Point> },
}

/// A stored zone. Zones are immutable once added.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Zone {
    pub id: String,
    #[serde(flatten)]
    pub shape: ZoneShape,
}

impl Zone {
    pub fn rect(id: impl Into<String>, x: f64, y: f64, w: f64, h: f64) -> Self {
        Self {
            id: id.into(),
            shape: ZoneShape::Rect { x, y, w, h },
        }
    }

    pub fn polygon(id: impl Into<String>, points: Vec<Point>) -> Self {
        Self {
            id: id.into(),
            shape: ZoneShape::Polygon { points },
        }
    }

    pub fn contains(&self, point: Point) -> bool {
        is_point_in_zone(point, self)
    }
}

/// A zone as submitted by a client, before the store assigns an id.
///
/// Accepts the dashboard shapes (`{"type":"rect",x,y,w,h}` and
/// `{"type":"poly",points:[{x,y}..]}`) as well as the serialized [`Zone`] form.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(try_from = "RawZone")]
pub struct ZoneSpec {
    pub id: Option<String>,
    pub shape: ZoneShape,
}

impl ZoneSpec {
    pub fn into_zone(self, fallback_id: String) -> Zone {
        Zone {
            id: self.id.unwrap_or(fallback_id),
            shape: self.shape,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Coord {
    Number(f64),
    Text(String),
}

impl Coord {
    fn value(&self, field: &str) -> Result<f64> {
        match self {
            Coord::Number(v) => Ok(*v),
            Coord::Text(s) => s
                .trim()
                .parse::<f64>()
                .map_err(|_| anyhow!("zone field '{}' must be numeric", field)),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawPoint {
    Object { x: Coord, y: Coord },
    Pair([Coord; 2]),
}

impl RawPoint {
    fn point(&self) -> Result<Point> {
        match self {
            RawPoint::Object { x, y } => Ok(Point::new(x.value("x")?, y.value("y")?)),
            RawPoint::Pair([x, y]) => Ok(Point::new(x.value("x")?, y.value("y")?)),
        }
    }
}

#[derive(Deserialize)]
struct RawZone {
    id: Option<String>,
    #[serde(alias = "type")]
    kind: Option<String>,
    x: Option<Coord>,
    y: Option<Coord>,
    w: Option<Coord>,
    h: Option<Coord>,
    points: Option<Vec<RawPoint>>,
}

impl TryFrom<RawZone> for ZoneSpec {
    type Error = anyhow::Error;

    fn try_from(raw: RawZone) -> Result<Self> {
        let kind = match raw.kind.as_deref().map(|k| k.trim().to_ascii_lowercase()) {
            Some(kind) => kind,
            None if raw.points.is_some() => "polygon".to_string(),
            None => "rect".to_string(),
        };
        let shape = match kind.as_str() {
            "rect" | "rectangle" => {
                let field = |value: &Option<Coord>, name: &str| -> Result<f64> {
                    value
                        .as_ref()
                        .ok_or_else(|| anyhow!("rect zone requires '{}'", name))?
                        .value(name)
                };
                let (x, y) = (field(&raw.x, "x")?, field(&raw.y, "y")?);
                let (w, h) = (field(&raw.w, "w")?, field(&raw.h, "h")?);
                normalize_rect(x, y, w, h)?
            }
            "poly" | "polygon" => {
                let points = raw
                    .points
                    .as_ref()
                    .ok_or_else(|| anyhow!("polygon zone requires 'points'"))?
                    .iter()
                    .map(RawPoint::point)
                    .collect::<Result<Vec<_>>>()?;
                check_coords("polygon", points.iter().flat_map(|p| [p.x, p.y]))?;
                if points.len() < 3 {
                    return Err(anyhow!(
                        "polygon zone requires at least 3 points, got {}",
                        points.len()
                    ));
                }
                ZoneShape::Polygon { points }
            }
            other => return Err(anyhow!("unsupported zone type '{}'", other)),
        };
        let id = match raw.id {
            Some(id) if !id.trim().is_empty() => {
                let id = id.trim().to_lowercase();
                validate_zone_id(&id)?;
                Some(id)
            }
            _ => None,
        };
        Ok(ZoneSpec { id, shape })
    }
}

// The dashboard sends the drag vector as (w, h), which is negative when the
// user drags up or left.
fn normalize_rect(x: f64, y: f64, w: f64, h: f64) -> Result<ZoneShape> {
    check_coords("rect", [x, y, w, h])?;
    let (x, w) = if w < 0.0 { (x + w, -w) } else { (x, w) };
    let (y, h) = if h < 0.0 { (y + h, -h) } else { (y, h) };
    check_coords("rect", [x + w, y + h])?;
    Ok(ZoneShape::Rect { x, y, w, h })
}

fn check_coords(kind: &str, values: impl IntoIterator<Item = f64>) -> Result<()> {
    for v in values {
        if !v.is_finite() || v.abs() > MAX_ZONE_COORD {
            return Err(anyhow!(
                "{} zone coordinates must be finite and within +/-{}",
                kind,
                MAX_ZONE_COORD
            ));
        }
    }
    Ok(())
}

/// Zone ids are local identifiers of the form `zone:<1..64 of [a-z0-9_-]>`.
pub fn validate_zone_id(zone_id: &str) -> Result<()> {
    static ZONE_ID_RE: OnceLock<Option<regex::Regex>> = OnceLock::new();
    let re = ZONE_ID_RE
        .get_or_init(|| regex::Regex::new(r"^zone:[a-z0-9_-]{1,64}$").ok())
        .as_ref()
        .ok_or_else(|| anyhow!("zone id pattern failed to compile"))?;
    if !re.is_match(&zone_id.to_lowercase()) {
        return Err(anyhow!("zone id must match ^zone:[a-z0-9_-]{{1,64}}$"));
    }
    Ok(())
}

// -------------------- Containment --------------------

/// Rectangles are inclusive on both bounds. Polygons use the even-odd rule
/// with points on an edge counted as inside; fewer than three vertices never
/// contain anything.
pub fn is_point_in_zone(point: Point, zone: &Zone) -> bool {
    match &zone.shape {
        ZoneShape::Rect { x, y, w, h } => {
            point.x >= *x && point.x <= x + w && point.y >= *y && point.y <= y + h
        }
        ZoneShape::Polygon { points } => point_in_polygon(point, points),
    }
}

/// Tests the centre of `bbox` only. `_overlap_threshold` is kept for callers
/// that pass one and is not used.
pub fn is_box_in_zone(bbox: &BoundingBox, zone: &Zone, _overlap_threshold: f32) -> bool {
    is_point_in_zone(bbox.center(), zone)
}

/// First zone containing the box, in insertion order.
pub fn first_matching_zone<'a>(bbox: &BoundingBox, zones: &'a [Zone]) -> Option<&'a Zone> {
    zones
        .iter()
        .find(|zone| is_box_in_zone(bbox, zone, DEFAULT_OVERLAP_THRESHOLD))
}

fn point_in_polygon(p: Point, vertices: &[Point]) -> bool {
    if vertices.len() < 3 {
        return false;
    }
    let n = vertices.len();
    for i in 0..n {
        if on_segment(p, vertices[i], vertices[(i + 1) % n]) {
            return true;
        }
    }
    let mut inside = false;
    let mut j = n - 1;
    for i in 0..n {
        let (a, b) = (vertices[i], vertices[j]);
        if (a.y > p.y) != (b.y > p.y) {
            let cross_x = (b.x - a.x) * (p.y - a.y) / (b.y - a.y) + a.x;
            if p.x < cross_x {
                inside = !inside;
            }
        }
        j = i;
    }
    inside
}

fn on_segment(p: Point, a: Point, b: Point) -> bool {
    let cross = (b.x - a.x) * (p.y - a.y) - (b.y - a.y) * (p.x - a.x);
    let scale = (b.x - a.x).abs().max((b.y - a.y).abs()).max(1.0);
    if cross.abs() > EDGE_EPSILON * scale {
        return false;
    }
    p.x >= a.x.min(b.x) - EDGE_EPSILON
        && p.x <= a.x.max(b.x) + EDGE_EPSILON
        && p.y >= a.y.min(b.y) - EDGE_EPSILON
        && p.y <= a.y.max(b.y) + EDGE_EPSILON
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triangle() -> Zone {
        Zone::polygon(
            "zone:tri",
            vec![Point::new(1.0, 1.0), Point::new(10.0, 10.0), Point::new(1.0, 10.0)],
        )
    }

    #[test]
    fn rect_containment_is_inclusive() {
        let zone = Zone::rect("zone:a", 10.0, 20.0, 30.0, 40.0);
        for (x, y) in [(10.0, 20.0), (40.0, 60.0), (25.0, 40.0), (10.0, 60.0)] {
            assert!(is_point_in_zone(Point::new(x, y), &zone), "({x},{y})");
        }
        for (x, y) in [(9.99, 20.0), (40.01, 30.0), (25.0, 60.5), (0.0, 0.0)] {
            assert!(!is_point_in_zone(Point::new(x, y), &zone), "({x},{y})");
        }
    }

    #[test]
    fn polygon_boundary_counts_as_inside() {
        let zone = triangle();
        assert!(zone.contains(Point::new(1.0, 5.0)));
        assert!(zone.contains(Point::new(5.0, 5.0)));
        assert!(zone.contains(Point::new(10.0, 10.0)));
        assert!(zone.contains(Point::new(3.0, 8.0)));
        assert!(!zone.contains(Point::new(8.0, 2.0)));
        assert!(!zone.contains(Point::new(0.5, 5.0)));
    }

    #[test]
    fn degenerate_polygon_never_contains() {
        let zone = Zone::polygon("zone:line", vec![Point::new(0.0, 0.0), Point::new(5.0, 5.0)]);
        assert!(!zone.contains(Point::new(0.0, 0.0)));
        assert!(!zone.contains(Point::new(2.5, 2.5)));
    }

    #[test]
    fn box_test_uses_center_only() {
        let zone = Zone::rect("zone:a", 0.0, 0.0, 100.0, 100.0);
        let mostly_outside = BoundingBox::new(90.0, 90.0, 200.0, 200.0);
        let centered = BoundingBox::new(60.0, 60.0, 130.0, 130.0);
        assert!(!is_box_in_zone(&mostly_outside, &zone, 0.0));
        assert!(is_box_in_zone(&centered, &zone, 0.99));
        assert!(first_matching_zone(&centered, std::slice::from_ref(&zone)).is_some());
    }

    #[test]
    fn polygon_round_trips_with_kind() {
        let zone = triangle();
        let json = serde_json::to_value(&zone).unwrap();
        assert_eq!(json["kind"], "polygon");
        assert_eq!(json["points"][1]["x"], 10.0);
        let back: Zone = serde_json::from_value(json).unwrap();
        assert_eq!(back, zone);
    }

    #[test]
    fn dashboard_shapes_are_accepted() {
        let rect: ZoneSpec =
            serde_json::from_str(r#"{"type":"rect","x":"50","y":40,"w":-20,"h":30}"#).unwrap();
        assert_eq!(
            rect.shape,
            ZoneShape::Rect { x: 30.0, y: 40.0, w: 20.0, h: 30.0 }
        );

        let poly: ZoneSpec = serde_json::from_str(
            r#"{"type":"poly","points":[{"x":1,"y":1},[10,10],{"x":"1","y":"10"}]}"#,
        )
        .unwrap();
        assert!(poly.id.is_none());
        assert!(matches!(poly.shape, ZoneShape::Polygon { ref points } if points.len() == 3));
    }

    #[test]
    fn invalid_zone_specs_are_rejected() {
        for body in [
            r#"{"type":"poly","points":[{"x":1,"y":1},{"x":2,"y":2}]}"#,
            r#"{"type":"point","x":1,"y":2}"#,
            r#"{"type":"rect","x":1,"y":2,"w":3}"#,
            r#"{"type":"rect","x":"left","y":2,"w":3,"h":4}"#,
            r#"{"id":"Front Gate","type":"rect","x":1,"y":2,"w":3,"h":4}"#,
            r#"{"type":"rect","x":0,"y":0,"w":2e8,"h":10}"#,
            r#"{"type":"rect","x":90000,"y":0,"w":20000,"h":10}"#,
            r#"{"type":"poly","points":[[-1e300,0],[1e300,0],[0,10]]}"#,
        ] {
            assert!(serde_json::from_str::<ZoneSpec>(body).is_err(), "{body}");
        }
    }

    #[test]
    fn zone_id_pattern() {
        assert!(validate_zone_id("zone:front_gate").is_ok());
        assert!(validate_zone_id("zone:").is_err());
        assert!(validate_zone_id("front").is_err());
    }
}
