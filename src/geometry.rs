// Planar vector and polyline math used by the matcher and the locator.
// Inputs are assumed to be in a projected coordinate system; all distances
// are Euclidean in map units.

use geo::{Euclidean, Length};
use geo_types::LineString;

pub fn distance(a: (f64, f64), b: (f64, f64)) -> f64 {
    ((b.0 - a.0).powi(2) + (b.1 - a.1).powi(2)).sqrt()
}

pub fn polyline_length(line: &LineString<f64>) -> f64 {
    Euclidean.length(line)
}

/// End-to-end chord vector of a polyline (first point minus last point).
/// None when the polyline has fewer than two points or zero extent.
pub fn chord_vector(line: &LineString<f64>) -> Option<(f64, f64)> {
    let first = line.0.first()?;
    let last = line.0.last()?;
    let v = (first.x - last.x, first.y - last.y);
    if v.0 == 0.0 && v.1 == 0.0 {
        return None;
    }
    Some(v)
}

/// Angle between two 2-D vectors in degrees, in [0, 180].
/// None when either vector has zero length.
pub fn angle_between_two_vectors(v1: (f64, f64), v2: (f64, f64)) -> Option<f64> {
    let n1 = (v1.0 * v1.0 + v1.1 * v1.1).sqrt();
    let n2 = (v2.0 * v2.0 + v2.1 * v2.1).sqrt();
    if n1 == 0.0 || n2 == 0.0 {
        return None;
    }
    let cos = ((v1.0 * v2.0 + v1.1 * v2.1) / (n1 * n2)).clamp(-1.0, 1.0);
    Some(cos.acos().to_degrees())
}

/// Fold a vector angle to the angle between undirected lines.
pub fn fold_undirected(angle: f64) -> f64 {
    if angle > 90.0 { 180.0 - angle } else { angle }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompassDirection {
    North,
    NorthEast,
    East,
    SouthEast,
    South,
    SouthWest,
    West,
    NorthWest,
}

/// Classify a geodesic angle (degrees east of north, [-180, 180]) into one of
/// eight 45-degree compass sectors.
pub fn geodesic_angle_to_direction(angle: f64) -> CompassDirection {
    use CompassDirection::*;
    if angle >= 0.0 {
        if angle <= 22.5 {
            North
        } else if angle <= 67.5 {
            NorthEast
        } else if angle <= 112.5 {
            East
        } else if angle <= 157.5 {
            SouthEast
        } else {
            South
        }
    } else if angle > -22.5 {
        North
    } else if angle > -67.5 {
        NorthWest
    } else if angle > -112.5 {
        West
    } else if angle > -157.5 {
        SouthWest
    } else {
        South
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompassQuadrant {
    North,
    East,
    South,
    West,
}

/// Rotate a geodesic angle into circular degrees relative to a quadrant
/// origin.
pub fn geodesic_angle_to_circular_angle(angle: f64, quadrant: CompassQuadrant) -> f64 {
    let offset = match quadrant {
        CompassQuadrant::North => 0.0,
        CompassQuadrant::East => 270.0,
        CompassQuadrant::South => 180.0,
        CompassQuadrant::West => 90.0,
    };
    (angle + offset).rem_euclid(360.0)
}

/// Result of projecting a point onto a polyline.
#[derive(Clone, Copy, Debug)]
pub struct PolylineProjection {
    /// Index of the segment the projection falls on.
    pub segment_index: usize,
    /// Position within that segment, in [0, 1].
    pub segment_fraction: f64,
    /// Arc length from the polyline start to the projected point.
    pub distance_along: f64,
    /// Perpendicular distance from the point to the projected point.
    pub offset: f64,
}

/// Project a point onto the nearest position along a polyline.
pub fn project_point_to_polyline(
    point: (f64, f64),
    line: &LineString<f64>,
) -> Option<PolylineProjection> {
    if line.0.len() < 2 {
        return None;
    }

    let mut best: Option<PolylineProjection> = None;
    let mut length_before = 0.0;

    for (i, w) in line.0.windows(2).enumerate() {
        let a = w[0].x_y();
        let b = w[1].x_y();
        let seg_len = distance(a, b);

        let t = if seg_len == 0.0 {
            0.0
        } else {
            (((point.0 - a.0) * (b.0 - a.0) + (point.1 - a.1) * (b.1 - a.1))
                / (seg_len * seg_len))
                .clamp(0.0, 1.0)
        };
        let proj = (a.0 + t * (b.0 - a.0), a.1 + t * (b.1 - a.1));
        let offset = distance(point, proj);

        if best.is_none_or(|b| offset < b.offset) {
            best = Some(PolylineProjection {
                segment_index: i,
                segment_fraction: t,
                distance_along: length_before + t * seg_len,
                offset,
            });
        }
        length_before += seg_len;
    }

    best
}

pub fn point_to_polyline_distance(point: (f64, f64), line: &LineString<f64>) -> f64 {
    project_point_to_polyline(point, line).map_or(f64::INFINITY, |p| p.offset)
}

fn point_segment_distance(p: (f64, f64), a: (f64, f64), b: (f64, f64)) -> f64 {
    let seg_len = distance(a, b);
    if seg_len == 0.0 {
        return distance(p, a);
    }
    let t = (((p.0 - a.0) * (b.0 - a.0) + (p.1 - a.1) * (b.1 - a.1)) / (seg_len * seg_len))
        .clamp(0.0, 1.0);
    distance(p, (a.0 + t * (b.0 - a.0), a.1 + t * (b.1 - a.1)))
}

fn segments_intersect(a1: (f64, f64), a2: (f64, f64), b1: (f64, f64), b2: (f64, f64)) -> bool {
    let orient = |p: (f64, f64), q: (f64, f64), r: (f64, f64)| -> f64 {
        (q.0 - p.0) * (r.1 - p.1) - (q.1 - p.1) * (r.0 - p.0)
    };
    let d1 = orient(b1, b2, a1);
    let d2 = orient(b1, b2, a2);
    let d3 = orient(a1, a2, b1);
    let d4 = orient(a1, a2, b2);
    ((d1 > 0.0 && d2 < 0.0) || (d1 < 0.0 && d2 > 0.0))
        && ((d3 > 0.0 && d4 < 0.0) || (d3 < 0.0 && d4 > 0.0))
}

/// Minimum distance between two segments.
pub fn segment_to_segment_distance(
    a1: (f64, f64),
    a2: (f64, f64),
    b1: (f64, f64),
    b2: (f64, f64),
) -> f64 {
    if segments_intersect(a1, a2, b1, b2) {
        return 0.0;
    }
    point_segment_distance(a1, b1, b2)
        .min(point_segment_distance(a2, b1, b2))
        .min(point_segment_distance(b1, a1, a2))
        .min(point_segment_distance(b2, a1, a2))
}
