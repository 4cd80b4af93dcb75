// R-tree backed proximity queries over route geometries. This is the
// "external spatial engine" surface of the pipeline, embedded on rstar.

use crate::geometry;
use crate::model::RouteFeature;
use ahash::AHashSet;
use geo_types::LineString;
use rstar::{AABB, PointDistance, RTree, RTreeObject};

/// One route segment in the index, tagged with the index of the route it
/// belongs to in the caller's active-route list.
struct IndexedSegment {
    start: [f64; 2],
    end: [f64; 2],
    route_idx: usize,
}

impl RTreeObject for IndexedSegment {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_corners(
            [
                self.start[0].min(self.end[0]),
                self.start[1].min(self.end[1]),
            ],
            [
                self.start[0].max(self.end[0]),
                self.start[1].max(self.end[1]),
            ],
        )
    }
}

impl PointDistance for IndexedSegment {
    fn distance_2(&self, point: &[f64; 2]) -> f64 {
        let d = geometry::segment_to_segment_distance(
            (point[0], point[1]),
            (point[0], point[1]),
            (self.start[0], self.start[1]),
            (self.end[0], self.end[1]),
        );
        d * d
    }
}

/// Spatial index over the active routes of one conflation run.
pub struct RouteIndex<'a> {
    tree: RTree<IndexedSegment>,
    routes: &'a [&'a RouteFeature],
}

impl<'a> RouteIndex<'a> {
    pub fn build(routes: &'a [&'a RouteFeature]) -> Self {
        let mut segments = Vec::new();
        for (route_idx, route) in routes.iter().enumerate() {
            for part in &route.parts {
                for w in part.line.0.windows(2) {
                    segments.push(IndexedSegment {
                        start: [w[0].x, w[0].y],
                        end: [w[1].x, w[1].y],
                        route_idx,
                    });
                }
            }
        }
        Self {
            tree: RTree::bulk_load(segments),
            routes,
        }
    }

    pub fn route(&self, idx: usize) -> &'a RouteFeature {
        self.routes[idx]
    }

    /// Indices of routes with at least one segment within `radius` of the
    /// polyline. Envelope pre-filter first, exact segment distance second.
    pub fn routes_within(&self, line: &LineString<f64>, radius: f64) -> Vec<usize> {
        if line.0.len() < 2 {
            return Vec::new();
        }

        let (mut min_x, mut min_y) = (f64::INFINITY, f64::INFINITY);
        let (mut max_x, mut max_y) = (f64::NEG_INFINITY, f64::NEG_INFINITY);
        for c in &line.0 {
            min_x = min_x.min(c.x);
            min_y = min_y.min(c.y);
            max_x = max_x.max(c.x);
            max_y = max_y.max(c.y);
        }
        let envelope = AABB::from_corners(
            [min_x - radius, min_y - radius],
            [max_x + radius, max_y + radius],
        );

        let mut hits: AHashSet<usize> = AHashSet::new();
        for seg in self.tree.locate_in_envelope_intersecting(&envelope) {
            if hits.contains(&seg.route_idx) {
                continue;
            }
            let near = line.0.windows(2).any(|w| {
                geometry::segment_to_segment_distance(
                    w[0].x_y(),
                    w[1].x_y(),
                    (seg.start[0], seg.start[1]),
                    (seg.end[0], seg.end[1]),
                ) <= radius
            });
            if near {
                hits.insert(seg.route_idx);
            }
        }

        let mut out: Vec<usize> = hits.into_iter().collect();
        out.sort_unstable();
        out
    }

    /// Indices of routes with at least one segment within `radius` of the
    /// point.
    pub fn routes_within_point(&self, point: (f64, f64), radius: f64) -> Vec<usize> {
        let mut hits: AHashSet<usize> = AHashSet::new();
        for seg in self
            .tree
            .locate_within_distance([point.0, point.1], radius * radius)
        {
            hits.insert(seg.route_idx);
        }
        let mut out: Vec<usize> = hits.into_iter().collect();
        out.sort_unstable();
        out
    }
}

/// Extract the chord endpoints of the portion of `route` lying within
/// `radius` of `link`: the first and the last route position (in part and
/// vertex order) inside the link's buffer. This mirrors dissolving the
/// buffer-clipped route segments and taking the end points of the result.
pub fn route_subsegment_chord_within(
    link: &LineString<f64>,
    route: &RouteFeature,
    radius: f64,
) -> Option<((f64, f64), (f64, f64))> {
    let mut first: Option<(f64, f64)> = None;
    let mut last: Option<(f64, f64)> = None;

    let mut consider = |pt: (f64, f64)| {
        if geometry::point_to_polyline_distance(pt, link) <= radius {
            if first.is_none() {
                first = Some(pt);
            }
            last = Some(pt);
        }
    };

    for part in &route.parts {
        for w in part.line.0.windows(2) {
            let a = w[0].x_y();
            let b = w[1].x_y();
            consider(a);

            // Sample between vertices so long segments that dip in and out
            // of the buffer still register their extremes.
            if radius > 0.0 {
                let seg_len = geometry::distance(a, b);
                let steps = ((seg_len / (radius / 2.0)).ceil() as usize).clamp(1, 10_000);
                for i in 1..steps {
                    let t = i as f64 / steps as f64;
                    consider((a.0 + t * (b.0 - a.0), a.1 + t * (b.1 - a.1)));
                }
            }
        }
        if let Some(end) = part.line.0.last() {
            consider(end.x_y());
        }
    }

    match (first, last) {
        (Some(f), Some(l)) if f != l => Some((f, l)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RoutePart;

    fn route(id: &str, coords: Vec<(f64, f64)>) -> RouteFeature {
        RouteFeature {
            route_id: id.to_owned(),
            parts: vec![RoutePart::from_line_with_length_measures(
                LineString::from(coords),
                0.0,
            )],
            route_name: None,
            county_id: None,
            from_date: None,
            to_date: None,
        }
    }

    #[test]
    fn test_routes_within_radius() {
        let r1 = route("R1", vec![(0.0, 5.0), (100.0, 5.0)]);
        let r2 = route("R2", vec![(0.0, 50.0), (100.0, 50.0)]);
        let routes: Vec<&RouteFeature> = vec![&r1, &r2];
        let index = RouteIndex::build(&routes);

        let link = LineString::from(vec![(10.0, 0.0), (90.0, 0.0)]);
        assert_eq!(index.routes_within(&link, 10.0), vec![0]);
        assert_eq!(index.routes_within(&link, 60.0), vec![0, 1]);
        assert!(index.routes_within(&link, 1.0).is_empty());
    }

    #[test]
    fn test_routes_within_point() {
        let r1 = route("R1", vec![(0.0, 0.0), (100.0, 0.0)]);
        let routes: Vec<&RouteFeature> = vec![&r1];
        let index = RouteIndex::build(&routes);

        assert_eq!(index.routes_within_point((50.0, 3.0), 5.0), vec![0]);
        assert!(index.routes_within_point((50.0, 30.0), 5.0).is_empty());
    }

    #[test]
    fn test_subsegment_chord() {
        // Route runs past the link on both sides; only the middle stretch is
        // inside the buffer.
        let r = route("R1", vec![(-100.0, 2.0), (100.0, 2.0)]);
        let link = LineString::from(vec![(0.0, 0.0), (50.0, 0.0)]);

        let (start, end) = route_subsegment_chord_within(&link, &r, 5.0).unwrap();
        assert!(start.0 < end.0);
        // Chord endpoints sit near the buffer limits around the link extent.
        assert!(start.0 > -10.0 && start.0 < 1.0);
        assert!(end.0 > 49.0 && end.0 < 60.0);
    }

    #[test]
    fn test_subsegment_chord_outside_buffer() {
        let r = route("R1", vec![(0.0, 50.0), (100.0, 50.0)]);
        let link = LineString::from(vec![(0.0, 0.0), (50.0, 0.0)]);
        assert!(route_subsegment_chord_within(&link, &r, 5.0).is_none());
    }
}
