// Linear referencing of reference features along routes: project a point
// or line feature onto a route and express it in the route's measure
// system.

use crate::error::RunDiagnostics;
use crate::geometry::{self, PolylineProjection};
use crate::model::{LinkFeature, LocatedLink, LocatedPoint, PointFeature, RouteFeature, RoutePart};
use crate::spatial::RouteIndex;
use ahash::AHashMap;

#[derive(Debug, Clone)]
pub struct LocateConfig {
    /// Maximum offset between the feature and the route, in map units.
    /// Zero restricts locating to exact overlap.
    pub tolerance: f64,
}

impl Default for LocateConfig {
    fn default() -> Self {
        Self { tolerance: 0.0 }
    }
}

pub struct LinkLocateOutcome {
    pub located: Vec<LocatedLink>,
    pub diagnostics: RunDiagnostics,
}

pub struct PointLocateOutcome {
    pub located: Vec<LocatedPoint>,
    pub diagnostics: RunDiagnostics,
}

/// Interpolate the measure value at a projected position on a route part.
pub fn measure_at(part: &RoutePart, projection: &PolylineProjection) -> f64 {
    let i = projection.segment_index;
    let m0 = part.measures[i];
    let m1 = part.measures[i + 1];
    m0 + projection.segment_fraction * (m1 - m0)
}

/// Locate each assigned (link, route) pair: project the link onto its
/// previously assigned route and express its extent in the route's measure
/// system. Pairs are independent, so a link reviewed onto several routes
/// locates once per assignment.
///
/// A link locating more than once on the same route (loop routes split into
/// parts) collapses to a single record by averaging the competing measures.
/// That averaging is a deliberate simplification for the duplicate case, not
/// a geometric resolution.
pub fn locate_links_along_routes(
    links: &[LinkFeature],
    assignments: &[(String, String)],
    routes: &[RouteFeature],
    config: &LocateConfig,
) -> LinkLocateOutcome {
    let links_by_id: AHashMap<&str, &LinkFeature> =
        links.iter().map(|l| (l.link_id.as_str(), l)).collect();
    let routes_by_id: AHashMap<&str, &RouteFeature> =
        routes.iter().map(|r| (r.route_id.as_str(), r)).collect();

    let mut diagnostics = RunDiagnostics::new();
    let mut located = Vec::new();

    for (link_id, route_id) in assignments {
        let Some(link) = links_by_id.get(link_id.as_str()) else {
            diagnostics.skip(Some(link_id), Some(route_id), "assigned link is unknown");
            continue;
        };
        let Some(route) = routes_by_id.get(route_id.as_str()) else {
            diagnostics.skip(
                Some(link_id),
                Some(route_id),
                "assigned route was not built",
            );
            continue;
        };
        let (Some(first), Some(last)) = (link.geometry.0.first(), link.geometry.0.last()) else {
            diagnostics.skip(Some(&link.link_id), Some(route_id), "link geometry is empty");
            continue;
        };

        // One extent candidate per route part both endpoints land on.
        let mut extents: Vec<(f64, f64)> = Vec::new();
        for part in &route.parts {
            let Some(p_first) = geometry::project_point_to_polyline(first.x_y(), &part.line)
            else {
                continue;
            };
            let Some(p_last) = geometry::project_point_to_polyline(last.x_y(), &part.line) else {
                continue;
            };
            if p_first.offset > config.tolerance || p_last.offset > config.tolerance {
                continue;
            }
            let m_a = measure_at(part, &p_first);
            let m_b = measure_at(part, &p_last);
            extents.push((m_a.min(m_b), m_a.max(m_b)));
        }

        match extents.len() {
            0 => diagnostics.skip(
                Some(&link.link_id),
                Some(route_id),
                "link did not locate on its assigned route within tolerance",
            ),
            1 => located.push(LocatedLink {
                link_id: link.link_id.clone(),
                route_id: route_id.clone(),
                from_measure: extents[0].0,
                to_measure: extents[0].1,
            }),
            n => {
                log::debug!(
                    "link '{}' located {} times on route '{}', averaging measures",
                    link.link_id,
                    n,
                    route_id
                );
                let count = n as f64;
                let from = extents.iter().map(|e| e.0).sum::<f64>() / count;
                let to = extents.iter().map(|e| e.1).sum::<f64>() / count;
                located.push(LocatedLink {
                    link_id: link.link_id.clone(),
                    route_id: route_id.clone(),
                    from_measure: from,
                    to_measure: to,
                });
            }
        }
    }

    LinkLocateOutcome {
        located,
        diagnostics,
    }
}

/// Locate point features along nearby routes. When `assignments` is given,
/// only the locate on the feature's assigned route is retained; accidental
/// proximity matches on other routes are discarded. Duplicate locates on one
/// route collapse to the average measure.
pub fn locate_points_along_routes(
    points: &[PointFeature],
    routes: &[RouteFeature],
    assignments: Option<&AHashMap<String, String>>,
    config: &LocateConfig,
) -> PointLocateOutcome {
    let route_refs: Vec<&RouteFeature> = routes.iter().collect();
    let index = RouteIndex::build(&route_refs);

    let mut diagnostics = RunDiagnostics::new();
    let mut located = Vec::new();

    for point in points {
        let assigned = assignments.and_then(|a| a.get(&point.point_id));

        let mut any = false;
        for route_idx in index.routes_within_point(point.point.x_y(), config.tolerance) {
            let route = index.route(route_idx);
            if assigned.is_some_and(|rid| rid != &route.route_id) {
                continue;
            }

            let measures = locate_point_on_route(point.point.x_y(), route, config.tolerance);
            if measures.is_empty() {
                continue;
            }
            any = true;

            let measure = measures.iter().sum::<f64>() / measures.len() as f64;
            if measures.len() > 1 {
                log::debug!(
                    "point '{}' located {} times on route '{}', averaging measures",
                    point.point_id,
                    measures.len(),
                    route.route_id
                );
            }
            located.push(LocatedPoint {
                point_id: point.point_id.clone(),
                route_id: route.route_id.clone(),
                measure,
            });
        }

        if !any {
            diagnostics.skip(
                Some(&point.point_id),
                None,
                "point did not locate on any route within tolerance",
            );
        }
    }

    PointLocateOutcome {
        located,
        diagnostics,
    }
}

/// All in-tolerance measures of a point on a route, one per part it lands
/// on. Callers decide whether to collapse them.
pub fn locate_point_on_route(
    point: (f64, f64),
    route: &RouteFeature,
    tolerance: f64,
) -> Vec<f64> {
    route
        .parts
        .iter()
        .filter_map(|part| {
            let projection = geometry::project_point_to_polyline(point, &part.line)?;
            (projection.offset <= tolerance).then(|| measure_at(part, &projection))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo_types::{LineString, Point};

    fn link(id: &str, coords: Vec<(f64, f64)>) -> LinkFeature {
        LinkFeature {
            link_id: id.to_owned(),
            geometry: LineString::from(coords),
            street_name: None,
            county_id: None,
            measures: None,
        }
    }

    fn route(id: &str, parts: Vec<Vec<(f64, f64)>>) -> RouteFeature {
        let mut offset = 0.0;
        let parts = parts
            .into_iter()
            .map(|coords| {
                let part =
                    RoutePart::from_line_with_length_measures(LineString::from(coords), offset);
                offset = *part.measures.last().unwrap();
                part
            })
            .collect();
        RouteFeature {
            route_id: id.to_owned(),
            parts,
            route_name: None,
            county_id: None,
            from_date: None,
            to_date: None,
        }
    }

    fn assignments(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(a, b)| ((*a).to_owned(), (*b).to_owned()))
            .collect()
    }

    fn point_assignments(pairs: &[(&str, &str)]) -> AHashMap<String, String> {
        pairs
            .iter()
            .map(|(a, b)| ((*a).to_owned(), (*b).to_owned()))
            .collect()
    }

    #[test]
    fn test_link_extent_on_route() {
        let r = route("R1", vec![vec![(0.0, 0.0), (30.0, 0.0)]]);
        // Link digitized against the route direction still yields an
        // ordered extent.
        let l = link("A", vec![(20.0, 0.0), (10.0, 0.0)]);

        let outcome = locate_links_along_routes(
            &[l],
            &assignments(&[("A", "R1")]),
            &[r],
            &LocateConfig { tolerance: 0.1 },
        );

        assert_eq!(outcome.located.len(), 1);
        let rec = &outcome.located[0];
        assert_eq!(rec.route_id, "R1");
        assert!((rec.from_measure - 10.0).abs() < 1e-9);
        assert!((rec.to_measure - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_assigned_route_filter_discards_other_locates() {
        let near = route("R1", vec![vec![(0.0, 0.0), (30.0, 0.0)]]);
        let l = link("A", vec![(5.0, 0.0), (15.0, 0.0)]);

        // The link physically sits on R1 but review assigned it to R2.
        let outcome = locate_links_along_routes(
            &[l],
            &assignments(&[("A", "R2")]),
            &[near],
            &LocateConfig { tolerance: 0.1 },
        );

        assert!(outcome.located.is_empty());
        assert_eq!(outcome.diagnostics.skipped_count(), 1);
    }

    #[test]
    fn test_duplicate_locates_collapse_to_average() {
        // Two parallel parts of the same route both within tolerance: the
        // competing extents are averaged into a single record.
        let r = route(
            "R1",
            vec![
                vec![(0.0, 0.0), (30.0, 0.0)],
                vec![(30.0, 1.0), (0.0, 1.0)],
            ],
        );
        let l = link("A", vec![(10.0, 0.5), (20.0, 0.5)]);

        let outcome = locate_links_along_routes(
            &[l],
            &assignments(&[("A", "R1")]),
            &[r],
            &LocateConfig { tolerance: 1.0 },
        );

        assert_eq!(outcome.located.len(), 1);
        let rec = &outcome.located[0];
        // Part one extent: [10, 20]; part two (reversed, offset 30): [40, 50].
        assert!((rec.from_measure - 25.0).abs() < 1e-9);
        assert!((rec.to_measure - 35.0).abs() < 1e-9);
    }

    #[test]
    fn test_point_locate_with_assignment() {
        let r1 = route("R1", vec![vec![(0.0, 0.0), (30.0, 0.0)]]);
        let r2 = route("R2", vec![vec![(0.0, 2.0), (30.0, 2.0)]]);
        let p = PointFeature {
            point_id: "N1".to_owned(),
            point: Point::new(12.0, 1.0),
        };

        let all = locate_points_along_routes(
            std::slice::from_ref(&p),
            &[r1.clone(), r2.clone()],
            None,
            &LocateConfig { tolerance: 2.0 },
        );
        assert_eq!(all.located.len(), 2);

        let filtered = locate_points_along_routes(
            &[p],
            &[r1, r2],
            Some(&point_assignments(&[("N1", "R2")])),
            &LocateConfig { tolerance: 2.0 },
        );
        assert_eq!(filtered.located.len(), 1);
        assert_eq!(filtered.located[0].route_id, "R2");
        assert!((filtered.located[0].measure - 12.0).abs() < 1e-9);
    }
}
