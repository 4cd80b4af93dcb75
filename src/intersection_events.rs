// Intersection/route event rows: for every intersection point, which route
// it lies ON, which route it meets AT, and the measure along the on-route.

use crate::error::RunDiagnostics;
use crate::locator::locate_point_on_route;
use crate::model::{IntersectionRouteEvent, PointFeature, RouteFeature};
use crate::round_to;
use crate::spatial::RouteIndex;
use ahash::AHashMap;
use itertools::Itertools;

#[derive(Debug, Clone)]
pub struct IntersectionConfig {
    /// Search radius around each intersection, in map units.
    pub search_radius: f64,
    /// Decimal places for the emitted measures.
    pub measure_scale: u32,
}

impl Default for IntersectionConfig {
    fn default() -> Self {
        Self {
            search_radius: 0.5,
            measure_scale: 3,
        }
    }
}

pub struct IntersectionOutcome {
    pub events: Vec<IntersectionRouteEvent>,
    pub diagnostics: RunDiagnostics,
}

/// Emit intersection/route event rows for every intersection point.
///
/// An intersection belonging to a single route gets the on/at self-pair
/// (the loop-route case); an intersection shared by several routes gets all
/// ordered route pairs. A route the intersection could not be measured on
/// contributes rows with a null measure. The single- versus multi-route
/// split is intentionally kept as two distinct cases.
pub fn build_intersection_route_events(
    intersections: &[PointFeature],
    routes: &[RouteFeature],
    config: &IntersectionConfig,
) -> IntersectionOutcome {
    let route_refs: Vec<&RouteFeature> = routes.iter().collect();
    let index = RouteIndex::build(&route_refs);

    let mut diagnostics = RunDiagnostics::new();
    let mut events = Vec::new();

    for intersection in intersections {
        let membership = index.routes_within_point(intersection.point.x_y(), config.search_radius);
        if membership.is_empty() {
            diagnostics.skip(
                Some(&intersection.point_id),
                None,
                "intersection is not on any route within the search radius",
            );
            continue;
        }

        // Measures per member route, one entry per locate (loop routes can
        // locate more than once).
        let mut measures_by_route: AHashMap<usize, Vec<f64>> = AHashMap::new();
        for &route_idx in &membership {
            let measures: Vec<f64> = locate_point_on_route(
                intersection.point.x_y(),
                index.route(route_idx),
                config.search_radius,
            )
            .into_iter()
            .map(|m| round_to(m, config.measure_scale))
            .collect();
            if !measures.is_empty() {
                measures_by_route.insert(route_idx, measures);
            }
        }

        if membership.len() == 1 {
            // Loop route: the intersection sits on and at the same route.
            let on = membership[0];
            let on_route_id = &index.route(on).route_id;
            match measures_by_route.get(&on) {
                Some(measures) => {
                    for &measure in measures {
                        events.push(IntersectionRouteEvent {
                            intersection_id: intersection.point_id.clone(),
                            on_route_id: on_route_id.clone(),
                            at_route_id: on_route_id.clone(),
                            measure: Some(measure),
                        });
                    }
                }
                None => events.push(IntersectionRouteEvent {
                    intersection_id: intersection.point_id.clone(),
                    on_route_id: on_route_id.clone(),
                    at_route_id: on_route_id.clone(),
                    measure: None,
                }),
            }
        } else {
            for pair in membership.iter().permutations(2) {
                let (on, at) = (*pair[0], *pair[1]);
                let on_route_id = &index.route(on).route_id;
                let at_route_id = &index.route(at).route_id;
                match measures_by_route.get(&on) {
                    Some(measures) => {
                        for &measure in measures {
                            events.push(IntersectionRouteEvent {
                                intersection_id: intersection.point_id.clone(),
                                on_route_id: on_route_id.clone(),
                                at_route_id: at_route_id.clone(),
                                measure: Some(measure),
                            });
                        }
                    }
                    None => events.push(IntersectionRouteEvent {
                        intersection_id: intersection.point_id.clone(),
                        on_route_id: on_route_id.clone(),
                        at_route_id: at_route_id.clone(),
                        measure: None,
                    }),
                }
            }
        }
    }

    IntersectionOutcome {
        events,
        diagnostics,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RoutePart;
    use geo_types::{LineString, Point};

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

    fn intersection(id: &str, x: f64, y: f64) -> PointFeature {
        PointFeature {
            point_id: id.to_owned(),
            point: Point::new(x, y),
        }
    }

    #[test]
    fn test_single_route_membership_yields_self_pair() {
        let r1 = route("R1", vec![vec![(0.0, 0.0), (100.0, 0.0)]]);
        let outcome = build_intersection_route_events(
            &[intersection("I1", 40.0, 0.0)],
            &[r1],
            &IntersectionConfig::default(),
        );

        assert_eq!(outcome.events.len(), 1);
        let row = &outcome.events[0];
        assert_eq!(row.on_route_id, "R1");
        assert_eq!(row.at_route_id, "R1");
        assert_eq!(row.measure, Some(40.0));
    }

    #[test]
    fn test_loop_route_emits_one_self_pair_per_locate() {
        // Both passes of the loop run through the intersection.
        let loop_route = route(
            "R1",
            vec![
                vec![(0.0, 0.0), (100.0, 0.0)],
                vec![(100.0, 0.3), (0.0, 0.3)],
            ],
        );
        let outcome = build_intersection_route_events(
            &[intersection("I1", 50.0, 0.1)],
            &[loop_route],
            &IntersectionConfig::default(),
        );

        assert_eq!(outcome.events.len(), 2);
        let measures: Vec<Option<f64>> = outcome.events.iter().map(|e| e.measure).collect();
        assert!(measures.contains(&Some(50.0)));
        assert!(measures.contains(&Some(150.0)));
        for row in &outcome.events {
            assert_eq!(row.on_route_id, row.at_route_id);
        }
    }

    #[test]
    fn test_crossing_routes_emit_ordered_pairs() {
        let r1 = route("R1", vec![vec![(0.0, 0.0), (100.0, 0.0)]]);
        let r2 = route("R2", vec![vec![(50.0, -50.0), (50.0, 50.0)]]);
        let outcome = build_intersection_route_events(
            &[intersection("I1", 50.0, 0.0)],
            &[r1, r2],
            &IntersectionConfig::default(),
        );

        // Two ordered pairs, one row each (single locate per route).
        assert_eq!(outcome.events.len(), 2);
        let on_at: Vec<(&str, &str)> = outcome
            .events
            .iter()
            .map(|e| (e.on_route_id.as_str(), e.at_route_id.as_str()))
            .collect();
        assert!(on_at.contains(&("R1", "R2")));
        assert!(on_at.contains(&("R2", "R1")));

        let r1_row = outcome
            .events
            .iter()
            .find(|e| e.on_route_id == "R1")
            .unwrap();
        assert_eq!(r1_row.measure, Some(50.0));
        let r2_row = outcome
            .events
            .iter()
            .find(|e| e.on_route_id == "R2")
            .unwrap();
        assert_eq!(r2_row.measure, Some(50.0));
    }

    #[test]
    fn test_isolated_intersection_is_skipped() {
        let r1 = route("R1", vec![vec![(0.0, 0.0), (100.0, 0.0)]]);
        let outcome = build_intersection_route_events(
            &[intersection("I1", 50.0, 500.0)],
            &[r1],
            &IntersectionConfig::default(),
        );
        assert!(outcome.events.is_empty());
        assert_eq!(outcome.diagnostics.skipped_count(), 1);
    }
}
