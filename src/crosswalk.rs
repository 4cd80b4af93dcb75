// Measure crosswalk (XREF) builder: per matched route pair, a proportional
// affine rescaling between the two networks' measure systems.

use crate::error::RunDiagnostics;
use crate::model::{CrosswalkEntry, LocatedLink, RouteFeature, RouteMeasureProfile};
use crate::round_measure;
use ahash::AHashMap;
use chrono::NaiveDateTime;

/// Rescale a measure from the origin route's measure system into the
/// destination route's.
///
/// Assumes both routes traverse the same physical extent end to end and
/// that measure is linear in distance along each route. Route pairing
/// correctness is the caller's responsibility; both profiles must be
/// non-degenerate.
pub fn adjust_measure(
    measure: f64,
    origin: &RouteMeasureProfile,
    destination: &RouteMeasureProfile,
) -> f64 {
    let length_ratio = origin.length / destination.length;
    let origin_measure_ratio = origin.measure_length_ratio();
    let destination_measure_ratio = destination.measure_length_ratio();
    (measure - origin.m_min) / origin_measure_ratio / length_ratio * destination_measure_ratio
        + destination.m_min
}

/// Summarize active routes into measure profiles keyed by route id.
pub fn measure_profiles(
    routes: &[RouteFeature],
    as_of: Option<NaiveDateTime>,
) -> AHashMap<String, RouteMeasureProfile> {
    routes
        .iter()
        .filter(|r| r.is_active_at(as_of))
        .filter_map(|r| Some((r.route_id.clone(), r.measure_profile()?)))
        .collect()
}

pub struct CrosswalkOutcome {
    pub entries: Vec<CrosswalkEntry>,
    pub diagnostics: RunDiagnostics,
}

/// Build one XREF record per located link extent, translating the extent
/// from the source route's measure system into the target route's.
///
/// Degenerate route pairs (zero length or collapsed measure range) are
/// rejected here, before the transform, so the rescaling ratios are always
/// defined.
pub fn build_crosswalk(
    link_events: &[LocatedLink],
    source_profiles: &AHashMap<String, RouteMeasureProfile>,
    target_profiles: &AHashMap<String, RouteMeasureProfile>,
) -> CrosswalkOutcome {
    let mut diagnostics = RunDiagnostics::new();
    let mut entries = Vec::new();

    for event in link_events {
        let Some(source) = source_profiles.get(&event.route_id) else {
            diagnostics.skip(
                Some(&event.link_id),
                Some(&event.route_id),
                "source route has invalid geometry",
            );
            continue;
        };
        let Some(target) = target_profiles.get(&event.route_id) else {
            diagnostics.skip(
                Some(&event.link_id),
                Some(&event.route_id),
                "target route has invalid geometry",
            );
            continue;
        };
        if source.is_degenerate() || target.is_degenerate() {
            diagnostics.skip(
                Some(&event.link_id),
                Some(&event.route_id),
                "route pair has a zero length or an empty measure range",
            );
            continue;
        }

        entries.push(CrosswalkEntry {
            link_id: event.link_id.clone(),
            route_id: event.route_id.clone(),
            adjusted_from_measure: round_measure(adjust_measure(
                event.from_measure,
                source,
                target,
            )),
            adjusted_to_measure: round_measure(adjust_measure(event.to_measure, source, target)),
        });
    }

    CrosswalkOutcome {
        entries,
        diagnostics,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(length: f64, m_min: f64, m_max: f64) -> RouteMeasureProfile {
        RouteMeasureProfile {
            length,
            m_min,
            m_max,
        }
    }

    fn located(link: &str, route: &str, from: f64, to: f64) -> LocatedLink {
        LocatedLink {
            link_id: link.to_owned(),
            route_id: route.to_owned(),
            from_measure: from,
            to_measure: to,
        }
    }

    #[test]
    fn test_proportional_rescaling() {
        // Source: length 10, measures [0, 10]. Target: length 20,
        // measures [0, 100]. Extent [2, 4] maps to [20, 40].
        let source = profile(10.0, 0.0, 10.0);
        let target = profile(20.0, 0.0, 100.0);

        let mut sources = AHashMap::new();
        sources.insert("R1".to_owned(), source);
        let mut targets = AHashMap::new();
        targets.insert("R1".to_owned(), target);

        let outcome = build_crosswalk(&[located("L1", "R1", 2.0, 4.0)], &sources, &targets);
        assert_eq!(outcome.entries.len(), 1);
        let entry = &outcome.entries[0];
        assert_eq!(entry.adjusted_from_measure, 20.0);
        assert_eq!(entry.adjusted_to_measure, 40.0);
    }

    #[test]
    fn test_offset_measure_ranges() {
        // Non-zero measure origins on both sides.
        let source = profile(10.0, 100.0, 110.0);
        let target = profile(10.0, 50.0, 60.0);

        let adjusted = adjust_measure(105.0, &source, &target);
        assert!((adjusted - 55.0).abs() < 1e-9);
    }

    #[test]
    fn test_round_trip_within_rounding() {
        let source = profile(12.7, 3.0, 9.35);
        let target = profile(31.4, 0.0, 250.0);

        for measure in [3.0, 4.2, 7.77, 9.35] {
            let there = adjust_measure(measure, &source, &target);
            let back = adjust_measure(there, &target, &source);
            assert!((back - measure).abs() < 1e-9);

            // With table rounding applied in both directions the error stays
            // within rounding tolerance.
            let back_rounded =
                crate::round_measure(adjust_measure(crate::round_measure(there), &target, &source));
            assert!((back_rounded - measure).abs() < 2e-3);
        }
    }

    #[test]
    fn test_degenerate_pairs_are_rejected() {
        let mut sources = AHashMap::new();
        sources.insert("R1".to_owned(), profile(10.0, 0.0, 10.0));
        sources.insert("R2".to_owned(), profile(0.0, 0.0, 10.0));
        let mut targets = AHashMap::new();
        targets.insert("R1".to_owned(), profile(10.0, 5.0, 5.0));
        targets.insert("R2".to_owned(), profile(10.0, 0.0, 10.0));

        let events = vec![
            located("L1", "R1", 0.0, 1.0), // degenerate target range
            located("L2", "R2", 0.0, 1.0), // zero-length source
            located("L3", "R9", 0.0, 1.0), // unknown route
        ];
        let outcome = build_crosswalk(&events, &sources, &targets);
        assert!(outcome.entries.is_empty());
        assert_eq!(outcome.diagnostics.skipped_count(), 3);
    }
}
