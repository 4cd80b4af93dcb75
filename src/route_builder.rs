// Assemble target-network routes from accepted match candidates and
// validate the results for gaps and measure monotonicity. This stage is a
// pure filter: flagged routes are excluded or passed through, never
// repaired.

use crate::error::{ConflationError, RunDiagnostics};
use crate::geometry;
use crate::model::{
    Confidence, LinkFeature, MatchCandidate, RouteFeature, RoutePart, RouteValidationResult,
};
use ahash::AHashMap;
use geo_types::{Coord, LineString};
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
pub struct RouteBuildConfig {
    /// Maximum endpoint separation for two links to be considered
    /// end-to-end continuous, in map units.
    pub connect_tolerance: f64,
    pub check_gaps: bool,
    pub check_monotonicity: bool,
    /// Exclude routes flagged with a gap from the output.
    pub only_continuous: bool,
    /// Exclude non-monotonic routes from the output.
    pub only_monotonic: bool,
}

impl Default for RouteBuildConfig {
    fn default() -> Self {
        Self {
            connect_tolerance: 0.5,
            check_gaps: true,
            check_monotonicity: true,
            only_continuous: true,
            only_monotonic: true,
        }
    }
}

pub struct BuiltRoute {
    pub route: RouteFeature,
    pub validation: RouteValidationResult,
}

pub struct RouteBuildOutcome {
    pub routes: Vec<BuiltRoute>,
    /// Validation results of routes excluded by the output filters.
    pub excluded: Vec<RouteValidationResult>,
    pub diagnostics: RunDiagnostics,
}

/// Filter a reviewed candidate table down to the rows eligible for route
/// building, enforcing the batch-level consistency rules first.
pub fn accept_candidates(
    candidates: &[MatchCandidate],
    threshold: Confidence,
) -> Result<Vec<&MatchCandidate>, ConflationError> {
    let contradictory: Vec<&str> = candidates
        .iter()
        .filter(|c| c.verified && c.rejected)
        .map(|c| c.link_id.as_str())
        .collect();
    if !contradictory.is_empty() {
        return Err(ConflationError::Consistency(format!(
            "candidate rows marked both verified and rejected for link(s): {}",
            contradictory.join(", ")
        )));
    }

    let accepted: Vec<&MatchCandidate> = candidates
        .iter()
        .filter(|c| c.confidence >= threshold && c.route_id.is_some() && !c.rejected)
        .collect();

    let mut seen: AHashMap<(&str, &str), u32> = AHashMap::new();
    for c in &accepted {
        let key = (c.link_id.as_str(), c.route_id.as_deref().unwrap_or(""));
        *seen.entry(key).or_insert(0) += 1;
    }
    let mut duplicates: Vec<String> = seen
        .iter()
        .filter(|&(_, &n)| n > 1)
        .map(|((link, route), _)| format!("({}, {})", link, route))
        .collect();
    if !duplicates.is_empty() {
        duplicates.sort();
        return Err(ConflationError::Consistency(format!(
            "duplicate match candidate rows for link/route pair(s): {}",
            duplicates.join(", ")
        )));
    }

    Ok(accepted)
}

/// Build one route per accepted route id and validate it. Candidate rows at
/// or above `threshold` participate; everything else is ignored.
pub fn build_routes(
    candidates: &[MatchCandidate],
    links: &[LinkFeature],
    threshold: Confidence,
    config: &RouteBuildConfig,
) -> Result<RouteBuildOutcome, ConflationError> {
    let accepted = accept_candidates(candidates, threshold)?;

    let links_by_id: AHashMap<&str, &LinkFeature> =
        links.iter().map(|l| (l.link_id.as_str(), l)).collect();

    let mut diagnostics = RunDiagnostics::new();

    // BTreeMap keeps route output order deterministic.
    let mut groups: BTreeMap<&str, Vec<(&MatchCandidate, &LinkFeature)>> = BTreeMap::new();
    for candidate in accepted {
        let route_id = candidate.route_id.as_deref().unwrap_or("");
        match links_by_id.get(candidate.link_id.as_str()) {
            Some(link) if link.geometry.0.len() >= 2 => {
                groups.entry(route_id).or_default().push((candidate, link));
            }
            Some(_) => diagnostics.skip(
                Some(&candidate.link_id),
                Some(route_id),
                "member link geometry is missing or degenerate",
            ),
            None => diagnostics.skip(
                Some(&candidate.link_id),
                Some(route_id),
                "accepted candidate references an unknown link",
            ),
        }
    }

    let mut routes = Vec::new();
    let mut excluded = Vec::new();

    for (route_id, members) in groups {
        let first = members[0].0;
        let route_name = first.route_name.clone();
        let county_id = first.route_county_id.clone();

        let member_links: Vec<&LinkFeature> = members.iter().map(|(_, l)| *l).collect();
        let Some(route) = assemble_route(
            route_id,
            route_name,
            county_id,
            &member_links,
            config.connect_tolerance,
            &mut diagnostics,
        ) else {
            continue;
        };

        let has_gap = config.check_gaps && route.is_multipart();
        if has_gap {
            log::info!("gap(s) detected on route '{}'", route_id);
        }
        let is_monotonic =
            !config.check_monotonicity || measures_monotonic(&route.vertex_measures());
        if !is_monotonic {
            log::info!("non-monotonic route '{}' found", route_id);
        }

        let validation = RouteValidationResult {
            route_id: route_id.to_owned(),
            has_gap,
            is_monotonic,
        };

        if (config.only_continuous && has_gap) || (config.only_monotonic && !is_monotonic) {
            excluded.push(validation);
        } else {
            routes.push(BuiltRoute { route, validation });
        }
    }

    Ok(RouteBuildOutcome {
        routes,
        excluded,
        diagnostics,
    })
}

/// A route's measure sequence is acceptable when it is non-decreasing or
/// non-increasing end to end. Equal consecutive measures are plateaus, not
/// violations.
pub fn measures_monotonic(values: &[f64]) -> bool {
    let non_decreasing = values.windows(2).all(|w| w[0] <= w[1]);
    let non_increasing = values.windows(2).all(|w| w[0] >= w[1]);
    non_decreasing || non_increasing
}

struct PendingLink {
    coords: Vec<Coord<f64>>,
    measures: Option<Vec<f64>>,
}

impl PendingLink {
    fn flip(&mut self) {
        self.coords.reverse();
        if let Some(m) = &mut self.measures {
            m.reverse();
        }
    }

    fn first(&self) -> (f64, f64) {
        self.coords[0].x_y()
    }

    fn last(&self) -> (f64, f64) {
        self.coords[self.coords.len() - 1].x_y()
    }
}

/// Chain member link geometries into one (possibly multipart) route. The
/// route starts at the link endpoint nearest the lower-left corner of the
/// member extent; each following link continues from the running end,
/// flipped as needed. A link that cannot connect within tolerance opens a
/// new part.
fn assemble_route(
    route_id: &str,
    route_name: Option<String>,
    county_id: Option<String>,
    members: &[&LinkFeature],
    connect_tolerance: f64,
    diagnostics: &mut RunDiagnostics,
) -> Option<RouteFeature> {
    if members.is_empty() {
        return None;
    }

    // Supplied measures are used only when every member carries a complete
    // vertex measure array; otherwise measures are derived from length.
    let use_supplied_measures = members
        .iter()
        .all(|l| l.measures.as_ref().is_some_and(|m| m.len() == l.geometry.0.len()));
    if !use_supplied_measures && members.iter().any(|l| l.measures.is_some()) {
        diagnostics.skip(
            None,
            Some(route_id),
            "incomplete link measures, falling back to length-derived measures",
        );
    }

    let mut pool: Vec<PendingLink> = members
        .iter()
        .map(|l| PendingLink {
            coords: l.geometry.0.clone(),
            measures: if use_supplied_measures {
                l.measures.clone()
            } else {
                None
            },
        })
        .collect();

    // Lower-left corner of the member endpoint extent.
    let corner = pool.iter().fold((f64::INFINITY, f64::INFINITY), |acc, l| {
        let (fx, fy) = l.first();
        let (lx, ly) = l.last();
        (acc.0.min(fx).min(lx), acc.1.min(fy).min(ly))
    });

    let (start_idx, start_flip) = pool
        .iter()
        .enumerate()
        .map(|(i, l)| {
            let d_first = geometry::distance(l.first(), corner);
            let d_last = geometry::distance(l.last(), corner);
            if d_last < d_first { (i, true, d_last) } else { (i, false, d_first) }
        })
        .min_by(|a, b| a.2.total_cmp(&b.2))
        .map(|(i, flip, _)| (i, flip))?;

    let mut current = pool.swap_remove(start_idx);
    if start_flip {
        current.flip();
    }

    let mut parts: Vec<PendingLink> = Vec::new();

    while !pool.is_empty() {
        let end = current.last();
        let (next_idx, next_flip, dist) = pool
            .iter()
            .enumerate()
            .map(|(i, l)| {
                let d_first = geometry::distance(end, l.first());
                let d_last = geometry::distance(end, l.last());
                if d_last < d_first { (i, true, d_last) } else { (i, false, d_first) }
            })
            .min_by(|a, b| a.2.total_cmp(&b.2))?;

        let mut next = pool.swap_remove(next_idx);
        if next_flip {
            next.flip();
        }

        if dist <= connect_tolerance {
            // Continuous: drop an exactly duplicated joint vertex.
            let skip_joint = next.coords.first() == current.coords.last();
            let from = usize::from(skip_joint);
            current.coords.extend_from_slice(&next.coords[from..]);
            if let (Some(cm), Some(nm)) = (&mut current.measures, &next.measures) {
                cm.extend_from_slice(&nm[from..]);
            }
        } else {
            parts.push(current);
            current = next;
        }
    }
    parts.push(current);

    let mut route_parts = Vec::with_capacity(parts.len());
    let mut measure_offset = 0.0;
    for pending in parts {
        let line = LineString::from(pending.coords);
        let part = match pending.measures {
            Some(measures) => RoutePart { line, measures },
            None => {
                let part = RoutePart::from_line_with_length_measures(line, measure_offset);
                measure_offset = *part.measures.last().unwrap_or(&measure_offset);
                part
            }
        };
        route_parts.push(part);
    }

    Some(RouteFeature {
        route_id: route_id.to_owned(),
        parts: route_parts,
        route_name,
        county_id,
        from_date: None,
        to_date: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo_types::LineString;

    fn link(id: &str, coords: Vec<(f64, f64)>) -> LinkFeature {
        LinkFeature {
            link_id: id.to_owned(),
            geometry: LineString::from(coords),
            street_name: None,
            county_id: None,
            measures: None,
        }
    }

    fn accepted_row(link_id: &str, route_id: &str) -> MatchCandidate {
        MatchCandidate {
            link_id: link_id.to_owned(),
            route_id: Some(route_id.to_owned()),
            route_name: None,
            route_county_id: None,
            street_name: None,
            link_county_id: None,
            angle: Some(1.0),
            frequency: 1,
            confidence: Confidence::High,
            verified: false,
            rejected: false,
        }
    }

    #[test]
    fn test_measures_monotonic() {
        assert!(measures_monotonic(&[1.0, 1.0, 2.0, 2.0, 3.0]));
        assert!(measures_monotonic(&[3.0, 2.0, 2.0, 1.0]));
        assert!(!measures_monotonic(&[1.0, 2.0, 1.0]));
        assert!(measures_monotonic(&[5.0]));
        assert!(measures_monotonic(&[]));
    }

    #[test]
    fn test_chain_shuffled_links() {
        // Links supplied out of order and with mixed digitizing direction
        // still chain into a single continuous route from the lower left.
        let links = vec![
            link("B", vec![(20.0, 0.0), (10.0, 0.0)]),
            link("C", vec![(20.0, 0.0), (30.0, 0.0)]),
            link("A", vec![(0.0, 0.0), (10.0, 0.0)]),
        ];
        let candidates = vec![
            accepted_row("A", "R1"),
            accepted_row("B", "R1"),
            accepted_row("C", "R1"),
        ];

        let outcome = build_routes(
            &candidates,
            &links,
            Confidence::Medium,
            &RouteBuildConfig::default(),
        )
        .unwrap();

        assert_eq!(outcome.routes.len(), 1);
        let built = &outcome.routes[0];
        assert!(!built.validation.has_gap);
        assert!(built.validation.is_monotonic);
        assert_eq!(built.route.parts.len(), 1);

        let part = &built.route.parts[0];
        assert_eq!(part.line.0.first().unwrap().x_y(), (0.0, 0.0));
        assert_eq!(part.line.0.last().unwrap().x_y(), (30.0, 0.0));
        assert_eq!(*part.measures.last().unwrap(), 30.0);
        assert!(measures_monotonic(&part.measures));
    }

    #[test]
    fn test_gap_flag_and_exclusion() {
        // Link 2 does not touch link 1's endpoint within tolerance.
        let links = vec![
            link("A", vec![(0.0, 0.0), (10.0, 0.0)]),
            link("B", vec![(15.0, 0.0), (25.0, 0.0)]),
            link("C", vec![(25.0, 0.0), (35.0, 0.0)]),
        ];
        let candidates = vec![
            accepted_row("A", "R1"),
            accepted_row("B", "R1"),
            accepted_row("C", "R1"),
        ];

        let strict = build_routes(
            &candidates,
            &links,
            Confidence::Medium,
            &RouteBuildConfig::default(),
        )
        .unwrap();
        assert!(strict.routes.is_empty());
        assert_eq!(strict.excluded.len(), 1);
        assert!(strict.excluded[0].has_gap);

        let lenient = build_routes(
            &candidates,
            &links,
            Confidence::Medium,
            &RouteBuildConfig {
                only_continuous: false,
                ..RouteBuildConfig::default()
            },
        )
        .unwrap();
        assert_eq!(lenient.routes.len(), 1);
        assert!(lenient.routes[0].validation.has_gap);
        assert_eq!(lenient.routes[0].route.parts.len(), 2);
    }

    #[test]
    fn test_supplied_link_measures_are_kept() {
        let links = vec![
            LinkFeature {
                measures: Some(vec![0.0, 10.0]),
                ..link("A", vec![(0.0, 0.0), (10.0, 0.0)])
            },
            LinkFeature {
                // Digitized against the chain direction.
                measures: Some(vec![20.0, 10.0]),
                ..link("B", vec![(20.0, 0.0), (10.0, 0.0)])
            },
        ];
        let candidates = vec![accepted_row("A", "R1"), accepted_row("B", "R1")];

        let outcome = build_routes(
            &candidates,
            &links,
            Confidence::Medium,
            &RouteBuildConfig::default(),
        )
        .unwrap();

        assert_eq!(outcome.routes.len(), 1);
        let part = &outcome.routes[0].route.parts[0];
        assert_eq!(part.measures, vec![0.0, 10.0, 20.0]);
    }

    #[test]
    fn test_threshold_excludes_low_rows() {
        let links = vec![link("A", vec![(0.0, 0.0), (10.0, 0.0)])];
        let mut row = accepted_row("A", "R1");
        row.confidence = Confidence::Low;

        let outcome = build_routes(
            &[row],
            &links,
            Confidence::Medium,
            &RouteBuildConfig::default(),
        )
        .unwrap();
        assert!(outcome.routes.is_empty());
        assert!(outcome.excluded.is_empty());
    }

    #[test]
    fn test_duplicate_accepted_rows_fail() {
        let candidates = vec![accepted_row("A", "R1"), accepted_row("A", "R1")];
        let err = accept_candidates(&candidates, Confidence::Medium).unwrap_err();
        assert!(matches!(err, ConflationError::Consistency(_)));
        assert!(err.to_string().contains("(A, R1)"));
    }

    #[test]
    fn test_verified_and_rejected_row_fails() {
        let mut row = accepted_row("A", "R1");
        row.verified = true;
        row.rejected = true;
        let err = accept_candidates(&[row], Confidence::Medium).unwrap_err();
        assert!(matches!(err, ConflationError::Consistency(_)));
    }

    #[test]
    fn test_rejected_rows_are_skipped() {
        let mut row = accepted_row("A", "R1");
        row.rejected = true;
        let rows = [row];
        let accepted = accept_candidates(&rows, Confidence::Medium).unwrap();
        assert!(accepted.is_empty());
    }
}
