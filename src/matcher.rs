// Match candidate generation: pair source links with target routes by
// proximity, screen the pairs by chord angle, then propagate one-to-one
// match knowledge into the ambiguous cases.

use crate::error::RunDiagnostics;
use crate::geometry;
use crate::model::{Confidence, LinkFeature, MatchCandidate, RouteFeature};
use crate::spatial::{RouteIndex, route_subsegment_chord_within};
use ahash::{AHashMap, AHashSet};
use chrono::NaiveDateTime;
use rayon::prelude::*;

/// Matching parameters for one run.
#[derive(Debug, Clone)]
pub struct MatchConfig {
    /// Candidate search radius around each link, in map units.
    pub search_radius: f64,
    /// Maximum chord angle (degrees, 0-90) for a pair to count as a match.
    pub angle_tolerance: f64,
    /// Run timestamp for route validity filtering. None disables filtering.
    pub as_of: Option<NaiveDateTime>,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            search_radius: 50.0,
            angle_tolerance: 30.0,
            as_of: None,
        }
    }
}

pub struct MatchOutcome {
    pub candidates: Vec<MatchCandidate>,
    pub diagnostics: RunDiagnostics,
}

struct RawCandidate {
    route_idx: usize,
    angle: Option<f64>,
}

/// Generate the link/route match candidate table.
///
/// Every link produces at least one row: either its surviving candidate
/// pairings, or a single NoMatch row with a null route id.
pub fn generate_match_candidates(
    links: &[LinkFeature],
    routes: &[RouteFeature],
    config: &MatchConfig,
) -> MatchOutcome {
    let active: Vec<&RouteFeature> = routes
        .iter()
        .filter(|r| r.is_active_at(config.as_of))
        .collect();
    let index = RouteIndex::build(&active);

    // Per-link candidate scan. Each worker owns its diagnostics; they are
    // merged once the parallel section is done.
    let per_link: Vec<(Vec<RawCandidate>, RunDiagnostics)> = links
        .par_iter()
        .map(|link| scan_link(link, &index, config))
        .collect();

    let mut diagnostics = RunDiagnostics::new();
    let mut candidates = Vec::new();

    for (link, (raw, link_diags)) in links.iter().zip(per_link) {
        diagnostics.merge(link_diags);

        if raw.is_empty() {
            candidates.push(MatchCandidate::no_match(link, 0));
            continue;
        }

        let frequency = raw.len() as u32;
        let good: Vec<&RawCandidate> = raw
            .iter()
            .filter(|c| c.angle.is_some_and(|a| a <= config.angle_tolerance))
            .collect();

        // Every candidate failed the angle screen: one NoMatch row for the
        // link, the bad pairings themselves are not emitted.
        if good.is_empty() {
            candidates.push(MatchCandidate::no_match(link, frequency));
            continue;
        }

        let confidence = if frequency == 1 {
            Confidence::High
        } else {
            Confidence::Low
        };

        for raw_candidate in good {
            let route = index.route(raw_candidate.route_idx);
            candidates.push(MatchCandidate {
                link_id: link.link_id.clone(),
                route_id: Some(route.route_id.clone()),
                route_name: route.route_name.clone(),
                route_county_id: route.county_id.clone(),
                street_name: link.street_name.clone(),
                link_county_id: link.county_id.clone(),
                angle: raw_candidate.angle,
                frequency,
                confidence,
                verified: false,
                rejected: false,
            });
        }
    }

    apply_match_knowledge(&mut candidates);

    MatchOutcome {
        candidates,
        diagnostics,
    }
}

fn scan_link(
    link: &LinkFeature,
    index: &RouteIndex,
    config: &MatchConfig,
) -> (Vec<RawCandidate>, RunDiagnostics) {
    let mut diags = RunDiagnostics::new();

    if link.geometry.0.len() < 2 {
        diags.skip(
            Some(&link.link_id),
            None,
            "link geometry is missing or degenerate",
        );
        return (Vec::new(), diags);
    }

    let link_chord = geometry::chord_vector(&link.geometry);
    if link_chord.is_none() {
        // Closed-loop link: no usable chord, all pairings will screen bad.
        diags.skip(
            Some(&link.link_id),
            None,
            "link chord has zero length, angle cannot be computed",
        );
    }

    let raw = index
        .routes_within(&link.geometry, config.search_radius)
        .into_iter()
        .map(|route_idx| {
            let route = index.route(route_idx);
            let angle = link_chord.and_then(|link_vector| {
                let (seg_start, seg_end) =
                    route_subsegment_chord_within(&link.geometry, route, config.search_radius)?;
                let seg_vector = (seg_start.0 - seg_end.0, seg_start.1 - seg_end.1);
                geometry::angle_between_two_vectors(link_vector, seg_vector)
                    .map(geometry::fold_undirected)
            });
            if angle.is_none() {
                log::debug!(
                    "no angle for link '{}' and route '{}', pair screens as bad",
                    link.link_id,
                    route.route_id
                );
            }
            RawCandidate { route_idx, angle }
        })
        .collect();

    (raw, diags)
}

fn source_group_key(candidate: &MatchCandidate) -> String {
    format!(
        "{}-{}",
        candidate.link_county_id.as_deref().unwrap_or(""),
        candidate.street_name.as_deref().unwrap_or("")
    )
}

fn target_group_key(candidate: &MatchCandidate) -> String {
    format!(
        "{}-{}",
        candidate.route_county_id.as_deref().unwrap_or(""),
        candidate.route_name.as_deref().unwrap_or("")
    )
}

/// Disambiguation pass over a candidate table.
///
/// A Low pair whose link has exactly one surviving row is upgraded to High.
/// Remaining Low pairs whose county/name group key is already associated with
/// their target group key among High pairs are upgraded to Medium. Running
/// the pass again changes nothing; the return value is the number of rows
/// upgraded.
pub fn apply_match_knowledge(candidates: &mut [MatchCandidate]) -> usize {
    let mut rows_per_link: AHashMap<&str, u32> = AHashMap::new();
    for c in candidates.iter() {
        *rows_per_link.entry(c.link_id.as_str()).or_insert(0) += 1;
    }
    let single_row_links: AHashSet<String> = rows_per_link
        .iter()
        .filter(|&(_, &n)| n == 1)
        .map(|(link, _)| (*link).to_owned())
        .collect();

    let mut upgraded = 0;

    for c in candidates.iter_mut() {
        if c.confidence == Confidence::Low && single_row_links.contains(&c.link_id) {
            c.confidence = Confidence::High;
            upgraded += 1;
        }
    }

    let mut knowledge: AHashMap<String, AHashSet<String>> = AHashMap::new();
    for c in candidates.iter() {
        if c.confidence == Confidence::High {
            knowledge
                .entry(target_group_key(c))
                .or_default()
                .insert(source_group_key(c));
        }
    }

    for c in candidates.iter_mut() {
        if c.confidence != Confidence::Low {
            continue;
        }
        let target_key = target_group_key(c);
        if knowledge
            .get(&target_key)
            .is_some_and(|sources| sources.contains(&source_group_key(c)))
        {
            c.confidence = Confidence::Medium;
            upgraded += 1;
        }
    }

    upgraded
}
