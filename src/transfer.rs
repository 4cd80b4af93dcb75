// Event attribute transfer between the two networks, in both directions.
// Only events whose origin participates in a valid crosswalk pairing are
// transferred; everything else is dropped and counted.

use crate::crosswalk::adjust_measure;
use crate::error::RunDiagnostics;
use crate::model::{CrosswalkEntry, LinearEvent, LinkKeyedEvent, RouteMeasureProfile};
use crate::round_measure;
use ahash::AHashMap;
use chrono::NaiveDateTime;

pub struct TransferOutcome {
    pub events: Vec<LinearEvent>,
    /// Events whose origin route or link had no valid crosswalk pairing.
    pub dropped: usize,
    pub diagnostics: RunDiagnostics,
}

/// Translate target-network events onto the paired source routes.
///
/// Each event keeps its route id (the pairing is by shared route id) and its
/// attribute payload; the measures are rescaled from the target measure
/// system into the source one. Point events rescale their single measure the
/// same way line events rescale both.
pub fn transfer_events_to_source(
    events: &[LinearEvent],
    target_profiles: &AHashMap<String, RouteMeasureProfile>,
    source_profiles: &AHashMap<String, RouteMeasureProfile>,
    as_of: Option<NaiveDateTime>,
) -> TransferOutcome {
    let mut diagnostics = RunDiagnostics::new();
    let mut out = Vec::new();
    let mut dropped = 0;

    for event in events {
        if !event.is_active_at(as_of) {
            dropped += 1;
            continue;
        }

        let pair = target_profiles
            .get(&event.route_id)
            .zip(source_profiles.get(&event.route_id));
        let Some((target, source)) = pair else {
            dropped += 1;
            diagnostics.skip(
                None,
                Some(&event.route_id),
                "event route has no matched route pair",
            );
            continue;
        };
        if target.is_degenerate() || source.is_degenerate() {
            dropped += 1;
            diagnostics.skip(
                None,
                Some(&event.route_id),
                "route pair has a zero length or an empty measure range",
            );
            continue;
        }

        out.push(LinearEvent {
            route_id: event.route_id.clone(),
            from_measure: round_measure(adjust_measure(event.from_measure, target, source)),
            to_measure: event
                .to_measure
                .map(|m| round_measure(adjust_measure(m, target, source))),
            from_date: event.from_date,
            to_date: event.to_date,
            attributes: event.attributes.clone(),
        });
    }

    TransferOutcome {
        events: out,
        dropped,
        diagnostics,
    }
}

/// Translate source-network link events onto target routes through the
/// crosswalk: each event joins its link's XREF entry and takes over the
/// entry's route id and adjusted extent.
pub fn transfer_events_to_target(
    events: &[LinkKeyedEvent],
    crosswalk: &[CrosswalkEntry],
) -> TransferOutcome {
    let mut entries_by_link: AHashMap<&str, Vec<&CrosswalkEntry>> = AHashMap::new();
    for entry in crosswalk {
        entries_by_link
            .entry(entry.link_id.as_str())
            .or_default()
            .push(entry);
    }

    let mut diagnostics = RunDiagnostics::new();
    let mut out = Vec::new();
    let mut dropped = 0;

    for event in events {
        let Some(entries) = entries_by_link.get(event.link_id.as_str()) else {
            dropped += 1;
            diagnostics.skip(
                Some(&event.link_id),
                None,
                "link has no crosswalk entry, event not transferred",
            );
            continue;
        };
        for entry in entries {
            out.push(LinearEvent {
                route_id: entry.route_id.clone(),
                from_measure: entry.adjusted_from_measure,
                to_measure: Some(entry.adjusted_to_measure),
                from_date: None,
                to_date: None,
                attributes: event.attributes.clone(),
            });
        }
    }

    TransferOutcome {
        events: out,
        dropped,
        diagnostics,
    }
}
