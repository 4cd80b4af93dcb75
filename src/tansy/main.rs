// Copyright: Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Removal of the attribution is not allowed, as covered under the AGPL license

// tansy: CLI around the linear conflation pipeline. One subcommand per
// stage, matching the five geoprocessing tools of the workflow.

use anyhow::Result;
use clap::{Parser, Subcommand};
use conflation::crosswalk;
use conflation::intersection_events::{self, IntersectionConfig};
use conflation::io;
use conflation::locator::{self, LocateConfig};
use conflation::matcher::{self, MatchConfig};
use conflation::model::Confidence;
use conflation::route_builder::{self, RouteBuildConfig};
use conflation::transfer;
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Run timestamp for validity filtering (YYYY-MM-DD HH:MM:SS).
    /// Defaults to the current time.
    #[arg(long, global = true)]
    as_of: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate the link/route match candidate table.
    MatchCandidates {
        /// Source link features (GeoJSON).
        #[arg(long)]
        links: PathBuf,
        /// Target route features (GeoJSON).
        #[arg(long)]
        routes: PathBuf,
        /// Output candidate table (CSV).
        #[arg(long)]
        output: PathBuf,
        #[arg(long, default_value_t = 50.0)]
        search_radius: f64,
        /// Angle tolerance in degrees (0-90).
        #[arg(long, default_value_t = 30.0)]
        angle_tolerance: f64,
        #[arg(long, default_value = "LINK_ID")]
        link_id_field: String,
        #[arg(long, default_value = "ROUTE_ID")]
        route_id_field: String,
    },
    /// Build routes from reviewed candidates, validate them, and locate the
    /// member links along the result.
    BuildRoutes {
        /// Reviewed match candidate table (CSV).
        #[arg(long)]
        candidates: PathBuf,
        /// Source link features (GeoJSON).
        #[arg(long)]
        links: PathBuf,
        /// Minimum confidence for a candidate to participate.
        #[arg(long, default_value = "Medium")]
        confidence_threshold: String,
        /// Output route features (GeoJSON).
        #[arg(long)]
        output_routes: PathBuf,
        /// Output link event table (CSV).
        #[arg(long)]
        output_link_events: PathBuf,
        #[arg(long, default_value_t = 0.5)]
        connect_tolerance: f64,
        /// Keep routes with gaps in the output.
        #[arg(long)]
        keep_discontinuous: bool,
        /// Keep non-monotonic routes in the output.
        #[arg(long)]
        keep_non_monotonic: bool,
        #[arg(long, default_value_t = 0.0)]
        locate_tolerance: f64,
        #[arg(long, default_value = "LINK_ID")]
        link_id_field: String,
    },
    /// Build the measure crosswalk (XREF) table for matched route pairs.
    Xref {
        /// Built source routes (GeoJSON, from build-routes).
        #[arg(long)]
        source_routes: PathBuf,
        /// Target route features (GeoJSON).
        #[arg(long)]
        target_routes: PathBuf,
        /// Link event table (CSV, from build-routes).
        #[arg(long)]
        link_events: PathBuf,
        /// Output XREF table (CSV).
        #[arg(long)]
        output: PathBuf,
    },
    /// Transfer target-network events onto the paired source routes.
    TransferToSource {
        /// Target-network event table (CSV).
        #[arg(long)]
        events: PathBuf,
        /// Treat the events as point events (single measure column).
        #[arg(long)]
        point_events: bool,
        #[arg(long, default_value = "ROUTE_ID")]
        event_route_id_field: String,
        /// Attribute columns to carry over. Default: every other column.
        #[arg(long, value_delimiter = ',')]
        transfer_fields: Vec<String>,
        /// Built source routes (GeoJSON).
        #[arg(long)]
        source_routes: PathBuf,
        /// Target route features (GeoJSON).
        #[arg(long)]
        target_routes: PathBuf,
        /// Output event table (CSV).
        #[arg(long)]
        output: PathBuf,
    },
    /// Transfer source-network link events onto target routes through the
    /// crosswalk.
    TransferToTarget {
        /// Source-network event table keyed by link id (CSV).
        #[arg(long)]
        events: PathBuf,
        #[arg(long, default_value = "LINK_ID")]
        event_link_id_field: String,
        #[arg(long, value_delimiter = ',')]
        transfer_fields: Vec<String>,
        /// XREF table (CSV).
        #[arg(long)]
        xref: PathBuf,
        /// Output event table (CSV).
        #[arg(long)]
        output: PathBuf,
    },
    /// Emit intersection/route event rows for intersection points.
    Intersections {
        /// Intersection point features (GeoJSON).
        #[arg(long)]
        intersections: PathBuf,
        #[arg(long, default_value = "INTERSECTION_ID")]
        intersection_id_field: String,
        /// Route features (GeoJSON).
        #[arg(long)]
        routes: PathBuf,
        /// Output event table (CSV).
        #[arg(long)]
        output: PathBuf,
        #[arg(long, default_value_t = 0.5)]
        search_radius: f64,
        #[arg(long, default_value_t = 3)]
        measure_scale: u32,
    },
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let as_of = match &args.as_of {
        Some(raw) => Some(io::parse_datetime(raw).ok_or_else(|| {
            anyhow::anyhow!("--as-of must be formatted as YYYY-MM-DD HH:MM:SS")
        })?),
        None => Some(chrono::Utc::now().naive_utc()),
    };

    match args.command {
        Command::MatchCandidates {
            links,
            routes,
            output,
            search_radius,
            angle_tolerance,
            link_id_field,
            route_id_field,
        } => {
            io::require_exists(&[&links, &routes])?;
            if !(0.0..=90.0).contains(&angle_tolerance) {
                anyhow::bail!("--angle-tolerance must be between 0 and 90 degrees");
            }

            let link_schema = io::LinkSchema {
                id_field: link_id_field,
                ..Default::default()
            };
            let route_schema = io::RouteSchema {
                id_field: route_id_field,
                ..Default::default()
            };

            let (link_features, link_diags) = io::read_links(&links, &link_schema)?;
            let (route_features, route_diags) = io::read_routes(&routes, &route_schema)?;
            println!(
                "Matching {} links against {} routes...",
                link_features.len(),
                route_features.len()
            );

            let outcome = matcher::generate_match_candidates(
                &link_features,
                &route_features,
                &MatchConfig {
                    search_radius,
                    angle_tolerance,
                    as_of,
                },
            );

            with_cleanup(&[&output], || io::write_candidates_csv(&output, &outcome.candidates))?;
            println!(
                "Wrote {} candidate rows to {} ({} records skipped)",
                outcome.candidates.len(),
                output.display(),
                link_diags.skipped_count()
                    + route_diags.skipped_count()
                    + outcome.diagnostics.skipped_count()
            );
        }

        Command::BuildRoutes {
            candidates,
            links,
            confidence_threshold,
            output_routes,
            output_link_events,
            connect_tolerance,
            keep_discontinuous,
            keep_non_monotonic,
            locate_tolerance,
            link_id_field,
        } => {
            io::require_exists(&[&candidates, &links])?;
            let threshold: Confidence = confidence_threshold
                .parse()
                .map_err(|e: String| anyhow::anyhow!(e))?;

            let link_schema = io::LinkSchema {
                id_field: link_id_field,
                ..Default::default()
            };
            let candidate_rows = io::read_candidates_csv(&candidates)?;
            let (link_features, _) = io::read_links(&links, &link_schema)?;

            let config = RouteBuildConfig {
                connect_tolerance,
                only_continuous: !keep_discontinuous,
                only_monotonic: !keep_non_monotonic,
                ..Default::default()
            };
            let outcome =
                route_builder::build_routes(&candidate_rows, &link_features, threshold, &config)?;
            for excluded in &outcome.excluded {
                println!(
                    "Route '{}' excluded (gap: {}, monotonic: {})",
                    excluded.route_id, excluded.has_gap, excluded.is_monotonic
                );
            }
            println!(
                "Built {} routes, excluded {}",
                outcome.routes.len(),
                outcome.excluded.len()
            );

            // Locate the accepted links along the routes that were built.
            let accepted = route_builder::accept_candidates(&candidate_rows, threshold)?;
            let assignments: Vec<(String, String)> = accepted
                .iter()
                .filter_map(|c| Some((c.link_id.clone(), c.route_id.clone()?)))
                .collect();
            let built_routes: Vec<conflation::model::RouteFeature> =
                outcome.routes.iter().map(|b| b.route.clone()).collect();
            let locate_outcome = locator::locate_links_along_routes(
                &link_features,
                &assignments,
                &built_routes,
                &LocateConfig {
                    tolerance: locate_tolerance,
                },
            );

            with_cleanup(&[&output_routes, &output_link_events], || {
                io::write_routes_geojson(&output_routes, &outcome.routes)?;
                io::write_located_links_csv(&output_link_events, &locate_outcome.located)
            })?;
            println!(
                "Wrote {} routes to {} and {} link events to {}",
                outcome.routes.len(),
                output_routes.display(),
                locate_outcome.located.len(),
                output_link_events.display()
            );
        }

        Command::Xref {
            source_routes,
            target_routes,
            link_events,
            output,
        } => {
            io::require_exists(&[&source_routes, &target_routes, &link_events])?;

            let (source_features, _) = io::read_routes(&source_routes, &Default::default())?;
            let (target_features, _) = io::read_routes(&target_routes, &Default::default())?;
            let located = io::read_located_links_csv(&link_events)?;

            let source_profiles = crosswalk::measure_profiles(&source_features, None);
            let target_profiles = crosswalk::measure_profiles(&target_features, as_of);

            let outcome = crosswalk::build_crosswalk(&located, &source_profiles, &target_profiles);
            with_cleanup(&[&output], || io::write_crosswalk_csv(&output, &outcome.entries))?;
            println!(
                "Wrote {} XREF entries to {} ({} records skipped)",
                outcome.entries.len(),
                output.display(),
                outcome.diagnostics.skipped_count()
            );
        }

        Command::TransferToSource {
            events,
            point_events,
            event_route_id_field,
            transfer_fields,
            source_routes,
            target_routes,
            output,
        } => {
            io::require_exists(&[&events, &source_routes, &target_routes])?;

            let schema = io::EventSchema {
                route_id_field: event_route_id_field,
                to_measure_field: if point_events {
                    None
                } else {
                    Some("TO_MEASURE".to_owned())
                },
                transfer_fields,
                ..Default::default()
            };
            let (event_rows, _) = io::read_events_csv(&events, &schema)?;
            let (source_features, _) = io::read_routes(&source_routes, &Default::default())?;
            let (target_features, _) = io::read_routes(&target_routes, &Default::default())?;

            let source_profiles = crosswalk::measure_profiles(&source_features, None);
            let target_profiles = crosswalk::measure_profiles(&target_features, as_of);

            let outcome = transfer::transfer_events_to_source(
                &event_rows,
                &target_profiles,
                &source_profiles,
                as_of,
            );
            with_cleanup(&[&output], || io::write_events_csv(&output, &outcome.events))?;
            println!(
                "Transferred {} events to {} ({} dropped)",
                outcome.events.len(),
                output.display(),
                outcome.dropped
            );
        }

        Command::TransferToTarget {
            events,
            event_link_id_field,
            transfer_fields,
            xref,
            output,
        } => {
            io::require_exists(&[&events, &xref])?;

            let event_rows =
                io::read_link_events_csv(&events, &event_link_id_field, &transfer_fields)?;
            let entries = io::read_crosswalk_csv(&xref)?;

            let outcome = transfer::transfer_events_to_target(&event_rows, &entries);
            with_cleanup(&[&output], || io::write_events_csv(&output, &outcome.events))?;
            println!(
                "Transferred {} events to {} ({} dropped)",
                outcome.events.len(),
                output.display(),
                outcome.dropped
            );
        }

        Command::Intersections {
            intersections,
            intersection_id_field,
            routes,
            output,
            search_radius,
            measure_scale,
        } => {
            io::require_exists(&[&intersections, &routes])?;

            let (points, _) = io::read_points(&intersections, &intersection_id_field)?;
            let (route_features, _) = io::read_routes(&routes, &Default::default())?;

            let outcome = intersection_events::build_intersection_route_events(
                &points,
                &route_features,
                &IntersectionConfig {
                    search_radius,
                    measure_scale,
                },
            );
            with_cleanup(&[&output], || {
                io::write_intersection_events_csv(&output, &outcome.events)
            })?;
            println!(
                "Wrote {} intersection route events to {}",
                outcome.events.len(),
                output.display()
            );
        }
    }

    println!("Done.");
    Ok(())
}

/// Run an output-writing closure; on failure remove whatever partial
/// outputs this run created before propagating the error.
fn with_cleanup<F>(outputs: &[&Path], write: F) -> Result<()>
where
    F: FnOnce() -> Result<(), conflation::error::ConflationError>,
{
    if let Err(e) = write() {
        for path in outputs {
            if path.exists() {
                let _ = std::fs::remove_file(path);
            }
        }
        return Err(e.into());
    }
    Ok(())
}
