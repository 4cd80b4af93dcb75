// Core data model for the link/route conflation pipeline.

use crate::geometry;
use chrono::NaiveDateTime;
use geo_types::{LineString, Point};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Categorical match quality. Ordering matters: review thresholds are
/// expressed as "at or above" a level.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub enum Confidence {
    #[default]
    #[serde(rename = "No Match")]
    NoMatch,
    Low,
    Medium,
    High,
    #[serde(rename = "User Confirmed")]
    UserConfirmed,
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Confidence::NoMatch => "No Match",
            Confidence::Low => "Low",
            Confidence::Medium => "Medium",
            Confidence::High => "High",
            Confidence::UserConfirmed => "User Confirmed",
        };
        write!(f, "{}", label)
    }
}

impl FromStr for Confidence {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "No Match" => Ok(Confidence::NoMatch),
            "Low" => Ok(Confidence::Low),
            "Medium" => Ok(Confidence::Medium),
            "High" => Ok(Confidence::High),
            "User Confirmed" => Ok(Confidence::UserConfirmed),
            other => Err(format!("unknown confidence level: '{}'", other)),
        }
    }
}

/// An atomic road segment from the denser source network.
/// Immutable once loaded for a conflation run.
#[derive(Clone, Debug)]
pub struct LinkFeature {
    pub link_id: String,
    pub geometry: LineString<f64>,
    pub street_name: Option<String>,
    pub county_id: Option<String>,
    /// Per-vertex m-values, when the source network carries its own linear
    /// reference. None means measures are derived from arc length.
    pub measures: Option<Vec<f64>>,
}

impl LinkFeature {
    pub fn length(&self) -> f64 {
        geometry::polyline_length(&self.geometry)
    }
}

/// One continuous piece of a route's geometry, with an m-value per vertex.
#[derive(Clone, Debug)]
pub struct RoutePart {
    pub line: LineString<f64>,
    pub measures: Vec<f64>,
}

impl RoutePart {
    /// Build a part whose measures are arc length offset by `measure_offset`.
    pub fn from_line_with_length_measures(line: LineString<f64>, measure_offset: f64) -> Self {
        let mut measures = Vec::with_capacity(line.0.len());
        let mut running = measure_offset;
        for (i, coord) in line.0.iter().enumerate() {
            if i > 0 {
                let prev = line.0[i - 1];
                running += geometry::distance(prev.x_y(), coord.x_y());
            }
            measures.push(running);
        }
        Self { line, measures }
    }

    pub fn length(&self) -> f64 {
        geometry::polyline_length(&self.line)
    }
}

/// A continuous linear-referenced path in the target network, or a route
/// assembled from matched source links. Never mutated after validation.
#[derive(Clone, Debug)]
pub struct RouteFeature {
    pub route_id: String,
    pub parts: Vec<RoutePart>,
    pub route_name: Option<String>,
    pub county_id: Option<String>,
    pub from_date: Option<NaiveDateTime>,
    pub to_date: Option<NaiveDateTime>,
}

impl RouteFeature {
    pub fn is_multipart(&self) -> bool {
        self.parts.len() > 1
    }

    pub fn length(&self) -> f64 {
        self.parts.iter().map(RoutePart::length).sum()
    }

    /// All vertex measures in part order, flattened.
    pub fn vertex_measures(&self) -> Vec<f64> {
        self.parts
            .iter()
            .flat_map(|p| p.measures.iter().copied())
            .collect()
    }

    /// Validity check against a run timestamp. Routes without an interval are
    /// always active; `None` disables date filtering entirely.
    pub fn is_active_at(&self, as_of: Option<NaiveDateTime>) -> bool {
        let Some(ts) = as_of else {
            return true;
        };
        let starts_ok = self.from_date.is_none_or(|from| from <= ts);
        let ends_ok = self.to_date.is_none_or(|to| to > ts);
        starts_ok && ends_ok
    }

    pub fn measure_profile(&self) -> Option<RouteMeasureProfile> {
        let measures = self.vertex_measures();
        let m_min = measures.iter().copied().fold(f64::INFINITY, f64::min);
        let m_max = measures.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        if !m_min.is_finite() || !m_max.is_finite() {
            return None;
        }
        Some(RouteMeasureProfile {
            length: self.length(),
            m_min,
            m_max,
        })
    }
}

/// A standalone point feature (reference node, intersection).
#[derive(Clone, Debug)]
pub struct PointFeature {
    pub point_id: String,
    pub point: Point<f64>,
}

/// One proposed link-to-route pairing, scored by the matcher and later
/// mutated only by the knowledge-propagation pass or by human review.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MatchCandidate {
    pub link_id: String,
    /// None exactly when the link has no surviving candidate (NoMatch).
    pub route_id: Option<String>,
    pub route_name: Option<String>,
    pub route_county_id: Option<String>,
    pub street_name: Option<String>,
    pub link_county_id: Option<String>,
    /// Chord angle between link and in-buffer route sub-segment, folded to
    /// [0, 90] degrees. None when it could not be computed.
    pub angle: Option<f64>,
    /// Number of candidate routes that competed for this link.
    pub frequency: u32,
    pub confidence: Confidence,
    #[serde(default)]
    pub verified: bool,
    #[serde(default)]
    pub rejected: bool,
}

impl MatchCandidate {
    pub fn no_match(link: &LinkFeature, frequency: u32) -> Self {
        Self {
            link_id: link.link_id.clone(),
            route_id: None,
            route_name: None,
            route_county_id: None,
            street_name: link.street_name.clone(),
            link_county_id: link.county_id.clone(),
            angle: None,
            frequency,
            confidence: Confidence::NoMatch,
            verified: false,
            rejected: false,
        }
    }
}

/// Gap and monotonicity flags for one built route. Derived, never persisted
/// apart from the route it describes.
#[derive(Clone, Debug, Serialize)]
pub struct RouteValidationResult {
    pub route_id: String,
    pub has_gap: bool,
    pub is_monotonic: bool,
}

/// A link located along a route: the link's extent in the route's measure
/// system. Input to the crosswalk builder.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LocatedLink {
    pub link_id: String,
    pub route_id: String,
    pub from_measure: f64,
    pub to_measure: f64,
}

/// A point feature located along a route.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LocatedPoint {
    pub point_id: String,
    pub route_id: String,
    pub measure: f64,
}

/// A linear event keyed by route id. Point events carry only `from_measure`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LinearEvent {
    pub route_id: String,
    pub from_measure: f64,
    pub to_measure: Option<f64>,
    pub from_date: Option<NaiveDateTime>,
    pub to_date: Option<NaiveDateTime>,
    /// Attribute columns carried through transfer unchanged.
    pub attributes: BTreeMap<String, String>,
}

impl LinearEvent {
    pub fn is_point(&self) -> bool {
        self.to_measure.is_none()
    }

    pub fn is_active_at(&self, as_of: Option<NaiveDateTime>) -> bool {
        let Some(ts) = as_of else {
            return true;
        };
        let starts_ok = self.from_date.is_none_or(|from| from <= ts);
        let ends_ok = self.to_date.is_none_or(|to| to > ts);
        starts_ok && ends_ok
    }
}

/// A source-network event keyed by link id, awaiting a crosswalk join.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LinkKeyedEvent {
    pub link_id: String,
    pub attributes: BTreeMap<String, String>,
}

/// One XREF record: the adjusted extent of a link on the other network's
/// measure system. Immutable output of the crosswalk builder.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CrosswalkEntry {
    pub link_id: String,
    pub route_id: String,
    pub adjusted_from_measure: f64,
    pub adjusted_to_measure: f64,
}

/// Total length and measure extent of one route, the inputs to the
/// proportional rescaling.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct RouteMeasureProfile {
    pub length: f64,
    pub m_min: f64,
    pub m_max: f64,
}

impl RouteMeasureProfile {
    /// A zero-length route or a collapsed measure range makes the rescaling
    /// ratios undefined; such routes must be rejected before the transform.
    pub fn is_degenerate(&self) -> bool {
        self.length <= 0.0 || self.m_max == self.m_min
    }

    pub fn measure_length_ratio(&self) -> f64 {
        (self.m_max - self.m_min).abs() / self.length
    }
}

/// One intersection/route event row: the intersection sits ON one route AT
/// another, at the given measure along the on-route.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IntersectionRouteEvent {
    pub intersection_id: String,
    pub on_route_id: String,
    pub at_route_id: String,
    pub measure: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confidence_ordering() {
        assert!(Confidence::NoMatch < Confidence::Low);
        assert!(Confidence::Low < Confidence::Medium);
        assert!(Confidence::Medium < Confidence::High);
        assert!(Confidence::High < Confidence::UserConfirmed);
    }

    #[test]
    fn test_confidence_label_round_trip() {
        for level in [
            Confidence::NoMatch,
            Confidence::Low,
            Confidence::Medium,
            Confidence::High,
            Confidence::UserConfirmed,
        ] {
            assert_eq!(level.to_string().parse::<Confidence>().unwrap(), level);
        }
        assert!("Unheard Of".parse::<Confidence>().is_err());
    }

    #[test]
    fn test_length_measures_accumulate() {
        let line = LineString::from(vec![(0.0, 0.0), (3.0, 0.0), (3.0, 4.0)]);
        let part = RoutePart::from_line_with_length_measures(line, 10.0);
        assert_eq!(part.measures, vec![10.0, 13.0, 17.0]);
    }

    #[test]
    fn test_degenerate_profiles() {
        let flat = RouteMeasureProfile {
            length: 100.0,
            m_min: 5.0,
            m_max: 5.0,
        };
        assert!(flat.is_degenerate());

        let empty = RouteMeasureProfile {
            length: 0.0,
            m_min: 0.0,
            m_max: 1.0,
        };
        assert!(empty.is_degenerate());

        let ok = RouteMeasureProfile {
            length: 100.0,
            m_min: 0.0,
            m_max: 10.0,
        };
        assert!(!ok.is_degenerate());
        assert_eq!(ok.measure_length_ratio(), 0.1);
    }

    #[test]
    fn test_route_active_interval() {
        let ts = |s: &str| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap();
        let route = RouteFeature {
            route_id: "R1".into(),
            parts: vec![],
            route_name: None,
            county_id: None,
            from_date: Some(ts("2020-01-01 00:00:00")),
            to_date: Some(ts("2021-01-01 00:00:00")),
        };
        assert!(route.is_active_at(Some(ts("2020-06-01 00:00:00"))));
        assert!(!route.is_active_at(Some(ts("2021-06-01 00:00:00"))));
        assert!(route.is_active_at(None));
    }
}
