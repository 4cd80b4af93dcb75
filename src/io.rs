// Feature and table I/O: GeoJSON feature collections for geometry inputs,
// CSV for the candidate, event and crosswalk tables. Property names are
// supplied per dataset through typed schema configs.

use crate::error::{ConflationError, RunDiagnostics};
use crate::model::{
    CrosswalkEntry, IntersectionRouteEvent, LinearEvent, LinkFeature, LinkKeyedEvent, LocatedLink,
    MatchCandidate, PointFeature, RouteFeature, RoutePart,
};
use crate::route_builder::BuiltRoute;
use chrono::{NaiveDate, NaiveDateTime};
use geo_types::{LineString, Point};
use geojson::{Feature, FeatureCollection, GeoJson, Geometry, Value};
use serde_json::{Map, Value as JsonValue, json};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Property names of a link feature collection.
#[derive(Debug, Clone)]
pub struct LinkSchema {
    pub id_field: String,
    pub street_name_field: String,
    pub county_id_field: String,
    pub measure_field: String,
}

impl Default for LinkSchema {
    fn default() -> Self {
        Self {
            id_field: "LINK_ID".to_owned(),
            street_name_field: "ST_NAME".to_owned(),
            county_id_field: "CNTY_ID".to_owned(),
            measure_field: "M_VALUES".to_owned(),
        }
    }
}

/// Property names of a route feature collection.
#[derive(Debug, Clone)]
pub struct RouteSchema {
    pub id_field: String,
    pub name_field: String,
    pub county_id_field: String,
    pub measure_field: String,
    pub from_date_field: String,
    pub to_date_field: String,
}

impl Default for RouteSchema {
    fn default() -> Self {
        Self {
            id_field: "ROUTE_ID".to_owned(),
            name_field: "RT_NAME".to_owned(),
            county_id_field: "CNTY_ID".to_owned(),
            measure_field: "M_VALUES".to_owned(),
            from_date_field: "FROM_DATE".to_owned(),
            to_date_field: "TO_DATE".to_owned(),
        }
    }
}

/// Column names of a linear event table.
#[derive(Debug, Clone)]
pub struct EventSchema {
    pub route_id_field: String,
    pub from_measure_field: String,
    /// None for point event tables.
    pub to_measure_field: Option<String>,
    pub from_date_field: String,
    pub to_date_field: String,
    /// Attribute columns to carry through transfer. Empty means every other
    /// column.
    pub transfer_fields: Vec<String>,
}

impl Default for EventSchema {
    fn default() -> Self {
        Self {
            route_id_field: "ROUTE_ID".to_owned(),
            from_measure_field: "FROM_MEASURE".to_owned(),
            to_measure_field: Some("TO_MEASURE".to_owned()),
            from_date_field: "FROM_DATE".to_owned(),
            to_date_field: "TO_DATE".to_owned(),
            transfer_fields: Vec::new(),
        }
    }
}

/// Check every input path before the run starts; all missing datasets are
/// reported in one message.
pub fn require_exists(paths: &[&Path]) -> Result<(), ConflationError> {
    let missing: Vec<String> = paths
        .iter()
        .filter(|p| !p.exists())
        .map(|p| p.display().to_string())
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(ConflationError::MissingDataset(missing.join(", ")))
    }
}

fn prop_string(feature: &Feature, name: &str) -> Option<String> {
    match feature.properties.as_ref()?.get(name)? {
        JsonValue::String(s) => Some(s.clone()),
        JsonValue::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn prop_date(feature: &Feature, name: &str) -> Option<NaiveDateTime> {
    let raw = prop_string(feature, name)?;
    parse_datetime(&raw)
}

pub fn parse_datetime(raw: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S"))
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

fn feature_collection(geojson_str: &str) -> Result<FeatureCollection, ConflationError> {
    let geojson: GeoJson = geojson_str
        .parse()
        .map_err(|e| ConflationError::InvalidParameter(format!("invalid GeoJSON: {}", e)))?;
    match geojson {
        GeoJson::FeatureCollection(fc) => Ok(fc),
        _ => Err(ConflationError::InvalidParameter(
            "expected a GeoJSON FeatureCollection".to_owned(),
        )),
    }
}

fn line_from_positions(positions: &[Vec<f64>]) -> LineString<f64> {
    LineString::from(
        positions
            .iter()
            .map(|p| (p[0], p[1]))
            .collect::<Vec<(f64, f64)>>(),
    )
}

/// Parse a link feature collection. Features without a usable LineString
/// geometry or without an id are logged and skipped.
pub fn parse_links(
    geojson_str: &str,
    schema: &LinkSchema,
) -> Result<(Vec<LinkFeature>, RunDiagnostics), ConflationError> {
    let fc = feature_collection(geojson_str)?;
    let mut diagnostics = RunDiagnostics::new();
    let mut links = Vec::new();

    for feature in &fc.features {
        let Some(link_id) = prop_string(feature, &schema.id_field) else {
            diagnostics.skip(None, None, "link feature has no id property");
            continue;
        };
        let Some(Value::LineString(positions)) = feature.geometry.as_ref().map(|g| &g.value)
        else {
            diagnostics.skip(Some(&link_id), None, "link feature has no LineString geometry");
            continue;
        };

        let geometry = line_from_positions(positions);
        let measures = match feature
            .properties
            .as_ref()
            .and_then(|p| p.get(&schema.measure_field))
        {
            Some(JsonValue::Array(values)) => {
                let parsed: Vec<f64> = values.iter().filter_map(JsonValue::as_f64).collect();
                if parsed.len() == geometry.0.len() {
                    Some(parsed)
                } else {
                    diagnostics.skip(
                        Some(&link_id),
                        None,
                        "link measure array does not match the vertex count",
                    );
                    None
                }
            }
            _ => None,
        };

        links.push(LinkFeature {
            link_id,
            geometry,
            street_name: prop_string(feature, &schema.street_name_field),
            county_id: prop_string(feature, &schema.county_id_field),
            measures,
        });
    }

    Ok((links, diagnostics))
}

/// Parse a route feature collection. LineString features become single-part
/// routes, MultiLineString features multipart ones. Measures come from the
/// schema's measure property (an array per part, or one flat array) and
/// fall back to arc length.
pub fn parse_routes(
    geojson_str: &str,
    schema: &RouteSchema,
) -> Result<(Vec<RouteFeature>, RunDiagnostics), ConflationError> {
    let fc = feature_collection(geojson_str)?;
    let mut diagnostics = RunDiagnostics::new();
    let mut routes = Vec::new();

    for feature in &fc.features {
        let Some(route_id) = prop_string(feature, &schema.id_field) else {
            diagnostics.skip(None, None, "route feature has no id property");
            continue;
        };
        let lines: Vec<LineString<f64>> = match feature.geometry.as_ref().map(|g| &g.value) {
            Some(Value::LineString(positions)) => vec![line_from_positions(positions)],
            Some(Value::MultiLineString(parts)) => {
                parts.iter().map(|p| line_from_positions(p)).collect()
            }
            _ => {
                diagnostics.skip(
                    None,
                    Some(&route_id),
                    "route feature has no line geometry",
                );
                continue;
            }
        };

        let supplied = feature
            .properties
            .as_ref()
            .and_then(|p| p.get(&schema.measure_field))
            .and_then(|v| parse_route_measures(v, &lines));
        let parts = match supplied {
            Some(per_part) => lines
                .into_iter()
                .zip(per_part)
                .map(|(line, measures)| RoutePart { line, measures })
                .collect(),
            None => {
                let mut offset = 0.0;
                lines
                    .into_iter()
                    .map(|line| {
                        let part = RoutePart::from_line_with_length_measures(line, offset);
                        offset = *part.measures.last().unwrap_or(&offset);
                        part
                    })
                    .collect()
            }
        };

        routes.push(RouteFeature {
            route_id,
            parts,
            route_name: prop_string(feature, &schema.name_field),
            county_id: prop_string(feature, &schema.county_id_field),
            from_date: prop_date(feature, &schema.from_date_field),
            to_date: prop_date(feature, &schema.to_date_field),
        });
    }

    Ok((routes, diagnostics))
}

/// Measure property layouts: `[[...], [...]]` per part, or one flat array
/// split by vertex counts. None when the counts do not line up.
fn parse_route_measures(value: &JsonValue, lines: &[LineString<f64>]) -> Option<Vec<Vec<f64>>> {
    let JsonValue::Array(items) = value else {
        return None;
    };

    if items.iter().all(JsonValue::is_array) {
        let per_part: Vec<Vec<f64>> = items
            .iter()
            .map(|part| {
                part.as_array()
                    .map(|a| a.iter().filter_map(JsonValue::as_f64).collect())
                    .unwrap_or_default()
            })
            .collect();
        let counts_match = per_part.len() == lines.len()
            && per_part
                .iter()
                .zip(lines)
                .all(|(m, l)| m.len() == l.0.len());
        return counts_match.then_some(per_part);
    }

    let flat: Vec<f64> = items.iter().filter_map(JsonValue::as_f64).collect();
    let total: usize = lines.iter().map(|l| l.0.len()).sum();
    if flat.len() != total {
        return None;
    }
    let mut per_part = Vec::with_capacity(lines.len());
    let mut cursor = 0;
    for line in lines {
        per_part.push(flat[cursor..cursor + line.0.len()].to_vec());
        cursor += line.0.len();
    }
    Some(per_part)
}

/// Parse a point feature collection.
pub fn parse_points(
    geojson_str: &str,
    id_field: &str,
) -> Result<(Vec<PointFeature>, RunDiagnostics), ConflationError> {
    let fc = feature_collection(geojson_str)?;
    let mut diagnostics = RunDiagnostics::new();
    let mut points = Vec::new();

    for feature in &fc.features {
        let Some(point_id) = prop_string(feature, id_field) else {
            diagnostics.skip(None, None, "point feature has no id property");
            continue;
        };
        let Some(Value::Point(position)) = feature.geometry.as_ref().map(|g| &g.value) else {
            diagnostics.skip(Some(&point_id), None, "feature has no Point geometry");
            continue;
        };
        points.push(PointFeature {
            point_id,
            point: Point::new(position[0], position[1]),
        });
    }

    Ok((points, diagnostics))
}

pub fn read_links(
    path: &Path,
    schema: &LinkSchema,
) -> Result<(Vec<LinkFeature>, RunDiagnostics), ConflationError> {
    parse_links(&fs::read_to_string(path)?, schema)
}

pub fn read_routes(
    path: &Path,
    schema: &RouteSchema,
) -> Result<(Vec<RouteFeature>, RunDiagnostics), ConflationError> {
    parse_routes(&fs::read_to_string(path)?, schema)
}

pub fn read_points(
    path: &Path,
    id_field: &str,
) -> Result<(Vec<PointFeature>, RunDiagnostics), ConflationError> {
    parse_points(&fs::read_to_string(path)?, id_field)
}

fn create_csv_writer(path: &Path) -> Result<csv::Writer<fs::File>, ConflationError> {
    let file = fs::File::create(path)
        .map_err(|e| ConflationError::Resource(format!("cannot create '{}': {}", path.display(), e)))?;
    Ok(csv::Writer::from_writer(file))
}

fn write_serializable_csv<T: serde::Serialize>(
    path: &Path,
    rows: &[T],
) -> Result<(), ConflationError> {
    let mut writer = create_csv_writer(path)?;
    for row in rows {
        writer
            .serialize(row)
            .map_err(|e| ConflationError::Resource(e.to_string()))?;
    }
    writer
        .flush()
        .map_err(|e| ConflationError::Resource(e.to_string()))?;
    Ok(())
}

fn read_deserializable_csv<T: serde::de::DeserializeOwned>(
    path: &Path,
) -> Result<Vec<T>, ConflationError> {
    let mut reader = csv::Reader::from_path(path)
        .map_err(|e| ConflationError::Resource(format!("cannot read '{}': {}", path.display(), e)))?;
    reader
        .deserialize()
        .collect::<Result<Vec<T>, _>>()
        .map_err(|e| ConflationError::InvalidParameter(e.to_string()))
}

pub fn write_candidates_csv(
    path: &Path,
    candidates: &[MatchCandidate],
) -> Result<(), ConflationError> {
    write_serializable_csv(path, candidates)
}

pub fn read_candidates_csv(path: &Path) -> Result<Vec<MatchCandidate>, ConflationError> {
    read_deserializable_csv(path)
}

pub fn write_located_links_csv(
    path: &Path,
    located: &[LocatedLink],
) -> Result<(), ConflationError> {
    write_serializable_csv(path, located)
}

pub fn read_located_links_csv(path: &Path) -> Result<Vec<LocatedLink>, ConflationError> {
    read_deserializable_csv(path)
}

pub fn write_crosswalk_csv(path: &Path, entries: &[CrosswalkEntry]) -> Result<(), ConflationError> {
    write_serializable_csv(path, entries)
}

pub fn read_crosswalk_csv(path: &Path) -> Result<Vec<CrosswalkEntry>, ConflationError> {
    read_deserializable_csv(path)
}

pub fn write_intersection_events_csv(
    path: &Path,
    events: &[IntersectionRouteEvent],
) -> Result<(), ConflationError> {
    write_serializable_csv(path, events)
}

/// Read a linear event table. The measure and route id columns are required
/// in the header; rows that fail to parse are logged and skipped.
pub fn read_events_csv(
    path: &Path,
    schema: &EventSchema,
) -> Result<(Vec<LinearEvent>, RunDiagnostics), ConflationError> {
    let mut reader = csv::Reader::from_path(path)
        .map_err(|e| ConflationError::Resource(format!("cannot read '{}': {}", path.display(), e)))?;
    let headers = reader
        .headers()
        .map_err(|e| ConflationError::InvalidParameter(e.to_string()))?
        .clone();

    let column = |name: &str| headers.iter().position(|h| h == name);
    let Some(route_idx) = column(&schema.route_id_field) else {
        return Err(ConflationError::InvalidParameter(format!(
            "event table has no '{}' column",
            schema.route_id_field
        )));
    };
    let Some(from_idx) = column(&schema.from_measure_field) else {
        return Err(ConflationError::InvalidParameter(format!(
            "event table has no '{}' column",
            schema.from_measure_field
        )));
    };
    let to_idx = match &schema.to_measure_field {
        Some(name) => match column(name) {
            Some(idx) => Some(idx),
            None => {
                return Err(ConflationError::InvalidParameter(format!(
                    "event table has no '{}' column",
                    name
                )));
            }
        },
        None => None,
    };
    let from_date_idx = column(&schema.from_date_field);
    let to_date_idx = column(&schema.to_date_field);

    let attribute_columns: Vec<(usize, String)> = headers
        .iter()
        .enumerate()
        .filter(|(i, name)| {
            let reserved = *i == route_idx
                || *i == from_idx
                || Some(*i) == to_idx
                || Some(*i) == from_date_idx
                || Some(*i) == to_date_idx;
            if reserved {
                return false;
            }
            schema.transfer_fields.is_empty()
                || schema.transfer_fields.iter().any(|f| f == name)
        })
        .map(|(i, name)| (i, name.to_owned()))
        .collect();

    let mut diagnostics = RunDiagnostics::new();
    let mut events = Vec::new();

    for record in reader.records() {
        let record = record.map_err(|e| ConflationError::InvalidParameter(e.to_string()))?;
        let route_id = record.get(route_idx).unwrap_or("").to_owned();
        let Some(from_measure) = record.get(from_idx).and_then(|v| v.parse::<f64>().ok()) else {
            diagnostics.skip(None, Some(&route_id), "event has an unparseable from-measure");
            continue;
        };
        let to_measure = match to_idx {
            Some(idx) => match record.get(idx).and_then(|v| v.parse::<f64>().ok()) {
                Some(m) => Some(m),
                None => {
                    diagnostics.skip(None, Some(&route_id), "event has an unparseable to-measure");
                    continue;
                }
            },
            None => None,
        };

        let mut attributes = BTreeMap::new();
        for (idx, name) in &attribute_columns {
            attributes.insert(name.clone(), record.get(*idx).unwrap_or("").to_owned());
        }

        events.push(LinearEvent {
            route_id,
            from_measure,
            to_measure,
            from_date: from_date_idx
                .and_then(|i| record.get(i))
                .and_then(parse_datetime),
            to_date: to_date_idx
                .and_then(|i| record.get(i))
                .and_then(parse_datetime),
            attributes,
        });
    }

    Ok((events, diagnostics))
}

/// Read a source-network event table keyed by link id.
pub fn read_link_events_csv(
    path: &Path,
    link_id_field: &str,
    transfer_fields: &[String],
) -> Result<Vec<LinkKeyedEvent>, ConflationError> {
    let mut reader = csv::Reader::from_path(path)
        .map_err(|e| ConflationError::Resource(format!("cannot read '{}': {}", path.display(), e)))?;
    let headers = reader
        .headers()
        .map_err(|e| ConflationError::InvalidParameter(e.to_string()))?
        .clone();

    let Some(link_idx) = headers.iter().position(|h| h == link_id_field) else {
        return Err(ConflationError::InvalidParameter(format!(
            "event table has no '{}' column",
            link_id_field
        )));
    };
    let attribute_columns: Vec<(usize, String)> = headers
        .iter()
        .enumerate()
        .filter(|(i, name)| {
            *i != link_idx
                && (transfer_fields.is_empty() || transfer_fields.iter().any(|f| f == name))
        })
        .map(|(i, name)| (i, name.to_owned()))
        .collect();

    let mut events = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| ConflationError::InvalidParameter(e.to_string()))?;
        let mut attributes = BTreeMap::new();
        for (idx, name) in &attribute_columns {
            attributes.insert(name.clone(), record.get(*idx).unwrap_or("").to_owned());
        }
        events.push(LinkKeyedEvent {
            link_id: record.get(link_idx).unwrap_or("").to_owned(),
            attributes,
        });
    }
    Ok(events)
}

/// Write a linear event table: the key columns first, then the union of
/// attribute columns in name order.
pub fn write_events_csv(path: &Path, events: &[LinearEvent]) -> Result<(), ConflationError> {
    let mut attribute_names: Vec<String> = events
        .iter()
        .flat_map(|e| e.attributes.keys().cloned())
        .collect();
    attribute_names.sort();
    attribute_names.dedup();

    let mut writer = create_csv_writer(path)?;
    let mut header = vec![
        "route_id".to_owned(),
        "from_measure".to_owned(),
        "to_measure".to_owned(),
    ];
    header.extend(attribute_names.iter().cloned());
    writer
        .write_record(&header)
        .map_err(|e| ConflationError::Resource(e.to_string()))?;

    for event in events {
        let mut record = vec![
            event.route_id.clone(),
            event.from_measure.to_string(),
            event.to_measure.map(|m| m.to_string()).unwrap_or_default(),
        ];
        for name in &attribute_names {
            record.push(event.attributes.get(name).cloned().unwrap_or_default());
        }
        writer
            .write_record(&record)
            .map_err(|e| ConflationError::Resource(e.to_string()))?;
    }
    writer
        .flush()
        .map_err(|e| ConflationError::Resource(e.to_string()))?;
    Ok(())
}

/// Write built routes as a GeoJSON feature collection, with the per-vertex
/// measures and the validation flags carried in the properties.
pub fn write_routes_geojson(path: &Path, routes: &[BuiltRoute]) -> Result<(), ConflationError> {
    let features: Vec<Feature> = routes
        .iter()
        .map(|built| {
            let line_values: Vec<Vec<Vec<f64>>> = built
                .route
                .parts
                .iter()
                .map(|part| part.line.0.iter().map(|c| vec![c.x, c.y]).collect())
                .collect();
            let value = if line_values.len() == 1 {
                Value::LineString(line_values.into_iter().next().unwrap())
            } else {
                Value::MultiLineString(line_values)
            };

            let measures: Vec<Vec<f64>> = built
                .route
                .parts
                .iter()
                .map(|part| part.measures.clone())
                .collect();

            let mut properties = Map::new();
            properties.insert("ROUTE_ID".to_owned(), json!(built.route.route_id));
            properties.insert("RT_NAME".to_owned(), json!(built.route.route_name));
            properties.insert("CNTY_ID".to_owned(), json!(built.route.county_id));
            properties.insert("M_VALUES".to_owned(), json!(measures));
            properties.insert("HAS_GAP".to_owned(), json!(built.validation.has_gap));
            properties.insert(
                "IS_MONOTONIC".to_owned(),
                json!(built.validation.is_monotonic),
            );

            Feature {
                bbox: None,
                geometry: Some(Geometry::new(value)),
                id: None,
                properties: Some(properties),
                foreign_members: None,
            }
        })
        .collect();

    let collection = FeatureCollection {
        bbox: None,
        features,
        foreign_members: None,
    };
    fs::write(path, GeoJson::from(collection).to_string())
        .map_err(|e| ConflationError::Resource(format!("cannot create '{}': {}", path.display(), e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_links_with_properties() {
        let geojson = r#"{
            "type": "FeatureCollection",
            "features": [
                {
                    "type": "Feature",
                    "geometry": {"type": "LineString", "coordinates": [[0.0, 0.0], [10.0, 0.0]]},
                    "properties": {"LINK_ID": "L1", "ST_NAME": "MAIN ST", "CNTY_ID": "01"}
                },
                {
                    "type": "Feature",
                    "geometry": null,
                    "properties": {"LINK_ID": "L2"}
                }
            ]
        }"#;

        let (links, diagnostics) = parse_links(geojson, &LinkSchema::default()).unwrap();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].link_id, "L1");
        assert_eq!(links[0].street_name.as_deref(), Some("MAIN ST"));
        assert_eq!(diagnostics.skipped_count(), 1);
    }

    #[test]
    fn test_parse_routes_with_supplied_measures() {
        let geojson = r#"{
            "type": "FeatureCollection",
            "features": [
                {
                    "type": "Feature",
                    "geometry": {"type": "LineString", "coordinates": [[0.0, 0.0], [10.0, 0.0]]},
                    "properties": {"ROUTE_ID": "R1", "M_VALUES": [100.0, 110.0]}
                }
            ]
        }"#;

        let (routes, _) = parse_routes(geojson, &RouteSchema::default()).unwrap();
        assert_eq!(routes.len(), 1);
        assert_eq!(routes[0].parts[0].measures, vec![100.0, 110.0]);
    }

    #[test]
    fn test_parse_routes_derives_length_measures() {
        let geojson = r#"{
            "type": "FeatureCollection",
            "features": [
                {
                    "type": "Feature",
                    "geometry": {"type": "MultiLineString",
                                 "coordinates": [[[0.0, 0.0], [10.0, 0.0]], [[12.0, 0.0], [22.0, 0.0]]]},
                    "properties": {"ROUTE_ID": "R1"}
                }
            ]
        }"#;

        let (routes, _) = parse_routes(geojson, &RouteSchema::default()).unwrap();
        assert_eq!(routes[0].parts.len(), 2);
        assert_eq!(routes[0].parts[0].measures, vec![0.0, 10.0]);
        assert_eq!(routes[0].parts[1].measures, vec![10.0, 20.0]);
    }

    #[test]
    fn test_parse_datetime_formats() {
        assert!(parse_datetime("2024-03-01 12:30:00").is_some());
        assert!(parse_datetime("2024-03-01T12:30:00").is_some());
        assert!(parse_datetime("2024-03-01").is_some());
        assert!(parse_datetime("not a date").is_none());
    }

    #[test]
    fn test_require_exists_aggregates_missing() {
        let err = require_exists(&[
            Path::new("/definitely/not/here.geojson"),
            Path::new("/also/not/here.csv"),
        ])
        .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("here.geojson"));
        assert!(message.contains("here.csv"));
    }
}
