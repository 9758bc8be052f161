//! Features loaded from a GeoJSON FeatureCollection file.
//!
//! Further reading: https://datatracker.ietf.org/doc/html/rfc7946

use std::fs;
use std::path::Path;

use geo::{Coord, Geometry, GeometryCollection, LineString, MultiLineString, MultiPoint, MultiPolygon, Point, Polygon};
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::envelope::Envelope;
use crate::error::{Error, Result};
use crate::feature::{AttributeValue, Attributes, Feature};
use crate::mercator::{lat_lon_to_meters, MAX_LATITUDE};
use crate::source::{decompose, DataSource, DataSourceId, SourceIdentity};

/// The coordinate system of the positions in a GeoJSON document.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Projection {
    /// Longitude and latitude in degrees, as RFC 7946 prescribes. Reprojected on load.
    #[default]
    Wgs84,
    /// Already in EPSG:3857 meters.
    Mercator,
}

impl Projection {
    fn to_meters(self, position: &[f64]) -> Result<Coord<f64>> {
        let (x, y) = match position {
            [x, y, ..] if x.is_finite() && y.is_finite() => (*x, *y),
            _ => return Err(Error::InvalidGeometry(format!("bad position {:?}", position))),
        };
        Ok(match self {
            Projection::Wgs84 => lat_lon_to_meters(y.clamp(-MAX_LATITUDE, MAX_LATITUDE), x),
            Projection::Mercator => Coord { x, y },
        })
    }
}

#[derive(Deserialize)]
struct FeatureCollection {
    features: Vec<JsonFeature>,
}

#[derive(Deserialize)]
struct JsonFeature {
    geometry: Option<JsonGeometry>,
    #[serde(default)]
    properties: Option<serde_json::Map<String, Value>>,
}

#[derive(Deserialize)]
#[serde(tag = "type")]
pub(crate) enum JsonGeometry {
    Point { coordinates: Vec<f64> },
    MultiPoint { coordinates: Vec<Vec<f64>> },
    LineString { coordinates: Vec<Vec<f64>> },
    MultiLineString { coordinates: Vec<Vec<Vec<f64>>> },
    Polygon { coordinates: Vec<Vec<Vec<f64>>> },
    MultiPolygon { coordinates: Vec<Vec<Vec<Vec<f64>>>> },
    GeometryCollection { geometries: Vec<JsonGeometry> },
}

impl JsonGeometry {
    pub(crate) fn to_geo(&self, projection: Projection) -> Result<Geometry<f64>> {
        let line = |positions: &[Vec<f64>]| -> Result<LineString<f64>> {
            if positions.len() < 2 {
                return Err(Error::InvalidGeometry(String::from("line with fewer than two positions")));
            }
            let coords = positions
                .iter()
                .map(|p| projection.to_meters(p))
                .collect::<Result<Vec<_>>>()?;
            Ok(LineString::new(coords))
        };
        let polygon = |rings: &[Vec<Vec<f64>>]| -> Result<Polygon<f64>> {
            let (exterior, holes) = rings
                .split_first()
                .ok_or_else(|| Error::InvalidGeometry(String::from("polygon without rings")))?;
            if exterior.len() < 4 {
                return Err(Error::InvalidGeometry(String::from("ring with fewer than four positions")));
            }
            let holes = holes.iter().map(|ring| line(ring)).collect::<Result<Vec<_>>>()?;
            Ok(Polygon::new(line(exterior)?, holes))
        };

        Ok(match self {
            JsonGeometry::Point { coordinates } => Point::from(projection.to_meters(coordinates)?).into(),
            JsonGeometry::MultiPoint { coordinates } => MultiPoint::new(
                coordinates
                    .iter()
                    .map(|p| projection.to_meters(p).map(Point::from))
                    .collect::<Result<_>>()?,
            )
            .into(),
            JsonGeometry::LineString { coordinates } => line(coordinates)?.into(),
            JsonGeometry::MultiLineString { coordinates } => MultiLineString::new(
                coordinates.iter().map(|l| line(l)).collect::<Result<_>>()?,
            )
            .into(),
            JsonGeometry::Polygon { coordinates } => polygon(coordinates)?.into(),
            JsonGeometry::MultiPolygon { coordinates } => MultiPolygon::new(
                coordinates.iter().map(|p| polygon(p)).collect::<Result<_>>()?,
            )
            .into(),
            JsonGeometry::GeometryCollection { geometries } => {
                let parts = geometries
                    .iter()
                    .map(|g| g.to_geo(projection))
                    .collect::<Result<Vec<_>>>()?;
                Geometry::GeometryCollection(GeometryCollection::new_from(parts))
            }
        })
    }
}

/// Keeps the scalar properties. Nulls, arrays and objects have no attribute form.
pub(crate) fn attributes_from(properties: Option<serde_json::Map<String, Value>>) -> Attributes {
    properties
        .into_iter()
        .flatten()
        .filter_map(|(key, value)| {
            let value = match value {
                Value::Bool(b) => AttributeValue::Bool(b),
                Value::Number(n) => match n.as_i64() {
                    Some(i) => AttributeValue::Integer(i),
                    None => AttributeValue::Float(n.as_f64()?),
                },
                Value::String(s) => AttributeValue::String(s),
                Value::Null | Value::Array(_) | Value::Object(_) => return None,
            };
            Some((key, value))
        })
        .collect()
}

/// A FeatureCollection read once into memory.
///
/// Multi-part geometries are split into one feature per part, all carrying the
/// properties of the original feature. Features whose geometry is missing or malformed
/// are skipped with a warning.
#[derive(Debug)]
pub struct GeoJsonSource {
    identity: SourceIdentity,
    features: Vec<Feature>,
}

impl GeoJsonSource {
    pub fn parse(data: &str, projection: Projection) -> Result<GeoJsonSource> {
        let collection: FeatureCollection = serde_json::from_str(data)?;
        let identity = SourceIdentity::new();
        let mut features = Vec::new();
        let mut skipped = 0usize;

        for feature in collection.features {
            let Some(geometry) = feature.geometry else {
                skipped += 1;
                continue;
            };
            let geometry = match geometry.to_geo(projection) {
                Ok(geometry) => geometry,
                Err(e) => {
                    warn!(source = %identity.id(), "skipping feature: {}", e);
                    skipped += 1;
                    continue;
                }
            };
            let attributes = attributes_from(feature.properties);
            for part in decompose(geometry) {
                features.push(Feature {
                    id: identity.next_feature_id(),
                    geometry: part,
                    attributes: attributes.clone(),
                });
            }
        }

        info!(source = %identity.id(), features = features.len(), skipped, "loaded GeoJSON");
        Ok(GeoJsonSource { identity, features })
    }

    pub fn open(path: &Path, projection: Projection) -> Result<GeoJsonSource> {
        GeoJsonSource::parse(&fs::read_to_string(path)?, projection)
    }

    /// Removes every feature matching `remove`.
    pub fn except_where<F>(mut self, remove: F) -> GeoJsonSource
    where
        F: Fn(&Feature) -> bool,
    {
        self.features.retain(|feature| !remove(feature));
        self
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}

impl DataSource for GeoJsonSource {
    fn id(&self) -> DataSourceId {
        self.identity.id()
    }

    fn fetch(&self, envelope: &Envelope) -> Result<Vec<Feature>> {
        Ok(self
            .features
            .iter()
            .filter(|feature| {
                feature
                    .envelope()
                    .map_or(false, |bounds| bounds.intersects(envelope))
            })
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use assert_approx_eq::assert_approx_eq;
    use geo::Contains;

    use crate::mercator::google_tile_bounds;

    fn load() -> GeoJsonSource {
        GeoJsonSource::open(Path::new("test_data/features.geojson"), Projection::Wgs84)
            .expect("Unable to load the test GeoJSON file.")
    }

    #[test]
    fn test_parse_feature_collection() {
        let source = load();

        // Two single features, a two-part river, and one broken geometry skipped.
        assert_eq!(source.len(), 4);

        let kinds: Vec<&str> = source
            .features
            .iter()
            .map(|f| match f.geometry {
                Geometry::Point(_) => "point",
                Geometry::LineString(_) => "line",
                Geometry::Polygon(_) => "polygon",
                _ => "other",
            })
            .collect();
        assert_eq!(kinds, vec!["polygon", "point", "line", "line"]);
    }

    #[test]
    fn test_properties_become_attributes() {
        let source = load();
        let park = &source.features[0];

        assert_eq!(park.label("name"), Some("Central Park"));
        assert_eq!(park.attribute("leisure"), Some(&AttributeValue::from("park")));
        assert_eq!(park.attribute("area_rank"), Some(&AttributeValue::Integer(3)));
        assert_eq!(park.attribute("opened"), None);

        let river_parts: Vec<&Feature> = source
            .features
            .iter()
            .filter(|f| f.label("name") == Some("East River"))
            .collect();
        assert_eq!(river_parts.len(), 2);
        assert_ne!(river_parts[0].id, river_parts[1].id);
    }

    #[test]
    fn test_positions_are_reprojected() {
        let source = load();
        let Geometry::Point(cafe) = &source.features[1].geometry else {
            panic!("expected a point");
        };
        let expected = lat_lon_to_meters(40.7794, -73.9632);

        assert_approx_eq!(cafe.x(), expected.x, 1e-6);
        assert_approx_eq!(cafe.y(), expected.y, 1e-6);

        // Somewhere in Manhattan at zoom 12.
        let tile = google_tile_bounds(12, 1206, 1539);
        assert!(tile.to_rect().contains(cafe));
    }

    #[test]
    fn test_fetch_by_envelope() {
        let source = load();
        let cafe = source.features[1].envelope().unwrap();

        let near = source.fetch(&cafe.expand_by(10.0, 10.0)).unwrap();
        assert!(near.iter().any(|f| f.label("name") == Some("Museum Cafe")));

        let far = source.fetch(&Envelope::new(0.0, 0.0, 10.0, 10.0)).unwrap();
        assert!(far.is_empty());
    }

    #[test]
    fn test_except_where() {
        let source = load().except_where(|f| f.attribute("waterway").is_some());
        assert_eq!(source.len(), 2);
    }

    #[test]
    fn test_mercator_input_is_not_reprojected() {
        let data = r#"{"type": "FeatureCollection", "features": [
            {"type": "Feature", "properties": null,
             "geometry": {"type": "Point", "coordinates": [1000.0, -2000.0]}}
        ]}"#;
        let source = GeoJsonSource::parse(data, Projection::Mercator).unwrap();

        assert_eq!(source.features[0].geometry, Geometry::Point(Point::new(1000.0, -2000.0)));
        assert!(source.features[0].attributes.is_empty());
    }

    #[test]
    fn test_geometry_collection_is_split_into_parts() {
        let data = r#"{
            "type": "FeatureCollection",
            "features": [{
                "type": "Feature",
                "properties": { "name": "Pier" },
                "geometry": {
                    "type": "GeometryCollection",
                    "geometries": [
                        { "type": "Point", "coordinates": [-74.01, 40.70] },
                        { "type": "LineString", "coordinates": [[-74.01, 40.70], [-74.02, 40.71]] },
                        { "type": "MultiPoint", "coordinates": [[-74.00, 40.70], [-74.00, 40.71]] }
                    ]
                }
            }]
        }"#;

        let source = GeoJsonSource::parse(data, Projection::Wgs84).unwrap();

        assert_eq!(source.len(), 4);
        assert!(source.features.iter().all(|f| f.label("name") == Some("Pier")));
        assert!(matches!(source.features[1].geometry, Geometry::LineString(_)));
        assert!(source
            .features
            .iter()
            .all(|f| !matches!(f.geometry, Geometry::GeometryCollection(_) | Geometry::MultiPoint(_))));
    }

    #[test]
    fn test_invalid_json_is_an_error() {
        let result = GeoJsonSource::parse("{\"features\": 3}", Projection::Wgs84);
        assert!(matches!(result, Err(Error::GeoJson(_))));
    }
}
