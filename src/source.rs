use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

use geo::Geometry;

use crate::envelope::Envelope;
use crate::error::Result;
use crate::feature::{Attributes, Feature, FeatureId};

/// A small integer identifying a data source for the lifetime of the process.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DataSourceId(pub u32);

impl fmt::Display for DataSourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

static NEXT_SOURCE_ID: AtomicU32 = AtomicU32::new(1);

/// Hands out the id of a data source and the ids of the features it produces.
///
/// Every instance takes the next id from a process-wide counter (the first is 1), so
/// feature ids minted here never collide with those of another source.
#[derive(Debug)]
pub struct SourceIdentity {
    id: DataSourceId,
    next_local: AtomicU32,
}

impl SourceIdentity {
    pub fn new() -> SourceIdentity {
        SourceIdentity {
            id: DataSourceId(NEXT_SOURCE_ID.fetch_add(1, Ordering::Relaxed)),
            next_local: AtomicU32::new(0),
        }
    }

    pub fn id(&self) -> DataSourceId {
        self.id
    }

    pub fn next_feature_id(&self) -> FeatureId {
        FeatureId::new(self.id, self.next_local.fetch_add(1, Ordering::Relaxed))
    }

    /// A feature id for a source-provided row number, e.g. a database primary key.
    pub fn feature_id_for(&self, local: u32) -> FeatureId {
        FeatureId::new(self.id, local)
    }
}

impl Default for SourceIdentity {
    fn default() -> Self {
        SourceIdentity::new()
    }
}

/// This is the main trait consumed by the renderer: anything that can list the
/// features near a tile.
pub trait DataSource: Send + Sync {
    fn id(&self) -> DataSourceId;

    /// Returns every feature whose bounding box intersects `envelope`. Returning extra
    /// features is fine, dropping any is not. Feature ids must be stable between calls.
    fn fetch(&self, envelope: &Envelope) -> Result<Vec<Feature>>;
}

/// Splits multi-part geometries into their parts so symbolizers only ever see single
/// lines, polygons and points. Collections are flattened recursively.
pub fn decompose(geometry: Geometry<f64>) -> Vec<Geometry<f64>> {
    match geometry {
        Geometry::MultiPoint(multi) => multi.0.into_iter().map(Geometry::Point).collect(),
        Geometry::MultiLineString(multi) => {
            multi.0.into_iter().map(Geometry::LineString).collect()
        }
        Geometry::MultiPolygon(multi) => multi.0.into_iter().map(Geometry::Polygon).collect(),
        Geometry::GeometryCollection(collection) => {
            collection.0.into_iter().flat_map(decompose).collect()
        }
        other => vec![other],
    }
}

/// Features held in memory, filtered by bounding box on every fetch.
#[derive(Debug)]
pub struct MemorySource {
    identity: SourceIdentity,
    features: Vec<Feature>,
}

impl MemorySource {
    pub fn new() -> MemorySource {
        MemorySource {
            identity: SourceIdentity::new(),
            features: Vec::new(),
        }
    }

    /// Adds a geometry, decomposing multi-part geometries into one feature per part.
    /// Returns the id of the first feature added.
    pub fn push(&mut self, geometry: impl Into<Geometry<f64>>, attributes: Attributes) -> FeatureId {
        let mut first = None;
        for part in decompose(geometry.into()) {
            let id = self.identity.next_feature_id();
            first.get_or_insert(id);
            self.features.push(Feature {
                id,
                geometry: part,
                attributes: attributes.clone(),
            });
        }
        first.unwrap_or_else(|| self.identity.next_feature_id())
    }

    pub fn with(mut self, geometry: impl Into<Geometry<f64>>, attributes: Attributes) -> MemorySource {
        self.push(geometry, attributes);
        self
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}

impl Default for MemorySource {
    fn default() -> Self {
        MemorySource::new()
    }
}

impl DataSource for MemorySource {
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

    use geo::{line_string, point, polygon, MultiLineString};

    #[test]
    fn test_source_ids_are_unique_and_start_at_one() {
        let a = SourceIdentity::new();
        let b = SourceIdentity::new();

        assert!(a.id().0 >= 1);
        assert_ne!(a.id(), b.id());
        assert_ne!(a.next_feature_id(), b.next_feature_id());
    }

    #[test]
    fn test_memory_source_filters_by_envelope() {
        let source = MemorySource::new()
            .with(point!(x: 5.0, y: 5.0), Attributes::new())
            .with(point!(x: 50.0, y: 50.0), Attributes::new())
            .with(
                polygon![(x: 8.0, y: 8.0), (x: 20.0, y: 8.0), (x: 20.0, y: 20.0)],
                Attributes::new(),
            );

        let found = source.fetch(&Envelope::new(0.0, 0.0, 10.0, 10.0)).unwrap();
        assert_eq!(found.len(), 2);
        assert!(found.iter().all(|f| f.id.source() == source.id()));
    }

    #[test]
    fn test_multi_parts_become_features_with_shared_attributes() {
        let mut attributes = Attributes::new();
        attributes.insert("name".to_owned(), "River".into());
        let multi = MultiLineString::new(vec![
            line_string![(x: 0.0, y: 0.0), (x: 1.0, y: 1.0)],
            line_string![(x: 2.0, y: 2.0), (x: 3.0, y: 3.0)],
        ]);

        let mut source = MemorySource::new();
        source.push(multi, attributes);

        let found = source.fetch(&Envelope::new(-1.0, -1.0, 4.0, 4.0)).unwrap();
        assert_eq!(found.len(), 2);
        assert_ne!(found[0].id, found[1].id);
        assert!(found.iter().all(|f| f.label("name") == Some("River")));
    }
}
