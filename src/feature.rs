use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use geo::{BoundingRect, Geometry};
use serde::Deserialize;

use crate::envelope::Envelope;
use crate::source::DataSourceId;

/// A process-unique feature id: the owning data source's id in the high 32 bits and a
/// per-source counter in the low 32 bits.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FeatureId(pub u64);

impl FeatureId {
    pub fn new(source: DataSourceId, local: u32) -> FeatureId {
        FeatureId((u64::from(source.0) << 32) | u64::from(local))
    }

    pub fn source(&self) -> DataSourceId {
        DataSourceId((self.0 >> 32) as u32)
    }

    pub fn local(&self) -> u32 {
        self.0 as u32
    }
}

impl fmt::Display for FeatureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.source(), self.local())
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
}

impl AttributeValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttributeValue::String(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::Bool(b) => write!(f, "{}", b),
            AttributeValue::Integer(i) => write!(f, "{}", i),
            AttributeValue::Float(v) => write!(f, "{}", v),
            AttributeValue::String(s) => f.write_str(s),
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        AttributeValue::String(value.to_owned())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        AttributeValue::String(value)
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        AttributeValue::Integer(value)
    }
}

impl From<f64> for AttributeValue {
    fn from(value: f64) -> Self {
        AttributeValue::Float(value)
    }
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        AttributeValue::Bool(value)
    }
}

pub type Attributes = HashMap<String, AttributeValue>;

/// A geometry in EPSG:3857 meters with its attributes and a unique id.
#[derive(Clone, Debug, PartialEq)]
pub struct Feature {
    pub id: FeatureId,
    pub geometry: Geometry<f64>,
    pub attributes: Attributes,
}

impl Feature {
    pub fn new(id: FeatureId, geometry: impl Into<Geometry<f64>>) -> Feature {
        Feature {
            id,
            geometry: geometry.into(),
            attributes: Attributes::new(),
        }
    }

    pub fn with_attribute(mut self, key: &str, value: impl Into<AttributeValue>) -> Feature {
        self.attributes.insert(key.to_owned(), value.into());
        self
    }

    pub fn attribute(&self, key: &str) -> Option<&AttributeValue> {
        self.attributes.get(key)
    }

    /// The text to show for a label keyed on `key`. Missing, non-string and blank values
    /// all yield `None`.
    pub fn label(&self, key: &str) -> Option<&str> {
        self.attribute(key)
            .and_then(AttributeValue::as_str)
            .filter(|s| !s.trim().is_empty())
    }

    pub fn envelope(&self) -> Option<Envelope> {
        self.geometry.bounding_rect().map(Envelope::from)
    }
}

/// The features fetched for one source and tile, shared between the cache and renders.
pub type FeatureList = Arc<Vec<Feature>>;
