//! # Tile Painter
//!
//! Tools for rendering raster map tiles from vector features.
//!
//! ## Current status
//!
//! This crate should be regarded as stable in terms of rendering output, but not yet
//! stable in terms of trait and method signatures. We are releasing this code in Rust
//! tradition as 0.x until we feel the interface and feature set have stabilized.
//!
//! ## Current features
//!
//! Given a [`LayerConfig`] (an ordered list of layers, each binding a [`DataSource`] to
//! styling rules) this crate renders XYZ slippy map tiles in spherical Mercator
//! (EPSG:3857) to PNG. It takes care of:
//!
//! * fetching each source once per tile, through a bounded LRU [`FeatureCache`] that
//!   never fetches the same tile twice at once;
//! * drawing lines, polygons with holes, point markers and text with halos;
//! * placing labels along lines and at points without overlapping labels already placed
//!   in any other tile at that zoom level ([`PerZoomLabelIndex`]);
//! * loading all of the above from a YAML [`StyleSheet`].
//!
//! Features can come from memory, GeoJSON files or (with the `postgis` feature) a
//! PostGIS table.
//!
//! ## Known Limitations
//!
//! Sources are assumed to hold EPSG:3857 meters, apart from GeoJSON files which are
//! reprojected from WGS84 on load. Map rotation only affects the orientation of labels.
//! Placed labels are kept until the label index is reset; deciding when to do that is up
//! to the calling application.
//!
//! The trait-based design allows for further extensibility, so additional data sources,
//! caching and label policies can be plugged in.

pub mod cache;
pub mod canvas;
pub mod envelope;
pub mod error;
pub mod feature;
pub mod geojson;
pub mod labels;
pub mod linear;
pub mod mercator;
#[cfg(feature = "postgis")]
pub mod postgis;
pub mod render;
pub mod source;
pub mod style;
pub mod stylesheet;
pub mod text;
pub mod tile;

pub use cache::{CacheSettings, FeatureCache, LruFeatureCache, NullCache};
pub use canvas::RasterImage;
pub use envelope::Envelope;
pub use error::{Error, Result};
pub use feature::{AttributeValue, Attributes, Feature, FeatureId};
pub use geojson::GeoJsonSource;
pub use labels::{LabelDetails, LabelOverlapPreventer, LabelSettings, PerZoomLabelIndex};
pub use render::Renderer;
pub use source::{DataSource, DataSourceId, MemorySource};
pub use style::{Color, Filter, Layer, LayerConfig, Rule, Symbolizer, TextSymbolizer};
pub use stylesheet::StyleSheet;
pub use text::FontLibrary;
pub use tile::TileConfig;
