//! YAML stylesheet format: sources, layers and their rules in one document.
//!
//! ```yaml
//! name: Demo
//! background: "#f2efe9"
//! sources:
//!   roads: { geojson: roads.geojson }
//! layers:
//!   - id: roads
//!     source: roads
//!     rules:
//!       - line: { color: "#ffffff", width: 3 }
//!         min_zoom: 10
//!         filter: { attribute: highway, equals: primary }
//!       - text: { attribute: name, placement: line, spacing: 200 }
//! ```
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;
use tracing::info;

use crate::cache::{CacheSettings, LruFeatureCache};
use crate::error::{Error, Result};
use crate::feature::AttributeValue;
use crate::geojson::{GeoJsonSource, Projection};
use crate::labels::{LabelSettings, PerZoomLabelIndex};
#[cfg(feature = "postgis")]
use crate::postgis::{PostgisSettings, PostgisSource};
use crate::source::DataSource;
use crate::style::{
    Color, Filter, Layer, LayerConfig, LineSymbolizer, PointShape, PointSymbolizer, PolygonSymbolizer, Rule,
    Symbolizer, SymbolizerStyle, TextAlignment, TextPlacement, TextSymbolizer, ZoomDerivation,
};
use crate::text::FontLibrary;

fn default_background() -> Color {
    Color::WHITE
}

/// A parsed stylesheet.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StyleSheet {
    pub name: String,
    #[serde(default = "default_background")]
    pub background: Color,
    #[serde(default)]
    pub cache: CacheSettings,
    #[serde(default)]
    pub labels: LabelSettings,
    /// Font files to load, relative to the stylesheet. System fonts are used if empty.
    #[serde(default)]
    pub fonts: Vec<PathBuf>,
    #[serde(default)]
    pub zoom_derivation: ZoomDerivation,
    #[serde(default)]
    pub sources: BTreeMap<String, SourceSpec>,
    pub layers: Vec<LayerSpec>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceSpec {
    /// Path of a GeoJSON FeatureCollection, relative to the stylesheet.
    pub geojson: Option<PathBuf>,
    #[serde(default)]
    pub projection: Projection,
    /// Features matching this filter are dropped when the file is loaded.
    pub except_where: Option<FilterSpec>,
    #[cfg(feature = "postgis")]
    pub postgis: Option<PostgisSettings>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LayerSpec {
    pub id: String,
    pub source: String,
    pub rules: Vec<RuleSpec>,
    /// Overrides the stylesheet's zoom derivation for this layer.
    pub zoom_derivation: Option<ZoomDerivation>,
}

/// One rule. Exactly one of the symbolizer keys must be present.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleSpec {
    pub line: Option<LineSpec>,
    pub polygon: Option<PolygonSpec>,
    pub point: Option<PointSpec>,
    pub text: Option<TextSpec>,
    pub min_zoom: Option<u8>,
    pub max_zoom: Option<u8>,
    pub filter: Option<FilterSpec>,
}

fn default_line_width() -> f32 {
    1.0
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LineSpec {
    pub color: Color,
    #[serde(default = "default_line_width")]
    pub width: f32,
    /// Dash and gap lengths as multiples of the width.
    pub dash: Option<Vec<f32>>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolygonSpec {
    pub fill: Color,
    pub stroke: Option<Color>,
    pub stroke_width: Option<f32>,
}

fn default_diameter() -> f32 {
    8.0
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PointSpec {
    pub color: Color,
    #[serde(default = "default_diameter")]
    pub diameter: f32,
    pub shape: Option<PointShape>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TextSpec {
    pub attribute: String,
    pub placement: Option<TextPlacement>,
    pub spacing: Option<f32>,
    pub font_size: Option<f32>,
    pub font_family: Option<String>,
    pub bold: Option<bool>,
    pub color: Option<Color>,
    pub halo_color: Option<Color>,
    pub halo_width: Option<f32>,
    pub alignment: Option<TextAlignment>,
}

/// An attribute test. Exactly one of `equals`, `one_of` and `exists` must be present.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FilterSpec {
    pub attribute: String,
    pub equals: Option<AttributeValue>,
    pub one_of: Option<Vec<AttributeValue>>,
    pub exists: Option<bool>,
}

impl FilterSpec {
    fn to_filter(&self) -> Result<Filter> {
        let key = self.attribute.as_str();
        match (&self.equals, &self.one_of, self.exists) {
            (Some(value), None, None) => Ok(Filter::attribute_equals(key, value.clone())),
            (None, Some(values), None) => Ok(Filter::attribute_one_of(key, values.clone())),
            (None, None, Some(true)) => Ok(Filter::attribute_exists(key)),
            (None, None, Some(false)) => {
                let owned = key.to_owned();
                Ok(Filter::new(&format!("lacks {}", key), move |feature| {
                    feature.attribute(&owned).is_none()
                }))
            }
            _ => Err(Error::InvalidStyle(format!(
                "filter on {:?} needs exactly one of equals, one_of or exists",
                key
            ))),
        }
    }
}

impl TextSpec {
    fn to_symbolizer(&self) -> Result<TextSymbolizer> {
        if let Some(spacing) = self.spacing {
            if !spacing.is_finite() || spacing < 0.0 {
                return Err(Error::InvalidStyle(format!(
                    "text spacing for {:?} must be zero or positive, found {}",
                    self.attribute, spacing
                )));
            }
        }
        let defaults = TextSymbolizer::new(&self.attribute, self.placement.unwrap_or(TextPlacement::Point));
        Ok(TextSymbolizer {
            spacing: self.spacing.unwrap_or(defaults.spacing),
            font_size: self.font_size.unwrap_or(defaults.font_size),
            font_family: self.font_family.clone(),
            bold: self.bold.unwrap_or(defaults.bold),
            color: self.color.unwrap_or(defaults.color),
            halo_color: self.halo_color.unwrap_or(defaults.halo_color),
            halo_width: self.halo_width.unwrap_or(defaults.halo_width),
            alignment: self.alignment.unwrap_or(defaults.alignment),
            ..defaults
        })
    }
}

impl RuleSpec {
    fn symbolizer_style(&self) -> Result<SymbolizerStyle> {
        let mut styles = Vec::new();
        if let Some(line) = &self.line {
            styles.push(SymbolizerStyle::Line(LineSymbolizer {
                color: line.color,
                width: line.width,
                dash_pattern: line.dash.clone(),
            }));
        }
        if let Some(polygon) = &self.polygon {
            styles.push(SymbolizerStyle::Polygon(PolygonSymbolizer {
                fill: polygon.fill,
                stroke: polygon.stroke,
                stroke_width: polygon.stroke_width,
            }));
        }
        if let Some(point) = &self.point {
            styles.push(SymbolizerStyle::Point(PointSymbolizer {
                color: point.color,
                diameter: point.diameter,
                shape: point.shape.unwrap_or(PointShape::Circle),
            }));
        }
        if let Some(text) = &self.text {
            styles.push(SymbolizerStyle::Text(text.to_symbolizer()?));
        }

        match styles.len() {
            1 => Ok(styles.remove(0)),
            n => Err(Error::InvalidStyle(format!(
                "a rule needs exactly one of line, polygon, point or text, found {}",
                n
            ))),
        }
    }

    fn to_rule(&self) -> Result<Rule> {
        if let (Some(min), Some(max)) = (self.min_zoom, self.max_zoom) {
            if min > max {
                return Err(Error::InvalidStyle(format!("min_zoom {} is above max_zoom {}", min, max)));
            }
        }
        Ok(Rule {
            symbolizer: Symbolizer::new(self.symbolizer_style()?),
            min_zoom: self.min_zoom,
            max_zoom: self.max_zoom,
            filter: self.filter.as_ref().map(FilterSpec::to_filter).transpose()?,
        })
    }
}

fn resolve(base_dir: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    }
}

impl StyleSheet {
    /// Parses and validates a stylesheet.
    pub fn from_yaml(data: &str) -> Result<StyleSheet> {
        let sheet: StyleSheet = serde_yaml::from_str(data)?;
        sheet.validate()?;
        Ok(sheet)
    }

    pub fn open(path: &Path) -> Result<StyleSheet> {
        StyleSheet::from_yaml(&fs::read_to_string(path)?)
    }

    fn validate(&self) -> Result<()> {
        for (name, source) in &self.sources {
            source.validate(name)?;
        }
        for layer in &self.layers {
            if !self.sources.contains_key(&layer.source) {
                return Err(Error::InvalidStyle(format!(
                    "layer {:?} uses unknown source {:?}",
                    layer.id, layer.source
                )));
            }
            for rule in &layer.rules {
                rule.to_rule()?;
            }
        }
        Ok(())
    }

    /// Opens every source, resolving file paths against `base_dir`.
    pub fn open_sources(&self, base_dir: &Path) -> Result<HashMap<String, Arc<dyn DataSource>>> {
        self.sources
            .iter()
            .map(|(name, spec)| Ok((name.clone(), spec.open(base_dir)?)))
            .collect()
    }

    /// Builds the layer configuration, binding layers to already opened sources.
    pub fn build(&self, sources: &HashMap<String, Arc<dyn DataSource>>) -> Result<LayerConfig> {
        let mut layers = Vec::with_capacity(self.layers.len());
        for spec in &self.layers {
            let source = sources
                .get(&spec.source)
                .ok_or_else(|| Error::InvalidStyle(format!("source {:?} was not opened", spec.source)))?;
            let rules = spec.rules.iter().map(RuleSpec::to_rule).collect::<Result<Vec<_>>>()?;
            layers.push(Layer::with_derivation(
                &spec.id,
                Arc::clone(source),
                rules,
                spec.zoom_derivation.unwrap_or(self.zoom_derivation),
            ));
        }
        info!(name = %self.name, layers = layers.len(), "built layer configuration");
        Ok(LayerConfig::new(self.background, layers))
    }

    pub fn feature_cache(&self) -> LruFeatureCache {
        LruFeatureCache::new(self.cache)
    }

    pub fn label_index(&self) -> PerZoomLabelIndex {
        PerZoomLabelIndex::new(self.labels)
    }

    /// The listed fonts, resolved against `base_dir`, or the system fonts if none are.
    pub fn font_library(&self, base_dir: &Path) -> Result<FontLibrary> {
        if self.fonts.is_empty() {
            return Ok(FontLibrary::system());
        }
        let mut library = FontLibrary::empty();
        for font in &self.fonts {
            library.add_font_file(&resolve(base_dir, font))?;
        }
        Ok(library)
    }
}

impl SourceSpec {
    fn validate(&self, name: &str) -> Result<()> {
        #[cfg(feature = "postgis")]
        let kinds = usize::from(self.geojson.is_some()) + usize::from(self.postgis.is_some());
        #[cfg(not(feature = "postgis"))]
        let kinds = usize::from(self.geojson.is_some());

        if kinds != 1 {
            return Err(Error::InvalidStyle(format!("source {:?} needs exactly one backend", name)));
        }
        if let Some(filter) = &self.except_where {
            filter.to_filter()?;
        }
        Ok(())
    }

    fn open(&self, base_dir: &Path) -> Result<Arc<dyn DataSource>> {
        if let Some(path) = &self.geojson {
            let mut source = GeoJsonSource::open(&resolve(base_dir, path), self.projection)?;
            if let Some(filter) = &self.except_where {
                let filter = filter.to_filter()?;
                source = source.except_where(|feature| filter.accepts(feature));
            }
            return Ok(Arc::new(source));
        }
        #[cfg(feature = "postgis")]
        {
            if let Some(settings) = &self.postgis {
                return Ok(Arc::new(PostgisSource::connect(settings)?));
            }
        }
        Err(Error::InvalidStyle(String::from("source has no backend")))
    }
}
