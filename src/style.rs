//! Immutable styling configuration: layers, rules, filters and symbolizers.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use once_cell::sync::OnceCell;
use serde::Deserialize;

use crate::feature::{AttributeValue, Feature};
use crate::render::DrawingResources;
use crate::source::DataSource;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize)]
#[serde(try_from = "String")]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const WHITE: Color = Color::rgb(255, 255, 255);
    pub const BLACK: Color = Color::rgb(0, 0, 0);

    pub const fn rgb(r: u8, g: u8, b: u8) -> Color {
        Color { r, g, b, a: 255 }
    }

    pub const fn rgba(r: u8, g: u8, b: u8, a: u8) -> Color {
        Color { r, g, b, a }
    }

    /// Parses `#rgb`, `#rrggbb` or `#rrggbbaa`.
    pub fn from_hex(hex: &str) -> Option<Color> {
        let digits = hex.strip_prefix('#')?;
        if !digits.is_ascii() {
            return None;
        }
        let channel = |i: usize| u8::from_str_radix(&digits[i..i + 2], 16).ok();
        match digits.len() {
            3 => {
                let short = |i: usize| u8::from_str_radix(&digits[i..i + 1], 16).ok().map(|v| v * 17);
                Some(Color::rgb(short(0)?, short(1)?, short(2)?))
            }
            6 => Some(Color::rgb(channel(0)?, channel(2)?, channel(4)?)),
            8 => Some(Color::rgba(channel(0)?, channel(2)?, channel(4)?, channel(6)?)),
            _ => None,
        }
    }

    pub fn to_skia(self) -> tiny_skia::Color {
        tiny_skia::Color::from_rgba8(self.r, self.g, self.b, self.a)
    }
}

impl TryFrom<String> for Color {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Color::from_hex(value.trim()).ok_or_else(|| format!("invalid color {:?}", value))
    }
}

/// Stable identity of a symbolizer, used to key its drawing resources and lock.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SymbolizerId(u32);

impl fmt::Display for SymbolizerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

static NEXT_SYMBOLIZER_ID: AtomicU32 = AtomicU32::new(1);

#[derive(Clone, Debug, PartialEq)]
pub struct LineSymbolizer {
    pub color: Color,
    pub width: f32,
    /// Alternating dash and gap lengths as multiples of the width. `None` draws solid.
    pub dash_pattern: Option<Vec<f32>>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PolygonSymbolizer {
    pub fill: Color,
    pub stroke: Option<Color>,
    pub stroke_width: Option<f32>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PointShape {
    Circle,
    Square,
    Triangle,
    Star,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PointSymbolizer {
    pub color: Color,
    pub diameter: f32,
    pub shape: PointShape,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextPlacement {
    /// One label at the feature's point (or centroid).
    Point,
    /// Labels repeated along the line, following its direction.
    Line,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextAlignment {
    /// Centered on the anchor.
    Center,
    /// Starting just right of and above the anchor.
    TopRight,
}

/// Further reading: https://github.com/mapnik/mapnik/wiki/TextSymbolizer
#[derive(Clone, Debug, PartialEq)]
pub struct TextSymbolizer {
    pub label_attribute: String,
    pub placement: TextPlacement,
    /// Distance in pixels between repeated line labels. Zero places one label in the
    /// middle of the line.
    pub spacing: f32,
    /// Font size in points at 96 dpi.
    pub font_size: f32,
    /// Font family to look up. `None` picks the default sans-serif.
    pub font_family: Option<String>,
    pub bold: bool,
    pub color: Color,
    pub halo_color: Color,
    pub halo_width: f32,
    pub alignment: TextAlignment,
}

impl TextSymbolizer {
    pub fn new(label_attribute: &str, placement: TextPlacement) -> TextSymbolizer {
        TextSymbolizer {
            label_attribute: label_attribute.to_owned(),
            placement,
            spacing: 0.0,
            font_size: 14.0,
            font_family: None,
            bold: true,
            color: Color::BLACK,
            halo_color: Color::WHITE,
            halo_width: 3.0,
            alignment: TextAlignment::Center,
        }
    }

    pub fn with_spacing(mut self, spacing: f32) -> TextSymbolizer {
        self.spacing = spacing;
        self
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum SymbolizerStyle {
    Line(LineSymbolizer),
    Point(PointSymbolizer),
    Polygon(PolygonSymbolizer),
    Text(TextSymbolizer),
}

/// Style parameters for one kind of geometry, plus an identity assigned at construction.
/// Clones share the identity, and so share drawing resources.
#[derive(Clone, Debug, PartialEq)]
pub struct Symbolizer {
    id: SymbolizerId,
    style: SymbolizerStyle,
}

impl Symbolizer {
    pub fn new(style: SymbolizerStyle) -> Symbolizer {
        Symbolizer {
            id: SymbolizerId(NEXT_SYMBOLIZER_ID.fetch_add(1, Ordering::Relaxed)),
            style,
        }
    }

    pub fn line(color: Color, width: f32) -> Symbolizer {
        Symbolizer::new(SymbolizerStyle::Line(LineSymbolizer {
            color,
            width,
            dash_pattern: None,
        }))
    }

    pub fn polygon(fill: Color) -> Symbolizer {
        Symbolizer::new(SymbolizerStyle::Polygon(PolygonSymbolizer {
            fill,
            stroke: None,
            stroke_width: None,
        }))
    }

    pub fn point(color: Color, diameter: f32, shape: PointShape) -> Symbolizer {
        Symbolizer::new(SymbolizerStyle::Point(PointSymbolizer {
            color,
            diameter,
            shape,
        }))
    }

    pub fn text(text: TextSymbolizer) -> Symbolizer {
        Symbolizer::new(SymbolizerStyle::Text(text))
    }

    pub fn id(&self) -> SymbolizerId {
        self.id
    }

    pub fn style(&self) -> &SymbolizerStyle {
        &self.style
    }
}

/// A named predicate deciding whether a rule applies to a feature.
#[derive(Clone)]
pub struct Filter {
    name: String,
    accept: Arc<dyn Fn(&Feature) -> bool + Send + Sync>,
}

impl Filter {
    pub fn new<F>(name: &str, accept: F) -> Filter
    where
        F: Fn(&Feature) -> bool + Send + Sync + 'static,
    {
        Filter {
            name: name.to_owned(),
            accept: Arc::new(accept),
        }
    }

    pub fn attribute_equals(key: &str, value: impl Into<AttributeValue>) -> Filter {
        let value = value.into();
        let name = format!("{} == {}", key, value);
        let key = key.to_owned();
        Filter::new(&name, move |feature| feature.attribute(&key) == Some(&value))
    }

    pub fn attribute_one_of(key: &str, values: Vec<AttributeValue>) -> Filter {
        let shown: Vec<String> = values.iter().map(ToString::to_string).collect();
        let name = format!("{} in [{}]", key, shown.join(", "));
        let key = key.to_owned();
        Filter::new(&name, move |feature| {
            feature.attribute(&key).map_or(false, |v| values.contains(v))
        })
    }

    pub fn attribute_exists(key: &str) -> Filter {
        let name = format!("has {}", key);
        let key = key.to_owned();
        Filter::new(&name, move |feature| feature.attribute(&key).is_some())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn accepts(&self, feature: &Feature) -> bool {
        (self.accept)(feature)
    }
}

impl fmt::Debug for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Filter").field(&self.name).finish()
    }
}

fn zoom_in_range(zoom: u8, min_zoom: Option<u8>, max_zoom: Option<u8>) -> bool {
    min_zoom.map_or(true, |min| zoom >= min) && max_zoom.map_or(true, |max| zoom <= max)
}

/// A symbolizer with the zoom range and filter that decide when it draws.
#[derive(Clone, Debug)]
pub struct Rule {
    pub symbolizer: Symbolizer,
    pub min_zoom: Option<u8>,
    pub max_zoom: Option<u8>,
    pub filter: Option<Filter>,
}

impl Rule {
    pub fn new(symbolizer: Symbolizer) -> Rule {
        Rule {
            symbolizer,
            min_zoom: None,
            max_zoom: None,
            filter: None,
        }
    }

    pub fn min_zoom(mut self, zoom: u8) -> Rule {
        self.min_zoom = Some(zoom);
        self
    }

    pub fn max_zoom(mut self, zoom: u8) -> Rule {
        self.max_zoom = Some(zoom);
        self
    }

    pub fn filter(mut self, filter: Filter) -> Rule {
        self.filter = Some(filter);
        self
    }

    pub fn applies_at(&self, zoom: u8) -> bool {
        zoom_in_range(zoom, self.min_zoom, self.max_zoom)
    }

    pub fn accepts(&self, feature: &Feature) -> bool {
        self.filter.as_ref().map_or(true, |filter| filter.accepts(feature))
    }
}

/// How a layer's zoom range is derived from its rules.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ZoomDerivation {
    /// Minimum of the rules' minimum zooms and minimum of their maximum zooms. A rule
    /// whose maximum is above another rule's maximum never draws past the lower one.
    #[default]
    Legacy,
    /// Minimum of the minimums and maximum of the maximums: the layer is visible
    /// whenever any of its rules could draw.
    Union,
}

impl ZoomDerivation {
    fn derive(self, rules: &[Rule]) -> (Option<u8>, Option<u8>) {
        // A bound only exists when every rule specifies one.
        let all = |bound: fn(&Rule) -> Option<u8>| -> Option<Vec<u8>> {
            if rules.is_empty() {
                return None;
            }
            rules.iter().map(bound).collect()
        };
        let mins = all(|rule| rule.min_zoom);
        let maxes = all(|rule| rule.max_zoom);

        let min_zoom = mins.and_then(|m| m.into_iter().min());
        let max_zoom = match self {
            ZoomDerivation::Legacy => maxes.and_then(|m| m.into_iter().min()),
            ZoomDerivation::Union => maxes.and_then(|m| m.into_iter().max()),
        };
        (min_zoom, max_zoom)
    }
}

/// A data source bound to the ordered rules that draw its features.
#[derive(Clone)]
pub struct Layer {
    pub id: String,
    pub source: Arc<dyn DataSource>,
    pub rules: Vec<Rule>,
    min_zoom: Option<u8>,
    max_zoom: Option<u8>,
}

impl Layer {
    pub fn new(id: &str, source: Arc<dyn DataSource>, rules: Vec<Rule>) -> Layer {
        Layer::with_derivation(id, source, rules, ZoomDerivation::default())
    }

    pub fn with_derivation(
        id: &str,
        source: Arc<dyn DataSource>,
        rules: Vec<Rule>,
        derivation: ZoomDerivation,
    ) -> Layer {
        let (min_zoom, max_zoom) = derivation.derive(&rules);
        Layer {
            id: id.to_owned(),
            source,
            rules,
            min_zoom,
            max_zoom,
        }
    }

    /// The least zoomed in level this layer draws at.
    pub fn min_zoom(&self) -> Option<u8> {
        self.min_zoom
    }

    /// The most zoomed in level this layer draws at.
    pub fn max_zoom(&self) -> Option<u8> {
        self.max_zoom
    }

    pub fn visible_at(&self, zoom: u8) -> bool {
        zoom_in_range(zoom, self.min_zoom, self.max_zoom)
    }
}

impl fmt::Debug for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Layer")
            .field("id", &self.id)
            .field("source", &self.source.id())
            .field("rules", &self.rules)
            .field("min_zoom", &self.min_zoom)
            .field("max_zoom", &self.max_zoom)
            .finish()
    }
}

/// The background and layers of a map, shared by every tile rendered with it.
///
/// Drawing resources for the symbolizers are built by the first render and reused by
/// every later one.
#[derive(Debug)]
pub struct LayerConfig {
    pub background: Color,
    pub layers: Vec<Layer>,
    pub(crate) resources: OnceCell<DrawingResources>,
}

impl LayerConfig {
    pub fn new(background: Color, layers: Vec<Layer>) -> LayerConfig {
        LayerConfig {
            background,
            layers,
            resources: OnceCell::new(),
        }
    }

    pub fn symbolizers(&self) -> impl Iterator<Item = &Symbolizer> {
        self.layers
            .iter()
            .flat_map(|layer| layer.rules.iter().map(|rule| &rule.symbolizer))
    }

    /// Whether the drawing resources have been built.
    pub fn is_warm(&self) -> bool {
        self.resources.get().is_some()
    }
}

impl Default for LayerConfig {
    fn default() -> Self {
        LayerConfig::new(Color::WHITE, Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use geo::point;

    use crate::feature::FeatureId;
    use crate::source::MemorySource;

    fn line() -> Symbolizer {
        Symbolizer::line(Color::BLACK, 1.0)
    }

    fn source() -> Arc<dyn DataSource> {
        Arc::new(MemorySource::new())
    }

    #[test]
    fn test_color_parsing() {
        assert_eq!(Color::from_hex("#ff8000"), Some(Color::rgb(255, 128, 0)));
        assert_eq!(Color::from_hex("#ff800080"), Some(Color::rgba(255, 128, 0, 128)));
        assert_eq!(Color::from_hex("#fff"), Some(Color::WHITE));
        assert_eq!(Color::from_hex("ff8000"), None);
        assert_eq!(Color::from_hex("#ff80"), None);
        assert_eq!(Color::from_hex("#gg0000"), None);
    }

    #[test]
    fn test_symbolizer_ids() {
        let a = line();
        let b = line();

        assert_ne!(a.id(), b.id());
        assert_eq!(a.clone().id(), a.id());
    }

    #[test]
    fn test_layer_zoom_legacy_takes_minimum_of_both_bounds() {
        let layer = Layer::new(
            "roads",
            source(),
            vec![
                Rule::new(line()).min_zoom(10).max_zoom(14),
                Rule::new(line()).min_zoom(6).max_zoom(18),
            ],
        );

        assert_eq!(layer.min_zoom(), Some(6));
        assert_eq!(layer.max_zoom(), Some(14));
        assert!(!layer.visible_at(16));
    }

    #[test]
    fn test_layer_zoom_union() {
        let layer = Layer::with_derivation(
            "roads",
            source(),
            vec![
                Rule::new(line()).min_zoom(10).max_zoom(14),
                Rule::new(line()).min_zoom(6).max_zoom(18),
            ],
            ZoomDerivation::Union,
        );

        assert_eq!(layer.min_zoom(), Some(6));
        assert_eq!(layer.max_zoom(), Some(18));
        assert!(layer.visible_at(16));
    }

    #[test]
    fn test_layer_zoom_unbounded_if_any_rule_is() {
        let layer = Layer::new(
            "roads",
            source(),
            vec![Rule::new(line()).min_zoom(10).max_zoom(14), Rule::new(line())],
        );

        assert_eq!(layer.min_zoom(), None);
        assert_eq!(layer.max_zoom(), None);
        assert!(layer.visible_at(0));
        assert!(layer.visible_at(22));
    }

    #[test]
    fn test_rule_zoom_and_filter() {
        let rule = Rule::new(line())
            .min_zoom(5)
            .max_zoom(9)
            .filter(Filter::attribute_equals("highway", "primary"));
        let primary = Feature::new(FeatureId(1), point!(x: 0.0, y: 0.0))
            .with_attribute("highway", "primary");
        let service = Feature::new(FeatureId(2), point!(x: 0.0, y: 0.0))
            .with_attribute("highway", "service");

        assert!(!rule.applies_at(4));
        assert!(rule.applies_at(5));
        assert!(rule.applies_at(9));
        assert!(!rule.applies_at(10));
        assert!(rule.accepts(&primary));
        assert!(!rule.accepts(&service));
        assert_eq!(rule.filter.as_ref().map(Filter::name), Some("highway == primary"));
    }

    #[test]
    fn test_filter_one_of_and_exists() {
        let feature = Feature::new(FeatureId(1), point!(x: 0.0, y: 0.0))
            .with_attribute("lanes", 2i64);

        assert!(Filter::attribute_one_of("lanes", vec![1i64.into(), 2i64.into()]).accepts(&feature));
        assert!(!Filter::attribute_one_of("lanes", vec![3i64.into()]).accepts(&feature));
        assert!(Filter::attribute_exists("lanes").accepts(&feature));
        assert!(!Filter::attribute_exists("name").accepts(&feature));
    }
}
