//! The rendering pipeline: layers, rules and symbolizers turned into pixels.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use geo::{Centroid, Coord, Geometry, LineString, Polygon};
use tiny_skia::{LineJoin, Paint, Point, Stroke, StrokeDash, Transform};
use tracing::{debug, info, trace};

use crate::cache::FeatureCache;
use crate::canvas::{Canvas, RasterImage};
use crate::error::{Error, Result};
use crate::feature::{Feature, FeatureList};
use crate::labels::{LabelDetails, LabelOverlapPreventer};
use crate::linear;
use crate::source::DataSourceId;
use crate::style::{
    Color, LayerConfig, LineSymbolizer, PointShape, PointSymbolizer, PolygonSymbolizer, SymbolizerId,
    SymbolizerStyle, TextAlignment, TextPlacement, TextSymbolizer,
};
use crate::text::{FontLibrary, GlyphCache, LabelFont, TextMetrics, PIXELS_PER_POINT};
use crate::tile::TileConfig;

fn paint(color: Color) -> Paint<'static> {
    let mut paint = Paint::default();
    paint.set_color(color.to_skia());
    paint.anti_alias = true;
    paint
}

struct LineResources {
    paint: Paint<'static>,
    stroke: Stroke,
}

struct PolygonResources {
    fill: Paint<'static>,
    outline: Option<(Paint<'static>, Stroke)>,
}

struct PointResources {
    paint: Paint<'static>,
    diameter: f32,
    shape: PointShape,
}

struct TextResources {
    style: TextSymbolizer,
    font: LabelFont,
    size_px: f32,
    fill: Paint<'static>,
    halo: Option<(Paint<'static>, Stroke)>,
    glyphs: GlyphCache,
}

/// Pens, brushes and fonts derived from one symbolizer.
enum SymbolizerResources {
    Line(LineResources),
    Polygon(PolygonResources),
    Point(PointResources),
    Text(TextResources),
}

impl SymbolizerResources {
    fn build(style: &SymbolizerStyle, fonts: &FontLibrary) -> Result<SymbolizerResources> {
        Ok(match style {
            SymbolizerStyle::Line(line) => SymbolizerResources::Line(LineResources {
                paint: paint(line.color),
                stroke: line_stroke(line)?,
            }),
            SymbolizerStyle::Polygon(polygon) => SymbolizerResources::Polygon(polygon_resources(polygon)),
            SymbolizerStyle::Point(point) => SymbolizerResources::Point(point_resources(point)),
            SymbolizerStyle::Text(text) => SymbolizerResources::Text(text_resources(text, fonts)?),
        })
    }
}

fn line_stroke(line: &LineSymbolizer) -> Result<Stroke> {
    let mut stroke = Stroke {
        width: line.width,
        ..Stroke::default()
    };
    if let Some(pattern) = &line.dash_pattern {
        // Dash lengths are multiples of the line width.
        let scaled = pattern.iter().map(|len| len * line.width).collect();
        stroke.dash = Some(StrokeDash::new(scaled, 0.0).ok_or_else(|| {
            Error::InvalidStyle(format!("invalid dash pattern {:?}", pattern))
        })?);
    }
    Ok(stroke)
}

fn polygon_resources(polygon: &PolygonSymbolizer) -> PolygonResources {
    let outline = match (polygon.stroke, polygon.stroke_width) {
        (Some(color), Some(width)) if width > 0.0 => Some((
            paint(color),
            Stroke {
                width,
                ..Stroke::default()
            },
        )),
        _ => None,
    };
    PolygonResources {
        fill: paint(polygon.fill),
        outline,
    }
}

fn point_resources(point: &PointSymbolizer) -> PointResources {
    PointResources {
        paint: paint(point.color),
        diameter: point.diameter,
        shape: point.shape,
    }
}

fn text_resources(text: &TextSymbolizer, fonts: &FontLibrary) -> Result<TextResources> {
    let halo = (text.halo_width > 0.0).then(|| {
        (
            paint(text.halo_color),
            Stroke {
                width: text.halo_width,
                line_join: LineJoin::Round,
                ..Stroke::default()
            },
        )
    });
    Ok(TextResources {
        style: text.clone(),
        font: fonts.resolve(text.font_family.as_deref(), text.bold)?,
        size_px: text.font_size * PIXELS_PER_POINT,
        fill: paint(text.color),
        halo,
        glyphs: GlyphCache::default(),
    })
}

/// Drawing resources for every symbolizer of a [`LayerConfig`], keyed by symbolizer id.
///
/// Each entry has its own lock: draws with one symbolizer are serialized, draws with
/// different symbolizers run in parallel.
pub struct DrawingResources {
    symbolizers: HashMap<SymbolizerId, Mutex<SymbolizerResources>>,
}

impl DrawingResources {
    fn build(config: &LayerConfig, fonts: &FontLibrary) -> Result<DrawingResources> {
        let mut symbolizers = HashMap::new();
        for symbolizer in config.symbolizers() {
            if let Entry::Vacant(entry) = symbolizers.entry(symbolizer.id()) {
                entry.insert(Mutex::new(SymbolizerResources::build(symbolizer.style(), fonts)?));
            }
        }
        info!(symbolizers = symbolizers.len(), "built drawing resources");
        Ok(DrawingResources { symbolizers })
    }

    fn get(&self, id: SymbolizerId) -> Result<&Mutex<SymbolizerResources>> {
        self.symbolizers.get(&id).ok_or(Error::MissingResources(id))
    }

    pub fn len(&self) -> usize {
        self.symbolizers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbolizers.is_empty()
    }
}

impl fmt::Debug for DrawingResources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DrawingResources")
            .field("symbolizers", &self.symbolizers.len())
            .finish()
    }
}

/// Renders tiles. The feature cache, label index and fonts are shared by every tile the
/// renderer draws; everything specific to one tile lives in a per-call context, so one
/// renderer can serve many threads.
#[derive(Clone)]
pub struct Renderer {
    features: Arc<dyn FeatureCache>,
    labels: Arc<dyn LabelOverlapPreventer>,
    fonts: Arc<FontLibrary>,
}

impl Renderer {
    pub fn new(
        features: Arc<dyn FeatureCache>,
        labels: Arc<dyn LabelOverlapPreventer>,
        fonts: Arc<FontLibrary>,
    ) -> Renderer {
        Renderer {
            features,
            labels,
            fonts,
        }
    }

    /// Renders the XYZ tile `zoom/x/y` as a `pixel_size` square image.
    pub fn render(
        &self,
        config: &Arc<LayerConfig>,
        zoom: u8,
        x: u32,
        y: u32,
        pixel_size: u32,
    ) -> Result<RasterImage> {
        self.generate_tile(&TileConfig::new(zoom, x, y, pixel_size, Arc::clone(config)))
    }

    #[tracing::instrument(skip_all, fields(zoom = tile.zoom, x = tile.x, y = tile.y))]
    pub fn generate_tile(&self, tile: &TileConfig) -> Result<RasterImage> {
        let config = &tile.layer_config;
        let resources = config
            .resources
            .get_or_try_init(|| DrawingResources::build(config, &self.fonts))?;

        let mut render = TileRender {
            tile,
            canvas: Canvas::new(tile.pixel_size, config.background)?,
            labels: self.labels.as_ref(),
        };
        let mut fetched: HashMap<DataSourceId, FeatureList> = HashMap::new();

        for layer in &config.layers {
            if !layer.visible_at(tile.zoom) {
                trace!(layer = %layer.id, "layer not visible at this zoom");
                continue;
            }

            let features = match fetched.entry(layer.source.id()) {
                Entry::Occupied(entry) => Arc::clone(entry.get()),
                Entry::Vacant(entry) => {
                    let features = self.features.fetch(tile, layer.source.as_ref())?;
                    debug!(layer = %layer.id, count = features.len(), "fetched features");
                    Arc::clone(entry.insert(features))
                }
            };

            for rule in &layer.rules {
                if !rule.applies_at(tile.zoom) {
                    continue;
                }
                let slot = resources.get(rule.symbolizer.id())?;
                for feature in features.iter().filter(|feature| rule.accepts(feature)) {
                    let mut symbolizer = slot.lock().unwrap_or_else(PoisonError::into_inner);
                    render.draw(&mut symbolizer, feature)?;
                }
            }
        }

        Ok(render.canvas.finish())
    }
}

/// The state of one tile being drawn.
struct TileRender<'a> {
    tile: &'a TileConfig,
    canvas: Canvas,
    labels: &'a dyn LabelOverlapPreventer,
}

impl TileRender<'_> {
    fn draw(&mut self, resources: &mut SymbolizerResources, feature: &Feature) -> Result<()> {
        match resources {
            SymbolizerResources::Line(line) => self.draw_line(line, feature),
            SymbolizerResources::Polygon(polygon) => self.draw_polygon(polygon, feature),
            SymbolizerResources::Point(point) => self.draw_point(point, feature),
            SymbolizerResources::Text(text) => return self.draw_text(text, feature),
        }
        Ok(())
    }

    fn project(&self, line: &LineString<f64>) -> Vec<Point> {
        self.tile.project_all(line.coords())
    }

    fn draw_line(&mut self, line: &LineResources, feature: &Feature) {
        let parts = line_parts(&feature.geometry);
        if parts.is_empty() {
            skip(feature, "line");
        }
        for part in parts {
            let points = self.project(part);
            self.canvas.stroke_polyline(&points, &line.paint, &line.stroke);
        }
    }

    fn draw_polygon(&mut self, style: &PolygonResources, feature: &Feature) {
        let polygons = polygon_parts(&feature.geometry);
        if polygons.is_empty() {
            skip(feature, "polygon");
        }
        for polygon in polygons {
            let exterior = self.project(polygon.exterior());
            let holes: Vec<Vec<Point>> = polygon.interiors().iter().map(|hole| self.project(hole)).collect();
            let outline = style.outline.as_ref().map(|(paint, stroke)| (paint, stroke));
            self.canvas.fill_polygon(&exterior, &holes, &style.fill, outline);
        }
    }

    fn draw_point(&mut self, point: &PointResources, feature: &Feature) {
        let coords: Vec<Coord<f64>> = match &feature.geometry {
            Geometry::Point(p) => vec![p.0],
            Geometry::MultiPoint(multi) => multi.iter().map(|p| p.0).collect(),
            _ => {
                skip(feature, "point");
                return;
            }
        };
        for coord in coords {
            let center = self.tile.project_point(coord);
            self.canvas.fill_shape(center, point.diameter, point.shape, &point.paint);
        }
    }

    fn draw_text(&mut self, text: &mut TextResources, feature: &Feature) -> Result<()> {
        let Some(label) = feature.label(&text.style.label_attribute) else {
            return Ok(());
        };
        let metrics = text.font.measure(label, text.size_px)?;

        match text.style.placement {
            TextPlacement::Point => self.draw_point_label(text, feature, label, metrics),
            TextPlacement::Line => self.draw_line_label(text, feature, label, metrics),
        }
    }

    fn draw_point_label(
        &mut self,
        text: &mut TextResources,
        feature: &Feature,
        label: &str,
        metrics: TextMetrics,
    ) -> Result<()> {
        let Some(anchor) = label_anchor(&feature.geometry) else {
            skip(feature, "point label");
            return Ok(());
        };
        let center = self.tile.project(anchor);
        let size = (f64::from(metrics.width), f64::from(metrics.ascent));
        let offset = match text.style.alignment {
            TextAlignment::Center => (0.0, 0.0),
            TextAlignment::TopRight => (size.0 * 0.5, -size.1 * 0.5),
        };

        self.try_draw_label(text, feature, label, center, offset, size, -f64::from(self.tile.angle))
    }

    fn draw_line_label(
        &mut self,
        text: &mut TextResources,
        feature: &Feature,
        label: &str,
        metrics: TextMetrics,
    ) -> Result<()> {
        let parts = line_parts(&feature.geometry);
        if parts.is_empty() {
            skip(feature, "line label");
        }
        let size = (f64::from(metrics.width), f64::from(metrics.ascent));

        for part in parts {
            let pixels: Vec<Coord<f64>> = part.coords().map(|c| self.tile.project(*c)).collect();
            let placements = linear::line_label_placements(
                &pixels,
                size.0,
                f64::from(text.style.spacing),
                f64::from(self.tile.angle),
            );
            for placement in placements {
                self.try_draw_label(text, feature, label, placement.anchor, (0.0, 0.0), size, placement.angle)?;
            }
        }
        Ok(())
    }

    /// Draws the label if the overlap index accepts its box. `center` is the rotation
    /// centre in tile pixels, `offset` moves the box from there before rotating.
    #[allow(clippy::too_many_arguments)]
    fn try_draw_label(
        &mut self,
        text: &mut TextResources,
        feature: &Feature,
        label: &str,
        center: Coord<f64>,
        offset: (f64, f64),
        size: (f64, f64),
        angle: f64,
    ) -> Result<()> {
        let outline = collision_box(center, offset, size, angle, self.tile.world_pixel_offset());
        if !self
            .labels
            .can_place_label(self.tile.zoom, LabelDetails::new(outline, feature.id))
        {
            trace!(feature = %feature.id, label, "label blocked");
            return Ok(());
        }

        let Some(path) = text.font.outline(label, text.size_px, &mut text.glyphs)? else {
            return Ok(());
        };
        let transform = Transform::from_translate(center.x as f32, center.y as f32)
            .pre_concat(Transform::from_rotate(angle as f32))
            .pre_translate(
                (offset.0 - size.0 * 0.5) as f32,
                (offset.1 - size.1 * 0.5) as f32,
            );
        let halo = text.halo.as_ref().map(|(paint, stroke)| (paint, stroke));
        self.canvas.draw_text(&path, transform, &text.fill, halo);
        Ok(())
    }
}

fn skip(feature: &Feature, symbolizer: &str) {
    trace!(feature = %feature.id, symbolizer, "geometry not drawable by symbolizer");
}

fn line_parts(geometry: &Geometry<f64>) -> Vec<&LineString<f64>> {
    match geometry {
        Geometry::LineString(line) => vec![line],
        Geometry::MultiLineString(multi) => multi.iter().collect(),
        _ => Vec::new(),
    }
}

fn polygon_parts(geometry: &Geometry<f64>) -> Vec<&Polygon<f64>> {
    match geometry {
        Geometry::Polygon(polygon) => vec![polygon],
        Geometry::MultiPolygon(multi) => multi.iter().collect(),
        _ => Vec::new(),
    }
}

/// Where a point-placed label goes: the point itself, the centroid of an area, or the
/// middle of a line.
fn label_anchor(geometry: &Geometry<f64>) -> Option<Coord<f64>> {
    match geometry {
        Geometry::Point(point) => Some(point.0),
        Geometry::Polygon(polygon) => polygon.centroid().map(|p| p.0),
        Geometry::MultiPolygon(multi) => multi.centroid().map(|p| p.0),
        Geometry::LineString(line) => {
            let coords: Vec<Coord<f64>> = line.coords().copied().collect();
            linear::extract_point(&coords, linear::length(&coords) / 2.0)
        }
        _ => None,
    }
}

/// The label's box in world pixels: a `size` rectangle centred on `center + offset`,
/// rotated by `angle` degrees about `center`.
fn collision_box(
    center: Coord<f64>,
    offset: (f64, f64),
    size: (f64, f64),
    angle: f64,
    world_offset: Coord<f64>,
) -> Polygon<f64> {
    let (half_w, half_h) = (size.0 * 0.5, size.1 * 0.5);
    let (sin, cos) = angle.to_radians().sin_cos();
    let corner = |dx: f64, dy: f64| {
        let (x, y) = (offset.0 + dx, offset.1 + dy);
        Coord {
            x: world_offset.x + center.x + x * cos - y * sin,
            y: world_offset.y + center.y + x * sin + y * cos,
        }
    };
    Polygon::new(
        LineString::new(vec![
            corner(half_w, half_h),
            corner(-half_w, half_h),
            corner(-half_w, -half_h),
            corner(half_w, -half_h),
            corner(half_w, half_h),
        ]),
        Vec::new(),
    )
}
