//! Font lookup, text measurement and glyph outlines for labels.

use std::collections::HashMap;
use std::path::Path as FsPath;
use std::sync::Arc;

use fontdb::{Database, Family, Query, Stretch, Style, Weight};
use tiny_skia::{Path, PathBuilder, Transform};
use tracing::debug;

use crate::error::{Error, Result};

/// Pixels per point: label sizes are given in points at 96 dpi.
pub const PIXELS_PER_POINT: f32 = 96.0 / 72.0;

/// Fonts available to text symbolizers.
pub struct FontLibrary {
    db: Database,
}

impl FontLibrary {
    /// A library with no fonts. Text symbolizers fail to warm up until fonts are added.
    pub fn empty() -> FontLibrary {
        FontLibrary { db: Database::new() }
    }

    /// A library with every font installed on the system.
    pub fn system() -> FontLibrary {
        let mut db = Database::new();
        db.load_system_fonts();
        debug!(faces = db.len(), "loaded system fonts");
        FontLibrary { db }
    }

    pub fn add_font_data(&mut self, data: Vec<u8>) {
        self.db.load_font_data(data);
    }

    pub fn add_font_file(&mut self, path: &FsPath) -> Result<()> {
        self.db.load_font_file(path)?;
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.db.is_empty()
    }

    /// Finds the closest match for `family` (sans-serif when `None`), falling back to
    /// any face at all.
    pub fn resolve(&self, family: Option<&str>, bold: bool) -> Result<LabelFont> {
        let families = match family {
            Some(name) => vec![Family::Name(name), Family::SansSerif],
            None => vec![Family::SansSerif],
        };
        let query = Query {
            families: &families,
            weight: if bold { Weight::BOLD } else { Weight::NORMAL },
            stretch: Stretch::Normal,
            style: Style::Normal,
        };

        let id = self
            .db
            .query(&query)
            .or_else(|| self.db.faces().into_iter().next().map(|face| face.id))
            .ok_or_else(|| Error::Font(String::from("no fonts available")))?;

        self.db
            .with_face_data(id, |data, index| LabelFont::new(data.to_vec(), index))
            .ok_or_else(|| Error::Font(format!("font data for face {:?} is unavailable", id)))?
    }
}

impl Default for FontLibrary {
    fn default() -> Self {
        FontLibrary::system()
    }
}

/// A parsed-on-demand font face shared between symbolizers.
#[derive(Clone)]
pub struct LabelFont {
    data: Arc<Vec<u8>>,
    index: u32,
}

/// Size of a line of text in pixels.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TextMetrics {
    pub width: f32,
    pub ascent: f32,
}

impl LabelFont {
    pub fn new(data: Vec<u8>, index: u32) -> Result<LabelFont> {
        ttf_parser::Face::parse(&data, index).map_err(|e| Error::Font(e.to_string()))?;
        Ok(LabelFont {
            data: Arc::new(data),
            index,
        })
    }

    fn face(&self) -> Result<ttf_parser::Face<'_>> {
        ttf_parser::Face::parse(&self.data, self.index).map_err(|e| Error::Font(e.to_string()))
    }

    /// Measures `text` at `size_px` pixels per em.
    pub fn measure(&self, text: &str, size_px: f32) -> Result<TextMetrics> {
        let face = self.face()?;
        let scale = size_px / f32::from(face.units_per_em());
        let advance: f32 = text
            .chars()
            .map(|ch| glyph_advance(&face, ch))
            .sum();
        Ok(TextMetrics {
            width: advance * scale,
            ascent: f32::from(face.ascender()) * scale,
        })
    }

    /// Builds the outline of `text` at `size_px`, with the top-left of the text at the
    /// origin and the baseline at the ascent. Outlines of individual glyphs are kept in
    /// `cache` in font units.
    pub fn outline(&self, text: &str, size_px: f32, cache: &mut GlyphCache) -> Result<Option<Path>> {
        let face = self.face()?;
        let scale = size_px / f32::from(face.units_per_em());
        let ascent = f32::from(face.ascender()) * scale;

        let mut builder = PathBuilder::new();
        let mut pen_x = 0.0;
        for ch in text.chars() {
            let Some(glyph) = face.glyph_index(ch) else {
                pen_x += glyph_advance(&face, ch) * scale;
                continue;
            };
            let outline = cache
                .glyphs
                .entry(glyph.0)
                .or_insert_with(|| build_glyph_path(&face, glyph));
            if let Some(outline) = outline {
                // Font units are y-up, pixels are y-down.
                let transform = Transform::from_row(scale, 0.0, 0.0, -scale, pen_x, ascent);
                if let Some(placed) = outline.clone().transform(transform) {
                    builder.push_path(&placed);
                }
            }
            pen_x += glyph_advance(&face, ch) * scale;
        }
        Ok(builder.finish())
    }
}

fn glyph_advance(face: &ttf_parser::Face<'_>, ch: char) -> f32 {
    face.glyph_index(ch)
        .and_then(|glyph| face.glyph_hor_advance(glyph))
        .map(f32::from)
        .unwrap_or_else(|| f32::from(face.units_per_em()) / 2.0)
}

/// Glyph outlines in font units, keyed by glyph id. One cache belongs to each text
/// symbolizer and is only touched under that symbolizer's lock.
#[derive(Default)]
pub struct GlyphCache {
    glyphs: HashMap<u16, Option<Path>>,
}

impl GlyphCache {
    pub fn len(&self) -> usize {
        self.glyphs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.glyphs.is_empty()
    }
}

/// Converts ttf-parser glyph outlines to tiny-skia paths.
struct GlyphOutlineBuilder {
    builder: PathBuilder,
}

impl ttf_parser::OutlineBuilder for GlyphOutlineBuilder {
    fn move_to(&mut self, x: f32, y: f32) {
        self.builder.move_to(x, y);
    }

    fn line_to(&mut self, x: f32, y: f32) {
        self.builder.line_to(x, y);
    }

    fn quad_to(&mut self, x1: f32, y1: f32, x: f32, y: f32) {
        self.builder.quad_to(x1, y1, x, y);
    }

    fn curve_to(&mut self, x1: f32, y1: f32, x2: f32, y2: f32, x: f32, y: f32) {
        self.builder.cubic_to(x1, y1, x2, y2, x, y);
    }

    fn close(&mut self) {
        self.builder.close();
    }
}

fn build_glyph_path(face: &ttf_parser::Face<'_>, glyph: ttf_parser::GlyphId) -> Option<Path> {
    let mut builder = GlyphOutlineBuilder {
        builder: PathBuilder::new(),
    };
    face.outline_glyph(glyph, &mut builder)?;
    builder.builder.finish()
}
