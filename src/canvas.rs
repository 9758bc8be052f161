//! The drawing surface: a thin layer over a `tiny_skia::Pixmap`.

use tiny_skia::{FillRule, Paint, Path, PathBuilder, Pixmap, Point, Rect, Stroke, Transform};

use crate::error::{Error, Result};
use crate::style::{Color, PointShape};

pub struct Canvas {
    pixmap: Pixmap,
}

impl Canvas {
    pub fn new(size: u32, background: Color) -> Result<Canvas> {
        let mut pixmap = Pixmap::new(size, size)
            .ok_or_else(|| Error::Canvas(format!("cannot allocate a {0}x{0} canvas", size)))?;
        pixmap.fill(background.to_skia());
        Ok(Canvas { pixmap })
    }

    /// Strokes the points as one connected polyline.
    pub fn stroke_polyline(&mut self, points: &[Point], paint: &Paint<'_>, stroke: &Stroke) {
        if let Some(path) = polyline_path(points, false) {
            self.pixmap
                .stroke_path(&path, paint, stroke, Transform::identity(), None);
        }
    }

    /// Fills a polygon, punching out its holes, and optionally strokes every ring.
    pub fn fill_polygon(
        &mut self,
        exterior: &[Point],
        holes: &[Vec<Point>],
        fill: &Paint<'_>,
        outline: Option<(&Paint<'_>, &Stroke)>,
    ) {
        let path = if holes.is_empty() {
            polyline_path(exterior, true)
        } else {
            let mut builder = PathBuilder::new();
            for ring in std::iter::once(exterior).chain(holes.iter().map(Vec::as_slice)) {
                push_ring(&mut builder, ring);
            }
            builder.finish()
        };
        let Some(path) = path else {
            return;
        };

        let rule = if holes.is_empty() {
            FillRule::Winding
        } else {
            FillRule::EvenOdd
        };
        self.pixmap
            .fill_path(&path, fill, rule, Transform::identity(), None);
        if let Some((paint, stroke)) = outline {
            self.pixmap
                .stroke_path(&path, paint, stroke, Transform::identity(), None);
        }
    }

    /// Fills a marker of `diameter` pixels centred on `center`.
    pub fn fill_shape(&mut self, center: Point, diameter: f32, shape: PointShape, paint: &Paint<'_>) {
        if let Some(path) = shape_path(center, diameter, shape) {
            self.pixmap
                .fill_path(&path, paint, FillRule::Winding, Transform::identity(), None);
        }
    }

    /// Draws a glyph outline: first the halo stroke, then the fill on top of it.
    pub fn draw_text(
        &mut self,
        path: &Path,
        transform: Transform,
        fill: &Paint<'_>,
        halo: Option<(&Paint<'_>, &Stroke)>,
    ) {
        if let Some((paint, stroke)) = halo {
            self.pixmap.stroke_path(path, paint, stroke, transform, None);
        }
        self.pixmap
            .fill_path(path, fill, FillRule::Winding, transform, None);
    }

    pub fn finish(self) -> RasterImage {
        RasterImage {
            pixmap: self.pixmap,
        }
    }
}

fn push_ring(builder: &mut PathBuilder, ring: &[Point]) {
    let mut points = ring.iter();
    if let Some(first) = points.next() {
        builder.move_to(first.x, first.y);
        for p in points {
            builder.line_to(p.x, p.y);
        }
        builder.close();
    }
}

fn polyline_path(points: &[Point], closed: bool) -> Option<Path> {
    if points.len() < 2 {
        return None;
    }
    let mut builder = PathBuilder::new();
    if closed {
        push_ring(&mut builder, points);
    } else {
        builder.move_to(points[0].x, points[0].y);
        for p in &points[1..] {
            builder.line_to(p.x, p.y);
        }
    }
    builder.finish()
}

fn shape_path(p: Point, diameter: f32, shape: PointShape) -> Option<Path> {
    let radius = diameter * 0.5;
    match shape {
        PointShape::Circle => PathBuilder::from_circle(p.x, p.y, radius),
        PointShape::Square => {
            Rect::from_xywh(p.x - radius, p.y - radius, diameter, diameter).map(PathBuilder::from_rect)
        }
        PointShape::Triangle => polyline_path(
            &[
                Point::from_xy(p.x - radius, p.y + diameter / 3.0),
                Point::from_xy(p.x, p.y - radius),
                Point::from_xy(p.x + radius, p.y + diameter / 3.0),
            ],
            true,
        ),
        PointShape::Star => polyline_path(&star_points(p, diameter), true),
    }
}

/// The ten vertices of a five-pointed star, clockwise from the top point. Outer points
/// lie on the bounding square of the diameter, inner points pull in towards the centre.
fn star_points(p: Point, diameter: f32) -> [Point; 10] {
    let radius = diameter * 0.5;
    let at = |dx: f32, dy: f32| Point::from_xy(p.x + dx, p.y + dy);
    [
        at(0.0, -radius),                            // outer, top
        at(diameter * 0.15, -diameter * 0.15),       // inner, upper right
        at(radius, -diameter * 0.12),                // outer, right
        at(diameter * 0.25, diameter * 0.13),        // inner, lower right
        at(diameter * 0.33, radius),                 // outer, bottom right
        at(0.0, diameter * 0.3),                     // inner, bottom
        at(-diameter * 0.33, radius),                // outer, bottom left
        at(-diameter * 0.25, diameter * 0.13),       // inner, lower left
        at(-radius, -diameter * 0.12),               // outer, left
        at(-diameter * 0.15, -diameter * 0.15),      // inner, upper left
    ]
}

/// A finished tile.
pub struct RasterImage {
    pixmap: Pixmap,
}

impl RasterImage {
    pub fn width(&self) -> u32 {
        self.pixmap.width()
    }

    pub fn height(&self) -> u32 {
        self.pixmap.height()
    }

    /// The un-premultiplied colour of a pixel, or `None` outside the image.
    pub fn pixel(&self, x: u32, y: u32) -> Option<Color> {
        if x >= self.width() || y >= self.height() {
            return None;
        }
        let pixel = self.pixmap.pixel(x, y)?.demultiply();
        Some(Color::rgba(pixel.red(), pixel.green(), pixel.blue(), pixel.alpha()))
    }

    pub fn encode_png(&self) -> Result<Vec<u8>> {
        self.pixmap
            .encode_png()
            .map_err(|e| Error::Canvas(e.to_string()))
    }

    pub fn pixmap(&self) -> &Pixmap {
        &self.pixmap
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BACKGROUND: Color = Color::rgb(10, 20, 30);
    const INK: Color = Color::rgb(200, 0, 0);

    fn paint(color: Color) -> Paint<'static> {
        let mut paint = Paint::default();
        paint.set_color(color.to_skia());
        paint
    }

    fn square(x: f32, y: f32, size: f32) -> Vec<Point> {
        vec![
            Point::from_xy(x, y),
            Point::from_xy(x + size, y),
            Point::from_xy(x + size, y + size),
            Point::from_xy(x, y + size),
        ]
    }

    #[test]
    fn test_background_fill() {
        let image = Canvas::new(16, BACKGROUND).unwrap().finish();

        assert_eq!(image.width(), 16);
        assert_eq!(image.pixel(0, 0), Some(BACKGROUND));
        assert_eq!(image.pixel(15, 15), Some(BACKGROUND));
        assert_eq!(image.pixel(16, 0), None);
    }

    #[test]
    fn test_pixels_past_the_right_edge_do_not_wrap() {
        let mut canvas = Canvas::new(4, BACKGROUND).unwrap();
        canvas.fill_polygon(&square(0.0, 1.0, 1.0), &[], &paint(INK), None);
        let image = canvas.finish();

        assert_eq!(image.pixel(0, 1), Some(INK));
        assert_eq!(image.pixel(4, 0), None);
        assert_eq!(image.pixel(0, 4), None);
    }

    #[test]
    fn test_polygon_holes_are_punched_out() {
        let mut canvas = Canvas::new(64, BACKGROUND).unwrap();
        canvas.fill_polygon(&square(4.0, 4.0, 56.0), &[square(24.0, 24.0, 16.0)], &paint(INK), None);
        let image = canvas.finish();

        assert_eq!(image.pixel(10, 10), Some(INK));
        assert_eq!(image.pixel(32, 32), Some(BACKGROUND));
        assert_eq!(image.pixel(1, 1), Some(BACKGROUND));
    }

    #[test]
    fn test_shapes_cover_their_centre() {
        for shape in [PointShape::Circle, PointShape::Square, PointShape::Triangle, PointShape::Star] {
            let mut canvas = Canvas::new(32, BACKGROUND).unwrap();
            canvas.fill_shape(Point::from_xy(16.0, 16.0), 20.0, shape, &paint(INK));
            let image = canvas.finish();

            assert_eq!(image.pixel(16, 16), Some(INK), "{:?}", shape);
            assert_eq!(image.pixel(1, 1), Some(BACKGROUND), "{:?}", shape);
        }
    }

    #[test]
    fn test_png_encoding() {
        let png = Canvas::new(8, BACKGROUND).unwrap().finish().encode_png().unwrap();
        assert_eq!(&png[1..4], b"PNG");
    }

    #[test]
    fn test_zero_size_canvas_is_an_error() {
        assert!(matches!(Canvas::new(0, BACKGROUND), Err(Error::Canvas(_))));
    }
}
