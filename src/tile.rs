use std::sync::Arc;

use geo::Coord;
use tiny_skia::Point;

use crate::envelope::Envelope;
use crate::mercator;
use crate::style::LayerConfig;

/// Everything needed to render one tile. Built once per request and never mutated.
#[derive(Clone, Debug)]
pub struct TileConfig {
    pub zoom: u8,
    pub x: u32,
    pub y: u32,
    pub pixel_size: u32,
    /// Bounds of the tile in EPSG:3857 meters.
    pub envelope: Envelope,
    /// The envelope padded to three times its size, used when fetching features.
    pub padded_envelope: Envelope,
    /// Map rotation in degrees. Only label orientation honours it.
    pub angle: f32,
    pub layer_config: Arc<LayerConfig>,
}

impl TileConfig {
    /// Configures an XYZ tile.
    pub fn new(zoom: u8, x: u32, y: u32, pixel_size: u32, layer_config: Arc<LayerConfig>) -> TileConfig {
        let envelope = mercator::google_tile_bounds(zoom, x, y);
        TileConfig {
            zoom,
            x,
            y,
            pixel_size,
            envelope,
            padded_envelope: envelope.padded(),
            angle: 0.0,
            layer_config,
        }
    }

    pub fn with_angle(mut self, angle: f32) -> TileConfig {
        self.angle = angle;
        self
    }

    fn scale(&self) -> (f64, f64) {
        let size = f64::from(self.pixel_size);
        (size / self.envelope.width(), size / -self.envelope.height())
    }

    /// Projects meters into tile pixel space. Pixel row 0 is the northern edge.
    pub fn project(&self, coord: Coord<f64>) -> Coord<f64> {
        let (sx, sy) = self.scale();
        Coord {
            x: (coord.x - self.envelope.min_x) * sx,
            y: (coord.y - self.envelope.max_y) * sy,
        }
    }

    pub fn project_point(&self, coord: Coord<f64>) -> Point {
        let projected = self.project(coord);
        Point::from_xy(projected.x as f32, projected.y as f32)
    }

    pub fn project_all<'a>(&self, coords: impl IntoIterator<Item = &'a Coord<f64>>) -> Vec<Point> {
        coords.into_iter().map(|c| self.project_point(*c)).collect()
    }

    /// Offset from tile pixels to pixels of the whole world at this zoom level. Labels are
    /// compared in world pixels so that neighbouring tiles agree on their positions.
    pub fn world_pixel_offset(&self) -> Coord<f64> {
        let (sx, sy) = self.scale();
        Coord {
            x: self.envelope.min_x * sx,
            y: self.envelope.max_y * sy,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use assert_approx_eq::assert_approx_eq;

    fn tile(zoom: u8, x: u32, y: u32) -> TileConfig {
        TileConfig::new(zoom, x, y, 256, Arc::new(LayerConfig::default()))
    }

    #[test]
    fn test_projection_corners() {
        let tile = tile(3, 2, 5);
        let env = tile.envelope;

        let top_left = tile.project(Coord { x: env.min_x, y: env.max_y });
        let bottom_right = tile.project(Coord { x: env.max_x, y: env.min_y });

        assert_approx_eq!(top_left.x, 0.0);
        assert_approx_eq!(top_left.y, 0.0);
        assert_approx_eq!(bottom_right.x, 256.0, 1e-6);
        assert_approx_eq!(bottom_right.y, 256.0, 1e-6);
    }

    #[test]
    fn test_padded_envelope() {
        let tile = tile(10, 500, 300);
        assert_eq!(tile.padded_envelope, tile.envelope.padded());
    }

    #[test]
    fn test_world_pixels_agree_across_tiles() {
        let left = tile(4, 6, 9);
        let right = tile(4, 7, 9);
        // A shared edge point, in meters.
        let edge = Coord { x: left.envelope.max_x, y: left.envelope.max_y };

        let from_left = left.project(edge);
        let from_right = right.project(edge);
        let left_offset = left.world_pixel_offset();
        let right_offset = right.world_pixel_offset();

        assert_approx_eq!(from_left.x + left_offset.x, from_right.x + right_offset.x, 1e-6);
        assert_approx_eq!(from_left.y + left_offset.y, from_right.y + right_offset.y, 1e-6);
        assert_approx_eq!(right_offset.x - left_offset.x, 256.0, 1e-6);
    }
}
