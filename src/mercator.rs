/// Spherical pseudo-Mercator (EPSG:3857) tile math.
///
/// Further reading: http://www.maptiler.org/google-maps-coordinates-tile-bounds-projection/
use crate::envelope::Envelope;

use std::f64::consts::PI;

use geo::{coord, Coord};

pub const TILE_SIZE: u32 = 256;
pub const EARTH_RADIUS: f64 = 6378137.0;
pub const ORIGIN_SHIFT: f64 = PI * EARTH_RADIUS;
pub const INITIAL_RESOLUTION: f64 = 2.0 * PI * EARTH_RADIUS / TILE_SIZE as f64;

/// The latitude at which the square Mercator world ends.
pub const MAX_LATITUDE: f64 = 85.051_128_779_806_59;

/// Resolution (meters/pixel) for the given zoom level, measured at the equator.
pub fn resolution(zoom: u8) -> f64 {
    INITIAL_RESOLUTION / 2f64.powi(i32::from(zoom))
}

/// Converts pixel coordinates at the given zoom level of the pyramid to EPSG:3857 meters.
pub fn pixels_to_meters(zoom: u8, px: f64, py: f64) -> Coord<f64> {
    let res = resolution(zoom);
    coord! {
        x: px * res - ORIGIN_SHIFT,
        y: py * res - ORIGIN_SHIFT,
    }
}

/// Bounds of a TMS tile (origin at the bottom-left of the world) in EPSG:3857 meters.
pub fn tile_bounds(zoom: u8, x: i64, y: i64) -> Envelope {
    let size = f64::from(TILE_SIZE);
    let min = pixels_to_meters(zoom, x as f64 * size, y as f64 * size);
    let max = pixels_to_meters(zoom, (x + 1) as f64 * size, (y + 1) as f64 * size);
    Envelope::new(min.x, min.y, max.x, max.y)
}

/// Bounds of an XYZ ("Google") tile in EPSG:3857 meters. The Y index counts down from
/// the top of the world, so it is flipped against the height of the world.
pub fn google_tile_bounds(zoom: u8, x: u32, y: u32) -> Envelope {
    let size = f64::from(TILE_SIZE);
    let world = size * 2f64.powi(i32::from(zoom));
    let min = pixels_to_meters(zoom, f64::from(x) * size, world - (f64::from(y) + 1.0) * size);
    let max = pixels_to_meters(zoom, (f64::from(x) + 1.0) * size, world - f64::from(y) * size);
    Envelope::new(min.x, min.y, max.x, max.y)
}

/// Converts EPSG:3857 meters to a WGS84 coordinate, returned as `(lat, lon)`.
pub fn meters_to_lat_lon(mx: f64, my: f64) -> (f64, f64) {
    let lon = (mx / ORIGIN_SHIFT) * 180.0;
    let lat = (my / ORIGIN_SHIFT) * 180.0;

    let lat = 180.0 / PI * (2.0 * (lat * PI / 180.0).exp().atan() - PI / 2.0);
    (lat, lon)
}

/// Converts a WGS84 coordinate to EPSG:3857 meters.
pub fn lat_lon_to_meters(lat: f64, lon: f64) -> Coord<f64> {
    let x = lon * ORIGIN_SHIFT / 180.0;
    let y = ((90.0 + lat) * PI / 360.0).tan().ln() / (PI / 180.0);
    coord! { x: x, y: y * ORIGIN_SHIFT / 180.0 }
}

/// Bounds of a TMS tile as WGS84 degrees. The envelope's x axis is longitude and its y
/// axis is latitude.
pub fn tile_lat_lon_bounds(zoom: u8, x: i64, y: i64) -> Envelope {
    let bounds = tile_bounds(zoom, x, y);
    let (min_lat, min_lon) = meters_to_lat_lon(bounds.min_x, bounds.min_y);
    let (max_lat, max_lon) = meters_to_lat_lon(bounds.max_x, bounds.max_y);
    Envelope::new(min_lon, min_lat, max_lon, max_lat)
}

/// The XYZ tile containing a WGS84 coordinate at the given zoom level.
pub fn tile_for_lat_lon(zoom: u8, lat: f64, lon: f64) -> (u32, u32) {
    let lat = lat.clamp(-MAX_LATITUDE, MAX_LATITUDE);
    slippy_map_tilenames::lonlat2tile(lon, lat, zoom)
}
