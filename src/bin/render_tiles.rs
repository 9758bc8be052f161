use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use clap::Parser;
use rayon::prelude::*;
use tracing::info;
use tracing_subscriber::filter::LevelFilter;

use tile_painter::mercator::tile_for_lat_lon;
use tile_painter::{Error, Renderer, StyleSheet};

/// Renders a pyramid of PNG tiles from a stylesheet.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to the YAML stylesheet
    style: PathBuf,
    /// First zoom level to render
    #[arg(long, default_value_t = 0, value_parser = clap::value_parser!(u8).range(0..=30))]
    min_zoom: u8,
    /// Last zoom level to render
    #[arg(long, default_value_t = 5, value_parser = clap::value_parser!(u8).range(0..=30))]
    max_zoom: u8,
    /// Area to render as west,south,east,north in degrees. Defaults to the whole world.
    #[arg(long, value_delimiter = ',', num_args = 4, allow_negative_numbers = true)]
    bbox: Option<Vec<f64>>,
    /// Width and height of each tile in pixels
    #[arg(long, default_value_t = 256)]
    tile_size: u32,
    /// Directory to write {z}/{x}/{y}.png into
    #[arg(short, long, default_value = "tiles")]
    output: PathBuf,
}

/// The XYZ tiles covering the bounding box at one zoom level.
fn tiles_at(zoom: u8, bbox: Option<&[f64]>) -> Vec<(u32, u32)> {
    let last = (1u32 << zoom) - 1;
    let (min_x, min_y, max_x, max_y) = match bbox {
        Some(&[west, south, east, north]) => {
            let (min_x, min_y) = tile_for_lat_lon(zoom, north, west);
            let (max_x, max_y) = tile_for_lat_lon(zoom, south, east);
            (min_x.min(last), min_y.min(last), max_x.min(last), max_y.min(last))
        }
        _ => (0, 0, last, last),
    };
    (min_x..=max_x)
        .flat_map(|x| (min_y..=max_y).map(move |y| (x, y)))
        .collect()
}

fn write_tile(output: &Path, zoom: u8, x: u32, y: u32, png: &[u8]) -> Result<(), Error> {
    let dir = output.join(zoom.to_string()).join(x.to_string());
    fs::create_dir_all(&dir)?;
    fs::write(dir.join(format!("{}.png", y)), png)?;
    Ok(())
}

fn main() -> Result<(), Error> {
    let _ = tracing_subscriber::fmt::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .try_init();

    let args = Cli::parse();
    let base_dir = args.style.parent().unwrap_or_else(|| Path::new("."));

    let sheet = StyleSheet::open(&args.style)?;
    let sources = sheet.open_sources(base_dir)?;
    let config = Arc::new(sheet.build(&sources)?);
    let renderer = Renderer::new(
        Arc::new(sheet.feature_cache()),
        Arc::new(sheet.label_index()),
        Arc::new(sheet.font_library(base_dir)?),
    );

    for zoom in args.min_zoom..=args.max_zoom {
        let started = Instant::now();
        let tiles = tiles_at(zoom, args.bbox.as_deref());
        tiles.par_iter().try_for_each(|&(x, y)| {
            let image = renderer.render(&config, zoom, x, y, args.tile_size)?;
            write_tile(&args.output, zoom, x, y, &image.encode_png()?)
        })?;
        info!(zoom, tiles = tiles.len(), elapsed = ?started.elapsed(), "rendered zoom level");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zoom_levels_are_bounded() {
        assert!(Cli::try_parse_from(["render-tiles", "style.yml", "--max-zoom", "30"]).is_ok());
        assert!(Cli::try_parse_from(["render-tiles", "style.yml", "--max-zoom", "32"]).is_err());
        assert!(Cli::try_parse_from(["render-tiles", "style.yml", "--min-zoom", "200"]).is_err());
    }

    #[test]
    fn test_tiles_at_covers_the_bbox() {
        assert_eq!(tiles_at(1, None), vec![(0, 0), (0, 1), (1, 0), (1, 1)]);

        let manhattan = tiles_at(12, Some(&[-74.02, 40.70, -73.93, 40.80]));
        assert!(!manhattan.is_empty());
        assert!(manhattan.contains(&(1206, 1539)));
    }
}
