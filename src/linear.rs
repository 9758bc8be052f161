//! Arc-length referencing along pixel-space polylines, and the placement of repeated
//! labels along them.

use geo::Coord;

pub fn length(line: &[Coord<f64>]) -> f64 {
    line.windows(2).map(|w| distance(w[0], w[1])).sum()
}

fn distance(a: Coord<f64>, b: Coord<f64>) -> f64 {
    (b.x - a.x).hypot(b.y - a.y)
}

fn lerp(a: Coord<f64>, b: Coord<f64>, t: f64) -> Coord<f64> {
    Coord {
        x: a.x + (b.x - a.x) * t,
        y: a.y + (b.y - a.y) * t,
    }
}

/// The point `at` pixels along the line, clamped to its ends.
pub fn extract_point(line: &[Coord<f64>], at: f64) -> Option<Coord<f64>> {
    let first = *line.first()?;
    if at <= 0.0 {
        return Some(first);
    }

    let mut travelled = 0.0;
    for w in line.windows(2) {
        let segment = distance(w[0], w[1]);
        if segment > 0.0 && travelled + segment >= at {
            return Some(lerp(w[0], w[1], (at - travelled) / segment));
        }
        travelled += segment;
    }
    line.last().copied()
}

/// The part of the line between `start` and `end` pixels along it, both clamped to the
/// line. Consecutive duplicate points are dropped, so a section of zero length comes
/// back with fewer than two points.
pub fn extract_line(line: &[Coord<f64>], start: f64, end: f64) -> Vec<Coord<f64>> {
    let total = length(line);
    let start = start.clamp(0.0, total);
    let end = end.clamp(start, total);

    let mut result: Vec<Coord<f64>> = Vec::new();
    let mut push = |c: Coord<f64>| {
        if result.last() != Some(&c) {
            result.push(c);
        }
    };

    let mut travelled = 0.0;
    for w in line.windows(2) {
        let segment = distance(w[0], w[1]);
        let (seg_start, seg_end) = (travelled, travelled + segment);
        travelled = seg_end;

        if segment == 0.0 || seg_end < start {
            continue;
        }
        if seg_start > end {
            break;
        }

        let from = ((start - seg_start) / segment).max(0.0);
        let to = ((end - seg_start) / segment).min(1.0);
        push(lerp(w[0], w[1], from));
        push(lerp(w[0], w[1], to));
    }
    result
}

/// Where one label along a line goes: the centre of its box in tile pixels and its
/// rotation in degrees.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LinePlacement {
    pub anchor: Coord<f64>,
    pub angle: f64,
}

/// How many labels of `label_width` fit along `line_length` with `spacing` between
/// them. At least one label is always placed, and exactly one when spacing is zero or
/// negative.
pub fn label_count(line_length: f64, label_width: f64, spacing: f64) -> usize {
    if spacing.is_nan() || spacing <= 0.0 {
        return 1;
    }
    let count = ((line_length - spacing) / (label_width + spacing)).floor();
    if count < 1.0 {
        1
    } else {
        count as usize
    }
}

/// The spacing that spreads `count` labels evenly over the whole line.
pub fn redistributed_spacing(line_length: f64, label_width: f64, count: usize) -> f64 {
    line_length / count as f64 - label_width
}

/// Lays out repeated labels along `line` (tile pixels).
///
/// Each label sits over the section of the line it covers. Its anchor averages the
/// section's end points with its arc-length midpoint, which smooths the jitter of short
/// polyline segments. Its angle follows the section end to end and is flipped by 180
/// degrees where needed so that, once the map rotation `map_angle` is added, text never
/// reads upside down.
pub fn line_label_placements(
    line: &[Coord<f64>],
    label_width: f64,
    spacing: f64,
    map_angle: f64,
) -> Vec<LinePlacement> {
    let line_length = length(line);
    let count = label_count(line_length, label_width, spacing);
    let spacing = redistributed_spacing(line_length, label_width, count);

    let mut placements = Vec::with_capacity(count);
    for i in 0..count {
        let center = (spacing + label_width) * (0.5 + i as f64);
        let section = extract_line(line, center - label_width / 2.0, center + label_width / 2.0);
        let (Some(&first), Some(&last)) = (section.first(), section.last()) else {
            continue;
        };
        if section.len() < 2 {
            continue;
        }
        let Some(middle) = extract_point(line, center) else {
            continue;
        };

        let anchor = Coord {
            x: (first.x + last.x + middle.x + middle.x) * 0.25,
            y: (first.y + last.y + middle.y + middle.y) * 0.25,
        };

        let mut angle = (last.y - first.y).atan2(last.x - first.x).to_degrees();
        if angle + map_angle > 90.0 {
            angle -= 180.0;
        }
        if angle + map_angle < -90.0 {
            angle += 180.0;
        }

        placements.push(LinePlacement { anchor, angle });
    }
    placements
}
