//! Global label collision detection.
//!
//! Labels are compared in world pixel coordinates, so a label accepted while rendering
//! one tile blocks overlapping labels in every tile rendered afterwards at that zoom.

use std::sync::{Mutex, MutexGuard, PoisonError};

use geo::{BoundingRect, Intersects, Polygon};
use rstar::{RTree, RTreeObject, AABB};
use serde::Deserialize;
use tracing::{trace, warn};

use crate::feature::FeatureId;

/// A candidate label: its outline (a possibly rotated rectangle in world pixels) and the
/// feature it belongs to.
#[derive(Clone, Debug, PartialEq)]
pub struct LabelDetails {
    pub outline: Polygon<f64>,
    pub feature_id: FeatureId,
}

impl LabelDetails {
    pub fn new(outline: Polygon<f64>, feature_id: FeatureId) -> LabelDetails {
        LabelDetails { outline, feature_id }
    }
}

/// Decides whether labels may be placed. Implementations must be safe to call from
/// many render threads at once.
pub trait LabelOverlapPreventer: Send + Sync {
    /// Returns true if `label` can be placed at `zoom` without overlapping a label of
    /// another feature, recording it if so.
    fn can_place_label(&self, zoom: u8, label: LabelDetails) -> bool;

    /// Forgets every placed label.
    fn reset(&self);
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LabelSettings {
    /// Number of zoom levels tracked, starting at zero.
    pub levels: u8,
}

impl Default for LabelSettings {
    fn default() -> Self {
        LabelSettings { levels: 20 }
    }
}

struct PlacedLabel {
    details: LabelDetails,
    bounds: AABB<[f64; 2]>,
}

impl RTreeObject for PlacedLabel {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.bounds
    }
}

fn bounds_of(outline: &Polygon<f64>) -> Option<AABB<[f64; 2]>> {
    let rect = outline.bounding_rect()?;
    Some(AABB::from_corners(
        [rect.min().x, rect.min().y],
        [rect.max().x, rect.max().y],
    ))
}

/// One R-tree of placed labels per zoom level, each behind its own lock so that renders
/// at different zoom levels never wait on each other.
///
/// Placed labels are kept until [`reset`](LabelOverlapPreventer::reset) or
/// [`reset_zoom`](PerZoomLabelIndex::reset_zoom) is called.
pub struct PerZoomLabelIndex {
    levels: Vec<Mutex<RTree<PlacedLabel>>>,
}

impl PerZoomLabelIndex {
    pub fn new(settings: LabelSettings) -> PerZoomLabelIndex {
        PerZoomLabelIndex {
            levels: (0..settings.levels).map(|_| Mutex::new(RTree::new())).collect(),
        }
    }

    fn level(&self, zoom: u8) -> Option<MutexGuard<'_, RTree<PlacedLabel>>> {
        self.levels
            .get(usize::from(zoom))
            .map(|level| level.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Number of labels placed at `zoom`.
    pub fn placed_count(&self, zoom: u8) -> usize {
        self.level(zoom).map_or(0, |tree| tree.size())
    }

    pub fn reset_zoom(&self, zoom: u8) {
        if let Some(mut tree) = self.level(zoom) {
            *tree = RTree::new();
        }
    }
}

impl Default for PerZoomLabelIndex {
    fn default() -> Self {
        PerZoomLabelIndex::new(LabelSettings::default())
    }
}

impl LabelOverlapPreventer for PerZoomLabelIndex {
    fn can_place_label(&self, zoom: u8, label: LabelDetails) -> bool {
        let Some(mut tree) = self.level(zoom) else {
            warn!(zoom, levels = self.levels.len(), "no label index for zoom level");
            return false;
        };
        let Some(bounds) = bounds_of(&label.outline) else {
            return false;
        };

        let collision = tree
            .locate_in_envelope_intersecting(&bounds)
            .find(|placed| placed.details.outline.intersects(&label.outline));
        if let Some(placed) = collision {
            // Repeats of one feature, such as the labels along a long road, may touch.
            let same_feature = placed.details.feature_id == label.feature_id;
            trace!(zoom, feature = %label.feature_id, blocker = %placed.details.feature_id, same_feature, "label collision");
            return same_feature;
        }

        tree.insert(PlacedLabel {
            details: label,
            bounds,
        });
        true
    }

    fn reset(&self) {
        for zoom in 0..self.levels.len() {
            self.reset_zoom(zoom as u8);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;
    use std::thread;

    use geo::{polygon, Rotate};

    fn rect(x: f64, y: f64, w: f64, h: f64) -> Polygon<f64> {
        polygon![
            (x: x, y: y),
            (x: x + w, y: y),
            (x: x + w, y: y + h),
            (x: x, y: y + h)
        ]
    }

    fn label(outline: Polygon<f64>, id: u64) -> LabelDetails {
        LabelDetails::new(outline, FeatureId(id))
    }

    #[test]
    fn test_disjoint_labels_are_both_placed() {
        let index = PerZoomLabelIndex::default();

        assert!(index.can_place_label(10, label(rect(0.0, 0.0, 10.0, 5.0), 1)));
        assert!(index.can_place_label(10, label(rect(20.0, 0.0, 10.0, 5.0), 2)));
        assert_eq!(index.placed_count(10), 2);
    }

    #[test]
    fn test_overlapping_label_of_other_feature_is_rejected() {
        let index = PerZoomLabelIndex::default();

        assert!(index.can_place_label(10, label(rect(0.0, 0.0, 10.0, 5.0), 1)));
        assert!(!index.can_place_label(10, label(rect(5.0, 2.0, 10.0, 5.0), 2)));
        assert_eq!(index.placed_count(10), 1);
    }

    #[test]
    fn test_overlapping_label_of_same_feature_is_accepted() {
        let index = PerZoomLabelIndex::default();

        assert!(index.can_place_label(10, label(rect(0.0, 0.0, 10.0, 5.0), 7)));
        assert!(index.can_place_label(10, label(rect(5.0, 2.0, 10.0, 5.0), 7)));
    }

    #[test]
    fn test_rotated_outlines_use_exact_intersection() {
        let index = PerZoomLabelIndex::default();
        // A thin diagonal label whose bounding box covers the origin corner but whose
        // outline does not.
        let diagonal = rect(-20.0, -1.0, 40.0, 2.0).rotate_around_center(45.0);
        let corner = rect(-14.0, 8.0, 4.0, 4.0);

        assert!(index.can_place_label(3, label(diagonal, 1)));
        assert!(index.can_place_label(3, label(corner, 2)));
    }

    #[test]
    fn test_zoom_levels_are_independent() {
        let index = PerZoomLabelIndex::default();

        assert!(index.can_place_label(4, label(rect(0.0, 0.0, 10.0, 5.0), 1)));
        assert!(index.can_place_label(5, label(rect(0.0, 0.0, 10.0, 5.0), 2)));
        assert!(!index.can_place_label(40, label(rect(0.0, 0.0, 10.0, 5.0), 3)));
    }

    #[test]
    fn test_reset_forgets_labels() {
        let index = PerZoomLabelIndex::default();
        assert!(index.can_place_label(8, label(rect(0.0, 0.0, 10.0, 5.0), 1)));

        index.reset();

        assert_eq!(index.placed_count(8), 0);
        assert!(index.can_place_label(8, label(rect(0.0, 0.0, 10.0, 5.0), 2)));
    }

    #[test]
    fn test_concurrent_placement_accepts_exactly_one() {
        let index = Arc::new(PerZoomLabelIndex::default());

        let accepted: usize = thread::scope(|scope| {
            let handles: Vec<_> = (0..8u64)
                .map(|id| {
                    let index = Arc::clone(&index);
                    scope.spawn(move || index.can_place_label(12, label(rect(0.0, 0.0, 10.0, 5.0), id)))
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap() as usize).sum()
        });

        assert_eq!(accepted, 1);
        assert_eq!(index.placed_count(12), 1);
    }
}
