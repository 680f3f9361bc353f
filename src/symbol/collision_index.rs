//! Scale-aware label collision detection backed by an R-tree

use super::collision_feature::{CollisionBox, CollisionBoxArray, CollisionFeature};
use crate::geometry::EXTENT;
use glam::{Mat2, Vec2};
use rstar::{RTree, RTreeObject, AABB};

/// Box inserted into the index, pointing back into the tile's box array
#[derive(Clone, Copy, Debug, PartialEq)]
struct IndexedBox {
    index: usize,
    bbox: [f32; 4],
}

impl RTreeObject for IndexedBox {
    type Envelope = AABB<[f32; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_corners([self.bbox[0], self.bbox[1]], [self.bbox[2], self.bbox[3]])
    }
}

/// Collision state of one tile for one camera angle and pitch
///
/// Placement asks for the smallest scale at which a label clears every box inserted so
/// far; labels are then inserted from that scale on.
pub struct CollisionIndex {
    pub angle: f32,
    pub perspective_ratio: f32,
    /// Smallest scale considered; labels are never placed below it
    pub min_scale: f32,
    /// Labels needing a larger scale than this are not placed
    pub max_scale: f32,
    rotation: Mat2,
    reverse_rotation: Mat2,
    y_stretch: f32,
    tree: RTree<IndexedBox>,
    ignored: RTree<IndexedBox>,
    edges: [CollisionBox; 4],
}

impl CollisionIndex {
    /// # Arguments
    /// * `angle` - Map rotation in radians
    /// * `pitch` - Map pitch in radians
    /// * `camera_to_center_distance` - Camera distance to the screen center
    /// * `camera_to_tile_distance` - Camera distance to the tile's center
    pub fn new(angle: f32, pitch: f32, camera_to_center_distance: f32, camera_to_tile_distance: f32) -> CollisionIndex {
        let perspective_ratio = 1.0 + 0.5 * (camera_to_tile_distance / camera_to_center_distance - 1.0);

        // Tilted maps squash labels vertically; approximate with the tile's distance
        let y_stretch = (camera_to_tile_distance / (camera_to_center_distance * pitch.cos())).max(1.0);

        let max = i16::MAX as f32;
        let extent = EXTENT as f32;
        let edge = |anchor: Vec2, bounds: [f32; 4]| {
            let mut b = CollisionBox::new(anchor, Vec2::ZERO, bounds, max, usize::MAX);
            b.placement_scale = 0.0;
            b
        };
        let edges = [
            edge(Vec2::ZERO, [0.0, -max, 0.0, max]),
            edge(Vec2::new(extent, 0.0), [0.0, -max, 0.0, max]),
            edge(Vec2::ZERO, [-max, 0.0, max, 0.0]),
            edge(Vec2::new(0.0, extent), [-max, 0.0, max, 0.0]),
        ];

        CollisionIndex {
            angle,
            perspective_ratio,
            min_scale: 0.5 / perspective_ratio,
            max_scale: 2.0 / perspective_ratio,
            rotation: Mat2::from_angle(angle),
            reverse_rotation: Mat2::from_angle(-angle),
            y_stretch,
            tree: RTree::new(),
            ignored: RTree::new(),
            edges,
        }
    }

    /// Index for a north-up, unpitched view
    pub fn flat(angle: f32) -> CollisionIndex {
        CollisionIndex::new(angle, 0.0, 1.0, 1.0)
    }

    /// Smallest scale at which every box of `feature` is clear of inserted boxes
    ///
    /// Also records each box's rotated bounds for a later `insert_feature`.
    pub fn place_feature(
        &self,
        boxes: &mut CollisionBoxArray,
        feature: &CollisionFeature,
        allow_overlap: bool,
        avoid_edges: bool,
    ) -> f32 {
        let mut min_placement_scale = self.min_scale;

        for b in feature.box_start..feature.box_end {
            let anchor = self.rotation * boxes[b].anchor_point;
            let bbox = {
                let cb = &boxes[b];
                [
                    anchor.x + cb.x1,
                    anchor.y + cb.y1 * self.y_stretch,
                    anchor.x + cb.x2,
                    anchor.y + cb.y2 * self.y_stretch,
                ]
            };
            boxes[b].bbox = bbox;
            let cb = boxes[b];

            if !allow_overlap {
                let envelope = AABB::from_corners([bbox[0], bbox[1]], [bbox[2], bbox[3]]);
                for blocking in self.tree.locate_in_envelope_intersecting(&envelope) {
                    let other = &boxes[blocking.index];
                    let other_anchor = self.rotation * other.anchor_point;
                    min_placement_scale = self.placement_scale(min_placement_scale, anchor, &cb, other_anchor, other);
                    if min_placement_scale >= self.max_scale {
                        return min_placement_scale;
                    }
                }
            }

            if avoid_edges {
                let rotated = if self.angle != 0.0 {
                    let corners = [
                        self.reverse_rotation * Vec2::new(cb.x1, cb.y1),
                        self.reverse_rotation * Vec2::new(cb.x2, cb.y1),
                        self.reverse_rotation * Vec2::new(cb.x1, cb.y2),
                        self.reverse_rotation * Vec2::new(cb.x2, cb.y2),
                    ];
                    let min = corners.iter().fold(Vec2::splat(f32::MAX), |m, c| m.min(*c));
                    let max = corners.iter().fold(Vec2::splat(f32::MIN), |m, c| m.max(*c));
                    CollisionBox::new(cb.anchor_point, cb.offset, [min.x, min.y, max.x, max.y], cb.max_scale, cb.feature_index)
                } else {
                    cb
                };
                for edge in &self.edges {
                    min_placement_scale =
                        self.placement_scale(min_placement_scale, cb.anchor_point, &rotated, edge.anchor_point, edge);
                    if min_placement_scale >= self.max_scale {
                        return min_placement_scale;
                    }
                }
            }
        }
        min_placement_scale
    }

    /// Lowest scale at which `b` placed at `anchor` clears `blocking`, folded into the running minimum
    fn placement_scale(
        &self,
        min_placement_scale: f32,
        anchor: Vec2,
        b: &CollisionBox,
        blocking_anchor: Vec2,
        blocking: &CollisionBox,
    ) -> f32 {
        let diff = anchor - blocking_anchor;
        // Scales at which the box sits left of, right of, above and below the blocker
        let mut s1 = (blocking.x1 - b.x2) / diff.x;
        let mut s2 = (blocking.x2 - b.x1) / diff.x;
        let mut s3 = (blocking.y1 - b.y2) * self.y_stretch / diff.y;
        let mut s4 = (blocking.y2 - b.y1) * self.y_stretch / diff.y;

        if s1.is_nan() || s2.is_nan() {
            s1 = 1.0;
            s2 = 1.0;
        }
        if s3.is_nan() || s4.is_nan() {
            s3 = 1.0;
            s4 = 1.0;
        }

        let mut collision_free_scale = s1.max(s2).min(s3.max(s4));

        // Past its max scale the blocker no longer covers its label
        if collision_free_scale > blocking.max_scale {
            collision_free_scale = blocking.max_scale;
        }
        if collision_free_scale > b.max_scale {
            collision_free_scale = b.max_scale;
        }

        if collision_free_scale > min_placement_scale && collision_free_scale >= blocking.placement_scale {
            collision_free_scale
        } else {
            min_placement_scale
        }
    }

    /// Record `feature` as shown from `scale` on
    ///
    /// Features that never show are not indexed. With `ignore_placement` the boxes go into
    /// a separate tree that blocks nothing.
    pub fn insert_feature(
        &mut self,
        boxes: &mut CollisionBoxArray,
        feature: &CollisionFeature,
        scale: f32,
        ignore_placement: bool,
    ) {
        for b in feature.box_start..feature.box_end {
            boxes[b].placement_scale = scale;
            // Boxes below max scale 1 only matter for pitched views
            if scale < self.max_scale && (self.perspective_ratio == 1.0 || boxes[b].max_scale >= 1.0) {
                let entry = IndexedBox {
                    index: b,
                    bbox: boxes[b].bbox,
                };
                if ignore_placement {
                    self.ignored.insert(entry);
                } else {
                    self.tree.insert(entry);
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.tree.size()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }

    /// Indices of inserted boxes, ignored ones included, whose bounds intersect `bbox`
    pub fn query(&self, bbox: [f32; 4]) -> Vec<usize> {
        let envelope = AABB::from_corners([bbox[0], bbox[1]], [bbox[2], bbox[3]]);
        self.tree
            .locate_in_envelope_intersecting(&envelope)
            .chain(self.ignored.locate_in_envelope_intersecting(&envelope))
            .map(|b| b.index)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbol::anchors::Anchor;
    use crate::symbol::collision_feature::LabelBounds;
    use glam::IVec2;

    fn point_feature(boxes: &mut CollisionBoxArray, x: f32, y: f32, half_width: f32) -> CollisionFeature {
        let anchor = Anchor::new(x, y, 0.0, None);
        let bounds = LabelBounds {
            top: -10.0,
            bottom: 10.0,
            left: -half_width,
            right: half_width,
        };
        CollisionFeature::new(boxes, &[IVec2::new(x as i32, y as i32)], &anchor, 0, bounds, 1.0, 0.0, false, false)
    }

    #[test]
    fn test_identical_boxes_collide_at_every_scale() {
        let mut boxes = CollisionBoxArray::new();
        let mut index = CollisionIndex::flat(0.0);
        let a = point_feature(&mut boxes, 1000.0, 1000.0, 50.0);
        let b = point_feature(&mut boxes, 1000.0, 1000.0, 50.0);

        let scale_a = index.place_feature(&mut boxes, &a, false, false);
        assert_eq!(scale_a, index.min_scale);
        index.insert_feature(&mut boxes, &a, scale_a, false);

        let scale_b = index.place_feature(&mut boxes, &b, false, false);
        assert!(scale_b > index.max_scale);
        index.insert_feature(&mut boxes, &b, scale_b, false);
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_neighbors_separate_when_zoomed_in() {
        let mut boxes = CollisionBoxArray::new();
        let mut index = CollisionIndex::flat(0.0);
        let a = point_feature(&mut boxes, 1000.0, 1000.0, 50.0);
        // Boxes 100 wide, anchors 80 apart: clear from scale 100 / 80
        let b = point_feature(&mut boxes, 1080.0, 1000.0, 50.0);
        let scale_a = index.place_feature(&mut boxes, &a, false, false);
        index.insert_feature(&mut boxes, &a, scale_a, false);
        let scale_b = index.place_feature(&mut boxes, &b, false, false);
        assert!((scale_b - 1.25).abs() < 1e-6);
    }

    #[test]
    fn test_allow_overlap_and_ignore_placement() {
        let mut boxes = CollisionBoxArray::new();
        let mut index = CollisionIndex::flat(0.0);
        let a = point_feature(&mut boxes, 1000.0, 1000.0, 50.0);
        let b = point_feature(&mut boxes, 1000.0, 1000.0, 50.0);
        let c = point_feature(&mut boxes, 1000.0, 1000.0, 50.0);

        let scale_a = index.place_feature(&mut boxes, &a, false, false);
        index.insert_feature(&mut boxes, &a, scale_a, true);
        assert!(index.is_empty());
        assert_eq!(index.query([990.0, 990.0, 1010.0, 1010.0]), vec![0]);

        // Ignored boxes do not block
        let scale_b = index.place_feature(&mut boxes, &b, false, false);
        assert_eq!(scale_b, index.min_scale);
        index.insert_feature(&mut boxes, &b, scale_b, false);

        let scale_c = index.place_feature(&mut boxes, &c, true, false);
        assert_eq!(scale_c, index.min_scale);
    }

    #[test]
    fn test_avoid_edges() {
        let mut boxes = CollisionBoxArray::new();
        let index = CollisionIndex::flat(0.0);
        let near_edge = point_feature(&mut boxes, 20.0, 1000.0, 50.0);
        // 50 wide half box at 20 from the edge: clear from scale 2.5
        let scale = index.place_feature(&mut boxes, &near_edge, false, true);
        assert!(scale >= index.max_scale);

        let inside = point_feature(&mut boxes, 2000.0, 2000.0, 50.0);
        assert_eq!(index.place_feature(&mut boxes, &inside, false, true), index.min_scale);
    }

    #[test]
    fn test_pitch_stretches_boxes() {
        let flat = CollisionIndex::flat(0.0);
        let pitched = CollisionIndex::new(0.0, 60f32.to_radians(), 1.0, 1.0);
        assert_eq!(flat.y_stretch, 1.0);
        assert!((pitched.y_stretch - 2.0).abs() < 1e-4);
        assert_eq!(pitched.perspective_ratio, 1.0);
    }
}
