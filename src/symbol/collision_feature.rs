use super::anchors::Anchor;
use glam::{IVec2, Vec2};
use std::ops::{Index, IndexMut};

/// Collision boxes per tile addressable by placed symbols
pub const MAX_INSTANCES: usize = 65535;

/// Box tested for label overlap, relative to its anchor in tile units
///
/// The box only matters while the label is scaled below `max_scale`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CollisionBox {
    pub anchor_point: Vec2,
    /// Offset of the box center from the label anchor (line labels)
    pub offset: Vec2,
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub max_scale: f32,
    pub feature_index: usize,
    /// Scale from which the box was inserted; written during placement
    pub placement_scale: f32,
    /// Rotated, stretched bounds used by the index; written during placement
    pub bbox: [f32; 4],
}

impl CollisionBox {
    pub fn new(anchor_point: Vec2, offset: Vec2, bounds: [f32; 4], max_scale: f32, feature_index: usize) -> CollisionBox {
        CollisionBox {
            anchor_point,
            offset,
            x1: bounds[0],
            y1: bounds[1],
            x2: bounds[2],
            y2: bounds[3],
            max_scale,
            feature_index,
            placement_scale: 0.0,
            bbox: [0.0; 4],
        }
    }
}

/// Collision boxes of every symbol bucket in a tile
#[derive(Clone, Debug, Default)]
pub struct CollisionBoxArray {
    boxes: Vec<CollisionBox>,
    warned: bool,
}

impl CollisionBoxArray {
    pub fn new() -> CollisionBoxArray {
        CollisionBoxArray::default()
    }

    pub fn push(&mut self, b: CollisionBox) {
        self.boxes.push(b);
        if self.boxes.len() > MAX_INSTANCES && !self.warned {
            log::warn!(
                "Too many symbols in one tile: more than {} collision boxes, some labels will not be placed",
                MAX_INSTANCES
            );
            self.warned = true;
        }
    }

    pub fn len(&self) -> usize {
        self.boxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty()
    }

    pub fn clear(&mut self) {
        self.boxes.clear();
    }

    pub fn iter(&self) -> std::slice::Iter<'_, CollisionBox> {
        self.boxes.iter()
    }
}

impl Index<usize> for CollisionBoxArray {
    type Output = CollisionBox;

    fn index(&self, index: usize) -> &CollisionBox {
        &self.boxes[index]
    }
}

impl IndexMut<usize> for CollisionBoxArray {
    fn index_mut(&mut self, index: usize) -> &mut CollisionBox {
        &mut self.boxes[index]
    }
}

/// Label bounds in atlas pixels relative to the anchor
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LabelBounds {
    pub top: f32,
    pub bottom: f32,
    pub left: f32,
    pub right: f32,
}

/// Range of boxes in a `CollisionBoxArray` covering one label
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CollisionFeature {
    pub box_start: usize,
    pub box_end: usize,
}

impl CollisionFeature {
    /// Append the boxes covering a label and return their range
    ///
    /// Labels not aligned with a line get one box valid at every scale. Line labels get a
    /// chain of square boxes along the line; `straight` keeps the chain on the anchor's
    /// segment direction, for icons that do not bend.
    ///
    /// # Arguments
    /// * `boxes` - Shared per-tile box array
    /// * `line` - Line the anchor was placed on (a single point for point labels)
    /// * `anchor` - Label anchor
    /// * `feature_index` - Index of the source feature
    /// * `bounds` - Shaped label bounds in pixels
    /// * `box_scale` - Pixels to tile units
    /// * `padding` - Extra margin in tile units
    /// * `align_line` - Label follows the line
    /// * `straight` - Chain stays straight along the anchor segment
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        boxes: &mut CollisionBoxArray,
        line: &[IVec2],
        anchor: &Anchor,
        feature_index: usize,
        bounds: LabelBounds,
        box_scale: f32,
        padding: f32,
        align_line: bool,
        straight: bool,
    ) -> CollisionFeature {
        let y1 = bounds.top * box_scale - padding;
        let y2 = bounds.bottom * box_scale + padding;
        let x1 = bounds.left * box_scale - padding;
        let x2 = bounds.right * box_scale + padding;

        let box_start = boxes.len();

        if align_line {
            let height = y2 - y1;
            let length = x2 - x1;
            if height > 0.0 {
                // Minimum height keeps the box count of small labels down
                let height = height.max(10.0 * box_scale);
                match anchor.segment {
                    Some(segment) if straight && segment + 1 < line.len() => {
                        let direction = (line[segment + 1] - line[segment]).as_vec2().normalize_or_zero() * length;
                        let straight_line = [
                            (anchor.point - direction).round().as_ivec2(),
                            (anchor.point + direction).round().as_ivec2(),
                        ];
                        add_line_boxes(boxes, &straight_line, anchor, 0, length, height, feature_index);
                    }
                    Some(segment) => {
                        add_line_boxes(boxes, line, anchor, segment, length, height, feature_index);
                    }
                    None => {
                        boxes.push(CollisionBox::new(anchor.point, Vec2::ZERO, [x1, y1, x2, y2], f32::INFINITY, feature_index));
                    }
                }
            }
        } else {
            boxes.push(CollisionBox::new(anchor.point, Vec2::ZERO, [x1, y1, x2, y2], f32::INFINITY, feature_index));
        }

        CollisionFeature {
            box_start,
            box_end: boxes.len(),
        }
    }

    pub fn len(&self) -> usize {
        self.box_end - self.box_start
    }

    pub fn is_empty(&self) -> bool {
        self.box_end == self.box_start
    }
}

/// Chain of square boxes covering `label_length` of line centered on the anchor
fn add_line_boxes(
    boxes: &mut CollisionBoxArray,
    line: &[IVec2],
    anchor: &Anchor,
    segment: usize,
    label_length: f32,
    box_size: f32,
    feature_index: usize,
) {
    let step = box_size / 2.0;
    let n_boxes = (label_length / step).floor() as usize;

    // First box center sits half a box in so its edge meets the label's edge
    let first_box_offset = -box_size / 2.0;

    let mut p = anchor.point;
    let mut index = segment as isize + 1;
    let mut anchor_distance = first_box_offset;

    // Walk back to the first segment the label covers
    loop {
        index -= 1;
        if index < 0 {
            return;
        }
        let vertex = line[index as usize].as_vec2();
        anchor_distance -= vertex.distance(p);
        p = vertex;
        if anchor_distance <= -label_length / 2.0 {
            break;
        }
    }

    let mut index = index as usize;
    if index + 1 >= line.len() {
        return;
    }
    let mut segment_length = line[index].as_vec2().distance(line[index + 1].as_vec2());

    for i in 0..n_boxes {
        let box_distance_to_anchor = -label_length / 2.0 + i as f32 * step;

        while anchor_distance + segment_length < box_distance_to_anchor {
            anchor_distance += segment_length;
            index += 1;
            // Not enough room before the end of the line
            if index + 1 >= line.len() {
                return;
            }
            segment_length = line[index].as_vec2().distance(line[index + 1].as_vec2());
        }

        let segment_box_distance = box_distance_to_anchor - anchor_distance;
        let p0 = line[index].as_vec2();
        let p1 = line[index + 1].as_vec2();
        let box_anchor = ((p1 - p0).normalize_or_zero() * segment_box_distance + p0).round();

        // Boxes away from the anchor stop mattering once the label has shrunk past them
        let distance_to_inner_edge = ((box_distance_to_anchor - first_box_offset).abs() - step / 2.0).max(0.0);
        let max_scale = label_length / 2.0 / distance_to_inner_edge;

        boxes.push(CollisionBox::new(
            box_anchor,
            box_anchor - anchor.point,
            [-box_size / 2.0, -box_size / 2.0, box_size / 2.0, box_size / 2.0],
            max_scale,
            feature_index,
        ));
    }
}
