use glam::{IVec2, Vec2};
use std::collections::HashMap;

/// Candidate label position
///
/// `segment` is the index of the line segment the anchor lies on, `None` for point
/// and polygon anchors.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Anchor {
    pub point: Vec2,
    pub angle: f32,
    pub segment: Option<usize>,
}

impl Anchor {
    pub fn new(x: f32, y: f32, angle: f32, segment: Option<usize>) -> Anchor {
        Anchor {
            point: Vec2::new(x, y),
            angle,
            segment,
        }
    }
}

fn dist(a: IVec2, b: IVec2) -> f32 {
    a.as_vec2().distance(b.as_vec2())
}

/// Angle of the vector from `a` to `b`
fn angle_to(a: IVec2, b: IVec2) -> f32 {
    let d = (b - a).as_vec2();
    d.y.atan2(d.x)
}

/// Whether the line bends less than `max_angle` within every window of `window_size`
/// along the part of the line covered by a label centered on `anchor`
///
/// # Arguments
/// * `line` - Line the anchor was sampled from
/// * `anchor` - Anchor with its segment index
/// * `label_length` - Label length in tile units
/// * `window_size` - Length of line over which turning is summed
/// * `max_angle` - Max summed turning in radians
pub fn check_max_angle(line: &[IVec2], anchor: &Anchor, label_length: f32, window_size: f32, max_angle: f32) -> bool {
    let Some(segment) = anchor.segment else {
        return true;
    };

    let mut p = anchor.point;
    let mut index = segment as isize + 1;
    let mut anchor_distance = 0.0;

    // Walk back to the first segment the label covers
    while anchor_distance > -label_length / 2.0 {
        index -= 1;
        if index < 0 {
            return false;
        }
        let vertex = line[index as usize].as_vec2();
        anchor_distance -= vertex.distance(p);
        p = vertex;
    }

    let mut index = index as usize;
    anchor_distance += dist(line[index], line[index + 1]);
    index += 1;

    let mut recent_corners: std::collections::VecDeque<(f32, f32)> = std::collections::VecDeque::new();
    let mut recent_angle_delta = 0.0;

    while anchor_distance < label_length / 2.0 {
        let Some(&next) = line.get(index + 1) else {
            return false;
        };
        let prev = line[index - 1];
        let current = line[index];

        let delta = angle_to(prev, current) - angle_to(current, next);
        let delta = ((delta + 3.0 * std::f32::consts::PI).rem_euclid(std::f32::consts::TAU) - std::f32::consts::PI).abs();

        recent_corners.push_back((anchor_distance, delta));
        recent_angle_delta += delta;

        while let Some(&(distance, corner_delta)) = recent_corners.front() {
            if anchor_distance - distance <= window_size {
                break;
            }
            recent_angle_delta -= corner_delta;
            recent_corners.pop_front();
        }

        if recent_angle_delta > max_angle {
            return false;
        }

        index += 1;
        anchor_distance += dist(current, next);
    }
    true
}

/// Parameters for sampling anchors along a line
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LineAnchorOptions {
    /// Target distance between anchors, in tile units
    pub spacing: f32,
    /// Max turning within the label, in radians
    pub max_angle: f32,
    /// Longest of the shaped text and icon, in atlas pixels
    pub label_length: f32,
    /// Text is present: enables the angle check
    pub has_text: bool,
    pub glyph_size: f32,
    pub box_scale: f32,
    pub overscaling: f32,
    pub tile_extent: f32,
}

/// Evenly spaced label anchors along a line
///
/// Lines continued from outside the tile start half a spacing in so that neighbor tiles
/// agree on positions; other lines start after half the label plus a margin.
pub fn get_anchors(line: &[IVec2], options: &LineAnchorOptions) -> Vec<Anchor> {
    let Some(&first) = line.first() else {
        return Vec::new();
    };
    let extent = options.tile_extent as i32;
    let angle_window_size = if options.has_text {
        3.0 / 5.0 * options.glyph_size * options.box_scale
    } else {
        0.0
    };
    let label_length = options.label_length * options.box_scale;
    let is_line_continued = first.x == 0 || first.x == extent || first.y == 0 || first.y == extent;

    // Long labels keep at least a quarter spacing between their edges
    let mut spacing = options.spacing;
    if spacing - label_length < spacing / 4.0 {
        spacing = label_length + spacing / 4.0;
    }

    let fixed_extra_offset = options.glyph_size * 2.0;
    let offset = if is_line_continued {
        (spacing / 2.0 * options.overscaling) % spacing
    } else {
        ((options.label_length / 2.0 + fixed_extra_offset) * options.box_scale * options.overscaling) % spacing
    };

    let sampling = Resample {
        spacing,
        angle_window_size,
        max_angle: options.max_angle,
        label_length,
        is_line_continued,
        tile_extent: options.tile_extent,
    };
    sampling.resample(line, offset, false)
}

/// Single anchor halfway along the line, rejected when the label would bend too much
///
/// # Arguments
/// * `line` - Line in tile units
/// * `max_angle` - Max summed turning in radians
/// * `label_length` - Label length in tile units
/// * `angle_window_size` - Window for the angle check, zero disables it
pub fn get_center_anchor(line: &[IVec2], max_angle: f32, label_length: f32, angle_window_size: f32) -> Option<Anchor> {
    let line_length: f32 = line.windows(2).map(|w| dist(w[0], w[1])).sum();
    let center = line_length / 2.0;
    let mut prev_distance = 0.0;

    for (i, w) in line.windows(2).enumerate() {
        let (a, b) = (w[0], w[1]);
        let segment_dist = dist(a, b);
        if prev_distance + segment_dist > center {
            let t = (center - prev_distance) / segment_dist;
            let p = a.as_vec2().lerp(b.as_vec2(), t);
            let anchor = Anchor::new(p.x, p.y, angle_to(a, b), Some(i));
            if angle_window_size == 0.0 || check_max_angle(line, &anchor, label_length, angle_window_size, max_angle) {
                return Some(anchor);
            }
            return None;
        }
        prev_distance += segment_dist;
    }
    None
}

struct Resample {
    spacing: f32,
    angle_window_size: f32,
    max_angle: f32,
    label_length: f32,
    is_line_continued: bool,
    tile_extent: f32,
}

impl Resample {
    fn resample(&self, line: &[IVec2], offset: f32, place_at_middle: bool) -> Vec<Anchor> {
        let half_label_length = self.label_length / 2.0;
        let line_length: f32 = line.windows(2).map(|w| dist(w[0], w[1])).sum();

        let mut distance = 0.0;
        let mut marked_distance = offset - self.spacing;
        let mut anchors: Vec<Anchor> = Vec::new();

        for (i, w) in line.windows(2).enumerate() {
            let (a, b) = (w[0], w[1]);
            let segment_dist = dist(a, b);
            let angle = angle_to(a, b);

            while marked_distance + self.spacing < distance + segment_dist {
                marked_distance += self.spacing;
                let t = (marked_distance - distance) / segment_dist;
                let p = a.as_vec2().lerp(b.as_vec2(), t);

                // Inside the tile, with room for the label on both sides
                if p.x >= 0.0
                    && p.x < self.tile_extent
                    && p.y >= 0.0
                    && p.y < self.tile_extent
                    && marked_distance - half_label_length >= 0.0
                    && marked_distance + half_label_length <= line_length
                {
                    let anchor = Anchor::new(p.x.round(), p.y.round(), angle, Some(i));
                    // Rounding can pull neighbours on a diagonal below the spacing
                    let too_close = anchors
                        .last()
                        .is_some_and(|prev| prev.point.distance(anchor.point) < self.spacing);
                    if too_close {
                        continue;
                    }
                    if self.angle_window_size == 0.0
                        || check_max_angle(line, &anchor, self.label_length, self.angle_window_size, self.max_angle)
                    {
                        anchors.push(anchor);
                    }
                }
            }
            distance += segment_dist;
        }

        if !place_at_middle && anchors.is_empty() && !self.is_line_continued {
            // Short line: try a single anchor in the middle
            anchors = self.resample(line, distance / 2.0, true);
        }
        anchors
    }
}

/// Anchors already used per label text, shared by the symbol layers of one tile
///
/// Suppresses a label whose text repeats too close to an earlier copy, independent of
/// collision detection.
#[derive(Clone, Debug, Default)]
pub struct RepeatDistanceIndex {
    anchors: HashMap<String, Vec<Vec2>>,
}

impl RepeatDistanceIndex {
    pub fn new() -> RepeatDistanceIndex {
        RepeatDistanceIndex::default()
    }

    /// Whether `text` was already placed within `repeat_distance` of `anchor`
    ///
    /// Anchors that are not too close are recorded.
    pub fn is_too_close(&mut self, text: &str, repeat_distance: f32, anchor: &Anchor) -> bool {
        let others = self.anchors.entry(text.to_string()).or_default();
        if others.iter().rev().any(|other| anchor.point.distance(*other) < repeat_distance) {
            return true;
        }
        others.push(anchor.point);
        false
    }

    pub fn clear(&mut self) {
        self.anchors.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(spacing: f32, label_length: f32) -> LineAnchorOptions {
        LineAnchorOptions {
            spacing,
            max_angle: 45f32.to_radians(),
            label_length,
            has_text: true,
            glyph_size: 24.0,
            box_scale: 1.0,
            overscaling: 1.0,
            tile_extent: 4096.0,
        }
    }

    fn line(points: &[(i32, i32)]) -> Vec<IVec2> {
        points.iter().map(|&(x, y)| IVec2::new(x, y)).collect()
    }

    #[test]
    fn test_anchors_respect_spacing() {
        let l = line(&[(100, 2000), (3100, 2000)]);
        let anchors = get_anchors(&l, &options(200.0, 40.0));
        assert!(anchors.len() > 10);
        for pair in anchors.windows(2) {
            assert!(pair[0].point.distance(pair[1].point) >= 200.0);
        }
        // First anchor sits half a label plus two ems from the start
        assert_eq!(anchors[0].point, Vec2::new(168.0, 2000.0));
        assert!(anchors.iter().all(|a| a.segment == Some(0) && a.angle == 0.0));
    }

    #[test]
    fn test_diagonal_anchors_respect_spacing() {
        // Odd spacing on a 3-4-5 diagonal puts every anchor off the integer grid
        let l = line(&[(100, 100), (1900, 2500)]);
        let anchors = get_anchors(&l, &options(201.0, 40.0));
        assert!(anchors.len() > 5);
        for pair in anchors.windows(2) {
            assert!(pair[0].point.distance(pair[1].point) >= 201.0);
        }
        assert!(anchors.iter().all(|a| a.point == a.point.round()));
    }

    #[test]
    fn test_long_label_widens_spacing() {
        let l = line(&[(100, 2000), (3100, 2000)]);
        let anchors = get_anchors(&l, &options(200.0, 300.0));
        for pair in anchors.windows(2) {
            assert!(pair[0].point.distance(pair[1].point) >= 350.0);
        }
    }

    #[test]
    fn test_continued_line_offset() {
        let l = line(&[(0, 2000), (3000, 2000)]);
        let anchors = get_anchors(&l, &options(200.0, 40.0));
        assert_eq!(anchors[0].point, Vec2::new(100.0, 2000.0));
    }

    #[test]
    fn test_short_line_gets_middle_anchor() {
        let l = line(&[(1000, 1000), (1100, 1000)]);
        let anchors = get_anchors(&l, &options(2000.0, 80.0));
        assert_eq!(anchors.len(), 1);
        assert_eq!(anchors[0].point, Vec2::new(1050.0, 1000.0));
    }

    #[test]
    fn test_sharp_turn_rejected() {
        let zigzag = line(&[(1000, 1000), (1100, 1000), (1000, 1010), (1100, 1020)]);
        let anchor = Anchor::new(1050.0, 1005.0, 0.0, Some(1));
        assert!(!check_max_angle(&zigzag, &anchor, 150.0, 20.0, 45f32.to_radians()));

        let straight = line(&[(1000, 1000), (1100, 1000), (1200, 1000)]);
        let anchor = Anchor::new(1100.0, 1000.0, 0.0, Some(1));
        assert!(check_max_angle(&straight, &anchor, 100.0, 20.0, 45f32.to_radians()));
    }

    #[test]
    fn test_label_longer_than_line_before_anchor() {
        let l = line(&[(1000, 1000), (1100, 1000)]);
        let anchor = Anchor::new(1010.0, 1000.0, 0.0, Some(0));
        assert!(!check_max_angle(&l, &anchor, 100.0, 20.0, 1.0));
    }

    #[test]
    fn test_center_anchor() {
        let l = line(&[(1000, 1000), (1100, 1000), (1100, 1200)]);
        let anchor = get_center_anchor(&l, 45f32.to_radians(), 40.0, 0.0).unwrap();
        assert_eq!(anchor.point, Vec2::new(1100.0, 1050.0));
        assert_eq!(anchor.segment, Some(1));
        assert!((anchor.angle - std::f32::consts::FRAC_PI_2).abs() < 1e-6);

        // The corner lies within the label
        assert!(get_center_anchor(&l, 45f32.to_radians(), 200.0, 20.0).is_none());
        assert!(get_center_anchor(&l[..1], 1.0, 10.0, 0.0).is_none());
    }

    #[test]
    fn test_repeated_text_too_close() {
        let mut index = RepeatDistanceIndex::new();
        let a = Anchor::new(100.0, 100.0, 0.0, None);
        let b = Anchor::new(105.0, 100.0, 0.0, None);
        let c = Anchor::new(120.0, 100.0, 0.0, None);
        assert!(!index.is_too_close("AB", 10.0, &a));
        assert!(index.is_too_close("AB", 10.0, &b));
        assert!(!index.is_too_close("AB", 10.0, &c));
        // Other text is unaffected
        assert!(!index.is_too_close("CD", 10.0, &b));
    }
}
