use crate::geometry::EXTENT;
use glam::{I64Vec2, IVec2};

/// Flag bit set on parts whose footprint is covered by a replacement region
pub const HIDDEN_BY_REPLACEMENT: u32 = 0x8000_0000;

/// Encoded centroid marking a part hidden until its neighbor tile is stitched
pub const HIDDEN_CENTROID: [u16; 2] = [0, 1];

/// Encoded centroid for parts shown without a flat roof
pub const DEFAULT_CENTROID: [u16; 2] = [0, 0];

/// Tile borders in the order used by border ranges: left, right, top, bottom
pub const BORDER_LEFT: usize = 0;
pub const BORDER_RIGHT: usize = 1;
pub const BORDER_TOP: usize = 2;
pub const BORDER_BOTTOM: usize = 3;

/// Range of footprint vertices and triangles belonging to one clipped polygon
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct FootprintSegment {
    pub vertex_offset: usize,
    pub vertex_count: usize,
    /// Offset into the footprint triangle list, in triangles
    pub index_offset: usize,
    pub index_count: usize,
}

/// Per-feature record kept for the lifetime of the bucket
#[derive(Clone, Debug, PartialEq)]
pub struct PartData {
    pub centroid: [u16; 2],
    pub vertex_array_offset: usize,
    pub vertex_count: usize,
    pub ground_vertex_array_offset: usize,
    pub ground_vertex_count: usize,
    pub flags: u32,
    pub footprint_seg_idx: Option<usize>,
    pub footprint_seg_len: usize,
    pub min: IVec2,
    pub max: IVec2,
}

impl Default for PartData {
    fn default() -> Self {
        PartData {
            centroid: DEFAULT_CENTROID,
            vertex_array_offset: 0,
            vertex_count: 0,
            ground_vertex_array_offset: 0,
            ground_vertex_count: 0,
            flags: 0,
            footprint_seg_idx: None,
            footprint_seg_len: 0,
            min: IVec2::splat(i32::MAX),
            max: IVec2::splat(i32::MIN),
        }
    }
}

impl PartData {
    pub fn span(&self) -> IVec2 {
        self.max - self.min
    }

    pub fn is_hidden_by_replacement(&self) -> bool {
        self.flags & HIDDEN_BY_REPLACEMENT != 0
    }
}

/// Running centroid accumulator and tile border intersections of one feature
///
/// Only retained for features crossing a tile border.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BorderCentroidData {
    pub acc: I64Vec2,
    pub acc_count: i64,
    /// `[min, max]` crossing coordinate per border; `None` until any border is crossed
    pub borders: Option<[[f32; 2]; 4]>,
    pub centroid_data_index: usize,
}

impl BorderCentroidData {
    pub fn new(centroid_data_index: usize) -> BorderCentroidData {
        BorderCentroidData {
            centroid_data_index,
            ..Default::default()
        }
    }

    pub fn start_ring(&mut self, data: &mut PartData, p: IVec2) {
        if data.min.x == i32::MAX {
            data.min = p;
            data.max = p;
        }
    }

    /// Accumulate `p` and record border crossings of the edge `prev -> p`
    pub fn append_edge(&mut self, data: &mut PartData, p: IVec2, prev: IVec2) {
        self.acc_count += 1;
        self.acc += p.as_i64vec2();

        let mut check_borders = self.borders.is_some();

        if p.x < data.min.x {
            data.min.x = p.x;
            check_borders = true;
        } else if p.x > data.max.x {
            data.max.x = p.x;
            check_borders = true;
        }

        if p.y < data.min.y {
            data.min.y = p.y;
            check_borders = true;
        } else if p.y > data.max.y {
            data.max.y = p.y;
            check_borders = true;
        }

        // Features cut exactly on the border repeat points at the tile corner, hence xor
        let on_x_border = (p.x == 0 || p.x == EXTENT) && p.x == prev.x;
        let on_y_border = (p.y == 0 || p.y == EXTENT) && p.y == prev.y;
        if on_x_border != on_y_border {
            self.process_border_overlap(p, prev);
        }

        if check_borders {
            self.check_border_intersection(p, prev);
        }
    }

    fn check_border_intersection(&mut self, p: IVec2, prev: IVec2) {
        let (p, prev) = (p.as_vec2(), prev.as_vec2());
        let extent = EXTENT as f32;
        let lerp = |a: f32, b: f32, t: f32| a + (b - a) * t;

        if (prev.x < 0.0) != (p.x < 0.0) {
            self.add_border_intersection(BORDER_LEFT, lerp(prev.y, p.y, (0.0 - prev.x) / (p.x - prev.x)));
        }
        if (prev.x > extent) != (p.x > extent) {
            self.add_border_intersection(BORDER_RIGHT, lerp(prev.y, p.y, (extent - prev.x) / (p.x - prev.x)));
        }
        if (prev.y < 0.0) != (p.y < 0.0) {
            self.add_border_intersection(BORDER_TOP, lerp(prev.x, p.x, (0.0 - prev.y) / (p.y - prev.y)));
        }
        if (prev.y > extent) != (p.y > extent) {
            self.add_border_intersection(BORDER_BOTTOM, lerp(prev.x, p.x, (extent - prev.y) / (p.y - prev.y)));
        }
    }

    fn add_border_intersection(&mut self, index: usize, i: f32) {
        let borders = self
            .borders
            .get_or_insert([[f32::MAX, -f32::MAX]; 4]);
        let b = &mut borders[index];
        if i < b[0] {
            b[0] = i;
        }
        if i > b[1] {
            b[1] = i;
        }
    }

    fn process_border_overlap(&mut self, p: IVec2, prev: IVec2) {
        if p.x == prev.x {
            if p.y == prev.y {
                return;
            }
            let index = if p.x == 0 { BORDER_LEFT } else { BORDER_RIGHT };
            self.add_border_intersection(index, prev.y as f32);
            self.add_border_intersection(index, p.y as f32);
        } else {
            let index = if p.y == 0 { BORDER_TOP } else { BORDER_BOTTOM };
            self.add_border_intersection(index, prev.x as f32);
            self.add_border_intersection(index, p.x as f32);
        }
    }

    /// Border range on `side`, if the feature crosses it
    pub fn border(&self, side: usize) -> Option<[f32; 2]> {
        self.borders
            .and_then(|b| b.get(side).copied())
            .filter(|range| range[0] != f32::MAX)
    }

    pub fn centroid(&self) -> IVec2 {
        if self.acc_count == 0 {
            return IVec2::ZERO;
        }
        IVec2::new(
            (self.acc.x.max(0) / self.acc_count) as i32,
            (self.acc.y.max(0) / self.acc_count) as i32,
        )
    }

    pub fn intersects_count(&self) -> usize {
        (0..4).filter(|&side| self.border(side).is_some()).count()
    }
}

/// Pack a centroid position and footprint span into two 16-bit words
///
/// # Arguments
/// * `centroid` - Centroid in tile units
/// * `span` - Footprint extent in tile units
/// * `tile_to_meter` - Meters per tile unit
///
/// # Returns
/// `(clamp(c, 1, EXTENT - 1) << 3) | min(7, round(span_m / 10))` per axis
pub fn encode_centroid(centroid: IVec2, span: IVec2, tile_to_meter: f64) -> [u16; 2] {
    let encode = |c: i32, s: i32| -> u16 {
        let span = ((s as f64 * tile_to_meter / 10.0).round() as i64).clamp(0, 7) as u16;
        ((c.clamp(1, EXTENT - 1) as u16) << 3) | span
    };
    [encode(centroid.x, span.x), encode(centroid.y, span.y)]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn walk(points: &[(i32, i32)]) -> (BorderCentroidData, PartData) {
        let mut border = BorderCentroidData::new(0);
        let mut part = PartData::default();
        let ring: Vec<IVec2> = points.iter().map(|&(x, y)| IVec2::new(x, y)).collect();
        border.start_ring(&mut part, ring[0]);
        for i in 1..ring.len() {
            border.append_edge(&mut part, ring[i], ring[i - 1]);
        }
        (border, part)
    }

    #[test]
    fn test_centroid_inside_tile() {
        let (border, part) = walk(&[(0, 0), (100, 0), (100, 100), (0, 100), (0, 0)]);
        // First point is counted again when the ring closes
        assert_eq!(border.acc_count, 4);
        assert_eq!(border.centroid(), IVec2::new(50, 50));
        assert_eq!(part.span(), IVec2::new(100, 100));
        assert!(border.borders.is_none());
        assert_eq!(border.intersects_count(), 0);
    }

    #[test]
    fn test_border_crossing_is_recorded() {
        let (border, _) = walk(&[(-50, 10), (50, 10), (50, 110), (-50, 110), (-50, 10)]);
        assert_eq!(border.intersects_count(), 1);
        assert_eq!(border.border(BORDER_LEFT), Some([10.0, 110.0]));
        assert_eq!(border.border(BORDER_RIGHT), None);
    }

    #[test]
    fn test_edge_on_border_is_recorded() {
        let (border, _) = walk(&[(0, 20), (0, 80), (40, 80), (40, 20), (0, 20)]);
        assert_eq!(border.border(BORDER_LEFT), Some([20.0, 80.0]));
    }

    #[test]
    fn test_encode_centroid() {
        let encoded = encode_centroid(IVec2::new(50, 0), IVec2::new(100, 5000), 1.0);
        assert_eq!(encoded[0], (50 << 3) | 7);
        // Clamped away from 0 so the value never reads as hidden/default
        assert_eq!(encoded[1], (1 << 3) | 7);
        let small = encode_centroid(IVec2::new(10, 10), IVec2::new(20, 0), 1.0);
        assert_eq!(small, [(10 << 3) | 2, 10 << 3]);
    }
}
