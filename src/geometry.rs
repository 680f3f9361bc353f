pub mod classify;
pub mod clip;
pub mod intersect;
pub mod polylabel;

use glam::{IVec2, Vec2};
use i_overlay::core::fill_rule::FillRule;
use i_overlay::core::overlay_rule::OverlayRule;
use i_overlay::float::single::SingleFloatOverlay;
use i_triangle::float::triangulatable::Triangulatable;

/// Tile coordinate extent shared by every bucket
pub const EXTENT: i32 = 4096;

/// Closed or open sequence of tile-space points
pub type Ring = Vec<IVec2>;

/// Outer ring followed by its holes
pub type Polygon = Vec<Ring>;

/// Polygon clipped against a region, together with the region bounds
#[derive(Clone, Debug, PartialEq)]
pub struct ClippedPolygon {
    pub polygon: Polygon,
    pub bounds: [IVec2; 2],
}

/// Signed ring area in tile orientation (y down); the sign encodes winding
pub fn signed_area(ring: &[IVec2]) -> f64 {
    let mut sum = 0.0;
    let len = ring.len();
    if len == 0 {
        return sum;
    }
    let mut j = len - 1;
    for i in 0..len {
        let p1 = ring[i];
        let p2 = ring[j];
        sum += (p2.x as f64 - p1.x as f64) * (p1.y as f64 + p2.y as f64);
        j = i;
    }
    sum * 0.5
}

/// Unit perpendicular of the edge `a -> b`, following the `(-y, x)` convention
#[inline]
pub fn perp_unit(a: Vec2, b: Vec2) -> Vec2 {
    let d = b - a;
    Vec2::new(-d.y, d.x).normalize_or_zero()
}

/// Rotate point around given center
#[inline]
pub fn rotate_point(point: Vec2, angle: f32, center: Vec2) -> Vec2 {
    let (sin_a, cos_a) = angle.sin_cos();
    let d = point - center;
    Vec2::new(
        center.x + d.x * cos_a - d.y * sin_a,
        center.y + d.x * sin_a + d.y * cos_a,
    )
}

/// Ray-casting containment test; points on the boundary count as outside
pub fn point_in_ring(p: Vec2, ring: &[IVec2]) -> bool {
    let mut inside = false;
    let len = ring.len();
    if len < 3 {
        return false;
    }
    let mut j = len - 1;
    for i in 0..len {
        let a = ring[i].as_vec2();
        let b = ring[j].as_vec2();
        if (a.y > p.y) != (b.y > p.y) && p.x < (b.x - a.x) * (p.y - a.y) / (b.y - a.y) + a.x {
            inside = !inside;
        }
        j = i;
    }
    inside
}

/// Triangulate a polygon given as outer contour plus holes using i_triangle
///
/// # Returns
/// Triangle list as `(points, indices)`; degenerate input yields empty lists
pub fn triangulate_contours(contours: &[Vec<[f32; 2]>]) -> (Vec<Vec2>, Vec<u32>) {
    if contours.is_empty() || contours[0].len() < 3 {
        return (Vec::new(), Vec::new());
    }

    let paths = contours.to_vec();
    let raw_triangulation = paths.triangulate();
    let tri_result = raw_triangulation.to_triangulation::<u32>();

    let points = tri_result
        .points
        .iter()
        .map(|p| Vec2::new(p[0], p[1]))
        .collect::<Vec<_>>();
    let indices = tri_result
        .indices
        .chunks_exact(3)
        .filter(|t| t.iter().all(|&i| (i as usize) < points.len()))
        .flatten()
        .copied()
        .collect();

    (points, indices)
}

/// Intersect a polygon with an axis aligned rectangle using i_overlay
///
/// Output rings have no repeated closing point. Outer rings keep the winding of the
/// input outer ring and holes get the opposite one.
pub fn clip_polygon_to_rect(polygon: &Polygon, min: Vec2, max: Vec2) -> Vec<Polygon> {
    let outer_sign = polygon
        .first()
        .map(|ring| signed_area(ring).signum())
        .unwrap_or(1.0);

    let subject: Vec<Vec<Vec<[f32; 2]>>> = vec![polygon
        .iter()
        .map(|ring| ring.iter().map(|p| [p.x as f32, p.y as f32]).collect())
        .collect()];
    let rect = vec![vec![vec![
        [min.x, min.y],
        [max.x, min.y],
        [max.x, max.y],
        [min.x, max.y],
    ]]];

    let shapes = subject.overlay(&rect, OverlayRule::Intersect, FillRule::EvenOdd);

    let mut result = Vec::with_capacity(shapes.len());
    for shape in shapes {
        let mut clipped: Polygon = Vec::with_capacity(shape.len());
        for (i, contour) in shape.iter().enumerate() {
            let mut ring: Ring = contour
                .iter()
                .map(|p| IVec2::new(p[0].round() as i32, p[1].round() as i32))
                .collect();
            ring.dedup();
            if ring.len() > 1 && ring.first() == ring.last() {
                ring.pop();
            }
            if ring.len() < 3 {
                continue;
            }
            let want = if i == 0 { outer_sign } else { -outer_sign };
            if signed_area(&ring).signum() != want {
                ring.reverse();
            }
            clipped.push(ring);
        }
        if !clipped.is_empty() {
            result.push(clipped);
        }
    }
    result
}

/// Split polygons into a grid of cells produced by alternating binary splits
///
/// The number of cells per axis is rounded up to a power of two. `split_fn(axis, min, max)`
/// chooses the split coordinate of each step (axis 0 = x, 1 = y). Each polygon is clipped
/// against every cell grown by `padding`; the reported bounds are the unpadded cell.
pub fn subdivide_polygons(
    polygons: &[Polygon],
    bounds: [IVec2; 2],
    grid_size_x: u32,
    grid_size_y: u32,
    padding: f32,
    split_fn: impl Fn(usize, f64, f64) -> f64,
) -> Vec<ClippedPolygon> {
    let mut out = Vec::new();
    if polygons.is_empty() || grid_size_x == 0 || grid_size_y == 0 {
        return out;
    }

    let h_splits = (grid_size_x as f64).log2().ceil() as i32;
    let v_splits = (grid_size_y as f64).log2().ceil() as i32;
    let initial = h_splits - v_splits;

    let mut splits = Vec::new();
    for _ in 0..initial.abs() {
        splits.push(if initial > 0 { 0 } else { 1 });
    }
    for _ in 0..h_splits.min(v_splits) {
        splits.push(0);
        splits.push(1);
    }

    let mut cells = vec![[bounds[0].as_dvec2(), bounds[1].as_dvec2()]];
    for axis in splits {
        let mut next = Vec::with_capacity(cells.len() * 2);
        for [min, max] in cells {
            let (lo, hi) = if axis == 0 { (min.x, max.x) } else { (min.y, max.y) };
            let s = split_fn(axis, lo, hi);
            let mut first_max = max;
            let mut second_min = min;
            if axis == 0 {
                first_max.x = s;
                second_min.x = s;
            } else {
                first_max.y = s;
                second_min.y = s;
            }
            next.push([min, first_max]);
            next.push([second_min, max]);
        }
        cells = next;
    }

    for [min, max] in cells {
        let cell_min = IVec2::new(min.x.round() as i32, min.y.round() as i32);
        let cell_max = IVec2::new(max.x.round() as i32, max.y.round() as i32);
        let pad_min = min.as_vec2() - Vec2::splat(padding);
        let pad_max = max.as_vec2() + Vec2::splat(padding);
        for polygon in polygons {
            for clipped in clip_polygon_to_rect(polygon, pad_min, pad_max) {
                out.push(ClippedPolygon {
                    polygon: clipped,
                    bounds: [cell_min, cell_max],
                });
            }
        }
    }
    out
}
