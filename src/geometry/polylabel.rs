use glam::{IVec2, Vec2};
use std::cmp::Ordering;
use std::collections::BinaryHeap;

struct Cell {
    center: Vec2,
    half: f32,
    /// Distance from cell center to polygon (negative when outside)
    distance: f32,
    /// Upper bound of distance achievable inside this cell
    max: f32,
}

impl Cell {
    fn new(center: Vec2, half: f32, polygon: &[Vec<IVec2>]) -> Cell {
        let distance = point_to_polygon_distance(center, polygon);
        Cell {
            center,
            half,
            distance,
            max: distance + half * std::f32::consts::SQRT_2,
        }
    }
}

impl PartialEq for Cell {
    fn eq(&self, other: &Self) -> bool {
        self.max == other.max
    }
}

impl Eq for Cell {}

impl PartialOrd for Cell {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Cell {
    fn cmp(&self, other: &Self) -> Ordering {
        self.max.total_cmp(&other.max)
    }
}

fn segment_dist_sq(p: Vec2, a: Vec2, b: Vec2) -> f32 {
    let mut x = a.x;
    let mut y = a.y;
    let mut dx = b.x - x;
    let mut dy = b.y - y;

    if dx != 0.0 || dy != 0.0 {
        let t = ((p.x - x) * dx + (p.y - y) * dy) / (dx * dx + dy * dy);
        if t > 1.0 {
            x = b.x;
            y = b.y;
        } else if t > 0.0 {
            x += dx * t;
            y += dy * t;
        }
    }

    dx = p.x - x;
    dy = p.y - y;
    dx * dx + dy * dy
}

/// Signed distance from point to polygon outline (positive inside)
fn point_to_polygon_distance(p: Vec2, polygon: &[Vec<IVec2>]) -> f32 {
    let mut inside = false;
    let mut min_dist_sq = f32::INFINITY;

    for ring in polygon {
        let len = ring.len();
        if len == 0 {
            continue;
        }
        let mut j = len - 1;
        for i in 0..len {
            let a = ring[i].as_vec2();
            let b = ring[j].as_vec2();
            if (a.y > p.y) != (b.y > p.y) && p.x < (b.x - a.x) * (p.y - a.y) / (b.y - a.y) + a.x {
                inside = !inside;
            }
            min_dist_sq = min_dist_sq.min(segment_dist_sq(p, a, b));
            j = i;
        }
    }

    let d = min_dist_sq.sqrt();
    if inside {
        d
    } else {
        -d
    }
}

fn centroid_cell(polygon: &[Vec<IVec2>]) -> Cell {
    let ring = &polygon[0];
    let mut area = 0.0;
    let mut c = Vec2::ZERO;
    let len = ring.len();
    let mut j = len - 1;
    for i in 0..len {
        let a = ring[i].as_vec2();
        let b = ring[j].as_vec2();
        let f = a.x * b.y - b.x * a.y;
        c += (a + b) * f;
        area += f * 3.0;
        j = i;
    }
    let center = if area == 0.0 { ring[0].as_vec2() } else { c / area };
    Cell::new(center, 0.0, polygon)
}

/// Pole of inaccessibility: the interior point farthest from the polygon outline
///
/// # Arguments
/// * `polygon` - Outer ring followed by holes
/// * `precision` - Stop refining once cells cannot improve the result by more than this
pub fn polylabel(polygon: &[Vec<IVec2>], precision: f32) -> Vec2 {
    let Some(outer) = polygon.first().filter(|r| !r.is_empty()) else {
        return Vec2::ZERO;
    };

    let mut min = outer[0];
    let mut max = outer[0];
    for p in outer {
        min = min.min(*p);
        max = max.max(*p);
    }
    let min = min.as_vec2();
    let size = (max.as_vec2() - min).min_element();
    if size == 0.0 {
        return min;
    }

    let mut half = size / 2.0;
    let width = (max.x as f32) - min.x;
    let height = (max.y as f32) - min.y;

    let mut queue = BinaryHeap::new();
    let mut x = min.x;
    while x < min.x + width {
        let mut y = min.y;
        while y < min.y + height {
            queue.push(Cell::new(Vec2::new(x + half, y + half), half, polygon));
            y += size;
        }
        x += size;
    }

    let mut best = centroid_cell(polygon);
    let bbox_cell = Cell::new(min + Vec2::new(width, height) / 2.0, 0.0, polygon);
    if bbox_cell.distance > best.distance {
        best = bbox_cell;
    }

    while let Some(cell) = queue.pop() {
        if cell.distance > best.distance {
            best = Cell::new(cell.center, 0.0, polygon);
        }
        if cell.max - best.distance <= precision {
            continue;
        }

        half = cell.half / 2.0;
        for offset in [
            Vec2::new(-half, -half),
            Vec2::new(half, -half),
            Vec2::new(-half, half),
            Vec2::new(half, half),
        ] {
            queue.push(Cell::new(cell.center + offset, half, polygon));
        }
    }

    best.center
}
