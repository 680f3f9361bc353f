use glam::Vec2;

fn project(tri: &[Vec2; 3], axis: Vec2) -> (f32, f32) {
    let mut min = f32::INFINITY;
    let mut max = f32::NEG_INFINITY;
    for p in tri {
        let d = p.dot(axis);
        min = min.min(d);
        max = max.max(d);
    }
    (min, max)
}

/// Separating axis test between two triangles
///
/// `padding` grows both triangles along every axis; a negative value shrinks them so
/// that triangles sharing an edge or touching within `-padding` units do not intersect.
pub fn triangles_intersect(a: &[Vec2; 3], b: &[Vec2; 3], padding: f32) -> bool {
    for tri in [a, b] {
        for i in 0..3 {
            let edge = tri[(i + 1) % 3] - tri[i];
            let axis = Vec2::new(-edge.y, edge.x).normalize_or_zero();
            if axis == Vec2::ZERO {
                continue;
            }
            let (min_a, max_a) = project(a, axis);
            let (min_b, max_b) = project(b, axis);
            let overlap = max_a.min(max_b) - min_a.max(min_b);
            if overlap <= -padding {
                return false;
            }
        }
    }
    true
}

/// Axis aligned bounds of a triangle
pub fn triangle_bounds(tri: &[Vec2; 3]) -> (Vec2, Vec2) {
    (tri[0].min(tri[1]).min(tri[2]), tri[0].max(tri[1]).max(tri[2]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tri(points: [(f32, f32); 3]) -> [Vec2; 3] {
        [
            Vec2::new(points[0].0, points[0].1),
            Vec2::new(points[1].0, points[1].1),
            Vec2::new(points[2].0, points[2].1),
        ]
    }

    #[test]
    fn test_overlapping_triangles() {
        let a = tri([(0.0, 0.0), (10.0, 0.0), (0.0, 10.0)]);
        let b = tri([(2.0, 2.0), (12.0, 2.0), (2.0, 12.0)]);
        assert!(triangles_intersect(&a, &b, 0.0));
    }

    #[test]
    fn test_disjoint_triangles() {
        let a = tri([(0.0, 0.0), (10.0, 0.0), (0.0, 10.0)]);
        let b = tri([(20.0, 20.0), (30.0, 20.0), (20.0, 30.0)]);
        assert!(!triangles_intersect(&a, &b, 0.0));
    }

    #[test]
    fn test_negative_padding_ignores_shared_edge() {
        let a = tri([(0.0, 0.0), (10.0, 0.0), (0.0, 10.0)]);
        let b = tri([(10.0, 0.0), (10.0, 10.0), (0.0, 10.0)]);
        assert!(!triangles_intersect(&a, &b, -1.0));
        // Positive padding bridges a small gap
        let c = tri([(10.5, 0.0), (20.0, 0.0), (10.5, 10.0)]);
        assert!(triangles_intersect(&a, &c, 1.0));
    }

    #[test]
    fn test_triangle_bounds() {
        let (min, max) = triangle_bounds(&tri([(3.0, -1.0), (0.0, 4.0), (5.0, 2.0)]));
        assert_eq!(min, Vec2::new(0.0, -1.0));
        assert_eq!(max, Vec2::new(5.0, 4.0));
    }
}
