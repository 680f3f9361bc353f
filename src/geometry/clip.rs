use glam::{IVec2, Vec2};

fn lerp_point(p0: IVec2, p1: IVec2, t: f32) -> Vec2 {
    p0.as_vec2() + (p1 - p0).as_vec2() * t
}

/// Clip polylines to the box `[x1, x2] x [y1, y2]`
///
/// A line leaving and re-entering the box is split into separate lines.
pub fn clip_line(lines: &[Vec<IVec2>], x1: i32, y1: i32, x2: i32, y2: i32) -> Vec<Vec<IVec2>> {
    let mut clipped_lines: Vec<Vec<IVec2>> = Vec::new();

    for line in lines {
        let mut open = false;
        for w in line.windows(2) {
            let mut p0 = w[0];
            let mut p1 = w[1];

            if p0.x < x1 && p1.x < x1 {
                continue;
            } else if p0.x < x1 {
                let t = (x1 - p0.x) as f32 / (p1.x - p0.x) as f32;
                p0 = IVec2::new(x1, lerp_point(p0, p1, t).y.round() as i32);
            } else if p1.x < x1 {
                let t = (x1 - p0.x) as f32 / (p1.x - p0.x) as f32;
                p1 = IVec2::new(x1, lerp_point(p0, p1, t).y.round() as i32);
            }

            if p0.y < y1 && p1.y < y1 {
                continue;
            } else if p0.y < y1 {
                let t = (y1 - p0.y) as f32 / (p1.y - p0.y) as f32;
                p0 = IVec2::new(lerp_point(p0, p1, t).x.round() as i32, y1);
            } else if p1.y < y1 {
                let t = (y1 - p0.y) as f32 / (p1.y - p0.y) as f32;
                p1 = IVec2::new(lerp_point(p0, p1, t).x.round() as i32, y1);
            }

            if p0.x >= x2 && p1.x >= x2 {
                continue;
            } else if p0.x >= x2 {
                let t = (x2 - p0.x) as f32 / (p1.x - p0.x) as f32;
                p0 = IVec2::new(x2, lerp_point(p0, p1, t).y.round() as i32);
            } else if p1.x >= x2 {
                let t = (x2 - p0.x) as f32 / (p1.x - p0.x) as f32;
                p1 = IVec2::new(x2, lerp_point(p0, p1, t).y.round() as i32);
            }

            if p0.y >= y2 && p1.y >= y2 {
                continue;
            } else if p0.y >= y2 {
                let t = (y2 - p0.y) as f32 / (p1.y - p0.y) as f32;
                p0 = IVec2::new(lerp_point(p0, p1, t).x.round() as i32, y2);
            } else if p1.y >= y2 {
                let t = (y2 - p0.y) as f32 / (p1.y - p0.y) as f32;
                p1 = IVec2::new(lerp_point(p0, p1, t).x.round() as i32, y2);
            }

            let continues = open
                && clipped_lines
                    .last()
                    .and_then(|l| l.last())
                    .map_or(false, |last| *last == p0);
            if !continues {
                clipped_lines.push(vec![p0]);
                open = true;
            }
            if let Some(current) = clipped_lines.last_mut() {
                current.push(p1);
            }
        }
    }

    clipped_lines
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_inside_is_untouched() {
        let line = vec![IVec2::new(10, 10), IVec2::new(20, 10), IVec2::new(20, 30)];
        let clipped = clip_line(&[line.clone()], 0, 0, 100, 100);
        assert_eq!(clipped, vec![line]);
    }

    #[test]
    fn test_line_clipped_at_box_edges() {
        let line = vec![IVec2::new(-50, 50), IVec2::new(150, 50)];
        let clipped = clip_line(&[line], 0, 0, 100, 100);
        assert_eq!(clipped, vec![vec![IVec2::new(0, 50), IVec2::new(100, 50)]]);
    }

    #[test]
    fn test_line_leaving_box_is_split() {
        let line = vec![
            IVec2::new(10, 50),
            IVec2::new(200, 50),
            IVec2::new(200, 80),
            IVec2::new(10, 80),
        ];
        let clipped = clip_line(&[line], 0, 0, 100, 100);
        assert_eq!(clipped.len(), 2);
        assert_eq!(clipped[0], vec![IVec2::new(10, 50), IVec2::new(100, 50)]);
        assert_eq!(clipped[1], vec![IVec2::new(100, 80), IVec2::new(10, 80)]);
    }
}
