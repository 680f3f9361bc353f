use super::{point_in_ring, signed_area, Polygon, Ring, EXTENT};
use glam::IVec2;

/// Result of ring classification
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ClassifiedRings {
    pub polygons: Vec<Polygon>,
    /// Set when some polygon had more rings than the cap and lost its smallest holes
    pub truncated: bool,
}

/// Group rings into polygons (outer ring + holes)
///
/// The winding of the first non-degenerate ring defines "outer"; rings of opposite winding
/// are holes. A hole is attached to the most recent outer ring that contains it, falling
/// back to the current polygon when no outer ring does. Zero-area rings are dropped.
///
/// # Arguments
/// * `rings` - Raw feature rings in tile coordinates
/// * `max_rings` - Per-polygon ring cap (0 or 1 disables the cap)
pub fn classify_rings(rings: &[Ring], max_rings: usize) -> ClassifiedRings {
    let mut polygons: Vec<Polygon> = Vec::new();
    let mut areas: Vec<Vec<f64>> = Vec::new();
    let mut ccw: Option<bool> = None;

    for ring in rings {
        let area = signed_area(ring);
        if area == 0.0 {
            continue;
        }
        let is_ccw = area < 0.0;
        let ccw_ref = *ccw.get_or_insert(is_ccw);

        if ccw_ref == is_ccw {
            polygons.push(vec![ring.clone()]);
            areas.push(vec![area.abs()]);
            continue;
        }

        // Hole: find its owner among outer rings, newest first
        let owner = polygons
            .iter()
            .rposition(|polygon| {
                ring.iter()
                    .any(|p| point_in_ring(p.as_vec2(), &polygon[0]))
            })
            .unwrap_or(polygons.len() - 1);
        polygons[owner].push(ring.clone());
        areas[owner].push(area.abs());
    }

    let mut truncated = false;
    if max_rings > 1 {
        for (polygon, ring_areas) in polygons.iter_mut().zip(areas.iter()) {
            if polygon.len() <= max_rings {
                continue;
            }
            truncated = true;

            // Keep the outer ring and the largest holes, preserving their order
            let mut holes: Vec<usize> = (1..polygon.len()).collect();
            holes.sort_by(|&a, &b| ring_areas[b].total_cmp(&ring_areas[a]));
            let mut keep = vec![false; polygon.len()];
            keep[0] = true;
            for &h in holes.iter().take(max_rings - 1) {
                keep[h] = true;
            }
            let mut idx = 0;
            polygon.retain(|_| {
                let k = keep[idx];
                idx += 1;
                k
            });
        }
    }

    ClassifiedRings { polygons, truncated }
}

/// True when every point of the ring lies on or beyond the same tile edge
///
/// Such rings are also defined by the neighbouring tile and would render twice.
pub fn is_entirely_outside(ring: &[IVec2]) -> bool {
    ring.iter().all(|p| p.x <= 0)
        || ring.iter().all(|p| p.x >= EXTENT)
        || ring.iter().all(|p| p.y <= 0)
        || ring.iter().all(|p| p.y >= EXTENT)
}

/// Drop empty polygons and polygons whose outer ring is entirely outside the tile
pub fn retain_inside_tile(polygons: &mut Vec<Polygon>) {
    polygons.retain(|polygon| !polygon.is_empty() && !is_entirely_outside(&polygon[0]));
}
