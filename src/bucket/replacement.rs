use crate::geometry::intersect::{triangle_bounds, triangles_intersect};
use crate::geometry::{triangulate_contours, EXTENT};
use crate::tile_id::{CanonicalTileId, OverscaledTileId};
use glam::Vec2;
use std::sync::Arc;

/// Triangulated ground footprint of a landmark model, in its own tile's units
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Footprint {
    pub vertices: Vec<Vec2>,
    pub indices: Vec<u32>,
    pub min: Vec2,
    pub max: Vec2,
}

impl Footprint {
    /// Triangulate an outline given as outer ring plus holes
    pub fn from_contours(contours: &[Vec<[f32; 2]>]) -> Footprint {
        let (vertices, indices) = triangulate_contours(contours);
        let min = vertices.iter().fold(Vec2::splat(f32::MAX), |m, v| m.min(*v));
        let max = vertices.iter().fold(Vec2::splat(f32::MIN), |m, v| m.max(*v));
        Footprint { vertices, indices, min, max }
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    fn triangles(&self) -> impl Iterator<Item = [Vec2; 3]> + '_ {
        self.indices.chunks_exact(3).map(move |t| {
            [
                self.vertices[t[0] as usize],
                self.vertices[t[1] as usize],
                self.vertices[t[2] as usize],
            ]
        })
    }
}

/// Footprint overlapping a tile
///
/// `min` and `max` are expressed in the units of the tile the region was requested for.
#[derive(Clone, Debug)]
pub struct ReplacementRegion {
    pub footprint_tile_id: OverscaledTileId,
    pub min: Vec2,
    pub max: Vec2,
    pub footprint: Arc<Footprint>,
}

impl PartialEq for ReplacementRegion {
    fn eq(&self, other: &Self) -> bool {
        self.footprint_tile_id == other.footprint_tile_id
            && self.min == other.min
            && self.max == other.max
            && Arc::ptr_eq(&self.footprint, &other.footprint)
    }
}

/// Provider of landmark footprints that hide overlapping extrusions
pub trait ReplacementSource {
    /// Changes whenever the set of footprints changes
    fn update_time(&self) -> u64;
    fn regions_for_tile(&self, id: &OverscaledTileId) -> Vec<ReplacementRegion>;
}

/// Map a point from tile `from` into tile `to` units
pub fn transform_point(p: Vec2, from: &CanonicalTileId, to: &CanonicalTileId) -> Vec2 {
    let scale = 2f64.powi(to.z as i32 - from.z as i32);
    let extent = EXTENT as f64;
    let x = (p.x as f64 + from.x as f64 * extent) * scale - to.x as f64 * extent;
    let y = (p.y as f64 + from.y as f64 * extent) * scale - to.y as f64 * extent;
    Vec2::new(x as f32, y as f32)
}

/// Whether any footprint triangle overlaps any of the given triangles
///
/// # Arguments
/// * `footprint` - Landmark footprint
/// * `vertices` - Extrusion footprint vertices already in the footprint's tile units
/// * `indices` - Triangles indexing into the footprint vertex array
/// * `vertex_offset` - Subtracted from every index to address `vertices`
/// * `padding` - Passed to the triangle test; negative shrinks
pub fn footprint_triangles_intersect(
    footprint: &Footprint,
    vertices: &[Vec2],
    indices: &[[u32; 3]],
    vertex_offset: usize,
    padding: f32,
) -> bool {
    for tri in indices {
        let Some(a) = [tri[0], tri[1], tri[2]]
            .iter()
            .map(|&i| (i as usize).checked_sub(vertex_offset).and_then(|i| vertices.get(i).copied()))
            .collect::<Option<Vec<_>>>()
        else {
            continue;
        };
        let a = [a[0], a[1], a[2]];
        let (a_min, a_max) = triangle_bounds(&a);
        if a_min.x > footprint.max.x || a_max.x < footprint.min.x || a_min.y > footprint.max.y || a_max.y < footprint.min.y {
            continue;
        }
        for b in footprint.triangles() {
            if triangles_intersect(&a, &b, padding) {
                return true;
            }
        }
    }
    false
}

/// In-memory replacement source fed with footprints per tile
#[derive(Default)]
pub struct FootprintSource {
    footprints: Vec<(OverscaledTileId, Arc<Footprint>)>,
    update_time: u64,
}

impl FootprintSource {
    pub fn new() -> FootprintSource {
        FootprintSource::default()
    }

    pub fn add_footprint(&mut self, tile_id: OverscaledTileId, footprint: Footprint) {
        if footprint.is_empty() {
            log::debug!("Ignoring empty footprint in tile {}", tile_id);
            return;
        }
        self.footprints.push((tile_id, Arc::new(footprint)));
        self.update_time += 1;
    }

    pub fn remove_tile(&mut self, tile_id: &OverscaledTileId) {
        let before = self.footprints.len();
        self.footprints.retain(|(id, _)| id != tile_id);
        if self.footprints.len() != before {
            self.update_time += 1;
        }
    }

    pub fn len(&self) -> usize {
        self.footprints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.footprints.is_empty()
    }
}

impl ReplacementSource for FootprintSource {
    fn update_time(&self) -> u64 {
        self.update_time
    }

    fn regions_for_tile(&self, id: &OverscaledTileId) -> Vec<ReplacementRegion> {
        let extent = EXTENT as f32;
        self.footprints
            .iter()
            .filter(|(fid, _)| fid.wrap == id.wrap)
            .filter_map(|(fid, footprint)| {
                let min = transform_point(footprint.min, &fid.canonical, &id.canonical);
                let max = transform_point(footprint.max, &fid.canonical, &id.canonical);
                if max.x < 0.0 || max.y < 0.0 || min.x > extent || min.y > extent {
                    return None;
                }
                Some(ReplacementRegion {
                    footprint_tile_id: *fid,
                    min,
                    max,
                    footprint: Arc::clone(footprint),
                })
            })
            .collect()
    }
}
