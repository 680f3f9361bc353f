use crate::geometry::EXTENT;
use crate::tile_id::{lat_from_mercator_y, lng_from_mercator_x, CanonicalTileId};
use glam::Vec3;
use serde::Deserialize;
use std::f64::consts::PI;

/// Globe radius in world units where one tile at z0 spans EXTENT units
pub const GLOBE_RADIUS: f64 = EXTENT as f64 / PI / 2.0;

/// Mean earth radius in meters
pub const EARTH_RADIUS: f64 = 6371008.8;

/// Map projection the tessellator targets
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Projection {
    #[default]
    Mercator,
    Globe,
}

impl Projection {
    pub fn is_globe(&self) -> bool {
        matches!(self, Projection::Globe)
    }

    /// Tile point to projected world position
    pub fn project_tile_point(&self, x: f32, y: f32, id: &CanonicalTileId) -> Vec3 {
        match self {
            Projection::Mercator => Vec3::new(x, y, 0.0),
            Projection::Globe => {
                let (lat, lng) = tile_point_to_lat_lng(x, y, id);
                let (sin_lat, cos_lat) = lat.sin_cos();
                let (sin_lng, cos_lng) = lng.sin_cos();
                Vec3::new(
                    (cos_lat * sin_lng * GLOBE_RADIUS) as f32,
                    (-sin_lat * GLOBE_RADIUS) as f32,
                    (cos_lat * cos_lng * GLOBE_RADIUS) as f32,
                )
            }
        }
    }

    /// Surface normal at a tile point
    pub fn up_vector(&self, id: &CanonicalTileId, x: f32, y: f32) -> Vec3 {
        match self {
            Projection::Mercator => Vec3::Z,
            Projection::Globe => self.project_tile_point(x, y, id).normalize_or_zero(),
        }
    }
}

/// Latitude and longitude in radians
fn tile_point_to_lat_lng(x: f32, y: f32, id: &CanonicalTileId) -> (f64, f64) {
    let tiles = id.tiles();
    let mx = (id.x as f64 + x as f64 / EXTENT as f64) / tiles;
    let my = (id.y as f64 + y as f64 / EXTENT as f64) / tiles;
    (
        lat_from_mercator_y(my).to_radians(),
        lng_from_mercator_x(mx).to_radians(),
    )
}

/// Minimum lift keeping zero-height extrusions above the subdivided globe surface
pub fn fill_extrusion_height_lift() -> f64 {
    let tan_angle = (PI / 32.0).tan();
    EARTH_RADIUS * (1.0 + 2.0 * tan_angle * tan_angle).sqrt() - EARTH_RADIUS
}
