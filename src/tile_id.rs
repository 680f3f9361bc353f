use crate::geometry::EXTENT;
use serde::Deserialize;
use std::f64::consts::PI;
use std::fmt;

/// Tile address in the canonical z/x/y scheme
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize)]
pub struct CanonicalTileId {
    pub z: u8,
    pub x: u32,
    pub y: u32,
}

impl CanonicalTileId {
    pub fn new(z: u8, x: u32, y: u32) -> CanonicalTileId {
        CanonicalTileId { z, x, y }
    }

    /// Ancestor (or self) at zoom `z`; `z` must not exceed the tile's zoom
    pub fn scaled_to(&self, z: u8) -> CanonicalTileId {
        let dz = self.z.saturating_sub(z);
        CanonicalTileId {
            z: self.z.min(z),
            x: self.x >> dz,
            y: self.y >> dz,
        }
    }

    pub fn parent(&self) -> Option<CanonicalTileId> {
        if self.z == 0 {
            None
        } else {
            Some(self.scaled_to(self.z - 1))
        }
    }

    pub fn is_child_of(&self, parent: &CanonicalTileId) -> bool {
        parent.z < self.z && self.scaled_to(parent.z) == *parent
    }

    /// Number of tiles per axis at this zoom
    pub fn tiles(&self) -> f64 {
        (1u64 << self.z) as f64
    }
}

impl fmt::Display for CanonicalTileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.z, self.x, self.y)
    }
}

/// Tile address that may be rendered beyond the source's max zoom, and may sit on
/// a wrapped copy of the world
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize)]
pub struct OverscaledTileId {
    pub overscaled_z: u8,
    pub wrap: i32,
    pub canonical: CanonicalTileId,
}

impl OverscaledTileId {
    pub fn new(overscaled_z: u8, wrap: i32, z: u8, x: u32, y: u32) -> OverscaledTileId {
        OverscaledTileId {
            overscaled_z,
            wrap,
            canonical: CanonicalTileId::new(z, x, y),
        }
    }

    pub fn from_canonical(canonical: CanonicalTileId) -> OverscaledTileId {
        OverscaledTileId {
            overscaled_z: canonical.z,
            wrap: 0,
            canonical,
        }
    }

    pub fn overscale_factor(&self) -> f64 {
        (1u64 << (self.overscaled_z - self.canonical.z)) as f64
    }

    pub fn scaled_to(&self, target_z: u8) -> OverscaledTileId {
        if target_z <= self.canonical.z {
            OverscaledTileId {
                overscaled_z: target_z,
                wrap: self.wrap,
                canonical: self.canonical.scaled_to(target_z),
            }
        } else {
            OverscaledTileId {
                overscaled_z: target_z,
                wrap: self.wrap,
                canonical: self.canonical,
            }
        }
    }

    pub fn parent(&self) -> Option<OverscaledTileId> {
        if self.overscaled_z > self.canonical.z {
            return Some(OverscaledTileId {
                overscaled_z: self.overscaled_z - 1,
                wrap: self.wrap,
                canonical: self.canonical,
            });
        }
        self.canonical.parent().map(|canonical| OverscaledTileId {
            overscaled_z: canonical.z,
            wrap: self.wrap,
            canonical,
        })
    }

    pub fn is_child_of(&self, parent: &OverscaledTileId) -> bool {
        if parent.wrap != self.wrap {
            return false;
        }
        let dz = self.canonical.z.saturating_sub(parent.canonical.z);
        parent.overscaled_z == 0
            || (parent.overscaled_z < self.overscaled_z
                && parent.canonical.x == self.canonical.x >> dz
                && parent.canonical.y == self.canonical.y >> dz)
    }

    /// Children one zoom level down; past the source max zoom the tile is overscaled instead
    pub fn children(&self, source_max_zoom: u8) -> Vec<OverscaledTileId> {
        if self.overscaled_z >= source_max_zoom {
            return vec![OverscaledTileId {
                overscaled_z: self.overscaled_z + 1,
                wrap: self.wrap,
                canonical: self.canonical,
            }];
        }
        let z = self.canonical.z + 1;
        let x = self.canonical.x * 2;
        let y = self.canonical.y * 2;
        vec![
            OverscaledTileId::new(z, self.wrap, z, x, y),
            OverscaledTileId::new(z, self.wrap, z, x + 1, y),
            OverscaledTileId::new(z, self.wrap, z, x, y + 1),
            OverscaledTileId::new(z, self.wrap, z, x + 1, y + 1),
        ]
    }
}

impl fmt::Display for OverscaledTileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}@{}", self.canonical, self.wrap, self.overscaled_z)
    }
}

pub fn lng_from_mercator_x(x: f64) -> f64 {
    x * 360.0 - 180.0
}

pub fn lat_from_mercator_y(y: f64) -> f64 {
    let y2 = 180.0 - y * 360.0;
    360.0 / PI * (y2 * PI / 180.0).exp().atan() - 90.0
}

pub fn mercator_x_from_lng(lng: f64) -> f64 {
    (180.0 + lng) / 360.0
}

pub fn mercator_y_from_lat(lat: f64) -> f64 {
    (180.0 - (180.0 / PI * (PI / 4.0 + lat * PI / 360.0).tan().ln())) / 360.0
}

/// Meters covered by one tile unit at the tile's latitude
pub fn tile_to_meter(canonical: &CanonicalTileId) -> f64 {
    const CIRCUMFERENCE_AT_EQUATOR: f64 = 40075017.0;
    let mercator_y = canonical.y as f64 / canonical.tiles();
    let exp = (PI * (1.0 - 2.0 * mercator_y)).exp();
    CIRCUMFERENCE_AT_EQUATOR * 2.0 * exp / (exp * exp + 1.0) / EXTENT as f64 / canonical.tiles()
}
