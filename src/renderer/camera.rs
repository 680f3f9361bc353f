use crate::geometry::EXTENT;
use crate::symbol::projection::ViewParameters;
use crate::tile_id::OverscaledTileId;
use glam::{DMat4, DVec2, DVec3, DVec4, Mat4, Vec2};
use std::f64::consts::FRAC_PI_2;

/// Vertical field of view in radians
pub const DEFAULT_FOV: f64 = 0.6435011087932844;
/// Size of a zoom 0 world in screen pixels
pub const TILE_SIZE: f64 = 512.0;
pub const MAX_PITCH: f64 = std::f64::consts::PI / 3.0;

/// Map camera: where it looks, how close and from which angle
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Camera {
    /// Map center in mercator units, both axes in [0, 1]
    pub center: DVec2,
    pub zoom: f64,
    /// Radians clockwise from north
    pub bearing: f64,
    /// Radians away from straight down
    pub pitch: f64,
    pub width: f64,
    pub height: f64,
}

impl Camera {
    /// Create a new camera looking at the whole world
    pub fn new(width: f64, height: f64) -> Camera {
        Camera {
            center: DVec2::splat(0.5),
            zoom: 0.0,
            bearing: 0.0,
            pitch: 0.0,
            width,
            height,
        }
    }

    pub fn world_size(&self) -> f64 {
        TILE_SIZE * 2f64.powf(self.zoom)
    }

    /// Integer zoom of the tiles drawn at this camera zoom
    pub fn tile_zoom(&self) -> u8 {
        self.zoom.max(0.0).floor() as u8
    }

    /// Map rotation, the negated bearing
    pub fn angle(&self) -> f64 {
        -self.bearing
    }

    fn clamped_pitch(&self) -> f64 {
        self.pitch.clamp(0.0, MAX_PITCH)
    }

    pub fn camera_to_center_distance(&self) -> f64 {
        0.5 / (DEFAULT_FOV / 2.0).tan() * self.height
    }

    /// World pixels to clip space
    pub fn proj_matrix(&self) -> DMat4 {
        let pitch = self.clamped_pitch();
        let ccd = self.camera_to_center_distance();
        let half_fov = DEFAULT_FOV / 2.0;
        let ground_angle = FRAC_PI_2 + pitch;
        let top_half_surface_distance =
            half_fov.sin() * ccd / (std::f64::consts::PI - ground_angle - half_fov).max(0.01).sin();
        let furthest_distance = (FRAC_PI_2 - pitch).cos() * top_half_surface_distance + ccd;
        let far_z = furthest_distance * 1.01;
        let near_z = self.height / 50.0;

        let center = self.center * self.world_size();
        DMat4::perspective_rh_gl(DEFAULT_FOV, self.width / self.height, near_z, far_z)
            * DMat4::from_scale(DVec3::new(1.0, -1.0, 1.0))
            * DMat4::from_translation(DVec3::new(0.0, 0.0, -ccd))
            * DMat4::from_rotation_x(pitch)
            * DMat4::from_rotation_z(self.angle())
            * DMat4::from_translation(DVec3::new(-center.x, -center.y, 0.0))
    }

    /// World pixels to screen pixels, y down
    pub fn pixel_matrix(&self) -> DMat4 {
        DMat4::from_scale(DVec3::new(self.width / 2.0, -self.height / 2.0, 1.0))
            * DMat4::from_translation(DVec3::new(1.0, -1.0, 0.0))
            * self.proj_matrix()
    }

    /// Tile units of `id` to clip space
    pub fn calculate_pos_matrix(&self, id: &OverscaledTileId) -> Mat4 {
        let canonical = id.canonical;
        let scale = self.world_size() / canonical.tiles();
        let unwrapped_x = canonical.x as f64 + canonical.tiles() * id.wrap as f64;
        let m = self.proj_matrix()
            * DMat4::from_translation(DVec3::new(unwrapped_x * scale, canonical.y as f64 * scale, 0.0))
            * DMat4::from_scale(DVec3::new(scale / EXTENT as f64, scale / EXTENT as f64, 1.0));
        m.as_mat4()
    }

    /// Mercator coordinate of the ground under a screen point
    pub fn point_coordinate(&self, point: DVec2) -> DVec2 {
        let inverse = self.pixel_matrix().inverse();
        let unproject = |z: f64| {
            let v = inverse * DVec4::new(point.x, point.y, z, 1.0);
            v.truncate() / v.w
        };
        let near = unproject(0.0);
        let far = unproject(1.0);
        let t = if far.z == near.z {
            0.0
        } else {
            -near.z / (far.z - near.z)
        };
        let ground = near.lerp(far, t);
        DVec2::new(ground.x, ground.y) / self.world_size()
    }

    /// Screen row of the horizon; negative when the horizon is above the viewport
    pub fn horizon_line_from_top(&self) -> f64 {
        let pitch = self.clamped_pitch();
        if pitch <= 0.0 {
            return f64::NEG_INFINITY;
        }
        self.height / 2.0 - self.camera_to_center_distance() * (FRAC_PI_2 - pitch).tan()
    }

    /// Mercator coordinate of the ground point below the camera
    pub fn camera_point(&self) -> DVec2 {
        let offset = self.clamped_pitch().tan() * self.camera_to_center_distance();
        self.point_coordinate(DVec2::new(self.width / 2.0, self.height / 2.0 + offset))
    }

    /// Ideal tiles covering the viewport, closest to the center first
    ///
    /// # Arguments
    /// * `tile_size` - Source tile size in pixels
    /// * `min_zoom` - No tiles are returned below this zoom
    /// * `max_zoom` - Deeper zooms are covered by overscaled tiles of this zoom
    /// * `reparse_overscaled` - Overscaled ids keep the view's zoom
    pub fn covering_tiles(
        &self,
        tile_size: u32,
        min_zoom: u8,
        max_zoom: u8,
        reparse_overscaled: bool,
    ) -> Vec<OverscaledTileId> {
        let covering_zoom = (self.zoom + (TILE_SIZE / tile_size as f64).log2()).floor().max(0.0);
        if covering_zoom < min_zoom as f64 {
            return Vec::new();
        }
        let actual_z = covering_zoom as u8;
        let z = actual_z.min(max_zoom);
        let overscaled_z = if reparse_overscaled { actual_z } else { z };

        let top = self.horizon_line_from_top().max(0.0).min(self.height);
        let corners = [
            DVec2::new(0.0, top),
            DVec2::new(self.width, top),
            DVec2::new(self.width, self.height),
            DVec2::new(0.0, self.height),
        ]
        .map(|p| self.point_coordinate(p));
        let min = corners.iter().fold(DVec2::splat(f64::INFINITY), |acc, c| acc.min(*c));
        let max = corners.iter().fold(DVec2::splat(f64::NEG_INFINITY), |acc, c| acc.max(*c));

        let n = 1i64 << z;
        let x0 = (min.x * n as f64).floor() as i64;
        let x1 = (max.x * n as f64).floor() as i64;
        let y0 = ((min.y * n as f64).floor() as i64).clamp(0, n - 1);
        let y1 = ((max.y * n as f64).floor() as i64).clamp(0, n - 1);

        let center = self.center * n as f64;
        let mut tiles = Vec::new();
        for x in x0..=x1 {
            for y in y0..=y1 {
                let wrap = x.div_euclid(n) as i32;
                let id = OverscaledTileId::new(overscaled_z, wrap, z, x.rem_euclid(n) as u32, y as u32);
                let d = DVec2::new(x as f64 + 0.5, y as f64 + 0.5).distance_squared(center);
                tiles.push((d, id));
            }
        }
        tiles.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        tiles.into_iter().map(|(_, id)| id).collect()
    }

    /// Distance from the camera to the center of a tile, in the units of
    /// `camera_to_center_distance`
    pub fn camera_to_tile_distance(&self, id: &OverscaledTileId) -> f64 {
        let half = EXTENT as f32 / 2.0;
        let p = self.calculate_pos_matrix(id) * glam::Vec4::new(half, half, 0.0, 1.0);
        p.w as f64
    }

    /// Projection inputs of the symbols of one tile
    pub fn view_parameters(&self, id: &OverscaledTileId) -> ViewParameters {
        let zoom_diff = self.zoom - id.overscaled_z as f64;
        ViewParameters {
            pos_matrix: self.calculate_pos_matrix(id),
            angle: self.angle() as f32,
            viewport: Vec2::new(self.width as f32, self.height as f32),
            camera_to_center_distance: self.camera_to_center_distance() as f32,
            pixels_to_tile_units: (EXTENT as f64 / (TILE_SIZE * 2f64.powf(zoom_diff))) as f32,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec4;

    fn camera(zoom: f64) -> Camera {
        Camera {
            zoom,
            ..Camera::new(1000.0, 1000.0)
        }
    }

    #[test]
    fn test_center_projects_to_screen_center() {
        let cam = camera(0.0);
        let m = cam.calculate_pos_matrix(&OverscaledTileId::new(0, 0, 0, 0, 0));
        let p = m * Vec4::new(2048.0, 2048.0, 0.0, 1.0);
        assert!((p.x / p.w).abs() < 1e-5);
        assert!((p.y / p.w).abs() < 1e-5);
        assert!((p.w as f64 - cam.camera_to_center_distance()).abs() < 1e-3);
    }

    #[test]
    fn test_one_world_pixel_is_one_screen_pixel() {
        let cam = camera(1.0);
        let m = cam.pixel_matrix();
        let center = cam.center * cam.world_size();
        let p = m * DVec4::new(center.x + 100.0, center.y + 50.0, 0.0, 1.0);
        assert!((p.x / p.w - 600.0).abs() < 1e-6);
        assert!((p.y / p.w - 550.0).abs() < 1e-6);
    }

    #[test]
    fn test_point_coordinate_inverts_pixel_matrix() {
        let cam = Camera {
            pitch: 0.5,
            bearing: 0.3,
            ..camera(3.0)
        };
        let c = cam.point_coordinate(DVec2::new(500.0, 500.0));
        assert!((c - cam.center).length() < 1e-9);
        let flat = camera(3.0);
        assert!((flat.camera_point() - flat.center).length() < 1e-9);
        // Pitched camera stands south of the center
        assert!(cam.camera_point().distance(cam.center) > 1e-4);
    }

    #[test]
    fn test_covering_tiles_whole_world() {
        let cam = camera(1.0);
        let tiles = cam.covering_tiles(512, 0, 22, true);
        assert_eq!(tiles.len(), 4);
        assert!(tiles.iter().all(|t| t.canonical.z == 1 && t.wrap == 0));
    }

    #[test]
    fn test_covering_tiles_overscaled() {
        let cam = Camera {
            center: DVec2::new(0.3, 0.4),
            ..camera(16.2)
        };
        let tiles = cam.covering_tiles(512, 0, 14, true);
        assert!(!tiles.is_empty());
        assert!(tiles.iter().all(|t| t.canonical.z == 14 && t.overscaled_z == 16));
        // Closest to the center first
        let n = (1u32 << 14) as f64;
        assert_eq!(tiles[0].canonical.x, (0.3 * n) as u32);
        assert!(cam.covering_tiles(512, 17, 22, true).is_empty());
    }

    #[test]
    fn test_view_parameters() {
        let cam = Camera {
            bearing: 0.25,
            ..camera(5.0)
        };
        let view = cam.view_parameters(&OverscaledTileId::new(5, 0, 5, 10, 10));
        assert_eq!(view.pixels_to_tile_units, 8.0);
        assert_eq!(view.angle, -0.25);
        assert_eq!(view.viewport, Vec2::new(1000.0, 1000.0));
    }
}
