pub mod buffer;
pub mod camera;
pub mod context;
pub mod webgl;

use crate::bucket::centroid::{BORDER_BOTTOM, BORDER_LEFT, BORDER_RIGHT, BORDER_TOP};
use crate::bucket::replacement::{Footprint, FootprintSource};
use crate::config::{StyleLayer, TerrainOptions};
use crate::error::{Error, Result};
use crate::symbol::collision_index::CollisionIndex;
use crate::terrain::{DrapePainter, SourceCaches, Terrain};
use crate::tile::{neighbor_id, Tile};
use crate::tile_id::OverscaledTileId;
use camera::Camera;
use context::RenderContext;
use std::collections::{BTreeMap, HashMap};

/// Tile, placement and terrain state behind one GPU context
///
/// Owns the uploaded buckets of every loaded tile. Placement and projection are re-run
/// on demand from the camera; draw calls are left to the host.
pub struct Renderer<C: RenderContext> {
    ctx: C,
    pub camera: Camera,
    tiles: BTreeMap<OverscaledTileId, Tile<C>>,
    footprints: FootprintSource,
    terrain: Option<Terrain<C>>,
}

impl<C: RenderContext> Renderer<C> {
    /// Create a renderer with no tiles and a camera covering the viewport
    pub fn new(ctx: C, width: f64, height: f64) -> Renderer<C> {
        Renderer {
            ctx,
            camera: Camera::new(width, height),
            tiles: BTreeMap::new(),
            footprints: FootprintSource::new(),
            terrain: None,
        }
    }

    pub fn context(&self) -> &C {
        &self.ctx
    }

    /// Add a parsed tile, replacing any tile with the same id
    ///
    /// Buildings cut by the tile borders are joined with loaded neighbors before upload.
    pub fn add_tile(&mut self, mut tile: Tile<C>) -> Result<()> {
        let id = tile.id;
        if let Some(mut old) = self.tiles.remove(&id) {
            log::debug!("Replacing tile {}", id);
            old.destroy(&self.ctx);
        }
        if !self.footprints.is_empty() {
            tile.update_replacement(&self.footprints);
        }
        self.stitch_borders(&mut tile)?;
        tile.upload(&self.ctx)?;
        self.tiles.insert(id, tile);
        Ok(())
    }

    fn stitch_borders(&mut self, tile: &mut Tile<C>) -> Result<()> {
        for side in [BORDER_LEFT, BORDER_RIGHT, BORDER_TOP, BORDER_BOTTOM] {
            let neighbor = neighbor_id(&tile.id, side).and_then(|id| self.tiles.get_mut(&id));
            match neighbor {
                Some(neighbor) => {
                    tile.stitch_border(side, Some(&mut *neighbor));
                    neighbor.upload(&self.ctx)?;
                }
                None => tile.stitch_border(side, None),
            }
        }
        Ok(())
    }

    /// Remove a tile and release its GPU buffers
    pub fn remove_tile(&mut self, id: &OverscaledTileId) -> Result<()> {
        let mut tile = self
            .tiles
            .remove(id)
            .ok_or_else(|| Error::TileNotFound(id.to_string()))?;
        tile.destroy(&self.ctx);
        Ok(())
    }

    pub fn tile(&self, id: &OverscaledTileId) -> Option<&Tile<C>> {
        self.tiles.get(id)
    }

    pub fn tile_ids(&self) -> Vec<OverscaledTileId> {
        self.tiles.keys().copied().collect()
    }

    pub fn tile_count(&self) -> usize {
        self.tiles.len()
    }

    /// Remove every tile and landmark and release all GPU resources
    pub fn clear_all(&mut self) {
        for tile in self.tiles.values_mut() {
            tile.destroy(&self.ctx);
        }
        self.tiles.clear();
        self.footprints = FootprintSource::new();
        if let Some(terrain) = &mut self.terrain {
            terrain.destroy(&self.ctx);
        }
        self.terrain = None;
    }

    /// Register a landmark footprint and hide the buildings it replaces
    pub fn add_footprint(&mut self, tile_id: OverscaledTileId, footprint: Footprint) -> Result<()> {
        self.footprints.add_footprint(tile_id, footprint);
        self.refresh_replacements()
    }

    /// Drop the landmark footprints of a tile, revealing the buildings they hid
    pub fn remove_footprints(&mut self, tile_id: &OverscaledTileId) -> Result<()> {
        self.footprints.remove_tile(tile_id);
        self.refresh_replacements()
    }

    fn refresh_replacements(&mut self) -> Result<()> {
        for tile in self.tiles.values_mut() {
            tile.update_replacement(&self.footprints);
        }
        // Replacement resets border state; join split buildings again
        for id in self.tile_ids() {
            if let Some(mut tile) = self.tiles.remove(&id) {
                let stitched = self.stitch_borders(&mut tile);
                let uploaded = tile.upload(&self.ctx);
                self.tiles.insert(id, tile);
                stitched?;
                uploaded?;
            }
        }
        Ok(())
    }

    /// Resolve label collisions of every tile for the current camera
    ///
    /// Each tile is placed against its own collision index. Returns the number of
    /// shown symbol instances.
    pub fn place_symbols(&mut self) -> Result<usize> {
        let camera = self.camera;
        let ccd = camera.camera_to_center_distance() as f32;
        let mut shown = 0;
        for (id, tile) in self.tiles.iter_mut() {
            let mut index = CollisionIndex::new(
                camera.angle() as f32,
                camera.pitch as f32,
                ccd,
                camera.camera_to_tile_distance(id) as f32,
            );
            let scale = 2f64.powf(camera.zoom - id.overscaled_z as f64) as f32;
            shown += tile.place_symbols(&mut index, scale);
            tile.upload(&self.ctx)?;
        }
        Ok(shown)
    }

    /// Reproject line labels of every tile for the current camera
    pub fn update_projection(&mut self) -> Result<()> {
        for (id, tile) in self.tiles.iter_mut() {
            tile.update_projection(&self.camera.view_parameters(id));
            tile.upload(&self.ctx)?;
        }
        Ok(())
    }

    pub fn resize(&mut self, width: f64, height: f64) {
        self.camera.width = width;
        self.camera.height = height;
    }

    pub fn terrain(&self) -> Option<&Terrain<C>> {
        self.terrain.as_ref()
    }

    /// Create the terrain controller; it stays disabled until a valid source is set
    pub fn enable_terrain(&mut self, max_zoom: u8) -> Result<()> {
        if self.terrain.is_none() {
            self.terrain = Some(Terrain::new(&self.ctx, max_zoom)?);
        }
        Ok(())
    }

    pub fn disable_terrain(&mut self) {
        if let Some(mut terrain) = self.terrain.take() {
            terrain.destroy(&self.ctx);
        }
    }

    /// Move the proxy cover to the camera and bind source tiles to it
    ///
    /// # Arguments
    /// * `sources_coords` - Visible tile ids per source id
    /// * `transitioning` - Some draped layer is mid-transition
    pub fn update_terrain(
        &mut self,
        options: &TerrainOptions,
        sources: &mut SourceCaches,
        sources_coords: &HashMap<String, Vec<OverscaledTileId>>,
        transitioning: bool,
    ) -> Result<()> {
        let Some(terrain) = &mut self.terrain else {
            return Ok(());
        };
        let proxy = terrain.proxy_cache();
        let cover = self
            .camera
            .covering_tiles(proxy.tile_size, 0, proxy.max_zoom, true);
        terrain.update(&self.ctx, options, sources, &cover)?;
        terrain.update_tile_binding(&self.ctx, &self.camera, sources, sources_coords, transitioning)
    }

    /// Drape the run of layers starting at `start`, returning the next layer to draw
    pub fn render_terrain<P: DrapePainter<C>>(&mut self, painter: &mut P, layers: &[&dyn StyleLayer], start: usize) -> usize {
        let screen = [self.camera.width as i32, self.camera.height as i32];
        match &mut self.terrain {
            Some(terrain) => terrain.render(&self.ctx, painter, layers, start, self.camera.zoom as f32, screen),
            None => start,
        }
    }
}
