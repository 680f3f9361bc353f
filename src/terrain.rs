//! Terrain draping: proxy tile cover, render-to-texture scheduling and DEM binding
//!
//! Layers that cannot follow elevation themselves are rendered tile by tile into
//! offscreen targets of a camera-driven proxy tile cover. The targets are then draped
//! over the elevation mesh. Renders are cached across frames and only redone when the
//! source tiles that went into them change.

pub mod grid;
pub mod proxy;
pub mod source_cache;

use crate::bucket::array::Segment;
use crate::config::{StyleLayer, TerrainOptions};
use crate::error::{Error, Result};
use crate::renderer::buffer::Fbo;
use crate::renderer::camera::Camera;
use crate::renderer::context::{RenderContext, StencilMode};
use crate::tile_id::OverscaledTileId;
use glam::{DVec2, Mat4, Vec2};
use grid::create_grid;
use proxy::{FboSlot, ProxiedTileId, ProxySourceCache};
use source_cache::{find_tile_covering_tile_id, CoveringTileCache, SourceCache, SourceKind, TilePyramid};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Grid cells per tile side of the terrain mesh
pub const GRID_DIM: usize = 128;
/// Framebuffers shared by proxy tiles outside the render cache
pub const FBO_POOL_SIZE: usize = 5;
/// Framebuffers kept across frames
pub const RENDER_CACHE_MAX_SIZE: usize = 50;

/// Content sources by id
pub type SourceCaches = BTreeMap<String, SourceCache>;

/// Per proxy tile, the source tiles drawn into it by source id
pub type ProxyToSource = HashMap<OverscaledTileId, HashMap<String, Vec<ProxiedTileId>>>;

/// Uniforms placing a proxy tile on the DEM tile it samples
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DemUniforms {
    pub unpack: [f32; 4],
    /// Top left of the proxy tile inside the DEM tile, in DEM tile units
    pub tl: Vec2,
    pub scale: f32,
    pub dem_size: f32,
    pub exaggeration: f32,
}

/// Draws layer content into whatever target is bound
pub trait DrapePainter<C: RenderContext> {
    /// Draw each tile's area into the stencil buffer; `ctx` is already in `StencilMode::Write`
    /// and the painter sets the reference per tile
    fn render_clipping_masks(&mut self, ctx: &C, masks: &[(ProxiedTileId, u8)]);
    /// Draw one layer for the given tiles; returns whether anything was drawn
    fn render_layer(&mut self, ctx: &C, layer: &dyn StyleLayer, tiles: &[(ProxiedTileId, StencilMode)]) -> bool;
    /// Drape rendered proxy tile textures over the terrain mesh
    fn draw_terrain_raster(&mut self, ctx: &C, tiles: &[(OverscaledTileId, &C::Texture)]);
}

/// Sort tiles deepest zoom first, then by distance to the camera
pub fn sort_by_distance_to_camera(ids: &mut [OverscaledTileId], camera_point: DVec2) {
    let distance = |id: &OverscaledTileId| {
        let tiles = id.canonical.tiles();
        let camera = camera_point * tiles - DVec2::splat(0.5);
        let point = DVec2::new(id.canonical.x as f64 + tiles * id.wrap as f64, id.canonical.y as f64);
        camera.distance_squared(point)
    };
    ids.sort_by(|a, b| {
        b.overscaled_z
            .cmp(&a.overscaled_z)
            .then_with(|| distance(a).total_cmp(&distance(b)))
    });
}

/// Whether a proxy tile's contributing source tiles are the same as last frame
fn same_contributors(
    previous: &HashMap<String, Vec<ProxiedTileId>>,
    current: &HashMap<String, Vec<ProxiedTileId>>,
    dirty: &HashMap<String, HashSet<OverscaledTileId>>,
) -> bool {
    let mut equal = 0;
    for (source, tiles) in current {
        let Some(prev_tiles) = previous.get(source) else {
            return false;
        };
        let source_dirty = dirty.get(source);
        let changed = prev_tiles.len() != tiles.len()
            || tiles
                .iter()
                .zip(prev_tiles)
                .any(|(t, p)| t.id != p.id || source_dirty.is_some_and(|d| d.contains(&t.id)));
        if changed {
            return false;
        }
        equal += 1;
    }
    equal == previous.len()
}

/// Index of the last layer of the draped run starting at `start`
fn draped_range_end(layers: &[&dyn StyleLayer], start: usize, zoom: f32) -> usize {
    let mut end = start;
    for (i, layer) in layers.iter().enumerate().skip(start + 1) {
        if layer.is_hidden(zoom) {
            continue;
        }
        if !layer.layer_type().is_draped() {
            break;
        }
        end = i;
    }
    end
}

/// Stencil state for drawing the source tiles of one layer into a proxy tile
///
/// Tile-clipped layers write a reference per source tile and draw where it matches.
/// Other layers with tiles of different zooms draw the deepest tile first and keep
/// shallower ones out of already covered pixels.
fn setup_stencil<C: RenderContext, P: DrapePainter<C>>(
    ctx: &C,
    painter: &mut P,
    fbo: &mut Fbo<C>,
    coords: &[ProxiedTileId],
    layer: &dyn StyleLayer,
    overlap: bool,
) -> Vec<StencilMode> {
    let disabled = vec![StencilMode::Disabled; coords.len()];
    if !overlap || coords.len() <= 1 {
        return disabled;
    }
    let clip = layer.layer_type().is_tile_clipped();
    let range = if clip {
        coords.len() as u32
    } else if coords[0].id.overscaled_z > coords[coords.len() - 1].id.overscaled_z {
        1
    } else {
        return disabled;
    };
    if range >= u8::MAX as u32 {
        return disabled;
    }

    // Reference 0 is the cleared value, never handed out
    if fbo.stencil_ref == 0 || fbo.stencil_ref as u32 + range > u8::MAX as u32 {
        ctx.clear(None, Some(0));
        fbo.stencil_ref = 1;
    }
    fbo.stencil_ref += range as u8;
    let reference = fbo.stencil_ref;

    if clip {
        let masks: Vec<(ProxiedTileId, u8)> = coords
            .iter()
            .enumerate()
            .map(|(i, c)| (*c, reference - 1 - i as u8))
            .collect();
        ctx.set_stencil_mode(StencilMode::Write { reference });
        painter.render_clipping_masks(ctx, &masks);
        masks
            .iter()
            .map(|(_, r)| StencilMode::Equal { reference: *r })
            .collect()
    } else {
        vec![StencilMode::Greater { reference }; coords.len()]
    }
}

fn fbo_at<'a, C: RenderContext>(
    psc: &'a ProxySourceCache<C>,
    pool: &'a [Fbo<C>],
    slot: FboSlot,
) -> Option<&'a Fbo<C>> {
    match slot {
        FboSlot::Cache(i) => psc.render_cache.get(i),
        FboSlot::Pool(i) => pool.get(i),
    }
}

fn raster_tiles<'a, C: RenderContext>(
    psc: &'a ProxySourceCache<C>,
    pool: &'a [Fbo<C>],
    ids: &[OverscaledTileId],
) -> Vec<(OverscaledTileId, &'a C::Texture)> {
    ids.iter()
        .filter_map(|id| {
            let slot = psc.textures.get(id)?;
            fbo_at(psc, pool, *slot).map(|fbo| (*id, &fbo.texture))
        })
        .collect()
}

/// Terrain controller
pub struct Terrain<C: RenderContext> {
    valid: bool,
    exaggeration: f32,
    source_id: Option<String>,
    grid_buffer: C::Buffer,
    grid_index_buffer: C::Buffer,
    pub grid_segment: Segment,
    /// Inner grid only, for tiles that need no skirt
    pub grid_no_skirt_segment: Segment,
    proxy: ProxySourceCache<C>,
    proxy_coords: Vec<OverscaledTileId>,
    proxy_matrices: HashMap<OverscaledTileId, Mat4>,
    proxied_coords: HashMap<String, Vec<ProxiedTileId>>,
    proxy_to_source: ProxyToSource,
    /// DEM tile sampled by each proxy (and re-parsed source) tile
    terrain_tile_for_tile: HashMap<OverscaledTileId, OverscaledTileId>,
    source_tiles_overlap: HashMap<String, bool>,
    covering_tile_cache: HashMap<String, CoveringTileCache>,
    proxy_covering_cache: CoveringTileCache,
    tiles_dirty: HashMap<String, HashSet<OverscaledTileId>>,
    pool: Vec<Fbo<C>>,
    rendering_to_texture: bool,
    rendered_tiles: usize,
}

impl<C: RenderContext> Terrain<C> {
    /// Proxy source id used for layers without a source, such as background
    pub const PROXY_SOURCE_ID: &'static str = "proxy";

    pub fn new(ctx: &C, max_zoom: u8) -> Result<Terrain<C>> {
        let grid = create_grid(GRID_DIM + 1);
        let grid_buffer = ctx.create_vertex_buffer(bytemuck::cast_slice(&grid.vertices), false)?;
        let grid_index_buffer = ctx.create_index_buffer(bytemuck::cast_slice(&grid.indices))?;
        let grid_segment = Segment {
            vertex_offset: 0,
            primitive_offset: 0,
            vertex_length: grid.vertices.len(),
            primitive_length: grid.indices.len(),
        };
        let grid_no_skirt_segment = Segment {
            primitive_length: grid.skirt_indices_offset,
            ..grid_segment
        };
        Ok(Terrain {
            valid: false,
            exaggeration: 1.0,
            source_id: None,
            grid_buffer,
            grid_index_buffer,
            grid_segment,
            grid_no_skirt_segment,
            proxy: ProxySourceCache::new(512, max_zoom),
            proxy_coords: Vec::new(),
            proxy_matrices: HashMap::new(),
            proxied_coords: HashMap::new(),
            proxy_to_source: HashMap::new(),
            terrain_tile_for_tile: HashMap::new(),
            source_tiles_overlap: HashMap::new(),
            covering_tile_cache: HashMap::new(),
            proxy_covering_cache: CoveringTileCache::new(),
            tiles_dirty: HashMap::new(),
            pool: Vec::new(),
            rendering_to_texture: false,
            rendered_tiles: 0,
        })
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn exaggeration(&self) -> f32 {
        self.exaggeration
    }

    pub fn is_rendering_to_texture(&self) -> bool {
        self.rendering_to_texture
    }

    /// Proxy tiles of the last binding, in render order
    pub fn proxy_coords(&self) -> &[OverscaledTileId] {
        &self.proxy_coords
    }

    pub fn proxy_pos_matrix(&self, id: &OverscaledTileId) -> Option<&Mat4> {
        self.proxy_matrices.get(id)
    }

    pub fn proxied_coords(&self, source: &str) -> &[ProxiedTileId] {
        self.proxied_coords.get(source).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn proxy_to_source(&self) -> &ProxyToSource {
        &self.proxy_to_source
    }

    pub fn source_tiles_overlap(&self, source: &str) -> bool {
        self.source_tiles_overlap.get(source).copied().unwrap_or(false)
    }

    pub fn dem_tile_for(&self, id: &OverscaledTileId) -> Option<&OverscaledTileId> {
        self.terrain_tile_for_tile.get(id)
    }

    pub fn proxy_cache(&self) -> &ProxySourceCache<C> {
        &self.proxy
    }

    pub fn grid_buffers(&self) -> (&C::Buffer, &C::Buffer) {
        (&self.grid_buffer, &self.grid_index_buffer)
    }

    /// Proxy tiles drawn into during the last `render`
    pub fn rendered_tiles(&self) -> usize {
        self.rendered_tiles
    }

    fn fbo_size(&self) -> u32 {
        // Twice the tile size avoids upscaling when zooming in
        self.proxy.tile_size * 2
    }

    /// Layers of this type are rendered into proxy tiles
    pub fn is_layer_draped(&self, layer: &dyn StyleLayer) -> bool {
        self.valid && layer.layer_type().is_draped()
    }

    /// Validate the elevation source and move the proxy cover to the camera
    ///
    /// A missing or non raster-dem source disables terrain until a later update
    /// succeeds; the map keeps rendering flat.
    pub fn update(
        &mut self,
        ctx: &C,
        options: &TerrainOptions,
        sources: &mut SourceCaches,
        proxy_cover: &[OverscaledTileId],
    ) -> Result<()> {
        let reason = match sources.get(&options.source).map(|s| s.kind) {
            None => Some(format!("source \"{}\" is not defined", options.source)),
            Some(SourceKind::RasterDem) => None,
            Some(_) => Some(format!(
                "cannot use source \"{}\", only raster-dem sources are supported",
                options.source
            )),
        };
        if let Some(reason) = reason {
            log::warn!("Terrain {}", reason);
            self.disable(ctx, sources);
            return Err(Error::TerrainSource(reason));
        }

        if !self.valid {
            log::info!("Terrain enabled with source \"{}\"", options.source);
        }
        self.exaggeration = options.exaggeration;
        self.valid = true;

        if let Some(dem) = sources.get_mut(&options.source) {
            if dem.used && !dem.used_for_terrain {
                log::warn!(
                    "Raster DEM source \"{}\" is used both for terrain and as layer source",
                    dem.id
                );
            }
            dem.used_for_terrain = true;
        }
        if self.source_id.as_deref() != Some(options.source.as_str()) {
            self.terrain_tile_for_tile.clear();
        }
        self.source_id = Some(options.source.clone());
        self.covering_tile_cache
            .insert(options.source.clone(), CoveringTileCache::new());

        self.proxy_covering_cache.clear();
        let removed = self.proxy.update(proxy_cover);
        if !removed.is_empty() {
            log::debug!("{} proxy tiles left the cover", removed.len());
        }
        Ok(())
    }

    fn disable(&mut self, ctx: &C, sources: &mut SourceCaches) {
        if self.valid {
            log::info!("Terrain disabled");
        }
        self.valid = false;
        self.proxy.dealloc_render_cache(ctx);
        for source in sources.values_mut() {
            source.used_for_terrain = false;
        }
    }

    /// Map every content source's visible tiles onto the proxy tiles for this frame
    ///
    /// # Arguments
    /// * `sources_coords` - Visible tile ids per source id
    /// * `transitioning` - Some draped layer is mid-transition, render cache is bypassed
    pub fn update_tile_binding(
        &mut self,
        ctx: &C,
        camera: &Camera,
        sources: &SourceCaches,
        sources_coords: &HashMap<String, Vec<OverscaledTileId>>,
        transitioning: bool,
    ) -> Result<()> {
        if !self.valid {
            return Ok(());
        }
        let mut coords = self.proxy.ids();
        sort_by_distance_to_camera(&mut coords, camera.camera_point());
        self.proxy_matrices = coords
            .iter()
            .map(|id| (*id, camera.calculate_pos_matrix(id)))
            .collect();

        let previous = std::mem::take(&mut self.proxy_to_source);
        for id in &coords {
            self.proxy_to_source.insert(*id, HashMap::new());
        }
        self.proxy_coords = coords;
        self.terrain_tile_for_tile.clear();

        let tile_zoom = camera.tile_zoom();
        let empty = Vec::new();
        for (id, source) in sources {
            if !source.used {
                continue;
            }
            if self.source_id.as_ref() != Some(id) {
                self.covering_tile_cache.insert(id.clone(), CoveringTileCache::new());
            }
            let source_coords = sources_coords.get(id).unwrap_or(&empty);
            self.setup_proxied_coords_for_ortho(source, source_coords, &previous, tile_zoom);
            if source.used_for_terrain {
                continue;
            }
            if source.reparse_overscaled() {
                self.assign_terrain_tiles(sources, source_coords, tile_zoom);
            }
        }

        let self_proxied = self
            .proxy_coords
            .iter()
            .map(|id| ProxiedTileId::new(id, id, None))
            .collect();
        self.proxied_coords
            .insert(Self::PROXY_SOURCE_ID.to_string(), self_proxied);
        let proxy_coords = self.proxy_coords.clone();
        self.assign_terrain_tiles(sources, &proxy_coords, tile_zoom);

        self.setup_render_cache(ctx, &previous, transitioning)?;
        self.rendering_to_texture = false;
        self.init_fbo_pool(ctx)
    }

    fn setup_proxied_coords_for_ortho(
        &mut self,
        source: &SourceCache,
        source_coords: &[OverscaledTileId],
        previous: &ProxyToSource,
        tile_zoom: u8,
    ) {
        let recycle = |proxy: &OverscaledTileId| {
            previous
                .get(proxy)
                .and_then(|m| m.get(&source.id))
                .map(|v| v.as_slice())
        };
        let lookup = self.covering_tile_cache.entry(source.id.clone()).or_default();
        let mut coords = Vec::new();

        // Source tiles at or above each proxy's zoom
        for proxy in &self.proxy_coords {
            if let Some(tile) = find_tile_covering_tile_id(lookup, source, proxy, tile_zoom) {
                let id = ProxiedTileId::new(proxy, &tile, recycle(proxy));
                coords.push(id);
                if let Some(entry) = self.proxy_to_source.get_mut(proxy) {
                    entry.insert(source.id.clone(), vec![id]);
                }
            }
        }

        // Deeper source tiles, several per proxy
        let mut has_overlap = false;
        for tile_id in source_coords {
            let Some(tile) = source.tile(tile_id).filter(|t| t.has_data) else {
                continue;
            };
            let Some(proxy) =
                find_tile_covering_tile_id(&mut self.proxy_covering_cache, &self.proxy, &tile.id, tile_zoom)
            else {
                continue;
            };
            if proxy.canonical.z == tile.id.canonical.z {
                continue;
            }
            let id = ProxiedTileId::new(&proxy, &tile.id, recycle(&proxy));
            let tiles = self
                .proxy_to_source
                .entry(proxy)
                .or_default()
                .entry(source.id.clone())
                .or_default();
            // Keep the covering parent last so tiles stay in descending zoom order
            let at = tiles.len().saturating_sub(1);
            tiles.insert(at, id);
            coords.push(id);
            has_overlap = true;
        }
        self.source_tiles_overlap.insert(source.id.clone(), has_overlap);
        self.proxied_coords.insert(source.id.clone(), coords);
    }

    fn assign_terrain_tiles(&mut self, sources: &SourceCaches, coords: &[OverscaledTileId], tile_zoom: u8) {
        let Some(dem) = self.source_id.as_ref().and_then(|id| sources.get(id)) else {
            return;
        };
        let lookup = self.covering_tile_cache.entry(dem.id.clone()).or_default();
        for id in coords {
            if self.terrain_tile_for_tile.contains_key(id) {
                continue;
            }
            let found = find_tile_covering_tile_id(lookup, dem, id, tile_zoom)
                .filter(|found| dem.tile(found).is_some_and(|t| t.has_dem));
            if let Some(found) = found {
                self.terrain_tile_for_tile.insert(*id, found);
            }
        }
    }

    fn setup_render_cache(&mut self, ctx: &C, previous: &ProxyToSource, transitioning: bool) -> Result<()> {
        let psc = &mut self.proxy;
        if transitioning {
            if psc.render_cache.len() > psc.render_cache_pool.len() {
                psc.release_cache_assignments();
            }
            return Ok(());
        }
        let fbo_size = psc.tile_size * 2;
        for proxy in self.proxy_coords.iter().rev() {
            if let Some(&index) = psc.proxy_cached_fbo.get(proxy) {
                // Reuse the previous render if the same source tiles went into it
                let dirty = match (previous.get(proxy), self.proxy_to_source.get(proxy)) {
                    (Some(prev), Some(current)) => !same_contributors(prev, current, &self.tiles_dirty),
                    _ => true,
                };
                if let Some(fbo) = psc.render_cache.get_mut(index) {
                    fbo.dirty = dirty;
                }
            } else if let Some(index) = psc.acquire_cache_slot(ctx, fbo_size)? {
                psc.proxy_cached_fbo.insert(*proxy, index);
                if let Some(fbo) = psc.render_cache.get_mut(index) {
                    fbo.dirty = true;
                }
            }
        }
        self.tiles_dirty.clear();
        Ok(())
    }

    fn init_fbo_pool(&mut self, ctx: &C) -> Result<()> {
        let size = self.fbo_size();
        while self.pool.len() < FBO_POOL_SIZE.min(self.proxy_coords.len()) {
            self.pool.push(Fbo::new(ctx, size)?);
        }
        Ok(())
    }

    /// Render the run of draped layers starting at `start` into proxy tiles
    ///
    /// Proceeds proxy tile by proxy tile; each tile gets every layer of the run before
    /// the next tile starts. Cached tiles whose sources are unchanged are composited
    /// without rendering. Rendered tiles are draped onto the mesh every time the pool
    /// wraps, and once more at the end.
    ///
    /// Returns the index of the first layer after the run.
    pub fn render<P: DrapePainter<C>>(
        &mut self,
        ctx: &C,
        painter: &mut P,
        layers: &[&dyn StyleLayer],
        start: usize,
        zoom: f32,
        screen: [i32; 2],
    ) -> usize {
        if !self.valid || start >= layers.len() {
            return start;
        }
        let end = draped_range_end(layers, start, zoom);
        let fbo_size = self.fbo_size() as i32;

        let Terrain {
            proxy: psc,
            pool,
            proxy_coords,
            proxy_to_source,
            source_tiles_overlap,
            rendering_to_texture,
            rendered_tiles,
            ..
        } = self;

        *rendering_to_texture = true;
        *rendered_tiles = 0;
        let mut draw_as_raster = Vec::new();
        let mut pool_index = 0;

        let to_screen = |rendering_to_texture: &mut bool| {
            ctx.bind_framebuffer(None);
            ctx.viewport(0, 0, screen[0], screen[1]);
            *rendering_to_texture = false;
        };

        for proxy in proxy_coords.iter() {
            let cached = psc.proxy_cached_fbo.get(proxy).copied();
            let slot = match cached {
                Some(index) => FboSlot::Cache(index),
                None => {
                    pool_index += 1;
                    FboSlot::Pool(pool_index - 1)
                }
            };
            psc.textures.insert(*proxy, slot);
            let fbo = match slot {
                FboSlot::Cache(i) => psc.render_cache.get_mut(i),
                FboSlot::Pool(i) => pool.get_mut(i),
            };
            let Some(fbo) = fbo else {
                log::warn!("No framebuffer for proxy tile {}", proxy);
                continue;
            };

            if cached.is_some() && !fbo.dirty {
                draw_as_raster.push(*proxy);
            } else {
                ctx.bind_framebuffer(Some(&fbo.framebuffer));
                ctx.viewport(0, 0, fbo_size, fbo_size);
                *rendered_tiles += 1;
                if fbo.dirty {
                    ctx.clear(Some([0.0; 4]), None);
                    fbo.dirty = false;
                }

                let mut rendered = false;
                let mut stencil: Option<(&str, Vec<StencilMode>)> = None;
                for layer in layers.iter().take(end + 1).skip(start) {
                    if layer.is_hidden(zoom) {
                        continue;
                    }
                    let coords: Vec<ProxiedTileId> = if layer.source().is_empty() {
                        vec![ProxiedTileId::new(proxy, proxy, None)]
                    } else {
                        match proxy_to_source.get(proxy).and_then(|m| m.get(layer.source())) {
                            Some(coords) => coords.clone(),
                            // Not loaded yet for this source
                            None => continue,
                        }
                    };
                    let source = layer.source();
                    let stale = match &stencil {
                        Some((current, modes)) => *current != source || modes.len() != coords.len(),
                        None => true,
                    };
                    if stale {
                        let overlap = source_tiles_overlap.get(source).copied().unwrap_or(false);
                        let modes = setup_stencil(ctx, painter, fbo, &coords, *layer, overlap);
                        stencil = Some((source, modes));
                    }
                    let modes = stencil.as_ref().map(|(_, m)| m.as_slice()).unwrap_or(&[]);
                    let tiles: Vec<(ProxiedTileId, StencilMode)> =
                        coords.iter().copied().zip(modes.iter().copied()).collect();
                    rendered |= painter.render_layer(ctx, *layer, &tiles);
                }
                if stencil.as_ref().is_some_and(|(_, modes)| modes.iter().any(|m| *m != StencilMode::Disabled)) {
                    ctx.set_stencil_mode(StencilMode::Disabled);
                }
                fbo.dirty = rendered;
                if rendered {
                    draw_as_raster.push(*proxy);
                }
            }

            if pool_index == FBO_POOL_SIZE {
                pool_index = 0;
                if !draw_as_raster.is_empty() {
                    to_screen(&mut *rendering_to_texture);
                    painter.draw_terrain_raster(ctx, &raster_tiles(psc, pool, &draw_as_raster));
                    *rendering_to_texture = true;
                    draw_as_raster.clear();
                }
            }
        }

        to_screen(&mut *rendering_to_texture);
        if !draw_as_raster.is_empty() {
            painter.draw_terrain_raster(ctx, &raster_tiles(psc, pool, &draw_as_raster));
        }
        end + 1
    }

    /// Uniforms sampling the DEM tile bound to `proxy`
    pub fn prepare_dem_uniforms(&self, proxy: &OverscaledTileId, sources: &SourceCaches) -> Option<DemUniforms> {
        let dem_id = self.terrain_tile_for_tile.get(proxy)?;
        let dem = sources.get(self.source_id.as_ref()?)?;
        let scale = 2f64.powi(dem_id.canonical.z as i32 - proxy.canonical.z as i32);
        let tl = Vec2::new(
            (proxy.canonical.x as f64 * scale % 1.0) as f32,
            (proxy.canonical.y as f64 * scale % 1.0) as f32,
        );
        Some(DemUniforms {
            unpack: dem.encoding.unpack_vector(),
            tl,
            scale: scale as f32,
            dem_size: dem.tile_size as f32,
            exaggeration: self.exaggeration,
        })
    }

    /// Force re-rendering of proxy tiles that drew `id` of `source`
    pub fn mark_tile_dirty(&mut self, source: &str, id: OverscaledTileId) {
        self.tiles_dirty.entry(source.to_string()).or_default().insert(id);
    }

    /// A source tile was loaded, reloaded or unloaded
    pub fn source_tile_changed(&mut self, source: &str, id: OverscaledTileId) {
        self.mark_tile_dirty(source, id);
        self.covering_tile_cache.remove(source);
    }

    pub fn destroy(&mut self, ctx: &C) {
        ctx.delete_buffer(&self.grid_buffer);
        ctx.delete_buffer(&self.grid_index_buffer);
        for fbo in self.pool.drain(..) {
            fbo.destroy(ctx);
        }
        self.proxy.dealloc_render_cache(ctx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LayerConfig;
    use crate::renderer::context::mock::RecordingContext;
    use source_cache::SourceTile;
    use serde_json::json;

    #[derive(Default)]
    struct CountingPainter {
        layer_draws: usize,
        masks: Vec<u8>,
        stencils: Vec<StencilMode>,
        composited: usize,
        flushes: usize,
    }

    impl DrapePainter<RecordingContext> for CountingPainter {
        fn render_clipping_masks(&mut self, _ctx: &RecordingContext, masks: &[(ProxiedTileId, u8)]) {
            self.masks.extend(masks.iter().map(|(_, r)| *r));
        }

        fn render_layer(
            &mut self,
            _ctx: &RecordingContext,
            _layer: &dyn StyleLayer,
            tiles: &[(ProxiedTileId, StencilMode)],
        ) -> bool {
            self.layer_draws += 1;
            self.stencils.extend(tiles.iter().map(|(_, s)| *s));
            !tiles.is_empty()
        }

        fn draw_terrain_raster(&mut self, _ctx: &RecordingContext, tiles: &[(OverscaledTileId, &u32)]) {
            self.composited += tiles.len();
            self.flushes += 1;
        }
    }

    fn layer(json: serde_json::Value) -> LayerConfig {
        serde_json::from_value(json).unwrap()
    }

    fn camera() -> Camera {
        Camera {
            center: DVec2::new(0.3, 0.4),
            zoom: 4.5,
            ..Camera::new(1000.0, 1000.0)
        }
    }

    struct Scene {
        ctx: RecordingContext,
        terrain: Terrain<RecordingContext>,
        sources: SourceCaches,
        coords: HashMap<String, Vec<OverscaledTileId>>,
        camera: Camera,
        options: TerrainOptions,
    }

    fn scene() -> Scene {
        let ctx = RecordingContext::default();
        let terrain = Terrain::new(&ctx, 22).unwrap();
        let camera = camera();
        let cover = camera.covering_tiles(512, 0, 22, true);

        let mut dem = SourceCache::new("dem", SourceKind::RasterDem);
        dem.max_zoom = 3;
        for id in camera.covering_tiles(512, 0, 3, false) {
            dem.add_tile(SourceTile::dem(id));
        }
        let mut streets = SourceCache::new("streets", SourceKind::Vector);
        for id in &cover {
            streets.add_tile(SourceTile::loaded(*id));
        }
        let mut sources = SourceCaches::new();
        sources.insert("dem".to_string(), dem);
        sources.insert("streets".to_string(), streets);
        let coords = HashMap::from([("streets".to_string(), cover)]);
        let options = TerrainOptions {
            source: "dem".to_string(),
            exaggeration: 1.5,
        };
        Scene {
            ctx,
            terrain,
            sources,
            coords,
            camera,
            options,
        }
    }

    impl Scene {
        fn frame(&mut self, painter: &mut CountingPainter, layers: &[&dyn StyleLayer]) -> usize {
            let cover = self.camera.covering_tiles(512, 0, 22, true);
            self.terrain
                .update(&self.ctx, &self.options, &mut self.sources, &cover)
                .unwrap();
            self.terrain
                .update_tile_binding(&self.ctx, &self.camera, &self.sources, &self.coords, false)
                .unwrap();
            self.terrain.render(&self.ctx, painter, layers, 0, self.camera.zoom as f32, [1000, 1000])
        }
    }

    #[test]
    fn test_missing_or_wrong_source_disables() {
        let mut s = scene();
        let options = TerrainOptions {
            source: "nope".to_string(),
            exaggeration: 1.0,
        };
        match s.terrain.update(&s.ctx, &options, &mut s.sources, &[]) {
            Err(Error::TerrainSource(_)) => {}
            _ => panic!("Expected TerrainSource error"),
        }
        assert!(!s.terrain.is_valid());

        let options = TerrainOptions {
            source: "streets".to_string(),
            exaggeration: 1.0,
        };
        assert!(s.terrain.update(&s.ctx, &options, &mut s.sources, &[]).is_err());
        assert!(!s.terrain.is_valid());

        let cover = s.camera.covering_tiles(512, 0, 22, true);
        s.terrain.update(&s.ctx, &s.options, &mut s.sources, &cover).unwrap();
        assert!(s.terrain.is_valid());
        assert_eq!(s.terrain.exaggeration(), 1.5);
        assert!(s.sources["dem"].used_for_terrain);
    }

    #[test]
    fn test_stationary_camera_hits_render_cache() {
        let mut s = scene();
        let fill = layer(json!({"id": "land", "type": "fill", "source": "streets"}));
        let line = layer(json!({"id": "roads", "type": "line", "source": "streets"}));
        let layers: Vec<&dyn StyleLayer> = vec![&fill, &line];
        let mut painter = CountingPainter::default();

        assert_eq!(s.frame(&mut painter, &layers), 2);
        let proxies = s.terrain.proxy_coords().len();
        assert!(proxies > 0);
        assert_eq!(s.terrain.rendered_tiles(), proxies);
        assert_eq!(painter.layer_draws, proxies * 2);
        assert_eq!(painter.composited, proxies);

        for _ in 0..3 {
            let mut painter = CountingPainter::default();
            s.ctx.framebuffer_binds.borrow_mut().clear();
            s.frame(&mut painter, &layers);
            assert_eq!(s.terrain.rendered_tiles(), 0);
            assert_eq!(painter.layer_draws, 0);
            assert_eq!(painter.composited, proxies);
            assert!(s.ctx.framebuffer_binds.borrow().iter().all(|b| b.is_none()));
        }
    }

    #[test]
    fn test_dirty_source_tile_rerenders_its_proxy() {
        let mut s = scene();
        let fill = layer(json!({"id": "land", "type": "fill", "source": "streets"}));
        let layers: Vec<&dyn StyleLayer> = vec![&fill];
        s.frame(&mut CountingPainter::default(), &layers);

        let tile = s.coords["streets"][0];
        s.terrain.source_tile_changed("streets", tile);
        let mut painter = CountingPainter::default();
        s.frame(&mut painter, &layers);
        assert_eq!(s.terrain.rendered_tiles(), 1);
        assert_eq!(painter.layer_draws, 1);
    }

    #[test]
    fn test_transition_bypasses_cache() {
        let mut s = scene();
        let fill = layer(json!({"id": "land", "type": "fill", "source": "streets"}));
        let layers: Vec<&dyn StyleLayer> = vec![&fill];
        s.frame(&mut CountingPainter::default(), &layers);
        let proxies = s.terrain.proxy_coords().len();

        s.terrain
            .update_tile_binding(&s.ctx, &s.camera, &s.sources, &s.coords, true)
            .unwrap();
        assert!(s.terrain.proxy_cache().proxy_cached_fbo.is_empty());
        let mut painter = CountingPainter::default();
        s.terrain.render(&s.ctx, &mut painter, &layers, 0, 4.5, [1000, 1000]);
        assert_eq!(s.terrain.rendered_tiles(), proxies);
        // Pool wraps every FBO_POOL_SIZE tiles
        assert_eq!(painter.flushes, (proxies + FBO_POOL_SIZE - 1) / FBO_POOL_SIZE);
        assert_eq!(painter.composited, proxies);
    }

    #[test]
    fn test_render_stops_at_first_non_draped_layer() {
        let mut s = scene();
        let fill = layer(json!({"id": "land", "type": "fill", "source": "streets"}));
        let labels = layer(json!({"id": "labels", "type": "symbol", "source": "streets"}));
        let roads = layer(json!({"id": "roads", "type": "line", "source": "streets"}));
        let layers: Vec<&dyn StyleLayer> = vec![&fill, &labels, &roads];
        let mut painter = CountingPainter::default();
        assert_eq!(s.frame(&mut painter, &layers), 1);
        assert_eq!(painter.layer_draws, s.terrain.proxy_coords().len());
    }

    #[test]
    fn test_dem_binding_walks_to_covering_tile() {
        let mut s = scene();
        s.frame(&mut CountingPainter::default(), &[]);
        let proxy = s.terrain.proxy_coords()[0];
        assert_eq!(proxy.canonical.z, 4);
        let dem = *s.terrain.dem_tile_for(&proxy).unwrap();
        assert_eq!(dem.canonical, proxy.canonical.scaled_to(3));

        let uniforms = s.terrain.prepare_dem_uniforms(&proxy, &s.sources).unwrap();
        assert_eq!(uniforms.scale, 0.5);
        assert_eq!(uniforms.tl.x, if proxy.canonical.x % 2 == 1 { 0.5 } else { 0.0 });
        assert_eq!(uniforms.exaggeration, 1.5);
        assert_eq!(uniforms.dem_size, 514.0);
    }

    #[test]
    fn test_deeper_source_tiles_overlap_proxy() {
        let mut s = scene();
        let proxy = s.camera.covering_tiles(512, 0, 22, true)[0];
        let children = proxy.children(22);
        let streets = s.sources.get_mut("streets").unwrap();
        for child in &children {
            streets.add_tile(SourceTile::loaded(*child));
        }
        s.coords.get_mut("streets").unwrap().extend(children.iter().copied());

        let fill = layer(json!({"id": "land", "type": "fill", "source": "streets"}));
        let layers: Vec<&dyn StyleLayer> = vec![&fill];
        let mut painter = CountingPainter::default();
        s.frame(&mut painter, &layers);

        assert!(s.terrain.source_tiles_overlap("streets"));
        let tiles = &s.terrain.proxy_to_source()[&proxy]["streets"];
        assert_eq!(tiles.len(), 5);
        // Covering tile itself stays last
        assert_eq!(tiles[4].id, proxy);
        // Tile-clipped layer: one reference per contributing tile
        assert_eq!(painter.masks, vec![5, 4, 3, 2, 1]);
        assert!(painter
            .stencils
            .iter()
            .any(|m| *m == StencilMode::Equal { reference: 5 }));
        let modes = s.ctx.stencil_modes.borrow();
        assert!(modes.contains(&StencilMode::Write { reference: 6 }));
        assert_eq!(modes.last(), Some(&StencilMode::Disabled));
    }

    #[test]
    fn test_sort_by_distance_to_camera() {
        let mut ids = vec![
            OverscaledTileId::new(2, 0, 2, 0, 0),
            OverscaledTileId::new(3, 0, 3, 4, 4),
            OverscaledTileId::new(2, 0, 2, 1, 1),
        ];
        sort_by_distance_to_camera(&mut ids, DVec2::new(0.4, 0.4));
        assert_eq!(ids[0].canonical.z, 3);
        assert_eq!(ids[1], OverscaledTileId::new(2, 0, 2, 1, 1));
    }

    #[test]
    fn test_destroy_releases_gpu_resources() {
        let mut s = scene();
        let fill = layer(json!({"id": "land", "type": "fill", "source": "streets"}));
        let layers: Vec<&dyn StyleLayer> = vec![&fill];
        s.frame(&mut CountingPainter::default(), &layers);
        assert!(s.ctx.live_framebuffers.get() > 0);
        s.terrain.destroy(&s.ctx);
        assert_eq!(s.ctx.live_framebuffers.get(), 0);
        assert_eq!(s.ctx.live_textures.get(), 0);
        assert_eq!(s.ctx.live_buffers.get(), 0);
    }
}
