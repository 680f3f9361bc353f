use super::source_cache::{SourceTile, TilePyramid};
use super::RENDER_CACHE_MAX_SIZE;
use crate::error::Result;
use crate::geometry::EXTENT;
use crate::renderer::buffer::Fbo;
use crate::renderer::context::RenderContext;
use crate::tile_id::OverscaledTileId;
use glam::{Mat4, Vec3};
use std::collections::HashMap;

/// Orthographic projection of one tile's units onto its whole render target
pub fn proxy_ortho_matrix() -> Mat4 {
    Mat4::orthographic_rh_gl(0.0, EXTENT as f32, 0.0, EXTENT as f32, 0.0, 1.0)
}

/// Source tile drawn into a proxy tile
///
/// `pos_matrix` maps the source tile's units into the proxy tile's render target; the
/// proxy covers all of the source tile or a sub-rectangle of it.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ProxiedTileId {
    pub id: OverscaledTileId,
    pub proxy: OverscaledTileId,
    pub pos_matrix: Mat4,
}

impl ProxiedTileId {
    /// # Arguments
    /// * `recycle` - Same pairing from the previous frame, reused with its matrix
    pub fn new(proxy: &OverscaledTileId, tile: &OverscaledTileId, recycle: Option<&[ProxiedTileId]>) -> ProxiedTileId {
        if let Some(recycled) = recycle.and_then(|r| r.iter().find(|p| p.id == *tile)) {
            return *recycled;
        }
        let pos_matrix = if tile == proxy {
            proxy_ortho_matrix()
        } else {
            proxied_matrix(proxy, tile)
        };
        ProxiedTileId {
            id: *tile,
            proxy: *proxy,
            pos_matrix,
        }
    }
}

fn proxied_matrix(proxy: &OverscaledTileId, tile: &OverscaledTileId) -> Mat4 {
    let scale = proxy.canonical.z as i32 - tile.canonical.z as i32;
    let wrap = ((tile.wrap - proxy.wrap) as i64) << proxy.overscaled_z;
    let (px, py) = (proxy.canonical.x as i64, proxy.canonical.y as i64);
    let (tx, ty) = (tile.canonical.x as i64, tile.canonical.y as i64);
    let extent = EXTENT as i64;
    let (size, x_offset, y_offset) = if scale > 0 {
        let size = extent >> scale;
        (size, size * ((tx << scale) - px + wrap), size * ((ty << scale) - py))
    } else {
        let s = -scale;
        (
            extent << s,
            extent * (tx - ((px + wrap) << s)),
            extent * (ty - (py << s)),
        )
    };
    let size = size as f32;
    Mat4::orthographic_rh_gl(0.0, size, 0.0, size, 0.0, 1.0)
        * Mat4::from_translation(Vec3::new(x_offset as f32, y_offset as f32, 0.0))
}

/// Where a proxy tile's texture lives this frame
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FboSlot {
    Cache(usize),
    Pool(usize),
}

/// Screen-driven tile cover used as render targets for draping
///
/// Proxy tiles follow the camera only; every content source is mapped onto them. Tiles
/// kept in the render cache own a framebuffer across frames.
pub struct ProxySourceCache<C: RenderContext> {
    pub tile_size: u32,
    pub max_zoom: u8,
    tiles: HashMap<OverscaledTileId, SourceTile>,
    pub textures: HashMap<OverscaledTileId, FboSlot>,
    pub render_cache: Vec<Fbo<C>>,
    /// Free indices into `render_cache`
    pub render_cache_pool: Vec<usize>,
    pub proxy_cached_fbo: HashMap<OverscaledTileId, usize>,
}

impl<C: RenderContext> ProxySourceCache<C> {
    pub fn new(tile_size: u32, max_zoom: u8) -> ProxySourceCache<C> {
        ProxySourceCache {
            tile_size,
            max_zoom,
            tiles: HashMap::new(),
            textures: HashMap::new(),
            render_cache: Vec::new(),
            render_cache_pool: Vec::new(),
            proxy_cached_fbo: HashMap::new(),
        }
    }

    /// Replace the tile set with `cover`, returning the tiles that left it
    pub fn update(&mut self, cover: &[OverscaledTileId]) -> Vec<OverscaledTileId> {
        for id in cover {
            self.tiles.entry(*id).or_insert_with(|| SourceTile::loaded(*id));
        }
        let mut removed: Vec<OverscaledTileId> =
            self.tiles.keys().filter(|id| !cover.contains(id)).copied().collect();
        removed.sort();
        for id in &removed {
            self.free_fbo(id);
            self.tiles.remove(id);
            self.textures.remove(id);
        }
        removed
    }

    /// Return the tile's render cache slot to the free pool
    pub fn free_fbo(&mut self, id: &OverscaledTileId) {
        if let Some(index) = self.proxy_cached_fbo.remove(id) {
            self.render_cache_pool.push(index);
        }
    }

    /// Take a free render cache slot, growing the cache up to its limit
    ///
    /// A full cache caps without evicting: the proxy gets `None` and renders through the
    /// pool. Assignments only ever belong to tiles of the current cover, since `update`
    /// frees the slots of tiles that leave it, so there is no stale entry to evict.
    pub fn acquire_cache_slot(&mut self, ctx: &C, fbo_size: u32) -> Result<Option<usize>> {
        if let Some(index) = self.render_cache_pool.pop() {
            return Ok(Some(index));
        }
        if self.render_cache.len() < RENDER_CACHE_MAX_SIZE {
            self.render_cache.push(Fbo::new(ctx, fbo_size)?);
            return Ok(Some(self.render_cache.len() - 1));
        }
        Ok(None)
    }

    /// Drop every cache assignment while keeping the framebuffers for later frames
    pub fn release_cache_assignments(&mut self) {
        let used: Vec<usize> = self.proxy_cached_fbo.drain().map(|(_, index)| index).collect();
        self.render_cache_pool.extend(used);
    }

    pub fn dealloc_render_cache(&mut self, ctx: &C) {
        for fbo in self.render_cache.drain(..) {
            fbo.destroy(ctx);
        }
        self.render_cache_pool.clear();
        self.proxy_cached_fbo.clear();
        self.textures.clear();
    }

    /// Ids in a stable order
    pub fn ids(&self) -> Vec<OverscaledTileId> {
        let mut ids: Vec<OverscaledTileId> = self.tiles.keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }
}

impl<C: RenderContext> TilePyramid for ProxySourceCache<C> {
    fn tile(&self, id: &OverscaledTileId) -> Option<&SourceTile> {
        self.tiles.get(id)
    }

    fn min_zoom(&self) -> u8 {
        0
    }

    fn max_zoom(&self) -> u8 {
        self.max_zoom
    }

    fn reparse_overscaled(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::context::mock::RecordingContext;
    use glam::Vec4;

    fn to_proxy(m: &Mat4, x: f32, y: f32) -> (f32, f32) {
        let p = *m * Vec4::new(x, y, 0.0, 1.0);
        (p.x / p.w, p.y / p.w)
    }

    #[test]
    fn test_same_tile_uses_ortho() {
        let id = OverscaledTileId::new(3, 0, 3, 1, 2);
        let proxied = ProxiedTileId::new(&id, &id, None);
        let (x, y) = to_proxy(&proxied.pos_matrix, 0.0, EXTENT as f32);
        assert!((x + 1.0).abs() < 1e-6);
        assert!((y - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_child_source_tile_covers_quadrant() {
        let proxy = OverscaledTileId::new(3, 0, 3, 1, 2);
        let child = OverscaledTileId::new(4, 0, 4, 3, 4);
        let proxied = ProxiedTileId::new(&proxy, &child, None);
        // Child is the top right quadrant of the proxy
        let (x0, y0) = to_proxy(&proxied.pos_matrix, 0.0, 0.0);
        let (x1, y1) = to_proxy(&proxied.pos_matrix, EXTENT as f32, EXTENT as f32);
        assert!((x0 - 0.0).abs() < 1e-6 && (y0 + 1.0).abs() < 1e-6);
        assert!((x1 - 1.0).abs() < 1e-6 && (y1 - 0.0).abs() < 1e-6);
    }

    #[test]
    fn test_parent_source_tile_is_scaled_up() {
        let proxy = OverscaledTileId::new(4, 0, 4, 3, 4);
        let parent = OverscaledTileId::new(3, 0, 3, 1, 2);
        let proxied = ProxiedTileId::new(&proxy, &parent, None);
        // Parent's center lands on the proxy's bottom left corner
        let (x, y) = to_proxy(&proxied.pos_matrix, 2048.0, 2048.0);
        assert!((x + 1.0).abs() < 1e-6);
        assert!((y - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_recycle_keeps_matrix() {
        let proxy = OverscaledTileId::new(3, 0, 3, 1, 2);
        let child = OverscaledTileId::new(4, 0, 4, 3, 4);
        let mut previous = ProxiedTileId::new(&proxy, &child, None);
        previous.pos_matrix = Mat4::IDENTITY;
        let recycled = ProxiedTileId::new(&proxy, &child, Some(&[previous]));
        assert_eq!(recycled.pos_matrix, Mat4::IDENTITY);
    }

    #[test]
    fn test_update_frees_cache_slots_of_removed_tiles() {
        let ctx = RecordingContext::default();
        let mut psc: ProxySourceCache<RecordingContext> = ProxySourceCache::new(512, 22);
        let a = OverscaledTileId::new(2, 0, 2, 1, 1);
        let b = OverscaledTileId::new(2, 0, 2, 2, 1);
        assert!(psc.update(&[a, b]).is_empty());
        assert_eq!(psc.len(), 2);

        let slot = psc.acquire_cache_slot(&ctx, 1024).unwrap().unwrap();
        psc.proxy_cached_fbo.insert(b, slot);
        assert_eq!(psc.update(&[a]), vec![b]);
        assert_eq!(psc.render_cache_pool, vec![slot]);
        assert!(psc.proxy_cached_fbo.is_empty());

        // Freed slot is reused before the cache grows
        assert_eq!(psc.acquire_cache_slot(&ctx, 1024).unwrap(), Some(slot));
        assert_eq!(psc.render_cache.len(), 1);

        psc.dealloc_render_cache(&ctx);
        assert_eq!(ctx.live_framebuffers.get(), 0);
        assert_eq!(ctx.live_textures.get(), 0);
    }

    #[test]
    fn test_full_render_cache_caps_without_evicting() {
        let ctx = RecordingContext::default();
        let mut psc: ProxySourceCache<RecordingContext> = ProxySourceCache::new(512, 22);
        let cover: Vec<OverscaledTileId> = (0..RENDER_CACHE_MAX_SIZE as u32 + 1)
            .map(|i| OverscaledTileId::new(6, 0, 6, i % 64, i / 64))
            .collect();
        psc.update(&cover);

        for id in &cover[..RENDER_CACHE_MAX_SIZE] {
            let slot = psc.acquire_cache_slot(&ctx, 1024).unwrap().unwrap();
            psc.proxy_cached_fbo.insert(*id, slot);
        }
        assert_eq!(psc.acquire_cache_slot(&ctx, 1024).unwrap(), None);
        assert_eq!(psc.render_cache.len(), RENDER_CACHE_MAX_SIZE);
        assert_eq!(psc.proxy_cached_fbo.len(), RENDER_CACHE_MAX_SIZE);
        assert_eq!(ctx.live_framebuffers.get(), RENDER_CACHE_MAX_SIZE as i32);

        // A tile leaving the cover hands its slot to the uncached one
        let last = cover[RENDER_CACHE_MAX_SIZE];
        let gone = cover[0];
        let freed = psc.proxy_cached_fbo[&gone];
        assert_eq!(psc.update(&cover[1..]), vec![gone]);
        assert_eq!(psc.acquire_cache_slot(&ctx, 1024).unwrap(), Some(freed));
        psc.proxy_cached_fbo.insert(last, freed);
        assert_eq!(psc.render_cache.len(), RENDER_CACHE_MAX_SIZE);
    }
}
