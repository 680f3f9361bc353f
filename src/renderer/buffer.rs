use crate::bucket::program_configuration::ProgramConfiguration;
use crate::error::Result;
use crate::renderer::context::RenderContext;

/// Frame buffer object for off-screen rendering of one proxy tile
pub struct Fbo<C: RenderContext> {
    pub framebuffer: C::Framebuffer,
    pub texture: C::Texture,
    /// Content must be re-rendered before the texture is sampled again
    pub dirty: bool,
    /// Next free stencil reference for tile clipping masks
    pub stencil_ref: u8,
}

impl<C: RenderContext> Fbo<C> {
    pub fn new(ctx: &C, size: u32) -> Result<Fbo<C>> {
        let texture = ctx.create_texture(size, size)?;
        let framebuffer = ctx.create_framebuffer(&texture, size, size)?;
        Ok(Fbo {
            framebuffer,
            texture,
            dirty: false,
            stencil_ref: 0,
        })
    }

    pub fn destroy(&self, ctx: &C) {
        ctx.delete_framebuffer(&self.framebuffer);
        ctx.delete_texture(&self.texture);
    }
}

/// GPU buffers uploaded for one bucket
pub struct BufferCache<B> {
    // Fill extrusion
    pub layout_vertex_buffer: Option<B>,
    pub index_buffer: Option<B>,
    pub centroid_vertex_buffer: Option<B>,
    pub ext_vertex_buffer: Option<B>,

    // Ground effect
    pub ground_vertex_buffer: Option<B>,
    pub ground_index_buffer: Option<B>,
    pub hidden_by_landmark_buffer: Option<B>,

    // Symbols: glyphs use the layout/index slots above, icons their own
    pub dynamic_vertex_buffer: Option<B>,
    pub opacity_vertex_buffer: Option<B>,
    pub icon_layout_vertex_buffer: Option<B>,
    pub icon_index_buffer: Option<B>,
    pub icon_dynamic_vertex_buffer: Option<B>,
    pub icon_opacity_vertex_buffer: Option<B>,

    /// Per-vertex paint arrays keyed by `<prefix>:<property>`
    pub paint_buffers: Vec<(String, B)>,
}

impl<B> Default for BufferCache<B> {
    fn default() -> Self {
        BufferCache {
            layout_vertex_buffer: None,
            index_buffer: None,
            centroid_vertex_buffer: None,
            ext_vertex_buffer: None,
            ground_vertex_buffer: None,
            ground_index_buffer: None,
            hidden_by_landmark_buffer: None,
            dynamic_vertex_buffer: None,
            opacity_vertex_buffer: None,
            icon_layout_vertex_buffer: None,
            icon_index_buffer: None,
            icon_dynamic_vertex_buffer: None,
            icon_opacity_vertex_buffer: None,
            paint_buffers: Vec::new(),
        }
    }
}

impl<B> BufferCache<B> {
    pub fn new() -> BufferCache<B> {
        BufferCache::default()
    }

    /// Create or refresh one buffer per data-driven paint property
    pub fn upload_paint_arrays<C: RenderContext<Buffer = B>>(
        &mut self,
        ctx: &C,
        prefix: &str,
        config: &ProgramConfiguration,
    ) -> Result<()> {
        for (property, data) in config.paint_vertex_arrays() {
            let key = format!("{}:{}", prefix, property);
            let bytes: &[u8] = bytemuck::cast_slice(data);
            match self.paint_buffers.iter().find(|(k, _)| *k == key) {
                Some((_, buffer)) => ctx.update_vertex_buffer(buffer, bytes),
                None => {
                    let buffer = ctx.create_vertex_buffer(bytes, true)?;
                    self.paint_buffers.push((key, buffer));
                }
            }
        }
        Ok(())
    }

    pub fn is_uploaded(&self) -> bool {
        self.layout_vertex_buffer.is_some() || self.icon_layout_vertex_buffer.is_some()
    }

    /// Delete every buffer held by the cache
    pub fn release<C: RenderContext<Buffer = B>>(&mut self, ctx: &C) {
        let slots = [
            self.layout_vertex_buffer.take(),
            self.index_buffer.take(),
            self.centroid_vertex_buffer.take(),
            self.ext_vertex_buffer.take(),
            self.ground_vertex_buffer.take(),
            self.ground_index_buffer.take(),
            self.hidden_by_landmark_buffer.take(),
            self.dynamic_vertex_buffer.take(),
            self.opacity_vertex_buffer.take(),
            self.icon_layout_vertex_buffer.take(),
            self.icon_index_buffer.take(),
            self.icon_dynamic_vertex_buffer.take(),
            self.icon_opacity_vertex_buffer.take(),
        ];
        for buffer in slots.into_iter().flatten() {
            ctx.delete_buffer(&buffer);
        }
        for (_, buffer) in self.paint_buffers.drain(..) {
            ctx.delete_buffer(&buffer);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::context::mock::RecordingContext;

    #[test]
    fn test_fbo_lifecycle() {
        let ctx = RecordingContext::default();
        let fbo = Fbo::new(&ctx, 512).unwrap();
        assert_eq!(ctx.live_textures.get(), 1);
        assert_eq!(ctx.live_framebuffers.get(), 1);
        assert!(!fbo.dirty);
        fbo.destroy(&ctx);
        assert_eq!(ctx.live_textures.get(), 0);
        assert_eq!(ctx.live_framebuffers.get(), 0);
    }

    #[test]
    fn test_release_deletes_all_buffers() {
        let ctx = RecordingContext::default();
        let mut cache: BufferCache<u32> = BufferCache::new();
        cache.layout_vertex_buffer = Some(ctx.create_vertex_buffer(&[0; 8], false).unwrap());
        cache.index_buffer = Some(ctx.create_index_buffer(&[0; 6]).unwrap());
        cache
            .paint_buffers
            .push(("fill:color".to_string(), ctx.create_vertex_buffer(&[], true).unwrap()));
        assert!(cache.is_uploaded());
        cache.release(&ctx);
        assert_eq!(ctx.live_buffers.get(), 0);
        assert!(!cache.is_uploaded());
        assert!(cache.paint_buffers.is_empty());
    }
}
