use crate::error::Result;

/// Stencil state used while compositing tiles into a render target
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StencilMode {
    Disabled,
    /// Unconditionally write `reference` where fragments land
    Write { reference: u8 },
    /// Draw only where the stored value equals `reference`
    Equal { reference: u8 },
    /// Draw where `reference` is greater than the stored value and store it
    Greater { reference: u8 },
}

/// Opaque GPU resource verbs used by the core
///
/// Handles are owned by the caller; every `create_*` has a matching `delete_*`.
pub trait RenderContext {
    type Buffer;
    type Texture;
    type Framebuffer;

    fn create_vertex_buffer(&self, data: &[u8], dynamic: bool) -> Result<Self::Buffer>;
    fn update_vertex_buffer(&self, buffer: &Self::Buffer, data: &[u8]);
    fn create_index_buffer(&self, data: &[u8]) -> Result<Self::Buffer>;
    fn delete_buffer(&self, buffer: &Self::Buffer);

    fn create_texture(&self, width: u32, height: u32) -> Result<Self::Texture>;
    fn delete_texture(&self, texture: &Self::Texture);

    /// Framebuffer with `texture` as color attachment and a stencil attachment
    fn create_framebuffer(
        &self,
        texture: &Self::Texture,
        width: u32,
        height: u32,
    ) -> Result<Self::Framebuffer>;
    fn delete_framebuffer(&self, framebuffer: &Self::Framebuffer);
    /// `None` binds the default framebuffer
    fn bind_framebuffer(&self, framebuffer: Option<&Self::Framebuffer>);

    fn viewport(&self, x: i32, y: i32, width: i32, height: i32);
    fn clear(&self, color: Option<[f32; 4]>, stencil: Option<i32>);
    fn set_stencil_mode(&self, mode: StencilMode);
}
