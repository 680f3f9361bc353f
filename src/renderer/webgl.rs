use crate::error::{Error, Result};
use crate::renderer::context::{RenderContext, StencilMode};
use js_sys::Uint8Array;
use wasm_bindgen::{JsCast, JsValue};
use web_sys::{WebGl2RenderingContext as Gl, WebGlBuffer, WebGlFramebuffer, WebGlRenderbuffer, WebGlTexture};

/// Render target with its stencil attachment
pub struct GlFramebuffer {
    pub framebuffer: WebGlFramebuffer,
    stencil: WebGlRenderbuffer,
}

fn gpu_error(err: JsValue) -> Error {
    Error::Gpu(format!("{:?}", err))
}

fn upload(gl: &Gl, target: u32, buffer: &WebGlBuffer, data: &[u8], usage: u32) {
    gl.bind_buffer(target, Some(buffer));
    unsafe {
        let array = Uint8Array::view(data);
        gl.buffer_data_with_array_buffer_view(target, &array, usage);
    }
    gl.bind_buffer(target, None);
}

/// Drawing buffer size of the canvas behind `gl`
pub fn canvas_size(gl: &Gl) -> std::result::Result<(u32, u32), JsValue> {
    let canvas = gl
        .canvas()
        .ok_or_else(|| JsValue::from_str("No canvas"))?
        .dyn_into::<web_sys::HtmlCanvasElement>()?;
    Ok((canvas.width(), canvas.height()))
}

impl RenderContext for Gl {
    type Buffer = WebGlBuffer;
    type Texture = WebGlTexture;
    type Framebuffer = GlFramebuffer;

    fn create_vertex_buffer(&self, data: &[u8], dynamic: bool) -> Result<WebGlBuffer> {
        let buffer = self
            .create_buffer()
            .ok_or_else(|| Error::Gpu("Failed to create vertex buffer".to_string()))?;
        let usage = if dynamic { Gl::DYNAMIC_DRAW } else { Gl::STATIC_DRAW };
        upload(self, Gl::ARRAY_BUFFER, &buffer, data, usage);
        Ok(buffer)
    }

    fn update_vertex_buffer(&self, buffer: &WebGlBuffer, data: &[u8]) {
        // Size may change between updates, so the store is respecified
        upload(self, Gl::ARRAY_BUFFER, buffer, data, Gl::DYNAMIC_DRAW);
    }

    fn create_index_buffer(&self, data: &[u8]) -> Result<WebGlBuffer> {
        let buffer = self
            .create_buffer()
            .ok_or_else(|| Error::Gpu("Failed to create index buffer".to_string()))?;
        upload(self, Gl::ELEMENT_ARRAY_BUFFER, &buffer, data, Gl::STATIC_DRAW);
        Ok(buffer)
    }

    fn delete_buffer(&self, buffer: &WebGlBuffer) {
        Gl::delete_buffer(self, Some(buffer));
    }

    fn create_texture(&self, width: u32, height: u32) -> Result<WebGlTexture> {
        let texture = Gl::create_texture(self).ok_or_else(|| Error::Gpu("Failed to create texture".to_string()))?;
        self.bind_texture(Gl::TEXTURE_2D, Some(&texture));
        self.tex_image_2d_with_i32_and_i32_and_i32_and_format_and_type_and_opt_u8_array(
            Gl::TEXTURE_2D,
            0,
            Gl::RGBA as i32,
            width as i32,
            height as i32,
            0,
            Gl::RGBA,
            Gl::UNSIGNED_BYTE,
            None,
        )
        .map_err(gpu_error)?;
        self.tex_parameteri(Gl::TEXTURE_2D, Gl::TEXTURE_MIN_FILTER, Gl::LINEAR as i32);
        self.tex_parameteri(Gl::TEXTURE_2D, Gl::TEXTURE_MAG_FILTER, Gl::LINEAR as i32);
        self.tex_parameteri(Gl::TEXTURE_2D, Gl::TEXTURE_WRAP_S, Gl::CLAMP_TO_EDGE as i32);
        self.tex_parameteri(Gl::TEXTURE_2D, Gl::TEXTURE_WRAP_T, Gl::CLAMP_TO_EDGE as i32);
        self.bind_texture(Gl::TEXTURE_2D, None);
        Ok(texture)
    }

    fn delete_texture(&self, texture: &WebGlTexture) {
        Gl::delete_texture(self, Some(texture));
    }

    fn create_framebuffer(&self, texture: &WebGlTexture, width: u32, height: u32) -> Result<GlFramebuffer> {
        let framebuffer = Gl::create_framebuffer(self).ok_or_else(|| Error::Gpu("Failed to create FBO".to_string()))?;
        self.bind_framebuffer(Gl::FRAMEBUFFER, Some(&framebuffer));
        self.framebuffer_texture_2d(Gl::FRAMEBUFFER, Gl::COLOR_ATTACHMENT0, Gl::TEXTURE_2D, Some(texture), 0);

        let stencil = self
            .create_renderbuffer()
            .ok_or_else(|| Error::Gpu("Failed to create stencil buffer".to_string()))?;
        self.bind_renderbuffer(Gl::RENDERBUFFER, Some(&stencil));
        self.renderbuffer_storage(Gl::RENDERBUFFER, Gl::STENCIL_INDEX8, width as i32, height as i32);
        self.framebuffer_renderbuffer(Gl::FRAMEBUFFER, Gl::STENCIL_ATTACHMENT, Gl::RENDERBUFFER, Some(&stencil));
        self.bind_renderbuffer(Gl::RENDERBUFFER, None);

        let status = self.check_framebuffer_status(Gl::FRAMEBUFFER);
        self.bind_framebuffer(Gl::FRAMEBUFFER, None);
        if status != Gl::FRAMEBUFFER_COMPLETE {
            Gl::delete_framebuffer(self, Some(&framebuffer));
            self.delete_renderbuffer(Some(&stencil));
            return Err(Error::Gpu(format!("Incomplete framebuffer: 0x{:x}", status)));
        }
        Ok(GlFramebuffer { framebuffer, stencil })
    }

    fn delete_framebuffer(&self, framebuffer: &GlFramebuffer) {
        Gl::delete_framebuffer(self, Some(&framebuffer.framebuffer));
        self.delete_renderbuffer(Some(&framebuffer.stencil));
    }

    fn bind_framebuffer(&self, framebuffer: Option<&GlFramebuffer>) {
        Gl::bind_framebuffer(self, Gl::FRAMEBUFFER, framebuffer.map(|f| &f.framebuffer));
    }

    fn viewport(&self, x: i32, y: i32, width: i32, height: i32) {
        Gl::viewport(self, x, y, width, height);
    }

    fn clear(&self, color: Option<[f32; 4]>, stencil: Option<i32>) {
        let mut mask = 0;
        if let Some([r, g, b, a]) = color {
            self.clear_color(r, g, b, a);
            mask |= Gl::COLOR_BUFFER_BIT;
        }
        if let Some(s) = stencil {
            self.clear_stencil(s);
            self.stencil_mask(0xFF);
            mask |= Gl::STENCIL_BUFFER_BIT;
        }
        if mask != 0 {
            Gl::clear(self, mask);
        }
    }

    fn set_stencil_mode(&self, mode: StencilMode) {
        let (func, reference, op, write_mask) = match mode {
            StencilMode::Disabled => {
                self.disable(Gl::STENCIL_TEST);
                return;
            }
            StencilMode::Write { reference } => (Gl::ALWAYS, reference, Gl::REPLACE, 0xFF),
            StencilMode::Equal { reference } => (Gl::EQUAL, reference, Gl::KEEP, 0x00),
            StencilMode::Greater { reference } => (Gl::GREATER, reference, Gl::REPLACE, 0xFF),
        };
        self.enable(Gl::STENCIL_TEST);
        self.stencil_mask(write_mask);
        self.stencil_func(func, reference as i32, 0xFF);
        self.stencil_op(Gl::KEEP, Gl::KEEP, op);
    }
}
