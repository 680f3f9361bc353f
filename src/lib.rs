pub mod bucket;
pub mod config;
pub mod error;
pub mod geometry;
pub mod projection;
pub mod renderer;
pub mod shape;
pub mod symbol;
pub mod terrain;
pub mod tile;
pub mod tile_id;

use crate::bucket::TileBucket;
use crate::config::StyleConfig;
use crate::error::Error;
use crate::renderer::webgl::canvas_size;
use crate::renderer::Renderer;
use crate::shape::ExtrusionBuffers;
use crate::symbol::shaping::GlyphAtlas;
use crate::tile::{parse_source_layers, Tile};
use crate::tile_id::{mercator_x_from_lng, mercator_y_from_lat, OverscaledTileId};
use glam::DVec2;
use wasm_bindgen::prelude::*;
use web_sys::WebGl2RenderingContext;

/// Initialize panic hook for better error messages in browser console
#[wasm_bindgen]
pub fn init_panic_hook() {
    #[cfg(feature = "console_error_panic_hook")]
    console_error_panic_hook::set_once();
}

const NOT_INITIALIZED: &str = "Renderer not initialized. Call init() first.";

/// Vector tile processor with a stateful WebGL renderer
#[wasm_bindgen]
#[derive(Default)]
pub struct VectorTileProcessor {
    renderer: Option<Renderer<WebGl2RenderingContext>>,
}

impl VectorTileProcessor {
    fn renderer(&mut self) -> Result<&mut Renderer<WebGl2RenderingContext>, JsValue> {
        self.renderer
            .as_mut()
            .ok_or_else(|| JsValue::from_str(NOT_INITIALIZED))
    }
}

#[wasm_bindgen]
impl VectorTileProcessor {
    /// Create a new VectorTileProcessor instance
    #[wasm_bindgen(constructor)]
    pub fn new() -> VectorTileProcessor {
        VectorTileProcessor::default()
    }

    /// Initialize with WebGL 2.0 context
    ///
    /// # Arguments
    /// * `gl` - WebGL 2.0 rendering context from canvas
    ///
    /// # Returns
    /// * `"init_done"` signal on success
    pub fn init(&mut self, gl: WebGl2RenderingContext) -> Result<String, JsValue> {
        let (width, height) = canvas_size(&gl)?;
        if let Some(mut old) = self.renderer.take() {
            old.clear_all();
        }
        self.renderer = Some(Renderer::new(gl, width as f64, height as f64));
        Ok("init_done".to_string())
    }

    /// Build and upload the buckets of one tile
    ///
    /// # Arguments
    /// * `style_json` - `{"layers": [...], "images": {...}, "projection": "mercator"}`
    /// * `features_json` - Decoded features keyed by source layer
    /// * `glyphs_json` - Glyph metrics keyed by font stack, then code point
    ///
    /// # Returns
    /// * `"add_tile_done"` signal on success
    pub fn add_tile(
        &mut self,
        z: u8,
        x: u32,
        y: u32,
        style_json: &str,
        features_json: &str,
        glyphs_json: &str,
    ) -> Result<String, JsValue> {
        let style: StyleConfig = serde_json::from_str(style_json).map_err(Error::from)?;
        let glyphs: GlyphAtlas = serde_json::from_str(glyphs_json).map_err(Error::from)?;
        let source_layers = parse_source_layers(features_json)?;

        let id = OverscaledTileId::new(z, 0, z, x, y);
        let tile = Tile::parse(
            id,
            &style.style_layers(),
            &source_layers,
            &glyphs,
            &style.images,
            style.projection,
        );
        self.renderer()?.add_tile(tile)?;
        Ok("add_tile_done".to_string())
    }

    /// Remove a tile and release its GPU buffers
    ///
    /// # Returns
    /// * `"remove_done"` signal on success
    pub fn remove_tile(&mut self, z: u8, x: u32, y: u32) -> Result<String, JsValue> {
        self.renderer()?
            .remove_tile(&OverscaledTileId::new(z, 0, z, x, y))?;
        Ok("remove_done".to_string())
    }

    /// Move the camera
    ///
    /// # Arguments
    /// * `lng`, `lat` - Map center in degrees
    /// * `bearing` - Degrees clockwise from north
    /// * `pitch` - Degrees away from straight down
    ///
    /// # Returns
    /// * `"camera_done"` signal on success
    pub fn set_camera(&mut self, lng: f64, lat: f64, zoom: f64, bearing: f64, pitch: f64) -> Result<String, JsValue> {
        let camera = &mut self.renderer()?.camera;
        camera.center = DVec2::new(mercator_x_from_lng(lng), mercator_y_from_lat(lat));
        camera.zoom = zoom;
        camera.bearing = bearing.to_radians();
        camera.pitch = pitch.to_radians();
        Ok("camera_done".to_string())
    }

    /// Re-run label placement and projection for a new bearing and zoom
    ///
    /// # Arguments
    /// * `bearing` - Degrees clockwise from north
    ///
    /// # Returns
    /// * Number of labels shown
    pub fn place_symbols(&mut self, bearing: f64, zoom: f64) -> Result<u32, JsValue> {
        let renderer = self.renderer()?;
        renderer.camera.bearing = bearing.to_radians();
        renderer.camera.zoom = zoom;
        let shown = renderer.place_symbols()?;
        renderer.update_projection()?;
        Ok(shown as u32)
    }

    /// Packed fill-extrusion arrays of every extrusion layer of a tile
    ///
    /// # Errors
    /// * Returns error if the tile is not loaded
    pub fn tile_buffers(&mut self, z: u8, x: u32, y: u32) -> Result<Vec<ExtrusionBuffers>, JsValue> {
        let id = OverscaledTileId::new(z, 0, z, x, y);
        let tile = self
            .renderer()?
            .tile(&id)
            .ok_or_else(|| Error::TileNotFound(id.to_string()))?;
        Ok(tile
            .buckets()
            .iter()
            .filter_map(TileBucket::as_fill_extrusion)
            .map(ExtrusionBuffers::from_bucket)
            .collect())
    }

    /// Clear all tiles
    ///
    /// # Returns
    /// * `"clear_done"` signal on success
    pub fn clear(&mut self) -> Result<String, JsValue> {
        self.renderer()?.clear_all();
        Ok("clear_done".to_string())
    }

    /// Follow canvas dimension changes (e.g., fullscreen)
    ///
    /// # Returns
    /// * `"resize_done"` signal on success
    pub fn resize(&mut self) -> Result<String, JsValue> {
        let renderer = self.renderer()?;
        let (width, height) = canvas_size(renderer.context())?;
        renderer.resize(width as f64, height as f64);
        Ok("resize_done".to_string())
    }
}
