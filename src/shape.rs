use crate::bucket::fill_extrusion::FillExtrusionBucket;
use wasm_bindgen::prelude::*;

/// Packed fill-extrusion arrays of one tile layer, copied out for the host
#[wasm_bindgen]
#[derive(Clone, Default)]
pub struct ExtrusionBuffers {
    pub(crate) layer_id: String,
    pub(crate) vertices: Vec<i16>,
    pub(crate) indices: Vec<u16>,
    pub(crate) centroids: Vec<u16>,
    pub(crate) ground_vertices: Vec<i16>,
    pub(crate) ground_indices: Vec<u16>,
    pub(crate) hidden_by_landmark: Vec<u8>,
}

impl ExtrusionBuffers {
    pub fn from_bucket(bucket: &FillExtrusionBucket) -> ExtrusionBuffers {
        let ground = &bucket.ground_effect;
        ExtrusionBuffers {
            layer_id: bucket.layer_id.clone(),
            vertices: bytemuck::cast_slice(&bucket.vertices).to_vec(),
            indices: bytemuck::cast_slice(&bucket.indices).to_vec(),
            centroids: bytemuck::cast_slice(&bucket.centroid_vertices).to_vec(),
            ground_vertices: bytemuck::cast_slice(&ground.vertices).to_vec(),
            ground_indices: bytemuck::cast_slice(&ground.indices).to_vec(),
            hidden_by_landmark: ground.hidden_by_landmark.clone(),
        }
    }
}

#[wasm_bindgen]
impl ExtrusionBuffers {
    #[wasm_bindgen(getter)]
    pub fn layer_id(&self) -> String {
        self.layer_id.clone()
    }

    /// Four i16 per vertex: position and top flag, normal and edge distance
    #[wasm_bindgen(getter)]
    pub fn vertices(&self) -> Vec<i16> {
        self.vertices.clone()
    }

    #[wasm_bindgen(getter)]
    pub fn indices(&self) -> Vec<u16> {
        self.indices.clone()
    }

    /// Two u16 per vertex, parallel to `vertices`
    #[wasm_bindgen(getter)]
    pub fn centroids(&self) -> Vec<u16> {
        self.centroids.clone()
    }

    /// Five i16 per vertex: start, end with flag bits, angular offset
    #[wasm_bindgen(getter)]
    pub fn ground_vertices(&self) -> Vec<i16> {
        self.ground_vertices.clone()
    }

    #[wasm_bindgen(getter)]
    pub fn ground_indices(&self) -> Vec<u16> {
        self.ground_indices.clone()
    }

    #[wasm_bindgen(getter)]
    pub fn hidden_by_landmark(&self) -> Vec<u8> {
        self.hidden_by_landmark.clone()
    }
}
