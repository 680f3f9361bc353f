pub mod array;
pub mod centroid;
pub mod fill_extrusion;
pub mod ground_effect;
pub mod program_configuration;
pub mod replacement;
pub mod symbol;

use crate::config::{LayerType, Properties, StyleLayer};
use crate::error::{Error, Result};
use crate::projection::Projection;
use crate::renderer::buffer::BufferCache;
use crate::renderer::context::RenderContext;
use crate::tile_id::CanonicalTileId;
use fill_extrusion::FillExtrusionBucket;
use glam::IVec2;
use serde::Deserialize;
use symbol::SymbolBucket;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
pub enum FeatureKind {
    Point,
    LineString,
    Polygon,
}

/// One decoded source feature
///
/// Geometry is a list of rings (polygons) or lines, in tile units.
#[derive(Clone, Debug, Deserialize)]
pub struct BucketFeature {
    #[serde(default)]
    pub id: Option<u64>,
    /// Position of the feature in its source layer
    #[serde(skip)]
    pub index: usize,
    #[serde(rename = "type")]
    pub kind: FeatureKind,
    pub geometry: Vec<Vec<IVec2>>,
    #[serde(default)]
    pub properties: Properties,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PopulateParameters {
    pub canonical: CanonicalTileId,
    /// Zoom the tile is rendered at, overscaled tiles included
    pub zoom: f32,
    pub overscaling: f32,
    pub projection: Projection,
}

/// Capability set shared by every bucket type
pub trait Bucket {
    fn populate(&mut self, features: &[BucketFeature], layer: &dyn StyleLayer, params: &PopulateParameters) -> Result<()>;
    fn is_empty(&self) -> bool;
    fn upload<C: RenderContext>(&mut self, ctx: &C, cache: &mut BufferCache<C::Buffer>) -> Result<()>;
    fn destroy<C: RenderContext>(&mut self, ctx: &C, cache: &mut BufferCache<C::Buffer>);
}

pub enum TileBucket {
    FillExtrusion(FillExtrusionBucket),
    Symbol(SymbolBucket),
}

impl TileBucket {
    /// Empty bucket matching the layer's type
    pub fn for_layer(layer: &dyn StyleLayer, params: &PopulateParameters) -> Result<TileBucket> {
        match layer.layer_type() {
            LayerType::FillExtrusion => Ok(TileBucket::FillExtrusion(FillExtrusionBucket::new(layer, params))),
            LayerType::Symbol => Ok(TileBucket::Symbol(SymbolBucket::new(layer, params)?)),
            other => Err(Error::InvalidLayer(format!(
                "{}: no bucket for layer type {:?}",
                layer.id(),
                other
            ))),
        }
    }

    pub fn layer_id(&self) -> &str {
        match self {
            TileBucket::FillExtrusion(b) => &b.layer_id,
            TileBucket::Symbol(b) => &b.layer_id,
        }
    }

    pub fn as_fill_extrusion(&self) -> Option<&FillExtrusionBucket> {
        match self {
            TileBucket::FillExtrusion(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_fill_extrusion_mut(&mut self) -> Option<&mut FillExtrusionBucket> {
        match self {
            TileBucket::FillExtrusion(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_symbol_mut(&mut self) -> Option<&mut SymbolBucket> {
        match self {
            TileBucket::Symbol(b) => Some(b),
            _ => None,
        }
    }
}

impl Bucket for TileBucket {
    fn populate(&mut self, features: &[BucketFeature], layer: &dyn StyleLayer, params: &PopulateParameters) -> Result<()> {
        match self {
            TileBucket::FillExtrusion(b) => b.populate(features, layer, params),
            TileBucket::Symbol(b) => b.populate(features, layer, params),
        }
    }

    fn is_empty(&self) -> bool {
        match self {
            TileBucket::FillExtrusion(b) => b.is_empty(),
            TileBucket::Symbol(b) => b.is_empty(),
        }
    }

    fn upload<C: RenderContext>(&mut self, ctx: &C, cache: &mut BufferCache<C::Buffer>) -> Result<()> {
        match self {
            TileBucket::FillExtrusion(b) => b.upload(ctx, cache),
            TileBucket::Symbol(b) => b.upload(ctx, cache),
        }
    }

    fn destroy<C: RenderContext>(&mut self, ctx: &C, cache: &mut BufferCache<C::Buffer>) {
        match self {
            TileBucket::FillExtrusion(b) => b.destroy(ctx, cache),
            TileBucket::Symbol(b) => b.destroy(ctx, cache),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LayerConfig;
    use serde_json::json;

    fn params() -> PopulateParameters {
        PopulateParameters {
            canonical: CanonicalTileId::new(14, 8192, 5450),
            zoom: 14.0,
            overscaling: 1.0,
            projection: Projection::Mercator,
        }
    }

    #[test]
    fn test_parse_feature() {
        let feature: BucketFeature = serde_json::from_value(json!({
            "id": 7,
            "type": "Polygon",
            "geometry": [[[0, 0], [10, 0], [10, 10], [0, 0]]],
            "properties": {"height": 12}
        }))
        .unwrap();
        assert_eq!(feature.kind, FeatureKind::Polygon);
        assert_eq!(feature.geometry[0][2], IVec2::new(10, 10));
        assert_eq!(feature.properties["height"], json!(12));
    }

    #[test]
    fn test_bucket_for_layer_type() {
        let extrusion: LayerConfig = serde_json::from_value(json!({"id": "b", "type": "fill-extrusion"})).unwrap();
        let bucket = TileBucket::for_layer(&extrusion, &params()).unwrap();
        assert!(bucket.as_fill_extrusion().is_some());
        assert!(bucket.is_empty());
        assert_eq!(bucket.layer_id(), "b");

        let fill: LayerConfig = serde_json::from_value(json!({"id": "f", "type": "fill"})).unwrap();
        match TileBucket::for_layer(&fill, &params()) {
            Err(Error::InvalidLayer(_)) => {}
            _ => panic!("Expected InvalidLayer error"),
        }
    }
}
