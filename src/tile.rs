use crate::bucket::centroid::{BORDER_BOTTOM, BORDER_LEFT, BORDER_RIGHT, BORDER_TOP};
use crate::bucket::fill_extrusion::FillExtrusionBucket;
use crate::bucket::replacement::ReplacementSource;
use crate::bucket::{Bucket, BucketFeature, PopulateParameters, TileBucket};
use crate::config::{LayerType, StyleLayer};
use crate::error::Result;
use crate::projection::Projection;
use crate::renderer::buffer::BufferCache;
use crate::renderer::context::RenderContext;
use crate::symbol::anchors::RepeatDistanceIndex;
use crate::symbol::collision_feature::CollisionBoxArray;
use crate::symbol::collision_index::CollisionIndex;
use crate::symbol::projection::ViewParameters;
use crate::symbol::shaping::{GlyphAtlas, ImageMap};
use crate::tile_id::OverscaledTileId;
use std::collections::HashMap;

/// Layer name of GeoJSON tiles, which carry a single unnamed layer
pub const GEOJSON_LAYER: &str = "_geojsonTileLayer";

/// Decoded features keyed by source layer name
pub type SourceLayers = HashMap<String, Vec<BucketFeature>>;

/// Parse `{"<source-layer>": [feature, ...]}` and number the features of each layer
pub fn parse_source_layers(json: &str) -> Result<SourceLayers> {
    let mut layers: SourceLayers = serde_json::from_str(json)?;
    for features in layers.values_mut() {
        for (index, feature) in features.iter_mut().enumerate() {
            feature.index = index;
        }
    }
    Ok(layers)
}

/// Same-zoom tile across `side`, wrapping around the antimeridian
pub fn neighbor_id(id: &OverscaledTileId, side: usize) -> Option<OverscaledTileId> {
    let c = id.canonical;
    let last = (1u32 << c.z) - 1;
    let (wrap, x, y) = match side {
        BORDER_LEFT if c.x == 0 => (id.wrap - 1, last, c.y),
        BORDER_LEFT => (id.wrap, c.x - 1, c.y),
        BORDER_RIGHT if c.x == last => (id.wrap + 1, 0, c.y),
        BORDER_RIGHT => (id.wrap, c.x + 1, c.y),
        BORDER_TOP if c.y == 0 => return None,
        BORDER_TOP => (id.wrap, c.x, c.y - 1),
        BORDER_BOTTOM if c.y == last => return None,
        BORDER_BOTTOM => (id.wrap, c.x, c.y + 1),
        _ => return None,
    };
    Some(OverscaledTileId::new(id.overscaled_z, wrap, c.z, x, y))
}

/// Buckets built for one tile and the GPU buffers uploaded for them
pub struct Tile<C: RenderContext> {
    pub id: OverscaledTileId,
    buckets: Vec<TileBucket>,
    caches: Vec<BufferCache<C::Buffer>>,
    /// Collision boxes of every symbol bucket of the tile
    pub collision_boxes: CollisionBoxArray,
}

impl<C: RenderContext> Tile<C> {
    /// Build the buckets of every fill-extrusion and symbol layer visible at the tile's zoom
    ///
    /// A layer that fails to configure is skipped with a warning; the other layers of the
    /// tile are still built.
    pub fn parse(
        id: OverscaledTileId,
        layers: &[&dyn StyleLayer],
        source_layers: &SourceLayers,
        glyphs: &GlyphAtlas,
        images: &ImageMap,
        projection: Projection,
    ) -> Tile<C> {
        let params = PopulateParameters {
            canonical: id.canonical,
            zoom: id.overscaled_z as f32,
            overscaling: id.overscale_factor() as f32,
            projection,
        };
        let mut tile = Tile {
            id,
            buckets: Vec::new(),
            caches: Vec::new(),
            collision_boxes: CollisionBoxArray::new(),
        };
        let mut repeat = RepeatDistanceIndex::new();

        for &layer in layers {
            if !matches!(layer.layer_type(), LayerType::FillExtrusion | LayerType::Symbol) || layer.is_hidden(params.zoom) {
                continue;
            }
            let name = layer.source_layer().unwrap_or(GEOJSON_LAYER);
            let Some(features) = source_layers.get(name) else {
                continue;
            };
            let mut bucket = match TileBucket::for_layer(layer, &params)
                .and_then(|mut b| b.populate(features, layer, &params).map(|_| b))
            {
                Ok(bucket) => bucket,
                Err(err) => {
                    log::warn!("Skipping layer {} in tile {}: {}", layer.id(), id, err);
                    continue;
                }
            };
            if let Some(symbols) = bucket.as_symbol_mut() {
                symbols.perform_layout(glyphs, images, &mut tile.collision_boxes, &mut repeat);
            }
            if !bucket.is_empty() {
                tile.buckets.push(bucket);
            }
        }
        tile
    }

    pub fn buckets(&self) -> &[TileBucket] {
        &self.buckets
    }

    pub fn bucket(&self, layer_id: &str) -> Option<&TileBucket> {
        self.buckets.iter().find(|b| b.layer_id() == layer_id)
    }

    pub fn fill_extrusion(&self, layer_id: &str) -> Option<&FillExtrusionBucket> {
        self.bucket(layer_id).and_then(TileBucket::as_fill_extrusion)
    }

    pub fn buffer_cache(&self, layer_id: &str) -> Option<&BufferCache<C::Buffer>> {
        let index = self.buckets.iter().position(|b| b.layer_id() == layer_id)?;
        self.caches.get(index)
    }

    /// Create missing buffers and refresh the ones whose data changed
    pub fn upload(&mut self, ctx: &C) -> Result<()> {
        self.caches.resize_with(self.buckets.len(), BufferCache::new);
        for (bucket, cache) in self.buckets.iter_mut().zip(&mut self.caches) {
            bucket.upload(ctx, cache)?;
        }
        Ok(())
    }

    pub fn is_uploaded(&self) -> bool {
        self.caches.len() == self.buckets.len() && self.caches.iter().all(BufferCache::is_uploaded)
    }

    pub fn destroy(&mut self, ctx: &C) {
        for (bucket, cache) in self.buckets.iter_mut().zip(&mut self.caches) {
            bucket.destroy(ctx, cache);
        }
        self.caches.clear();
    }

    /// Join buildings split across `side` with `neighbor`, or show them whole without one
    pub fn stitch_border(&mut self, side: usize, mut neighbor: Option<&mut Tile<C>>) {
        for bucket in self.buckets.iter_mut().filter_map(TileBucket::as_fill_extrusion_mut) {
            let other = neighbor.as_deref_mut().and_then(|n| {
                n.buckets
                    .iter_mut()
                    .filter_map(TileBucket::as_fill_extrusion_mut)
                    .find(|b| b.layer_id == bucket.layer_id)
            });
            match other {
                Some(other) => bucket.stitch_border(side, other),
                None => bucket.finish_border(side),
            }
        }
    }

    pub fn update_replacement(&mut self, source: &dyn ReplacementSource) {
        let id = self.id;
        for bucket in self.buckets.iter_mut().filter_map(TileBucket::as_fill_extrusion_mut) {
            bucket.update_replacement(&id, source);
        }
    }

    /// Place the labels of every symbol bucket, topmost layer first
    ///
    /// Returns the number of instances shown.
    pub fn place_symbols(&mut self, index: &mut CollisionIndex, scale: f32) -> usize {
        let boxes = &mut self.collision_boxes;
        self.buckets
            .iter_mut()
            .rev()
            .filter_map(TileBucket::as_symbol_mut)
            .map(|bucket| bucket.place(index, boxes, scale))
            .sum()
    }

    pub fn update_projection(&mut self, view: &ViewParameters) {
        for bucket in self.buckets.iter_mut().filter_map(TileBucket::as_symbol_mut) {
            bucket.update_projection(view);
        }
    }
}
