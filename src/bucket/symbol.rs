use crate::bucket::array::{SegmentVector, SymbolDynamicVertex, SymbolVertex, TriangleIndexArray};
use crate::bucket::{Bucket, BucketFeature, FeatureKind, PopulateParameters};
use crate::config::{as_f32, Alignment, Properties, StyleLayer, SymbolLayout, SymbolPlacement, WritingMode};
use crate::error::Result;
use crate::geometry::classify::classify_rings;
use crate::geometry::clip::clip_line;
use crate::geometry::polylabel::polylabel;
use crate::geometry::EXTENT;
use crate::renderer::buffer::BufferCache;
use crate::renderer::context::RenderContext;
use crate::symbol::anchors::{get_anchors, get_center_anchor, Anchor, LineAnchorOptions, RepeatDistanceIndex};
use crate::symbol::collision_feature::{CollisionBoxArray, CollisionFeature, LabelBounds};
use crate::symbol::collision_index::CollisionIndex;
use crate::symbol::merge_lines::merge_lines;
use crate::symbol::placement::{place_symbols, Placement, PlacementOptions};
use crate::symbol::projection::{update_line_labels, PlacedSymbol, ProjectionParams, SizeData, ViewParameters};
use crate::symbol::quads::{get_glyph_quads, get_icon_quad, SymbolQuad};
use crate::symbol::script::{allows_letter_spacing, allows_vertical_writing_mode, verticalize_punctuation};
use crate::symbol::shaping::{
    shape_icon, shape_text, GlyphAtlas, GlyphMap, ImageMap, PositionedIcon, Shaping, ShapingOptions, ONE_EM,
};
use crate::symbol::tokens::{resolve_tokens, transform_text};
use crate::symbol::{SymbolFeature, SymbolInstance};
use glam::{IVec2, Vec2};
use std::collections::{BTreeMap, BTreeSet};

/// Zoom at which `text-size` is read for anchor spacing
const MAX_TEXT_SIZE_ZOOM: f32 = 18.0;
const POLYLABEL_PRECISION: f32 = 16.0;

/// Vertex data of the glyphs or the icons of one bucket
#[derive(Clone, Debug, Default)]
pub struct SymbolBuffers {
    pub vertices: Vec<SymbolVertex>,
    pub indices: TriangleIndexArray,
    pub segments: SegmentVector,
    /// Rewritten every frame by the projector
    pub dynamic_vertices: Vec<SymbolDynamicVertex>,
    /// One value per vertex, 1 when placed and 0 when collided
    pub opacity_vertices: Vec<f32>,
    pub placed_symbols: Vec<PlacedSymbol>,
    /// Offset along the line of every quad, in atlas pixels
    pub glyph_offsets: Vec<f32>,
}

impl SymbolBuffers {
    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    /// Append the quads of one label and return its placed symbol index
    #[allow(clippy::too_many_arguments)]
    fn add_symbols(
        &mut self,
        quads: &[SymbolQuad],
        size: f32,
        anchor: Vec2,
        segment: Option<usize>,
        line_offset: Vec2,
        writing_mode: Option<WritingMode>,
        line_start: usize,
        line_length: usize,
    ) -> usize {
        let glyph_start = self.glyph_offsets.len();
        let vertex_start = self.vertices.len();
        let size = size.clamp(0.0, u16::MAX as f32) as u16;

        for quad in quads {
            let segment_index = self.segments.prepare_segment(4, self.vertices.len(), self.indices.len());
            let seg = &mut self.segments[segment_index];
            let index = seg.vertex_length as u16;

            for corner in quad.corners() {
                self.vertices.push(SymbolVertex {
                    a_pos_offset: [
                        anchor.x as i16,
                        anchor.y as i16,
                        (corner.x * 64.0).round() as i16,
                        (corner.y * 64.0).round() as i16,
                    ],
                    a_data: [quad.tex.x, quad.tex.y, size, 0],
                });
                self.dynamic_vertices.push(SymbolDynamicVertex {
                    a_projected_pos: [anchor.x, anchor.y, 0.0],
                });
                self.opacity_vertices.push(0.0);
            }
            self.indices.push([index, index + 1, index + 2]);
            self.indices.push([index + 1, index + 2, index + 3]);
            seg.vertex_length += 4;
            seg.primitive_length += 2;
            self.glyph_offsets.push(quad.glyph_offset.x);
        }

        self.placed_symbols.push(PlacedSymbol {
            anchor,
            segment,
            line_start,
            line_length,
            glyph_start,
            num_glyphs: quads.len(),
            vertex_start,
            size: size as f32,
            line_offset,
            writing_mode,
            hidden: false,
        });
        self.placed_symbols.len() - 1
    }

    fn set_visible(&mut self, symbol_index: usize, visible: bool) {
        let Some(symbol) = self.placed_symbols.get_mut(symbol_index) else {
            return;
        };
        symbol.hidden = !visible;
        let start = symbol.vertex_start;
        let end = (start + symbol.num_glyphs * 4).min(self.opacity_vertices.len());
        let opacity = if visible { 1.0 } else { 0.0 };
        self.opacity_vertices[start..end].fill(opacity);
    }

    fn hide_all(&mut self) {
        for symbol in self.placed_symbols.iter_mut() {
            symbol.hidden = true;
        }
        self.opacity_vertices.fill(0.0);
    }
}

/// Shaped text orientations and icon of one feature
struct ShapedLabel {
    horizontal: Option<Shaping>,
    vertical: Option<Shaping>,
    icon: Option<PositionedIcon>,
}

impl ShapedLabel {
    /// Longest of text and icon, in atlas pixels
    fn length(&self) -> f32 {
        let text = self.horizontal.as_ref().map_or(0.0, |s| s.right - s.left);
        let icon = self.icon.as_ref().map_or(0.0, |i| i.right - i.left);
        text.max(icon)
    }
}

/// Values fixed while adding the instances of one feature
struct FeatureLayout<'a> {
    layout: &'a SymbolLayout,
    feature: &'a SymbolFeature,
    label: &'a ShapedLabel,
    glyphs: &'a GlyphMap,
    text_box_scale: f32,
    icon_box_scale: f32,
    text_padding: f32,
    icon_padding: f32,
}

fn label_bounds(top: f32, bottom: f32, left: f32, right: f32) -> LabelBounds {
    LabelBounds {
        top,
        bottom,
        left,
        right,
    }
}

/// Labels and icons of one symbol layer in one tile
pub struct SymbolBucket {
    pub layer_id: String,
    pub zoom: f32,
    pub overscaling: f32,
    /// Layout evaluated for the tile, feature-independent values only
    pub layout: SymbolLayout,
    pub features: Vec<SymbolFeature>,
    /// Code points needed per font stack
    pub glyph_dependencies: BTreeMap<String, BTreeSet<char>>,
    pub icon_dependencies: BTreeSet<String>,
    pub text_size: SizeData,
    pub icon_size: SizeData,
    text_max_size: f32,

    pub text: SymbolBuffers,
    pub icon: SymbolBuffers,
    /// Lines of every instance, addressed by the placed symbols
    pub line_vertices: Vec<IVec2>,
    pub instances: Vec<SymbolInstance>,
    pub placements: Vec<Placement>,
    pub sdf_icons: bool,
    warned_mixed_icons: bool,

    dynamic_dirty: bool,
    opacity_dirty: bool,
    uploaded: bool,
}

impl SymbolBucket {
    pub fn new(layer: &dyn StyleLayer, params: &PopulateParameters) -> Result<SymbolBucket> {
        let layout = SymbolLayout::evaluate(layer, params.zoom, &Properties::new())?;
        let text_max_size = layer
            .layout_value("text-size", MAX_TEXT_SIZE_ZOOM, &Properties::new())
            .as_ref()
            .and_then(as_f32)
            .unwrap_or(layout.text_size);
        Ok(SymbolBucket {
            layer_id: layer.id().to_string(),
            zoom: params.zoom,
            overscaling: params.overscaling,
            text_size: SizeData::new(layer, "text-size", params.zoom, layout.text_size),
            icon_size: SizeData::new(layer, "icon-size", params.zoom, layout.icon_size),
            layout,
            features: Vec::new(),
            glyph_dependencies: BTreeMap::new(),
            icon_dependencies: BTreeSet::new(),
            text_max_size,
            text: SymbolBuffers::default(),
            icon: SymbolBuffers::default(),
            line_vertices: Vec::new(),
            instances: Vec::new(),
            placements: Vec::new(),
            sdf_icons: false,
            warned_mixed_icons: false,
            dynamic_dirty: false,
            opacity_dirty: false,
            uploaded: false,
        })
    }

    /// Font stack key into the glyph atlas
    pub fn font_stack(&self) -> String {
        self.layout.text_font.join(",")
    }

    fn allows_vertical_text(&self) -> bool {
        self.layout.text_along_line()
            && self.layout.text_keep_upright
            && (self.layout.text_writing_mode.is_empty()
                || self.layout.text_writing_mode.contains(&WritingMode::Vertical))
    }

    fn shape_label(&self, feature: &SymbolFeature, glyphs: &GlyphMap, images: &ImageMap) -> ShapedLabel {
        let layout = &self.layout;
        let (horizontal, vertical) = match feature.text.as_deref() {
            Some(text) => {
                let spacing = if allows_letter_spacing(text) {
                    layout.text_letter_spacing * ONE_EM
                } else {
                    0.0
                };
                let options = ShapingOptions {
                    max_width: if layout.symbol_placement == SymbolPlacement::Point {
                        layout.text_max_width * ONE_EM
                    } else {
                        0.0
                    },
                    line_height: layout.text_line_height * ONE_EM,
                    anchor: layout.text_anchor,
                    justify: layout.text_justify,
                    spacing,
                    translate: [layout.text_offset[0] * ONE_EM, layout.text_offset[1] * ONE_EM],
                    writing_mode: WritingMode::Horizontal,
                };
                let horizontal = shape_text(text, glyphs, &options);
                let vertical = if horizontal.is_some() && self.allows_vertical_text() && allows_vertical_writing_mode(text) {
                    shape_text(
                        text,
                        glyphs,
                        &ShapingOptions {
                            writing_mode: WritingMode::Vertical,
                            ..options
                        },
                    )
                } else {
                    None
                };
                (horizontal, vertical)
            }
            None => (None, None),
        };

        let icon = feature.icon.as_ref().and_then(|name| match images.get(name) {
            Some(image) => Some(shape_icon(*image, layout.icon_offset)),
            None => {
                log::debug!("Missing icon {} in layer {}", name, self.layer_id);
                None
            }
        });

        ShapedLabel {
            horizontal,
            vertical,
            icon,
        }
    }

    /// Shape every feature and create its symbol instances
    ///
    /// Needs the glyphs and icons requested by `populate`. Features whose text and icon
    /// are both unavailable are skipped. Boxes go into the tile's shared array; repeated
    /// text is checked against the tile's shared index.
    pub fn perform_layout(
        &mut self,
        glyphs: &GlyphAtlas,
        images: &ImageMap,
        boxes: &mut CollisionBoxArray,
        repeat: &mut RepeatDistanceIndex,
    ) {
        self.text = SymbolBuffers::default();
        self.icon = SymbolBuffers::default();
        self.line_vertices.clear();
        self.instances.clear();
        self.placements.clear();

        let empty = GlyphMap::new();
        let glyph_map = glyphs.get(&self.font_stack()).unwrap_or(&empty);
        let layout = self.layout.clone();
        let features = std::mem::take(&mut self.features);

        for feature in &features {
            let label = self.shape_label(feature, glyph_map, images);
            if label.horizontal.is_none() && label.icon.is_none() {
                log::debug!(
                    "Skipping feature {:?} in layer {}: no glyphs or icon",
                    feature.id,
                    self.layer_id
                );
                continue;
            }
            if let Some(icon) = &label.icon {
                if self.instances.is_empty() && self.icon.is_empty() {
                    self.sdf_icons = icon.image.sdf;
                } else if icon.image.sdf != self.sdf_icons && !self.warned_mixed_icons {
                    log::warn!("Cannot mix SDF and non-SDF icons in layer {}", self.layer_id);
                    self.warned_mixed_icons = true;
                }
            }
            self.add_feature(&layout, feature, &label, glyph_map, boxes, repeat);
        }

        self.features = features;
        self.dynamic_dirty = true;
        self.opacity_dirty = true;
        log::debug!(
            "Layer {}: {} symbol instances from {} features",
            self.layer_id,
            self.instances.len(),
            self.features.len()
        );
    }

    fn add_feature(
        &mut self,
        layout: &SymbolLayout,
        feature: &SymbolFeature,
        label: &ShapedLabel,
        glyphs: &GlyphMap,
        boxes: &mut CollisionBoxArray,
        repeat: &mut RepeatDistanceIndex,
    ) {
        let tile_pixel_ratio = EXTENT as f32 / (512.0 * self.overscaling);
        let text_max_box_scale = tile_pixel_ratio * self.text_max_size / ONE_EM;
        let symbol_min_distance = tile_pixel_ratio * layout.symbol_spacing;
        let max_angle = layout.text_max_angle.to_radians();
        let repeat_distance = if layout.text_repeat_distance > 0.0 {
            layout.text_repeat_distance * tile_pixel_ratio
        } else {
            symbol_min_distance / 2.0
        };
        let may_overlap = PlacementOptions::from_layout(layout).may_overlap();

        let f = FeatureLayout {
            layout,
            feature,
            label,
            glyphs,
            text_box_scale: tile_pixel_ratio * feature.text_size / ONE_EM,
            icon_box_scale: tile_pixel_ratio * feature.icon_size,
            text_padding: layout.text_padding * tile_pixel_ratio,
            icon_padding: layout.icon_padding * tile_pixel_ratio,
        };

        match (layout.symbol_placement, feature.kind) {
            (SymbolPlacement::Line | SymbolPlacement::LineCenter, _) => {
                let has_text = label.horizontal.is_some();
                let lines = clip_line(&feature.geometry, 0, 0, EXTENT, EXTENT);
                for line in &lines {
                    let anchors = if layout.symbol_placement == SymbolPlacement::LineCenter {
                        let window = if has_text { 3.0 / 5.0 * ONE_EM * text_max_box_scale } else { 0.0 };
                        get_center_anchor(line, max_angle, label.length() * text_max_box_scale, window)
                            .into_iter()
                            .collect()
                    } else {
                        get_anchors(
                            line,
                            &LineAnchorOptions {
                                spacing: symbol_min_distance,
                                max_angle,
                                label_length: label.length(),
                                has_text,
                                glyph_size: ONE_EM,
                                box_scale: text_max_box_scale,
                                overscaling: self.overscaling,
                                tile_extent: EXTENT as f32,
                            },
                        )
                    };
                    for anchor in anchors {
                        if let Some(shaping) = &label.horizontal {
                            if repeat.is_too_close(&shaping.text, repeat_distance, &anchor) {
                                continue;
                            }
                        }
                        self.add_symbol_at_anchor(&f, line, anchor, boxes, may_overlap);
                    }
                }
            }
            (_, FeatureKind::Polygon) => {
                let classified = classify_rings(&feature.geometry, 0);
                for polygon in &classified.polygons {
                    let Some(outer) = polygon.first() else {
                        continue;
                    };
                    let pole = polylabel(polygon, POLYLABEL_PRECISION);
                    self.add_symbol_at_anchor(&f, outer, Anchor::new(pole.x, pole.y, 0.0, None), boxes, may_overlap);
                }
            }
            (_, FeatureKind::LineString) => {
                for line in &feature.geometry {
                    if let Some(first) = line.first() {
                        let anchor = Anchor::new(first.x as f32, first.y as f32, 0.0, None);
                        self.add_symbol_at_anchor(&f, line, anchor, boxes, may_overlap);
                    }
                }
            }
            (_, FeatureKind::Point) => {
                for point in feature.geometry.iter().flatten() {
                    let anchor = Anchor::new(point.x as f32, point.y as f32, 0.0, None);
                    self.add_symbol_at_anchor(&f, &[*point], anchor, boxes, may_overlap);
                }
            }
        }
    }

    fn add_symbol_at_anchor(
        &mut self,
        f: &FeatureLayout,
        line: &[IVec2],
        anchor: Anchor,
        boxes: &mut CollisionBoxArray,
        may_overlap: bool,
    ) {
        let extent = EXTENT as f32;
        let p = anchor.point;
        let inside = p.x >= 0.0 && p.x < extent && p.y >= 0.0 && p.y < extent;
        if f.layout.symbol_avoid_edges && !inside {
            return;
        }
        // Anchors in a neighbor tile are drawn by that tile
        let add_to_buffers = may_overlap || inside;
        self.add_symbol_instance(f, line, anchor, boxes, add_to_buffers);
    }

    fn add_symbol_instance(
        &mut self,
        f: &FeatureLayout,
        line: &[IVec2],
        anchor: Anchor,
        boxes: &mut CollisionBoxArray,
        add_to_buffers: bool,
    ) {
        let layout = f.layout;
        let text_along_line = layout.text_along_line();
        let icon_along_line = layout.icon_rotation_alignment_resolved() == Alignment::Map
            && layout.symbol_placement != SymbolPlacement::Point;

        let line_start = self.line_vertices.len();
        self.line_vertices.extend_from_slice(line);
        let line_length = line.len();

        let mut instance = SymbolInstance {
            anchor,
            feature_index: f.feature.index,
            text_feature: CollisionFeature::default(),
            icon_feature: CollisionFeature::default(),
            horizontal_text: None,
            vertical_text: None,
            icon: None,
        };

        if let Some(horizontal) = &f.label.horizontal {
            if add_to_buffers {
                let text_offset = [layout.text_offset[0] * ONE_EM, layout.text_offset[1] * ONE_EM];
                let rotate = layout.text_rotate.to_radians();
                let size = self.text_size.stored_size(f.feature.text_size);
                let segment = if text_along_line { anchor.segment } else { None };
                let text = &mut self.text;
                let mut add_text = |shaping: &Shaping| -> Option<usize> {
                    let quads = get_glyph_quads(shaping, f.glyphs, text_offset, rotate, text_along_line);
                    if quads.is_empty() {
                        return None;
                    }
                    Some(text.add_symbols(
                        &quads,
                        size,
                        anchor.point,
                        segment,
                        Vec2::from(layout.text_offset),
                        Some(shaping.writing_mode),
                        line_start,
                        line_length,
                    ))
                };
                instance.horizontal_text = add_text(horizontal);
                instance.vertical_text = f.label.vertical.as_ref().and_then(&mut add_text);
            }
            instance.text_feature = CollisionFeature::new(
                boxes,
                line,
                &anchor,
                f.feature.index,
                label_bounds(horizontal.top, horizontal.bottom, horizontal.left, horizontal.right),
                f.text_box_scale,
                f.text_padding,
                text_along_line,
                false,
            );
        }

        if let Some(icon) = &f.label.icon {
            instance.icon_feature = CollisionFeature::new(
                boxes,
                line,
                &anchor,
                f.feature.index,
                label_bounds(icon.top, icon.bottom, icon.left, icon.right),
                f.icon_box_scale,
                f.icon_padding,
                false,
                true,
            );
            if add_to_buffers {
                let quad = get_icon_quad(icon, layout.icon_rotate.to_radians());
                let size = self.icon_size.stored_size(f.feature.icon_size);
                let segment = if icon_along_line { anchor.segment } else { None };
                instance.icon = Some(self.icon.add_symbols(
                    &[quad],
                    size,
                    anchor.point,
                    segment,
                    Vec2::ZERO,
                    None,
                    line_start,
                    line_length,
                ));
            }
        }

        self.instances.push(instance);
    }

    /// Resolve collisions for the current view and rewrite the opacity arrays
    ///
    /// Returns the number of instances showing text or icon at `scale`.
    pub fn place(&mut self, index: &mut CollisionIndex, boxes: &mut CollisionBoxArray, scale: f32) -> usize {
        let options = PlacementOptions::from_layout(&self.layout);
        self.placements = place_symbols(&self.instances, boxes, index, &options, scale);

        self.text.hide_all();
        self.icon.hide_all();
        for (instance, placement) in self.instances.iter().zip(&self.placements) {
            for symbol in [instance.horizontal_text, instance.vertical_text].into_iter().flatten() {
                self.text.set_visible(symbol, placement.text_visible);
            }
            if let Some(symbol) = instance.icon {
                self.icon.set_visible(symbol, placement.icon_visible);
            }
        }
        self.opacity_dirty = true;
        self.placements
            .iter()
            .filter(|p| p.text_visible || p.icon_visible)
            .count()
    }

    /// Reposition glyphs for the current frame
    pub fn update_projection(&mut self, view: &ViewParameters) {
        let text_map = self.layout.text_rotation_alignment_resolved() == Alignment::Map;
        let text_params = ProjectionParams::new(view, text_map, text_map, self.layout.text_keep_upright);
        update_line_labels(
            &self.text.placed_symbols,
            &self.text.glyph_offsets,
            &self.line_vertices,
            &self.text_size,
            &text_params,
            &mut self.text.dynamic_vertices,
        );

        let icon_map = self.layout.icon_rotation_alignment_resolved() == Alignment::Map;
        let icon_params = ProjectionParams::new(view, icon_map, icon_map, self.layout.icon_keep_upright);
        update_line_labels(
            &self.icon.placed_symbols,
            &self.icon.glyph_offsets,
            &self.line_vertices,
            &self.icon_size,
            &icon_params,
            &mut self.icon.dynamic_vertices,
        );
        self.dynamic_dirty = true;
    }
}

fn upload_layout<C: RenderContext>(
    ctx: &C,
    buffers: &SymbolBuffers,
    vertex_slot: &mut Option<C::Buffer>,
    index_slot: &mut Option<C::Buffer>,
) -> Result<()> {
    if buffers.is_empty() {
        return Ok(());
    }
    *vertex_slot = Some(ctx.create_vertex_buffer(bytemuck::cast_slice(&buffers.vertices), false)?);
    *index_slot = Some(ctx.create_index_buffer(bytemuck::cast_slice(&buffers.indices))?);
    Ok(())
}

fn write_dynamic<C: RenderContext>(ctx: &C, slot: &mut Option<C::Buffer>, bytes: &[u8]) -> Result<()> {
    match slot {
        Some(buffer) => ctx.update_vertex_buffer(buffer, bytes),
        None if !bytes.is_empty() => *slot = Some(ctx.create_vertex_buffer(bytes, true)?),
        None => {}
    }
    Ok(())
}

impl Bucket for SymbolBucket {
    fn populate(&mut self, features: &[BucketFeature], layer: &dyn StyleLayer, _params: &PopulateParameters) -> Result<()> {
        let stack = self.font_stack();
        let vertical = self.allows_vertical_text();
        let zoom = self.zoom;
        let mut symbol_features = Vec::with_capacity(features.len());

        for feature in features {
            let layout = match SymbolLayout::evaluate(layer, zoom, &feature.properties) {
                Ok(layout) => layout,
                Err(err) => {
                    log::warn!("Skipping feature {:?} in layer {}: {}", feature.id, self.layer_id, err);
                    continue;
                }
            };
            let text = layout
                .text_field
                .as_deref()
                .map(|field| transform_text(&resolve_tokens(&feature.properties, field), layout.text_transform))
                .filter(|text| !text.is_empty());
            let icon = layout
                .icon_image
                .as_deref()
                .map(|image| resolve_tokens(&feature.properties, image))
                .filter(|icon| !icon.is_empty());
            if text.is_none() && icon.is_none() {
                continue;
            }

            if let Some(text) = &text {
                let dependencies = self.glyph_dependencies.entry(stack.clone()).or_default();
                dependencies.extend(text.chars());
                if vertical && allows_vertical_writing_mode(text) {
                    dependencies.extend(verticalize_punctuation(text).chars());
                }
            }
            if let Some(icon) = &icon {
                self.icon_dependencies.insert(icon.clone());
            }

            let size = |name: &str, default: f32| {
                layer
                    .layout_value(name, zoom + 1.0, &feature.properties)
                    .as_ref()
                    .and_then(as_f32)
                    .unwrap_or(default)
            };
            symbol_features.push(SymbolFeature {
                id: feature.id,
                text,
                icon,
                geometry: feature.geometry.clone(),
                properties: feature.properties.clone(),
                text_size: size("text-size", self.layout.text_size),
                icon_size: size("icon-size", self.layout.icon_size),
                ..SymbolFeature::new(feature.index, feature.kind)
            });
        }

        if self.layout.symbol_placement == SymbolPlacement::Line {
            symbol_features = merge_lines(symbol_features);
        }
        self.features = symbol_features;
        Ok(())
    }

    fn is_empty(&self) -> bool {
        self.text.is_empty() && self.icon.is_empty()
    }

    fn upload<C: RenderContext>(&mut self, ctx: &C, cache: &mut BufferCache<C::Buffer>) -> Result<()> {
        if !self.uploaded {
            upload_layout(ctx, &self.text, &mut cache.layout_vertex_buffer, &mut cache.index_buffer)?;
            upload_layout(ctx, &self.icon, &mut cache.icon_layout_vertex_buffer, &mut cache.icon_index_buffer)?;
            self.dynamic_dirty = true;
            self.opacity_dirty = true;
        }
        if self.dynamic_dirty {
            write_dynamic(ctx, &mut cache.dynamic_vertex_buffer, bytemuck::cast_slice(&self.text.dynamic_vertices))?;
            write_dynamic(ctx, &mut cache.icon_dynamic_vertex_buffer, bytemuck::cast_slice(&self.icon.dynamic_vertices))?;
            self.dynamic_dirty = false;
        }
        if self.opacity_dirty {
            write_dynamic(ctx, &mut cache.opacity_vertex_buffer, bytemuck::cast_slice(&self.text.opacity_vertices))?;
            write_dynamic(ctx, &mut cache.icon_opacity_vertex_buffer, bytemuck::cast_slice(&self.icon.opacity_vertices))?;
            self.opacity_dirty = false;
        }
        self.uploaded = true;
        Ok(())
    }

    fn destroy<C: RenderContext>(&mut self, ctx: &C, cache: &mut BufferCache<C::Buffer>) {
        cache.release(ctx);
        self.uploaded = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LayerConfig;
    use crate::projection::Projection;
    use crate::renderer::context::mock::RecordingContext;
    use crate::symbol::shaping::{AtlasRect, GlyphMetrics, ImagePosition};
    use crate::tile_id::CanonicalTileId;
    use glam::{Mat4, Vec3};
    use serde_json::{json, Value};

    fn layer(layout: Value) -> LayerConfig {
        serde_json::from_value(json!({"id": "labels", "type": "symbol", "layout": layout})).unwrap()
    }

    fn text_layer() -> LayerConfig {
        layer(json!({"text-field": "{name}", "text-font": ["Test"]}))
    }

    fn params() -> PopulateParameters {
        PopulateParameters {
            canonical: CanonicalTileId::new(14, 8192, 5450),
            zoom: 14.0,
            overscaling: 1.0,
            projection: Projection::Mercator,
        }
    }

    fn atlas(chars: &str) -> GlyphAtlas {
        let mut map = GlyphMap::new();
        for (i, c) in chars.chars().enumerate() {
            map.insert(
                c as u32,
                GlyphMetrics {
                    width: 10,
                    height: 12,
                    left: 1,
                    top: -4,
                    advance: 12,
                    rect: Some(AtlasRect {
                        x: (i * 20) as u16,
                        y: 0,
                        w: 16,
                        h: 18,
                    }),
                },
            );
        }
        let mut atlas = GlyphAtlas::new();
        atlas.insert("Test".to_string(), map);
        atlas
    }

    fn feature(index: usize, kind: FeatureKind, properties: Value, geometry: &[&[(i32, i32)]]) -> BucketFeature {
        BucketFeature {
            id: Some(index as u64),
            index,
            kind,
            geometry: geometry
                .iter()
                .map(|line| line.iter().map(|&(x, y)| IVec2::new(x, y)).collect())
                .collect(),
            properties: properties.as_object().cloned().unwrap_or_default(),
        }
    }

    fn point(index: usize, name: &str, x: i32, y: i32) -> BucketFeature {
        feature(index, FeatureKind::Point, json!({"name": name}), &[&[(x, y)]])
    }

    fn build(l: &LayerConfig, features: &[BucketFeature], glyphs: &GlyphAtlas, boxes: &mut CollisionBoxArray) -> SymbolBucket {
        let mut bucket = SymbolBucket::new(l, &params()).unwrap();
        bucket.populate(features, l, &params()).unwrap();
        bucket.perform_layout(glyphs, &ImageMap::new(), boxes, &mut RepeatDistanceIndex::new());
        bucket
    }

    #[test]
    fn test_populate_resolves_text_and_dependencies() {
        let l = layer(json!({"text-field": "{name}", "text-font": ["Test"], "text-transform": "uppercase"}));
        let mut bucket = SymbolBucket::new(&l, &params()).unwrap();
        let features = vec![
            point(0, "Main St", 10, 10),
            point(1, "", 20, 20),
            feature(2, FeatureKind::Point, json!({}), &[&[(30, 30)]]),
        ];
        bucket.populate(&features, &l, &params()).unwrap();
        assert_eq!(bucket.features.len(), 1);
        assert_eq!(bucket.features[0].text.as_deref(), Some("MAIN ST"));
        let dependencies = &bucket.glyph_dependencies["Test"];
        assert!(dependencies.contains(&'M') && dependencies.contains(&' '));
        assert!(!dependencies.contains(&'a'));
    }

    #[test]
    fn test_point_label_buffers() {
        let mut boxes = CollisionBoxArray::new();
        let bucket = build(&text_layer(), &[point(0, "AB", 1000, 1000)], &atlas("AB"), &mut boxes);
        assert_eq!(bucket.instances.len(), 1);
        assert!(bucket.instances[0].has_text());
        assert_eq!(boxes.len(), 1);

        // Four vertices and two triangles per glyph
        assert_eq!(bucket.text.vertices.len(), 8);
        assert_eq!(bucket.text.indices, vec![[0, 1, 2], [1, 2, 3], [4, 5, 6], [5, 6, 7]]);
        assert_eq!(bucket.text.dynamic_vertices.len(), 8);
        assert_eq!(bucket.text.opacity_vertices, vec![0.0; 8]);
        assert_eq!(bucket.text.vertices[0].a_pos_offset[..2], [1000, 1000]);
        assert_eq!(bucket.text.vertices[4].a_data[0], 20);

        let symbol = &bucket.text.placed_symbols[0];
        assert_eq!(symbol.num_glyphs, 2);
        assert_eq!(symbol.segment, None);
        assert!(bucket.icon.is_empty());
    }

    #[test]
    fn test_missing_glyphs_skip_feature() {
        let mut boxes = CollisionBoxArray::new();
        let bucket = build(
            &text_layer(),
            &[point(0, "AB", 1000, 1000), point(1, "XY", 2000, 2000)],
            &atlas("XY"),
            &mut boxes,
        );
        assert_eq!(bucket.instances.len(), 1);
        assert_eq!(bucket.instances[0].feature_index, 1);
    }

    #[test]
    fn test_line_labels_spaced_along_line() {
        let l = layer(json!({"text-field": "{name}", "text-font": ["Test"], "symbol-placement": "line"}));
        let features = vec![feature(
            0,
            FeatureKind::LineString,
            json!({"name": "ABABABAB"}),
            &[&[(100, 2000), (4000, 2000)]],
        )];
        let mut boxes = CollisionBoxArray::new();
        let bucket = build(&l, &features, &atlas("AB"), &mut boxes);

        // Spacing 250 px at 8 tile units per pixel
        assert_eq!(bucket.instances.len(), 2);
        let (a, b) = (bucket.instances[0].anchor.point, bucket.instances[1].anchor.point);
        assert!(a.distance(b) >= 2000.0);
        assert_eq!(bucket.text.placed_symbols[0].segment, Some(0));
        assert_eq!(bucket.line_vertices.len(), 4);
        // Line labels get a chain of boxes
        assert!(bucket.instances[0].text_feature.len() > 1);
    }

    #[test]
    fn test_repeated_text_suppressed_across_lines() {
        let l = layer(json!({"text-field": "{name}", "text-font": ["Test"], "symbol-placement": "line"}));
        let features = vec![
            feature(0, FeatureKind::LineString, json!({"name": "AB"}), &[&[(100, 2000), (4000, 2000)]]),
            feature(1, FeatureKind::LineString, json!({"name": "AB"}), &[&[(100, 2010), (4000, 2010)]]),
        ];
        let mut boxes = CollisionBoxArray::new();
        let bucket = build(&l, &features, &atlas("AB"), &mut boxes);
        assert_eq!(bucket.instances.len(), 2);
        assert!(bucket.instances.iter().all(|i| i.feature_index == 0));
    }

    #[test]
    fn test_icon_only_feature() {
        let l = layer(json!({"icon-image": "{kind}"}));
        let features = vec![feature(0, FeatureKind::Point, json!({"kind": "bus"}), &[&[(500, 500)]])];
        let mut images = ImageMap::new();
        images.insert(
            "bus".to_string(),
            ImagePosition {
                rect: AtlasRect { x: 0, y: 0, w: 22, h: 22 },
                pixel_ratio: 1.0,
                sdf: true,
            },
        );
        let mut bucket = SymbolBucket::new(&l, &params()).unwrap();
        bucket.populate(&features, &l, &params()).unwrap();
        assert!(bucket.icon_dependencies.contains("bus"));

        let mut boxes = CollisionBoxArray::new();
        bucket.perform_layout(&GlyphAtlas::new(), &images, &mut boxes, &mut RepeatDistanceIndex::new());
        assert_eq!(bucket.icon.vertices.len(), 4);
        assert!(bucket.text.is_empty());
        assert!(bucket.instances[0].has_icon());
        assert!(bucket.sdf_icons);
    }

    #[test]
    fn test_place_writes_opacity() {
        let mut boxes = CollisionBoxArray::new();
        let mut bucket = build(
            &text_layer(),
            &[point(0, "AB", 1000, 1000), point(1, "AB", 1000, 1000)],
            &atlas("AB"),
            &mut boxes,
        );
        let mut index = CollisionIndex::flat(0.0);
        assert_eq!(bucket.place(&mut index, &mut boxes, 1.0), 1);
        assert_eq!(bucket.text.opacity_vertices[..8], [1.0; 8]);
        assert_eq!(bucket.text.opacity_vertices[8..], [0.0; 8]);
        assert!(!bucket.text.placed_symbols[0].hidden);
        assert!(bucket.text.placed_symbols[1].hidden);
    }

    #[test]
    fn test_projection_fills_dynamic_vertices() {
        let mut boxes = CollisionBoxArray::new();
        let mut bucket = build(&text_layer(), &[point(0, "AB", 1000, 1000)], &atlas("AB"), &mut boxes);
        let view = ViewParameters {
            pos_matrix: Mat4::from_translation(Vec3::new(-1.0, 1.0, 0.0))
                * Mat4::from_scale(Vec3::new(2.0 / 4096.0, -2.0 / 4096.0, 1.0)),
            angle: 0.0,
            viewport: Vec2::new(4096.0, 4096.0),
            camera_to_center_distance: 1.0,
            pixels_to_tile_units: 1.0,
        };
        bucket.update_projection(&view);
        assert_eq!(bucket.text.dynamic_vertices.len(), bucket.text.vertices.len());
        let pos = bucket.text.dynamic_vertices[0].a_projected_pos;
        assert!((pos[0] - 1000.0).abs() < 0.01 && (pos[1] - 1000.0).abs() < 0.01);
    }

    #[test]
    fn test_upload_and_destroy() {
        let ctx = RecordingContext::default();
        let mut cache = BufferCache::new();
        let mut boxes = CollisionBoxArray::new();
        let mut bucket = build(&text_layer(), &[point(0, "AB", 1000, 1000)], &atlas("AB"), &mut boxes);

        bucket.upload(&ctx, &mut cache).unwrap();
        // Layout, index, dynamic and opacity for text; no icons
        assert_eq!(ctx.live_buffers.get(), 4);
        assert!(cache.icon_layout_vertex_buffer.is_none());

        bucket.place(&mut CollisionIndex::flat(0.0), &mut boxes, 1.0);
        bucket.upload(&ctx, &mut cache).unwrap();
        assert_eq!(ctx.buffer_updates.get(), 1);
        assert_eq!(ctx.live_buffers.get(), 4);

        bucket.destroy(&ctx, &mut cache);
        assert_eq!(ctx.live_buffers.get(), 0);
    }
}
