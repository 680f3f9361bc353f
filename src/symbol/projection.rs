//! Per-frame projection of placed labels along their lines

use super::shaping::ONE_EM;
use crate::bucket::array::SymbolDynamicVertex;
use crate::config::{as_f32, Properties, StyleLayer, WritingMode};
use glam::{IVec2, Mat4, Vec2, Vec3, Vec4};
use std::collections::HashMap;

/// How a symbol size property reaches the projector
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SizeData {
    /// Same size for every feature, evaluated once per tile
    Constant { size: f32 },
    /// Per-feature size stored with every placed symbol
    Source,
}

impl SizeData {
    /// # Arguments
    /// * `layer` - Symbol layer
    /// * `property` - `text-size` or `icon-size`
    /// * `zoom` - Tile zoom; constant sizes are taken one zoom level in
    /// * `default` - Style default of the property
    pub fn new(layer: &dyn StyleLayer, property: &str, zoom: f32, default: f32) -> SizeData {
        if layer.is_layout_feature_constant(property) {
            let size = layer
                .layout_value(property, zoom + 1.0, &Properties::new())
                .as_ref()
                .and_then(as_f32)
                .unwrap_or(default);
            SizeData::Constant { size }
        } else {
            SizeData::Source
        }
    }

    /// Size stored with a placed symbol, in tenths
    pub fn stored_size(&self, feature_size: f32) -> f32 {
        match self {
            SizeData::Constant { .. } => 0.0,
            SizeData::Source => (feature_size * 10.0).round(),
        }
    }

    pub fn evaluate(&self, symbol: &PlacedSymbol) -> f32 {
        match self {
            SizeData::Constant { size } => *size,
            SizeData::Source => symbol.size / 10.0,
        }
    }
}

/// Label written to a bucket's buffers, addressed by the per-frame projector
#[derive(Clone, Debug, PartialEq)]
pub struct PlacedSymbol {
    pub anchor: Vec2,
    /// Segment of the line the anchor lies on; `None` for labels not following a line
    pub segment: Option<usize>,
    /// Range of the symbol's line in the bucket's line vertex array
    pub line_start: usize,
    pub line_length: usize,
    /// Range in the glyph offset array; also the number of quads
    pub glyph_start: usize,
    pub num_glyphs: usize,
    pub vertex_start: usize,
    /// Stored size, see `SizeData::stored_size`
    pub size: f32,
    /// `text-offset` in ems for labels following a line
    pub line_offset: Vec2,
    pub writing_mode: Option<WritingMode>,
    /// Rejected by placement
    pub hidden: bool,
}

/// Matrix from tile units to the plane labels are laid out in
///
/// Labels pitched with the map stay in tile space scaled to pixels; viewport-pitched
/// labels are laid out in screen pixels with y down.
pub fn label_plane_matrix(
    pos_matrix: &Mat4,
    pitch_with_map: bool,
    rotate_with_map: bool,
    angle: f32,
    viewport: Vec2,
    pixels_to_tile_units: f32,
) -> Mat4 {
    if pitch_with_map {
        let m = Mat4::from_scale(Vec3::new(1.0 / pixels_to_tile_units, 1.0 / pixels_to_tile_units, 1.0));
        if rotate_with_map {
            m
        } else {
            m * Mat4::from_rotation_z(angle)
        }
    } else {
        Mat4::from_scale(Vec3::new(viewport.x / 2.0, -viewport.y / 2.0, 1.0))
            * Mat4::from_translation(Vec3::new(1.0, -1.0, 0.0))
            * *pos_matrix
    }
}

/// Matrix from the label plane to clip space
pub fn gl_coord_matrix(
    pos_matrix: &Mat4,
    pitch_with_map: bool,
    rotate_with_map: bool,
    angle: f32,
    viewport: Vec2,
    pixels_to_tile_units: f32,
) -> Mat4 {
    if pitch_with_map {
        let m = *pos_matrix * Mat4::from_scale(Vec3::new(pixels_to_tile_units, pixels_to_tile_units, 1.0));
        if rotate_with_map {
            m
        } else {
            m * Mat4::from_rotation_z(-angle)
        }
    } else {
        Mat4::from_scale(Vec3::new(1.0, -1.0, 1.0))
            * Mat4::from_translation(Vec3::new(-1.0, -1.0, 0.0))
            * Mat4::from_scale(Vec3::new(2.0 / viewport.x, 2.0 / viewport.y, 1.0))
    }
}

/// Projected point and its signed distance from the camera
pub fn project(point: Vec2, matrix: &Mat4) -> (Vec2, f32) {
    let pos = *matrix * Vec4::new(point.x, point.y, 0.0, 1.0);
    (Vec2::new(pos.x / pos.w, pos.y / pos.w), pos.w)
}

/// Anchor inside the viewport grown by `clipping_buffer` (clip space units)
pub fn is_visible(anchor_pos: Vec4, clipping_buffer: Vec2) -> bool {
    let x = anchor_pos.x / anchor_pos.w;
    let y = anchor_pos.y / anchor_pos.w;
    x >= -clipping_buffer.x && x <= clipping_buffer.x && y >= -clipping_buffer.y && y <= clipping_buffer.y
}

fn hide_glyphs(num_glyphs: usize, out: &mut Vec<SymbolDynamicVertex>) {
    let hidden = SymbolDynamicVertex {
        a_projected_pos: [f32::NEG_INFINITY, f32::NEG_INFINITY, 0.0],
    };
    out.extend(std::iter::repeat(hidden).take(num_glyphs * 4));
}

fn add_glyph(out: &mut Vec<SymbolDynamicVertex>, point: Vec2, angle: f32) {
    let v = SymbolDynamicVertex {
        a_projected_pos: [point.x, point.y, angle],
    };
    out.extend([v; 4]);
}

/// View state the projector runs with
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ProjectionParams {
    /// Tile units to clip space
    pub pos_matrix: Mat4,
    pub label_plane_matrix: Mat4,
    pub gl_coord_matrix: Mat4,
    pub viewport: Vec2,
    pub camera_to_center_distance: f32,
    pub pitch_with_map: bool,
    pub keep_upright: bool,
}

/// Camera state of one tile for the current frame
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ViewParameters {
    /// Tile units to clip space
    pub pos_matrix: Mat4,
    /// Map rotation in radians, the negated bearing
    pub angle: f32,
    pub viewport: Vec2,
    pub camera_to_center_distance: f32,
    /// Tile units per screen pixel at the current zoom
    pub pixels_to_tile_units: f32,
}

impl ProjectionParams {
    pub fn new(view: &ViewParameters, pitch_with_map: bool, rotate_with_map: bool, keep_upright: bool) -> ProjectionParams {
        let ViewParameters {
            pos_matrix,
            angle,
            viewport,
            pixels_to_tile_units,
            ..
        } = *view;
        ProjectionParams {
            pos_matrix,
            label_plane_matrix: label_plane_matrix(&pos_matrix, pitch_with_map, rotate_with_map, angle, viewport, pixels_to_tile_units),
            gl_coord_matrix: gl_coord_matrix(&pos_matrix, pitch_with_map, rotate_with_map, angle, viewport, pixels_to_tile_units),
            viewport: view.viewport,
            camera_to_center_distance: view.camera_to_center_distance,
            pitch_with_map,
            keep_upright,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct PlacedGlyph {
    point: Vec2,
    angle: f32,
}

enum Orientation {
    Fits,
    NotEnoughRoom,
    NeedsFlipping,
    UseVertical,
}

/// Walks one symbol's line in the label plane
struct LineWalker<'a> {
    symbol: &'a PlacedSymbol,
    line_vertices: &'a [IVec2],
    label_plane_matrix: &'a Mat4,
    anchor_point: Vec2,
    cache: HashMap<usize, Vec2>,
}

impl<'a> LineWalker<'a> {
    fn vertex(&mut self, index: usize) -> Vec2 {
        if let Some(p) = self.cache.get(&index) {
            return *p;
        }
        let (p, _) = project(self.line_vertices[index].as_vec2(), self.label_plane_matrix);
        self.cache.insert(index, p);
        p
    }

    /// Position of a glyph `offset_x` label-plane pixels along the line from the anchor
    fn place_glyph(&mut self, offset_x: f32, line_offset: Vec2, flip: bool, segment: usize) -> Option<PlacedGlyph> {
        let combined_offset_x = if flip {
            offset_x - line_offset.x
        } else {
            offset_x + line_offset.x
        };
        let mut dir: isize = if combined_offset_x > 0.0 { 1 } else { -1 };
        let mut angle = 0.0;
        if flip {
            dir = -dir;
            angle = std::f32::consts::PI;
        }
        if dir < 0 {
            angle += std::f32::consts::PI;
        }

        let line_start = self.symbol.line_start as isize;
        let line_end = (self.symbol.line_start + self.symbol.line_length) as isize;
        let mut current_index = if dir > 0 {
            line_start + segment as isize
        } else {
            line_start + segment as isize + 1
        };

        let mut current = self.anchor_point;
        let mut prev = self.anchor_point;
        let mut distance_to_prev = 0.0;
        let mut current_segment_distance = 0.0;
        let abs_offset_x = combined_offset_x.abs();

        while distance_to_prev + current_segment_distance <= abs_offset_x {
            current_index += dir;
            // Offset runs past the end of the line
            if current_index < line_start || current_index >= line_end {
                return None;
            }
            prev = current;
            current = self.vertex(current_index as usize);
            distance_to_prev += current_segment_distance;
            current_segment_distance = prev.distance(current);
        }

        let t = (abs_offset_x - distance_to_prev) / current_segment_distance;
        let prev_to_current = current - prev;
        let mut p = prev + prev_to_current * t;
        // Shift off the line by the vertical text offset
        p += prev_to_current.normalize_or_zero().perp() * (line_offset.y * dir as f32);
        let segment_angle = angle + prev_to_current.y.atan2(prev_to_current.x);
        Some(PlacedGlyph {
            point: p,
            angle: segment_angle,
        })
    }
}

fn requires_orientation_change(writing_mode: Option<WritingMode>, first: Vec2, last: Vec2, aspect_ratio: f32) -> Option<Orientation> {
    if writing_mode == Some(WritingMode::Horizontal) {
        let rise = (last.y - first.y).abs();
        let run = (last.x - first.x).abs() * aspect_ratio;
        if rise > run {
            return Some(Orientation::UseVertical);
        }
    }
    let upside_down = if writing_mode == Some(WritingMode::Vertical) {
        first.y < last.y
    } else {
        first.x > last.x
    };
    if upside_down {
        Some(Orientation::NeedsFlipping)
    } else {
        None
    }
}

#[allow(clippy::too_many_arguments)]
fn place_glyphs_along_line(
    walker: &mut LineWalker,
    glyph_offsets: &[f32],
    font_size: f32,
    flip: bool,
    params: &ProjectionParams,
    tile_anchor: Vec2,
    segment: usize,
    out: &mut Vec<SymbolDynamicVertex>,
) -> Orientation {
    let symbol = walker.symbol;
    let font_scale = font_size / ONE_EM;
    let line_offset = symbol.line_offset * font_size;
    let glyphs = &glyph_offsets[symbol.glyph_start..symbol.glyph_start + symbol.num_glyphs];
    let aspect_ratio = params.viewport.x / params.viewport.y;

    let placed: Vec<PlacedGlyph> = if glyphs.len() > 1 {
        // First and last glyph decide the orientation of the whole label
        let first = walker.place_glyph(font_scale * glyphs[0], line_offset, flip, segment);
        let last = walker.place_glyph(font_scale * glyphs[glyphs.len() - 1], line_offset, flip, segment);
        let (Some(first), Some(last)) = (first, last) else {
            return Orientation::NotEnoughRoom;
        };
        if params.keep_upright && !flip {
            let (first_point, _) = project(first.point, &params.gl_coord_matrix);
            let (last_point, _) = project(last.point, &params.gl_coord_matrix);
            if let Some(change) = requires_orientation_change(symbol.writing_mode, first_point, last_point, aspect_ratio) {
                return change;
            }
        }
        let mut placed = Vec::with_capacity(glyphs.len());
        placed.push(first);
        for &offset in &glyphs[1..glyphs.len() - 1] {
            // Both ends fit, so every glyph in between does
            match walker.place_glyph(font_scale * offset, line_offset, flip, segment) {
                Some(glyph) => placed.push(glyph),
                None => return Orientation::NotEnoughRoom,
            }
        }
        placed.push(last);
        placed
    } else {
        if params.keep_upright && !flip {
            let (a, _) = project(tile_anchor, &params.pos_matrix);
            let end_index = symbol.line_start + segment + 1;
            let Some(end) = walker.line_vertices.get(end_index) else {
                return Orientation::NotEnoughRoom;
            };
            let (b, _) = project(end.as_vec2(), &params.pos_matrix);
            if let Some(change) = requires_orientation_change(symbol.writing_mode, a, b, aspect_ratio) {
                return change;
            }
        }
        let Some(&offset) = glyphs.first() else {
            return Orientation::NotEnoughRoom;
        };
        match walker.place_glyph(font_scale * offset, line_offset, flip, segment) {
            Some(glyph) => vec![glyph],
            None => return Orientation::NotEnoughRoom,
        }
    };

    for glyph in placed {
        add_glyph(out, glyph.point, glyph.angle);
    }
    Orientation::Fits
}

/// Rebuild the dynamic vertex array of one bucket's text or icons for the current view
///
/// Writes four vertices per glyph in placed-symbol order. Hidden, off-screen and
/// unplaceable symbols get the off-screen sentinel. A vertical symbol directly follows
/// its horizontal counterpart and is only used when that one runs too steeply.
pub fn update_line_labels(
    symbols: &[PlacedSymbol],
    glyph_offsets: &[f32],
    line_vertices: &[IVec2],
    size: &SizeData,
    params: &ProjectionParams,
    out: &mut Vec<SymbolDynamicVertex>,
) {
    out.clear();
    let clipping_buffer = Vec2::new(256.0 / params.viewport.x * 2.0 + 1.0, 256.0 / params.viewport.y * 2.0 + 1.0);
    let mut use_vertical = false;

    for symbol in symbols {
        if symbol.hidden || (symbol.writing_mode == Some(WritingMode::Vertical) && !use_vertical) {
            hide_glyphs(symbol.num_glyphs, out);
            continue;
        }
        use_vertical = false;

        let anchor_pos = params.pos_matrix * Vec4::new(symbol.anchor.x, symbol.anchor.y, 0.0, 1.0);
        if !is_visible(anchor_pos, clipping_buffer) {
            hide_glyphs(symbol.num_glyphs, out);
            continue;
        }

        let (anchor_point, _) = project(symbol.anchor, &params.label_plane_matrix);
        let Some(segment) = symbol.segment else {
            // Labels not following a line sit on their anchor
            for _ in 0..symbol.num_glyphs {
                add_glyph(out, anchor_point, 0.0);
            }
            continue;
        };

        let perspective_ratio = 0.5 + 0.5 * (anchor_pos.w / params.camera_to_center_distance);
        let font_size = size.evaluate(symbol);
        let pitch_scaled_font_size = if params.pitch_with_map {
            font_size * perspective_ratio
        } else {
            font_size / perspective_ratio
        };

        let mut walker = LineWalker {
            symbol,
            line_vertices,
            label_plane_matrix: &params.label_plane_matrix,
            anchor_point,
            cache: HashMap::new(),
        };

        let start = out.len();
        let unflipped = place_glyphs_along_line(
            &mut walker,
            glyph_offsets,
            pitch_scaled_font_size,
            false,
            params,
            symbol.anchor,
            segment,
            out,
        );
        let hide = match unflipped {
            Orientation::Fits => false,
            Orientation::NotEnoughRoom => true,
            Orientation::UseVertical => {
                use_vertical = true;
                true
            }
            Orientation::NeedsFlipping => !matches!(
                place_glyphs_along_line(
                    &mut walker,
                    glyph_offsets,
                    pitch_scaled_font_size,
                    true,
                    params,
                    symbol.anchor,
                    segment,
                    out,
                ),
                Orientation::Fits
            ),
        };
        if hide {
            out.truncate(start);
            hide_glyphs(symbol.num_glyphs, out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Orthographic view of tile units onto a 4096 pixel viewport
    fn params(keep_upright: bool) -> ProjectionParams {
        let viewport = Vec2::new(4096.0, 4096.0);
        let pos_matrix = Mat4::from_translation(Vec3::new(-1.0, 1.0, 0.0))
            * Mat4::from_scale(Vec3::new(2.0 / 4096.0, -2.0 / 4096.0, 1.0));
        ProjectionParams {
            pos_matrix,
            label_plane_matrix: label_plane_matrix(&pos_matrix, false, false, 0.0, viewport, 1.0),
            gl_coord_matrix: gl_coord_matrix(&pos_matrix, false, false, 0.0, viewport, 1.0),
            viewport,
            camera_to_center_distance: 1.0,
            pitch_with_map: false,
            keep_upright,
        }
    }

    fn symbol(anchor: Vec2, line_length: usize, glyphs: usize) -> PlacedSymbol {
        PlacedSymbol {
            anchor,
            segment: Some(0),
            line_start: 0,
            line_length,
            glyph_start: 0,
            num_glyphs: glyphs,
            vertex_start: 0,
            size: 0.0,
            line_offset: Vec2::ZERO,
            writing_mode: Some(WritingMode::Horizontal),
            hidden: false,
        }
    }

    #[test]
    fn test_matrices_round_trip() {
        let p = params(true);
        let (screen, w) = project(Vec2::new(1024.0, 2048.0), &p.label_plane_matrix);
        assert_eq!(w, 1.0);
        assert!((screen - Vec2::new(1024.0, 2048.0)).length() < 1e-2);

        let (clip, _) = project(screen, &p.gl_coord_matrix);
        let (direct, _) = project(Vec2::new(1024.0, 2048.0), &p.pos_matrix);
        assert!((clip - direct).length() < 1e-5);
    }

    #[test]
    fn test_glyphs_follow_line() {
        let line = vec![IVec2::new(1000, 1000), IVec2::new(2000, 1000)];
        let offsets = vec![-24.0, 0.0, 24.0];
        let mut out = Vec::new();
        update_line_labels(
            &[symbol(Vec2::new(1500.0, 1000.0), 2, 3)],
            &offsets,
            &line,
            &SizeData::Constant { size: 24.0 },
            &params(true),
            &mut out,
        );
        assert_eq!(out.len(), 12);
        let first = out[0].a_projected_pos;
        let last = out[8].a_projected_pos;
        assert!((first[0] - 1476.0).abs() < 0.05);
        assert!((last[0] - 1524.0).abs() < 0.05);
        assert!((first[1] - 1000.0).abs() < 0.05);
        // Glyphs before the anchor walk the line backwards
        assert_eq!(first[2], std::f32::consts::TAU);
        assert_eq!(out[4].a_projected_pos[2], std::f32::consts::TAU);
        assert_eq!(last[2], 0.0);
    }

    #[test]
    fn test_keep_upright_flips_backward_lines() {
        // Line drawn right to left: text would render upside down
        let line = vec![IVec2::new(2000, 1000), IVec2::new(1000, 1000)];
        let offsets = vec![-24.0, 24.0];
        let mut out = Vec::new();
        let s = symbol(Vec2::new(1500.0, 1000.0), 2, 2);
        update_line_labels(&[s.clone()], &offsets, &line, &SizeData::Constant { size: 24.0 }, &params(true), &mut out);
        assert_eq!(out.len(), 8);
        // Flipped: the first glyph lands left of the anchor
        assert!(out[0].a_projected_pos[0] < 1500.0);
        assert!(out[4].a_projected_pos[0] > 1500.0);

        out.clear();
        update_line_labels(&[s], &offsets, &line, &SizeData::Constant { size: 24.0 }, &params(false), &mut out);
        assert!(out[0].a_projected_pos[0] > 1500.0);
    }

    #[test]
    fn test_hidden_and_offscreen_symbols_use_sentinel() {
        let line = vec![IVec2::new(1000, 1000), IVec2::new(2000, 1000)];
        let offsets = vec![0.0];
        let mut hidden = symbol(Vec2::new(1500.0, 1000.0), 2, 1);
        hidden.hidden = true;
        let offscreen = PlacedSymbol {
            anchor: Vec2::new(40000.0, 1000.0),
            ..symbol(Vec2::ZERO, 2, 1)
        };
        let mut out = Vec::new();
        update_line_labels(&[hidden, offscreen], &offsets, &line, &SizeData::Constant { size: 16.0 }, &params(true), &mut out);
        assert_eq!(out.len(), 8);
        assert!(out.iter().all(|v| v.a_projected_pos[0] == f32::NEG_INFINITY && v.a_projected_pos[2] == 0.0));
    }

    #[test]
    fn test_label_longer_than_line_is_hidden() {
        let line = vec![IVec2::new(1000, 1000), IVec2::new(1010, 1000)];
        let offsets = vec![-100.0, 100.0];
        let mut out = Vec::new();
        update_line_labels(
            &[symbol(Vec2::new(1005.0, 1000.0), 2, 2)],
            &offsets,
            &line,
            &SizeData::Constant { size: 24.0 },
            &params(true),
            &mut out,
        );
        assert_eq!(out.len(), 8);
        assert_eq!(out[0].a_projected_pos[0], f32::NEG_INFINITY);
    }

    #[test]
    fn test_source_size_is_stored_in_tenths() {
        let size = SizeData::Source;
        let mut s = symbol(Vec2::ZERO, 0, 0);
        s.size = size.stored_size(13.5);
        assert_eq!(s.size, 135.0);
        assert_eq!(size.evaluate(&s), 13.5);
        assert_eq!(SizeData::Constant { size: 16.0 }.stored_size(13.5), 0.0);
    }
}
