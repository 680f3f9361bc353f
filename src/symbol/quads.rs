use super::shaping::{AtlasRect, GlyphMap, PositionedIcon, Shaping, IMAGE_PADDING};
use crate::config::WritingMode;
use crate::geometry::rotate_point;
use glam::{Mat2, Vec2};

/// SDF buffer around every glyph bitmap in the atlas
const GLYPH_RECT_BUFFER: f32 = 3.0;

/// Textured quad of one glyph or icon, corners relative to the anchor in pixels
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SymbolQuad {
    pub tl: Vec2,
    pub tr: Vec2,
    pub bl: Vec2,
    pub br: Vec2,
    pub tex: AtlasRect,
    pub writing_mode: Option<WritingMode>,
    /// Glyph position along the line for line-following labels
    pub glyph_offset: Vec2,
}

impl SymbolQuad {
    pub fn corners(&self) -> [Vec2; 4] {
        [self.tl, self.tr, self.bl, self.br]
    }
}

fn rotate_corners(quad: &mut SymbolQuad, angle: f32) {
    if angle == 0.0 {
        return;
    }
    let m = Mat2::from_angle(angle);
    quad.tl = m * quad.tl;
    quad.tr = m * quad.tr;
    quad.bl = m * quad.bl;
    quad.br = m * quad.br;
}

/// Quads of every shaped glyph that has a bitmap
///
/// # Arguments
/// * `shaping` - Laid out text
/// * `glyphs` - Metrics of the shaping's font stack
/// * `text_offset` - `text-offset` in pixels, baked in for labels not along lines
/// * `rotate` - `text-rotate` in radians
/// * `along_line` - Glyphs are positioned along the line at render time
pub fn get_glyph_quads(
    shaping: &Shaping,
    glyphs: &GlyphMap,
    text_offset: [f32; 2],
    rotate: f32,
    along_line: bool,
) -> Vec<SymbolQuad> {
    let mut quads = Vec::with_capacity(shaping.positioned_glyphs.len());

    for positioned in &shaping.positioned_glyphs {
        let Some(glyph) = glyphs.get(&(positioned.glyph as u32)) else {
            continue;
        };
        let Some(rect) = glyph.rect else {
            continue;
        };

        let half_advance = glyph.advance as f32 / 2.0;
        let (glyph_offset, built_in_offset) = if along_line {
            (Vec2::new(positioned.x + half_advance, positioned.y), Vec2::ZERO)
        } else {
            (
                Vec2::ZERO,
                Vec2::new(
                    positioned.x + half_advance + text_offset[0],
                    positioned.y + text_offset[1],
                ),
            )
        };

        let x1 = glyph.left as f32 - GLYPH_RECT_BUFFER - half_advance + built_in_offset.x;
        let y1 = -glyph.top as f32 - GLYPH_RECT_BUFFER + built_in_offset.y;
        let x2 = x1 + rect.w as f32;
        let y2 = y1 + rect.h as f32;

        let mut quad = SymbolQuad {
            tl: Vec2::new(x1, y1),
            tr: Vec2::new(x2, y1),
            bl: Vec2::new(x1, y2),
            br: Vec2::new(x2, y2),
            tex: rect,
            writing_mode: Some(shaping.writing_mode),
            glyph_offset,
        };

        if along_line && positioned.vertical {
            // Rotate upright glyphs a quarter turn around the left edge center of their em box
            let center = Vec2::new(-half_advance, half_advance);
            let angle = -std::f32::consts::FRAC_PI_2;
            let correction = Vec2::new(5.0, 0.0);
            quad.tl = rotate_point(quad.tl, angle, center) + correction;
            quad.tr = rotate_point(quad.tr, angle, center) + correction;
            quad.bl = rotate_point(quad.bl, angle, center) + correction;
            quad.br = rotate_point(quad.br, angle, center) + correction;
        }

        rotate_corners(&mut quad, rotate);
        quads.push(quad);
    }
    quads
}

/// Quad of an icon, grown by the atlas border so edges sample cleanly
pub fn get_icon_quad(icon: &PositionedIcon, rotate: f32) -> SymbolQuad {
    let border = IMAGE_PADDING / icon.image.pixel_ratio;
    let top = icon.top - border;
    let left = icon.left - border;
    let bottom = icon.bottom + border;
    let right = icon.right + border;

    let mut quad = SymbolQuad {
        tl: Vec2::new(left, top),
        tr: Vec2::new(right, top),
        bl: Vec2::new(left, bottom),
        br: Vec2::new(right, bottom),
        tex: icon.image.rect,
        writing_mode: None,
        glyph_offset: Vec2::ZERO,
    };
    rotate_corners(&mut quad, rotate);
    quad
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbol::shaping::{GlyphMetrics, ImagePosition, PositionedGlyph};
    use std::collections::HashMap;

    fn glyph_map() -> GlyphMap {
        let mut map = HashMap::new();
        map.insert(
            'a' as u32,
            GlyphMetrics {
                width: 10,
                height: 14,
                left: 1,
                top: -5,
                advance: 12,
                rect: Some(AtlasRect { x: 4, y: 8, w: 16, h: 20 }),
            },
        );
        map.insert(
            ' ' as u32,
            GlyphMetrics {
                advance: 6,
                ..GlyphMetrics::default()
            },
        );
        map
    }

    fn shaping(glyphs: &[(char, f32)]) -> Shaping {
        Shaping {
            positioned_glyphs: glyphs
                .iter()
                .map(|&(glyph, x)| PositionedGlyph {
                    glyph,
                    x,
                    y: -17.0,
                    vertical: false,
                })
                .collect(),
            text: String::new(),
            top: -14.0,
            bottom: 14.0,
            left: -15.0,
            right: 15.0,
            writing_mode: WritingMode::Horizontal,
        }
    }

    #[test]
    fn test_glyph_quad_corners() {
        let s = shaping(&[('a', -6.0)]);
        let quads = get_glyph_quads(&s, &glyph_map(), [0.0, 0.0], 0.0, false);
        assert_eq!(quads.len(), 1);
        let q = quads[0];
        // left 1 - buffer 3 - half advance 6 + (x -6 + 6)
        assert_eq!(q.tl, Vec2::new(-8.0, 5.0 - 3.0 - 17.0));
        assert_eq!(q.br - q.tl, Vec2::new(16.0, 20.0));
        assert_eq!(q.tex.x, 4);
        assert_eq!(q.glyph_offset, Vec2::ZERO);
    }

    #[test]
    fn test_glyph_without_bitmap_is_skipped() {
        let s = shaping(&[('a', -9.0), (' ', 3.0), ('a', 9.0)]);
        assert_eq!(get_glyph_quads(&s, &glyph_map(), [0.0, 0.0], 0.0, false).len(), 2);
    }

    #[test]
    fn test_line_glyphs_carry_offset() {
        let s = shaping(&[('a', 10.0)]);
        let quads = get_glyph_quads(&s, &glyph_map(), [24.0, 0.0], 0.0, true);
        assert_eq!(quads[0].glyph_offset, Vec2::new(16.0, -17.0));
        // Offset is applied at render time, not baked into corners
        assert_eq!(quads[0].tl.x, -8.0);
    }

    #[test]
    fn test_rotated_icon_quad() {
        let icon = PositionedIcon {
            image: ImagePosition {
                rect: AtlasRect { x: 0, y: 0, w: 12, h: 12 },
                pixel_ratio: 1.0,
                sdf: false,
            },
            top: -5.0,
            bottom: 5.0,
            left: -5.0,
            right: 5.0,
        };
        let q = get_icon_quad(&icon, 0.0);
        assert_eq!(q.tl, Vec2::new(-6.0, -6.0));
        assert_eq!(q.br, Vec2::new(6.0, 6.0));

        let r = get_icon_quad(&icon, std::f32::consts::PI);
        assert!((r.tl - Vec2::new(6.0, 6.0)).length() < 1e-4);
    }
}
