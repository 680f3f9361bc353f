use super::script::{char_allows_ideographic_breaking, char_has_upright_vertical_orientation, verticalize_punctuation};
use crate::config::{TextAnchor, TextJustify, WritingMode};
use serde::Deserialize;
use std::collections::HashMap;

/// Size of one em in the glyph atlas, in pixels
pub const ONE_EM: f32 = 24.0;

/// Baseline shift that centers horizontal glyphs on the label line
const Y_OFFSET: f32 = -17.0;

/// Region of the glyph or icon atlas
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct AtlasRect {
    pub x: u16,
    pub y: u16,
    pub w: u16,
    pub h: u16,
}

/// Glyph metrics as rasterized into the atlas
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct GlyphMetrics {
    pub width: u32,
    pub height: u32,
    pub left: i32,
    pub top: i32,
    pub advance: u32,
    /// Missing for glyphs without a bitmap (whitespace)
    #[serde(default)]
    pub rect: Option<AtlasRect>,
}

/// Glyphs of one font stack keyed by code point
pub type GlyphMap = HashMap<u32, GlyphMetrics>;

/// Glyph maps keyed by font stack, the stack's fonts joined with ","
pub type GlyphAtlas = HashMap<String, GlyphMap>;

/// Icon as packed into the icon atlas
///
/// `rect` includes a one pixel border on every side.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
pub struct ImagePosition {
    pub rect: AtlasRect,
    #[serde(default = "default_pixel_ratio")]
    pub pixel_ratio: f32,
    #[serde(default)]
    pub sdf: bool,
}

fn default_pixel_ratio() -> f32 {
    1.0
}

pub const IMAGE_PADDING: f32 = 1.0;

impl ImagePosition {
    pub fn display_size(&self) -> [f32; 2] {
        [
            (self.rect.w as f32 - 2.0 * IMAGE_PADDING) / self.pixel_ratio,
            (self.rect.h as f32 - 2.0 * IMAGE_PADDING) / self.pixel_ratio,
        ]
    }
}

pub type ImageMap = HashMap<String, ImagePosition>;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PositionedGlyph {
    pub glyph: char,
    pub x: f32,
    pub y: f32,
    pub vertical: bool,
}

/// Laid out text with its bounding box relative to the anchor
#[derive(Clone, Debug, PartialEq)]
pub struct Shaping {
    pub positioned_glyphs: Vec<PositionedGlyph>,
    pub text: String,
    pub top: f32,
    pub bottom: f32,
    pub left: f32,
    pub right: f32,
    pub writing_mode: WritingMode,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PositionedIcon {
    pub image: ImagePosition,
    pub top: f32,
    pub bottom: f32,
    pub left: f32,
    pub right: f32,
}

fn is_whitespace(c: char) -> bool {
    matches!(c, '\t' | '\n' | '\u{0b}' | '\u{0c}' | '\r' | ' ')
}

fn is_breakable(c: char) -> bool {
    matches!(
        c,
        '\n' | ' '
            | '&'
            | '('
            | ')'
            | '+'
            | '-'
            | '/'
            | '\u{ad}'
            | '\u{b7}'
            | '\u{200b}'
            | '\u{2010}'
            | '\u{2013}'
            | '\u{2027}'
    )
}

fn break_penalty(c: char, next: Option<char>) -> f32 {
    let mut penalty = 0.0;
    if c == '\n' {
        penalty -= 10000.0;
    }
    // Prefer not to break right after an opening or before a closing parenthesis
    if c == '(' || c == '\u{ff08}' {
        penalty += 50.0;
    }
    if next == Some(')') || next == Some('\u{ff09}') {
        penalty += 50.0;
    }
    penalty
}

fn badness(line_width: f32, target_width: f32, penalty: f32, is_last_break: bool) -> f32 {
    let raggedness = (line_width - target_width).powi(2);
    if is_last_break {
        // Favor a shorter last line over a longer one
        if line_width < target_width {
            raggedness / 2.0
        } else {
            raggedness * 2.0
        }
    } else {
        raggedness + penalty.abs() * penalty
    }
}

struct Break {
    index: usize,
    x: f32,
    prior: Option<usize>,
    badness: f32,
}

fn evaluate_break(
    index: usize,
    x: f32,
    target_width: f32,
    breaks: &[Break],
    penalty: f32,
    is_last_break: bool,
) -> Break {
    let mut prior = None;
    let mut best = badness(x, target_width, penalty, is_last_break);
    for (i, candidate) in breaks.iter().enumerate() {
        let b = badness(x - candidate.x, target_width, penalty, is_last_break) + candidate.badness;
        if b <= best {
            prior = Some(i);
            best = b;
        }
    }
    Break {
        index,
        x,
        prior,
        badness: best,
    }
}

fn glyph_advance(glyphs: &GlyphMap, c: char) -> Option<f32> {
    glyphs.get(&(c as u32)).map(|g| g.advance as f32)
}

/// Character indices at which the text is wrapped
///
/// Breaks minimize the squared deviation from an even line width, with penalties for
/// awkward positions and a strong bonus for explicit newlines.
pub fn determine_line_breaks(chars: &[char], spacing: f32, max_width: f32, glyphs: &GlyphMap) -> Vec<usize> {
    if max_width <= 0.0 || chars.is_empty() {
        return Vec::new();
    }

    let total_width: f32 = chars
        .iter()
        .filter_map(|&c| glyph_advance(glyphs, c))
        .map(|advance| advance + spacing)
        .sum();
    let line_count = (total_width / max_width).ceil().max(1.0);
    let target_width = total_width / line_count;

    let mut breaks: Vec<Break> = Vec::new();
    let mut x = 0.0;
    for (i, &c) in chars.iter().enumerate() {
        if let Some(advance) = glyph_advance(glyphs, c) {
            if !is_whitespace(c) {
                x += advance + spacing;
            }
        }
        if i + 1 < chars.len() && (is_breakable(c) || char_allows_ideographic_breaking(c)) {
            let penalty = break_penalty(c, chars.get(i + 1).copied());
            let b = evaluate_break(i + 1, x, target_width, &breaks, penalty, false);
            breaks.push(b);
        }
    }

    let last = evaluate_break(chars.len(), x, target_width, &breaks, 0.0, true);
    let mut result = vec![last.index];
    let mut prior = last.prior;
    while let Some(i) = prior {
        result.push(breaks[i].index);
        prior = breaks[i].prior;
    }
    result.reverse();
    result
}

fn justify_line(glyphs: &mut [PositionedGlyph], glyph_map: &GlyphMap, justify: f32) {
    if justify == 0.0 {
        return;
    }
    let Some(last) = glyphs.last() else {
        return;
    };
    let Some(advance) = glyph_advance(glyph_map, last.glyph) else {
        return;
    };
    let indent = (last.x + advance) * justify;
    for g in glyphs.iter_mut() {
        g.x -= indent;
    }
}

/// Horizontal justification factor: 0 left, 0.5 center, 1 right
fn justify_factor(justify: TextJustify, anchor: TextAnchor) -> f32 {
    match justify {
        TextJustify::Left => 0.0,
        TextJustify::Center => 0.5,
        TextJustify::Right => 1.0,
        TextJustify::Auto => anchor.align().0,
    }
}

/// Text layout parameters, all in atlas pixels
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ShapingOptions {
    /// Zero disables wrapping
    pub max_width: f32,
    pub line_height: f32,
    pub anchor: TextAnchor,
    pub justify: TextJustify,
    pub spacing: f32,
    pub translate: [f32; 2],
    pub writing_mode: WritingMode,
}

/// Lay out `text` with the glyphs of one font stack
///
/// Returns `None` when no character has a glyph.
pub fn shape_text(text: &str, glyphs: &GlyphMap, options: &ShapingOptions) -> Option<Shaping> {
    let text = match options.writing_mode {
        WritingMode::Vertical => verticalize_punctuation(text),
        WritingMode::Horizontal => text.to_string(),
    };
    let chars: Vec<char> = text.chars().collect();
    let breaks = determine_line_breaks(&chars, options.spacing, options.max_width, glyphs);

    let mut lines: Vec<&[char]> = Vec::new();
    let mut start = 0;
    for b in breaks {
        lines.push(&chars[start..b]);
        start = b;
    }
    if start < chars.len() {
        lines.push(&chars[start..]);
    }

    let justify = justify_factor(options.justify, options.anchor);
    let spacing = options.spacing;
    let mut positioned: Vec<PositionedGlyph> = Vec::new();
    let mut y = Y_OFFSET;
    let mut max_line_length: f32 = 0.0;

    for line in &lines {
        let first = line.iter().position(|c| !c.is_whitespace());
        let last = line.iter().rposition(|c| !c.is_whitespace());
        let (Some(first), Some(last)) = (first, last) else {
            y += options.line_height;
            continue;
        };

        let line_start = positioned.len();
        let mut x = 0.0;
        for &c in &line[first..=last] {
            let Some(advance) = glyph_advance(glyphs, c) else {
                continue;
            };
            if options.writing_mode == WritingMode::Vertical && char_has_upright_vertical_orientation(c) {
                positioned.push(PositionedGlyph {
                    glyph: c,
                    x,
                    y: 0.0,
                    vertical: true,
                });
                x += ONE_EM + spacing;
            } else {
                positioned.push(PositionedGlyph {
                    glyph: c,
                    x,
                    y,
                    vertical: false,
                });
                x += advance + spacing;
            }
        }

        if positioned.len() != line_start {
            max_line_length = max_line_length.max(x - spacing);
            justify_line(&mut positioned[line_start..], glyphs, justify);
        }
        y += options.line_height;
    }

    if positioned.is_empty() {
        return None;
    }

    let (horizontal_align, vertical_align) = options.anchor.align();
    let line_count = lines.len() as f32;
    let shift_x = (justify - horizontal_align) * max_line_length;
    let shift_y = (-vertical_align * line_count + 0.5) * options.line_height;
    for g in positioned.iter_mut() {
        g.x += shift_x;
        g.y += shift_y;
    }

    let height = line_count * options.line_height;
    let top = options.translate[1] - vertical_align * height;
    let left = options.translate[0] - horizontal_align * max_line_length;
    Some(Shaping {
        positioned_glyphs: positioned,
        text,
        top,
        bottom: top + height,
        left,
        right: left + max_line_length,
        writing_mode: options.writing_mode,
    })
}

/// Center an icon on its anchor, shifted by `offset` pixels
pub fn shape_icon(image: ImagePosition, offset: [f32; 2]) -> PositionedIcon {
    let [width, height] = image.display_size();
    let left = offset[0] - width / 2.0;
    let top = offset[1] - height / 2.0;
    PositionedIcon {
        image,
        top,
        bottom: top + height,
        left,
        right: left + width,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn glyphs(chars: &str, advance: u32) -> GlyphMap {
        chars
            .chars()
            .map(|c| {
                (
                    c as u32,
                    GlyphMetrics {
                        width: advance - 2,
                        height: 18,
                        left: 1,
                        top: -6,
                        advance,
                        rect: Some(AtlasRect {
                            x: 0,
                            y: 0,
                            w: (advance + 4) as u16,
                            h: 24,
                        }),
                    },
                )
            })
            .collect()
    }

    fn options(max_width: f32) -> ShapingOptions {
        ShapingOptions {
            max_width,
            line_height: 1.2 * ONE_EM,
            anchor: TextAnchor::Center,
            justify: TextJustify::Center,
            spacing: 0.0,
            translate: [0.0, 0.0],
            writing_mode: WritingMode::Horizontal,
        }
    }

    #[test]
    fn test_single_line_is_centered() {
        let map = glyphs("ab ", 10);
        let shaping = shape_text("ab", &map, &options(0.0)).unwrap();
        assert_eq!(shaping.positioned_glyphs.len(), 2);
        assert_eq!(shaping.left, -10.0);
        assert_eq!(shaping.right, 10.0);
        assert_eq!(shaping.positioned_glyphs[0].x, -10.0);
        assert_eq!(shaping.positioned_glyphs[1].x, 0.0);
        assert!((shaping.bottom - shaping.top - 28.8).abs() < 1e-4);
    }

    #[test]
    fn test_wraps_at_max_width() {
        let map = glyphs("abcdefgh ", 10);
        let chars: Vec<char> = "abcd efgh".chars().collect();
        assert_eq!(determine_line_breaks(&chars, 0.0, 50.0, &map), vec![5, 9]);

        let shaping = shape_text("abcd efgh", &map, &options(50.0)).unwrap();
        assert_eq!(shaping.positioned_glyphs.len(), 8);
        let first_y = shaping.positioned_glyphs[0].y;
        let second_y = shaping.positioned_glyphs[4].y;
        assert!((second_y - first_y - 28.8).abs() < 1e-4);
        assert_eq!(shaping.right - shaping.left, 40.0);
    }

    #[test]
    fn test_newline_forces_break() {
        let map = glyphs("ab\n", 10);
        let chars: Vec<char> = "a\nb".chars().collect();
        assert_eq!(determine_line_breaks(&chars, 0.0, 240.0, &map), vec![2, 3]);
    }

    #[test]
    fn test_anchor_and_offset_move_bounds() {
        let map = glyphs("ab", 10);
        let mut opts = options(0.0);
        opts.anchor = TextAnchor::TopLeft;
        opts.translate = [24.0, 12.0];
        let shaping = shape_text("ab", &map, &opts).unwrap();
        assert_eq!(shaping.left, 24.0);
        assert_eq!(shaping.top, 12.0);
    }

    #[test]
    fn test_missing_glyphs() {
        let map = glyphs("a", 10);
        assert!(shape_text("zz", &map, &options(0.0)).is_none());
    }

    #[test]
    fn test_vertical_glyphs() {
        let map = glyphs("東京", 24);
        let mut opts = options(0.0);
        opts.writing_mode = WritingMode::Vertical;
        let shaping = shape_text("東京", &map, &opts).unwrap();
        assert!(shaping.positioned_glyphs.iter().all(|g| g.vertical));
        assert_eq!(shaping.writing_mode, WritingMode::Vertical);
    }

    #[test]
    fn test_shape_icon() {
        let image = ImagePosition {
            rect: AtlasRect { x: 0, y: 0, w: 22, h: 12 },
            pixel_ratio: 1.0,
            sdf: false,
        };
        let icon = shape_icon(image, [5.0, 0.0]);
        assert_eq!(icon.left, -5.0);
        assert_eq!(icon.right, 15.0);
        assert_eq!(icon.top, -5.0);
        assert_eq!(icon.bottom, 5.0);
    }
}
