//! Unicode script properties used by text shaping

fn in_range(c: u32, lo: u32, hi: u32) -> bool {
    c >= lo && c <= hi
}

fn is_arabic(c: u32) -> bool {
    in_range(c, 0x0600, 0x06FF)
        || in_range(c, 0x0750, 0x077F)
        || in_range(c, 0x08A0, 0x08FF)
        || in_range(c, 0xFB50, 0xFDFF)
        || in_range(c, 0xFE70, 0xFEFF)
}

fn is_contextual_indic(c: u32) -> bool {
    // Devanagari through Malayalam join glyphs contextually
    in_range(c, 0x0900, 0x0D7F)
}

fn is_cjk_ideographic_block(c: u32) -> bool {
    in_range(c, 0x2E80, 0x2EFF) // CJK Radicals Supplement
        || in_range(c, 0x2F00, 0x2FDF) // Kangxi Radicals
        || in_range(c, 0x2FF0, 0x2FFF) // Ideographic Description Characters
        || in_range(c, 0x3000, 0x303F) // CJK Symbols and Punctuation
        || in_range(c, 0x3040, 0x309F) // Hiragana
        || in_range(c, 0x30A0, 0x30FF) // Katakana
        || in_range(c, 0x3100, 0x312F) // Bopomofo
        || in_range(c, 0x31A0, 0x31BF) // Bopomofo Extended
        || in_range(c, 0x31C0, 0x31EF) // CJK Strokes
        || in_range(c, 0x31F0, 0x31FF) // Katakana Phonetic Extensions
        || in_range(c, 0x3200, 0x32FF) // Enclosed CJK Letters and Months
        || in_range(c, 0x3300, 0x33FF) // CJK Compatibility
        || in_range(c, 0x3400, 0x4DBF) // CJK Unified Ideographs Extension A
        || in_range(c, 0x4E00, 0x9FFF) // CJK Unified Ideographs
        || in_range(c, 0xA000, 0xA48F) // Yi Syllables
        || in_range(c, 0xA490, 0xA4CF) // Yi Radicals
        || in_range(c, 0xF900, 0xFAFF) // CJK Compatibility Ideographs
        || in_range(c, 0xFE10, 0xFE1F) // Vertical Forms
        || in_range(c, 0xFE30, 0xFE4F) // CJK Compatibility Forms
        || in_range(c, 0xFF00, 0xFFEF) // Halfwidth and Fullwidth Forms
}

fn is_hangul(c: u32) -> bool {
    in_range(c, 0x1100, 0x11FF)
        || in_range(c, 0x3130, 0x318F)
        || in_range(c, 0xA960, 0xA97F)
        || in_range(c, 0xAC00, 0xD7AF)
        || in_range(c, 0xD7B0, 0xD7FF)
}

/// Line breaks are allowed between any two characters of these scripts
pub fn char_allows_ideographic_breaking(c: char) -> bool {
    let c = c as u32;
    c >= 0x2E80 && is_cjk_ideographic_block(c)
}

pub fn char_allows_letter_spacing(c: char) -> bool {
    let c = c as u32;
    !is_arabic(c) && !is_contextual_indic(c)
}

/// Letter spacing breaks scripts whose glyphs join
pub fn allows_letter_spacing(text: &str) -> bool {
    text.chars().all(char_allows_letter_spacing)
}

/// Glyph stays upright when text runs vertically
pub fn char_has_upright_vertical_orientation(c: char) -> bool {
    let c = c as u32;
    if c == 0x02EA || c == 0x02EB {
        return true;
    }
    if c < 0x1100 {
        return false;
    }
    if in_range(c, 0x3000, 0x303F) {
        // Brackets and the wavy dash rotate
        return !(in_range(c, 0x3008, 0x3011) || in_range(c, 0x3014, 0x301F) || c == 0x3030);
    }
    if in_range(c, 0xFE30, 0xFE4F) {
        return !in_range(c, 0xFE49, 0xFE4F);
    }
    if in_range(c, 0x30A0, 0x30FF) {
        return c != 0x30FC;
    }
    if in_range(c, 0xFF00, 0xFFEF) {
        return !(c == 0xFF08
            || c == 0xFF09
            || c == 0xFF0D
            || in_range(c, 0xFF1A, 0xFF1E)
            || c == 0xFF3B
            || c == 0xFF3D
            || c == 0xFF3F
            || in_range(c, 0xFF5B, 0xFFDF)
            || c == 0xFFE3
            || in_range(c, 0xFFE8, 0xFFEF));
    }
    if in_range(c, 0xFE50, 0xFE6F) {
        return !(in_range(c, 0xFE58, 0xFE5E) || in_range(c, 0xFE63, 0xFE66));
    }
    is_cjk_ideographic_block(c)
        || is_hangul(c)
        || in_range(c, 0x3190, 0x319F) // Kanbun
        || in_range(c, 0x1400, 0x167F) // Canadian Aboriginal Syllabics
        || in_range(c, 0x18B0, 0x18FF)
        || in_range(c, 0x4DC0, 0x4DFF) // Yijing Hexagram Symbols
}

fn char_has_neutral_vertical_orientation(c: char) -> bool {
    let c = c as u32;
    matches!(c, 0x00A7 | 0x00A9 | 0x00AE | 0x00B1 | 0x00BC..=0x00BE | 0x00D7 | 0x00F7)
        || in_range(c, 0x2016, 0x2016)
        || in_range(c, 0x2020, 0x2021)
        || in_range(c, 0x2030, 0x2031)
        || in_range(c, 0x203B, 0x203C)
        || in_range(c, 0x2100, 0x218F)
        || in_range(c, 0x2460, 0x24FF)
        || in_range(c, 0x25A0, 0x25FF)
        || in_range(c, 0x2600, 0x26FF)
}

pub fn char_has_rotated_vertical_orientation(c: char) -> bool {
    !(char_has_upright_vertical_orientation(c) || char_has_neutral_vertical_orientation(c))
}

/// Text containing upright glyphs may be laid out vertically along lines
pub fn allows_vertical_writing_mode(text: &str) -> bool {
    text.chars().any(char_has_upright_vertical_orientation)
}

/// Vertical presentation form of a punctuation mark
pub fn vertical_punctuation(c: char) -> Option<char> {
    let v = match c {
        '!' | '！' => '︕',
        '#' => '＃',
        '$' => '＄',
        '%' => '％',
        '&' => '＆',
        '(' | '（' | '｟' => '︵',
        ')' | '）' | '｠' => '︶',
        '*' => '＊',
        '+' => '＋',
        ',' | '，' => '︐',
        '-' | '–' | '－' => '︲',
        '.' | '‧' | '．' => '・',
        '/' => '／',
        ':' | '：' => '︓',
        ';' | '；' => '︔',
        '<' | '〈' | '＜' => '︿',
        '=' => '＝',
        '>' | '〉' | '＞' => '﹀',
        '?' | '？' => '︖',
        '@' => '＠',
        '[' | '［' => '﹇',
        '\\' => '＼',
        ']' | '］' => '﹈',
        '^' => '＾',
        '_' | '＿' => '︳',
        '`' => '｀',
        '{' | '｛' => '︷',
        '|' | '｜' => '―',
        '}' | '｝' => '︸',
        '~' => '～',
        '¢' => '￠',
        '£' => '￡',
        '¥' => '￥',
        '¦' => '￤',
        '¬' => '￢',
        '¯' => '￣',
        '—' => '︱',
        '‘' | '『' => '﹃',
        '’' | '』' => '﹄',
        '“' | '「' | '｢' => '﹁',
        '”' | '」' | '｣' => '﹂',
        '…' => '︙',
        '₩' => '￦',
        '、' => '︑',
        '。' | '｡' => '︒',
        '《' => '︽',
        '》' => '︾',
        '【' => '︻',
        '】' => '︼',
        '〔' => '︹',
        '〕' => '︺',
        '〖' => '︗',
        '〗' => '︘',
        _ => return None,
    };
    Some(v)
}

/// Replace punctuation with vertical forms where both neighbors are upright
pub fn verticalize_punctuation(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let keeps_upright = |c: Option<&char>| match c {
        None => true,
        Some(&c) => !char_has_rotated_vertical_orientation(c) || vertical_punctuation(c).is_some(),
    };
    chars
        .iter()
        .enumerate()
        .map(|(i, &c)| {
            let prev = if i == 0 { None } else { chars.get(i - 1) };
            let next = chars.get(i + 1);
            match vertical_punctuation(c) {
                Some(v) if keeps_upright(prev) && keeps_upright(next) => v,
                _ => c,
            }
        })
        .collect()
}
