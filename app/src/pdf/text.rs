//! Text metrics and width-based wrapping. Coordinates are millimeters, font
//! sizes points.

pub(crate) const PT_TO_MM: f32 = 25.4 / 72.0;

pub trait TextMeasure {
    fn width_mm(&self, text: &str, font_size_pt: f32) -> f32;

    fn ascent_mm(&self, font_size_pt: f32) -> f32 {
        font_size_pt * PT_TO_MM * 0.80
    }

    fn descent_mm(&self, font_size_pt: f32) -> f32 {
        font_size_pt * PT_TO_MM * 0.20
    }
}

/// Exact advances from a TrueType face.
pub struct TtfMeasure<'a> {
    face: ttf_parser::Face<'a>,
}

impl<'a> TtfMeasure<'a> {
    pub fn parse(bytes: &'a [u8]) -> Result<Self, ttf_parser::FaceParsingError> {
        Ok(Self {
            face: ttf_parser::Face::parse(bytes, 0)?,
        })
    }
}

impl TextMeasure for TtfMeasure<'_> {
    fn width_mm(&self, text: &str, font_size_pt: f32) -> f32 {
        let units_per_em = self.face.units_per_em() as f32;
        if units_per_em <= 0.0 {
            return 0.0;
        }

        let mut width_units: i32 = 0;
        for ch in text.chars() {
            let Some(gid) = self.face.glyph_index(ch) else {
                continue;
            };
            width_units += self.face.glyph_hor_advance(gid).unwrap_or(0) as i32;
        }

        (width_units as f32 / units_per_em) * font_size_pt * PT_TO_MM
    }

    fn ascent_mm(&self, font_size_pt: f32) -> f32 {
        let units_per_em = self.face.units_per_em() as f32;
        if units_per_em <= 0.0 {
            return font_size_pt * PT_TO_MM * 0.80;
        }
        (self.face.ascender() as f32 / units_per_em) * font_size_pt * PT_TO_MM
    }

    fn descent_mm(&self, font_size_pt: f32) -> f32 {
        let units_per_em = self.face.units_per_em() as f32;
        if units_per_em <= 0.0 {
            return font_size_pt * PT_TO_MM * 0.20;
        }
        // descender is negative in the font tables
        ((-(self.face.descender() as f32)).max(0.0) / units_per_em) * font_size_pt * PT_TO_MM
    }
}

/// Width model for the built-in Helvetica, in 1/1000 em per character class.
/// Slightly generous so wrapped text never overflows its cell.
#[derive(Debug, Clone, Copy, Default)]
pub struct HelveticaMeasure;

fn helvetica_advance(ch: char) -> u32 {
    match ch {
        ' ' => 278,
        'i' | 'j' | 'l' | '.' | ',' | ':' | ';' | '\'' | '!' | '|' => 250,
        'f' | 't' | 'r' | 'I' | '(' | ')' | '[' | ']' | '/' | '-' => 340,
        'm' | 'w' => 833,
        'M' | 'W' | '@' => 900,
        '0'..='9' | '$' => 556,
        c if c.is_uppercase() => 700,
        c if c.is_alphabetic() => 560,
        _ => 600,
    }
}

impl TextMeasure for HelveticaMeasure {
    fn width_mm(&self, text: &str, font_size_pt: f32) -> f32 {
        let units: u32 = text.chars().map(helvetica_advance).sum();
        (units as f32 / 1000.0) * font_size_pt * PT_TO_MM
    }

    fn ascent_mm(&self, font_size_pt: f32) -> f32 {
        font_size_pt * PT_TO_MM * 0.718
    }

    fn descent_mm(&self, font_size_pt: f32) -> f32 {
        font_size_pt * PT_TO_MM * 0.207
    }
}

fn split_long_word(m: &dyn TextMeasure, word: &str, font_size: f32, max_width_mm: f32, out: &mut Vec<String>) -> String {
    let mut chunk = String::new();
    for ch in word.chars() {
        let candidate = format!("{chunk}{ch}");
        if chunk.is_empty() || m.width_mm(&candidate, font_size) <= max_width_mm {
            chunk = candidate;
        } else {
            out.push(std::mem::replace(&mut chunk, ch.to_string()));
        }
    }
    chunk
}

fn wrap_paragraph(m: &dyn TextMeasure, s: &str, font_size: f32, max_width_mm: f32, out: &mut Vec<String>) {
    let mut current = String::new();

    for word in s.split_whitespace() {
        if current.is_empty() {
            if m.width_mm(word, font_size) <= max_width_mm {
                current.push_str(word);
            } else {
                current = split_long_word(m, word, font_size, max_width_mm, out);
            }
            continue;
        }

        let candidate = format!("{current} {word}");
        if m.width_mm(&candidate, font_size) <= max_width_mm {
            current = candidate;
            continue;
        }

        out.push(std::mem::take(&mut current));
        if m.width_mm(word, font_size) <= max_width_mm {
            current.push_str(word);
        } else {
            current = split_long_word(m, word, font_size, max_width_mm, out);
        }
    }

    if !current.is_empty() {
        out.push(current);
    }
}

/// Greedy word wrap to `max_width_mm`. Explicit line breaks are kept, blank
/// lines dropped, and words wider than the box are split by character.
pub fn wrap_text_by_width_mm(m: &dyn TextMeasure, input: &str, font_size: f32, max_width_mm: f32) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for raw in input.lines() {
        let s = raw.trim();
        if s.is_empty() {
            continue;
        }
        wrap_paragraph(m, s, font_size, max_width_mm, &mut out);
    }
    out
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Every character is exactly 1mm wide, independent of size.
    pub(crate) struct FixedMeasure;

    impl TextMeasure for FixedMeasure {
        fn width_mm(&self, text: &str, _font_size_pt: f32) -> f32 {
            text.chars().count() as f32
        }
    }

    #[test]
    fn wraps_on_word_boundaries() {
        let lines = wrap_text_by_width_mm(&FixedMeasure, "kit de vedação completo", 8.0, 10.0);
        assert_eq!(lines, vec!["kit de", "vedação", "completo"]);
    }

    #[test]
    fn splits_words_longer_than_the_box() {
        let lines = wrap_text_by_width_mm(&FixedMeasure, "abcdefghij xy", 8.0, 4.0);
        assert_eq!(lines, vec!["abcd", "efgh", "ij", "xy"]);
    }

    #[test]
    fn keeps_explicit_breaks_and_drops_blank_lines() {
        let lines = wrap_text_by_width_mm(&FixedMeasure, "um\n\n  dois tres \n", 8.0, 40.0);
        assert_eq!(lines, vec!["um", "dois tres"]);
        assert!(wrap_text_by_width_mm(&FixedMeasure, "   ", 8.0, 40.0).is_empty());
    }

    #[test]
    fn helvetica_model_scales_with_size() {
        let m = HelveticaMeasure;
        let w8 = m.width_mm("Retentor 40mm", 8.0);
        let w16 = m.width_mm("Retentor 40mm", 16.0);
        assert!(w8 > 0.0);
        assert!((w16 - 2.0 * w8).abs() < 1e-4);
        assert!(m.width_mm("WWW", 10.0) > m.width_mm("iii", 10.0));
    }
}
