//! Bulk rename templates and localized digits.

use std::fmt;

use compact_str::CompactString;
use serde::{Deserialize, Serialize};

use filemut_core::EngineError;

/// Character that marks the counter in a template.
pub const COUNTER_TOKEN: char = '#';

/// Digit glyphs used to render the counter.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "kebab-case")]
pub enum DigitSet {
    #[default]
    Latin,
    ArabicIndic,
    ExtendedArabicIndic,
    Devanagari,
    Bengali,
    Thai,
    FullWidth,
}

impl DigitSet {
    /// Glyph for zero; the other nine follow it contiguously.
    pub fn zero(self) -> char {
        match self {
            Self::Latin => '0',
            Self::ArabicIndic => '\u{0660}',
            Self::ExtendedArabicIndic => '\u{06F0}',
            Self::Devanagari => '\u{0966}',
            Self::Bengali => '\u{09E6}',
            Self::Thai => '\u{0E50}',
            Self::FullWidth => '\u{FF10}',
        }
    }

    /// Map an ASCII digit to this set.
    pub fn glyph(self, digit: u8) -> char {
        char::from_u32(self.zero() as u32 + u32::from(digit % 10)).unwrap_or('?')
    }

    /// Native digits for a POSIX locale name such as `ar_EG.UTF-8`.
    pub fn from_locale(locale: &str) -> Self {
        let language = locale
            .split(['_', '.', '@', '-'])
            .next()
            .unwrap_or("")
            .to_ascii_lowercase();
        match language.as_str() {
            "ar" => Self::ArabicIndic,
            "fa" | "ps" | "ur" => Self::ExtendedArabicIndic,
            "hi" | "mr" | "ne" | "sa" => Self::Devanagari,
            "bn" | "as" => Self::Bengali,
            "th" => Self::Thai,
            _ => Self::Latin,
        }
    }

    /// Native digits for the current process locale.
    pub fn from_env() -> Self {
        ["LC_ALL", "LC_NUMERIC", "LANG"]
            .iter()
            .filter_map(|var| std::env::var(var).ok())
            .find(|value| !value.is_empty())
            .map(|locale| Self::from_locale(&locale))
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Counter,
}

/// A parsed template: literal text around exactly one counter token.
///
/// `\#` is a literal `#` and `\\` a literal backslash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenameTemplate {
    source: String,
    segments: Vec<Segment>,
}

impl RenameTemplate {
    /// Parse a template.
    pub fn parse(template: &str) -> Result<Self, EngineError> {
        let invalid = |reason: &str| EngineError::TemplateInvalid {
            template: template.to_string(),
            reason: reason.to_string(),
        };

        if template.is_empty() {
            return Err(invalid("template is empty"));
        }
        if template.contains(['/', '\0']) {
            return Err(invalid("template cannot contain '/' or NUL"));
        }

        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut counters = 0;
        let mut chars = template.chars();

        while let Some(c) = chars.next() {
            match c {
                '\\' => match chars.next() {
                    Some(escaped @ ('\\' | COUNTER_TOKEN)) => literal.push(escaped),
                    Some(other) => {
                        literal.push('\\');
                        literal.push(other);
                    }
                    None => return Err(invalid("dangling escape at end of template")),
                },
                COUNTER_TOKEN => {
                    counters += 1;
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Counter);
                }
                _ => literal.push(c),
            }
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        match counters {
            0 => Err(invalid("template has no '#' counter")),
            1 => Ok(Self {
                source: template.to_string(),
                segments,
            }),
            _ => Err(invalid("template has more than one '#' counter")),
        }
    }

    /// The template as written.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Render the name for `number`, left-padding with zeros to `width` digits.
    pub fn render(&self, number: u64, width: usize, digits: DigitSet) -> CompactString {
        let mut name = CompactString::default();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => name.push_str(text),
                Segment::Counter => {
                    let ascii = format!("{:0width$}", number, width = width);
                    name.extend(ascii.bytes().map(|b| digits.glyph(b - b'0')));
                }
            }
        }
        name
    }
}

impl fmt::Display for RenameTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Number of decimal digits in `n`.
pub fn digit_count(n: u64) -> usize {
    n.checked_ilog10().map_or(1, |log| log as usize + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_render() {
        let template = RenameTemplate::parse("Name#").unwrap();
        assert_eq!(template.render(7, 0, DigitSet::Latin), "Name7");
        assert_eq!(template.render(7, 2, DigitSet::Latin), "Name07");

        let template = RenameTemplate::parse("IMG_#_final").unwrap();
        assert_eq!(template.render(12, 3, DigitSet::Latin), "IMG_012_final");
    }

    #[test]
    fn test_escapes() {
        let template = RenameTemplate::parse(r"Track \## of 9").unwrap();
        assert_eq!(template.render(3, 0, DigitSet::Latin), "Track #3 of 9");

        let template = RenameTemplate::parse(r"a\\#").unwrap();
        assert_eq!(template.render(1, 0, DigitSet::Latin), r"a\1");
    }

    #[test]
    fn test_invalid_templates() {
        for bad in ["", "Name", "a#b#", "dir/#", r"#\"] {
            let err = RenameTemplate::parse(bad).unwrap_err();
            assert!(matches!(err, EngineError::TemplateInvalid { .. }), "{:?}", bad);
        }
    }

    #[test]
    fn test_localized_digits() {
        let template = RenameTemplate::parse("#").unwrap();
        assert_eq!(template.render(10, 3, DigitSet::ArabicIndic), "٠١٠");
        assert_eq!(template.render(42, 0, DigitSet::Devanagari), "४२");
        assert_eq!(template.render(5, 0, DigitSet::FullWidth), "５");
    }

    #[test]
    fn test_digits_from_locale() {
        assert_eq!(DigitSet::from_locale("ar_EG.UTF-8"), DigitSet::ArabicIndic);
        assert_eq!(DigitSet::from_locale("fa_IR"), DigitSet::ExtendedArabicIndic);
        assert_eq!(DigitSet::from_locale("th_TH.UTF-8"), DigitSet::Thai);
        assert_eq!(DigitSet::from_locale("en_US.UTF-8"), DigitSet::Latin);
        assert_eq!(DigitSet::from_locale("C"), DigitSet::Latin);
        assert_eq!("arabic-indic".parse::<DigitSet>().unwrap(), DigitSet::ArabicIndic);
    }

    #[test]
    fn test_digit_count() {
        assert_eq!(digit_count(0), 1);
        assert_eq!(digit_count(9), 1);
        assert_eq!(digit_count(10), 2);
        assert_eq!(digit_count(1000), 4);
    }
}
