use core::str::FromStr;

use crate::ShapeError;

/// A per-glyph 32-bit mask. Low bits carry safety flags, the upper bits are
/// allocated to features by the plan compiler.
pub type Mask = u32;

/// A four-byte OpenType tag.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Tag(pub u32);

impl Tag {
    #[inline]
    pub const fn from_bytes(bytes: &[u8; 4]) -> Self {
        Tag(((bytes[0] as u32) << 24)
            | ((bytes[1] as u32) << 16)
            | ((bytes[2] as u32) << 8)
            | (bytes[3] as u32))
    }

    /// Pads a 1..=4 byte string with spaces on the right.
    pub fn from_bytes_lossy(bytes: &[u8]) -> Self {
        let mut arr = [b' '; 4];
        for (dst, src) in arr.iter_mut().zip(bytes.iter().take(4)) {
            *dst = *src;
        }
        Tag::from_bytes(&arr)
    }

    #[inline]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn to_bytes(self) -> [u8; 4] {
        [
            (self.0 >> 24) as u8,
            (self.0 >> 16) as u8,
            (self.0 >> 8) as u8,
            self.0 as u8,
        ]
    }

    pub fn to_lowercase(self) -> Self {
        let b = self.to_bytes();
        Tag::from_bytes(&[
            b[0].to_ascii_lowercase(),
            b[1].to_ascii_lowercase(),
            b[2].to_ascii_lowercase(),
            b[3].to_ascii_lowercase(),
        ])
    }

    pub fn to_uppercase(self) -> Self {
        let b = self.to_bytes();
        Tag::from_bytes(&[
            b[0].to_ascii_uppercase(),
            b[1].to_ascii_uppercase(),
            b[2].to_ascii_uppercase(),
            b[3].to_ascii_uppercase(),
        ])
    }

    pub(crate) const fn null() -> Self {
        Tag(0)
    }
}

impl core::fmt::Debug for Tag {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "Tag({})", self)
    }
}

impl core::fmt::Display for Tag {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        for b in &self.to_bytes() {
            f.write_str((*b as char).encode_utf8(&mut [0; 4]))?;
        }
        Ok(())
    }
}

/// Text direction of a segment.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Direction {
    /// Unset. `shape` resolves it from the script.
    Invalid,
    LeftToRight,
    RightToLeft,
    TopToBottom,
    BottomToTop,
}

impl Direction {
    #[inline]
    pub fn is_horizontal(self) -> bool {
        matches!(self, Direction::LeftToRight | Direction::RightToLeft)
    }

    #[inline]
    pub fn is_vertical(self) -> bool {
        matches!(self, Direction::TopToBottom | Direction::BottomToTop)
    }

    #[inline]
    pub fn is_forward(self) -> bool {
        matches!(self, Direction::LeftToRight | Direction::TopToBottom)
    }

    #[inline]
    pub fn is_backward(self) -> bool {
        matches!(self, Direction::RightToLeft | Direction::BottomToTop)
    }

    #[inline]
    pub fn reverse(self) -> Self {
        match self {
            Direction::Invalid => Direction::Invalid,
            Direction::LeftToRight => Direction::RightToLeft,
            Direction::RightToLeft => Direction::LeftToRight,
            Direction::TopToBottom => Direction::BottomToTop,
            Direction::BottomToTop => Direction::TopToBottom,
        }
    }

    /// Natural horizontal direction of a script.
    pub fn from_script(script: Script) -> Option<Self> {
        // The list of RTL scripts mirrors the Unicode script metadata for
        // horizontal direction.
        match script {
            script::ARABIC
            | script::HEBREW
            | script::SYRIAC
            | script::THAANA
            | script::NKO
            | script::SAMARITAN
            | script::MANDAIC
            | script::IMPERIAL_ARAMAIC
            | script::PHOENICIAN
            | script::LYDIAN
            | script::KHAROSHTHI
            | script::CYPRIOT
            | script::AVESTAN
            | script::INSCRIPTIONAL_PARTHIAN
            | script::INSCRIPTIONAL_PAHLAVI
            | script::PSALTER_PAHLAVI
            | script::OLD_SOUTH_ARABIAN
            | script::OLD_NORTH_ARABIAN
            | script::MANICHAEAN
            | script::HATRAN
            | script::NABATAEAN
            | script::PALMYRENE
            | script::MEROITIC_CURSIVE
            | script::MEROITIC_HIEROGLYPHS
            | script::MENDE_KIKAKUI
            | script::ADLAM
            | script::HANIFI_ROHINGYA
            | script::SOGDIAN
            | script::OLD_SOGDIAN
            | script::ELYMAIC
            | script::CHORASMIAN
            | script::YEZIDI
            | script::OLD_TURKIC => Some(Direction::RightToLeft),
            _ => Some(Direction::LeftToRight),
        }
    }
}

impl Default for Direction {
    fn default() -> Self {
        Direction::Invalid
    }
}

/// A writing script, identified by its ISO 15924 tag.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct Script(pub(crate) Tag);

impl Script {
    #[inline]
    pub(crate) const fn from_bytes(bytes: &[u8; 4]) -> Self {
        Script(Tag::from_bytes(bytes))
    }

    /// Converts an ISO 15924 tag (e.g. `Arab`) into a `Script`.
    pub fn from_iso15924_tag(tag: Tag) -> Option<Self> {
        if tag.as_u32() == 0 {
            return None;
        }

        // Normalize: first char uppercase, rest lowercase.
        let b = tag.to_bytes();
        let tag = Tag::from_bytes(&[
            b[0].to_ascii_uppercase(),
            b[1].to_ascii_lowercase(),
            b[2].to_ascii_lowercase(),
            b[3].to_ascii_lowercase(),
        ]);

        // A few ISO codes are aliases.
        match &tag.to_bytes() {
            b"Qaai" => return Some(script::INHERITED),
            b"Qaac" => return Some(script::COPTIC),
            _ => {}
        }

        Some(Script(tag))
    }

    #[inline]
    pub fn tag(self) -> Tag {
        self.0
    }
}

/// Script constants, named after their Unicode script property values.
pub mod script {
    #![allow(missing_docs)]

    use super::Script;

    pub const COMMON: Script = Script::from_bytes(b"Zyyy");
    pub const INHERITED: Script = Script::from_bytes(b"Zinh");
    pub const UNKNOWN: Script = Script::from_bytes(b"Zzzz");

    pub const ADLAM: Script = Script::from_bytes(b"Adlm");
    pub const ARABIC: Script = Script::from_bytes(b"Arab");
    pub const ARMENIAN: Script = Script::from_bytes(b"Armn");
    pub const AVESTAN: Script = Script::from_bytes(b"Avst");
    pub const BENGALI: Script = Script::from_bytes(b"Beng");
    pub const CHORASMIAN: Script = Script::from_bytes(b"Chrs");
    pub const COPTIC: Script = Script::from_bytes(b"Copt");
    pub const CYPRIOT: Script = Script::from_bytes(b"Cprt");
    pub const CYRILLIC: Script = Script::from_bytes(b"Cyrl");
    pub const DEVANAGARI: Script = Script::from_bytes(b"Deva");
    pub const ELYMAIC: Script = Script::from_bytes(b"Elym");
    pub const GREEK: Script = Script::from_bytes(b"Grek");
    pub const HANIFI_ROHINGYA: Script = Script::from_bytes(b"Rohg");
    pub const HATRAN: Script = Script::from_bytes(b"Hatr");
    pub const HEBREW: Script = Script::from_bytes(b"Hebr");
    pub const IMPERIAL_ARAMAIC: Script = Script::from_bytes(b"Armi");
    pub const INSCRIPTIONAL_PAHLAVI: Script = Script::from_bytes(b"Phli");
    pub const INSCRIPTIONAL_PARTHIAN: Script = Script::from_bytes(b"Prti");
    pub const KHAROSHTHI: Script = Script::from_bytes(b"Khar");
    pub const LATIN: Script = Script::from_bytes(b"Latn");
    pub const LYDIAN: Script = Script::from_bytes(b"Lydi");
    pub const MANDAIC: Script = Script::from_bytes(b"Mand");
    pub const MANICHAEAN: Script = Script::from_bytes(b"Mani");
    pub const MENDE_KIKAKUI: Script = Script::from_bytes(b"Mend");
    pub const MEROITIC_CURSIVE: Script = Script::from_bytes(b"Merc");
    pub const MEROITIC_HIEROGLYPHS: Script = Script::from_bytes(b"Mero");
    pub const MONGOLIAN: Script = Script::from_bytes(b"Mong");
    pub const NABATAEAN: Script = Script::from_bytes(b"Nbat");
    pub const NKO: Script = Script::from_bytes(b"Nkoo");
    pub const OLD_NORTH_ARABIAN: Script = Script::from_bytes(b"Narb");
    pub const OLD_SOGDIAN: Script = Script::from_bytes(b"Sogo");
    pub const OLD_SOUTH_ARABIAN: Script = Script::from_bytes(b"Sarb");
    pub const OLD_TURKIC: Script = Script::from_bytes(b"Orkh");
    pub const PALMYRENE: Script = Script::from_bytes(b"Palm");
    pub const PHAGS_PA: Script = Script::from_bytes(b"Phag");
    pub const PHOENICIAN: Script = Script::from_bytes(b"Phnx");
    pub const PSALTER_PAHLAVI: Script = Script::from_bytes(b"Phlp");
    pub const SAMARITAN: Script = Script::from_bytes(b"Samr");
    pub const SOGDIAN: Script = Script::from_bytes(b"Sogd");
    pub const SYRIAC: Script = Script::from_bytes(b"Syrc");
    pub const THAANA: Script = Script::from_bytes(b"Thaa");
    pub const YEZIDI: Script = Script::from_bytes(b"Yezi");
}

impl Script {
    /// Resolves the script of a single character via its Unicode script
    /// property.
    pub(crate) fn from_char(c: char) -> Script {
        use unicode_script::UnicodeScript;
        let s = c.script();
        Script::from_iso15924_tag(Tag::from_bytes_lossy(s.short_name().as_bytes()))
            .unwrap_or(script::UNKNOWN)
    }
}

/// All OpenType script tags that may select `script` in a font, in
/// preference order. The caller appends `DFLT` and `latn` fallbacks itself.
pub(crate) fn all_tags_from_script(script: Script) -> Vec<Tag> {
    let mut tags = Vec::with_capacity(2);

    // Scripts with a second-generation OpenType tag. For those, the
    // new-style tag is preferred and the old-style tag kept as fallback.
    let new_tag = match script {
        script::BENGALI => Some(Tag::from_bytes(b"bng2")),
        script::DEVANAGARI => Some(Tag::from_bytes(b"dev2")),
        _ => None,
    };
    if let Some(tag) = new_tag {
        tags.push(tag);
    }

    // The vast majority of scripts map to their lowercased ISO 15924 tag.
    tags.push(script.tag().to_lowercase());
    tags
}

pub(crate) const DEFAULT_SCRIPT_TAG: Tag = Tag::from_bytes(b"DFLT");
pub(crate) const LATIN_SCRIPT_TAG: Tag = Tag::from_bytes(b"latn");
pub(crate) const DEFAULT_LANGUAGE_TAG: Tag = Tag::from_bytes(b"dflt");

/// A BCP-47 language tag.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct Language(String);

impl Language {
    pub fn from_string(s: &str) -> Self {
        Language(s.trim().to_ascii_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Looks for a `-x-hb<kind><tag>` private-use subtag and returns the
    /// embedded tag, if any. `kind` is `sc` (script override) or
    /// `ot` (OT language override).
    fn private_use_tag(&self, kind: &str) -> Option<Tag> {
        let ext = self.0.split("-x-").nth(1)?;
        for subtag in ext.split('-') {
            if let Some(rest) = subtag.strip_prefix("hb") {
                if let Some(tag) = rest.strip_prefix(kind) {
                    if !tag.is_empty() && tag.len() <= 4 {
                        return Some(Tag::from_bytes_lossy(tag.as_bytes()));
                    }
                }
            }
        }
        None
    }

    /// `-x-hbsc<tag>`: forces the OT script tag.
    pub(crate) fn script_override(&self) -> Option<Tag> {
        self.private_use_tag("sc")
    }

    /// `-x-hbot<tag>`: forces the OT language-system tag.
    pub(crate) fn ot_override(&self) -> Option<Tag> {
        self.private_use_tag("ot")
    }

    /// The OT language-system tag candidate for this language.
    pub(crate) fn ot_tag(&self) -> Option<Tag> {
        if let Some(tag) = self.ot_override() {
            return Some(tag);
        }

        let primary = self.0.split('-').next()?;
        if primary.is_empty() || primary.len() > 4 || primary == "x" {
            return None;
        }
        Some(Tag::from_bytes_lossy(primary.as_bytes()).to_uppercase())
    }
}

impl Default for Language {
    fn default() -> Self {
        Language::from_string("en")
    }
}

impl FromStr for Language {
    type Err = core::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Language::from_string(s))
    }
}

/// A font feature request: a tag, a value and the cluster range it applies
/// to. The default range is global.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct Feature {
    pub tag: Tag,
    pub value: u32,
    pub start: u32,
    pub end: u32,
}

impl Feature {
    pub fn new(tag: Tag, value: u32, range: impl core::ops::RangeBounds<u32>) -> Self {
        let start = match range.start_bound() {
            core::ops::Bound::Included(&v) => v,
            core::ops::Bound::Excluded(&v) => v + 1,
            core::ops::Bound::Unbounded => 0,
        };
        let end = match range.end_bound() {
            core::ops::Bound::Included(&v) => v.saturating_add(1),
            core::ops::Bound::Excluded(&v) => v,
            core::ops::Bound::Unbounded => u32::MAX,
        };
        Feature { tag, value, start, end }
    }

    #[inline]
    pub(crate) fn is_global(&self) -> bool {
        self.start == 0 && self.end == u32::MAX
    }
}

impl FromStr for Feature {
    type Err = ShapeError;

    /// Parses the common CSS/HarfBuzz syntaxes:
    /// `+tag`, `-tag`, `tag`, `tag=N`, `tag[start:end]`, `tag[start:end]=N`,
    /// plus `on`/`off` as values and optional quoting of the tag.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut p = TextParser::new(s);
        let err = |p: &TextParser| ShapeError::InvalidFeatureString { pos: p.pos() };

        p.skip_spaces();

        let mut value = 1u32;
        let mut explicit_value = false;
        if p.consume_byte(b'+') {
        } else if p.consume_byte(b'-') {
            value = 0;
            explicit_value = true;
        }

        let quote = if p.consume_byte(b'"') {
            Some(b'"')
        } else if p.consume_byte(b'\'') {
            Some(b'\'')
        } else {
            None
        };

        let tag = p.consume_tag().ok_or_else(|| err(&p))?;

        if let Some(q) = quote {
            if !p.consume_byte(q) {
                return Err(err(&p));
            }
        }

        let mut start = 0u32;
        let mut end = u32::MAX;
        p.skip_spaces();
        if p.consume_byte(b'[') {
            start = p.consume_u32().unwrap_or(0);
            if p.consume_byte(b':') {
                end = p.consume_u32().unwrap_or(u32::MAX);
            } else {
                // `tag[N]` means a single-cluster range.
                end = if start == u32::MAX { u32::MAX } else { start + 1 };
            }
            if !p.consume_byte(b']') {
                return Err(err(&p));
            }
        }

        p.skip_spaces();
        if p.consume_byte(b'=') {
            p.skip_spaces();
            if p.consume_word("on") {
                value = 1;
            } else if p.consume_word("off") {
                value = 0;
            } else {
                value = p.consume_u32().ok_or_else(|| err(&p))?;
            }
        } else if !explicit_value && p.consume_word("on") {
            value = 1;
        } else if !explicit_value && p.consume_word("off") {
            value = 0;
        }

        p.skip_spaces();
        if !p.at_end() {
            return Err(err(&p));
        }

        Ok(Feature { tag, value, start, end })
    }
}

/// A variation-axis setting.
#[derive(Clone, Copy, PartialEq, Debug)]
pub struct Variation {
    pub tag: Tag,
    pub value: f32,
}

impl FromStr for Variation {
    type Err = ShapeError;

    /// Parses `axis_tag=value` with a signed decimal value.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut p = TextParser::new(s);
        let err = |p: &TextParser| ShapeError::InvalidVariationString { pos: p.pos() };

        p.skip_spaces();
        let tag = p.consume_tag().ok_or_else(|| err(&p))?;
        p.skip_spaces();
        if !p.consume_byte(b'=') {
            return Err(err(&p));
        }
        p.skip_spaces();
        let value = p.consume_f32().ok_or_else(|| err(&p))?;
        p.skip_spaces();
        if !p.at_end() {
            return Err(err(&p));
        }

        Ok(Variation { tag, value })
    }
}

/// Parses a comma-separated variation list, `axis_tag=value[,axis_tag=value]*`.
pub fn parse_variations(s: &str) -> Result<Vec<Variation>, ShapeError> {
    let mut variations = Vec::new();
    let mut offset = 0;
    for part in s.split(',') {
        variations.push(Variation::from_str(part).map_err(|e| match e {
            ShapeError::InvalidVariationString { pos } => {
                ShapeError::InvalidVariationString { pos: offset + pos }
            }
            other => other,
        })?);
        offset += part.len() + 1;
    }
    Ok(variations)
}

/// A tiny byte-cursor used by the feature and variation parsers.
struct TextParser<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> TextParser<'a> {
    fn new(s: &'a str) -> Self {
        TextParser { data: s.as_bytes(), offset: 0 }
    }

    fn pos(&self) -> usize {
        self.offset
    }

    fn at_end(&self) -> bool {
        self.offset >= self.data.len()
    }

    fn curr(&self) -> Option<u8> {
        self.data.get(self.offset).copied()
    }

    fn skip_spaces(&mut self) {
        while matches!(self.curr(), Some(b' ') | Some(b'\t')) {
            self.offset += 1;
        }
    }

    fn consume_byte(&mut self, b: u8) -> bool {
        if self.curr() == Some(b) {
            self.offset += 1;
            true
        } else {
            false
        }
    }

    fn consume_word(&mut self, word: &str) -> bool {
        if self.data[self.offset..].starts_with(word.as_bytes()) {
            self.offset += word.len();
            true
        } else {
            false
        }
    }

    fn consume_tag(&mut self) -> Option<Tag> {
        let start = self.offset;
        while let Some(c) = self.curr() {
            if self.offset - start < 4 && (c.is_ascii_alphanumeric() || c == b'_') {
                self.offset += 1;
            } else {
                break;
            }
        }

        if self.offset == start {
            return None;
        }
        Some(Tag::from_bytes_lossy(&self.data[start..self.offset]))
    }

    fn consume_u32(&mut self) -> Option<u32> {
        let start = self.offset;
        while matches!(self.curr(), Some(c) if c.is_ascii_digit()) {
            self.offset += 1;
        }
        if self.offset == start {
            return None;
        }
        core::str::from_utf8(&self.data[start..self.offset])
            .ok()?
            .parse()
            .ok()
    }

    fn consume_f32(&mut self) -> Option<f32> {
        let start = self.offset;
        if matches!(self.curr(), Some(b'+') | Some(b'-')) {
            self.offset += 1;
        }
        while matches!(self.curr(), Some(c) if c.is_ascii_digit() || c == b'.') {
            self.offset += 1;
        }
        if self.offset == start {
            return None;
        }
        core::str::from_utf8(&self.data[start..self.offset])
            .ok()?
            .parse()
            .ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(s: &str) -> Tag {
        Tag::from_bytes_lossy(s.as_bytes())
    }

    #[test]
    fn parse_feature_forms() {
        assert_eq!(
            Feature::from_str("kern").unwrap(),
            Feature { tag: t("kern"), value: 1, start: 0, end: u32::MAX }
        );
        assert_eq!(
            Feature::from_str("+kern").unwrap(),
            Feature { tag: t("kern"), value: 1, start: 0, end: u32::MAX }
        );
        assert_eq!(
            Feature::from_str("-liga").unwrap(),
            Feature { tag: t("liga"), value: 0, start: 0, end: u32::MAX }
        );
        assert_eq!(
            Feature::from_str("aalt=2").unwrap(),
            Feature { tag: t("aalt"), value: 2, start: 0, end: u32::MAX }
        );
        assert_eq!(
            Feature::from_str("kern[3:5]").unwrap(),
            Feature { tag: t("kern"), value: 1, start: 3, end: 5 }
        );
        assert_eq!(
            Feature::from_str("kern[3:5]=0").unwrap(),
            Feature { tag: t("kern"), value: 0, start: 3, end: 5 }
        );
        assert_eq!(
            Feature::from_str("'liga' off").unwrap().value,
            0
        );
    }

    #[test]
    fn parse_feature_errors_carry_offsets() {
        match Feature::from_str("") {
            Err(ShapeError::InvalidFeatureString { pos }) => assert_eq!(pos, 0),
            other => panic!("unexpected: {:?}", other),
        }
        assert!(Feature::from_str("kern[3:5").is_err());
        assert!(Feature::from_str("kern=x").is_err());
    }

    #[test]
    fn parse_variation() {
        let v = Variation::from_str("wght=700").unwrap();
        assert_eq!(v.tag, t("wght"));
        assert_eq!(v.value, 700.0);

        let v = Variation::from_str("slnt=-12.5").unwrap();
        assert_eq!(v.value, -12.5);

        let list = parse_variations("wght=700,wdth=85").unwrap();
        assert_eq!(list.len(), 2);

        assert!(Variation::from_str("wght").is_err());
    }

    #[test]
    fn script_tags() {
        assert_eq!(
            Script::from_iso15924_tag(t("arab")).unwrap(),
            script::ARABIC
        );
        assert_eq!(all_tags_from_script(script::ARABIC), vec![t("arab")]);
        assert_eq!(
            all_tags_from_script(script::DEVANAGARI),
            vec![t("dev2"), t("deva")]
        );
    }

    #[test]
    fn language_private_use() {
        let lang = Language::from_string("en-x-hbscdflt");
        assert_eq!(lang.script_override(), Some(t("dflt")));
        assert_eq!(lang.ot_override(), None);

        let lang = Language::from_string("ar-x-hbotARA0-hbscarab");
        assert_eq!(lang.ot_override(), Some(t("ara0")));
        assert_eq!(lang.script_override(), Some(t("arab")));
    }

    #[test]
    fn direction_from_script() {
        assert_eq!(
            Direction::from_script(script::ARABIC),
            Some(Direction::RightToLeft)
        );
        assert_eq!(
            Direction::from_script(script::LATIN),
            Some(Direction::LeftToRight)
        );
    }
}
