//! The read-only font view consumed by the shaping core.

use ttf_parser::GlyphId;

use crate::tables::gsubgpos::{Device, PosTable, SubstTable};

/// Glyph bounding box, in font units.
#[derive(Clone, Copy, Default, PartialEq, Debug)]
pub struct GlyphExtents {
    pub x_bearing: i32,
    pub y_bearing: i32,
    pub width: i32,
    pub height: i32,
}

/// GDEF glyph class.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum GlyphClass {
    Base,
    Ligature,
    Mark,
    Component,
}

/// A read-only view of the font tables the shaper consumes.
///
/// The engine never parses font binaries; implementations present glyph
/// metrics, character mapping, GDEF classifications and pre-parsed GSUB/GPOS
/// structures. Everything except character mapping and horizontal advances
/// has a degraded default, so minimal faces (and test fixtures) stay small.
pub trait Face {
    /// Maps a Unicode scalar value to a glyph.
    fn nominal_glyph(&self, c: u32) -> Option<GlyphId>;

    /// Maps a base character + variation selector pair to a glyph.
    fn variation_glyph(&self, _c: u32, _variation_selector: u32) -> Option<GlyphId> {
        None
    }

    /// Horizontal advance, font units.
    fn glyph_h_advance(&self, glyph: GlyphId) -> i32;

    /// Vertical advance, font units. Negative is downward.
    fn glyph_v_advance(&self, _glyph: GlyphId) -> i32 {
        -i32::from(self.units_per_em())
    }

    /// Horizontal origin adjustment. Zero for virtually all fonts.
    fn glyph_h_origin(&self, _glyph: GlyphId) -> (i32, i32) {
        (0, 0)
    }

    /// Vertical origin adjustment.
    fn glyph_v_origin(&self, _glyph: GlyphId) -> (i32, i32) {
        (0, 0)
    }

    fn glyph_extents(&self, _glyph: GlyphId) -> Option<GlyphExtents> {
        None
    }

    /// GDEF glyph class, if the font carries one.
    fn glyph_class(&self, _glyph: GlyphId) -> Option<GlyphClass> {
        None
    }

    /// Whether the font defines GDEF glyph classes at all. When `false`,
    /// the shaper synthesizes classes from Unicode categories.
    fn has_glyph_classes(&self) -> bool {
        false
    }

    /// GDEF mark-attachment class. Zero means unclassified.
    fn mark_attachment_class(&self, _glyph: GlyphId) -> u16 {
        0
    }

    /// GDEF mark-glyph-set membership.
    fn is_mark_glyph(&self, _glyph: GlyphId, _set_index: u16) -> bool {
        false
    }

    fn gsub(&self) -> Option<&SubstTable> {
        None
    }

    fn gpos(&self) -> Option<&PosTable> {
        None
    }

    fn units_per_em(&self) -> u16 {
        1000
    }

    /// A stable identity for this face. Keys the per-buffer plan cache and
    /// seeds the `rand`-feature PRNG; distinct fonts should return distinct
    /// values.
    fn face_id(&self) -> u64 {
        0
    }

    /// Normalized variation coordinates (F2Dot14 stored in i32), one per
    /// axis. Empty when not variable or not configured.
    fn variation_coordinates(&self) -> &[i32] {
        &[]
    }

    /// Resolves a variation-store delta reference carried by an anchor or
    /// value record, in font units.
    fn variation_delta(&self, _device: Device) -> Option<f32> {
        None
    }
}

/// Adapts a [`ttf_parser::Face`] to the metrics/cmap/GDEF half of [`Face`].
///
/// GSUB/GPOS stay `None`: layout tables reach the engine as the structured
/// model in [`crate::tables::gsubgpos`], produced by an external loader. A
/// `FontFace` on its own still shapes correctly through the fallback paths
/// (nominal glyphs, HMTX advances, extents-based mark placement).
pub struct FontFace<'a> {
    inner: ttf_parser::Face<'a>,
    id: u64,
    coords: Vec<i32>,
}

impl<'a> FontFace<'a> {
    /// Parses a raw font file. `index` selects a face within a collection.
    pub fn from_slice(data: &'a [u8], index: u32) -> Option<Self> {
        let inner = ttf_parser::Face::parse(data, index).ok()?;
        let id = fingerprint(data, index);
        Some(FontFace { inner, id, coords: Vec::new() })
    }

    /// Sets normalized variation coordinates (F2Dot14 in i32, one per axis).
    pub fn set_normalized_variations(&mut self, coords: Vec<i32>) {
        self.coords = coords;
    }

    pub fn inner(&self) -> &ttf_parser::Face<'a> {
        &self.inner
    }
}

fn fingerprint(data: &[u8], index: u32) -> u64 {
    // FNV-1a over a sample of the file; cheap and stable per font binary.
    let mut h: u64 = 0xcbf2_9ce4_8422_2325;
    let mut mix = |b: u8| {
        h ^= u64::from(b);
        h = h.wrapping_mul(0x0000_0100_0000_01b3);
    };
    for b in (data.len() as u64).to_le_bytes() {
        mix(b);
    }
    for b in index.to_le_bytes() {
        mix(b);
    }
    for b in data.iter().take(512) {
        mix(*b);
    }
    for b in data.iter().rev().take(64) {
        mix(*b);
    }
    h
}

impl<'a> Face for FontFace<'a> {
    fn nominal_glyph(&self, c: u32) -> Option<GlyphId> {
        self.inner.glyph_index(char::from_u32(c)?)
    }

    fn variation_glyph(&self, c: u32, variation_selector: u32) -> Option<GlyphId> {
        self.inner
            .glyph_variation_index(char::from_u32(c)?, char::from_u32(variation_selector)?)
    }

    fn glyph_h_advance(&self, glyph: GlyphId) -> i32 {
        self.inner
            .glyph_hor_advance(glyph)
            .map(i32::from)
            .unwrap_or(0)
    }

    fn glyph_v_advance(&self, glyph: GlyphId) -> i32 {
        match self.inner.glyph_ver_advance(glyph) {
            Some(advance) => -i32::from(advance),
            None => -i32::from(self.units_per_em()),
        }
    }

    fn glyph_v_origin(&self, glyph: GlyphId) -> (i32, i32) {
        let x = self.glyph_h_advance(glyph) / 2;
        let y = self
            .inner
            .glyph_y_origin(glyph)
            .map(i32::from)
            .unwrap_or_else(|| i32::from(self.inner.ascender()));
        (x, y)
    }

    fn glyph_extents(&self, glyph: GlyphId) -> Option<GlyphExtents> {
        let bbox = self.inner.glyph_bounding_box(glyph)?;
        Some(GlyphExtents {
            x_bearing: i32::from(bbox.x_min),
            y_bearing: i32::from(bbox.y_max),
            width: i32::from(bbox.x_max) - i32::from(bbox.x_min),
            height: i32::from(bbox.y_min) - i32::from(bbox.y_max),
        })
    }

    fn glyph_class(&self, glyph: GlyphId) -> Option<GlyphClass> {
        let gdef = self.inner.tables().gdef?;
        match gdef.glyph_class(glyph)? {
            ttf_parser::gdef::GlyphClass::Base => Some(GlyphClass::Base),
            ttf_parser::gdef::GlyphClass::Ligature => Some(GlyphClass::Ligature),
            ttf_parser::gdef::GlyphClass::Mark => Some(GlyphClass::Mark),
            ttf_parser::gdef::GlyphClass::Component => Some(GlyphClass::Component),
        }
    }

    fn has_glyph_classes(&self) -> bool {
        self.inner.tables().gdef.is_some()
    }

    fn mark_attachment_class(&self, glyph: GlyphId) -> u16 {
        self.inner
            .tables()
            .gdef
            .map(|gdef| gdef.glyph_mark_attachment_class(glyph))
            .unwrap_or(0)
    }

    fn is_mark_glyph(&self, glyph: GlyphId, set_index: u16) -> bool {
        self.inner
            .tables()
            .gdef
            .map(|gdef| gdef.is_mark_glyph(glyph, Some(set_index)))
            .unwrap_or(false)
    }

    fn units_per_em(&self) -> u16 {
        self.inner.units_per_em()
    }

    fn face_id(&self) -> u64 {
        self.id
    }

    fn variation_coordinates(&self) -> &[i32] {
        &self.coords
    }
}
