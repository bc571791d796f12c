//! Font-aware normalization: decompose where the font can render the
//! pieces, sort marks by modified combining class, then recompose what the
//! font prefers composed.

use crate::buffer::{Buffer, BufferScratchFlags};
use crate::face::Face;
use crate::plan::ShapePlan;
use crate::unicode;

const MAX_COMBINING_MARKS: usize = 32;

/// Normalization policy, chosen by the selected shaper.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum ShapeNormalizationMode {
    /// Skip normalization entirely.
    None,
    /// Decompose when every decomposed rune has a glyph, otherwise keep the
    /// composed form; recompose starter+mark pairs the font can render.
    #[default]
    Auto,
}

/// Carried through the normalizer so shaper hooks can see the plan and the
/// face.
pub struct ShapeNormalizeContext<'a> {
    pub plan: &'a ShapePlan,
    pub face: &'a dyn Face,
}

impl<'a> ShapeNormalizeContext<'a> {
    fn compose(&self, a: char, b: char) -> Option<char> {
        if let Some(hook) = self.plan.shaper.compose {
            return hook(self, a, b);
        }
        unicode::compose(a, b)
    }

    fn decompose(&self, c: char, out: &mut Vec<char>) -> bool {
        if let Some(hook) = self.plan.shaper.decompose {
            if let Some((a, b)) = hook(self, c) {
                // Recurse on the first half; hooks return single-level
                // decompositions.
                let before = out.len();
                if !self.decompose(a, out) {
                    out.truncate(before);
                    out.push(a);
                }
                out.push(b);
                return true;
            }
        }
        unicode::decompose_full(c, out)
    }

    fn has_glyph(&self, c: char) -> bool {
        self.face.nominal_glyph(c as u32).is_some()
    }
}

pub(crate) fn normalize(plan: &ShapePlan, face: &dyn Face, buffer: &mut Buffer) {
    if buffer.len == 0 {
        return;
    }

    let mode = plan.shaper.normalization_mode;
    if mode == ShapeNormalizationMode::None {
        return;
    }

    let ctx = ShapeNormalizeContext { plan, face };

    decompose_pass(&ctx, buffer);
    reorder_marks_pass(plan, buffer);
    recompose_pass(&ctx, buffer);
}

fn decompose_pass(ctx: &ShapeNormalizeContext, buffer: &mut Buffer) {
    buffer.clear_output();
    let mut decomposed: Vec<char> = Vec::new();

    while buffer.idx < buffer.len && !buffer.in_error() {
        let info = *buffer.cur(0);
        let u = info.as_char();

        // Never split a variation-selector cluster; the cmap lookup will
        // consume the pair.
        if buffer.idx + 1 < buffer.len
            && unicode::is_variation_selector(buffer.cur(1).codepoint)
        {
            buffer.next_glyph();
            buffer.next_glyph();
            continue;
        }

        decomposed.clear();
        if ctx.decompose(u, &mut decomposed)
            && decomposed.iter().all(|c| ctx.has_glyph(*c))
        {
            let glyphs: Vec<u32> = decomposed.iter().map(|c| *c as u32).collect();
            buffer.replace_glyphs(1, glyphs.len(), &glyphs);
            // The replacements need fresh per-rune properties.
            let start = buffer.out_len - glyphs.len();
            let mut scratch = buffer.scratch_flags;
            for i in start..buffer.out_len {
                buffer.info[i].init_unicode_props(&mut scratch);
            }
            buffer.scratch_flags = scratch;
            continue;
        }

        if ctx.has_glyph(u) {
            buffer.next_glyph();
            continue;
        }

        // Fallbacks for runes the font cannot render directly.
        if let Some(space) = unicode::space_fallback(info.codepoint) {
            if info.codepoint != 0x0020 && ctx.has_glyph(' ') {
                buffer.replace_glyph(0x0020);
                let prev = buffer.out_len - 1;
                set_space_fallback(buffer, prev, space);
                buffer.scratch_flags |= BufferScratchFlags::HAS_SPACE_FALLBACK;
                continue;
            }
        }

        if info.codepoint == 0x2011 && ctx.has_glyph('\u{2010}') {
            // Non-breaking hyphen renders as the plain hyphen.
            buffer.replace_glyph(0x2010);
            continue;
        }

        // Leave it; glyph mapping will produce .notdef.
        buffer.next_glyph();
    }

    buffer.swap_buffers();
}

/// Space-fallback class rides in the high byte of `unicode_props`; spaces
/// are never marks, so the slot is free.
pub(crate) fn set_space_fallback(buffer: &mut Buffer, i: usize, space: unicode::Space) {
    buffer.info[i].unicode_props =
        (buffer.info[i].unicode_props & 0xFF) | ((space as u16) << 8);
}

pub(crate) fn space_fallback_of(info: &crate::buffer::GlyphInfo) -> Option<unicode::Space> {
    // Marks keep their combining class in the high byte, and format
    // characters their joiner bits; only space separators carry a
    // fallback class there.
    if info.general_category() != unicode::GeneralCategory::SpaceSeparator {
        return None;
    }
    match info.unicode_props >> 8 {
        1 => Some(unicode::Space::Em),
        2 => Some(unicode::Space::Em2),
        3 => Some(unicode::Space::Em3),
        4 => Some(unicode::Space::Em4),
        5 => Some(unicode::Space::Em5),
        6 => Some(unicode::Space::Em6),
        16 => Some(unicode::Space::Em16),
        17 => Some(unicode::Space::FourEm18),
        18 => Some(unicode::Space::Space),
        19 => Some(unicode::Space::Figure),
        20 => Some(unicode::Space::Punctuation),
        21 => Some(unicode::Space::Narrow),
        _ => None,
    }
}

fn reorder_marks_pass(plan: &ShapePlan, buffer: &mut Buffer) {
    if !buffer
        .scratch_flags
        .contains(BufferScratchFlags::HAS_NON_ASCII)
    {
        return;
    }

    let len = buffer.len;
    let mut i = 0;
    while i < len {
        if buffer.info[i].modified_combining_class() == 0 {
            i += 1;
            continue;
        }

        let start = i;
        while i < len && buffer.info[i].modified_combining_class() != 0 {
            i += 1;
        }
        let end = i;

        // Pathological runs are left unsorted rather than going quadratic.
        if end - start > MAX_COMBINING_MARKS {
            continue;
        }

        insertion_sort_marks(buffer, start, end);

        if let Some(reorder) = plan.shaper.reorder_marks {
            reorder(plan, buffer, start, end);
        }
    }
}

fn insertion_sort_marks(buffer: &mut Buffer, start: usize, end: usize) {
    for i in start + 1..end {
        let item = buffer.info[i];
        let cc = item.modified_combining_class();
        let mut j = i;
        while j > start && buffer.info[j - 1].modified_combining_class() > cc {
            buffer.info[j] = buffer.info[j - 1];
            j -= 1;
        }
        if j != i {
            buffer.info[j] = item;
            // The reorder crossed other marks; the range cannot be re-shaped
            // piecewise anymore.
            buffer.merge_clusters(start, end);
        }
    }
}

fn recompose_pass(ctx: &ShapeNormalizeContext, buffer: &mut Buffer) {
    if !buffer
        .scratch_flags
        .contains(BufferScratchFlags::HAS_NON_ASCII)
    {
        return;
    }

    buffer.clear_output();
    let mut starter = 0usize;

    while buffer.idx < buffer.len && !buffer.in_error() {
        let cur_cc = buffer.cur(0).modified_combining_class();

        if cur_cc == 0 {
            starter = buffer.out_len;
            buffer.next_glyph();
            continue;
        }

        // Composition is blocked by an intervening mark of greater-or-equal
        // class.
        let unblocked = buffer.out_len == starter + 1
            || (buffer.out_len > starter + 1
                && buffer.prev().modified_combining_class() < cur_cc);

        if buffer.out_len > starter && unblocked {
            let a = buffer.info[starter].as_char();
            let b = buffer.cur(0).as_char();
            if let Some(composed) = ctx.compose(a, b) {
                if ctx.has_glyph(composed) {
                    buffer.next_glyph();
                    buffer.merge_out_clusters(starter, buffer.out_len);
                    buffer.out_len -= 1;
                    buffer.info[starter].codepoint = composed as u32;
                    let mut scratch = buffer.scratch_flags;
                    buffer.info[starter].init_unicode_props(&mut scratch);
                    buffer.scratch_flags = scratch;
                    continue;
                }
            }
        }

        buffer.next_glyph();
    }

    buffer.swap_buffers();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Direction;
    use crate::complex::ShaperRegistry;

    struct NormFace;

    // Bases, their composed forms and a couple of marks; everything maps
    // so decomposition and recomposition both have room to act.
    const CHARS: &[u32] = &[
        0x61, 0x41, 0x62, 0x0301, 0x030A, 0x00C5, 0x00E1, 0x20,
    ];

    impl Face for NormFace {
        fn nominal_glyph(&self, c: u32) -> Option<ttf_parser::GlyphId> {
            CHARS.contains(&c).then(|| ttf_parser::GlyphId(c as u16))
        }
        fn glyph_h_advance(&self, _: ttf_parser::GlyphId) -> i32 {
            600
        }
    }

    fn lcg(seed: &mut u32) -> u32 {
        *seed = seed.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
        *seed >> 16
    }

    fn run_normalize(plan: &ShapePlan, face: &dyn Face, codepoints: &[u32]) -> Vec<u32> {
        let mut buffer = Buffer::new();
        for (i, &c) in codepoints.iter().enumerate() {
            buffer.add(c, i as u32);
        }
        let mut scratch = buffer.scratch_flags;
        for i in 0..buffer.len {
            buffer.info[i].init_unicode_props(&mut scratch);
        }
        buffer.scratch_flags = scratch;

        normalize(plan, face, &mut buffer);
        buffer.info().iter().map(|info| info.codepoint).collect()
    }

    #[test]
    fn normalize_is_idempotent_over_generated_inputs() {
        // Alphabet of generation candidates, marks included.
        let alphabet: &[u32] = &[0x61, 0x41, 0x62, 0x0301, 0x030A, 0x00C5, 0x00E1, 0x20];

        let face = NormFace;
        let registry = ShaperRegistry::with_defaults();
        let plan = ShapePlan::build(
            &face,
            &registry,
            Direction::LeftToRight,
            None,
            None,
            &[],
        )
        .unwrap();

        let mut seed = 0x0D_u32;
        for len in 1..=7usize {
            for _ in 0..8 {
                let input: Vec<u32> = (0..len)
                    .map(|_| alphabet[lcg(&mut seed) as usize % alphabet.len()])
                    .collect();

                let once = run_normalize(&plan, &face, &input);
                let twice = run_normalize(&plan, &face, &once);
                assert_eq!(once, twice, "normalization not idempotent for {:X?}", input);
            }
        }
    }
}
