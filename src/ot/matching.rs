//! Matching primitives: the flag-aware skipping iterator and the input /
//! backtrack / lookahead matchers built on it.

use ttf_parser::GlyphId;

use crate::buffer::{GlyphInfo, GlyphPropsFlags};
use crate::common::Mask;
use crate::ot::apply::{ApplyContext, MAX_CONTEXT_LENGTH};
use crate::ot::TableIndex;
use crate::tables::gsubgpos::{ClassDef, Coverage};

/// Per-position predicate used while matching sequences. The second
/// argument is the position within the value array.
pub type MatchFn<'a> = dyn Fn(GlyphId, usize) -> bool + 'a;

/// Matches against explicit glyph ids.
pub fn match_glyph(glyphs: &[GlyphId]) -> impl Fn(GlyphId, usize) -> bool + '_ {
    move |glyph, index| glyphs.get(index).copied() == Some(glyph)
}

/// Matches against glyph classes.
pub fn match_class<'a>(
    classes: &'a ClassDef,
    values: &'a [u16],
) -> impl Fn(GlyphId, usize) -> bool + 'a {
    move |glyph, index| values.get(index).copied() == Some(classes.get(glyph))
}

/// Matches against per-position coverages.
pub fn match_coverage(coverages: &[Coverage]) -> impl Fn(GlyphId, usize) -> bool + '_ {
    move |glyph, index| {
        coverages
            .get(index)
            .map(|c| c.contains(glyph))
            .unwrap_or(false)
    }
}

#[derive(Clone, Copy, PartialEq)]
enum Skip {
    No,
    Yes,
    Maybe,
}

/// Advances over the buffer skipping items the active lookup ignores:
/// classes excluded by the lookup flags, and default-ignorables unless the
/// feature asked for manual joiner handling.
pub struct SkippyIter<'a, 'b, 'c> {
    ctx: &'c ApplyContext<'a, 'b>,
    lookup_props: u32,
    ignore_zwnj: bool,
    ignore_zwj: bool,
    mask: Mask,
    syllable: u8,
    matching: Option<&'c MatchFn<'c>>,
    match_cursor: usize,
    num_items: usize,
    idx: usize,
}

impl<'a, 'b, 'c> SkippyIter<'a, 'b, 'c> {
    pub fn new(
        ctx: &'c ApplyContext<'a, 'b>,
        start_buf_index: usize,
        num_items: usize,
        context_match: bool,
    ) -> Self {
        SkippyIter {
            ctx,
            lookup_props: ctx.lookup_props,
            // ZWNJ blocks substitution input matching but never context or
            // positioning; ZWJ blocks only for manual-joiner features.
            ignore_zwnj: ctx.table_index == TableIndex::Gpos || (context_match && ctx.auto_zwnj),
            ignore_zwj: context_match || ctx.auto_zwj,
            mask: if context_match {
                u32::MAX
            } else {
                ctx.lookup_mask
            },
            syllable: if start_buf_index == ctx.buffer.idx && ctx.per_syllable {
                ctx.buffer.cur(0).syllable
            } else {
                0
            },
            matching: None,
            match_cursor: 0,
            num_items,
            idx: start_buf_index,
        }
    }

    pub fn set_lookup_props(&mut self, lookup_props: u32) {
        self.lookup_props = lookup_props;
    }

    pub fn enable_matching(&mut self, func: &'c MatchFn<'c>) {
        self.matching = Some(func);
    }

    #[inline]
    pub fn index(&self) -> usize {
        self.idx
    }

    fn may_skip(&self, info: &GlyphInfo) -> Skip {
        if !self.ctx.check_glyph_property(info, self.lookup_props) {
            return Skip::Yes;
        }

        if info.is_default_ignorable()
            && !info.is_hidden()
            && (self.ignore_zwnj || !info.is_zwnj())
            && (self.ignore_zwj || !info.is_zwj())
        {
            return Skip::Maybe;
        }

        Skip::No
    }

    fn may_match(&self, info: &GlyphInfo) -> Option<bool> {
        if info.mask & self.mask == 0
            || (self.syllable != 0 && self.syllable != info.syllable)
        {
            return Some(false);
        }

        self.matching
            .map(|f| f(info.as_glyph(), self.match_cursor))
    }

    /// Advances to the next matching item. Returns `false` when the match
    /// fails or the buffer runs out.
    pub fn next(&mut self) -> bool {
        debug_assert!(self.num_items > 0);
        let stop = self.ctx.buffer.len.saturating_sub(self.num_items);
        while self.idx < stop {
            self.idx += 1;
            let info = &self.ctx.buffer.info[self.idx];

            let skip = self.may_skip(info);
            if skip == Skip::Yes {
                continue;
            }

            let matched = self.may_match(info);
            if matched == Some(true) || (matched.is_none() && skip == Skip::No) {
                self.match_cursor += 1;
                self.num_items -= 1;
                return true;
            }

            if skip == Skip::No {
                return false;
            }
        }
        false
    }

    /// Steps backward (over the output view when staging is active).
    pub fn prev(&mut self) -> bool {
        debug_assert!(self.num_items > 0);
        while self.idx > self.num_items - 1 {
            self.idx -= 1;
            // The output view shares storage with `info`, so this reads the
            // right item both during staged passes and in-place passes.
            let info = &self.ctx.buffer.info[self.idx];

            let skip = self.may_skip(info);
            if skip == Skip::Yes {
                continue;
            }

            let matched = self.may_match(info);
            if matched == Some(true) || (matched.is_none() && skip == Skip::No) {
                self.match_cursor += 1;
                self.num_items -= 1;
                return true;
            }

            if skip == Skip::No {
                return false;
            }
        }
        false
    }
}

/// Matches `input` (excluding the first glyph, already matched by the
/// caller's coverage) forward from the cursor. On success returns the
/// positions of all matched items, the end offset and the total ligature
/// component count.
pub struct MatchedInput {
    pub len: usize,
    pub positions: [usize; MAX_CONTEXT_LENGTH],
    pub end: usize,
    pub total_component_count: u8,
}

pub fn match_input(
    ctx: &ApplyContext,
    input_len: usize,
    match_func: &MatchFn,
) -> Option<MatchedInput> {
    let count = input_len + 1;
    if count > MAX_CONTEXT_LENGTH {
        return None;
    }

    let buffer = &ctx.buffer;
    let mut positions = [0usize; MAX_CONTEXT_LENGTH];
    positions[0] = buffer.idx;

    // Bail if we don't have enough items left.
    if buffer.idx + count > buffer.len {
        return None;
    }

    let first = buffer.cur(0);
    let first_lig_id = first.lig_id();
    let first_lig_comp = first.lig_comp();
    let mut total_component_count = first.lig_num_comps();

    let mut iter = SkippyIter::new(ctx, buffer.idx, count - 1, false);
    iter.enable_matching(match_func);

    for position in positions.iter_mut().take(count).skip(1) {
        if !iter.next() {
            return None;
        }
        *position = iter.index();

        let this = &buffer.info[iter.index()];
        let this_lig_id = this.lig_id();
        let this_lig_comp = this.lig_comp();

        if first_lig_id != 0 && first_lig_comp != 0 {
            // If the first component was attached inside a ligature, every
            // other matched item must sit in the same ligature component.
            if first_lig_id != this_lig_id || first_lig_comp != this_lig_comp {
                return None;
            }
        } else {
            // Otherwise, matched items must not belong to any other
            // ligature, unless attached to the first component itself.
            if this_lig_id != 0 && this_lig_comp != 0 && this_lig_id != first_lig_id {
                return None;
            }
        }

        total_component_count += this.lig_num_comps();
    }

    Some(MatchedInput {
        len: count,
        positions,
        end: iter.index() + 1,
        total_component_count,
    })
}

/// Matches `backtrack_len` predicates walking left from the cursor.
/// Returns the buffer index of the furthest matched item.
pub fn match_backtrack(
    ctx: &ApplyContext,
    backtrack_len: usize,
    match_func: &MatchFn,
) -> Option<usize> {
    let mut iter = SkippyIter::new(ctx, ctx.buffer.backtrack_len(), backtrack_len, true);
    iter.enable_matching(match_func);

    for _ in 0..backtrack_len {
        if !iter.prev() {
            return None;
        }
    }

    Some(iter.index())
}

/// Matches `lookahead_len` predicates walking right from `offset` items
/// past the cursor. Returns the index one past the furthest matched item.
pub fn match_lookahead(
    ctx: &ApplyContext,
    lookahead_len: usize,
    match_func: &MatchFn,
    offset: usize,
) -> Option<usize> {
    if ctx.buffer.idx + offset == 0 {
        return None;
    }
    let mut iter = SkippyIter::new(ctx, ctx.buffer.idx + offset - 1, lookahead_len, true);
    iter.enable_matching(match_func);

    for _ in 0..lookahead_len {
        if !iter.next() {
            return None;
        }
    }

    Some(iter.index() + 1)
}

/// Merges a matched component sequence into one ligature glyph, keeping
/// every in-between mark and recording which component it attaches to.
pub fn ligate_input(
    ctx: &mut ApplyContext,
    matched: &MatchedInput,
    lig_glyph: GlyphId,
) {
    let count = matched.len;
    let buffer = &mut *ctx.buffer;
    buffer.merge_clusters(buffer.idx, matched.end);

    // A "ligature" of marks alone, or of whole bases alone, does not get
    // ligature bookkeeping; attachment stays addressable.
    let mut is_base_ligature = buffer.info[matched.positions[0]].is_base_glyph();
    let mut is_mark_ligature = buffer.info[matched.positions[0]].is_mark();
    for i in 1..count {
        if !buffer.info[matched.positions[i]].is_mark() {
            is_base_ligature = false;
            is_mark_ligature = false;
            break;
        }
    }
    let is_ligature = !is_base_ligature && !is_mark_ligature;

    let class = if is_ligature {
        GlyphPropsFlags::LIGATURE.bits()
    } else {
        0
    };
    let lig_id = if is_ligature { buffer.allocate_lig_id() } else { 0 };
    let first = buffer.cur_mut(0);
    let mut last_lig_id = first.lig_id();
    let mut last_num_comps = usize::from(first.lig_num_comps());
    let mut comps_so_far = last_num_comps;

    if is_ligature {
        first.set_lig_props_for_ligature(lig_id, matched.total_component_count);
        if first.general_category() == crate::unicode::GeneralCategory::NonspacingMark {
            first.set_general_category(crate::unicode::GeneralCategory::OtherLetter);
        }
    }

    ctx.replace_glyph_with_ligature(lig_glyph, class);

    for i in 1..count {
        while ctx.buffer.idx < matched.positions[i] && !ctx.buffer.in_error() {
            if is_ligature {
                let cur = ctx.buffer.cur_mut(0);
                let mut this_comp = usize::from(cur.lig_comp());
                if this_comp == 0 {
                    this_comp = last_num_comps;
                }
                let new_lig_comp = comps_so_far - last_num_comps + this_comp.min(last_num_comps);
                cur.set_lig_props_for_mark(lig_id, new_lig_comp as u8);
            }
            ctx.buffer.next_glyph();
        }

        let cur = ctx.buffer.cur(0);
        last_lig_id = cur.lig_id();
        last_num_comps = usize::from(cur.lig_num_comps());
        comps_so_far += last_num_comps;

        // The component glyph itself is consumed.
        ctx.buffer.skip_glyph();
    }

    // Re-number marks that followed the last component and were attached to
    // the old ligature.
    if !is_mark_ligature && last_lig_id != 0 {
        for i in ctx.buffer.idx..ctx.buffer.len {
            if ctx.buffer.info[i].lig_id() != last_lig_id {
                break;
            }
            let this_comp = usize::from(ctx.buffer.info[i].lig_comp());
            if this_comp == 0 {
                break;
            }
            let new_lig_comp = comps_so_far - last_num_comps + this_comp.min(last_num_comps);
            ctx.buffer.info[i].set_lig_props_for_mark(lig_id, new_lig_comp as u8);
        }
    }
}
