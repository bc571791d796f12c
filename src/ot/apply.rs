//! The shared GSUB/GPOS application context and per-lookup accelerators.

use ttf_parser::GlyphId;

use crate::buffer::{Buffer, GlyphInfo, GlyphPropsFlags};
use crate::common::Mask;
use crate::error::ShapingLimit;
use crate::face::{Face, GlyphClass};
use crate::ot::TableIndex;
use crate::tables::gsubgpos::{
    Coverage, LookupFlags, PosLookup, PosTable, SubstLookup, SubstSubtable, SubstTable,
};

/// Maximum depth of nested-lookup recursion.
pub const MAX_NESTING_LEVEL: usize = 6;
/// Longest input sequence a context rule may match.
pub const MAX_CONTEXT_LENGTH: usize = 64;

/// A three-filter glyph-set digest: constant-time "definitely not covered"
/// checks in the hot apply loop.
#[derive(Clone, Copy, Default, Debug)]
pub struct SetDigest {
    a: u64,
    b: u64,
    c: u64,
}

impl SetDigest {
    pub fn insert(&mut self, glyph: GlyphId) {
        let g = glyph.0 as u64;
        self.a |= 1 << (g & 63);
        self.b |= 1 << ((g >> 4) & 63);
        self.c |= 1 << ((g >> 9) & 63);
    }

    pub fn insert_coverage(&mut self, coverage: &Coverage) {
        coverage.for_each_glyph(|g| self.insert(g));
    }

    /// Marks the digest as matching everything.
    pub fn insert_all(&mut self) {
        self.a = u64::MAX;
        self.b = u64::MAX;
        self.c = u64::MAX;
    }

    #[inline]
    pub fn may_have(&self, glyph: GlyphId) -> bool {
        let g = glyph.0 as u64;
        self.a & (1 << (g & 63)) != 0
            && self.b & (1 << ((g >> 4) & 63)) != 0
            && self.c & (1 << ((g >> 9) & 63)) != 0
    }
}

/// Prebuilt dispatch data for one lookup: the union of its subtables'
/// first-glyph coverages. Built once at plan compile, read-only afterwards.
#[derive(Clone, Copy, Default)]
pub struct LookupAccel {
    pub digest: SetDigest,
}

impl LookupAccel {
    pub fn for_subst(lookup: &SubstLookup) -> Self {
        let mut accel = LookupAccel::default();
        for subtable in &lookup.subtables {
            match subtable.coverage() {
                Some(coverage) => accel.digest.insert_coverage(coverage),
                None => accel.digest.insert_all(),
            }
        }
        accel
    }

    pub fn for_pos(lookup: &PosLookup) -> Self {
        let mut accel = LookupAccel::default();
        for subtable in &lookup.subtables {
            match subtable.coverage() {
                Some(coverage) => accel.digest.insert_coverage(coverage),
                None => accel.digest.insert_all(),
            }
        }
        accel
    }
}

/// Borrowed views of the face's layout tables, for nested-lookup recursion.
#[derive(Clone, Copy)]
pub struct LayoutTables<'a> {
    pub gsub: Option<&'a SubstTable>,
    pub gpos: Option<&'a PosTable>,
}

/// Everything a lookup application needs: the buffer, the active lookup's
/// flags and mask, and the recursion budget.
pub struct ApplyContext<'a, 'b> {
    pub table_index: TableIndex,
    pub face: &'a dyn Face,
    pub buffer: &'b mut Buffer,
    pub tables: LayoutTables<'a>,
    pub lookup_mask: Mask,
    pub lookup_index: u16,
    pub lookup_props: u32,
    pub nesting_level_left: usize,
    pub auto_zwnj: bool,
    pub auto_zwj: bool,
    pub random: bool,
    pub per_syllable: bool,
}

pub(crate) fn lookup_props(flags: LookupFlags, mark_filtering_set: Option<u16>) -> u32 {
    let mut props = u32::from(flags.bits());
    if flags.contains(LookupFlags::USE_MARK_FILTERING_SET) {
        if let Some(set) = mark_filtering_set {
            props |= u32::from(set) << 16;
        }
    }
    props
}

impl<'a, 'b> ApplyContext<'a, 'b> {
    pub fn new(
        table_index: TableIndex,
        face: &'a dyn Face,
        buffer: &'b mut Buffer,
        tables: LayoutTables<'a>,
    ) -> Self {
        ApplyContext {
            table_index,
            face,
            buffer,
            tables,
            lookup_mask: 1,
            lookup_index: u16::MAX,
            lookup_props: 0,
            nesting_level_left: MAX_NESTING_LEVEL,
            auto_zwnj: true,
            auto_zwj: true,
            random: false,
            per_syllable: false,
        }
    }

    /// Whether `info` passes the lookup-flag filter in `match_props`.
    pub fn check_glyph_property(&self, info: &GlyphInfo, match_props: u32) -> bool {
        let glyph_props = u32::from(info.glyph_props());

        // Lookup flags share bit values with the glyph classes they ignore.
        if glyph_props & match_props & u32::from(LookupFlags::IGNORE_FLAGS.bits()) != 0 {
            return false;
        }

        if glyph_props & u32::from(GlyphPropsFlags::MARK.bits()) != 0 {
            if match_props & u32::from(LookupFlags::USE_MARK_FILTERING_SET.bits()) != 0 {
                return self
                    .face
                    .is_mark_glyph(info.as_glyph(), (match_props >> 16) as u16);
            }
            if match_props & u32::from(LookupFlags::MARK_ATTACHMENT_TYPE_MASK.bits()) != 0 {
                return (match_props & 0xFF00) == (glyph_props & 0xFF00);
            }
        }

        true
    }

    /// Runs a nested lookup at the current position.
    pub fn recurse(&mut self, sub_lookup_index: u16) -> Option<()> {
        if self.nesting_level_left == 0 {
            self.buffer
                .limit
                .get_or_insert(ShapingLimit::RecursionDepth);
            return None;
        }
        if !self.buffer.consume_op() {
            return None;
        }

        let saved_props = self.lookup_props;
        let saved_index = self.lookup_index;
        self.nesting_level_left -= 1;

        let applied = match self.table_index {
            TableIndex::Gsub => self.tables.gsub.and_then(|table| {
                let lookup = table.lookups.get(usize::from(sub_lookup_index))?;
                self.lookup_props = lookup_props(lookup.flags, lookup.mark_filtering_set);
                self.lookup_index = sub_lookup_index;
                crate::ot::gsub::apply_once(self, lookup)
            }),
            TableIndex::Gpos => self.tables.gpos.and_then(|table| {
                let lookup = table.lookups.get(usize::from(sub_lookup_index))?;
                self.lookup_props = lookup_props(lookup.flags, lookup.mark_filtering_set);
                self.lookup_index = sub_lookup_index;
                crate::ot::gpos::apply_once(self, lookup)
            }),
        };

        self.nesting_level_left += 1;
        self.lookup_props = saved_props;
        self.lookup_index = saved_index;
        applied
    }

    fn glyph_props_from_face(&self, glyph: GlyphId) -> u16 {
        match self.face.glyph_class(glyph) {
            Some(GlyphClass::Base) => GlyphPropsFlags::BASE_GLYPH.bits(),
            Some(GlyphClass::Ligature) => GlyphPropsFlags::LIGATURE.bits(),
            Some(GlyphClass::Mark) => {
                GlyphPropsFlags::MARK.bits() | (self.face.mark_attachment_class(glyph) << 8)
            }
            Some(GlyphClass::Component) | None => 0,
        }
    }

    fn set_glyph_props(
        &mut self,
        glyph: GlyphId,
        class_guess: u16,
        ligature: bool,
        component: bool,
    ) {
        let cur_props = self.buffer.cur(0).glyph_props();
        let mut add_in =
            (cur_props & GlyphPropsFlags::PRESERVE.bits()) | GlyphPropsFlags::SUBSTITUTED.bits();
        if ligature {
            add_in |= GlyphPropsFlags::LIGATED.bits();
        }
        if component {
            add_in |= GlyphPropsFlags::MULTIPLIED.bits();
        }

        let props = if self.face.has_glyph_classes() {
            add_in | self.glyph_props_from_face(glyph)
        } else if class_guess != 0 {
            add_in | class_guess
        } else {
            add_in | (cur_props & (GlyphPropsFlags::CLASS_MASK.bits() | 0xFF00))
        };
        self.buffer.cur_mut(0).set_glyph_props(props);
    }

    /// Substitutes the current glyph, consuming it.
    pub fn replace_glyph(&mut self, glyph: GlyphId) {
        self.set_glyph_props(glyph, 0, false, false);
        self.buffer.replace_glyph(u32::from(glyph.0));
    }

    /// Substitutes the current glyph without touching the cursor; used by
    /// in-place (reverse) lookups.
    pub fn replace_glyph_inplace(&mut self, glyph: GlyphId) {
        self.set_glyph_props(glyph, 0, false, false);
        self.buffer.cur_mut(0).codepoint = u32::from(glyph.0);
    }

    pub fn replace_glyph_with_ligature(&mut self, glyph: GlyphId, class_guess: u16) {
        self.set_glyph_props(glyph, class_guess, true, false);
        self.buffer.replace_glyph(u32::from(glyph.0));
    }

    pub fn output_glyph_for_component(&mut self, glyph: GlyphId, class_guess: u16) {
        self.set_glyph_props(glyph, class_guess, false, true);
        self.buffer.output_glyph(u32::from(glyph.0));
    }
}

/// A side-effect-free "would this lookup substitute here?" query.
pub struct WouldApplyContext<'a> {
    pub glyphs: &'a [GlyphId],
    pub zero_context: bool,
}

/// Forward application driver shared by GSUB and GPOS.
pub(crate) fn apply_forward(
    ctx: &mut ApplyContext,
    accel: &LookupAccel,
    mut apply_once: impl FnMut(&mut ApplyContext) -> Option<()>,
) -> bool {
    let mut ret = false;
    while ctx.buffer.idx < ctx.buffer.len && !ctx.buffer.in_error() {
        let cur = ctx.buffer.cur(0);
        let mut applied = false;
        if accel.digest.may_have(cur.as_glyph())
            && (cur.mask & ctx.lookup_mask) != 0
            && ctx.check_glyph_property(cur, ctx.lookup_props)
        {
            if !ctx.buffer.consume_op() {
                break;
            }
            applied = apply_once(ctx).is_some();
        }

        if applied {
            ret = true;
        } else {
            ctx.buffer.next_glyph();
        }
    }
    ret
}

/// Backward in-place driver, for reverse-chaining substitutions.
pub(crate) fn apply_backward(
    ctx: &mut ApplyContext,
    accel: &LookupAccel,
    mut apply_once: impl FnMut(&mut ApplyContext) -> Option<()>,
) -> bool {
    let mut ret = false;
    if ctx.buffer.len == 0 {
        return false;
    }
    ctx.buffer.idx = ctx.buffer.len - 1;
    loop {
        if ctx.buffer.in_error() {
            break;
        }
        let cur = ctx.buffer.cur(0);
        if accel.digest.may_have(cur.as_glyph())
            && (cur.mask & ctx.lookup_mask) != 0
            && ctx.check_glyph_property(cur, ctx.lookup_props)
        {
            if !ctx.buffer.consume_op() {
                break;
            }
            ret |= apply_once(ctx).is_some();
        }
        // The reverse lookup never grows the buffer, so a plain walk is
        // safe.
        if ctx.buffer.idx == 0 {
            break;
        }
        ctx.buffer.idx -= 1;
    }
    ret
}

/// Reverse detection: per OpenType, a lookup is applied backwards exactly
/// when its subtables are reverse-chaining.
pub(crate) fn is_reverse_lookup(lookup: &SubstLookup) -> bool {
    matches!(
        lookup.subtables.first(),
        Some(SubstSubtable::ReverseChainSingle(_))
    )
}
