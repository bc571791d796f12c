//! The mutable glyph stream that flows through shaping.
//!
//! Input and output views share one backing array: reads advance a cursor
//! over `[idx, len)` while writes append to `[0, out_len)`. When the output
//! head would overrun unconsumed input, the input tail is shifted forward.
//! `swap_buffers` then promotes the output view in O(1).

use ttf_parser::GlyphId;

use crate::common::{Direction, Language, Mask, Script};
use crate::error::{ShapeError, ShapingLimit};
use crate::plan::PlanCache;
use crate::unicode::GeneralCategory;

const CONTEXT_LENGTH: usize = 5;

pub(crate) const MAX_LEN_FACTOR: usize = 64;
pub(crate) const MAX_LEN_MIN: usize = 16384;
pub(crate) const MAX_OPS_FACTOR: i32 = 1024;
pub(crate) const MAX_OPS_MIN: i32 = 16384;

bitflags::bitflags! {
    /// Flags the caller sets on a buffer before shaping.
    pub struct BufferFlags: u32 {
        /// The buffer starts at the beginning of text.
        const BEGINNING_OF_TEXT          = 1 << 0;
        /// The buffer ends at the end of text.
        const END_OF_TEXT                = 1 << 1;
        /// Keep default-ignorable glyphs visible as invisible glyphs.
        const PRESERVE_DEFAULT_IGNORABLES = 1 << 2;
        /// Remove default-ignorable glyphs from the output entirely.
        const REMOVE_DEFAULT_IGNORABLES  = 1 << 3;
        /// Do not insert U+25CC on broken clusters.
        const DO_NOT_INSERT_DOTTED_CIRCLE = 1 << 4;
        /// Compute `UNSAFE_TO_CONCAT` in addition to `UNSAFE_TO_BREAK`.
        const PRODUCE_UNSAFE_TO_CONCAT   = 1 << 5;
        /// Compute `SAFE_TO_INSERT_TATWEEL` (Arabic-script justification).
        const PRODUCE_SAFE_TO_INSERT_TATWEEL = 1 << 6;
    }
}

bitflags::bitflags! {
    /// Per-item safety flags, stored in the low bits of the mask.
    pub struct GlyphFlags: u32 {
        /// Re-shaping any strict sub-range crossing this item would produce
        /// different results.
        const UNSAFE_TO_BREAK  = 0x0000_0001;
        /// Splitting the text at this boundary and shaping the halves
        /// separately would change the result on concatenation.
        const UNSAFE_TO_CONCAT = 0x0000_0002;
        /// A tatweel may be inserted before this item without re-shaping.
        const SAFE_TO_INSERT_TATWEEL = 0x0000_0004;
        /// All publicly defined flags.
        const DEFINED = 0x0000_0007;
    }
}

/// All mask bits reserved for safety flags; the plan's feature allocator
/// never assigns them.
pub(crate) const GLYPH_FLAGS_RESERVED: Mask = 0x0000_000F;

bitflags::bitflags! {
    /// Internal bookkeeping accumulated while shaping.
    pub struct BufferScratchFlags: u32 {
        const HAS_NON_ASCII          = 1 << 0;
        const HAS_DEFAULT_IGNORABLES = 1 << 1;
        const HAS_SPACE_FALLBACK     = 1 << 2;
        const HAS_GPOS_ATTACHMENT    = 1 << 3;
        const HAS_CGJ                = 1 << 4;
        const HAS_GLYPH_FLAGS        = 1 << 5;
        const HAS_BROKEN_SYLLABLE    = 1 << 6;

        // Shaper-private bits.
        const COMPLEX0 = 1 << 24;
        const COMPLEX1 = 1 << 25;
    }
}

bitflags::bitflags! {
    /// GDEF-derived glyph properties plus substitution history.
    pub struct GlyphPropsFlags: u16 {
        const BASE_GLYPH = 0x02;
        const LIGATURE   = 0x04;
        const MARK       = 0x08;
        const CLASS_MASK = Self::BASE_GLYPH.bits | Self::LIGATURE.bits | Self::MARK.bits;

        const SUBSTITUTED = 0x10;
        const LIGATED     = 0x20;
        const MULTIPLIED  = 0x40;
        /// Substitution history carried through further substitutions.
        const PRESERVE    = Self::SUBSTITUTED.bits | Self::LIGATED.bits | Self::MULTIPLIED.bits;
    }
}

// unicode_props packing: bits 0..4 general category, 5 default-ignorable,
// 6 hidden, 7 continuation; for format characters bits 8/9 carry ZWNJ/ZWJ,
// for marks bits 8..15 carry the modified combining class.
const UPROPS_MASK_GENERAL_CATEGORY: u16 = 0x001F;
const UPROPS_MASK_IGNORABLE: u16 = 0x0020;
const UPROPS_MASK_HIDDEN: u16 = 0x0040;
const UPROPS_MASK_CONTINUATION: u16 = 0x0080;
const UPROPS_MASK_CF_ZWNJ: u16 = 0x0100;
const UPROPS_MASK_CF_ZWJ: u16 = 0x0200;

/// Cluster policies. Only monotone grapheme clustering is supported.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum ClusterLevel {
    /// Input-order cluster ids, auto-assigned, merged per grapheme.
    #[default]
    MonotoneGraphemes,
}

impl ClusterLevel {
    /// Accepts the legacy numeric option. Levels 1 and 2 exist in other
    /// engines but are not supported here.
    pub fn from_u32(level: u32) -> Result<Self, ShapeError> {
        match level {
            0 => Ok(ClusterLevel::MonotoneGraphemes),
            1 => Err(ShapeError::UnsupportedOption("cluster-level=1")),
            2 => Err(ShapeError::UnsupportedOption("cluster-level=2")),
            _ => Err(ShapeError::UnsupportedOption("cluster-level out of range")),
        }
    }
}

/// One item of the glyph stream.
///
/// `codepoint` holds a Unicode scalar value on input and a glyph id once
/// substitution has mapped it.
#[repr(C)]
#[derive(Clone, Copy, Default, Debug)]
pub struct GlyphInfo {
    pub codepoint: u32,
    pub cluster: u32,
    pub(crate) mask: Mask,
    pub(crate) glyph_props: u16,
    pub(crate) unicode_props: u16,
    pub(crate) lig_props: u8,
    pub(crate) syllable: u8,
    /// Per-shaper scratch.
    pub(crate) complex_var: u8,
    pub(crate) complex_aux: u8,
}

impl GlyphInfo {
    /// Safety flags of this item.
    pub fn glyph_flags(&self) -> GlyphFlags {
        GlyphFlags::from_bits_truncate(self.mask)
    }

    #[inline]
    pub(crate) fn as_char(&self) -> char {
        char::from_u32(self.codepoint).unwrap_or('\u{FFFD}')
    }

    #[inline]
    pub(crate) fn as_glyph(&self) -> GlyphId {
        debug_assert!(self.codepoint <= u32::from(u16::MAX));
        GlyphId(self.codepoint as u16)
    }

    #[inline]
    pub(crate) fn general_category(&self) -> GeneralCategory {
        GeneralCategory::from_u8((self.unicode_props & UPROPS_MASK_GENERAL_CATEGORY) as u8)
    }

    pub(crate) fn set_general_category(&mut self, gc: GeneralCategory) {
        self.unicode_props =
            (gc as u16) | (self.unicode_props & !UPROPS_MASK_GENERAL_CATEGORY);
    }

    #[inline]
    pub(crate) fn is_unicode_mark(&self) -> bool {
        self.general_category().is_mark()
    }

    #[inline]
    pub(crate) fn is_default_ignorable(&self) -> bool {
        self.unicode_props & UPROPS_MASK_IGNORABLE != 0 && !self.is_ligated()
    }


    #[inline]
    pub(crate) fn is_hidden(&self) -> bool {
        self.unicode_props & UPROPS_MASK_HIDDEN != 0
    }


    /// A continuation extends the grapheme started by a previous item.
    #[inline]
    pub(crate) fn is_continuation(&self) -> bool {
        self.unicode_props & UPROPS_MASK_CONTINUATION != 0
    }


    #[inline]
    pub(crate) fn is_zwnj(&self) -> bool {
        self.general_category() == GeneralCategory::Format
            && self.unicode_props & UPROPS_MASK_CF_ZWNJ != 0
    }

    #[inline]
    pub(crate) fn is_zwj(&self) -> bool {
        self.general_category() == GeneralCategory::Format
            && self.unicode_props & UPROPS_MASK_CF_ZWJ != 0
    }


    #[inline]
    pub(crate) fn modified_combining_class(&self) -> u8 {
        if self.is_unicode_mark() {
            (self.unicode_props >> 8) as u8
        } else {
            0
        }
    }

    pub(crate) fn set_modified_combining_class(&mut self, mcc: u8) {
        if self.is_unicode_mark() {
            self.unicode_props = (u16::from(mcc) << 8) | (self.unicode_props & 0xFF);
        }
    }

    pub(crate) fn init_unicode_props(&mut self, scratch_flags: &mut BufferScratchFlags) {
        let u = self.codepoint;
        let gc = crate::unicode::general_category(self.as_char());
        let mut props = gc as u16;

        if u >= 0x80 {
            *scratch_flags |= BufferScratchFlags::HAS_NON_ASCII;

            if crate::unicode::is_default_ignorable(u) {
                props |= UPROPS_MASK_IGNORABLE;
                *scratch_flags |= BufferScratchFlags::HAS_DEFAULT_IGNORABLES;

                match u {
                    0x200C => props |= UPROPS_MASK_CF_ZWNJ,
                    0x200D => props |= UPROPS_MASK_CF_ZWJ,
                    // Mongolian free variation selectors and the Mongolian
                    // vowel separator need to stay visible for the shaper.
                    0x180B..=0x180E | 0x200B => props |= UPROPS_MASK_HIDDEN,
                    0x034F => {
                        props |= UPROPS_MASK_HIDDEN;
                        *scratch_flags |= BufferScratchFlags::HAS_CGJ;
                    }
                    _ => {}
                }
            }

            if gc.is_mark() {
                props |= UPROPS_MASK_CONTINUATION;
                props |= u16::from(crate::unicode::modified_combining_class(self.as_char())) << 8;
            }
        }

        self.unicode_props = props;
    }

    // Glyph props.

    #[inline]
    pub(crate) fn glyph_props(&self) -> u16 {
        self.glyph_props
    }

    pub(crate) fn set_glyph_props(&mut self, props: u16) {
        self.glyph_props = props;
    }

    #[inline]
    pub(crate) fn is_base_glyph(&self) -> bool {
        self.glyph_props & GlyphPropsFlags::BASE_GLYPH.bits() != 0
    }

    #[inline]
    pub(crate) fn is_ligature(&self) -> bool {
        self.glyph_props & GlyphPropsFlags::LIGATURE.bits() != 0
    }

    #[inline]
    pub(crate) fn is_mark(&self) -> bool {
        self.glyph_props & GlyphPropsFlags::MARK.bits() != 0
    }


    #[inline]
    pub(crate) fn is_ligated(&self) -> bool {
        self.glyph_props & GlyphPropsFlags::LIGATED.bits() != 0
    }

    #[inline]
    pub(crate) fn is_multiplied(&self) -> bool {
        self.glyph_props & GlyphPropsFlags::MULTIPLIED.bits() != 0
    }


    // Ligature props: lig_id in the high 3 bits; bit 4 marks a ligature
    // base whose low nibble is the component count, otherwise the low
    // nibble is the component a mark attaches to.
    const IS_LIG_BASE: u8 = 0x10;

    pub(crate) fn lig_id(&self) -> u8 {
        self.lig_props >> 5
    }

    pub(crate) fn lig_comp(&self) -> u8 {
        if self.lig_props & Self::IS_LIG_BASE != 0 {
            0
        } else {
            self.lig_props & 0x0F
        }
    }

    pub(crate) fn lig_num_comps(&self) -> u8 {
        if self.is_ligature() && self.lig_props & Self::IS_LIG_BASE != 0 {
            self.lig_props & 0x0F
        } else {
            1
        }
    }

    pub(crate) fn set_lig_props_for_ligature(&mut self, lig_id: u8, num_comps: u8) {
        self.lig_props = (lig_id << 5) | Self::IS_LIG_BASE | (num_comps & 0x0F);
    }

    pub(crate) fn set_lig_props_for_mark(&mut self, lig_id: u8, lig_comp: u8) {
        self.lig_props = (lig_id << 5) | (lig_comp & 0x0F);
    }

    pub(crate) fn set_lig_props_for_component(&mut self, lig_comp: u8) {
        self.set_lig_props_for_mark(0, lig_comp);
    }
}

/// Attachment kinds recorded in `GlyphPosition::attach_type`.
pub(crate) mod attach_type {
    pub const NONE: u8 = 0;
    pub const MARK: u8 = 1;
    pub const CURSIVE: u8 = 2;
}

/// Positioning record paired with each [`GlyphInfo`].
#[repr(C)]
#[derive(Clone, Copy, Default, Debug)]
pub struct GlyphPosition {
    pub x_advance: i32,
    pub y_advance: i32,
    pub x_offset: i32,
    pub y_offset: i32,
    /// Signed delta to the item this one attaches to; 0 means unattached.
    pub(crate) attach_chain: i16,
    pub(crate) attach_type: u8,
}

impl GlyphPosition {
    #[inline]
    pub(crate) fn attach_chain(&self) -> i16 {
        self.attach_chain
    }

    pub(crate) fn set_attach_chain(&mut self, chain: i16) {
        self.attach_chain = chain;
    }

    #[inline]
    pub(crate) fn attach_type(&self) -> u8 {
        self.attach_type
    }

    pub(crate) fn set_attach_type(&mut self, kind: u8) {
        self.attach_type = kind;
    }
}

/// The core shaping container. Public entry points wrap it as
/// [`UnicodeBuffer`] (pre-shaping) and [`GlyphBuffer`] (post-shaping).
pub struct Buffer {
    pub(crate) flags: BufferFlags,
    pub(crate) cluster_level: ClusterLevel,
    pub(crate) invisible: Option<GlyphId>,
    pub(crate) scratch_flags: BufferScratchFlags,

    pub(crate) direction: Direction,
    pub(crate) script: Option<Script>,
    pub(crate) language: Option<Language>,

    /// Total lookup-application budget for the current shape call.
    pub(crate) max_ops: i32,
    /// Maximum length the buffer may grow to during the current call.
    pub(crate) max_len: usize,
    pub(crate) limit: Option<ShapingLimit>,

    pub(crate) info: Vec<GlyphInfo>,
    pub(crate) pos: Vec<GlyphPosition>,
    pub(crate) len: usize,
    pub(crate) out_len: usize,
    pub(crate) idx: usize,
    pub(crate) have_output: bool,
    pub(crate) have_positions: bool,

    pub(crate) serial: u8,
    pub(crate) random_state: u64,

    pub(crate) context: [[char; CONTEXT_LENGTH]; 2],
    pub(crate) context_len: [usize; 2],

    pub(crate) plan_cache: PlanCache,
}

impl Buffer {
    pub(crate) fn new() -> Self {
        Buffer {
            flags: BufferFlags::empty(),
            cluster_level: ClusterLevel::MonotoneGraphemes,
            invisible: None,
            scratch_flags: BufferScratchFlags::empty(),
            direction: Direction::Invalid,
            script: None,
            language: None,
            max_ops: MAX_OPS_MIN,
            max_len: MAX_LEN_MIN,
            limit: None,
            info: Vec::new(),
            pos: Vec::new(),
            len: 0,
            out_len: 0,
            idx: 0,
            have_output: false,
            have_positions: false,
            serial: 0,
            random_state: 1,
            context: [['\0'; CONTEXT_LENGTH]; 2],
            context_len: [0, 0],
            plan_cache: PlanCache::default(),
        }
    }

    #[inline]
    pub fn info(&self) -> &[GlyphInfo] {
        &self.info[..self.len]
    }

    #[inline]
    pub fn info_mut(&mut self) -> &mut [GlyphInfo] {
        &mut self.info[..self.len]
    }

    #[inline]
    pub fn pos(&self) -> &[GlyphPosition] {
        &self.pos[..self.len]
    }

    #[inline]
    pub fn pos_mut(&mut self) -> &mut [GlyphPosition] {
        &mut self.pos[..self.len]
    }

    #[inline]
    pub(crate) fn cur(&self, delta: usize) -> &GlyphInfo {
        &self.info[self.idx + delta]
    }

    #[inline]
    pub(crate) fn cur_mut(&mut self, delta: usize) -> &mut GlyphInfo {
        &mut self.info[self.idx + delta]
    }

    #[inline]
    pub(crate) fn cur_pos_mut(&mut self) -> &mut GlyphPosition {
        &mut self.pos[self.idx]
    }

    #[inline]
    pub(crate) fn prev(&self) -> &GlyphInfo {
        &self.info[self.out_len.saturating_sub(1)]
    }

    #[inline]
    pub(crate) fn prev_mut(&mut self) -> &mut GlyphInfo {
        let i = self.out_len.saturating_sub(1);
        &mut self.info[i]
    }

    /// Out-buffer view (shares storage with `info`).
    #[inline]
    pub fn out_info(&self) -> &[GlyphInfo] {
        &self.info[..self.out_len]
    }


    #[inline]
    pub(crate) fn backtrack_len(&self) -> usize {
        if self.have_output {
            self.out_len
        } else {
            self.idx
        }
    }

    #[inline]
    pub(crate) fn lookahead_len(&self) -> usize {
        self.len - self.idx
    }

    pub(crate) fn context_len(&self, side: usize) -> usize {
        self.context_len[side]
    }

    pub(crate) fn context(&self, side: usize, i: usize) -> char {
        self.context[side][i]
    }

    pub(crate) fn set_pre_context(&mut self, text: &str) {
        self.context_len[0] = 0;
        for c in text.chars().rev().take(CONTEXT_LENGTH) {
            self.context[0][self.context_len[0]] = c;
            self.context_len[0] += 1;
        }
    }

    pub(crate) fn set_post_context(&mut self, text: &str) {
        self.context_len[1] = 0;
        for c in text.chars().take(CONTEXT_LENGTH) {
            self.context[1][self.context_len[1]] = c;
            self.context_len[1] += 1;
        }
    }

    pub(crate) fn clear(&mut self) {
        self.scratch_flags = BufferScratchFlags::empty();
        self.direction = Direction::Invalid;
        self.script = None;
        self.language = None;
        self.limit = None;
        self.len = 0;
        self.out_len = 0;
        self.idx = 0;
        self.have_output = false;
        self.have_positions = false;
        self.serial = 0;
        self.random_state = 1;
        self.context_len = [0, 0];
    }

    /// Grows the backing arrays, honoring `max_len`.
    pub(crate) fn ensure(&mut self, size: usize) -> bool {
        if size > self.max_len {
            self.limit.get_or_insert(ShapingLimit::MaxLength);
            return false;
        }
        if self.info.len() < size {
            self.info.resize(size, GlyphInfo::default());
            self.pos.resize(size, GlyphPosition::default());
        }
        true
    }

    pub(crate) fn set_len(&mut self, len: usize) {
        debug_assert!(len <= self.info.len());
        self.len = len;
    }

    /// Decrements the operation budget; returns `false` once exhausted.
    pub(crate) fn consume_op(&mut self) -> bool {
        self.max_ops -= 1;
        if self.max_ops <= 0 {
            self.limit.get_or_insert(ShapingLimit::MaxOperations);
            return false;
        }
        true
    }

    #[inline]
    pub(crate) fn in_error(&self) -> bool {
        self.limit.is_some()
    }

    /// Appends one item. Clusters are auto-assigned in input order.
    pub(crate) fn add(&mut self, codepoint: u32, cluster: u32) {
        if !self.ensure(self.len + 1) {
            return;
        }
        self.info[self.len] = GlyphInfo {
            codepoint,
            cluster,
            ..GlyphInfo::default()
        };
        self.len += 1;
    }

    pub fn reverse(&mut self) {
        if self.len == 0 {
            return;
        }
        self.reverse_range(0, self.len);
    }

    pub(crate) fn reverse_range(&mut self, start: usize, end: usize) {
        self.info[start..end].reverse();
        if self.have_positions {
            self.pos[start..end].reverse();
        }
    }

    /// Reverses each maximal run with equal values of `group`, then the
    /// sequence of runs.
    pub fn reverse_groups(
        &mut self,
        group: impl Fn(&GlyphInfo, &GlyphInfo) -> bool,
        merge_clusters: bool,
    ) {
        if self.len == 0 {
            return;
        }

        let mut start = 0;
        for i in 1..self.len {
            if !group(&self.info[i - 1], &self.info[i]) {
                if merge_clusters {
                    self.merge_clusters(start, i);
                }
                self.reverse_range(start, i);
                start = i;
            }
        }
        if merge_clusters {
            self.merge_clusters(start, self.len);
        }
        self.reverse_range(start, self.len);
        self.reverse();
    }

    // Dual-buffer plumbing.

    pub(crate) fn clear_output(&mut self) {
        self.have_output = true;
        self.have_positions = false;
        self.idx = 0;
        self.out_len = 0;
    }

    pub(crate) fn clear_positions(&mut self) {
        self.have_output = false;
        self.have_positions = true;
        for pos in &mut self.pos[..self.len] {
            *pos = GlyphPosition::default();
        }
    }

    /// Promotes the output view to be the input of the next pass.
    pub fn swap_buffers(&mut self) {
        if !self.have_output {
            return;
        }
        while self.idx < self.len && !self.in_error() {
            self.next_glyph();
        }
        self.len = self.out_len;
        self.idx = 0;
        self.out_len = 0;
        self.have_output = false;
    }

    fn shift_forward(&mut self, count: usize) {
        debug_assert!(self.have_output);
        if !self.ensure(self.len + count) {
            return;
        }
        self.info.copy_within(self.idx..self.len, self.idx + count);
        self.idx += count;
        self.len += count;
    }

    fn make_room_for(&mut self, num_in: usize, num_out: usize) -> bool {
        if !self.ensure(self.out_len + num_out) {
            return false;
        }
        if self.out_len + num_out > self.idx + num_in {
            let shift = self.out_len + num_out - self.idx - num_in;
            self.shift_forward(shift + 32);
        }
        !self.in_error()
    }

    /// Copies the item under the cursor to the output and advances.
    pub fn next_glyph(&mut self) {
        if self.have_output {
            if self.out_len != self.idx {
                if !self.make_room_for(1, 1) {
                    return;
                }
                self.info[self.out_len] = self.info[self.idx];
            }
            self.out_len += 1;
        }
        self.idx += 1;
    }

    pub fn next_glyphs(&mut self, n: usize) {
        for _ in 0..n {
            self.next_glyph();
        }
    }

    /// Copies the current input item to the output without consuming it.
    pub fn copy_glyph(&mut self) {
        if !self.make_room_for(0, 1) {
            return;
        }
        self.info[self.out_len] = self.info[self.idx];
        self.out_len += 1;
    }

    /// Replaces the current item's codepoint, consuming it.
    pub fn replace_glyph(&mut self, glyph: u32) {
        if self.have_output && self.out_len != self.idx {
            if !self.make_room_for(1, 1) {
                return;
            }
            self.info[self.out_len] = self.info[self.idx];
        }
        let at = if self.have_output { self.out_len } else { self.idx };
        self.info[at].codepoint = glyph;
        if self.have_output {
            self.out_len += 1;
        }
        self.idx += 1;
    }

    /// Consumes `num_in` items and emits `num_out` items carrying
    /// `glyph_data`. The outputs take the minimum cluster and the union of
    /// the consumed masks.
    pub fn replace_glyphs(&mut self, num_in: usize, num_out: usize, glyph_data: &[u32]) {
        debug_assert_eq!(num_out, glyph_data.len());
        if !self.make_room_for(num_in, num_out) {
            return;
        }
        debug_assert!(self.idx + num_in <= self.len);

        self.merge_clusters(self.idx, self.idx + num_in);

        let mut template = self.info[self.idx];
        for i in 1..num_in {
            template.mask |= self.info[self.idx + i].mask;
        }

        for &glyph in glyph_data {
            self.info[self.out_len] = template;
            self.info[self.out_len].codepoint = glyph;
            self.out_len += 1;
        }
        self.idx += num_in;
    }

    /// Emits one item to the output without consuming input.
    pub fn output_glyph(&mut self, glyph: u32) {
        if !self.make_room_for(0, 1) {
            return;
        }
        if self.idx == self.len && self.out_len == 0 {
            return;
        }

        if self.idx < self.len {
            self.info[self.out_len] = self.info[self.idx];
        } else {
            self.info[self.out_len] = self.info[self.out_len - 1];
        }
        self.info[self.out_len].codepoint = glyph;
        self.out_len += 1;
    }

    pub fn output_info(&mut self, info: GlyphInfo) {
        if !self.make_room_for(0, 1) {
            return;
        }
        self.info[self.out_len] = info;
        self.out_len += 1;
    }

    /// Consumes the current item without emitting it. Callers are expected
    /// to have merged clusters already.
    pub fn skip_glyph(&mut self) {
        self.idx += 1;
    }

    /// Repositions the cursor to output position `i`, copying or rewinding
    /// items between the views as needed.
    pub(crate) fn move_to(&mut self, i: usize) -> bool {
        if !self.have_output {
            debug_assert!(i <= self.len);
            self.idx = i;
            return true;
        }
        if self.in_error() {
            return false;
        }
        debug_assert!(i <= self.out_len + (self.len - self.idx));

        if self.out_len < i {
            let count = i - self.out_len;
            if !self.make_room_for(count, count) {
                return false;
            }
            self.info.copy_within(self.idx..self.idx + count, self.out_len);
            self.idx += count;
            self.out_len += count;
        } else if self.out_len > i {
            let count = self.out_len - i;
            if self.idx < count {
                self.shift_forward(count + 32);
                if self.in_error() {
                    return false;
                }
            }
            debug_assert!(self.idx >= count);
            self.idx -= count;
            self.out_len -= count;
            self.info.copy_within(self.out_len..self.out_len + count, self.idx);
        }
        true
    }

    /// Skips the current item, merging its cluster into a surviving
    /// neighbor.
    pub(crate) fn delete_glyph(&mut self) {
        let cluster = self.info[self.idx].cluster;

        if self.idx + 1 < self.len && cluster == self.info[self.idx + 1].cluster {
            // The following item continues the cluster; nothing to merge.
        } else if self.out_len > 0 {
            // Merge into the previous output item.
            if self.prev().cluster != cluster {
                let mask = self.info[self.idx].mask & GLYPH_FLAGS_RESERVED;
                self.prev_mut().mask |= mask;
            }
            let prev_cluster = self.prev().cluster;
            let min = prev_cluster.min(cluster);
            for i in (0..self.out_len).rev() {
                if self.info[i].cluster != prev_cluster {
                    break;
                }
                self.info[i].cluster = min;
            }
        }

        self.idx += 1;
    }

    /// Removes items matching `filter` in place, preserving cluster
    /// monotonicity. Used after positioning, when the in/out machinery is
    /// no longer active.
    pub fn delete_glyphs_inplace(&mut self, filter: impl Fn(&GlyphInfo) -> bool) {
        let mut j = 0;
        for i in 0..self.len {
            if filter(&self.info[i]) {
                // Merge the deleted item's cluster into the survivor next
                // to it.
                let cluster = self.info[i].cluster;
                let mask = self.info[i].mask & GLYPH_FLAGS_RESERVED;
                if j > 0 && self.info[j - 1].cluster == cluster {
                    self.info[j - 1].mask |= mask;
                }
                continue;
            }

            if j != i {
                self.info[j] = self.info[i];
                self.pos[j] = self.pos[i];
            }
            j += 1;
        }
        self.len = j;
    }

    // Clusters.

    fn cluster_range_min(&self, start: usize, end: usize) -> u32 {
        self.info[start..end]
            .iter()
            .map(|i| i.cluster)
            .min()
            .unwrap_or(0)
    }

    /// Sets clusters in `[start, end)` (after extending the range to whole
    /// clusters) to their minimum, propagating safety flags.
    pub fn merge_clusters(&mut self, start: usize, end: usize) {
        if end - start < 2 {
            return;
        }
        self.merge_clusters_impl(start, end);
    }

    fn merge_clusters_impl(&mut self, mut start: usize, mut end: usize) {
        let mut cluster = self.cluster_range_min(start, end);

        // Extend to full clusters.
        while end < self.len && self.info[end - 1].cluster == self.info[end].cluster {
            end += 1;
        }
        while self.idx < start && self.info[start - 1].cluster == self.info[start].cluster {
            start -= 1;
        }

        // If we reached the start of the input view, continue into the
        // output view.
        if self.idx == start && self.have_output {
            let first_cluster = self.info[start].cluster;
            for i in (0..self.out_len).rev() {
                if self.info[i].cluster != first_cluster {
                    break;
                }
                cluster = cluster.min(self.info[i].cluster);
                self.info[i].cluster = cluster;
            }
        }

        let flags: Mask = self.info[start..end]
            .iter()
            .filter(|i| i.cluster != cluster)
            .fold(0, |acc, i| acc | (i.mask & GLYPH_FLAGS_RESERVED));

        for i in start..end {
            if self.info[i].cluster != cluster {
                self.info[i].mask |= flags;
                self.info[i].cluster = cluster;
            }
        }

        if flags != 0 {
            self.scratch_flags |= BufferScratchFlags::HAS_GLYPH_FLAGS;
        }
    }

    /// Calls `f` with the bounds of every maximal run of items sharing a
    /// cluster id.
    pub fn group_clusters(&self, mut f: impl FnMut(usize, usize)) {
        let mut start = 0;
        while start < self.len {
            let cluster = self.info[start].cluster;
            let mut end = start + 1;
            while end < self.len && self.info[end].cluster == cluster {
                end += 1;
            }
            f(start, end);
            start = end;
        }
    }

    /// Merges clusters in the output view.
    pub(crate) fn merge_out_clusters(&mut self, mut start: usize, mut end: usize) {
        if end - start < 2 {
            return;
        }

        let mut cluster = u32::MAX;
        for i in start..end {
            cluster = cluster.min(self.info[i].cluster);
        }

        while end < self.out_len && self.info[end - 1].cluster == self.info[end].cluster {
            end += 1;
        }
        while 0 < start && self.info[start - 1].cluster == self.info[start].cluster {
            start -= 1;
        }

        for i in start..end {
            self.info[i].cluster = cluster;
        }
    }

    // Safety flags.

    fn set_glyph_flags_range(&mut self, mask: Mask, start: usize, end: usize) {
        if start >= end {
            return;
        }
        let cluster = self.cluster_range_min(start, end);
        let mut changed = false;
        for info in &mut self.info[start..end] {
            if info.cluster != cluster {
                info.mask |= mask;
                changed = true;
            }
        }
        if changed {
            self.scratch_flags |= BufferScratchFlags::HAS_GLYPH_FLAGS;
        }
    }

    /// Marks `[start, end)` of the input view unsafe to re-break.
    pub fn unsafe_to_break(&mut self, start: usize, end: usize) {
        self.set_glyph_flags_range(
            (GlyphFlags::UNSAFE_TO_BREAK | GlyphFlags::UNSAFE_TO_CONCAT).bits(),
            start,
            end,
        );
    }

    /// Marks `[start, end)` unsafe to split-and-concat. Only computed when
    /// the caller asked for it.
    pub fn unsafe_to_concat(&mut self, start: usize, end: usize) {
        if self.flags.contains(BufferFlags::PRODUCE_UNSAFE_TO_CONCAT) {
            self.set_glyph_flags_range(GlyphFlags::UNSAFE_TO_CONCAT.bits(), start, end);
        }
    }

    fn set_glyph_flags_from_outbuffer(&mut self, mask: Mask, start: usize, end: usize) {
        // `start` indexes the output view, `end` the input view.
        if !self.have_output {
            self.set_glyph_flags_range(mask, start, end);
            return;
        }

        debug_assert!(start <= self.out_len);
        debug_assert!(self.idx <= end);

        let mut cluster = u32::MAX;
        for i in start..self.out_len {
            cluster = cluster.min(self.info[i].cluster);
        }
        for i in self.idx..end {
            cluster = cluster.min(self.info[i].cluster);
        }

        let mut changed = false;
        for i in start..self.out_len {
            if self.info[i].cluster != cluster {
                self.info[i].mask |= mask;
                changed = true;
            }
        }
        for i in self.idx..end {
            if self.info[i].cluster != cluster {
                self.info[i].mask |= mask;
                changed = true;
            }
        }
        if changed {
            self.scratch_flags |= BufferScratchFlags::HAS_GLYPH_FLAGS;
        }
    }

    /// Marks a joining seam where a tatweel could be inserted without
    /// re-shaping. Degrades to `unsafe_to_break` unless the caller asked
    /// for tatweel tracking.
    pub(crate) fn safe_to_insert_tatweel(&mut self, start: usize, end: usize) {
        if self.flags.contains(BufferFlags::PRODUCE_SAFE_TO_INSERT_TATWEEL) {
            self.set_glyph_flags_range(GlyphFlags::SAFE_TO_INSERT_TATWEEL.bits(), start, end);
        } else {
            self.unsafe_to_break(start, end);
        }
    }

    pub fn unsafe_to_break_from_outbuffer(&mut self, start: usize, end: usize) {
        self.set_glyph_flags_from_outbuffer(
            (GlyphFlags::UNSAFE_TO_BREAK | GlyphFlags::UNSAFE_TO_CONCAT).bits(),
            start,
            end,
        );
    }

    pub fn unsafe_to_concat_from_outbuffer(&mut self, start: usize, end: usize) {
        if self.flags.contains(BufferFlags::PRODUCE_UNSAFE_TO_CONCAT) {
            self.set_glyph_flags_from_outbuffer(GlyphFlags::UNSAFE_TO_CONCAT.bits(), start, end);
        }
    }

    // Masks.

    pub(crate) fn reset_masks(&mut self, mask: Mask) {
        for info in &mut self.info[..self.len] {
            info.mask = mask;
        }
    }

    /// Rewrites the masked slice of every item whose cluster lies in
    /// `[cluster_start, cluster_end)`.
    pub fn set_masks(
        &mut self,
        mut value: Mask,
        mask: Mask,
        cluster_start: u32,
        cluster_end: u32,
    ) {
        if mask == 0 {
            return;
        }
        value &= mask;
        let not_mask = !mask;

        if cluster_start == 0 && cluster_end == u32::MAX {
            for info in &mut self.info[..self.len] {
                info.mask = (info.mask & not_mask) | value;
            }
            return;
        }

        for info in &mut self.info[..self.len] {
            if cluster_start <= info.cluster && info.cluster < cluster_end {
                info.mask = (info.mask & not_mask) | value;
            }
        }
    }

    // Serials and the rand PRNG.

    pub(crate) fn next_serial(&mut self) -> u8 {
        self.serial = self.serial.wrapping_add(1);
        self.serial
    }

    pub(crate) fn allocate_lig_id(&mut self) -> u8 {
        let mut lig_id = self.next_serial() & 0x07;
        if lig_id == 0 {
            // Zero means "no ligature"; skip it.
            lig_id = self.next_serial() & 0x07 | 1;
        }
        lig_id
    }

    /// splitmix64 step; deterministic per shape call.
    pub(crate) fn next_random(&mut self) -> u32 {
        self.random_state = self.random_state.wrapping_add(0x9E37_79B9_7F4A_7C15);
        let mut z = self.random_state;
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        (z ^ (z >> 31)) as u32
    }

    /// Called at the start of a shape call.
    pub(crate) fn enter(&mut self, face_id: u64) {
        self.serial = 0;
        self.random_state = face_id ^ 0x5851_F42D_4C95_7F2D;
        self.scratch_flags = BufferScratchFlags::empty();
        self.limit = None;
        self.max_len = (self.len * MAX_LEN_FACTOR).max(MAX_LEN_MIN);
        self.max_ops = (self.len as i32)
            .saturating_mul(MAX_OPS_FACTOR)
            .max(MAX_OPS_MIN);
    }

    /// Called at the end of a shape call.
    pub(crate) fn leave(&mut self) {
        self.max_len = MAX_LEN_MIN;
        self.max_ops = MAX_OPS_MIN;
    }
}

/// A buffer holding Unicode text and segment properties, ready to shape.
pub struct UnicodeBuffer(pub(crate) Buffer);

impl UnicodeBuffer {
    pub fn new() -> Self {
        UnicodeBuffer(Buffer::new())
    }

    pub fn len(&self) -> usize {
        self.0.len
    }

    pub fn is_empty(&self) -> bool {
        self.0.len == 0
    }

    /// Appends one character. The cluster id is auto-assigned in input
    /// order; explicit cluster input is not accepted.
    pub fn add(&mut self, c: char) {
        let cluster = self.0.len as u32;
        self.0.add(c as u32, cluster);
    }

    /// Appends a string.
    pub fn push_str(&mut self, text: &str) {
        for c in text.chars() {
            self.add(c);
        }
    }

    /// Records up to five characters of out-of-run context on each side.
    /// Context influences edge matching only; it is never emitted.
    pub fn set_pre_context(&mut self, text: &str) {
        self.0.set_pre_context(text);
    }

    pub fn set_post_context(&mut self, text: &str) {
        self.0.set_post_context(text);
    }

    pub fn set_direction(&mut self, direction: Direction) {
        self.0.direction = direction;
    }

    pub fn direction(&self) -> Direction {
        self.0.direction
    }

    pub fn set_script(&mut self, script: Script) {
        self.0.script = Some(script);
    }

    pub fn script(&self) -> Option<Script> {
        self.0.script
    }

    pub fn set_language(&mut self, language: Language) {
        self.0.language = Some(language);
    }

    pub fn language(&self) -> Option<&Language> {
        self.0.language.as_ref()
    }

    pub fn set_flags(&mut self, flags: BufferFlags) {
        self.0.flags = flags;
    }

    pub fn flags(&self) -> BufferFlags {
        self.0.flags
    }

    pub fn set_cluster_level(&mut self, level: ClusterLevel) {
        self.0.cluster_level = level;
    }

    /// Overrides the glyph used to render hidden default-ignorables.
    pub fn set_invisible_glyph(&mut self, glyph: Option<GlyphId>) {
        self.0.invisible = glyph;
    }

    /// Fills unset segment properties from the buffer contents: the script
    /// of the first script-ful character, the script's native direction and
    /// a default language.
    pub fn guess_segment_properties(&mut self) {
        if self.0.script.is_none() {
            for info in self.0.info() {
                let script = Script::from_char(info.as_char());
                if script != crate::script::COMMON
                    && script != crate::script::INHERITED
                    && script != crate::script::UNKNOWN
                {
                    self.0.script = Some(script);
                    break;
                }
            }
        }

        if self.0.direction == Direction::Invalid {
            self.0.direction = self
                .0
                .script
                .and_then(Direction::from_script)
                .unwrap_or(Direction::LeftToRight);
        }

        if self.0.language.is_none() {
            self.0.language = Some(Language::default());
        }
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }
}

impl Default for UnicodeBuffer {
    fn default() -> Self {
        UnicodeBuffer::new()
    }
}

impl core::fmt::Debug for UnicodeBuffer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("UnicodeBuffer")
            .field("len", &self.0.len)
            .field("direction", &self.0.direction)
            .field("script", &self.0.script)
            .finish()
    }
}

/// The result of shaping: parallel glyph-info and position arrays in the
/// target direction.
pub struct GlyphBuffer(pub(crate) Buffer);

impl GlyphBuffer {
    pub fn len(&self) -> usize {
        self.0.len
    }

    pub fn is_empty(&self) -> bool {
        self.0.len == 0
    }

    pub fn glyph_infos(&self) -> &[GlyphInfo] {
        self.0.info()
    }

    pub fn glyph_positions(&self) -> &[GlyphPosition] {
        self.0.pos()
    }

    /// Reclaims the allocation for the next shape call. The plan cache
    /// carried by the buffer survives.
    pub fn clear(mut self) -> UnicodeBuffer {
        self.0.clear();
        UnicodeBuffer(self.0)
    }

    /// Compact text form used by the test suite:
    /// `glyph=cluster@x_offset,y_offset+x_advance` per item, `|`-separated.
    /// Zero offsets are omitted.
    pub fn serialize(&self) -> String {
        use core::fmt::Write;

        let mut s = String::new();
        for (i, (info, pos)) in self.glyph_infos().iter().zip(self.glyph_positions()).enumerate() {
            if i != 0 {
                s.push('|');
            }
            let _ = write!(s, "{}={}", info.codepoint, info.cluster);
            if pos.x_offset != 0 || pos.y_offset != 0 {
                let _ = write!(s, "@{},{}", pos.x_offset, pos.y_offset);
            }
            let _ = write!(s, "+{}", pos.x_advance);
        }
        s
    }
}

impl core::fmt::Debug for GlyphBuffer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.serialize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer_with(codepoints: &[u32]) -> Buffer {
        let mut buffer = Buffer::new();
        for (i, c) in codepoints.iter().enumerate() {
            buffer.add(*c, i as u32);
        }
        buffer
    }

    #[test]
    fn replace_glyphs_takes_min_cluster_and_mask_union() {
        let mut buffer = buffer_with(&[10, 11, 12]);
        buffer.info[0].mask = 0x100;
        buffer.info[1].mask = 0x200;
        buffer.enter(0);
        buffer.clear_output();

        buffer.replace_glyphs(2, 1, &[99]);
        buffer.next_glyph();
        buffer.swap_buffers();

        assert_eq!(buffer.len, 2);
        assert_eq!(buffer.info[0].codepoint, 99);
        assert_eq!(buffer.info[0].cluster, 0);
        assert_eq!(buffer.info[0].mask, 0x300);
        assert_eq!(buffer.info[1].codepoint, 12);
    }

    #[test]
    fn replace_one_with_many_keeps_cluster() {
        let mut buffer = buffer_with(&[10, 11]);
        buffer.enter(0);
        buffer.clear_output();

        buffer.replace_glyphs(1, 3, &[1, 2, 3]);
        buffer.next_glyph();
        buffer.swap_buffers();

        assert_eq!(buffer.len, 4);
        let clusters: Vec<u32> = buffer.info().iter().map(|i| i.cluster).collect();
        assert_eq!(clusters, &[0, 0, 0, 1]);
    }

    #[test]
    fn merge_clusters_propagates_safety_flags() {
        let mut buffer = buffer_with(&[10, 11, 12]);
        buffer.info[2].mask = GlyphFlags::UNSAFE_TO_BREAK.bits();
        buffer.merge_clusters(0, 3);

        for info in buffer.info() {
            assert_eq!(info.cluster, 0);
            assert!(info.mask & GlyphFlags::UNSAFE_TO_BREAK.bits() != 0);
        }
    }

    #[test]
    fn unsafe_to_break_skips_single_cluster_ranges() {
        let mut buffer = buffer_with(&[10, 11]);
        buffer.info[1].cluster = 0;
        buffer.unsafe_to_break(0, 2);
        // A range within one cluster needs no flag; breaks can only happen
        // at cluster boundaries.
        assert_eq!(buffer.info[0].mask, 0);
        assert_eq!(buffer.info[1].mask, 0);

        let mut buffer = buffer_with(&[10, 11]);
        buffer.unsafe_to_break(0, 2);
        assert!(buffer.info[1].mask & GlyphFlags::UNSAFE_TO_BREAK.bits() != 0);
    }

    #[test]
    fn set_masks_respects_cluster_range() {
        let mut buffer = buffer_with(&[10, 11, 12]);
        buffer.set_masks(0xF0, 0xF0, 1, 2);
        assert_eq!(buffer.info[0].mask, 0);
        assert_eq!(buffer.info[1].mask, 0xF0);
        assert_eq!(buffer.info[2].mask, 0);
    }

    #[test]
    fn delete_glyphs_inplace_merges_clusters() {
        let mut buffer = buffer_with(&[10, 11, 12]);
        buffer.have_positions = true;
        buffer.delete_glyphs_inplace(|info| info.codepoint == 11);
        assert_eq!(buffer.len, 2);
        assert_eq!(buffer.info[0].codepoint, 10);
        assert_eq!(buffer.info[1].codepoint, 12);
    }

    #[test]
    fn length_budget_trips() {
        let mut buffer = buffer_with(&[10]);
        buffer.max_len = 4;
        assert!(!buffer.ensure(5));
        assert_eq!(buffer.limit, Some(ShapingLimit::MaxLength));
    }

    #[test]
    fn cluster_level_options() {
        assert!(ClusterLevel::from_u32(0).is_ok());
        assert!(matches!(
            ClusterLevel::from_u32(1),
            Err(ShapeError::UnsupportedOption(_))
        ));
        assert!(matches!(
            ClusterLevel::from_u32(2),
            Err(ShapeError::UnsupportedOption(_))
        ));
    }
}
