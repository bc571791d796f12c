//! Positioning subtable appliers, attachment-chain finalization and
//! mark-width zeroing.

use crate::buffer::{attach_type, Buffer, BufferScratchFlags, GlyphPosition};
use crate::common::Direction;
use crate::face::Face;
use crate::ot::apply::ApplyContext;
use crate::ot::contextual::{apply_chain_context, apply_context};
use crate::ot::matching::SkippyIter;
use crate::tables::gsubgpos::{
    Anchor, CursivePos, LookupFlags, MarkBasePos, MarkLigaturePos, MarkMarkPos, MarkRecord,
    PairPos, PosLookup, PosSubtable, SinglePos, ValueRecord,
};

/// Applies the first matching subtable of `lookup` at the current cursor.
pub(crate) fn apply_once(ctx: &mut ApplyContext, lookup: &PosLookup) -> Option<()> {
    for subtable in &lookup.subtables {
        let applied = match subtable {
            PosSubtable::Single(s) => apply_single(ctx, s),
            PosSubtable::Pair(s) => apply_pair(ctx, s),
            PosSubtable::Cursive(s) => apply_cursive(ctx, s),
            PosSubtable::MarkToBase(s) => apply_mark_to_base(ctx, s),
            PosSubtable::MarkToLigature(s) => apply_mark_to_ligature(ctx, s),
            PosSubtable::MarkToMark(s) => apply_mark_to_mark(ctx, s),
            PosSubtable::Context(s) => apply_context(ctx, s),
            PosSubtable::ChainContext(s) => apply_chain_context(ctx, s),
        };
        if applied.is_some() {
            return Some(());
        }
    }
    None
}

fn device_delta(face: &dyn Face, device: Option<crate::tables::gsubgpos::Device>) -> i32 {
    device
        .and_then(|d| face.variation_delta(d))
        .map(|d| d.round() as i32)
        .unwrap_or(0)
}

/// Adds a value record to one position, honoring the run direction for
/// advances.
fn apply_value(
    face: &dyn Face,
    direction: Direction,
    value: &ValueRecord,
    pos: &mut GlyphPosition,
) {
    pos.x_offset += i32::from(value.x_placement) + device_delta(face, value.x_placement_device);
    pos.y_offset += i32::from(value.y_placement) + device_delta(face, value.y_placement_device);

    if direction.is_horizontal() {
        pos.x_advance += i32::from(value.x_advance) + device_delta(face, value.x_advance_device);
    } else {
        // y_advance values grow downward while font space grows upward.
        pos.y_advance -= i32::from(value.y_advance) + device_delta(face, value.y_advance_device);
    }
}

fn resolve_anchor(face: &dyn Face, anchor: &Anchor) -> (i32, i32) {
    let x = i32::from(anchor.x) + device_delta(face, anchor.x_device);
    let y = i32::from(anchor.y) + device_delta(face, anchor.y_device);
    (x, y)
}

fn apply_single(ctx: &mut ApplyContext, subtable: &SinglePos) -> Option<()> {
    let glyph = ctx.buffer.cur(0).as_glyph();
    let value = match subtable {
        SinglePos::Format1 { coverage, value } => {
            coverage.get(glyph)?;
            *value
        }
        SinglePos::Format2 { coverage, values } => {
            let index = coverage.get(glyph)?;
            *values.get(usize::from(index))?
        }
    };

    let direction = ctx.buffer.direction;
    apply_value(ctx.face, direction, &value, ctx.buffer.cur_pos_mut());
    ctx.buffer.idx += 1;
    Some(())
}

fn apply_pair(ctx: &mut ApplyContext, subtable: &PairPos) -> Option<()> {
    let first = ctx.buffer.cur(0).as_glyph();
    subtable.coverage().get(first)?;

    let mut iter = SkippyIter::new(ctx, ctx.buffer.idx, 1, false);
    if !iter.next() {
        return None;
    }
    let j = iter.index();
    let second = ctx.buffer.info[j].as_glyph();

    let (value1, value2) = match subtable {
        PairPos::Format1 { coverage, sets } => {
            let index = coverage.get(first)?;
            let set = sets.get(usize::from(index))?;
            let record = set
                .iter()
                .find(|r| r.second_glyph == second)?;
            (record.value1, record.value2)
        }
        PairPos::Format2 { coverage, classes1, classes2, class2_count, matrix } => {
            coverage.get(first)?;
            let class1 = classes1.get(first);
            let class2 = classes2.get(second);
            let cell = usize::from(class1) * usize::from(*class2_count) + usize::from(class2);
            let (v1, v2) = matrix.get(cell)?;
            (*v1, *v2)
        }
    };

    let direction = ctx.buffer.direction;
    let idx = ctx.buffer.idx;
    apply_value(ctx.face, direction, &value1, &mut ctx.buffer.pos[idx]);
    let has_second = !value2.is_zero();
    if has_second {
        apply_value(ctx.face, direction, &value2, &mut ctx.buffer.pos[j]);
    }

    ctx.buffer.unsafe_to_break(idx, j + 1);
    ctx.buffer.idx = j + usize::from(has_second);
    Some(())
}

fn reverse_cursive_minor_offset(
    pos: &mut [GlyphPosition],
    i: usize,
    direction: Direction,
    new_parent: usize,
) {
    let chain = pos[i].attach_chain();
    let kind = pos[i].attach_type();
    if chain == 0 || kind != attach_type::CURSIVE {
        return;
    }

    pos[i].set_attach_chain(0);

    let j = (i as isize + isize::from(chain)) as usize;
    // Stop if we hit the new parent; some fonts make circular chains.
    if j == new_parent {
        return;
    }
    reverse_cursive_minor_offset(pos, j, direction, new_parent);

    if direction.is_horizontal() {
        pos[j].y_offset = -pos[i].y_offset;
    } else {
        pos[j].x_offset = -pos[i].x_offset;
    }

    pos[j].set_attach_chain(-chain);
    pos[j].set_attach_type(attach_type::CURSIVE);
}

fn apply_cursive(ctx: &mut ApplyContext, subtable: &CursivePos) -> Option<()> {
    let this_glyph = ctx.buffer.cur(0).as_glyph();
    let this_index = subtable.coverage.get(this_glyph)?;
    let this_record = subtable.entry_exits.get(usize::from(this_index))?;
    let entry_anchor = this_record.entry.as_ref()?;

    let mut iter = SkippyIter::new(ctx, ctx.buffer.idx, 1, false);
    if !iter.prev() {
        return None;
    }
    let j = iter.index();

    let prev_glyph = ctx.buffer.info[j].as_glyph();
    let prev_index = subtable.coverage.get(prev_glyph)?;
    let prev_record = subtable.entry_exits.get(usize::from(prev_index))?;
    let exit_anchor = prev_record.exit.as_ref()?;

    let i = ctx.buffer.idx;
    let (exit_x, exit_y) = resolve_anchor(ctx.face, exit_anchor);
    let (entry_x, entry_y) = resolve_anchor(ctx.face, entry_anchor);

    let direction = ctx.buffer.direction;
    let pos = &mut ctx.buffer.pos;

    match direction {
        Direction::LeftToRight => {
            pos[j].x_advance = exit_x + pos[j].x_offset;
            let d = entry_x + pos[i].x_offset;
            pos[i].x_advance -= d;
            pos[i].x_offset -= d;
        }
        Direction::RightToLeft => {
            let d = exit_x + pos[j].x_offset;
            pos[j].x_advance -= d;
            pos[j].x_offset -= d;
            pos[i].x_advance = entry_x + pos[i].x_offset;
        }
        Direction::TopToBottom => {
            pos[j].y_advance = exit_y + pos[j].y_offset;
            let d = entry_y + pos[i].y_offset;
            pos[i].y_advance -= d;
            pos[i].y_offset -= d;
        }
        Direction::BottomToTop | Direction::Invalid => {
            let d = exit_y + pos[j].y_offset;
            pos[j].y_advance -= d;
            pos[j].y_offset -= d;
            pos[i].y_advance = entry_y + pos[i].y_offset;
        }
    }

    // Attach the child (leaf-ward glyph) to the parent. With RIGHT_TO_LEFT
    // lookup semantics the earlier glyph is the child.
    let (mut child, mut parent) = (i, j);
    let mut x_offset = entry_x - exit_x;
    let mut y_offset = entry_y - exit_y;
    if LookupFlags::from_bits_truncate(ctx.lookup_props as u16)
        .contains(LookupFlags::RIGHT_TO_LEFT)
    {
        core::mem::swap(&mut child, &mut parent);
        x_offset = -x_offset;
        y_offset = -y_offset;
    }

    // If the child was attached before, reverse its old chain so the whole
    // tree hangs off the new parent.
    reverse_cursive_minor_offset(&mut ctx.buffer.pos, child, direction, parent);

    let pos = &mut ctx.buffer.pos;
    pos[child].set_attach_type(attach_type::CURSIVE);
    pos[child].set_attach_chain((parent as isize - child as isize) as i16);
    ctx.buffer.scratch_flags |= BufferScratchFlags::HAS_GPOS_ATTACHMENT;

    if direction.is_horizontal() {
        pos[child].y_offset = y_offset;
    } else {
        pos[child].x_offset = x_offset;
    }

    // If the parent was attached to the child, break the cycle.
    if i32::from(pos[parent].attach_chain())
        == -i32::from(pos[child].attach_chain())
    {
        pos[parent].set_attach_chain(0);
    }

    ctx.buffer.idx += 1;
    Some(())
}

fn attach_mark(
    ctx: &mut ApplyContext,
    mark_record: &MarkRecord,
    glyph_anchor: &Anchor,
    base_index: usize,
) {
    let (base_x, base_y) = resolve_anchor(ctx.face, glyph_anchor);
    let (mark_x, mark_y) = resolve_anchor(ctx.face, &mark_record.anchor);

    let idx = ctx.buffer.idx;
    ctx.buffer.unsafe_to_break(base_index, idx + 1);

    let pos = &mut ctx.buffer.pos[idx];
    pos.x_offset = base_x - mark_x;
    pos.y_offset = base_y - mark_y;
    pos.set_attach_type(attach_type::MARK);
    pos.set_attach_chain((base_index as isize - idx as isize) as i16);

    ctx.buffer.scratch_flags |= BufferScratchFlags::HAS_GPOS_ATTACHMENT;
    ctx.buffer.idx += 1;
}

fn apply_mark_to_base(ctx: &mut ApplyContext, subtable: &MarkBasePos) -> Option<()> {
    let mark_glyph = ctx.buffer.cur(0).as_glyph();
    let mark_index = subtable.mark_coverage.get(mark_glyph)?;

    // Walk back to the base, skipping marks regardless of this lookup's
    // flags.
    let mut iter = SkippyIter::new(ctx, ctx.buffer.idx, 1, false);
    iter.set_lookup_props(u32::from(LookupFlags::IGNORE_MARKS.bits()));
    loop {
        if !iter.prev() {
            return None;
        }
        // Only attach to the first item of a multiple-substitution
        // sequence.
        let info = &ctx.buffer.info[iter.index()];
        if !info.is_multiplied() || info.lig_comp() == 0 {
            break;
        }
    }

    let base_index = iter.index();
    let base_glyph = ctx.buffer.info[base_index].as_glyph();
    let base_coverage_index = subtable.base_coverage.get(base_glyph)?;

    let mark_record = subtable.marks.get(usize::from(mark_index))?;
    let anchors = subtable.base_anchors.get(usize::from(base_coverage_index))?;
    let anchor = anchors
        .get(usize::from(mark_record.class))
        .copied()
        .flatten()?;

    attach_mark(ctx, mark_record, &anchor, base_index);
    Some(())
}

fn apply_mark_to_ligature(ctx: &mut ApplyContext, subtable: &MarkLigaturePos) -> Option<()> {
    let mark_glyph = ctx.buffer.cur(0).as_glyph();
    let mark_index = subtable.mark_coverage.get(mark_glyph)?;

    let mut iter = SkippyIter::new(ctx, ctx.buffer.idx, 1, false);
    iter.set_lookup_props(u32::from(LookupFlags::IGNORE_MARKS.bits()));
    if !iter.prev() {
        return None;
    }

    let lig_index = iter.index();
    let lig_glyph = ctx.buffer.info[lig_index].as_glyph();
    let lig_coverage_index = subtable.ligature_coverage.get(lig_glyph)?;

    // Pick the ligature component the mark belongs to, from the ligature
    // bookkeeping laid down at substitution time.
    let lig_info = &ctx.buffer.info[lig_index];
    let mark_info = ctx.buffer.cur(0);
    let lig_id = lig_info.lig_id();
    let mark_id = mark_info.lig_id();
    let mark_comp = usize::from(mark_info.lig_comp());
    let comp_count = usize::from(lig_info.lig_num_comps());

    let comp_index = if lig_id != 0 && lig_id == mark_id && mark_comp > 0 {
        mark_comp.min(comp_count) - 1
    } else {
        comp_count - 1
    };

    let mark_record = subtable.marks.get(usize::from(mark_index))?;
    let anchor = subtable
        .ligature_anchors
        .get(usize::from(lig_coverage_index))?
        .get(comp_index)?
        .get(usize::from(mark_record.class))
        .copied()
        .flatten()?;

    attach_mark(ctx, mark_record, &anchor, lig_index);
    Some(())
}

fn apply_mark_to_mark(ctx: &mut ApplyContext, subtable: &MarkMarkPos) -> Option<()> {
    let mark1_glyph = ctx.buffer.cur(0).as_glyph();
    let mark1_index = subtable.mark1_coverage.get(mark1_glyph)?;

    // The previous mark must pass this lookup's own mark filter.
    let mut iter = SkippyIter::new(ctx, ctx.buffer.idx, 1, false);
    iter.set_lookup_props(ctx.lookup_props & !u32::from(LookupFlags::IGNORE_FLAGS.bits()));
    if !iter.prev() {
        return None;
    }

    let j = iter.index();
    if !ctx.buffer.info[j].is_mark() {
        return None;
    }

    let id1 = ctx.buffer.cur(0).lig_id();
    let id2 = ctx.buffer.info[j].lig_id();
    let comp1 = ctx.buffer.cur(0).lig_comp();
    let comp2 = ctx.buffer.info[j].lig_comp();

    let good = if id1 == id2 {
        // Marks on the same base, or on the same ligature component.
        id1 == 0 || comp1 == comp2
    } else {
        // One of the marks may itself be a ligature of marks.
        (id1 > 0 && comp1 == 0) || (id2 > 0 && comp2 == 0)
    };
    if !good {
        return None;
    }

    let mark2_glyph = ctx.buffer.info[j].as_glyph();
    let mark2_index = subtable.mark2_coverage.get(mark2_glyph)?;

    let mark_record = subtable.marks.get(usize::from(mark1_index))?;
    let anchor = subtable
        .mark2_anchors
        .get(usize::from(mark2_index))?
        .get(usize::from(mark_record.class))
        .copied()
        .flatten()?;

    attach_mark(ctx, mark_record, &anchor, j);
    Some(())
}

/// Resolves attachment chains by accumulating anchor-source offsets into
/// their dependents. Runs once after all GPOS lookups.
pub(crate) fn finish_offsets(buffer: &mut Buffer) {
    if !buffer
        .scratch_flags
        .contains(BufferScratchFlags::HAS_GPOS_ATTACHMENT)
    {
        return;
    }

    let direction = buffer.direction;
    let len = buffer.len;
    for i in 0..len {
        propagate_attachment_offsets(&mut buffer.pos[..len], i, direction);
    }
}

fn propagate_attachment_offsets(pos: &mut [GlyphPosition], i: usize, direction: Direction) {
    let chain = pos[i].attach_chain();
    let kind = pos[i].attach_type();
    if chain == 0 {
        return;
    }

    pos[i].set_attach_chain(0);

    let j = (i as isize + isize::from(chain)) as usize;
    if j >= pos.len() {
        return;
    }

    // The anchor source may itself be attached; resolve it first.
    propagate_attachment_offsets(pos, j, direction);

    if kind == attach_type::CURSIVE {
        // Minor-direction adjustment only.
        if direction.is_horizontal() {
            pos[i].y_offset += pos[j].y_offset;
        } else {
            pos[i].x_offset += pos[j].x_offset;
        }
    } else {
        pos[i].x_offset += pos[j].x_offset;
        pos[i].y_offset += pos[j].y_offset;

        debug_assert!(j < i);
        if direction.is_forward() {
            for k in j..i {
                pos[i].x_offset -= pos[k].x_advance;
                pos[i].y_offset -= pos[k].y_advance;
            }
        } else {
            for k in j + 1..i + 1 {
                pos[i].x_offset += pos[k].x_advance;
                pos[i].y_offset += pos[k].y_advance;
            }
        }
    }
}

/// Zeroes mark advances, optionally folding the removed advance into the
/// offset so the visual position is kept.
pub(crate) fn zero_mark_widths_by_gdef(buffer: &mut Buffer, adjust_offsets: bool) {
    for i in 0..buffer.len {
        if !buffer.info[i].is_mark() {
            continue;
        }
        let pos = &mut buffer.pos[i];
        if adjust_offsets {
            pos.x_offset -= pos.x_advance;
            pos.y_offset -= pos.y_advance;
        }
        pos.x_advance = 0;
        pos.y_advance = 0;
    }
}
