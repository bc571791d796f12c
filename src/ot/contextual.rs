//! The shared (chain-)context interpreter. GSUB and GPOS decode their
//! contextual subtables into the same rule shapes; the nested actions
//! recurse through [`ApplyContext::recurse`].

use crate::ot::apply::{ApplyContext, MAX_CONTEXT_LENGTH};
use crate::ot::matching::{
    match_backtrack, match_class, match_coverage, match_glyph, match_input, match_lookahead,
    MatchedInput,
};
use crate::tables::gsubgpos::{
    ChainContextLookup, ContextLookup, LookupRecord,
};

pub(crate) fn apply_context(ctx: &mut ApplyContext, lookup: &ContextLookup) -> Option<()> {
    let glyph = ctx.buffer.cur(0).as_glyph();

    match lookup {
        ContextLookup::Format1 { coverage, sets } => {
            let index = coverage.get(glyph)?;
            let set = sets.get(usize::from(index))?;
            for rule in set {
                let f = match_glyph(&rule.input);
                if let Some(matched) = match_input(ctx, rule.input.len(), &f) {
                    apply_matched(ctx, &matched, &rule.lookups);
                    return Some(());
                }
            }
            None
        }
        ContextLookup::Format2 { coverage, classes, sets } => {
            coverage.get(glyph)?;
            let class = classes.get(glyph);
            let set = sets.get(usize::from(class))?;
            for rule in set {
                let f = match_class(classes, &rule.input);
                if let Some(matched) = match_input(ctx, rule.input.len(), &f) {
                    apply_matched(ctx, &matched, &rule.lookups);
                    return Some(());
                }
            }
            None
        }
        ContextLookup::Format3 { coverages, lookups } => {
            let first = coverages.first()?;
            first.get(glyph)?;
            let f = match_coverage(&coverages[1..]);
            let matched = match_input(ctx, coverages.len() - 1, &f)?;
            ctx.buffer.unsafe_to_break(ctx.buffer.idx, matched.end);
            apply_matched(ctx, &matched, lookups);
            Some(())
        }
    }
}

pub(crate) fn apply_chain_context(
    ctx: &mut ApplyContext,
    lookup: &ChainContextLookup,
) -> Option<()> {
    let glyph = ctx.buffer.cur(0).as_glyph();

    match lookup {
        ChainContextLookup::Format1 { coverage, sets } => {
            let index = coverage.get(glyph)?;
            let set = sets.get(usize::from(index))?;
            for rule in set {
                let input_f = match_glyph(&rule.input);
                let backtrack_f = match_glyph(&rule.backtrack);
                let lookahead_f = match_glyph(&rule.lookahead);
                if let Some(()) = try_chain_rule(
                    ctx,
                    rule.backtrack.len(),
                    &backtrack_f,
                    rule.input.len(),
                    &input_f,
                    rule.lookahead.len(),
                    &lookahead_f,
                    &rule.lookups,
                ) {
                    return Some(());
                }
            }
            None
        }
        ChainContextLookup::Format2 {
            coverage,
            backtrack_classes,
            input_classes,
            lookahead_classes,
            sets,
        } => {
            coverage.get(glyph)?;
            let class = input_classes.get(glyph);
            let set = sets.get(usize::from(class))?;
            for rule in set {
                let input_f = match_class(input_classes, &rule.input);
                let backtrack_f = match_class(backtrack_classes, &rule.backtrack);
                let lookahead_f = match_class(lookahead_classes, &rule.lookahead);
                if let Some(()) = try_chain_rule(
                    ctx,
                    rule.backtrack.len(),
                    &backtrack_f,
                    rule.input.len(),
                    &input_f,
                    rule.lookahead.len(),
                    &lookahead_f,
                    &rule.lookups,
                ) {
                    return Some(());
                }
            }
            None
        }
        ChainContextLookup::Format3 {
            backtrack,
            input,
            lookahead,
            lookups,
        } => {
            let first = input.first()?;
            first.get(glyph)?;
            let input_f = match_coverage(&input[1..]);
            let backtrack_f = match_coverage(backtrack);
            let lookahead_f = match_coverage(lookahead);
            try_chain_rule(
                ctx,
                backtrack.len(),
                &backtrack_f,
                input.len() - 1,
                &input_f,
                lookahead.len(),
                &lookahead_f,
                lookups,
            )
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn try_chain_rule(
    ctx: &mut ApplyContext,
    backtrack_len: usize,
    backtrack_f: &dyn Fn(ttf_parser::GlyphId, usize) -> bool,
    input_len: usize,
    input_f: &dyn Fn(ttf_parser::GlyphId, usize) -> bool,
    lookahead_len: usize,
    lookahead_f: &dyn Fn(ttf_parser::GlyphId, usize) -> bool,
    records: &[LookupRecord],
) -> Option<()> {
    let matched = match_input(ctx, input_len, input_f)?;
    let start = match_backtrack(ctx, backtrack_len, backtrack_f)?;
    let end = match_lookahead(ctx, lookahead_len, lookahead_f, matched.end - ctx.buffer.idx)?;

    if backtrack_len > 0 {
        // The match depended on items already written out; splitting the
        // text here and re-concatenating is not safe.
        ctx.buffer.unsafe_to_concat_from_outbuffer(start, end);
    }
    ctx.buffer.unsafe_to_break(ctx.buffer.idx, matched.end.max(end.min(ctx.buffer.len)));

    apply_matched(ctx, &matched, records);
    Some(())
}

/// Runs the nested-lookup actions of a matched rule, keeping the recorded
/// match positions valid across buffer length changes.
pub(crate) fn apply_matched(
    ctx: &mut ApplyContext,
    matched: &MatchedInput,
    records: &[LookupRecord],
) {
    let mut count = matched.len;
    let mut positions = matched.positions;

    // Convert positions to output-buffer indexing.
    let mut end = {
        let backtrack_len = ctx.buffer.backtrack_len();
        let delta = backtrack_len as isize - ctx.buffer.idx as isize;
        for position in positions.iter_mut().take(count) {
            *position = (*position as isize + delta) as usize;
        }
        backtrack_len + matched.end - ctx.buffer.idx
    };

    for record in records {
        if ctx.buffer.in_error() {
            break;
        }

        let idx = usize::from(record.sequence_index);
        if idx >= count {
            continue;
        }

        // Don't recurse into ourselves at the same position; catches the
        // trivial loops, deeper ones hit the recursion budget.
        if idx == 0 && record.lookup_index == ctx.lookup_index {
            continue;
        }

        let orig_len = ctx.buffer.backtrack_len() + ctx.buffer.lookahead_len();

        // An earlier recursion may have deleted past this position.
        if positions[idx] >= orig_len {
            continue;
        }

        if !ctx.buffer.move_to(positions[idx]) {
            break;
        }

        if ctx.recurse(record.lookup_index).is_none() {
            continue;
        }

        let new_len = ctx.buffer.backtrack_len() + ctx.buffer.lookahead_len();
        let mut delta = new_len as isize - orig_len as isize;
        if delta == 0 {
            continue;
        }

        // The nested lookup changed the buffer length. Assume the change
        // happened right after the position it applied at and shift the
        // remaining match positions.
        end = (end as isize + delta).max(0) as usize;
        if end < positions[idx] {
            // Never rewind past the position itself; the nested lookup
            // cannot have removed items before it.
            delta += positions[idx] as isize - end as isize;
            end = positions[idx];
        }

        let mut next = idx + 1;
        if delta > 0 {
            if delta as usize + count > MAX_CONTEXT_LENGTH {
                break;
            }
        } else {
            delta = delta.max(next as isize - count as isize);
            next = (next as isize - delta) as usize;
        }

        // Shift the tail of match positions.
        let tail = count - next;
        let new_next = (next as isize + delta) as usize;
        if delta > 0 {
            for k in (0..tail).rev() {
                positions[new_next + k] = positions[next + k];
            }
        } else {
            for k in 0..tail {
                positions[new_next + k] = positions[next + k];
            }
        }
        let next_after = new_next;
        count = (count as isize + delta) as usize;

        // Fill in entries for newly inserted items...
        for j in idx + 1..next_after {
            positions[j] = positions[j - 1] + 1;
        }
        // ...and shift the rest.
        for position in positions.iter_mut().take(count).skip(next_after) {
            *position = (*position as isize + delta) as usize;
        }
    }

    ctx.buffer.move_to(end);
}
