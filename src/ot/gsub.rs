//! Substitution subtable appliers.

use ttf_parser::GlyphId;

use crate::buffer::GlyphPropsFlags;
use crate::ot::apply::{ApplyContext, WouldApplyContext, MAX_NESTING_LEVEL};
use crate::ot::contextual::{apply_chain_context, apply_context};
use crate::ot::map;
use crate::ot::matching::{
    ligate_input, match_backtrack, match_coverage, match_glyph, match_input, match_lookahead,
};
use crate::tables::gsubgpos::{
    AlternateSubst, ChainContextLookup, ContextLookup, LigatureSubst, MultipleSubst,
    ReverseChainSingleSubst, SingleSubst, SubstLookup, SubstSubtable,
};

/// Applies the first matching subtable of `lookup` at the current cursor.
pub(crate) fn apply_once(ctx: &mut ApplyContext, lookup: &SubstLookup) -> Option<()> {
    for subtable in &lookup.subtables {
        let applied = match subtable {
            SubstSubtable::Single(s) => apply_single(ctx, s),
            SubstSubtable::Multiple(s) => apply_multiple(ctx, s),
            SubstSubtable::Alternate(s) => apply_alternate(ctx, s),
            SubstSubtable::Ligature(s) => apply_ligature(ctx, s),
            SubstSubtable::Context(s) => apply_context(ctx, s),
            SubstSubtable::ChainContext(s) => apply_chain_context(ctx, s),
            SubstSubtable::ReverseChainSingle(s) => apply_reverse_chain(ctx, s),
        };
        if applied.is_some() {
            return Some(());
        }
    }
    None
}

fn apply_single(ctx: &mut ApplyContext, subtable: &SingleSubst) -> Option<()> {
    let glyph = ctx.buffer.cur(0).as_glyph();
    let substitute = single_substitute(subtable, glyph)?;
    ctx.replace_glyph(substitute);
    Some(())
}

fn single_substitute(subtable: &SingleSubst, glyph: GlyphId) -> Option<GlyphId> {
    match subtable {
        SingleSubst::Delta { coverage, delta } => {
            coverage.get(glyph)?;
            Some(GlyphId((i32::from(glyph.0) + i32::from(*delta)) as u16))
        }
        SingleSubst::Map { coverage, substitutes } => {
            let index = coverage.get(glyph)?;
            substitutes.get(usize::from(index)).copied()
        }
    }
}

fn apply_multiple(ctx: &mut ApplyContext, subtable: &MultipleSubst) -> Option<()> {
    let glyph = ctx.buffer.cur(0).as_glyph();
    let index = subtable.coverage.get(glyph)?;
    let sequence = subtable.sequences.get(usize::from(index))?;

    match sequence.len() {
        0 => {
            // An empty sequence deletes the glyph.
            ctx.buffer.delete_glyph();
            Some(())
        }
        1 => {
            ctx.replace_glyph(sequence[0]);
            Some(())
        }
        _ => {
            let class = if ctx.buffer.cur(0).is_mark() {
                GlyphPropsFlags::MARK.bits()
            } else {
                0
            };
            for (i, &substitute) in sequence.iter().enumerate() {
                // Mark attachment targets the zeroth component only.
                ctx.buffer.cur_mut(0).set_lig_props_for_component(i as u8);
                ctx.output_glyph_for_component(substitute, class);
            }
            ctx.buffer.skip_glyph();
            Some(())
        }
    }
}

fn apply_alternate(ctx: &mut ApplyContext, subtable: &AlternateSubst) -> Option<()> {
    let glyph = ctx.buffer.cur(0).as_glyph();
    let index = subtable.coverage.get(glyph)?;
    let alternates = subtable.alternates.get(usize::from(index))?;
    if alternates.is_empty() {
        return None;
    }

    // The alternate index lives in the feature's bit slice of the mask.
    let shift = ctx.lookup_mask.trailing_zeros();
    let mask = ctx.lookup_mask;
    let mut alt_index = (ctx.buffer.cur(0).mask & mask) >> shift;

    // A value of MAX_VALUE requests randomization for the `rand` feature;
    // any explicit user value selects deterministically.
    if alt_index == map::MAX_VALUE && ctx.random {
        alt_index = ctx.buffer.next_random() % alternates.len() as u32 + 1;
    }

    if alt_index == 0 || alt_index > alternates.len() as u32 {
        return None;
    }

    let substitute = alternates[alt_index as usize - 1];
    ctx.replace_glyph(substitute);
    Some(())
}

fn apply_ligature(ctx: &mut ApplyContext, subtable: &LigatureSubst) -> Option<()> {
    let glyph = ctx.buffer.cur(0).as_glyph();
    let index = subtable.coverage.get(glyph)?;
    let set = subtable.ligature_sets.get(usize::from(index))?;

    for ligature in set {
        if ligature.components.is_empty() {
            // Single-component ligature; a straight replacement.
            ctx.replace_glyph_with_ligature(ligature.glyph, GlyphPropsFlags::LIGATURE.bits());
            return Some(());
        }

        let f = match_glyph(&ligature.components);
        if let Some(matched) = match_input(ctx, ligature.components.len(), &f) {
            ligate_input(ctx, &matched, ligature.glyph);
            return Some(());
        }
    }
    None
}

fn apply_reverse_chain(ctx: &mut ApplyContext, subtable: &ReverseChainSingleSubst) -> Option<()> {
    // Only applicable from the top-level backward driver; never nested.
    if ctx.nesting_level_left != MAX_NESTING_LEVEL {
        return None;
    }

    let glyph = ctx.buffer.cur(0).as_glyph();
    let index = subtable.coverage.get(glyph)?;

    let backtrack_f = match_coverage(&subtable.backtrack);
    let lookahead_f = match_coverage(&subtable.lookahead);
    match_backtrack(ctx, subtable.backtrack.len(), &backtrack_f)?;
    match_lookahead(ctx, subtable.lookahead.len(), &lookahead_f, 1)?;

    let substitute = subtable.substitutes.get(usize::from(index)).copied()?;
    ctx.replace_glyph_inplace(substitute);
    // The cursor is left in place; the backward driver steps it.
    Some(())
}

/// A no-side-effect "would this lookup substitute here?" predicate. Used
/// by shapers to preflight fallback decisions.
pub fn would_apply(ctx: &WouldApplyContext, lookup: &SubstLookup) -> bool {
    lookup
        .subtables
        .iter()
        .any(|subtable| would_apply_subtable(ctx, subtable))
}

fn would_apply_subtable(ctx: &WouldApplyContext, subtable: &SubstSubtable) -> bool {
    let first = match ctx.glyphs.first() {
        Some(g) => *g,
        None => return false,
    };

    match subtable {
        SubstSubtable::Single(s) => {
            ctx.glyphs.len() == 1 && s.coverage().get(first).is_some()
        }
        SubstSubtable::Multiple(s) => {
            ctx.glyphs.len() == 1 && s.coverage.get(first).is_some()
        }
        SubstSubtable::Alternate(s) => {
            ctx.glyphs.len() == 1 && s.coverage.get(first).is_some()
        }
        SubstSubtable::Ligature(s) => {
            let index = match s.coverage.get(first) {
                Some(i) => i,
                None => return false,
            };
            s.ligature_sets
                .get(usize::from(index))
                .map(|set| {
                    set.iter().any(|lig| {
                        lig.components.len() + 1 == ctx.glyphs.len()
                            && lig
                                .components
                                .iter()
                                .zip(&ctx.glyphs[1..])
                                .all(|(a, b)| a == b)
                    })
                })
                .unwrap_or(false)
        }
        SubstSubtable::Context(s) => would_apply_context(ctx, s),
        SubstSubtable::ChainContext(s) => would_apply_chain_context(ctx, s),
        SubstSubtable::ReverseChainSingle(_) => false,
    }
}

fn would_apply_context(ctx: &WouldApplyContext, lookup: &ContextLookup) -> bool {
    let first = ctx.glyphs[0];
    match lookup {
        ContextLookup::Format1 { coverage, sets } => {
            let index = match coverage.get(first) {
                Some(i) => i,
                None => return false,
            };
            sets.get(usize::from(index)).map_or(false, |set| {
                set.iter().any(|rule| {
                    rule.input.len() + 1 == ctx.glyphs.len()
                        && rule.input.iter().zip(&ctx.glyphs[1..]).all(|(a, b)| a == b)
                })
            })
        }
        ContextLookup::Format2 { classes, sets, .. } => {
            let class = classes.get(first);
            sets.get(usize::from(class)).map_or(false, |set| {
                set.iter().any(|rule| {
                    rule.input.len() + 1 == ctx.glyphs.len()
                        && rule
                            .input
                            .iter()
                            .zip(&ctx.glyphs[1..])
                            .all(|(value, g)| *value == classes.get(*g))
                })
            })
        }
        ContextLookup::Format3 { coverages, .. } => {
            coverages.len() == ctx.glyphs.len()
                && coverages
                    .iter()
                    .zip(ctx.glyphs)
                    .all(|(coverage, g)| coverage.contains(*g))
        }
    }
}

fn would_apply_chain_context(ctx: &WouldApplyContext, lookup: &ChainContextLookup) -> bool {
    // Zero-context queries ignore backtrack/lookahead requirements.
    match lookup {
        ChainContextLookup::Format1 { coverage, sets } => {
            let index = match coverage.get(ctx.glyphs[0]) {
                Some(i) => i,
                None => return false,
            };
            sets.get(usize::from(index)).map_or(false, |set| {
                set.iter().any(|rule| {
                    (ctx.zero_context
                        || (rule.backtrack.is_empty() && rule.lookahead.is_empty()))
                        && rule.input.len() + 1 == ctx.glyphs.len()
                        && rule.input.iter().zip(&ctx.glyphs[1..]).all(|(a, b)| a == b)
                })
            })
        }
        ChainContextLookup::Format2 { input_classes, sets, .. } => {
            let class = input_classes.get(ctx.glyphs[0]);
            sets.get(usize::from(class)).map_or(false, |set| {
                set.iter().any(|rule| {
                    (ctx.zero_context
                        || (rule.backtrack.is_empty() && rule.lookahead.is_empty()))
                        && rule.input.len() + 1 == ctx.glyphs.len()
                        && rule
                            .input
                            .iter()
                            .zip(&ctx.glyphs[1..])
                            .all(|(value, g)| *value == input_classes.get(*g))
                })
            })
        }
        ChainContextLookup::Format3 { backtrack, input, lookahead, .. } => {
            (ctx.zero_context || (backtrack.is_empty() && lookahead.is_empty()))
                && input.len() == ctx.glyphs.len()
                && input
                    .iter()
                    .zip(ctx.glyphs)
                    .all(|(coverage, g)| coverage.contains(*g))
        }
    }
}
