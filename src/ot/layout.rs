//! Script/language-system selection and the staged apply driver.

use log::trace;

use crate::buffer::{Buffer, GlyphPropsFlags};
use crate::common::{
    all_tags_from_script, Language, Script, Tag, DEFAULT_LANGUAGE_TAG, DEFAULT_SCRIPT_TAG,
    LATIN_SCRIPT_TAG,
};
use crate::face::{Face, GlyphClass};
use crate::ot::apply::{
    apply_backward, apply_forward, is_reverse_lookup, ApplyContext, LayoutTables,
};
use crate::ot::TableIndex;
use crate::plan::ShapePlan;
use crate::tables::gsubgpos::{FeatureRecord, LangSys, ScriptRecord};
use crate::unicode::GeneralCategory;

/// Result of script selection against one table.
#[derive(Clone, Copy, Debug)]
pub struct ScriptSelection {
    /// Whether a requested tag matched (as opposed to a `DFLT`/`latn`
    /// fallback).
    pub found: bool,
    pub index: Option<u16>,
    pub tag: Option<Tag>,
}

/// Candidate OT script tags for a segment, in preference order. A
/// `-x-hbsc` language override comes first.
pub(crate) fn script_tag_candidates(
    script: Option<Script>,
    language: Option<&Language>,
) -> Vec<Tag> {
    let mut tags = Vec::new();
    if let Some(tag) = language.and_then(|l| l.script_override()) {
        tags.push(tag);
    }
    if let Some(script) = script {
        tags.extend(all_tags_from_script(script));
    }
    tags
}

pub(crate) fn language_tag_candidates(language: Option<&Language>) -> Vec<Tag> {
    let mut tags = Vec::new();
    if let Some(tag) = language.and_then(|l| l.ot_tag()) {
        tags.push(tag);
    }
    tags.push(DEFAULT_LANGUAGE_TAG);
    tags
}

/// Tries each candidate tag, then `DFLT`, `dflt` and finally `latn`.
pub(crate) fn select_script(scripts: &[ScriptRecord], tags: &[Tag]) -> ScriptSelection {
    let find = |tag: Tag| scripts.iter().position(|s| s.tag == tag).map(|i| i as u16);

    for &tag in tags {
        if let Some(index) = find(tag) {
            return ScriptSelection { found: true, index: Some(index), tag: Some(tag) };
        }
    }

    for tag in [DEFAULT_SCRIPT_TAG, Tag::from_bytes(b"dflt"), LATIN_SCRIPT_TAG] {
        if let Some(index) = find(tag) {
            return ScriptSelection { found: false, index: Some(index), tag: Some(tag) };
        }
    }

    ScriptSelection { found: false, index: None, tag: None }
}

/// Which language system was selected within the chosen script.
#[derive(Clone, Copy, Debug)]
pub enum SelectedLangSys {
    /// No script at all; nothing to resolve features against.
    None,
    /// The script's default language system.
    Default,
    /// A concrete language-system record.
    Index(u16),
}

pub(crate) fn select_language(
    scripts: &[ScriptRecord],
    script_index: Option<u16>,
    tags: &[Tag],
) -> SelectedLangSys {
    let script = match script_index.and_then(|i| scripts.get(usize::from(i))) {
        Some(s) => s,
        None => return SelectedLangSys::None,
    };

    for &tag in tags {
        if let Some(pos) = script.lang_sys_records.iter().position(|r| r.tag == tag) {
            return SelectedLangSys::Index(pos as u16);
        }
    }

    if script.default_lang_sys.is_some() {
        SelectedLangSys::Default
    } else {
        SelectedLangSys::None
    }
}

fn resolve_lang_sys<'a>(
    scripts: &'a [ScriptRecord],
    script_index: Option<u16>,
    selected: &SelectedLangSys,
) -> Option<&'a LangSys> {
    let script = scripts.get(usize::from(script_index?))?;
    match selected {
        SelectedLangSys::None => None,
        SelectedLangSys::Default => script.default_lang_sys.as_ref(),
        SelectedLangSys::Index(i) => script
            .lang_sys_records
            .get(usize::from(*i))
            .map(|r| &r.lang_sys),
    }
}

pub(crate) fn find_feature(
    scripts: &[ScriptRecord],
    features: &[FeatureRecord],
    script_index: Option<u16>,
    selected: &SelectedLangSys,
    tag: Tag,
) -> Option<u16> {
    let lang_sys = resolve_lang_sys(scripts, script_index, selected)?;
    lang_sys
        .feature_indices
        .iter()
        .copied()
        .find(|&i| features.get(usize::from(i)).map(|f| f.tag) == Some(tag))
}

pub(crate) fn required_feature(
    scripts: &[ScriptRecord],
    script_index: Option<u16>,
    selected: &SelectedLangSys,
) -> Option<u16> {
    resolve_lang_sys(scripts, script_index, selected)?.required_feature
}

/// Fills every item's glyph props from GDEF, or synthesizes classes from
/// Unicode categories when the font has none.
pub(crate) fn set_glyph_props(face: &dyn Face, buffer: &mut Buffer) {
    let has_classes = face.has_glyph_classes();
    for i in 0..buffer.len {
        let info = &buffer.info[i];
        let props = if has_classes {
            match face.glyph_class(info.as_glyph()) {
                Some(GlyphClass::Base) => GlyphPropsFlags::BASE_GLYPH.bits(),
                Some(GlyphClass::Ligature) => GlyphPropsFlags::LIGATURE.bits(),
                Some(GlyphClass::Mark) => {
                    GlyphPropsFlags::MARK.bits()
                        | (face.mark_attachment_class(info.as_glyph()) << 8)
                }
                Some(GlyphClass::Component) | None => 0,
            }
        } else if info.general_category() == GeneralCategory::NonspacingMark
            && !info.is_default_ignorable()
        {
            GlyphPropsFlags::MARK.bits()
        } else {
            // Default-ignorables count as bases so lookups never skip them
            // by class.
            GlyphPropsFlags::BASE_GLYPH.bits()
        };
        buffer.info[i].set_glyph_props(props);
    }
}

/// Runs every stage of one table: its lookups, then its pause hook.
pub(crate) fn apply_stages(
    plan: &ShapePlan,
    face: &dyn Face,
    buffer: &mut Buffer,
    table: TableIndex,
) {
    let tables = LayoutTables {
        gsub: face.gsub(),
        gpos: face.gpos(),
    };

    for (stage_index, stage) in plan.ot_map.stages(table).iter().enumerate() {
        for lookup in plan.ot_map.stage_lookups(table, stage_index) {
            if buffer.in_error() {
                return;
            }
            trace!(
                "applying {:?} lookup {} (mask {:#010x})",
                table,
                lookup.index,
                lookup.mask
            );
            apply_lookup(plan, face, buffer, table, tables, lookup);
        }

        if let Some(pause) = stage.pause_func {
            pause(plan, face, buffer);
        }
    }
}

fn apply_lookup(
    plan: &ShapePlan,
    face: &dyn Face,
    buffer: &mut Buffer,
    table: TableIndex,
    tables: LayoutTables,
    lookup_map: &crate::ot::map::LookupMap,
) {
    let accel = match plan.accel(table, lookup_map.index) {
        Some(accel) => accel,
        None => return,
    };

    let mut ctx = ApplyContext::new(table, face, buffer, tables);
    ctx.lookup_index = lookup_map.index;
    ctx.lookup_mask = lookup_map.mask;
    ctx.auto_zwnj = lookup_map.auto_zwnj;
    ctx.auto_zwj = lookup_map.auto_zwj;
    ctx.random = lookup_map.random;
    ctx.per_syllable = lookup_map.per_syllable;

    match table {
        TableIndex::Gsub => {
            let lookup = match tables.gsub.and_then(|t| t.lookups.get(usize::from(lookup_map.index))) {
                Some(lookup) => lookup,
                None => return,
            };
            if lookup.subtables.is_empty() {
                return;
            }
            ctx.lookup_props =
                crate::ot::apply::lookup_props(lookup.flags, lookup.mark_filtering_set);

            if !is_reverse_lookup(lookup) {
                ctx.buffer.clear_output();
                ctx.buffer.idx = 0;
                apply_forward(&mut ctx, accel, |ctx| crate::ot::gsub::apply_once(ctx, lookup));
                ctx.buffer.swap_buffers();
            } else {
                ctx.buffer.have_output = false;
                apply_backward(&mut ctx, accel, |ctx| crate::ot::gsub::apply_once(ctx, lookup));
            }
        }
        TableIndex::Gpos => {
            let lookup = match tables.gpos.and_then(|t| t.lookups.get(usize::from(lookup_map.index))) {
                Some(lookup) => lookup,
                None => return,
            };
            if lookup.subtables.is_empty() {
                return;
            }
            ctx.lookup_props =
                crate::ot::apply::lookup_props(lookup.flags, lookup.mark_filtering_set);
            ctx.buffer.idx = 0;
            apply_forward(&mut ctx, accel, |ctx| crate::ot::gpos::apply_once(ctx, lookup));
        }
    }
}
