//! The shaping coordinator: the end-to-end pipeline from Unicode text to
//! positioned glyphs.

use crate::buffer::{
    Buffer, BufferFlags, BufferScratchFlags, GlyphBuffer, GlyphFlags, GlyphInfo, UnicodeBuffer,
    GLYPH_FLAGS_RESERVED,
};
use crate::common::{Direction, Feature};
use crate::complex::{self, ShaperRegistry, ZeroWidthMarksMode};
use crate::error::ShapeError;
use crate::face::Face;
use crate::normalize;
use crate::ot::{fallback, gpos, layout, TableIndex};
use crate::plan::ShapePlan;
use crate::unicode;

/// Shapes `buffer` against `face`, honoring `features`.
///
/// On success the returned [`GlyphBuffer`] holds glyph ids, clusters and
/// positions in the requested direction. On error no partial output is
/// exposed.
pub fn shape(
    face: &dyn Face,
    features: &[Feature],
    buffer: UnicodeBuffer,
) -> Result<GlyphBuffer, ShapeError> {
    shape_with_registry(face, complex::global_registry(), features, buffer)
}

/// [`shape`] with an explicit shaper registry; tests use this to avoid
/// touching process-wide state.
pub fn shape_with_registry(
    face: &dyn Face,
    registry: &ShaperRegistry,
    features: &[Feature],
    mut buffer: UnicodeBuffer,
) -> Result<GlyphBuffer, ShapeError> {
    buffer.guess_segment_properties();
    let mut buffer = buffer.0;
    shape_internal(face, registry, features, &mut buffer)?;
    Ok(GlyphBuffer(buffer))
}

fn shape_internal(
    face: &dyn Face,
    registry: &ShaperRegistry,
    features: &[Feature],
    buffer: &mut Buffer,
) -> Result<(), ShapeError> {
    if buffer.len == 0 {
        return Ok(());
    }

    let target_direction = buffer.direction;

    // The plan cache rides on the buffer; plans are shared, immutable.
    let mut cache = core::mem::take(&mut buffer.plan_cache);
    let plan = cache.get_or_build(
        face,
        registry,
        buffer.direction,
        buffer.script,
        buffer.language.as_ref(),
        features,
    );
    buffer.plan_cache = cache;
    let plan = plan?;

    buffer.enter(face.face_id());

    set_unicode_props(buffer);
    insert_dotted_circle(face, buffer);
    form_clusters(buffer);
    ensure_native_direction(buffer);

    if let Some(preprocess) = plan.shaper.preprocess_text {
        preprocess(&plan, face, buffer);
    }

    // Substitution.
    initialize_masks(&plan, buffer);
    rotate_chars(&plan, face, buffer);
    normalize::normalize(&plan, face, buffer);
    setup_masks(&plan, features, face, buffer);
    map_glyphs(face, buffer);

    layout::set_glyph_props(face, buffer);
    layout::apply_stages(&plan, face, buffer, TableIndex::Gsub);

    // Positioning.
    if !buffer.in_error() {
        position(&plan, face, buffer);
    }

    // Post.
    hide_default_ignorables(face, buffer);
    if let Some(postprocess) = plan.shaper.postprocess_glyphs {
        postprocess(&plan, face, buffer);
    }

    propagate_flags(buffer);

    buffer.leave();

    if let Some(limit) = buffer.limit {
        buffer.len = 0;
        return Err(ShapeError::LimitExceeded(limit));
    }

    buffer.direction = target_direction;

    Ok(())
}

fn set_unicode_props(buffer: &mut Buffer) {
    let mut scratch = buffer.scratch_flags;
    for i in 0..buffer.len {
        buffer.info[i].init_unicode_props(&mut scratch);
    }
    buffer.scratch_flags = scratch;
}

fn insert_dotted_circle(face: &dyn Face, buffer: &mut Buffer) {
    if buffer
        .flags
        .contains(BufferFlags::DO_NOT_INSERT_DOTTED_CIRCLE)
        || !buffer.flags.contains(BufferFlags::BEGINNING_OF_TEXT)
        || buffer.context_len(0) != 0
        || buffer.len == 0
        || !buffer.info[0].is_unicode_mark()
    {
        return;
    }

    if face.nominal_glyph(0x25CC).is_none() {
        return;
    }

    if !buffer.ensure(buffer.len + 1) {
        return;
    }
    buffer.info.copy_within(0..buffer.len, 1);
    let mut dotted_circle = GlyphInfo {
        codepoint: 0x25CC,
        cluster: buffer.info[1].cluster,
        mask: buffer.info[1].mask,
        ..GlyphInfo::default()
    };
    let mut scratch = buffer.scratch_flags;
    dotted_circle.init_unicode_props(&mut scratch);
    buffer.scratch_flags = scratch;
    buffer.info[0] = dotted_circle;
    buffer.len += 1;
}

fn form_clusters(buffer: &mut Buffer) {
    if !buffer
        .scratch_flags
        .contains(BufferScratchFlags::HAS_NON_ASCII)
    {
        return;
    }

    // Adjacent items in one grapheme share a cluster id.
    let mut start = 0;
    for i in 1..buffer.len + 1 {
        if i < buffer.len && buffer.info[i].is_continuation() {
            continue;
        }
        buffer.merge_clusters(start, i);
        start = i;
    }
}

fn ensure_native_direction(buffer: &mut Buffer) {
    let direction = buffer.direction;
    let horizontal_dir = buffer
        .script
        .and_then(Direction::from_script)
        .unwrap_or(Direction::LeftToRight);

    // Shapers expect text in the script's native order; the target
    // direction is restored at the very end.
    let wrong_horizontal = direction.is_horizontal() && direction != horizontal_dir;
    let wrong_vertical = direction.is_vertical() && direction != Direction::TopToBottom;
    if !wrong_horizontal && !wrong_vertical {
        return;
    }

    // Reverse the run grapheme by grapheme, keeping each grapheme's items
    // in logical order.
    buffer.reverse_groups(|_, b| b.is_continuation(), false);
    buffer.direction = direction.reverse();
}

fn initialize_masks(plan: &ShapePlan, buffer: &mut Buffer) {
    buffer.reset_masks(plan.ot_map.global_mask());
}

fn rotate_chars(plan: &ShapePlan, face: &dyn Face, buffer: &mut Buffer) {
    if buffer.direction.is_backward() {
        let rtlm_mask = plan.rtlm_mask;
        for i in 0..buffer.len {
            let c = buffer.info[i].as_char();
            if let Some(mirrored) = unicode::CharExt::mirrored(c) {
                if face.nominal_glyph(mirrored as u32).is_some() {
                    buffer.info[i].codepoint = mirrored as u32;
                } else {
                    buffer.info[i].mask |= rtlm_mask;
                }
            }
        }
    }

    if buffer.direction.is_vertical() && !plan.has_vert {
        for i in 0..buffer.len {
            buffer.info[i].codepoint = unicode::vert_char_for(buffer.info[i].codepoint);
        }
    }
}

fn setup_masks(plan: &ShapePlan, features: &[Feature], face: &dyn Face, buffer: &mut Buffer) {
    setup_masks_fraction(plan, buffer);

    if let Some(hook) = plan.shaper.setup_masks {
        hook(plan, face, buffer);
    }

    for feature in features {
        if !feature.is_global() {
            let (mask, shift) = plan.ot_map.mask(feature.tag);
            buffer.set_masks(feature.value << shift, mask, feature.start, feature.end);
        }
    }
}

fn setup_masks_fraction(plan: &ShapePlan, buffer: &mut Buffer) {
    if !buffer
        .scratch_flags
        .contains(BufferScratchFlags::HAS_NON_ASCII)
        || !plan.has_frac
    {
        return;
    }

    let (pre_mask, post_mask) = if buffer.direction.is_forward() {
        (plan.numr_mask | plan.frac_mask, plan.frac_mask | plan.dnom_mask)
    } else {
        (plan.frac_mask | plan.dnom_mask, plan.numr_mask | plan.frac_mask)
    };

    let mut i = 0;
    while i < buffer.len {
        if buffer.info[i].codepoint != 0x2044 {
            i += 1;
            continue;
        }

        // Extend over the decimal runs on both sides of FRACTION SLASH.
        let mut start = i;
        while start > 0
            && buffer.info[start - 1].general_category() == unicode::GeneralCategory::DecimalNumber
        {
            start -= 1;
        }
        let mut end = i + 1;
        while end < buffer.len
            && buffer.info[end].general_category() == unicode::GeneralCategory::DecimalNumber
        {
            end += 1;
        }

        buffer.unsafe_to_break(start, end);

        for info in &mut buffer.info[start..i] {
            info.mask |= pre_mask;
        }
        buffer.info[i].mask |= plan.frac_mask;
        for info in &mut buffer.info[i + 1..end] {
            info.mask |= post_mask;
        }

        i = end;
    }
}

fn map_glyphs(face: &dyn Face, buffer: &mut Buffer) {
    let mut i = 0;
    while i < buffer.len {
        let u = buffer.info[i].codepoint;

        // A variation-selector pair maps through the variation cmap; the
        // selector itself stays in the stream and is hidden later.
        if i + 1 < buffer.len && unicode::is_variation_selector(buffer.info[i + 1].codepoint) {
            let vs = buffer.info[i + 1].codepoint;
            if let Some(glyph) = face.variation_glyph(u, vs) {
                buffer.info[i].codepoint = u32::from(glyph.0);
                buffer.info[i + 1].codepoint = face
                    .nominal_glyph(vs)
                    .map(|g| u32::from(g.0))
                    .unwrap_or(0);
                i += 2;
                continue;
            }
        }

        buffer.info[i].codepoint = face
            .nominal_glyph(u)
            .map(|g| u32::from(g.0))
            .unwrap_or(0);
        i += 1;
    }
}

fn position(plan: &ShapePlan, face: &dyn Face, buffer: &mut Buffer) {
    buffer.clear_positions();
    position_default(face, buffer);

    let adjust_offsets_when_zeroing =
        plan.adjust_mark_positioning_when_zeroing && buffer.direction.is_forward();

    if plan.zero_marks == ZeroWidthMarksMode::ByGdefEarly {
        gpos::zero_mark_widths_by_gdef(buffer, false);
    }

    if plan.apply_gpos {
        layout::apply_stages(plan, face, buffer, TableIndex::Gpos);
    }

    fallback::adjust_spaces(face, buffer);

    if plan.zero_marks == ZeroWidthMarksMode::ByGdefLate {
        gpos::zero_mark_widths_by_gdef(buffer, adjust_offsets_when_zeroing);
    }

    zero_width_default_ignorables(buffer);

    gpos::finish_offsets(buffer);

    if plan.fallback_mark_positioning {
        fallback::position_marks(plan, face, buffer, adjust_offsets_when_zeroing);
    }

    // Shaping ran in logical order; backward runs come out in visual
    // order.
    if buffer.direction.is_backward() {
        buffer.reverse();
    }
}

fn position_default(face: &dyn Face, buffer: &mut Buffer) {
    let horizontal = buffer.direction.is_horizontal();
    for i in 0..buffer.len {
        let glyph = buffer.info[i].as_glyph();
        if horizontal {
            buffer.pos[i].x_advance = face.glyph_h_advance(glyph);
            let (x, y) = face.glyph_h_origin(glyph);
            buffer.pos[i].x_offset -= x;
            buffer.pos[i].y_offset -= y;
        } else {
            buffer.pos[i].y_advance = face.glyph_v_advance(glyph);
            let (x, y) = face.glyph_v_origin(glyph);
            buffer.pos[i].x_offset -= x;
            buffer.pos[i].y_offset -= y;
        }
    }
}

fn zero_width_default_ignorables(buffer: &mut Buffer) {
    if !buffer
        .scratch_flags
        .contains(BufferScratchFlags::HAS_DEFAULT_IGNORABLES)
        || buffer
            .flags
            .contains(BufferFlags::PRESERVE_DEFAULT_IGNORABLES)
    {
        return;
    }

    for i in 0..buffer.len {
        if buffer.info[i].is_default_ignorable() {
            buffer.pos[i] = crate::buffer::GlyphPosition {
                attach_chain: buffer.pos[i].attach_chain,
                attach_type: buffer.pos[i].attach_type,
                ..Default::default()
            };
        }
    }
}

fn hide_default_ignorables(face: &dyn Face, buffer: &mut Buffer) {
    if !buffer
        .scratch_flags
        .contains(BufferScratchFlags::HAS_DEFAULT_IGNORABLES)
        || buffer
            .flags
            .contains(BufferFlags::PRESERVE_DEFAULT_IGNORABLES)
    {
        return;
    }

    if !buffer
        .flags
        .contains(BufferFlags::REMOVE_DEFAULT_IGNORABLES)
    {
        // Render them as an invisible glyph with zero advance.
        let invisible = buffer
            .invisible
            .or_else(|| face.nominal_glyph(0x0020));
        if let Some(invisible) = invisible {
            for i in 0..buffer.len {
                if buffer.info[i].is_default_ignorable() {
                    buffer.info[i].codepoint = u32::from(invisible.0);
                }
            }
            return;
        }
    }

    buffer.delete_glyphs_inplace(|info| info.is_default_ignorable());
}

fn propagate_flags(buffer: &mut Buffer) {
    if !buffer
        .scratch_flags
        .contains(BufferScratchFlags::HAS_GLYPH_FLAGS)
    {
        return;
    }

    let flip_tatweel = buffer
        .flags
        .contains(BufferFlags::PRODUCE_SAFE_TO_INSERT_TATWEEL);
    let clear_concat = !buffer
        .flags
        .contains(BufferFlags::PRODUCE_UNSAFE_TO_CONCAT);

    // Every item of a cluster ends up with the union of its flags.
    let mut start = 0;
    while start < buffer.len {
        let cluster = buffer.info[start].cluster;
        let mut end = start + 1;
        while end < buffer.len && buffer.info[end].cluster == cluster {
            end += 1;
        }

        let mut mask = 0u32;
        for info in &buffer.info[start..end] {
            mask |= info.mask & GlyphFlags::DEFINED.bits();
        }

        if flip_tatweel {
            // Clearing must precede promotion: a tatweel point inside an
            // unsafe range is not a tatweel point at all.
            if mask & GlyphFlags::UNSAFE_TO_BREAK.bits() != 0 {
                mask &= !GlyphFlags::SAFE_TO_INSERT_TATWEEL.bits();
            }
            if mask & GlyphFlags::SAFE_TO_INSERT_TATWEEL.bits() != 0 {
                mask |=
                    GlyphFlags::UNSAFE_TO_BREAK.bits() | GlyphFlags::UNSAFE_TO_CONCAT.bits();
            }
        } else {
            mask &= !GlyphFlags::SAFE_TO_INSERT_TATWEEL.bits();
        }

        if clear_concat {
            mask &= !GlyphFlags::UNSAFE_TO_CONCAT.bits();
        }

        for info in &mut buffer.info[start..end] {
            info.mask = (info.mask & !GLYPH_FLAGS_RESERVED) | mask;
        }

        start = end;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Tag;
    use crate::tables::gsubgpos::{
        FeatureRecord, LangSys, LookupFlags, ScriptRecord, SubstLookup, SubstTable,
    };

    struct MaskFace {
        gsub: SubstTable,
    }

    impl Face for MaskFace {
        fn nominal_glyph(&self, c: u32) -> Option<ttf_parser::GlyphId> {
            Some(ttf_parser::GlyphId(c as u16))
        }
        fn glyph_h_advance(&self, _: ttf_parser::GlyphId) -> i32 {
            600
        }
        fn gsub(&self) -> Option<&SubstTable> {
            Some(&self.gsub)
        }
    }

    fn mask_face(feature_tag: Tag) -> MaskFace {
        MaskFace {
            gsub: SubstTable {
                scripts: vec![ScriptRecord {
                    tag: Tag::from_bytes(b"DFLT"),
                    default_lang_sys: Some(LangSys {
                        required_feature: None,
                        feature_indices: vec![0],
                    }),
                    lang_sys_records: Vec::new(),
                }],
                features: vec![FeatureRecord {
                    tag: feature_tag,
                    lookup_indices: vec![0],
                }],
                lookups: vec![SubstLookup {
                    flags: LookupFlags::empty(),
                    mark_filtering_set: None,
                    subtables: Vec::new(),
                }],
                variations: Vec::new(),
            },
        }
    }

    fn lcg(seed: &mut u32) -> u32 {
        *seed = seed.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
        *seed >> 16
    }

    #[test]
    fn masks_equal_global_mask_outside_user_ranges() {
        let feature_tag = Tag::from_bytes(b"smcp");
        let face = mask_face(feature_tag);
        let registry = crate::complex::ShaperRegistry::with_defaults();

        let ranges: &[(u32, u32, u32)] =
            &[(0, 2, 1), (1, 4, 3), (3, u32::MAX, 1), (2, 2, 1)];

        let mut seed = 0x51_u32;
        for len in 1..=7usize {
            // A handful of ASCII-letter strings per length; nothing here
            // triggers shaper bits or fraction masking, so only the user
            // range may diverge from the global mask.
            for _ in 0..4 {
                let codepoints: Vec<u32> =
                    (0..len).map(|_| 0x61 + lcg(&mut seed) % 26).collect();

                for &(start, end, value) in ranges {
                    let features = [Feature {
                        tag: feature_tag,
                        value,
                        start,
                        end,
                    }];
                    let plan = ShapePlan::build(
                        &face,
                        &registry,
                        Direction::LeftToRight,
                        None,
                        None,
                        &features,
                    )
                    .unwrap();

                    let mut buffer = Buffer::new();
                    for (i, &c) in codepoints.iter().enumerate() {
                        buffer.add(c, i as u32);
                    }

                    initialize_masks(&plan, &mut buffer);
                    setup_masks(&plan, &features, &face, &mut buffer);

                    let global = plan.ot_map.global_mask();
                    let (mask, shift) = plan.ot_map.mask(feature_tag);
                    assert_ne!(mask, 0);

                    for info in buffer.info() {
                        let in_range = start <= info.cluster && info.cluster < end;
                        if in_range {
                            // The user range rewrote exactly the feature's
                            // bit slice.
                            assert_eq!(info.mask & mask, (value << shift) & mask);
                            assert_eq!(info.mask & !mask, global & !mask);
                        } else {
                            assert_eq!(info.mask, global);
                        }
                    }
                }
            }
        }
    }
}
