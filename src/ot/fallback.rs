//! Fallback positioning for fonts without usable GPOS: marks are placed
//! from glyph extents by combining-class bucket, and synthesized space
//! variants get proportional advances.

use crate::buffer::{attach_type, Buffer, BufferScratchFlags};
use crate::face::{Face, GlyphExtents};
use crate::normalize::space_fallback_of;
use crate::plan::ShapePlan;
use crate::unicode::{modified_combining_class as mcc, Space};

// Canonical combining-class buckets used for placement.
const ATTACHED_BELOW_LEFT: u8 = 200;
const ATTACHED_BELOW: u8 = 202;
const ATTACHED_ABOVE: u8 = 214;
const ATTACHED_ABOVE_RIGHT: u8 = 216;
const BELOW_LEFT: u8 = 218;
const BELOW: u8 = 220;
const BELOW_RIGHT: u8 = 222;
const LEFT: u8 = 224;
const RIGHT: u8 = 226;
const ABOVE_LEFT: u8 = 228;
const ABOVE: u8 = 230;
const ABOVE_RIGHT: u8 = 232;
const DOUBLE_BELOW: u8 = 233;
const DOUBLE_ABOVE: u8 = 234;

/// Folds the shaping-oriented modified classes back into placement
/// buckets.
fn recategorize_combining_class(u: u32, class: u8) -> u8 {
    if class >= 200 {
        return class;
    }

    // Thai and Lao attachment depends on the character, not the class.
    if (0x0E30..=0x0EB9).contains(&u) {
        return match u {
            0x0E31 | 0x0E34..=0x0E37 | 0x0E47 | 0x0E4D..=0x0E4E => ABOVE_RIGHT,
            0x0E38..=0x0E3A => BELOW_RIGHT,
            0x0EB1 | 0x0EB4..=0x0EB7 => ABOVE,
            0x0EB8..=0x0EB9 => BELOW,
            _ => class,
        };
    }

    match class {
        // Hebrew
        mcc::CCC10 | mcc::CCC11 | mcc::CCC12 | mcc::CCC13 | mcc::CCC14 | mcc::CCC15
        | mcc::CCC16 | mcc::CCC17 | mcc::CCC18 | mcc::CCC20 | mcc::CCC22 => BELOW,
        mcc::CCC23 => ABOVE,
        mcc::CCC24 => ABOVE_RIGHT,  // shin dot
        mcc::CCC25 | mcc::CCC19 => ABOVE_LEFT, // sin dot, holam
        mcc::CCC26 => ABOVE,

        // Arabic and Syriac
        mcc::CCC27 | mcc::CCC28 | mcc::CCC30 | mcc::CCC31 | mcc::CCC33 | mcc::CCC34
        | mcc::CCC35 | mcc::CCC36 => ABOVE,
        mcc::CCC29 | mcc::CCC32 => BELOW,

        // Telugu length marks behave like subjoined forms.
        mcc::CCC84 | mcc::CCC91 => BELOW_RIGHT,

        // Tibetan
        mcc::CCC129 | mcc::CCC132 => BELOW,
        mcc::CCC130 => ABOVE,

        _ => class,
    }
}

pub(crate) fn position_marks(
    _plan: &ShapePlan,
    face: &dyn Face,
    buffer: &mut Buffer,
    adjust_offsets_when_zeroing: bool,
) {
    let len = buffer.len;
    if len == 0 {
        return;
    }

    let mut start = 0;
    for i in 1..len {
        if !buffer.info[i].is_unicode_mark() {
            position_cluster(face, buffer, start, i, adjust_offsets_when_zeroing);
            start = i;
        }
    }
    position_cluster(face, buffer, start, len, adjust_offsets_when_zeroing);
}

fn position_cluster(
    face: &dyn Face,
    buffer: &mut Buffer,
    start: usize,
    end: usize,
    adjust_offsets_when_zeroing: bool,
) {
    if end - start < 2 {
        return;
    }

    // Find the base: the first non-mark item of the cluster run.
    let mut base = start;
    while base < end && buffer.info[base].is_unicode_mark() {
        base += 1;
    }
    if base == end {
        return;
    }

    position_around_base(face, buffer, base, end, adjust_offsets_when_zeroing);
}

fn position_around_base(
    face: &dyn Face,
    buffer: &mut Buffer,
    base: usize,
    end: usize,
    adjust_offsets_when_zeroing: bool,
) {
    let base_glyph = buffer.info[base].as_glyph();
    let mut base_extents = match face.glyph_extents(base_glyph) {
        Some(extents) => extents,
        None => {
            // No extents; zero mark advances and bail.
            zero_mark_advances(buffer, base + 1, end, adjust_offsets_when_zeroing);
            return;
        }
    };

    base_extents.y_bearing += buffer.pos[base].y_offset;
    // Use horizontal advance for horizontal positioning.
    base_extents.x_bearing = 0;
    base_extents.width = buffer.pos[base].x_advance;

    let lig_id = buffer.info[base].lig_id();
    let num_lig_components = i32::from(buffer.info[base].lig_num_comps());

    let mut x_offset = 0i32;
    let mut y_offset = 0i32;
    if buffer.direction.is_forward() {
        x_offset -= buffer.pos[base].x_advance;
        y_offset -= buffer.pos[base].y_advance;
    }

    let mut last_lig_component: i32 = -1;
    let mut last_combining_class: u8 = 255;
    let mut component_extents = base_extents;
    let mut cluster_extents = base_extents;

    for i in base + 1..end {
        if buffer.info[i].modified_combining_class() != 0 {
            if num_lig_components > 1 {
                let this_component = if lig_id != 0 && lig_id == buffer.info[i].lig_id() {
                    (i32::from(buffer.info[i].lig_comp()) - 1)
                        .clamp(0, num_lig_components - 1)
                } else {
                    num_lig_components - 1
                };
                if last_lig_component != this_component {
                    last_lig_component = this_component;
                    last_combining_class = 255;
                    component_extents = base_extents;
                    component_extents.x_bearing +=
                        base_extents.width * this_component / num_lig_components;
                    component_extents.width =
                        base_extents.width / num_lig_components;
                }
            }

            let this_combining_class = recategorize_combining_class(
                buffer.info[i].codepoint,
                buffer.info[i].modified_combining_class(),
            );
            if this_combining_class != last_combining_class {
                last_combining_class = this_combining_class;
                cluster_extents = component_extents;
            }

            position_mark(
                face,
                buffer,
                &mut cluster_extents,
                i,
                this_combining_class,
            );

            buffer.pos[i].x_advance = 0;
            buffer.pos[i].y_advance = 0;
            buffer.pos[i].x_offset += x_offset;
            buffer.pos[i].y_offset += y_offset;
        } else {
            if buffer.direction.is_forward() {
                x_offset -= buffer.pos[i].x_advance;
                y_offset -= buffer.pos[i].y_advance;
            } else {
                x_offset += buffer.pos[i].x_advance;
                y_offset += buffer.pos[i].y_advance;
            }
        }
    }
}

fn zero_mark_advances(
    buffer: &mut Buffer,
    start: usize,
    end: usize,
    adjust_offsets_when_zeroing: bool,
) {
    for i in start..end {
        if !buffer.info[i].is_unicode_mark() {
            continue;
        }
        let pos = &mut buffer.pos[i];
        if adjust_offsets_when_zeroing {
            pos.x_offset -= pos.x_advance;
            pos.y_offset -= pos.y_advance;
        }
        pos.x_advance = 0;
        pos.y_advance = 0;
    }
}

fn position_mark(
    face: &dyn Face,
    buffer: &mut Buffer,
    base_extents: &mut GlyphExtents,
    i: usize,
    combining_class: u8,
) {
    let mark_glyph = buffer.info[i].as_glyph();
    let mark_extents = match face.glyph_extents(mark_glyph) {
        Some(extents) => extents,
        None => return,
    };

    let y_gap = i32::from(face.units_per_em()) / 16;
    let pos = &mut buffer.pos[i];
    pos.x_offset = 0;
    pos.y_offset = 0;

    // Horizontal placement.
    match combining_class {
        DOUBLE_BELOW | DOUBLE_ABOVE => {
            // Straddle the gap to the next glyph.
            pos.x_offset += base_extents.x_bearing + base_extents.width
                - mark_extents.width / 2
                - mark_extents.x_bearing;
        }
        ATTACHED_BELOW_LEFT | BELOW_LEFT | ABOVE_LEFT => {
            pos.x_offset += base_extents.x_bearing - mark_extents.x_bearing;
        }
        ATTACHED_ABOVE_RIGHT | BELOW_RIGHT | ABOVE_RIGHT => {
            pos.x_offset += base_extents.x_bearing + base_extents.width
                - mark_extents.width
                - mark_extents.x_bearing;
        }
        LEFT | RIGHT => {}
        _ => {
            // Center.
            pos.x_offset += base_extents.x_bearing
                + (base_extents.width - mark_extents.width) / 2
                - mark_extents.x_bearing;
        }
    }

    // Vertical placement.
    match combining_class {
        DOUBLE_BELOW | BELOW_LEFT | BELOW | BELOW_RIGHT | ATTACHED_BELOW_LEFT
        | ATTACHED_BELOW => {
            // Leave a gap between stacked unattached marks.
            if combining_class != ATTACHED_BELOW_LEFT && combining_class != ATTACHED_BELOW {
                base_extents.height -= y_gap;
            }
            pos.y_offset =
                base_extents.y_bearing + base_extents.height - mark_extents.y_bearing;
            base_extents.height += mark_extents.height;
        }
        DOUBLE_ABOVE | ABOVE_LEFT | ABOVE | ABOVE_RIGHT | ATTACHED_ABOVE
        | ATTACHED_ABOVE_RIGHT => {
            if combining_class != ATTACHED_ABOVE && combining_class != ATTACHED_ABOVE_RIGHT {
                base_extents.y_bearing += y_gap;
                base_extents.height -= y_gap;
            }
            pos.y_offset =
                base_extents.y_bearing - (mark_extents.y_bearing + mark_extents.height);
            base_extents.y_bearing -= mark_extents.height;
            base_extents.height += mark_extents.height;
        }
        _ => {}
    }
}

/// Adjusts the advances of space glyphs that stand in for missing space
/// variants.
pub(crate) fn adjust_spaces(face: &dyn Face, buffer: &mut Buffer) {
    if !buffer
        .scratch_flags
        .contains(BufferScratchFlags::HAS_SPACE_FALLBACK)
    {
        return;
    }

    let horizontal = buffer.direction.is_horizontal();
    let upem = i32::from(face.units_per_em());

    for i in 0..buffer.len {
        let space = match space_fallback_of(&buffer.info[i]) {
            Some(space) => space,
            None => continue,
        };
        // Attached items keep whatever positioning they got.
        if buffer.pos[i].attach_type() != attach_type::NONE {
            continue;
        }

        let advance = match space {
            Space::Space => continue,
            Space::Em
            | Space::Em2
            | Space::Em3
            | Space::Em4
            | Space::Em5
            | Space::Em6
            | Space::Em16 => {
                let denominator = space as i32;
                (upem + denominator / 2) / denominator
            }
            Space::FourEm18 => upem * 4 / 18,
            Space::Figure => match digit_advance(face) {
                Some(advance) => advance,
                None => continue,
            },
            Space::Punctuation => match punctuation_advance(face) {
                Some(advance) => advance,
                None => continue,
            },
            Space::Narrow => {
                // Half a plain space; matches what other engines settle on.
                if horizontal {
                    buffer.pos[i].x_advance / 2
                } else {
                    buffer.pos[i].y_advance / 2
                }
            }
        };

        if horizontal {
            buffer.pos[i].x_advance = advance;
        } else {
            buffer.pos[i].y_advance = advance;
        }
    }
}

fn digit_advance(face: &dyn Face) -> Option<i32> {
    for u in '0'..='9' {
        if let Some(glyph) = face.nominal_glyph(u as u32) {
            return Some(face.glyph_h_advance(glyph));
        }
    }
    None
}

fn punctuation_advance(face: &dyn Face) -> Option<i32> {
    for u in ['.', ','] {
        if let Some(glyph) = face.nominal_glyph(u as u32) {
            return Some(face.glyph_h_advance(glyph));
        }
    }
    None
}
