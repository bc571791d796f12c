//! The Hebrew shaper: presentation-form composition fallback for fonts
//! without GPOS mark support, and one narrow mark-reorder pattern.

use crate::buffer::Buffer;
use crate::normalize::{ShapeNormalizeContext, ShapeNormalizationMode};
use crate::plan::ShapePlan;
use crate::unicode::{self, modified_combining_class as mcc};

use super::{ComplexShaper, ZeroWidthMarksMode};

pub(crate) const HEBREW_SHAPER: ComplexShaper = ComplexShaper {
    name: "hebrew",
    collect_features: None,
    override_features: None,
    create_data: None,
    preprocess_text: None,
    postprocess_glyphs: None,
    normalization_mode: ShapeNormalizationMode::Auto,
    decompose: None,
    compose: Some(compose),
    setup_masks: None,
    reorder_marks: Some(reorder_marks),
    zero_width_marks: ZeroWidthMarksMode::ByGdefLate,
    fallback_position: true,
};

// Letter + dagesh precomposed forms for 05D0..=05EA; zero where Unicode
// defines none.
const DAGESH_FORMS: &[u32; 27] = &[
    0xFB30, // ALEF
    0xFB31, // BET
    0xFB32, // GIMEL
    0xFB33, // DALET
    0xFB34, // HE
    0xFB35, // VAV
    0xFB36, // ZAYIN
    0x0000, // HET
    0xFB38, // TET
    0xFB39, // YOD
    0xFB3A, // FINAL KAF
    0xFB3B, // KAF
    0xFB3C, // LAMED
    0x0000, // FINAL MEM
    0xFB3E, // MEM
    0x0000, // FINAL NUN
    0xFB40, // NUN
    0xFB41, // SAMEKH
    0x0000, // AYIN
    0xFB43, // FINAL PE
    0xFB44, // PE
    0x0000, // FINAL TSADI
    0xFB46, // TSADI
    0xFB47, // QOF
    0xFB48, // RESH
    0xFB49, // SHIN
    0xFB4A, // TAV
];

fn compose(ctx: &ShapeNormalizeContext, a: char, b: char) -> Option<char> {
    // Canonical composition wins when Unicode defines one.
    if let Some(composed) = unicode::compose(a, b) {
        return Some(composed);
    }

    // Otherwise, fonts that cannot position marks get the Alphabetic
    // Presentation Forms, which Unicode excludes from composition.
    if ctx.plan.has_gpos_mark {
        return None;
    }

    let a = a as u32;
    let composed = match b as u32 {
        0x05B4 => match a {
            // HIRIQ
            0x05D9 => 0xFB1D, // YOD
            _ => 0,
        },
        0x05B7 => match a {
            // PATAH
            0x05F2 => 0xFB1F, // YIDDISH YOD YOD
            0x05D0 => 0xFB2E, // ALEF
            _ => 0,
        },
        0x05B8 => match a {
            // QAMATS
            0x05D0 => 0xFB2F,
            _ => 0,
        },
        0x05B9 => match a {
            // HOLAM
            0x05D5 => 0xFB4B, // VAV
            _ => 0,
        },
        0x05BC => match a {
            // DAGESH
            0x05D0..=0x05EA => DAGESH_FORMS[(a - 0x05D0) as usize],
            0xFB2A => 0xFB2C, // SHIN WITH SHIN DOT
            0xFB2B => 0xFB2D, // SHIN WITH SIN DOT
            _ => 0,
        },
        0x05BF => match a {
            // RAFE
            0x05D1 => 0xFB4C, // BET
            0x05DB => 0xFB4D, // KAF
            0x05E4 => 0xFB4E, // PE
            _ => 0,
        },
        0x05C1 => match a {
            // SHIN DOT
            0x05E9 => 0xFB2A,
            0xFB49 => 0xFB2C,
            _ => 0,
        },
        0x05C2 => match a {
            // SIN DOT
            0x05E9 => 0xFB2B,
            0xFB49 => 0xFB2D,
            _ => 0,
        },
        _ => 0,
    };

    char::from_u32(composed).filter(|c| *c != '\0')
}

fn reorder_marks(_plan: &ShapePlan, buffer: &mut Buffer, start: usize, end: usize) {
    // A (patah|qamats) + (sheva|hiriq) + (meteg|below) run renders better
    // with the last two marks swapped.
    let mut i = start + 2;
    while i < end {
        let c0 = buffer.info[i - 2].modified_combining_class();
        let c1 = buffer.info[i - 1].modified_combining_class();
        let c2 = buffer.info[i].modified_combining_class();

        if (c0 == mcc::CCC17 || c0 == mcc::CCC18)
            && (c1 == mcc::CCC10 || c1 == mcc::CCC14)
            && (c2 == mcc::CCC22 || c2 == 220)
        {
            buffer.merge_clusters(i - 1, i + 1);
            buffer.info.swap(i - 1, i);
            break;
        }
        i += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dagesh_forms_cover_the_alphabet() {
        assert_eq!(DAGESH_FORMS.len(), (0x05EA - 0x05D0 + 1) as usize);
        assert_eq!(DAGESH_FORMS[(0x05D1 - 0x05D0) as usize], 0xFB31); // BET
        assert_eq!(DAGESH_FORMS[(0x05E9 - 0x05D0) as usize], 0xFB49); // SHIN
    }
}
