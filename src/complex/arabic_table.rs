//! Joining-type and presentation-form data for the Arabic-family shaper,
//! condensed from the Unicode Arabic shaping data.

use super::arabic::JoiningType;

/// Joining type of a code point. `X` asks the caller to derive U or T from
/// the general category (marks and format controls are transparent).
pub(crate) fn joining_type(u: char) -> JoiningType {
    use JoiningType::*;

    let u = u as u32;
    match u {
        // Join-causing: tatweel, ZWJ, the N'Ko and Mongolian extenders.
        0x0640 | 0x200D | 0x07FA | 0x180A => C,

        // Arabic.
        0x0600..=0x0605 | 0x0608 | 0x060B | 0x0621 | 0x0674 => U,
        0x0622..=0x0625 | 0x0627 | 0x0629 | 0x062F..=0x0632 | 0x0648 => R,
        0x0626 | 0x0628 | 0x062A..=0x062E | 0x0633..=0x063F => D,
        0x0620 | 0x0641..=0x0647 | 0x0649..=0x064A | 0x066E..=0x066F => D,
        0x0671..=0x0673 | 0x0675..=0x0677 => R,
        0x0678..=0x0687 => D,
        0x0688..=0x0699 => R,
        0x069A..=0x06BF => D,
        0x06C0 => R,
        0x06C1..=0x06C2 => D,
        0x06C3..=0x06CB => R,
        0x06CC => D,
        0x06CD => R,
        0x06CE => D,
        0x06CF => R,
        0x06D0..=0x06D1 => D,
        0x06D2..=0x06D3 => R,
        0x06D5 => R,
        0x06DD => U,
        0x06EE..=0x06EF => R,
        0x06FA..=0x06FC | 0x06FF => D,

        // Syriac. Alaph and the Dalath/Rish family drive the extra
        // terminal and medial forms.
        0x0710 => JoinAlaph,
        0x0712..=0x0714 => D,
        0x0715..=0x0716 => JoinDalathRish,
        0x0717..=0x0719 => R,
        0x071A..=0x071D => D,
        0x071E => R,
        0x071F..=0x0727 => D,
        0x0728 => R,
        0x0729 => D,
        0x072A => JoinDalathRish,
        0x072B => D,
        0x072C => JoinDalathRish,
        0x072D..=0x072F => D,
        0x074D => R,
        0x074E..=0x074F => D,

        // Arabic Supplement: mostly dual-joining additions.
        0x0750..=0x0757 => D,
        0x0758 => D,
        0x0759..=0x075B => R,
        0x075C..=0x076A => D,
        0x076B..=0x076C => R,
        0x076D..=0x0770 => D,
        0x0771 => R,
        0x0772 => D,
        0x0773..=0x0774 => R,
        0x0775..=0x0777 => D,
        0x0778..=0x0779 => R,
        0x077A..=0x077F => D,

        // Arabic Extended-A.
        0x08A0..=0x08A9 => D,
        0x08AA..=0x08AC => R,
        0x08AD => U,
        0x08AE => R,
        0x08AF..=0x08B0 => D,
        0x08B1..=0x08B2 => R,
        0x08B3..=0x08B4 => D,
        0x08B6..=0x08B8 => D,
        0x08B9 => R,
        0x08BA..=0x08C7 => D,

        // N'Ko letters are dual-joining.
        0x07CA..=0x07EA => D,

        // Mongolian letters.
        0x1807 | 0x1820..=0x1878 | 0x1887..=0x18A8 | 0x18AA => D,

        // Phags-pa.
        0xA840..=0xA871 => D,
        0xA872 => U, // PHAGS-PA LETTER CANDRABINDU is left-joining only

        // Mandaic.
        0x0840..=0x0858 => D,

        _ => X,
    }
}

/// Presentation Forms-B shapes of the core Arabic letters:
/// `[isolated, final, initial, medial]`, zero when the form does not exist.
/// Indexed by `u - SHAPING_TABLE_FIRST`.
pub(crate) const SHAPING_TABLE_FIRST: u32 = 0x0621;
pub(crate) const SHAPING_TABLE_LAST: u32 = 0x064A;

pub(crate) const SHAPING_TABLE: &[[u16; 4]] = &[
    [0xFE80, 0x0000, 0x0000, 0x0000], // 0621 HAMZA
    [0xFE81, 0xFE82, 0x0000, 0x0000], // 0622 ALEF WITH MADDA ABOVE
    [0xFE83, 0xFE84, 0x0000, 0x0000], // 0623 ALEF WITH HAMZA ABOVE
    [0xFE85, 0xFE86, 0x0000, 0x0000], // 0624 WAW WITH HAMZA ABOVE
    [0xFE87, 0xFE88, 0x0000, 0x0000], // 0625 ALEF WITH HAMZA BELOW
    [0xFE89, 0xFE8A, 0xFE8B, 0xFE8C], // 0626 YEH WITH HAMZA ABOVE
    [0xFE8D, 0xFE8E, 0x0000, 0x0000], // 0627 ALEF
    [0xFE8F, 0xFE90, 0xFE91, 0xFE92], // 0628 BEH
    [0xFE93, 0xFE94, 0x0000, 0x0000], // 0629 TEH MARBUTA
    [0xFE95, 0xFE96, 0xFE97, 0xFE98], // 062A TEH
    [0xFE99, 0xFE9A, 0xFE9B, 0xFE9C], // 062B THEH
    [0xFE9D, 0xFE9E, 0xFE9F, 0xFEA0], // 062C JEEM
    [0xFEA1, 0xFEA2, 0xFEA3, 0xFEA4], // 062D HAH
    [0xFEA5, 0xFEA6, 0xFEA7, 0xFEA8], // 062E KHAH
    [0xFEA9, 0xFEAA, 0x0000, 0x0000], // 062F DAL
    [0xFEAB, 0xFEAC, 0x0000, 0x0000], // 0630 THAL
    [0xFEAD, 0xFEAE, 0x0000, 0x0000], // 0631 REH
    [0xFEAF, 0xFEB0, 0x0000, 0x0000], // 0632 ZAIN
    [0xFEB1, 0xFEB2, 0xFEB3, 0xFEB4], // 0633 SEEN
    [0xFEB5, 0xFEB6, 0xFEB7, 0xFEB8], // 0634 SHEEN
    [0xFEB9, 0xFEBA, 0xFEBB, 0xFEBC], // 0635 SAD
    [0xFEBD, 0xFEBE, 0xFEBF, 0xFEC0], // 0636 DAD
    [0xFEC1, 0xFEC2, 0xFEC3, 0xFEC4], // 0637 TAH
    [0xFEC5, 0xFEC6, 0xFEC7, 0xFEC8], // 0638 ZAH
    [0xFEC9, 0xFECA, 0xFECB, 0xFECC], // 0639 AIN
    [0xFECD, 0xFECE, 0xFECF, 0xFED0], // 063A GHAIN
    [0x0000, 0x0000, 0x0000, 0x0000], // 063B
    [0x0000, 0x0000, 0x0000, 0x0000], // 063C
    [0x0000, 0x0000, 0x0000, 0x0000], // 063D
    [0x0000, 0x0000, 0x0000, 0x0000], // 063E
    [0x0000, 0x0000, 0x0000, 0x0000], // 063F
    [0x0000, 0x0000, 0x0000, 0x0000], // 0640 TATWEEL
    [0xFED1, 0xFED2, 0xFED3, 0xFED4], // 0641 FEH
    [0xFED5, 0xFED6, 0xFED7, 0xFED8], // 0642 QAF
    [0xFED9, 0xFEDA, 0xFEDB, 0xFEDC], // 0643 KAF
    [0xFEDD, 0xFEDE, 0xFEDF, 0xFEE0], // 0644 LAM
    [0xFEE1, 0xFEE2, 0xFEE3, 0xFEE4], // 0645 MEEM
    [0xFEE5, 0xFEE6, 0xFEE7, 0xFEE8], // 0646 NOON
    [0xFEE9, 0xFEEA, 0xFEEB, 0xFEEC], // 0647 HEH
    [0xFEED, 0xFEEE, 0x0000, 0x0000], // 0648 WAW
    [0xFEEF, 0xFEF0, 0x0000, 0x0000], // 0649 ALEF MAKSURA
    [0xFEF1, 0xFEF2, 0xFEF3, 0xFEF4], // 064A YEH
];

/// Lam-Alef mandatory ligatures: `(second component, [isolated, final])`.
/// The first component is always LAM (0644).
pub(crate) const LIGATURE_TABLE: &[(u32, [u16; 2])] = &[
    (0x0622, [0xFEF5, 0xFEF6]), // LAM + ALEF WITH MADDA ABOVE
    (0x0623, [0xFEF7, 0xFEF8]), // LAM + ALEF WITH HAMZA ABOVE
    (0x0625, [0xFEF9, 0xFEFA]), // LAM + ALEF WITH HAMZA BELOW
    (0x0627, [0xFEFB, 0xFEFC]), // LAM + ALEF
];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::complex::arabic::JoiningType;

    #[test]
    fn joining_types() {
        assert_eq!(joining_type('\u{0628}'), JoiningType::D); // BEH
        assert_eq!(joining_type('\u{0627}'), JoiningType::R); // ALEF
        assert_eq!(joining_type('\u{0640}'), JoiningType::C); // TATWEEL
        assert_eq!(joining_type('\u{0621}'), JoiningType::U); // HAMZA
        assert_eq!(joining_type('\u{0710}'), JoiningType::JoinAlaph);
        assert_eq!(joining_type('\u{072A}'), JoiningType::JoinDalathRish);
        // Marks resolve through the category fallback.
        assert_eq!(joining_type('\u{064E}'), JoiningType::X);
    }

    #[test]
    fn shaping_table_covers_the_block() {
        assert_eq!(
            SHAPING_TABLE.len() as u32,
            SHAPING_TABLE_LAST - SHAPING_TABLE_FIRST + 1
        );
        // BEH initial form.
        let beh = &SHAPING_TABLE[(0x0628 - SHAPING_TABLE_FIRST) as usize];
        assert_eq!(beh[2], 0xFE91);
    }
}
