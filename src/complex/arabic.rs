//! The Arabic-family shaper: joining-form state machine, stretch
//! expansion, mark reordering and presentation-form fallback synthesis.
//! Also drives Syriac (Alaph forms) and the other joining scripts.

use ttf_parser::GlyphId;

use crate::buffer::{Buffer, BufferScratchFlags, GlyphInfo};
use crate::common::{script, Mask, Script, Tag};
use crate::face::Face;
use crate::normalize::ShapeNormalizationMode;
use crate::ot::apply::{apply_forward, ApplyContext, LayoutTables, LookupAccel};
use crate::ot::map::FeatureFlags;
use crate::ot::{feature, TableIndex};
use crate::plan::{ShapePlan, ShapePlanner};
use crate::unicode::{modified_combining_class, CharExt, GeneralCategory};

use super::arabic_table;
use super::{ComplexShaper, ZeroWidthMarksMode};

const ARABIC_HAS_STCH: BufferScratchFlags = BufferScratchFlags::COMPLEX0;

const ARABIC_FEATURES: &[Tag] = &[
    feature::ISOLATED_FORMS,
    feature::TERMINAL_FORMS_1,
    feature::TERMINAL_FORMS_2,
    feature::TERMINAL_FORMS_3,
    feature::MEDIAL_FORMS_1,
    feature::MEDIAL_FORMS_2,
    feature::INITIAL_FORMS,
];

fn feature_is_syriac(tag: Tag) -> bool {
    matches!(tag.to_bytes()[3], b'2' | b'3')
}

#[repr(u8)]
#[derive(Clone, Copy, PartialEq, Debug)]
enum Action {
    Isol = 0,
    Fina = 1,
    Fin2 = 2,
    Fin3 = 3,
    Medi = 4,
    Med2 = 5,
    Init = 6,
    None = 7,

    // The same scratch byte doubles for stretch bookkeeping after GSUB.
    StretchingFixed = 8,
    StretchingRepeating = 9,
}

impl Action {
    #[inline]
    fn is_stch(self) -> bool {
        matches!(self, Action::StretchingFixed | Action::StretchingRepeating)
    }
}

// State machine over joining types. Columns are indexed by JoiningType:
// U, L, R, D, Alaph group, Dalath/Rish group. Each cell is
// (prev action, current action, next state).
const STATE_TABLE: &[[(Action, Action, u16); 6]] = &[
    // State 0: prev was U, not willing to join.
    [
        (Action::None, Action::None, 0), (Action::None, Action::Isol, 2), (Action::None, Action::Isol, 1),
        (Action::None, Action::Isol, 2), (Action::None, Action::Isol, 1), (Action::None, Action::Isol, 6),
    ],
    // State 1: prev was R or Isol Alaph, not willing to join.
    [
        (Action::None, Action::None, 0), (Action::None, Action::Isol, 2), (Action::None, Action::Isol, 1),
        (Action::None, Action::Isol, 2), (Action::None, Action::Fin2, 5), (Action::None, Action::Isol, 6),
    ],
    // State 2: prev was D/L in Isol form, willing to join.
    [
        (Action::None, Action::None, 0), (Action::None, Action::Isol, 2), (Action::Init, Action::Fina, 1),
        (Action::Init, Action::Fina, 3), (Action::Init, Action::Fina, 4), (Action::Init, Action::Fina, 6),
    ],
    // State 3: prev was D in Fina form, willing to join.
    [
        (Action::None, Action::None, 0), (Action::None, Action::Isol, 2), (Action::Medi, Action::Fina, 1),
        (Action::Medi, Action::Fina, 3), (Action::Medi, Action::Fina, 4), (Action::Medi, Action::Fina, 6),
    ],
    // State 4: prev was Fina Alaph, not willing to join.
    [
        (Action::None, Action::None, 0), (Action::None, Action::Isol, 2), (Action::Med2, Action::Isol, 1),
        (Action::Med2, Action::Isol, 2), (Action::Med2, Action::Fin2, 5), (Action::Med2, Action::Isol, 6),
    ],
    // State 5: prev was Fin2/Fin3 Alaph, not willing to join.
    [
        (Action::None, Action::None, 0), (Action::None, Action::Isol, 2), (Action::Isol, Action::Isol, 1),
        (Action::Isol, Action::Isol, 2), (Action::Isol, Action::Fin2, 5), (Action::Isol, Action::Isol, 6),
    ],
    // State 6: prev was Dalath/Rish, not willing to join.
    [
        (Action::None, Action::None, 0), (Action::None, Action::Isol, 2), (Action::None, Action::Isol, 1),
        (Action::None, Action::Isol, 2), (Action::None, Action::Fin3, 5), (Action::None, Action::Isol, 6),
    ],
];

/// Unicode joining types, plus the two Syriac letter groups the state
/// machine treats specially.
#[derive(Clone, Copy, PartialEq, Debug)]
pub(crate) enum JoiningType {
    U = 0,
    L = 1,
    R = 2,
    D = 3,
    /// Join-causing: behaves like `D` in the state machine.
    C = 6,
    JoinAlaph = 4,
    JoinDalathRish = 5,
    T = 7,
    /// Unlisted: derive U or T from the general category.
    X = 8,
}

impl JoiningType {
    /// Column into `STATE_TABLE`; `C` shares `D`'s column since join-causing
    /// characters behave like dual-joining ones in the state machine.
    fn table_index(self) -> usize {
        match self {
            JoiningType::C => JoiningType::D as usize,
            other => other as usize,
        }
    }
}

impl GlyphInfo {
    fn arabic_shaping_action(&self) -> Action {
        match self.complex_var {
            0 => Action::Isol,
            1 => Action::Fina,
            2 => Action::Fin2,
            3 => Action::Fin3,
            4 => Action::Medi,
            5 => Action::Med2,
            6 => Action::Init,
            8 => Action::StretchingFixed,
            9 => Action::StretchingRepeating,
            _ => Action::None,
        }
    }

    fn set_arabic_shaping_action(&mut self, action: Action) {
        self.complex_var = action as u8;
    }
}

/// Per-plan scratch: a mask per joining form, plus the synthesized
/// presentation-form lookups when the font carries no joining features.
pub(crate) struct ArabicShapePlan {
    // The extra slot absorbs Action::None: mask_array[None] == 0, so the
    // setup pass needs no branch.
    mask_array: [Mask; ARABIC_FEATURES.len() + 1],
    has_stch: bool,
    fallback: Option<ArabicFallbackPlan>,
}

pub(crate) const ARABIC_SHAPER: ComplexShaper = ComplexShaper {
    name: "arabic",
    collect_features: Some(collect_features),
    override_features: None,
    create_data: Some(data_create),
    preprocess_text: None,
    postprocess_glyphs: Some(postprocess_glyphs),
    normalization_mode: ShapeNormalizationMode::Auto,
    decompose: None,
    compose: None,
    setup_masks: Some(setup_masks_hook),
    reorder_marks: Some(reorder_marks),
    zero_width_marks: ZeroWidthMarksMode::ByGdefLate,
    fallback_position: true,
};

fn collect_features(planner: &mut ShapePlanner) {
    // Features are applied with pauses in between, following the script
    // specification. The pause between the joining forms and rlig is
    // required; the pauses between the forms themselves only matter for
    // fonts with contextual substitutions, where the spec order gives the
    // expected behavior.

    planner
        .ot_map
        .enable_feature(feature::STRETCHING_GLYPH_DECOMPOSITION, FeatureFlags::NONE, 1);
    planner.ot_map.add_gsub_pause(Some(record_stch));

    planner
        .ot_map
        .enable_feature(feature::GLYPH_COMPOSITION_DECOMPOSITION, FeatureFlags::NONE, 1);
    planner
        .ot_map
        .enable_feature(feature::LOCALIZED_FORMS, FeatureFlags::NONE, 1);

    planner.ot_map.add_gsub_pause(None);

    let script = planner.script();
    for &tag in ARABIC_FEATURES {
        let has_fallback = script == Some(script::ARABIC) && !feature_is_syriac(tag);
        let flags = if has_fallback {
            FeatureFlags::HAS_FALLBACK
        } else {
            FeatureFlags::NONE
        };
        planner.ot_map.add_feature(tag, flags, 1);
        planner.ot_map.add_gsub_pause(None);
    }

    // Unicode says a ZWNJ means "don't ligate". In Arabic script a ZWJ
    // should also mean "don't ligate", so the main ligating features run
    // with manual-ZWJ handling.
    planner.ot_map.enable_feature(
        feature::REQUIRED_LIGATURES,
        FeatureFlags::MANUAL_ZWJ | FeatureFlags::HAS_FALLBACK,
        1,
    );

    if script == Some(script::ARABIC) {
        planner.ot_map.add_gsub_pause(Some(fallback_shape));
    }

    // No pause after rclt; it pairs with calt in modern fonts.
    planner
        .ot_map
        .enable_feature(feature::REQUIRED_CONTEXTUAL_ALTERNATES, FeatureFlags::MANUAL_ZWJ, 1);
    planner
        .ot_map
        .enable_feature(feature::CONTEXTUAL_ALTERNATES, FeatureFlags::MANUAL_ZWJ, 1);
    planner.ot_map.add_gsub_pause(None);

    planner
        .ot_map
        .enable_feature(feature::MARK_POSITIONING_VIA_SUBSTITUTION, FeatureFlags::NONE, 1);
}

fn data_create(plan: &ShapePlan, face: &dyn Face) -> Box<dyn std::any::Any + Send + Sync> {
    let mut arabic_plan = ArabicShapePlan {
        mask_array: [0; ARABIC_FEATURES.len() + 1],
        has_stch: false,
        fallback: None,
    };

    arabic_plan.has_stch = plan
        .ot_map
        .one_mask(feature::STRETCHING_GLYPH_DECOMPOSITION)
        != 0;

    let mut do_fallback = plan.script == Some(script::ARABIC);
    for (i, &tag) in ARABIC_FEATURES.iter().enumerate() {
        arabic_plan.mask_array[i] = plan.ot_map.one_mask(tag);
        let found_in_font = plan.ot_map.feature_index(TableIndex::Gsub, tag).is_some();
        do_fallback = do_fallback && (feature_is_syriac(tag) || !found_in_font);
    }

    if do_fallback {
        arabic_plan.fallback = ArabicFallbackPlan::build(&arabic_plan, face);
    }

    Box::new(arabic_plan)
}

fn setup_masks_hook(plan: &ShapePlan, _face: &dyn Face, buffer: &mut Buffer) {
    let arabic_plan: &ArabicShapePlan = match plan.shaper_data() {
        Some(data) => data,
        None => return,
    };
    setup_masks(arabic_plan, plan.script, buffer);
}

pub(crate) fn setup_masks(plan: &ArabicShapePlan, script: Option<Script>, buffer: &mut Buffer) {
    arabic_joining(buffer);
    if script == Some(script::MONGOLIAN) {
        mongolian_variation_selectors(buffer);
    }

    for i in 0..buffer.len {
        let action = buffer.info[i].arabic_shaping_action();
        let slot = (action as usize).min(ARABIC_FEATURES.len());
        buffer.info[i].mask |= plan.mask_array[slot];
    }
}

fn get_joining_type(u: char, gc: GeneralCategory) -> JoiningType {
    let j_type = arabic_table::joining_type(u);
    if j_type != JoiningType::X {
        return j_type;
    }

    let transparent = matches!(
        gc,
        GeneralCategory::NonspacingMark
            | GeneralCategory::EnclosingMark
            | GeneralCategory::Format
    );
    if transparent {
        JoiningType::T
    } else {
        JoiningType::U
    }
}

fn arabic_joining(buffer: &mut Buffer) {
    let mut prev: Option<usize> = None;
    let mut state = 0usize;

    // Pre-context influences the first letter's form.
    for i in 0..buffer.context_len(0) {
        let c = buffer.context(0, i);
        let this_type = get_joining_type(c, c.general_category());
        if this_type == JoiningType::T {
            continue;
        }
        state = STATE_TABLE[state][this_type.table_index()].2 as usize;
        break;
    }

    for i in 0..buffer.len {
        let this_type = get_joining_type(
            buffer.info[i].as_char(),
            buffer.info[i].general_category(),
        );
        if this_type == JoiningType::T {
            buffer.info[i].set_arabic_shaping_action(Action::None);
            continue;
        }

        let entry = &STATE_TABLE[state][this_type.table_index()];
        if entry.0 != Action::None {
            if let Some(prev) = prev {
                buffer.info[prev].set_arabic_shaping_action(entry.0);
                buffer.safe_to_insert_tatweel(prev, i + 1);
            }
        }

        buffer.info[i].set_arabic_shaping_action(entry.1);

        prev = Some(i);
        state = entry.2 as usize;
    }

    // Post-context may turn the last letter into a joining form.
    for i in 0..buffer.context_len(1) {
        let c = buffer.context(1, i);
        let this_type = get_joining_type(c, c.general_category());
        if this_type == JoiningType::T {
            continue;
        }

        let entry = &STATE_TABLE[state][this_type.table_index()];
        if entry.0 != Action::None {
            if let Some(prev) = prev {
                buffer.info[prev].set_arabic_shaping_action(entry.0);
            }
        }
        break;
    }
}

fn mongolian_variation_selectors(buffer: &mut Buffer) {
    // Variation selectors take the shaping action of their base.
    for i in 1..buffer.len {
        if (0x180B..=0x180D).contains(&buffer.info[i].codepoint) {
            let action = buffer.info[i - 1].arabic_shaping_action();
            buffer.info[i].set_arabic_shaping_action(action);
        }
    }
}

// Stretch feature ("stch"): Syriac subtending marks and their Arabic
// cousins multiply into repeating/fixed tiles; the actual stretching
// happens in postprocess once positions are known.

fn record_stch(plan: &ShapePlan, _face: &dyn Face, buffer: &mut Buffer) {
    let arabic_plan: &ArabicShapePlan = match plan.shaper_data() {
        Some(data) => data,
        None => return,
    };
    if !arabic_plan.has_stch {
        return;
    }

    // 'stch' just ran. Odd-numbered components of anything that multiplied
    // are repeating tiles, even-numbered are fixed.
    let mut has_stch = false;
    for i in 0..buffer.len {
        if buffer.info[i].is_multiplied() {
            let action = if buffer.info[i].lig_comp() % 2 != 0 {
                Action::StretchingRepeating
            } else {
                Action::StretchingFixed
            };
            buffer.info[i].set_arabic_shaping_action(action);
            has_stch = true;
        }
    }

    if has_stch {
        buffer.scratch_flags |= ARABIC_HAS_STCH;
    }
}

fn postprocess_glyphs(_plan: &ShapePlan, face: &dyn Face, buffer: &mut Buffer) {
    apply_stch(face, buffer);
}

fn apply_stch(face: &dyn Face, buffer: &mut Buffer) {
    if !buffer.scratch_flags.contains(ARABIC_HAS_STCH) {
        return;
    }

    // The shaper processes RTL, so stretched pieces pile up to the left of
    // the preceding glyphs. Two passes: measure how many extra glyphs are
    // needed, then cut, copying from the end of the buffer.
    const MEASURE: usize = 0;
    const CUT: usize = 1;

    let mut extra_glyphs_needed: usize = 0;

    for step in [MEASURE, CUT] {
        let new_len = buffer.len + extra_glyphs_needed;
        let mut i = buffer.len;
        let mut j = new_len;

        while i != 0 {
            if !buffer.info[i - 1].arabic_shaping_action().is_stch() {
                if step == CUT {
                    j -= 1;
                    buffer.info[j] = buffer.info[i - 1];
                    buffer.pos[j] = buffer.pos[i - 1];
                }
                i -= 1;
                continue;
            }

            let mut w_total = 0; // to be filled
            let mut w_fixed = 0; // fixed tiles
            let mut w_repeating = 0; // repeating tiles
            let mut n_repeating: i32 = 0;

            let end = i;
            while i != 0 && buffer.info[i - 1].arabic_shaping_action().is_stch() {
                i -= 1;
                let width = face.glyph_h_advance(buffer.info[i].as_glyph());
                if buffer.info[i].arabic_shaping_action() == Action::StretchingFixed {
                    w_fixed += width;
                } else {
                    w_repeating += width;
                    n_repeating += 1;
                }
            }

            let start = i;
            let mut context = i;
            while context != 0
                && !buffer.info[context - 1].arabic_shaping_action().is_stch()
                && (buffer.info[context - 1].is_default_ignorable()
                    || is_word_category(buffer.info[context - 1].general_category()))
            {
                context -= 1;
                w_total += buffer.pos[context].x_advance;
            }

            i += 1; // don't touch i again

            // How many extra repeats of each repeating tile.
            let mut n_copies: i32 = 0;
            let w_remaining = w_total - w_fixed;
            if w_remaining > w_repeating && w_repeating > 0 {
                n_copies = w_remaining / w_repeating - 1;
            }

            // An extra repeat squeezed in with some overlap may fit better.
            let mut extra_repeat_overlap = 0;
            let shortfall = w_remaining - w_repeating * (n_copies + 1);
            if shortfall > 0 && n_repeating > 0 {
                n_copies += 1;
                let excess = (n_copies + 1) * w_repeating - w_remaining;
                if excess > 0 {
                    extra_repeat_overlap = excess / (n_copies * n_repeating);
                }
            }

            if step == MEASURE {
                extra_glyphs_needed += (n_copies * n_repeating) as usize;
            } else {
                buffer.unsafe_to_break(context, end);
                let mut x_offset = 0;
                for k in (start + 1..=end).rev() {
                    let width = face.glyph_h_advance(buffer.info[k - 1].as_glyph());

                    let mut repeat = 1;
                    if buffer.info[k - 1].arabic_shaping_action() == Action::StretchingRepeating {
                        repeat += n_copies;
                    }

                    for n in 0..repeat {
                        x_offset -= width;
                        if n > 0 {
                            x_offset += extra_repeat_overlap;
                        }
                        buffer.pos[k - 1].x_offset = x_offset;

                        // Append a copy.
                        j -= 1;
                        buffer.info[j] = buffer.info[k - 1];
                        buffer.pos[j] = buffer.pos[k - 1];
                    }
                }
            }

            i -= 1;
        }

        if step == MEASURE {
            if !buffer.ensure(buffer.len + extra_glyphs_needed) {
                return;
            }
        } else {
            debug_assert_eq!(j, 0);
            buffer.set_len(new_len);
        }
    }
}

fn is_word_category(gc: GeneralCategory) -> bool {
    matches!(
        gc,
        GeneralCategory::Unassigned
            | GeneralCategory::PrivateUse
            | GeneralCategory::ModifierLetter
            | GeneralCategory::OtherLetter
            | GeneralCategory::SpacingMark
            | GeneralCategory::EnclosingMark
            | GeneralCategory::NonspacingMark
            | GeneralCategory::DecimalNumber
            | GeneralCategory::LetterNumber
            | GeneralCategory::OtherNumber
            | GeneralCategory::CurrencySymbol
            | GeneralCategory::ModifierSymbol
            | GeneralCategory::MathSymbol
            | GeneralCategory::OtherSymbol
    )
}

// Modifier combining marks, per UTR#53. Within a combining-class run they
// sort before the other marks of the same class.
const MODIFIER_COMBINING_MARKS: &[u32] = &[
    0x0654, // ARABIC HAMZA ABOVE
    0x0655, // ARABIC HAMZA BELOW
    0x0658, // ARABIC MARK NOON GHUNNA
    0x06DC, // ARABIC SMALL HIGH SEEN
    0x06E3, // ARABIC SMALL LOW SEEN
    0x06E7, // ARABIC SMALL HIGH YEH
    0x06E8, // ARABIC SMALL HIGH NOON
    0x08D3, // ARABIC SMALL LOW WAW
    0x08F3, // ARABIC SMALL HIGH WAW
];

fn reorder_marks(_plan: &ShapePlan, buffer: &mut Buffer, mut start: usize, end: usize) {
    const MAX_COMBINING_MARKS: usize = 32;

    let mut i = start;
    for cc in [220u8, 230] {
        while i < end && buffer.info[i].modified_combining_class() < cc {
            i += 1;
        }
        if i == end {
            break;
        }
        if buffer.info[i].modified_combining_class() > cc {
            continue;
        }

        let mut j = i;
        while j < end
            && buffer.info[j].modified_combining_class() == cc
            && MODIFIER_COMBINING_MARKS.contains(&buffer.info[j].codepoint)
        {
            j += 1;
        }

        if i == j {
            continue;
        }

        // Move the modifier run in front of the earlier marks.
        if j - i > MAX_COMBINING_MARKS {
            return;
        }
        let mut temp = [GlyphInfo::default(); MAX_COMBINING_MARKS];
        buffer.merge_clusters(start, j);

        temp[..j - i].copy_from_slice(&buffer.info[i..j]);
        for k in (0..i - start).rev() {
            buffer.info[k + start + j - i] = buffer.info[k + start];
        }
        for k in 0..j - i {
            buffer.info[k + start] = temp[k];
        }

        // Renumber the moved marks so the run stays sorted. The
        // replacement classes are smaller than every Arabic class and fold
        // back to 220/230 during fallback mark positioning.
        let new_start = start + j - i;
        let new_cc = if cc == 220 {
            modified_combining_class::CCC22
        } else {
            modified_combining_class::CCC26
        };
        while start < new_start {
            buffer.info[start].set_modified_combining_class(new_cc);
            start += 1;
        }

        i = j;
    }
}

// Presentation-form fallback: when the font has no GSUB for the joining
// features, synthesize single-substitution and Lam-Alef ligature lookups
// from the Unicode Arabic Presentation Forms-B block and run them through
// the regular lookup engine.

struct ArabicFallbackPlan {
    lookups: Vec<(Mask, crate::tables::gsubgpos::SubstLookup)>,
    accels: Vec<LookupAccel>,
}

// mask_array slots with a fallback lookup, paired with the SHAPING_TABLE
// column holding that form.
const FALLBACK_FEATURES: &[(usize, usize)] = &[
    (0, 0), // isol
    (1, 1), // fina
    (6, 2), // init
    (4, 3), // medi
];

impl ArabicFallbackPlan {
    fn build(arabic_plan: &ArabicShapePlan, face: &dyn Face) -> Option<Self> {
        use crate::tables::gsubgpos::{
            Coverage, Ligature, LigatureSubst, LookupFlags, SingleSubst, SubstLookup,
            SubstSubtable,
        };

        let mut lookups = Vec::new();

        for &(feature_index, column) in FALLBACK_FEATURES {
            let mask = arabic_plan.mask_array[feature_index];
            if mask == 0 {
                continue;
            }

            let mut pairs: Vec<(GlyphId, GlyphId)> = Vec::new();
            for (row, forms) in arabic_table::SHAPING_TABLE.iter().enumerate() {
                let u = arabic_table::SHAPING_TABLE_FIRST + row as u32;
                let form = u32::from(forms[column]);
                if form == 0 {
                    continue;
                }
                if let (Some(base), Some(shaped)) =
                    (face.nominal_glyph(u), face.nominal_glyph(form))
                {
                    pairs.push((base, shaped));
                }
            }

            if pairs.is_empty() {
                continue;
            }
            pairs.sort_by_key(|(base, _)| *base);

            let coverage = Coverage::Glyphs(pairs.iter().map(|(base, _)| *base).collect());
            let substitutes = pairs.iter().map(|(_, shaped)| *shaped).collect();
            lookups.push((
                mask,
                SubstLookup {
                    flags: LookupFlags::IGNORE_MARKS,
                    mark_filtering_set: None,
                    subtables: vec![SubstSubtable::Single(SingleSubst::Map {
                        coverage,
                        substitutes,
                    })],
                },
            ));
        }

        // Lam-Alef ligatures match the already-substituted presentation
        // forms: lam.init + alef.fina gives the isolated ligature, and
        // lam.medi + alef.fina the final one.
        let rlig_mask = crate::ot::map::GLOBAL_BIT_MASK;
        let lam_row = (0x0644 - arabic_table::SHAPING_TABLE_FIRST) as usize;
        let lam_forms = [
            u32::from(arabic_table::SHAPING_TABLE[lam_row][2]), // init
            u32::from(arabic_table::SHAPING_TABLE[lam_row][3]), // medi
        ];

        let mut first_glyphs: Vec<(GlyphId, usize)> = Vec::new();
        for (slot, &lam_form) in lam_forms.iter().enumerate() {
            if let Some(glyph) = face.nominal_glyph(lam_form) {
                first_glyphs.push((glyph, slot));
            }
        }
        first_glyphs.sort_by_key(|(glyph, _)| *glyph);

        if !first_glyphs.is_empty() {
            let mut sets: Vec<Vec<Ligature>> = Vec::new();
            for &(_, slot) in &first_glyphs {
                let mut set = Vec::new();
                for &(second, forms) in arabic_table::LIGATURE_TABLE {
                    let row = (second - arabic_table::SHAPING_TABLE_FIRST) as usize;
                    let second_fina = u32::from(arabic_table::SHAPING_TABLE[row][1]);
                    let ligature = u32::from(forms[slot]);
                    if let (Some(component), Some(lig_glyph)) = (
                        face.nominal_glyph(second_fina),
                        face.nominal_glyph(ligature),
                    ) {
                        set.push(Ligature {
                            glyph: lig_glyph,
                            components: vec![component],
                        });
                    }
                }
                sets.push(set);
            }

            if sets.iter().any(|set| !set.is_empty()) {
                let coverage =
                    Coverage::Glyphs(first_glyphs.iter().map(|(glyph, _)| *glyph).collect());
                lookups.push((
                    rlig_mask,
                    SubstLookup {
                        flags: LookupFlags::IGNORE_MARKS,
                        mark_filtering_set: None,
                        subtables: vec![SubstSubtable::Ligature(LigatureSubst {
                            coverage,
                            ligature_sets: sets,
                        })],
                    },
                ));
            }
        }

        if lookups.is_empty() {
            return None;
        }

        let accels = lookups
            .iter()
            .map(|(_, lookup)| LookupAccel::for_subst(lookup))
            .collect();
        Some(ArabicFallbackPlan { lookups, accels })
    }

    fn shape(&self, face: &dyn Face, buffer: &mut Buffer) {
        let tables = LayoutTables {
            gsub: face.gsub(),
            gpos: face.gpos(),
        };

        for ((mask, lookup), accel) in self.lookups.iter().zip(&self.accels) {
            let mut ctx = ApplyContext::new(TableIndex::Gsub, face, buffer, tables);
            ctx.lookup_mask = *mask;
            ctx.auto_zwj = false;
            ctx.lookup_props =
                crate::ot::apply::lookup_props(lookup.flags, lookup.mark_filtering_set);

            ctx.buffer.clear_output();
            ctx.buffer.idx = 0;
            apply_forward(&mut ctx, accel, |ctx| crate::ot::gsub::apply_once(ctx, lookup));
            ctx.buffer.swap_buffers();
        }
    }
}

fn fallback_shape(plan: &ShapePlan, face: &dyn Face, buffer: &mut Buffer) {
    let arabic_plan: &ArabicShapePlan = match plan.shaper_data() {
        Some(data) => data,
        None => return,
    };
    if let Some(fallback) = &arabic_plan.fallback {
        fallback.shape(face, buffer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn joining_actions(text: &str) -> Vec<Action> {
        let mut buffer = Buffer::new();
        for (i, c) in text.chars().enumerate() {
            buffer.add(c as u32, i as u32);
        }
        let mut scratch = buffer.scratch_flags;
        for i in 0..buffer.len {
            buffer.info[i].init_unicode_props(&mut scratch);
        }
        buffer.scratch_flags = scratch;
        arabic_joining(&mut buffer);
        (0..buffer.len)
            .map(|i| buffer.info[i].arabic_shaping_action())
            .collect()
    }

    #[test]
    fn dual_joining_word() {
        // BEH + BEH + BEH joins into init/medi/fina.
        let actions = joining_actions("\u{0628}\u{0628}\u{0628}");
        assert_eq!(actions, vec![Action::Init, Action::Medi, Action::Fina]);
    }

    #[test]
    fn right_joining_stops_the_chain() {
        // BEH + ALEF MADDA: BEH takes init, the alef takes fina, and a
        // following BEH starts fresh.
        let actions = joining_actions("\u{0628}\u{0622}\u{0628}");
        assert_eq!(actions, vec![Action::Init, Action::Fina, Action::Isol]);
    }

    #[test]
    fn transparent_marks_do_not_break_joining() {
        // BEH + FATHA (mark) + BEH still joins.
        let actions = joining_actions("\u{0628}\u{064E}\u{0628}");
        assert_eq!(actions, vec![Action::Init, Action::None, Action::Fina]);
    }

    #[test]
    fn non_joining_isolates() {
        let actions = joining_actions("\u{0621}");
        assert_eq!(actions, vec![Action::Isol]);
    }

    #[test]
    fn pre_context_promotes_final_form() {
        let mut buffer = Buffer::new();
        buffer.set_pre_context("\u{0628}");
        buffer.add(0x0628, 0);
        let mut scratch = buffer.scratch_flags;
        buffer.info[0].init_unicode_props(&mut scratch);
        buffer.scratch_flags = scratch;
        arabic_joining(&mut buffer);
        assert_eq!(buffer.info[0].arabic_shaping_action(), Action::Fina);
    }
}
