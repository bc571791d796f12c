//! End-to-end shaping scenarios over hand-built faces.

use std::collections::HashMap;
use std::str::FromStr;

use pretty_assertions::assert_eq;

use ot_shaper::tables::gsubgpos::*;
use ot_shaper::{
    shape, BufferFlags, Face, Feature, GlyphBuffer, GlyphClass, GlyphExtents, GlyphFlags,
    GlyphId, ShapeError, ShapingLimit, Tag, UnicodeBuffer,
};

#[derive(Default)]
struct TestFace {
    id: u64,
    cmap: HashMap<u32, u16>,
    advances: HashMap<u16, i32>,
    default_advance: i32,
    classes: HashMap<u16, GlyphClass>,
    extents: HashMap<u16, GlyphExtents>,
    gsub: Option<SubstTable>,
    gpos: Option<PosTable>,
}

impl TestFace {
    fn new(id: u64) -> Self {
        TestFace {
            id,
            default_advance: 600,
            ..TestFace::default()
        }
    }

    fn glyph(mut self, c: u32, gid: u16) -> Self {
        self.cmap.insert(c, gid);
        self
    }

    fn advance(mut self, gid: u16, advance: i32) -> Self {
        self.advances.insert(gid, advance);
        self
    }

    fn class(mut self, gid: u16, class: GlyphClass) -> Self {
        self.classes.insert(gid, class);
        self
    }

    fn extent(mut self, gid: u16, extents: GlyphExtents) -> Self {
        self.extents.insert(gid, extents);
        self
    }

    fn with_gsub(mut self, gsub: SubstTable) -> Self {
        self.gsub = Some(gsub);
        self
    }

    fn with_gpos(mut self, gpos: PosTable) -> Self {
        self.gpos = Some(gpos);
        self
    }
}

impl Face for TestFace {
    fn nominal_glyph(&self, c: u32) -> Option<GlyphId> {
        self.cmap.get(&c).map(|gid| GlyphId(*gid))
    }

    fn glyph_h_advance(&self, glyph: GlyphId) -> i32 {
        self.advances
            .get(&glyph.0)
            .copied()
            .unwrap_or(self.default_advance)
    }

    fn glyph_class(&self, glyph: GlyphId) -> Option<GlyphClass> {
        self.classes.get(&glyph.0).copied()
    }

    fn has_glyph_classes(&self) -> bool {
        !self.classes.is_empty()
    }

    fn glyph_extents(&self, glyph: GlyphId) -> Option<GlyphExtents> {
        self.extents.get(&glyph.0).copied()
    }

    fn gsub(&self) -> Option<&SubstTable> {
        self.gsub.as_ref()
    }

    fn gpos(&self) -> Option<&PosTable> {
        self.gpos.as_ref()
    }

    fn face_id(&self) -> u64 {
        self.id
    }
}

fn tag(s: &[u8; 4]) -> Tag {
    Tag::from_bytes(s)
}

fn coverage(glyphs: &[u16]) -> Coverage {
    let mut glyphs: Vec<GlyphId> = glyphs.iter().map(|g| GlyphId(*g)).collect();
    glyphs.sort();
    Coverage::Glyphs(glyphs)
}

/// One `DFLT` script whose default language system exposes every feature.
fn layout_table<T>(features: Vec<(Tag, Vec<u16>)>, lookups: Vec<Lookup<T>>) -> LayoutTable<T> {
    LayoutTable {
        scripts: vec![ScriptRecord {
            tag: tag(b"DFLT"),
            default_lang_sys: Some(LangSys {
                required_feature: None,
                feature_indices: (0..features.len() as u16).collect(),
            }),
            lang_sys_records: Vec::new(),
        }],
        features: features
            .into_iter()
            .map(|(tag, lookup_indices)| FeatureRecord { tag, lookup_indices })
            .collect(),
        lookups,
        variations: Vec::new(),
    }
}

fn lookup<T>(flags: LookupFlags, subtables: Vec<T>) -> Lookup<T> {
    Lookup {
        flags,
        mark_filtering_set: None,
        subtables,
    }
}

fn shape_str(face: &TestFace, text: &str, features: &[Feature]) -> GlyphBuffer {
    let mut buffer = UnicodeBuffer::new();
    buffer.push_str(text);
    shape(face, features, buffer).unwrap()
}

fn glyphs_of(buffer: &GlyphBuffer) -> Vec<u32> {
    buffer.glyph_infos().iter().map(|i| i.codepoint).collect()
}

fn clusters_of(buffer: &GlyphBuffer) -> Vec<u32> {
    buffer.glyph_infos().iter().map(|i| i.cluster).collect()
}

fn advances_of(buffer: &GlyphBuffer) -> Vec<i32> {
    buffer.glyph_positions().iter().map(|p| p.x_advance).collect()
}

#[test]
fn latin_contextual_alternate() {
    // "a" followed by space + "a" takes an alternate form, through a
    // chained context that fires a nested single substitution.
    let gsub = layout_table(
        vec![(tag(b"calt"), vec![0])],
        vec![
            lookup(
                LookupFlags::empty(),
                vec![SubstSubtable::ChainContext(ChainContextLookup::Format3 {
                    backtrack: vec![],
                    input: vec![coverage(&[1])],
                    lookahead: vec![coverage(&[2]), coverage(&[1])],
                    lookups: vec![LookupRecord { sequence_index: 0, lookup_index: 1 }],
                })],
            ),
            lookup(
                LookupFlags::empty(),
                vec![SubstSubtable::Single(SingleSubst::Map {
                    coverage: coverage(&[1]),
                    substitutes: vec![GlyphId(3)],
                })],
            ),
        ],
    );

    let face = TestFace::new(1)
        .glyph(0x61, 1)
        .glyph(0x20, 2)
        .advance(1, 1000)
        .advance(2, 500)
        .advance(3, 1000)
        .with_gsub(gsub);

    let out = shape_str(&face, "a a", &[]);
    assert_eq!(out.serialize(), "3=0+1000|2=1+500|1=2+1000");

    // The context spanned all three clusters; re-breaking inside it is
    // unsafe.
    assert!(out.glyph_infos()[1]
        .glyph_flags()
        .contains(GlyphFlags::UNSAFE_TO_BREAK));
}

#[test]
fn latin_pair_positioning() {
    let gpos = layout_table(
        vec![(tag(b"kern"), vec![0])],
        vec![lookup(
            LookupFlags::empty(),
            vec![PosSubtable::Pair(PairPos::Format1 {
                coverage: coverage(&[1]),
                sets: vec![vec![PairValueRecord {
                    second_glyph: GlyphId(2),
                    value1: ValueRecord { x_advance: -106, ..ValueRecord::default() },
                    value2: ValueRecord::default(),
                }]],
            })],
        )],
    );

    let face = TestFace::new(2)
        .glyph(0x56, 1)
        .glyph(0x61, 2)
        .advance(1, 700)
        .advance(2, 700)
        .with_gpos(gpos);

    let out = shape_str(&face, "Va", &[]);
    assert_eq!(glyphs_of(&out), vec![1, 2]);
    assert_eq!(advances_of(&out), vec![594, 700]);
    assert!(out.glyph_infos()[1]
        .glyph_flags()
        .contains(GlyphFlags::UNSAFE_TO_BREAK));
}

#[test]
fn ligature_carries_marks_to_components() {
    // f + combining acute + i: the f_i ligature forms across the mark, and
    // the mark then attaches to the first ligature component.
    let gsub = layout_table(
        vec![(tag(b"liga"), vec![0])],
        vec![lookup(
            LookupFlags::IGNORE_MARKS,
            vec![SubstSubtable::Ligature(LigatureSubst {
                coverage: coverage(&[1]),
                ligature_sets: vec![vec![Ligature {
                    glyph: GlyphId(3),
                    components: vec![GlyphId(2)],
                }]],
            })],
        )],
    );
    let gpos = layout_table(
        vec![(tag(b"mark"), vec![0])],
        vec![lookup(
            LookupFlags::empty(),
            vec![PosSubtable::MarkToLigature(MarkLigaturePos {
                mark_coverage: coverage(&[4]),
                ligature_coverage: coverage(&[3]),
                marks: vec![MarkRecord { class: 0, anchor: Anchor::default() }],
                mark_class_count: 1,
                ligature_anchors: vec![vec![
                    vec![Some(Anchor { x: 100, y: 50, ..Anchor::default() })],
                    vec![Some(Anchor { x: 400, y: 50, ..Anchor::default() })],
                ]],
            })],
        )],
    );

    let face = TestFace::new(3)
        .glyph(0x66, 1)
        .glyph(0x69, 2)
        .glyph(0x301, 4)
        .class(1, GlyphClass::Base)
        .class(2, GlyphClass::Base)
        .class(3, GlyphClass::Ligature)
        .class(4, GlyphClass::Mark)
        .advance(3, 1000)
        .with_gsub(gsub)
        .with_gpos(gpos);

    let out = shape_str(&face, "f\u{0301}i", &[]);
    assert_eq!(glyphs_of(&out), vec![3, 4]);
    assert_eq!(clusters_of(&out), vec![0, 0]);

    let mark = &out.glyph_positions()[1];
    assert_eq!(mark.x_advance, 0);
    // First-component anchor, shifted back over the ligature advance.
    assert_eq!(mark.x_offset, 100 - 1000);
    assert_eq!(mark.y_offset, 50);
}

#[test]
fn zwnj_blocks_ligation() {
    let gsub = layout_table(
        vec![(tag(b"liga"), vec![0])],
        vec![lookup(
            LookupFlags::empty(),
            vec![SubstSubtable::Ligature(LigatureSubst {
                coverage: coverage(&[1]),
                ligature_sets: vec![vec![Ligature {
                    glyph: GlyphId(3),
                    components: vec![GlyphId(2)],
                }]],
            })],
        )],
    );

    let face = TestFace::new(4)
        .glyph(0x66, 1)
        .glyph(0x69, 2)
        .glyph(0x20, 9)
        .with_gsub(gsub);

    // Without the joiner the ligature forms.
    let out = shape_str(&face, "fi", &[]);
    assert_eq!(glyphs_of(&out), vec![3]);

    // With ZWNJ in between it must not; the joiner is hidden as a
    // zero-width invisible glyph.
    let out = shape_str(&face, "f\u{200C}i", &[]);
    assert_eq!(glyphs_of(&out), vec![1, 9, 2]);
    assert_eq!(advances_of(&out)[1], 0);
}

#[test]
fn hebrew_rtl_mark_stack() {
    let base_extents = GlyphExtents { x_bearing: 40, y_bearing: 700, width: 800, height: -700 };
    let mark_extents = GlyphExtents { x_bearing: 50, y_bearing: -50, width: 100, height: -100 };

    let face = TestFace::new(5)
        .glyph(0x05D4, 5)
        .glyph(0x05B2, 4)
        .glyph(0x05D1, 3)
        .glyph(0x05B5, 2)
        .glyph(0x05DC, 1)
        .advance(1, 901)
        .advance(2, 600)
        .advance(3, 967)
        .advance(4, 600)
        .advance(5, 1071)
        .class(1, GlyphClass::Base)
        .class(3, GlyphClass::Base)
        .class(5, GlyphClass::Base)
        .class(2, GlyphClass::Mark)
        .class(4, GlyphClass::Mark)
        .extent(1, base_extents)
        .extent(3, base_extents)
        .extent(5, base_extents)
        .extent(2, mark_extents)
        .extent(4, mark_extents);

    let out = shape_str(&face, "\u{05D4}\u{05B2}\u{05D1}\u{05B5}\u{05DC}", &[]);

    // Visual order: lamed, tsere, bet, hataf patah, he.
    assert_eq!(glyphs_of(&out), vec![1, 2, 3, 4, 5]);
    assert_eq!(clusters_of(&out), vec![4, 2, 2, 0, 0]);

    // Marks are zero-width; bases keep their advances.
    assert_eq!(advances_of(&out), vec![901, 0, 967, 0, 1071]);

    // Fallback positioning put the below-base points under their bases.
    assert!(out.glyph_positions()[1].y_offset < 0);
    assert!(out.glyph_positions()[3].y_offset < 0);

    // Clusters are monotone (non-increasing, since the run was reversed).
    let clusters = clusters_of(&out);
    assert!(clusters.windows(2).all(|w| w[0] >= w[1]));
}

#[test]
fn arabic_joining_with_presentation_fallback() {
    // BEH + ALEF-WITH-MADDA, no GSUB in the font: joining forms come from
    // the synthesized presentation-form lookups.
    let face = TestFace::new(6)
        .glyph(0x0628, 1)
        .glyph(0x0622, 2)
        .glyph(0xFE91, 3) // beh initial
        .glyph(0xFE82, 4) // alef madda final
        .advance(1, 400)
        .advance(2, 300)
        .advance(3, 190)
        .advance(4, 327);

    let out = shape_str(&face, "\u{0628}\u{0622}", &[]);
    assert_eq!(out.serialize(), "4=1+327|3=0+190");
}

#[test]
fn arabic_tatweel_safety_flags() {
    let face = TestFace::new(7)
        .glyph(0x0628, 1)
        .glyph(0xFE90, 5) // beh final
        .glyph(0xFE91, 3) // beh initial
        .glyph(0xFE92, 6); // beh medial

    let mut buffer = UnicodeBuffer::new();
    buffer.push_str("\u{0628}\u{0628}\u{0628}");
    buffer.set_flags(BufferFlags::PRODUCE_SAFE_TO_INSERT_TATWEEL);
    let out = shape(&face, &[], buffer).unwrap();

    assert_eq!(glyphs_of(&out), vec![5, 6, 3]);

    // Joining seams are tatweel insertion points, and tatweel points are
    // promoted to unsafe-to-break.
    let flags: Vec<GlyphFlags> = out.glyph_infos().iter().map(|i| i.glyph_flags()).collect();
    assert!(flags
        .iter()
        .any(|f| f.contains(GlyphFlags::SAFE_TO_INSERT_TATWEEL)));
    for f in &flags {
        if f.contains(GlyphFlags::SAFE_TO_INSERT_TATWEEL) {
            assert!(f.contains(GlyphFlags::UNSAFE_TO_BREAK));
        }
    }
}

#[test]
fn narrow_space_falls_back_to_plain_space() {
    let face = TestFace::new(8).glyph(0x20, 1).advance(1, 500);

    let out = shape_str(&face, "\u{202F}", &[]);
    assert_eq!(glyphs_of(&out), vec![1]);
    assert_eq!(advances_of(&out), vec![250]);
}

#[test]
fn nonbreaking_hyphen_falls_back_to_hyphen() {
    let face = TestFace::new(9).glyph(0x2010, 7).advance(7, 333);

    let out = shape_str(&face, "\u{2011}", &[]);
    assert_eq!(glyphs_of(&out), vec![7]);
    assert_eq!(advances_of(&out), vec![333]);
}

#[test]
fn canonical_equivalence() {
    // NFC and NFD spellings shape identically when the font can render
    // both; the composed glyph wins.
    let face = TestFace::new(10)
        .glyph(0xC5, 1)
        .glyph(0x41, 2)
        .glyph(0x30A, 3)
        .advance(1, 722);

    let nfc = shape_str(&face, "\u{00C5}", &[]);
    let nfd = shape_str(&face, "\u{0041}\u{030A}", &[]);
    assert_eq!(nfc.serialize(), nfd.serialize());
    assert_eq!(glyphs_of(&nfc), vec![1]);
}

#[test]
fn decomposition_used_when_composed_glyph_missing() {
    let face = TestFace::new(11)
        .glyph(0x41, 2)
        .glyph(0x30A, 3)
        .class(2, GlyphClass::Base)
        .class(3, GlyphClass::Mark);

    let out = shape_str(&face, "\u{00C5}", &[]);
    assert_eq!(glyphs_of(&out), vec![2, 3]);
    // Both pieces descend from the one input character.
    assert_eq!(clusters_of(&out), vec![0, 0]);
}

#[test]
fn rand_is_deterministic_per_face() {
    let gsub = layout_table(
        vec![(tag(b"rand"), vec![0])],
        vec![lookup(
            LookupFlags::empty(),
            vec![SubstSubtable::Alternate(AlternateSubst {
                coverage: coverage(&[1]),
                alternates: vec![vec![GlyphId(5), GlyphId(6), GlyphId(7)]],
            })],
        )],
    );

    let face = TestFace::new(12).glyph(0x61, 1).with_gsub(gsub);

    let first = shape_str(&face, "aaaa", &[]);
    let second = shape_str(&face, "aaaa", &[]);
    assert_eq!(first.serialize(), second.serialize());
    for gid in glyphs_of(&first) {
        assert!((5..=7).contains(&gid));
    }
}

#[test]
fn rand_user_value_selects_explicit_alternate() {
    let gsub = layout_table(
        vec![(tag(b"rand"), vec![0])],
        vec![lookup(
            LookupFlags::empty(),
            vec![SubstSubtable::Alternate(AlternateSubst {
                coverage: coverage(&[1]),
                alternates: vec![vec![GlyphId(5), GlyphId(6), GlyphId(7)]],
            })],
        )],
    );

    let face = TestFace::new(13).glyph(0x61, 1).with_gsub(gsub);

    let feature = Feature::from_str("rand=2").unwrap();
    let out = shape_str(&face, "a", &[feature]);
    assert_eq!(glyphs_of(&out), vec![6]);
}

#[test]
fn cursive_attachment() {
    let gpos = layout_table(
        vec![(tag(b"curs"), vec![0])],
        vec![lookup(
            LookupFlags::empty(),
            vec![PosSubtable::Cursive(CursivePos {
                coverage: coverage(&[1, 2]),
                entry_exits: vec![
                    EntryExit {
                        entry: None,
                        exit: Some(Anchor { x: 500, y: 50, ..Anchor::default() }),
                    },
                    EntryExit {
                        entry: Some(Anchor { x: 100, y: 10, ..Anchor::default() }),
                        exit: None,
                    },
                ],
            })],
        )],
    );

    let face = TestFace::new(14)
        .glyph(0x63, 1)
        .glyph(0x64, 2)
        .advance(1, 600)
        .advance(2, 600)
        .with_gpos(gpos);

    let out = shape_str(&face, "cd", &[]);
    let pos = out.glyph_positions();

    // The first glyph's advance snaps to its exit anchor, the second's
    // shrinks by its entry anchor, and the entry/exit y delta rides on the
    // attached glyph.
    assert_eq!(pos[0].x_advance, 500);
    assert_eq!(pos[1].x_advance, 500);
    assert_eq!(pos[1].x_offset, -100);
    assert_eq!(pos[0].y_offset, 40);
}

#[test]
fn automatic_fractions() {
    let gsub = layout_table(
        vec![
            (tag(b"numr"), vec![0]),
            (tag(b"dnom"), vec![1]),
        ],
        vec![
            lookup(
                LookupFlags::empty(),
                vec![SubstSubtable::Single(SingleSubst::Map {
                    coverage: coverage(&[1, 2]),
                    substitutes: vec![GlyphId(4), GlyphId(5)],
                })],
            ),
            lookup(
                LookupFlags::empty(),
                vec![SubstSubtable::Single(SingleSubst::Map {
                    coverage: coverage(&[1, 2]),
                    substitutes: vec![GlyphId(6), GlyphId(7)],
                })],
            ),
        ],
    );

    let face = TestFace::new(15)
        .glyph(0x31, 1)
        .glyph(0x32, 2)
        .glyph(0x2044, 3)
        .with_gsub(gsub);

    let out = shape_str(&face, "1\u{2044}2", &[]);
    // Numerator form before the slash, denominator form after.
    assert_eq!(glyphs_of(&out), vec![4, 3, 7]);
    assert!(out.glyph_infos()[1]
        .glyph_flags()
        .contains(GlyphFlags::UNSAFE_TO_BREAK));
}

#[test]
fn dotted_circle_insertion_at_start_of_text() {
    let face = TestFace::new(16)
        .glyph(0x25CC, 8)
        .glyph(0x301, 4)
        .class(8, GlyphClass::Base)
        .class(4, GlyphClass::Mark);

    let mut buffer = UnicodeBuffer::new();
    buffer.push_str("\u{0301}");
    buffer.set_flags(BufferFlags::BEGINNING_OF_TEXT);
    let out = shape(&face, &[], buffer).unwrap();

    assert_eq!(glyphs_of(&out), vec![8, 4]);
    assert_eq!(clusters_of(&out), vec![0, 0]);

    // Suppressible by flag.
    let mut buffer = UnicodeBuffer::new();
    buffer.push_str("\u{0301}");
    buffer.set_flags(
        BufferFlags::BEGINNING_OF_TEXT | BufferFlags::DO_NOT_INSERT_DOTTED_CIRCLE,
    );
    let out = shape(&face, &[], buffer).unwrap();
    assert_eq!(glyphs_of(&out), vec![4]);
}

#[test]
fn removing_default_ignorables() {
    let face = TestFace::new(17).glyph(0x61, 1).glyph(0x20, 9);

    let mut buffer = UnicodeBuffer::new();
    buffer.push_str("a\u{200B}a");
    buffer.set_flags(BufferFlags::REMOVE_DEFAULT_IGNORABLES);
    let out = shape(&face, &[], buffer).unwrap();
    assert_eq!(glyphs_of(&out), vec![1, 1]);
    assert_eq!(clusters_of(&out), vec![0, 2]);
}

#[test]
fn runaway_expansion_trips_the_length_budget() {
    let gsub = layout_table(
        vec![(tag(b"ccmp"), vec![0])],
        vec![lookup(
            LookupFlags::empty(),
            vec![SubstSubtable::Multiple(MultipleSubst {
                coverage: coverage(&[1]),
                sequences: vec![vec![GlyphId(1); 20_000]],
            })],
        )],
    );

    let face = TestFace::new(18).glyph(0x61, 1).with_gsub(gsub);

    let mut buffer = UnicodeBuffer::new();
    buffer.push_str("a");
    let result = shape(&face, &[], buffer);
    assert_eq!(
        result.err(),
        Some(ShapeError::LimitExceeded(ShapingLimit::MaxLength))
    );
}

#[test]
fn malformed_lookup_reference_is_reported() {
    let gsub = layout_table(vec![(tag(b"liga"), vec![9])], Vec::<SubstLookup>::new());
    let face = TestFace::new(19).glyph(0x61, 1).with_gsub(gsub);

    let mut buffer = UnicodeBuffer::new();
    buffer.push_str("a");
    let result = shape(&face, &[], buffer);
    assert!(matches!(result, Err(ShapeError::MalformedFontTable(_))));
}

#[test]
fn clusters_stay_monotone_across_substitutions() {
    // Multiple substitution expands, ligature contracts; clusters must
    // stay sorted throughout.
    let gsub = layout_table(
        vec![(tag(b"ccmp"), vec![0]), (tag(b"liga"), vec![1])],
        vec![
            lookup(
                LookupFlags::empty(),
                vec![SubstSubtable::Multiple(MultipleSubst {
                    coverage: coverage(&[2]),
                    sequences: vec![vec![GlyphId(2), GlyphId(2)]],
                })],
            ),
            lookup(
                LookupFlags::empty(),
                vec![SubstSubtable::Ligature(LigatureSubst {
                    coverage: coverage(&[1]),
                    ligature_sets: vec![vec![Ligature {
                        glyph: GlyphId(3),
                        components: vec![GlyphId(2)],
                    }]],
                })],
            ),
        ],
    );

    let face = TestFace::new(20)
        .glyph(0x61, 1)
        .glyph(0x62, 2)
        .with_gsub(gsub);

    let out = shape_str(&face, "abab", &[]);
    let clusters = clusters_of(&out);
    assert!(clusters.windows(2).all(|w| w[0] <= w[1]));
}

#[test]
fn mark_to_base_attachment() {
    let gpos = layout_table(
        vec![(tag(b"mark"), vec![0])],
        vec![lookup(
            LookupFlags::empty(),
            vec![PosSubtable::MarkToBase(MarkBasePos {
                mark_coverage: coverage(&[4]),
                base_coverage: coverage(&[1]),
                marks: vec![MarkRecord {
                    class: 0,
                    anchor: Anchor { x: 50, y: 0, ..Anchor::default() },
                }],
                mark_class_count: 1,
                base_anchors: vec![vec![Some(Anchor { x: 200, y: 500, ..Anchor::default() })]],
            })],
        )],
    );

    let face = TestFace::new(21)
        .glyph(0x61, 1)
        .glyph(0x301, 4)
        .advance(1, 600)
        .class(1, GlyphClass::Base)
        .class(4, GlyphClass::Mark)
        .with_gpos(gpos);

    let out = shape_str(&face, "a\u{0301}", &[]);
    assert_eq!(glyphs_of(&out), vec![1, 4]);

    let mark = &out.glyph_positions()[1];
    assert_eq!(mark.x_advance, 0);
    assert_eq!(mark.x_offset, (200 - 50) - 600);
    assert_eq!(mark.y_offset, 500);
}

// A tiny deterministic generator for the property loops below.
fn lcg(seed: &mut u32) -> u32 {
    *seed = seed.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
    *seed >> 16
}

const PROPERTY_ALPHABET: &[char] = &[
    'a', 'b', 'f', 'i', ' ', '\u{0301}', '\u{030A}', '\u{200C}', '\u{200B}', 'A',
];

fn generated_corpus() -> Vec<String> {
    let mut seed = 0x2B_u32;
    let mut corpus = Vec::new();
    for len in 1..=8 {
        for _ in 0..8 {
            let s: String = (0..len)
                .map(|_| PROPERTY_ALPHABET[lcg(&mut seed) as usize % PROPERTY_ALPHABET.len()])
                .collect();
            corpus.push(s);
        }
    }
    corpus
}

fn property_face(id: u64) -> TestFace {
    // Expansion (ccmp), contraction (liga, across marks) and mark
    // classification together shake the cluster bookkeeping hardest.
    let gsub = layout_table(
        vec![(tag(b"ccmp"), vec![0]), (tag(b"liga"), vec![1])],
        vec![
            lookup(
                LookupFlags::empty(),
                vec![SubstSubtable::Multiple(MultipleSubst {
                    coverage: coverage(&[2]),
                    sequences: vec![vec![GlyphId(2), GlyphId(2)]],
                })],
            ),
            lookup(
                LookupFlags::IGNORE_MARKS,
                vec![SubstSubtable::Ligature(LigatureSubst {
                    coverage: coverage(&[3]),
                    ligature_sets: vec![vec![Ligature {
                        glyph: GlyphId(5),
                        components: vec![GlyphId(4)],
                    }]],
                })],
            ),
        ],
    );

    TestFace::new(id)
        .glyph(0x61, 1)
        .glyph(0x62, 2)
        .glyph(0x66, 3)
        .glyph(0x69, 4)
        .glyph(0x41, 8)
        .glyph(0x20, 9)
        .glyph(0x301, 6)
        .glyph(0x30A, 7)
        .class(1, GlyphClass::Base)
        .class(2, GlyphClass::Base)
        .class(3, GlyphClass::Base)
        .class(4, GlyphClass::Base)
        .class(5, GlyphClass::Ligature)
        .class(8, GlyphClass::Base)
        .class(9, GlyphClass::Base)
        .class(6, GlyphClass::Mark)
        .class(7, GlyphClass::Mark)
        .with_gsub(gsub)
}

#[test]
fn cluster_monotonicity_over_generated_inputs() {
    let face = property_face(30);

    let feature_combos: Vec<Vec<Feature>> = vec![
        vec![],
        vec![Feature::from_str("-liga").unwrap()],
        vec![Feature::from_str("liga[1:3]=0").unwrap()],
        vec![Feature::from_str("-ccmp").unwrap(), Feature::from_str("kern").unwrap()],
    ];

    for text in generated_corpus() {
        let char_count = text.chars().count() as u32;
        for features in &feature_combos {
            let out = shape_str(&face, &text, features);

            let clusters = clusters_of(&out);
            assert!(
                clusters.windows(2).all(|w| w[0] <= w[1]),
                "clusters not monotone for {:?} with {:?}: {:?}",
                text,
                features,
                clusters
            );
            assert!(
                clusters.iter().all(|c| *c < char_count),
                "cluster out of input range for {:?}: {:?}",
                text,
                clusters
            );
        }
    }
}

#[test]
fn canonical_equivalence_over_generated_inputs() {
    use unicode_normalization::UnicodeNormalization;

    // No composed forms in the font, so every canonically-equivalent
    // spelling settles on the same decomposed stream.
    let face = property_face(31);

    for text in generated_corpus() {
        let direct = shape_str(&face, &text, &[]);
        let nfc: String = text.nfc().collect();
        let nfd: String = text.nfd().collect();

        assert_eq!(
            direct.serialize(),
            shape_str(&face, &nfc, &[]).serialize(),
            "NFC spelling diverged for {:?}",
            text
        );
        assert_eq!(
            direct.serialize(),
            shape_str(&face, &nfd, &[]).serialize(),
            "NFD spelling diverged for {:?}",
            text
        );
    }
}

#[test]
fn normalization_is_idempotent() {
    let face = TestFace::new(22)
        .glyph(0x41, 2)
        .glyph(0x30A, 3)
        .class(2, GlyphClass::Base)
        .class(3, GlyphClass::Mark);

    // Shaping the (decomposed) output codepoints again yields the same
    // stream.
    let once = shape_str(&face, "\u{00C5}", &[]);
    let again = shape_str(&face, "\u{0041}\u{030A}", &[]);
    assert_eq!(glyphs_of(&once), glyphs_of(&again));
    assert_eq!(advances_of(&once), advances_of(&again));
}
