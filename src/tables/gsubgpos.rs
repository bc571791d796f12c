//! The structured GSUB/GPOS data model consumed by the lookup engine.
//!
//! The engine never parses font binaries. A [`Face`](crate::Face)
//! implementation hands these tables over pre-parsed and the engine treats
//! them as read-only. Extension subtables (GSUB type 7, GPOS type 9) do not
//! appear here; producers are expected to flatten them into the wrapped
//! subtable kind.

use ttf_parser::GlyphId;

use crate::common::Tag;

bitflags::bitflags! {
    /// OpenType lookup flags.
    pub struct LookupFlags: u16 {
        const RIGHT_TO_LEFT            = 0x0001;
        const IGNORE_BASE_GLYPHS       = 0x0002;
        const IGNORE_LIGATURES         = 0x0004;
        const IGNORE_MARKS             = 0x0008;
        const USE_MARK_FILTERING_SET   = 0x0010;
        const IGNORE_FLAGS             = 0x000E;
        const MARK_ATTACHMENT_TYPE_MASK = 0xFF00;
    }
}

/// A sorted set of glyph ids paired with a dense index into parallel arrays.
#[derive(Clone, Debug)]
pub enum Coverage {
    /// Sorted list of glyph ids; the coverage index is the list position.
    Glyphs(Vec<GlyphId>),
    /// Sorted, non-overlapping ranges with explicit start indices.
    Ranges(Vec<CoverageRange>),
}

#[derive(Clone, Copy, Debug)]
pub struct CoverageRange {
    pub start: GlyphId,
    pub end: GlyphId,
    pub start_coverage_index: u16,
}

impl Coverage {
    /// Returns the coverage index of `glyph`, if covered.
    pub fn get(&self, glyph: GlyphId) -> Option<u16> {
        match self {
            Coverage::Glyphs(glyphs) => glyphs
                .binary_search(&glyph)
                .ok()
                .map(|i| i as u16),
            Coverage::Ranges(ranges) => {
                let i = ranges
                    .binary_search_by(|r| {
                        if glyph < r.start {
                            core::cmp::Ordering::Greater
                        } else if glyph > r.end {
                            core::cmp::Ordering::Less
                        } else {
                            core::cmp::Ordering::Equal
                        }
                    })
                    .ok()?;
                let range = &ranges[i];
                Some(range.start_coverage_index + (glyph.0 - range.start.0))
            }
        }
    }

    #[inline]
    pub fn contains(&self, glyph: GlyphId) -> bool {
        self.get(glyph).is_some()
    }

    /// Visits every covered glyph id. Used by accelerator construction.
    pub fn for_each_glyph(&self, mut f: impl FnMut(GlyphId)) {
        match self {
            Coverage::Glyphs(glyphs) => {
                for g in glyphs {
                    f(*g);
                }
            }
            Coverage::Ranges(ranges) => {
                for r in ranges {
                    for id in r.start.0..=r.end.0 {
                        f(GlyphId(id));
                    }
                }
            }
        }
    }

    /// Number of covered glyphs.
    pub fn len(&self) -> usize {
        match self {
            Coverage::Glyphs(glyphs) => glyphs.len(),
            Coverage::Ranges(ranges) => ranges
                .iter()
                .map(|r| (r.end.0 - r.start.0) as usize + 1)
                .sum(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Coverage::Glyphs(glyphs) => glyphs.is_empty(),
            Coverage::Ranges(ranges) => ranges.is_empty(),
        }
    }
}

/// A glyph → class mapping. Unlisted glyphs are class 0.
#[derive(Clone, Debug)]
pub enum ClassDef {
    Format1 {
        start: GlyphId,
        classes: Vec<u16>,
    },
    Format2 {
        ranges: Vec<ClassRange>,
    },
}

#[derive(Clone, Copy, Debug)]
pub struct ClassRange {
    pub start: GlyphId,
    pub end: GlyphId,
    pub class: u16,
}

impl ClassDef {
    pub fn get(&self, glyph: GlyphId) -> u16 {
        match self {
            ClassDef::Format1 { start, classes } => {
                if glyph.0 >= start.0 {
                    classes
                        .get((glyph.0 - start.0) as usize)
                        .copied()
                        .unwrap_or(0)
                } else {
                    0
                }
            }
            ClassDef::Format2 { ranges } => ranges
                .binary_search_by(|r| {
                    if glyph < r.start {
                        core::cmp::Ordering::Greater
                    } else if glyph > r.end {
                        core::cmp::Ordering::Less
                    } else {
                        core::cmp::Ordering::Equal
                    }
                })
                .ok()
                .map(|i| ranges[i].class)
                .unwrap_or(0),
        }
    }
}

/// A variation-store delta reference carried by anchors and value records.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Device {
    pub outer: u16,
    pub inner: u16,
}

/// An attachment point.
///
/// Format 1 is plain coordinates, format 2 adds a contour point (legacy
/// hinting; carried but unused), format 3 adds variation deltas.
#[derive(Clone, Copy, Default, Debug)]
pub struct Anchor {
    pub x: i16,
    pub y: i16,
    pub point: Option<u16>,
    pub x_device: Option<Device>,
    pub y_device: Option<Device>,
}

/// A GPOS value record. Absent fields are zero.
#[derive(Clone, Copy, Default, Debug)]
pub struct ValueRecord {
    pub x_placement: i16,
    pub y_placement: i16,
    pub x_advance: i16,
    pub y_advance: i16,
    pub x_placement_device: Option<Device>,
    pub y_placement_device: Option<Device>,
    pub x_advance_device: Option<Device>,
    pub y_advance_device: Option<Device>,
}

impl ValueRecord {
    pub fn is_zero(&self) -> bool {
        self.x_placement == 0
            && self.y_placement == 0
            && self.x_advance == 0
            && self.y_advance == 0
            && self.x_placement_device.is_none()
            && self.y_placement_device.is_none()
            && self.x_advance_device.is_none()
            && self.y_advance_device.is_none()
    }
}

/// A language system: the features active for one script/language pair.
#[derive(Clone, Default, Debug)]
pub struct LangSys {
    pub required_feature: Option<u16>,
    pub feature_indices: Vec<u16>,
}

#[derive(Clone, Debug)]
pub struct LangSysRecord {
    pub tag: Tag,
    pub lang_sys: LangSys,
}

#[derive(Clone, Debug)]
pub struct ScriptRecord {
    pub tag: Tag,
    pub default_lang_sys: Option<LangSys>,
    pub lang_sys_records: Vec<LangSysRecord>,
}

impl ScriptRecord {
    /// Finds a language system by tag.
    pub fn lang_sys(&self, tag: Tag) -> Option<&LangSys> {
        self.lang_sys_records
            .iter()
            .find(|r| r.tag == tag)
            .map(|r| &r.lang_sys)
    }
}

#[derive(Clone, Debug)]
pub struct FeatureRecord {
    pub tag: Tag,
    pub lookup_indices: Vec<u16>,
}

/// One axis-range condition on normalized (F2Dot14-valued) coordinates.
#[derive(Clone, Copy, Debug)]
pub struct Condition {
    pub axis_index: u16,
    pub filter_range_min: i16,
    pub filter_range_max: i16,
}

impl Condition {
    pub fn evaluate(&self, coords: &[i32]) -> bool {
        let coord = coords.get(self.axis_index as usize).copied().unwrap_or(0);
        i32::from(self.filter_range_min) <= coord && coord <= i32::from(self.filter_range_max)
    }
}

/// Substitutes one feature's lookup list when a condition set matches.
#[derive(Clone, Debug)]
pub struct FeatureSubstitution {
    pub feature_index: u16,
    pub lookup_indices: Vec<u16>,
}

#[derive(Clone, Debug)]
pub struct FeatureVariationRecord {
    /// All conditions must hold (conjunction).
    pub conditions: Vec<Condition>,
    pub substitutions: Vec<FeatureSubstitution>,
}

/// An ordered list of subtables sharing flags.
#[derive(Clone, Debug)]
pub struct Lookup<T> {
    pub flags: LookupFlags,
    /// Only meaningful with `LookupFlags::USE_MARK_FILTERING_SET`.
    pub mark_filtering_set: Option<u16>,
    pub subtables: Vec<T>,
}

/// A GSUB or GPOS table: scripts, features, lookups, feature variations.
#[derive(Clone, Debug)]
pub struct LayoutTable<T> {
    pub scripts: Vec<ScriptRecord>,
    pub features: Vec<FeatureRecord>,
    pub lookups: Vec<Lookup<T>>,
    pub variations: Vec<FeatureVariationRecord>,
}

impl<T> Default for LayoutTable<T> {
    fn default() -> Self {
        LayoutTable {
            scripts: Vec::new(),
            features: Vec::new(),
            lookups: Vec::new(),
            variations: Vec::new(),
        }
    }
}

impl<T> LayoutTable<T> {
    pub fn script_index(&self, tag: Tag) -> Option<u16> {
        self.scripts
            .iter()
            .position(|s| s.tag == tag)
            .map(|i| i as u16)
    }

    /// Selects the feature-variation record matching `coords`, if any.
    pub fn find_variation_index(&self, coords: &[i32]) -> Option<u16> {
        if coords.is_empty() {
            return None;
        }
        self.variations
            .iter()
            .position(|v| v.conditions.iter().all(|c| c.evaluate(coords)))
            .map(|i| i as u16)
    }

    /// The lookup list of feature `feature_index`, with the variation
    /// record's substitution applied when one is active.
    pub fn feature_lookups(
        &self,
        feature_index: u16,
        variation_index: Option<u16>,
    ) -> Option<&[u16]> {
        if let Some(vi) = variation_index {
            if let Some(var) = self.variations.get(vi as usize) {
                if let Some(sub) = var
                    .substitutions
                    .iter()
                    .find(|s| s.feature_index == feature_index)
                {
                    return Some(&sub.lookup_indices);
                }
            }
        }
        self.features
            .get(feature_index as usize)
            .map(|f| f.lookup_indices.as_slice())
    }
}

pub type SubstTable = LayoutTable<SubstSubtable>;
pub type PosTable = LayoutTable<PosSubtable>;
pub type SubstLookup = Lookup<SubstSubtable>;
pub type PosLookup = Lookup<PosSubtable>;

/// A nested-lookup action fired when a context rule matches.
#[derive(Clone, Copy, Debug)]
pub struct LookupRecord {
    /// Input-sequence position the nested lookup applies at.
    pub sequence_index: u16,
    pub lookup_index: u16,
}

/// A context rule keyed on explicit glyph ids. `input` excludes the first
/// glyph (which the enclosing coverage matched).
#[derive(Clone, Debug)]
pub struct SequenceRule {
    pub input: Vec<GlyphId>,
    pub lookups: Vec<LookupRecord>,
}

/// A context rule keyed on glyph classes.
#[derive(Clone, Debug)]
pub struct ClassRule {
    pub input: Vec<u16>,
    pub lookups: Vec<LookupRecord>,
}

#[derive(Clone, Debug)]
pub struct ChainRule {
    pub backtrack: Vec<GlyphId>,
    pub input: Vec<GlyphId>,
    pub lookahead: Vec<GlyphId>,
    pub lookups: Vec<LookupRecord>,
}

#[derive(Clone, Debug)]
pub struct ChainClassRule {
    pub backtrack: Vec<u16>,
    pub input: Vec<u16>,
    pub lookahead: Vec<u16>,
    pub lookups: Vec<LookupRecord>,
}

/// Contextual lookup, three formats.
#[derive(Clone, Debug)]
pub enum ContextLookup {
    /// Rule sets parallel to the coverage.
    Format1 {
        coverage: Coverage,
        sets: Vec<Vec<SequenceRule>>,
    },
    /// Rule sets indexed by the class of the first glyph.
    Format2 {
        coverage: Coverage,
        classes: ClassDef,
        sets: Vec<Vec<ClassRule>>,
    },
    /// One coverage per input position.
    Format3 {
        coverages: Vec<Coverage>,
        lookups: Vec<LookupRecord>,
    },
}

impl ContextLookup {
    pub fn coverage(&self) -> Option<&Coverage> {
        match self {
            ContextLookup::Format1 { coverage, .. } => Some(coverage),
            ContextLookup::Format2 { coverage, .. } => Some(coverage),
            ContextLookup::Format3 { coverages, .. } => coverages.first(),
        }
    }
}

/// Chained contextual lookup, three formats.
#[derive(Clone, Debug)]
pub enum ChainContextLookup {
    Format1 {
        coverage: Coverage,
        sets: Vec<Vec<ChainRule>>,
    },
    Format2 {
        coverage: Coverage,
        backtrack_classes: ClassDef,
        input_classes: ClassDef,
        lookahead_classes: ClassDef,
        sets: Vec<Vec<ChainClassRule>>,
    },
    Format3 {
        backtrack: Vec<Coverage>,
        input: Vec<Coverage>,
        lookahead: Vec<Coverage>,
        lookups: Vec<LookupRecord>,
    },
}

impl ChainContextLookup {
    pub fn coverage(&self) -> Option<&Coverage> {
        match self {
            ChainContextLookup::Format1 { coverage, .. } => Some(coverage),
            ChainContextLookup::Format2 { coverage, .. } => Some(coverage),
            ChainContextLookup::Format3 { input, .. } => input.first(),
        }
    }
}

/// Single substitution.
#[derive(Clone, Debug)]
pub enum SingleSubst {
    /// `glyph + delta`, wrapping modulo 0x10000.
    Delta { coverage: Coverage, delta: i16 },
    /// Coverage-index-parallel substitute list.
    Map {
        coverage: Coverage,
        substitutes: Vec<GlyphId>,
    },
}

impl SingleSubst {
    pub fn coverage(&self) -> &Coverage {
        match self {
            SingleSubst::Delta { coverage, .. } => coverage,
            SingleSubst::Map { coverage, .. } => coverage,
        }
    }
}

#[derive(Clone, Debug)]
pub struct MultipleSubst {
    pub coverage: Coverage,
    pub sequences: Vec<Vec<GlyphId>>,
}

#[derive(Clone, Debug)]
pub struct AlternateSubst {
    pub coverage: Coverage,
    pub alternates: Vec<Vec<GlyphId>>,
}

#[derive(Clone, Debug)]
pub struct Ligature {
    pub glyph: GlyphId,
    /// Components after the first.
    pub components: Vec<GlyphId>,
}

#[derive(Clone, Debug)]
pub struct LigatureSubst {
    pub coverage: Coverage,
    /// One set per covered first component.
    pub ligature_sets: Vec<Vec<Ligature>>,
}

#[derive(Clone, Debug)]
pub struct ReverseChainSingleSubst {
    pub coverage: Coverage,
    pub backtrack: Vec<Coverage>,
    pub lookahead: Vec<Coverage>,
    pub substitutes: Vec<GlyphId>,
}

/// A GSUB subtable.
#[derive(Clone, Debug)]
pub enum SubstSubtable {
    Single(SingleSubst),
    Multiple(MultipleSubst),
    Alternate(AlternateSubst),
    Ligature(LigatureSubst),
    Context(ContextLookup),
    ChainContext(ChainContextLookup),
    ReverseChainSingle(ReverseChainSingleSubst),
}

impl SubstSubtable {
    /// Primary (first-glyph) coverage, used by accelerators.
    pub fn coverage(&self) -> Option<&Coverage> {
        match self {
            SubstSubtable::Single(s) => Some(s.coverage()),
            SubstSubtable::Multiple(s) => Some(&s.coverage),
            SubstSubtable::Alternate(s) => Some(&s.coverage),
            SubstSubtable::Ligature(s) => Some(&s.coverage),
            SubstSubtable::Context(s) => s.coverage(),
            SubstSubtable::ChainContext(s) => s.coverage(),
            SubstSubtable::ReverseChainSingle(s) => Some(&s.coverage),
        }
    }
}

/// Single positioning.
#[derive(Clone, Debug)]
pub enum SinglePos {
    /// One record for every covered glyph.
    Format1 {
        coverage: Coverage,
        value: ValueRecord,
    },
    /// Coverage-index-parallel records.
    Format2 {
        coverage: Coverage,
        values: Vec<ValueRecord>,
    },
}

impl SinglePos {
    pub fn coverage(&self) -> &Coverage {
        match self {
            SinglePos::Format1 { coverage, .. } => coverage,
            SinglePos::Format2 { coverage, .. } => coverage,
        }
    }
}

#[derive(Clone, Debug)]
pub struct PairValueRecord {
    pub second_glyph: GlyphId,
    pub value1: ValueRecord,
    pub value2: ValueRecord,
}

/// Pair positioning.
#[derive(Clone, Debug)]
pub enum PairPos {
    /// Per-glyph pair sets, sorted by second glyph.
    Format1 {
        coverage: Coverage,
        sets: Vec<Vec<PairValueRecord>>,
    },
    /// Class matrix, `class1_count × class2_count`, row-major.
    Format2 {
        coverage: Coverage,
        classes1: ClassDef,
        classes2: ClassDef,
        class2_count: u16,
        matrix: Vec<(ValueRecord, ValueRecord)>,
    },
}

impl PairPos {
    pub fn coverage(&self) -> &Coverage {
        match self {
            PairPos::Format1 { coverage, .. } => coverage,
            PairPos::Format2 { coverage, .. } => coverage,
        }
    }
}

#[derive(Clone, Copy, Default, Debug)]
pub struct EntryExit {
    pub entry: Option<Anchor>,
    pub exit: Option<Anchor>,
}

#[derive(Clone, Debug)]
pub struct CursivePos {
    pub coverage: Coverage,
    /// Coverage-index-parallel entry/exit anchors.
    pub entry_exits: Vec<EntryExit>,
}

#[derive(Clone, Copy, Debug)]
pub struct MarkRecord {
    pub class: u16,
    pub anchor: Anchor,
}

#[derive(Clone, Debug)]
pub struct MarkBasePos {
    pub mark_coverage: Coverage,
    pub base_coverage: Coverage,
    pub marks: Vec<MarkRecord>,
    pub mark_class_count: u16,
    /// `base_anchors[base_index][mark_class]`.
    pub base_anchors: Vec<Vec<Option<Anchor>>>,
}

#[derive(Clone, Debug)]
pub struct MarkLigaturePos {
    pub mark_coverage: Coverage,
    pub ligature_coverage: Coverage,
    pub marks: Vec<MarkRecord>,
    pub mark_class_count: u16,
    /// `ligature_anchors[lig_index][component][mark_class]`.
    pub ligature_anchors: Vec<Vec<Vec<Option<Anchor>>>>,
}

#[derive(Clone, Debug)]
pub struct MarkMarkPos {
    pub mark1_coverage: Coverage,
    pub mark2_coverage: Coverage,
    pub marks: Vec<MarkRecord>,
    pub mark_class_count: u16,
    /// `mark2_anchors[mark2_index][mark_class]`.
    pub mark2_anchors: Vec<Vec<Option<Anchor>>>,
}

/// A GPOS subtable.
#[derive(Clone, Debug)]
pub enum PosSubtable {
    Single(SinglePos),
    Pair(PairPos),
    Cursive(CursivePos),
    MarkToBase(MarkBasePos),
    MarkToLigature(MarkLigaturePos),
    MarkToMark(MarkMarkPos),
    Context(ContextLookup),
    ChainContext(ChainContextLookup),
}

impl PosSubtable {
    /// Primary coverage, used by accelerators. For mark attachments this is
    /// the mark coverage (the cursor sits on the mark).
    pub fn coverage(&self) -> Option<&Coverage> {
        match self {
            PosSubtable::Single(s) => Some(s.coverage()),
            PosSubtable::Pair(s) => Some(s.coverage()),
            PosSubtable::Cursive(s) => Some(&s.coverage),
            PosSubtable::MarkToBase(s) => Some(&s.mark_coverage),
            PosSubtable::MarkToLigature(s) => Some(&s.mark_coverage),
            PosSubtable::MarkToMark(s) => Some(&s.mark1_coverage),
            PosSubtable::Context(s) => s.coverage(),
            PosSubtable::ChainContext(s) => s.coverage(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coverage_lookup() {
        let cov = Coverage::Glyphs(vec![GlyphId(3), GlyphId(7), GlyphId(9)]);
        assert_eq!(cov.get(GlyphId(3)), Some(0));
        assert_eq!(cov.get(GlyphId(9)), Some(2));
        assert_eq!(cov.get(GlyphId(4)), None);

        let cov = Coverage::Ranges(vec![
            CoverageRange { start: GlyphId(10), end: GlyphId(12), start_coverage_index: 0 },
            CoverageRange { start: GlyphId(20), end: GlyphId(20), start_coverage_index: 3 },
        ]);
        assert_eq!(cov.get(GlyphId(11)), Some(1));
        assert_eq!(cov.get(GlyphId(20)), Some(3));
        assert_eq!(cov.get(GlyphId(13)), None);
        assert_eq!(cov.len(), 4);
    }

    #[test]
    fn class_def_lookup() {
        let classes = ClassDef::Format2 {
            ranges: vec![
                ClassRange { start: GlyphId(5), end: GlyphId(8), class: 2 },
                ClassRange { start: GlyphId(9), end: GlyphId(9), class: 1 },
            ],
        };
        assert_eq!(classes.get(GlyphId(6)), 2);
        assert_eq!(classes.get(GlyphId(9)), 1);
        assert_eq!(classes.get(GlyphId(100)), 0);
    }

    #[test]
    fn feature_variations() {
        let mut table = SubstTable::default();
        table.features.push(FeatureRecord {
            tag: Tag::from_bytes(b"liga"),
            lookup_indices: vec![0],
        });
        table.variations.push(FeatureVariationRecord {
            conditions: vec![Condition {
                axis_index: 0,
                filter_range_min: 8192, // 0.5 in F2Dot14
                filter_range_max: 16384,
            }],
            substitutions: vec![FeatureSubstitution {
                feature_index: 0,
                lookup_indices: vec![1],
            }],
        });

        assert_eq!(table.find_variation_index(&[]), None);
        assert_eq!(table.find_variation_index(&[0]), None);
        assert_eq!(table.find_variation_index(&[10000]), Some(0));
        assert_eq!(table.feature_lookups(0, None), Some(&[0u16][..]));
        assert_eq!(table.feature_lookups(0, Some(0)), Some(&[1u16][..]));
    }
}
