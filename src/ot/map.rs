//! The feature map: compiles requested features into the concrete lookup
//! schedule, with bit-packed per-glyph masks for O(1) gating.

use log::debug;

use crate::buffer::Buffer;
use crate::common::{Language, Mask, Script, Tag};
use crate::error::ShapeError;
use crate::face::Face;
use crate::ot::layout::{self, SelectedLangSys};
use crate::ot::TableIndex;
use crate::plan::ShapePlan;
use crate::tables::gsubgpos::{PosTable, ScriptRecord, SubstTable};

/// Widest value a multi-valued feature may carry; also the sentinel that
/// routes `rand` alternate selection to the PRNG.
pub const MAX_BITS: u32 = 8;
pub const MAX_VALUE: u32 = (1 << MAX_BITS) - 1;

/// Bit 31 is shared by all global boolean features.
pub const GLOBAL_BIT_SHIFT: u32 = 31;
pub const GLOBAL_BIT_MASK: Mask = 1 << GLOBAL_BIT_SHIFT;

/// First bit available to the allocator; the bits below are reserved for
/// safety flags.
const FIRST_FREE_BIT: u32 = 4;

bitflags::bitflags! {
    pub struct FeatureFlags: u32 {
        const NONE = 0x00;
        /// Feature applies to all characters; does not need a bit-field of
        /// its own.
        const GLOBAL = 0x01;
        /// Has a fallback implementation, keep it in the map even if the
        /// font has no matching feature.
        const HAS_FALLBACK = 0x02;
        /// Don't skip over ZWNJ when matching.
        const MANUAL_ZWNJ = 0x04;
        /// Don't skip over ZWJ when matching.
        const MANUAL_ZWJ = 0x08;
        const MANUAL_JOINERS = Self::MANUAL_ZWNJ.bits | Self::MANUAL_ZWJ.bits;
        const GLOBAL_MANUAL_JOINERS = Self::GLOBAL.bits | Self::MANUAL_JOINERS.bits;
        /// Alternate selection is randomized.
        const RANDOM = 0x10;
        /// Matching is restricted to items with the same syllable tag.
        const PER_SYLLABLE = 0x20;
        const GLOBAL_HAS_FALLBACK = Self::GLOBAL.bits | Self::HAS_FALLBACK.bits;
    }
}

#[derive(Clone, Copy, Debug)]
struct FeatureInfo {
    tag: Tag,
    /// Insertion order; ties in the sort are broken by it, and the bit
    /// allocator drops later features first on overflow.
    seq: usize,
    max_value: u32,
    flags: FeatureFlags,
    default_value: u32,
    stage: [usize; 2],
}

/// A compiled feature: where its value lives in the mask.
#[derive(Clone, Copy, Debug)]
pub struct FeatureMap {
    pub tag: Tag,
    pub index: [Option<u16>; 2],
    pub stage: [usize; 2],
    pub shift: u32,
    pub mask: Mask,
    /// Mask with a single bit set, for boolean queries.
    pub one_mask: Mask,
    pub auto_zwnj: bool,
    pub auto_zwj: bool,
    pub random: bool,
    pub per_syllable: bool,
}

/// One scheduled lookup.
#[derive(Clone, Copy, Debug)]
pub struct LookupMap {
    pub index: u16,
    pub auto_zwnj: bool,
    pub auto_zwj: bool,
    pub random: bool,
    pub per_syllable: bool,
    pub mask: Mask,
}

pub type PauseFunc = fn(&ShapePlan, &dyn Face, &mut Buffer);

/// A stage boundary: lookups up to `last_lookup` run, then the pause hook.
#[derive(Clone, Copy)]
pub struct StageMap {
    pub last_lookup: usize,
    pub pause_func: Option<PauseFunc>,
}

struct StageInfo {
    index: usize,
    pause_func: Option<PauseFunc>,
}

/// The compiled, immutable feature map.
pub struct Map {
    pub found_script: [bool; 2],
    pub chosen_script: [Option<Tag>; 2],
    global_mask: Mask,
    features: Vec<FeatureMap>,
    lookups: [Vec<LookupMap>; 2],
    stages: [Vec<StageMap>; 2],
}

impl Map {
    #[inline]
    pub fn global_mask(&self) -> Mask {
        self.global_mask
    }

    pub fn feature(&self, tag: Tag) -> Option<&FeatureMap> {
        self.features
            .binary_search_by(|f| f.tag.cmp(&tag))
            .ok()
            .map(|i| &self.features[i])
    }

    /// Mask of a boolean feature; zero when absent.
    pub fn one_mask(&self, tag: Tag) -> Mask {
        self.feature(tag).map(|f| f.one_mask).unwrap_or(0)
    }

    /// `(mask, shift)` of a feature's bit-field.
    pub fn mask(&self, tag: Tag) -> (Mask, u32) {
        self.feature(tag)
            .map(|f| (f.mask, f.shift))
            .unwrap_or((0, 0))
    }

    pub fn feature_index(&self, table: TableIndex, tag: Tag) -> Option<u16> {
        self.feature(tag).and_then(|f| f.index[table.idx()])
    }

    pub fn feature_stage(&self, table: TableIndex, tag: Tag) -> Option<usize> {
        self.feature(tag).map(|f| f.stage[table.idx()])
    }

    pub fn stages(&self, table: TableIndex) -> &[StageMap] {
        &self.stages[table.idx()]
    }

    /// The lookups of one stage.
    pub fn stage_lookups(&self, table: TableIndex, stage: usize) -> &[LookupMap] {
        let stages = &self.stages[table.idx()];
        let start = if stage == 0 {
            0
        } else {
            stages[stage - 1].last_lookup
        };
        let end = stages[stage].last_lookup;
        &self.lookups[table.idx()][start..end]
    }

    pub fn lookups(&self, table: TableIndex) -> &[LookupMap] {
        &self.lookups[table.idx()]
    }
}

/// Accumulates feature requests and pauses, then compiles them.
pub struct MapBuilder<'a> {
    face: &'a dyn Face,
    pub script: Option<Script>,
    pub chosen_script: [Option<Tag>; 2],
    pub found_script: [bool; 2],
    script_index: [Option<u16>; 2],
    lang_sys: [SelectedLangSys; 2],
    variation_index: [Option<u16>; 2],
    current_stage: [usize; 2],
    feature_infos: Vec<FeatureInfo>,
    stages: [Vec<StageInfo>; 2],
}

impl<'a> MapBuilder<'a> {
    pub fn new(
        face: &'a dyn Face,
        script: Option<Script>,
        language: Option<&Language>,
    ) -> Self {
        let script_tags = layout::script_tag_candidates(script, language);
        let lang_tags = layout::language_tag_candidates(language);

        let mut builder = MapBuilder {
            face,
            script,
            chosen_script: [None; 2],
            found_script: [false; 2],
            script_index: [None; 2],
            lang_sys: [SelectedLangSys::None, SelectedLangSys::None],
            variation_index: [None; 2],
            current_stage: [0, 0],
            feature_infos: Vec::new(),
            stages: [Vec::new(), Vec::new()],
        };

        let coords = face.variation_coordinates();
        for table in TableIndex::all() {
            let t = table.idx();

            // Fetch each table once; its script list feeds both script and
            // language selection.
            let fetched: Option<(&[ScriptRecord], Option<u16>)> = match table {
                TableIndex::Gsub => face
                    .gsub()
                    .map(|gsub| (gsub.scripts.as_slice(), gsub.find_variation_index(coords))),
                TableIndex::Gpos => face
                    .gpos()
                    .map(|gpos| (gpos.scripts.as_slice(), gpos.find_variation_index(coords))),
            };

            if let Some((scripts, variation_index)) = fetched {
                let selected = layout::select_script(scripts, &script_tags);
                builder.found_script[t] = selected.found;
                builder.chosen_script[t] = selected.tag;
                builder.script_index[t] = selected.index;
                builder.variation_index[t] = variation_index;
                builder.lang_sys[t] =
                    layout::select_language(scripts, selected.index, &lang_tags);
            }
        }

        builder
    }

    pub fn add_feature(&mut self, tag: Tag, flags: FeatureFlags, value: u32) {
        if tag == Tag::null() {
            return;
        }
        let seq = self.feature_infos.len();
        self.feature_infos.push(FeatureInfo {
            tag,
            seq,
            max_value: value,
            flags,
            default_value: if flags.contains(FeatureFlags::GLOBAL) {
                value
            } else {
                0
            },
            stage: self.current_stage,
        });
    }

    pub fn enable_feature(&mut self, tag: Tag, flags: FeatureFlags, value: u32) {
        self.add_feature(tag, flags | FeatureFlags::GLOBAL, value);
    }

    pub fn disable_feature(&mut self, tag: Tag) {
        self.add_feature(tag, FeatureFlags::GLOBAL, 0);
    }

    pub fn add_gsub_pause(&mut self, pause: Option<PauseFunc>) {
        self.add_pause(TableIndex::Gsub, pause);
    }

    pub fn add_gpos_pause(&mut self, pause: Option<PauseFunc>) {
        self.add_pause(TableIndex::Gpos, pause);
    }

    fn add_pause(&mut self, table: TableIndex, pause: Option<PauseFunc>) {
        let t = table.idx();
        self.stages[t].push(StageInfo {
            index: self.current_stage[t],
            pause_func: pause,
        });
        self.current_stage[t] += 1;
    }

    fn dedup_features(&mut self) {
        if self.feature_infos.is_empty() {
            return;
        }

        self.feature_infos
            .sort_by(|a, b| a.tag.cmp(&b.tag).then(a.seq.cmp(&b.seq)));

        let mut j = 0;
        for i in 1..self.feature_infos.len() {
            if self.feature_infos[i].tag != self.feature_infos[j].tag {
                j += 1;
                self.feature_infos[j] = self.feature_infos[i];
                continue;
            }

            let later = self.feature_infos[i];
            let merged = &mut self.feature_infos[j];
            if later.flags.contains(FeatureFlags::GLOBAL) {
                merged.flags |= FeatureFlags::GLOBAL;
                merged.max_value = later.max_value;
                merged.default_value = later.default_value;
            } else {
                merged.flags.remove(FeatureFlags::GLOBAL);
                merged.max_value = merged.max_value.max(later.max_value);
                // default_value inherited from the earlier request.
            }
            let flags = later.flags
                & (FeatureFlags::HAS_FALLBACK
                    | FeatureFlags::MANUAL_JOINERS
                    | FeatureFlags::RANDOM
                    | FeatureFlags::PER_SYLLABLE);
            merged.flags |= flags;
            merged.stage[0] = merged.stage[0].min(later.stage[0]);
            merged.stage[1] = merged.stage[1].min(later.stage[1]);
        }
        self.feature_infos.truncate(j + 1);
    }

    fn find_feature(&self, table: TableIndex, tag: Tag) -> Option<u16> {
        let lang_sys = match &self.lang_sys[table.idx()] {
            SelectedLangSys::None => return None,
            selected => selected,
        };
        match table {
            TableIndex::Gsub => {
                let t = self.face.gsub()?;
                layout::find_feature(&t.scripts, &t.features, self.script_index[table.idx()], lang_sys, tag)
            }
            TableIndex::Gpos => {
                let t = self.face.gpos()?;
                layout::find_feature(&t.scripts, &t.features, self.script_index[table.idx()], lang_sys, tag)
            }
        }
    }

    /// Compiles the request list into a [`Map`], allocating mask bits and
    /// resolving lookups.
    pub fn compile(mut self) -> Result<Map, ShapeError> {
        self.dedup_features();

        let mut map = Map {
            found_script: self.found_script,
            chosen_script: self.chosen_script,
            global_mask: GLOBAL_BIT_MASK,
            features: Vec::with_capacity(self.feature_infos.len()),
            lookups: [Vec::new(), Vec::new()],
            stages: [Vec::new(), Vec::new()],
        };

        // Allocate mask bits greedily in request order, so that when the
        // budget runs out the later-requested features (user features) are
        // the ones dropped.
        self.feature_infos.sort_by_key(|info| info.seq);

        let mut next_bit = FIRST_FREE_BIT;
        for info in &self.feature_infos {
            let bits_needed =
                if info.flags.contains(FeatureFlags::GLOBAL) && info.max_value == 1 {
                    // Global boolean; shares the global bit.
                    0
                } else {
                    32 - info.max_value.min(MAX_VALUE).leading_zeros()
                };

            if info.max_value == 0 || next_bit + bits_needed >= GLOBAL_BIT_SHIFT {
                // Feature disabled, or out of bits.
                continue;
            }

            let mut found = false;
            let mut index = [None; 2];
            for table in TableIndex::all() {
                index[table.idx()] = self.find_feature(table, info.tag);
                found |= index[table.idx()].is_some();
            }

            if !found && !info.flags.contains(FeatureFlags::HAS_FALLBACK) {
                continue;
            }

            let (shift, mask) =
                if info.flags.contains(FeatureFlags::GLOBAL) && info.max_value == 1 {
                    (GLOBAL_BIT_SHIFT, GLOBAL_BIT_MASK)
                } else {
                    let shift = next_bit;
                    let mask = (1u32 << (next_bit + bits_needed)) - (1u32 << next_bit);
                    next_bit += bits_needed;
                    map.global_mask |= (info.default_value << shift) & mask;
                    (shift, mask)
                };

            map.features.push(FeatureMap {
                tag: info.tag,
                index,
                stage: info.stage,
                shift,
                mask,
                one_mask: (1u32 << shift) & mask,
                auto_zwnj: !info.flags.contains(FeatureFlags::MANUAL_ZWNJ),
                auto_zwj: !info.flags.contains(FeatureFlags::MANUAL_ZWJ),
                random: info.flags.contains(FeatureFlags::RANDOM),
                per_syllable: info.flags.contains(FeatureFlags::PER_SYLLABLE),
            });
        }

        // Feature queries binary-search by tag.
        map.features.sort_by_key(|f| f.tag);

        debug!(
            "compiled {} features, global mask {:#010x}",
            map.features.len(),
            map.global_mask
        );

        // Close the final stage.
        self.add_pause(TableIndex::Gsub, None);
        self.add_pause(TableIndex::Gpos, None);

        for table in TableIndex::all() {
            let t = table.idx();

            // The language system's required feature applies globally.
            let required = match &self.lang_sys[t] {
                SelectedLangSys::None => None,
                selected => self
                    .script_index[t]
                    .and_then(|_| layout::required_feature(self.scripts(table), self.script_index[t], selected)),
            };

            let mut stage_cursor = 0;
            for stage in &self.stages[t] {
                // Collect lookups of every feature scheduled in stages up
                // to this boundary.
                while stage_cursor <= stage.index {
                    if let Some(required_index) = required {
                        if stage_cursor == 0 {
                            self.collect_lookups(
                                table,
                                required_index,
                                GLOBAL_BIT_MASK,
                                true,
                                true,
                                false,
                                false,
                                &mut map.lookups[t],
                            )?;
                        }
                    }

                    for feature in &map.features {
                        if feature.stage[t] == stage_cursor {
                            if let Some(feature_index) = feature.index[t] {
                                self.collect_lookups(
                                    table,
                                    feature_index,
                                    feature.mask,
                                    feature.auto_zwnj,
                                    feature.auto_zwj,
                                    feature.random,
                                    feature.per_syllable,
                                    &mut map.lookups[t],
                                )?;
                            }
                        }
                    }
                    stage_cursor += 1;
                }

                let start = map.stages[t].last().map(|s: &StageMap| s.last_lookup).unwrap_or(0);
                let lookups = &mut map.lookups[t];
                lookups[start..].sort_by_key(|l| l.index);

                // Merge duplicate lookups, OR-ing their masks.
                let mut j = start;
                for i in start + 1..lookups.len() {
                    if lookups[i].index != lookups[j].index {
                        j += 1;
                        lookups[j] = lookups[i];
                    } else {
                        let dup = lookups[i];
                        let kept = &mut lookups[j];
                        kept.mask |= dup.mask;
                        kept.auto_zwnj &= dup.auto_zwnj;
                        kept.auto_zwj &= dup.auto_zwj;
                        kept.random |= dup.random;
                        kept.per_syllable |= dup.per_syllable;
                    }
                }
                if lookups.len() > start {
                    lookups.truncate(j + 1);
                }

                map.stages[t].push(StageMap {
                    last_lookup: map.lookups[t].len(),
                    pause_func: stage.pause_func,
                });
            }
        }

        Ok(map)
    }

    fn scripts(&self, table: TableIndex) -> &[ScriptRecord] {
        match table {
            TableIndex::Gsub => self.face.gsub().map(|t| t.scripts.as_slice()).unwrap_or(&[]),
            TableIndex::Gpos => self.face.gpos().map(|t| t.scripts.as_slice()).unwrap_or(&[]),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn collect_lookups(
        &self,
        table: TableIndex,
        feature_index: u16,
        mask: Mask,
        auto_zwnj: bool,
        auto_zwj: bool,
        random: bool,
        per_syllable: bool,
        out: &mut Vec<LookupMap>,
    ) -> Result<(), ShapeError> {
        let (lookup_indices, lookup_count) = match table {
            TableIndex::Gsub => {
                let t: &SubstTable = match self.face.gsub() {
                    Some(t) => t,
                    None => return Ok(()),
                };
                (
                    t.feature_lookups(feature_index, self.variation_index[table.idx()]),
                    t.lookups.len(),
                )
            }
            TableIndex::Gpos => {
                let t: &PosTable = match self.face.gpos() {
                    Some(t) => t,
                    None => return Ok(()),
                };
                (
                    t.feature_lookups(feature_index, self.variation_index[table.idx()]),
                    t.lookups.len(),
                )
            }
        };

        if let Some(indices) = lookup_indices {
            for &index in indices {
                if usize::from(index) >= lookup_count {
                    return Err(ShapeError::MalformedFontTable(
                        "feature references a lookup past the end of the lookup list",
                    ));
                }
                out.push(LookupMap {
                    index,
                    auto_zwnj,
                    auto_zwj,
                    random,
                    per_syllable,
                    mask,
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tables::gsubgpos::*;

    struct MapFace {
        gsub: SubstTable,
    }

    impl Face for MapFace {
        fn nominal_glyph(&self, _: u32) -> Option<ttf_parser::GlyphId> {
            None
        }
        fn glyph_h_advance(&self, _: ttf_parser::GlyphId) -> i32 {
            0
        }
        fn gsub(&self) -> Option<&SubstTable> {
            Some(&self.gsub)
        }
    }

    fn face_with_features(tags: &[&[u8; 4]]) -> MapFace {
        let features: Vec<FeatureRecord> = tags
            .iter()
            .enumerate()
            .map(|(i, tag)| FeatureRecord {
                tag: Tag::from_bytes(tag),
                lookup_indices: vec![i as u16],
            })
            .collect();
        let lookups = (0..tags.len())
            .map(|_| SubstLookup {
                flags: LookupFlags::empty(),
                mark_filtering_set: None,
                subtables: Vec::new(),
            })
            .collect();
        MapFace {
            gsub: SubstTable {
                scripts: vec![ScriptRecord {
                    tag: Tag::from_bytes(b"DFLT"),
                    default_lang_sys: Some(LangSys {
                        required_feature: None,
                        feature_indices: (0..tags.len() as u16).collect(),
                    }),
                    lang_sys_records: Vec::new(),
                }],
                features,
                lookups,
                variations: Vec::new(),
            },
        }
    }

    #[test]
    fn global_boolean_features_share_the_global_bit() {
        let face = face_with_features(&[b"ccmp", b"liga"]);
        let mut builder = MapBuilder::new(&face, None, None);
        builder.enable_feature(Tag::from_bytes(b"ccmp"), FeatureFlags::NONE, 1);
        builder.enable_feature(Tag::from_bytes(b"liga"), FeatureFlags::NONE, 1);
        let map = builder.compile().unwrap();

        assert_eq!(map.one_mask(Tag::from_bytes(b"ccmp")), GLOBAL_BIT_MASK);
        assert_eq!(map.one_mask(Tag::from_bytes(b"liga")), GLOBAL_BIT_MASK);
        assert_eq!(map.global_mask() & GLOBAL_BIT_MASK, GLOBAL_BIT_MASK);
    }

    #[test]
    fn non_global_features_get_disjoint_bit_fields() {
        let face = face_with_features(&[b"aalt", b"salt"]);
        let mut builder = MapBuilder::new(&face, None, None);
        builder.add_feature(Tag::from_bytes(b"aalt"), FeatureFlags::NONE, 3);
        builder.add_feature(Tag::from_bytes(b"salt"), FeatureFlags::NONE, 1);
        let map = builder.compile().unwrap();

        let (aalt_mask, aalt_shift) = map.mask(Tag::from_bytes(b"aalt"));
        let (salt_mask, salt_shift) = map.mask(Tag::from_bytes(b"salt"));
        assert_eq!(aalt_mask >> aalt_shift, 0b11);
        assert_eq!(salt_mask >> salt_shift, 0b1);
        assert_eq!(aalt_mask & salt_mask, 0);
        assert_eq!(aalt_mask & crate::buffer::GLYPH_FLAGS_RESERVED, 0);
        assert_eq!(salt_mask & GLOBAL_BIT_MASK, 0);
    }

    #[test]
    fn lookups_are_deduped_with_mask_union() {
        // Two features sharing one lookup.
        let mut face = face_with_features(&[b"kern", b"dist"]);
        face.gsub.features[1].lookup_indices = vec![0];
        let mut builder = MapBuilder::new(&face, None, None);
        builder.add_feature(Tag::from_bytes(b"kern"), FeatureFlags::NONE, 2);
        builder.add_feature(Tag::from_bytes(b"dist"), FeatureFlags::NONE, 2);
        let map = builder.compile().unwrap();

        let lookups = map.lookups(TableIndex::Gsub);
        assert_eq!(lookups.len(), 1);
        let (kern_mask, _) = map.mask(Tag::from_bytes(b"kern"));
        let (dist_mask, _) = map.mask(Tag::from_bytes(b"dist"));
        assert_eq!(lookups[0].mask, kern_mask | dist_mask);
    }

    #[test]
    fn out_of_range_lookup_index_is_malformed() {
        let mut face = face_with_features(&[b"liga"]);
        face.gsub.features[0].lookup_indices = vec![7];
        let mut builder = MapBuilder::new(&face, None, None);
        builder.enable_feature(Tag::from_bytes(b"liga"), FeatureFlags::NONE, 1);
        assert!(matches!(
            builder.compile(),
            Err(ShapeError::MalformedFontTable(_))
        ));
    }
}
