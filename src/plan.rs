//! The shape plan: a compiled, immutable schedule built once per
//! (face, segment props, feature request) tuple and reused across buffers.

use std::any::Any;
use std::sync::Arc;

use log::debug;

use crate::common::{Direction, Feature, Language, Mask, Script, Tag};
use crate::complex::{ComplexShaper, SelectionContext, ShaperRegistry, ZeroWidthMarksMode};
use crate::error::ShapeError;
use crate::face::Face;
use crate::ot::apply::LookupAccel;
use crate::ot::map::{FeatureFlags, Map, MapBuilder, MAX_VALUE};
use crate::ot::{feature, TableIndex};

/// Mutable plan-construction state handed to shaper hooks.
pub struct ShapePlanner<'a> {
    pub face: &'a dyn Face,
    pub direction: Direction,
    pub script: Option<Script>,
    pub ot_map: MapBuilder<'a>,
    pub shaper: &'static ComplexShaper,
}

impl<'a> ShapePlanner<'a> {
    pub fn script(&self) -> Option<Script> {
        self.script
    }
}

/// The compiled plan.
pub struct ShapePlan {
    pub direction: Direction,
    pub script: Option<Script>,
    pub shaper: &'static ComplexShaper,
    pub ot_map: Map,
    /// Shaper-private per-plan scratch.
    pub data: Option<Box<dyn Any + Send + Sync>>,

    pub frac_mask: Mask,
    pub numr_mask: Mask,
    pub dnom_mask: Mask,
    pub rtlm_mask: Mask,
    pub kern_mask: Mask,

    pub has_frac: bool,
    pub has_vert: bool,
    pub has_gpos_mark: bool,
    pub requested_kerning: bool,

    pub apply_gpos: bool,
    pub zero_marks: ZeroWidthMarksMode,
    pub fallback_mark_positioning: bool,
    pub adjust_mark_positioning_when_zeroing: bool,
    pub fallback_glyph_classes: bool,

    accels: [Vec<Option<LookupAccel>>; 2],
}

impl ShapePlan {
    pub(crate) fn build(
        face: &dyn Face,
        registry: &ShaperRegistry,
        direction: Direction,
        script: Option<Script>,
        language: Option<&Language>,
        user_features: &[Feature],
    ) -> Result<ShapePlan, ShapeError> {
        let shaper = registry.select(&SelectionContext { script, direction });

        let mut planner = ShapePlanner {
            face,
            direction,
            script,
            ot_map: MapBuilder::new(face, script, language),
            shaper,
        };

        collect_features(&mut planner, user_features);
        let ot_map = planner.ot_map.compile()?;

        let (frac_mask, _) = ot_map.mask(feature::FRACTIONS);
        let (numr_mask, _) = ot_map.mask(feature::NUMERATORS);
        let (dnom_mask, _) = ot_map.mask(feature::DENOMINATORS);
        let rtlm_mask = ot_map.one_mask(feature::RIGHT_TO_LEFT_MIRRORED_FORMS);
        let kern_mask = ot_map.one_mask(feature::KERNING);

        let apply_gpos = face
            .gpos()
            .map(|gpos| !gpos.lookups.is_empty())
            .unwrap_or(false);

        let mut plan = ShapePlan {
            direction,
            script,
            shaper,
            has_frac: frac_mask != 0 || numr_mask != 0 || dnom_mask != 0,
            has_vert: ot_map.one_mask(feature::VERTICAL_WRITING) != 0,
            has_gpos_mark: ot_map.one_mask(feature::MARK_POSITIONING) != 0,
            requested_kerning: kern_mask != 0,
            frac_mask,
            numr_mask,
            dnom_mask,
            rtlm_mask,
            kern_mask,
            apply_gpos,
            zero_marks: shaper.zero_width_marks,
            fallback_mark_positioning: !apply_gpos && shaper.fallback_position,
            adjust_mark_positioning_when_zeroing: !apply_gpos,
            fallback_glyph_classes: !face.has_glyph_classes(),
            ot_map,
            data: None,
            accels: [Vec::new(), Vec::new()],
        };

        plan.build_accels(face);

        if let Some(create_data) = shaper.create_data {
            let data = create_data(&plan, face);
            plan.data = Some(data);
        }

        debug!(
            "built plan: shaper '{}', {} GSUB lookups, {} GPOS lookups, gpos={}",
            shaper.name,
            plan.ot_map.lookups(TableIndex::Gsub).len(),
            plan.ot_map.lookups(TableIndex::Gpos).len(),
            plan.apply_gpos,
        );

        Ok(plan)
    }

    fn build_accels(&mut self, face: &dyn Face) {
        if let Some(gsub) = face.gsub() {
            let mut accels = vec![None; gsub.lookups.len()];
            for lookup_map in self.ot_map.lookups(TableIndex::Gsub) {
                let i = usize::from(lookup_map.index);
                if accels[i].is_none() {
                    accels[i] = Some(LookupAccel::for_subst(&gsub.lookups[i]));
                }
            }
            self.accels[TableIndex::Gsub.idx()] = accels;
        }
        if let Some(gpos) = face.gpos() {
            let mut accels = vec![None; gpos.lookups.len()];
            for lookup_map in self.ot_map.lookups(TableIndex::Gpos) {
                let i = usize::from(lookup_map.index);
                if accels[i].is_none() {
                    accels[i] = Some(LookupAccel::for_pos(&gpos.lookups[i]));
                }
            }
            self.accels[TableIndex::Gpos.idx()] = accels;
        }
    }

    pub(crate) fn accel(&self, table: TableIndex, lookup_index: u16) -> Option<&LookupAccel> {
        self.accels[table.idx()]
            .get(usize::from(lookup_index))?
            .as_ref()
    }

    /// Shaper-private data, downcast.
    pub(crate) fn shaper_data<T: 'static>(&self) -> Option<&T> {
        self.data.as_ref()?.downcast_ref()
    }
}

/// The default feature schedule, in collection order; the shaper hook and
/// user features slot in at fixed points.
fn collect_features(planner: &mut ShapePlanner, user_features: &[Feature]) {
    let map = &mut planner.ot_map;

    map.enable_feature(feature::REQUIRED_VARIATION_ALTERNATES, FeatureFlags::NONE, 1);
    map.add_gsub_pause(None);

    match planner.direction {
        Direction::LeftToRight => {
            map.enable_feature(feature::LEFT_TO_RIGHT_ALTERNATES, FeatureFlags::NONE, 1);
            map.enable_feature(feature::LEFT_TO_RIGHT_MIRRORED_FORMS, FeatureFlags::NONE, 1);
        }
        Direction::RightToLeft => {
            map.enable_feature(feature::RIGHT_TO_LEFT_ALTERNATES, FeatureFlags::NONE, 1);
            map.add_feature(feature::RIGHT_TO_LEFT_MIRRORED_FORMS, FeatureFlags::NONE, 1);
        }
        _ => {}
    }

    // Automatic fractions; activated per span by the coordinator.
    map.add_feature(feature::FRACTIONS, FeatureFlags::NONE, 1);
    map.add_feature(feature::NUMERATORS, FeatureFlags::NONE, 1);
    map.add_feature(feature::DENOMINATORS, FeatureFlags::NONE, 1);

    // Random alternates: MAX_VALUE routes selection to the PRNG.
    map.enable_feature(feature::RANDOMIZE, FeatureFlags::RANDOM, MAX_VALUE);

    // Engine markers fonts can key off.
    map.enable_feature(Tag::from_bytes(b"Harf"), FeatureFlags::NONE, 1);

    if let Some(collect) = planner.shaper.collect_features {
        collect(planner);
    }

    let map = &mut planner.ot_map;
    map.enable_feature(Tag::from_bytes(b"Buzz"), FeatureFlags::NONE, 1);

    map.enable_feature(feature::GLYPH_COMPOSITION_DECOMPOSITION, FeatureFlags::NONE, 1);
    map.enable_feature(feature::LOCALIZED_FORMS, FeatureFlags::NONE, 1);
    map.enable_feature(feature::MARK_POSITIONING, FeatureFlags::MANUAL_JOINERS, 1);
    map.enable_feature(feature::MARK_TO_MARK_POSITIONING, FeatureFlags::MANUAL_JOINERS, 1);
    map.enable_feature(feature::REQUIRED_LIGATURES, FeatureFlags::NONE, 1);
    map.enable_feature(feature::ABOVE_BASE_MARK_POSITIONING, FeatureFlags::NONE, 1);
    map.enable_feature(feature::BELOW_BASE_MARK_POSITIONING, FeatureFlags::NONE, 1);

    if planner.direction.is_horizontal() {
        map.enable_feature(feature::CONTEXTUAL_ALTERNATES, FeatureFlags::NONE, 1);
        map.enable_feature(feature::CONTEXTUAL_LIGATURES, FeatureFlags::NONE, 1);
        map.enable_feature(feature::CURSIVE_POSITIONING, FeatureFlags::NONE, 1);
        map.enable_feature(feature::DISTANCES, FeatureFlags::NONE, 1);
        map.enable_feature(feature::KERNING, FeatureFlags::GLOBAL_HAS_FALLBACK, 1);
        map.enable_feature(feature::STANDARD_LIGATURES, FeatureFlags::NONE, 1);
        map.enable_feature(feature::REQUIRED_CONTEXTUAL_ALTERNATES, FeatureFlags::NONE, 1);
    } else {
        map.enable_feature(feature::VERTICAL_WRITING, FeatureFlags::NONE, 1);
    }

    for f in user_features {
        let flags = if f.is_global() {
            FeatureFlags::GLOBAL
        } else {
            FeatureFlags::NONE
        };
        map.add_feature(f.tag, flags, f.value);
    }

    if let Some(override_features) = planner.shaper.override_features {
        override_features(planner);
    }
}

/// Cache key: two requests with equal keys may share a plan. Range bounds
/// of globally-scoped features are erased before comparison.
#[derive(Clone, PartialEq, Debug)]
pub(crate) struct PlanKey {
    face_id: u64,
    direction: Direction,
    script: Option<Script>,
    language: Option<Language>,
    features: Vec<Feature>,
    coords: Vec<i32>,
}

impl PlanKey {
    pub(crate) fn new(
        face: &dyn Face,
        direction: Direction,
        script: Option<Script>,
        language: Option<&Language>,
        user_features: &[Feature],
    ) -> Self {
        let features = user_features
            .iter()
            .map(|f| {
                if f.is_global() {
                    *f
                } else {
                    // Range bounds matter to mask setup, not to the plan;
                    // normalize them so ranged requests still share plans.
                    Feature { start: 1, end: 1, ..*f }
                }
            })
            .collect();

        PlanKey {
            face_id: face.face_id(),
            direction,
            script,
            language: language.cloned(),
            features,
            coords: face.variation_coordinates().to_vec(),
        }
    }
}

/// A per-buffer, LRU-style plan cache. Not shared across buffers; plans
/// themselves are immutable and freely shared.
#[derive(Default)]
pub struct PlanCache {
    entries: Vec<(PlanKey, Arc<ShapePlan>)>,
}

const PLAN_CACHE_SIZE: usize = 8;

impl PlanCache {
    pub(crate) fn get_or_build(
        &mut self,
        face: &dyn Face,
        registry: &ShaperRegistry,
        direction: Direction,
        script: Option<Script>,
        language: Option<&Language>,
        user_features: &[Feature],
    ) -> Result<Arc<ShapePlan>, ShapeError> {
        let key = PlanKey::new(face, direction, script, language, user_features);

        if let Some(i) = self.entries.iter().position(|(k, _)| *k == key) {
            let entry = self.entries.remove(i);
            let plan = entry.1.clone();
            self.entries.insert(0, entry);
            return Ok(plan);
        }

        let plan = Arc::new(ShapePlan::build(
            face,
            registry,
            direction,
            script,
            language,
            user_features,
        )?);
        self.entries.insert(0, (key, plan.clone()));
        self.entries.truncate(PLAN_CACHE_SIZE);
        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Tag;

    struct BareFace;

    impl Face for BareFace {
        fn nominal_glyph(&self, _: u32) -> Option<ttf_parser::GlyphId> {
            None
        }
        fn glyph_h_advance(&self, _: ttf_parser::GlyphId) -> i32 {
            600
        }
        fn face_id(&self) -> u64 {
            7
        }
    }

    #[test]
    fn equal_requests_share_one_plan() {
        let face = BareFace;
        let registry = ShaperRegistry::with_defaults();
        let mut cache = PlanCache::default();

        let features = [Feature::new(Tag::from_bytes(b"kern"), 0, ..)];
        let a = cache
            .get_or_build(&face, &registry, Direction::LeftToRight, None, None, &features)
            .unwrap();
        let b = cache
            .get_or_build(&face, &registry, Direction::LeftToRight, None, None, &features)
            .unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        // A different direction compiles a different plan.
        let c = cache
            .get_or_build(&face, &registry, Direction::RightToLeft, None, None, &features)
            .unwrap();
        assert!(!Arc::ptr_eq(&a, &c));
    }

    #[test]
    fn ranged_features_share_plans_after_normalization() {
        let face = BareFace;
        let registry = ShaperRegistry::with_defaults();
        let mut cache = PlanCache::default();

        // The plan does not depend on where a non-global range falls.
        let a = cache
            .get_or_build(
                &face,
                &registry,
                Direction::LeftToRight,
                None,
                None,
                &[Feature::new(Tag::from_bytes(b"smcp"), 1, 2..5)],
            )
            .unwrap();
        let b = cache
            .get_or_build(
                &face,
                &registry,
                Direction::LeftToRight,
                None,
                None,
                &[Feature::new(Tag::from_bytes(b"smcp"), 1, 7..9)],
            )
            .unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn default_schedule_reserves_low_and_global_bits() {
        let face = BareFace;
        let registry = ShaperRegistry::with_defaults();
        let plan = ShapePlan::build(
            &face,
            &registry,
            Direction::LeftToRight,
            None,
            None,
            &[],
        )
        .unwrap();

        let global = plan.ot_map.global_mask();
        assert!(global & crate::ot::map::GLOBAL_BIT_MASK != 0);
        assert_eq!(global & crate::buffer::GLYPH_FLAGS_RESERVED, 0);
    }
}
