//! Script shapers: a closed set of hook tables, selected per segment
//! through a scored registry.

pub mod arabic;
pub mod arabic_table;
pub mod hebrew;

use std::sync::OnceLock;

use crate::buffer::Buffer;
use crate::common::{script, Direction, Script};
use crate::face::Face;
use crate::normalize::{ShapeNormalizeContext, ShapeNormalizationMode};
use crate::plan::{ShapePlan, ShapePlanner};

/// When to zero mark advances relative to GPOS.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ZeroWidthMarksMode {
    None,
    ByGdefEarly,
    /// The default: zeroing after GPOS preserves combining behavior for
    /// marks that carry meaningful advances but must visually stack.
    ByGdefLate,
}

/// A script shaper: a name plus a table of optional hooks invoked at fixed
/// points of the pipeline. The set of shapers is closed; hooks are plain
/// function pointers.
pub struct ComplexShaper {
    pub name: &'static str,

    /// Schedules script-specific features and pauses.
    pub collect_features: Option<fn(&mut ShapePlanner)>,
    /// Last-word adjustments after default features are collected.
    pub override_features: Option<fn(&mut ShapePlanner)>,
    /// Builds per-plan scratch data (mask snapshots, fallback lookups).
    pub create_data: Option<fn(&ShapePlan, &dyn Face) -> Box<dyn std::any::Any + Send + Sync>>,
    /// Runs before anything looks at the text.
    pub preprocess_text: Option<fn(&ShapePlan, &dyn Face, &mut Buffer)>,
    /// Runs after positioning (e.g. stretch expansion).
    pub postprocess_glyphs: Option<fn(&ShapePlan, &dyn Face, &mut Buffer)>,

    pub normalization_mode: ShapeNormalizationMode,
    pub decompose: Option<fn(&ShapeNormalizeContext, char) -> Option<(char, char)>>,
    pub compose: Option<fn(&ShapeNormalizeContext, char, char) -> Option<char>>,

    /// ORs script-specific feature bits onto item masks.
    pub setup_masks: Option<fn(&ShapePlan, &dyn Face, &mut Buffer)>,
    /// Reorders a sorted mark run in place.
    pub reorder_marks: Option<fn(&ShapePlan, &mut Buffer, usize, usize)>,

    pub zero_width_marks: ZeroWidthMarksMode,
    pub fallback_position: bool,
}

/// The neutral shaper used when nothing script-specific matches.
pub const DEFAULT_SHAPER: ComplexShaper = ComplexShaper {
    name: "default",
    collect_features: None,
    override_features: None,
    create_data: None,
    preprocess_text: None,
    postprocess_glyphs: None,
    normalization_mode: ShapeNormalizationMode::Auto,
    decompose: None,
    compose: None,
    setup_masks: None,
    reorder_marks: None,
    zero_width_marks: ZeroWidthMarksMode::ByGdefLate,
    fallback_position: true,
};

/// What a shaper scores itself against.
#[derive(Clone, Copy, Debug)]
pub struct SelectionContext {
    pub script: Option<Script>,
    pub direction: Direction,
}

/// Confidence score; higher wins.
pub type Confidence = u8;

pub struct ShaperEntry {
    pub name: &'static str,
    pub matches: fn(&SelectionContext) -> Option<Confidence>,
    pub shaper: &'static ComplexShaper,
}

/// A table of shapers. The process-wide instance is populated once at
/// startup; [`ShaperRegistry::fresh`] builds isolated instances for tests.
pub struct ShaperRegistry {
    entries: Vec<ShaperEntry>,
}

impl ShaperRegistry {
    /// An empty registry.
    pub fn fresh() -> Self {
        ShaperRegistry { entries: Vec::new() }
    }

    /// A registry with the built-in shapers.
    pub fn with_defaults() -> Self {
        let mut registry = ShaperRegistry::fresh();
        registry.register(ShaperEntry {
            name: "arabic",
            matches: arabic_matches,
            shaper: &arabic::ARABIC_SHAPER,
        });
        registry.register(ShaperEntry {
            name: "hebrew",
            matches: hebrew_matches,
            shaper: &hebrew::HEBREW_SHAPER,
        });
        registry
    }

    /// Registration happens only at startup; shaping paths read the table
    /// without synchronization.
    pub fn register(&mut self, entry: ShaperEntry) {
        self.entries.push(entry);
    }

    /// Scores every entry and picks the maximum; ties break by
    /// lexicographic name, then registration order. Falls back to the
    /// neutral shaper.
    pub fn select(&self, ctx: &SelectionContext) -> &'static ComplexShaper {
        let mut best: Option<(Confidence, &str, &'static ComplexShaper)> = None;
        for entry in &self.entries {
            if let Some(confidence) = (entry.matches)(ctx) {
                let better = match best {
                    None => true,
                    Some((best_confidence, best_name, _)) => {
                        confidence > best_confidence
                            || (confidence == best_confidence && entry.name < best_name)
                    }
                };
                if better {
                    best = Some((confidence, entry.name, entry.shaper));
                }
            }
        }
        match best {
            Some((_, name, shaper)) => {
                log::debug!("selected shaper '{}'", name);
                shaper
            }
            None => &DEFAULT_SHAPER,
        }
    }
}

fn arabic_matches(ctx: &SelectionContext) -> Option<Confidence> {
    match ctx.script {
        Some(script::ARABIC)
        | Some(script::SYRIAC)
        | Some(script::MONGOLIAN)
        | Some(script::NKO)
        | Some(script::PHAGS_PA)
        | Some(script::MANDAIC)
        | Some(script::MANICHAEAN)
        | Some(script::ADLAM)
        | Some(script::HANIFI_ROHINGYA)
        | Some(script::SOGDIAN) => Some(100),
        _ => None,
    }
}

fn hebrew_matches(ctx: &SelectionContext) -> Option<Confidence> {
    match ctx.script {
        Some(script::HEBREW) => Some(100),
        _ => None,
    }
}

static GLOBAL_REGISTRY: OnceLock<ShaperRegistry> = OnceLock::new();

/// The process-wide registry, created with the built-in shapers on first
/// use.
pub fn global_registry() -> &'static ShaperRegistry {
    GLOBAL_REGISTRY.get_or_init(ShaperRegistry::with_defaults)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selection_prefers_confidence_then_name() {
        let mut registry = ShaperRegistry::fresh();
        registry.register(ShaperEntry {
            name: "zz-low",
            matches: |_| Some(10),
            shaper: &DEFAULT_SHAPER,
        });
        registry.register(ShaperEntry {
            name: "arabic",
            matches: arabic_matches,
            shaper: &arabic::ARABIC_SHAPER,
        });

        let ctx = SelectionContext {
            script: Some(script::ARABIC),
            direction: Direction::RightToLeft,
        };
        assert_eq!(registry.select(&ctx).name, arabic::ARABIC_SHAPER.name);

        let ctx = SelectionContext {
            script: Some(script::LATIN),
            direction: Direction::LeftToRight,
        };
        assert_eq!(registry.select(&ctx).name, "default");
    }

    #[test]
    fn ties_break_lexicographically() {
        let mut registry = ShaperRegistry::fresh();
        registry.register(ShaperEntry {
            name: "bbb",
            matches: |_| Some(5),
            shaper: &hebrew::HEBREW_SHAPER,
        });
        registry.register(ShaperEntry {
            name: "aaa",
            matches: |_| Some(5),
            shaper: &arabic::ARABIC_SHAPER,
        });

        let ctx = SelectionContext { script: None, direction: Direction::LeftToRight };
        assert_eq!(registry.select(&ctx).name, arabic::ARABIC_SHAPER.name);
    }
}
