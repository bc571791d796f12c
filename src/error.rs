use thiserror::Error;

/// The budget that was blown when shaping aborted.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ShapingLimit {
    /// Total number of lookup applications.
    MaxOperations,
    /// Maximum buffer length during expansion.
    MaxLength,
    /// Nested-lookup recursion depth.
    RecursionDepth,
}

impl core::fmt::Display for ShapingLimit {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ShapingLimit::MaxOperations => write!(f, "operation budget"),
            ShapingLimit::MaxLength => write!(f, "buffer length budget"),
            ShapingLimit::RecursionDepth => write!(f, "recursion depth"),
        }
    }
}

/// Everything that can make a shape call fail.
///
/// Recoverable conditions (a missing glyph, a feature absent from the font,
/// a font without GPOS) never surface here; they degrade to documented
/// fallbacks instead.
#[derive(Clone, PartialEq, Eq, Debug, Error)]
pub enum ShapeError {
    /// A per-buffer budget was exceeded. Protects against adversarial fonts
    /// that would otherwise expand the buffer or loop without bound.
    #[error("shaping limit exceeded: {0}")]
    LimitExceeded(ShapingLimit),

    /// The face presented structurally inconsistent layout data, such as a
    /// feature referencing a lookup index past the end of the lookup list.
    #[error("malformed font table: {0}")]
    MalformedFontTable(&'static str),

    /// A feature string failed to parse. `pos` is the byte offset of the
    /// failure.
    #[error("invalid feature string at byte {pos}")]
    InvalidFeatureString { pos: usize },

    /// A variation string failed to parse. `pos` is the byte offset of the
    /// failure.
    #[error("invalid variation string at byte {pos}")]
    InvalidVariationString { pos: usize },

    /// An option value the engine deliberately does not support.
    #[error("unsupported option: {0}")]
    UnsupportedOption(&'static str),
}
