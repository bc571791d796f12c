/*!
A pure-Rust OpenType text shaping engine.

`ot-shaper` converts a sequence of Unicode code points, together with
segment properties (script, language, direction) and a font's OpenType
tables, into positioned glyphs. The pipeline covers Unicode preprocessing,
font-aware normalization, feature-map compilation with bit-packed masks,
GSUB/GPOS lookup execution, mark-width zeroing, attachment-chain
resolution, fallback mark placement and cluster safety-flag propagation,
with script-specific shapers for the Arabic family and Hebrew.

Font tables reach the engine through the [`Face`] trait as pre-parsed,
read-only data; the engine itself never parses font binaries. A
[`FontFace`] adapter over `ttf-parser` covers the metrics half for real
font files.

```no_run
use ot_shaper::{shape, Feature, FontFace, UnicodeBuffer};

let data = std::fs::read("font.ttf").unwrap();
let face = FontFace::from_slice(&data, 0).unwrap();

let mut buffer = UnicodeBuffer::new();
buffer.push_str("Hello");

let glyphs = shape(&face, &[], buffer).unwrap();
for (info, pos) in glyphs.glyph_infos().iter().zip(glyphs.glyph_positions()) {
    println!("gid {} cluster {} advance {}", info.codepoint, info.cluster, pos.x_advance);
}
```
*/

mod buffer;
mod common;
mod error;
mod face;
mod normalize;
mod shape;
mod unicode;

pub mod complex;
pub mod ot;
pub mod plan;
pub mod tables;

pub use buffer::{
    Buffer, BufferFlags, ClusterLevel, GlyphBuffer, GlyphFlags, GlyphInfo, GlyphPosition,
    UnicodeBuffer,
};
pub use common::{
    parse_variations, script, Direction, Feature, Language, Mask, Script, Tag, Variation,
};
pub use error::{ShapeError, ShapingLimit};
pub use face::{Face, FontFace, GlyphClass, GlyphExtents};
pub use normalize::{ShapeNormalizationMode, ShapeNormalizeContext};
pub use shape::{shape, shape_with_registry};

pub use ttf_parser::GlyphId;
