//! Thumbnail request parameters.
//!
//! A [`ParameterSet`] is the immutable description of one thumbnail: the
//! source identifier, the target box, crop/fit behaviour, colours, filters and
//! the server limits that shaped them. It is built from the raw query pairs
//! and the server's [`RenderDefaults`]:
//!
//! ```text
//! ?src=photo.jpg&w=200&h=150&zc=1&a=t&f=2|3,20
//!        │
//!        ▼
//! ParameterSet::from_pairs(query, &defaults)
//!        │
//!        ├──► SourceResolver   (src)
//!        ├──► ArtifactCache    (canonical_json → fingerprint)
//!        └──► TransformPipeline (everything else)
//! ```
//!
//! Query parameters: `src`, `w`, `h`, `q`, `a`, `zc`, `s`, `cc`, `ct`, `cr`,
//! `f`, `p`.

mod set;
mod types;

pub use set::{
    parse_flag, ParameterSet, RenderDefaults, DEFAULT_MAX_DIMENSION, DEFAULT_MAX_SOURCE_BYTES,
    DEFAULT_QUALITY, DEFAULT_SIZE,
};
pub use types::{Alignment, AxisAlign, Color, CropMode, CropRect, FilterChain, FilterInvocation};
