//! Filesystem cache for rendered thumbnails.
//!
//! ```text
//! ParameterSet ──► fingerprint / template ──► <cache-dir>/<name>
//!                                                  │
//!        lookup ◄── mtime vs source mtime ─────────┤
//!        write  ──► temp file ─► lock ─► rename ───┘
//!        sweep  ──► marker file gates deletion of expired *suffix files
//! ```
//!
//! The cache is shared by every worker process pointed at the same
//! directory; correctness relies on atomic rename plus an advisory lock per
//! entry rather than on in-process state.

mod key;
mod store;

pub use key::{expand_template, fingerprint, CACHE_KEY_VERSION};
pub use store::{
    ArtifactCache, CacheConfig, CacheEntry, DEFAULT_CACHE_MAX_AGE, DEFAULT_CACHE_PREFIX,
    DEFAULT_CACHE_SALT, DEFAULT_CACHE_SUFFIX, DEFAULT_SWEEP_INTERVAL, SWEEP_MARKER,
};
