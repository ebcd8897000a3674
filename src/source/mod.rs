//! Source resolution.
//!
//! ```text
//!   src ──► SourceResolver ──► first matching rule ──► SourceHandler
//!                │                                        │
//!                │ no rule, remote  ─► NotPermitted       ├─ Local  (base dir, realpath containment)
//!                └ no rule, local   ─► Local              ├─ Http   (download into cache dir → Local)
//!                                                         └─ Custom (e.g. youtube → Http)
//! ```
//!
//! Handlers return [`SourceMeta`]; a source that cannot be found is reported
//! as invalid metadata, while transport failures and policy refusals are
//! [`SourceError`](crate::error::SourceError)s.

mod handler;
mod http;
mod local;
mod resolver;
mod youtube;

pub use handler::{normalize_mime, Source, SourceHandler, SourceMeta};
pub use http::{HttpSource, HttpSourceConfig, DEFAULT_FETCH_TIMEOUT, DEFAULT_RETRY_INTERVAL};
pub use local::LocalSource;
pub use resolver::{
    is_remote, site_pattern, RuleSpec, SourceResolver, SourceResolverBuilder,
    ALLOW_ALL_SHORTHAND, HTTP_SHORTHAND,
};
pub use youtube::{YouTubeSource, DEFAULT_PATTERN as YOUTUBE_PATTERN};
