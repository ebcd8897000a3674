//! Maps a source identifier to the handler that serves it.

use std::collections::HashMap;
use std::sync::Arc;

use regex::Regex;
use tracing::debug;

use super::handler::{Source, SourceHandler, SourceMeta};
use super::http::HttpSource;
use super::local::LocalSource;
use crate::error::{CriticalError, SourceError};

/// Pattern shorthand expanding to one rule per allowed site.
pub const HTTP_SHORTHAND: &str = "http";

/// Pattern shorthand accepting every http(s) URL.
pub const ALLOW_ALL_SHORTHAND: &str = "allow-all-external";

const ANY_HTTP_PATTERN: &str = r"(?i)^https?://";

/// Whether `src` names a remote resource rather than a local path.
pub fn is_remote(src: &str) -> bool {
    src.contains("://") || src.starts_with("//")
}

/// Regex matching URLs on `site` or any of its subdomains.
pub fn site_pattern(site: &str) -> String {
    format!(
        r"(?i)^https?://([a-z0-9-]+\.)*{}(:\d+)?(/|\?|#|$)",
        regex::escape(site.trim().trim_start_matches("www."))
    )
}

// =============================================================================
// Rule Specs
// =============================================================================

/// An unparsed `pattern=handler` rule from configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleSpec {
    pub pattern: String,
    pub handler: String,
}

impl RuleSpec {
    pub fn new(pattern: impl Into<String>, handler: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            handler: handler.into(),
        }
    }

    /// Parse `pattern=handler`, splitting on the last `=` so patterns may
    /// contain one.
    pub fn parse(rule: &str) -> Option<Self> {
        let (pattern, handler) = rule.trim().rsplit_once('=')?;
        let (pattern, handler) = (pattern.trim(), handler.trim());
        if pattern.is_empty() || handler.is_empty() {
            return None;
        }
        Some(Self::new(pattern, handler))
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Collects handlers and rules, then compiles them into a [`SourceResolver`].
///
/// Explicit rules are evaluated first, in the order added; the rules implied
/// by `allow_all_external` or `allow_external` + allowed sites follow.
pub struct SourceResolverBuilder {
    local: Arc<LocalSource>,
    http: Option<Arc<HttpSource>>,
    custom: HashMap<String, Arc<dyn Source>>,
    rules: Vec<RuleSpec>,
    allowed_sites: Vec<String>,
    allow_external: bool,
    allow_all_external: bool,
}

impl SourceResolverBuilder {
    pub fn new(local: Arc<LocalSource>) -> Self {
        Self {
            local,
            http: None,
            custom: HashMap::new(),
            rules: Vec::new(),
            allowed_sites: Vec::new(),
            allow_external: false,
            allow_all_external: false,
        }
    }

    pub fn with_http(mut self, http: Arc<HttpSource>) -> Self {
        self.http = Some(http);
        self
    }

    /// Register a custom handler that rules can name.
    pub fn register(mut self, name: impl Into<String>, source: Arc<dyn Source>) -> Self {
        self.custom.insert(name.into(), source);
        self
    }

    pub fn with_rule(mut self, rule: RuleSpec) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn with_allowed_sites<I, S>(mut self, sites: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_sites = sites
            .into_iter()
            .map(Into::into)
            .filter(|s: &String| !s.trim().is_empty())
            .collect();
        self
    }

    pub fn allow_external(mut self, allow: bool) -> Self {
        self.allow_external = allow;
        self
    }

    pub fn allow_all_external(mut self, allow: bool) -> Self {
        self.allow_all_external = allow;
        self
    }

    fn expand(&self, pattern: &str) -> Vec<String> {
        match pattern {
            HTTP_SHORTHAND => self.allowed_sites.iter().map(|s| site_pattern(s)).collect(),
            ALLOW_ALL_SHORTHAND => vec![ANY_HTTP_PATTERN.to_string()],
            other => vec![other.to_string()],
        }
    }

    fn handler(&self, name: &str) -> Result<SourceHandler, CriticalError> {
        match name {
            "local" => Ok(SourceHandler::Local(self.local.clone())),
            "http" => self.http.clone().map(SourceHandler::Http).ok_or_else(|| {
                CriticalError::Configuration(
                    "remote sources require the cache to be enabled".to_string(),
                )
            }),
            other => self
                .custom
                .get(other)
                .cloned()
                .map(SourceHandler::Custom)
                .ok_or_else(|| {
                    CriticalError::Configuration(format!("unknown source handler '{}'", other))
                }),
        }
    }

    pub fn build(self) -> Result<SourceResolver, CriticalError> {
        let mut specs: Vec<(String, String)> = Vec::new();
        for rule in &self.rules {
            for pattern in self.expand(&rule.pattern) {
                specs.push((pattern, rule.handler.clone()));
            }
        }
        if self.allow_all_external {
            specs.push((ANY_HTTP_PATTERN.to_string(), "http".to_string()));
        } else if self.allow_external {
            for site in &self.allowed_sites {
                specs.push((site_pattern(site), "http".to_string()));
            }
        }

        let mut rules = Vec::with_capacity(specs.len());
        for (pattern, handler) in specs {
            let regex = Regex::new(&pattern).map_err(|e| {
                CriticalError::Configuration(format!("invalid source pattern '{}': {}", pattern, e))
            })?;
            rules.push(SourceRule {
                pattern: regex,
                handler: self.handler(&handler)?,
            });
        }

        Ok(SourceResolver {
            rules,
            local: self.local,
        })
    }
}

// =============================================================================
// Resolver
// =============================================================================

struct SourceRule {
    pattern: Regex,
    handler: SourceHandler,
}

/// Ordered `(pattern, handler)` rules with a local fallback.
pub struct SourceResolver {
    rules: Vec<SourceRule>,
    local: Arc<LocalSource>,
}

impl SourceResolver {
    /// Resolver with no rules: local sources only.
    pub fn local_only(local: Arc<LocalSource>) -> Self {
        Self {
            rules: Vec::new(),
            local,
        }
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// Pick the handler for `src`.
    ///
    /// The first matching rule wins. Unmatched remote identifiers are
    /// refused; everything else goes to the local handler.
    pub fn handler_for(&self, src: &str) -> Result<SourceHandler, SourceError> {
        if let Some(rule) = self.rules.iter().find(|r| r.pattern.is_match(src)) {
            return Ok(rule.handler.clone());
        }
        if is_remote(src) {
            debug!(src, "No source rule permits remote identifier");
            return Err(SourceError::NotPermitted {
                src: src.to_string(),
            });
        }
        Ok(SourceHandler::Local(self.local.clone()))
    }

    /// Select a handler and read the source's metadata.
    ///
    /// The metadata may be invalid; callers decide how to report that.
    pub async fn resolve(&self, src: &str) -> Result<(SourceHandler, SourceMeta), SourceError> {
        if src.trim().is_empty() {
            return Err(SourceError::not_found(src));
        }
        let handler = self.handler_for(src)?;
        let meta = handler.read_metadata(src).await?;
        debug!(src, handler = handler.name(), valid = meta.valid, "Resolved source");
        Ok((handler, meta))
    }
}

impl std::fmt::Debug for SourceResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let rules: Vec<_> = self
            .rules
            .iter()
            .map(|r| (r.pattern.as_str(), r.handler.name()))
            .collect();
        f.debug_struct("SourceResolver")
            .field("rules", &rules)
            .field("base_dir", &self.local.base_dir())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::HttpSourceConfig;
    use async_trait::async_trait;
    use image::{Rgb, RgbImage};
    use tempfile::TempDir;

    struct FixedSource;

    #[async_trait]
    impl Source for FixedSource {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn read_metadata(&self, _src: &str) -> Result<SourceMeta, SourceError> {
            Ok(SourceMeta::invalid())
        }
    }

    fn local(dir: &TempDir) -> Arc<LocalSource> {
        Arc::new(LocalSource::new(dir.path()).unwrap())
    }

    fn http(dir: &TempDir) -> Arc<HttpSource> {
        Arc::new(HttpSource::new(HttpSourceConfig::new(dir.path().join("remote"), 1024)).unwrap())
    }

    #[test]
    fn test_rule_spec_parse() {
        assert_eq!(
            RuleSpec::parse("^https?://cdn=http"),
            Some(RuleSpec::new("^https?://cdn", "http"))
        );
        assert_eq!(
            RuleSpec::parse("[?&]v=x=youtube"),
            Some(RuleSpec::new("[?&]v=x", "youtube"))
        );
        assert_eq!(RuleSpec::parse("no-handler"), None);
        assert_eq!(RuleSpec::parse("=http"), None);
    }

    #[test]
    fn test_site_pattern() {
        let re = Regex::new(&site_pattern("example.com")).unwrap();
        assert!(re.is_match("http://example.com/a.jpg"));
        assert!(re.is_match("https://img.example.com/a.jpg"));
        assert!(re.is_match("https://EXAMPLE.com:8080/a.jpg"));
        assert!(!re.is_match("https://example.com.evil.net/a.jpg"));
        assert!(!re.is_match("https://notexample.com/a.jpg"));
    }

    #[test]
    fn test_unmatched_remote_not_permitted() {
        let dir = TempDir::new().unwrap();
        let resolver = SourceResolverBuilder::new(local(&dir)).build().unwrap();
        assert!(matches!(
            resolver.handler_for("https://example.com/a.jpg"),
            Err(SourceError::NotPermitted { .. })
        ));
        assert!(matches!(
            resolver.handler_for("//example.com/a.jpg"),
            Err(SourceError::NotPermitted { .. })
        ));
        assert!(matches!(
            resolver.handler_for("photos/a.jpg"),
            Ok(SourceHandler::Local(_))
        ));
    }

    #[test]
    fn test_allowed_sites_route_to_http() {
        let dir = TempDir::new().unwrap();
        let resolver = SourceResolverBuilder::new(local(&dir))
            .with_http(http(&dir))
            .with_allowed_sites(["flickr.com", "example.org"])
            .allow_external(true)
            .build()
            .unwrap();
        assert_eq!(resolver.rule_count(), 2);
        assert!(matches!(
            resolver.handler_for("http://farm1.flickr.com/x.jpg"),
            Ok(SourceHandler::Http(_))
        ));
        assert!(matches!(
            resolver.handler_for("http://other.net/x.jpg"),
            Err(SourceError::NotPermitted { .. })
        ));
    }

    #[test]
    fn test_allow_all_external() {
        let dir = TempDir::new().unwrap();
        let resolver = SourceResolverBuilder::new(local(&dir))
            .with_http(http(&dir))
            .allow_all_external(true)
            .build()
            .unwrap();
        assert!(matches!(
            resolver.handler_for("https://anything.example/x.png"),
            Ok(SourceHandler::Http(_))
        ));
    }

    #[test]
    fn test_explicit_rules_first_match_wins() {
        let dir = TempDir::new().unwrap();
        let resolver = SourceResolverBuilder::new(local(&dir))
            .with_http(http(&dir))
            .register("fixed", Arc::new(FixedSource))
            .with_rule(RuleSpec::new(r"^https?://special\.", "fixed"))
            .with_rule(RuleSpec::new(ALLOW_ALL_SHORTHAND, "http"))
            .build()
            .unwrap();
        assert_eq!(
            resolver.handler_for("https://special.example/x").unwrap().name(),
            "fixed"
        );
        assert_eq!(
            resolver.handler_for("https://plain.example/x").unwrap().name(),
            "http"
        );
    }

    #[test]
    fn test_http_shorthand_expands_allowed_sites() {
        let dir = TempDir::new().unwrap();
        let resolver = SourceResolverBuilder::new(local(&dir))
            .with_http(http(&dir))
            .with_allowed_sites(["a.com", "b.com"])
            .with_rule(RuleSpec::new(HTTP_SHORTHAND, "http"))
            .build()
            .unwrap();
        assert_eq!(resolver.rule_count(), 2);
        assert!(resolver.handler_for("https://b.com/x").is_ok());
    }

    #[test]
    fn test_unknown_handler_is_critical() {
        let dir = TempDir::new().unwrap();
        let result = SourceResolverBuilder::new(local(&dir))
            .with_rule(RuleSpec::new("^x", "nope"))
            .build();
        assert!(matches!(result, Err(CriticalError::Configuration(_))));
    }

    #[test]
    fn test_http_rule_without_http_source_is_critical() {
        let dir = TempDir::new().unwrap();
        let result = SourceResolverBuilder::new(local(&dir))
            .allow_all_external(true)
            .build();
        assert!(matches!(result, Err(CriticalError::Configuration(_))));
    }

    #[test]
    fn test_invalid_pattern_is_critical() {
        let dir = TempDir::new().unwrap();
        let result = SourceResolverBuilder::new(local(&dir))
            .with_rule(RuleSpec::new("([", "local"))
            .build();
        assert!(matches!(result, Err(CriticalError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_resolve_local_and_traversal() {
        let outer = TempDir::new().unwrap();
        let base = outer.path().join("www");
        std::fs::create_dir_all(&base).unwrap();
        RgbImage::from_pixel(4, 4, Rgb([0, 0, 0]))
            .save(base.join("ok.png"))
            .unwrap();
        std::fs::write(outer.path().join("passwd"), b"root:x:0:0").unwrap();

        let resolver =
            SourceResolver::local_only(Arc::new(LocalSource::new(&base).unwrap()));

        let (handler, meta) = resolver.resolve("ok.png").await.unwrap();
        assert_eq!(handler.name(), "local");
        assert!(meta.valid);

        let (_, meta) = resolver.resolve("../passwd").await.unwrap();
        assert!(!meta.valid);
        let (_, meta) = resolver.resolve("../../etc/passwd").await.unwrap();
        assert!(!meta.valid);

        assert!(matches!(
            resolver.resolve("").await,
            Err(SourceError::NotFound { .. })
        ));
    }
}
