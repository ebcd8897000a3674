//! Configuration management for imthumb.
//!
//! Options come from the command line or from `IMTHUMB_*` environment
//! variables; every optional setting has a default taken from the classic
//! TimThumb configuration.
//!
//! # Example
//!
//! ```ignore
//! use clap::Parser;
//! use imthumb::config::{Cli, Command};
//!
//! match Cli::parse().into_command() {
//!     Command::Serve(config) => println!("Listening on {}", config.bind_address()),
//!     Command::Check(config) => println!("Checking {}", config.serve.cache_dir.display()),
//! }
//! ```
//!
//! # Environment Variables
//!
//! - `IMTHUMB_HOST` / `IMTHUMB_PORT` - Bind address (default: 0.0.0.0:3000)
//! - `IMTHUMB_BASE_DIR` - Root directory for local sources (default: .)
//! - `IMTHUMB_CACHE_ENABLED` / `IMTHUMB_CACHE_DIR` - Disk cache (default: true, ./cache)
//! - `IMTHUMB_ALLOW_EXTERNAL` / `IMTHUMB_ALLOWED_SITES` - Remote sources
//! - `IMTHUMB_RATE_LIMITER` - `none` or `per-client`

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use crate::cache::{
    ArtifactCache, CacheConfig, DEFAULT_CACHE_MAX_AGE, DEFAULT_CACHE_PREFIX, DEFAULT_CACHE_SALT,
    DEFAULT_CACHE_SUFFIX, DEFAULT_SWEEP_INTERVAL,
};
use crate::error::CriticalError;
use crate::params::{
    Alignment, Color, CropMode, RenderDefaults, DEFAULT_MAX_DIMENSION, DEFAULT_MAX_SOURCE_BYTES,
    DEFAULT_QUALITY,
};
use crate::server::{RouterConfig, DEFAULT_BROWSER_CACHE_MAX_AGE};
use crate::service::{
    KeyedRateLimiter, ServiceConfig, ThumbnailService, DEFAULT_RATE_EXCEEDED_MESSAGE,
    DEFAULT_RATE_LIMIT_INTERVAL, DEFAULT_RATE_LIMIT_REQUESTS,
};
use crate::source::{
    HttpSource, HttpSourceConfig, LocalSource, RuleSpec, SourceResolver, SourceResolverBuilder,
    YouTubeSource, DEFAULT_FETCH_TIMEOUT, DEFAULT_RETRY_INTERVAL,
};
use crate::transform::{ImageEngine, RasterEngine};

// =============================================================================
// Default Values
// =============================================================================

/// Default server host.
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Default server port.
pub const DEFAULT_PORT: u16 = 3000;

/// Default cache directory.
pub const DEFAULT_CACHE_DIR: &str = "./cache";

/// Rate limiter identifiers accepted by `--rate-limiter`.
pub const RATE_LIMITERS: [&str; 2] = ["none", "per-client"];

// =============================================================================
// CLI
// =============================================================================

/// imthumb - an on-demand image thumbnailing server.
#[derive(Parser, Debug, Clone)]
#[command(name = "imthumb")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    pub fn into_command(self) -> Command {
        self.command
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Start the thumbnail server.
    Serve(ServeConfig),

    /// Validate the configuration and the cache directory.
    Check(CheckConfig),
}

/// Options of `imthumb serve`.
#[derive(Args, Debug, Clone)]
pub struct ServeConfig {
    // =========================================================================
    // Server
    // =========================================================================
    /// Host address to bind the server to.
    #[arg(long, default_value = DEFAULT_HOST, env = "IMTHUMB_HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(short, long, default_value_t = DEFAULT_PORT, env = "IMTHUMB_PORT")]
    pub port: u16,

    /// Directory local sources must stay inside.
    #[arg(long, default_value = ".", env = "IMTHUMB_BASE_DIR")]
    pub base_dir: PathBuf,

    // =========================================================================
    // Rendering
    // =========================================================================
    /// Largest width a request may ask for.
    #[arg(long, default_value_t = DEFAULT_MAX_DIMENSION, env = "IMTHUMB_MAX_WIDTH")]
    pub max_width: u32,

    /// Largest height a request may ask for.
    #[arg(long, default_value_t = DEFAULT_MAX_DIMENSION, env = "IMTHUMB_MAX_HEIGHT")]
    pub max_height: u32,

    /// Largest source file accepted, in bytes.
    #[arg(long, default_value_t = DEFAULT_MAX_SOURCE_BYTES, env = "IMTHUMB_MAX_SOURCE_BYTES")]
    pub max_source_bytes: u64,

    /// Output quality when the request has no `q` (1-100).
    #[arg(long, default_value_t = DEFAULT_QUALITY, env = "IMTHUMB_DEFAULT_QUALITY")]
    pub default_quality: u8,

    /// Crop mode when the request has no `zc` (0-3).
    #[arg(long, default_value_t = 1, env = "IMTHUMB_DEFAULT_CROP_MODE")]
    pub default_crop_mode: u8,

    /// Crop alignment when the request has no `a`.
    #[arg(long, default_value = "c", env = "IMTHUMB_DEFAULT_ALIGN")]
    pub default_align: String,

    #[arg(long, default_value_t = false, env = "IMTHUMB_DEFAULT_SHARPEN")]
    pub default_sharpen: bool,

    /// Canvas colour (hex) when the request has no `cc`.
    #[arg(long, default_value = "ffffff", env = "IMTHUMB_DEFAULT_CANVAS_COLOR")]
    pub default_canvas_color: String,

    #[arg(long, default_value_t = true, action = clap::ArgAction::Set, env = "IMTHUMB_DEFAULT_CANVAS_TRANSPARENT")]
    pub default_canvas_transparent: bool,

    /// Filter chain applied when the request has no `f`.
    #[arg(long, default_value = "", env = "IMTHUMB_DEFAULT_FILTERS")]
    pub default_filters: String,

    #[arg(long, default_value_t = true, action = clap::ArgAction::Set, env = "IMTHUMB_DEFAULT_PROGRESSIVE")]
    pub default_progressive: bool,

    /// Keep alpha in PNG output.
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set, env = "IMTHUMB_PNG_TRANSPARENCY")]
    pub png_transparency: bool,

    /// Allow output larger than the source.
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set, env = "IMTHUMB_ALLOW_UPSCALE")]
    pub allow_upscale: bool,

    // =========================================================================
    // Disk Cache
    // =========================================================================
    /// Store rendered thumbnails on disk. Remote sources need this.
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set, env = "IMTHUMB_CACHE_ENABLED")]
    pub cache_enabled: bool,

    #[arg(long, default_value = DEFAULT_CACHE_DIR, env = "IMTHUMB_CACHE_DIR")]
    pub cache_dir: PathBuf,

    #[arg(long, default_value = DEFAULT_CACHE_PREFIX, env = "IMTHUMB_CACHE_PREFIX")]
    pub cache_prefix: String,

    #[arg(long, default_value = DEFAULT_CACHE_SUFFIX, env = "IMTHUMB_CACHE_SUFFIX")]
    pub cache_suffix: String,

    #[arg(long, default_value = DEFAULT_CACHE_SALT, env = "IMTHUMB_CACHE_SALT", hide_default_value = true)]
    pub cache_salt: String,

    /// Readable cache file names, e.g. `%filename%-%width%x%height%.%ext%`.
    #[arg(long, env = "IMTHUMB_CACHE_FILENAME_TEMPLATE")]
    pub cache_filename_template: Option<String>,

    /// Age in seconds after which cache entries are swept.
    #[arg(long, default_value_t = DEFAULT_CACHE_MAX_AGE.as_secs(), env = "IMTHUMB_CACHE_MAX_AGE")]
    pub cache_max_age: u64,

    /// Seconds between sweeps; 0 disables sweeping.
    #[arg(long, default_value_t = DEFAULT_SWEEP_INTERVAL.as_secs(), env = "IMTHUMB_CACHE_SWEEP_INTERVAL")]
    pub cache_sweep_interval: u64,

    // =========================================================================
    // Browser Cache
    // =========================================================================
    /// Send cacheable headers and honour `If-Modified-Since`.
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set, env = "IMTHUMB_BROWSER_CACHE")]
    pub browser_cache: bool,

    #[arg(long, default_value_t = DEFAULT_BROWSER_CACHE_MAX_AGE, env = "IMTHUMB_BROWSER_CACHE_MAX_AGE")]
    pub browser_cache_max_age: u64,

    // =========================================================================
    // Fallback Images
    // =========================================================================
    /// Image served when a source is missing, too large or not permitted.
    #[arg(long, env = "IMTHUMB_NOT_FOUND_IMAGE")]
    pub not_found_image: Option<PathBuf>,

    /// Image served for any other recoverable error.
    #[arg(long, env = "IMTHUMB_ERROR_IMAGE")]
    pub error_image: Option<PathBuf>,

    #[arg(long, default_value = "FF7700", env = "IMTHUMB_NOT_FOUND_COLOR")]
    pub not_found_color: String,

    #[arg(long, default_value = "FF0000", env = "IMTHUMB_ERROR_COLOR")]
    pub error_color: String,

    // =========================================================================
    // Remote Sources
    // =========================================================================
    /// Fetch sources from the allowed sites.
    #[arg(long, default_value_t = false, env = "IMTHUMB_ALLOW_EXTERNAL")]
    pub allow_external: bool,

    /// Fetch sources from any http(s) URL.
    #[arg(long, default_value_t = false, env = "IMTHUMB_ALLOW_ALL_EXTERNAL")]
    pub allow_all_external: bool,

    /// Hosts remote sources may come from (comma-separated).
    #[arg(long, env = "IMTHUMB_ALLOWED_SITES", value_delimiter = ',')]
    pub allowed_sites: Vec<String>,

    /// Extra `pattern=handler` rules, separated by `;`. Handlers: local,
    /// http, youtube.
    #[arg(long, env = "IMTHUMB_SOURCE_HANDLERS", value_delimiter = ';')]
    pub source_handlers: Vec<String>,

    /// Remote fetch timeout in seconds.
    #[arg(long, default_value_t = DEFAULT_FETCH_TIMEOUT.as_secs(), env = "IMTHUMB_EXTERNAL_REQUEST_TIMEOUT")]
    pub external_request_timeout: u64,

    /// Seconds before a failed remote fetch is retried.
    #[arg(long, default_value_t = DEFAULT_RETRY_INTERVAL.as_secs(), env = "IMTHUMB_EXTERNAL_REQUEST_RETRY")]
    pub external_request_retry: u64,

    // =========================================================================
    // Abuse Protection
    // =========================================================================
    /// `none` or `per-client`.
    #[arg(long, default_value = "none", env = "IMTHUMB_RATE_LIMITER")]
    pub rate_limiter: String,

    #[arg(long, default_value_t = DEFAULT_RATE_LIMIT_REQUESTS, env = "IMTHUMB_RATE_LIMIT_REQUESTS")]
    pub rate_limit_requests: u32,

    /// Rate limit window in seconds.
    #[arg(long, default_value_t = DEFAULT_RATE_LIMIT_INTERVAL.as_secs(), env = "IMTHUMB_RATE_LIMIT_INTERVAL")]
    pub rate_limit_interval: u64,

    #[arg(long, default_value = DEFAULT_RATE_EXCEEDED_MESSAGE, env = "IMTHUMB_RATE_EXCEEDED_MESSAGE")]
    pub rate_exceeded_message: String,

    /// Refuse requests whose Referer names another host.
    #[arg(long, default_value_t = false, env = "IMTHUMB_BLOCK_EXTERNAL_LEECHERS")]
    pub block_external_leechers: bool,

    // =========================================================================
    // HTTP Output
    // =========================================================================
    /// Omit X-Generator and X-Cache headers.
    #[arg(long, default_value_t = false, env = "IMTHUMB_SILENT")]
    pub silent: bool,

    /// Add timing and memory headers.
    #[arg(long, default_value_t = false, env = "IMTHUMB_DEBUG")]
    pub debug: bool,

    /// Allowed CORS origins (comma-separated). Any origin if unset.
    #[arg(long, env = "IMTHUMB_CORS_ORIGINS", value_delimiter = ',')]
    pub cors_origins: Option<Vec<String>>,

    // =========================================================================
    // Logging
    // =========================================================================
    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,

    /// Disable request tracing.
    #[arg(long, default_value_t = false)]
    pub no_tracing: bool,
}

/// Options of `imthumb check`.
#[derive(Args, Debug, Clone)]
pub struct CheckConfig {
    #[command(flatten)]
    pub serve: ServeConfig,

    /// Run an expiry sweep of the cache directory.
    #[arg(long, default_value_t = false)]
    pub sweep: bool,

    /// Resolve one source and print its metadata.
    #[arg(long)]
    pub test_src: Option<String>,
}

// =============================================================================
// Validation
// =============================================================================

impl ServeConfig {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_width == 0 || self.max_height == 0 {
            return Err("max_width and max_height must be greater than 0".to_string());
        }
        if self.max_source_bytes == 0 {
            return Err("max_source_bytes must be greater than 0".to_string());
        }
        if self.default_quality == 0 || self.default_quality > 100 {
            return Err("default_quality must be between 1 and 100".to_string());
        }
        if self.default_crop_mode > 3 {
            return Err("default_crop_mode must be 0, 1, 2 or 3".to_string());
        }

        for (name, value) in [
            ("default_canvas_color", &self.default_canvas_color),
            ("not_found_color", &self.not_found_color),
            ("error_color", &self.error_color),
        ] {
            if Color::parse_hex(value).is_none() {
                return Err(format!("{} '{}' is not a hex colour", name, value));
            }
        }

        if !RATE_LIMITERS.contains(&self.rate_limiter.as_str()) {
            return Err(format!(
                "unknown rate limiter '{}' (expected one of: {})",
                self.rate_limiter,
                RATE_LIMITERS.join(", ")
            ));
        }
        if self.rate_limiter != "none" {
            if self.rate_limit_requests == 0 {
                return Err("rate_limit_requests must be greater than 0".to_string());
            }
            if self.rate_limit_interval == 0 {
                return Err("rate_limit_interval must be greater than 0".to_string());
            }
        }

        for rule in &self.source_handlers {
            if RuleSpec::parse(rule).is_none() {
                return Err(format!("source handler rule '{}' is not pattern=handler", rule));
            }
        }
        if self.wants_remote_sources() && !self.cache_enabled {
            return Err(
                "remote sources require the cache to be enabled. \
                 Set --cache-enabled=true or disable --allow-external"
                    .to_string(),
            );
        }

        Ok(())
    }

    /// Get the server bind address as "host:port".
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    fn wants_remote_sources(&self) -> bool {
        self.allow_external || self.allow_all_external
    }

    // =========================================================================
    // Component Configs
    // =========================================================================

    pub fn render_defaults(&self) -> RenderDefaults {
        RenderDefaults {
            quality: self.default_quality,
            crop_mode: CropMode::from_code(i64::from(self.default_crop_mode)),
            align: Alignment::parse(&self.default_align),
            sharpen: self.default_sharpen,
            canvas_color: Color::parse_hex(&self.default_canvas_color).unwrap_or(Color::WHITE),
            canvas_transparent: self.default_canvas_transparent,
            filters: self.default_filters.clone(),
            progressive: self.default_progressive,
            max_width: self.max_width,
            max_height: self.max_height,
            max_source_bytes: self.max_source_bytes,
            png_transparency: self.png_transparency,
            allow_upscale: self.allow_upscale,
        }
    }

    /// `None` when the disk cache is disabled.
    pub fn cache_config(&self) -> Option<CacheConfig> {
        if !self.cache_enabled {
            return None;
        }
        let mut config = CacheConfig::new(&self.cache_dir)
            .with_prefix(&self.cache_prefix)
            .with_suffix(&self.cache_suffix)
            .with_salt(&self.cache_salt)
            .with_max_age(Duration::from_secs(self.cache_max_age))
            .with_sweep_interval(Duration::from_secs(self.cache_sweep_interval));
        if let Some(template) = self.cache_filename_template.as_deref().filter(|t| !t.is_empty()) {
            config = config.with_filename_template(template);
        }
        Some(config)
    }

    /// Remote downloads land in the cache directory.
    pub fn http_source_config(&self) -> Option<HttpSourceConfig> {
        if !self.cache_enabled {
            return None;
        }
        Some(
            HttpSourceConfig::new(&self.cache_dir, self.max_source_bytes)
                .with_timeout(Duration::from_secs(self.external_request_timeout))
                .with_retry_interval(Duration::from_secs(self.external_request_retry)),
        )
    }

    pub fn service_config(&self) -> ServiceConfig {
        let mut config = ServiceConfig {
            not_found_color: Color::parse_hex(&self.not_found_color)
                .unwrap_or(crate::service::DEFAULT_NOT_FOUND_COLOR),
            error_color: Color::parse_hex(&self.error_color)
                .unwrap_or(crate::service::DEFAULT_ERROR_COLOR),
            rate_exceeded_message: self.rate_exceeded_message.clone(),
            ..ServiceConfig::default()
        }
        .with_browser_cache(self.browser_cache)
        .with_leech_blocking(self.block_external_leechers);

        if let Some(path) = &self.not_found_image {
            config = config.with_not_found_image(path);
        }
        if let Some(path) = &self.error_image {
            config = config.with_error_image(path);
        }
        config
    }

    pub fn rule_specs(&self) -> Vec<RuleSpec> {
        self.source_handlers
            .iter()
            .filter_map(|rule| RuleSpec::parse(rule))
            .collect()
    }

    pub fn router_config(&self) -> RouterConfig {
        let mut config = RouterConfig::new()
            .with_browser_cache_max_age(self.browser_cache_max_age)
            .with_silent(self.silent)
            .with_debug(self.debug)
            .with_tracing(!self.no_tracing);
        if let Some(origins) = &self.cors_origins {
            config = config.with_cors_origins(origins.clone());
        }
        config
    }

    // =========================================================================
    // Wiring
    // =========================================================================

    /// Build the source resolver: local files, plus HTTP and YouTube
    /// handlers when the cache is enabled.
    pub fn build_resolver(&self) -> Result<SourceResolver, CriticalError> {
        let local = LocalSource::new(&self.base_dir).map_err(|e| {
            CriticalError::Configuration(format!("base directory unusable: {}", e))
        })?;
        let mut builder = SourceResolverBuilder::new(Arc::new(local));

        if let Some(http_config) = self.http_source_config() {
            let http = Arc::new(HttpSource::new(http_config).map_err(|e| {
                CriticalError::Configuration(format!("remote source unavailable: {}", e))
            })?);
            builder = builder
                .register("youtube", Arc::new(YouTubeSource::new(http.clone())))
                .with_http(http);
        }

        for rule in self.rule_specs() {
            builder = builder.with_rule(rule);
        }

        builder
            .with_allowed_sites(self.allowed_sites.iter().cloned())
            .allow_external(self.allow_external)
            .allow_all_external(self.allow_all_external)
            .build()
    }

    /// Build the fully wired thumbnail service.
    ///
    /// The cache directory is created and checked for writability first.
    pub fn build_service(&self) -> Result<ThumbnailService, CriticalError> {
        let resolver = self.build_resolver()?;
        let engine: Arc<dyn ImageEngine> = Arc::new(RasterEngine::new());
        let mut service =
            ThumbnailService::new(resolver, engine)?.with_config(self.service_config());

        if let Some(cache_config) = self.cache_config() {
            let cache = ArtifactCache::new(cache_config);
            cache.ensure_directory_writable()?;
            service = service.with_cache(cache);
        }

        if self.rate_limiter == "per-client" {
            let limiter = KeyedRateLimiter::new(
                self.rate_limit_requests,
                Duration::from_secs(self.rate_limit_interval),
            )?;
            service = service.with_rate_limiter(Arc::new(limiter));
        }

        Ok(service)
    }
}

// =============================================================================
// Tests
// =============================================================================
