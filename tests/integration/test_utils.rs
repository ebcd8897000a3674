//! Test utilities for integration tests.
//!
//! Fixtures are generated with the `image` crate into temporary directories.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, Response};
use axum::Router;
use bytes::Bytes;
use http_body_util::BodyExt;
use image::{GenericImageView, ImageFormat, Rgb, RgbImage, Rgba, RgbaImage};
use tempfile::TempDir;
use tower::ServiceExt;

use imthumb::cache::{ArtifactCache, CacheConfig, DEFAULT_CACHE_SUFFIX};
use imthumb::params::RenderDefaults;
use imthumb::server::{create_router, RouterConfig};
use imthumb::service::{ServiceConfig, ThumbnailService};
use imthumb::source::{LocalSource, SourceResolver};
use imthumb::transform::RasterEngine;

// =============================================================================
// Fixture
// =============================================================================

/// A base directory of source images and an empty cache directory.
pub struct Fixture {
    _dir: TempDir,
    pub base: PathBuf,
    pub cache_dir: PathBuf,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let base = dir.path().join("www");
        let cache_dir = dir.path().join("cache");
        std::fs::create_dir_all(&base).unwrap();
        Self {
            _dir: dir,
            base,
            cache_dir,
        }
    }

    /// The temp root, one level above the base directory.
    pub fn root(&self) -> &Path {
        self.base.parent().unwrap()
    }

    pub fn write_jpeg(&self, name: &str, width: u32, height: u32) -> PathBuf {
        let path = self.base.join(name);
        RgbImage::from_pixel(width, height, Rgb([30, 120, 220]))
            .save_with_format(&path, ImageFormat::Jpeg)
            .unwrap();
        path
    }

    pub fn write_png(&self, name: &str, width: u32, height: u32) -> PathBuf {
        let path = self.base.join(name);
        RgbaImage::from_pixel(width, height, Rgba([200, 40, 40, 128]))
            .save_with_format(&path, ImageFormat::Png)
            .unwrap();
        path
    }

    pub fn cache(&self) -> ArtifactCache {
        ArtifactCache::new(CacheConfig::new(&self.cache_dir))
    }

    /// Local-only service with the disk cache enabled.
    pub fn service(&self) -> ThumbnailService {
        self.service_with(ServiceConfig::default())
    }

    pub fn service_with(&self, config: ServiceConfig) -> ThumbnailService {
        let local = Arc::new(LocalSource::new(&self.base).unwrap());
        let cache = self.cache();
        cache.ensure_directory_writable().unwrap();
        ThumbnailService::new(
            SourceResolver::local_only(local),
            Arc::new(RasterEngine::new()),
        )
        .unwrap()
        .with_config(config)
        .with_cache(cache)
    }

    pub fn router(&self) -> Router {
        router_for(self.service())
    }

    /// Cache entries currently on disk.
    pub fn cache_entries(&self) -> Vec<PathBuf> {
        let Ok(entries) = std::fs::read_dir(&self.cache_dir) else {
            return Vec::new();
        };
        entries
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.to_string_lossy().ends_with(DEFAULT_CACHE_SUFFIX))
            .collect()
    }
}

// =============================================================================
// Request Helpers
// =============================================================================

pub fn test_router_config() -> RouterConfig {
    RouterConfig::new().with_tracing(false)
}

pub fn router_for(service: ThumbnailService) -> Router {
    create_router(service, RenderDefaults::default(), test_router_config())
}

pub async fn get(router: &Router, uri: &str) -> Response<Body> {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    router.clone().oneshot(request).await.unwrap()
}

pub async fn get_with_headers(
    router: &Router,
    uri: &str,
    headers: &[(&str, &str)],
) -> Response<Body> {
    let mut builder = Request::builder().uri(uri);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    router
        .clone()
        .oneshot(builder.body(Body::empty()).unwrap())
        .await
        .unwrap()
}

pub async fn body_bytes(response: Response<Body>) -> Bytes {
    response.into_body().collect().await.unwrap().to_bytes()
}

pub fn header<'a>(response: &'a Response<Body>, name: &str) -> Option<&'a str> {
    response.headers().get(name).and_then(|v| v.to_str().ok())
}

/// Decoded image dimensions.
pub fn dimensions(data: &[u8]) -> (u32, u32) {
    image::load_from_memory(data).unwrap().dimensions()
}

pub fn is_valid_jpeg(data: &[u8]) -> bool {
    data.len() > 4 && data[0..2] == [0xFF, 0xD8] && data[data.len() - 2..] == [0xFF, 0xD9]
}
