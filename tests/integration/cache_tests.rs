//! Disk cache integration tests.
//!
//! Tests verify:
//! - Cache hits after the first render
//! - Regeneration when the source is newer than the entry
//! - One complete entry under concurrent writers
//! - Filename templates and expiry sweeps

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use axum::http::StatusCode;

use imthumb::cache::{ArtifactCache, CacheConfig, SWEEP_MARKER};
use imthumb::params::{ParameterSet, RenderDefaults};
use imthumb::service::ThumbnailService;
use imthumb::source::{LocalSource, SourceResolver};
use imthumb::transform::RasterEngine;

use super::test_utils::{body_bytes, dimensions, get, header, router_for, Fixture};

fn set_mtime(path: &std::path::Path, at: SystemTime) {
    std::fs::File::options()
        .write(true)
        .open(path)
        .unwrap()
        .set_modified(at)
        .unwrap();
}

fn params(pairs: &[(&str, &str)]) -> ParameterSet {
    ParameterSet::from_pairs(pairs.iter().copied(), &RenderDefaults::default())
}

#[tokio::test]
async fn test_stale_entry_is_regenerated() {
    let fixture = Fixture::new();
    fixture.write_jpeg("photo.jpg", 200, 200);
    let router = fixture.router();

    let first = get(&router, "/?src=photo.jpg&w=50").await;
    assert_eq!(header(&first, "x-cache"), Some("MISS"));

    let entries = fixture.cache_entries();
    assert_eq!(entries.len(), 1);
    set_mtime(&entries[0], SystemTime::now() - Duration::from_secs(3600));

    let second = get(&router, "/?src=photo.jpg&w=50").await;
    assert_eq!(header(&second, "x-cache"), Some("MISS"));

    let third = get(&router, "/?src=photo.jpg&w=50").await;
    assert_eq!(header(&third, "x-cache"), Some("HIT"));
    assert_eq!(fixture.cache_entries().len(), 1);
}

#[tokio::test]
async fn test_parameters_select_entries() {
    let fixture = Fixture::new();
    fixture.write_jpeg("photo.jpg", 200, 200);
    let router = fixture.router();

    get(&router, "/?src=photo.jpg&w=50&q=80").await;
    get(&router, "/?src=photo.jpg&w=60&q=80").await;
    assert_eq!(fixture.cache_entries().len(), 2);

    // Same parameters in a different order hit the same entry.
    let reordered = get(&router, "/?q=80&w=50&src=photo.jpg").await;
    assert_eq!(header(&reordered, "x-cache"), Some("HIT"));
    assert_eq!(fixture.cache_entries().len(), 2);
}

#[tokio::test]
async fn test_concurrent_requests_for_same_thumbnail() {
    let fixture = Fixture::new();
    fixture.write_jpeg("photo.jpg", 800, 600);
    let router = Arc::new(fixture.router());

    let mut handles = Vec::new();
    for _ in 0..8 {
        let router = Arc::clone(&router);
        handles.push(tokio::spawn(async move {
            let response = get(&router, "/?src=photo.jpg&w=120&h=90&zc=1").await;
            assert_eq!(response.status(), StatusCode::OK);
            body_bytes(response).await
        }));
    }

    let mut bodies = Vec::new();
    for handle in handles {
        bodies.push(handle.await.unwrap());
    }
    assert!(bodies.windows(2).all(|pair| pair[0] == pair[1]));
    assert_eq!(dimensions(&bodies[0]), (120, 90));

    let entries = fixture.cache_entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(std::fs::read(&entries[0]).unwrap(), bodies[0].to_vec());

    // No temporary or lock files are left behind.
    let leftovers: Vec<_> = std::fs::read_dir(&fixture.cache_dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|name| name.starts_with("imthumb_tmpimg_") || name.ends_with(".lock"))
        .collect();
    assert!(leftovers.is_empty(), "leftover files: {:?}", leftovers);
}

#[tokio::test]
async fn test_filename_template() {
    let fixture = Fixture::new();
    fixture.write_jpeg("photo.jpg", 200, 200);

    let cache = ArtifactCache::new(
        CacheConfig::new(&fixture.cache_dir).with_filename_template("%filename%-%w%x%h%-zc%zc%.%ext%"),
    );
    cache.ensure_directory_writable().unwrap();
    let service = ThumbnailService::new(
        SourceResolver::local_only(Arc::new(LocalSource::new(&fixture.base).unwrap())),
        Arc::new(RasterEngine::new()),
    )
    .unwrap()
    .with_cache(cache);
    let router = router_for(service);

    let response = get(&router, "/?src=photo.jpg&w=40&h=30&zc=3").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(fixture.cache_dir.join("photo-40x30-zc3.jpg").is_file());

    let again = get(&router, "/?src=photo.jpg&w=40&h=30&zc=3").await;
    assert_eq!(header(&again, "x-cache"), Some("HIT"));
}

#[test]
fn test_sweep_removes_only_expired_entries() {
    let fixture = Fixture::new();
    let cache = ArtifactCache::new(
        CacheConfig::new(&fixture.cache_dir)
            .with_max_age(Duration::from_secs(600))
            .with_sweep_interval(Duration::from_secs(60)),
    );
    cache.ensure_directory_writable().unwrap();

    // The first call only records the sweep time.
    assert_eq!(cache.sweep_expired().unwrap(), None);
    assert_eq!(cache.sweep_expired().unwrap(), None);

    let old = params(&[("src", "old.jpg")]);
    let fresh = params(&[("src", "fresh.jpg")]);
    let old_path = cache.write(&old, b"old").unwrap();
    let fresh_path = cache.write(&fresh, b"fresh").unwrap();
    let unrelated = fixture.cache_dir.join("notes.txt");
    std::fs::write(&unrelated, b"keep").unwrap();

    let long_ago = SystemTime::now() - Duration::from_secs(7200);
    set_mtime(&old_path, long_ago);
    set_mtime(&unrelated, long_ago);
    set_mtime(&fixture.cache_dir.join(SWEEP_MARKER), long_ago);

    assert_eq!(cache.sweep_expired().unwrap(), Some(1));
    assert!(!old_path.exists());
    assert!(fresh_path.exists());
    assert!(unrelated.exists());
}
