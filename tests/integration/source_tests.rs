//! Source resolution integration tests.
//!
//! Tests verify:
//! - Local sources cannot escape the base directory
//! - Remote sources are fetched only when a rule permits them

use std::sync::Arc;

use axum::http::StatusCode;
use axum::routing::get as get_route;
use axum::Router;
use image::{ImageFormat, Rgb, RgbImage};

use imthumb::service::ThumbnailService;
use imthumb::source::{HttpSource, HttpSourceConfig, LocalSource, SourceResolverBuilder};
use imthumb::transform::RasterEngine;

use super::test_utils::{body_bytes, dimensions, get, header, router_for, Fixture};

// =============================================================================
// Local Containment
// =============================================================================

#[tokio::test]
async fn test_parent_traversal_is_not_found() {
    let fixture = Fixture::new();
    RgbImage::from_pixel(20, 20, Rgb([0, 0, 0]))
        .save_with_format(fixture.root().join("secret.jpg"), ImageFormat::Jpeg)
        .unwrap();
    let router = fixture.router();

    let response = get(&router, "/?src=../secret.jpg&w=30&h=30").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let outside = fixture.root().join("secret.jpg");
    let uri = format!("/?src={}&w=30&h=30", outside.display());
    let response = get(&router, &uri).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert!(fixture.cache_entries().is_empty());
}

#[tokio::test]
async fn test_absolute_path_inside_base_is_served() {
    let fixture = Fixture::new();
    let path = fixture.write_jpeg("inside.jpg", 80, 80);
    let router = fixture.router();

    let canonical = path.canonicalize().unwrap();
    let uri = format!("/?src={}&w=40&h=40", canonical.display());
    let response = get(&router, &uri).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(dimensions(&body_bytes(response).await), (40, 40));
}

#[tokio::test]
async fn test_remote_source_refused_without_rule() {
    let fixture = Fixture::new();
    let router = fixture.router();

    let response = get(&router, "/?src=http://example.com/a.jpg&w=20&h=20").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// =============================================================================
// Remote Sources
// =============================================================================

async fn spawn_origin() -> String {
    let mut png = Vec::new();
    RgbImage::from_pixel(60, 40, Rgb([250, 10, 10]))
        .write_to(&mut std::io::Cursor::new(&mut png), ImageFormat::Png)
        .unwrap();

    let app = Router::new().route(
        "/pic.png",
        get_route(move || {
            let png = png.clone();
            async move { png }
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

fn remote_service(fixture: &Fixture, allowed_sites: &[&str], allow_all: bool) -> ThumbnailService {
    let local = Arc::new(LocalSource::new(&fixture.base).unwrap());
    let http = Arc::new(
        HttpSource::new(HttpSourceConfig::new(&fixture.cache_dir, 1024 * 1024)).unwrap(),
    );
    let resolver = SourceResolverBuilder::new(local)
        .with_http(http)
        .with_allowed_sites(allowed_sites.iter().copied())
        .allow_external(true)
        .allow_all_external(allow_all)
        .build()
        .unwrap();

    let cache = fixture.cache();
    cache.ensure_directory_writable().unwrap();
    ThumbnailService::new(resolver, Arc::new(RasterEngine::new()))
        .unwrap()
        .with_cache(cache)
}

#[tokio::test]
async fn test_remote_source_fetched_when_allowed() {
    let fixture = Fixture::new();
    let origin = spawn_origin().await;
    let router = router_for(remote_service(&fixture, &[], true));

    let uri = format!("/?src={}/pic.png&w=30", origin);
    let response = get(&router, &uri).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header(&response, "content-type"), Some("image/png"));
    assert_eq!(dimensions(&body_bytes(response).await), (30, 20));

    let again = get(&router, &uri).await;
    assert_eq!(header(&again, "x-cache"), Some("HIT"));
}

#[tokio::test]
async fn test_remote_source_outside_allowed_sites() {
    let fixture = Fixture::new();
    let origin = spawn_origin().await;
    let router = router_for(remote_service(&fixture, &["example.org"], false));

    let uri = format!("/?src={}/pic.png&w=30&h=30", origin);
    let response = get(&router, &uri).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(
        header(&response, "x-imthumb-error"),
        None,
        "fallback responses carry no error header"
    );
}

#[tokio::test]
async fn test_remote_missing_image_is_not_found() {
    let fixture = Fixture::new();
    let origin = spawn_origin().await;
    let router = router_for(remote_service(&fixture, &[], true));

    let uri = format!("/?src={}/missing.png&w=30&h=30", origin);
    let response = get(&router, &uri).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(dimensions(&body_bytes(response).await), (30, 30));
}
