//! API integration tests for thumbnail rendering and response headers.

use axum::http::StatusCode;

use imthumb::params::RenderDefaults;
use imthumb::server::create_router;
use imthumb::service::ServiceConfig;

use super::test_utils::{
    body_bytes, dimensions, get, get_with_headers, header, is_valid_jpeg, router_for,
    test_router_config, Fixture,
};

// =============================================================================
// Rendering
// =============================================================================

#[tokio::test]
async fn test_thumbnail_end_to_end() {
    let fixture = Fixture::new();
    fixture.write_jpeg("photo.jpg", 400, 200);
    let router = fixture.router();

    let uri = "/?src=photo.jpg&w=200&h=200&zc=2&cc=000000&ct=0";
    let response = get(&router, uri).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header(&response, "content-type"), Some("image/jpeg"));
    assert_eq!(header(&response, "accept-ranges"), Some("none"));
    assert_eq!(header(&response, "x-cache"), Some("MISS"));
    assert_eq!(header(&response, "x-img-cache"), Some("MISS"));
    assert!(header(&response, "last-modified").is_some());
    assert_eq!(
        header(&response, "cache-control"),
        Some("max-age=86400, must-revalidate")
    );
    assert!(header(&response, "expires").is_some());
    assert!(header(&response, "x-generator")
        .unwrap()
        .starts_with("ImThumb v"));

    let length: usize = header(&response, "content-length").unwrap().parse().unwrap();
    let body = body_bytes(response).await;
    assert_eq!(length, body.len());
    assert!(is_valid_jpeg(&body));
    assert_eq!(dimensions(&body), (200, 200));

    // 400x200 fits as 200x100, centred on a black canvas.
    let decoded = image::load_from_memory(&body).unwrap().to_rgb8();
    assert!(decoded.get_pixel(100, 10).0.iter().all(|c| *c < 40));
    assert!(decoded.get_pixel(100, 100).0[2] > 150);

    let again = get(&router, uri).await;
    assert_eq!(again.status(), StatusCode::OK);
    assert_eq!(header(&again, "x-cache"), Some("HIT"));
    assert_eq!(body_bytes(again).await, body);
}

#[tokio::test]
async fn test_thumb_path_and_png_output() {
    let fixture = Fixture::new();
    fixture.write_png("icon.png", 64, 64);
    let router = fixture.router();

    let response = get(&router, "/thumb?src=icon.png&w=32").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header(&response, "content-type"), Some("image/png"));

    let body = body_bytes(response).await;
    assert_eq!(dimensions(&body), (32, 32));
}

#[tokio::test]
async fn test_default_size_without_dimensions() {
    let fixture = Fixture::new();
    fixture.write_jpeg("photo.jpg", 300, 300);
    let router = fixture.router();

    let body = body_bytes(get(&router, "/?src=photo.jpg").await).await;
    assert_eq!(dimensions(&body), (100, 100));
}

// =============================================================================
// Fallbacks
// =============================================================================

#[tokio::test]
async fn test_missing_source_gets_generated_fallback() {
    let fixture = Fixture::new();
    let router = fixture.router();

    let response = get(&router, "/?src=missing.jpg&w=120&h=80").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(header(&response, "content-type"), Some("image/png"));

    let body = body_bytes(response).await;
    let decoded = image::load_from_memory(&body).unwrap().to_rgba8();
    assert_eq!(decoded.dimensions(), (120, 80));
    assert_eq!(decoded.get_pixel(60, 40).0[..3], [0xff, 0x77, 0x00]);
    assert!(fixture.cache_entries().is_empty());
}

#[tokio::test]
async fn test_missing_source_gets_configured_fallback() {
    let fixture = Fixture::new();
    let not_found = fixture.write_png("not-found.png", 50, 50);
    let service =
        fixture.service_with(ServiceConfig::default().with_not_found_image(not_found));
    let router = router_for(service);

    let response = get(&router, "/?src=missing.jpg&w=120&h=80").await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_bytes(response).await;
    assert_eq!(dimensions(&body), (120, 80));
}

#[tokio::test]
async fn test_invalid_filter_gets_error_image() {
    let fixture = Fixture::new();
    fixture.write_jpeg("photo.jpg", 100, 100);
    let router = fixture.router();

    let response = get(&router, "/?src=photo.jpg&w=40&h=40&f=99").await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(header(&response, "x-imthumb-error").is_some());

    let body = body_bytes(response).await;
    assert_eq!(dimensions(&body), (40, 40));
}

#[tokio::test]
async fn test_oversized_crop_rect_gets_error_image() {
    let fixture = Fixture::new();
    fixture.write_jpeg("photo.jpg", 10, 10);
    let router = fixture.router();

    let response = get(&router, "/?src=photo.jpg&w=40&h=40&cr=0,0,4294967295,4294967295").await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(header(&response, "x-imthumb-error")
        .unwrap()
        .contains("too large"));

    let body = body_bytes(response).await;
    assert_eq!(dimensions(&body), (40, 40));
    assert!(fixture.cache_entries().is_empty());
}

#[tokio::test]
async fn test_unrecoverable_error_is_json() {
    let fixture = Fixture::new();
    fixture.write_jpeg("photo.jpg", 100, 100);
    let broken = fixture.root().join("broken.png");
    std::fs::write(&broken, b"not an image").unwrap();
    let service = fixture.service_with(ServiceConfig::default().with_error_image(broken));
    let router = router_for(service);

    let response = get(&router, "/?src=photo.jpg&f=99").await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(header(&response, "x-imthumb-error").is_some());

    let body = body_bytes(response).await;
    let error: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(error["error"], "transform_error");
    assert_eq!(error["status"], 500);
}

// =============================================================================
// Headers
// =============================================================================

#[tokio::test]
async fn test_not_modified() {
    let fixture = Fixture::new();
    fixture.write_jpeg("photo.jpg", 100, 100);
    let router = fixture.router();

    let response = get_with_headers(
        &router,
        "/?src=photo.jpg",
        &[("if-modified-since", "Fri, 01 Jan 2100 00:00:00 GMT")],
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_MODIFIED);
    assert!(body_bytes(response).await.is_empty());

    let response = get_with_headers(
        &router,
        "/?src=photo.jpg",
        &[("if-modified-since", "Thu, 01 Jan 1970 00:00:00 GMT")],
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    // Unrepresentable timestamps are ignored.
    let response = get_with_headers(
        &router,
        "/?src=photo.jpg",
        &[("if-modified-since", "18446744073709551615")],
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_browser_cache_disabled() {
    let fixture = Fixture::new();
    fixture.write_jpeg("photo.jpg", 100, 100);
    let service = fixture.service_with(ServiceConfig::default().with_browser_cache(false));
    let router = router_for(service);

    let response = get_with_headers(
        &router,
        "/?src=photo.jpg",
        &[("if-modified-since", "Fri, 01 Jan 2100 00:00:00 GMT")],
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        header(&response, "cache-control"),
        Some("no-store, no-cache, must-revalidate, max-age=0")
    );
    assert_eq!(header(&response, "pragma"), Some("no-cache"));
}

#[tokio::test]
async fn test_silent_and_debug_headers() {
    let fixture = Fixture::new();
    fixture.write_jpeg("photo.jpg", 100, 100);

    let silent = create_router(
        fixture.service(),
        RenderDefaults::default(),
        test_router_config().with_silent(true).with_debug(true),
    );
    let response = get(&silent, "/?src=photo.jpg").await;
    assert!(header(&response, "x-generator").is_none());
    assert!(header(&response, "x-cache").is_none());
    assert!(header(&response, "x-generated-in").is_none());

    let debug = create_router(
        fixture.service(),
        RenderDefaults::default(),
        test_router_config().with_debug(true),
    );
    let response = get(&debug, "/?src=photo.jpg").await;
    let generated_in = header(&response, "x-generated-in").unwrap();
    assert!(generated_in.ends_with('s'));
}

#[tokio::test]
async fn test_health_endpoint() {
    let fixture = Fixture::new();
    let router = fixture.router();

    let response = get(&router, "/health").await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_bytes(response).await;
    let health: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(health["status"], "healthy");
    assert_eq!(health["version"], env!("CARGO_PKG_VERSION"));
}
