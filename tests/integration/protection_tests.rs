//! Rate limiting and leech protection tests.

use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;

use imthumb::service::{KeyedRateLimiter, ServiceConfig};

use super::test_utils::{body_bytes, get_with_headers, header, router_for, Fixture};

const GIF_MAGIC: &[u8] = b"GIF8";

#[tokio::test]
async fn test_rate_limited_requests_get_notice_image() {
    let fixture = Fixture::new();
    fixture.write_jpeg("photo.jpg", 100, 100);
    let limiter = KeyedRateLimiter::new(2, Duration::from_secs(60)).unwrap();
    let service = fixture.service().with_rate_limiter(Arc::new(limiter));
    let router = router_for(service);
    let client = [("x-forwarded-for", "203.0.113.7")];

    for _ in 0..2 {
        let response = get_with_headers(&router, "/?src=photo.jpg&w=50", &client).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(header(&response, "content-type"), Some("image/jpeg"));
    }

    let limited = get_with_headers(&router, "/?src=photo.jpg&w=77", &client).await;
    assert_eq!(limited.status(), StatusCode::OK);
    assert_eq!(header(&limited, "content-type"), Some("image/gif"));
    assert_eq!(
        header(&limited, "cache-control"),
        Some("no-store, no-cache, must-revalidate, max-age=0")
    );
    assert!(header(&limited, "x-imthumb-error")
        .unwrap()
        .starts_with("Rate limit exceeded"));
    assert!(body_bytes(limited).await.starts_with(GIF_MAGIC));

    // Only the first render reached the cache.
    assert_eq!(fixture.cache_entries().len(), 1);

    // Other clients are unaffected.
    let other = get_with_headers(
        &router,
        "/?src=photo.jpg&w=50",
        &[("x-forwarded-for", "198.51.100.1")],
    )
    .await;
    assert_eq!(header(&other, "content-type"), Some("image/jpeg"));
}

#[tokio::test]
async fn test_external_referer_is_blocked() {
    let fixture = Fixture::new();
    fixture.write_jpeg("photo.jpg", 100, 100);
    let service = fixture.service_with(ServiceConfig::default().with_leech_blocking(true));
    let router = router_for(service);

    let leech = get_with_headers(
        &router,
        "/?src=photo.jpg",
        &[("host", "images.example.com"), ("referer", "https://elsewhere.net/page")],
    )
    .await;
    assert_eq!(leech.status(), StatusCode::OK);
    assert_eq!(header(&leech, "content-type"), Some("image/gif"));
    assert_eq!(header(&leech, "pragma"), Some("no-cache"));
    assert!(body_bytes(leech).await.starts_with(GIF_MAGIC));
    assert!(fixture.cache_entries().is_empty());

    let same_site = get_with_headers(
        &router,
        "/?src=photo.jpg",
        &[
            ("host", "images.example.com"),
            ("referer", "http://images.example.com/gallery"),
        ],
    )
    .await;
    assert_eq!(header(&same_site, "content-type"), Some("image/jpeg"));
}
