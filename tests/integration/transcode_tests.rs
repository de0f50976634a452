//! Transcode endpoint integration tests.
//!
//! Tests verify:
//! - Output formats and adaptive width/quality
//! - Response headers (caching, security, image metadata)
//! - Validation errors and missing sources
//! - HEAD, OPTIONS and conditional requests

use axum::body::Body;
use axum::http::{Request, StatusCode};
use tower::ServiceExt;

use super::test_utils::{
    asset_dir, body_bytes, body_json, get, header, is_avif, is_jpeg, is_webp, transcode_router,
};

// =============================================================================
// Successful Transcodes
// =============================================================================

#[tokio::test]
async fn test_transcode_default_webp() {
    let dir = asset_dir();
    let router = transcode_router(&dir);

    let response = router
        .oneshot(get("/transcode?url=/a.png&w=32"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header(&response, "content-type"), Some("image/webp"));
    assert_eq!(header(&response, "x-image-width"), Some("32"));
    assert_eq!(header(&response, "x-image-quality"), Some("85"));
    assert_eq!(header(&response, "x-image-format"), Some("webp"));
    assert_eq!(
        header(&response, "cache-control"),
        Some("public, max-age=31536000, immutable")
    );
    assert_eq!(
        header(&response, "vary"),
        Some("Accept, DPR, Viewport-Width, Width, Save-Data")
    );
    assert_eq!(header(&response, "x-content-type-options"), Some("nosniff"));
    assert!(header(&response, "content-security-policy")
        .unwrap()
        .contains("default-src 'none'"));
    assert!(header(&response, "etag").unwrap().starts_with('"'));
    assert!(header(&response, "save-data").is_none());

    let content_length: usize = header(&response, "content-length").unwrap().parse().unwrap();
    let body = body_bytes(response).await;
    assert_eq!(body.len(), content_length);
    assert!(is_webp(&body));
}

#[tokio::test]
async fn test_transcode_avif_with_dpr() {
    let dir = asset_dir();
    let router = transcode_router(&dir);

    let response = router
        .oneshot(get("/transcode?url=/a.png&w=400&q=90&f=avif&dpr=2"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header(&response, "content-type"), Some("image/avif"));
    assert_eq!(header(&response, "x-image-width"), Some("800"));
    assert_eq!(header(&response, "x-image-quality"), Some("80"));
    assert_eq!(header(&response, "x-image-format"), Some("avif"));

    let body = body_bytes(response).await;
    assert!(is_avif(&body));
}

#[tokio::test]
async fn test_transcode_progressive_jpeg() {
    let dir = asset_dir();
    let router = transcode_router(&dir);

    let response = router
        .oneshot(get("/transcode?url=/photos/b.png&w=16&f=jpeg&q=70"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header(&response, "content-type"), Some("image/jpeg"));
    assert_eq!(header(&response, "x-image-format"), Some("jpg"));
    assert_eq!(header(&response, "x-image-quality"), Some("70"));

    let body = body_bytes(response).await;
    assert!(is_jpeg(&body));
    // SOF2 marker: progressive DCT
    assert!(body.windows(2).any(|w| w == [0xFF, 0xC2]));
}

#[tokio::test]
async fn test_unknown_format_falls_back_to_jpeg() {
    let dir = asset_dir();
    let router = transcode_router(&dir);

    let response = router
        .oneshot(get("/transcode?url=/a.png&w=32&f=bmp"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header(&response, "content-type"), Some("image/jpeg"));
}

#[tokio::test]
async fn test_jxl_is_delivered_as_webp() {
    let dir = asset_dir();
    let router = transcode_router(&dir);

    let response = router
        .oneshot(get("/transcode?url=/a.png&w=32&f=jxl"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header(&response, "content-type"), Some("image/webp"));
    assert_eq!(header(&response, "x-format-substituted"), Some("jxl->webp"));

    let body = body_bytes(response).await;
    assert!(is_webp(&body));
}

// =============================================================================
// Adaptive Quality
// =============================================================================

#[tokio::test]
async fn test_save_data_header_caps_quality() {
    let dir = asset_dir();
    let router = transcode_router(&dir);

    let request = Request::builder()
        .uri("/transcode?url=/a.png&w=32&q=90")
        .header("save-data", "on")
        .body(Body::empty())
        .unwrap();
    let response = router.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header(&response, "x-image-quality"), Some("40"));
    assert_eq!(header(&response, "save-data"), Some("on"));
}

#[tokio::test]
async fn test_save_data_query_flag_caps_quality() {
    let dir = asset_dir();
    let router = transcode_router(&dir);

    let response = router
        .oneshot(get("/transcode?url=/a.png&w=32&q=90&save-data=1"))
        .await
        .unwrap();

    assert_eq!(header(&response, "x-image-quality"), Some("40"));
    assert_eq!(header(&response, "save-data"), Some("on"));
}

#[tokio::test]
async fn test_hint_headers_adjust_quality() {
    let dir = asset_dir();

    let cases = [
        ("dpr", "2", "75"),
        ("viewport-width", "390", "80"),
        ("sec-ch-ua-mobile", "?1", "75"),
    ];

    for (name, value, expected) in cases {
        let request = Request::builder()
            .uri("/transcode?url=/a.png&w=32&q=85")
            .header(name, value)
            .body(Body::empty())
            .unwrap();
        let response = transcode_router(&dir).oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK, "{}: {}", name, value);
        assert_eq!(
            header(&response, "x-image-quality"),
            Some(expected),
            "{}: {}",
            name,
            value
        );
        // Header DPR never changes the rendered width
        assert_eq!(header(&response, "x-image-width"), Some("32"));
    }
}

// =============================================================================
// Errors
// =============================================================================

#[tokio::test]
async fn test_invalid_width_is_rejected() {
    let dir = asset_dir();

    for uri in ["/transcode?url=/a.png&w=0", "/transcode?url=/a.png&w=5000"] {
        let response = transcode_router(&dir).oneshot(get(uri)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{}", uri);

        let json = body_json(response).await;
        assert_eq!(json["error"], "invalid_width");
    }
}

#[tokio::test]
async fn test_invalid_quality_and_dpr_are_rejected() {
    let dir = asset_dir();

    for (uri, error) in [
        ("/transcode?url=/a.png&q=0", "invalid_quality"),
        ("/transcode?url=/a.png&q=101", "invalid_quality"),
        ("/transcode?url=/a.png&dpr=0", "invalid_dpr"),
        ("/transcode?url=/a.png&dpr=9", "invalid_dpr"),
        ("/transcode?url=/a.png&w=wide", "invalid_parameter"),
    ] {
        let response = transcode_router(&dir).oneshot(get(uri)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{}", uri);
        assert_eq!(body_json(response).await["error"], error, "{}", uri);
    }
}

#[tokio::test]
async fn test_missing_url_is_rejected() {
    let dir = asset_dir();

    for uri in ["/transcode?w=100", "/transcode?url=&w=100"] {
        let response = transcode_router(&dir).oneshot(get(uri)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{}", uri);
        assert_eq!(body_json(response).await["error"], "missing_source");
    }
}

#[tokio::test]
async fn test_missing_source_is_not_found() {
    let dir = asset_dir();
    let router = transcode_router(&dir);

    let response = router
        .oneshot(get("/transcode?url=/missing.png&w=100"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["error"], "not_found");
}

#[tokio::test]
async fn test_path_traversal_is_rejected() {
    let dir = asset_dir();
    let router = transcode_router(&dir);

    let response = router
        .oneshot(get("/transcode?url=../etc/passwd&w=100"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "invalid_source");
}

#[tokio::test]
async fn test_undecodable_source_is_server_error() {
    let dir = asset_dir();
    let router = transcode_router(&dir);

    let response = router
        .oneshot(get("/transcode?url=/notes.txt&w=100"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body_json(response).await["error"], "decode_error");
}

// =============================================================================
// Methods and Conditional Requests
// =============================================================================

#[tokio::test]
async fn test_head_returns_headers_only() {
    let dir = asset_dir();
    let router = transcode_router(&dir);

    let request = Request::builder()
        .method("HEAD")
        .uri("/transcode?url=/a.png&w=32")
        .body(Body::empty())
        .unwrap();
    let response = router.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header(&response, "content-type"), Some("image/webp"));
    assert!(body_bytes(response).await.is_empty());
}

#[tokio::test]
async fn test_options_lists_allowed_methods() {
    let dir = asset_dir();
    let router = transcode_router(&dir);

    let request = Request::builder()
        .method("OPTIONS")
        .uri("/transcode")
        .body(Body::empty())
        .unwrap();
    let response = router.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(header(&response, "allow"), Some("GET, HEAD, OPTIONS"));
    assert_eq!(header(&response, "cache-control"), Some("public, max-age=86400"));
}

#[tokio::test]
async fn test_options_outside_transcode_route_is_untouched() {
    let dir = asset_dir();

    for uri in ["/health", "/unknown"] {
        let request = Request::builder()
            .method("OPTIONS")
            .uri(uri)
            .body(Body::empty())
            .unwrap();
        let response = transcode_router(&dir).oneshot(request).await.unwrap();

        assert_ne!(response.status(), StatusCode::NO_CONTENT, "{}", uri);
        assert_ne!(header(&response, "allow"), Some("GET, HEAD, OPTIONS"), "{}", uri);
        assert!(header(&response, "cache-control").is_none(), "{}", uri);
    }
}

#[tokio::test]
async fn test_matching_etag_returns_not_modified() {
    let dir = asset_dir();

    let response = transcode_router(&dir)
        .oneshot(get("/transcode?url=/a.png&w=32"))
        .await
        .unwrap();
    let etag = header(&response, "etag").unwrap().to_string();

    let request = Request::builder()
        .uri("/transcode?url=/a.png&w=32")
        .header("if-none-match", etag.as_str())
        .body(Body::empty())
        .unwrap();
    let response = transcode_router(&dir).oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::NOT_MODIFIED);
    assert_eq!(header(&response, "etag"), Some(etag.as_str()));
    assert!(body_bytes(response).await.is_empty());
}

#[tokio::test]
async fn test_health() {
    let dir = asset_dir();
    let router = transcode_router(&dir);

    let response = router.oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["status"], "healthy");
}
