//! Edge proxy integration tests.
//!
//! Tests verify:
//! - Cache hits, misses and fallback images
//! - Size-bounded eviction
//! - The control endpoint (stats, prefetch, clear)
//! - Versioned store cleanup on activation
//! - Manifest handling and pass-through forwarding

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::json;
use tower::ServiceExt;

use image_edge::edge::{
    CacheStorage, EdgeCacheConfig, MemoryCacheStorage, FALLBACK_IMAGE,
};

use super::test_utils::{
    body_bytes, body_json, edge, edge_with_storage, get, header, post_json, MockUpstream,
};

const IMAGE: &str = "/transcode?url=%2Fa.png&w=400&q=85&f=webp";

fn stats_request() -> Request<Body> {
    post_json("/__edge/control", json!({"type": "GET_CACHE_STATS"}))
}

// =============================================================================
// Image Caching
// =============================================================================

#[tokio::test]
async fn test_second_request_is_served_from_cache() {
    let upstream = Arc::new(MockUpstream::new().with_image(IMAGE, "webp-bytes"));
    let edge = edge(EdgeCacheConfig::default(), upstream.clone()).await;

    let first = edge.router.clone().oneshot(get(IMAGE)).await.unwrap();
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(header(&first, "x-edge-cache"), Some("miss"));
    let first_body = body_bytes(first).await;

    let second = edge.router.clone().oneshot(get(IMAGE)).await.unwrap();
    assert_eq!(second.status(), StatusCode::OK);
    assert_eq!(header(&second, "x-edge-cache"), Some("hit"));
    assert_eq!(header(&second, "content-type"), Some("image/webp"));
    let second_body = body_bytes(second).await;

    assert_eq!(first_body, second_body);
    assert_eq!(&second_body[..], b"webp-bytes");
    assert_eq!(upstream.image_calls(), 1);
}

#[tokio::test]
async fn test_timeout_serves_fallback_image() {
    let upstream = Arc::new(
        MockUpstream::new()
            .with_image(IMAGE, "slow")
            .with_delay(Duration::from_millis(500)),
    );
    let config = EdgeCacheConfig {
        fetch_timeout: Duration::from_millis(50),
        ..EdgeCacheConfig::default()
    };
    let edge = edge(config, upstream).await;

    let response = edge.router.clone().oneshot(get(IMAGE)).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header(&response, "content-type"), Some("image/png"));
    assert_eq!(header(&response, "x-fallback-image"), Some("true"));
    assert_eq!(header(&response, "cache-control"), Some("no-store"));
    assert_eq!(header(&response, "x-edge-cache"), Some("fallback"));
    assert_eq!(&body_bytes(response).await[..], FALLBACK_IMAGE);

    // Nothing was cached
    let stats = body_json(edge.router.clone().oneshot(stats_request()).await.unwrap()).await;
    assert_eq!(stats["imageCount"], 0);
}

#[tokio::test]
async fn test_unreachable_or_failing_origin_serves_fallback() {
    let upstream = Arc::new(MockUpstream::new().with_route(
        "/transcode?url=%2Fbroken.png&w=400",
        StatusCode::INTERNAL_SERVER_ERROR,
        "text/plain",
        "boom",
    ));
    let edge = edge(EdgeCacheConfig::default(), upstream).await;

    for uri in ["/transcode?url=%2Fbroken.png&w=400", "/transcode?url=%2Fmissing.png&w=400"] {
        let response = edge.router.clone().oneshot(get(uri)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK, "{}", uri);
        assert_eq!(header(&response, "x-fallback-image"), Some("true"), "{}", uri);
    }
}

#[tokio::test]
async fn test_size_ceiling_evicts_oldest_entries() {
    let mut upstream = MockUpstream::new();
    for i in 0..12 {
        upstream = upstream.with_image(&format!("/transcode?url=%2F{}.png&w=100", i), vec![b'x'; 100]);
    }
    let upstream = Arc::new(upstream);
    let config = EdgeCacheConfig {
        max_size: 1000,
        ..EdgeCacheConfig::default()
    };
    let edge = edge(config, upstream.clone()).await;

    for i in 0..12 {
        let uri = format!("/transcode?url=%2F{}.png&w=100", i);
        let response = edge.router.clone().oneshot(get(&uri)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    // The 11th image pushed the store to 1100 bytes: the oldest quarter
    // (3 entries) went, then the 12th brought it back to 900.
    let stats = body_json(edge.router.clone().oneshot(stats_request()).await.unwrap()).await;
    assert_eq!(stats["imageCount"], 9);
    assert_eq!(stats["totalSize"], 900);
    assert_eq!(stats["utilization"], "90.00%");

    // The oldest entry is gone, the newest is still cached
    let response = edge
        .router
        .clone()
        .oneshot(get("/transcode?url=%2F11.png&w=100"))
        .await
        .unwrap();
    assert_eq!(header(&response, "x-edge-cache"), Some("hit"));

    let response = edge
        .router
        .clone()
        .oneshot(get("/transcode?url=%2F0.png&w=100"))
        .await
        .unwrap();
    assert_eq!(header(&response, "x-edge-cache"), Some("miss"));
    assert_eq!(upstream.image_calls(), 13);
}

// =============================================================================
// Control Endpoint
// =============================================================================

#[tokio::test]
async fn test_stats_on_empty_store() {
    let edge = edge(EdgeCacheConfig::default(), Arc::new(MockUpstream::new())).await;

    let response = edge.router.clone().oneshot(stats_request()).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(
        json,
        json!({
            "imageCount": 0,
            "totalSize": 0,
            "maxSize": 104857600,
            "utilization": "0.00%"
        })
    );
}

#[tokio::test]
async fn test_invalid_control_message() {
    let edge = edge(EdgeCacheConfig::default(), Arc::new(MockUpstream::new())).await;

    let response = edge
        .router
        .clone()
        .oneshot(post_json("/__edge/control", json!({"type": "REBOOT"})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "invalid_control_message");
}

#[tokio::test]
async fn test_prefetch_skipped_on_slow_connection() {
    let upstream = Arc::new(
        MockUpstream::new()
            .with_image("/transcode?url=%2Fa.png&w=100", "a")
            .with_image("/transcode?url=%2Fb.png&w=100", "b")
            .with_route("/index.html", StatusCode::OK, "text/html", "<html></html>"),
    );
    let edge = edge(EdgeCacheConfig::default(), upstream.clone()).await;

    // Any proxied request carrying network hints updates the edge's view
    let request = Request::builder()
        .uri("/index.html")
        .header("ect", "2g")
        .body(Body::empty())
        .unwrap();
    let response = edge.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let urls = json!(["/transcode?url=%2Fa.png&w=100", "/transcode?url=%2Fb.png&w=100"]);
    let response = edge
        .router
        .clone()
        .oneshot(post_json(
            "/__edge/control",
            json!({"type": "PREFETCH_IMAGES", "data": {"urls": urls, "priority": "low"}}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let report = body_json(response).await;
    assert_eq!(report["requested"], 2);
    assert_eq!(report["skipped"], 2);
    assert_eq!(report["fetched"], 0);
    assert_eq!(upstream.image_calls(), 0);

    // High priority goes through regardless
    let response = edge
        .router
        .clone()
        .oneshot(post_json(
            "/__edge/control",
            json!({"type": "PREFETCH_IMAGES", "data": {"urls": urls, "priority": "high"}}),
        ))
        .await
        .unwrap();
    let report = body_json(response).await;
    assert_eq!(report["fetched"], 2);
    assert_eq!(report["skipped"], 0);
    assert_eq!(upstream.image_calls(), 2);
}

#[tokio::test]
async fn test_preload_then_clear() {
    let upstream = Arc::new(
        MockUpstream::new()
            .with_image("/transcode?url=%2Fhero.png&w=1200", vec![b'h'; 40])
            .with_image("/transcode?url=%2Flogo.png&w=200", vec![b'l'; 10]),
    );
    let edge = edge(EdgeCacheConfig::default(), upstream).await;

    let response = edge
        .router
        .clone()
        .oneshot(post_json(
            "/__edge/control",
            json!({
                "type": "PRELOAD_CRITICAL",
                "data": {"images": ["/transcode?url=%2Fhero.png&w=1200", "/transcode?url=%2Flogo.png&w=200"]}
            }),
        ))
        .await
        .unwrap();
    let report = body_json(response).await;
    assert_eq!(report["fetched"], 2);

    let stats = body_json(edge.router.clone().oneshot(stats_request()).await.unwrap()).await;
    assert_eq!(stats["imageCount"], 2);
    assert_eq!(stats["totalSize"], 50);

    let response = edge
        .router
        .clone()
        .oneshot(post_json("/__edge/control", json!({"type": "CLEAR_IMAGE_CACHE"})))
        .await
        .unwrap();
    assert_eq!(body_json(response).await, json!({"cleared": true}));

    let stats = body_json(edge.router.clone().oneshot(stats_request()).await.unwrap()).await;
    assert_eq!(stats["imageCount"], 0);
    assert_eq!(stats["totalSize"], 0);
}

// =============================================================================
// Versioning
// =============================================================================

#[tokio::test]
async fn test_new_version_deletes_previous_stores() {
    let storage = Arc::new(MemoryCacheStorage::new());
    let upstream = Arc::new(MockUpstream::new().with_image(IMAGE, "v1-bytes"));

    let v1 = edge_with_storage(EdgeCacheConfig::default(), upstream.clone(), storage.clone()).await;
    v1.router.clone().oneshot(get(IMAGE)).await.unwrap();

    let v2_config = EdgeCacheConfig {
        version: "v2".to_string(),
        ..EdgeCacheConfig::default()
    };
    let v2 = edge_with_storage(v2_config, upstream.clone(), storage.clone()).await;

    let names = storage.names().await.unwrap();
    assert!(names.contains(&"image-cache-images-v2".to_string()));
    assert!(!names.contains(&"image-cache-images-v1".to_string()));

    // The v1 entry is gone: the new version fetches again
    let response = v2.router.clone().oneshot(get(IMAGE)).await.unwrap();
    assert_eq!(header(&response, "x-edge-cache"), Some("miss"));
    assert_eq!(upstream.image_calls(), 2);
}

// =============================================================================
// Manifest and Pass-Through
// =============================================================================

#[tokio::test]
async fn test_manifest_is_cached() {
    let upstream = Arc::new(MockUpstream::new().with_route(
        "/image-manifest.json",
        StatusCode::OK,
        "application/json",
        r#"{"images":[]}"#,
    ));
    let edge = edge(EdgeCacheConfig::default(), upstream).await;

    let first = edge
        .router
        .clone()
        .oneshot(get("/image-manifest.json"))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(&body_bytes(first).await[..], br#"{"images":[]}"#);

    let second = edge
        .router
        .clone()
        .oneshot(get("/image-manifest.json"))
        .await
        .unwrap();
    assert_eq!(header(&second, "x-edge-cache"), Some("hit"));
    assert_eq!(header(&second, "content-type"), Some("application/json"));
}

#[tokio::test]
async fn test_manifest_errors() {
    let upstream = Arc::new(MockUpstream::new().with_route(
        "/assets/image-manifest.json",
        StatusCode::NOT_FOUND,
        "text/plain",
        "nope",
    ));
    let edge = edge(EdgeCacheConfig::default(), upstream).await;

    let response = edge
        .router
        .clone()
        .oneshot(get("/assets/image-manifest.json"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    // Unreachable origin
    let response = edge
        .router
        .clone()
        .oneshot(get("/other/image-manifest.json"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_other_requests_pass_through() {
    let upstream = Arc::new(
        MockUpstream::new()
            .with_route("/index.html", StatusCode::OK, "text/html", "<html></html>")
            .with_image(IMAGE, "posted"),
    );
    let edge = edge(EdgeCacheConfig::default(), upstream.clone()).await;

    let response = edge.router.clone().oneshot(get("/index.html")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(header(&response, "x-edge-cache").is_none());
    assert_eq!(&body_bytes(response).await[..], b"<html></html>");

    // Non-GET image requests are forwarded, not cached
    let request = Request::builder()
        .method("POST")
        .uri(IMAGE)
        .body(Body::from("payload"))
        .unwrap();
    let response = edge.router.clone().oneshot(request).await.unwrap();
    assert!(header(&response, "x-edge-cache").is_none());
    assert!(upstream.methods().contains(&"POST".to_string()));

    let stats = body_json(edge.router.clone().oneshot(stats_request()).await.unwrap()).await;
    assert_eq!(stats["imageCount"], 0);
}

#[tokio::test]
async fn test_scheme_relative_paths_are_never_proxied() {
    let upstream = Arc::new(
        MockUpstream::new()
            .with_image("/transcode?x", "foreign")
            .with_route("/index.html", StatusCode::OK, "text/html", "<html></html>"),
    );
    let edge = edge(EdgeCacheConfig::default(), upstream.clone()).await;

    for uri in ["//evil.test/transcode?x", "//evil.test/index.html"] {
        let response = edge.router.clone().oneshot(get(uri)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{}", uri);
        assert_eq!(body_json(response).await["error"], "invalid_url");
    }
    assert_eq!(upstream.image_calls(), 0);

    let stats = body_json(edge.router.clone().oneshot(stats_request()).await.unwrap()).await;
    assert_eq!(stats["imageCount"], 0);
}

#[tokio::test]
async fn test_control_messages_only_warm_origin_images() {
    let upstream = Arc::new(MockUpstream::new().with_image("/transcode?url=%2Fa.png&w=100", "a"));
    let edge = edge(EdgeCacheConfig::default(), upstream.clone()).await;

    let response = edge
        .router
        .clone()
        .oneshot(post_json(
            "/__edge/control",
            json!({
                "type": "PREFETCH_IMAGES",
                "data": {
                    "urls": ["http://evil.test/transcode?url=%2Fa.png&w=100", "/index.html"],
                    "priority": "high"
                }
            }),
        ))
        .await
        .unwrap();
    let report = body_json(response).await;
    assert_eq!(report["failed"], 2);
    assert_eq!(report["fetched"], 0);

    let response = edge
        .router
        .clone()
        .oneshot(post_json(
            "/__edge/control",
            json!({
                "type": "PRELOAD_CRITICAL",
                "data": {"images": ["//evil.test/transcode?url=%2Fa.png&w=100", "/transcode?url=%2Fa.png&w=100"]}
            }),
        ))
        .await
        .unwrap();
    let report = body_json(response).await;
    assert_eq!(report["failed"], 1);
    assert_eq!(report["fetched"], 1);
    assert_eq!(upstream.image_calls(), 1);
}

#[tokio::test]
async fn test_unreachable_origin_on_pass_through_is_bad_gateway() {
    let edge = edge(EdgeCacheConfig::default(), Arc::new(MockUpstream::new())).await;

    let response = edge.router.clone().oneshot(get("/index.html")).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn test_edge_health() {
    let edge = edge(EdgeCacheConfig::default(), Arc::new(MockUpstream::new())).await;

    let response = edge.router.clone().oneshot(get("/__edge/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["active"], true);
    assert!(edge.manager.is_active());
}
