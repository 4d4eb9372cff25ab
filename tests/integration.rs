//! Integration tests for the Phoenix Guard HTTP API.
//!
//! Each test starts an in-memory server on an ephemeral port and uses reqwest
//! to exercise the endpoints.

use std::net::SocketAddr;

use axum::Router;
use axum::middleware::from_fn_with_state;
use axum::routing::post;
use reqwest::Client;
use serde_json::{Value, json};
use tokio::net::TcpListener;

use phoenix_guard::{AppState, BucketGuard, ServiceConfig, ServiceState, guard_middleware};
use phoenix_guard_service::bucket::Bucket;

const ADMIN_TOKEN: &str = "test-admin-token";

async fn serve_app(app: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    format!("http://{addr}")
}

/// Boots an in-memory server on an OS-assigned port.
/// Returns the base URL (e.g. "http://127.0.0.1:12345").
async fn spawn_server() -> String {
    spawn_server_with(&ServiceConfig {
        admin_token: Some(ADMIN_TOKEN.to_string()),
        ..ServiceConfig::default()
    })
    .await
}

async fn spawn_server_with(config: &ServiceConfig) -> String {
    serve_app(phoenix_guard::router(AppState::new_in_memory_with(config))).await
}

fn header<'a>(resp: &'a reqwest::Response, name: &str) -> &'a str {
    resp.headers()
        .get(name)
        .unwrap_or_else(|| panic!("missing {name}"))
        .to_str()
        .unwrap()
}

// ---------------------------------------------------------------------------
// System
// ---------------------------------------------------------------------------

#[tokio::test]
async fn health_returns_ok() {
    let base = spawn_server().await;
    let client = Client::new();

    let resp = client.get(format!("{base}/health")).send().await.unwrap();
    assert_eq!(resp.status(), 200);

    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    assert_eq!(body["store"], "memory");
    assert_eq!(body["pass_through"], false);
    assert!(body["uptime_seconds"].is_u64());
}

#[tokio::test]
async fn request_id_generated_when_absent() {
    let base = spawn_server().await;
    let client = Client::new();

    let resp = client.get(format!("{base}/health")).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    // UUID format: 8-4-4-4-12
    assert_eq!(header(&resp, "x-request-id").len(), 36);
}

#[tokio::test]
async fn request_id_preserved_when_provided() {
    let base = spawn_server().await;
    let client = Client::new();

    let resp = client
        .get(format!("{base}/health"))
        .header("x-request-id", "my-custom-id-123")
        .send()
        .await
        .unwrap();
    assert_eq!(header(&resp, "x-request-id"), "my-custom-id-123");
}

#[tokio::test]
async fn oversized_request_id_is_replaced() {
    let base = spawn_server().await;
    let client = Client::new();

    let resp = client
        .get(format!("{base}/health"))
        .header("x-request-id", "x".repeat(500))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(header(&resp, "x-request-id").len(), 36);
}

#[tokio::test]
async fn buckets_lists_default_policies() {
    let base = spawn_server().await;
    let client = Client::new();

    let resp = client.get(format!("{base}/v1/buckets")).send().await.unwrap();
    assert_eq!(resp.status(), 200);

    let body: Value = resp.json().await.unwrap();
    let buckets = body["buckets"].as_array().unwrap();
    assert_eq!(buckets.len(), 4);
    assert!(buckets.contains(&json!({"bucket": "contact", "limit": 3, "window_seconds": 3600})));
    assert!(buckets.contains(&json!({"bucket": "api", "limit": 100, "window_seconds": 60})));
    assert!(buckets.contains(&json!({"bucket": "analytics", "limit": 1000, "window_seconds": 3600})));
    assert!(buckets.contains(&json!({"bucket": "strict", "limit": 10, "window_seconds": 600})));
}

#[tokio::test]
async fn metrics_exposes_decision_counters() {
    let base = spawn_server().await;
    let client = Client::new();

    client
        .post(format!("{base}/v1/limit/api"))
        .header("x-real-ip", "198.51.100.1")
        .send()
        .await
        .unwrap();

    let resp = client.get(format!("{base}/metrics")).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    assert!(header(&resp, "content-type").starts_with("text/plain"));

    let text = resp.text().await.unwrap();
    assert!(text.contains(r#"bucket="api""#));
    assert!(text.contains("# TYPE"));
}

#[tokio::test]
async fn openapi_json_lists_routes() {
    let base = spawn_server().await;
    let client = Client::new();

    let resp = client
        .get(format!("{base}/api/openapi.json"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["info"]["title"], "Phoenix Guard API");
    let paths = body["paths"].as_object().unwrap();
    assert!(paths.contains_key("/v1/limit/{bucket}"));
    assert!(paths.contains_key("/admin/blocks/{identifier}"));
}

// ---------------------------------------------------------------------------
// Identification
// ---------------------------------------------------------------------------

#[tokio::test]
async fn identify_prefers_real_ip() {
    let base = spawn_server().await;
    let client = Client::new();

    let resp = client
        .get(format!("{base}/v1/identify"))
        .header("x-real-ip", "203.0.113.9")
        .header("x-forwarded-for", "10.0.0.1")
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["identifier"], "203.0.113.9");
    assert_eq!(body["source"], "real_ip");
}

#[tokio::test]
async fn identify_ignores_untrusted_forwarded_for() {
    let base = spawn_server().await;
    let client = Client::new();

    let resp = client
        .get(format!("{base}/v1/identify"))
        .header("x-forwarded-for", "10.0.0.1")
        .header("user-agent", "UA1")
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["source"], "fingerprint");
    let id = body["identifier"].as_str().unwrap();
    assert!(id.starts_with("fp_"));
    assert_eq!(id.len(), 19);
}

#[tokio::test]
async fn identical_header_profiles_share_fingerprint() {
    let base = spawn_server().await;
    let client = Client::new();

    let mut ids = Vec::new();
    for _ in 0..2 {
        let resp = client
            .get(format!("{base}/v1/identify"))
            .header("user-agent", "UA1")
            .header("accept-language", "en")
            .send()
            .await
            .unwrap();
        let body: Value = resp.json().await.unwrap();
        ids.push(body["identifier"].as_str().unwrap().to_string());
    }
    assert_eq!(ids[0], ids[1]);

    let resp = client
        .get(format!("{base}/v1/identify"))
        .header("user-agent", "UA2")
        .header("accept-language", "en")
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_ne!(body["identifier"].as_str().unwrap(), ids[0]);
}

#[tokio::test]
async fn development_mode_maps_to_loopback() {
    let mut config = ServiceConfig::default();
    config.identity.development = true;
    let base = spawn_server_with(&config).await;
    let client = Client::new();

    let resp = client
        .get(format!("{base}/v1/identify"))
        .header("x-real-ip", "203.0.113.9")
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["identifier"], "127.0.0.1");
    assert_eq!(body["source"], "development");
}

// ---------------------------------------------------------------------------
// Limit decisions
// ---------------------------------------------------------------------------

#[tokio::test]
async fn contact_bucket_denies_fourth_request() {
    let base = spawn_server().await;
    let client = Client::new();
    let url = format!("{base}/v1/limit/contact");

    for expected_remaining in ["2", "1", "0"] {
        let resp = client
            .post(&url)
            .header("x-real-ip", "198.51.100.7")
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        assert_eq!(header(&resp, "x-ratelimit-limit"), "3");
        assert_eq!(header(&resp, "x-ratelimit-remaining"), expected_remaining);
        assert!(resp.headers().get("retry-after").is_none());
    }

    let resp = client
        .post(&url)
        .header("x-real-ip", "198.51.100.7")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 429);
    assert_eq!(header(&resp, "x-ratelimit-remaining"), "0");
    let retry_after: u64 = header(&resp, "retry-after").parse().unwrap();
    assert!((3590..=3600).contains(&retry_after));

    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["success"], false);
    assert_eq!(body["bucket"], "contact");
    assert_eq!(body["identifier"], "198.51.100.7");
    assert_eq!(body["retry_after"], retry_after);
    assert!(body["reset"].as_str().unwrap().ends_with('Z'));
}

#[tokio::test]
async fn identifiers_and_buckets_are_isolated() {
    let base = spawn_server().await;
    let client = Client::new();

    for _ in 0..4 {
        client
            .post(format!("{base}/v1/limit/contact"))
            .header("x-real-ip", "198.51.100.7")
            .send()
            .await
            .unwrap();
    }

    let other_client = client
        .post(format!("{base}/v1/limit/contact"))
        .header("x-real-ip", "198.51.100.8")
        .send()
        .await
        .unwrap();
    assert_eq!(other_client.status(), 200);

    let other_bucket = client
        .post(format!("{base}/v1/limit/strict"))
        .header("x-real-ip", "198.51.100.7")
        .send()
        .await
        .unwrap();
    assert_eq!(other_bucket.status(), 200);
    assert_eq!(header(&other_bucket, "x-ratelimit-remaining"), "9");
}

#[tokio::test]
async fn explicit_identifier_overrides_headers() {
    let base = spawn_server().await;
    let client = Client::new();

    let resp = client
        .post(format!("{base}/v1/limit/api?identifier=user-42"))
        .header("x-real-ip", "198.51.100.7")
        .bearer_auth(ADMIN_TOKEN)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["identifier"], "user-42");
    assert_eq!(body["remaining"], 99);
    assert!(body.get("retry_after").is_none());
}

#[tokio::test]
async fn explicit_identifier_requires_admin_token() {
    let base = spawn_server().await;
    let client = Client::new();

    for token in [None, Some("wrong")] {
        let mut req = client.post(format!("{base}/v1/limit/contact?identifier=198.51.100.9"));
        if let Some(token) = token {
            req = req.bearer_auth(token);
        }
        let resp = req.send().await.unwrap();
        assert_eq!(resp.status(), 401);
    }

    // The named client's quota is untouched
    let resp = client
        .post(format!("{base}/v1/limit/contact"))
        .header("x-real-ip", "198.51.100.9")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(header(&resp, "x-ratelimit-remaining"), "2");
}

#[tokio::test]
async fn explicit_identifier_cannot_get_another_client_blocked() {
    let config = ServiceConfig {
        auto_block: true,
        admin_token: Some(ADMIN_TOKEN.to_string()),
        ..ServiceConfig::default()
    };
    let state = AppState::new_in_memory_with(&config);
    let base = serve_app(phoenix_guard::router(state.clone())).await;
    let client = Client::new();

    for _ in 0..51 {
        let resp = client
            .post(format!("{base}/v1/attack/check?identifier=198.51.100.9"))
            .header("x-real-ip", "203.0.113.66")
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 401);
    }

    let victim = phoenix_guard_service::identity::ClientIdentifier::from_raw("198.51.100.9");
    assert!(!state.is_blocked(&victim).await.unwrap());
}

#[tokio::test]
async fn unknown_bucket_returns_404() {
    let base = spawn_server().await;
    let client = Client::new();

    let resp = client
        .post(format!("{base}/v1/limit/login"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "not_found");
}

#[tokio::test]
async fn pass_through_without_store() {
    let service = ServiceState::new(&ServiceConfig::default(), None);
    let base = serve_app(phoenix_guard::router(AppState::new(service, vec![]))).await;
    let client = Client::new();

    for _ in 0..5 {
        let resp = client
            .post(format!("{base}/v1/limit/contact"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        assert_eq!(header(&resp, "x-ratelimit-remaining"), "3");
    }

    let health: Value = client
        .get(format!("{base}/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["store"], "none");
    assert_eq!(health["pass_through"], true);
}

// ---------------------------------------------------------------------------
// Attack detection
// ---------------------------------------------------------------------------

#[tokio::test]
async fn attack_flagged_after_threshold() {
    let base = spawn_server().await;
    let client = Client::new();
    let url = format!("{base}/v1/attack/check?identifier=noisy");

    for _ in 0..50 {
        let resp = client.post(&url).bearer_auth(ADMIN_TOKEN).send().await.unwrap();
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["attack"], false);
    }

    let resp = client.post(&url).bearer_auth(ADMIN_TOKEN).send().await.unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["attack"], true);
    assert_eq!(body["identifier"], "noisy");
}

// ---------------------------------------------------------------------------
// Admin
// ---------------------------------------------------------------------------

#[tokio::test]
async fn admin_requires_token() {
    let base = spawn_server().await;
    let client = Client::new();

    let resp = client
        .get(format!("{base}/admin/blocks/1.2.3.4"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);

    let resp = client
        .get(format!("{base}/admin/blocks/1.2.3.4"))
        .bearer_auth("wrong")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);

    let resp = client
        .get(format!("{base}/admin/blocks/1.2.3.4"))
        .bearer_auth(ADMIN_TOKEN)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["blocked"], false);
}

#[tokio::test]
async fn admin_closed_without_configured_token() {
    let base = spawn_server_with(&ServiceConfig::default()).await;
    let client = Client::new();

    let resp = client
        .delete(format!("{base}/admin/blocks/1.2.3.4"))
        .bearer_auth("anything")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
}

#[tokio::test]
async fn admin_block_and_unblock() {
    let base = spawn_server().await;
    let client = Client::new();
    let url = format!("{base}/admin/blocks/203.0.113.5");

    let resp = client
        .put(&url)
        .bearer_auth(ADMIN_TOKEN)
        .json(&json!({"duration_seconds": 120}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let body: Value = client
        .get(&url)
        .bearer_auth(ADMIN_TOKEN)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["blocked"], true);

    let resp = client
        .delete(&url)
        .bearer_auth(ADMIN_TOKEN)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["blocked"], false);
}

#[tokio::test]
async fn admin_block_rejects_zero_duration() {
    let base = spawn_server().await;
    let client = Client::new();

    let resp = client
        .put(format!("{base}/admin/blocks/203.0.113.5"))
        .bearer_auth(ADMIN_TOKEN)
        .json(&json!({"duration_seconds": 0}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn admin_reset_restores_quota() {
    let base = spawn_server().await;
    let client = Client::new();

    for _ in 0..4 {
        client
            .post(format!("{base}/v1/limit/contact?identifier=visitor"))
            .bearer_auth(ADMIN_TOKEN)
            .send()
            .await
            .unwrap();
    }

    let resp = client
        .delete(format!("{base}/admin/limit/contact?identifier=visitor"))
        .bearer_auth(ADMIN_TOKEN)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let resp = client
        .post(format!("{base}/v1/limit/contact?identifier=visitor"))
        .bearer_auth(ADMIN_TOKEN)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(header(&resp, "x-ratelimit-remaining"), "2");
}

// ---------------------------------------------------------------------------
// Embedded guard middleware
// ---------------------------------------------------------------------------

async fn spawn_guarded(config: &ServiceConfig, bucket: Bucket) -> (String, AppState) {
    let state = AppState::new_in_memory_with(config);
    let app = Router::new()
        .route("/submit", post(|| async { "sent" }))
        .layer(from_fn_with_state(
            BucketGuard::new(state.clone(), bucket),
            guard_middleware,
        ));
    (serve_app(app).await, state)
}

#[tokio::test]
async fn guard_middleware_enforces_bucket() {
    let (base, _state) = spawn_guarded(&ServiceConfig::default(), Bucket::Contact).await;
    let client = Client::new();

    for _ in 0..3 {
        let resp = client
            .post(format!("{base}/submit"))
            .header("x-real-ip", "198.51.100.20")
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        assert!(resp.headers().contains_key("x-ratelimit-reset"));
        assert_eq!(resp.text().await.unwrap(), "sent");
    }

    let resp = client
        .post(format!("{base}/submit"))
        .header("x-real-ip", "198.51.100.20")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 429);
    assert!(resp.headers().contains_key("retry-after"));
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "too_many_requests");
}

#[tokio::test]
async fn guard_middleware_rejects_blocked_clients() {
    let (base, state) = spawn_guarded(&ServiceConfig::default(), Bucket::Api).await;
    let client = Client::new();

    let id = phoenix_guard_service::identity::ClientIdentifier::from_raw("198.51.100.30");
    state.block(&id, None).await.unwrap();

    let resp = client
        .post(format!("{base}/submit"))
        .header("x-real-ip", "198.51.100.30")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 403);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "blocked");
}

#[tokio::test]
async fn guard_middleware_auto_blocks_attackers() {
    let config = ServiceConfig {
        auto_block: true,
        ..ServiceConfig::default()
    };
    let (base, state) = spawn_guarded(&config, Bucket::Analytics).await;
    let client = Client::new();

    for _ in 0..50 {
        let resp = client
            .post(format!("{base}/submit"))
            .header("x-real-ip", "198.51.100.40")
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
    }

    let resp = client
        .post(format!("{base}/submit"))
        .header("x-real-ip", "198.51.100.40")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 403);

    let id = phoenix_guard_service::identity::ClientIdentifier::from_raw("198.51.100.40");
    assert!(state.is_blocked(&id).await.unwrap());
}
