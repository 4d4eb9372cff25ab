//! Phoenix Guard HTTP: REST transport adapter for the guard service.
//!
//! Provides the HTTP interface including:
//! - Decision endpoints (bucket limits, attack checks, identification)
//! - Admin endpoints (counter resets, block list)
//! - System endpoints (health, Prometheus metrics)
//! - OpenAPI/Swagger UI
//! - `guard_middleware` for enforcing a bucket inside any axum router

pub mod error;
pub mod extract;
pub mod middleware;
pub mod routes;
pub mod state;
pub mod types;

use axum::Router;
use axum::http::{HeaderName, HeaderValue, Method};
use axum::routing::{delete, get, post, put};
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use error::ErrorBody;

pub use middleware::rate_limit::{BucketGuard, guard_middleware};
pub use state::AppState;

// ---------------------------------------------------------------------------
// OpenAPI
// ---------------------------------------------------------------------------

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Phoenix Guard API",
        description = "Client identification, sliding-window rate limiting and abuse detection.\n\nBuckets: `contact` (3/hour), `api` (100/minute), `analytics` (1000/hour), `strict` (10/10 minutes).\n\nAdmin routes require `Authorization: Bearer <token>`.",
        version = "0.3.2",
        license(name = "Apache-2.0"),
    ),
    paths(
        routes::system::health,
        routes::system::list_buckets,
        routes::system::identify,
        routes::limit::check_limit,
        routes::limit::check_attack,
        routes::admin::reset_limit,
        routes::admin::block_status,
        routes::admin::block,
        routes::admin::unblock,
    ),
    components(
        schemas(
            types::HealthResponse, types::IdentityResponse, types::BucketInfo,
            types::BucketsResponse, types::DecisionResponse, types::AttackResponse,
            types::BlockStatus, types::BlockRequest, ErrorBody,
            phoenix_guard_service::bucket::Bucket,
            phoenix_guard_service::identity::IdentifierSource,
        )
    ),
    tags(
        (name = "Rate limiting", description = "Bucket decisions and client identification"),
        (name = "Abuse", description = "Attack detection"),
        (name = "Admin", description = "Counter resets and block list management"),
        (name = "System", description = "System and health endpoints"),
    )
)]
struct ApiDoc;

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Builds the HTTP API router.
///
/// Call this from the binary crate to get a fully-wired axum `Router`.
pub fn router(state: AppState) -> Router {
    let admin = Router::new()
        .route("/admin/limit/{bucket}", delete(routes::admin::reset_limit))
        .route(
            "/admin/blocks/{identifier}",
            get(routes::admin::block_status)
                .put(routes::admin::block)
                .delete(routes::admin::unblock),
        )
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::admin_auth_middleware,
        ));

    let api = Router::new()
        // Decisions
        .route("/v1/limit/{bucket}", post(routes::limit::check_limit))
        .route("/v1/attack/check", post(routes::limit::check_attack))
        .route("/v1/identify", get(routes::system::identify))
        .route("/v1/buckets", get(routes::system::list_buckets))
        // System
        .route("/health", get(routes::system::health))
        .route("/metrics", get(routes::system::metrics_endpoint))
        .merge(admin)
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http());

    let api = api
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::request_id::request_id_middleware,
        ))
        .layer(cors_layer(&state))
        .with_state(state);

    api.merge(SwaggerUi::new("/api/docs").url("/api/openapi.json", ApiDoc::openapi()))
}

/// Serve the HTTP router on the given listener with graceful shutdown.
///
/// Wraps `axum::serve` with `ConnectInfo<SocketAddr>` so handlers and
/// logging can see the peer address.
pub async fn serve(
    listener: tokio::net::TcpListener,
    app: Router,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await
}

fn cors_layer(state: &AppState) -> CorsLayer {
    let origins = state.cors_origins();

    // No origins configured: no CORS headers.
    if origins.is_empty() {
        return CorsLayer::new();
    }

    let x_request_id = HeaderName::from_static("x-request-id");
    let base = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            axum::http::header::CONTENT_TYPE,
            axum::http::header::AUTHORIZATION,
            x_request_id.clone(),
        ])
        .expose_headers([
            x_request_id,
            HeaderName::from_static("x-ratelimit-limit"),
            HeaderName::from_static("x-ratelimit-remaining"),
            HeaderName::from_static("x-ratelimit-reset"),
            axum::http::header::RETRY_AFTER,
        ]);

    if origins.len() == 1 && origins[0] == "*" {
        tracing::warn!("CORS configured with wildcard origin, all cross-origin requests allowed");
        base.allow_origin(tower_http::cors::Any)
    } else {
        let parsed: Vec<HeaderValue> = origins
            .iter()
            .filter_map(|o| match o.parse() {
                Ok(v) => Some(v),
                Err(_) => {
                    tracing::warn!(origin = %o, "ignoring invalid CORS origin");
                    None
                }
            })
            .collect();
        base.allow_origin(parsed)
    }
}
