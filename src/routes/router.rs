use crate::config::RateLimitConfig;
use crate::error::{AppError, AppResult};
use crate::middleware_impls::ClientIpKeyExtractor;
use axum::middleware;
use axum::routing::{get, post};
use std::sync::Arc;
use tower_governor::GovernorLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use super::health;
use super::redirect_handlers;
use super::AppState;

/// Largest accepted redirect request body
const MAX_BODY_BYTES: usize = 4 * 1024;

/// Create application router
pub fn create_router(
    state: Arc<AppState>,
    allowed_origins: Vec<String>,
    rate_limit_config: RateLimitConfig,
) -> AppResult<axum::Router> {
    use crate::middleware_impls::request_id_middleware;

    // Password submissions get the configured per-IP limit
    let governor_layer_strict = GovernorLayer::new(
        tower_governor::governor::GovernorConfigBuilder::default()
            .per_millisecond((60000 / rate_limit_config.requests_per_minute.max(1)).max(1))
            .burst_size(rate_limit_config.burst_size)
            .key_extractor(ClientIpKeyExtractor)
            .finish()
            .ok_or_else(|| {
                AppError::Configuration("Failed to build strict governor config".to_string())
            })?,
    );

    // Plain browser redirects get twice as much headroom
    let governor_layer_lenient = GovernorLayer::new(
        tower_governor::governor::GovernorConfigBuilder::default()
            .per_millisecond(
                (60000 / rate_limit_config.requests_per_minute.saturating_mul(2).max(1)).max(1),
            )
            .burst_size(rate_limit_config.burst_size.saturating_mul(2))
            .key_extractor(ClientIpKeyExtractor)
            .finish()
            .ok_or_else(|| {
                AppError::Configuration("Failed to build lenient governor config".to_string())
            })?,
    );

    // Configure CORS with specific origins
    let cors = if allowed_origins.iter().any(|o| o == "*") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<http::HeaderValue> = allowed_origins
            .iter()
            .filter_map(|s| s.parse::<http::HeaderValue>().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    };

    let credential_routes = axum::Router::new()
        .route("/redirect/{code}", post(redirect_handlers::resolve_redirect))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(governor_layer_strict);

    let public_routes = axum::Router::new()
        .route("/{code}", get(redirect_handlers::follow_redirect))
        .layer(governor_layer_lenient);

    // Health check endpoint (no rate limiting)
    let health_routes = axum::Router::new().route("/_health", get(health::health_check));

    Ok(credential_routes
        .merge(public_routes)
        .merge(health_routes)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(request_id_middleware))
        .with_state(state))
}
