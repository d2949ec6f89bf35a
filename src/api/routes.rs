use axum::{
    middleware,
    response::Json,
    routing::{delete, get, patch, post},
    Router,
};
use serde::Serialize;
use std::time::Duration;
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer};

use crate::admin::api as admin_api;
use crate::api::{feed, AppState};
use crate::auth::{admin_middleware, api as auth_api, auth_middleware};
use crate::middleware::{rate_limit_middleware, request_logging, RateLimitConfig, RateLimitLayer};

/// Transport-level knobs for the router
#[derive(Clone, Debug)]
pub struct RouterConfig {
    pub rate_limit: RateLimitConfig,
    pub request_timeout: Duration,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            rate_limit: RateLimitConfig::default(),
            request_timeout: Duration::from_secs(15),
        }
    }
}

/// Create the API router
///
/// Returns the router together with its rate limiter so the caller can
/// schedule periodic cleanup of idle clients.
pub fn create_router(state: AppState, config: RouterConfig) -> (Router, RateLimitLayer) {
    let limiter = RateLimitLayer::new(config.rate_limit);

    // Auth routes (separate router with auth state)
    let auth_routes = Router::new()
        .route("/api/v1/auth/captcha", get(auth_api::captcha))
        .route("/api/v1/auth/register", post(auth_api::register))
        .route("/api/v1/auth/login", post(auth_api::login))
        .with_state(state.auth.clone());

    // Admin routes: token check first, then the admin claim
    let admin_routes = Router::new()
        .route(
            "/api/v1/admin/users",
            get(admin_api::list_users).post(admin_api::create_user),
        )
        .route(
            "/api/v1/admin/users/:username/ban",
            patch(admin_api::set_user_ban),
        )
        .route("/api/v1/admin/users/:username", delete(admin_api::delete_user))
        .route(
            "/api/v1/admin/prices/:code",
            delete(admin_api::delete_prices_by_code),
        )
        .route("/api/v1/admin/feedback", get(admin_api::list_feedback))
        .route(
            "/api/v1/admin/feedback/:id/resolve",
            post(admin_api::resolve_feedback),
        )
        .route("/api/v1/admin/logs", get(admin_api::list_logs))
        .route_layer(middleware::from_fn(admin_middleware))
        .route_layer(middleware::from_fn_with_state(
            state.auth.clone(),
            auth_middleware,
        ))
        .with_state(state.clone());

    // Public routes
    let public_routes = Router::new()
        .route("/health", get(health_check))
        .route("/api/v1/feed", get(feed::get_feed))
        .route("/api/v1/submit", post(feed::submit_price))
        .route("/api/v1/feedback", post(feed::submit_feedback))
        .with_state(state);

    let app = Router::new()
        .merge(public_routes)
        .merge(auth_routes)
        .merge(admin_routes)
        .layer(middleware::from_fn_with_state(
            limiter.clone(),
            rate_limit_middleware,
        ))
        .layer(middleware::from_fn(request_logging))
        .layer(TimeoutLayer::new(config.request_timeout))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    (app, limiter)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

/// Health check endpoint
async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}
