pub mod auth;
pub mod config;
pub mod dtos;
pub mod graph;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod query;
pub mod services;
pub mod utils;

use axum::{
    extract::State,
    http::StatusCode,
    middleware::{from_fn, from_fn_with_state},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use service_core::middleware::{
    security_headers::security_headers_middleware, tracing::request_id_middleware,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::auth::session::SessionStore;
use crate::config::ServiceConfig;
use crate::query::executor::QueryEngine;
use crate::services::database::{MongoDb, PrincipalStore};

#[derive(Clone)]
pub struct AppState {
    pub config: ServiceConfig,
    pub db: MongoDb,
    pub principals: Arc<dyn PrincipalStore>,
    pub sessions: SessionStore,
    pub engine: QueryEngine,
}

pub fn build_router(state: AppState) -> Router {
    // Everything under /api (except login) sees a resolved AuthContext.
    let authed_routes = Router::new()
        .route("/api/query", post(handlers::query::query))
        .route("/api/logout", post(handlers::auth::logout))
        .layer(from_fn_with_state(
            state.clone(),
            middleware::auth::auth_context_middleware,
        ));

    Router::new()
        .route("/health", get(health_check))
        .route("/api/login", post(handlers::auth::login))
        .merge(authed_routes)
        .with_state(state.clone())
        .layer(TraceLayer::new_for_http().make_span_with(
            |request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get("x-request-id")
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                    version = ?request.version(),
                )
            },
        ))
        .layer(from_fn(request_id_middleware))
        .layer(from_fn(security_headers_middleware))
        .layer(
            CorsLayer::new()
                .allow_origin(
                    state
                        .config
                        .cors_origins
                        .iter()
                        .map(|origin| {
                            origin.parse::<axum::http::HeaderValue>().unwrap_or_else(|e| {
                                tracing::error!(
                                    "Invalid CORS origin '{}': {}. Using fallback.",
                                    origin,
                                    e
                                );
                                axum::http::HeaderValue::from_static("*")
                            })
                        })
                        .collect::<Vec<axum::http::HeaderValue>>(),
                )
                .allow_methods([
                    axum::http::Method::GET,
                    axum::http::Method::POST,
                    axum::http::Method::OPTIONS,
                ])
                .allow_headers([
                    axum::http::header::AUTHORIZATION,
                    axum::http::header::CONTENT_TYPE,
                ])
                .allow_credentials(true),
        )
}

/// Service health check: liveness plus MongoDB and Redis reachability.
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let mongo_ok = state.db.health_check().await.is_ok();
    let cache_ok = state.engine.cache.ping().await.is_ok();

    let status = if mongo_ok && cache_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(json!({
            "status": if mongo_ok && cache_ok { "healthy" } else { "unhealthy" },
            "service": "intel-service",
            "version": env!("CARGO_PKG_VERSION"),
            "checks": {
                "mongodb": if mongo_ok { "up" } else { "down" },
                "redis": if cache_ok { "up" } else { "down" },
            }
        })),
    )
}
