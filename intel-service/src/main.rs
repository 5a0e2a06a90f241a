use std::sync::Arc;

use intel_service::config::ServiceConfig;
use intel_service::auth::session::SessionStore;
use intel_service::graph::walker::TraversalBounds;
use intel_service::query::executor::QueryEngine;
use intel_service::query::governor::{CostGovernor, QueryLimits};
use intel_service::services::cache::{CacheClient, Invalidator};
use intel_service::services::database::MongoDb;
use intel_service::services::redis::RedisCache;
use intel_service::{build_router, AppState};
use service_core::observability::init_tracing;
use tokio::net::TcpListener;
use tokio::signal;

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    let otlp_endpoint = std::env::var("OTLP_ENDPOINT").unwrap_or_default();
    init_tracing("intel-service", "info", &otlp_endpoint);

    let config = ServiceConfig::load().map_err(|e| {
        tracing::error!("Failed to load configuration: {}", e);
        std::io::Error::other(format!("Configuration error: {}", e))
    })?;

    let db = MongoDb::connect(&config.mongodb.uri, &config.mongodb.database)
        .await
        .map_err(|e| {
            tracing::error!("Failed to connect to MongoDB: {}", e);
            std::io::Error::other(format!("Database connection error: {}", e))
        })?;

    db.initialize_indexes().await.map_err(|e| {
        tracing::error!("Failed to initialize database indexes: {}", e);
        std::io::Error::other(format!("Database initialization error: {}", e))
    })?;

    let redis = RedisCache::connect(&config.redis.url).await.map_err(|e| {
        tracing::error!("Failed to connect to Redis: {}", e);
        std::io::Error::other(format!("Cache connection error: {}", e))
    })?;
    let cache_store = Arc::new(redis);

    let cache = CacheClient::new(cache_store.clone(), &config.cache);
    let sessions = SessionStore::new(cache_store, config.session.ttl_secs);
    let invalidator = Invalidator::new(cache.clone(), config.invalidation_mode);
    let governor = CostGovernor::new(QueryLimits {
        max_cost: config.query.max_cost,
        max_depth: config.query.max_depth,
    });
    let bounds = TraversalBounds {
        max_depth: config.graph.max_depth,
        max_total: config.graph.max_total,
    };

    let store = Arc::new(db.clone());
    let engine = QueryEngine {
        store,
        cache,
        invalidator,
        governor,
        bounds,
    };

    let state = AppState {
        config: config.clone(),
        db: db.clone(),
        principals: Arc::new(db),
        sessions,
        engine,
    };

    let app = build_router(state);

    let addr = format!("0.0.0.0:{}", config.common.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(addr = %addr, "intel-service listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}
