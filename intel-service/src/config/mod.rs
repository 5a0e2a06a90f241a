use serde::Deserialize;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;

use crate::services::cache::DispatchMode;

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    #[serde(flatten)]
    pub common: core_config::Config,
    pub mongodb: MongoConfig,
    pub redis: RedisConfig,
    pub cache: CacheConfig,
    pub query: QueryConfig,
    pub graph: GraphConfig,
    pub session: SessionConfig,
    pub invalidation_mode: DispatchMode,
    pub cors_origins: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MongoConfig {
    pub uri: String,
    pub database: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    pub enabled: bool,
    pub default_ttl_secs: u64,
    pub namespace: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueryConfig {
    pub max_cost: u64,
    pub max_depth: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GraphConfig {
    pub max_depth: u32,
    pub max_total: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    pub cookie_name: String,
    pub ttl_secs: u64,
}

impl ServiceConfig {
    pub fn load() -> Result<Self, AppError> {
        // Common config handles .env and the APP__ prefix.
        let common = core_config::Config::load()?;

        let is_prod = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string()) == "prod";

        Ok(ServiceConfig {
            common,
            mongodb: MongoConfig {
                uri: get_env("MONGODB_URI", Some("mongodb://localhost:27017"), is_prod)?,
                database: get_env("MONGODB_DATABASE", Some("intelgraph"), is_prod)?,
            },
            redis: RedisConfig {
                url: get_env("REDIS_URL", Some("redis://localhost:6379/0"), is_prod)?,
            },
            cache: CacheConfig {
                enabled: get_env("CACHE_ENABLED", Some("true"), is_prod)?
                    .parse()
                    .map_err(|e| AppError::ConfigError(anyhow::anyhow!("CACHE_ENABLED: {}", e)))?,
                default_ttl_secs: parse_env("CACHE_DEFAULT_TTL_SECS", "900", is_prod)?,
                namespace: get_env("CACHE_NAMESPACE", Some("intelgraph:query"), is_prod)?,
            },
            query: QueryConfig {
                max_cost: parse_env("QUERY_MAX_COST", "100", is_prod)?,
                max_depth: parse_env("QUERY_MAX_DEPTH", "10", is_prod)?,
            },
            graph: GraphConfig {
                max_depth: parse_env("GRAPH_MAX_DEPTH", "4", is_prod)?,
                max_total: parse_env("GRAPH_MAX_TOTAL", "200", is_prod)?,
            },
            session: SessionConfig {
                cookie_name: get_env("SESSION_COOKIE_NAME", Some("intel_session"), is_prod)?,
                ttl_secs: parse_env("SESSION_TTL_SECS", "86400", is_prod)?,
            },
            invalidation_mode: get_env("INVALIDATION_MODE", Some("background"), is_prod)?
                .parse()
                .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?,
            cors_origins: get_env(
                "CORS_ORIGINS",
                Some("http://localhost:8080,http://127.0.0.1:8080"),
                is_prod,
            )?
            .split(',')
            .map(|origin| origin.trim().to_string())
            .filter(|origin| !origin.is_empty())
            .collect(),
        })
    }
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required in production but not set",
                    key
                ))))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required but not set",
                    key
                ))))
            }
        }
    }
}

fn parse_env<T>(key: &str, default: &str, is_prod: bool) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    get_env(key, Some(default), is_prod)?
        .parse()
        .map_err(|e: T::Err| AppError::ConfigError(anyhow::anyhow!("{}: {}", key, e)))
}
