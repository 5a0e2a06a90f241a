use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    ValidationError(#[from] validator::ValidationErrors),

    #[error("Bad request: {0}")]
    BadRequest(anyhow::Error),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Not found: {0}")]
    NotFound(anyhow::Error),

    #[error("Authentication required: {0}")]
    Unauthenticated(anyhow::Error),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Query cost {cost} exceeds maximum allowed {limit}")]
    CostExceeded { cost: u64, limit: u64 },

    #[error("Query depth {depth} exceeds maximum allowed {limit}")]
    DepthExceeded { depth: u32, limit: u32 },

    #[error("Internal server error: {0}")]
    InternalError(#[from] anyhow::Error),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(anyhow::Error),

    #[error("Database error: {0}")]
    DatabaseError(anyhow::Error),

    #[error("Cache error: {0}")]
    CacheError(#[from] redis::RedisError),

    #[error("Configuration error: {0}")]
    ConfigError(anyhow::Error),
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(anyhow::Error::new(err))
    }
}

impl From<mongodb::error::Error> for AppError {
    fn from(err: mongodb::error::Error) -> Self {
        AppError::DatabaseError(anyhow::Error::new(err))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::InternalError(anyhow::Error::new(err))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct ErrorResponse {
            error: String,
            #[serde(skip_serializing_if = "Option::is_none")]
            details: Option<String>,
        }

        let (status, error_message, details) = match self {
            AppError::ValidationError(err) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "Validation error".to_string(),
                Some(err.to_string()),
            ),
            AppError::BadRequest(err) => (StatusCode::BAD_REQUEST, err.to_string(), None),
            AppError::InvalidQuery(reason) => (
                StatusCode::BAD_REQUEST,
                format!("Invalid query: {}", reason),
                None,
            ),
            AppError::NotFound(err) => (StatusCode::NOT_FOUND, err.to_string(), None),
            AppError::Unauthenticated(err) => (StatusCode::UNAUTHORIZED, err.to_string(), None),
            AppError::PermissionDenied(capability) => (
                StatusCode::FORBIDDEN,
                format!("Permission denied: {}", capability),
                None,
            ),
            AppError::CostExceeded { cost, limit } => (
                StatusCode::UNPROCESSABLE_ENTITY,
                format!("Query cost {} exceeds maximum allowed {}", cost, limit),
                None,
            ),
            AppError::DepthExceeded { depth, limit } => (
                StatusCode::UNPROCESSABLE_ENTITY,
                format!("Query depth {} exceeds maximum allowed {}", depth, limit),
                None,
            ),
            AppError::InternalError(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
                Some(format!("{:#?}", err)),
            ),
            AppError::StoreUnavailable(err) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "Store unavailable".to_string(),
                Some(err.to_string()),
            ),
            AppError::DatabaseError(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Database error".to_string(),
                Some(err.to_string()),
            ),
            AppError::CacheError(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Cache error".to_string(),
                Some(err.to_string()),
            ),
            AppError::ConfigError(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Configuration error".to_string(),
                Some(err.to_string()),
            ),
        };

        (
            status,
            Json(ErrorResponse {
                error: error_message,
                details,
            }),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::response::IntoResponse;

    #[test]
    fn unauthenticated_maps_to_401() {
        let err = AppError::Unauthenticated(anyhow::anyhow!("no session"));
        let resp = err.into_response();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn permission_denied_maps_to_403() {
        let err = AppError::PermissionDenied("Indicator.read".to_string());
        let resp = err.into_response();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn admission_errors_map_to_422() {
        let cost = AppError::CostExceeded {
            cost: 250,
            limit: 100,
        };
        assert_eq!(
            cost.into_response().status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );

        let depth = AppError::DepthExceeded {
            depth: 11,
            limit: 10,
        };
        assert_eq!(
            depth.into_response().status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }

    #[test]
    fn store_unavailable_maps_to_503() {
        let err = AppError::StoreUnavailable(anyhow::anyhow!("redis down"));
        assert_eq!(
            err.into_response().status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
