//! The structured query endpoint.

use axum::{extract::State, Json};

use service_core::error::AppError;

use crate::dtos::QueryResponse;
use crate::middleware::Auth;
use crate::query::shape::QueryDocument;
use crate::AppState;

/// Execute a structured query document. Admission control runs first and
/// rejects the whole request on cost/depth violations; per-field outcomes
/// land in the response envelope.
pub async fn query(
    State(state): State<AppState>,
    Auth(ctx): Auth,
    Json(doc): Json<QueryDocument>,
) -> Result<Json<QueryResponse>, AppError> {
    let response = state.engine.execute(&ctx, &doc).await?;
    Ok(Json(response))
}
