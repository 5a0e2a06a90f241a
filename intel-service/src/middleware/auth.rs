//! Per-request AuthContext resolution.
//!
//! Runs once per request, before any resolver: token (bearer header or
//! session cookie) -> session store -> principal -> merged roles ->
//! immutable AuthContext in the request extensions. No token resolves to
//! the anonymous context; a token that fails to resolve is rejected with
//! `Unauthenticated` here, before anything downstream executes.

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts},
    middleware::Next,
    response::Response,
};
use axum_extra::extract::cookie::CookieJar;

use service_core::error::AppError;

use crate::auth::context::{AuthContext, Principal};
use crate::models::merge_roles;
use crate::services::database::PrincipalStore;
use crate::AppState;

pub async fn auth_context_middleware(
    State(state): State<AppState>,
    jar: CookieJar,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = bearer_token(&req)
        .map(str::to_string)
        .or_else(|| {
            jar.get(&state.config.session.cookie_name)
                .map(|cookie| cookie.value().to_string())
        });

    let ctx = match token {
        None => AuthContext::anonymous(),
        Some(token) => resolve_session(&state, &token).await?,
    };

    req.extensions_mut().insert(ctx);
    Ok(next.run(req).await)
}

fn bearer_token(req: &Request) -> Option<&str> {
    req.headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
}

async fn resolve_session(state: &AppState, token: &str) -> Result<AuthContext, AppError> {
    let principal_id = state
        .sessions
        .lookup(token)
        .await?
        .ok_or_else(|| AppError::Unauthenticated(anyhow::anyhow!("invalid or expired session")))?;

    let user = state
        .principals
        .user_by_id(&principal_id)
        .await?
        .ok_or_else(|| AppError::Unauthenticated(anyhow::anyhow!("unknown principal")))?;

    if !user.is_active {
        return Err(AppError::Unauthenticated(anyhow::anyhow!(
            "principal is inactive"
        )));
    }

    let roles = state.principals.roles_by_names(&user.roles).await?;
    let (capabilities, grants) = merge_roles(&roles);

    Ok(AuthContext::new(
        Principal::from(&user),
        capabilities,
        grants,
    ))
}

/// Extractor handing resolved contexts to handlers.
pub struct Auth(pub AuthContext);

#[axum::async_trait]
impl<S> FromRequestParts<S> for Auth
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let ctx = parts.extensions.get::<AuthContext>().cloned().ok_or_else(|| {
            AppError::InternalError(anyhow::anyhow!(
                "AuthContext missing from request extensions"
            ))
        })?;
        Ok(Auth(ctx))
    }
}
