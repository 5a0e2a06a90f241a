//! Session issuance and teardown.

use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use axum_extra::extract::cookie::{Cookie, CookieJar};

use service_core::error::AppError;

use crate::dtos::{LoginRequest, LoginResponse, MessageResponse};
use crate::services::database::PrincipalStore;
use crate::utils::{verify_password, ValidatedJson};
use crate::AppState;

/// Login with username and password; on success a session cookie is set
/// and the token is also returned for bearer-style clients.
pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    ValidatedJson(req): ValidatedJson<LoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    // One failure message for unknown user and wrong password alike.
    let invalid = || AppError::Unauthenticated(anyhow::anyhow!("invalid username or password"));

    let user = state
        .principals
        .user_by_username(&req.username)
        .await?
        .ok_or_else(invalid)?;

    if verify_password(&req.password, &user.password_hash).is_err() {
        return Err(invalid());
    }
    if !user.is_active {
        return Err(AppError::Unauthenticated(anyhow::anyhow!(
            "account is inactive"
        )));
    }

    let token = state.sessions.create(&user.id.to_hex()).await?;
    tracing::info!(username = %user.username, "Login successful");

    let cookie = Cookie::build((state.config.session.cookie_name.clone(), token.clone()))
        .path("/")
        .http_only(true)
        .build();

    Ok((
        StatusCode::OK,
        jar.add(cookie),
        Json(LoginResponse {
            token,
            username: user.username,
        }),
    ))
}

/// Destroy the current session (cookie or bearer token) and clear the
/// cookie. Logging out without a session is not an error.
pub async fn logout(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
) -> Result<impl IntoResponse, AppError> {
    let cookie_name = state.config.session.cookie_name.clone();
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::to_string)
        .or_else(|| jar.get(&cookie_name).map(|c| c.value().to_string()));

    if let Some(token) = token {
        state.sessions.destroy(&token).await?;
    }

    let jar = jar.remove(Cookie::from(cookie_name));
    Ok((
        StatusCode::OK,
        jar,
        Json(MessageResponse {
            message: "Logged out successfully".to_string(),
        }),
    ))
}
