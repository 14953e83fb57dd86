//! Login, registration, token refresh and session introspection.

use std::sync::Arc;

use axum::{
    extract::Extension,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;

use backoffice_auth::{Identity, LoginResponse, NewAccount};

use crate::app::errors::{ApiJson, ApiResult};
use crate::app::services::AppServices;
use crate::context::ClientIp;

// ─────────────────────────────────────────────────────────────────────────────
// Request DTOs
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    pub refresh_token: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Router
// ─────────────────────────────────────────────────────────────────────────────

pub fn public_router() -> Router {
    Router::new()
        .route("/auth/login", post(login))
        .route("/auth/register", post(register))
        .route("/auth/refresh", post(refresh))
}

pub fn router() -> Router {
    Router::new()
        .route("/auth/logout", post(logout))
        .route("/auth/me", get(me))
}

// ─────────────────────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// POST /api/v1/auth/login - Exchange credentials for a token pair
pub async fn login(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ClientIp(ip)): Extension<ClientIp>,
    ApiJson(body): ApiJson<LoginRequest>,
) -> ApiResult<Json<LoginResponse>> {
    let response = services
        .authenticator
        .login(&body.email, &body.password, ip)
        .await?;
    Ok(Json(response))
}

/// POST /api/v1/auth/register - Create an account with the default role
pub async fn register(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ClientIp(ip)): Extension<ClientIp>,
    ApiJson(body): ApiJson<NewAccount>,
) -> ApiResult<impl IntoResponse> {
    let user = services.authenticator.register(body, ip).await?;
    Ok((StatusCode::CREATED, Json(user)))
}

/// POST /api/v1/auth/refresh - Rotate a refresh token into a fresh pair
pub async fn refresh(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ClientIp(ip)): Extension<ClientIp>,
    ApiJson(body): ApiJson<RefreshRequest>,
) -> ApiResult<Json<LoginResponse>> {
    let response = services
        .authenticator
        .refresh(&body.refresh_token, ip)
        .await?;
    Ok(Json(response))
}

/// POST /api/v1/auth/logout - Record the logout; tokens expire on their own
pub async fn logout(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(identity): Extension<Identity>,
    Extension(ClientIp(ip)): Extension<ClientIp>,
) -> StatusCode {
    services.authenticator.logout(&identity, ip);
    StatusCode::NO_CONTENT
}

/// GET /api/v1/auth/me - Identity carried by the bearer token
pub async fn me(Extension(identity): Extension<Identity>) -> Json<Identity> {
    Json(identity)
}
