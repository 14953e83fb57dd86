//! User administration.
//!
//! Every handler goes through the gate for the `users` resource first, so
//! what a caller can do here follows from the permissions their roles hold.

use std::collections::BTreeSet;
use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    routing::{delete, get, post},
    Json, Router,
};
use serde::Deserialize;

use backoffice_auth::admin::AccountStatus;
use backoffice_auth::{resources, Identity, MenuAction, ProfileUpdate, UserView};
use backoffice_core::{RoleId, UserId};

use crate::app::errors::{parse_id, ApiJson, ApiResult};
use crate::app::services::AppServices;
use crate::authz::require;

// ─────────────────────────────────────────────────────────────────────────────
// Request DTOs
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignRoleRequest {
    pub role_id: RoleId,
}

// ─────────────────────────────────────────────────────────────────────────────
// Router
// ─────────────────────────────────────────────────────────────────────────────

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_users))
        .route("/:id", get(get_user).put(update_user).delete(deactivate_user))
        .route("/:id/status", get(user_status))
        .route("/:id/activate", post(activate_user))
        .route("/:id/unlock", post(unlock_user))
        .route("/:id/roles", post(assign_role))
        .route("/:id/roles/:role_id", delete(remove_role))
        .route("/:id/permissions", get(user_permissions))
}

// ─────────────────────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// GET /api/v1/users - List accounts
pub async fn list_users(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(identity): Extension<Identity>,
) -> ApiResult<Json<Vec<UserView>>> {
    require(&services.gate, &identity, resources::USERS, MenuAction::View).await?;
    Ok(Json(services.users.list().await?))
}

/// GET /api/v1/users/:id - Fetch one account
pub async fn get_user(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<String>,
) -> ApiResult<Json<UserView>> {
    require(&services.gate, &identity, resources::USERS, MenuAction::View).await?;
    let id: UserId = parse_id(&id)?;
    Ok(Json(services.users.get(id).await?))
}

/// PUT /api/v1/users/:id - Update profile fields or the password
pub async fn update_user(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<String>,
    ApiJson(body): ApiJson<ProfileUpdate>,
) -> ApiResult<Json<UserView>> {
    require(&services.gate, &identity, resources::USERS, MenuAction::Update).await?;
    let id: UserId = parse_id(&id)?;
    Ok(Json(services.users.update(id, body).await?))
}

/// DELETE /api/v1/users/:id - Deactivate (accounts are never hard-deleted)
pub async fn deactivate_user(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<String>,
) -> ApiResult<Json<UserView>> {
    require(&services.gate, &identity, resources::USERS, MenuAction::Delete).await?;
    let id: UserId = parse_id(&id)?;
    Ok(Json(services.users.deactivate(id).await?))
}

/// GET /api/v1/users/:id/status - Lifecycle state and failure counter
pub async fn user_status(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<String>,
) -> ApiResult<Json<AccountStatus>> {
    require(&services.gate, &identity, resources::USERS, MenuAction::View).await?;
    let id: UserId = parse_id(&id)?;
    Ok(Json(services.users.status(id).await?))
}

/// POST /api/v1/users/:id/activate - Reactivate an account
pub async fn activate_user(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<String>,
) -> ApiResult<Json<UserView>> {
    require(&services.gate, &identity, resources::USERS, MenuAction::Update).await?;
    let id: UserId = parse_id(&id)?;
    Ok(Json(services.users.activate(id).await?))
}

/// POST /api/v1/users/:id/unlock - Clear a lockout and the failure counter
pub async fn unlock_user(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<String>,
) -> ApiResult<Json<AccountStatus>> {
    require(&services.gate, &identity, resources::USERS, MenuAction::Update).await?;
    let id: UserId = parse_id(&id)?;
    Ok(Json(services.users.unlock(id).await?))
}

/// POST /api/v1/users/:id/roles - Assign a role
pub async fn assign_role(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<String>,
    ApiJson(body): ApiJson<AssignRoleRequest>,
) -> ApiResult<Json<UserView>> {
    require(&services.gate, &identity, resources::USERS, MenuAction::Update).await?;
    let id: UserId = parse_id(&id)?;
    Ok(Json(services.users.assign_role(id, body.role_id).await?))
}

/// DELETE /api/v1/users/:id/roles/:role_id - Remove a role (never the last one)
pub async fn remove_role(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(identity): Extension<Identity>,
    Path((id, role_id)): Path<(String, String)>,
) -> ApiResult<Json<UserView>> {
    require(&services.gate, &identity, resources::USERS, MenuAction::Update).await?;
    let id: UserId = parse_id(&id)?;
    let role_id: RoleId = parse_id(&role_id)?;
    Ok(Json(services.users.remove_role(id, role_id).await?))
}

/// GET /api/v1/users/:id/permissions - Effective permission names
pub async fn user_permissions(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<String>,
) -> ApiResult<Json<BTreeSet<String>>> {
    require(&services.gate, &identity, resources::USERS, MenuAction::View).await?;
    let id: UserId = parse_id(&id)?;
    Ok(Json(services.users.effective_permissions(id).await?))
}
