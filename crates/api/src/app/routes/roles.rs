//! Role catalogue and role-permission assignment.

use std::collections::BTreeSet;
use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::Deserialize;

use backoffice_auth::admin::{NewRole, RoleUpdate};
use backoffice_auth::{resources, Identity, MenuAction, Permission, Role, RoleTemplate, UserView};
use backoffice_core::{PermissionId, RoleId};

use crate::app::errors::{parse_id, ApiJson, ApiResult};
use crate::app::services::AppServices;
use crate::authz::require;

// ─────────────────────────────────────────────────────────────────────────────
// Request DTOs
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct FromTemplateRequest {
    pub template: RoleTemplate,
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignPermissionsRequest {
    pub permission_ids: BTreeSet<PermissionId>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DuplicateRequest {
    pub name: Option<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Router
// ─────────────────────────────────────────────────────────────────────────────

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_roles).post(create_role))
        .route("/from-template", post(create_from_template))
        .route("/:id", get(get_role).put(update_role).delete(delete_role))
        .route("/:id/permissions", put(assign_permissions).get(role_permissions))
        .route("/:id/permissions/:permission_id", delete(revoke_permission))
        .route("/:id/users", get(role_holders))
        .route("/:id/duplicate", post(duplicate_role))
}

// ─────────────────────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// GET /api/v1/roles - List roles
pub async fn list_roles(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(identity): Extension<Identity>,
) -> ApiResult<Json<Vec<Role>>> {
    require(&services.gate, &identity, resources::ROLES, MenuAction::View).await?;
    Ok(Json(services.roles.list().await?))
}

/// POST /api/v1/roles - Create a role
pub async fn create_role(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(identity): Extension<Identity>,
    ApiJson(body): ApiJson<NewRole>,
) -> ApiResult<impl IntoResponse> {
    require(&services.gate, &identity, resources::ROLES, MenuAction::Create).await?;
    let role = services.roles.create(body).await?;
    Ok((StatusCode::CREATED, Json(role)))
}

/// POST /api/v1/roles/from-template - Create a role from a predefined shape
pub async fn create_from_template(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(identity): Extension<Identity>,
    ApiJson(body): ApiJson<FromTemplateRequest>,
) -> ApiResult<impl IntoResponse> {
    require(&services.gate, &identity, resources::ROLES, MenuAction::Create).await?;
    let role = services
        .roles
        .create_from_template(body.template, body.name)
        .await?;
    Ok((StatusCode::CREATED, Json(role)))
}

/// GET /api/v1/roles/:id - Fetch one role
pub async fn get_role(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<String>,
) -> ApiResult<Json<Role>> {
    require(&services.gate, &identity, resources::ROLES, MenuAction::View).await?;
    let id: RoleId = parse_id(&id)?;
    Ok(Json(services.roles.get(id).await?))
}

/// PUT /api/v1/roles/:id - Rename or describe a role
pub async fn update_role(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<String>,
    ApiJson(body): ApiJson<RoleUpdate>,
) -> ApiResult<Json<Role>> {
    require(&services.gate, &identity, resources::ROLES, MenuAction::Update).await?;
    let id: RoleId = parse_id(&id)?;
    Ok(Json(services.roles.update(id, body).await?))
}

/// DELETE /api/v1/roles/:id - Delete a non-system role
pub async fn delete_role(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    require(&services.gate, &identity, resources::ROLES, MenuAction::Delete).await?;
    let id: RoleId = parse_id(&id)?;
    services.roles.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// PUT /api/v1/roles/:id/permissions - Replace the role's permission set
pub async fn assign_permissions(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<String>,
    ApiJson(body): ApiJson<AssignPermissionsRequest>,
) -> ApiResult<Json<Role>> {
    require(&services.gate, &identity, resources::ROLES, MenuAction::Update).await?;
    let id: RoleId = parse_id(&id)?;
    Ok(Json(
        services.roles.assign_permissions(id, body.permission_ids).await?,
    ))
}

/// GET /api/v1/roles/:id/permissions - Permissions held by the role
pub async fn role_permissions(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<Permission>>> {
    require(&services.gate, &identity, resources::ROLES, MenuAction::View).await?;
    let id: RoleId = parse_id(&id)?;
    Ok(Json(services.roles.permissions_of(id).await?))
}

/// DELETE /api/v1/roles/:id/permissions/:permission_id - Revoke one permission
pub async fn revoke_permission(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(identity): Extension<Identity>,
    Path((id, permission_id)): Path<(String, String)>,
) -> ApiResult<Json<Role>> {
    require(&services.gate, &identity, resources::ROLES, MenuAction::Update).await?;
    let id: RoleId = parse_id(&id)?;
    let permission_id: PermissionId = parse_id(&permission_id)?;
    Ok(Json(services.roles.revoke_permission(id, permission_id).await?))
}

/// GET /api/v1/roles/:id/users - Accounts holding the role
pub async fn role_holders(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<UserView>>> {
    require(&services.gate, &identity, resources::ROLES, MenuAction::View).await?;
    let id: RoleId = parse_id(&id)?;
    Ok(Json(services.roles.holders(id).await?))
}

/// POST /api/v1/roles/:id/duplicate - Copy a role and its permissions
pub async fn duplicate_role(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<String>,
    ApiJson(body): ApiJson<DuplicateRequest>,
) -> ApiResult<impl IntoResponse> {
    require(&services.gate, &identity, resources::ROLES, MenuAction::Create).await?;
    let id: RoleId = parse_id(&id)?;
    let role = services.roles.duplicate(id, body.name).await?;
    Ok((StatusCode::CREATED, Json(role)))
}
