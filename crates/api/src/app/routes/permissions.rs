//! Permission catalogue.

use std::collections::BTreeSet;
use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;

use backoffice_auth::admin::PermissionUpdate;
use backoffice_auth::{
    resources, Identity, MenuAction, NewPermission, Permission, PermissionAction,
    PermissionTemplate,
};
use backoffice_core::PermissionId;

use crate::app::errors::{parse_id, ApiJson, ApiResult};
use crate::app::services::AppServices;
use crate::authz::require;

// ─────────────────────────────────────────────────────────────────────────────
// Request DTOs
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub resource: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TemplateRequest {
    pub template: PermissionTemplate,
    pub resource: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Router
// ─────────────────────────────────────────────────────────────────────────────

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_permissions).post(create_permission))
        .route("/resources", get(list_resources))
        .route("/actions", get(list_actions))
        .route("/templates", post(create_from_template))
        .route(
            "/:id",
            get(get_permission)
                .put(update_permission)
                .delete(delete_permission),
        )
}

// ─────────────────────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// GET /api/v1/permissions - List permissions, optionally for one resource
pub async fn list_permissions(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(identity): Extension<Identity>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Vec<Permission>>> {
    require(&services.gate, &identity, resources::PERMISSIONS, MenuAction::View).await?;
    let permissions = match query.resource.as_deref() {
        Some(resource) => services.permissions.by_resource(resource).await?,
        None => services.permissions.list().await?,
    };
    Ok(Json(permissions))
}

/// POST /api/v1/permissions - Create a permission
pub async fn create_permission(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(identity): Extension<Identity>,
    ApiJson(body): ApiJson<NewPermission>,
) -> ApiResult<impl IntoResponse> {
    require(&services.gate, &identity, resources::PERMISSIONS, MenuAction::Create).await?;
    let permission = services.permissions.create(body).await?;
    Ok((StatusCode::CREATED, Json(permission)))
}

/// GET /api/v1/permissions/resources - Distinct resource names
pub async fn list_resources(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(identity): Extension<Identity>,
) -> ApiResult<Json<BTreeSet<String>>> {
    require(&services.gate, &identity, resources::PERMISSIONS, MenuAction::View).await?;
    Ok(Json(services.permissions.resources().await?))
}

/// GET /api/v1/permissions/actions - The fixed action vocabulary
pub async fn list_actions(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(identity): Extension<Identity>,
) -> ApiResult<Json<Vec<PermissionAction>>> {
    require(&services.gate, &identity, resources::PERMISSIONS, MenuAction::View).await?;
    Ok(Json(services.permissions.actions().to_vec()))
}

/// POST /api/v1/permissions/templates - Expand a template for a resource
pub async fn create_from_template(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(identity): Extension<Identity>,
    ApiJson(body): ApiJson<TemplateRequest>,
) -> ApiResult<impl IntoResponse> {
    require(&services.gate, &identity, resources::PERMISSIONS, MenuAction::Create).await?;
    let created = services
        .permissions
        .create_from_template(body.template, &body.resource)
        .await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// GET /api/v1/permissions/:id - Fetch one permission
pub async fn get_permission(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<String>,
) -> ApiResult<Json<Permission>> {
    require(&services.gate, &identity, resources::PERMISSIONS, MenuAction::View).await?;
    let id: PermissionId = parse_id(&id)?;
    Ok(Json(services.permissions.get(id).await?))
}

/// PUT /api/v1/permissions/:id - Update name or descriptive fields
pub async fn update_permission(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<String>,
    ApiJson(body): ApiJson<PermissionUpdate>,
) -> ApiResult<Json<Permission>> {
    require(&services.gate, &identity, resources::PERMISSIONS, MenuAction::Update).await?;
    let id: PermissionId = parse_id(&id)?;
    Ok(Json(services.permissions.update(id, body).await?))
}

/// DELETE /api/v1/permissions/:id - Delete and detach from every role
pub async fn delete_permission(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    require(&services.gate, &identity, resources::PERMISSIONS, MenuAction::Delete).await?;
    let id: PermissionId = parse_id(&id)?;
    services.permissions.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
