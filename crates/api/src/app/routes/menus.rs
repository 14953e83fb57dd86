//! Menu tree, per-role grants, per-user overrides and caller-scoped checks.
//!
//! Administrative operations are gated on the `menus` resource. The
//! caller-scoped reads (`/mine`, `/check`, `/favorites`, ...) only ever
//! describe the caller's own access and are open to any bearer.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use backoffice_auth::{
    resources, AuthError, FlagOverrides, Identity, Menu, MenuAction, MenuDraft, MenuNode,
    MenuPermissions, PermissionAction, PermissionLevel, Resolution, RoleMenuGrant,
    UserMenuOverride,
};
use backoffice_core::{MenuId, RoleId, UserId};

use crate::app::errors::{parse_id, ApiError, ApiJson, ApiResult};
use crate::app::services::AppServices;
use crate::authz::require;

// ─────────────────────────────────────────────────────────────────────────────
// Request / response DTOs
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct UrlQuery {
    pub url: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UrlCheck {
    pub url: String,
    pub allowed: bool,
    pub menu_id: Option<MenuId>,
    pub permissions: Option<Resolution>,
}

#[derive(Debug, Deserialize)]
pub struct BatchCheckItem {
    pub resource: String,
    pub action: PermissionAction,
}

#[derive(Debug, Deserialize)]
pub struct BatchCheckRequest {
    pub checks: Vec<BatchCheckItem>,
}

#[derive(Debug, Deserialize)]
pub struct HierarchyQuery {
    pub parent: String,
    pub child: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CopyGrantsRequest {
    pub from_role_id: RoleId,
    pub to_role_id: RoleId,
}

// ─────────────────────────────────────────────────────────────────────────────
// Router
// ─────────────────────────────────────────────────────────────────────────────

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_menus).post(create_menu))
        .route("/tree", get(menu_tree))
        .route("/mine", get(my_tree))
        .route("/accessible", get(my_menus))
        .route("/favorites", get(my_favorites))
        .route("/check", get(check_url))
        .route("/check/batch", post(batch_check))
        .route("/level/:level", get(menus_by_level))
        .route("/hierarchy/validate", get(validate_hierarchy))
        .route("/grants/copy", post(copy_grants))
        .route("/overrides/:user_id", get(user_overrides))
        .route("/:id", get(get_menu).put(update_menu).delete(delete_menu))
        .route("/:id/permissions", get(my_permissions))
        .route("/:id/favorite", post(toggle_favorite))
        .route("/:id/grants", get(menu_grants))
        .route("/:id/grants/:role_id", put(grant_role).delete(revoke_role))
        .route("/:id/grants/copy-to/:target_id", post(copy_menu_grants))
        .route(
            "/:id/overrides/:user_id",
            put(set_override).delete(clear_override),
        )
}

// ─────────────────────────────────────────────────────────────────────────────
// Administration
// ─────────────────────────────────────────────────────────────────────────────

/// GET /api/v1/menus - Every menu, flat
pub async fn list_menus(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(identity): Extension<Identity>,
) -> ApiResult<Json<Vec<Menu>>> {
    require(&services.gate, &identity, resources::MENUS, MenuAction::View).await?;
    Ok(Json(services.menus.list().await?))
}

/// POST /api/v1/menus - Create a menu
pub async fn create_menu(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(identity): Extension<Identity>,
    ApiJson(body): ApiJson<MenuDraft>,
) -> ApiResult<impl IntoResponse> {
    require(&services.gate, &identity, resources::MENUS, MenuAction::Create).await?;
    let menu = services.menus.create(body).await?;
    Ok((StatusCode::CREATED, Json(menu)))
}

/// GET /api/v1/menus/tree - Active, visible menus as a tree
pub async fn menu_tree(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(identity): Extension<Identity>,
) -> ApiResult<Json<Vec<MenuNode>>> {
    require(&services.gate, &identity, resources::MENUS, MenuAction::View).await?;
    Ok(Json(services.menus.live_tree().await?))
}

/// GET /api/v1/menus/:id - Fetch one menu
pub async fn get_menu(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<String>,
) -> ApiResult<Json<Menu>> {
    require(&services.gate, &identity, resources::MENUS, MenuAction::View).await?;
    let id: MenuId = parse_id(&id)?;
    Ok(Json(services.menus.get(id).await?))
}

/// PUT /api/v1/menus/:id - Replace a menu's fields (re-parenting included)
pub async fn update_menu(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<String>,
    ApiJson(body): ApiJson<MenuDraft>,
) -> ApiResult<Json<Menu>> {
    require(&services.gate, &identity, resources::MENUS, MenuAction::Update).await?;
    let id: MenuId = parse_id(&id)?;
    Ok(Json(services.menus.update(id, body).await?))
}

/// DELETE /api/v1/menus/:id - Delete a menu and its subtree
pub async fn delete_menu(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    require(&services.gate, &identity, resources::MENUS, MenuAction::Delete).await?;
    let id: MenuId = parse_id(&id)?;
    let deleted = services.menus.delete(id).await?;
    Ok(Json(json!({ "deleted": deleted })))
}

/// GET /api/v1/menus/:id/grants - Role grants on a menu
pub async fn menu_grants(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<RoleMenuGrant>>> {
    require(&services.gate, &identity, resources::MENUS, MenuAction::View).await?;
    let id: MenuId = parse_id(&id)?;
    Ok(Json(services.menus.grants_for_menu(id).await?))
}

/// PUT /api/v1/menus/:id/grants/:role_id - Set a role's flags on a menu
pub async fn grant_role(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(identity): Extension<Identity>,
    Path((id, role_id)): Path<(String, String)>,
    ApiJson(body): ApiJson<MenuPermissions>,
) -> ApiResult<Json<RoleMenuGrant>> {
    require(&services.gate, &identity, resources::MENUS, MenuAction::Update).await?;
    let id: MenuId = parse_id(&id)?;
    let role_id: RoleId = parse_id(&role_id)?;
    Ok(Json(services.menus.grant_role(id, role_id, body).await?))
}

/// DELETE /api/v1/menus/:id/grants/:role_id - Drop a role grant
pub async fn revoke_role(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(identity): Extension<Identity>,
    Path((id, role_id)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    require(&services.gate, &identity, resources::MENUS, MenuAction::Update).await?;
    let id: MenuId = parse_id(&id)?;
    let role_id: RoleId = parse_id(&role_id)?;
    services.menus.revoke_role(id, role_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/v1/menus/grants/copy - Copy every menu grant from one role to another
pub async fn copy_grants(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(identity): Extension<Identity>,
    ApiJson(body): ApiJson<CopyGrantsRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    require(&services.gate, &identity, resources::MENUS, MenuAction::Update).await?;
    let copied = services
        .menus
        .copy_role_grants(body.from_role_id, body.to_role_id)
        .await?;
    Ok(Json(json!({ "copied": copied })))
}

/// POST /api/v1/menus/:id/grants/copy-to/:target_id - Copy this menu's role grants onto another menu
pub async fn copy_menu_grants(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(identity): Extension<Identity>,
    Path((id, target_id)): Path<(String, String)>,
) -> ApiResult<Json<serde_json::Value>> {
    require(&services.gate, &identity, resources::MENUS, MenuAction::Update).await?;
    let id: MenuId = parse_id(&id)?;
    let target_id: MenuId = parse_id(&target_id)?;
    let copied = services.menus.copy_menu_grants(id, target_id).await?;
    Ok(Json(json!({ "copied": copied })))
}

/// PUT /api/v1/menus/:id/overrides/:user_id - Per-user flag override
pub async fn set_override(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(identity): Extension<Identity>,
    Path((id, user_id)): Path<(String, String)>,
    ApiJson(body): ApiJson<FlagOverrides>,
) -> ApiResult<Json<UserMenuOverride>> {
    require(&services.gate, &identity, resources::MENUS, MenuAction::Update).await?;
    let id: MenuId = parse_id(&id)?;
    let user_id: UserId = parse_id(&user_id)?;
    Ok(Json(services.menus.set_user_override(id, user_id, body).await?))
}

/// DELETE /api/v1/menus/:id/overrides/:user_id - Remove a per-user override
pub async fn clear_override(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(identity): Extension<Identity>,
    Path((id, user_id)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    require(&services.gate, &identity, resources::MENUS, MenuAction::Update).await?;
    let id: MenuId = parse_id(&id)?;
    let user_id: UserId = parse_id(&user_id)?;
    services.menus.clear_user_override(id, user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/v1/menus/overrides/:user_id - A user's override and favourite rows
pub async fn user_overrides(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(identity): Extension<Identity>,
    Path(user_id): Path<String>,
) -> ApiResult<Json<Vec<UserMenuOverride>>> {
    require(&services.gate, &identity, resources::MENUS, MenuAction::View).await?;
    let user_id: UserId = parse_id(&user_id)?;
    Ok(Json(services.menus.user_overrides(user_id).await?))
}

// ─────────────────────────────────────────────────────────────────────────────
// Caller-scoped
// ─────────────────────────────────────────────────────────────────────────────

/// GET /api/v1/menus/mine - The caller's navigable tree
pub async fn my_tree(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(identity): Extension<Identity>,
) -> ApiResult<Json<Vec<MenuNode>>> {
    Ok(Json(services.resolver.accessible_tree(identity.user_id).await?))
}

/// GET /api/v1/menus/accessible - The caller's openable menus, flat
pub async fn my_menus(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(identity): Extension<Identity>,
) -> ApiResult<Json<Vec<Menu>>> {
    Ok(Json(services.resolver.accessible_menus(identity.user_id).await?))
}

/// GET /api/v1/menus/favorites - The caller's bookmarked menus
pub async fn my_favorites(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(identity): Extension<Identity>,
) -> ApiResult<Json<Vec<Menu>>> {
    Ok(Json(services.menus.favorites(identity.user_id).await?))
}

/// POST /api/v1/menus/:id/favorite - Toggle a bookmark for the caller
pub async fn toggle_favorite(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let id: MenuId = parse_id(&id)?;
    let favorite = services.menus.toggle_favorite(identity.user_id, id).await?;
    Ok(Json(json!({ "menuId": id, "favorite": favorite })))
}

/// GET /api/v1/menus/:id/permissions - The caller's flags on one menu
pub async fn my_permissions(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<String>,
) -> ApiResult<Json<Resolution>> {
    let id: MenuId = parse_id(&id)?;
    Ok(Json(services.resolver.resolve(identity.user_id, id).await?))
}

/// GET /api/v1/menus/check?url= - Can the caller open this URL?
pub async fn check_url(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(identity): Extension<Identity>,
    Query(query): Query<UrlQuery>,
) -> ApiResult<Json<UrlCheck>> {
    let check = match services
        .resolver
        .resolve_url(identity.user_id, &query.url)
        .await?
    {
        Some((menu, resolution)) => UrlCheck {
            allowed: resolution.permissions.can_access,
            menu_id: Some(menu.id),
            permissions: Some(resolution),
            url: query.url,
        },
        None => UrlCheck {
            url: query.url,
            allowed: false,
            menu_id: None,
            permissions: None,
        },
    };
    Ok(Json(check))
}

/// POST /api/v1/menus/check/batch - Many `(resource, action)` checks at once
pub async fn batch_check(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(identity): Extension<Identity>,
    ApiJson(body): ApiJson<BatchCheckRequest>,
) -> ApiResult<Json<BTreeMap<String, bool>>> {
    let checks: Vec<(String, PermissionAction)> = body
        .checks
        .into_iter()
        .map(|c| (c.resource, c.action))
        .collect();
    Ok(Json(
        services.resolver.batch_check(identity.user_id, &checks).await?,
    ))
}

/// GET /api/v1/menus/level/:level - The caller's menus in one capability bucket
pub async fn menus_by_level(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(identity): Extension<Identity>,
    Path(level): Path<String>,
) -> ApiResult<Json<Vec<Menu>>> {
    let level = parse_level(&level)?;
    Ok(Json(
        services.resolver.menus_by_level(identity.user_id, level).await?,
    ))
}

/// GET /api/v1/menus/hierarchy/validate?parent=&child= - Edit parent and see child?
pub async fn validate_hierarchy(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(identity): Extension<Identity>,
    Query(query): Query<HierarchyQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    let parent: MenuId = parse_id(&query.parent)?;
    let child: MenuId = parse_id(&query.child)?;
    let valid = services
        .resolver
        .validate_hierarchy(identity.user_id, parent, child)
        .await?;
    Ok(Json(json!({ "valid": valid })))
}

fn parse_level(raw: &str) -> ApiResult<PermissionLevel> {
    serde_json::from_value(serde_json::Value::String(raw.trim().to_ascii_uppercase()))
        .map_err(|_| ApiError(AuthError::validation(format!("unknown permission level '{raw}'"))))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_parse_case_insensitively() {
        assert_eq!(parse_level("view_only").ok(), Some(PermissionLevel::ViewOnly));
        assert_eq!(parse_level("ADMIN").ok(), Some(PermissionLevel::Admin));
        assert!(parse_level("everything").is_err());
    }
}
