//! Permission resolution.
//!
//! Precedence for a menu, first match wins:
//!
//! 1. inactive or invisible menu → everything denied
//! 2. admin (`ROLE_ADMIN` or any `ADMIN`-action permission) → everything granted
//! 3. menu-type defaults, elevated for the manager-tier role
//! 4. role-menu grants of held roles (their union replaces the defaults)
//! 5. the user's override record, flag by flag
//! 6. anything still unset stays denied
//!
//! The functions here are pure over a [`ResolutionSnapshot`]; the
//! [`PermissionResolver`] service loads that snapshot in one consistent read.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use backoffice_core::{MenuId, RoleId, UserId};

use crate::error::{AuthError, AuthResult};
use crate::menu::{Menu, MenuNode, MenuTree, MenuType};
use crate::menu_permission::{MenuAction, MenuPermissions, PermissionLevel};
use crate::permissions::PermissionAction;
use crate::roles::RoleName;
use crate::store::{AuthStore, MenuScope, ResolutionSnapshot};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolverPolicy {
    /// Role that gets elevated defaults on INTERNAL and ADMIN menus.
    pub manager_role: RoleName,
}

impl Default for ResolverPolicy {
    fn default() -> Self {
        Self {
            manager_role: RoleName::MANAGER,
        }
    }
}

/// Which rule produced a [`Resolution`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    Gate,
    AdminBypass,
    TypeDefault,
    RoleGrant,
    UserOverride,
    RolePermission,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Resolution {
    #[serde(flatten)]
    pub permissions: MenuPermissions,
    pub decided_by: Decision,
}

impl Resolution {
    fn new(permissions: MenuPermissions, decided_by: Decision) -> Self {
        Self {
            permissions,
            decided_by,
        }
    }
}

impl ResolutionSnapshot {
    pub fn is_admin(&self) -> bool {
        self.roles.iter().any(|r| r.is_admin())
            || self.permissions.iter().any(|p| p.action == PermissionAction::Admin)
    }

    pub fn holds_role(&self, name: &RoleName) -> bool {
        self.roles.iter().any(|r| &r.name == name)
    }

    pub fn role_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.roles.iter().map(|r| r.name.to_string()).collect();
        names.sort();
        names
    }

    /// Union of permission names over every held role.
    pub fn permission_names(&self) -> BTreeSet<String> {
        self.permissions.iter().map(|p| p.name.clone()).collect()
    }

    fn held_role_ids(&self) -> BTreeSet<RoleId> {
        self.roles.iter().map(|r| r.id).collect()
    }
}

/// Step 3: defaults from the menu's declared type.
pub fn type_defaults(menu_type: MenuType, is_manager: bool) -> MenuPermissions {
    match menu_type {
        MenuType::Public => MenuPermissions::NAVIGATE,
        MenuType::Internal if is_manager => MenuPermissions {
            can_create: true,
            can_update: true,
            can_execute: true,
            ..MenuPermissions::NAVIGATE
        },
        MenuType::Internal => MenuPermissions::NAVIGATE,
        MenuType::Admin if is_manager => MenuPermissions::NONE.with(MenuAction::View),
        MenuType::Admin => MenuPermissions::NONE,
        MenuType::External | MenuType::Divider | MenuType::Group => MenuPermissions::NAVIGATE,
    }
}

pub fn resolve_menu(snapshot: &ResolutionSnapshot, menu: &Menu, policy: &ResolverPolicy) -> Resolution {
    if !menu.is_live() {
        return Resolution::new(MenuPermissions::NONE, Decision::Gate);
    }
    if snapshot.is_admin() {
        return Resolution::new(MenuPermissions::ALL, Decision::AdminBypass);
    }

    let mut permissions = type_defaults(menu.menu_type, snapshot.holds_role(&policy.manager_role));
    let mut decided_by = Decision::TypeDefault;

    let held = snapshot.held_role_ids();
    let granted = snapshot
        .role_grants
        .iter()
        .filter(|g| g.menu_id == menu.id && held.contains(&g.role_id))
        .fold(None, |acc: Option<MenuPermissions>, g| {
            Some(acc.unwrap_or(MenuPermissions::NONE).union(g.permissions))
        });
    if let Some(granted) = granted {
        permissions = granted;
        decided_by = Decision::RoleGrant;
    }

    if let Some(record) = snapshot
        .user_overrides
        .iter()
        .find(|o| o.menu_id == menu.id && o.user_id == snapshot.user.id && o.is_override)
    {
        permissions = record.flags.apply(permissions);
        decided_by = Decision::UserOverride;
    }

    Resolution::new(permissions, decided_by)
}

/// Resolve against a non-menu resource from the user's role permissions.
pub fn resolve_resource(snapshot: &ResolutionSnapshot, resource: &str) -> AuthResult<Resolution> {
    if snapshot.is_admin() {
        return Ok(Resolution::new(MenuPermissions::ALL, Decision::AdminBypass));
    }

    let resource = resource.trim().to_ascii_lowercase();
    if !snapshot.known_resources.contains(&resource) {
        return Err(AuthError::not_found(format!("resource '{resource}'")));
    }

    let permissions = snapshot
        .permissions
        .iter()
        .filter(|p| p.resource == resource)
        .fold(MenuPermissions::NONE, |acc, p| {
            acc.union(MenuPermissions::from_action(p.action))
        });

    Ok(Resolution::new(permissions, Decision::RolePermission))
}

/// First active menu (by `(sort_order, id)`) whose url matches.
pub fn menu_for_url<'a>(snapshot: &'a ResolutionSnapshot, url: &str) -> Option<&'a Menu> {
    snapshot
        .menus
        .iter()
        .filter(|m| m.is_active && m.matches_url(url))
        .min_by_key(|m| (m.sort_order, m.id))
}

// ─────────────────────────────────────────────────────────────────────────────
// Service
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct PermissionResolver {
    store: Arc<dyn AuthStore>,
    policy: ResolverPolicy,
}

impl PermissionResolver {
    pub fn new(store: Arc<dyn AuthStore>, policy: ResolverPolicy) -> Self {
        Self { store, policy }
    }

    pub fn policy(&self) -> &ResolverPolicy {
        &self.policy
    }

    pub async fn snapshot(&self, user: UserId, scope: MenuScope) -> AuthResult<ResolutionSnapshot> {
        self.store
            .load_snapshot(user, scope)
            .await?
            .ok_or_else(|| AuthError::not_found("user"))
    }

    pub async fn resolve(&self, user: UserId, menu: MenuId) -> AuthResult<Resolution> {
        let snapshot = self.snapshot(user, MenuScope::One(menu)).await?;
        let target = snapshot
            .menus
            .iter()
            .find(|m| m.id == menu)
            .ok_or_else(|| AuthError::not_found("menu"))?;

        let resolution = resolve_menu(&snapshot, target, &self.policy);
        debug!(%user, %menu, decided_by = ?resolution.decided_by, "resolved menu permissions");
        Ok(resolution)
    }

    pub async fn resolve_resource(&self, user: UserId, resource: &str) -> AuthResult<Resolution> {
        let snapshot = self.snapshot(user, MenuScope::None).await?;
        let resolution = resolve_resource(&snapshot, resource)?;
        debug!(%user, resource, decided_by = ?resolution.decided_by, "resolved resource permissions");
        Ok(resolution)
    }

    pub async fn has_permission(&self, user: UserId, menu: MenuId, action: MenuAction) -> AuthResult<bool> {
        Ok(self.resolve(user, menu).await?.permissions.allows(action))
    }

    /// Every active menu the user can open, ordered by `(sort_order, id)`.
    pub async fn accessible_menus(&self, user: UserId) -> AuthResult<Vec<Menu>> {
        self.menus_matching(user, |p| p.can_access).await
    }

    /// Active menus whose effective flags fall in exactly `level`.
    pub async fn menus_by_level(&self, user: UserId, level: PermissionLevel) -> AuthResult<Vec<Menu>> {
        self.menus_matching(user, |p| PermissionLevel::of(p) == Some(level)).await
    }

    async fn menus_matching<F>(&self, user: UserId, pred: F) -> AuthResult<Vec<Menu>>
    where
        F: Fn(&MenuPermissions) -> bool,
    {
        let snapshot = self.snapshot(user, MenuScope::All).await?;
        let mut menus: Vec<Menu> = snapshot
            .menus
            .iter()
            .filter(|m| m.is_active && pred(&resolve_menu(&snapshot, m, &self.policy).permissions))
            .cloned()
            .collect();
        menus.sort_by_key(|m| (m.sort_order, m.id));
        Ok(menus)
    }

    /// The navigation tree pruned to what the user can see.
    pub async fn accessible_tree(&self, user: UserId) -> AuthResult<Vec<MenuNode>> {
        let snapshot = self.snapshot(user, MenuScope::All).await?;
        let tree = MenuTree::new(snapshot.menus.iter().cloned());
        Ok(tree.render(|m| resolve_menu(&snapshot, m, &self.policy).permissions.can_view))
    }

    /// Resolution for the first active menu serving `url`, if any.
    pub async fn resolve_url(&self, user: UserId, url: &str) -> AuthResult<Option<(Menu, Resolution)>> {
        let snapshot = self.snapshot(user, MenuScope::All).await?;
        Ok(menu_for_url(&snapshot, url).map(|m| (m.clone(), resolve_menu(&snapshot, m, &self.policy))))
    }

    /// Unknown urls are denied.
    pub async fn can_access_url(&self, user: UserId, url: &str) -> AuthResult<bool> {
        Ok(self
            .resolve_url(user, url)
            .await?
            .is_some_and(|(_, r)| r.permissions.can_access))
    }

    pub async fn effective_permission_names(&self, user: UserId) -> AuthResult<BTreeSet<String>> {
        Ok(self.snapshot(user, MenuScope::None).await?.permission_names())
    }

    /// Check many `(resource, action)` pairs at once; keys are `"resource:action"`.
    pub async fn batch_check(
        &self,
        user: UserId,
        checks: &[(String, PermissionAction)],
    ) -> AuthResult<BTreeMap<String, bool>> {
        let snapshot = self.snapshot(user, MenuScope::None).await?;
        let admin = snapshot.is_admin();

        Ok(checks
            .iter()
            .map(|(resource, action)| {
                let resource = resource.trim().to_ascii_lowercase();
                let granted = admin
                    || snapshot
                        .permissions
                        .iter()
                        .any(|p| p.resource == resource && p.action == *action);
                (format!("{resource}:{action}"), granted)
            })
            .collect())
    }

    /// Can the user edit `parent` and see `child`?
    pub async fn validate_hierarchy(&self, user: UserId, parent: MenuId, child: MenuId) -> AuthResult<bool> {
        let snapshot = self.snapshot(user, MenuScope::All).await?;
        let find = |id: MenuId| {
            snapshot
                .menus
                .iter()
                .find(|m| m.id == id)
                .ok_or_else(|| AuthError::not_found("menu"))
        };
        let parent = resolve_menu(&snapshot, find(parent)?, &self.policy);
        let child = resolve_menu(&snapshot, find(child)?, &self.policy);
        Ok(parent.permissions.can_update && child.permissions.can_view)
    }
}
