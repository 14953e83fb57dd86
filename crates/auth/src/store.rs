//! Persistence contracts consumed by the authorization core.
//!
//! Split per aggregate the way the records are owned, then combined into
//! [`AuthStore`], which adds the operations that must be atomic across
//! records: the lockout read-modify-write, menu tree rewrites and the
//! resolution snapshot.

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use backoffice_core::{DomainError, DomainResult, MenuId, PermissionId, RoleId, UserId};

use crate::lifecycle::{LockoutPolicy, LockoutState};
use crate::menu::{Menu, MenuTree};
use crate::menu_permission::{RoleMenuGrant, UserMenuOverride};
use crate::permissions::{Permission, PermissionAction};
use crate::roles::{Role, RoleName};
use crate::user::User;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(String),

    /// A unique natural key is already taken.
    #[error("duplicate {0}")]
    Duplicate(String),

    #[error("store backend error: {0}")]
    Backend(String),

    /// A [`MenuTreePlan`] refused the tree it was handed.
    #[error(transparent)]
    Rejected(#[from] DomainError),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_user(&self, id: UserId) -> StoreResult<Option<User>>;
    /// `email` must already be normalised.
    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>>;
    async fn list_users(&self) -> StoreResult<Vec<User>>;
    async fn users_with_role(&self, role: RoleId) -> StoreResult<Vec<User>>;
    /// `Duplicate` when the email is taken.
    async fn insert_user(&self, user: &User) -> StoreResult<()>;
    /// Writes profile fields, `password_hash` and `is_active`.
    ///
    /// Role membership and the lockout columns are owned by the dedicated
    /// operations below and are left untouched.
    async fn update_user(&self, user: &User) -> StoreResult<()>;
    /// Idempotent.
    async fn add_user_role(&self, user: UserId, role: RoleId) -> StoreResult<()>;
    async fn remove_user_role(&self, user: UserId, role: RoleId) -> StoreResult<()>;
    /// Clear failed attempts and any lock.
    async fn clear_lockout(&self, user: UserId, now: DateTime<Utc>) -> StoreResult<()>;
}

#[async_trait]
pub trait RoleStore: Send + Sync {
    async fn find_role(&self, id: RoleId) -> StoreResult<Option<Role>>;
    async fn find_role_by_name(&self, name: &RoleName) -> StoreResult<Option<Role>>;
    async fn list_roles(&self) -> StoreResult<Vec<Role>>;
    /// `Duplicate` when the name is taken.
    async fn insert_role(&self, role: &Role) -> StoreResult<()>;
    /// Writes display metadata only.
    async fn update_role(&self, role: &Role) -> StoreResult<()>;
    /// Replace the role's permission set.
    async fn set_role_permissions(
        &self,
        role: RoleId,
        permissions: &BTreeSet<PermissionId>,
    ) -> StoreResult<()>;
    /// Removes the role from every holder and drops its menu grants.
    async fn delete_role(&self, id: RoleId) -> StoreResult<()>;
}

#[async_trait]
pub trait PermissionStore: Send + Sync {
    async fn find_permission(&self, id: PermissionId) -> StoreResult<Option<Permission>>;
    async fn find_permission_by_key(
        &self,
        resource: &str,
        action: PermissionAction,
    ) -> StoreResult<Option<Permission>>;
    async fn list_permissions(&self) -> StoreResult<Vec<Permission>>;
    /// `Duplicate` when the name or the `(resource, action)` pair is taken.
    async fn insert_permission(&self, permission: &Permission) -> StoreResult<()>;
    /// Writes name and display metadata; the `(resource, action)` pair is immutable.
    async fn update_permission(&self, permission: &Permission) -> StoreResult<()>;
    /// Also removes the permission from every role.
    async fn delete_permission(&self, id: PermissionId) -> StoreResult<()>;
}

#[async_trait]
pub trait MenuStore: Send + Sync {
    async fn find_menu(&self, id: MenuId) -> StoreResult<Option<Menu>>;
    async fn list_menus(&self) -> StoreResult<Vec<Menu>>;
    async fn insert_menu(&self, menu: &Menu) -> StoreResult<()>;
    /// Delete the rows and their grants, overrides and favourites.
    async fn delete_menus(&self, ids: &[MenuId]) -> StoreResult<()>;
}

#[async_trait]
pub trait MenuPermissionStore: Send + Sync {
    async fn role_grants_for_role(&self, role: RoleId) -> StoreResult<Vec<RoleMenuGrant>>;
    async fn role_grants_for_menu(&self, menu: MenuId) -> StoreResult<Vec<RoleMenuGrant>>;
    async fn upsert_role_grant(&self, grant: &RoleMenuGrant) -> StoreResult<()>;
    /// `true` if a row was removed.
    async fn delete_role_grant(&self, role: RoleId, menu: MenuId) -> StoreResult<bool>;
    async fn user_overrides(&self, user: UserId) -> StoreResult<Vec<UserMenuOverride>>;
    async fn find_user_override(
        &self,
        user: UserId,
        menu: MenuId,
    ) -> StoreResult<Option<UserMenuOverride>>;
    async fn upsert_user_override(&self, record: &UserMenuOverride) -> StoreResult<()>;
    async fn delete_user_override(&self, user: UserId, menu: MenuId) -> StoreResult<bool>;
}

/// Computes the rows to write from the menu forest as stored at write time.
pub type MenuTreePlan<'a> = dyn Fn(MenuTree) -> DomainResult<Vec<Menu>> + Send + Sync + 'a;

/// Which menus a [`ResolutionSnapshot`] should carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuScope {
    None,
    One(MenuId),
    All,
}

/// Everything one resolution reads, captured in a single consistent read.
#[derive(Debug, Clone)]
pub struct ResolutionSnapshot {
    pub user: User,
    /// Roles the user holds.
    pub roles: Vec<Role>,
    /// Permissions granted by those roles (deduplicated).
    pub permissions: Vec<Permission>,
    pub menus: Vec<Menu>,
    /// Grants of the held roles on the menus in scope.
    pub role_grants: Vec<RoleMenuGrant>,
    /// The user's records on the menus in scope.
    pub user_overrides: Vec<UserMenuOverride>,
    /// Every resource mentioned by any permission in the catalogue.
    pub known_resources: BTreeSet<String>,
}

#[async_trait]
pub trait AuthStore:
    UserStore + RoleStore + PermissionStore + MenuStore + MenuPermissionStore
{
    /// Apply one failed attempt atomically and return the resulting columns.
    ///
    /// Two concurrent failures must never both observe the same counter.
    async fn record_login_failure(
        &self,
        user: UserId,
        now: DateTime<Utc>,
        policy: &LockoutPolicy,
    ) -> StoreResult<LockoutState>;

    /// Reset the counter, clear the lock and stamp `last_login_at`.
    async fn record_login_success(&self, user: UserId, now: DateTime<Utc>) -> StoreResult<()>;

    /// Read the forest, run `plan` on it and write the rows it returns, all
    /// under one lock. Two concurrent reparents must never both pass the
    /// cycle check against a tree the other is changing.
    ///
    /// A plan error surfaces as [`StoreError::Rejected`] and nothing is written.
    async fn rewrite_menu_tree(&self, plan: &MenuTreePlan<'_>) -> StoreResult<Vec<Menu>>;

    /// `None` when the user does not exist.
    async fn load_snapshot(
        &self,
        user: UserId,
        scope: MenuScope,
    ) -> StoreResult<Option<ResolutionSnapshot>>;
}
