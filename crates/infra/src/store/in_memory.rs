//! In-memory [`AuthStore`] for tests and single-process development.
//!
//! All tables sit behind one `RwLock`, so every compound operation
//! (cascading deletes, the lockout read-modify-write, menu tree rewrites,
//! snapshot loading) is atomic with respect to every other call.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use backoffice_auth::{
    AuthStore, LockoutPolicy, LockoutState, Menu, MenuPermissionStore, MenuScope, MenuStore,
    MenuTree, MenuTreePlan, Permission, PermissionAction, PermissionStore, ResolutionSnapshot, Role, RoleMenuGrant,
    RoleName, RoleStore, StoreError, StoreResult, User, UserMenuOverride, UserStore,
};
use backoffice_core::{Entity, MenuId, PermissionId, RoleId, UserId};

#[derive(Debug, Default)]
struct Tables {
    users: HashMap<UserId, User>,
    roles: HashMap<RoleId, Role>,
    permissions: HashMap<PermissionId, Permission>,
    menus: HashMap<MenuId, Menu>,
    role_grants: BTreeMap<(RoleId, MenuId), RoleMenuGrant>,
    user_overrides: BTreeMap<(UserId, MenuId), UserMenuOverride>,
}

#[derive(Debug, Default)]
pub struct InMemoryAuthStore {
    inner: RwLock<Tables>,
}

impl InMemoryAuthStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> StoreResult<RwLockReadGuard<'_, Tables>> {
        self.inner
            .read()
            .map_err(|_| StoreError::Backend("in-memory store lock poisoned".into()))
    }

    fn write(&self) -> StoreResult<RwLockWriteGuard<'_, Tables>> {
        self.inner
            .write()
            .map_err(|_| StoreError::Backend("in-memory store lock poisoned".into()))
    }
}

/// Upsert a record under its own id.
fn put<E: Entity + Clone>(table: &mut HashMap<E::Id, E>, record: &E) {
    table.insert(*record.id(), record.clone());
}

fn sorted_by<T: Clone>(items: impl Iterator<Item = T>, key: impl Fn(&T) -> (DateTime<Utc>, String)) -> Vec<T> {
    let mut out: Vec<T> = items.collect();
    out.sort_by_key(|item| key(item));
    out
}

// ─────────────────────────────────────────────────────────────────────────────
// Users
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait]
impl UserStore for InMemoryAuthStore {
    async fn find_user(&self, id: UserId) -> StoreResult<Option<User>> {
        Ok(self.read()?.users.get(&id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        Ok(self.read()?.users.values().find(|u| u.email == email).cloned())
    }

    async fn list_users(&self) -> StoreResult<Vec<User>> {
        let tables = self.read()?;
        Ok(sorted_by(tables.users.values().cloned(), |u| {
            (u.created_at, u.email.clone())
        }))
    }

    async fn users_with_role(&self, role: RoleId) -> StoreResult<Vec<User>> {
        let tables = self.read()?;
        Ok(sorted_by(
            tables.users.values().filter(|u| u.roles.contains(&role)).cloned(),
            |u| (u.created_at, u.email.clone()),
        ))
    }

    async fn insert_user(&self, user: &User) -> StoreResult<()> {
        let mut tables = self.write()?;
        if tables.users.values().any(|u| u.email == user.email) {
            return Err(StoreError::Duplicate("email".into()));
        }
        if user.roles.iter().any(|r| !tables.roles.contains_key(r)) {
            return Err(StoreError::NotFound("role".into()));
        }
        put(&mut tables.users, user);
        Ok(())
    }

    async fn update_user(&self, user: &User) -> StoreResult<()> {
        let mut tables = self.write()?;
        if tables
            .users
            .values()
            .any(|u| u.email == user.email && u.id != user.id)
        {
            return Err(StoreError::Duplicate("email".into()));
        }
        let stored = tables
            .users
            .get_mut(&user.id)
            .ok_or_else(|| StoreError::NotFound("user".into()))?;
        stored.email = user.email.clone();
        stored.password_hash = user.password_hash.clone();
        stored.first_name = user.first_name.clone();
        stored.last_name = user.last_name.clone();
        stored.phone_number = user.phone_number.clone();
        stored.is_active = user.is_active;
        stored.email_verified = user.email_verified;
        stored.mfa_enabled = user.mfa_enabled;
        stored.updated_at = user.updated_at;
        Ok(())
    }

    async fn add_user_role(&self, user: UserId, role: RoleId) -> StoreResult<()> {
        let mut tables = self.write()?;
        if !tables.roles.contains_key(&role) {
            return Err(StoreError::NotFound("role".into()));
        }
        let stored = tables
            .users
            .get_mut(&user)
            .ok_or_else(|| StoreError::NotFound("user".into()))?;
        stored.roles.insert(role);
        Ok(())
    }

    async fn remove_user_role(&self, user: UserId, role: RoleId) -> StoreResult<()> {
        let mut tables = self.write()?;
        let stored = tables
            .users
            .get_mut(&user)
            .ok_or_else(|| StoreError::NotFound("user".into()))?;
        stored.roles.remove(&role);
        Ok(())
    }

    async fn clear_lockout(&self, user: UserId, now: DateTime<Utc>) -> StoreResult<()> {
        let mut tables = self.write()?;
        let stored = tables
            .users
            .get_mut(&user)
            .ok_or_else(|| StoreError::NotFound("user".into()))?;
        stored.failed_login_attempts = 0;
        stored.locked_until = None;
        stored.updated_at = now;
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Roles
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait]
impl RoleStore for InMemoryAuthStore {
    async fn find_role(&self, id: RoleId) -> StoreResult<Option<Role>> {
        Ok(self.read()?.roles.get(&id).cloned())
    }

    async fn find_role_by_name(&self, name: &RoleName) -> StoreResult<Option<Role>> {
        Ok(self.read()?.roles.values().find(|r| &r.name == name).cloned())
    }

    async fn list_roles(&self) -> StoreResult<Vec<Role>> {
        let tables = self.read()?;
        let mut roles: Vec<Role> = tables.roles.values().cloned().collect();
        roles.sort_by(|a, b| a.name.as_str().cmp(b.name.as_str()));
        Ok(roles)
    }

    async fn insert_role(&self, role: &Role) -> StoreResult<()> {
        let mut tables = self.write()?;
        if tables.roles.values().any(|r| r.name == role.name) {
            return Err(StoreError::Duplicate("role name".into()));
        }
        if role.permissions.iter().any(|p| !tables.permissions.contains_key(p)) {
            return Err(StoreError::NotFound("permission".into()));
        }
        put(&mut tables.roles, role);
        Ok(())
    }

    async fn update_role(&self, role: &Role) -> StoreResult<()> {
        let mut tables = self.write()?;
        if tables
            .roles
            .values()
            .any(|r| r.name == role.name && r.id != role.id)
        {
            return Err(StoreError::Duplicate("role name".into()));
        }
        let stored = tables
            .roles
            .get_mut(&role.id)
            .ok_or_else(|| StoreError::NotFound("role".into()))?;
        stored.name = role.name.clone();
        stored.display_name = role.display_name.clone();
        stored.description = role.description.clone();
        stored.updated_at = role.updated_at;
        Ok(())
    }

    async fn set_role_permissions(
        &self,
        role: RoleId,
        permissions: &BTreeSet<PermissionId>,
    ) -> StoreResult<()> {
        let mut tables = self.write()?;
        if permissions.iter().any(|p| !tables.permissions.contains_key(p)) {
            return Err(StoreError::NotFound("permission".into()));
        }
        let stored = tables
            .roles
            .get_mut(&role)
            .ok_or_else(|| StoreError::NotFound("role".into()))?;
        stored.permissions = permissions.clone();
        Ok(())
    }

    async fn delete_role(&self, id: RoleId) -> StoreResult<()> {
        let mut tables = self.write()?;
        if tables.roles.remove(&id).is_none() {
            return Err(StoreError::NotFound("role".into()));
        }
        for user in tables.users.values_mut() {
            user.roles.remove(&id);
        }
        tables.role_grants.retain(|(role, _), _| *role != id);
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Permission catalogue
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait]
impl PermissionStore for InMemoryAuthStore {
    async fn find_permission(&self, id: PermissionId) -> StoreResult<Option<Permission>> {
        Ok(self.read()?.permissions.get(&id).cloned())
    }

    async fn find_permission_by_key(
        &self,
        resource: &str,
        action: PermissionAction,
    ) -> StoreResult<Option<Permission>> {
        Ok(self
            .read()?
            .permissions
            .values()
            .find(|p| p.key() == (resource, action))
            .cloned())
    }

    async fn list_permissions(&self) -> StoreResult<Vec<Permission>> {
        let tables = self.read()?;
        let mut permissions: Vec<Permission> = tables.permissions.values().cloned().collect();
        permissions.sort_by(|a, b| (&a.resource, a.action).cmp(&(&b.resource, b.action)));
        Ok(permissions)
    }

    async fn insert_permission(&self, permission: &Permission) -> StoreResult<()> {
        let mut tables = self.write()?;
        if tables.permissions.values().any(|p| p.key() == permission.key()) {
            return Err(StoreError::Duplicate("permission resource/action".into()));
        }
        if tables.permissions.values().any(|p| p.name == permission.name) {
            return Err(StoreError::Duplicate("permission name".into()));
        }
        put(&mut tables.permissions, permission);
        Ok(())
    }

    async fn update_permission(&self, permission: &Permission) -> StoreResult<()> {
        let mut tables = self.write()?;
        if tables
            .permissions
            .values()
            .any(|p| p.name == permission.name && p.id != permission.id)
        {
            return Err(StoreError::Duplicate("permission name".into()));
        }
        let stored = tables
            .permissions
            .get_mut(&permission.id)
            .ok_or_else(|| StoreError::NotFound("permission".into()))?;
        stored.name = permission.name.clone();
        stored.display_name = permission.display_name.clone();
        stored.description = permission.description.clone();
        Ok(())
    }

    async fn delete_permission(&self, id: PermissionId) -> StoreResult<()> {
        let mut tables = self.write()?;
        if tables.permissions.remove(&id).is_none() {
            return Err(StoreError::NotFound("permission".into()));
        }
        for role in tables.roles.values_mut() {
            role.permissions.remove(&id);
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Menus
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait]
impl MenuStore for InMemoryAuthStore {
    async fn find_menu(&self, id: MenuId) -> StoreResult<Option<Menu>> {
        Ok(self.read()?.menus.get(&id).cloned())
    }

    async fn list_menus(&self) -> StoreResult<Vec<Menu>> {
        let tables = self.read()?;
        let mut menus: Vec<Menu> = tables.menus.values().cloned().collect();
        menus.sort_by_key(|m| (m.level, m.sort_order, m.id));
        Ok(menus)
    }

    async fn insert_menu(&self, menu: &Menu) -> StoreResult<()> {
        let mut tables = self.write()?;
        if tables.menus.contains_key(&menu.id) {
            return Err(StoreError::Duplicate("menu id".into()));
        }
        if let Some(parent) = menu.parent_id {
            if !tables.menus.contains_key(&parent) {
                return Err(StoreError::NotFound("parent menu".into()));
            }
        }
        put(&mut tables.menus, menu);
        Ok(())
    }

    async fn delete_menus(&self, ids: &[MenuId]) -> StoreResult<()> {
        let mut tables = self.write()?;
        let doomed: BTreeSet<MenuId> = ids.iter().copied().collect();
        tables.menus.retain(|id, _| !doomed.contains(id));
        tables.role_grants.retain(|(_, menu), _| !doomed.contains(menu));
        tables.user_overrides.retain(|(_, menu), _| !doomed.contains(menu));
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Menu grants and per-user records
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait]
impl MenuPermissionStore for InMemoryAuthStore {
    async fn role_grants_for_role(&self, role: RoleId) -> StoreResult<Vec<RoleMenuGrant>> {
        Ok(self
            .read()?
            .role_grants
            .values()
            .filter(|g| g.role_id == role)
            .cloned()
            .collect())
    }

    async fn role_grants_for_menu(&self, menu: MenuId) -> StoreResult<Vec<RoleMenuGrant>> {
        Ok(self
            .read()?
            .role_grants
            .values()
            .filter(|g| g.menu_id == menu)
            .cloned()
            .collect())
    }

    async fn upsert_role_grant(&self, grant: &RoleMenuGrant) -> StoreResult<()> {
        let mut tables = self.write()?;
        if !tables.roles.contains_key(&grant.role_id) {
            return Err(StoreError::NotFound("role".into()));
        }
        if !tables.menus.contains_key(&grant.menu_id) {
            return Err(StoreError::NotFound("menu".into()));
        }
        tables
            .role_grants
            .insert((grant.role_id, grant.menu_id), grant.clone());
        Ok(())
    }

    async fn delete_role_grant(&self, role: RoleId, menu: MenuId) -> StoreResult<bool> {
        Ok(self.write()?.role_grants.remove(&(role, menu)).is_some())
    }

    async fn user_overrides(&self, user: UserId) -> StoreResult<Vec<UserMenuOverride>> {
        Ok(self
            .read()?
            .user_overrides
            .values()
            .filter(|o| o.user_id == user)
            .cloned()
            .collect())
    }

    async fn find_user_override(
        &self,
        user: UserId,
        menu: MenuId,
    ) -> StoreResult<Option<UserMenuOverride>> {
        Ok(self.read()?.user_overrides.get(&(user, menu)).cloned())
    }

    async fn upsert_user_override(&self, record: &UserMenuOverride) -> StoreResult<()> {
        let mut tables = self.write()?;
        if !tables.users.contains_key(&record.user_id) {
            return Err(StoreError::NotFound("user".into()));
        }
        if !tables.menus.contains_key(&record.menu_id) {
            return Err(StoreError::NotFound("menu".into()));
        }
        tables
            .user_overrides
            .insert((record.user_id, record.menu_id), record.clone());
        Ok(())
    }

    async fn delete_user_override(&self, user: UserId, menu: MenuId) -> StoreResult<bool> {
        Ok(self.write()?.user_overrides.remove(&(user, menu)).is_some())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Atomic compounds
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait]
impl AuthStore for InMemoryAuthStore {
    async fn record_login_failure(
        &self,
        user: UserId,
        now: DateTime<Utc>,
        policy: &LockoutPolicy,
    ) -> StoreResult<LockoutState> {
        let mut tables = self.write()?;
        let stored = tables
            .users
            .get_mut(&user)
            .ok_or_else(|| StoreError::NotFound("user".into()))?;
        let current = LockoutState {
            failed_attempts: stored.failed_login_attempts,
            locked_until: stored.locked_until,
        };
        let next = policy.register_failure(current, now);
        stored.failed_login_attempts = next.failed_attempts;
        stored.locked_until = next.locked_until;
        stored.updated_at = now;
        Ok(next)
    }

    async fn record_login_success(&self, user: UserId, now: DateTime<Utc>) -> StoreResult<()> {
        let mut tables = self.write()?;
        let stored = tables
            .users
            .get_mut(&user)
            .ok_or_else(|| StoreError::NotFound("user".into()))?;
        stored.failed_login_attempts = 0;
        stored.locked_until = None;
        stored.last_login_at = Some(now);
        stored.updated_at = now;
        Ok(())
    }

    async fn rewrite_menu_tree(&self, plan: &MenuTreePlan<'_>) -> StoreResult<Vec<Menu>> {
        let mut tables = self.write()?;
        let rows = plan(MenuTree::new(tables.menus.values().cloned()))?;
        if let Some(missing) = rows.iter().find(|m| !tables.menus.contains_key(&m.id)) {
            return Err(StoreError::NotFound(format!("menu {}", missing.id)));
        }
        for menu in &rows {
            put(&mut tables.menus, menu);
        }
        Ok(rows)
    }

    async fn load_snapshot(
        &self,
        user: UserId,
        scope: MenuScope,
    ) -> StoreResult<Option<ResolutionSnapshot>> {
        let tables = self.read()?;
        let Some(user) = tables.users.get(&user).cloned() else {
            return Ok(None);
        };

        let mut roles: Vec<Role> = user
            .roles
            .iter()
            .filter_map(|id| tables.roles.get(id).cloned())
            .collect();
        roles.sort_by(|a, b| a.name.as_str().cmp(b.name.as_str()));

        let permission_ids: BTreeSet<PermissionId> = roles
            .iter()
            .flat_map(|r| r.permissions.iter().copied())
            .collect();
        let permissions: Vec<Permission> = permission_ids
            .iter()
            .filter_map(|id| tables.permissions.get(id).cloned())
            .collect();

        let menus: Vec<Menu> = match scope {
            MenuScope::None => Vec::new(),
            MenuScope::One(id) => tables.menus.get(&id).cloned().into_iter().collect(),
            MenuScope::All => tables.menus.values().cloned().collect(),
        };
        let in_scope: BTreeSet<MenuId> = menus.iter().map(|m| m.id).collect();

        let role_grants = tables
            .role_grants
            .values()
            .filter(|g| user.roles.contains(&g.role_id) && in_scope.contains(&g.menu_id))
            .cloned()
            .collect();
        let user_overrides = tables
            .user_overrides
            .values()
            .filter(|o| o.user_id == user.id && in_scope.contains(&o.menu_id))
            .cloned()
            .collect();
        let known_resources = tables
            .permissions
            .values()
            .map(|p| p.resource.clone())
            .collect();

        Ok(Some(ResolutionSnapshot {
            user,
            roles,
            permissions,
            menus,
            role_grants,
            user_overrides,
            known_resources,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use backoffice_auth::{MenuType, PermissionAction};
    use backoffice_core::{DomainError, DomainResult};
    use chrono::Duration;

    fn permission(resource: &str, action: PermissionAction) -> Permission {
        Permission {
            id: PermissionId::new(),
            name: format!("{}_{}", resource.to_uppercase(), action.as_str()),
            display_name: None,
            description: None,
            resource: resource.to_string(),
            action,
            created_at: Utc::now(),
        }
    }

    fn menu(name: &str, parent: Option<MenuId>, level: u32) -> Menu {
        let now = Utc::now();
        Menu {
            id: MenuId::new(),
            name: name.to_string(),
            display_name: None,
            url: Some(format!("/{name}")),
            icon: None,
            menu_type: MenuType::Internal,
            target_window: None,
            sort_order: 0,
            parent_id: parent,
            level,
            is_visible: true,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn duplicate_email_is_rejected() {
        let store = InMemoryAuthStore::new();
        let now = Utc::now();
        store
            .insert_user(&User::new("a@x.com".into(), "h".into(), now))
            .await
            .unwrap();
        let err = store
            .insert_user(&User::new("a@x.com".into(), "h".into(), now))
            .await
            .unwrap_err();
        assert_eq!(err, StoreError::Duplicate("email".into()));
    }

    #[tokio::test]
    async fn duplicate_permission_pair_is_rejected_even_with_new_name() {
        let store = InMemoryAuthStore::new();
        store
            .insert_permission(&permission("orders", PermissionAction::View))
            .await
            .unwrap();
        let mut again = permission("orders", PermissionAction::View);
        again.name = "SOMETHING_ELSE".into();
        assert!(matches!(
            store.insert_permission(&again).await,
            Err(StoreError::Duplicate(_))
        ));
    }

    #[tokio::test]
    async fn update_user_leaves_roles_and_lockout_alone() {
        let store = InMemoryAuthStore::new();
        let now = Utc::now();
        let role = Role::new(RoleName::USER, None, now);
        store.insert_role(&role).await.unwrap();
        let mut user = User::new("a@x.com".into(), "h".into(), now);
        user.roles.insert(role.id);
        store.insert_user(&user).await.unwrap();
        store
            .record_login_failure(user.id, now, &LockoutPolicy::default())
            .await
            .unwrap();

        let mut edited = user.clone();
        edited.roles.clear();
        edited.first_name = Some("Ada".into());
        store.update_user(&edited).await.unwrap();

        let stored = store.find_user(user.id).await.unwrap().unwrap();
        assert_eq!(stored.first_name.as_deref(), Some("Ada"));
        assert!(stored.roles.contains(&role.id));
        assert_eq!(stored.failed_login_attempts, 1);
    }

    #[tokio::test]
    async fn deleting_a_permission_strips_it_from_roles() {
        let store = InMemoryAuthStore::new();
        let now = Utc::now();
        let p = permission("orders", PermissionAction::View);
        store.insert_permission(&p).await.unwrap();
        let mut role = Role::new(RoleName::new("ROLE_CLERK"), None, now);
        role.permissions.insert(p.id);
        store.insert_role(&role).await.unwrap();

        store.delete_permission(p.id).await.unwrap();
        let stored = store.find_role(role.id).await.unwrap().unwrap();
        assert!(stored.permissions.is_empty());
    }

    #[tokio::test]
    async fn deleting_menus_drops_their_grants_and_overrides() {
        let store = InMemoryAuthStore::new();
        let now = Utc::now();
        let role = Role::new(RoleName::USER, None, now);
        store.insert_role(&role).await.unwrap();
        let user = User::new("a@x.com".into(), "h".into(), now);
        store.insert_user(&user).await.unwrap();
        let m = menu("reports", None, 0);
        store.insert_menu(&m).await.unwrap();
        store
            .upsert_role_grant(&RoleMenuGrant {
                role_id: role.id,
                menu_id: m.id,
                permissions: Default::default(),
            })
            .await
            .unwrap();
        store
            .upsert_user_override(&UserMenuOverride::favorite_only(user.id, m.id))
            .await
            .unwrap();

        store.delete_menus(&[m.id]).await.unwrap();
        assert!(store.role_grants_for_role(role.id).await.unwrap().is_empty());
        assert!(store.user_overrides(user.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn insert_menu_requires_existing_parent() {
        let store = InMemoryAuthStore::new();
        let orphan = menu("orphan", Some(MenuId::new()), 1);
        assert!(matches!(
            store.insert_menu(&orphan).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn tree_rewrite_plans_against_the_stored_rows() {
        let store = InMemoryAuthStore::new();
        let a = menu("a", None, 0);
        let b = menu("b", None, 0);
        store.insert_menu(&a).await.unwrap();
        store.insert_menu(&b).await.unwrap();

        // A copy read now would happily accept b under a.
        let mut stale = MenuTree::new(store.list_menus().await.unwrap());
        assert!(stale.reparent(b.id, Some(a.id)).is_ok());

        let move_under = |node: MenuId, parent: MenuId| {
            move |mut tree: MenuTree| -> DomainResult<Vec<Menu>> {
                let changed = tree.reparent(node, Some(parent))?;
                Ok(changed.iter().filter_map(|id| tree.get(*id).cloned()).collect())
            }
        };

        let written = store.rewrite_menu_tree(&move_under(a.id, b.id)).await.unwrap();
        assert_eq!(written.len(), 1);
        assert_eq!(written[0].level, 1);

        let err = store
            .rewrite_menu_tree(&move_under(b.id, a.id))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Rejected(DomainError::CyclicHierarchy(_))));
        assert_eq!(store.find_menu(b.id).await.unwrap().unwrap().parent_id, None);
    }

    #[tokio::test]
    async fn failure_after_elapsed_lock_restarts_count() {
        let store = InMemoryAuthStore::new();
        let now = Utc::now();
        let user = User::new("a@x.com".into(), "h".into(), now);
        store.insert_user(&user).await.unwrap();
        let policy = LockoutPolicy {
            max_failed_attempts: 2,
            lock_duration: Duration::minutes(1),
        };

        store.record_login_failure(user.id, now, &policy).await.unwrap();
        let locked = store.record_login_failure(user.id, now, &policy).await.unwrap();
        assert!(locked.is_locked(now));

        let later = now + Duration::minutes(2);
        let after = store.record_login_failure(user.id, later, &policy).await.unwrap();
        assert_eq!(after.failed_attempts, 1);
        assert_eq!(after.locked_until, None);
    }

    #[tokio::test]
    async fn snapshot_scopes_menus_and_grants() {
        let store = InMemoryAuthStore::new();
        let now = Utc::now();
        let p = permission("orders", PermissionAction::View);
        store.insert_permission(&p).await.unwrap();
        let mut role = Role::new(RoleName::USER, None, now);
        role.permissions.insert(p.id);
        store.insert_role(&role).await.unwrap();
        let other = Role::new(RoleName::new("ROLE_OTHER"), None, now);
        store.insert_role(&other).await.unwrap();
        let mut user = User::new("a@x.com".into(), "h".into(), now);
        user.roles.insert(role.id);
        store.insert_user(&user).await.unwrap();

        let a = menu("a", None, 0);
        let b = menu("b", None, 0);
        store.insert_menu(&a).await.unwrap();
        store.insert_menu(&b).await.unwrap();
        for (r, m) in [(role.id, a.id), (role.id, b.id), (other.id, a.id)] {
            store
                .upsert_role_grant(&RoleMenuGrant {
                    role_id: r,
                    menu_id: m,
                    permissions: Default::default(),
                })
                .await
                .unwrap();
        }

        let one = store
            .load_snapshot(user.id, MenuScope::One(a.id))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(one.menus.len(), 1);
        assert_eq!(one.role_grants.len(), 1);
        assert_eq!(one.role_grants[0].role_id, role.id);
        assert_eq!(one.permissions, vec![p.clone()]);
        assert!(one.known_resources.contains("orders"));

        let none = store
            .load_snapshot(user.id, MenuScope::None)
            .await
            .unwrap()
            .unwrap();
        assert!(none.menus.is_empty());
        assert!(none.role_grants.is_empty());

        assert!(store
            .load_snapshot(UserId::new(), MenuScope::All)
            .await
            .unwrap()
            .is_none());
    }
}
