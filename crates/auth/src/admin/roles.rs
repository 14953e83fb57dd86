use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Deserialize;
use tracing::info;

use backoffice_core::{Clock, PermissionId, RoleId};

use crate::error::{AuthError, AuthResult};
use crate::permissions::Permission;
use crate::roles::{Role, RoleName, RoleTemplate};
use crate::store::AuthStore;
use crate::user::UserView;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewRole {
    pub name: String,
    pub display_name: Option<String>,
    pub description: Option<String>,
    #[serde(default)]
    pub permission_ids: BTreeSet<PermissionId>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleUpdate {
    pub name: Option<String>,
    pub display_name: Option<String>,
    pub description: Option<String>,
}

#[derive(Clone)]
pub struct RoleAdmin {
    store: Arc<dyn AuthStore>,
    clock: Arc<dyn Clock>,
}

impl RoleAdmin {
    pub fn new(store: Arc<dyn AuthStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    async fn load(&self, id: RoleId) -> AuthResult<Role> {
        self.store
            .find_role(id)
            .await?
            .ok_or_else(|| AuthError::not_found("role"))
    }

    async fn ensure_name_free(&self, name: &RoleName) -> AuthResult<()> {
        if self.store.find_role_by_name(name).await?.is_some() {
            return Err(AuthError::duplicate(format!("role {name}")));
        }
        Ok(())
    }

    async fn ensure_permissions_exist(&self, ids: &BTreeSet<PermissionId>) -> AuthResult<()> {
        for id in ids {
            if self.store.find_permission(*id).await?.is_none() {
                return Err(AuthError::not_found(format!("permission {id}")));
            }
        }
        Ok(())
    }

    pub async fn list(&self) -> AuthResult<Vec<Role>> {
        let mut roles = self.store.list_roles().await?;
        roles.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(roles)
    }

    pub async fn get(&self, id: RoleId) -> AuthResult<Role> {
        self.load(id).await
    }

    pub async fn create(&self, input: NewRole) -> AuthResult<Role> {
        let name = RoleName::parse(&input.name)?;
        self.ensure_name_free(&name).await?;
        self.ensure_permissions_exist(&input.permission_ids).await?;

        let mut role = Role::new(name, input.display_name, self.clock.now());
        role.description = input.description;
        role.permissions = input.permission_ids;
        self.persist_new(&role).await?;
        info!(role = %role.name, "role created");
        Ok(role)
    }

    async fn persist_new(&self, role: &Role) -> AuthResult<()> {
        self.store.insert_role(role).await?;
        if !role.permissions.is_empty() {
            self.store.set_role_permissions(role.id, &role.permissions).await?;
        }
        Ok(())
    }

    /// System role names are immutable; their display metadata is not.
    pub async fn update(&self, id: RoleId, update: RoleUpdate) -> AuthResult<Role> {
        let mut role = self.load(id).await?;

        if let Some(name) = update.name.as_deref() {
            let name = RoleName::parse(name)?;
            if name != role.name {
                if role.is_system {
                    return Err(AuthError::invalid_state("system role names cannot change"));
                }
                self.ensure_name_free(&name).await?;
                role.name = name;
            }
        }
        if update.display_name.is_some() {
            role.display_name = update.display_name;
        }
        if update.description.is_some() {
            role.description = update.description;
        }

        role.updated_at = self.clock.now();
        self.store.update_role(&role).await?;
        Ok(role)
    }

    /// Removes the role from every holder; system roles are protected.
    /// Refused for system roles and while any holder has no other role.
    pub async fn delete(&self, id: RoleId) -> AuthResult<()> {
        let role = self.load(id).await?;
        if role.is_system {
            return Err(AuthError::invalid_state(format!("system role {} cannot be deleted", role.name)));
        }
        let stranded = self
            .store
            .users_with_role(id)
            .await?
            .iter()
            .filter(|u| u.roles.len() == 1)
            .count();
        if stranded > 0 {
            return Err(AuthError::invalid_state(format!(
                "role {} is the only role of {stranded} user(s)",
                role.name
            )));
        }
        self.store.delete_role(id).await?;
        info!(role = %role.name, "role deleted");
        Ok(())
    }

    /// Replace the role's permission set.
    pub async fn assign_permissions(&self, id: RoleId, permissions: BTreeSet<PermissionId>) -> AuthResult<Role> {
        let mut role = self.load(id).await?;
        self.ensure_permissions_exist(&permissions).await?;
        self.store.set_role_permissions(id, &permissions).await?;
        role.permissions = permissions;
        Ok(role)
    }

    pub async fn revoke_permission(&self, id: RoleId, permission: PermissionId) -> AuthResult<Role> {
        let mut role = self.load(id).await?;
        if !role.permissions.remove(&permission) {
            return Err(AuthError::not_found("permission on role"));
        }
        self.store.set_role_permissions(id, &role.permissions).await?;
        Ok(role)
    }

    pub async fn permissions_of(&self, id: RoleId) -> AuthResult<Vec<Permission>> {
        let role = self.load(id).await?;
        let mut permissions: Vec<Permission> = self
            .store
            .list_permissions()
            .await?
            .into_iter()
            .filter(|p| role.permissions.contains(&p.id))
            .collect();
        permissions.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(permissions)
    }

    pub async fn holders(&self, id: RoleId) -> AuthResult<Vec<UserView>> {
        self.load(id).await?;
        let roles = self.store.list_roles().await?;
        let users = self.store.users_with_role(id).await?;
        Ok(users.iter().map(|u| UserView::new(u, &roles)).collect())
    }

    /// Create a role granting the template's actions on every resource.
    pub async fn create_from_template(&self, template: RoleTemplate, name: Option<String>) -> AuthResult<Role> {
        let name = match name {
            Some(n) => RoleName::parse(&n)?,
            None => RoleName::parse(template.display_name())?,
        };
        self.ensure_name_free(&name).await?;

        let catalogue = self.store.list_permissions().await?;
        let mut role = Role::new(name, Some(template.display_name().to_string()), self.clock.now());
        role.permissions = template.select(&catalogue);
        self.persist_new(&role).await?;
        Ok(role)
    }

    /// Copy of `id` with the same permissions; never a system role.
    pub async fn duplicate(&self, id: RoleId, name: Option<String>) -> AuthResult<Role> {
        let source = self.load(id).await?;
        let name = match name {
            Some(n) => RoleName::parse(&n)?,
            None => RoleName::parse(&format!("{}_COPY", source.name))?,
        };
        self.ensure_name_free(&name).await?;

        let copy = source.duplicate(name, self.clock.now());
        self.persist_new(&copy).await?;
        Ok(copy)
    }
}
