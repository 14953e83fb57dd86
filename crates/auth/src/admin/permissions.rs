use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Deserialize;
use tracing::info;

use backoffice_core::{Clock, PermissionId};

use crate::error::{AuthError, AuthResult};
use crate::permissions::{normalize_resource, NewPermission, Permission, PermissionAction, PermissionTemplate};
use crate::store::AuthStore;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionUpdate {
    pub name: Option<String>,
    pub display_name: Option<String>,
    pub description: Option<String>,
}

#[derive(Clone)]
pub struct PermissionAdmin {
    store: Arc<dyn AuthStore>,
    clock: Arc<dyn Clock>,
}

impl PermissionAdmin {
    pub fn new(store: Arc<dyn AuthStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    async fn load(&self, id: PermissionId) -> AuthResult<Permission> {
        self.store
            .find_permission(id)
            .await?
            .ok_or_else(|| AuthError::not_found("permission"))
    }

    pub async fn list(&self) -> AuthResult<Vec<Permission>> {
        let mut all = self.store.list_permissions().await?;
        all.sort_by(|a, b| (&a.resource, a.action).cmp(&(&b.resource, b.action)));
        Ok(all)
    }

    pub async fn get(&self, id: PermissionId) -> AuthResult<Permission> {
        self.load(id).await
    }

    /// The `(resource, action)` pair must be unique whatever the name says.
    pub async fn create(&self, input: NewPermission) -> AuthResult<Permission> {
        let permission = input.into_permission(self.clock.now())?;
        if self
            .store
            .find_permission_by_key(&permission.resource, permission.action)
            .await?
            .is_some()
        {
            return Err(AuthError::duplicate(format!(
                "permission for {}:{}",
                permission.resource, permission.action
            )));
        }
        self.store.insert_permission(&permission).await?;
        info!(name = %permission.name, resource = %permission.resource, action = %permission.action, "permission created");
        Ok(permission)
    }

    pub async fn update(&self, id: PermissionId, update: PermissionUpdate) -> AuthResult<Permission> {
        let mut permission = self.load(id).await?;
        if let Some(name) = update.name {
            let name = name.trim().to_ascii_uppercase();
            if name.is_empty() {
                return Err(AuthError::validation("permission name cannot be empty"));
            }
            permission.name = name;
        }
        if update.display_name.is_some() {
            permission.display_name = update.display_name;
        }
        if update.description.is_some() {
            permission.description = update.description;
        }
        self.store.update_permission(&permission).await?;
        Ok(permission)
    }

    /// Also strips the permission from every role.
    pub async fn delete(&self, id: PermissionId) -> AuthResult<()> {
        let permission = self.load(id).await?;
        self.store.delete_permission(id).await?;
        info!(name = %permission.name, "permission deleted");
        Ok(())
    }

    pub async fn by_resource(&self, resource: &str) -> AuthResult<Vec<Permission>> {
        let resource = normalize_resource(resource)?;
        Ok(self
            .list()
            .await?
            .into_iter()
            .filter(|p| p.resource == resource)
            .collect())
    }

    pub async fn resources(&self) -> AuthResult<BTreeSet<String>> {
        Ok(self
            .store
            .list_permissions()
            .await?
            .into_iter()
            .map(|p| p.resource)
            .collect())
    }

    pub fn actions(&self) -> &'static [PermissionAction] {
        &PermissionAction::ALL
    }

    /// Create the template's permissions for `resource`, skipping pairs
    /// that already exist. Returns what was created.
    pub async fn create_from_template(
        &self,
        template: PermissionTemplate,
        resource: &str,
    ) -> AuthResult<Vec<Permission>> {
        let resource = normalize_resource(resource)?;
        let mut created = Vec::new();
        for input in template.expand(&resource) {
            if self
                .store
                .find_permission_by_key(&input.resource, input.action)
                .await?
                .is_some()
            {
                continue;
            }
            created.push(self.create(input).await?);
        }
        Ok(created)
    }
}
