use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use backoffice_core::{Clock, RoleId, UserId};

use crate::error::{AuthError, AuthResult};
use crate::password::{CredentialHasher, PasswordPolicy};
use crate::store::{AuthStore, MenuScope};
use crate::user::{normalize_email, AccountState, ProfileUpdate, User, UserView};

/// Lifecycle view of an account for administrators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountStatus {
    pub user_id: UserId,
    #[serde(flatten)]
    pub state: AccountState,
    pub failed_login_attempts: u32,
}

#[derive(Clone)]
pub struct UserAdmin {
    store: Arc<dyn AuthStore>,
    hasher: Arc<dyn CredentialHasher>,
    clock: Arc<dyn Clock>,
    password_policy: PasswordPolicy,
}

impl UserAdmin {
    pub fn new(
        store: Arc<dyn AuthStore>,
        hasher: Arc<dyn CredentialHasher>,
        clock: Arc<dyn Clock>,
        password_policy: PasswordPolicy,
    ) -> Self {
        Self {
            store,
            hasher,
            clock,
            password_policy,
        }
    }

    async fn load(&self, id: UserId) -> AuthResult<User> {
        self.store
            .find_user(id)
            .await?
            .ok_or_else(|| AuthError::not_found("user"))
    }

    async fn view(&self, user: &User) -> AuthResult<UserView> {
        let roles = self.store.list_roles().await?;
        Ok(UserView::new(user, &roles))
    }

    pub async fn list(&self) -> AuthResult<Vec<UserView>> {
        let roles = self.store.list_roles().await?;
        let mut users = self.store.list_users().await?;
        users.sort_by(|a, b| a.email.cmp(&b.email));
        Ok(users.iter().map(|u| UserView::new(u, &roles)).collect())
    }

    pub async fn get(&self, id: UserId) -> AuthResult<UserView> {
        let user = self.load(id).await?;
        self.view(&user).await
    }

    pub async fn status(&self, id: UserId) -> AuthResult<AccountStatus> {
        let user = self.load(id).await?;
        Ok(AccountStatus {
            user_id: user.id,
            state: AccountState::of(&user, self.clock.now()),
            failed_login_attempts: user.failed_login_attempts,
        })
    }

    /// Update profile fields; a password change needs the current password.
    pub async fn update(&self, id: UserId, update: ProfileUpdate) -> AuthResult<UserView> {
        let mut user = self.load(id).await?;

        if let Some(email) = update.email.as_deref() {
            let email = normalize_email(email)?;
            if email != user.email {
                if self.store.find_user_by_email(&email).await?.is_some() {
                    return Err(AuthError::duplicate("email"));
                }
                user.email = email;
                user.email_verified = false;
            }
        }

        if let Some(new_password) = update.new_password.as_deref() {
            let current = update.current_password.as_deref().unwrap_or_default();
            if !self.hasher.verify(current, &user.password_hash) {
                return Err(AuthError::validation("current password is incorrect"));
            }
            self.password_policy.check(new_password)?;
            user.password_hash = self.hasher.hash(new_password)?;
        }

        if let Some(first) = update.first_name {
            user.first_name = non_empty(first);
        }
        if let Some(last) = update.last_name {
            user.last_name = non_empty(last);
        }
        if let Some(phone) = update.phone_number {
            user.phone_number = non_empty(phone);
        }

        user.updated_at = self.clock.now();
        self.store.update_user(&user).await?;
        self.view(&user).await
    }

    /// Soft delete: the account stays, but can no longer log in.
    pub async fn deactivate(&self, id: UserId) -> AuthResult<UserView> {
        self.set_active(id, false).await
    }

    pub async fn activate(&self, id: UserId) -> AuthResult<UserView> {
        self.set_active(id, true).await
    }

    async fn set_active(&self, id: UserId, active: bool) -> AuthResult<UserView> {
        let mut user = self.load(id).await?;
        if user.is_active != active {
            user.is_active = active;
            user.updated_at = self.clock.now();
            self.store.update_user(&user).await?;
            info!(user_id = %id, active, "account activation changed");
        }
        self.view(&user).await
    }

    /// Clear the failure counter and any lock ahead of expiry.
    pub async fn unlock(&self, id: UserId) -> AuthResult<AccountStatus> {
        self.load(id).await?;
        self.store.clear_lockout(id, self.clock.now()).await?;
        info!(user_id = %id, "account unlocked by administrator");
        self.status(id).await
    }

    pub async fn assign_role(&self, id: UserId, role: RoleId) -> AuthResult<UserView> {
        self.load(id).await?;
        self.store
            .find_role(role)
            .await?
            .ok_or_else(|| AuthError::not_found("role"))?;
        self.store.add_user_role(id, role).await?;
        self.get(id).await
    }

    /// Refuses to strip an account's last role.
    pub async fn remove_role(&self, id: UserId, role: RoleId) -> AuthResult<UserView> {
        let user = self.load(id).await?;
        if !user.roles.contains(&role) {
            return Err(AuthError::not_found("role assignment"));
        }
        if user.roles.len() == 1 {
            return Err(AuthError::invalid_state("a user must hold at least one role"));
        }
        self.store.remove_user_role(id, role).await?;
        self.get(id).await
    }

    /// Union of permission names over the user's roles.
    pub async fn effective_permissions(&self, id: UserId) -> AuthResult<BTreeSet<String>> {
        let snapshot = self
            .store
            .load_snapshot(id, MenuScope::None)
            .await?
            .ok_or_else(|| AuthError::not_found("user"))?;
        Ok(snapshot.permission_names())
    }
}

fn non_empty(value: String) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}
