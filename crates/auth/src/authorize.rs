//! Authorization gate: the single allow/deny decision point.

use backoffice_core::{MenuId, UserId};
use serde::Serialize;
use tracing::debug;

use crate::error::{AuthError, AuthResult};
use crate::menu_permission::MenuAction;
use crate::resolver::{menu_for_url, resolve_menu, resolve_resource, PermissionResolver, Resolution};
use crate::store::MenuScope;
use crate::token::Identity;

/// What a request wants to touch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "target", rename_all = "snake_case")]
pub enum ProtectedResource {
    Menu(MenuId),
    Url(String),
    Resource(String),
}

impl ProtectedResource {
    pub fn resource(name: impl Into<String>) -> Self {
        Self::Resource(name.into())
    }

    fn label(&self) -> String {
        match self {
            Self::Menu(id) => format!("menu {id}"),
            Self::Url(url) => format!("url {url}"),
            Self::Resource(name) => name.clone(),
        }
    }
}

/// Gate decisions are made against live store state, not the token's
/// permission snapshot.
#[derive(Clone)]
pub struct AuthorizationGate {
    resolver: PermissionResolver,
}

impl AuthorizationGate {
    pub fn new(resolver: PermissionResolver) -> Self {
        Self { resolver }
    }

    pub fn resolver(&self) -> &PermissionResolver {
        &self.resolver
    }

    /// Allow or deny `action` on `target` for the bearer of `identity`.
    ///
    /// A vanished account reads as an invalid token; an unknown target
    /// denies.
    pub async fn check(
        &self,
        identity: &Identity,
        target: &ProtectedResource,
        action: MenuAction,
    ) -> AuthResult<()> {
        let resolution = self.resolution_for(identity.user_id, target).await?;
        let allowed = resolution.is_some_and(|r| r.permissions.allows(action));
        debug!(user_id = %identity.user_id, target = %target.label(), %action, allowed, "gate decision");

        if allowed {
            Ok(())
        } else {
            Err(AuthError::insufficient(target.label(), action.as_str()))
        }
    }

    async fn resolution_for(&self, user: UserId, target: &ProtectedResource) -> AuthResult<Option<Resolution>> {
        let scope = match target {
            ProtectedResource::Menu(id) => MenuScope::One(*id),
            ProtectedResource::Url(_) => MenuScope::All,
            ProtectedResource::Resource(_) => MenuScope::None,
        };
        let snapshot = match self.resolver.snapshot(user, scope).await {
            Ok(s) => s,
            Err(AuthError::NotFound(_)) => return Err(AuthError::TokenInvalid),
            Err(e) => return Err(e),
        };
        if !snapshot.user.is_active {
            return Err(AuthError::AccountDisabled);
        }

        let policy = self.resolver.policy();
        Ok(match target {
            ProtectedResource::Menu(id) => snapshot
                .menus
                .iter()
                .find(|m| m.id == *id)
                .map(|m| resolve_menu(&snapshot, m, policy)),
            ProtectedResource::Url(url) => {
                menu_for_url(&snapshot, url).map(|m| resolve_menu(&snapshot, m, policy))
            }
            ProtectedResource::Resource(name) => resolve_resource(&snapshot, name).ok(),
        })
    }
}
