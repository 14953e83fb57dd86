use std::borrow::Cow;
use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use backoffice_core::{DomainError, Entity, PermissionId, RoleId};

use crate::permissions::{Permission, PermissionAction};

/// Role name used for RBAC (e.g. `ROLE_ADMIN`).
///
/// Names are upper-case with a `ROLE_` prefix; [`RoleName::parse`] enforces
/// that for user input.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoleName(Cow<'static, str>);

impl RoleName {
    /// Universal bypass role.
    pub const ADMIN: RoleName = RoleName(Cow::Borrowed("ROLE_ADMIN"));
    /// Assigned to every account at registration.
    pub const USER: RoleName = RoleName(Cow::Borrowed("ROLE_USER"));
    /// Default manager-tier role name.
    pub const MANAGER: RoleName = RoleName(Cow::Borrowed("ROLE_MANAGER"));

    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    /// Normalise free-form input: trim, upper-case, spaces to `_`, add the
    /// `ROLE_` prefix when missing.
    pub fn parse(input: &str) -> Result<Self, DomainError> {
        let mut name = input.trim().to_ascii_uppercase().replace([' ', '-'], "_");
        if name.is_empty() {
            return Err(DomainError::validation("role name cannot be empty"));
        }
        if !name.starts_with("ROLE_") {
            name.insert_str(0, "ROLE_");
        }
        if name.len() > 64 {
            return Err(DomainError::validation("role name is longer than 64 characters"));
        }
        if !name.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_') {
            return Err(DomainError::validation(format!(
                "role name '{name}' may only contain letters, digits and '_'"
            )));
        }
        Ok(Self(Cow::Owned(name)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for RoleName {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Role {
    pub id: RoleId,
    pub name: RoleName,
    pub display_name: Option<String>,
    pub description: Option<String>,
    /// Built-in roles cannot be deleted.
    pub is_system: bool,
    pub permissions: BTreeSet<PermissionId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Entity for Role {
    type Id = RoleId;

    fn id(&self) -> &RoleId {
        &self.id
    }
}

impl Role {
    pub fn new(name: RoleName, display_name: Option<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: RoleId::new(),
            name,
            display_name,
            description: None,
            is_system: false,
            permissions: BTreeSet::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.name == RoleName::ADMIN
    }

    /// Copy of this role under a new name: same grants, never a system role.
    pub fn duplicate(&self, name: RoleName, now: DateTime<Utc>) -> Self {
        let base = self.display_name.as_deref().unwrap_or(self.name.as_str());
        Self {
            id: RoleId::new(),
            name,
            display_name: Some(format!("{base} (Copy)")),
            description: self.description.clone(),
            is_system: false,
            permissions: self.permissions.clone(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Predefined role shapes offered to administrators.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoleTemplate {
    Viewer,
    Editor,
    Moderator,
}

impl RoleTemplate {
    pub const ALL: [RoleTemplate; 3] = [Self::Viewer, Self::Editor, Self::Moderator];

    pub fn actions(&self) -> &'static [PermissionAction] {
        use PermissionAction::*;
        match self {
            Self::Viewer => &[View],
            Self::Editor => &[View, Create, Update],
            Self::Moderator => &[View, Update, Delete],
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Viewer => "Viewer",
            Self::Editor => "Editor",
            Self::Moderator => "Moderator",
        }
    }

    /// Permissions from `catalogue` this template grants (every resource).
    pub fn select(&self, catalogue: &[Permission]) -> BTreeSet<PermissionId> {
        catalogue
            .iter()
            .filter(|p| self.actions().contains(&p.action))
            .map(|p| p.id)
            .collect()
    }
}
