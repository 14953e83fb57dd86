//! Permission catalogue: one record per `(resource, action)` pair.

use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use backoffice_core::{DomainError, Entity, PermissionId};

/// Action half of a permission.
///
/// Holding any permission whose action is `Admin` is equivalent to holding
/// `ROLE_ADMIN` for resolution purposes.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PermissionAction {
    View,
    Create,
    Update,
    Delete,
    Execute,
    Admin,
}

impl PermissionAction {
    pub const ALL: [PermissionAction; 6] = [
        Self::View,
        Self::Create,
        Self::Update,
        Self::Delete,
        Self::Execute,
        Self::Admin,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::View => "VIEW",
            Self::Create => "CREATE",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
            Self::Execute => "EXECUTE",
            Self::Admin => "ADMIN",
        }
    }
}

impl core::fmt::Display for PermissionAction {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PermissionAction {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "VIEW" => Ok(Self::View),
            "CREATE" => Ok(Self::Create),
            "UPDATE" => Ok(Self::Update),
            "DELETE" => Ok(Self::Delete),
            "EXECUTE" => Ok(Self::Execute),
            "ADMIN" => Ok(Self::Admin),
            other => Err(DomainError::validation(format!(
                "unknown permission action '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Permission {
    pub id: PermissionId,
    pub name: String,
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub resource: String,
    pub action: PermissionAction,
    pub created_at: DateTime<Utc>,
}

impl Entity for Permission {
    type Id = PermissionId;

    fn id(&self) -> &PermissionId {
        &self.id
    }
}

impl Permission {
    /// Natural key; unique across the catalogue.
    pub fn key(&self) -> (&str, PermissionAction) {
        (&self.resource, self.action)
    }
}

/// Input for creating a permission.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPermission {
    pub name: String,
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub resource: String,
    pub action: PermissionAction,
}

impl NewPermission {
    /// Validate and build the record.
    ///
    /// Resources are stored lower-case; names upper-case.
    pub fn into_permission(self, now: DateTime<Utc>) -> Result<Permission, DomainError> {
        let name = self.name.trim().to_ascii_uppercase();
        if name.is_empty() {
            return Err(DomainError::validation("permission name cannot be empty"));
        }
        let resource = normalize_resource(&self.resource)?;

        Ok(Permission {
            id: PermissionId::new(),
            name,
            display_name: self.display_name,
            description: self.description,
            resource,
            action: self.action,
            created_at: now,
        })
    }
}

pub fn normalize_resource(resource: &str) -> Result<String, DomainError> {
    let resource = resource.trim().to_ascii_lowercase();
    if resource.is_empty() {
        return Err(DomainError::validation("permission resource cannot be empty"));
    }
    if !resource
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
    {
        return Err(DomainError::validation(format!(
            "resource '{resource}' contains invalid characters"
        )));
    }
    Ok(resource)
}

/// Canonical `RESOURCE_ACTION` name used by templates.
pub fn permission_name(resource: &str, action: PermissionAction) -> String {
    format!("{}_{}", resource.to_ascii_uppercase(), action.as_str())
}

// ─────────────────────────────────────────────────────────────────────────────
// Templates
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PermissionTemplate {
    Crud,
    ReadOnly,
    Admin,
    Moderator,
}

impl PermissionTemplate {
    pub fn actions(&self) -> &'static [PermissionAction] {
        use PermissionAction::*;
        match self {
            Self::Crud => &[View, Create, Update, Delete],
            Self::ReadOnly => &[View],
            Self::Admin => &[View, Create, Update, Delete, Execute, Admin],
            Self::Moderator => &[View, Update, Delete],
        }
    }

    /// Expand the template for `resource` into permission inputs.
    pub fn expand(&self, resource: &str) -> Vec<NewPermission> {
        self.actions()
            .iter()
            .map(|action| NewPermission {
                name: permission_name(resource, *action),
                display_name: Some(format!("{} {}", action.as_str(), resource)),
                description: None,
                resource: resource.to_string(),
                action: *action,
            })
            .collect()
    }
}
