//! Six-flag menu capabilities and the per-role / per-user records that
//! override the menu-type defaults.

use serde::{Deserialize, Serialize};

use backoffice_core::{DomainError, MenuId, RoleId, UserId};

use crate::permissions::PermissionAction;

/// One of the six capabilities a menu can grant.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MenuAction {
    View,
    Access,
    Create,
    Update,
    Delete,
    Execute,
}

impl MenuAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::View => "VIEW",
            Self::Access => "ACCESS",
            Self::Create => "CREATE",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
            Self::Execute => "EXECUTE",
        }
    }
}

impl core::fmt::Display for MenuAction {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for MenuAction {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "VIEW" => Ok(Self::View),
            "ACCESS" => Ok(Self::Access),
            "CREATE" => Ok(Self::Create),
            "UPDATE" => Ok(Self::Update),
            "DELETE" => Ok(Self::Delete),
            "EXECUTE" => Ok(Self::Execute),
            other => Err(DomainError::validation(format!("unknown menu action '{other}'"))),
        }
    }
}

/// Effective capability set for one (user, menu) or (user, resource) pair.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MenuPermissions {
    pub can_view: bool,
    pub can_access: bool,
    pub can_create: bool,
    pub can_update: bool,
    pub can_delete: bool,
    pub can_execute: bool,
}

impl MenuPermissions {
    pub const NONE: MenuPermissions = MenuPermissions {
        can_view: false,
        can_access: false,
        can_create: false,
        can_update: false,
        can_delete: false,
        can_execute: false,
    };

    pub const ALL: MenuPermissions = MenuPermissions {
        can_view: true,
        can_access: true,
        can_create: true,
        can_update: true,
        can_delete: true,
        can_execute: true,
    };

    /// View + access only.
    pub const NAVIGATE: MenuPermissions = MenuPermissions {
        can_view: true,
        can_access: true,
        ..MenuPermissions::NONE
    };

    pub fn allows(&self, action: MenuAction) -> bool {
        match action {
            MenuAction::View => self.can_view,
            MenuAction::Access => self.can_access,
            MenuAction::Create => self.can_create,
            MenuAction::Update => self.can_update,
            MenuAction::Delete => self.can_delete,
            MenuAction::Execute => self.can_execute,
        }
    }

    fn flag_mut(&mut self, action: MenuAction) -> &mut bool {
        match action {
            MenuAction::View => &mut self.can_view,
            MenuAction::Access => &mut self.can_access,
            MenuAction::Create => &mut self.can_create,
            MenuAction::Update => &mut self.can_update,
            MenuAction::Delete => &mut self.can_delete,
            MenuAction::Execute => &mut self.can_execute,
        }
    }

    pub fn with(mut self, action: MenuAction) -> Self {
        *self.flag_mut(action) = true;
        self
    }

    /// Flag-wise OR.
    pub fn union(self, other: MenuPermissions) -> Self {
        Self {
            can_view: self.can_view || other.can_view,
            can_access: self.can_access || other.can_access,
            can_create: self.can_create || other.can_create,
            can_update: self.can_update || other.can_update,
            can_delete: self.can_delete || other.can_delete,
            can_execute: self.can_execute || other.can_execute,
        }
    }

    /// Capabilities a role permission with `action` confers on its resource.
    pub fn from_action(action: PermissionAction) -> Self {
        match action {
            PermissionAction::View => Self::NAVIGATE,
            PermissionAction::Create => Self::NONE.with(MenuAction::Create),
            PermissionAction::Update => Self::NONE.with(MenuAction::Update),
            PermissionAction::Delete => Self::NONE.with(MenuAction::Delete),
            PermissionAction::Execute => Self::NONE.with(MenuAction::Execute),
            PermissionAction::Admin => Self::ALL,
        }
    }
}

/// Per-flag override: `Some` replaces, `None` keeps the value underneath.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlagOverrides {
    pub can_view: Option<bool>,
    pub can_access: Option<bool>,
    pub can_create: Option<bool>,
    pub can_update: Option<bool>,
    pub can_delete: Option<bool>,
    pub can_execute: Option<bool>,
}

impl FlagOverrides {
    pub fn apply(&self, base: MenuPermissions) -> MenuPermissions {
        MenuPermissions {
            can_view: self.can_view.unwrap_or(base.can_view),
            can_access: self.can_access.unwrap_or(base.can_access),
            can_create: self.can_create.unwrap_or(base.can_create),
            can_update: self.can_update.unwrap_or(base.can_update),
            can_delete: self.can_delete.unwrap_or(base.can_delete),
            can_execute: self.can_execute.unwrap_or(base.can_execute),
        }
    }
}

/// Explicit capability grant for a (role, menu) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleMenuGrant {
    pub role_id: RoleId,
    pub menu_id: MenuId,
    pub permissions: MenuPermissions,
}

/// Per-user record for one menu.
///
/// Only rows with `is_override` take part in resolution; `is_favorite` is a
/// bookmark and never grants anything.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserMenuOverride {
    pub user_id: UserId,
    pub menu_id: MenuId,
    pub flags: FlagOverrides,
    pub is_override: bool,
    pub is_favorite: bool,
}

impl UserMenuOverride {
    pub fn favorite_only(user_id: UserId, menu_id: MenuId) -> Self {
        Self {
            user_id,
            menu_id,
            flags: FlagOverrides::default(),
            is_override: false,
            is_favorite: true,
        }
    }
}

/// Coarse buckets used to list menus by how much a user can do with them.
///
/// Every flag set falls into at most one bucket, the highest it reaches.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PermissionLevel {
    ViewOnly,
    Accessible,
    Editable,
    Admin,
}

impl PermissionLevel {
    /// `None` when not even `can_view` is set.
    pub fn of(p: &MenuPermissions) -> Option<Self> {
        if p.can_delete || p.can_execute {
            Some(Self::Admin)
        } else if p.can_create || p.can_update {
            Some(Self::Editable)
        } else if p.can_access {
            Some(Self::Accessible)
        } else if p.can_view {
            Some(Self::ViewOnly)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_replace_only_present_flags() {
        let base = MenuPermissions::NAVIGATE;
        let ov = FlagOverrides {
            can_view: Some(false),
            can_update: Some(true),
            ..FlagOverrides::default()
        };
        let out = ov.apply(base);
        assert!(!out.can_view);
        assert!(out.can_access);
        assert!(out.can_update);
        assert!(!out.can_delete);
    }

    #[test]
    fn admin_action_confers_everything() {
        assert_eq!(MenuPermissions::from_action(PermissionAction::Admin), MenuPermissions::ALL);
        assert_eq!(MenuPermissions::from_action(PermissionAction::View), MenuPermissions::NAVIGATE);
    }

    #[test]
    fn each_flag_set_lands_in_its_highest_bucket() {
        let view_only = MenuPermissions {
            can_view: true,
            ..MenuPermissions::NONE
        };
        assert_eq!(PermissionLevel::of(&view_only), Some(PermissionLevel::ViewOnly));
        assert_eq!(
            PermissionLevel::of(&MenuPermissions::NAVIGATE),
            Some(PermissionLevel::Accessible)
        );
        assert_eq!(
            PermissionLevel::of(&MenuPermissions::NAVIGATE.with(MenuAction::Create)),
            Some(PermissionLevel::Editable)
        );
        assert_eq!(
            PermissionLevel::of(&MenuPermissions::NAVIGATE.with(MenuAction::Update)),
            Some(PermissionLevel::Editable)
        );
        assert_eq!(
            PermissionLevel::of(&MenuPermissions::NAVIGATE.with(MenuAction::Execute)),
            Some(PermissionLevel::Admin)
        );
        assert_eq!(PermissionLevel::of(&MenuPermissions::ALL), Some(PermissionLevel::Admin));
        assert_eq!(PermissionLevel::of(&MenuPermissions::NONE), None);
    }

    #[test]
    fn delete_alone_is_admin_level() {
        let delete_only = MenuPermissions {
            can_delete: true,
            ..MenuPermissions::NONE
        };
        assert_eq!(PermissionLevel::of(&delete_only), Some(PermissionLevel::Admin));
    }

    #[test]
    fn flags_serialize_camel_case() {
        let json = serde_json::to_value(MenuPermissions::NAVIGATE).unwrap();
        assert_eq!(json["canView"], true);
        assert_eq!(json["canDelete"], false);
    }
}
