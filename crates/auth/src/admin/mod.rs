//! Administrative operations over the RBAC catalogue.
//!
//! These services validate and persist; who may call them is decided by
//! the authorization gate in front of them.

pub mod menus;
pub mod permissions;
pub mod roles;
pub mod users;

pub use menus::MenuAdmin;
pub use permissions::{PermissionAdmin, PermissionUpdate};
pub use roles::{NewRole, RoleAdmin, RoleUpdate};
pub use users::{AccountStatus, UserAdmin};
