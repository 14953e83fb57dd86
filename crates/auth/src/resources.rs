//! Resource names guarding the administrative surface.
//!
//! Each one is checked through the resolver like any other resource, so
//! access is whatever the caller's role permissions on it confer.

pub const USERS: &str = "users";
pub const ROLES: &str = "roles";
pub const PERMISSIONS: &str = "permissions";
pub const MENUS: &str = "menus";
/// Carrier of the catalogue-wide `ADMIN` permission.
pub const SYSTEM: &str = "system";

pub const ADMIN_RESOURCES: [&str; 4] = [USERS, ROLES, PERMISSIONS, MENUS];
