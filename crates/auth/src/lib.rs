//! `backoffice-auth`: authentication and permission resolution core.
//!
//! Decoupled from HTTP and from any particular database: storage is reached
//! through the traits in [`store`], time through [`backoffice_core::Clock`].

pub mod admin;
pub mod audit;
pub mod authenticate;
pub mod authorize;
pub mod claims;
pub mod error;
pub mod lifecycle;
pub mod menu;
pub mod menu_permission;
pub mod password;
pub mod permissions;
pub mod resolver;
pub mod resources;
pub mod roles;
pub mod store;
pub mod token;
pub mod user;

pub use audit::{AuthEvent, AuthEventKind, AuthEventSink, InMemoryAuthEventSink};
pub use authenticate::{identity_of, AuthenticatedUser, Authenticator, LoginResponse};
pub use authorize::{AuthorizationGate, ProtectedResource};
pub use claims::{validate_claims, AccessClaims, RefreshClaims, TokenKind, TokenValidationError};
pub use error::{AuthError, AuthResult};
pub use lifecycle::{LockoutPolicy, LockoutState};
pub use menu::{Menu, MenuDraft, MenuNode, MenuTree, MenuType};
pub use menu_permission::{
    FlagOverrides, MenuAction, MenuPermissions, PermissionLevel, RoleMenuGrant, UserMenuOverride,
};
pub use password::{Argon2CredentialHasher, CredentialHasher, PasswordPolicy};
pub use permissions::{NewPermission, Permission, PermissionAction, PermissionTemplate};
pub use resolver::{Decision, PermissionResolver, Resolution, ResolverPolicy};
pub use roles::{Role, RoleName, RoleTemplate};
pub use store::{
    AuthStore, MenuPermissionStore, MenuScope, MenuStore, MenuTreePlan, PermissionStore,
    ResolutionSnapshot, RoleStore, StoreError, StoreResult, UserStore,
};
pub use token::{Identity, TokenConfig, TokenPair, TokenService};
pub use user::{normalize_email, AccountState, NewAccount, ProfileUpdate, User, UserView};
