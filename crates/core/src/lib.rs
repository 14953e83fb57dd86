//! `backoffice-core`: foundation building blocks shared by every layer.
//!
//! This crate contains **pure** primitives (no infrastructure concerns).

pub mod clock;
pub mod entity;
pub mod error;
pub mod id;

pub use clock::{Clock, ManualClock, SystemClock};
pub use entity::Entity;
pub use error::{DomainError, DomainResult};
pub use id::{MenuId, PermissionId, RoleId, UserId};
