//! Typed outcomes of every authentication and authorization operation.
//!
//! Nothing in this crate catches an error and substitutes a default; each
//! failure reaches the caller as one of these variants, and the HTTP layer
//! only translates them to a status + envelope.

use thiserror::Error;

use backoffice_core::DomainError;

use crate::store::StoreError;

pub type AuthResult<T> = Result<T, AuthError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// Unknown email or wrong password. Never says which.
    #[error("invalid email or password")]
    InvalidCredentials,

    #[error("account is locked")]
    AccountLocked,

    #[error("account is disabled")]
    AccountDisabled,

    #[error("token has expired")]
    TokenExpired,

    #[error("invalid token")]
    TokenInvalid,

    #[error("insufficient permission: {action} on {resource}")]
    InsufficientPermission { resource: String, action: String },

    #[error("{0} not found")]
    NotFound(String),

    #[error("already exists: {0}")]
    Duplicate(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("password does not meet policy: {0}")]
    WeakPassword(String),

    #[error("circular menu reference: {0}")]
    MenuCycle(String),

    /// The record exists but is in a state that forbids the operation
    /// (e.g. deleting a system role).
    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AuthError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn duplicate(what: impl Into<String>) -> Self {
        Self::Duplicate(what.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn insufficient(resource: impl Into<String>, action: impl Into<String>) -> Self {
        Self::InsufficientPermission {
            resource: resource.into(),
            action: action.into(),
        }
    }

    /// Stable machine-readable code carried in the error envelope.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidCredentials => "AUTH_001",
            Self::TokenExpired => "AUTH_002",
            Self::TokenInvalid => "AUTH_003",
            Self::AccountLocked => "AUTH_004",
            Self::AccountDisabled => "AUTH_005",
            Self::InsufficientPermission { .. } => "AUTH_010",
            Self::Validation(_) => "VALIDATION_001",
            Self::WeakPassword(_) => "VALIDATION_003",
            Self::Duplicate(_) => "VALIDATION_008",
            Self::NotFound(_) => "RESOURCE_001",
            Self::MenuCycle(_) => "MENU_003",
            Self::InvalidState(_) => "BUSINESS_003",
            Self::Internal(_) => "SYSTEM_001",
        }
    }

    /// Message safe to show to the caller.
    ///
    /// Lock and internal failures deliberately carry no detail.
    pub fn public_message(&self) -> String {
        match self {
            Self::AccountLocked => "Account is locked".to_string(),
            Self::Internal(_) => "Internal server error".to_string(),
            Self::InsufficientPermission { .. } => "Insufficient permissions".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<DomainError> for AuthError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::Validation(msg) | DomainError::InvalidId(msg) => Self::Validation(msg),
            DomainError::NotFound(what) => Self::NotFound(what),
            DomainError::CyclicHierarchy(msg) => Self::MenuCycle(msg),
        }
    }
}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => Self::NotFound(what),
            StoreError::Duplicate(what) => Self::Duplicate(what),
            StoreError::Backend(msg) => Self::Internal(msg),
            StoreError::Rejected(err) => err.into(),
        }
    }
}
