//! User accounts.
//!
//! Accounts are never hard-deleted: deactivation flips `is_active`, which
//! moves the account to [`AccountState::Disabled`].

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use backoffice_core::{DomainError, Entity, RoleId, UserId};

use crate::roles::Role;

// ─────────────────────────────────────────────────────────────────────────────
// Account
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Clone, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    pub email: String,
    pub password_hash: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone_number: Option<String>,
    pub is_active: bool,
    pub email_verified: bool,
    pub mfa_enabled: bool,
    pub failed_login_attempts: u32,
    pub locked_until: Option<DateTime<Utc>>,
    pub last_login_at: Option<DateTime<Utc>>,
    pub roles: BTreeSet<RoleId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl core::fmt::Debug for User {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("User")
            .field("id", &self.id)
            .field("email", &self.email)
            .field("password_hash", &"[redacted]")
            .field("is_active", &self.is_active)
            .field("failed_login_attempts", &self.failed_login_attempts)
            .field("locked_until", &self.locked_until)
            .field("roles", &self.roles)
            .finish_non_exhaustive()
    }
}

impl Entity for User {
    type Id = UserId;

    fn id(&self) -> &UserId {
        &self.id
    }
}

impl User {
    /// Fresh, active, unverified account.
    pub fn new(email: String, password_hash: String, now: DateTime<Utc>) -> Self {
        Self {
            id: UserId::new(),
            email,
            password_hash,
            first_name: None,
            last_name: None,
            phone_number: None,
            is_active: true,
            email_verified: false,
            mfa_enabled: false,
            failed_login_attempts: 0,
            locked_until: None,
            last_login_at: None,
            roles: BTreeSet::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn full_name(&self) -> Option<String> {
        match (&self.first_name, &self.last_name) {
            (Some(f), Some(l)) => Some(format!("{f} {l}")),
            (Some(f), None) => Some(f.clone()),
            (None, Some(l)) => Some(l.clone()),
            (None, None) => None,
        }
    }
}

/// Lifecycle state derived from the stored flags at a given instant.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountState {
    Active,
    Locked { until: DateTime<Utc> },
    Disabled,
}

impl AccountState {
    /// `Disabled` dominates; an elapsed lock reads as `Active` (lazy expiry).
    pub fn of(user: &User, now: DateTime<Utc>) -> Self {
        if !user.is_active {
            return Self::Disabled;
        }
        match user.locked_until {
            Some(until) if until > now => Self::Locked { until },
            _ => Self::Active,
        }
    }
}

/// Trim + lower-case, then require a plausible `local@domain` shape.
pub fn normalize_email(input: &str) -> Result<String, DomainError> {
    let email = input.trim().to_lowercase();
    let Some((local, domain)) = email.split_once('@') else {
        return Err(DomainError::validation("email must contain '@'"));
    };
    if local.is_empty() || domain.is_empty() || domain.contains('@') {
        return Err(DomainError::validation("email is malformed"));
    }
    if email.len() > 254 || email.chars().any(char::is_whitespace) {
        return Err(DomainError::validation("email is malformed"));
    }
    Ok(email)
}

// ─────────────────────────────────────────────────────────────────────────────
// Inputs / projections
// ─────────────────────────────────────────────────────────────────────────────

/// Registration input.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewAccount {
    pub email: String,
    pub password: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone_number: Option<String>,
}

/// Profile update; `None` leaves a field untouched.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdate {
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone_number: Option<String>,
    pub current_password: Option<String>,
    pub new_password: Option<String>,
}

/// Public projection of an account (no hash, no lock timestamp).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserView {
    pub id: UserId,
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub full_name: Option<String>,
    pub phone_number: Option<String>,
    pub is_active: bool,
    pub email_verified: bool,
    pub mfa_enabled: bool,
    pub last_login_at: Option<DateTime<Utc>>,
    pub roles: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl UserView {
    /// `roles` is the catalogue to resolve role ids against; ids with no
    /// matching role are skipped.
    pub fn new(user: &User, roles: &[Role]) -> Self {
        let mut names: Vec<String> = roles
            .iter()
            .filter(|r| user.roles.contains(&r.id))
            .map(|r| r.name.to_string())
            .collect();
        names.sort();

        Self {
            id: user.id,
            email: user.email.clone(),
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            full_name: user.full_name(),
            phone_number: user.phone_number.clone(),
            is_active: user.is_active,
            email_verified: user.email_verified,
            mfa_enabled: user.mfa_enabled,
            last_login_at: user.last_login_at,
            roles: names,
            created_at: user.created_at,
        }
    }
}
