use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use backoffice_core::UserId;

/// Tolerated skew between the issuing clock and the verifying clock.
pub const ISSUED_AT_LEEWAY_SECS: i64 = 30;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

/// Claims of a short-lived access token.
///
/// `permissions` is a snapshot taken at issuance; it is not re-checked until
/// the token expires or is refreshed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessClaims {
    /// Subject: user identifier.
    pub sub: UserId,
    pub email: String,
    pub roles: BTreeSet<String>,
    pub permissions: BTreeSet<String>,
    /// Issued-at, seconds since the epoch.
    pub iat: i64,
    /// Expiry, seconds since the epoch.
    pub exp: i64,
    pub typ: TokenKind,
}

/// Claims of a refresh token: keyed to the email only, no permissions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshClaims {
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
    pub typ: TokenKind,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenValidationError {
    #[error("token has expired")]
    Expired,

    #[error("token not yet valid (iat is in the future)")]
    NotYetValid,

    #[error("invalid token time window (exp <= iat)")]
    InvalidTimeWindow,
}

/// Deterministically validate the time window of decoded claims.
///
/// Signature checks happen before this, in the token service.
pub fn validate_claims(iat: i64, exp: i64, now: DateTime<Utc>) -> Result<(), TokenValidationError> {
    let now = now.timestamp();
    if exp <= iat {
        return Err(TokenValidationError::InvalidTimeWindow);
    }
    if now + ISSUED_AT_LEEWAY_SECS < iat {
        return Err(TokenValidationError::NotYetValid);
    }
    if now >= exp {
        return Err(TokenValidationError::Expired);
    }
    Ok(())
}
