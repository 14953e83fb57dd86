//! Password hashing and password policy.

use argon2::{
    password_hash::SaltString, Algorithm, Argon2, Params, PasswordHash, PasswordHasher,
    PasswordVerifier, Version,
};

use crate::error::{AuthError, AuthResult};

/// One-way hash + verify for credentials.
pub trait CredentialHasher: Send + Sync {
    fn hash(&self, password: &str) -> AuthResult<String>;

    /// `false` for a wrong password *and* for a stored hash that cannot be parsed.
    fn verify(&self, password: &str, hash: &str) -> bool;
}

/// Argon2id (v0x13) hasher with an optional server-side pepper.
pub struct Argon2CredentialHasher {
    pepper: Option<Vec<u8>>,
    params: Params,
}

impl core::fmt::Debug for Argon2CredentialHasher {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Argon2CredentialHasher")
            .field("pepper", &self.pepper.as_ref().map(|_| "[redacted]"))
            .field("params", &self.params)
            .finish()
    }
}

impl Default for Argon2CredentialHasher {
    fn default() -> Self {
        Self::new(None)
    }
}

impl Argon2CredentialHasher {
    pub fn new(pepper: Option<Vec<u8>>) -> Self {
        Self {
            pepper,
            params: Params::default(),
        }
    }

    /// Override cost parameters (tests use the minimum memory cost).
    pub fn with_params(mut self, params: Params) -> Self {
        self.params = params;
        self
    }

    fn argon2(&self) -> AuthResult<Argon2<'_>> {
        match &self.pepper {
            Some(pepper) => Argon2::new_with_secret(
                pepper,
                Algorithm::Argon2id,
                Version::V0x13,
                self.params.clone(),
            )
            .map_err(|e| AuthError::internal(format!("argon2 init: {e}"))),
            None => Ok(Argon2::new(
                Algorithm::Argon2id,
                Version::V0x13,
                self.params.clone(),
            )),
        }
    }
}

impl CredentialHasher for Argon2CredentialHasher {
    fn hash(&self, password: &str) -> AuthResult<String> {
        let salt = SaltString::generate(&mut rand::rngs::OsRng);
        let hash = self
            .argon2()?
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| AuthError::internal(format!("password hashing failed: {e}")))?;
        Ok(hash.to_string())
    }

    fn verify(&self, password: &str, hash: &str) -> bool {
        let Ok(parsed) = PasswordHash::new(hash) else {
            tracing::warn!("stored password hash is not a valid PHC string");
            return false;
        };
        match self.argon2() {
            Ok(argon2) => argon2.verify_password(password.as_bytes(), &parsed).is_ok(),
            Err(_) => false,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Policy
// ─────────────────────────────────────────────────────────────────────────────

/// Strength rules applied at registration and password change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PasswordPolicy {
    pub min_length: usize,
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        Self { min_length: 8 }
    }
}

impl PasswordPolicy {
    pub fn check(&self, password: &str) -> AuthResult<()> {
        let mut missing = Vec::new();
        if password.chars().count() < self.min_length {
            missing.push(format!("at least {} characters", self.min_length));
        }
        if !password.chars().any(|c| c.is_uppercase()) {
            missing.push("an uppercase letter".to_string());
        }
        if !password.chars().any(|c| c.is_lowercase()) {
            missing.push("a lowercase letter".to_string());
        }
        if !password.chars().any(|c| c.is_ascii_digit()) {
            missing.push("a digit".to_string());
        }
        if !password.chars().any(|c| !c.is_alphanumeric() && !c.is_whitespace()) {
            missing.push("a special character".to_string());
        }

        if missing.is_empty() {
            Ok(())
        } else {
            Err(AuthError::WeakPassword(format!("requires {}", missing.join(", "))))
        }
    }
}
