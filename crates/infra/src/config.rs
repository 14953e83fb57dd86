//! Process configuration loaded from the environment.

use std::env;
use std::fmt;
use std::net::SocketAddr;

use chrono::Duration;
use thiserror::Error;

use backoffice_auth::{LockoutPolicy, PasswordPolicy, ResolverPolicy, RoleName, TokenConfig};

const DEV_JWT_SECRET: &str = "dev-secret-change-me";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var}: invalid value '{value}': {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

impl ConfigError {
    fn invalid(var: &'static str, value: &str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            var,
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}

#[derive(Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub jwt_refresh_secret: String,
    /// `true` when `JWT_SECRET` was absent and the dev fallback is in use.
    pub using_dev_secret: bool,
    pub access_ttl_ms: i64,
    pub refresh_ttl_ms: i64,
    pub max_login_attempts: u32,
    pub lock_duration_ms: i64,
    pub manager_role: RoleName,
    pub password_min_length: usize,
    pub password_pepper: Option<String>,
    pub database_url: Option<String>,
    pub bind_addr: SocketAddr,
    pub seed_demo_data: bool,
    pub seed_admin_password: String,
    pub seed_user_password: String,
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("jwt_secret", &"<redacted>")
            .field("using_dev_secret", &self.using_dev_secret)
            .field("access_ttl_ms", &self.access_ttl_ms)
            .field("refresh_ttl_ms", &self.refresh_ttl_ms)
            .field("max_login_attempts", &self.max_login_attempts)
            .field("lock_duration_ms", &self.lock_duration_ms)
            .field("manager_role", &self.manager_role)
            .field("password_min_length", &self.password_min_length)
            .field("password_pepper", &self.password_pepper.as_ref().map(|_| "<redacted>"))
            .field("database_url", &self.database_url.as_ref().map(|_| "<set>"))
            .field("bind_addr", &self.bind_addr)
            .field("seed_demo_data", &self.seed_demo_data)
            .finish_non_exhaustive()
    }
}

impl AuthConfig {
    /// Load from the process environment, reading a local `.env` first if present.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        let config = Self::from_lookup(|key| env::var(key).ok())?;
        if config.using_dev_secret {
            if !cfg!(debug_assertions) {
                return Err(ConfigError::invalid(
                    "JWT_SECRET",
                    "",
                    "must be set in release builds",
                ));
            }
            tracing::warn!("JWT_SECRET not set; using insecure dev default");
        }
        Ok(config)
    }

    /// Build from an arbitrary key lookup; blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let (jwt_secret, using_dev_secret) = match get("JWT_SECRET") {
            Some(secret) => (secret, false),
            None => (DEV_JWT_SECRET.to_string(), true),
        };
        let jwt_refresh_secret =
            get("JWT_REFRESH_SECRET").unwrap_or_else(|| format!("{jwt_secret}:refresh"));

        let access_ttl_ms = millis_at_least(&get, "JWT_EXPIRATION_MS", 86_400_000, 1_000)?;
        let refresh_ttl_ms =
            millis_at_least(&get, "JWT_REFRESH_EXPIRATION_MS", 604_800_000, 1_000)?;
        let lock_duration_ms =
            millis_at_least(&get, "SECURITY_ACCOUNT_LOCK_DURATION_MS", 1_800_000, 1)?;

        let max_login_attempts = match get("SECURITY_MAX_LOGIN_ATTEMPTS") {
            Some(raw) => match raw.trim().parse::<u32>() {
                Ok(n) if n > 0 => n,
                _ => {
                    return Err(ConfigError::invalid(
                        "SECURITY_MAX_LOGIN_ATTEMPTS",
                        &raw,
                        "expected a positive integer",
                    ))
                }
            },
            None => 5,
        };

        let manager_role = match get("SECURITY_MANAGER_ROLE") {
            Some(raw) => RoleName::parse(&raw)
                .map_err(|e| ConfigError::invalid("SECURITY_MANAGER_ROLE", &raw, e.to_string()))?,
            None => RoleName::MANAGER,
        };

        let password_min_length = match get("SECURITY_PASSWORD_MIN_LENGTH") {
            Some(raw) => match raw.trim().parse::<usize>() {
                Ok(n) if n > 0 => n,
                _ => {
                    return Err(ConfigError::invalid(
                        "SECURITY_PASSWORD_MIN_LENGTH",
                        &raw,
                        "expected a positive integer",
                    ))
                }
            },
            None => 8,
        };

        let bind_addr = match get("BIND_ADDR") {
            Some(raw) => raw
                .trim()
                .parse::<SocketAddr>()
                .map_err(|e| ConfigError::invalid("BIND_ADDR", &raw, e.to_string()))?,
            None => SocketAddr::from(([0, 0, 0, 0], 8080)),
        };

        let seed_demo_data = match get("SEED_DEMO_DATA") {
            Some(raw) => parse_bool("SEED_DEMO_DATA", &raw)?,
            None => true,
        };

        Ok(Self {
            jwt_secret,
            jwt_refresh_secret,
            using_dev_secret,
            access_ttl_ms,
            refresh_ttl_ms,
            max_login_attempts,
            lock_duration_ms,
            manager_role,
            password_min_length,
            password_pepper: get("PASSWORD_PEPPER"),
            database_url: get("DATABASE_URL"),
            bind_addr,
            seed_demo_data,
            seed_admin_password: get("SEED_ADMIN_PASSWORD").unwrap_or_else(|| "Admin123!".into()),
            seed_user_password: get("SEED_USER_PASSWORD").unwrap_or_else(|| "User123!".into()),
        })
    }

    pub fn token_config(&self) -> TokenConfig {
        TokenConfig {
            access_secret: self.jwt_secret.as_bytes().to_vec(),
            refresh_secret: self.jwt_refresh_secret.as_bytes().to_vec(),
            access_ttl: Duration::milliseconds(self.access_ttl_ms),
            refresh_ttl: Duration::milliseconds(self.refresh_ttl_ms),
        }
    }

    pub fn lockout_policy(&self) -> LockoutPolicy {
        LockoutPolicy {
            max_failed_attempts: self.max_login_attempts,
            lock_duration: Duration::milliseconds(self.lock_duration_ms),
        }
    }

    pub fn password_policy(&self) -> PasswordPolicy {
        PasswordPolicy {
            min_length: self.password_min_length,
        }
    }

    pub fn resolver_policy(&self) -> ResolverPolicy {
        ResolverPolicy {
            manager_role: self.manager_role.clone(),
        }
    }

    pub fn pepper_bytes(&self) -> Option<Vec<u8>> {
        self.password_pepper.as_ref().map(|p| p.as_bytes().to_vec())
    }
}

fn millis_at_least<F>(get: &F, var: &'static str, default: i64, min: i64) -> Result<i64, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match get(var) {
        Some(raw) => match raw.trim().parse::<i64>() {
            Ok(ms) if ms >= min => Ok(ms),
            _ => Err(ConfigError::invalid(
                var,
                &raw,
                format!("expected at least {min} milliseconds"),
            )),
        },
        None => Ok(default),
    }
}

fn parse_bool(var: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::invalid(var, raw, "expected a boolean")),
    }
}
