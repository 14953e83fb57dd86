//! Credential authentication, token refresh and self-registration.
//!
//! Check order on login: lookup → disabled → locked → password. Only a wrong
//! password on an otherwise usable account touches the failure counter, and
//! that write is a single atomic store operation.

use std::net::IpAddr;
use std::sync::{Arc, OnceLock};

use serde::Serialize;
use tracing::{info, warn};

use backoffice_core::Clock;

use crate::audit::{AuthEvent, AuthEventKind, AuthEventSink};
use crate::error::{AuthError, AuthResult};
use crate::lifecycle::LockoutPolicy;
use crate::password::{CredentialHasher, PasswordPolicy};
use crate::roles::RoleName;
use crate::store::{AuthStore, MenuScope, ResolutionSnapshot};
use crate::token::{Identity, TokenPair, TokenService};
use crate::user::{normalize_email, AccountState, NewAccount, User, UserView};

/// Result of a successful credential check.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user: User,
    pub view: UserView,
    pub identity: Identity,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    #[serde(flatten)]
    pub tokens: TokenPair,
    pub user: UserView,
}

/// Identity with the role and permission closure of the snapshot's user.
pub fn identity_of(snapshot: &ResolutionSnapshot) -> Identity {
    Identity {
        user_id: snapshot.user.id,
        email: snapshot.user.email.clone(),
        roles: snapshot.role_names().into_iter().collect(),
        permissions: snapshot.permission_names(),
    }
}

#[derive(Clone)]
pub struct Authenticator {
    store: Arc<dyn AuthStore>,
    hasher: Arc<dyn CredentialHasher>,
    tokens: Arc<TokenService>,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn AuthEventSink>,
    lockout: LockoutPolicy,
    password_policy: PasswordPolicy,
    dummy_hash: Arc<OnceLock<Option<String>>>,
}

impl Authenticator {
    pub fn new(
        store: Arc<dyn AuthStore>,
        hasher: Arc<dyn CredentialHasher>,
        tokens: Arc<TokenService>,
        clock: Arc<dyn Clock>,
        sink: Arc<dyn AuthEventSink>,
    ) -> Self {
        Self {
            store,
            hasher,
            tokens,
            clock,
            sink,
            lockout: LockoutPolicy::default(),
            password_policy: PasswordPolicy::default(),
            dummy_hash: Arc::new(OnceLock::new()),
        }
    }

    pub fn with_lockout(mut self, lockout: LockoutPolicy) -> Self {
        self.lockout = lockout;
        self
    }

    pub fn with_password_policy(mut self, policy: PasswordPolicy) -> Self {
        self.password_policy = policy;
        self
    }

    pub fn lockout(&self) -> &LockoutPolicy {
        &self.lockout
    }

    pub fn tokens(&self) -> &TokenService {
        &self.tokens
    }

    /// Check credentials and return the identity with its full closure.
    pub async fn authenticate(
        &self,
        email: &str,
        password: &str,
        client_ip: Option<IpAddr>,
    ) -> AuthResult<AuthenticatedUser> {
        let now = self.clock.now();

        let user = match normalize_email(email) {
            Ok(normalized) => self.store.find_user_by_email(&normalized).await?,
            Err(_) => None,
        };
        let Some(user) = user else {
            self.burn_dummy_verify(password);
            self.emit(AuthEventKind::LoginFailed, email, None, client_ip);
            info!(client_ip = ?client_ip, "login failed: unknown account");
            return Err(AuthError::InvalidCredentials);
        };

        match AccountState::of(&user, now) {
            AccountState::Disabled => {
                self.emit(AuthEventKind::LoginRejectedDisabled, &user.email, Some(&user), client_ip);
                info!(user_id = %user.id, "login rejected: account disabled");
                return Err(AuthError::AccountDisabled);
            }
            AccountState::Locked { .. } => {
                self.emit(AuthEventKind::LoginRejectedLocked, &user.email, Some(&user), client_ip);
                info!(user_id = %user.id, "login rejected: account locked");
                return Err(AuthError::AccountLocked);
            }
            AccountState::Active => {}
        }

        if !self.hasher.verify(password, &user.password_hash) {
            let next = self
                .store
                .record_login_failure(user.id, now, &self.lockout)
                .await?;

            if next.is_locked(now) {
                self.emit(AuthEventKind::AccountLocked, &user.email, Some(&user), client_ip);
                warn!(
                    user_id = %user.id,
                    failed_attempts = next.failed_attempts,
                    locked_until = ?next.locked_until,
                    "account locked after repeated login failures"
                );
                return Err(AuthError::AccountLocked);
            }

            self.emit(AuthEventKind::LoginFailed, &user.email, Some(&user), client_ip);
            info!(user_id = %user.id, failed_attempts = next.failed_attempts, "login failed: bad password");
            return Err(AuthError::InvalidCredentials);
        }

        self.store.record_login_success(user.id, now).await?;
        let snapshot = self.snapshot_of(&user).await?;

        self.emit(AuthEventKind::LoginSucceeded, &user.email, Some(&user), client_ip);
        info!(user_id = %user.id, "login succeeded");

        Ok(AuthenticatedUser {
            view: UserView::new(&snapshot.user, &snapshot.roles),
            identity: identity_of(&snapshot),
            user: snapshot.user,
        })
    }

    /// Authenticate and issue a token pair.
    pub async fn login(
        &self,
        email: &str,
        password: &str,
        client_ip: Option<IpAddr>,
    ) -> AuthResult<LoginResponse> {
        let authenticated = self.authenticate(email, password, client_ip).await?;
        let tokens = self.tokens.issue(&authenticated.identity)?;
        Ok(LoginResponse {
            tokens,
            user: authenticated.view,
        })
    }

    /// Mint a new pair from a refresh token, re-reading current roles.
    pub async fn refresh(&self, refresh_token: &str, client_ip: Option<IpAddr>) -> AuthResult<LoginResponse> {
        let email = self.tokens.verify_refresh(refresh_token)?;
        let user = self
            .store
            .find_user_by_email(&email)
            .await?
            .ok_or(AuthError::TokenInvalid)?;

        match AccountState::of(&user, self.clock.now()) {
            AccountState::Disabled => return Err(AuthError::AccountDisabled),
            AccountState::Locked { .. } => return Err(AuthError::AccountLocked),
            AccountState::Active => {}
        }

        let snapshot = self.snapshot_of(&user).await?;
        let tokens = self.tokens.issue(&identity_of(&snapshot))?;
        self.emit(AuthEventKind::TokenRefreshed, &user.email, Some(&user), client_ip);

        Ok(LoginResponse {
            tokens,
            user: UserView::new(&snapshot.user, &snapshot.roles),
        })
    }

    /// Create an active account holding the default role.
    pub async fn register(&self, account: NewAccount, client_ip: Option<IpAddr>) -> AuthResult<UserView> {
        let email = normalize_email(&account.email)?;
        self.password_policy.check(&account.password)?;

        if self.store.find_user_by_email(&email).await?.is_some() {
            return Err(AuthError::duplicate("email"));
        }

        let default_role = self
            .store
            .find_role_by_name(&RoleName::USER)
            .await?
            .ok_or_else(|| AuthError::invalid_state("default role ROLE_USER is not configured"))?;

        let now = self.clock.now();
        let mut user = User::new(email, self.hasher.hash(&account.password)?, now);
        user.first_name = trimmed(account.first_name);
        user.last_name = trimmed(account.last_name);
        user.phone_number = trimmed(account.phone_number);
        user.roles.insert(default_role.id);

        self.store.insert_user(&user).await?;
        self.emit(AuthEventKind::Registered, &user.email, Some(&user), client_ip);
        info!(user_id = %user.id, "account registered");

        Ok(UserView::new(&user, std::slice::from_ref(&default_role)))
    }

    /// Tokens are stateless; logout only leaves an audit trail.
    pub fn logout(&self, identity: &Identity, client_ip: Option<IpAddr>) {
        self.sink.emit(AuthEvent {
            kind: AuthEventKind::LoggedOut,
            email: identity.email.clone(),
            user_id: Some(identity.user_id),
            client_ip,
            occurred_at: self.clock.now(),
        });
    }

    async fn snapshot_of(&self, user: &User) -> AuthResult<ResolutionSnapshot> {
        self.store
            .load_snapshot(user.id, MenuScope::None)
            .await?
            .ok_or_else(|| AuthError::not_found("user"))
    }

    /// Spend the same hashing work for unknown accounts as for known ones.
    fn burn_dummy_verify(&self, password: &str) {
        let hash = self
            .dummy_hash
            .get_or_init(|| self.hasher.hash("dummy-password-for-timing").ok());
        if let Some(hash) = hash {
            let _ = self.hasher.verify(password, hash);
        }
    }

    fn emit(&self, kind: AuthEventKind, email: &str, user: Option<&User>, client_ip: Option<IpAddr>) {
        self.sink.emit(AuthEvent {
            kind,
            email: email.to_string(),
            user_id: user.map(|u| u.id),
            client_ip,
            occurred_at: self.clock.now(),
        });
    }
}

fn trimmed(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
