//! Access/refresh token issuance and verification (HS256).

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use chrono::Duration;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{de::DeserializeOwned, Serialize};

use backoffice_core::{Clock, UserId};

use crate::claims::{validate_claims, AccessClaims, RefreshClaims, TokenKind, TokenValidationError};
use crate::error::{AuthError, AuthResult};

/// What an access token asserts about its bearer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub user_id: UserId,
    pub email: String,
    pub roles: BTreeSet<String>,
    pub permissions: BTreeSet<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: &'static str,
    /// Access-token lifetime in milliseconds.
    pub expires_in: i64,
}

#[derive(Clone)]
pub struct TokenConfig {
    pub access_secret: Vec<u8>,
    pub refresh_secret: Vec<u8>,
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
}

impl fmt::Debug for TokenConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenConfig")
            .field("access_secret", &"<redacted>")
            .field("refresh_secret", &"<redacted>")
            .field("access_ttl", &self.access_ttl)
            .field("refresh_ttl", &self.refresh_ttl)
            .finish()
    }
}

pub struct TokenService {
    access_encoding: EncodingKey,
    access_decoding: DecodingKey,
    refresh_encoding: EncodingKey,
    refresh_decoding: DecodingKey,
    access_ttl: Duration,
    refresh_ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for TokenService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenService")
            .field("keys", &"<redacted>")
            .field("access_ttl", &self.access_ttl)
            .field("refresh_ttl", &self.refresh_ttl)
            .finish()
    }
}

impl TokenService {
    pub fn new(config: TokenConfig, clock: Arc<dyn Clock>) -> AuthResult<Self> {
        if config.access_secret.is_empty() || config.refresh_secret.is_empty() {
            return Err(AuthError::validation("token secrets cannot be empty"));
        }
        let min_ttl = Duration::seconds(1);
        if config.access_ttl < min_ttl || config.refresh_ttl < min_ttl {
            return Err(AuthError::validation("token lifetimes must be at least one second"));
        }

        Ok(Self {
            access_encoding: EncodingKey::from_secret(&config.access_secret),
            access_decoding: DecodingKey::from_secret(&config.access_secret),
            refresh_encoding: EncodingKey::from_secret(&config.refresh_secret),
            refresh_decoding: DecodingKey::from_secret(&config.refresh_secret),
            access_ttl: config.access_ttl,
            refresh_ttl: config.refresh_ttl,
            clock,
        })
    }

    pub fn access_ttl(&self) -> Duration {
        self.access_ttl
    }

    pub fn issue(&self, identity: &Identity) -> AuthResult<TokenPair> {
        let now = self.clock.now().timestamp();

        let access = AccessClaims {
            sub: identity.user_id,
            email: identity.email.clone(),
            roles: identity.roles.clone(),
            permissions: identity.permissions.clone(),
            iat: now,
            exp: now + whole_seconds(self.access_ttl),
            typ: TokenKind::Access,
        };
        let refresh = RefreshClaims {
            sub: identity.email.clone(),
            iat: now,
            exp: now + whole_seconds(self.refresh_ttl),
            typ: TokenKind::Refresh,
        };

        Ok(TokenPair {
            access_token: sign(&access, &self.access_encoding)?,
            refresh_token: sign(&refresh, &self.refresh_encoding)?,
            token_type: "Bearer",
            expires_in: self.access_ttl.num_milliseconds(),
        })
    }

    /// Verify an access token against the injected clock.
    pub fn verify(&self, token: &str) -> AuthResult<Identity> {
        let claims: AccessClaims = decode_signed(token, &self.access_decoding)?;
        if claims.typ != TokenKind::Access {
            return Err(AuthError::TokenInvalid);
        }
        self.check_window(claims.iat, claims.exp)?;

        Ok(Identity {
            user_id: claims.sub,
            email: claims.email,
            roles: claims.roles,
            permissions: claims.permissions,
        })
    }

    /// Verify a refresh token; returns the email it is keyed to.
    pub fn verify_refresh(&self, token: &str) -> AuthResult<String> {
        let claims: RefreshClaims = decode_signed(token, &self.refresh_decoding)?;
        if claims.typ != TokenKind::Refresh {
            return Err(AuthError::TokenInvalid);
        }
        self.check_window(claims.iat, claims.exp)?;
        Ok(claims.sub)
    }

    fn check_window(&self, iat: i64, exp: i64) -> AuthResult<()> {
        validate_claims(iat, exp, self.clock.now()).map_err(|e| match e {
            TokenValidationError::Expired => AuthError::TokenExpired,
            TokenValidationError::NotYetValid | TokenValidationError::InvalidTimeWindow => {
                AuthError::TokenInvalid
            }
        })
    }
}

/// `exp` has one-second resolution; a partial second counts as a whole one.
fn whole_seconds(ttl: Duration) -> i64 {
    let ms = ttl.num_milliseconds();
    (ms + 999) / 1000
}

fn sign<T: Serialize>(claims: &T, key: &EncodingKey) -> AuthResult<String> {
    encode(&Header::new(Algorithm::HS256), claims, key)
        .map_err(|e| AuthError::internal(format!("failed to sign token: {e}")))
}

/// Signature + structure check only; the time window is ours to judge.
fn decode_signed<T: DeserializeOwned>(token: &str, key: &DecodingKey) -> AuthResult<T> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = false;
    validation.leeway = 0;

    decode::<T>(token, key, &validation)
        .map(|data| data.claims)
        .map_err(|_| AuthError::TokenInvalid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use backoffice_core::ManualClock;
    use chrono::Utc;
    use proptest::prelude::*;

    fn service(clock: Arc<ManualClock>) -> TokenService {
        TokenService::new(
            TokenConfig {
                access_secret: b"access-secret".to_vec(),
                refresh_secret: b"refresh-secret".to_vec(),
                access_ttl: Duration::minutes(15),
                refresh_ttl: Duration::days(7),
            },
            clock,
        )
        .unwrap()
    }

    fn identity() -> Identity {
        Identity {
            user_id: UserId::new(),
            email: "u@x.com".into(),
            roles: ["ROLE_USER".to_string()].into(),
            permissions: ["MENUS_VIEW".to_string(), "USERS_VIEW".to_string()].into(),
        }
    }

    #[test]
    fn round_trip_before_expiry() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let tokens = service(clock.clone());
        let id = identity();
        let pair = tokens.issue(&id).unwrap();

        assert_eq!(pair.token_type, "Bearer");
        assert_eq!(pair.expires_in, 15 * 60 * 1000);
        clock.advance(Duration::minutes(14));
        assert_eq!(tokens.verify(&pair.access_token).unwrap(), id);
    }

    #[test]
    fn expired_after_ttl() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let tokens = service(clock.clone());
        let pair = tokens.issue(&identity()).unwrap();

        clock.advance(Duration::minutes(15));
        assert_eq!(tokens.verify(&pair.access_token), Err(AuthError::TokenExpired));
    }

    #[test]
    fn refresh_carries_email_only() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let tokens = service(clock.clone());
        let pair = tokens.issue(&identity()).unwrap();

        assert_eq!(tokens.verify_refresh(&pair.refresh_token).unwrap(), "u@x.com");
        clock.advance(Duration::days(7));
        assert_eq!(tokens.verify_refresh(&pair.refresh_token), Err(AuthError::TokenExpired));
    }

    #[test]
    fn tokens_are_not_interchangeable() {
        let tokens = service(Arc::new(ManualClock::default()));
        let pair = tokens.issue(&identity()).unwrap();

        assert_eq!(tokens.verify(&pair.refresh_token), Err(AuthError::TokenInvalid));
        assert_eq!(tokens.verify_refresh(&pair.access_token), Err(AuthError::TokenInvalid));
    }

    #[test]
    fn foreign_secret_is_invalid() {
        let clock = Arc::new(ManualClock::default());
        let ours = service(clock.clone());
        let theirs = TokenService::new(
            TokenConfig {
                access_secret: b"someone-else".to_vec(),
                refresh_secret: b"someone-else-refresh".to_vec(),
                access_ttl: Duration::minutes(15),
                refresh_ttl: Duration::days(7),
            },
            clock,
        )
        .unwrap();

        let pair = theirs.issue(&identity()).unwrap();
        assert_eq!(ours.verify(&pair.access_token), Err(AuthError::TokenInvalid));
    }

    #[test]
    fn garbage_is_invalid_not_expired() {
        let tokens = service(Arc::new(ManualClock::default()));
        for junk in ["", "abc", "a.b.c", "Bearer x"] {
            assert_eq!(tokens.verify(junk), Err(AuthError::TokenInvalid));
        }
    }

    #[test]
    fn empty_secret_is_rejected() {
        let err = TokenService::new(
            TokenConfig {
                access_secret: vec![],
                refresh_secret: b"r".to_vec(),
                access_ttl: Duration::minutes(1),
                refresh_ttl: Duration::minutes(2),
            },
            Arc::new(ManualClock::default()),
        )
        .unwrap_err();
        assert!(matches!(err, AuthError::Validation(_)));
    }

    #[test]
    fn sub_second_lifetime_is_rejected() {
        let config = |access_ttl| TokenConfig {
            access_secret: b"a".to_vec(),
            refresh_secret: b"r".to_vec(),
            access_ttl,
            refresh_ttl: Duration::minutes(2),
        };
        let err = TokenService::new(config(Duration::milliseconds(999)), Arc::new(ManualClock::default()))
            .unwrap_err();
        assert!(matches!(err, AuthError::Validation(_)));

        let clock = Arc::new(ManualClock::new(Utc::now()));
        let tokens = TokenService::new(config(Duration::seconds(1)), clock.clone()).unwrap();
        let pair = tokens.issue(&identity()).unwrap();
        assert!(tokens.verify(&pair.access_token).is_ok());
    }

    #[test]
    fn partial_seconds_round_up() {
        let start = chrono::DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let clock = Arc::new(ManualClock::new(start));
        let tokens = TokenService::new(
            TokenConfig {
                access_secret: b"a".to_vec(),
                refresh_secret: b"r".to_vec(),
                access_ttl: Duration::milliseconds(1_500),
                refresh_ttl: Duration::minutes(2),
            },
            clock.clone(),
        )
        .unwrap();
        let pair = tokens.issue(&identity()).unwrap();
        assert_eq!(pair.expires_in, 1_500);

        clock.advance(Duration::milliseconds(1_500));
        assert!(tokens.verify(&pair.access_token).is_ok());
        clock.advance(Duration::seconds(1));
        assert_eq!(tokens.verify(&pair.access_token), Err(AuthError::TokenExpired));
    }

    #[test]
    fn debug_hides_keys() {
        let tokens = service(Arc::new(ManualClock::default()));
        assert!(!format!("{tokens:?}").contains("access-secret"));
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: changing any single byte of an access token makes it invalid.
        #[test]
        fn single_byte_flip_is_invalid(index in any::<prop::sample::Index>()) {
            let tokens = service(Arc::new(ManualClock::default()));
            let token = tokens.issue(&identity()).unwrap().access_token;

            let mut bytes = token.into_bytes();
            let i = index.index(bytes.len());
            bytes[i] ^= 0x01;
            let tampered = String::from_utf8(bytes).unwrap();

            prop_assert_eq!(tokens.verify(&tampered), Err(AuthError::TokenInvalid));
        }

        /// Property: any identity survives issue → verify unchanged.
        #[test]
        fn identity_round_trips(
            email in "[a-z]{1,12}@[a-z]{1,8}\\.com",
            roles in prop::collection::btree_set("ROLE_[A-Z]{1,8}", 0..4),
            permissions in prop::collection::btree_set("[A-Z]{1,8}_(VIEW|CREATE|UPDATE)", 0..8),
        ) {
            let tokens = service(Arc::new(ManualClock::default()));
            let id = Identity { user_id: UserId::new(), email, roles, permissions };
            let pair = tokens.issue(&id).unwrap();
            prop_assert_eq!(tokens.verify(&pair.access_token).unwrap(), id);
        }
    }
}
