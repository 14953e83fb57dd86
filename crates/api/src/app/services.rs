//! Service wiring: one store, one clock, and every service built over them.

use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use backoffice_auth::admin::{MenuAdmin, PermissionAdmin, RoleAdmin, UserAdmin};
use backoffice_auth::{
    Argon2CredentialHasher, AuthEventSink, AuthResult, AuthStore, AuthorizationGate,
    Authenticator, CredentialHasher, PermissionResolver, TokenService,
};
use backoffice_core::{Clock, SystemClock};
use backoffice_infra::{seed_demo_data, AuthConfig, InMemoryAuthStore, PgAuthStore, TracingAuthEventSink};

const PG_MAX_CONNECTIONS: u32 = 10;

#[derive(Clone)]
pub struct AppServices {
    pub authenticator: Authenticator,
    pub tokens: Arc<TokenService>,
    pub resolver: PermissionResolver,
    pub gate: AuthorizationGate,
    pub users: UserAdmin,
    pub roles: RoleAdmin,
    pub permissions: PermissionAdmin,
    pub menus: MenuAdmin,
}

impl AppServices {
    pub fn new(
        config: &AuthConfig,
        store: Arc<dyn AuthStore>,
        hasher: Arc<dyn CredentialHasher>,
        clock: Arc<dyn Clock>,
        sink: Arc<dyn AuthEventSink>,
    ) -> AuthResult<Self> {
        let tokens = Arc::new(TokenService::new(config.token_config(), clock.clone())?);
        let authenticator = Authenticator::new(
            store.clone(),
            hasher.clone(),
            tokens.clone(),
            clock.clone(),
            sink,
        )
        .with_lockout(config.lockout_policy())
        .with_password_policy(config.password_policy());
        let resolver = PermissionResolver::new(store.clone(), config.resolver_policy());

        Ok(Self {
            authenticator,
            tokens,
            gate: AuthorizationGate::new(resolver.clone()),
            resolver,
            users: UserAdmin::new(store.clone(), hasher, clock.clone(), config.password_policy()),
            roles: RoleAdmin::new(store.clone(), clock.clone()),
            permissions: PermissionAdmin::new(store.clone(), clock.clone()),
            menus: MenuAdmin::new(store, clock),
        })
    }
}

/// Pick the store from `DATABASE_URL`, seed it if asked, and wire the services.
pub async fn build_services(config: &AuthConfig) -> anyhow::Result<Arc<AppServices>> {
    let hasher: Arc<dyn CredentialHasher> =
        Arc::new(Argon2CredentialHasher::new(config.pepper_bytes()));
    build_services_with(config, hasher).await
}

pub async fn build_services_with(
    config: &AuthConfig,
    hasher: Arc<dyn CredentialHasher>,
) -> anyhow::Result<Arc<AppServices>> {
    let store: Arc<dyn AuthStore> = match &config.database_url {
        Some(url) => {
            info!("using postgres store");
            Arc::new(
                PgAuthStore::connect(url, PG_MAX_CONNECTIONS)
                    .await
                    .context("failed to open postgres store")?,
            )
        }
        None => {
            info!("DATABASE_URL not set; using in-memory store");
            Arc::new(InMemoryAuthStore::new())
        }
    };
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    if config.seed_demo_data {
        seed_demo_data(
            store.clone(),
            hasher.as_ref(),
            clock.clone(),
            &config.seed_admin_password,
            &config.seed_user_password,
        )
        .await
        .context("failed to seed demo data")?;
    }

    let services = AppServices::new(
        config,
        store,
        hasher,
        clock,
        Arc::new(TracingAuthEventSink::new()),
    )
    .context("invalid token configuration")?;
    Ok(Arc::new(services))
}
