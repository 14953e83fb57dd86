//! Integration tests for the full authentication pipeline.
//!
//! Authenticator → in-memory store → resolver → gate, with a manually
//! driven clock and the seeded demo catalogue.

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::Arc;

    use argon2::Params;
    use chrono::{Duration, Utc};

    use backoffice_auth::admin::{MenuAdmin, NewRole, PermissionAdmin, RoleAdmin, UserAdmin};
    use backoffice_auth::{
        AccountState, Argon2CredentialHasher, AuthError, AuthEventKind, AuthStore,
        AuthorizationGate, Authenticator, Decision, FlagOverrides, InMemoryAuthEventSink,
        LockoutPolicy, MenuAction, MenuPermissions, NewAccount, NewPermission, PasswordPolicy,
        PermissionAction, PermissionLevel, PermissionResolver, ProtectedResource, ResolverPolicy, RoleName,
        RoleStore, TokenConfig, TokenService, UserStore,
    };
    use backoffice_core::{Clock, ManualClock, MenuId, UserId};

    use crate::seed::{seed_demo_data, ADMIN_EMAIL, USER_EMAIL};
    use crate::store::InMemoryAuthStore;

    const ADMIN_PASSWORD: &str = "Admin123!";
    const USER_PASSWORD: &str = "User123!";

    struct Harness {
        store: Arc<dyn AuthStore>,
        clock: Arc<ManualClock>,
        sink: Arc<InMemoryAuthEventSink>,
        auth: Authenticator,
        resolver: PermissionResolver,
        gate: AuthorizationGate,
        users: UserAdmin,
        roles: RoleAdmin,
        permissions: PermissionAdmin,
        menus: MenuAdmin,
    }

    fn fast_hasher() -> Argon2CredentialHasher {
        Argon2CredentialHasher::new(None)
            .with_params(Params::new(Params::MIN_M_COST, 1, 1, None).unwrap())
    }

    async fn setup() -> Harness {
        let store: Arc<dyn AuthStore> = Arc::new(InMemoryAuthStore::new());
        let manual = Arc::new(ManualClock::new(Utc::now()));
        let clock: Arc<dyn Clock> = manual.clone();
        let hasher = Arc::new(fast_hasher());
        let sink = Arc::new(InMemoryAuthEventSink::new());

        seed_demo_data(store.clone(), hasher.as_ref(), clock.clone(), ADMIN_PASSWORD, USER_PASSWORD)
            .await
            .unwrap()
            .expect("fresh store is seeded");

        let tokens = Arc::new(
            TokenService::new(
                TokenConfig {
                    access_secret: b"access-secret".to_vec(),
                    refresh_secret: b"refresh-secret".to_vec(),
                    access_ttl: Duration::hours(1),
                    refresh_ttl: Duration::days(7),
                },
                clock.clone(),
            )
            .unwrap(),
        );
        let auth = Authenticator::new(store.clone(), hasher.clone(), tokens, clock.clone(), sink.clone())
            .with_lockout(LockoutPolicy {
                max_failed_attempts: 5,
                lock_duration: Duration::minutes(30),
            });
        let resolver = PermissionResolver::new(store.clone(), ResolverPolicy::default());

        Harness {
            gate: AuthorizationGate::new(resolver.clone()),
            users: UserAdmin::new(store.clone(), hasher, clock.clone(), PasswordPolicy::default()),
            roles: RoleAdmin::new(store.clone(), clock.clone()),
            permissions: PermissionAdmin::new(store.clone(), clock.clone()),
            menus: MenuAdmin::new(store.clone(), clock),
            store,
            clock: manual,
            sink,
            auth,
            resolver,
        }
    }

    async fn user_id(h: &Harness, email: &str) -> UserId {
        h.store.find_user_by_email(email).await.unwrap().unwrap().id
    }

    async fn menu_id(h: &Harness, name: &str) -> MenuId {
        h.menus
            .list()
            .await
            .unwrap()
            .into_iter()
            .find(|m| m.name == name)
            .unwrap()
            .id
    }

    async fn register(h: &Harness, email: &str, password: &str) -> UserId {
        h.auth
            .register(
                NewAccount {
                    email: email.to_string(),
                    password: password.to_string(),
                    first_name: None,
                    last_name: None,
                    phone_number: None,
                },
                None,
            )
            .await
            .unwrap()
            .id
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Lockout
    // ─────────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn lockout_then_lazy_expiry_for_a_fresh_account() {
        let h = setup().await;
        let id = register(&h, "u@x.com", "Secret123!").await;
        let t0 = h.clock.now();

        for _ in 0..4 {
            let err = h.auth.authenticate("u@x.com", "wrong", None).await.unwrap_err();
            assert_eq!(err, AuthError::InvalidCredentials);
        }
        let status = h.users.status(id).await.unwrap();
        assert_eq!(status.state, AccountState::Active);
        assert_eq!(status.failed_login_attempts, 4);

        let err = h.auth.authenticate("u@x.com", "wrong", None).await.unwrap_err();
        assert_eq!(err, AuthError::AccountLocked);
        let status = h.users.status(id).await.unwrap();
        assert_eq!(
            status.state,
            AccountState::Locked {
                until: t0 + Duration::minutes(30)
            }
        );

        let err = h
            .auth
            .authenticate("u@x.com", "Secret123!", None)
            .await
            .unwrap_err();
        assert_eq!(err, AuthError::AccountLocked);

        h.clock.advance(Duration::minutes(31));
        let ok = h.auth.authenticate("u@x.com", "Secret123!", None).await.unwrap();
        assert_eq!(ok.user.failed_login_attempts, 0);
        assert_eq!(ok.user.locked_until, None);
        assert_eq!(ok.user.last_login_at, Some(h.clock.now()));

        let kinds = h.sink.kinds();
        assert!(kinds.contains(&AuthEventKind::AccountLocked));
        assert!(kinds.contains(&AuthEventKind::LoginRejectedLocked));
        assert_eq!(kinds.last(), Some(&AuthEventKind::LoginSucceeded));
    }

    #[tokio::test]
    async fn attempts_while_locked_do_not_touch_the_counter() {
        let h = setup().await;
        let id = register(&h, "u@x.com", "Secret123!").await;
        for _ in 0..5 {
            let _ = h.auth.authenticate("u@x.com", "wrong", None).await;
        }
        let err = h.auth.authenticate("u@x.com", "wrong", None).await.unwrap_err();
        assert_eq!(err, AuthError::AccountLocked);
        assert_eq!(h.users.status(id).await.unwrap().failed_login_attempts, 5);
    }

    #[tokio::test]
    async fn failure_after_expired_lock_restarts_at_one() {
        let h = setup().await;
        let id = register(&h, "u@x.com", "Secret123!").await;
        for _ in 0..5 {
            let _ = h.auth.authenticate("u@x.com", "wrong", None).await;
        }
        h.clock.advance(Duration::minutes(31));

        let err = h.auth.authenticate("u@x.com", "wrong", None).await.unwrap_err();
        assert_eq!(err, AuthError::InvalidCredentials);
        let status = h.users.status(id).await.unwrap();
        assert_eq!(status.state, AccountState::Active);
        assert_eq!(status.failed_login_attempts, 1);
    }

    #[tokio::test]
    async fn concurrent_failures_are_all_counted() {
        let h = setup().await;
        let id = register(&h, "u@x.com", "Secret123!").await;

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let auth = h.auth.clone();
                tokio::spawn(async move { auth.authenticate("u@x.com", "wrong", None).await })
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap_err(), AuthError::InvalidCredentials);
        }
        assert_eq!(h.users.status(id).await.unwrap().failed_login_attempts, 4);
    }

    #[tokio::test]
    async fn admin_unlock_clears_lock_immediately() {
        let h = setup().await;
        let id = register(&h, "u@x.com", "Secret123!").await;
        for _ in 0..5 {
            let _ = h.auth.authenticate("u@x.com", "wrong", None).await;
        }
        let status = h.users.unlock(id).await.unwrap();
        assert_eq!(status.state, AccountState::Active);
        assert!(h.auth.authenticate("u@x.com", "Secret123!", None).await.is_ok());
    }

    #[tokio::test]
    async fn unknown_email_is_invalid_credentials() {
        let h = setup().await;
        let err = h
            .auth
            .authenticate("ghost@x.com", "whatever", None)
            .await
            .unwrap_err();
        assert_eq!(err, AuthError::InvalidCredentials);
        assert_eq!(h.sink.kinds(), vec![AuthEventKind::LoginFailed]);
    }

    #[tokio::test]
    async fn disabled_account_rejects_even_wrong_password_without_counting() {
        let h = setup().await;
        let id = user_id(&h, USER_EMAIL).await;
        h.users.deactivate(id).await.unwrap();

        let err = h.auth.authenticate(USER_EMAIL, "wrong", None).await.unwrap_err();
        assert_eq!(err, AuthError::AccountDisabled);
        let status = h.users.status(id).await.unwrap();
        assert_eq!(status.state, AccountState::Disabled);
        assert_eq!(status.failed_login_attempts, 0);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Tokens
    // ─────────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn login_token_carries_roles_and_permissions() {
        let h = setup().await;
        let response = h.auth.login(ADMIN_EMAIL, ADMIN_PASSWORD, None).await.unwrap();
        assert_eq!(response.tokens.token_type, "Bearer");
        assert_eq!(response.tokens.expires_in, 3_600_000);

        let identity = h.auth.tokens().verify(&response.tokens.access_token).unwrap();
        assert_eq!(identity.email, ADMIN_EMAIL);
        assert!(identity.roles.contains("ROLE_ADMIN"));
        assert!(identity.permissions.contains("SYSTEM_ADMIN"));
        assert!(identity.permissions.contains("USERS_DELETE"));
    }

    #[tokio::test]
    async fn access_token_expires_with_the_clock() {
        let h = setup().await;
        let response = h.auth.login(USER_EMAIL, USER_PASSWORD, None).await.unwrap();
        h.clock.advance(Duration::hours(1) + Duration::seconds(1));
        assert_eq!(
            h.auth.tokens().verify(&response.tokens.access_token),
            Err(AuthError::TokenExpired)
        );
    }

    #[tokio::test]
    async fn refresh_re_resolves_current_roles() {
        let h = setup().await;
        let id = user_id(&h, USER_EMAIL).await;
        let first = h.auth.login(USER_EMAIL, USER_PASSWORD, None).await.unwrap();

        let manager = h
            .store
            .find_role_by_name(&RoleName::MANAGER)
            .await
            .unwrap()
            .unwrap();
        h.users.assign_role(id, manager.id).await.unwrap();

        // The old access token keeps the snapshot it was signed with.
        let stale = h.auth.tokens().verify(&first.tokens.access_token).unwrap();
        assert!(!stale.roles.contains("ROLE_MANAGER"));
        assert!(!stale.permissions.contains("USERS_VIEW"));

        let refreshed = h
            .auth
            .refresh(&first.tokens.refresh_token, None)
            .await
            .unwrap();
        let identity = h.auth.tokens().verify(&refreshed.tokens.access_token).unwrap();
        assert!(identity.roles.contains("ROLE_MANAGER"));
        assert!(identity.permissions.contains("USERS_VIEW"));
        assert!(h.sink.kinds().contains(&AuthEventKind::TokenRefreshed));
    }

    #[tokio::test]
    async fn refresh_is_refused_for_disabled_accounts() {
        let h = setup().await;
        let first = h.auth.login(USER_EMAIL, USER_PASSWORD, None).await.unwrap();
        let id = user_id(&h, USER_EMAIL).await;
        h.users.deactivate(id).await.unwrap();
        assert_eq!(
            h.auth.refresh(&first.tokens.refresh_token, None).await.unwrap_err(),
            AuthError::AccountDisabled
        );
    }

    #[tokio::test]
    async fn access_token_is_not_a_refresh_token() {
        let h = setup().await;
        let first = h.auth.login(USER_EMAIL, USER_PASSWORD, None).await.unwrap();
        assert_eq!(
            h.auth.refresh(&first.tokens.access_token, None).await.unwrap_err(),
            AuthError::TokenInvalid
        );
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Registration
    // ─────────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn registration_assigns_the_default_role() {
        let h = setup().await;
        let view = h
            .auth
            .register(
                NewAccount {
                    email: "  New@X.com ".into(),
                    password: "Secret123!".into(),
                    first_name: Some("Ada".into()),
                    last_name: None,
                    phone_number: None,
                },
                None,
            )
            .await
            .unwrap();
        assert_eq!(view.email, "new@x.com");
        assert_eq!(view.roles, vec!["ROLE_USER".to_string()]);
        assert!(view.is_active);
        assert!(!view.email_verified);
    }

    #[tokio::test]
    async fn registration_rejects_duplicates_and_weak_passwords() {
        let h = setup().await;
        register(&h, "u@x.com", "Secret123!").await;
        let dup = h
            .auth
            .register(
                NewAccount {
                    email: "U@X.COM".into(),
                    password: "Secret123!".into(),
                    first_name: None,
                    last_name: None,
                    phone_number: None,
                },
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(dup, AuthError::Duplicate(_)));

        let weak = h
            .auth
            .register(
                NewAccount {
                    email: "w@x.com".into(),
                    password: "password".into(),
                    first_name: None,
                    last_name: None,
                    phone_number: None,
                },
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(weak, AuthError::WeakPassword(_)));
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Catalogue and roles
    // ─────────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn duplicate_resource_action_pair_is_rejected_regardless_of_name() {
        let h = setup().await;
        let make = |name: &str| NewPermission {
            name: name.to_string(),
            display_name: None,
            description: None,
            resource: "invoices".into(),
            action: PermissionAction::View,
        };
        h.permissions.create(make("INVOICES_VIEW")).await.unwrap();
        let err = h.permissions.create(make("SEE_INVOICES")).await.unwrap_err();
        assert!(matches!(err, AuthError::Duplicate(_)));
        assert_eq!(h.permissions.by_resource("invoices").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn deleting_a_role_cascades_to_holders_and_grants() {
        let h = setup().await;
        let id = user_id(&h, USER_EMAIL).await;
        let role = h
            .roles
            .create(NewRole {
                name: "auditor".into(),
                display_name: None,
                description: None,
                permission_ids: BTreeSet::new(),
            })
            .await
            .unwrap();
        assert_eq!(role.name.as_str(), "ROLE_AUDITOR");
        h.users.assign_role(id, role.id).await.unwrap();
        let dashboard = menu_id(&h, "dashboard").await;
        h.menus
            .grant_role(dashboard, role.id, MenuPermissions::ALL)
            .await
            .unwrap();

        h.roles.delete(role.id).await.unwrap();

        let view = h.users.get(id).await.unwrap();
        assert_eq!(view.roles, vec!["ROLE_USER".to_string()]);
        assert!(h.menus.grants_for_menu(dashboard).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn deleting_a_holders_only_role_is_refused() {
        let h = setup().await;
        let id = user_id(&h, USER_EMAIL).await;
        let user_role = h.store.find_role_by_name(&RoleName::USER).await.unwrap().unwrap();
        let role = h
            .roles
            .create(NewRole {
                name: "auditor".into(),
                display_name: None,
                description: None,
                permission_ids: BTreeSet::new(),
            })
            .await
            .unwrap();
        h.users.assign_role(id, role.id).await.unwrap();
        h.users.remove_role(id, user_role.id).await.unwrap();

        let err = h.roles.delete(role.id).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidState(_)));
        assert_eq!(err.code(), "BUSINESS_003");
        assert_eq!(h.users.get(id).await.unwrap().roles, vec!["ROLE_AUDITOR".to_string()]);

        h.users.assign_role(id, user_role.id).await.unwrap();
        h.roles.delete(role.id).await.unwrap();
        assert_eq!(h.users.get(id).await.unwrap().roles, vec!["ROLE_USER".to_string()]);
    }

    #[tokio::test]
    async fn system_roles_cannot_be_deleted() {
        let h = setup().await;
        let admin = h
            .store
            .find_role_by_name(&RoleName::ADMIN)
            .await
            .unwrap()
            .unwrap();
        let err = h.roles.delete(admin.id).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidState(_)));
    }

    #[tokio::test]
    async fn a_user_keeps_at_least_one_role() {
        let h = setup().await;
        let id = user_id(&h, USER_EMAIL).await;
        let role = h
            .store
            .find_role_by_name(&RoleName::USER)
            .await
            .unwrap()
            .unwrap();
        let err = h.users.remove_role(id, role.id).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidState(_)));
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Menus and resolution
    // ─────────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn reparenting_under_a_descendant_is_a_cycle() {
        let h = setup().await;
        let system = h.menus.get(menu_id(&h, "system").await).await.unwrap();
        let users = menu_id(&h, "users").await;

        let mut draft = backoffice_auth::MenuDraft {
            name: system.name.clone(),
            display_name: system.display_name.clone(),
            url: system.url.clone(),
            icon: None,
            menu_type: system.menu_type,
            target_window: None,
            sort_order: system.sort_order,
            parent_id: Some(users),
            is_visible: true,
            is_active: true,
        };
        let err = h.menus.update(system.id, draft.clone()).await.unwrap_err();
        assert!(matches!(err, AuthError::MenuCycle(_)));

        let dashboard = menu_id(&h, "dashboard").await;
        draft.parent_id = Some(dashboard);
        h.menus.update(system.id, draft).await.unwrap();
        assert_eq!(h.menus.get(system.id).await.unwrap().level, 1);
        assert_eq!(h.menus.get(users).await.unwrap().level, 2);
    }

    fn moved(menu: &backoffice_auth::Menu, parent: Option<MenuId>) -> backoffice_auth::MenuDraft {
        backoffice_auth::MenuDraft {
            name: menu.name.clone(),
            display_name: menu.display_name.clone(),
            url: menu.url.clone(),
            icon: menu.icon.clone(),
            menu_type: menu.menu_type,
            target_window: menu.target_window.clone(),
            sort_order: menu.sort_order,
            parent_id: parent,
            is_visible: menu.is_visible,
            is_active: menu.is_active,
        }
    }

    #[tokio::test]
    async fn opposite_moves_cannot_both_land() {
        let h = setup().await;
        let dashboard = h.menus.get(menu_id(&h, "dashboard").await).await.unwrap();
        let system = h.menus.get(menu_id(&h, "system").await).await.unwrap();

        // Both drafts are built from the same read, where either move is legal.
        let (left, right) = tokio::join!(
            h.menus.update(dashboard.id, moved(&dashboard, Some(system.id))),
            h.menus.update(system.id, moved(&system, Some(dashboard.id))),
        );
        let refused = [&left, &right]
            .iter()
            .filter(|r| matches!(r, Err(AuthError::MenuCycle(_))))
            .count();
        assert_eq!(refused, 1, "left: {left:?}, right: {right:?}");
        assert_eq!(left.is_ok() as u8 + right.is_ok() as u8, 1);

        let dashboard = h.menus.get(dashboard.id).await.unwrap();
        let system = h.menus.get(system.id).await.unwrap();
        assert!(dashboard.parent_id.is_none() || system.parent_id.is_none());
    }

    #[tokio::test]
    async fn sequential_opposite_moves_check_the_current_tree() {
        let h = setup().await;
        let dashboard = h.menus.get(menu_id(&h, "dashboard").await).await.unwrap();
        let system = h.menus.get(menu_id(&h, "system").await).await.unwrap();

        h.menus
            .update(dashboard.id, moved(&dashboard, Some(system.id)))
            .await
            .unwrap();
        let err = h
            .menus
            .update(system.id, moved(&system, Some(dashboard.id)))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::MenuCycle(_)));
        assert_eq!(h.menus.get(system.id).await.unwrap().parent_id, None);
        assert_eq!(h.menus.get(dashboard.id).await.unwrap().level, 1);
    }

    #[tokio::test]
    async fn user_override_replaces_individual_flags() {
        let h = setup().await;
        let id = user_id(&h, USER_EMAIL).await;
        let dashboard = menu_id(&h, "dashboard").await;

        let base = h.resolver.resolve(id, dashboard).await.unwrap();
        assert!(base.permissions.can_view);
        assert!(!base.permissions.can_update);

        h.menus
            .set_user_override(
                dashboard,
                id,
                FlagOverrides {
                    can_update: Some(true),
                    ..FlagOverrides::default()
                },
            )
            .await
            .unwrap();
        let granted = h.resolver.resolve(id, dashboard).await.unwrap();
        assert_eq!(granted.decided_by, Decision::UserOverride);
        assert!(granted.permissions.can_update);
        assert!(granted.permissions.can_view);

        h.menus
            .set_user_override(
                dashboard,
                id,
                FlagOverrides {
                    can_view: Some(false),
                    ..FlagOverrides::default()
                },
            )
            .await
            .unwrap();
        let hidden = h.resolver.resolve(id, dashboard).await.unwrap();
        assert!(!hidden.permissions.can_view);
    }

    #[tokio::test]
    async fn favourites_do_not_grant_anything() {
        let h = setup().await;
        let id = user_id(&h, USER_EMAIL).await;
        let users_menu = menu_id(&h, "users").await;

        assert!(h.menus.toggle_favorite(id, users_menu).await.unwrap());
        let resolution = h.resolver.resolve(id, users_menu).await.unwrap();
        assert_eq!(resolution.permissions, MenuPermissions::NONE);
        assert_eq!(h.menus.favorites(id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn inactive_menu_is_closed_even_to_admins() {
        let h = setup().await;
        let admin = user_id(&h, ADMIN_EMAIL).await;
        let dashboard = h.menus.get(menu_id(&h, "dashboard").await).await.unwrap();

        let open = h.resolver.resolve(admin, dashboard.id).await.unwrap();
        assert_eq!(open.permissions, MenuPermissions::ALL);
        assert_eq!(open.decided_by, Decision::AdminBypass);

        let draft = backoffice_auth::MenuDraft {
            name: dashboard.name.clone(),
            display_name: None,
            url: dashboard.url.clone(),
            icon: None,
            menu_type: dashboard.menu_type,
            target_window: None,
            sort_order: dashboard.sort_order,
            parent_id: None,
            is_visible: true,
            is_active: false,
        };
        h.menus.update(dashboard.id, draft).await.unwrap();

        let closed = h.resolver.resolve(admin, dashboard.id).await.unwrap();
        assert_eq!(closed.permissions, MenuPermissions::NONE);
        assert_eq!(closed.decided_by, Decision::Gate);
    }

    #[tokio::test]
    async fn role_grant_replaces_type_defaults() {
        let h = setup().await;
        let id = user_id(&h, USER_EMAIL).await;
        let role = h
            .store
            .find_role_by_name(&RoleName::USER)
            .await
            .unwrap()
            .unwrap();
        let roles_menu = menu_id(&h, "roles").await;

        assert!(!h.resolver.has_permission(id, roles_menu, MenuAction::View).await.unwrap());
        h.menus
            .grant_role(roles_menu, role.id, MenuPermissions::NAVIGATE)
            .await
            .unwrap();
        let resolution = h.resolver.resolve(id, roles_menu).await.unwrap();
        assert_eq!(resolution.decided_by, Decision::RoleGrant);
        assert!(resolution.permissions.can_view);
        assert!(!resolution.permissions.can_delete);
    }

    #[tokio::test]
    async fn menu_grants_copy_onto_another_menu() {
        let h = setup().await;
        let id = user_id(&h, USER_EMAIL).await;
        let user_role = h.store.find_role_by_name(&RoleName::USER).await.unwrap().unwrap();
        let manager = h.store.find_role_by_name(&RoleName::MANAGER).await.unwrap().unwrap();
        let roles_menu = menu_id(&h, "roles").await;
        let menus_menu = menu_id(&h, "menus").await;

        h.menus
            .grant_role(roles_menu, user_role.id, MenuPermissions::NAVIGATE)
            .await
            .unwrap();
        h.menus
            .grant_role(menus_menu, user_role.id, MenuPermissions::ALL)
            .await
            .unwrap();
        h.menus
            .grant_role(menus_menu, manager.id, MenuPermissions::ALL)
            .await
            .unwrap();

        assert_eq!(h.menus.copy_menu_grants(roles_menu, menus_menu).await.unwrap(), 1);

        let on_target = h.menus.grants_for_menu(menus_menu).await.unwrap();
        assert_eq!(on_target.len(), 2);
        let copied = on_target.iter().find(|g| g.role_id == user_role.id).unwrap();
        assert_eq!(copied.permissions, MenuPermissions::NAVIGATE);
        let kept = on_target.iter().find(|g| g.role_id == manager.id).unwrap();
        assert_eq!(kept.permissions, MenuPermissions::ALL);
        assert!(h.resolver.has_permission(id, menus_menu, MenuAction::Access).await.unwrap());
        assert!(!h.resolver.has_permission(id, menus_menu, MenuAction::Delete).await.unwrap());

        let err = h.menus.copy_menu_grants(roles_menu, roles_menu).await.unwrap_err();
        assert!(matches!(err, AuthError::Validation(_)));
        let err = h.menus.copy_menu_grants(roles_menu, MenuId::new()).await.unwrap_err();
        assert!(matches!(err, AuthError::NotFound(_)));
    }

    #[tokio::test]
    async fn accessible_tree_hides_admin_menus_from_plain_users() {
        let h = setup().await;
        let id = user_id(&h, USER_EMAIL).await;
        let names: Vec<String> = h
            .resolver
            .accessible_menus(id)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.name)
            .collect();
        assert!(names.contains(&"dashboard".to_string()));
        assert!(names.contains(&"help".to_string()));
        assert!(!names.contains(&"users".to_string()));

        let admin = user_id(&h, ADMIN_EMAIL).await;
        let tree = h.resolver.accessible_tree(admin).await.unwrap();
        let system = tree.iter().find(|n| n.menu.name == "system").unwrap();
        assert_eq!(system.children.len(), 3);
    }

    async fn names_at(h: &Harness, user: UserId, level: PermissionLevel) -> Vec<String> {
        h.resolver
            .menus_by_level(user, level)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.name)
            .collect()
    }

    #[tokio::test]
    async fn each_menu_sits_in_one_level_bucket() {
        let h = setup().await;
        let id = user_id(&h, USER_EMAIL).await;

        assert_eq!(names_at(&h, id, PermissionLevel::Accessible).await, ["dashboard", "system", "help"]);
        assert!(names_at(&h, id, PermissionLevel::ViewOnly).await.is_empty());
        assert!(names_at(&h, id, PermissionLevel::Editable).await.is_empty());
        assert!(names_at(&h, id, PermissionLevel::Admin).await.is_empty());

        let manager = h
            .store
            .find_role_by_name(&RoleName::MANAGER)
            .await
            .unwrap()
            .unwrap();
        h.users.assign_role(id, manager.id).await.unwrap();

        // Internal menus gain execute for managers; admin menus become visible only.
        assert_eq!(names_at(&h, id, PermissionLevel::Admin).await, ["dashboard"]);
        assert_eq!(names_at(&h, id, PermissionLevel::ViewOnly).await, ["users", "roles", "menus"]);
        assert_eq!(names_at(&h, id, PermissionLevel::Accessible).await, ["system", "help"]);

        let dashboard = menu_id(&h, "dashboard").await;
        h.menus
            .set_user_override(
                dashboard,
                id,
                FlagOverrides {
                    can_execute: Some(false),
                    ..FlagOverrides::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(names_at(&h, id, PermissionLevel::Editable).await, ["dashboard"]);
        assert!(names_at(&h, id, PermissionLevel::Admin).await.is_empty());
    }

    #[tokio::test]
    async fn accessible_menus_require_access_not_just_view() {
        let h = setup().await;
        let id = user_id(&h, USER_EMAIL).await;
        let dashboard = menu_id(&h, "dashboard").await;

        h.menus
            .set_user_override(
                dashboard,
                id,
                FlagOverrides {
                    can_view: Some(true),
                    can_access: Some(false),
                    ..FlagOverrides::default()
                },
            )
            .await
            .unwrap();

        assert!(h.resolver.resolve(id, dashboard).await.unwrap().permissions.can_view);
        let names: Vec<String> = h
            .resolver
            .accessible_menus(id)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.name)
            .collect();
        assert!(!names.contains(&"dashboard".to_string()));
        assert!(names.contains(&"help".to_string()));
        assert_eq!(names_at(&h, id, PermissionLevel::ViewOnly).await, ["dashboard"]);
    }

    #[tokio::test]
    async fn url_lookup_denies_unknown_paths() {
        let h = setup().await;
        let id = user_id(&h, USER_EMAIL).await;
        assert!(h.resolver.can_access_url(id, "/dashboard").await.unwrap());
        assert!(!h.resolver.can_access_url(id, "/nowhere").await.unwrap());
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Gate
    // ─────────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn gate_checks_live_role_permissions() {
        let h = setup().await;
        let admin = h.auth.login(ADMIN_EMAIL, ADMIN_PASSWORD, None).await.unwrap();
        let user = h.auth.login(USER_EMAIL, USER_PASSWORD, None).await.unwrap();
        let admin_id = h.auth.tokens().verify(&admin.tokens.access_token).unwrap();
        let user_id = h.auth.tokens().verify(&user.tokens.access_token).unwrap();
        let users = ProtectedResource::resource("users");

        h.gate.check(&admin_id, &users, MenuAction::Delete).await.unwrap();
        let err = h.gate.check(&user_id, &users, MenuAction::View).await.unwrap_err();
        assert!(matches!(err, AuthError::InsufficientPermission { .. }));

        h.gate
            .check(&user_id, &ProtectedResource::resource("menus"), MenuAction::View)
            .await
            .unwrap();
        let unknown = h
            .gate
            .check(&user_id, &ProtectedResource::resource("rockets"), MenuAction::View)
            .await
            .unwrap_err();
        assert!(matches!(unknown, AuthError::InsufficientPermission { .. }));
    }

    #[tokio::test]
    async fn gate_rejects_deactivated_bearers() {
        let h = setup().await;
        let login = h.auth.login(USER_EMAIL, USER_PASSWORD, None).await.unwrap();
        let identity = h.auth.tokens().verify(&login.tokens.access_token).unwrap();
        h.users.deactivate(identity.user_id).await.unwrap();

        let err = h
            .gate
            .check(&identity, &ProtectedResource::resource("menus"), MenuAction::View)
            .await
            .unwrap_err();
        assert_eq!(err, AuthError::AccountDisabled);
    }

    #[tokio::test]
    async fn seeding_twice_is_a_no_op() {
        let h = setup().await;
        let again = seed_demo_data(
            h.store.clone(),
            &fast_hasher(),
            h.clock.clone(),
            ADMIN_PASSWORD,
            USER_PASSWORD,
        )
        .await
        .unwrap();
        assert!(again.is_none());
    }
}
