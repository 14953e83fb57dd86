//! Demo catalogue, roles, accounts and menu tree for a fresh store.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::info;

use backoffice_auth::admin::MenuAdmin;
use backoffice_auth::resources::{MENUS, PERMISSIONS, ROLES, SYSTEM, USERS};
use backoffice_auth::{
    AuthResult, AuthStore, CredentialHasher, MenuDraft, MenuType, NewPermission, Permission,
    PermissionAction, PermissionTemplate, Role, RoleName, User,
};
use backoffice_core::{Clock, MenuId, PermissionId};

pub const ADMIN_EMAIL: &str = "admin@example.com";
pub const USER_EMAIL: &str = "user@example.com";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SeedReport {
    pub permissions: usize,
    pub roles: usize,
    pub users: usize,
    pub menus: usize,
}

fn ids_where(catalogue: &[Permission], keep: impl Fn(&Permission) -> bool) -> BTreeSet<PermissionId> {
    catalogue.iter().filter(|p| keep(p)).map(|p| p.id).collect()
}

/// Populate an empty store. Returns `None` when users or roles already exist.
pub async fn seed_demo_data(
    store: Arc<dyn AuthStore>,
    hasher: &dyn CredentialHasher,
    clock: Arc<dyn Clock>,
    admin_password: &str,
    user_password: &str,
) -> AuthResult<Option<SeedReport>> {
    if !store.list_users().await?.is_empty() || !store.list_roles().await?.is_empty() {
        info!("store already populated; skipping demo seed");
        return Ok(None);
    }
    let now = clock.now();
    let mut report = SeedReport::default();

    // Catalogue
    let mut catalogue: Vec<Permission> = Vec::new();
    let mut drafts: Vec<NewPermission> = [USERS, ROLES, PERMISSIONS, MENUS]
        .into_iter()
        .flat_map(|resource| PermissionTemplate::Crud.expand(resource))
        .collect();
    drafts.push(NewPermission {
        name: "SYSTEM_ADMIN".into(),
        display_name: Some("System administration".into()),
        description: None,
        resource: SYSTEM.into(),
        action: PermissionAction::Admin,
    });
    for draft in drafts {
        let permission = draft.into_permission(now)?;
        store.insert_permission(&permission).await?;
        catalogue.push(permission);
    }
    report.permissions = catalogue.len();

    // Roles
    let mut admin = Role::new(RoleName::ADMIN, Some("Administrator".into()), now);
    admin.is_system = true;
    admin.permissions = ids_where(&catalogue, |_| true);

    let mut user = Role::new(RoleName::USER, Some("User".into()), now);
    user.is_system = true;
    user.permissions = ids_where(&catalogue, |p| {
        p.resource == MENUS && p.action == PermissionAction::View
    });

    let mut manager = Role::new(RoleName::MANAGER, Some("Manager".into()), now);
    manager.permissions = ids_where(&catalogue, |p| {
        p.action == PermissionAction::View
            || (p.resource == MENUS && p.action == PermissionAction::Update)
    });

    for role in [&admin, &user, &manager] {
        store.insert_role(role).await?;
    }
    report.roles = 3;

    // Accounts
    for (email, password, role, first) in [
        (ADMIN_EMAIL, admin_password, &admin, "Admin"),
        (USER_EMAIL, user_password, &user, "Demo"),
    ] {
        let mut account = User::new(email.to_string(), hasher.hash(password)?, now);
        account.first_name = Some(first.to_string());
        account.email_verified = true;
        account.roles.insert(role.id);
        store.insert_user(&account).await?;
    }
    report.users = 2;

    // Menus
    let menus = MenuAdmin::new(store.clone(), clock);
    let draft = |name: &str,
                 url: Option<&str>,
                 menu_type: MenuType,
                 sort_order: i32,
                 parent_id: Option<MenuId>| MenuDraft {
        name: name.to_string(),
        display_name: None,
        url: url.map(str::to_string),
        icon: None,
        menu_type,
        target_window: None,
        sort_order,
        parent_id,
        is_visible: true,
        is_active: true,
    };
    menus
        .create(draft("dashboard", Some("/dashboard"), MenuType::Internal, 1, None))
        .await?;
    let system = menus
        .create(draft("system", None, MenuType::Group, 2, None))
        .await?;
    for (i, name) in ["users", "roles", "menus"].into_iter().enumerate() {
        let url = format!("/system/{name}");
        menus
            .create(draft(name, Some(&url), MenuType::Admin, i as i32 + 1, Some(system.id)))
            .await?;
    }
    menus
        .create(draft("help", Some("/help"), MenuType::Public, 3, None))
        .await?;
    report.menus = 6;

    info!(
        permissions = report.permissions,
        roles = report.roles,
        users = report.users,
        menus = report.menus,
        "demo data seeded"
    );
    Ok(Some(report))
}
