//! Postgres-backed [`AuthStore`].
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError |
//! |------------|----------------------|------------|
//! | Database (unique violation) | `23505` | `Duplicate` |
//! | Database (foreign key violation) | `23503` | `NotFound` |
//! | Database (other) | Any other | `Backend` |
//! | PoolClosed / other | N/A | `Backend` |
//!
//! ## Consistency
//!
//! Snapshots are read inside one `REPEATABLE READ READ ONLY` transaction.
//! A failed login is a single conditional `UPDATE`, so the row lock
//! serialises concurrent failures for the same account. Menu tree rewrites
//! take a `SHARE ROW EXCLUSIVE` table lock before reading the forest, so
//! two reparents cannot validate against the same stale tree.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgExecutor, PgPool, Row};
use tracing::instrument;
use uuid::Uuid;

use backoffice_auth::{
    AuthStore, FlagOverrides, LockoutPolicy, LockoutState, Menu, MenuPermissionStore,
    MenuPermissions, MenuScope, MenuStore, MenuTree, MenuTreePlan, MenuType, Permission,
    PermissionAction,
    PermissionStore, ResolutionSnapshot, Role, RoleMenuGrant, RoleName, RoleStore, StoreError,
    StoreResult, User, UserMenuOverride, UserStore,
};
use backoffice_core::{MenuId, PermissionId, RoleId, UserId};

const SCHEMA: &str = include_str!("../../migrations/0001_auth_schema.sql");

const USER_COLUMNS: &str = "id, email, password_hash, first_name, last_name, phone_number, \
     is_active, email_verified, mfa_enabled, failed_login_attempts, account_locked_until, \
     last_login_at, created_at, updated_at";
const ROLE_COLUMNS: &str = "id, name, display_name, description, is_system, created_at, updated_at";
const PERMISSION_COLUMNS: &str =
    "id, name, display_name, description, resource, action, created_at";
const MENU_COLUMNS: &str = "id, name, display_name, url, icon, menu_type, target_window, \
     sort_order, parent_id, level, is_visible, is_active, created_at, updated_at";
const FLAG_COLUMNS: &str = "can_view, can_access, can_create, can_update, can_delete, can_execute";

#[derive(Debug, Clone)]
pub struct PgAuthStore {
    pool: Arc<PgPool>,
}

impl PgAuthStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Open a pool against `database_url` and apply the schema.
    pub async fn connect(database_url: &str, max_connections: u32) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        let store = Self::new(pool);
        store.ensure_schema().await?;
        Ok(store)
    }

    #[instrument(skip(self), err)]
    pub async fn ensure_schema(&self) -> StoreResult<()> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        Ok(())
    }

    async fn select_users(&self, filter: &str, bind: Option<Uuid>) -> StoreResult<Vec<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users {filter} ORDER BY created_at, email");
        let mut query = sqlx::query(&sql);
        if let Some(id) = bind {
            query = query.bind(id);
        }
        let rows = query
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("select_users", e))?;
        let ids: Vec<Uuid> = rows
            .iter()
            .map(|r| r.try_get("id"))
            .collect::<Result<_, _>>()
            .map_err(|e| map_sqlx_error("select_users", e))?;
        let mut roles = role_ids_by_user(&*self.pool, &ids)
            .await
            .map_err(|e| map_sqlx_error("select_users", e))?;
        rows.iter()
            .map(|row| {
                let id: Uuid = row.try_get("id")?;
                user_from_row(row, roles.remove(&id).unwrap_or_default())
            })
            .collect::<Result<_, _>>()
            .map_err(|e| map_sqlx_error("select_users", e))
    }

    async fn select_roles(&self, filter: &str, bind: Option<Bound<'_>>) -> StoreResult<Vec<Role>> {
        let sql = format!("SELECT {ROLE_COLUMNS} FROM roles {filter} ORDER BY name");
        let mut query = sqlx::query(&sql);
        match bind {
            Some(Bound::Id(id)) => query = query.bind(id),
            Some(Bound::Text(text)) => query = query.bind(text),
            None => {}
        }
        let rows = query
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("select_roles", e))?;
        let ids: Vec<Uuid> = rows
            .iter()
            .map(|r| r.try_get("id"))
            .collect::<Result<_, _>>()
            .map_err(|e| map_sqlx_error("select_roles", e))?;
        let mut grants = permission_ids_by_role(&*self.pool, &ids)
            .await
            .map_err(|e| map_sqlx_error("select_roles", e))?;
        rows.iter()
            .map(|row| {
                let id: Uuid = row.try_get("id")?;
                role_from_row(row, grants.remove(&id).unwrap_or_default())
            })
            .collect::<Result<_, _>>()
            .map_err(|e| map_sqlx_error("select_roles", e))
    }
}

enum Bound<'a> {
    Id(Uuid),
    Text(&'a str),
}

// ─────────────────────────────────────────────────────────────────────────────
// Row mapping
// ─────────────────────────────────────────────────────────────────────────────

fn decode_err(e: impl std::error::Error + Send + Sync + 'static) -> sqlx::Error {
    sqlx::Error::Decode(Box::new(e))
}

fn non_negative(value: i32) -> u32 {
    u32::try_from(value).unwrap_or(0)
}

fn user_from_row(row: &PgRow, roles: BTreeSet<RoleId>) -> Result<User, sqlx::Error> {
    Ok(User {
        id: UserId::from_uuid(row.try_get("id")?),
        email: row.try_get("email")?,
        password_hash: row.try_get("password_hash")?,
        first_name: row.try_get("first_name")?,
        last_name: row.try_get("last_name")?,
        phone_number: row.try_get("phone_number")?,
        is_active: row.try_get("is_active")?,
        email_verified: row.try_get("email_verified")?,
        mfa_enabled: row.try_get("mfa_enabled")?,
        failed_login_attempts: non_negative(row.try_get("failed_login_attempts")?),
        locked_until: row.try_get("account_locked_until")?,
        last_login_at: row.try_get("last_login_at")?,
        roles,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn role_from_row(row: &PgRow, permissions: BTreeSet<PermissionId>) -> Result<Role, sqlx::Error> {
    let name: String = row.try_get("name")?;
    Ok(Role {
        id: RoleId::from_uuid(row.try_get("id")?),
        name: RoleName::new(name),
        display_name: row.try_get("display_name")?,
        description: row.try_get("description")?,
        is_system: row.try_get("is_system")?,
        permissions,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn permission_from_row(row: &PgRow) -> Result<Permission, sqlx::Error> {
    let action: String = row.try_get("action")?;
    Ok(Permission {
        id: PermissionId::from_uuid(row.try_get("id")?),
        name: row.try_get("name")?,
        display_name: row.try_get("display_name")?,
        description: row.try_get("description")?,
        resource: row.try_get("resource")?,
        action: action.parse::<PermissionAction>().map_err(decode_err)?,
        created_at: row.try_get("created_at")?,
    })
}

fn menu_from_row(row: &PgRow) -> Result<Menu, sqlx::Error> {
    let menu_type: String = row.try_get("menu_type")?;
    let parent: Option<Uuid> = row.try_get("parent_id")?;
    Ok(Menu {
        id: MenuId::from_uuid(row.try_get("id")?),
        name: row.try_get("name")?,
        display_name: row.try_get("display_name")?,
        url: row.try_get("url")?,
        icon: row.try_get("icon")?,
        menu_type: menu_type.parse::<MenuType>().map_err(decode_err)?,
        target_window: row.try_get("target_window")?,
        sort_order: row.try_get("sort_order")?,
        parent_id: parent.map(MenuId::from_uuid),
        level: non_negative(row.try_get("level")?),
        is_visible: row.try_get("is_visible")?,
        is_active: row.try_get("is_active")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn grant_from_row(row: &PgRow) -> Result<RoleMenuGrant, sqlx::Error> {
    Ok(RoleMenuGrant {
        role_id: RoleId::from_uuid(row.try_get("role_id")?),
        menu_id: MenuId::from_uuid(row.try_get("menu_id")?),
        permissions: MenuPermissions {
            can_view: row.try_get("can_view")?,
            can_access: row.try_get("can_access")?,
            can_create: row.try_get("can_create")?,
            can_update: row.try_get("can_update")?,
            can_delete: row.try_get("can_delete")?,
            can_execute: row.try_get("can_execute")?,
        },
    })
}

fn override_from_row(row: &PgRow) -> Result<UserMenuOverride, sqlx::Error> {
    Ok(UserMenuOverride {
        user_id: UserId::from_uuid(row.try_get("user_id")?),
        menu_id: MenuId::from_uuid(row.try_get("menu_id")?),
        flags: FlagOverrides {
            can_view: row.try_get("can_view")?,
            can_access: row.try_get("can_access")?,
            can_create: row.try_get("can_create")?,
            can_update: row.try_get("can_update")?,
            can_delete: row.try_get("can_delete")?,
            can_execute: row.try_get("can_execute")?,
        },
        is_override: row.try_get("is_override")?,
        is_favorite: row.try_get("is_favorite")?,
    })
}

fn uuids<T: Copy>(ids: impl IntoIterator<Item = T>, f: impl Fn(T) -> Uuid) -> Vec<Uuid> {
    ids.into_iter().map(f).collect()
}

async fn role_ids_by_user<'e>(
    executor: impl PgExecutor<'e>,
    users: &[Uuid],
) -> Result<HashMap<Uuid, BTreeSet<RoleId>>, sqlx::Error> {
    let rows = sqlx::query("SELECT user_id, role_id FROM user_roles WHERE user_id = ANY($1)")
        .bind(users)
        .fetch_all(executor)
        .await?;
    let mut out: HashMap<Uuid, BTreeSet<RoleId>> = HashMap::new();
    for row in rows {
        let user: Uuid = row.try_get("user_id")?;
        let role: Uuid = row.try_get("role_id")?;
        out.entry(user).or_default().insert(RoleId::from_uuid(role));
    }
    Ok(out)
}

async fn permission_ids_by_role<'e>(
    executor: impl PgExecutor<'e>,
    roles: &[Uuid],
) -> Result<HashMap<Uuid, BTreeSet<PermissionId>>, sqlx::Error> {
    let rows = sqlx::query(
        "SELECT role_id, permission_id FROM role_permissions WHERE role_id = ANY($1)",
    )
    .bind(roles)
    .fetch_all(executor)
    .await?;
    let mut out: HashMap<Uuid, BTreeSet<PermissionId>> = HashMap::new();
    for row in rows {
        let role: Uuid = row.try_get("role_id")?;
        let permission: Uuid = row.try_get("permission_id")?;
        out.entry(role)
            .or_default()
            .insert(PermissionId::from_uuid(permission));
    }
    Ok(out)
}

fn expect_row(affected: u64, what: &str) -> StoreResult<()> {
    if affected == 0 {
        Err(StoreError::NotFound(what.to_string()))
    } else {
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Users
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait]
impl UserStore for PgAuthStore {
    #[instrument(skip(self), err)]
    async fn find_user(&self, id: UserId) -> StoreResult<Option<User>> {
        Ok(self
            .select_users("WHERE id = $1", Some(*id.as_uuid()))
            .await?
            .into_iter()
            .next())
    }

    #[instrument(skip(self), err)]
    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let row = sqlx::query("SELECT id FROM users WHERE email = $1")
            .bind(email)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_user_by_email", e))?;
        match row {
            Some(row) => {
                let id: Uuid = row
                    .try_get("id")
                    .map_err(|e| map_sqlx_error("find_user_by_email", e))?;
                self.find_user(UserId::from_uuid(id)).await
            }
            None => Ok(None),
        }
    }

    #[instrument(skip(self), err)]
    async fn list_users(&self) -> StoreResult<Vec<User>> {
        self.select_users("", None).await
    }

    #[instrument(skip(self), err)]
    async fn users_with_role(&self, role: RoleId) -> StoreResult<Vec<User>> {
        self.select_users(
            "WHERE id IN (SELECT user_id FROM user_roles WHERE role_id = $1)",
            Some(*role.as_uuid()),
        )
        .await
    }

    #[instrument(skip(self, user), fields(user_id = %user.id), err)]
    async fn insert_user(&self, user: &User) -> StoreResult<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("insert_user", e))?;
        sqlx::query(&format!(
            "INSERT INTO users ({USER_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)"
        ))
        .bind(user.id.as_uuid())
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(&user.phone_number)
        .bind(user.is_active)
        .bind(user.email_verified)
        .bind(user.mfa_enabled)
        .bind(user.failed_login_attempts as i32)
        .bind(user.locked_until)
        .bind(user.last_login_at)
        .bind(user.created_at)
        .bind(user.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("insert_user", e))?;

        let roles = uuids(user.roles.iter().copied(), |r| *r.as_uuid());
        sqlx::query("INSERT INTO user_roles (user_id, role_id) SELECT $1, unnest($2::uuid[])")
            .bind(user.id.as_uuid())
            .bind(&roles)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("insert_user", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("insert_user", e))
    }

    #[instrument(skip(self, user), fields(user_id = %user.id), err)]
    async fn update_user(&self, user: &User) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE users SET email = $2, password_hash = $3, first_name = $4, last_name = $5, \
             phone_number = $6, is_active = $7, email_verified = $8, mfa_enabled = $9, \
             updated_at = $10 WHERE id = $1",
        )
        .bind(user.id.as_uuid())
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(&user.phone_number)
        .bind(user.is_active)
        .bind(user.email_verified)
        .bind(user.mfa_enabled)
        .bind(user.updated_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("update_user", e))?;
        expect_row(result.rows_affected(), "user")
    }

    #[instrument(skip(self), err)]
    async fn add_user_role(&self, user: UserId, role: RoleId) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO user_roles (user_id, role_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(user.as_uuid())
        .bind(role.as_uuid())
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("add_user_role", e))?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn remove_user_role(&self, user: UserId, role: RoleId) -> StoreResult<()> {
        sqlx::query("DELETE FROM user_roles WHERE user_id = $1 AND role_id = $2")
            .bind(user.as_uuid())
            .bind(role.as_uuid())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("remove_user_role", e))?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn clear_lockout(&self, user: UserId, now: DateTime<Utc>) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE users SET failed_login_attempts = 0, account_locked_until = NULL, \
             updated_at = $2 WHERE id = $1",
        )
        .bind(user.as_uuid())
        .bind(now)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("clear_lockout", e))?;
        expect_row(result.rows_affected(), "user")
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Roles
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait]
impl RoleStore for PgAuthStore {
    #[instrument(skip(self), err)]
    async fn find_role(&self, id: RoleId) -> StoreResult<Option<Role>> {
        Ok(self
            .select_roles("WHERE id = $1", Some(Bound::Id(*id.as_uuid())))
            .await?
            .into_iter()
            .next())
    }

    #[instrument(skip(self), err)]
    async fn find_role_by_name(&self, name: &RoleName) -> StoreResult<Option<Role>> {
        Ok(self
            .select_roles("WHERE name = $1", Some(Bound::Text(name.as_str())))
            .await?
            .into_iter()
            .next())
    }

    #[instrument(skip(self), err)]
    async fn list_roles(&self) -> StoreResult<Vec<Role>> {
        self.select_roles("", None).await
    }

    #[instrument(skip(self, role), fields(role = %role.name), err)]
    async fn insert_role(&self, role: &Role) -> StoreResult<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("insert_role", e))?;
        sqlx::query(&format!(
            "INSERT INTO roles ({ROLE_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7)"
        ))
        .bind(role.id.as_uuid())
        .bind(role.name.as_str())
        .bind(&role.display_name)
        .bind(&role.description)
        .bind(role.is_system)
        .bind(role.created_at)
        .bind(role.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("insert_role", e))?;

        let permissions = uuids(role.permissions.iter().copied(), |p| *p.as_uuid());
        sqlx::query(
            "INSERT INTO role_permissions (role_id, permission_id) SELECT $1, unnest($2::uuid[])",
        )
        .bind(role.id.as_uuid())
        .bind(&permissions)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("insert_role", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("insert_role", e))
    }

    #[instrument(skip(self, role), fields(role_id = %role.id), err)]
    async fn update_role(&self, role: &Role) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE roles SET name = $2, display_name = $3, description = $4, updated_at = $5 \
             WHERE id = $1",
        )
        .bind(role.id.as_uuid())
        .bind(role.name.as_str())
        .bind(&role.display_name)
        .bind(&role.description)
        .bind(role.updated_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("update_role", e))?;
        expect_row(result.rows_affected(), "role")
    }

    #[instrument(skip(self, permissions), err)]
    async fn set_role_permissions(
        &self,
        role: RoleId,
        permissions: &BTreeSet<PermissionId>,
    ) -> StoreResult<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("set_role_permissions", e))?;
        let exists = sqlx::query("SELECT 1 FROM roles WHERE id = $1 FOR UPDATE")
            .bind(role.as_uuid())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("set_role_permissions", e))?;
        if exists.is_none() {
            return Err(StoreError::NotFound("role".into()));
        }
        sqlx::query("DELETE FROM role_permissions WHERE role_id = $1")
            .bind(role.as_uuid())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("set_role_permissions", e))?;
        let ids = uuids(permissions.iter().copied(), |p| *p.as_uuid());
        sqlx::query(
            "INSERT INTO role_permissions (role_id, permission_id) SELECT $1, unnest($2::uuid[])",
        )
        .bind(role.as_uuid())
        .bind(&ids)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("set_role_permissions", e))?;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("set_role_permissions", e))
    }

    #[instrument(skip(self), err)]
    async fn delete_role(&self, id: RoleId) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM roles WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete_role", e))?;
        expect_row(result.rows_affected(), "role")
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Permission catalogue
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait]
impl PermissionStore for PgAuthStore {
    #[instrument(skip(self), err)]
    async fn find_permission(&self, id: PermissionId) -> StoreResult<Option<Permission>> {
        let row = sqlx::query(&format!(
            "SELECT {PERMISSION_COLUMNS} FROM permissions WHERE id = $1"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_permission", e))?;
        row.as_ref()
            .map(permission_from_row)
            .transpose()
            .map_err(|e| map_sqlx_error("find_permission", e))
    }

    #[instrument(skip(self), err)]
    async fn find_permission_by_key(
        &self,
        resource: &str,
        action: PermissionAction,
    ) -> StoreResult<Option<Permission>> {
        let row = sqlx::query(&format!(
            "SELECT {PERMISSION_COLUMNS} FROM permissions WHERE resource = $1 AND action = $2"
        ))
        .bind(resource)
        .bind(action.as_str())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_permission_by_key", e))?;
        row.as_ref()
            .map(permission_from_row)
            .transpose()
            .map_err(|e| map_sqlx_error("find_permission_by_key", e))
    }

    #[instrument(skip(self), err)]
    async fn list_permissions(&self) -> StoreResult<Vec<Permission>> {
        let rows = sqlx::query(&format!(
            "SELECT {PERMISSION_COLUMNS} FROM permissions ORDER BY resource, action"
        ))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_permissions", e))?;
        rows.iter()
            .map(permission_from_row)
            .collect::<Result<_, _>>()
            .map_err(|e| map_sqlx_error("list_permissions", e))
    }

    #[instrument(skip(self, permission), fields(permission = %permission.name), err)]
    async fn insert_permission(&self, permission: &Permission) -> StoreResult<()> {
        sqlx::query(&format!(
            "INSERT INTO permissions ({PERMISSION_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7)"
        ))
        .bind(permission.id.as_uuid())
        .bind(&permission.name)
        .bind(&permission.display_name)
        .bind(&permission.description)
        .bind(&permission.resource)
        .bind(permission.action.as_str())
        .bind(permission.created_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_permission", e))?;
        Ok(())
    }

    #[instrument(skip(self, permission), fields(permission_id = %permission.id), err)]
    async fn update_permission(&self, permission: &Permission) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE permissions SET name = $2, display_name = $3, description = $4 WHERE id = $1",
        )
        .bind(permission.id.as_uuid())
        .bind(&permission.name)
        .bind(&permission.display_name)
        .bind(&permission.description)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("update_permission", e))?;
        expect_row(result.rows_affected(), "permission")
    }

    #[instrument(skip(self), err)]
    async fn delete_permission(&self, id: PermissionId) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM permissions WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete_permission", e))?;
        expect_row(result.rows_affected(), "permission")
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Menus
// ─────────────────────────────────────────────────────────────────────────────

async fn write_menu<'e>(
    executor: impl PgExecutor<'e>,
    menu: &Menu,
    insert: bool,
) -> Result<u64, sqlx::Error> {
    let sql = if insert {
        format!(
            "INSERT INTO menus ({MENU_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)"
        )
    } else {
        "UPDATE menus SET name = $2, display_name = $3, url = $4, icon = $5, menu_type = $6, \
         target_window = $7, sort_order = $8, parent_id = $9, level = $10, is_visible = $11, \
         is_active = $12, created_at = $13, updated_at = $14 WHERE id = $1"
            .to_string()
    };
    let result = sqlx::query(&sql)
        .bind(menu.id.as_uuid())
        .bind(&menu.name)
        .bind(&menu.display_name)
        .bind(&menu.url)
        .bind(&menu.icon)
        .bind(menu.menu_type.as_str())
        .bind(&menu.target_window)
        .bind(menu.sort_order)
        .bind(menu.parent_id.map(|p| *p.as_uuid()))
        .bind(menu.level as i32)
        .bind(menu.is_visible)
        .bind(menu.is_active)
        .bind(menu.created_at)
        .bind(menu.updated_at)
        .execute(executor)
        .await?;
    Ok(result.rows_affected())
}

#[async_trait]
impl MenuStore for PgAuthStore {
    #[instrument(skip(self), err)]
    async fn find_menu(&self, id: MenuId) -> StoreResult<Option<Menu>> {
        let row = sqlx::query(&format!("SELECT {MENU_COLUMNS} FROM menus WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_menu", e))?;
        row.as_ref()
            .map(menu_from_row)
            .transpose()
            .map_err(|e| map_sqlx_error("find_menu", e))
    }

    #[instrument(skip(self), err)]
    async fn list_menus(&self) -> StoreResult<Vec<Menu>> {
        let rows = sqlx::query(&format!(
            "SELECT {MENU_COLUMNS} FROM menus ORDER BY level, sort_order, id"
        ))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_menus", e))?;
        rows.iter()
            .map(menu_from_row)
            .collect::<Result<_, _>>()
            .map_err(|e| map_sqlx_error("list_menus", e))
    }

    #[instrument(skip(self, menu), fields(menu_id = %menu.id), err)]
    async fn insert_menu(&self, menu: &Menu) -> StoreResult<()> {
        write_menu(&*self.pool, menu, true)
            .await
            .map_err(|e| map_sqlx_error("insert_menu", e))?;
        Ok(())
    }

    #[instrument(skip(self, ids), fields(count = ids.len()), err)]
    async fn delete_menus(&self, ids: &[MenuId]) -> StoreResult<()> {
        let ids = uuids(ids.iter().copied(), |m| *m.as_uuid());
        sqlx::query("DELETE FROM menus WHERE id = ANY($1)")
            .bind(&ids)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete_menus", e))?;
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Menu grants and per-user records
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait]
impl MenuPermissionStore for PgAuthStore {
    #[instrument(skip(self), err)]
    async fn role_grants_for_role(&self, role: RoleId) -> StoreResult<Vec<RoleMenuGrant>> {
        let rows = sqlx::query(&format!(
            "SELECT role_id, menu_id, {FLAG_COLUMNS} FROM role_menu_permissions WHERE role_id = $1"
        ))
        .bind(role.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("role_grants_for_role", e))?;
        rows.iter()
            .map(grant_from_row)
            .collect::<Result<_, _>>()
            .map_err(|e| map_sqlx_error("role_grants_for_role", e))
    }

    #[instrument(skip(self), err)]
    async fn role_grants_for_menu(&self, menu: MenuId) -> StoreResult<Vec<RoleMenuGrant>> {
        let rows = sqlx::query(&format!(
            "SELECT role_id, menu_id, {FLAG_COLUMNS} FROM role_menu_permissions WHERE menu_id = $1"
        ))
        .bind(menu.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("role_grants_for_menu", e))?;
        rows.iter()
            .map(grant_from_row)
            .collect::<Result<_, _>>()
            .map_err(|e| map_sqlx_error("role_grants_for_menu", e))
    }

    #[instrument(skip(self, grant), fields(role_id = %grant.role_id, menu_id = %grant.menu_id), err)]
    async fn upsert_role_grant(&self, grant: &RoleMenuGrant) -> StoreResult<()> {
        let p = grant.permissions;
        sqlx::query(&format!(
            "INSERT INTO role_menu_permissions (role_id, menu_id, {FLAG_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             ON CONFLICT (role_id, menu_id) DO UPDATE SET can_view = EXCLUDED.can_view, \
             can_access = EXCLUDED.can_access, can_create = EXCLUDED.can_create, \
             can_update = EXCLUDED.can_update, can_delete = EXCLUDED.can_delete, \
             can_execute = EXCLUDED.can_execute"
        ))
        .bind(grant.role_id.as_uuid())
        .bind(grant.menu_id.as_uuid())
        .bind(p.can_view)
        .bind(p.can_access)
        .bind(p.can_create)
        .bind(p.can_update)
        .bind(p.can_delete)
        .bind(p.can_execute)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("upsert_role_grant", e))?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn delete_role_grant(&self, role: RoleId, menu: MenuId) -> StoreResult<bool> {
        let result =
            sqlx::query("DELETE FROM role_menu_permissions WHERE role_id = $1 AND menu_id = $2")
                .bind(role.as_uuid())
                .bind(menu.as_uuid())
                .execute(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("delete_role_grant", e))?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self), err)]
    async fn user_overrides(&self, user: UserId) -> StoreResult<Vec<UserMenuOverride>> {
        let rows = sqlx::query(&format!(
            "SELECT user_id, menu_id, {FLAG_COLUMNS}, is_override, is_favorite \
             FROM user_menu_permissions WHERE user_id = $1"
        ))
        .bind(user.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("user_overrides", e))?;
        rows.iter()
            .map(override_from_row)
            .collect::<Result<_, _>>()
            .map_err(|e| map_sqlx_error("user_overrides", e))
    }

    #[instrument(skip(self), err)]
    async fn find_user_override(
        &self,
        user: UserId,
        menu: MenuId,
    ) -> StoreResult<Option<UserMenuOverride>> {
        let row = sqlx::query(&format!(
            "SELECT user_id, menu_id, {FLAG_COLUMNS}, is_override, is_favorite \
             FROM user_menu_permissions WHERE user_id = $1 AND menu_id = $2"
        ))
        .bind(user.as_uuid())
        .bind(menu.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_user_override", e))?;
        row.as_ref()
            .map(override_from_row)
            .transpose()
            .map_err(|e| map_sqlx_error("find_user_override", e))
    }

    #[instrument(skip(self, record), fields(user_id = %record.user_id, menu_id = %record.menu_id), err)]
    async fn upsert_user_override(&self, record: &UserMenuOverride) -> StoreResult<()> {
        let f = record.flags;
        sqlx::query(&format!(
            "INSERT INTO user_menu_permissions \
             (user_id, menu_id, {FLAG_COLUMNS}, is_override, is_favorite) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
             ON CONFLICT (user_id, menu_id) DO UPDATE SET can_view = EXCLUDED.can_view, \
             can_access = EXCLUDED.can_access, can_create = EXCLUDED.can_create, \
             can_update = EXCLUDED.can_update, can_delete = EXCLUDED.can_delete, \
             can_execute = EXCLUDED.can_execute, is_override = EXCLUDED.is_override, \
             is_favorite = EXCLUDED.is_favorite"
        ))
        .bind(record.user_id.as_uuid())
        .bind(record.menu_id.as_uuid())
        .bind(f.can_view)
        .bind(f.can_access)
        .bind(f.can_create)
        .bind(f.can_update)
        .bind(f.can_delete)
        .bind(f.can_execute)
        .bind(record.is_override)
        .bind(record.is_favorite)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("upsert_user_override", e))?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn delete_user_override(&self, user: UserId, menu: MenuId) -> StoreResult<bool> {
        let result =
            sqlx::query("DELETE FROM user_menu_permissions WHERE user_id = $1 AND menu_id = $2")
                .bind(user.as_uuid())
                .bind(menu.as_uuid())
                .execute(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("delete_user_override", e))?;
        Ok(result.rows_affected() > 0)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Atomic compounds
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait]
impl AuthStore for PgAuthStore {
    #[instrument(skip(self, policy), err)]
    async fn record_login_failure(
        &self,
        user: UserId,
        now: DateTime<Utc>,
        policy: &LockoutPolicy,
    ) -> StoreResult<LockoutState> {
        // Right-hand sides see the pre-update row.
        let row = sqlx::query(
            r#"
            UPDATE users SET
                failed_login_attempts = CASE
                    WHEN account_locked_until IS NOT NULL AND account_locked_until <= $2 THEN 1
                    ELSE failed_login_attempts + 1
                END,
                account_locked_until = CASE
                    WHEN (CASE
                        WHEN account_locked_until IS NOT NULL AND account_locked_until <= $2 THEN 1
                        ELSE failed_login_attempts + 1
                    END) >= $3 THEN $4
                    WHEN account_locked_until IS NOT NULL AND account_locked_until <= $2 THEN NULL
                    ELSE account_locked_until
                END,
                updated_at = $2
            WHERE id = $1
            RETURNING failed_login_attempts, account_locked_until
            "#,
        )
        .bind(user.as_uuid())
        .bind(now)
        .bind(i32::try_from(policy.max_failed_attempts).unwrap_or(i32::MAX))
        .bind(now + policy.lock_duration)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("record_login_failure", e))?
        .ok_or_else(|| StoreError::NotFound("user".into()))?;

        let attempts: i32 = row
            .try_get("failed_login_attempts")
            .map_err(|e| map_sqlx_error("record_login_failure", e))?;
        let locked_until: Option<DateTime<Utc>> = row
            .try_get("account_locked_until")
            .map_err(|e| map_sqlx_error("record_login_failure", e))?;
        Ok(LockoutState {
            failed_attempts: non_negative(attempts),
            locked_until,
        })
    }

    #[instrument(skip(self), err)]
    async fn record_login_success(&self, user: UserId, now: DateTime<Utc>) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE users SET failed_login_attempts = 0, account_locked_until = NULL, \
             last_login_at = $2, updated_at = $2 WHERE id = $1",
        )
        .bind(user.as_uuid())
        .bind(now)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("record_login_success", e))?;
        expect_row(result.rows_affected(), "user")
    }

    #[instrument(skip(self, plan), err)]
    async fn rewrite_menu_tree(&self, plan: &MenuTreePlan<'_>) -> StoreResult<Vec<Menu>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("rewrite_menu_tree", e))?;
        // Conflicts with itself and with plain row writes; readers are not blocked.
        sqlx::query("LOCK TABLE menus IN SHARE ROW EXCLUSIVE MODE")
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("rewrite_menu_tree", e))?;

        let current = sqlx::query(&format!("SELECT {MENU_COLUMNS} FROM menus"))
            .fetch_all(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("rewrite_menu_tree", e))?
            .iter()
            .map(menu_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| map_sqlx_error("rewrite_menu_tree", e))?;

        let rows = plan(MenuTree::new(current))?;
        for menu in &rows {
            let affected = write_menu(&mut *tx, menu, false)
                .await
                .map_err(|e| map_sqlx_error("rewrite_menu_tree", e))?;
            expect_row(affected, &format!("menu {}", menu.id))?;
        }
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("rewrite_menu_tree", e))?;
        Ok(rows)
    }

    #[instrument(skip(self), err)]
    async fn load_snapshot(
        &self,
        user: UserId,
        scope: MenuScope,
    ) -> StoreResult<Option<ResolutionSnapshot>> {
        let op = "load_snapshot";
        let err = |e| map_sqlx_error(op, e);
        let uid = *user.as_uuid();

        let mut tx = self.pool.begin().await.map_err(err)?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ READ ONLY")
            .execute(&mut *tx)
            .await
            .map_err(err)?;

        let Some(user_row) = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
            .bind(uid)
            .fetch_optional(&mut *tx)
            .await
            .map_err(err)?
        else {
            tx.commit().await.map_err(err)?;
            return Ok(None);
        };
        let mut held = role_ids_by_user(&mut *tx, &[uid]).await.map_err(err)?;
        let user = user_from_row(&user_row, held.remove(&uid).unwrap_or_default()).map_err(err)?;
        let role_uuids = uuids(user.roles.iter().copied(), |r| *r.as_uuid());

        let role_rows = sqlx::query(&format!(
            "SELECT {ROLE_COLUMNS} FROM roles WHERE id = ANY($1) ORDER BY name"
        ))
        .bind(&role_uuids)
        .fetch_all(&mut *tx)
        .await
        .map_err(err)?;
        let mut role_permissions = permission_ids_by_role(&mut *tx, &role_uuids)
            .await
            .map_err(err)?;
        let roles = role_rows
            .iter()
            .map(|row| {
                let id: Uuid = row.try_get("id")?;
                role_from_row(row, role_permissions.remove(&id).unwrap_or_default())
            })
            .collect::<Result<Vec<_>, _>>()
            .map_err(err)?;

        let permission_rows = sqlx::query(&format!(
            "SELECT {PERMISSION_COLUMNS} FROM permissions WHERE id IN \
             (SELECT permission_id FROM role_permissions WHERE role_id = ANY($1)) \
             ORDER BY resource, action"
        ))
        .bind(&role_uuids)
        .fetch_all(&mut *tx)
        .await
        .map_err(err)?;
        let permissions = permission_rows
            .iter()
            .map(permission_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(err)?;

        let menu_rows = match scope {
            MenuScope::None => Vec::new(),
            MenuScope::One(id) => {
                sqlx::query(&format!("SELECT {MENU_COLUMNS} FROM menus WHERE id = $1"))
                    .bind(id.as_uuid())
                    .fetch_all(&mut *tx)
                    .await
                    .map_err(err)?
            }
            MenuScope::All => sqlx::query(&format!("SELECT {MENU_COLUMNS} FROM menus"))
                .fetch_all(&mut *tx)
                .await
                .map_err(err)?,
        };
        let menus = menu_rows
            .iter()
            .map(menu_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(err)?;
        let menu_uuids = uuids(menus.iter().map(|m| m.id), |m| *m.as_uuid());

        let grant_rows = sqlx::query(&format!(
            "SELECT role_id, menu_id, {FLAG_COLUMNS} FROM role_menu_permissions \
             WHERE role_id = ANY($1) AND menu_id = ANY($2)"
        ))
        .bind(&role_uuids)
        .bind(&menu_uuids)
        .fetch_all(&mut *tx)
        .await
        .map_err(err)?;
        let role_grants = grant_rows
            .iter()
            .map(grant_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(err)?;

        let override_rows = sqlx::query(&format!(
            "SELECT user_id, menu_id, {FLAG_COLUMNS}, is_override, is_favorite \
             FROM user_menu_permissions WHERE user_id = $1 AND menu_id = ANY($2)"
        ))
        .bind(uid)
        .bind(&menu_uuids)
        .fetch_all(&mut *tx)
        .await
        .map_err(err)?;
        let user_overrides = override_rows
            .iter()
            .map(override_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(err)?;

        let known_resources = sqlx::query("SELECT DISTINCT resource FROM permissions")
            .fetch_all(&mut *tx)
            .await
            .map_err(err)?
            .iter()
            .map(|row| row.try_get::<String, _>("resource"))
            .collect::<Result<BTreeSet<_>, _>>()
            .map_err(err)?;

        tx.commit().await.map_err(err)?;

        Ok(Some(ResolutionSnapshot {
            user,
            roles,
            permissions,
            menus,
            role_grants,
            user_overrides,
            known_resources,
        }))
    }
}

/// Map SQLx errors to `StoreError`.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => StoreError::Duplicate(
                    db_err
                        .constraint()
                        .map(str::to_string)
                        .unwrap_or_else(|| operation.to_string()),
                ),
                Some("23503") => StoreError::NotFound(format!("referenced row in {operation}")),
                _ => StoreError::Backend(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            StoreError::Backend(format!("connection pool closed in {}", operation))
        }
        _ => StoreError::Backend(format!("sqlx error in {}: {}", operation, err)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_closed_maps_to_backend() {
        assert!(matches!(
            map_sqlx_error("op", sqlx::Error::PoolClosed),
            StoreError::Backend(_)
        ));
    }

    #[test]
    fn row_not_found_maps_to_backend() {
        let err = map_sqlx_error("find_user", sqlx::Error::RowNotFound);
        assert!(err.to_string().contains("find_user"));
    }

    #[test]
    fn schema_declares_every_table() {
        for table in [
            "users",
            "roles",
            "permissions",
            "role_permissions",
            "user_roles",
            "menus",
            "role_menu_permissions",
            "user_menu_permissions",
        ] {
            assert!(
                SCHEMA.contains(&format!("CREATE TABLE IF NOT EXISTS {table} (")),
                "missing {table}"
            );
        }
    }

    /// Runs only against a live database.
    async fn live_store() -> Option<PgAuthStore> {
        let url = std::env::var("DATABASE_URL").ok()?;
        Some(PgAuthStore::connect(&url, 2).await.unwrap())
    }

    #[tokio::test]
    async fn live_failure_counting_and_duplicates() {
        let Some(store) = live_store().await else {
            return;
        };
        let now = Utc::now();
        let tag = Uuid::now_v7().simple().to_string();

        let role = Role::new(RoleName::parse(&format!("t{tag}")).unwrap(), None, now);
        store.insert_role(&role).await.unwrap();
        let mut user = User::new(format!("{tag}@example.com"), "h".into(), now);
        user.roles.insert(role.id);
        store.insert_user(&user).await.unwrap();

        let again = User::new(user.email.clone(), "h".into(), now);
        assert!(matches!(
            store.insert_user(&again).await,
            Err(StoreError::Duplicate(_))
        ));

        let policy = LockoutPolicy {
            max_failed_attempts: 2,
            lock_duration: chrono::Duration::minutes(5),
        };
        let first = store.record_login_failure(user.id, now, &policy).await.unwrap();
        assert_eq!(first.failed_attempts, 1);
        assert!(first.locked_until.is_none());
        let second = store.record_login_failure(user.id, now, &policy).await.unwrap();
        assert_eq!(second.failed_attempts, 2);
        assert!(second.locked_until.is_some());

        store.record_login_success(user.id, now).await.unwrap();
        let found = store.find_user_by_email(&user.email).await.unwrap().unwrap();
        assert_eq!(found.failed_login_attempts, 0);
        assert!(found.roles.contains(&role.id));

        store.delete_role(role.id).await.unwrap();
    }
}
