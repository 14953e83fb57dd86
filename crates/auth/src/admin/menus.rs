use std::sync::Arc;

use tracing::info;

use backoffice_core::{Clock, DomainError, DomainResult, MenuId, RoleId, UserId};

use crate::error::{AuthError, AuthResult};
use crate::menu::{Menu, MenuDraft, MenuNode, MenuTree};
use crate::menu_permission::{FlagOverrides, MenuPermissions, RoleMenuGrant, UserMenuOverride};
use crate::store::AuthStore;

#[derive(Clone)]
pub struct MenuAdmin {
    store: Arc<dyn AuthStore>,
    clock: Arc<dyn Clock>,
}

impl MenuAdmin {
    pub fn new(store: Arc<dyn AuthStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    async fn tree(&self) -> AuthResult<MenuTree> {
        Ok(MenuTree::new(self.store.list_menus().await?))
    }

    async fn load(&self, id: MenuId) -> AuthResult<Menu> {
        self.store
            .find_menu(id)
            .await?
            .ok_or_else(|| AuthError::not_found("menu"))
    }

    async fn ensure_role(&self, id: RoleId) -> AuthResult<()> {
        self.store
            .find_role(id)
            .await?
            .map(|_| ())
            .ok_or_else(|| AuthError::not_found("role"))
    }

    async fn ensure_user(&self, id: UserId) -> AuthResult<()> {
        self.store
            .find_user(id)
            .await?
            .map(|_| ())
            .ok_or_else(|| AuthError::not_found("user"))
    }

    pub async fn list(&self) -> AuthResult<Vec<Menu>> {
        let mut menus = self.store.list_menus().await?;
        menus.sort_by_key(|m| (m.level, m.sort_order, m.id));
        Ok(menus)
    }

    pub async fn get(&self, id: MenuId) -> AuthResult<Menu> {
        self.load(id).await
    }

    /// Active and visible menus as a forest ordered by `(sort_order, id)`.
    pub async fn live_tree(&self) -> AuthResult<Vec<MenuNode>> {
        Ok(self.tree().await?.render(Menu::is_live))
    }

    pub async fn create(&self, draft: MenuDraft) -> AuthResult<Menu> {
        draft.validate()?;
        let tree = self.tree().await?;
        let level = tree.level_under(draft.parent_id)?;
        let now = self.clock.now();

        let menu = Menu {
            id: MenuId::new(),
            name: draft.name.trim().to_string(),
            display_name: draft.display_name,
            url: draft.url,
            icon: draft.icon,
            menu_type: draft.menu_type,
            target_window: draft.target_window,
            sort_order: draft.sort_order,
            parent_id: draft.parent_id,
            level,
            is_visible: draft.is_visible,
            is_active: draft.is_active,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_menu(&menu).await?;
        info!(menu_id = %menu.id, name = %menu.name, "menu created");
        Ok(menu)
    }

    /// Update fields; a parent change is validated for cycles and
    /// re-levels the whole subtree in one write.
    ///
    /// The checks run inside the store's tree rewrite, against the rows as
    /// they are at write time.
    pub async fn update(&self, id: MenuId, draft: MenuDraft) -> AuthResult<Menu> {
        draft.validate()?;
        let now = self.clock.now();

        let plan = |mut tree: MenuTree| -> DomainResult<Vec<Menu>> {
            let current = tree.get(id).ok_or_else(|| DomainError::not_found("menu"))?;
            let mut changed = if current.parent_id != draft.parent_id {
                tree.reparent(id, draft.parent_id)?
            } else {
                vec![id]
            };
            if !changed.contains(&id) {
                changed.push(id);
            }

            let mut rows: Vec<Menu> = changed.iter().filter_map(|c| tree.get(*c).cloned()).collect();
            for row in rows.iter_mut() {
                row.updated_at = now;
                if row.id == id {
                    row.name = draft.name.trim().to_string();
                    row.display_name = draft.display_name.clone();
                    row.url = draft.url.clone();
                    row.icon = draft.icon.clone();
                    row.menu_type = draft.menu_type;
                    row.target_window = draft.target_window.clone();
                    row.sort_order = draft.sort_order;
                    row.is_visible = draft.is_visible;
                    row.is_active = draft.is_active;
                }
            }
            Ok(rows)
        };

        let rows = self.store.rewrite_menu_tree(&plan).await?;
        info!(menu_id = %id, rewritten = rows.len(), "menu updated");
        rows.into_iter()
            .find(|m| m.id == id)
            .ok_or_else(|| AuthError::not_found("menu"))
    }

    /// Deletes the menu and its entire subtree.
    pub async fn delete(&self, id: MenuId) -> AuthResult<usize> {
        let tree = self.tree().await?;
        if tree.get(id).is_none() {
            return Err(AuthError::not_found("menu"));
        }
        let doomed = tree.subtree(id);
        self.store.delete_menus(&doomed).await?;
        info!(menu_id = %id, removed = doomed.len(), "menu subtree deleted");
        Ok(doomed.len())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Role grants
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn grants_for_menu(&self, menu: MenuId) -> AuthResult<Vec<RoleMenuGrant>> {
        self.load(menu).await?;
        Ok(self.store.role_grants_for_menu(menu).await?)
    }

    pub async fn grant_role(&self, menu: MenuId, role: RoleId, permissions: MenuPermissions) -> AuthResult<RoleMenuGrant> {
        self.load(menu).await?;
        self.ensure_role(role).await?;
        let grant = RoleMenuGrant {
            role_id: role,
            menu_id: menu,
            permissions,
        };
        self.store.upsert_role_grant(&grant).await?;
        Ok(grant)
    }

    pub async fn revoke_role(&self, menu: MenuId, role: RoleId) -> AuthResult<()> {
        if self.store.delete_role_grant(role, menu).await? {
            Ok(())
        } else {
            Err(AuthError::not_found("role menu grant"))
        }
    }

    /// Copy every menu grant of `from` onto `to`, replacing `to`'s grants
    /// on the same menus. Returns the number of grants written.
    pub async fn copy_role_grants(&self, from: RoleId, to: RoleId) -> AuthResult<usize> {
        self.ensure_role(from).await?;
        self.ensure_role(to).await?;
        if from == to {
            return Err(AuthError::validation("source and target role are the same"));
        }

        let grants = self.store.role_grants_for_role(from).await?;
        for grant in &grants {
            self.store
                .upsert_role_grant(&RoleMenuGrant {
                    role_id: to,
                    ..grant.clone()
                })
                .await?;
        }
        Ok(grants.len())
    }

    /// Copy every role grant on menu `source` onto menu `target`. A role that
    /// already has a grant on `target` gets the source flags; other grants on
    /// `target` are kept. Returns the number of grants written.
    pub async fn copy_menu_grants(&self, source: MenuId, target: MenuId) -> AuthResult<usize> {
        self.load(source).await?;
        self.load(target).await?;
        if source == target {
            return Err(AuthError::validation("source and target menu are the same"));
        }

        let grants = self.store.role_grants_for_menu(source).await?;
        for grant in &grants {
            self.store
                .upsert_role_grant(&RoleMenuGrant {
                    menu_id: target,
                    ..grant.clone()
                })
                .await?;
        }
        info!(%source, %target, copied = grants.len(), "menu grants copied");
        Ok(grants.len())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // User overrides and favourites
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn set_user_override(&self, menu: MenuId, user: UserId, flags: FlagOverrides) -> AuthResult<UserMenuOverride> {
        self.load(menu).await?;
        self.ensure_user(user).await?;

        let is_favorite = self
            .store
            .find_user_override(user, menu)
            .await?
            .is_some_and(|r| r.is_favorite);
        let record = UserMenuOverride {
            user_id: user,
            menu_id: menu,
            flags,
            is_override: true,
            is_favorite,
        };
        self.store.upsert_user_override(&record).await?;
        Ok(record)
    }

    /// Drop the override; a favourite bookmark on the same row survives.
    pub async fn clear_user_override(&self, menu: MenuId, user: UserId) -> AuthResult<()> {
        let record = self
            .store
            .find_user_override(user, menu)
            .await?
            .filter(|r| r.is_override)
            .ok_or_else(|| AuthError::not_found("user menu override"))?;

        if record.is_favorite {
            self.store
                .upsert_user_override(&UserMenuOverride::favorite_only(user, menu))
                .await?;
        } else {
            self.store.delete_user_override(user, menu).await?;
        }
        Ok(())
    }

    /// Flip the favourite flag; returns the new value.
    pub async fn toggle_favorite(&self, user: UserId, menu: MenuId) -> AuthResult<bool> {
        self.load(menu).await?;
        self.ensure_user(user).await?;

        match self.store.find_user_override(user, menu).await? {
            Some(mut record) => {
                record.is_favorite = !record.is_favorite;
                if !record.is_favorite && !record.is_override {
                    self.store.delete_user_override(user, menu).await?;
                } else {
                    self.store.upsert_user_override(&record).await?;
                }
                Ok(record.is_favorite)
            }
            None => {
                self.store
                    .upsert_user_override(&UserMenuOverride::favorite_only(user, menu))
                    .await?;
                Ok(true)
            }
        }
    }

    pub async fn favorites(&self, user: UserId) -> AuthResult<Vec<Menu>> {
        self.ensure_user(user).await?;
        let favorite_ids: Vec<MenuId> = self
            .store
            .user_overrides(user)
            .await?
            .into_iter()
            .filter(|r| r.is_favorite)
            .map(|r| r.menu_id)
            .collect();

        let mut menus: Vec<Menu> = self
            .store
            .list_menus()
            .await?
            .into_iter()
            .filter(|m| favorite_ids.contains(&m.id))
            .collect();
        menus.sort_by_key(|m| (m.sort_order, m.id));
        Ok(menus)
    }

    pub async fn user_overrides(&self, user: UserId) -> AuthResult<Vec<UserMenuOverride>> {
        self.ensure_user(user).await?;
        Ok(self.store.user_overrides(user).await?)
    }
}
