//! Menu tree.
//!
//! Menus are stored flat with a parent reference; [`MenuTree`] is an arena
//! over one set of nodes that answers structural questions (levels, subtrees,
//! ordering) and refuses parent reassignments that would create a cycle.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use backoffice_core::{DomainError, DomainResult, Entity, MenuId};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MenuType {
    Internal,
    External,
    Divider,
    Group,
    Public,
    Admin,
}

impl MenuType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Internal => "INTERNAL",
            Self::External => "EXTERNAL",
            Self::Divider => "DIVIDER",
            Self::Group => "GROUP",
            Self::Public => "PUBLIC",
            Self::Admin => "ADMIN",
        }
    }
}

impl core::str::FromStr for MenuType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "INTERNAL" => Ok(Self::Internal),
            "EXTERNAL" => Ok(Self::External),
            "DIVIDER" => Ok(Self::Divider),
            "GROUP" => Ok(Self::Group),
            "PUBLIC" => Ok(Self::Public),
            "ADMIN" => Ok(Self::Admin),
            other => Err(DomainError::validation(format!("unknown menu type '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Menu {
    pub id: MenuId,
    pub name: String,
    pub display_name: Option<String>,
    pub url: Option<String>,
    pub icon: Option<String>,
    pub menu_type: MenuType,
    pub target_window: Option<String>,
    pub sort_order: i32,
    pub parent_id: Option<MenuId>,
    /// Root = 0; always parent level + 1.
    pub level: u32,
    pub is_visible: bool,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Entity for Menu {
    type Id = MenuId;

    fn id(&self) -> &MenuId {
        &self.id
    }
}

impl Menu {
    /// Active and visible: the only nodes that can grant anything.
    pub fn is_live(&self) -> bool {
        self.is_active && self.is_visible
    }

    pub fn matches_url(&self, url: &str) -> bool {
        match &self.url {
            Some(own) => normalize_url(own) == normalize_url(url),
            None => false,
        }
    }
}

fn normalize_url(url: &str) -> &str {
    let trimmed = url.trim();
    if trimmed.len() > 1 {
        trimmed.trim_end_matches('/')
    } else {
        trimmed
    }
}

/// Menu create/update input.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MenuDraft {
    pub name: String,
    pub display_name: Option<String>,
    pub url: Option<String>,
    pub icon: Option<String>,
    pub menu_type: MenuType,
    pub target_window: Option<String>,
    #[serde(default)]
    pub sort_order: i32,
    pub parent_id: Option<MenuId>,
    #[serde(default = "default_true")]
    pub is_visible: bool,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_true() -> bool {
    true
}

impl MenuDraft {
    pub fn validate(&self) -> DomainResult<()> {
        if self.name.trim().is_empty() {
            return Err(DomainError::validation("menu name cannot be empty"));
        }
        if self.menu_type == MenuType::External
            && !self
                .url
                .as_deref()
                .is_some_and(|u| u.starts_with("http://") || u.starts_with("https://"))
        {
            return Err(DomainError::validation("external menus need an absolute http(s) url"));
        }
        Ok(())
    }
}

/// A menu with its (filtered) children, for tree rendering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MenuNode {
    #[serde(flatten)]
    pub menu: Menu,
    pub children: Vec<MenuNode>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Arena
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct MenuTree {
    nodes: BTreeMap<MenuId, Menu>,
}

impl MenuTree {
    pub fn new(menus: impl IntoIterator<Item = Menu>) -> Self {
        Self {
            nodes: menus.into_iter().map(|m| (m.id, m)).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, id: MenuId) -> Option<&Menu> {
        self.nodes.get(&id)
    }

    pub fn menus(&self) -> impl Iterator<Item = &Menu> {
        self.nodes.values()
    }

    pub fn into_menus(self) -> Vec<Menu> {
        self.nodes.into_values().collect()
    }

    /// Level a node gets under `parent` (root when `None`).
    pub fn level_under(&self, parent: Option<MenuId>) -> DomainResult<u32> {
        match parent {
            None => Ok(0),
            Some(p) => self
                .get(p)
                .map(|m| m.level + 1)
                .ok_or_else(|| DomainError::not_found("parent menu")),
        }
    }

    /// Check that making `new_parent` the parent of `node` keeps the tree acyclic.
    ///
    /// Walks from `new_parent` to the root with a visited set; the walk is
    /// bounded by the node count so corrupt data cannot loop forever.
    pub fn ensure_acyclic(&self, node: MenuId, new_parent: Option<MenuId>) -> DomainResult<()> {
        let Some(start) = new_parent else {
            return Ok(());
        };
        if !self.nodes.contains_key(&start) {
            return Err(DomainError::not_found("parent menu"));
        }

        let mut visited = HashSet::new();
        let mut cursor = Some(start);
        while let Some(current) = cursor {
            if current == node {
                return Err(DomainError::cycle(format!(
                    "menu {node} cannot be placed under its own descendant {start}"
                )));
            }
            if !visited.insert(current) || visited.len() > self.nodes.len() {
                return Err(DomainError::cycle(format!(
                    "ancestor chain of menu {start} already loops"
                )));
            }
            cursor = self.nodes.get(&current).and_then(|m| m.parent_id);
        }
        Ok(())
    }

    /// `root` followed by all its descendants, breadth-first.
    pub fn subtree(&self, root: MenuId) -> Vec<MenuId> {
        let mut out = Vec::new();
        if !self.nodes.contains_key(&root) {
            return out;
        }
        let mut seen = HashSet::from([root]);
        out.push(root);
        let mut i = 0;
        while i < out.len() {
            let parent = out[i];
            for child in self.children_of(Some(parent)) {
                if seen.insert(child.id) {
                    out.push(child.id);
                }
            }
            i += 1;
        }
        out
    }

    /// Direct children ordered by `(sort_order, id)`.
    pub fn children_of(&self, parent: Option<MenuId>) -> Vec<&Menu> {
        let mut children: Vec<&Menu> = self
            .nodes
            .values()
            .filter(|m| m.parent_id == parent)
            .collect();
        children.sort_by_key(|m| (m.sort_order, m.id));
        children
    }

    /// Move `node` under `new_parent` and recompute levels for its subtree.
    ///
    /// Returns the ids whose stored row changed.
    pub fn reparent(&mut self, node: MenuId, new_parent: Option<MenuId>) -> DomainResult<Vec<MenuId>> {
        if !self.nodes.contains_key(&node) {
            return Err(DomainError::not_found("menu"));
        }
        self.ensure_acyclic(node, new_parent)?;
        let level = self.level_under(new_parent)?;

        if let Some(menu) = self.nodes.get_mut(&node) {
            menu.parent_id = new_parent;
            menu.level = level;
        }
        let changed = self.subtree(node);
        self.relevel(&changed);
        Ok(changed)
    }

    /// Recompute levels of `ids` (must be listed parents-before-children).
    fn relevel(&mut self, ids: &[MenuId]) {
        for id in ids {
            let parent = self.nodes.get(id).and_then(|m| m.parent_id);
            let level = parent
                .and_then(|p| self.nodes.get(&p))
                .map_or(0, |p| p.level + 1);
            if let Some(menu) = self.nodes.get_mut(id) {
                menu.level = level;
            }
        }
    }

    /// Render the forest, keeping only nodes for which `keep` holds.
    ///
    /// A dropped node hides its whole subtree.
    pub fn render<F>(&self, keep: F) -> Vec<MenuNode>
    where
        F: Fn(&Menu) -> bool,
    {
        let mut seen = HashSet::new();
        self.render_level(None, &keep, &mut seen)
    }

    fn render_level<F>(&self, parent: Option<MenuId>, keep: &F, seen: &mut HashSet<MenuId>) -> Vec<MenuNode>
    where
        F: Fn(&Menu) -> bool,
    {
        let mut out = Vec::new();
        for child in self.children_of(parent) {
            if !keep(child) || !seen.insert(child.id) {
                continue;
            }
            out.push(MenuNode {
                menu: child.clone(),
                children: self.render_level(Some(child.id), keep, seen),
            });
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn menu(name: &str, parent: Option<&Menu>, sort_order: i32) -> Menu {
        let now = Utc::now();
        Menu {
            id: MenuId::new(),
            name: name.into(),
            display_name: None,
            url: Some(format!("/{name}")),
            icon: None,
            menu_type: MenuType::Internal,
            target_window: None,
            sort_order,
            parent_id: parent.map(|p| p.id),
            level: parent.map_or(0, |p| p.level + 1),
            is_visible: true,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn reparent_under_descendant_is_a_cycle() {
        let root = menu("root", None, 0);
        let child = menu("child", Some(&root), 0);
        let grandchild = menu("grandchild", Some(&child), 0);
        let mut tree = MenuTree::new([root.clone(), child.clone(), grandchild.clone()]);

        let err = tree.reparent(root.id, Some(grandchild.id)).unwrap_err();
        assert!(matches!(err, DomainError::CyclicHierarchy(_)));
        assert_eq!(tree.get(root.id).unwrap().parent_id, None);
    }

    #[test]
    fn self_parent_is_a_cycle() {
        let root = menu("root", None, 0);
        let tree = MenuTree::new([root.clone()]);
        assert!(matches!(
            tree.ensure_acyclic(root.id, Some(root.id)),
            Err(DomainError::CyclicHierarchy(_))
        ));
    }

    #[test]
    fn corrupt_loop_in_existing_data_is_detected() {
        let mut a = menu("a", None, 0);
        let mut b = menu("b", None, 0);
        a.parent_id = Some(b.id);
        b.parent_id = Some(a.id);
        let c = menu("c", None, 0);
        let tree = MenuTree::new([a.clone(), b, c.clone()]);

        assert!(matches!(
            tree.ensure_acyclic(c.id, Some(a.id)),
            Err(DomainError::CyclicHierarchy(_))
        ));
    }

    #[test]
    fn missing_parent_is_not_found() {
        let root = menu("root", None, 0);
        let tree = MenuTree::new([root.clone()]);
        assert!(matches!(
            tree.ensure_acyclic(root.id, Some(MenuId::new())),
            Err(DomainError::NotFound(_))
        ));
    }

    #[test]
    fn reparent_recomputes_subtree_levels() {
        let a = menu("a", None, 0);
        let b = menu("b", None, 1);
        let b1 = menu("b1", Some(&b), 0);
        let b11 = menu("b11", Some(&b1), 0);
        let mut tree = MenuTree::new([a.clone(), b.clone(), b1.clone(), b11.clone()]);

        let changed = tree.reparent(b.id, Some(a.id)).unwrap();
        assert_eq!(changed, vec![b.id, b1.id, b11.id]);
        assert_eq!(tree.get(b.id).unwrap().level, 1);
        assert_eq!(tree.get(b1.id).unwrap().level, 2);
        assert_eq!(tree.get(b11.id).unwrap().level, 3);

        tree.reparent(b.id, None).unwrap();
        assert_eq!(tree.get(b11.id).unwrap().level, 2);
    }

    #[test]
    fn children_sorted_by_sort_order_then_id() {
        let root = menu("root", None, 0);
        let second = menu("second", Some(&root), 2);
        let first = menu("first", Some(&root), 1);
        let tie = menu("tie", Some(&root), 1);
        let tree = MenuTree::new([root.clone(), second.clone(), first.clone(), tie.clone()]);

        let order: Vec<_> = tree.children_of(Some(root.id)).iter().map(|m| m.id).collect();
        assert_eq!(order, vec![first.id, tie.id, second.id]);
    }

    #[test]
    fn render_prunes_hidden_subtrees() {
        let root = menu("root", None, 0);
        let mut hidden = menu("hidden", Some(&root), 0);
        hidden.is_visible = false;
        let under_hidden = menu("under", Some(&hidden), 0);
        let shown = menu("shown", Some(&root), 1);
        let tree = MenuTree::new([root.clone(), hidden, under_hidden, shown.clone()]);

        let forest = tree.render(Menu::is_live);
        assert_eq!(forest.len(), 1);
        assert_eq!(forest[0].children.len(), 1);
        assert_eq!(forest[0].children[0].menu.id, shown.id);
    }

    #[test]
    fn url_match_ignores_trailing_slash() {
        let m = menu("users", None, 0);
        assert!(m.matches_url("/users/"));
        assert!(!m.matches_url("/users/1"));
    }

    #[test]
    fn external_menu_requires_absolute_url() {
        let draft = MenuDraft {
            name: "docs".into(),
            display_name: None,
            url: Some("/docs".into()),
            icon: None,
            menu_type: MenuType::External,
            target_window: Some("_blank".into()),
            sort_order: 0,
            parent_id: None,
            is_visible: true,
            is_active: true,
        };
        assert!(draft.validate().is_err());
    }
}
