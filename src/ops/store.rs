use std::collections::{HashMap, HashSet, VecDeque};

use chrono::{DateTime, SubsecRound, Utc};
use indexmap::{IndexMap, IndexSet};

use crate::model::node::{NewNode, Node, NodeMode, NodePatch, NodeStatus, Priority, normalize_tags};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("node not found: {0}")]
    NotFound(String),
    #[error("node {0} already exists")]
    Duplicate(String),
    #[error("invalid node: {0}")]
    Invalid(String),
    #[error("cannot move {id} under {parent}: it would create a cycle")]
    Cycle { id: String, parent: String },
}

/// How a delete treats the node's subtree
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DeleteMode {
    /// Delete the node and every descendant
    #[default]
    Recursive,
    /// Delete only the node; its children move to its parent
    Reparent,
}

/// What a delete removed and which surviving nodes changed parent
#[derive(Debug, Clone, Default)]
pub struct DeleteOutcome {
    /// Removed records, deepest first
    pub removed: Vec<Node>,
    pub reparented: Vec<String>,
}

/// Which part of the tree a listing covers
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ParentScope {
    #[default]
    All,
    Roots,
    Children(String),
}

#[derive(Debug, Clone, Default)]
pub struct NodeFilter {
    pub mode: Option<NodeMode>,
    pub status: Option<NodeStatus>,
    pub priority: Option<u8>,
    pub has_due_date: Option<bool>,
    /// Matches nodes carrying any of these tags
    pub tags: Vec<String>,
    pub parent: ParentScope,
}

/// In-memory index of node records. The parent tree is held as plain
/// `parent_id` references plus a reverse child index keyed by parent id,
/// including ids that are not (yet) indexed.
#[derive(Debug, Default, Clone)]
pub struct NodeStore {
    nodes: IndexMap<String, Node>,
    children: HashMap<String, IndexSet<String>>,
}

impl NodeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn require(&self, id: &str) -> Result<&Node, StoreError> {
        self.nodes
            .get(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn ids(&self) -> impl Iterator<Item = &String> {
        self.nodes.keys()
    }

    // -----------------------------------------------------------------------
    // CRUD
    // -----------------------------------------------------------------------

    /// Create a node with a fresh id and timestamps.
    pub fn create(&mut self, fields: NewNode, now: DateTime<Utc>) -> Result<Node, StoreError> {
        let title = validate_title(&fields.title)?;
        let priority = validate_priority(fields.priority)?;
        if let Some(ref parent) = fields.parent_id {
            self.require(parent)?;
        }
        let tags = match fields.parent_id {
            Some(ref parent) => self.with_parent_tags(&fields.tags, parent),
            None => fields.tags.clone(),
        };
        let now = now.trunc_subsecs(0);
        let node = Node {
            id: uuid::Uuid::new_v4().to_string(),
            title,
            mode: fields.mode,
            status: fields.status,
            priority,
            due_date: fields.due_date.map(|d| d.trunc_subsecs(0)),
            parent_id: fields.parent_id,
            tags: normalize_tags(&tags),
            content: fields.content,
            created_at: now,
            updated_at: now,
        };
        self.insert(node.clone())?;
        Ok(node)
    }

    /// Index a complete record as-is. The parent may be absent from the store.
    pub fn insert(&mut self, node: Node) -> Result<(), StoreError> {
        if self.nodes.contains_key(&node.id) {
            return Err(StoreError::Duplicate(node.id));
        }
        if let Some(ref parent) = node.parent_id {
            self.children
                .entry(parent.clone())
                .or_default()
                .insert(node.id.clone());
        }
        self.nodes.insert(node.id.clone(), node);
        Ok(())
    }

    /// Swap in a new version of an existing record, keeping the child index
    /// consistent. Returns the previous version.
    pub fn replace(&mut self, node: Node) -> Result<Node, StoreError> {
        let old = self
            .nodes
            .get_mut(&node.id)
            .ok_or_else(|| StoreError::NotFound(node.id.clone()))?;
        let previous = std::mem::replace(old, node);
        let current = &self.nodes[&previous.id];
        if previous.parent_id != current.parent_id {
            let id = previous.id.clone();
            let new_parent = current.parent_id.clone();
            self.unlink_child(previous.parent_id.as_deref(), &id);
            if let Some(parent) = new_parent {
                self.children.entry(parent).or_default().insert(id);
            }
        }
        Ok(previous)
    }

    /// Apply a validated patch and bump `updated_at`.
    pub fn update(&mut self, id: &str, patch: &NodePatch, now: DateTime<Utc>) -> Result<Node, StoreError> {
        let mut node = self.require(id)?.clone();
        if let Some(ref title) = patch.title {
            node.title = validate_title(title)?;
        }
        if let Some(priority) = patch.priority {
            node.priority = validate_priority(priority)?;
        }
        if let Some(ref parent) = patch.parent_id {
            self.check_move(id, parent.as_deref())?;
            node.parent_id = parent.clone();
        }
        if let Some(ref content) = patch.content {
            node.content = content.clone();
        }
        if let Some(mode) = patch.mode {
            node.mode = mode;
        }
        if let Some(status) = patch.status {
            node.status = status;
        }
        if let Some(due) = patch.due_date {
            node.due_date = due.map(|d| d.trunc_subsecs(0));
        }
        if let Some(ref tags) = patch.tags {
            node.tags = normalize_tags(tags);
        }
        if (patch.tags.is_some() || patch.parent_id.is_some())
            && let Some(ref parent) = node.parent_id
        {
            node.tags = normalize_tags(&self.with_parent_tags(&node.tags, parent));
        }
        node.updated_at = bump(node.updated_at, now);
        self.replace(node.clone())?;
        Ok(node)
    }

    /// Remove a node, either with its whole subtree or handing its children
    /// to its own parent.
    pub fn delete(&mut self, id: &str, mode: DeleteMode, now: DateTime<Utc>) -> Result<DeleteOutcome, StoreError> {
        let node = self.require(id)?;
        let parent = node.parent_id.clone();
        let mut outcome = DeleteOutcome::default();

        match mode {
            DeleteMode::Recursive => {
                let mut doomed = self.descendants(id);
                doomed.reverse();
                doomed.push(id.to_string());
                for victim in doomed {
                    if let Some(node) = self.remove(&victim) {
                        outcome.removed.push(node);
                    }
                }
            }
            DeleteMode::Reparent => {
                for child in self.child_ids(id) {
                    let mut node = self.nodes[&child].clone();
                    node.parent_id = parent.clone();
                    node.updated_at = bump(node.updated_at, now);
                    self.replace(node)?;
                    outcome.reparented.push(child);
                }
                if let Some(node) = self.remove(id) {
                    outcome.removed.push(node);
                }
            }
        }
        Ok(outcome)
    }

    /// Drop a single row. Children keep their (now dangling) parent reference.
    pub fn remove(&mut self, id: &str) -> Option<Node> {
        let node = self.nodes.shift_remove(id)?;
        self.unlink_child(node.parent_id.as_deref(), id);
        Some(node)
    }

    pub fn list(&self, filter: &NodeFilter) -> Vec<&Node> {
        self.nodes
            .values()
            .filter(|n| filter.mode.is_none_or(|m| n.mode == m))
            .filter(|n| filter.status.is_none_or(|s| n.status == s))
            .filter(|n| filter.priority.is_none_or(|p| n.priority.value() == p))
            .filter(|n| filter.has_due_date.is_none_or(|d| n.due_date.is_some() == d))
            .filter(|n| filter.tags.is_empty() || n.tags.iter().any(|t| filter.tags.contains(t)))
            .filter(|n| match filter.parent {
                ParentScope::All => true,
                ParentScope::Roots => self.is_root(n),
                ParentScope::Children(ref parent) => n.parent_id.as_deref() == Some(parent.as_str()),
            })
            .collect()
    }

    // -----------------------------------------------------------------------
    // Tree
    // -----------------------------------------------------------------------

    /// Re-parent `id`. Fails if the new parent is the node itself or one of
    /// its descendants.
    pub fn move_node(&mut self, id: &str, new_parent: Option<&str>, now: DateTime<Utc>) -> Result<Node, StoreError> {
        let patch = NodePatch {
            parent_id: Some(new_parent.map(str::to_string)),
            ..Default::default()
        };
        self.update(id, &patch, now)
    }

    pub fn check_move(&self, id: &str, new_parent: Option<&str>) -> Result<(), StoreError> {
        self.require(id)?;
        let Some(parent) = new_parent else {
            return Ok(());
        };
        self.require(parent)?;
        if self.would_cycle(id, parent) {
            return Err(StoreError::Cycle {
                id: id.to_string(),
                parent: parent.to_string(),
            });
        }
        Ok(())
    }

    /// Whether making `parent` the parent of `id` closes a loop
    pub fn would_cycle(&self, id: &str, parent: &str) -> bool {
        parent == id || self.ancestors(parent).iter().any(|a| a == id)
    }

    /// A node is a root when it has no parent or its parent is not indexed
    pub fn is_root(&self, node: &Node) -> bool {
        node.parent_id
            .as_deref()
            .is_none_or(|p| !self.nodes.contains_key(p))
    }

    pub fn roots(&self) -> Vec<&Node> {
        self.nodes.values().filter(|n| self.is_root(n)).collect()
    }

    pub fn child_ids(&self, id: &str) -> Vec<String> {
        self.children
            .get(id)
            .map(|set| {
                set.iter()
                    .filter(|c| self.nodes.contains_key(c.as_str()))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn children(&self, id: &str) -> Vec<&Node> {
        self.children
            .get(id)
            .map(|set| set.iter().filter_map(|c| self.nodes.get(c)).collect())
            .unwrap_or_default()
    }

    /// Parent chain from the immediate parent upward. Stops at the first
    /// missing or repeated id.
    pub fn ancestors(&self, id: &str) -> Vec<String> {
        let mut chain = Vec::new();
        let mut seen = HashSet::new();
        seen.insert(id.to_string());
        let mut current = self.nodes.get(id).and_then(|n| n.parent_id.clone());
        while let Some(parent) = current {
            if !seen.insert(parent.clone()) {
                break;
            }
            let Some(node) = self.nodes.get(&parent) else {
                break;
            };
            current = node.parent_id.clone();
            chain.push(parent);
        }
        chain
    }

    /// Every node below `id`, parents before their children.
    pub fn descendants(&self, id: &str) -> Vec<String> {
        let mut out = Vec::new();
        let mut seen = HashSet::new();
        seen.insert(id.to_string());
        let mut queue = VecDeque::from(self.child_ids(id));
        while let Some(next) = queue.pop_front() {
            if !seen.insert(next.clone()) {
                continue;
            }
            queue.extend(self.child_ids(&next));
            out.push(next);
        }
        out
    }

    /// Clear the parent of one node on every parent loop so the tree is
    /// acyclic again. Returns the ids that were detached.
    pub fn break_parent_cycles(&mut self) -> Vec<String> {
        let mut detached = Vec::new();
        let ids: Vec<String> = self.nodes.keys().cloned().collect();
        for id in ids {
            let Some(parent) = self.nodes.get(&id).and_then(|n| n.parent_id.clone()) else {
                continue;
            };
            if self.ancestors(&parent).iter().any(|a| *a == id) || parent == id {
                let mut node = self.nodes[&id].clone();
                node.parent_id = None;
                // replace cannot fail: the id was just read from the map
                let _ = self.replace(node);
                detached.push(id);
            }
        }
        detached
    }

    // -----------------------------------------------------------------------
    // Tags
    // -----------------------------------------------------------------------

    /// `tags` followed by any of the parent's tags it lacks
    fn with_parent_tags(&self, tags: &[String], parent: &str) -> Vec<String> {
        let mut out = tags.to_vec();
        if let Some(parent) = self.nodes.get(parent) {
            out.extend(parent.tags.iter().filter(|t| !tags.contains(t)).cloned());
        }
        out
    }

    /// Merge each node's parent tags into its own, starting at `id` and
    /// walking down its subtree. Returns the ids whose tags grew; their
    /// `updated_at` is bumped.
    pub fn inherit_tags(&mut self, id: &str, now: DateTime<Utc>) -> Vec<String> {
        let mut changed = Vec::new();
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([id.to_string()]);
        while let Some(next) = queue.pop_front() {
            if !seen.insert(next.clone()) {
                continue;
            }
            let Some(node) = self.nodes.get(&next) else {
                continue;
            };
            let merged = match node.parent_id {
                Some(ref parent) => self.with_parent_tags(&node.tags, parent),
                None => node.tags.clone(),
            };
            if merged.len() > node.tags.len()
                && let Some(node) = self.nodes.get_mut(&next)
            {
                node.tags = merged;
                node.updated_at = bump(node.updated_at, now);
                changed.push(next.clone());
            }
            queue.extend(self.child_ids(&next));
        }
        changed
    }

    /// `inherit_tags` over every tree in the store
    pub fn inherit_all_tags(&mut self, now: DateTime<Utc>) -> Vec<String> {
        let roots: Vec<String> = self.roots().iter().map(|n| n.id.clone()).collect();
        let mut changed = Vec::new();
        for root in roots {
            changed.extend(self.inherit_tags(&root, now));
        }
        changed
    }

    /// Nodes whose `parent_id` names a node that is not indexed
    pub fn dangling_parents(&self) -> Vec<String> {
        self.nodes
            .values()
            .filter(|n| n.parent_id.is_some() && self.is_root(n))
            .map(|n| n.id.clone())
            .collect()
    }

    fn unlink_child(&mut self, parent: Option<&str>, id: &str) {
        if let Some(parent) = parent
            && let Some(set) = self.children.get_mut(parent)
        {
            set.shift_remove(id);
            if set.is_empty() {
                self.children.remove(parent);
            }
        }
    }
}

/// Advance `updated_at` to `now`, or one second past the previous value when
/// the clock has not moved, so ordering by update time stays strict.
fn bump(previous: DateTime<Utc>, now: DateTime<Utc>) -> DateTime<Utc> {
    let now = now.trunc_subsecs(0);
    if now > previous {
        now
    } else {
        previous.trunc_subsecs(0) + chrono::Duration::seconds(1)
    }
}

fn validate_title(title: &str) -> Result<String, StoreError> {
    let title = title.trim();
    if title.is_empty() {
        return Err(StoreError::Invalid("title cannot be empty".to_string()));
    }
    if title.contains('\n') {
        return Err(StoreError::Invalid("title must be a single line".to_string()));
    }
    Ok(title.to_string())
}

fn validate_priority(value: u8) -> Result<Priority, StoreError> {
    Priority::new(value).ok_or_else(|| {
        StoreError::Invalid(crate::model::InvalidPriority(value as i64).to_string())
    })
}
