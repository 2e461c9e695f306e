use std::collections::{HashSet, VecDeque};

use indexmap::{IndexMap, IndexSet};

use crate::model::link::DependencyLink;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    #[error("{source_id} cannot be blocked by {target_id}: it would create a dependency cycle")]
    Cycle { source_id: String, target_id: String },
}

/// "Is blocked by" edges, kept in both directions. Independent of the
/// parent tree and always acyclic.
#[derive(Debug, Default, Clone)]
pub struct DependencyGraph {
    /// source -> the targets it waits on
    blocked_by: IndexMap<String, IndexSet<String>>,
    /// target -> the sources waiting on it
    blocking: IndexMap<String, IndexSet<String>>,
}

/// The link edits a `set_blockers` call made
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockerChanges {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub rejected: Vec<(String, GraphError)>,
}

impl BlockerChanges {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `source` is blocked by `target`. Returns false if the link
    /// already existed.
    pub fn add_link(&mut self, source: &str, target: &str) -> Result<bool, GraphError> {
        if self.has_link(source, target) {
            return Ok(false);
        }
        if source == target || self.reaches(target, source) {
            return Err(GraphError::Cycle {
                source_id: source.to_string(),
                target_id: target.to_string(),
            });
        }
        self.blocked_by
            .entry(source.to_string())
            .or_default()
            .insert(target.to_string());
        self.blocking
            .entry(target.to_string())
            .or_default()
            .insert(source.to_string());
        Ok(true)
    }

    pub fn remove_link(&mut self, source: &str, target: &str) -> bool {
        let removed = remove_edge(&mut self.blocked_by, source, target);
        if removed {
            remove_edge(&mut self.blocking, target, source);
        }
        removed
    }

    pub fn has_link(&self, source: &str, target: &str) -> bool {
        self.blocked_by
            .get(source)
            .is_some_and(|targets| targets.contains(target))
    }

    /// Ids `id` waits on
    pub fn blocked_by(&self, id: &str) -> Vec<String> {
        self.blocked_by
            .get(id)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Ids waiting on `id`
    pub fn blocking(&self, id: &str) -> Vec<String> {
        self.blocking
            .get(id)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Drop every edge touching `id`, returning the removed links.
    pub fn remove_node(&mut self, id: &str) -> Vec<DependencyLink> {
        let mut removed = Vec::new();
        for target in self.blocked_by(id) {
            self.remove_link(id, &target);
            removed.push(DependencyLink::new(id, target));
        }
        for source in self.blocking(id) {
            self.remove_link(&source, id);
            removed.push(DependencyLink::new(source, id));
        }
        removed
    }

    /// Make `source`'s blockers equal `targets`, one link at a time. Links
    /// that would close a cycle are rejected and reported; the rest apply.
    pub fn set_blockers(&mut self, source: &str, targets: &[String]) -> BlockerChanges {
        let mut changes = BlockerChanges::default();
        let wanted: IndexSet<&str> = targets.iter().map(String::as_str).collect();
        for existing in self.blocked_by(source) {
            if !wanted.contains(existing.as_str()) {
                self.remove_link(source, &existing);
                changes.removed.push(existing);
            }
        }
        for target in wanted {
            match self.add_link(source, target) {
                Ok(true) => changes.added.push(target.to_string()),
                Ok(false) => {}
                Err(e) => changes.rejected.push((target.to_string(), e)),
            }
        }
        changes
    }

    /// All links, grouped by source in insertion order
    pub fn links(&self) -> Vec<DependencyLink> {
        self.blocked_by
            .iter()
            .flat_map(|(source, targets)| {
                targets
                    .iter()
                    .map(move |target| DependencyLink::new(source.clone(), target.clone()))
            })
            .collect()
    }

    /// Whether `to` is reachable from `from` along blocked-by edges
    fn reaches(&self, from: &str, to: &str) -> bool {
        let mut seen: HashSet<&str> = HashSet::new();
        let mut queue: VecDeque<&str> = VecDeque::from([from]);
        while let Some(next) = queue.pop_front() {
            if next == to {
                return true;
            }
            if !seen.insert(next) {
                continue;
            }
            if let Some(targets) = self.blocked_by.get(next) {
                queue.extend(targets.iter().map(String::as_str));
            }
        }
        false
    }
}

fn remove_edge(map: &mut IndexMap<String, IndexSet<String>>, from: &str, to: &str) -> bool {
    let Some(set) = map.get_mut(from) else {
        return false;
    };
    let removed = set.shift_remove(to);
    if set.is_empty() {
        map.shift_remove(from);
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn links_are_kept_in_both_directions() {
        let mut g = DependencyGraph::new();
        assert_eq!(g.add_link("a", "b"), Ok(true));
        assert_eq!(g.add_link("a", "c"), Ok(true));
        assert_eq!(g.add_link("a", "b"), Ok(false));
        assert_eq!(g.blocked_by("a"), vec!["b", "c"]);
        assert_eq!(g.blocking("b"), vec!["a"]);

        assert!(g.remove_link("a", "b"));
        assert!(!g.remove_link("a", "b"));
        assert!(g.blocking("b").is_empty());
    }

    #[test]
    fn cycles_are_rejected() {
        let mut g = DependencyGraph::new();
        g.add_link("a", "b").unwrap();
        g.add_link("b", "c").unwrap();
        assert!(matches!(g.add_link("c", "a"), Err(GraphError::Cycle { .. })));
        assert!(matches!(g.add_link("x", "x"), Err(GraphError::Cycle { .. })));
        assert!(g.blocked_by("c").is_empty());
        // a diamond is fine
        assert_eq!(g.add_link("a", "c"), Ok(true));
    }

    #[test]
    fn remove_node_drops_both_directions() {
        let mut g = DependencyGraph::new();
        g.add_link("a", "b").unwrap();
        g.add_link("b", "c").unwrap();
        let removed = g.remove_node("b");
        assert_eq!(
            removed,
            vec![DependencyLink::new("b", "c"), DependencyLink::new("a", "b")]
        );
        assert!(g.links().is_empty());
    }

    #[test]
    fn set_blockers_diffs_and_rejects() {
        let mut g = DependencyGraph::new();
        g.add_link("a", "b").unwrap();
        g.add_link("c", "a").unwrap();

        let changes = g.set_blockers("a", &["d".to_string(), "c".to_string()]);
        assert_eq!(changes.removed, vec!["b"]);
        assert_eq!(changes.added, vec!["d"]);
        assert_eq!(changes.rejected.len(), 1);
        assert_eq!(changes.rejected[0].0, "c");
        assert_eq!(g.blocked_by("a"), vec!["d"]);
    }
}
