use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use crate::io::events::{StatusEvent, read_events};
use crate::model::link::DependencyLink;
use crate::model::time::TzOffset;
use crate::model::view::{Dependencies, EdgeKind, GraphEdge, GraphView, NodeView, PriorityBucket, TreeNode};
use crate::ops::search::{SearchQuery, SearchResult, build_matcher, match_node};
use crate::ops::store::{NodeFilter, StoreError};
use crate::ops::sync::{Index, SyncEngine, SyncError};
use crate::parse::{extract_wikilinks, links_to};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortKey {
    #[default]
    Created,
    Title,
    /// Raw priority, 1 first
    Priority,
    /// Own due date; undated nodes last
    DueDate,
    /// Computed priority, chores after ranked work
    Computed,
}

#[derive(Debug, Clone, Default)]
pub struct ListQuery {
    pub filter: NodeFilter,
    pub sort: SortKey,
    pub descending: bool,
}

fn compare(a: &NodeView, b: &NodeView, key: SortKey) -> Ordering {
    match key {
        SortKey::Created => a.node.created_at.cmp(&b.node.created_at),
        SortKey::Title => a.node.title.to_lowercase().cmp(&b.node.title.to_lowercase()),
        SortKey::Priority => a.node.priority.cmp(&b.node.priority),
        SortKey::DueDate => match (a.node.due_date, b.node.due_date) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        },
        SortKey::Computed => by_rank(a, b),
    }
}

/// Ranked before chores, then highest computed priority first
fn by_rank(a: &NodeView, b: &NodeView) -> Ordering {
    let bucket = |v: &NodeView| v.bucket == PriorityBucket::Chore;
    bucket(a)
        .cmp(&bucket(b))
        .then(b.computed_priority.total_cmp(&a.computed_priority))
}

impl SyncEngine {
    /// Status transitions recorded for a node, most recent first.
    pub fn get_events(&self, id: &str) -> Result<Vec<StatusEvent>, SyncError> {
        let index = self.read_index()?;
        index.store.require(id)?;
        Ok(read_events(&self.vault().root, id))
    }

    pub fn get_node(&self, id: &str) -> Result<NodeView, SyncError> {
        let index = self.read_index()?;
        index
            .view(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()).into())
    }

    pub fn list_nodes(&self, query: &ListQuery) -> Result<Vec<NodeView>, SyncError> {
        let index = self.read_index()?;
        let mut views: Vec<NodeView> = index
            .store
            .list(&query.filter)
            .into_iter()
            .filter_map(|n| index.view(&n.id))
            .collect();
        views.sort_by(|a, b| compare(a, b, query.sort));
        if query.descending {
            views.reverse();
        }
        Ok(views)
    }

    /// The subtree under `root`, or the whole forest. Nodes whose parent is
    /// not indexed are roots.
    pub fn get_tree(&self, root: Option<&str>) -> Result<Vec<TreeNode>, SyncError> {
        let index = self.read_index()?;
        let roots: Vec<String> = match root {
            Some(id) => vec![index.store.require(id)?.id.clone()],
            None => index.store.roots().into_iter().map(|n| n.id.clone()).collect(),
        };
        Ok(build_tree(&index, &roots))
    }

    /// Literal, case-insensitive match over titles, content and tags,
    /// best-ranked first.
    pub fn search(&self, query: &SearchQuery) -> Result<Vec<SearchResult>, SyncError> {
        let Some(re) = build_matcher(&query.text) else {
            return Ok(Vec::new());
        };
        let index = self.read_index()?;
        let mut results: Vec<SearchResult> = index
            .store
            .iter()
            .filter_map(|node| {
                let (matched, snippet) = match_node(&re, query, node)?;
                Some(SearchResult {
                    view: index.view(&node.id)?,
                    matched,
                    snippet,
                })
            })
            .collect();
        results.sort_by(|a, b| by_rank(&a.view, &b.view));
        if let Some(limit) = query.limit {
            results.truncate(limit);
        }
        Ok(results)
    }

    pub fn get_dependencies(&self, id: &str) -> Result<Dependencies, SyncError> {
        let index = self.read_index()?;
        index.store.require(id)?;
        let views = |ids: Vec<String>| -> Vec<NodeView> { ids.iter().filter_map(|i| index.view(i)).collect() };
        Ok(Dependencies {
            blocked_by: views(index.graph.blocked_by(id)),
            blocking: views(index.graph.blocking(id)),
        })
    }

    /// Nodes whose content links to this node's title with `[[Title]]`
    pub fn get_backlinks(&self, id: &str) -> Result<Vec<NodeView>, SyncError> {
        let index = self.read_index()?;
        let title = index.store.require(id)?.title.clone();
        Ok(index
            .store
            .iter()
            .filter(|n| n.id != id && links_to(&n.content, &title))
            .filter_map(|n| index.view(&n.id))
            .collect())
    }

    /// Every node plus parent, dependency and wiki-link edges between them.
    pub fn get_graph(&self) -> Result<GraphView, SyncError> {
        let index = self.read_index()?;
        let nodes: Vec<NodeView> = index.store.iter().filter_map(|n| index.view(&n.id)).collect();

        let mut by_title: HashMap<String, Vec<&str>> = HashMap::new();
        for node in index.store.iter() {
            by_title
                .entry(node.title.trim().to_lowercase())
                .or_default()
                .push(node.id.as_str());
        }

        let mut edges = Vec::new();
        for node in index.store.iter() {
            if let Some(ref parent) = node.parent_id
                && index.store.contains(parent)
            {
                edges.push(GraphEdge {
                    source: parent.clone(),
                    target: node.id.clone(),
                    kind: EdgeKind::Parent,
                });
            }
        }
        for link in live_links(&index) {
            edges.push(GraphEdge {
                source: link.source_id,
                target: link.target_id,
                kind: EdgeKind::Dependency,
            });
        }
        for node in index.store.iter() {
            let mut seen = HashSet::new();
            for title in extract_wikilinks(&node.content) {
                let Some(targets) = by_title.get(&title.to_lowercase()) else {
                    continue;
                };
                for target in targets {
                    if *target != node.id && seen.insert(*target) {
                        edges.push(GraphEdge {
                            source: node.id.clone(),
                            target: target.to_string(),
                            kind: EdgeKind::Wiki,
                        });
                    }
                }
            }
        }
        Ok(GraphView { nodes, edges })
    }

    /// Dependency links between indexed nodes
    pub fn links(&self) -> Result<Vec<DependencyLink>, SyncError> {
        let index = self.read_index()?;
        Ok(live_links(&index))
    }

    /// Expand an id or a unique id prefix.
    pub fn resolve_id(&self, prefix: &str) -> Result<String, SyncError> {
        let index = self.index.read().map_err(|_| SyncError::Poisoned)?;
        if index.store.contains(prefix) {
            return Ok(prefix.to_string());
        }
        let matches: Vec<&String> = index.store.ids().filter(|id| id.starts_with(prefix)).collect();
        match matches.as_slice() {
            [id] => Ok((*id).clone()),
            [] => Err(StoreError::NotFound(prefix.to_string()).into()),
            _ => Err(StoreError::Invalid(format!(
                "id prefix '{}' matches {} nodes",
                prefix,
                matches.len()
            ))
            .into()),
        }
    }

    pub fn timezone_offset(&self) -> Result<TzOffset, SyncError> {
        let index = self.index.read().map_err(|_| SyncError::Poisoned)?;
        Ok(index.offset)
    }
}

fn live_links(index: &Index) -> Vec<DependencyLink> {
    index
        .graph
        .links()
        .into_iter()
        .filter(|l| index.store.contains(&l.source_id) && index.store.contains(&l.target_id))
        .collect()
}

/// Assemble nested views without recursion: collect the subtree in
/// pre-order, then build it bottom-up.
fn build_tree(index: &Index, roots: &[String]) -> Vec<TreeNode> {
    let mut order: Vec<String> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    let mut stack: Vec<String> = roots.iter().rev().cloned().collect();
    while let Some(id) = stack.pop() {
        if !seen.insert(id.clone()) {
            continue;
        }
        stack.extend(index.store.child_ids(&id).into_iter().rev());
        order.push(id);
    }

    let mut built: HashMap<String, TreeNode> = HashMap::new();
    for id in order.iter().rev() {
        let Some(view) = index.view(id) else {
            continue;
        };
        let children = index
            .store
            .child_ids(id)
            .iter()
            .filter_map(|c| built.remove(c))
            .collect();
        built.insert(id.clone(), TreeNode { view, children });
    }
    roots.iter().filter_map(|r| built.remove(r)).collect()
}
