use std::path::PathBuf;

use chrono::NaiveDateTime;
use serde::Serialize;

use super::node::Node;

/// Which ranking a computed priority belongs to. Chores are ordered among
/// themselves and never compete with regular work.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PriorityBucket {
    #[default]
    Ranked,
    Chore,
}

/// A node together with the values derived for it at read time
#[derive(Debug, Clone, Serialize)]
pub struct NodeView {
    #[serde(flatten)]
    pub node: Node,
    pub computed_priority: f64,
    pub bucket: PriorityBucket,
    pub effective_due: Option<NaiveDateTime>,
    /// Has at least one incomplete blocker
    pub blocked: bool,
    pub children_count: usize,
    pub file_path: Option<PathBuf>,
}

impl NodeView {
    pub fn id(&self) -> &str {
        &self.node.id
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TreeNode {
    #[serde(flatten)]
    pub view: NodeView,
    pub children: Vec<TreeNode>,
}

/// Both directions of a node's blocking relation
#[derive(Debug, Clone, Default, Serialize)]
pub struct Dependencies {
    /// Nodes this one waits on
    pub blocked_by: Vec<NodeView>,
    /// Nodes waiting on this one
    pub blocking: Vec<NodeView>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeKind {
    Parent,
    Dependency,
    Wiki,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GraphEdge {
    pub source: String,
    pub target: String,
    pub kind: EdgeKind,
}

/// Flat node and edge lists for graph consumers
#[derive(Debug, Clone, Default, Serialize)]
pub struct GraphView {
    pub nodes: Vec<NodeView>,
    pub edges: Vec<GraphEdge>,
}
