use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// Whether a node is actionable work or reference material
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeMode {
    #[default]
    Task,
    Note,
}

impl NodeMode {
    pub fn as_str(self) -> &'static str {
        match self {
            NodeMode::Task => "task",
            NodeMode::Note => "note",
        }
    }
}

impl FromStr for NodeMode {
    type Err = UnknownValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "task" => Ok(NodeMode::Task),
            "note" => Ok(NodeMode::Note),
            _ => Err(UnknownValue::new("mode", s)),
        }
    }
}

impl fmt::Display for NodeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Task progress. Ignored for notes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    #[default]
    Todo,
    InProgress,
    Done,
    Cancelled,
}

impl NodeStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            NodeStatus::Todo => "todo",
            NodeStatus::InProgress => "in_progress",
            NodeStatus::Done => "done",
            NodeStatus::Cancelled => "cancelled",
        }
    }

    /// Done and cancelled work no longer competes for attention
    pub fn is_closed(self) -> bool {
        matches!(self, NodeStatus::Done | NodeStatus::Cancelled)
    }
}

impl FromStr for NodeStatus {
    type Err = UnknownValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "todo" => Ok(NodeStatus::Todo),
            "in_progress" => Ok(NodeStatus::InProgress),
            "done" => Ok(NodeStatus::Done),
            "cancelled" => Ok(NodeStatus::Cancelled),
            _ => Err(UnknownValue::new("status", s)),
        }
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Text that does not name a known mode or status
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} '{value}'")]
pub struct UnknownValue {
    pub kind: &'static str,
    pub value: String,
}

impl UnknownValue {
    fn new(kind: &'static str, value: &str) -> Self {
        UnknownValue {
            kind,
            value: value.to_string(),
        }
    }
}

/// Raw priority from 1 (most urgent) to 5 (chore)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Priority(u8);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("priority must be between 1 and 5, got {0}")]
pub struct InvalidPriority(pub i64);

impl Priority {
    pub const HIGHEST: Priority = Priority(1);
    pub const DEFAULT: Priority = Priority(3);
    pub const CHORE: Priority = Priority(5);

    pub fn new(value: u8) -> Option<Priority> {
        (1..=5).contains(&value).then_some(Priority(value))
    }

    pub fn value(self) -> u8 {
        self.0
    }

    pub fn is_chore(self) -> bool {
        self == Priority::CHORE
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::DEFAULT
    }
}

impl TryFrom<u8> for Priority {
    type Error = InvalidPriority;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Priority::new(value).ok_or(InvalidPriority(value as i64))
    }
}

impl From<Priority> for u8 {
    fn from(p: Priority) -> u8 {
        p.0
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A task or note record as held by the index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub title: String,
    pub mode: NodeMode,
    pub status: NodeStatus,
    pub priority: Priority,
    /// Wall-clock deadline, read against the vault's timezone offset
    pub due_date: Option<NaiveDateTime>,
    pub parent_id: Option<String>,
    /// Ordered, without duplicates
    pub tags: Vec<String>,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Node {
    pub fn is_task(&self) -> bool {
        self.mode == NodeMode::Task
    }

    /// A task that is neither done nor cancelled
    pub fn is_open_task(&self) -> bool {
        self.is_task() && !self.status.is_closed()
    }

    /// A task whose status is done or cancelled
    pub fn is_closed_task(&self) -> bool {
        self.is_task() && self.status.is_closed()
    }

    pub fn is_chore(&self) -> bool {
        self.is_task() && self.priority.is_chore()
    }
}

/// Fields accepted when creating a node
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewNode {
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub mode: NodeMode,
    #[serde(default)]
    pub status: NodeStatus,
    /// Validated by the store, so out-of-range values can be reported
    #[serde(default = "default_priority")]
    pub priority: u8,
    #[serde(default)]
    pub due_date: Option<NaiveDateTime>,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

fn default_priority() -> u8 {
    Priority::DEFAULT.value()
}

impl NewNode {
    pub fn task(title: impl Into<String>) -> Self {
        NewNode {
            title: title.into(),
            priority: default_priority(),
            ..Default::default()
        }
    }

    pub fn note(title: impl Into<String>) -> Self {
        NewNode {
            mode: NodeMode::Note,
            ..NewNode::task(title)
        }
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_due(mut self, due: NaiveDateTime) -> Self {
        self.due_date = Some(due);
        self
    }

    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = content.into();
        self
    }
}

/// A partial update. `None` leaves a field untouched; the nested options on
/// `due_date` and `parent_id` distinguish "clear" from "leave alone".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodePatch {
    pub title: Option<String>,
    pub content: Option<String>,
    pub mode: Option<NodeMode>,
    pub status: Option<NodeStatus>,
    pub priority: Option<u8>,
    pub due_date: Option<Option<NaiveDateTime>>,
    pub tags: Option<Vec<String>>,
    pub parent_id: Option<Option<String>>,
}

impl NodePatch {
    pub fn status(status: NodeStatus) -> Self {
        NodePatch {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.changed_fields().is_empty()
    }

    /// The persisted fields that differ between two versions of a record
    pub fn diff(old: &Node, new: &Node) -> Self {
        NodePatch {
            title: (old.title != new.title).then(|| new.title.clone()),
            content: (old.content != new.content).then(|| new.content.clone()),
            mode: (old.mode != new.mode).then_some(new.mode),
            status: (old.status != new.status).then_some(new.status),
            priority: (old.priority != new.priority).then_some(new.priority.value()),
            due_date: (old.due_date != new.due_date).then_some(new.due_date),
            tags: (old.tags != new.tags).then(|| new.tags.clone()),
            parent_id: (old.parent_id != new.parent_id).then(|| new.parent_id.clone()),
        }
    }

    pub fn changed_fields(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.title.is_some() {
            fields.push("title");
        }
        if self.content.is_some() {
            fields.push("content");
        }
        if self.mode.is_some() {
            fields.push("mode");
        }
        if self.status.is_some() {
            fields.push("status");
        }
        if self.priority.is_some() {
            fields.push("priority");
        }
        if self.due_date.is_some() {
            fields.push("due_date");
        }
        if self.tags.is_some() {
            fields.push("tags");
        }
        if self.parent_id.is_some() {
            fields.push("parent_id");
        }
        fields
    }
}

/// Drop empty and repeated tags while keeping first-seen order
pub fn normalize_tags(tags: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(tags.len());
    for tag in tags {
        let tag = tag.trim().trim_start_matches('#');
        if !tag.is_empty() && !out.iter().any(|t| t == tag) {
            out.push(tag.to_string());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_range_is_enforced() {
        assert!(Priority::new(0).is_none());
        assert!(Priority::new(6).is_none());
        assert_eq!(Priority::new(5), Some(Priority::CHORE));
        assert!(Priority::try_from(9).is_err());
    }

    #[test]
    fn status_round_trips_through_text() {
        for status in [
            NodeStatus::Todo,
            NodeStatus::InProgress,
            NodeStatus::Done,
            NodeStatus::Cancelled,
        ] {
            assert_eq!(status.as_str().parse::<NodeStatus>().unwrap(), status);
        }
        let err = "blocked".parse::<NodeStatus>().unwrap_err();
        assert_eq!(err.to_string(), "unknown status 'blocked'");
    }

    #[test]
    fn normalize_tags_dedupes_in_order() {
        let tags = vec![
            "#home".to_string(),
            "work".to_string(),
            "home".to_string(),
            " ".to_string(),
        ];
        assert_eq!(normalize_tags(&tags), vec!["home", "work"]);
    }

    #[test]
    fn diff_reports_only_changed_fields() {
        let old = Node {
            id: "a".into(),
            title: "Old".into(),
            mode: NodeMode::Task,
            status: NodeStatus::Todo,
            priority: Priority::DEFAULT,
            due_date: None,
            parent_id: None,
            tags: vec![],
            content: String::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let mut new = old.clone();
        new.title = "New".into();
        new.status = NodeStatus::Done;

        let patch = NodePatch::diff(&old, &new);
        assert_eq!(patch.changed_fields(), vec!["title", "status"]);
        assert!(NodePatch::diff(&old, &old).is_empty());
    }
}
