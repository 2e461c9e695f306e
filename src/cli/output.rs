use serde::Serialize;

use crate::io::events::StatusEvent;
use crate::io::recovery::RecoveryEntry;
use crate::model::time::TzOffset;
use crate::model::node::{NodeMode, NodeStatus};
use crate::model::view::{Dependencies, EdgeKind, GraphView, NodeView, PriorityBucket, TreeNode};
use crate::ops::search::{MatchField, SearchResult};
use crate::ops::sync::{DeleteReport, SyncStats};

const DATE_DISPLAY: &str = "%Y-%m-%d %H:%M";

// ---------------------------------------------------------------------------
// JSON output
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct ShowJson<'a> {
    #[serde(flatten)]
    pub view: &'a NodeView,
    pub dependencies: &'a Dependencies,
}

#[derive(Serialize)]
pub struct TzJson {
    pub offset_minutes: i32,
}

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<(), serde_json::Error> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

// ---------------------------------------------------------------------------
// Human-readable formatting
// ---------------------------------------------------------------------------

/// First eight characters of an id, enough to address it on the CLI
pub fn short_id(id: &str) -> &str {
    match id.char_indices().nth(8) {
        Some((i, _)) => &id[..i],
        None => id,
    }
}

fn status_char(status: NodeStatus) -> char {
    match status {
        NodeStatus::Todo => ' ',
        NodeStatus::InProgress => '>',
        NodeStatus::Done => 'x',
        NodeStatus::Cancelled => '-',
    }
}

/// `[ ]` for tasks by status, `*` for notes
fn marker(view: &NodeView) -> String {
    match view.node.mode {
        NodeMode::Task => format!("[{}]", status_char(view.node.status)),
        NodeMode::Note => " * ".to_string(),
    }
}

fn tags_suffix(tags: &[String]) -> String {
    if tags.is_empty() {
        String::new()
    } else {
        format!(
            " {}",
            tags.iter()
                .map(|t| format!("#{}", t))
                .collect::<Vec<_>>()
                .join(" ")
        )
    }
}

/// Format a single node as a one-line summary
pub fn format_node_line(view: &NodeView) -> String {
    let node = &view.node;
    let mut line = format!("{} {} {}", marker(view), short_id(&node.id), node.title);
    if node.is_task() {
        line.push_str(&format!("  p{}", node.priority.value()));
    }
    if let Some(due) = view.effective_due {
        line.push_str(&format!("  due {}", due.format(DATE_DISPLAY)));
    }
    if view.blocked {
        line.push_str("  (blocked)");
    }
    line.push_str(&tags_suffix(&node.tags));
    line
}

/// Indented hierarchy, depth first
pub fn format_tree(roots: &[TreeNode]) -> Vec<String> {
    let mut lines = Vec::new();
    let mut stack: Vec<(&TreeNode, usize)> = roots.iter().rev().map(|t| (t, 0)).collect();
    while let Some((tree, depth)) = stack.pop() {
        lines.push(format!("{}{}", "  ".repeat(depth), format_node_line(&tree.view)));
        stack.extend(tree.children.iter().rev().map(|c| (c, depth + 1)));
    }
    lines
}

/// Format detailed node view
pub fn format_node_detail(view: &NodeView, deps: &Dependencies) -> Vec<String> {
    let node = &view.node;
    let mut lines = vec![format!("{} {} {}", marker(view), node.id, node.title)];

    lines.push(format!("mode: {}", node.mode));
    if node.is_task() {
        lines.push(format!("status: {}", node.status));
        lines.push(format!("priority: {}", node.priority.value()));
    }
    if let Some(due) = node.due_date {
        lines.push(format!("due: {}", due.format(DATE_DISPLAY)));
    }
    if view.effective_due != node.due_date
        && let Some(due) = view.effective_due
    {
        lines.push(format!("effective due: {}", due.format(DATE_DISPLAY)));
    }
    let bucket = match view.bucket {
        PriorityBucket::Ranked => "",
        PriorityBucket::Chore => " (chore)",
    };
    lines.push(format!("computed priority: {:.1}{}", view.computed_priority, bucket));
    if let Some(ref parent) = node.parent_id {
        lines.push(format!("parent: {}", parent));
    }
    if view.children_count > 0 {
        lines.push(format!("children: {}", view.children_count));
    }
    if !node.tags.is_empty() {
        lines.push(format!("tags:{}", tags_suffix(&node.tags)));
    }
    if let Some(ref path) = view.file_path {
        lines.push(format!("file: {}", path.display()));
    }

    if !deps.blocked_by.is_empty() {
        lines.push(String::new());
        lines.push("blocked by:".to_string());
        lines.extend(deps.blocked_by.iter().map(|v| format!("  {}", format_node_line(v))));
    }
    if !deps.blocking.is_empty() {
        lines.push(String::new());
        lines.push("blocking:".to_string());
        lines.extend(deps.blocking.iter().map(|v| format!("  {}", format_node_line(v))));
    }

    if !node.content.trim().is_empty() {
        lines.push(String::new());
        lines.extend(node.content.trim_end().lines().map(str::to_string));
    }
    lines
}

pub fn format_search_hit(hit: &SearchResult) -> String {
    let fields: Vec<&str> = hit
        .matched
        .iter()
        .map(|f| match f {
            MatchField::Title => "title",
            MatchField::Content => "content",
            MatchField::Tag => "tag",
        })
        .collect();
    let mut line = format!("{}  [{}]", format_node_line(&hit.view), fields.join(","));
    if let Some(ref snippet) = hit.snippet {
        line.push_str(&format!("\n      {}", snippet));
    }
    line
}

pub fn format_graph(graph: &GraphView) -> Vec<String> {
    let mut lines = vec![format!("{} nodes, {} edges", graph.nodes.len(), graph.edges.len())];
    for edge in &graph.edges {
        let arrow = match edge.kind {
            EdgeKind::Parent => "parent of",
            EdgeKind::Dependency => "blocked by",
            EdgeKind::Wiki => "links to",
        };
        lines.push(format!("  {} {} {}", short_id(&edge.source), arrow, short_id(&edge.target)));
    }
    lines
}

pub fn format_sync_stats(stats: &SyncStats) -> String {
    format!(
        "synced: {} created, {} updated, {} removed, {} skipped",
        stats.created, stats.updated, stats.removed, stats.skipped
    )
}

pub fn format_delete_report(report: &DeleteReport) -> Vec<String> {
    let mut lines = vec![format!(
        "deleted {} node{}",
        report.removed.len(),
        if report.removed.len() == 1 { "" } else { "s" }
    )];
    lines.extend(report.archived.iter().map(|p| format!("  archived {}", p.display())));
    if !report.reparented.is_empty() {
        lines.push(format!("  {} children moved up", report.reparented.len()));
    }
    lines
}

/// `2024-03-01 10:00  todo -> done`, in the vault's local time
pub fn format_status_event(event: &StatusEvent, offset: TzOffset) -> String {
    format!(
        "{}  {} -> {}",
        offset.local(event.occurred_at).format(DATE_DISPLAY),
        event.from.as_str(),
        event.to.as_str()
    )
}

pub fn format_recovery_entry(entry: &RecoveryEntry) -> String {
    entry.to_display_markdown()
}

/// Parse a mode string, listing the accepted values on failure
pub fn parse_mode(s: &str) -> Result<NodeMode, String> {
    s.parse::<NodeMode>()
        .map_err(|e| format!("{} (expected: task, note)", e))
}

/// Parse a status string, listing the accepted values on failure
pub fn parse_status(s: &str) -> Result<NodeStatus, String> {
    s.parse::<NodeStatus>()
        .map_err(|e| format!("{} (expected: todo, in_progress, done, cancelled)", e))
}
