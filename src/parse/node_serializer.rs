use chrono::{DateTime, SecondsFormat, Utc};

use crate::model::node::Node;
use crate::parse::node_parser::{DELIMITER, DUE_FORMAT};

/// Serialize a node to its file form. Derived values are never written;
/// `blocked_by` carries the node's outgoing dependency links.
pub fn serialize_node(node: &Node, blocked_by: &[String]) -> String {
    let mut out = String::with_capacity(256 + node.content.len());
    out.push_str(DELIMITER);
    out.push('\n');

    push_field(&mut out, "id", &node.id);
    push_field(&mut out, "title", &json_string(&node.title));
    push_field(&mut out, "mode", node.mode.as_str());
    push_field(&mut out, "status", node.status.as_str());
    push_field(&mut out, "priority", &node.priority.to_string());
    if let Some(ref parent) = node.parent_id {
        push_field(&mut out, "parent_id", parent);
    }
    if let Some(due) = node.due_date {
        push_field(&mut out, "due_date", &due.format(DUE_FORMAT).to_string());
    }
    push_field(&mut out, "tags", &json_list(&node.tags));
    if !blocked_by.is_empty() {
        push_field(&mut out, "blocked_by", &json_list(blocked_by));
    }
    push_field(&mut out, "created_at", &format_instant(node.created_at));
    push_field(&mut out, "updated_at", &format_instant(node.updated_at));

    out.push_str(DELIMITER);
    out.push('\n');
    out.push_str(&node.content);
    out
}

pub fn format_instant(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

fn push_field(out: &mut String, key: &str, value: &str) {
    out.push_str(key);
    out.push_str(": ");
    out.push_str(value);
    out.push('\n');
}

fn json_string(value: &str) -> String {
    serde_json::Value::from(value).to_string()
}

fn json_list(values: &[String]) -> String {
    let items: Vec<String> = values.iter().map(|v| json_string(v)).collect();
    format!("[{}]", items.join(", "))
}
