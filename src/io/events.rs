//! Status change history, kept in `<vault>/.events.log` with one JSON object
//! per line.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::io::recovery::append_to_log;
use crate::model::node::NodeStatus;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEvent {
    pub node_id: String,
    pub from: NodeStatus,
    pub to: NodeStatus,
    pub occurred_at: DateTime<Utc>,
}

pub fn events_log_path(root: &Path) -> PathBuf {
    root.join(".events.log")
}

/// Append one transition. A failure is logged and swallowed.
pub fn record_status_change(root: &Path, event: &StatusEvent) {
    let line = match serde_json::to_string(event) {
        Ok(line) => line + "\n",
        Err(e) => {
            tracing::warn!(error = %e, "could not encode status event");
            return;
        }
    };
    if let Err(e) = append_to_log(&events_log_path(root), None, &line) {
        tracing::warn!(error = %e, "could not write to events log");
    }
}

/// Transitions recorded for `node_id`, most recent first.
pub fn read_events(root: &Path, node_id: &str) -> Vec<StatusEvent> {
    let Ok(content) = std::fs::read_to_string(events_log_path(root)) else {
        return Vec::new();
    };
    let mut events: Vec<StatusEvent> = content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| match serde_json::from_str::<StatusEvent>(line) {
            Ok(event) => Some(event),
            Err(e) => {
                tracing::debug!(error = %e, "skipping unreadable events log line");
                None
            }
        })
        .filter(|event| event.node_id == node_id)
        .collect();
    // stable, so same-second events keep their reverse write order
    events.reverse();
    events.sort_by(|a, b| b.occurred_at.cmp(&a.occurred_at));
    events
}
