use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

use crate::model::node::{Node, NodeMode, NodeStatus, Priority, normalize_tags};

/// Opening and closing line of the header block
pub const DELIMITER: &str = "---";

/// Storage format for due dates
pub const DUE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// A header that cannot be read. Line numbers are 1-based over the whole file.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HeaderError {
    #[error("missing opening '---' header delimiter")]
    MissingOpen,
    #[error("header opened on line {line} is never closed")]
    Unclosed { line: usize },
    #[error("line {line}: expected 'key: value'")]
    MalformedLine { line: usize },
    #[error("line {line}: invalid {key}: {message}")]
    InvalidValue {
        line: usize,
        key: String,
        message: String,
    },
}

/// Header fields and body read from a node file
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedNode {
    /// Absent when the file has never been indexed; the caller mints one
    pub id: Option<String>,
    pub title: Option<String>,
    pub mode: NodeMode,
    pub status: NodeStatus,
    pub priority: Priority,
    pub due_date: Option<NaiveDateTime>,
    pub parent_id: Option<String>,
    pub tags: Vec<String>,
    pub blocked_by: Vec<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub body: String,
}

impl ParsedNode {
    /// Build a full record, filling gaps from the supplied id, title and clock.
    /// Returns the node and the ids it is blocked by.
    pub fn into_node(self, id: String, fallback_title: &str, now: DateTime<Utc>) -> (Node, Vec<String>) {
        let title = self
            .title
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| fallback_title.to_string());
        let created_at = self.created_at.unwrap_or(now);
        let node = Node {
            id,
            title,
            mode: self.mode,
            status: self.status,
            priority: self.priority,
            due_date: self.due_date,
            parent_id: self.parent_id,
            tags: normalize_tags(&self.tags),
            content: self.body,
            created_at,
            updated_at: self.updated_at.unwrap_or(created_at),
        };
        (node, self.blocked_by)
    }

    /// True when writing the record back would add fields the file lacks
    pub fn needs_completion(&self) -> bool {
        self.id.is_none() || self.created_at.is_none() || self.updated_at.is_none()
    }
}

/// Parse a node file: a `---` delimited header followed by a verbatim body.
pub fn parse_node(text: &str) -> Result<ParsedNode, HeaderError> {
    let mut parsed = ParsedNode {
        id: None,
        title: None,
        mode: NodeMode::default(),
        status: NodeStatus::default(),
        priority: Priority::default(),
        due_date: None,
        parent_id: None,
        tags: Vec::new(),
        blocked_by: Vec::new(),
        created_at: None,
        updated_at: None,
        body: String::new(),
    };

    let mut offset = 0;
    let mut lines = text.split_inclusive('\n').enumerate();

    // Opening delimiter, after any leading blank lines
    let open_line = loop {
        match lines.next() {
            Some((idx, line)) => {
                offset += line.len();
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                if trimmed != DELIMITER {
                    return Err(HeaderError::MissingOpen);
                }
                break idx + 1;
            }
            None => return Err(HeaderError::MissingOpen),
        }
    };

    let mut closed = false;
    for (idx, line) in lines.by_ref() {
        offset += line.len();
        let line_no = idx + 1;
        let trimmed = line.trim();
        if trimmed == DELIMITER {
            closed = true;
            break;
        }
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let (key, value) = trimmed
            .split_once(':')
            .ok_or(HeaderError::MalformedLine { line: line_no })?;
        let key = key.trim();
        if key.is_empty() || key.contains(char::is_whitespace) {
            return Err(HeaderError::MalformedLine { line: line_no });
        }
        apply_field(&mut parsed, key, value.trim())
            .map_err(|message| HeaderError::InvalidValue {
                line: line_no,
                key: key.to_string(),
                message,
            })?;
    }

    if !closed {
        return Err(HeaderError::Unclosed { line: open_line });
    }

    parsed.body = text[offset..].to_string();
    Ok(parsed)
}

fn apply_field(parsed: &mut ParsedNode, key: &str, raw: &str) -> Result<(), String> {
    match key {
        "id" => parsed.id = scalar(raw)?,
        "title" => parsed.title = scalar(raw)?,
        "mode" => {
            if let Some(value) = scalar(raw)? {
                parsed.mode = value.parse::<NodeMode>().map_err(|e| e.to_string())?;
            }
        }
        "status" => {
            if let Some(value) = scalar(raw)? {
                parsed.status = value.parse::<NodeStatus>().map_err(|e| e.to_string())?;
            }
        }
        "priority" => {
            if let Some(value) = scalar(raw)? {
                let n: i64 = value
                    .parse()
                    .map_err(|_| format!("'{}' is not a number", value))?;
                parsed.priority = u8::try_from(n)
                    .ok()
                    .and_then(Priority::new)
                    .ok_or_else(|| crate::model::InvalidPriority(n).to_string())?;
            }
        }
        "due_date" => {
            parsed.due_date = match scalar(raw)? {
                Some(value) => Some(parse_due(&value)?),
                None => None,
            }
        }
        "parent_id" => parsed.parent_id = scalar(raw)?,
        "tags" => parsed.tags = list(raw)?,
        "blocked_by" => parsed.blocked_by = list(raw)?,
        "created_at" => {
            parsed.created_at = match scalar(raw)? {
                Some(value) => Some(parse_instant(&value)?),
                None => None,
            }
        }
        "updated_at" => {
            parsed.updated_at = match scalar(raw)? {
                Some(value) => Some(parse_instant(&value)?),
                None => None,
            }
        }
        _ => {}
    }
    Ok(())
}

/// Empty, `null` and `~` read as absent; quoted values are JSON strings.
fn scalar(raw: &str) -> Result<Option<String>, String> {
    if raw.is_empty() || raw == "null" || raw == "~" {
        return Ok(None);
    }
    if raw.starts_with('"') {
        let value: String = serde_json::from_str(raw).map_err(|e| e.to_string())?;
        return Ok(Some(value));
    }
    Ok(Some(raw.to_string()))
}

/// A JSON string array, or a bare comma-separated list
fn list(raw: &str) -> Result<Vec<String>, String> {
    if raw.is_empty() || raw == "null" || raw == "~" {
        return Ok(Vec::new());
    }
    if raw.starts_with('[') {
        return serde_json::from_str(raw).map_err(|e| e.to_string());
    }
    Ok(raw
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect())
}

/// Accepts the storage format, minute precision, or a bare date (end of day).
pub fn parse_due(value: &str) -> Result<NaiveDateTime, String> {
    const FORMATS: &[&str] = &[
        DUE_FORMAT,
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%d %H:%M",
    ];
    let value = value.trim();
    for format in FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(value, format) {
            return Ok(dt);
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d")
        && let Some(dt) = date.and_hms_opt(23, 59, 0)
    {
        return Ok(dt);
    }
    Err(format!("'{}' is not a date or date-time", value))
}

fn parse_instant(value: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|_| format!("'{}' is not an RFC 3339 timestamp", value))
}
