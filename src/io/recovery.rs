use std::fmt;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use tempfile::NamedTempFile;

/// Default number of days before entries are prunable.
pub const PRUNE_AGE_DAYS: i64 = 30;

/// Written at the top of a new recovery log.
const FILE_HEADER: &str = "\
<!-- tasknotes recovery log
     Content that could not be written and node files that were skipped.
     View with: tn recovery
     Prune old entries: tn recovery prune
     Safe to delete once reviewed. -->

---
";

// ---------------------------------------------------------------------------
// Data types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryCategory {
    /// A node file whose header could not be read
    Parser,
    /// A node file that could not be written
    Write,
    /// A delete whose file could not be moved into the archive
    Archive,
    /// A stale external edit overwritten from the index
    Conflict,
}

impl RecoveryCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            RecoveryCategory::Parser => "parser",
            RecoveryCategory::Write => "write",
            RecoveryCategory::Archive => "archive",
            RecoveryCategory::Conflict => "conflict",
        }
    }

    pub fn parse_category(s: &str) -> Option<Self> {
        match s {
            "parser" => Some(RecoveryCategory::Parser),
            "write" => Some(RecoveryCategory::Write),
            "archive" => Some(RecoveryCategory::Archive),
            "conflict" => Some(RecoveryCategory::Conflict),
            _ => None,
        }
    }
}

impl fmt::Display for RecoveryCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct RecoveryEntry {
    pub timestamp: DateTime<Utc>,
    pub category: RecoveryCategory,
    pub description: String,
    pub fields: Vec<(String, String)>,
    pub body: String,
}

impl RecoveryEntry {
    pub fn new(category: RecoveryCategory, description: impl Into<String>) -> Self {
        RecoveryEntry {
            timestamp: Utc::now(),
            category,
            description: description.into(),
            fields: Vec::new(),
            body: String::new(),
        }
    }

    pub fn field(mut self, key: &str, value: impl fmt::Display) -> Self {
        self.fields.push((key.to_string(), value.to_string()));
        self
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }
}

pub fn recovery_log_path(root: &Path) -> PathBuf {
    root.join(".recovery.log")
}

// ---------------------------------------------------------------------------
// Atomic file write
// ---------------------------------------------------------------------------

/// Write `content` to `path` atomically using a temp file + rename.
pub fn atomic_write(path: &Path, content: &[u8]) -> io::Result<()> {
    let dir = path.parent().unwrap_or(Path::new("."));
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(content)?;
    tmp.flush()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Writing entries
// ---------------------------------------------------------------------------

impl RecoveryEntry {
    /// Markdown block: `## <timestamp> <category>: <description>`, fields,
    /// fenced body, `---` separator.
    fn to_markdown(&self) -> String {
        let mut out = format!(
            "## {} {}: {}\n\n",
            self.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
            self.category,
            self.description,
        );
        for (key, value) in &self.fields {
            out.push_str(&format!("{}: {}\n", key, value));
        }
        if !self.body.is_empty() {
            out.push_str("\n```text\n");
            out.push_str(&self.body);
            if !self.body.ends_with('\n') {
                out.push('\n');
            }
            out.push_str("```\n");
        }
        out.push_str("\n---\n");
        out
    }

    pub fn to_json(&self) -> serde_json::Value {
        let fields: serde_json::Map<String, serde_json::Value> = self
            .fields
            .iter()
            .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
            .collect();
        serde_json::json!({
            "timestamp": self.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
            "category": self.category.as_str(),
            "description": self.description,
            "fields": fields,
            "body": self.body,
        })
    }

    pub fn to_display_markdown(&self) -> String {
        self.to_markdown()
    }
}

/// Append an entry to the log. A failure to log is reported and swallowed.
pub fn log_recovery(root: &Path, entry: RecoveryEntry) {
    if let Err(e) = append_entry(root, &entry) {
        tracing::warn!(error = %e, "could not write to recovery log");
    }
}

fn append_entry(root: &Path, entry: &RecoveryEntry) -> io::Result<()> {
    append_to_log(&recovery_log_path(root), Some(FILE_HEADER), &entry.to_markdown())
}

/// Append `text` to a vault log file, starting a new or empty file with
/// `header`.
pub(crate) fn append_to_log(path: &Path, header: Option<&str>, text: &str) -> io::Result<()> {
    let needs_header = std::fs::metadata(path).map_or(true, |m| m.len() == 0);
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    if needs_header && let Some(header) = header {
        file.write_all(header.as_bytes())?;
    }
    file.write_all(text.as_bytes())
}

/// Record a node file that was skipped because its header is malformed.
pub fn log_parse_failure(root: &Path, file: &Path, error: &dyn fmt::Display, text: &str) {
    log_recovery(
        root,
        RecoveryEntry::new(RecoveryCategory::Parser, "skipped malformed node file")
            .field("Source", file.display())
            .field("Error", error)
            .body(text),
    );
}

/// Record content that failed to reach disk so the edit is not lost.
pub fn log_write_failure(root: &Path, file: &Path, error: &io::Error, content: &str) {
    log_recovery(
        root,
        RecoveryEntry::new(RecoveryCategory::Write, "node write failed")
            .field("Target", file.display())
            .field("Error", error)
            .body(content),
    );
}

// ---------------------------------------------------------------------------
// Reading entries
// ---------------------------------------------------------------------------

/// Entries from the log, most recent first.
pub fn read_recovery_entries(root: &Path, limit: Option<usize>) -> Vec<RecoveryEntry> {
    let content = match std::fs::read_to_string(recovery_log_path(root)) {
        Ok(c) => c,
        Err(_) => return Vec::new(),
    };
    let mut entries = parse_entries(&content);
    if let Some(n) = limit {
        let skip = entries.len().saturating_sub(n);
        entries.drain(..skip);
    }
    entries.reverse();
    entries
}

fn parse_entries(content: &str) -> Vec<RecoveryEntry> {
    let mut entries = Vec::new();
    let mut lines = content.lines();

    while let Some(line) = lines.next() {
        let Some((timestamp, category, description)) =
            line.strip_prefix("## ").and_then(parse_entry_header)
        else {
            continue;
        };

        let mut fields = Vec::new();
        let mut body = String::new();
        let mut in_code_block = false;

        for line in lines.by_ref() {
            if in_code_block {
                if line == "```" {
                    in_code_block = false;
                } else {
                    if !body.is_empty() {
                        body.push('\n');
                    }
                    body.push_str(line);
                }
                continue;
            }
            if line == "---" {
                break;
            }
            if line.starts_with("```") {
                in_code_block = true;
                continue;
            }
            if let Some((key, value)) = line.trim().split_once(": ") {
                fields.push((key.to_string(), value.to_string()));
            }
        }

        entries.push(RecoveryEntry {
            timestamp,
            category,
            description,
            fields,
            body,
        });
    }

    entries
}

fn parse_entry_header(header: &str) -> Option<(DateTime<Utc>, RecoveryCategory, String)> {
    let (timestamp, rest) = header.split_once(' ')?;
    let timestamp = DateTime::parse_from_rfc3339(timestamp).ok()?.with_timezone(&Utc);
    let (category, description) = rest.split_once(": ")?;
    let category = RecoveryCategory::parse_category(category)?;
    Some((timestamp, category, description.to_string()))
}

// ---------------------------------------------------------------------------
// Pruning
// ---------------------------------------------------------------------------

/// Drop entries older than `before` (default: PRUNE_AGE_DAYS ago), or all of
/// them. Returns the number removed.
pub fn prune_recovery(root: &Path, before: Option<DateTime<Utc>>, all: bool) -> io::Result<usize> {
    let path = recovery_log_path(root);
    if !path.exists() {
        return Ok(0);
    }
    let content = std::fs::read_to_string(&path)?;
    let entries = parse_entries(&content);

    let cutoff = before.unwrap_or_else(|| Utc::now() - chrono::Duration::days(PRUNE_AGE_DAYS));
    let kept: Vec<&RecoveryEntry> = if all {
        Vec::new()
    } else {
        entries.iter().filter(|e| e.timestamp >= cutoff).collect()
    };

    let mut out = FILE_HEADER.to_string();
    for entry in &kept {
        out.push_str(&entry.to_markdown());
    }
    atomic_write(&path, out.as_bytes())?;
    Ok(entries.len() - kept.len())
}
