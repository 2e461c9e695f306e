use std::ops::Range;

use regex::{Regex, RegexBuilder};
use serde::Serialize;

use crate::model::node::{Node, NodeMode, NodeStatus};
use crate::model::view::NodeView;

/// Which field of a node matched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchField {
    Title,
    Content,
    Tag,
}

#[derive(Debug, Clone, Default)]
pub struct SearchQuery {
    /// Literal text, matched case-insensitively
    pub text: String,
    pub mode: Option<NodeMode>,
    pub status: Option<NodeStatus>,
    pub limit: Option<usize>,
}

impl SearchQuery {
    pub fn new(text: impl Into<String>) -> Self {
        SearchQuery {
            text: text.into(),
            ..Default::default()
        }
    }
}

/// A node that matched, with where it matched
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    #[serde(flatten)]
    pub view: NodeView,
    pub matched: Vec<MatchField>,
    /// The content line holding the first content match
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
}

/// Case-insensitive literal matcher for a query string.
/// Returns None for a blank query.
pub fn build_matcher(text: &str) -> Option<Regex> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    RegexBuilder::new(&regex::escape(text))
        .case_insensitive(true)
        .build()
        .ok()
}

/// Collect all non-overlapping match byte-ranges for a regex in the given text.
pub fn find_matches(re: &Regex, text: &str) -> Vec<Range<usize>> {
    re.find_iter(text).map(|m| m.start()..m.end()).collect()
}

/// Match one node against the query's text and filters.
pub fn match_node(re: &Regex, query: &SearchQuery, node: &Node) -> Option<(Vec<MatchField>, Option<String>)> {
    if query.mode.is_some_and(|m| node.mode != m) {
        return None;
    }
    if query.status.is_some_and(|s| node.status != s) {
        return None;
    }

    let mut matched = Vec::new();
    if re.is_match(&node.title) {
        matched.push(MatchField::Title);
    }
    let snippet = find_matches(re, &node.content)
        .first()
        .map(|span| line_around(&node.content, span.start));
    if snippet.is_some() {
        matched.push(MatchField::Content);
    }
    if node.tags.iter().any(|t| re.is_match(t)) {
        matched.push(MatchField::Tag);
    }

    (!matched.is_empty()).then_some((matched, snippet))
}

fn line_around(text: &str, offset: usize) -> String {
    let start = text[..offset].rfind('\n').map_or(0, |i| i + 1);
    let end = text[offset..].find('\n').map_or(text.len(), |i| offset + i);
    text[start..end].trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::node::Priority;
    use chrono::Utc;

    fn node(title: &str, content: &str, tags: &[&str]) -> Node {
        Node {
            id: "n".into(),
            title: title.into(),
            mode: NodeMode::Task,
            status: NodeStatus::Todo,
            priority: Priority::DEFAULT,
            due_date: None,
            parent_id: None,
            tags: tags.iter().map(|t| t.to_string()).collect(),
            content: content.into(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn blank_query_builds_nothing() {
        assert!(build_matcher("   ").is_none());
    }

    #[test]
    fn matches_are_literal_and_case_insensitive() {
        let re = build_matcher("C++ (draft)").unwrap();
        let n = node("Learn c++ (DRAFT)", "", &[]);
        let (fields, snippet) = match_node(&re, &SearchQuery::default(), &n).unwrap();
        assert_eq!(fields, vec![MatchField::Title]);
        assert_eq!(snippet, None);
        assert!(match_node(&re, &SearchQuery::default(), &node("C plus", "", &[])).is_none());
    }

    #[test]
    fn content_match_yields_snippet() {
        let re = build_matcher("milk").unwrap();
        let n = node("Groceries", "eggs\n  oat Milk, 2l  \nbread", &["milk-run"]);
        let (fields, snippet) = match_node(&re, &SearchQuery::default(), &n).unwrap();
        assert_eq!(fields, vec![MatchField::Content, MatchField::Tag]);
        assert_eq!(snippet.as_deref(), Some("oat Milk, 2l"));
    }

    #[test]
    fn filters_apply_before_matching() {
        let re = build_matcher("plan").unwrap();
        let n = node("Plan", "", &[]);
        let query = SearchQuery {
            text: "plan".into(),
            mode: Some(NodeMode::Note),
            ..Default::default()
        };
        assert!(match_node(&re, &query, &n).is_none());
        let query = SearchQuery {
            status: Some(NodeStatus::Todo),
            ..query
        };
        assert!(match_node(&re, &SearchQuery { mode: None, ..query }, &n).is_some());
    }
}
