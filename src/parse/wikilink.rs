use std::sync::LazyLock;

use regex::Regex;

static WIKILINK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[\[([^\[\]\n]+)\]\]").unwrap());

/// Titles referenced as `[[Title]]`, trimmed, first occurrence wins
/// (case-insensitive).
pub fn extract_wikilinks(content: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for caps in WIKILINK_RE.captures_iter(content) {
        // `[[Title|label]]` links to Title
        let target = caps[1].split('|').next().unwrap_or("").trim();
        if target.is_empty() {
            continue;
        }
        let key = target.to_lowercase();
        if !out.iter().any(|t| t.to_lowercase() == key) {
            out.push(target.to_string());
        }
    }
    out
}

/// Whether `content` links to a node titled `title`
pub fn links_to(content: &str, title: &str) -> bool {
    let title = title.trim().to_lowercase();
    !title.is_empty()
        && extract_wikilinks(content)
            .iter()
            .any(|t| t.to_lowercase() == title)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_unique_targets() {
        let text = "See [[Plan]] and [[ plan ]], then [[Budget|the budget]]. [[]] [not]";
        assert_eq!(extract_wikilinks(text), vec!["Plan", "Budget"]);
    }

    #[test]
    fn links_to_is_case_insensitive() {
        assert!(links_to("ref [[Weekly Review]]", "weekly review"));
        assert!(!links_to("ref [[Weekly]]", "weekly review"));
        assert!(!links_to("[[x]]", "  "));
    }
}
