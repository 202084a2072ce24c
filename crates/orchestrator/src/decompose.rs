//! Lenient parsing of a decomposition response into sub-query texts.

use regex_lite::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;

/// Upper bound on sub-queries taken from one response.
pub const MAX_SUB_QUERIES: usize = 4;

/// `- x`, `* x`, `• x`, `1. x`, `2) x`, `(3) x`
static LIST_MARKER: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^\s*(?:[-*•]\s*|(?:\d+[.)]|\(\d+\))\s+)").ok());

/// Extract up to [`MAX_SUB_QUERIES`] distinct sub-queries, one per line.
///
/// Bullets and numbering are stripped, then surrounding quotes and emphasis.
/// Blank lines and preamble lines ending in `:` are skipped. Duplicates are
/// compared case-insensitively and the first spelling wins.
pub fn parse_sub_queries(response: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();

    for line in response.lines() {
        let line = match LIST_MARKER.as_ref() {
            Some(re) => re.replace(line, "").into_owned(),
            None => line.to_string(),
        };
        let cleaned = line
            .trim()
            .trim_matches(|c: char| matches!(c, '"' | '\'' | '`' | '“' | '”' | '‘' | '’' | '*' | '_'))
            .trim();

        if cleaned.is_empty() || cleaned.ends_with(':') {
            continue;
        }
        if seen.insert(cleaned.to_lowercase()) {
            out.push(cleaned.to_string());
        }
        if out.len() == MAX_SUB_QUERIES {
            break;
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bulleted_list() {
        let parsed = parse_sub_queries("- refund policy product X\n* warranty length product X\n• return shipping cost");
        assert_eq!(
            parsed,
            vec![
                "refund policy product X",
                "warranty length product X",
                "return shipping cost"
            ]
        );
    }

    #[test]
    fn numbered_list_with_preamble() {
        let response = "Here are the sub-queries:\n\n1. What is the refund policy?\n2) How long is the warranty?\n(3) Are there exclusions?";
        assert_eq!(
            parse_sub_queries(response),
            vec![
                "What is the refund policy?",
                "How long is the warranty?",
                "Are there exclusions?"
            ]
        );
    }

    #[test]
    fn quotes_and_emphasis_are_stripped() {
        let parsed = parse_sub_queries("- \"rust async runtime\"\n- **tokio vs async-std**\n- 'smol executor'");
        assert_eq!(parsed, vec!["rust async runtime", "tokio vs async-std", "smol executor"]);
    }

    #[test]
    fn duplicates_removed_and_capped_at_four() {
        let response = "- a query\n- A Query\n- b\n- c\n- d\n- e";
        assert_eq!(parse_sub_queries(response), vec!["a query", "b", "c", "d"]);
    }

    #[test]
    fn plain_lines_are_accepted() {
        assert_eq!(parse_sub_queries("first\nsecond"), vec!["first", "second"]);
    }

    #[test]
    fn numbers_inside_text_are_kept() {
        assert_eq!(parse_sub_queries("2024 revenue growth"), vec!["2024 revenue growth"]);
    }

    #[test]
    fn empty_or_preamble_only_yields_nothing() {
        assert!(parse_sub_queries("").is_empty());
        assert!(parse_sub_queries("\n  \nSub-queries:\n").is_empty());
    }
}
