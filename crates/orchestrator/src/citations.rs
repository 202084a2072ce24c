//! Citation marker validation against the assembled sources.

use regex_lite::Regex;
use std::collections::BTreeSet;
use std::sync::LazyLock;

/// `[Source 3]`, also `[Source 1, 4]` and `[source 2]`.
static MARKER: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?i)\[source\s+(\d+(?:\s*,\s*\d+)*)\]").ok());

/// Which source labels an answer cites, and which markers don't resolve.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CitationCheck {
    /// Labels that resolve to an assembled source, ascending.
    pub cited: Vec<usize>,
    /// Markers as written in the answer whose label has no source, in order of
    /// first appearance.
    pub unresolved: Vec<String>,
}

/// Check every marker in `answer` against labels `1..=source_count`.
///
/// The answer itself is never modified.
pub fn check_citations(answer: &str, source_count: usize) -> CitationCheck {
    let Some(re) = MARKER.as_ref() else {
        return CitationCheck::default();
    };

    let mut cited = BTreeSet::new();
    let mut unresolved: Vec<String> = Vec::new();

    for caps in re.captures_iter(answer) {
        let marker = caps.get(0).map(|m| m.as_str()).unwrap_or_default();
        let labels = caps.get(1).map(|m| m.as_str()).unwrap_or_default();

        let mut resolved = true;
        for label in labels.split(',').filter_map(|n| n.trim().parse::<usize>().ok()) {
            if (1..=source_count).contains(&label) {
                cited.insert(label);
            } else {
                resolved = false;
            }
        }

        if !resolved && !unresolved.iter().any(|u| u == marker) {
            unresolved.push(marker.to_string());
        }
    }

    CitationCheck {
        cited: cited.into_iter().collect(),
        unresolved,
    }
}
