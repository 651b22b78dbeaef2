//! Prompt trimming for hosts that render world info before admission runs.
//!
//! Dropped entries' text is cut out of the rendered prompt by literal
//! matching. Whitespace left behind is tidied: trailing spaces and tabs
//! before a line break are stripped and runs of blank lines collapse to one.
//! `\r\n` line endings are kept as they are.
//! Leading indentation is left alone.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use tracing::warn;

use crate::entry::Entry;

static TRAILING_BLANKS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[ \t]+(\r?\n)").expect("static regex"));
static EXCESS_NEWLINES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\r?\n){3,}").expect("static regex"));

/// How many times one dropped entry's content was cut.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Removal {
    pub uid: Option<u64>,
    pub group: Option<String>,
    pub occurrences: usize,
}

/// Per-entry removal counts from [`trim_with_report`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TrimReport {
    pub removals: Vec<Removal>,
}

impl TrimReport {
    pub fn total(&self) -> usize {
        self.removals.iter().map(|r| r.occurrences).sum()
    }

    /// Entries whose content appeared more than once in the prompt.
    pub fn ambiguous(&self) -> impl Iterator<Item = &Removal> {
        self.removals.iter().filter(|r| r.occurrences > 1)
    }
}

/// Remove dropped entries' content from a rendered prompt.
pub fn trim(rendered: &str, dropped: &[Entry]) -> String {
    trim_with_report(rendered, dropped).0
}

/// Like [`trim`], also reporting what was removed.
pub fn trim_with_report(rendered: &str, dropped: &[Entry]) -> (String, TrimReport) {
    let mut report = TrimReport::default();
    if dropped.is_empty() {
        return (rendered.to_string(), report);
    }

    let mut text = rendered.to_string();
    for entry in dropped.iter().filter(|e| !e.content.is_empty()) {
        let occurrences = text.matches(entry.content.as_str()).count();
        if occurrences == 0 {
            continue;
        }
        if occurrences > 1 {
            warn!(
                group = ?entry.group_name(),
                uid = ?entry.uid,
                occurrences,
                "dropped entry text appears more than once; removing every copy"
            );
        }
        text = text.replace(entry.content.as_str(), "");
        report.removals.push(Removal {
            uid: entry.uid,
            group: entry.group_name().map(str::to_string),
            occurrences,
        });
    }

    if report.total() > 0 {
        let stripped = TRAILING_BLANKS.replace_all(&text, "$1");
        text = EXCESS_NEWLINES.replace_all(&stripped, "${1}${1}").into_owned();
    }

    (text, report)
}
