//! Archive table-of-contents handling.
//!
//! A restore replays the archive in two passes. Materialized view refreshes
//! can fail when the data they select from is not reachable yet, so they go
//! last, in a pass whose failure is only a warning.

/// Marker of a table-of-contents entry that refreshes a materialized view.
const REFRESH_MARKER: &str = "MATERIALIZED VIEW DATA";

/// Table-of-contents entries split into the two restore passes, each in
/// original order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestorePlan {
    pub primary: Vec<String>,
    pub refresh: Vec<String>,
}

impl RestorePlan {
    /// Splits a `pg_restore --list` listing. Comment lines (starting with
    /// `;`) and blank lines are dropped.
    pub fn from_listing(listing: &str) -> Self {
        let entries: Vec<String> = listing
            .lines()
            .filter(|line| !line.trim().is_empty() && !is_comment(line))
            .map(str::to_string)
            .collect();
        partition_toc(&entries)
    }

    pub fn len(&self) -> usize {
        self.primary.len() + self.refresh.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn is_comment(line: &str) -> bool {
    line.starts_with(';')
}

fn is_refresh_entry(line: &str) -> bool {
    !is_comment(line) && line.to_uppercase().contains(REFRESH_MARKER)
}

/// Splits `lines` into the two passes, keeping each list in input order.
/// Comment lines stay with the primary pass, where `pg_restore` skips them.
pub fn partition_toc(lines: &[String]) -> RestorePlan {
    let (refresh, primary) = lines.iter().cloned().partition(|line| is_refresh_entry(line));
    RestorePlan { primary, refresh }
}

/// Renders entries as a `--use-list` file.
pub fn render_list(entries: &[String]) -> String {
    let mut out = entries.join("\n");
    out.push('\n');
    out
}
