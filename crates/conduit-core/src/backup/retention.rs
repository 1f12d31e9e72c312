//! Timestamped archive names and the retention sweep.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use jiff::civil::DateTime;
use log::info;

use crate::error::{FsResultExt, Result};

const ARCHIVE_PREFIX: &str = "database-";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d-%H-%M-%S";

/// `database-<YYYY-MM-DD-HH-MM-SS>` for `at`.
pub fn archive_stem(at: DateTime) -> String {
    format!("{ARCHIVE_PREFIX}{}", at.strftime(TIMESTAMP_FORMAT))
}

/// Timestamp embedded in a retained archive's file name, for `.dump` and
/// `.sql` files only.
pub fn archive_timestamp(file_name: &str) -> Option<DateTime> {
    let stem = file_name
        .strip_suffix(".dump")
        .or_else(|| file_name.strip_suffix(".sql"))?;
    let stamp = stem.strip_prefix(ARCHIVE_PREFIX)?;
    DateTime::strptime(TIMESTAMP_FORMAT, stamp).ok()
}

/// Keeps the newest `max` archive pairs in `dir` and deletes the rest, both
/// files of a pair together. Returns the removed paths.
pub fn trim_backups(dir: &Path, max: usize) -> Result<Vec<PathBuf>> {
    let mut by_timestamp: BTreeMap<DateTime, Vec<PathBuf>> = BTreeMap::new();
    for entry in std::fs::read_dir(dir).fs_context(dir)? {
        let entry = entry.fs_context(dir)?;
        let name = entry.file_name();
        if let Some(stamp) = archive_timestamp(&name.to_string_lossy()) {
            by_timestamp.entry(stamp).or_default().push(entry.path());
        }
    }

    let mut removed = Vec::new();
    let excess = by_timestamp.len().saturating_sub(max);
    for (_, paths) in by_timestamp.into_iter().take(excess) {
        for path in paths {
            std::fs::remove_file(&path).fs_context(&path)?;
            info!("removed old backup {}", path.display());
            removed.push(path);
        }
    }
    Ok(removed)
}
