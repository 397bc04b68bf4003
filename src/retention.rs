// src/retention.rs

//! Log retention sweep: delete log files older than a fixed horizon.
//!
//! Housekeeping only; the lifecycle controller never calls this.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::fs::FileSystem;

pub const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

/// Remove every file under `dir` (recursively) last modified more than
/// `max_age` before `now`. Returns the removed paths, sorted.
///
/// A missing directory is not an error. Files that cannot be inspected or
/// removed are logged and skipped.
pub fn prune_older_than(
    fs: &dyn FileSystem,
    dir: &Path,
    max_age: Duration,
    now: SystemTime,
) -> Result<Vec<PathBuf>> {
    if !fs.is_dir(dir) {
        debug!(dir = ?dir, "log directory does not exist; nothing to prune");
        return Ok(Vec::new());
    }

    let cutoff = now.checked_sub(max_age).unwrap_or(SystemTime::UNIX_EPOCH);
    let mut removed = Vec::new();
    let mut stack = vec![dir.to_path_buf()];

    while let Some(current) = stack.pop() {
        for entry in fs.read_dir(&current)? {
            if fs.is_dir(&entry) {
                stack.push(entry);
                continue;
            }

            let modified = match fs.modified(&entry) {
                Ok(m) => m,
                Err(e) => {
                    warn!(path = ?entry, error = %e, "cannot read mtime; skipping");
                    continue;
                }
            };
            if modified >= cutoff {
                continue;
            }

            match fs.remove_file(&entry) {
                Ok(()) => removed.push(entry),
                Err(e) => warn!(path = ?entry, error = %e, "failed to remove old log file"),
            }
        }
    }

    removed.sort();
    info!(dir = ?dir, removed = removed.len(), "log retention sweep finished");
    Ok(removed)
}

pub fn days(n: u32) -> Duration {
    Duration::from_secs(u64::from(n) * SECONDS_PER_DAY)
}
