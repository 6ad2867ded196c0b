//! Source-repository access via the `git` binary.
//!
//! Clones are always shallow and always land in a caller-owned temp
//! directory; this module never cleans up after itself. Partial clones left
//! by a failed tag attempt are removed before the next attempt so the
//! destination is reusable.

use std::path::Path;
use std::process::Command;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::debug;
use watchtower_types::CommitRecord;

use crate::RegistryError;

/// History depth for full-package commit extraction.
pub const HISTORY_DEPTH: u32 = 100;

/// Maximum commits parsed out of a cloned history.
pub const MAX_COMMITS: usize = 100;

const COMMIT_MARKER: &str = "@@commit@@";
const FIELD_SEP: char = '\u{1f}';

fn run_git(args: &[&str], cwd: Option<&Path>) -> Result<String, RegistryError> {
    let mut command = Command::new("git");
    command.args(args);
    if let Some(dir) = cwd {
        command.current_dir(dir);
    }

    let started = Instant::now();
    let output = command.output().map_err(|e| RegistryError::Git {
        operation: args.first().unwrap_or(&"git").to_string(),
        detail: format!("failed to spawn git: {e}"),
    })?;
    debug!(
        args = ?args,
        elapsed_ms = started.elapsed().as_millis() as u64,
        success = output.status.success(),
        "git finished"
    );

    if !output.status.success() {
        return Err(RegistryError::Git {
            operation: args.first().unwrap_or(&"git").to_string(),
            detail: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

/// Shallow-clone a single tag into `dest`. `dest` must not exist yet; it is
/// removed again on failure so the caller can retry with another tag.
pub fn shallow_clone_tag(url: &str, tag: &str, dest: &Path) -> Result<(), RegistryError> {
    let dest_str = dest.to_string_lossy().to_string();
    let result = run_git(
        &[
            "clone",
            "--depth",
            "1",
            "--branch",
            tag,
            "--quiet",
            url,
            &dest_str,
        ],
        None,
    );

    if result.is_err() && dest.exists() {
        let _ = std::fs::remove_dir_all(dest);
    }
    result.map(|_| ())
}

/// Clone the release tag for `version`, trying `v{version}` then
/// `{version}`. Returns the tag that matched, or `None` when neither tag
/// exists on the remote.
pub fn clone_version_tag(
    url: &str,
    version: &str,
    dest: &Path,
) -> Result<Option<String>, RegistryError> {
    for tag in [format!("v{version}"), version.to_string()] {
        match shallow_clone_tag(url, &tag, dest) {
            Ok(()) => return Ok(Some(tag)),
            Err(RegistryError::Git { detail, .. }) => {
                debug!(url, tag, detail, "tag clone attempt failed");
            }
            Err(other) => return Err(other),
        }
    }
    Ok(None)
}

/// Clone recent history (default branch, depth [`HISTORY_DEPTH`]) for
/// commit extraction.
pub fn clone_history(url: &str, dest: &Path) -> Result<(), RegistryError> {
    let dest_str = dest.to_string_lossy().to_string();
    let depth = HISTORY_DEPTH.to_string();
    let result = run_git(
        &["clone", "--depth", &depth, "--quiet", url, &dest_str],
        None,
    );
    if result.is_err() && dest.exists() {
        let _ = std::fs::remove_dir_all(dest);
    }
    result.map(|_| ())
}

/// Read up to `max` commits from a cloned repository.
pub fn read_commit_log(repo_dir: &Path, max: usize) -> Result<Vec<CommitRecord>, RegistryError> {
    let max_count = format!("--max-count={max}");
    let format = format!(
        "--pretty=format:{COMMIT_MARKER}%H{FIELD_SEP}%ae{FIELD_SEP}%an{FIELD_SEP}%at{FIELD_SEP}%s"
    );
    let stdout = run_git(
        &["log", &max_count, &format, "--numstat", "--no-renames"],
        Some(repo_dir),
    )?;
    Ok(parse_commit_log(&stdout))
}

/// Parse `git log --pretty=<marker format> --numstat` output.
///
/// Binary-file numstat entries report `-` for both counts and contribute
/// zero lines but still count as touched files. An unparseable author
/// timestamp becomes the epoch sentinel, which profiling skips.
pub fn parse_commit_log(stdout: &str) -> Vec<CommitRecord> {
    let mut commits = Vec::new();

    for chunk in stdout.split(COMMIT_MARKER).skip(1) {
        let mut lines = chunk.lines();
        let Some(header) = lines.next() else {
            continue;
        };
        let fields: Vec<&str> = header.split(FIELD_SEP).collect();
        if fields.len() != 5 {
            continue;
        }

        let timestamp = fields[3]
            .parse::<i64>()
            .ok()
            .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
            .unwrap_or_else(|| DateTime::<Utc>::from_timestamp(0, 0).expect("epoch"));

        let mut lines_added = 0u64;
        let mut lines_deleted = 0u64;
        let mut files_changed = Vec::new();

        for line in lines {
            let line = line.trim_end();
            if line.is_empty() {
                continue;
            }
            let mut parts = line.splitn(3, '\t');
            let (Some(added), Some(deleted), Some(path)) =
                (parts.next(), parts.next(), parts.next())
            else {
                continue;
            };
            lines_added += added.parse::<u64>().unwrap_or(0);
            lines_deleted += deleted.parse::<u64>().unwrap_or(0);
            files_changed.push(path.to_string());
        }

        commits.push(CommitRecord {
            sha: fields[0].to_string(),
            author_email: fields[1].to_lowercase(),
            author_name: fields[2].to_string(),
            message: fields[4].to_string(),
            timestamp,
            lines_added,
            lines_deleted,
            files_changed_count: files_changed.len() as u64,
            files_changed,
        });
    }

    commits
}
