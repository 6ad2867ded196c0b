//! Scoring commits against their author's baseline.
//!
//! Each factor is additive and independent; a factor contributes nothing
//! when its baseline is degenerate (zero stddev, empty histogram, sentinel
//! ratio). Only commits with a positive total score surface as anomalies.

use std::collections::HashMap;

use chrono::Timelike;
use tracing::warn;
use watchtower_types::{AnomalyFactor, CommitAnomaly, CommitRecord, ContributorProfile};

use crate::profile::RATIO_SENTINEL;

const POINTS_STRONG_DEVIATION: u32 = 15;
const POINTS_MILD_DEVIATION: u32 = 10;
const POINTS_MESSAGE_LENGTH: u32 = 5;
const POINTS_RATIO_SHIFT: u32 = 5;
const POINTS_ABNORMAL_TIME: u32 = 5;
const POINTS_ABNORMAL_DAY: u32 = 5;
const POINTS_PER_NEW_FILE: u32 = 10;
const NEW_FILE_CAP: usize = 3;

/// Fraction of a contributor's commits at a given hour below which the hour
/// counts as abnormal.
const RARE_HOUR_FRACTION: f64 = 0.05;
/// Same threshold for weekdays.
const RARE_DAY_FRACTION: f64 = 0.10;

fn z_score(observed: f64, mean: f64, stddev: f64) -> Option<f64> {
    if stddev <= 0.0 {
        return None;
    }
    Some((observed - mean) / stddev)
}

fn deviation_points(z: f64) -> Option<u32> {
    if z >= 3.0 {
        Some(POINTS_STRONG_DEVIATION)
    } else if z >= 2.0 {
        Some(POINTS_MILD_DEVIATION)
    } else {
        None
    }
}

fn score_commit(commit: &CommitRecord, profile: &ContributorProfile) -> Vec<AnomalyFactor> {
    let mut factors = Vec::new();

    // Files changed vs baseline.
    if let Some(z) = z_score(
        commit.files_changed_count as f64,
        profile.avg_files_changed,
        profile.stddev_files_changed,
    ) {
        if let Some(points) = deviation_points(z) {
            factors.push(AnomalyFactor {
                factor: "files_changed".to_string(),
                points,
                reason: format!(
                    "{} files changed vs baseline {:.1} (stddev {:.1})",
                    commit.files_changed_count,
                    profile.avg_files_changed,
                    profile.stddev_files_changed
                ),
            });
        }
    }

    // Combined line churn vs the combined baseline spread.
    let churn = (commit.lines_added + commit.lines_deleted) as f64;
    let churn_mean = profile.avg_lines_added + profile.avg_lines_deleted;
    let churn_stddev = (profile.stddev_lines_added.powi(2)
        + profile.stddev_lines_deleted.powi(2))
    .sqrt();
    if let Some(z) = z_score(churn, churn_mean, churn_stddev) {
        if let Some(points) = deviation_points(z) {
            factors.push(AnomalyFactor {
                factor: "lines_changed".to_string(),
                points,
                reason: format!(
                    "{churn:.0} lines changed vs baseline {churn_mean:.1} (stddev {churn_stddev:.1})"
                ),
            });
        }
    }

    // Unusually long or short commit message.
    if let Some(z) = z_score(
        commit.message.len() as f64,
        profile.avg_message_length,
        profile.stddev_message_length,
    ) {
        if z.abs() >= 2.0 {
            factors.push(AnomalyFactor {
                factor: "message_length".to_string(),
                points: POINTS_MESSAGE_LENGTH,
                reason: format!(
                    "message length {} vs baseline {:.1} (stddev {:.1})",
                    commit.message.len(),
                    profile.avg_message_length,
                    profile.stddev_message_length
                ),
            });
        }
    }

    // Insert/delete ratio shift. Skipped when the commit deletes nothing or
    // the baseline carries the sentinel.
    if commit.lines_deleted > 0
        && profile.insert_to_delete_ratio != RATIO_SENTINEL
        && profile.insert_to_delete_ratio > 0.0
    {
        let commit_ratio = commit.lines_added as f64 / commit.lines_deleted as f64;
        let shift =
            (commit_ratio - profile.insert_to_delete_ratio).abs() / profile.insert_to_delete_ratio;
        if shift > 0.5 {
            factors.push(AnomalyFactor {
                factor: "insert_delete_ratio".to_string(),
                points: POINTS_RATIO_SHIFT,
                reason: format!(
                    "insert/delete ratio {commit_ratio:.2} vs baseline {:.2}",
                    profile.insert_to_delete_ratio
                ),
            });
        }
    }

    // Time-of-day and day-of-week rarity, only for commits with a real
    // timestamp.
    if !commit.has_sentinel_timestamp() {
        let timed_total: u64 = profile.commit_time_histogram.values().sum();
        if timed_total > 0 {
            let hour_key = format!("{}:00", commit.timestamp.hour());
            let hour_count = profile
                .commit_time_histogram
                .get(&hour_key)
                .copied()
                .unwrap_or(0);
            if (hour_count as f64) / (timed_total as f64) < RARE_HOUR_FRACTION {
                factors.push(AnomalyFactor {
                    factor: "abnormal_time".to_string(),
                    points: POINTS_ABNORMAL_TIME,
                    reason: format!(
                        "{hour_key} accounts for {hour_count} of {timed_total} commits"
                    ),
                });
            }

            let day_key = commit.timestamp.format("%A").to_string();
            let day_count = profile
                .typical_days_active
                .get(&day_key)
                .copied()
                .unwrap_or(0);
            if (day_count as f64) / (timed_total as f64) < RARE_DAY_FRACTION {
                factors.push(AnomalyFactor {
                    factor: "abnormal_day".to_string(),
                    points: POINTS_ABNORMAL_DAY,
                    reason: format!("{day_key} accounts for {day_count} of {timed_total} commits"),
                });
            }
        }
    }

    // Files never touched before, capped.
    let new_files: Vec<&String> = commit
        .files_changed
        .iter()
        .filter(|path| !profile.files_worked_on.contains_key(*path))
        .collect();
    if !new_files.is_empty() {
        let counted = new_files.len().min(NEW_FILE_CAP);
        let sample: Vec<&str> = new_files
            .iter()
            .take(NEW_FILE_CAP)
            .map(|s| s.as_str())
            .collect();
        factors.push(AnomalyFactor {
            factor: "new_files".to_string(),
            points: POINTS_PER_NEW_FILE * counted as u32,
            reason: format!(
                "{} previously untouched file(s): {}",
                new_files.len(),
                sample.join(", ")
            ),
        });
    }

    factors
}

/// Score every commit against its author's profile.
///
/// Commits whose author has no profile are skipped with a warning; commits
/// that accumulate no points are not emitted.
pub fn score_commits(
    commits: &[CommitRecord],
    profiles: &[ContributorProfile],
) -> Vec<CommitAnomaly> {
    let by_email: HashMap<&str, &ContributorProfile> = profiles
        .iter()
        .map(|p| (p.author_email.as_str(), p))
        .collect();

    let mut anomalies = Vec::new();

    for commit in commits {
        let email = commit.author_email.to_lowercase();
        let Some(profile) = by_email.get(email.as_str()) else {
            warn!(sha = %commit.sha, author = %email, "no profile for commit author, skipping");
            continue;
        };

        let factors = score_commit(commit, profile);
        let anomaly_score: u32 = factors.iter().map(|f| f.points).sum();
        if anomaly_score > 0 {
            anomalies.push(CommitAnomaly {
                commit_sha: commit.sha.clone(),
                author_email: email,
                anomaly_score,
                factors,
            });
        }
    }

    anomalies
}
