//! Per-contributor baseline construction.

use std::collections::BTreeMap;

use chrono::{Datelike, Timelike};
use watchtower_types::{CommitRecord, ContributorProfile};

/// Sentinel ratio for contributors that never deleted a line.
pub const RATIO_SENTINEL: f64 = 999.0;

const WEEKDAYS: [&str; 7] = [
    "Sunday",
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
];

/// Mean and population standard deviation.
fn mean_and_stddev(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, variance.sqrt())
}

/// Build one baseline per contributor from a package's commit history.
///
/// Commits group by lowercased author email. Numeric baselines cover every
/// commit; the time histograms only count commits with a real timestamp,
/// and a contributor whose every timestamp is the epoch sentinel is dropped
/// entirely.
pub fn build_profiles(commits: &[CommitRecord]) -> Vec<ContributorProfile> {
    let mut groups: BTreeMap<String, Vec<&CommitRecord>> = BTreeMap::new();
    for commit in commits {
        groups
            .entry(commit.author_email.to_lowercase())
            .or_default()
            .push(commit);
    }

    let mut profiles = Vec::with_capacity(groups.len());

    for (email, group) in groups {
        let timed: Vec<&&CommitRecord> = group
            .iter()
            .filter(|c| !c.has_sentinel_timestamp())
            .collect();
        if timed.is_empty() {
            continue;
        }

        let added: Vec<f64> = group.iter().map(|c| c.lines_added as f64).collect();
        let deleted: Vec<f64> = group.iter().map(|c| c.lines_deleted as f64).collect();
        let files: Vec<f64> = group.iter().map(|c| c.files_changed_count as f64).collect();
        let msg_len: Vec<f64> = group.iter().map(|c| c.message.len() as f64).collect();

        let (avg_lines_added, stddev_lines_added) = mean_and_stddev(&added);
        let (avg_lines_deleted, stddev_lines_deleted) = mean_and_stddev(&deleted);
        let (avg_files_changed, stddev_files_changed) = mean_and_stddev(&files);
        let (avg_message_length, stddev_message_length) = mean_and_stddev(&msg_len);

        let total_added: u64 = group.iter().map(|c| c.lines_added).sum();
        let total_deleted: u64 = group.iter().map(|c| c.lines_deleted).sum();
        let insert_to_delete_ratio = if total_deleted == 0 {
            RATIO_SENTINEL
        } else {
            total_added as f64 / total_deleted as f64
        };

        let mut commit_time_histogram: BTreeMap<String, u64> =
            (0..24).map(|h| (format!("{h}:00"), 0)).collect();
        let mut typical_days_active: BTreeMap<String, u64> =
            WEEKDAYS.iter().map(|d| (d.to_string(), 0)).collect();
        let mut commit_time_heatmap = vec![vec![0u64; 24]; 7];

        for commit in &timed {
            let hour = commit.timestamp.hour() as usize;
            let day = commit.timestamp.weekday().num_days_from_sunday() as usize;
            *commit_time_histogram
                .get_mut(&format!("{hour}:00"))
                .expect("hour bucket") += 1;
            *typical_days_active
                .get_mut(WEEKDAYS[day])
                .expect("day bucket") += 1;
            commit_time_heatmap[day][hour] += 1;
        }

        let mut files_worked_on: BTreeMap<String, u64> = BTreeMap::new();
        for commit in &group {
            for path in &commit.files_changed {
                *files_worked_on.entry(path.clone()).or_insert(0) += 1;
            }
        }

        let first_commit_at = timed
            .iter()
            .map(|c| c.timestamp)
            .min()
            .expect("non-empty timed group");
        let last_commit_at = timed
            .iter()
            .map(|c| c.timestamp)
            .max()
            .expect("non-empty timed group");

        profiles.push(ContributorProfile {
            author_email: email,
            author_name: group[0].author_name.clone(),
            commit_count: group.len() as u64,
            avg_lines_added,
            stddev_lines_added,
            avg_lines_deleted,
            stddev_lines_deleted,
            avg_files_changed,
            stddev_files_changed,
            avg_message_length,
            stddev_message_length,
            insert_to_delete_ratio,
            commit_time_histogram,
            typical_days_active,
            commit_time_heatmap,
            files_worked_on,
            first_commit_at,
            last_commit_at,
        });
    }

    profiles
}
