//! # Types
//!
//! Core domain types for Watchtower, shared by the analyzer, profiler,
//! storage gateway, auto-bump orchestrator, and the worker loop:
//!
//! - [`CheckStatus`] / [`VersionAnalysis`] - per-version check verdicts
//! - [`CommitRecord`] / [`ContributorProfile`] / [`CommitAnomaly`] - commit
//!   history and behavioral baselines
//! - [`WatchlistRow`] / [`CandidateProject`] / [`Vulnerability`] - auto-bump
//!   inputs
//! - [`NewVersionJob`] / [`PackageAnalysisJob`] / [`BatchVersionAnalysisJob`] -
//!   queue payloads, with [`decode_message`] accepting both the
//!   serialized-string and the structured arrival shape
//!
//! ## Serialization
//!
//! Everything that crosses a queue or a store boundary implements `Serialize`
//! and `Deserialize`. Status enums serialize as `snake_case` strings; the
//! package-analysis payload keeps its historical `camelCase` field names on
//! the wire.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;

/// Outcome of a single per-version check.
///
/// Statuses order by severity: `Pass` < `Warning` < `Fail`. A `Warning` or
/// `Fail` status is always accompanied by a human-readable reason when
/// persisted; the reason is advisory and must never be parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    /// No findings.
    Pass,
    /// Findings that warrant a look but do not block auto-bump.
    Warning,
    /// Findings that block auto-bump for this version.
    Fail,
}

impl CheckStatus {
    /// True for [`CheckStatus::Fail`].
    pub fn is_fail(self) -> bool {
        matches!(self, CheckStatus::Fail)
    }
}

impl std::fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CheckStatus::Pass => "pass",
            CheckStatus::Warning => "warning",
            CheckStatus::Fail => "fail",
        };
        f.write_str(s)
    }
}

/// Lifecycle status of a watched package row.
///
/// Owned exclusively by the dispatcher; transitions are
/// `pending -> analyzing -> ready | error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchedPackageStatus {
    Pending,
    Analyzing,
    Ready,
    Error,
}

impl std::fmt::Display for WatchedPackageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            WatchedPackageStatus::Pending => "pending",
            WatchedPackageStatus::Analyzing => "analyzing",
            WatchedPackageStatus::Ready => "ready",
            WatchedPackageStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// Findings of the registry-vs-source integrity check.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IntegrityFindings {
    /// Canonical source URL the published artifact was compared against.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    /// Tag that was actually cloned for the comparison (e.g. `v4.18.0`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compared_tag: Option<String>,
    /// Files present only in the published artifact that do not look like
    /// build output. Any entry here fails the check.
    pub suspicious_files: Vec<String>,
    /// Files present only in the published artifact that look like build
    /// output (bundles, minified entrypoints, docs).
    pub build_artifact_files: Vec<String>,
    /// Files present in both trees whose content differs.
    pub modified_files: Vec<String>,
}

/// Findings of the install-script capability check.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScriptFindings {
    /// Lifecycle hook name -> command string, for every hook present.
    pub hooks: BTreeMap<String, String>,
    /// Commands matching the network pattern family.
    pub network_hits: Vec<String>,
    /// Commands matching the shell-execution pattern family.
    pub shell_hits: Vec<String>,
    /// Commands matching the dangerous pattern family.
    pub dangerous_hits: Vec<String>,
}

/// A file flagged by the entropy scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HighEntropyFile {
    /// Path relative to the package root.
    pub path: String,
    /// Shannon entropy in bits per byte.
    pub entropy: f64,
    /// Whether the file lives in a directory where high entropy is expected
    /// (bundled or minified output).
    pub expected_location: bool,
}

/// Summary of the Shannon-entropy scan.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntropySummary {
    /// Number of code files scanned.
    pub files_scanned: usize,
    /// Highest per-file entropy observed.
    pub max_entropy: f64,
    /// Mean per-file entropy.
    pub average_entropy: f64,
    /// Every file above the high-entropy threshold.
    pub high_entropy_files: Vec<HighEntropyFile>,
}

/// Structured detail blob persisted alongside the three check statuses.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisData {
    #[serde(default)]
    pub integrity: IntegrityFindings,
    #[serde(default)]
    pub install_scripts: ScriptFindings,
    #[serde(default)]
    pub entropy: EntropySummary,
}

/// Verdict for a single `(dependency, version)` pair.
///
/// A persisted row is **complete** iff all three statuses are present; the
/// storage gateway only counts complete rows as existing analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionAnalysis {
    pub registry_integrity_status: CheckStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registry_integrity_reason: Option<String>,
    pub install_scripts_status: CheckStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub install_scripts_reason: Option<String>,
    pub entropy_analysis_status: CheckStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entropy_analysis_reason: Option<String>,
    pub analysis_data: AnalysisData,
    pub analyzed_at: DateTime<Utc>,
}

impl VersionAnalysis {
    /// True if any of the three checks failed outright.
    pub fn any_failed(&self) -> bool {
        self.registry_integrity_status.is_fail()
            || self.install_scripts_status.is_fail()
            || self.entropy_analysis_status.is_fail()
    }

    /// One-line summary of the three statuses, used in error messages and
    /// logs (`registry=pass scripts=warning entropy=pass`).
    pub fn status_summary(&self) -> String {
        format!(
            "registry={} scripts={} entropy={}",
            self.registry_integrity_status,
            self.install_scripts_status,
            self.entropy_analysis_status
        )
    }
}

/// One commit extracted from the upstream source repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitRecord {
    pub sha: String,
    /// Author email, normalised to lowercase.
    pub author_email: String,
    pub author_name: String,
    pub message: String,
    /// Author timestamp. The Unix epoch is the sentinel for an unparseable
    /// timestamp; profiling skips sentinels.
    pub timestamp: DateTime<Utc>,
    pub lines_added: u64,
    pub lines_deleted: u64,
    pub files_changed_count: u64,
    /// Paths touched by this commit.
    pub files_changed: Vec<String>,
}

impl CommitRecord {
    /// Whether the author timestamp is the unparseable-time sentinel.
    pub fn has_sentinel_timestamp(&self) -> bool {
        self.timestamp.timestamp() == 0
    }
}

/// Statistical baseline for one contributor to one watched package.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContributorProfile {
    /// Author email, normalised to lowercase. Keys the profile.
    pub author_email: String,
    pub author_name: String,
    pub commit_count: u64,
    pub avg_lines_added: f64,
    pub stddev_lines_added: f64,
    pub avg_lines_deleted: f64,
    pub stddev_lines_deleted: f64,
    pub avg_files_changed: f64,
    pub stddev_files_changed: f64,
    pub avg_message_length: f64,
    pub stddev_message_length: f64,
    /// Total insertions over total deletions; `999.0` when the contributor
    /// has never deleted a line.
    pub insert_to_delete_ratio: f64,
    /// Commits per hour of day, keyed `"0:00"` through `"23:00"`.
    pub commit_time_histogram: BTreeMap<String, u64>,
    /// Commits per weekday, keyed `"Sunday"` through `"Saturday"`.
    pub typical_days_active: BTreeMap<String, u64>,
    /// `[day][hour]` commit counts, Sunday-first.
    pub commit_time_heatmap: Vec<Vec<u64>>,
    /// Path -> number of commits touching it.
    pub files_worked_on: BTreeMap<String, u64>,
    pub first_commit_at: DateTime<Utc>,
    pub last_commit_at: DateTime<Utc>,
}

/// One factor that contributed points to an anomaly score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyFactor {
    /// Stable factor identifier (`files_changed`, `new_files`, ...).
    pub factor: String,
    pub points: u32,
    /// Human-readable explanation with the baseline and observed values.
    pub reason: String,
}

/// A commit scored as deviating from its author's baseline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitAnomaly {
    pub commit_sha: String,
    /// Author email, used to join against stored contributor ids.
    pub author_email: String,
    pub anomaly_score: u32,
    pub factors: Vec<AnomalyFactor>,
}

/// Per-`(organization, dependency)` quarantine policy row.
///
/// Presence of a row means the organization has the package under
/// Watchtower; absence means transparent auto-bump is allowed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchlistRow {
    pub id: String,
    pub organization_id: String,
    pub dependency_id: String,
    /// One-shot flag: quarantine the next release when it arrives.
    pub quarantine_next_release: bool,
    pub is_current_version_quarantined: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quarantine_until: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest_allowed_version: Option<String>,
}

/// A downstream project eligible for an auto-bump PR.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateProject {
    pub project_id: String,
    pub organization_id: String,
    /// Version currently declared by the project, if known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_version: Option<String>,
}

/// A single OSV range event. Events latch left-to-right: the most recent
/// `introduced` and `fixed` seen decide membership.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RangeEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub introduced: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fixed: Option<String>,
}

/// One OSV range: an ordered list of events.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AffectedRange {
    #[serde(default)]
    pub events: Vec<RangeEvent>,
}

/// One OSV affected entry: an explicit version list, ranges, or both.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AffectedEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub versions: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ranges: Option<Vec<AffectedRange>>,
}

/// The stored `affected_versions` shape: advisories arrive either as a
/// single entry or as a list of entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AffectedVersions {
    Many(Vec<AffectedEntry>),
    One(AffectedEntry),
}

/// Stored advisory row for a dependency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vulnerability {
    pub osv_id: String,
    /// `None` means the advisory applies to every version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affected_versions: Option<AffectedVersions>,
    #[serde(default)]
    pub fixed_versions: Vec<String>,
}

/// Result of a PR-service call. Both arms are non-fatal to the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BumpPrOutcome {
    Created {
        pr_url: String,
        pr_number: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        already_exists: Option<bool>,
    },
    Failed {
        error: String,
    },
}

/// Kind discriminator of a [`NewVersionJob`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NewVersionJobKind {
    NewVersion,
    QuarantineExpired,
}

/// Highest-priority queue payload: a release event or a quarantine expiry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewVersionJob {
    #[serde(rename = "type")]
    pub kind: NewVersionJobKind,
    pub dependency_id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_version: Option<String>,
    /// ISO-8601 release timestamp as published by the registry watcher.
    /// Parsed leniently downstream; an unparseable value is treated as
    /// absent rather than failing the job.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_release_date: Option<String>,
}

/// Main-queue payload: full analysis of a watched package.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageAnalysisJob {
    pub package_name: String,
    pub watched_package_id: String,
    pub project_dependency_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_version: Option<String>,
}

/// Low-priority backfill payload: analyze a list of historical versions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchVersionAnalysisJob {
    /// Wire discriminator; always `batch_version_analysis`.
    #[serde(rename = "type", default = "batch_job_type")]
    pub job_type: String,
    pub dependency_id: String,
    /// Historical field name; the batch queue predates the snake_case
    /// convention.
    #[serde(rename = "packageName")]
    pub package_name: String,
    pub versions: Vec<String>,
}

fn batch_job_type() -> String {
    "batch_version_analysis".to_string()
}

impl BatchVersionAnalysisJob {
    pub fn new(dependency_id: &str, package_name: &str, versions: Vec<String>) -> Self {
        Self {
            job_type: batch_job_type(),
            dependency_id: dependency_id.to_string(),
            package_name: package_name.to_string(),
            versions,
        }
    }
}

/// Malformed queue payload. Terminal for the job, never for the loop.
#[derive(Debug, thiserror::Error)]
#[error("malformed job payload: {detail}")]
pub struct DecodeError {
    detail: String,
}

impl DecodeError {
    pub fn new(detail: impl Into<String>) -> Self {
        Self {
            detail: detail.into(),
        }
    }
}

/// Decode a queue message into `T`, accepting both shapes messages arrive
/// in: a JSON value of the target shape, or a JSON string whose content is
/// the serialized target shape.
///
/// # Example
///
/// ```
/// use watchtower_types::{decode_message, BatchVersionAnalysisJob};
///
/// let direct = r#"{"dependency_id":"dep-1","packageName":"lodash","versions":["1.0.0"]}"#;
/// let job: BatchVersionAnalysisJob = decode_message(direct).expect("decode");
/// assert_eq!(job.package_name, "lodash");
///
/// // Double-encoded: the payload is a JSON string containing JSON.
/// let wrapped = serde_json::to_string(direct).expect("wrap");
/// let job: BatchVersionAnalysisJob = decode_message(&wrapped).expect("decode");
/// assert_eq!(job.versions.len(), 1);
/// ```
pub fn decode_message<T: DeserializeOwned>(raw: &str) -> Result<T, DecodeError> {
    let value: serde_json::Value = serde_json::from_str(raw)
        .map_err(|e| DecodeError::new(format!("not valid JSON: {e}")))?;

    let value = match value {
        serde_json::Value::String(inner) => serde_json::from_str(&inner)
            .map_err(|e| DecodeError::new(format!("string payload is not valid JSON: {e}")))?,
        other => other,
    };

    serde_json::from_value(value).map_err(|e| DecodeError::new(e.to_string()))
}
