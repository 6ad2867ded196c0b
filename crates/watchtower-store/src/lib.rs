//! Storage gateway for Watchtower.
//!
//! The [`Store`] trait is the narrow, typed interface between the worker and
//! whatever backs it. Every operation is total: it returns a typed result
//! and never panics across the boundary. The worker core stays usable
//! behind any backend that honors the contracts documented per method.
//!
//! [`MemoryStore`] is the in-memory reference backend: the contract double
//! for every test in the workspace and the default for local runs.

mod memory;

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use watchtower_types::{
    CandidateProject, CheckStatus, CommitAnomaly, CommitRecord, ContributorProfile,
    VersionAnalysis, Vulnerability, WatchedPackageStatus, WatchlistRow,
};

pub use memory::{MemoryStore, ProjectDependencySeed};

/// Persistence-layer failure.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store operation failed: {0}")]
    Backend(String),
    #[error("row not found: {0}")]
    NotFound(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Best-effort cache invalidation attached to version-analysis upserts.
///
/// Failures are logged and swallowed; a cache that cannot be invalidated
/// must never fail a persistence call.
pub trait CacheInvalidator: Send + Sync {
    fn invalidate_package(&self, dependency_id: &str) -> Result<(), String>;
}

/// The named operations the worker core needs from persistent state.
pub trait Store: Send + Sync {
    /// Set a watched package's lifecycle status, with an optional error
    /// message for the `error` state.
    fn update_watched_package_status(
        &self,
        watched_package_id: &str,
        status: WatchedPackageStatus,
        error_message: Option<&str>,
    ) -> StoreResult<()>;

    /// Persist a full-package verdict: upserts the latest-version analysis
    /// row and moves the watched package to `ready`.
    fn update_watched_package_results(
        &self,
        watched_package_id: &str,
        latest_version: &str,
        results: &VersionAnalysis,
    ) -> StoreResult<()>;

    /// Upsert a `(dependency, version)` analysis row. Idempotent by key;
    /// repeating an identical upsert changes nothing observable beyond the
    /// row's update time. Non-pass statuses get a reason derived if the
    /// analyzer left none.
    fn upsert_dependency_version_analysis(
        &self,
        dependency_id: &str,
        version: &str,
        results: &VersionAnalysis,
    ) -> StoreResult<()>;

    /// Alias of [`Store::upsert_dependency_version_analysis`], kept for the
    /// auto-bump call path.
    fn update_dependency_version_analysis(
        &self,
        dependency_id: &str,
        version: &str,
        results: &VersionAnalysis,
    ) -> StoreResult<()> {
        self.upsert_dependency_version_analysis(dependency_id, version, results)
    }

    /// Mark a version as failed without clobbering previously stored check
    /// results.
    fn set_dependency_version_error(
        &self,
        dependency_id: &str,
        version: &str,
        message: &str,
    ) -> StoreResult<()>;

    /// The subset of `versions` that already have a complete analysis row
    /// (all three statuses present).
    fn get_versions_with_existing_analysis(
        &self,
        dependency_id: &str,
        versions: &[String],
    ) -> StoreResult<BTreeSet<String>>;

    fn get_dependency_id_for_watched_package(
        &self,
        watched_package_id: &str,
    ) -> StoreResult<Option<String>>;

    fn get_dependency_version_row_id(
        &self,
        dependency_id: &str,
        version: &str,
    ) -> StoreResult<Option<String>>;

    /// Link a project dependency to the analysis row resolved for its
    /// declared version.
    fn set_project_dependency_version_id(
        &self,
        project_dependency_id: &str,
        dependency_version_id: &str,
    ) -> StoreResult<()>;

    /// Replace a watched package's stored commit set and advance
    /// `last_known_commit_sha` to the newest commit.
    fn store_package_commits(
        &self,
        watched_package_id: &str,
        commits: &[CommitRecord],
    ) -> StoreResult<()>;

    /// Replace a watched package's contributor profiles. Returns the
    /// email-to-contributor-id map used to join anomalies.
    fn store_contributor_profiles(
        &self,
        watched_package_id: &str,
        profiles: &[ContributorProfile],
    ) -> StoreResult<BTreeMap<String, String>>;

    /// Store anomalies, joining authors through `contributor_ids`. Entries
    /// whose author email has no contributor id are silently dropped.
    fn store_anomalies(
        &self,
        watched_package_id: &str,
        anomalies: &[CommitAnomaly],
        contributor_ids: &BTreeMap<String, String>,
    ) -> StoreResult<()>;

    /// Downstream projects eligible for an auto-bump PR: direct
    /// prod/dev dependencies with at least one importing file, project
    /// auto-bump not disabled, and no open remove-type PR for the pair.
    /// Queries by dependency id first; falls back to the package name only
    /// when the id yields nothing (legacy rows without a dependency link).
    fn get_candidate_projects_for_auto_bump(
        &self,
        dependency_id: &str,
        package_name: &str,
    ) -> StoreResult<Vec<CandidateProject>>;

    fn get_dependency_latest_version(&self, dependency_id: &str) -> StoreResult<Option<String>>;

    fn get_dependency_latest_release_date(
        &self,
        dependency_id: &str,
    ) -> StoreResult<Option<DateTime<Utc>>>;

    /// The watchlist row gating auto-bump for `(organization, dependency)`,
    /// if the organization has the package under watch.
    fn get_watchlist_row(
        &self,
        organization_id: &str,
        dependency_id: &str,
    ) -> StoreResult<Option<WatchlistRow>>;

    /// Consume the one-shot quarantine-next-release flag: quarantines the
    /// current version until `quarantine_until`.
    fn update_watchlist_quarantine_next_release(
        &self,
        watchlist_id: &str,
        quarantine_until: DateTime<Utc>,
    ) -> StoreResult<()>;

    /// Clear an expired quarantine and record `version` as the latest
    /// allowed.
    fn update_watchlist_clear_quarantine_and_set_latest(
        &self,
        watchlist_id: &str,
        version: &str,
    ) -> StoreResult<()>;

    fn update_watchlist_set_latest_allowed(
        &self,
        watchlist_id: &str,
        version: &str,
    ) -> StoreResult<()>;

    fn get_dependency_vulnerabilities(
        &self,
        dependency_id: &str,
    ) -> StoreResult<Vec<Vulnerability>>;
}

/// Fill in reason strings for non-pass statuses the analyzer left bare.
/// Stored rows always explain a `warning` or `fail`.
pub fn with_derived_reasons(results: &VersionAnalysis) -> VersionAnalysis {
    fn derive(status: CheckStatus, reason: &Option<String>, check: &str) -> Option<String> {
        match (status, reason) {
            (CheckStatus::Pass, _) => reason.clone(),
            (_, Some(reason)) => Some(reason.clone()),
            (status, None) => Some(format!("{check} check reported {status}")),
        }
    }

    let mut derived = results.clone();
    derived.registry_integrity_reason = derive(
        results.registry_integrity_status,
        &results.registry_integrity_reason,
        "registry integrity",
    );
    derived.install_scripts_reason = derive(
        results.install_scripts_status,
        &results.install_scripts_reason,
        "install scripts",
    );
    derived.entropy_analysis_reason = derive(
        results.entropy_analysis_status,
        &results.entropy_analysis_reason,
        "entropy",
    );
    derived
}

#[cfg(test)]
mod tests {
    use super::*;
    use watchtower_types::AnalysisData;

    fn analysis(statuses: [CheckStatus; 3]) -> VersionAnalysis {
        VersionAnalysis {
            registry_integrity_status: statuses[0],
            registry_integrity_reason: None,
            install_scripts_status: statuses[1],
            install_scripts_reason: None,
            entropy_analysis_status: statuses[2],
            entropy_analysis_reason: None,
            analysis_data: AnalysisData::default(),
            analyzed_at: Utc::now(),
        }
    }

    #[test]
    fn derives_reasons_for_bare_non_pass_statuses() {
        let derived = with_derived_reasons(&analysis([
            CheckStatus::Pass,
            CheckStatus::Warning,
            CheckStatus::Fail,
        ]));
        assert!(derived.registry_integrity_reason.is_none());
        assert_eq!(
            derived.install_scripts_reason.as_deref(),
            Some("install scripts check reported warning")
        );
        assert_eq!(
            derived.entropy_analysis_reason.as_deref(),
            Some("entropy check reported fail")
        );
    }

    #[test]
    fn keeps_analyzer_supplied_reasons() {
        let mut input = analysis([CheckStatus::Warning, CheckStatus::Pass, CheckStatus::Pass]);
        input.registry_integrity_reason = Some("no source URL".to_string());
        let derived = with_derived_reasons(&input);
        assert_eq!(
            derived.registry_integrity_reason.as_deref(),
            Some("no source URL")
        );
    }
}
