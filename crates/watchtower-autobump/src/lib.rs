//! # Auto-bump orchestration
//!
//! Release events land here. [`Orchestrator::process_new_version_job`]
//! verifies the new version (or resolves the stored latest for a quarantine
//! expiry), applies the vulnerability veto, and hands off to
//! [`Orchestrator::run_auto_bump_pr_logic`], which walks the candidate
//! projects through the watchlist state machine and dispatches bump PRs.
//!
//! Candidates are isolated from each other: one project's store hiccup or
//! PR-service failure never stops the rest of the fan-out.

pub mod pr_service;
pub mod watchlist;

use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};
use watchtower_analysis::{Analyzer, VersionScan, cleanup_temp_dir};
use watchtower_store::{Store, StoreError};
use watchtower_types::{BumpPrOutcome, CandidateProject, NewVersionJob, NewVersionJobKind};

pub use pr_service::{BumpPrService, HttpPrService, PrServiceError};

/// Quarantine window length.
const QUARANTINE_DAYS: i64 = 7;

/// Pause between candidate projects, as rate-limit courtesy to the PR
/// service.
pub const DEFAULT_CANDIDATE_DELAY: StdDuration = StdDuration::from_millis(500);

/// PR-service error strings with a known, benign meaning.
const KNOWN_PR_ERRORS: &[&str] = &[
    "no GitHub App",
    "no GitHub repository",
    "dependency is transitive",
];

/// Why a new-version job failed. The loop logs these and moves on; nothing
/// here is fatal to the worker.
#[derive(Debug, thiserror::Error)]
pub enum BumpError {
    #[error("Missing new_version")]
    MissingNewVersion,
    #[error("No latest_version")]
    NoLatestVersion,
    #[error("{0}")]
    Analysis(String),
    #[error("{0}")]
    ChecksFailed(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Seam over the per-version analysis pipeline, so orchestration logic can
/// be exercised without a registry.
pub trait VersionScanner: Send + Sync {
    fn scan_version(&self, name: &str, version: &str) -> VersionScan;
}

impl VersionScanner for Analyzer {
    fn scan_version(&self, name: &str, version: &str) -> VersionScan {
        self.analyze_package_version(name, version)
    }
}

/// The auto-bump orchestrator.
pub struct Orchestrator<'a> {
    store: &'a dyn Store,
    scanner: &'a dyn VersionScanner,
    pr_service: &'a dyn BumpPrService,
    candidate_delay: StdDuration,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        store: &'a dyn Store,
        scanner: &'a dyn VersionScanner,
        pr_service: &'a dyn BumpPrService,
    ) -> Self {
        Self {
            store,
            scanner,
            pr_service,
            candidate_delay: DEFAULT_CANDIDATE_DELAY,
        }
    }

    /// Override the inter-candidate pause (tests run with zero).
    pub fn with_candidate_delay(mut self, delay: StdDuration) -> Self {
        self.candidate_delay = delay;
        self
    }

    /// Handle a release event or a quarantine expiry.
    ///
    /// For `new_version`, the version is analyzed first; an analysis error
    /// or a failing check persists an error on the version row and vetoes
    /// dispatch. `quarantine_expired` resolves the stored latest version and
    /// re-runs nothing. In both cases a vulnerable target version returns
    /// success without dispatching anything.
    pub fn process_new_version_job(&self, job: &NewVersionJob) -> Result<(), BumpError> {
        let (target_version, release_date) = match job.kind {
            NewVersionJobKind::NewVersion => {
                let version = job
                    .new_version
                    .clone()
                    .ok_or(BumpError::MissingNewVersion)?;
                self.verify_new_version(job, &version)?;
                (version, parse_release_date(job.latest_release_date.as_deref()))
            }
            NewVersionJobKind::QuarantineExpired => {
                let version = self
                    .store
                    .get_dependency_latest_version(&job.dependency_id)?
                    .ok_or(BumpError::NoLatestVersion)?;
                (version, None)
            }
        };

        let vulnerabilities = self
            .store
            .get_dependency_vulnerabilities(&job.dependency_id)?;
        if watchtower_version::is_version_vulnerable(&target_version, &vulnerabilities) {
            info!(
                package = %job.name,
                version = %target_version,
                "target version is vulnerable, skipping auto-bump"
            );
            return Ok(());
        }

        self.run_auto_bump_pr_logic(&job.dependency_id, &job.name, &target_version, release_date)
    }

    /// Analyze a newly released version and persist the outcome. Scoped temp
    /// dir is cleaned on every path out of here.
    fn verify_new_version(&self, job: &NewVersionJob, version: &str) -> Result<(), BumpError> {
        let scan = self.scanner.scan_version(&job.name, version);
        let VersionScan { tmp_dir, result } = scan;
        let analysis = match result {
            Ok(analysis) => analysis,
            Err(err) => {
                cleanup_temp_dir(&tmp_dir);
                let message = err.to_string();
                self.store
                    .set_dependency_version_error(&job.dependency_id, version, &message)?;
                return Err(BumpError::Analysis(message));
            }
        };
        cleanup_temp_dir(&tmp_dir);

        if analysis.any_failed() {
            let message = format!("Checks failed: {}", analysis.status_summary());
            self.store
                .set_dependency_version_error(&job.dependency_id, version, &message)?;
            return Err(BumpError::ChecksFailed(message));
        }

        self.store
            .update_dependency_version_analysis(&job.dependency_id, version, &analysis)?;
        Ok(())
    }

    /// Walk every candidate project through the watchlist state machine and
    /// dispatch PRs where allowed.
    pub fn run_auto_bump_pr_logic(
        &self,
        dependency_id: &str,
        package_name: &str,
        target_version: &str,
        latest_release_date: Option<DateTime<Utc>>,
    ) -> Result<(), BumpError> {
        let candidates = self
            .store
            .get_candidate_projects_for_auto_bump(dependency_id, package_name)?;
        if candidates.is_empty() {
            info!(package = package_name, "no auto-bump candidates");
            return Ok(());
        }

        for (index, candidate) in candidates.iter().enumerate() {
            if index > 0 && !self.candidate_delay.is_zero() {
                std::thread::sleep(self.candidate_delay);
            }
            if let Err(err) = self.process_candidate(
                dependency_id,
                package_name,
                target_version,
                latest_release_date,
                candidate,
            ) {
                warn!(
                    project = %candidate.project_id,
                    error = %err,
                    "auto-bump candidate failed, continuing"
                );
            }
        }
        Ok(())
    }

    fn process_candidate(
        &self,
        dependency_id: &str,
        package_name: &str,
        target_version: &str,
        latest_release_date: Option<DateTime<Utc>>,
        candidate: &CandidateProject,
    ) -> Result<(), StoreError> {
        let now = Utc::now();
        let quarantine_until =
            latest_release_date.unwrap_or(now) + Duration::days(QUARANTINE_DAYS);

        let row = self
            .store
            .get_watchlist_row(&candidate.organization_id, dependency_id)?;
        let transition =
            watchlist::plan_candidate(row.as_ref(), target_version, quarantine_until, now);

        if let Some(mutation) = transition.mutation {
            match mutation {
                watchlist::WatchlistMutation::QuarantineNextRelease {
                    watchlist_id,
                    quarantine_until,
                } => {
                    info!(
                        organization = %candidate.organization_id,
                        package = package_name,
                        until = %quarantine_until,
                        "quarantining release"
                    );
                    self.store
                        .update_watchlist_quarantine_next_release(&watchlist_id, quarantine_until)?;
                }
                watchlist::WatchlistMutation::ClearQuarantineAndSetLatest {
                    watchlist_id,
                    version,
                } => {
                    self.store
                        .update_watchlist_clear_quarantine_and_set_latest(&watchlist_id, &version)?;
                }
                watchlist::WatchlistMutation::SetLatestAllowed {
                    watchlist_id,
                    version,
                } => {
                    self.store
                        .update_watchlist_set_latest_allowed(&watchlist_id, &version)?;
                }
            }
        }

        if transition.dispatch_pr {
            self.dispatch_pr(candidate, package_name, target_version);
        }
        Ok(())
    }

    /// Fire the PR-service call. Nothing it returns is fatal.
    fn dispatch_pr(&self, candidate: &CandidateProject, package_name: &str, target_version: &str) {
        let outcome = self.pr_service.create_bump_pr(
            &candidate.organization_id,
            &candidate.project_id,
            package_name,
            target_version,
            candidate.current_version.as_deref(),
        );

        match outcome {
            Ok(BumpPrOutcome::Created {
                pr_url, pr_number, ..
            }) => {
                info!(
                    project = %candidate.project_id,
                    pr_number,
                    pr_url = %pr_url,
                    "bump PR created"
                );
            }
            Ok(BumpPrOutcome::Failed { error }) => {
                if KNOWN_PR_ERRORS.iter().any(|known| error.contains(known)) {
                    warn!(project = %candidate.project_id, error = %error, "bump PR skipped");
                } else {
                    warn!(project = %candidate.project_id, error = %error, "bump PR failed");
                }
            }
            Err(err) => {
                warn!(project = %candidate.project_id, error = %err, "PR service call failed");
            }
        }
    }
}

/// Parse a release timestamp leniently; an unparseable value is treated as
/// absent rather than failing the job.
fn parse_release_date(raw: Option<&str>) -> Option<DateTime<Utc>> {
    let raw = raw?;
    match DateTime::parse_from_rfc3339(raw) {
        Ok(parsed) => Some(parsed.with_timezone(&Utc)),
        Err(err) => {
            warn!(raw, error = %err, "unparseable latest_release_date, using now");
            None
        }
    }
}
