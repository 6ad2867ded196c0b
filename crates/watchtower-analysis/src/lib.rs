//! # Analysis pipelines
//!
//! The per-version and full-package analysis pipelines:
//!
//! - [`Analyzer::analyze_package_version`] - the three checks (registry
//!   integrity, install scripts, entropy) for one published version
//! - [`Analyzer::analyze_package`] - the same checks for the latest version,
//!   plus commit-history extraction, contributor profiling, and anomaly
//!   scoring
//! - [`cleanup_temp_dir`] - idempotent removal of a scan's working tree
//!
//! Every scan returns its temp directory in all cases, success or failure.
//! The analyzer never removes its own temp tree; the dispatcher owns
//! cleanup so that removal happens on every exit path, including the ones
//! the analyzer cannot see.

pub mod entropy;
pub mod integrity;
pub mod scripts;

use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{info, warn};
use watchtower_registry::{Packument, RegistryClient, RegistryError, git, repo_url};
use watchtower_types::{
    AnalysisData, CommitAnomaly, CommitRecord, ContributorProfile, VersionAnalysis,
};

/// Prefix for every temp directory the analyzer creates. Cleanup refuses to
/// touch anything else.
const TEMP_PREFIX: &str = "watchtower-";

/// Analysis failure. Recoverable: the dispatcher marks the affected version
/// row and moves on.
#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("version {version} of {name} is not in the registry")]
    MissingVersion { name: String, version: String },
    #[error("package {0} has no latest version")]
    NoLatestVersion(String),
}

/// Outcome of a per-version scan. `tmp_dir` is present on every path.
#[derive(Debug)]
pub struct VersionScan {
    pub tmp_dir: PathBuf,
    pub result: Result<VersionAnalysis, AnalysisError>,
}

/// Outcome of a full-package scan. `tmp_dir` is present on every path.
#[derive(Debug)]
pub struct PackageScan {
    pub tmp_dir: PathBuf,
    pub result: Result<PackageReport, AnalysisError>,
}

/// Everything a full-package scan produces.
#[derive(Debug)]
pub struct PackageReport {
    pub latest_version: String,
    pub analysis: VersionAnalysis,
    pub commits: Vec<CommitRecord>,
    pub contributors: Vec<ContributorProfile>,
    pub anomalies: Vec<CommitAnomaly>,
}

/// The version analyzer. Cheap to clone; holds only the registry client.
#[derive(Debug, Clone)]
pub struct Analyzer {
    registry: RegistryClient,
}

impl Analyzer {
    pub fn new(registry: RegistryClient) -> Self {
        Self { registry }
    }

    /// Analyzer against the public npm registry.
    pub fn with_default_registry() -> Result<Self, AnalysisError> {
        Ok(Self::new(RegistryClient::npm()?))
    }

    /// Run the three checks for a single published version.
    pub fn analyze_package_version(&self, name: &str, version: &str) -> VersionScan {
        let tmp_dir = match create_temp_dir() {
            Ok(dir) => dir,
            Err(err) => {
                return VersionScan {
                    tmp_dir: unavailable_temp_dir(),
                    result: Err(err.into()),
                };
            }
        };

        let result = self
            .registry
            .packument(name)
            .map_err(AnalysisError::from)
            .and_then(|packument| self.run_version_checks(&tmp_dir, name, version, &packument));

        VersionScan { tmp_dir, result }
    }

    /// Full-package scan: latest-version checks plus commit history,
    /// contributor profiles, and anomalies.
    pub fn analyze_package(&self, name: &str) -> PackageScan {
        let tmp_dir = match create_temp_dir() {
            Ok(dir) => dir,
            Err(err) => {
                return PackageScan {
                    tmp_dir: unavailable_temp_dir(),
                    result: Err(err.into()),
                };
            }
        };

        let result = self.run_package_analysis(&tmp_dir, name);
        PackageScan { tmp_dir, result }
    }

    fn run_package_analysis(
        &self,
        tmp_dir: &Path,
        name: &str,
    ) -> Result<PackageReport, AnalysisError> {
        let packument = self.registry.packument(name)?;
        let latest = newest_version(&packument)
            .ok_or_else(|| AnalysisError::NoLatestVersion(name.to_string()))?;

        let analysis = self.run_version_checks(tmp_dir, name, &latest, &packument)?;

        let commits = self.extract_commits(tmp_dir, name, &latest, &packument);
        let contributors = watchtower_profiler::build_profiles(&commits);
        let anomalies = watchtower_profiler::score_commits(&commits, &contributors);
        info!(
            package = name,
            commits = commits.len(),
            contributors = contributors.len(),
            anomalies = anomalies.len(),
            "full-package analysis complete"
        );

        Ok(PackageReport {
            latest_version: latest,
            analysis,
            commits,
            contributors,
            anomalies,
        })
    }

    fn run_version_checks(
        &self,
        tmp_dir: &Path,
        name: &str,
        version: &str,
        packument: &Packument,
    ) -> Result<VersionAnalysis, AnalysisError> {
        let meta = packument
            .versions
            .get(version)
            .cloned()
            .ok_or_else(|| AnalysisError::MissingVersion {
                name: name.to_string(),
                version: version.to_string(),
            })?;

        let package_root = self
            .registry
            .download_package(&meta, &tmp_dir.join("npm"))?;

        let integrity = integrity::check_integrity(
            meta.repository.as_ref(),
            version,
            &package_root,
            &tmp_dir.join("source"),
        );
        let scripts = scripts::check_install_scripts(&package_root);
        let entropy = entropy::scan_entropy(&package_root);

        Ok(VersionAnalysis {
            registry_integrity_status: integrity.status,
            registry_integrity_reason: integrity.reason,
            install_scripts_status: scripts.status,
            install_scripts_reason: scripts.reason,
            entropy_analysis_status: entropy.status,
            entropy_analysis_reason: entropy.reason,
            analysis_data: AnalysisData {
                integrity: integrity.findings,
                install_scripts: scripts.findings,
                entropy: entropy.summary,
            },
            analyzed_at: Utc::now(),
        })
    }

    /// Historical versions eligible for backfill analysis: newest first,
    /// stable releases preferred, `exclude` never included.
    pub fn previous_versions(
        &self,
        name: &str,
        exclude: &[&str],
        limit: usize,
    ) -> Result<Vec<String>, AnalysisError> {
        let packument = self.registry.packument(name)?;
        Ok(watchtower_registry::select_previous_versions(
            &packument, exclude, limit,
        ))
    }

    /// Clone recent history and parse the commit log. Best-effort: a package
    /// without a cloneable source still gets its check verdict, just with an
    /// empty history.
    fn extract_commits(
        &self,
        tmp_dir: &Path,
        name: &str,
        latest: &str,
        packument: &Packument,
    ) -> Vec<CommitRecord> {
        let repository = packument
            .versions
            .get(latest)
            .and_then(|meta| meta.repository.as_ref())
            .and_then(|repository| repository.url())
            .and_then(repo_url::parse_repository_url);

        let Some(repository) = repository else {
            warn!(package = name, "no recognizable source repository, skipping history");
            return Vec::new();
        };

        let history_dir = tmp_dir.join("history");
        if let Err(err) = git::clone_history(&repository.https_url(), &history_dir) {
            warn!(package = name, error = %err, "history clone failed, skipping history");
            return Vec::new();
        }

        match git::read_commit_log(&history_dir, git::MAX_COMMITS) {
            Ok(commits) => commits,
            Err(err) => {
                warn!(package = name, error = %err, "commit log extraction failed");
                Vec::new()
            }
        }
    }
}

/// Latest version of a packument: the `latest` dist-tag when present,
/// otherwise the newest entry in the publish-time index.
pub fn newest_version(packument: &Packument) -> Option<String> {
    if let Some(latest) = packument.latest_version() {
        return Some(latest.to_string());
    }
    packument
        .time
        .iter()
        .filter(|(version, _)| packument.versions.contains_key(*version))
        .max_by(|a, b| a.1.cmp(b.1))
        .map(|(version, _)| version.clone())
}

fn create_temp_dir() -> std::io::Result<PathBuf> {
    let dir = tempfile::Builder::new().prefix(TEMP_PREFIX).tempdir()?;
    Ok(dir.keep())
}

/// Placeholder returned when temp-dir creation itself failed; never exists,
/// so cleanup is a no-op.
fn unavailable_temp_dir() -> PathBuf {
    std::env::temp_dir().join("watchtower-unavailable")
}

/// Remove a scan's temp tree. Idempotent; refuses paths that were not
/// created by the analyzer (anything without the `watchtower-` prefix).
pub fn cleanup_temp_dir(tmp_dir: &Path) {
    let recognized = tmp_dir
        .file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with(TEMP_PREFIX));
    if !recognized {
        warn!(path = %tmp_dir.display(), "refusing to remove unrecognized temp path");
        return;
    }

    match std::fs::remove_dir_all(tmp_dir) {
        Ok(()) => {}
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => {
            warn!(path = %tmp_dir.display(), error = %err, "temp dir cleanup failed");
        }
    }
}
