//! In-memory reference backend.
//!
//! Backs the worker in local runs and doubles as the contract fixture for
//! every test that needs a store. State lives behind a single mutex; the
//! worker is a single cooperative loop, so contention is not a concern.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tracing::{debug, warn};
use watchtower_types::{
    CandidateProject, CommitAnomaly, CommitRecord, ContributorProfile, VersionAnalysis,
    Vulnerability, WatchedPackageStatus, WatchlistRow,
};

use crate::{CacheInvalidator, Store, StoreError, StoreResult, with_derived_reasons};

/// Sources that count as bump-eligible dependency declarations.
const BUMPABLE_SOURCES: &[&str] = &["dependencies", "devDependencies"];

#[derive(Debug, Clone)]
struct WatchedPackageRow {
    dependency_id: String,
    status: WatchedPackageStatus,
    error_message: Option<String>,
    last_known_commit_sha: Option<String>,
}

#[derive(Debug, Clone)]
struct DependencyRow {
    name: String,
    latest_version: Option<String>,
    latest_release_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
struct VersionRow {
    id: String,
    analysis: Option<VersionAnalysis>,
    error_message: Option<String>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct ProjectRow {
    organization_id: String,
    auto_bump: Option<bool>,
}

/// Seed row for a project's declared dependency.
#[derive(Debug, Clone)]
pub struct ProjectDependencySeed {
    pub id: String,
    pub project_id: String,
    /// `None` models legacy rows that predate the dependency link and are
    /// only reachable through the package-name fallback.
    pub dependency_id: Option<String>,
    pub package_name: String,
    pub current_version: Option<String>,
    pub is_direct: bool,
    pub source: String,
    pub files_importing_count: u64,
}

#[derive(Debug, Clone)]
struct ProjectDependencyRow {
    seed: ProjectDependencySeed,
    dependency_version_id: Option<String>,
}

#[derive(Default)]
struct Inner {
    watched: HashMap<String, WatchedPackageRow>,
    dependencies: HashMap<String, DependencyRow>,
    version_rows: BTreeMap<(String, String), VersionRow>,
    projects: HashMap<String, ProjectRow>,
    project_dependencies: HashMap<String, ProjectDependencyRow>,
    remove_prs: HashSet<(String, String)>,
    watchlists: HashMap<String, WatchlistRow>,
    vulnerabilities: HashMap<String, Vec<Vulnerability>>,
    commits: HashMap<String, Vec<CommitRecord>>,
    profiles: HashMap<String, Vec<(String, ContributorProfile)>>,
    anomalies: HashMap<String, Vec<(String, CommitAnomaly)>>,
    next_id: u64,
}

impl Inner {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{}", self.next_id)
    }
}

/// In-memory [`Store`] implementation.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    invalidator: Option<Arc<dyn CacheInvalidator>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a cache invalidator consulted on analysis upserts.
    pub fn with_invalidator(invalidator: Arc<dyn CacheInvalidator>) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            invalidator: Some(invalidator),
        }
    }

    fn lock(&self) -> StoreResult<std::sync::MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| StoreError::Backend("store mutex poisoned".to_string()))
    }

    // Seeding -------------------------------------------------------------

    pub fn add_dependency(
        &self,
        dependency_id: &str,
        name: &str,
        latest_version: Option<&str>,
        latest_release_date: Option<DateTime<Utc>>,
    ) {
        if let Ok(mut inner) = self.lock() {
            inner.dependencies.insert(
                dependency_id.to_string(),
                DependencyRow {
                    name: name.to_string(),
                    latest_version: latest_version.map(str::to_string),
                    latest_release_date,
                },
            );
        }
    }

    pub fn add_watched_package(&self, watched_package_id: &str, dependency_id: &str) {
        if let Ok(mut inner) = self.lock() {
            inner.watched.insert(
                watched_package_id.to_string(),
                WatchedPackageRow {
                    dependency_id: dependency_id.to_string(),
                    status: WatchedPackageStatus::Pending,
                    error_message: None,
                    last_known_commit_sha: None,
                },
            );
        }
    }

    pub fn add_project(&self, project_id: &str, organization_id: &str, auto_bump: Option<bool>) {
        if let Ok(mut inner) = self.lock() {
            inner.projects.insert(
                project_id.to_string(),
                ProjectRow {
                    organization_id: organization_id.to_string(),
                    auto_bump,
                },
            );
        }
    }

    pub fn add_project_dependency(&self, seed: ProjectDependencySeed) {
        if let Ok(mut inner) = self.lock() {
            inner.project_dependencies.insert(
                seed.id.clone(),
                ProjectDependencyRow {
                    seed,
                    dependency_version_id: None,
                },
            );
        }
    }

    /// Record an open remove-type PR for `(project, dependency)`.
    pub fn add_remove_pr(&self, project_id: &str, dependency_id: &str) {
        if let Ok(mut inner) = self.lock() {
            inner
                .remove_prs
                .insert((project_id.to_string(), dependency_id.to_string()));
        }
    }

    pub fn add_watchlist(&self, row: WatchlistRow) {
        if let Ok(mut inner) = self.lock() {
            inner.watchlists.insert(row.id.clone(), row);
        }
    }

    pub fn add_vulnerability(&self, dependency_id: &str, vulnerability: Vulnerability) {
        if let Ok(mut inner) = self.lock() {
            inner
                .vulnerabilities
                .entry(dependency_id.to_string())
                .or_default()
                .push(vulnerability);
        }
    }

    // Inspection ----------------------------------------------------------

    pub fn watched_package_status(
        &self,
        watched_package_id: &str,
    ) -> Option<(WatchedPackageStatus, Option<String>)> {
        let inner = self.lock().ok()?;
        inner
            .watched
            .get(watched_package_id)
            .map(|row| (row.status, row.error_message.clone()))
    }

    pub fn last_known_commit_sha(&self, watched_package_id: &str) -> Option<String> {
        let inner = self.lock().ok()?;
        inner
            .watched
            .get(watched_package_id)
            .and_then(|row| row.last_known_commit_sha.clone())
    }

    pub fn dependency_version_analysis(
        &self,
        dependency_id: &str,
        version: &str,
    ) -> Option<VersionAnalysis> {
        let inner = self.lock().ok()?;
        inner
            .version_rows
            .get(&(dependency_id.to_string(), version.to_string()))
            .and_then(|row| row.analysis.clone())
    }

    pub fn dependency_version_error(&self, dependency_id: &str, version: &str) -> Option<String> {
        let inner = self.lock().ok()?;
        inner
            .version_rows
            .get(&(dependency_id.to_string(), version.to_string()))
            .and_then(|row| row.error_message.clone())
    }

    pub fn dependency_version_updated_at(
        &self,
        dependency_id: &str,
        version: &str,
    ) -> Option<DateTime<Utc>> {
        let inner = self.lock().ok()?;
        inner
            .version_rows
            .get(&(dependency_id.to_string(), version.to_string()))
            .map(|row| row.updated_at)
    }

    pub fn dependency_name(&self, dependency_id: &str) -> Option<String> {
        let inner = self.lock().ok()?;
        inner
            .dependencies
            .get(dependency_id)
            .map(|row| row.name.clone())
    }

    pub fn watchlist_by_id(&self, watchlist_id: &str) -> Option<WatchlistRow> {
        let inner = self.lock().ok()?;
        inner.watchlists.get(watchlist_id).cloned()
    }

    pub fn stored_commits(&self, watched_package_id: &str) -> Vec<CommitRecord> {
        self.lock()
            .ok()
            .and_then(|inner| inner.commits.get(watched_package_id).cloned())
            .unwrap_or_default()
    }

    pub fn stored_profiles(&self, watched_package_id: &str) -> Vec<(String, ContributorProfile)> {
        self.lock()
            .ok()
            .and_then(|inner| inner.profiles.get(watched_package_id).cloned())
            .unwrap_or_default()
    }

    pub fn stored_anomalies(&self, watched_package_id: &str) -> Vec<(String, CommitAnomaly)> {
        self.lock()
            .ok()
            .and_then(|inner| inner.anomalies.get(watched_package_id).cloned())
            .unwrap_or_default()
    }

    pub fn project_dependency_version_id(&self, project_dependency_id: &str) -> Option<String> {
        let inner = self.lock().ok()?;
        inner
            .project_dependencies
            .get(project_dependency_id)
            .and_then(|row| row.dependency_version_id.clone())
    }

    fn notify_invalidation(&self, dependency_id: &str) {
        if let Some(invalidator) = &self.invalidator {
            if let Err(detail) = invalidator.invalidate_package(dependency_id) {
                warn!(dependency_id, detail, "cache invalidation failed");
            }
        }
    }

    fn candidates_matching<F>(inner: &Inner, matcher: F) -> Vec<CandidateProject>
    where
        F: Fn(&ProjectDependencySeed) -> bool,
    {
        let mut candidates: Vec<CandidateProject> = inner
            .project_dependencies
            .values()
            .filter(|row| matcher(&row.seed))
            .filter(|row| row.seed.is_direct)
            .filter(|row| BUMPABLE_SOURCES.contains(&row.seed.source.as_str()))
            .filter(|row| row.seed.files_importing_count > 0)
            .filter_map(|row| {
                let project = inner.projects.get(&row.seed.project_id)?;
                if project.auto_bump == Some(false) {
                    return None;
                }
                Some(CandidateProject {
                    project_id: row.seed.project_id.clone(),
                    organization_id: project.organization_id.clone(),
                    current_version: row.seed.current_version.clone(),
                })
            })
            .collect();
        candidates.sort_by(|a, b| a.project_id.cmp(&b.project_id));
        candidates
    }
}

impl Store for MemoryStore {
    fn update_watched_package_status(
        &self,
        watched_package_id: &str,
        status: WatchedPackageStatus,
        error_message: Option<&str>,
    ) -> StoreResult<()> {
        let mut inner = self.lock()?;
        let row = inner
            .watched
            .get_mut(watched_package_id)
            .ok_or_else(|| StoreError::NotFound(format!("watched package {watched_package_id}")))?;
        row.status = status;
        row.error_message = error_message.map(str::to_string);
        Ok(())
    }

    fn update_watched_package_results(
        &self,
        watched_package_id: &str,
        latest_version: &str,
        results: &VersionAnalysis,
    ) -> StoreResult<()> {
        let dependency_id = self
            .get_dependency_id_for_watched_package(watched_package_id)?
            .ok_or_else(|| StoreError::NotFound(format!("watched package {watched_package_id}")))?;

        self.upsert_dependency_version_analysis(&dependency_id, latest_version, results)?;
        self.update_watched_package_status(watched_package_id, WatchedPackageStatus::Ready, None)
    }

    fn upsert_dependency_version_analysis(
        &self,
        dependency_id: &str,
        version: &str,
        results: &VersionAnalysis,
    ) -> StoreResult<()> {
        let derived = with_derived_reasons(results);
        {
            let mut inner = self.lock()?;
            let id = inner.next_id("dv");
            let row = inner
                .version_rows
                .entry((dependency_id.to_string(), version.to_string()))
                .or_insert_with(|| VersionRow {
                    id,
                    analysis: None,
                    error_message: None,
                    updated_at: Utc::now(),
                });
            row.analysis = Some(derived);
            row.updated_at = Utc::now();
        }

        self.notify_invalidation(dependency_id);
        Ok(())
    }

    fn set_dependency_version_error(
        &self,
        dependency_id: &str,
        version: &str,
        message: &str,
    ) -> StoreResult<()> {
        let mut inner = self.lock()?;
        let id = inner.next_id("dv");
        let row = inner
            .version_rows
            .entry((dependency_id.to_string(), version.to_string()))
            .or_insert_with(|| VersionRow {
                id,
                analysis: None,
                error_message: None,
                updated_at: Utc::now(),
            });
        row.error_message = Some(message.to_string());
        row.updated_at = Utc::now();
        Ok(())
    }

    fn get_versions_with_existing_analysis(
        &self,
        dependency_id: &str,
        versions: &[String],
    ) -> StoreResult<BTreeSet<String>> {
        let inner = self.lock()?;
        Ok(versions
            .iter()
            .filter(|version| {
                inner
                    .version_rows
                    .get(&(dependency_id.to_string(), (*version).clone()))
                    .is_some_and(|row| row.analysis.is_some())
            })
            .cloned()
            .collect())
    }

    fn get_dependency_id_for_watched_package(
        &self,
        watched_package_id: &str,
    ) -> StoreResult<Option<String>> {
        let inner = self.lock()?;
        Ok(inner
            .watched
            .get(watched_package_id)
            .map(|row| row.dependency_id.clone()))
    }

    fn get_dependency_version_row_id(
        &self,
        dependency_id: &str,
        version: &str,
    ) -> StoreResult<Option<String>> {
        let inner = self.lock()?;
        Ok(inner
            .version_rows
            .get(&(dependency_id.to_string(), version.to_string()))
            .map(|row| row.id.clone()))
    }

    fn set_project_dependency_version_id(
        &self,
        project_dependency_id: &str,
        dependency_version_id: &str,
    ) -> StoreResult<()> {
        let mut inner = self.lock()?;
        let row = inner
            .project_dependencies
            .get_mut(project_dependency_id)
            .ok_or_else(|| {
                StoreError::NotFound(format!("project dependency {project_dependency_id}"))
            })?;
        row.dependency_version_id = Some(dependency_version_id.to_string());
        Ok(())
    }

    fn store_package_commits(
        &self,
        watched_package_id: &str,
        commits: &[CommitRecord],
    ) -> StoreResult<()> {
        let mut inner = self.lock()?;
        if !inner.watched.contains_key(watched_package_id) {
            return Err(StoreError::NotFound(format!(
                "watched package {watched_package_id}"
            )));
        }

        let newest = commits
            .iter()
            .max_by_key(|commit| commit.timestamp)
            .map(|commit| commit.sha.clone());
        inner
            .commits
            .insert(watched_package_id.to_string(), commits.to_vec());
        if let Some(row) = inner.watched.get_mut(watched_package_id) {
            if newest.is_some() {
                row.last_known_commit_sha = newest;
            }
        }
        Ok(())
    }

    fn store_contributor_profiles(
        &self,
        watched_package_id: &str,
        profiles: &[ContributorProfile],
    ) -> StoreResult<BTreeMap<String, String>> {
        let mut inner = self.lock()?;
        let mut stored = Vec::with_capacity(profiles.len());
        let mut ids = BTreeMap::new();
        for profile in profiles {
            let id = inner.next_id("contrib");
            ids.insert(profile.author_email.clone(), id.clone());
            stored.push((id, profile.clone()));
        }
        inner.profiles.insert(watched_package_id.to_string(), stored);
        Ok(ids)
    }

    fn store_anomalies(
        &self,
        watched_package_id: &str,
        anomalies: &[CommitAnomaly],
        contributor_ids: &BTreeMap<String, String>,
    ) -> StoreResult<()> {
        let mut inner = self.lock()?;
        let mut stored = Vec::new();
        for anomaly in anomalies {
            match contributor_ids.get(&anomaly.author_email) {
                Some(contributor_id) => stored.push((contributor_id.clone(), anomaly.clone())),
                None => {
                    debug!(
                        sha = %anomaly.commit_sha,
                        author = %anomaly.author_email,
                        "dropping anomaly without a stored contributor"
                    );
                }
            }
        }
        inner
            .anomalies
            .insert(watched_package_id.to_string(), stored);
        Ok(())
    }

    fn get_candidate_projects_for_auto_bump(
        &self,
        dependency_id: &str,
        package_name: &str,
    ) -> StoreResult<Vec<CandidateProject>> {
        let inner = self.lock()?;

        let mut candidates = Self::candidates_matching(&inner, |seed| {
            seed.dependency_id.as_deref() == Some(dependency_id)
        });
        if candidates.is_empty() {
            // Legacy rows are only linked by name.
            candidates = Self::candidates_matching(&inner, |seed| {
                seed.dependency_id.is_none() && seed.package_name == package_name
            });
        }

        let candidates = candidates
            .into_iter()
            .filter(|candidate| {
                !inner
                    .remove_prs
                    .contains(&(candidate.project_id.clone(), dependency_id.to_string()))
            })
            .collect();
        Ok(candidates)
    }

    fn get_dependency_latest_version(&self, dependency_id: &str) -> StoreResult<Option<String>> {
        let inner = self.lock()?;
        Ok(inner
            .dependencies
            .get(dependency_id)
            .and_then(|row| row.latest_version.clone()))
    }

    fn get_dependency_latest_release_date(
        &self,
        dependency_id: &str,
    ) -> StoreResult<Option<DateTime<Utc>>> {
        let inner = self.lock()?;
        Ok(inner
            .dependencies
            .get(dependency_id)
            .and_then(|row| row.latest_release_date))
    }

    fn get_watchlist_row(
        &self,
        organization_id: &str,
        dependency_id: &str,
    ) -> StoreResult<Option<WatchlistRow>> {
        let inner = self.lock()?;
        Ok(inner
            .watchlists
            .values()
            .find(|row| {
                row.organization_id == organization_id && row.dependency_id == dependency_id
            })
            .cloned())
    }

    fn update_watchlist_quarantine_next_release(
        &self,
        watchlist_id: &str,
        quarantine_until: DateTime<Utc>,
    ) -> StoreResult<()> {
        let mut inner = self.lock()?;
        let row = inner
            .watchlists
            .get_mut(watchlist_id)
            .ok_or_else(|| StoreError::NotFound(format!("watchlist {watchlist_id}")))?;
        row.quarantine_next_release = false;
        row.is_current_version_quarantined = true;
        row.quarantine_until = Some(quarantine_until);
        Ok(())
    }

    fn update_watchlist_clear_quarantine_and_set_latest(
        &self,
        watchlist_id: &str,
        version: &str,
    ) -> StoreResult<()> {
        let mut inner = self.lock()?;
        let row = inner
            .watchlists
            .get_mut(watchlist_id)
            .ok_or_else(|| StoreError::NotFound(format!("watchlist {watchlist_id}")))?;
        row.is_current_version_quarantined = false;
        row.quarantine_until = None;
        row.latest_allowed_version = Some(version.to_string());
        Ok(())
    }

    fn update_watchlist_set_latest_allowed(
        &self,
        watchlist_id: &str,
        version: &str,
    ) -> StoreResult<()> {
        let mut inner = self.lock()?;
        let row = inner
            .watchlists
            .get_mut(watchlist_id)
            .ok_or_else(|| StoreError::NotFound(format!("watchlist {watchlist_id}")))?;
        row.latest_allowed_version = Some(version.to_string());
        Ok(())
    }

    fn get_dependency_vulnerabilities(
        &self,
        dependency_id: &str,
    ) -> StoreResult<Vec<Vulnerability>> {
        let inner = self.lock()?;
        Ok(inner
            .vulnerabilities
            .get(dependency_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use watchtower_types::{AnalysisData, CheckStatus};

    use super::*;

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

    fn passing() -> VersionAnalysis {
        analysis([CheckStatus::Pass, CheckStatus::Pass, CheckStatus::Pass])
    }

    fn seed_candidate(store: &MemoryStore) {
        store.add_project("proj-1", "org-1", None);
        store.add_project_dependency(ProjectDependencySeed {
            id: "pd-1".to_string(),
            project_id: "proj-1".to_string(),
            dependency_id: Some("dep-1".to_string()),
            package_name: "lodash".to_string(),
            current_version: Some("4.17.21".to_string()),
            is_direct: true,
            source: "dependencies".to_string(),
            files_importing_count: 3,
        });
    }

    #[test]
    fn dependency_seed_round_trips() {
        let store = MemoryStore::new();
        store.add_dependency("dep-1", "lodash", Some("4.18.0"), None);
        assert_eq!(store.dependency_name("dep-1").as_deref(), Some("lodash"));
        assert_eq!(
            store
                .get_dependency_latest_version("dep-1")
                .expect("query")
                .as_deref(),
            Some("4.18.0")
        );
        assert!(store
            .get_dependency_latest_release_date("dep-1")
            .expect("query")
            .is_none());
    }

    #[test]
    fn watched_package_status_round_trips() {
        let store = MemoryStore::new();
        store.add_watched_package("wp-1", "dep-1");

        store
            .update_watched_package_status("wp-1", WatchedPackageStatus::Analyzing, None)
            .expect("update");
        assert_eq!(
            store.watched_package_status("wp-1"),
            Some((WatchedPackageStatus::Analyzing, None))
        );

        store
            .update_watched_package_status("wp-1", WatchedPackageStatus::Error, Some("boom"))
            .expect("update");
        assert_eq!(
            store.watched_package_status("wp-1"),
            Some((WatchedPackageStatus::Error, Some("boom".to_string())))
        );
    }

    #[test]
    fn unknown_watched_package_is_not_found() {
        let store = MemoryStore::new();
        let err = store
            .update_watched_package_status("missing", WatchedPackageStatus::Ready, None)
            .expect_err("must fail");
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn results_upsert_row_and_mark_ready() {
        let store = MemoryStore::new();
        store.add_watched_package("wp-1", "dep-1");

        store
            .update_watched_package_results("wp-1", "2.0.0", &passing())
            .expect("results");

        assert_eq!(
            store.watched_package_status("wp-1"),
            Some((WatchedPackageStatus::Ready, None))
        );
        assert!(store.dependency_version_analysis("dep-1", "2.0.0").is_some());
    }

    #[test]
    fn upsert_then_lookup_round_trips() {
        let store = MemoryStore::new();
        store
            .upsert_dependency_version_analysis("dep-1", "1.2.3", &passing())
            .expect("upsert");

        let existing = store
            .get_versions_with_existing_analysis(
                "dep-1",
                &["1.2.3".to_string(), "9.9.9".to_string()],
            )
            .expect("query");
        assert!(existing.contains("1.2.3"));
        assert!(!existing.contains("9.9.9"));
    }

    #[test]
    fn upsert_is_idempotent_by_key() {
        let store = MemoryStore::new();
        let results = passing();
        store
            .upsert_dependency_version_analysis("dep-1", "1.0.0", &results)
            .expect("first");
        let first_id = store
            .get_dependency_version_row_id("dep-1", "1.0.0")
            .expect("id")
            .expect("row");
        let first = store
            .dependency_version_analysis("dep-1", "1.0.0")
            .expect("analysis");

        let first_updated = store
            .dependency_version_updated_at("dep-1", "1.0.0")
            .expect("updated_at");

        store
            .upsert_dependency_version_analysis("dep-1", "1.0.0", &results)
            .expect("second");
        let second_id = store
            .get_dependency_version_row_id("dep-1", "1.0.0")
            .expect("id")
            .expect("row");
        let second = store
            .dependency_version_analysis("dep-1", "1.0.0")
            .expect("analysis");

        // Nothing observable changes beyond the row's update time.
        assert_eq!(first_id, second_id);
        assert_eq!(first, second);
        let second_updated = store
            .dependency_version_updated_at("dep-1", "1.0.0")
            .expect("updated_at");
        assert!(second_updated >= first_updated);
    }

    #[test]
    fn error_does_not_clobber_existing_analysis() {
        let store = MemoryStore::new();
        store
            .upsert_dependency_version_analysis("dep-1", "1.0.0", &passing())
            .expect("upsert");
        store
            .set_dependency_version_error("dep-1", "1.0.0", "download failed")
            .expect("error");

        assert!(store.dependency_version_analysis("dep-1", "1.0.0").is_some());
        assert_eq!(
            store.dependency_version_error("dep-1", "1.0.0").as_deref(),
            Some("download failed")
        );
    }

    #[test]
    fn error_only_rows_do_not_count_as_existing_analysis() {
        let store = MemoryStore::new();
        store
            .set_dependency_version_error("dep-1", "1.0.0", "clone timed out")
            .expect("error");

        let existing = store
            .get_versions_with_existing_analysis("dep-1", &["1.0.0".to_string()])
            .expect("query");
        assert!(existing.is_empty());
    }

    #[test]
    fn stored_rows_carry_derived_reasons() {
        let store = MemoryStore::new();
        store
            .upsert_dependency_version_analysis(
                "dep-1",
                "1.0.0",
                &analysis([CheckStatus::Pass, CheckStatus::Fail, CheckStatus::Pass]),
            )
            .expect("upsert");

        let stored = store
            .dependency_version_analysis("dep-1", "1.0.0")
            .expect("analysis");
        assert!(stored.install_scripts_reason.is_some());
    }

    #[test]
    fn commits_replace_and_advance_last_known_sha() {
        let store = MemoryStore::new();
        store.add_watched_package("wp-1", "dep-1");

        let older = CommitRecord {
            sha: "old".to_string(),
            author_email: "a@b.c".to_string(),
            author_name: "A".to_string(),
            message: "old".to_string(),
            timestamp: DateTime::from_timestamp(1_000, 0).expect("ts"),
            lines_added: 1,
            lines_deleted: 0,
            files_changed_count: 1,
            files_changed: vec!["a.js".to_string()],
        };
        let newer = CommitRecord {
            sha: "new".to_string(),
            timestamp: DateTime::from_timestamp(2_000, 0).expect("ts"),
            ..older.clone()
        };

        store
            .store_package_commits("wp-1", &[older.clone(), newer])
            .expect("store");
        assert_eq!(store.last_known_commit_sha("wp-1").as_deref(), Some("new"));
        assert_eq!(store.stored_commits("wp-1").len(), 2);

        // Replacement semantics: a second store call swaps the whole set.
        store.store_package_commits("wp-1", &[older]).expect("store");
        assert_eq!(store.stored_commits("wp-1").len(), 1);
    }

    #[test]
    fn profiles_return_email_to_id_map_and_anomalies_join_through_it() {
        let store = MemoryStore::new();
        store.add_watched_package("wp-1", "dep-1");

        let profile = ContributorProfile {
            author_email: "dev@example.com".to_string(),
            author_name: "Dev".to_string(),
            commit_count: 1,
            avg_lines_added: 1.0,
            stddev_lines_added: 0.0,
            avg_lines_deleted: 0.0,
            stddev_lines_deleted: 0.0,
            avg_files_changed: 1.0,
            stddev_files_changed: 0.0,
            avg_message_length: 5.0,
            stddev_message_length: 0.0,
            insert_to_delete_ratio: 999.0,
            commit_time_histogram: BTreeMap::new(),
            typical_days_active: BTreeMap::new(),
            commit_time_heatmap: vec![vec![0; 24]; 7],
            files_worked_on: BTreeMap::new(),
            first_commit_at: Utc::now(),
            last_commit_at: Utc::now(),
        };

        let ids = store
            .store_contributor_profiles("wp-1", std::slice::from_ref(&profile))
            .expect("profiles");
        assert!(ids.contains_key("dev@example.com"));

        let known = CommitAnomaly {
            commit_sha: "sha-1".to_string(),
            author_email: "dev@example.com".to_string(),
            anomaly_score: 15,
            factors: vec![],
        };
        let unknown = CommitAnomaly {
            commit_sha: "sha-2".to_string(),
            author_email: "ghost@example.com".to_string(),
            anomaly_score: 30,
            factors: vec![],
        };
        store
            .store_anomalies("wp-1", &[known, unknown], &ids)
            .expect("anomalies");

        let stored = store.stored_anomalies("wp-1");
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].0, ids["dev@example.com"]);
        assert_eq!(stored[0].1.commit_sha, "sha-1");
    }

    #[test]
    fn candidate_selection_applies_every_filter() {
        let store = MemoryStore::new();
        seed_candidate(&store);

        // Zombie: declared but never imported.
        store.add_project("proj-2", "org-1", None);
        store.add_project_dependency(ProjectDependencySeed {
            id: "pd-2".to_string(),
            project_id: "proj-2".to_string(),
            dependency_id: Some("dep-1".to_string()),
            package_name: "lodash".to_string(),
            current_version: None,
            is_direct: true,
            source: "dependencies".to_string(),
            files_importing_count: 0,
        });

        // Transitive dependency.
        store.add_project("proj-3", "org-1", None);
        store.add_project_dependency(ProjectDependencySeed {
            id: "pd-3".to_string(),
            project_id: "proj-3".to_string(),
            dependency_id: Some("dep-1".to_string()),
            package_name: "lodash".to_string(),
            current_version: None,
            is_direct: false,
            source: "dependencies".to_string(),
            files_importing_count: 2,
        });

        // Auto-bump disabled on the project.
        store.add_project("proj-4", "org-2", Some(false));
        store.add_project_dependency(ProjectDependencySeed {
            id: "pd-4".to_string(),
            project_id: "proj-4".to_string(),
            dependency_id: Some("dep-1".to_string()),
            package_name: "lodash".to_string(),
            current_version: None,
            is_direct: true,
            source: "dependencies".to_string(),
            files_importing_count: 1,
        });

        // Open removal PR suppresses the bump.
        store.add_project("proj-5", "org-2", None);
        store.add_project_dependency(ProjectDependencySeed {
            id: "pd-5".to_string(),
            project_id: "proj-5".to_string(),
            dependency_id: Some("dep-1".to_string()),
            package_name: "lodash".to_string(),
            current_version: None,
            is_direct: true,
            source: "dependencies".to_string(),
            files_importing_count: 1,
        });
        store.add_remove_pr("proj-5", "dep-1");

        let candidates = store
            .get_candidate_projects_for_auto_bump("dep-1", "lodash")
            .expect("candidates");
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].project_id, "proj-1");
        assert_eq!(candidates[0].organization_id, "org-1");
        assert_eq!(candidates[0].current_version.as_deref(), Some("4.17.21"));
    }

    #[test]
    fn candidate_selection_falls_back_to_name_for_legacy_rows() {
        let store = MemoryStore::new();
        store.add_project("proj-legacy", "org-1", None);
        store.add_project_dependency(ProjectDependencySeed {
            id: "pd-legacy".to_string(),
            project_id: "proj-legacy".to_string(),
            dependency_id: None,
            package_name: "lodash".to_string(),
            current_version: Some("4.0.0".to_string()),
            is_direct: true,
            source: "devDependencies".to_string(),
            files_importing_count: 1,
        });

        let candidates = store
            .get_candidate_projects_for_auto_bump("dep-1", "lodash")
            .expect("candidates");
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].project_id, "proj-legacy");
    }

    #[test]
    fn name_fallback_is_skipped_when_id_query_matches() {
        let store = MemoryStore::new();
        seed_candidate(&store);
        store.add_project("proj-legacy", "org-1", None);
        store.add_project_dependency(ProjectDependencySeed {
            id: "pd-legacy".to_string(),
            project_id: "proj-legacy".to_string(),
            dependency_id: None,
            package_name: "lodash".to_string(),
            current_version: None,
            is_direct: true,
            source: "dependencies".to_string(),
            files_importing_count: 1,
        });

        let candidates = store
            .get_candidate_projects_for_auto_bump("dep-1", "lodash")
            .expect("candidates");
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].project_id, "proj-1");
    }

    #[test]
    fn watchlist_mutations_follow_their_contracts() {
        let store = MemoryStore::new();
        store.add_watchlist(WatchlistRow {
            id: "wl-1".to_string(),
            organization_id: "org-1".to_string(),
            dependency_id: "dep-1".to_string(),
            quarantine_next_release: true,
            is_current_version_quarantined: false,
            quarantine_until: None,
            latest_allowed_version: None,
        });

        let until = Utc::now();
        store
            .update_watchlist_quarantine_next_release("wl-1", until)
            .expect("quarantine");
        let row = store.watchlist_by_id("wl-1").expect("row");
        assert!(!row.quarantine_next_release);
        assert!(row.is_current_version_quarantined);
        assert_eq!(row.quarantine_until, Some(until));

        store
            .update_watchlist_clear_quarantine_and_set_latest("wl-1", "4.18.0")
            .expect("clear");
        let row = store.watchlist_by_id("wl-1").expect("row");
        assert!(!row.is_current_version_quarantined);
        assert!(row.quarantine_until.is_none());
        assert_eq!(row.latest_allowed_version.as_deref(), Some("4.18.0"));

        store
            .update_watchlist_set_latest_allowed("wl-1", "4.19.0")
            .expect("set latest");
        let row = store.watchlist_by_id("wl-1").expect("row");
        assert_eq!(row.latest_allowed_version.as_deref(), Some("4.19.0"));
    }

    #[test]
    fn watchlist_lookup_is_keyed_by_org_and_dependency() {
        let store = MemoryStore::new();
        store.add_watchlist(WatchlistRow {
            id: "wl-1".to_string(),
            organization_id: "org-1".to_string(),
            dependency_id: "dep-1".to_string(),
            quarantine_next_release: false,
            is_current_version_quarantined: false,
            quarantine_until: None,
            latest_allowed_version: None,
        });

        assert!(store.get_watchlist_row("org-1", "dep-1").expect("query").is_some());
        assert!(store.get_watchlist_row("org-2", "dep-1").expect("query").is_none());
        assert!(store.get_watchlist_row("org-1", "dep-2").expect("query").is_none());
    }

    struct RecordingInvalidator {
        calls: StdMutex<Vec<String>>,
        fail: bool,
    }

    impl CacheInvalidator for RecordingInvalidator {
        fn invalidate_package(&self, dependency_id: &str) -> Result<(), String> {
            self.calls
                .lock()
                .expect("lock")
                .push(dependency_id.to_string());
            if self.fail {
                Err("cache endpoint unreachable".to_string())
            } else {
                Ok(())
            }
        }
    }

    #[test]
    fn upsert_triggers_cache_invalidation() {
        let invalidator = Arc::new(RecordingInvalidator {
            calls: StdMutex::new(Vec::new()),
            fail: false,
        });
        let store = MemoryStore::with_invalidator(invalidator.clone());

        store
            .upsert_dependency_version_analysis("dep-1", "1.0.0", &passing())
            .expect("upsert");

        let calls = invalidator.calls.lock().expect("lock");
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0], "dep-1");
    }

    #[test]
    fn failing_invalidation_never_fails_the_upsert() {
        let store = MemoryStore::with_invalidator(Arc::new(RecordingInvalidator {
            calls: StdMutex::new(Vec::new()),
            fail: true,
        }));

        store
            .upsert_dependency_version_analysis("dep-1", "1.0.0", &passing())
            .expect("upsert despite invalidation failure");
        assert!(store.dependency_version_analysis("dep-1", "1.0.0").is_some());
    }
}
