//! The job dispatcher: the worker's long-running loop.
//!
//! Each iteration polls the three queues in strict priority order and runs
//! exactly one job to completion. Malformed payloads are terminal for the
//! job and never for the loop; queue-transport errors back off and retry;
//! temp trees are owned by a drop guard so cleanup happens on every exit
//! path, panics included.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{error, info, warn};
use watchtower_analysis::{AnalysisError, Analyzer, PackageScan, VersionScan, cleanup_temp_dir};
use watchtower_autobump::Orchestrator;
use watchtower_queue::{JobQueues, QueueSource, RawJob};
use watchtower_store::Store;
use watchtower_types::{
    BatchVersionAnalysisJob, NewVersionJob, PackageAnalysisJob, WatchedPackageStatus,
    decode_message,
};

/// Sleep between polls when all queues are empty, and after a transport
/// error.
pub const IDLE_SLEEP: Duration = Duration::from_secs(5);

/// How many historical versions a full-package job queues for backfill.
const BATCH_BACKFILL_LIMIT: usize = 20;

/// Seam over the analysis pipelines, so the dispatcher can be driven in
/// tests without a registry.
pub trait AnalysisPipeline: Send + Sync {
    fn scan_package(&self, name: &str) -> PackageScan;
    fn scan_version(&self, name: &str, version: &str) -> VersionScan;
    fn previous_versions(
        &self,
        name: &str,
        exclude: &[&str],
        limit: usize,
    ) -> Result<Vec<String>, AnalysisError>;
}

impl AnalysisPipeline for Analyzer {
    fn scan_package(&self, name: &str) -> PackageScan {
        self.analyze_package(name)
    }

    fn scan_version(&self, name: &str, version: &str) -> VersionScan {
        self.analyze_package_version(name, version)
    }

    fn previous_versions(
        &self,
        name: &str,
        exclude: &[&str],
        limit: usize,
    ) -> Result<Vec<String>, AnalysisError> {
        Analyzer::previous_versions(self, name, exclude, limit)
    }
}

/// Owns a scan's temp tree; removal happens on drop, whatever the exit path.
struct TempGuard(PathBuf);

impl Drop for TempGuard {
    fn drop(&mut self) {
        cleanup_temp_dir(&self.0);
    }
}

/// What a single poll did. Exposed for the loop and its tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Handled(QueueSource),
    Empty,
    TransportError,
}

/// The worker dispatcher.
pub struct Dispatcher<'a> {
    queues: &'a JobQueues,
    store: &'a dyn Store,
    pipeline: &'a dyn AnalysisPipeline,
    orchestrator: Orchestrator<'a>,
    idle_sleep: Duration,
    shutdown: Arc<AtomicBool>,
}

impl<'a> Dispatcher<'a> {
    pub fn new(
        queues: &'a JobQueues,
        store: &'a dyn Store,
        pipeline: &'a dyn AnalysisPipeline,
        orchestrator: Orchestrator<'a>,
    ) -> Self {
        Self {
            queues,
            store,
            pipeline,
            orchestrator,
            idle_sleep: IDLE_SLEEP,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Override the idle/backoff sleep (tests run with zero).
    pub fn with_idle_sleep(mut self, idle_sleep: Duration) -> Self {
        self.idle_sleep = idle_sleep;
        self
    }

    /// Flag that stops the loop after the in-flight job completes.
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    /// Run until shutdown. Never returns early: transport errors back off,
    /// job errors are logged, and the next iteration re-checks the queues
    /// from the top of the priority order.
    pub fn run(&self) {
        info!("watchtower worker loop started");
        while !self.shutdown.load(Ordering::SeqCst) {
            match self.poll_once() {
                PollOutcome::Handled(_) => {}
                PollOutcome::Empty | PollOutcome::TransportError => {
                    std::thread::sleep(self.idle_sleep);
                }
            }
        }
        info!("watchtower worker loop stopped");
    }

    /// Pop and handle at most one job.
    pub fn poll_once(&self) -> PollOutcome {
        match self.queues.pop_next() {
            Ok(Some(raw)) => {
                let source = raw.source;
                self.handle_raw(raw);
                PollOutcome::Handled(source)
            }
            Ok(None) => PollOutcome::Empty,
            Err(err) => {
                warn!(error = %err, "queue poll failed, backing off");
                PollOutcome::TransportError
            }
        }
    }

    fn handle_raw(&self, raw: RawJob) {
        match raw.source {
            QueueSource::NewVersion => match decode_message::<NewVersionJob>(&raw.payload) {
                Ok(job) => {
                    if let Err(err) = self.orchestrator.process_new_version_job(&job) {
                        warn!(package = %job.name, error = %err, "new-version job failed");
                    }
                }
                Err(err) => error!(error = %err, "skipping malformed new-version job"),
            },
            QueueSource::Main => match decode_message::<PackageAnalysisJob>(&raw.payload) {
                Ok(job) => self.handle_main_job(&job),
                Err(err) => error!(error = %err, "skipping malformed package job"),
            },
            QueueSource::Batch => match decode_message::<BatchVersionAnalysisJob>(&raw.payload) {
                Ok(job) => self.handle_batch_job(&job),
                Err(err) => error!(error = %err, "skipping malformed batch job"),
            },
        }
    }

    /// Full-package analysis lifecycle. Any failure lands on the watched
    /// package row as an error status; the loop continues either way.
    fn handle_main_job(&self, job: &PackageAnalysisJob) {
        info!(package = %job.package_name, "starting package analysis");
        if let Err(err) = self.store.update_watched_package_status(
            &job.watched_package_id,
            WatchedPackageStatus::Analyzing,
            None,
        ) {
            warn!(error = %err, "failed to mark package as analyzing");
        }

        if let Err(err) = self.run_main_job(job) {
            warn!(package = %job.package_name, error = %err, "package analysis failed");
            if let Err(status_err) = self.store.update_watched_package_status(
                &job.watched_package_id,
                WatchedPackageStatus::Error,
                Some(&format!("{err:#}")),
            ) {
                warn!(error = %status_err, "failed to record package error status");
            }
        }
    }

    fn run_main_job(&self, job: &PackageAnalysisJob) -> Result<()> {
        let scan = self.pipeline.scan_package(&job.package_name);
        let _scan_tmp = TempGuard(scan.tmp_dir);
        let report = scan.result.context("full-package analysis failed")?;

        self.store
            .update_watched_package_results(
                &job.watched_package_id,
                &report.latest_version,
                &report.analysis,
            )
            .context("failed to persist package results")?;

        self.store
            .store_package_commits(&job.watched_package_id, &report.commits)
            .context("failed to persist commits")?;
        let contributor_ids = self
            .store
            .store_contributor_profiles(&job.watched_package_id, &report.contributors)
            .context("failed to persist contributor profiles")?;
        self.store
            .store_anomalies(&job.watched_package_id, &report.anomalies, &contributor_ids)
            .context("failed to persist anomalies")?;

        let dependency_id = self
            .store
            .get_dependency_id_for_watched_package(&job.watched_package_id)?
            .ok_or_else(|| anyhow!("watched package has no dependency link"))?;

        // The project may pin an older version than the release that was
        // just analyzed; give that version its own verdict and link the
        // project dependency to it.
        if let Some(current) = job
            .current_version
            .as_deref()
            .filter(|current| *current != report.latest_version)
        {
            self.analyze_current_version(job, &dependency_id, current);
        }

        self.enqueue_backfill(job, &dependency_id, &report.latest_version)?;
        info!(package = %job.package_name, latest = %report.latest_version, "package analysis complete");
        Ok(())
    }

    /// Version-scoped analysis for the project's pinned version. Failure
    /// marks the version row, not the watched package.
    fn analyze_current_version(
        &self,
        job: &PackageAnalysisJob,
        dependency_id: &str,
        current: &str,
    ) {
        let scan = self.pipeline.scan_version(&job.package_name, current);
        let _scan_tmp = TempGuard(scan.tmp_dir);

        match scan.result {
            Ok(analysis) => {
                let stored = self
                    .store
                    .upsert_dependency_version_analysis(dependency_id, current, &analysis)
                    .and_then(|()| {
                        self.store
                            .get_dependency_version_row_id(dependency_id, current)
                    });
                match stored {
                    Ok(Some(row_id)) => {
                        if let Err(err) = self
                            .store
                            .set_project_dependency_version_id(&job.project_dependency_id, &row_id)
                        {
                            warn!(error = %err, "failed to link project dependency to version row");
                        }
                    }
                    Ok(None) => warn!(version = current, "version row missing after upsert"),
                    Err(err) => warn!(error = %err, "failed to persist current-version analysis"),
                }
            }
            Err(err) => {
                warn!(version = current, error = %err, "current-version analysis failed");
                if let Err(store_err) = self.store.set_dependency_version_error(
                    dependency_id,
                    current,
                    &err.to_string(),
                ) {
                    warn!(error = %store_err, "failed to record current-version error");
                }
            }
        }
    }

    /// Queue up to 20 historical versions for low-priority backfill.
    fn enqueue_backfill(
        &self,
        job: &PackageAnalysisJob,
        dependency_id: &str,
        latest_version: &str,
    ) -> Result<()> {
        let mut exclude = vec![latest_version];
        if let Some(current) = job.current_version.as_deref() {
            exclude.push(current);
        }

        let versions = self
            .pipeline
            .previous_versions(&job.package_name, &exclude, BATCH_BACKFILL_LIMIT)
            .context("failed to enumerate previous versions")?;
        if versions.is_empty() {
            return Ok(());
        }

        let batch =
            BatchVersionAnalysisJob::new(dependency_id, &job.package_name, versions);
        let payload = serde_json::to_string(&batch).context("failed to encode batch job")?;
        self.queues
            .push_batch(&payload)
            .context("failed to enqueue batch job")?;
        info!(
            package = %job.package_name,
            versions = batch.versions.len(),
            "queued historical versions for backfill"
        );
        Ok(())
    }

    /// Batch backfill: analyze each version that does not already have a
    /// complete row. Per-version failures never abort the batch.
    fn handle_batch_job(&self, job: &BatchVersionAnalysisJob) {
        let existing = match self
            .store
            .get_versions_with_existing_analysis(&job.dependency_id, &job.versions)
        {
            Ok(existing) => existing,
            Err(err) => {
                warn!(error = %err, "failed to query existing analyses, skipping batch");
                return;
            }
        };

        for version in &job.versions {
            if existing.contains(version) {
                continue;
            }

            let scan = self.pipeline.scan_version(&job.package_name, version);
            let _scan_tmp = TempGuard(scan.tmp_dir);
            match scan.result {
                Ok(analysis) => {
                    if let Err(err) = self.store.upsert_dependency_version_analysis(
                        &job.dependency_id,
                        version,
                        &analysis,
                    ) {
                        warn!(version = %version, error = %err, "failed to persist batch analysis");
                    }
                }
                Err(err) => {
                    warn!(version = %version, error = %err, "batch version analysis failed");
                    if let Err(store_err) = self.store.set_dependency_version_error(
                        &job.dependency_id,
                        version,
                        &err.to_string(),
                    ) {
                        warn!(error = %store_err, "failed to record batch version error");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Read;
    use std::sync::Mutex;
    use std::thread;

    use chrono::Utc;
    use tiny_http::{Header, Response, Server, StatusCode};
    use watchtower_analysis::PackageReport;
    use watchtower_autobump::pr_service::{BumpPrService, PrServiceError};
    use watchtower_queue::{QueueClient, QueueNames};
    use watchtower_store::{MemoryStore, ProjectDependencySeed};
    use watchtower_types::{
        AnalysisData, BumpPrOutcome, CheckStatus, CommitRecord, VersionAnalysis,
    };

    use super::*;

    struct NoopPr;

    impl BumpPrService for NoopPr {
        fn create_bump_pr(
            &self,
            _organization_id: &str,
            _project_id: &str,
            _package_name: &str,
            _target_version: &str,
            _current_version: Option<&str>,
        ) -> Result<BumpPrOutcome, PrServiceError> {
            Ok(BumpPrOutcome::Created {
                pr_url: "https://github.com/o/r/pull/1".to_string(),
                pr_number: 1,
                already_exists: None,
            })
        }
    }

    fn passing_analysis() -> VersionAnalysis {
        VersionAnalysis {
            registry_integrity_status: CheckStatus::Pass,
            registry_integrity_reason: None,
            install_scripts_status: CheckStatus::Pass,
            install_scripts_reason: None,
            entropy_analysis_status: CheckStatus::Pass,
            entropy_analysis_reason: None,
            analysis_data: AnalysisData::default(),
            analyzed_at: Utc::now(),
        }
    }

    fn sample_commit() -> CommitRecord {
        CommitRecord {
            sha: "abc123".to_string(),
            author_email: "dev@example.com".to_string(),
            author_name: "Dev".to_string(),
            message: "release".to_string(),
            timestamp: Utc::now(),
            lines_added: 3,
            lines_deleted: 1,
            files_changed_count: 1,
            files_changed: vec!["index.js".to_string()],
        }
    }

    struct StubPipeline {
        latest: String,
        fail_package: bool,
        previous: Vec<String>,
        version_calls: Mutex<Vec<String>>,
        temp_dirs: Mutex<Vec<PathBuf>>,
    }

    impl StubPipeline {
        fn new(latest: &str) -> Self {
            Self {
                latest: latest.to_string(),
                fail_package: false,
                previous: Vec::new(),
                version_calls: Mutex::new(Vec::new()),
                temp_dirs: Mutex::new(Vec::new()),
            }
        }

        fn make_temp(&self) -> PathBuf {
            let dir = tempfile::Builder::new()
                .prefix("watchtower-")
                .tempdir()
                .expect("tempdir")
                .keep();
            self.temp_dirs.lock().expect("lock").push(dir.clone());
            dir
        }

        fn version_calls(&self) -> Vec<String> {
            self.version_calls.lock().expect("lock").clone()
        }

        fn assert_all_temp_dirs_removed(&self) {
            for dir in self.temp_dirs.lock().expect("lock").iter() {
                assert!(!dir.exists(), "temp dir left behind: {}", dir.display());
            }
        }
    }

    impl AnalysisPipeline for StubPipeline {
        fn scan_package(&self, _name: &str) -> PackageScan {
            let tmp_dir = self.make_temp();
            let result = if self.fail_package {
                Err(std::io::Error::other("registry unreachable").into())
            } else {
                Ok(PackageReport {
                    latest_version: self.latest.clone(),
                    analysis: passing_analysis(),
                    commits: vec![sample_commit()],
                    contributors: Vec::new(),
                    anomalies: Vec::new(),
                })
            };
            PackageScan { tmp_dir, result }
        }

        fn scan_version(&self, _name: &str, version: &str) -> VersionScan {
            self.version_calls
                .lock()
                .expect("lock")
                .push(version.to_string());
            VersionScan {
                tmp_dir: self.make_temp(),
                result: Ok(passing_analysis()),
            }
        }

        fn previous_versions(
            &self,
            _name: &str,
            exclude: &[&str],
            limit: usize,
        ) -> Result<Vec<String>, AnalysisError> {
            Ok(self
                .previous
                .iter()
                .filter(|version| !exclude.contains(&version.as_str()))
                .take(limit)
                .cloned()
                .collect())
        }
    }

    fn json_response(body: &str) -> Response<std::io::Cursor<Vec<u8>>> {
        Response::from_string(body)
            .with_status_code(StatusCode(200))
            .with_header(Header::from_bytes("Content-Type", "application/json").expect("header"))
    }

    fn scripted_server<F>(handler: F, request_count: usize) -> (String, thread::JoinHandle<()>)
    where
        F: Fn(tiny_http::Request, usize) + Send + 'static,
    {
        let server = Server::http("127.0.0.1:0").expect("server");
        let addr = format!("http://{}", server.server_addr());
        let handle = thread::spawn(move || {
            for n in 0..request_count {
                match server.recv_timeout(Duration::from_secs(5)) {
                    Ok(Some(req)) => handler(req, n),
                    _ => break,
                }
            }
        });
        (addr, handle)
    }

    fn read_body(req: &mut tiny_http::Request) -> String {
        let mut body = String::new();
        req.as_reader().read_to_string(&mut body).expect("body");
        body
    }

    fn queues_at(addr: &str) -> JobQueues {
        let client = QueueClient::new(addr, "test-token").expect("client");
        JobQueues::new(client, QueueNames::with_suffix(""))
    }

    /// Scanner for tests whose jobs never reach the analyzer.
    struct NeverScan;

    impl watchtower_autobump::VersionScanner for NeverScan {
        fn scan_version(&self, _name: &str, _version: &str) -> VersionScan {
            panic!("unexpected version scan");
        }
    }

    #[test]
    fn main_job_runs_the_full_lifecycle() {
        let store = MemoryStore::new();
        store.add_watched_package("wp-1", "dep-1");
        store.add_project("proj-1", "org-1", None);
        store.add_project_dependency(ProjectDependencySeed {
            id: "pd-1".to_string(),
            project_id: "proj-1".to_string(),
            dependency_id: Some("dep-1".to_string()),
            package_name: "lodash".to_string(),
            current_version: Some("4.17.21".to_string()),
            is_direct: true,
            source: "dependencies".to_string(),
            files_importing_count: 1,
        });

        let mut pipeline = StubPipeline::new("4.18.0");
        pipeline.previous = vec!["4.17.0".to_string(), "4.16.0".to_string()];

        // Queue script: new-version empty, main queue has the job, then the
        // batch enqueue lands back on the batch queue.
        let job_payload = serde_json::json!({
            "packageName": "lodash",
            "watchedPackageId": "wp-1",
            "projectDependencyId": "pd-1",
            "currentVersion": "4.17.21"
        })
        .to_string();
        let lpop_result = serde_json::to_string(&serde_json::json!({ "result": job_payload }))
            .expect("encode");

        let (addr, handle) = scripted_server(
            move |mut req, n| {
                let body = read_body(&mut req);
                match n {
                    0 => {
                        assert_eq!(body, r#"["LPOP","watchtower-new-version-jobs"]"#);
                        req.respond(json_response(r#"{"result":null}"#)).expect("respond");
                    }
                    1 => {
                        assert_eq!(body, r#"["LPOP","watchtower-jobs"]"#);
                        req.respond(json_response(&lpop_result)).expect("respond");
                    }
                    _ => {
                        assert!(body.starts_with(r#"["RPUSH","watchtower-batch-version-jobs""#));
                        assert!(body.contains("4.17.0"));
                        assert!(body.contains("dep-1"));
                        req.respond(json_response(r#"{"result":1}"#)).expect("respond");
                    }
                }
            },
            3,
        );

        let queues = queues_at(&addr);
        let pr = NoopPr;
        let orchestrator = Orchestrator::new(&store, &NeverScan, &pr);
        let dispatcher = Dispatcher::new(&queues, &store, &pipeline, orchestrator)
            .with_idle_sleep(Duration::ZERO);

        let outcome = dispatcher.poll_once();
        assert_eq!(outcome, PollOutcome::Handled(QueueSource::Main));

        // Status ready, commits stored, current version analyzed and linked.
        assert_eq!(
            store.watched_package_status("wp-1").expect("status").0,
            watchtower_types::WatchedPackageStatus::Ready
        );
        assert_eq!(store.last_known_commit_sha("wp-1").as_deref(), Some("abc123"));
        assert_eq!(pipeline.version_calls(), vec!["4.17.21"]);
        assert!(store
            .dependency_version_analysis("dep-1", "4.17.21")
            .is_some());
        assert!(store.project_dependency_version_id("pd-1").is_some());
        pipeline.assert_all_temp_dirs_removed();
        handle.join().expect("join");
    }

    #[test]
    fn failed_package_analysis_marks_the_row_and_cleans_up() {
        let store = MemoryStore::new();
        store.add_watched_package("wp-1", "dep-1");

        let mut pipeline = StubPipeline::new("4.18.0");
        pipeline.fail_package = true;

        let job = PackageAnalysisJob {
            package_name: "lodash".to_string(),
            watched_package_id: "wp-1".to_string(),
            project_dependency_id: "pd-1".to_string(),
            current_version: None,
        };

        let queues = queues_at("http://127.0.0.1:9");
        let pr = NoopPr;
        let orchestrator = Orchestrator::new(&store, &NeverScan, &pr);
        let dispatcher = Dispatcher::new(&queues, &store, &pipeline, orchestrator);
        dispatcher.handle_main_job(&job);

        let (status, message) = store.watched_package_status("wp-1").expect("status");
        assert_eq!(status, watchtower_types::WatchedPackageStatus::Error);
        assert!(message.expect("message").contains("registry unreachable"));
        pipeline.assert_all_temp_dirs_removed();
    }

    #[test]
    fn matching_current_version_skips_the_second_scan() {
        let store = MemoryStore::new();
        store.add_watched_package("wp-1", "dep-1");

        let pipeline = StubPipeline::new("4.18.0");
        let job = PackageAnalysisJob {
            package_name: "lodash".to_string(),
            watched_package_id: "wp-1".to_string(),
            project_dependency_id: "pd-1".to_string(),
            current_version: Some("4.18.0".to_string()),
        };

        let queues = queues_at("http://127.0.0.1:9");
        let pr = NoopPr;
        let orchestrator = Orchestrator::new(&store, &NeverScan, &pr);
        let dispatcher = Dispatcher::new(&queues, &store, &pipeline, orchestrator);
        dispatcher.handle_main_job(&job);

        assert!(pipeline.version_calls().is_empty());
        pipeline.assert_all_temp_dirs_removed();
    }

    #[test]
    fn batch_job_skips_versions_with_existing_analysis() {
        let store = MemoryStore::new();
        store
            .upsert_dependency_version_analysis("dep-1", "4.16.0", &passing_analysis())
            .expect("seed");

        let pipeline = StubPipeline::new("4.18.0");
        let job = BatchVersionAnalysisJob::new(
            "dep-1",
            "lodash",
            vec!["4.16.0".to_string(), "4.17.0".to_string()],
        );

        let queues = queues_at("http://127.0.0.1:9");
        let pr = NoopPr;
        let orchestrator = Orchestrator::new(&store, &NeverScan, &pr);
        let dispatcher = Dispatcher::new(&queues, &store, &pipeline, orchestrator);
        dispatcher.handle_batch_job(&job);

        assert_eq!(pipeline.version_calls(), vec!["4.17.0"]);
        assert!(store
            .dependency_version_analysis("dep-1", "4.17.0")
            .is_some());
        pipeline.assert_all_temp_dirs_removed();
    }

    #[test]
    fn malformed_payload_is_terminal_for_the_job_not_the_loop() {
        let (addr, handle) = scripted_server(
            |req, _| {
                req.respond(json_response(r#"{"result":"this is not a job"}"#))
                    .expect("respond");
            },
            1,
        );

        let store = MemoryStore::new();
        let pipeline = StubPipeline::new("1.0.0");
        let queues = queues_at(&addr);
        let pr = NoopPr;
        let orchestrator = Orchestrator::new(&store, &NeverScan, &pr);
        let dispatcher = Dispatcher::new(&queues, &store, &pipeline, orchestrator);

        let outcome = dispatcher.poll_once();
        assert_eq!(outcome, PollOutcome::Handled(QueueSource::NewVersion));
        assert!(pipeline.version_calls().is_empty());
        handle.join().expect("join");
    }

    #[test]
    fn transport_error_backs_off_instead_of_crashing() {
        let (addr, handle) = scripted_server(
            |req, _| {
                req.respond(Response::empty(StatusCode(503))).expect("respond");
            },
            1,
        );

        let store = MemoryStore::new();
        let pipeline = StubPipeline::new("1.0.0");
        let queues = queues_at(&addr);
        let pr = NoopPr;
        let orchestrator = Orchestrator::new(&store, &NeverScan, &pr);
        let dispatcher = Dispatcher::new(&queues, &store, &pipeline, orchestrator);

        assert_eq!(dispatcher.poll_once(), PollOutcome::TransportError);
        handle.join().expect("join");
    }

    #[test]
    fn double_encoded_payloads_decode() {
        // The new-version queue delivers a string-wrapped JSON payload.
        let inner = serde_json::json!({
            "type": "quarantine_expired",
            "dependency_id": "dep-1",
            "name": "lodash"
        })
        .to_string();
        let wrapped = serde_json::to_string(&inner).expect("wrap");
        let lpop_result = serde_json::json!({ "result": wrapped }).to_string();

        let (addr, handle) = scripted_server(
            move |req, _| {
                req.respond(json_response(&lpop_result)).expect("respond");
            },
            1,
        );

        let store = MemoryStore::new();
        store.add_dependency("dep-1", "lodash", Some("4.18.0"), None);

        let pipeline = StubPipeline::new("4.18.0");
        let queues = queues_at(&addr);
        let pr = NoopPr;
        let orchestrator = Orchestrator::new(&store, &NeverScan, &pr);
        let dispatcher = Dispatcher::new(&queues, &store, &pipeline, orchestrator);

        // No candidates seeded: the job succeeds quietly.
        assert_eq!(
            dispatcher.poll_once(),
            PollOutcome::Handled(QueueSource::NewVersion)
        );
        handle.join().expect("join");
    }
}
