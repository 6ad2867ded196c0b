use std::sync::atomic::Ordering;

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use watchtower_analysis::{Analyzer, cleanup_temp_dir};
use watchtower_autobump::{BumpPrService, HttpPrService, Orchestrator, PrServiceError};
use watchtower_queue::{JobQueues, QueueClient};
use watchtower_store::MemoryStore;
use watchtower_types::BumpPrOutcome;
use watchtower_worker::config::{DeployEnv, ENV_QUEUE_TOKEN, ENV_QUEUE_URL, WorkerConfig};
use watchtower_worker::dispatcher::Dispatcher;

#[derive(Parser, Debug)]
#[command(name = "watchtower", version)]
#[command(about = "Supply-chain worker: release verification, contributor baselines, auto-bump PRs")]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the worker loop against the configured queues.
    Run,
    /// One-shot analysis of a package, printed as JSON. With --version,
    /// runs only the per-version checks.
    Analyze {
        /// Package name as published in the registry.
        package: String,
        /// Analyze this version instead of the full package.
        #[arg(long)]
        version: Option<String>,
    },
}

/// Stand-in when no PR service endpoint is configured. Every dispatch
/// resolves to the non-fatal error arm.
struct DisabledPrService;

impl BumpPrService for DisabledPrService {
    fn create_bump_pr(
        &self,
        _organization_id: &str,
        _project_id: &str,
        _package_name: &str,
        _target_version: &str,
        _current_version: Option<&str>,
    ) -> Result<BumpPrOutcome, PrServiceError> {
        Ok(BumpPrOutcome::Failed {
            error: "PR service not configured".to_string(),
        })
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.cmd {
        Commands::Run => run_worker(),
        Commands::Analyze { package, version } => analyze_once(&package, version.as_deref()),
    }
}

fn run_worker() -> Result<()> {
    let config = WorkerConfig::from_env();
    if config.deploy_env == DeployEnv::Test {
        info!("test environment, worker entrypoint disabled");
        return Ok(());
    }

    let (url, token) = config
        .queue_credentials()
        .ok_or_else(|| anyhow!("{ENV_QUEUE_URL} and {ENV_QUEUE_TOKEN} must be set"))?;
    let client = QueueClient::new(url, token).context("failed to build queue client")?;
    let queues = JobQueues::new(client, config.queue_names.clone());

    let store = MemoryStore::new();
    let analyzer = Analyzer::with_default_registry().context("failed to build analyzer")?;
    let pr_service: Box<dyn BumpPrService> = match &config.pr_service_url {
        Some(url) => Box::new(
            HttpPrService::new(url, config.pr_service_token.as_deref())
                .context("failed to build PR service client")?,
        ),
        None => {
            warn!("no PR service configured, bump PRs will be skipped");
            Box::new(DisabledPrService)
        }
    };

    let orchestrator = Orchestrator::new(&store, &analyzer, pr_service.as_ref());
    let dispatcher = Dispatcher::new(&queues, &store, &analyzer, orchestrator);

    let shutdown = dispatcher.shutdown_handle();
    ctrlc::set_handler(move || {
        shutdown.store(true, Ordering::SeqCst);
    })
    .context("failed to install shutdown handler")?;

    info!(
        main = %config.queue_names.main,
        new_version = %config.queue_names.new_version,
        batch = %config.queue_names.batch,
        "watchtower worker starting"
    );
    dispatcher.run();
    Ok(())
}

fn analyze_once(package: &str, version: Option<&str>) -> Result<()> {
    let analyzer = Analyzer::with_default_registry().context("failed to build analyzer")?;

    let output = match version {
        Some(version) => {
            let scan = analyzer.analyze_package_version(package, version);
            let result = scan.result;
            cleanup_temp_dir(&scan.tmp_dir);
            let analysis = result.with_context(|| format!("analysis of {package}@{version} failed"))?;
            json!({
                "package": package,
                "version": version,
                "analysis": analysis,
            })
        }
        None => {
            let scan = analyzer.analyze_package(package);
            let result = scan.result;
            cleanup_temp_dir(&scan.tmp_dir);
            let report = result.with_context(|| format!("analysis of {package} failed"))?;
            json!({
                "package": package,
                "latest_version": report.latest_version,
                "analysis": report.analysis,
                "commit_count": report.commits.len(),
                "contributor_count": report.contributors.len(),
                "anomalies": report.anomalies,
            })
        }
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
