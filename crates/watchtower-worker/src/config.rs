//! Environment configuration for the worker.
//!
//! The queue endpoint comes from `UPSTASH_REDIS_URL`/`UPSTASH_REDIS_TOKEN`;
//! without credentials the worker cannot start. Queue names default per
//! deployment environment (`-local` suffix off-production) and can be
//! overridden individually so production and non-production tiers never
//! intercept each other's jobs.

use watchtower_queue::QueueNames;

pub const ENV_QUEUE_URL: &str = "UPSTASH_REDIS_URL";
pub const ENV_QUEUE_TOKEN: &str = "UPSTASH_REDIS_TOKEN";
pub const ENV_MAIN_QUEUE: &str = "WATCHTOWER_QUEUE_NAME";
pub const ENV_NEW_VERSION_QUEUE: &str = "WATCHTOWER_NEW_VERSION_QUEUE_NAME";
pub const ENV_BATCH_QUEUE: &str = "WATCHTOWER_BATCH_VERSION_QUEUE_NAME";
/// Deployment environment; falls back to `NODE_ENV` for parity with the
/// surrounding deployment.
pub const ENV_DEPLOY_ENV: &str = "WATCHTOWER_ENV";
pub const ENV_DEPLOY_ENV_FALLBACK: &str = "NODE_ENV";
pub const ENV_PR_SERVICE_URL: &str = "WATCHTOWER_PR_SERVICE_URL";
pub const ENV_PR_SERVICE_TOKEN: &str = "WATCHTOWER_PR_SERVICE_TOKEN";

/// Deployment environment, as far as the worker cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployEnv {
    Production,
    /// Test runs never start the worker loop.
    Test,
    Local,
}

impl DeployEnv {
    fn from_value(value: Option<&str>) -> Self {
        match value {
            Some("production") => DeployEnv::Production,
            Some("test") => DeployEnv::Test,
            _ => DeployEnv::Local,
        }
    }

    /// Suffix appended to default queue names off-production.
    pub fn queue_suffix(self) -> &'static str {
        match self {
            DeployEnv::Production => "",
            DeployEnv::Test | DeployEnv::Local => "-local",
        }
    }
}

/// Everything the worker reads from its environment.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub queue_url: Option<String>,
    pub queue_token: Option<String>,
    pub deploy_env: DeployEnv,
    pub queue_names: QueueNames,
    pub pr_service_url: Option<String>,
    pub pr_service_token: Option<String>,
}

fn non_empty(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.is_empty())
}

impl WorkerConfig {
    pub fn from_env() -> Self {
        let deploy_env = DeployEnv::from_value(
            non_empty(ENV_DEPLOY_ENV)
                .or_else(|| non_empty(ENV_DEPLOY_ENV_FALLBACK))
                .as_deref(),
        );

        let queue_names = QueueNames::with_overrides(
            deploy_env.queue_suffix(),
            non_empty(ENV_MAIN_QUEUE),
            non_empty(ENV_NEW_VERSION_QUEUE),
            non_empty(ENV_BATCH_QUEUE),
        );

        Self {
            queue_url: non_empty(ENV_QUEUE_URL),
            queue_token: non_empty(ENV_QUEUE_TOKEN),
            deploy_env,
            queue_names,
            pr_service_url: non_empty(ENV_PR_SERVICE_URL),
            pr_service_token: non_empty(ENV_PR_SERVICE_TOKEN),
        }
    }

    /// Queue endpoint credentials, if both halves are present.
    pub fn queue_credentials(&self) -> Option<(&str, &str)> {
        match (&self.queue_url, &self.queue_token) {
            (Some(url), Some(token)) => Some((url, token)),
            _ => None,
        }
    }

    /// The worker runs only with credentials and outside `test`.
    pub fn worker_enabled(&self) -> bool {
        self.queue_credentials().is_some() && self.deploy_env != DeployEnv::Test
    }
}
