//! Queue transport for the Watchtower worker.
//!
//! Jobs travel through three Redis lists exposed over a REST endpoint
//! (Upstash shape): commands are POSTed as a JSON array with a bearer token,
//! responses arrive as `{"result": ...}`. This crate provides the low-level
//! [`QueueClient`] plus [`JobQueues`], which polls the three lists in strict
//! priority order.
//!
//! # Example
//!
//! ```no_run
//! use watchtower_queue::{JobQueues, QueueClient, QueueNames};
//!
//! let client = QueueClient::new("https://queue.example.com", "token").expect("client");
//! let queues = JobQueues::new(client, QueueNames::with_suffix("-local"));
//!
//! if let Some(raw) = queues.pop_next().expect("pop") {
//!     println!("job from {:?}: {}", raw.source, raw.payload);
//! }
//! ```

use std::time::Duration;

use serde_json::Value;

/// Default timeout for queue requests.
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Default user agent for queue requests.
pub const USER_AGENT: &str = concat!("watchtower/", env!("CARGO_PKG_VERSION"));

const MAIN_QUEUE: &str = "watchtower-jobs";
const NEW_VERSION_QUEUE: &str = "watchtower-new-version-jobs";
const BATCH_QUEUE: &str = "watchtower-batch-version-jobs";

/// Queue transport failure. The dispatcher backs off and retries; nothing
/// here is terminal for the loop.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("queue request failed: {0}")]
    Transport(String),
    #[error("queue endpoint returned an unexpected response: {0}")]
    BadResponse(String),
}

/// The three job lists, resolved to concrete Redis key names.
///
/// Production and non-production deployments must use distinct names so jobs
/// are never intercepted across tiers; the worker appends `-local` off-prod.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueNames {
    pub new_version: String,
    pub main: String,
    pub batch: String,
}

impl QueueNames {
    /// Default names with a deployment suffix (`""` in production,
    /// `"-local"` elsewhere).
    pub fn with_suffix(suffix: &str) -> Self {
        Self {
            new_version: format!("{NEW_VERSION_QUEUE}{suffix}"),
            main: format!("{MAIN_QUEUE}{suffix}"),
            batch: format!("{BATCH_QUEUE}{suffix}"),
        }
    }

    /// Apply per-queue overrides on top of the defaults.
    pub fn with_overrides(
        suffix: &str,
        main: Option<String>,
        new_version: Option<String>,
        batch: Option<String>,
    ) -> Self {
        let defaults = Self::with_suffix(suffix);
        Self {
            new_version: new_version.unwrap_or(defaults.new_version),
            main: main.unwrap_or(defaults.main),
            batch: batch.unwrap_or(defaults.batch),
        }
    }
}

/// Which queue a raw job was popped from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueSource {
    NewVersion,
    Main,
    Batch,
}

/// An undecoded job popped from a queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawJob {
    pub source: QueueSource,
    pub payload: String,
}

/// Blocking client for the Redis-over-REST queue endpoint.
#[derive(Debug, Clone)]
pub struct QueueClient {
    base_url: String,
    token: String,
    client: reqwest::blocking::Client,
}

impl QueueClient {
    /// Create a client for the given endpoint and token.
    pub fn new(base_url: &str, token: &str) -> Result<Self, QueueError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| QueueError::Transport(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            client,
        })
    }

    /// Issue a single Redis command as a JSON array and return the `result`
    /// field of the response.
    fn command(&self, command: &[&str]) -> Result<Value, QueueError> {
        let response = self
            .client
            .post(&self.base_url)
            .bearer_auth(&self.token)
            .json(&command)
            .send()
            .map_err(|e| QueueError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(QueueError::Transport(format!(
                "status {status}: {body}"
            )));
        }

        let mut body: Value = response
            .json()
            .map_err(|e| QueueError::BadResponse(format!("invalid JSON body: {e}")))?;

        match body.get_mut("result") {
            Some(result) => Ok(result.take()),
            None => Err(QueueError::BadResponse(format!(
                "missing result field in {body}"
            ))),
        }
    }

    /// Pop the head of a list. `None` when the list is empty.
    pub fn pop(&self, queue: &str) -> Result<Option<String>, QueueError> {
        match self.command(&["LPOP", queue])? {
            Value::Null => Ok(None),
            Value::String(payload) => Ok(Some(payload)),
            other => Err(QueueError::BadResponse(format!(
                "LPOP returned a non-string result: {other}"
            ))),
        }
    }

    /// Append a payload to a list; returns the new list length.
    pub fn push(&self, queue: &str, payload: &str) -> Result<u64, QueueError> {
        match self.command(&["RPUSH", queue, payload])? {
            Value::Number(n) => n.as_u64().ok_or_else(|| {
                QueueError::BadResponse(format!("RPUSH returned a non-integer length: {n}"))
            }),
            other => Err(QueueError::BadResponse(format!(
                "RPUSH returned a non-numeric result: {other}"
            ))),
        }
    }

    /// Current length of a list.
    pub fn len(&self, queue: &str) -> Result<u64, QueueError> {
        match self.command(&["LLEN", queue])? {
            Value::Number(n) => n.as_u64().ok_or_else(|| {
                QueueError::BadResponse(format!("LLEN returned a non-integer length: {n}"))
            }),
            other => Err(QueueError::BadResponse(format!(
                "LLEN returned a non-numeric result: {other}"
            ))),
        }
    }

    /// Get the endpoint base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

/// The three Watchtower queues with strict-priority polling.
#[derive(Debug, Clone)]
pub struct JobQueues {
    client: QueueClient,
    names: QueueNames,
}

impl JobQueues {
    pub fn new(client: QueueClient, names: QueueNames) -> Self {
        Self { client, names }
    }

    /// Pop the head of the first non-empty queue, checking in priority
    /// order: new-version, then main, then batch. `None` when all three are
    /// empty. Callers re-invoke per iteration, so a long batch backlog can
    /// never starve a fresh new-version arrival for longer than one job.
    pub fn pop_next(&self) -> Result<Option<RawJob>, QueueError> {
        let order = [
            (QueueSource::NewVersion, self.names.new_version.as_str()),
            (QueueSource::Main, self.names.main.as_str()),
            (QueueSource::Batch, self.names.batch.as_str()),
        ];

        for (source, name) in order {
            if let Some(payload) = self.client.pop(name)? {
                return Ok(Some(RawJob { source, payload }));
            }
        }
        Ok(None)
    }

    /// Enqueue a batch backfill payload.
    pub fn push_batch(&self, payload: &str) -> Result<u64, QueueError> {
        self.client.push(&self.names.batch, payload)
    }

    pub fn names(&self) -> &QueueNames {
        &self.names
    }
}
