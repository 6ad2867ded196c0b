//! Registry and source-repository primitives for Watchtower.
//!
//! This crate owns the side-effecting utilities the analyzer builds on:
//!
//! - [`RegistryClient`] - npm registry packuments and tarball downloads
//! - [`select_previous_versions`] - historical version selection for backfill
//! - [`repo_url`] - canonicalisation of the many shapes a `repository` field
//!   arrives in
//! - [`git`] - shallow clones and commit-log extraction via the `git` binary
//!
//! All network calls use a blocking client with a finite timeout; a stalled
//! registry must never stall a job forever.

pub mod archive;
pub mod git;
pub mod repo_url;

mod client;

pub use client::{
    Packument, RegistryClient, RepositoryField, VersionMeta, select_previous_versions,
    DEFAULT_REGISTRY_URL,
};

/// Registry/source operation failure.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("registry request failed: {0}")]
    Transport(String),
    #[error("package not found: {0}")]
    NotFound(String),
    #[error("unexpected registry response: {0}")]
    BadMetadata(String),
    #[error("git {operation} failed: {detail}")]
    Git { operation: String, detail: String },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
