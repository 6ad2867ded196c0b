//! npm registry client: packuments, tarballs, and version selection.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::RegistryError;
use crate::archive;

/// Default npm registry endpoint.
pub const DEFAULT_REGISTRY_URL: &str = "https://registry.npmjs.org";

/// Default timeout for registry requests. Tarballs can be large.
const REQUEST_TIMEOUT_SECS: u64 = 60;

const USER_AGENT: &str = concat!("watchtower/", env!("CARGO_PKG_VERSION"));

/// The `repository` field of a package manifest: either a bare URL string or
/// an object with `url` and an optional monorepo `directory`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RepositoryField {
    Url(String),
    Object {
        #[serde(default)]
        url: Option<String>,
        #[serde(default)]
        directory: Option<String>,
    },
}

impl RepositoryField {
    /// The raw repository URL, if one is present.
    pub fn url(&self) -> Option<&str> {
        match self {
            RepositoryField::Url(url) => Some(url),
            RepositoryField::Object { url, .. } => url.as_deref(),
        }
    }

    /// Monorepo subdirectory the package is published from, if declared.
    pub fn directory(&self) -> Option<&str> {
        match self {
            RepositoryField::Url(_) => None,
            RepositoryField::Object { directory, .. } => directory.as_deref(),
        }
    }
}

/// Per-version metadata inside a packument.
#[derive(Debug, Clone, Deserialize)]
pub struct VersionMeta {
    #[serde(default)]
    pub dist: Dist,
    #[serde(default)]
    pub repository: Option<RepositoryField>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Dist {
    #[serde(default)]
    pub tarball: Option<String>,
}

/// Registry document for one package: every published version plus the
/// publish-time index.
#[derive(Debug, Clone, Deserialize)]
pub struct Packument {
    #[serde(default)]
    pub versions: BTreeMap<String, VersionMeta>,
    /// Version -> ISO-8601 publish time. Also carries `created`/`modified`
    /// entries, which version selection ignores.
    #[serde(default)]
    pub time: BTreeMap<String, String>,
    #[serde(rename = "dist-tags", default)]
    pub dist_tags: BTreeMap<String, String>,
}

impl Packument {
    /// The registry's `latest` dist-tag, if present.
    pub fn latest_version(&self) -> Option<&str> {
        self.dist_tags.get("latest").map(String::as_str)
    }
}

/// Select up to `limit` historical versions for backfill analysis.
///
/// Versions sort newest-first by publish time. Stable releases are preferred;
/// prereleases only fill remaining slots when fewer than `limit` stable
/// versions exist. Excluded versions (typically the latest and the project's
/// current one) never appear.
pub fn select_previous_versions(
    packument: &Packument,
    exclude: &[&str],
    limit: usize,
) -> Vec<String> {
    let mut dated: Vec<(&str, &str)> = packument
        .time
        .iter()
        .filter(|(version, _)| packument.versions.contains_key(*version))
        .filter(|(version, _)| !exclude.contains(&version.as_str()))
        .map(|(version, time)| (version.as_str(), time.as_str()))
        .collect();

    // ISO-8601 strings order lexicographically; newest first.
    dated.sort_by(|a, b| b.1.cmp(a.1));

    let mut selected: Vec<String> = dated
        .iter()
        .filter(|(version, _)| watchtower_version::is_stable(version))
        .take(limit)
        .map(|(version, _)| version.to_string())
        .collect();

    if selected.len() < limit {
        for (version, _) in &dated {
            if selected.len() >= limit {
                break;
            }
            if !watchtower_version::is_stable(version) {
                selected.push(version.to_string());
            }
        }
    }

    selected
}

/// Blocking npm registry client.
#[derive(Debug, Clone)]
pub struct RegistryClient {
    base_url: String,
    client: reqwest::blocking::Client,
}

impl RegistryClient {
    /// Create a client for the given registry base URL.
    pub fn new(base_url: &str) -> Result<Self, RegistryError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| RegistryError::Transport(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    /// Create a client for the public npm registry.
    pub fn npm() -> Result<Self, RegistryError> {
        Self::new(DEFAULT_REGISTRY_URL)
    }

    /// Fetch the full packument for a package. Scoped names are escaped the
    /// way the registry expects (`@scope%2fname`).
    pub fn packument(&self, name: &str) -> Result<Packument, RegistryError> {
        let escaped = name.replace('/', "%2f");
        let url = format!("{}/{}", self.base_url, escaped);

        let response = self
            .client
            .get(&url)
            .send()
            .map_err(|e| RegistryError::Transport(e.to_string()))?;

        match response.status() {
            reqwest::StatusCode::OK => response
                .json()
                .map_err(|e| RegistryError::BadMetadata(format!("invalid packument: {e}"))),
            reqwest::StatusCode::NOT_FOUND => Err(RegistryError::NotFound(name.to_string())),
            status => Err(RegistryError::Transport(format!(
                "unexpected status {status} while fetching packument for {name}"
            ))),
        }
    }

    /// Metadata for a single version, from the packument.
    pub fn version_meta(&self, name: &str, version: &str) -> Result<VersionMeta, RegistryError> {
        let packument = self.packument(name)?;
        packument.versions.get(version).cloned().ok_or_else(|| {
            RegistryError::NotFound(format!("{name}@{version}"))
        })
    }

    /// Download a version's published tarball and extract it under `dest`.
    ///
    /// Returns the package root inside `dest` (npm tarballs nest everything
    /// under a top-level `package/` entry; falls back to `dest` itself for
    /// archives that do not).
    pub fn download_package(
        &self,
        meta: &VersionMeta,
        dest: &Path,
    ) -> Result<PathBuf, RegistryError> {
        let tarball = meta.dist.tarball.as_deref().ok_or_else(|| {
            RegistryError::BadMetadata("version has no dist.tarball".to_string())
        })?;

        let response = self
            .client
            .get(tarball)
            .send()
            .map_err(|e| RegistryError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(RegistryError::Transport(format!(
                "unexpected status {} while downloading {tarball}",
                response.status()
            )));
        }

        let bytes = response
            .bytes()
            .map_err(|e| RegistryError::Transport(format!("failed to read tarball body: {e}")))?;

        archive::extract_tar_gz(&bytes, dest)?;

        let package_root = dest.join("package");
        if package_root.is_dir() {
            Ok(package_root)
        } else {
            Ok(dest.to_path_buf())
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}
