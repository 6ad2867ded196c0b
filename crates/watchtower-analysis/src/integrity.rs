//! Registry-vs-source integrity check.
//!
//! The published artifact and the tagged source tree should agree. Files
//! that exist only in the published artifact and do not look like build
//! output are the classic tampering signature; build output and content
//! drift warn; files present only in the source are legitimate (packages
//! routinely publish a subset of the repository).

use std::collections::BTreeSet;
use std::path::Path;

use tracing::debug;
use walkdir::WalkDir;
use watchtower_registry::repo_url::parse_repository_url;
use watchtower_registry::{RepositoryField, git};
use watchtower_types::{CheckStatus, IntegrityFindings};

/// Housekeeping paths excluded from the comparison on both sides.
const IGNORED_FILES: &[&str] = &[
    "package-lock.json",
    "npm-shrinkwrap.json",
    "yarn.lock",
    "pnpm-lock.yaml",
    ".npmignore",
    ".gitignore",
    ".gitattributes",
    ".travis.yml",
    "appveyor.yml",
    ".gitlab-ci.yml",
];

const IGNORED_DIRS: &[&str] = &[".git", ".github", ".circleci", "node_modules"];

/// Directory prefixes that mark a published-only file as build output.
const BUILD_OUTPUT_DIRS: &[&str] = &["cjs", "umd", "esm", "es", "amd"];

/// Basename suffixes that mark a published-only file as build output.
const BUILD_OUTPUT_SUFFIXES: &[&str] = &[
    ".development.js",
    ".production.js",
    ".production.min.js",
    ".profiling.js",
    ".profiling.min.js",
    ".min.js",
    ".min.mjs",
    ".min.css",
    ".map",
    ".d.ts",
    ".d.mts",
    ".d.cts",
];

/// Root-level files commonly generated at publish time.
const ROOT_FILE_ALLOWLIST: &[&str] = &[
    "index.js",
    "index.mjs",
    "index.cjs",
    "jsx-runtime.js",
    "jsx-dev-runtime.js",
];

/// Documentation files shipped with artifacts.
const DOC_FILES: &[&str] = &[
    "LICENSE",
    "LICENSE.md",
    "LICENSE.txt",
    "LICENCE",
    "NOTICE",
    "README",
    "README.md",
    "SECURITY.md",
];

/// Result of the integrity check.
#[derive(Debug, Clone)]
pub struct IntegrityCheck {
    pub status: CheckStatus,
    pub findings: IntegrityFindings,
    pub reason: Option<String>,
}

impl IntegrityCheck {
    fn warning(reason: &str, findings: IntegrityFindings) -> Self {
        Self {
            status: CheckStatus::Warning,
            findings,
            reason: Some(reason.to_string()),
        }
    }
}

fn is_ignored(relative: &str) -> bool {
    let segments: Vec<&str> = relative.split('/').collect();
    let Some(basename) = segments.last() else {
        return true;
    };

    if IGNORED_FILES.contains(basename) {
        return true;
    }
    if basename.to_ascii_uppercase().starts_with("CHANGELOG") {
        return true;
    }
    segments[..segments.len() - 1]
        .iter()
        .any(|segment| IGNORED_DIRS.contains(segment) || *segment == "dist" || *segment == "build")
}

/// Whether a published-only file looks like legitimate build output.
fn is_build_artifact(relative: &str) -> bool {
    let segments: Vec<&str> = relative.split('/').collect();
    let basename = segments.last().copied().unwrap_or(relative);

    if let Some(first) = segments.first() {
        if segments.len() > 1 && BUILD_OUTPUT_DIRS.contains(first) {
            return true;
        }
    }
    if BUILD_OUTPUT_SUFFIXES
        .iter()
        .any(|suffix| basename.ends_with(suffix))
    {
        return true;
    }
    if segments.len() == 1
        && (ROOT_FILE_ALLOWLIST.contains(&basename) || DOC_FILES.contains(&basename))
    {
        return true;
    }
    false
}

fn relative_files(root: &Path) -> BTreeSet<String> {
    WalkDir::new(root)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| {
            entry
                .path()
                .strip_prefix(root)
                .ok()
                .map(|p| p.to_string_lossy().replace('\\', "/"))
        })
        .filter(|relative| !is_ignored(relative))
        .collect()
}

fn files_differ(a: &Path, b: &Path) -> bool {
    match (std::fs::read(a), std::fs::read(b)) {
        (Ok(left), Ok(right)) => left != right,
        _ => true,
    }
}

/// Compare two extracted trees. Pure directory work; clone acquisition
/// happens in [`check_integrity`].
pub fn compare_trees(published: &Path, source: &Path) -> IntegrityFindings {
    let published_files = relative_files(published);
    let source_files = relative_files(source);

    let mut findings = IntegrityFindings::default();

    for relative in &published_files {
        if source_files.contains(relative) {
            if files_differ(&published.join(relative), &source.join(relative)) {
                findings.modified_files.push(relative.clone());
            }
        } else if is_build_artifact(relative) {
            findings.build_artifact_files.push(relative.clone());
        } else {
            findings.suspicious_files.push(relative.clone());
        }
    }

    // Files only in the source tree are ignored: subset publishing is
    // legitimate.
    findings
}

fn classify(findings: &IntegrityFindings) -> (CheckStatus, Option<String>) {
    if !findings.suspicious_files.is_empty() {
        let sample: Vec<&str> = findings
            .suspicious_files
            .iter()
            .take(5)
            .map(String::as_str)
            .collect();
        return (
            CheckStatus::Fail,
            Some(format!(
                "published artifact contains {} file(s) absent from the source tag: {}",
                findings.suspicious_files.len(),
                sample.join(", ")
            )),
        );
    }

    if !findings.modified_files.is_empty() {
        return (
            CheckStatus::Warning,
            Some(format!(
                "{} file(s) differ between the published artifact and the source tag",
                findings.modified_files.len()
            )),
        );
    }

    if !findings.build_artifact_files.is_empty() {
        return (
            CheckStatus::Warning,
            Some(format!(
                "{} build artifact(s) present only in the published artifact",
                findings.build_artifact_files.len()
            )),
        );
    }

    (CheckStatus::Pass, None)
}

/// Run the full integrity check for one published version.
///
/// `clone_dest` must not exist yet; partial clones are removed between tag
/// attempts. The caller owns the surrounding temp tree.
pub fn check_integrity(
    repository: Option<&RepositoryField>,
    version: &str,
    package_root: &Path,
    clone_dest: &Path,
) -> IntegrityCheck {
    let Some(raw_url) = repository.and_then(RepositoryField::url) else {
        return IntegrityCheck::warning(
            "no source URL in package metadata",
            IntegrityFindings::default(),
        );
    };

    let Some(repo) = parse_repository_url(raw_url) else {
        return IntegrityCheck::warning(
            "source URL does not resolve to a known host",
            IntegrityFindings::default(),
        );
    };

    let https_url = repo.https_url();
    let mut findings = IntegrityFindings {
        source_url: Some(https_url.clone()),
        ..IntegrityFindings::default()
    };

    let tag = match git::clone_version_tag(&https_url, version, clone_dest) {
        Ok(Some(tag)) => tag,
        Ok(None) => {
            return IntegrityCheck::warning("no matching release tag in source repository", findings);
        }
        Err(err) => {
            debug!(url = %https_url, error = %err, "source clone failed");
            return IntegrityCheck::warning("source repository could not be cloned", findings);
        }
    };
    findings.compared_tag = Some(tag);

    // Monorepos publish from a subdirectory declared in the manifest.
    let source_root = match repository.and_then(RepositoryField::directory) {
        Some(directory) => clone_dest.join(directory),
        None => clone_dest.to_path_buf(),
    };
    if !source_root.is_dir() {
        return IntegrityCheck::warning(
            "declared repository directory missing from source tag",
            findings,
        );
    }

    let compared = compare_trees(package_root, &source_root);
    findings.suspicious_files = compared.suspicious_files;
    findings.build_artifact_files = compared.build_artifact_files;
    findings.modified_files = compared.modified_files;

    let (status, reason) = classify(&findings);
    IntegrityCheck {
        status,
        findings,
        reason,
    }
}
