//! Install-script capability scan.
//!
//! Lifecycle hooks run arbitrary commands on every `npm install`, which
//! makes them the cheapest persistence vector in the ecosystem. The scan
//! classifies what the hook commands are capable of rather than what they
//! claim to do.

use std::collections::BTreeMap;
use std::path::Path;

use serde_json::Value;
use watchtower_types::{CheckStatus, ScriptFindings};

/// Hooks that run during installation.
const LIFECYCLE_HOOKS: &[&str] = &["preinstall", "install", "postinstall"];

/// Scanned for capabilities but not counted as an install hook.
const SCANNED_ONLY: &[&str] = &["prepare"];

/// Capability pattern family: network access.
const NETWORK_PATTERNS: &[&str] = &[
    "curl", "wget", "fetch", "http://", "https://", "axios", "request", "node-fetch", "socket",
    "net.", "dns.",
];

/// Capability pattern family: shell execution.
const SHELL_PATTERNS: &[&str] = &[
    "sh -c",
    "bash -c",
    "exec",
    "spawn",
    "child_process",
    "eval",
    "`",
    "$(",
];

/// Capability pattern family: outright dangerous.
const DANGEROUS_PATTERNS: &[&str] = &[
    "rm -rf",
    "rm -fr",
    "chmod 777",
    "sudo",
    "/etc/passwd",
    "/etc/shadow",
    "process.env",
    "printenv",
    "base64 -d",
    "base64 --decode",
    "powershell",
    "cmd /c",
    "eval(",
    "function(",
    "\\x",
    "\\u00",
];

/// Commands a hook may start with and still count as a known build step.
const SAFE_BUILDERS: &[&str] = &[
    "node",
    "npm run",
    "tsc",
    "babel",
    "webpack",
    "rollup",
    "esbuild",
    "husky",
    "patch-package",
    "ngcc",
    "prisma generate",
    "node-gyp",
    "node-pre-gyp",
    "prebuild-install",
    "cmake-js",
];

/// Result of the install-script check.
#[derive(Debug, Clone)]
pub struct ScriptsCheck {
    pub status: CheckStatus,
    pub findings: ScriptFindings,
    pub reason: Option<String>,
}

fn matches_any(command: &str, patterns: &[&str]) -> bool {
    let lowered = command.to_lowercase();
    patterns.iter().any(|pattern| lowered.contains(pattern))
}

/// Every `&&`/`;`-chained part of the command starts with a known builder.
fn is_safe_builder_command(command: &str) -> bool {
    command
        .split(&['&', ';'][..])
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .all(|part| {
            let lowered = part.to_lowercase();
            SAFE_BUILDERS
                .iter()
                .any(|builder| lowered == *builder || lowered.starts_with(&format!("{builder} ")))
        })
}

/// Evaluate a manifest's `scripts` table.
///
/// Rules, in order: any dangerous pattern or a network+shell combination
/// fails; no install hooks passes; hooks restricted to the safe-builder
/// allowlist warn; anything else fails.
pub fn evaluate_scripts(scripts: &BTreeMap<String, String>) -> ScriptsCheck {
    let mut findings = ScriptFindings::default();

    for (name, command) in scripts {
        let is_hook = LIFECYCLE_HOOKS.contains(&name.as_str());
        let is_scanned = is_hook || SCANNED_ONLY.contains(&name.as_str());
        if !is_scanned {
            continue;
        }
        if is_hook {
            findings.hooks.insert(name.clone(), command.clone());
        }
        if matches_any(command, NETWORK_PATTERNS) {
            findings.network_hits.push(command.clone());
        }
        if matches_any(command, SHELL_PATTERNS) {
            findings.shell_hits.push(command.clone());
        }
        if matches_any(command, DANGEROUS_PATTERNS) {
            findings.dangerous_hits.push(command.clone());
        }
    }

    let (status, reason) = classify(&findings);
    ScriptsCheck {
        status,
        findings,
        reason,
    }
}

fn classify(findings: &ScriptFindings) -> (CheckStatus, Option<String>) {
    if !findings.dangerous_hits.is_empty() {
        return (
            CheckStatus::Fail,
            Some(format!(
                "install scripts contain dangerous patterns: {}",
                findings.dangerous_hits.join("; ")
            )),
        );
    }

    if !findings.network_hits.is_empty() && !findings.shell_hits.is_empty() {
        return (
            CheckStatus::Fail,
            Some("install scripts combine network access with shell execution".to_string()),
        );
    }

    if findings.hooks.is_empty() {
        return (CheckStatus::Pass, None);
    }

    if findings
        .hooks
        .values()
        .all(|command| is_safe_builder_command(command))
    {
        return (
            CheckStatus::Warning,
            Some("install hooks present but limited to known build tools".to_string()),
        );
    }

    (
        CheckStatus::Fail,
        Some(format!(
            "install hooks run unrecognized commands: {}",
            findings
                .hooks
                .values()
                .cloned()
                .collect::<Vec<_>>()
                .join("; ")
        )),
    )
}

/// Read `package.json` under `package_root` and evaluate its scripts. A
/// missing or unreadable manifest counts as having no hooks.
pub fn check_install_scripts(package_root: &Path) -> ScriptsCheck {
    let scripts = read_scripts(package_root).unwrap_or_default();
    evaluate_scripts(&scripts)
}

fn read_scripts(package_root: &Path) -> Option<BTreeMap<String, String>> {
    let raw = std::fs::read_to_string(package_root.join("package.json")).ok()?;
    let manifest: Value = serde_json::from_str(&raw).ok()?;
    let table = manifest.get("scripts")?.as_object()?;
    Some(
        table
            .iter()
            .filter_map(|(name, value)| {
                value
                    .as_str()
                    .map(|command| (name.clone(), command.to_string()))
            })
            .collect(),
    )
}
