//! Version parsing, ordering, and advisory matching for Watchtower.
//!
//! Upstream registries are not strict about semver: tags carry `v` prefixes,
//! advisories use two-segment versions like `4.18`, and the occasional
//! garbage string shows up in stored data. Everything here parses leniently
//! and degrades to string equality instead of erroring, because a version we
//! cannot parse must never crash a job.
//!
//! # Example
//!
//! ```
//! use watchtower_version::{parse_version, is_version_fixed, is_stable};
//!
//! let v = parse_version("v4.18.0").expect("parse");
//! assert_eq!(v.to_string(), "4.18.0");
//! assert!(is_stable("4.18.0"));
//! assert!(!is_stable("5.0.0-beta.1"));
//! assert!(is_version_fixed("4.18.0", &["4.17.21".to_string()]));
//! ```

use std::cmp::Ordering;

use semver::Version;
use watchtower_types::{AffectedEntry, AffectedVersions, Vulnerability};

/// Parse a version string leniently.
///
/// Accepts a leading `v`/`V`, pads missing minor/patch segments with zeros
/// (`"4.18"` parses as `4.18.0`), and preserves prerelease/build suffixes.
/// Returns `None` for strings that do not start with a numeric segment.
pub fn parse_version(raw: &str) -> Option<Version> {
    let trimmed = raw.trim().trim_start_matches(['v', 'V']);
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(v) = Version::parse(trimmed) {
        return Some(v);
    }

    // Split off any prerelease/build suffix before padding segments.
    let core_end = trimmed
        .find(['-', '+'])
        .unwrap_or(trimmed.len());
    let (core, suffix) = trimmed.split_at(core_end);

    let mut segments = core.split('.');
    let major = segments.next()?.parse::<u64>().ok()?;
    let minor = segments.next().unwrap_or("0").parse::<u64>().ok()?;
    let patch = segments.next().unwrap_or("0").parse::<u64>().ok()?;
    if segments.next().is_some() {
        return None;
    }

    Version::parse(&format!("{major}.{minor}.{patch}{suffix}")).ok()
}

/// Compare two version strings. `None` when either side is unparseable.
pub fn compare_versions(a: &str, b: &str) -> Option<Ordering> {
    Some(parse_version(a)?.cmp(&parse_version(b)?))
}

/// `a >= b`, with string equality as the fallback for unparseable input.
pub fn version_gte(a: &str, b: &str) -> bool {
    match compare_versions(a, b) {
        Some(ord) => ord != Ordering::Less,
        None => a == b,
    }
}

/// `a < b`. Unparseable input never satisfies a strict inequality.
pub fn version_lt(a: &str, b: &str) -> bool {
    matches!(compare_versions(a, b), Some(Ordering::Less))
}

/// A stable release: parseable and without a prerelease tag.
pub fn is_stable(raw: &str) -> bool {
    parse_version(raw).is_some_and(|v| v.pre.is_empty())
}

fn entry_matches(version: &str, entry: &AffectedEntry) -> bool {
    if let Some(versions) = &entry.versions {
        let listed = versions.iter().any(|candidate| {
            candidate == version
                || matches!(compare_versions(candidate, version), Some(Ordering::Equal))
        });
        if listed {
            return true;
        }
    }

    let Some(ranges) = &entry.ranges else {
        return false;
    };

    ranges.iter().any(|range| {
        // Latch events left-to-right; the most recent introduced/fixed win.
        let mut introduced: Option<&str> = None;
        let mut fixed: Option<&str> = None;
        for event in &range.events {
            if let Some(i) = &event.introduced {
                introduced = Some(i);
            }
            if let Some(f) = &event.fixed {
                fixed = Some(f);
            }
        }

        let Some(introduced) = introduced else {
            return false;
        };
        if !version_gte(version, introduced) {
            return false;
        }
        match fixed {
            Some(fixed) => version_lt(version, fixed),
            None => true,
        }
    })
}

/// Whether `version` falls inside the stored `affected_versions` shape.
///
/// `None` is treated as universally affected, matching how advisories with
/// no version information are stored.
pub fn is_version_affected(version: &str, affected: Option<&AffectedVersions>) -> bool {
    match affected {
        None => true,
        Some(AffectedVersions::One(entry)) => entry_matches(version, entry),
        Some(AffectedVersions::Many(entries)) => {
            entries.iter().any(|entry| entry_matches(version, entry))
        }
    }
}

/// Whether `version` is at or above any listed fixed version.
pub fn is_version_fixed(version: &str, fixed_versions: &[String]) -> bool {
    fixed_versions
        .iter()
        .any(|fixed| version_gte(version, fixed))
}

/// Whether any advisory row leaves `version` affected and unfixed.
pub fn is_version_vulnerable(version: &str, vulnerabilities: &[Vulnerability]) -> bool {
    vulnerabilities.iter().any(|vuln| {
        is_version_affected(version, vuln.affected_versions.as_ref())
            && !is_version_fixed(version, &vuln.fixed_versions)
    })
}
