//! Shannon-entropy scan over a package's code files.
//!
//! High entropy is a proxy for obfuscation, packed payloads, or embedded
//! ciphertext. Minified bundles legitimately score high, so files inside
//! expected bundle directories only ever downgrade to a warning.

use std::path::Path;

use walkdir::WalkDir;
use watchtower_types::{CheckStatus, EntropySummary, HighEntropyFile};

/// Extensions that count as code for the scan.
const CODE_EXTENSIONS: &[&str] = &["js", "ts", "jsx", "tsx", "mjs", "cjs"];

/// Directory segments where high entropy is expected (bundled or minified
/// output).
const EXPECTED_DIRS: &[&str] = &["dist", "build", "bundle", "min", "minified", "vendor"];

/// Files above this entropy are tracked.
pub const HIGH_ENTROPY_THRESHOLD: f64 = 5.5;

/// Files above this entropy outside expected directories fail the check.
pub const FAIL_ENTROPY_THRESHOLD: f64 = 6.0;

/// Files larger than this are skipped.
const MAX_FILE_SIZE: u64 = 5 * 1024 * 1024;

/// Result of the entropy check.
#[derive(Debug, Clone)]
pub struct EntropyCheck {
    pub status: CheckStatus,
    pub summary: EntropySummary,
    pub reason: Option<String>,
}

/// Shannon entropy over the byte-frequency table, in bits per byte.
/// Ranges from 0.0 (uniform content) to 8.0 (uniformly random bytes).
pub fn shannon_entropy(bytes: &[u8]) -> f64 {
    if bytes.is_empty() {
        return 0.0;
    }

    let mut counts = [0u64; 256];
    for byte in bytes {
        counts[*byte as usize] += 1;
    }

    let len = bytes.len() as f64;
    counts
        .iter()
        .filter(|&&count| count > 0)
        .map(|&count| {
            let p = count as f64 / len;
            -p * p.log2()
        })
        .sum()
}

fn is_code_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| CODE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
}

/// Whether any segment of the relative path is an expected bundle directory.
fn in_expected_dir(relative: &str) -> bool {
    relative
        .split('/')
        .rev()
        .skip(1)
        .any(|segment| EXPECTED_DIRS.contains(&segment.to_ascii_lowercase().as_str()))
}

/// Scan every code file under `root`, excluding `node_modules`, skipping
/// empty files and files over 5 MiB.
pub fn scan_entropy(root: &Path) -> EntropyCheck {
    let mut summary = EntropySummary::default();
    let mut entropy_total = 0.0f64;

    for entry in WalkDir::new(root)
        .into_iter()
        .filter_entry(|e| e.file_name() != "node_modules")
        .filter_map(Result::ok)
    {
        if !entry.file_type().is_file() || !is_code_file(entry.path()) {
            continue;
        }
        let Ok(metadata) = entry.metadata() else {
            continue;
        };
        if metadata.len() == 0 || metadata.len() > MAX_FILE_SIZE {
            continue;
        }
        let Ok(bytes) = std::fs::read(entry.path()) else {
            continue;
        };

        let entropy = shannon_entropy(&bytes);
        summary.files_scanned += 1;
        entropy_total += entropy;
        if entropy > summary.max_entropy {
            summary.max_entropy = entropy;
        }

        if entropy > HIGH_ENTROPY_THRESHOLD {
            let relative = entry
                .path()
                .strip_prefix(root)
                .unwrap_or(entry.path())
                .to_string_lossy()
                .replace('\\', "/");
            summary.high_entropy_files.push(HighEntropyFile {
                expected_location: in_expected_dir(&relative),
                path: relative,
                entropy,
            });
        }
    }

    if summary.files_scanned > 0 {
        summary.average_entropy = entropy_total / summary.files_scanned as f64;
    }

    let (status, reason) = classify(&summary);
    EntropyCheck {
        status,
        summary,
        reason,
    }
}

/// Status rules: unexpected-location files above the fail threshold fail;
/// any other unexpected-location file warns; expected-location-only files
/// warn; otherwise pass.
pub fn classify(summary: &EntropySummary) -> (CheckStatus, Option<String>) {
    let unexpected: Vec<&HighEntropyFile> = summary
        .high_entropy_files
        .iter()
        .filter(|f| !f.expected_location)
        .collect();

    if let Some(worst) = unexpected
        .iter()
        .filter(|f| f.entropy > FAIL_ENTROPY_THRESHOLD)
        .max_by(|a, b| a.entropy.total_cmp(&b.entropy))
    {
        return (
            CheckStatus::Fail,
            Some(format!(
                "very high entropy ({:.2}) in {} outside bundle directories",
                worst.entropy, worst.path
            )),
        );
    }

    if let Some(worst) = unexpected
        .iter()
        .max_by(|a, b| a.entropy.total_cmp(&b.entropy))
    {
        return (
            CheckStatus::Warning,
            Some(format!(
                "high entropy ({:.2}) in {} outside bundle directories",
                worst.entropy, worst.path
            )),
        );
    }

    if !summary.high_entropy_files.is_empty() {
        return (
            CheckStatus::Warning,
            Some(format!(
                "{} high-entropy file(s), all inside bundle directories",
                summary.high_entropy_files.len()
            )),
        );
    }

    (CheckStatus::Pass, None)
}
