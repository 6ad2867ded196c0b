//! Canonicalisation of package `repository` URLs.
//!
//! Manifests declare their source in half a dozen shapes: `git+https://`,
//! `git://`, plain `https://`, `github:owner/repo`, and the bare
//! `owner/repo` shorthand. Everything resolves to a single https URL on a
//! known host, or nothing at all; an unrecognised host is treated the same
//! as a missing repository field.

use url::Url;

/// Source hosts a clone is allowed to target.
const KNOWN_HOSTS: &[&str] = &["github.com", "gitlab.com", "bitbucket.org"];

/// A repository URL resolved to a single cloneable https form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalRepo {
    pub host: String,
    pub owner: String,
    pub name: String,
}

impl CanonicalRepo {
    /// The https clone URL.
    pub fn https_url(&self) -> String {
        format!("https://{}/{}/{}", self.host, self.owner, self.name)
    }
}

/// Parse a raw repository declaration into its canonical form.
///
/// Returns `None` for anything that does not resolve to exactly one known
/// host, including SSH remotes and self-hosted URLs.
///
/// # Example
///
/// ```
/// use watchtower_registry::repo_url::parse_repository_url;
///
/// let repo = parse_repository_url("git+https://github.com/lodash/lodash.git").expect("parse");
/// assert_eq!(repo.https_url(), "https://github.com/lodash/lodash");
///
/// assert_eq!(
///     parse_repository_url("github:facebook/react").expect("parse").owner,
///     "facebook"
/// );
/// assert!(parse_repository_url("https://example.com/owner/repo").is_none());
/// ```
pub fn parse_repository_url(raw: &str) -> Option<CanonicalRepo> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    // Prefix shorthands: `github:owner/repo` and friends.
    for (prefix, host) in [
        ("github:", "github.com"),
        ("gitlab:", "gitlab.com"),
        ("bitbucket:", "bitbucket.org"),
    ] {
        if let Some(rest) = trimmed.strip_prefix(prefix) {
            return owner_repo_from(rest, host);
        }
    }

    let without_scheme_prefix = trimmed.strip_prefix("git+").unwrap_or(trimmed);

    if let Ok(parsed) = Url::parse(without_scheme_prefix) {
        if !matches!(parsed.scheme(), "https" | "http" | "git") {
            return None;
        }
        let host = parsed.host_str()?;
        if !KNOWN_HOSTS.contains(&host) {
            return None;
        }
        let mut segments = parsed.path_segments()?.filter(|s| !s.is_empty());
        let owner = segments.next()?;
        let name = segments.next()?;
        return owner_repo_from(&format!("{owner}/{name}"), host);
    }

    // Bare `owner/repo` shorthand defaults to GitHub.
    if trimmed.split('/').count() == 2 && !trimmed.contains(':') && !trimmed.contains('@') {
        return owner_repo_from(trimmed, "github.com");
    }

    None
}

fn owner_repo_from(path: &str, host: &str) -> Option<CanonicalRepo> {
    let mut segments = path.trim_matches('/').split('/');
    let owner = segments.next()?.trim();
    let name = segments.next()?.trim().trim_end_matches(".git");
    if owner.is_empty() || name.is_empty() || segments.next().is_some() {
        return None;
    }
    Some(CanonicalRepo {
        host: host.to_string(),
        owner: owner.to_string(),
        name: name.to_string(),
    })
}
