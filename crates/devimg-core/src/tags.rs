//! Destination tags derived from the CI trigger.
//!
//! | Event                         | Tags                               |
//! |-------------------------------|------------------------------------|
//! | tag `v1.2.3`                  | `1.2.3`, `1.2`, `1`, `latest`      |
//! | tag `v1.2.3-rc.1`             | `1.2.3-rc.1`                       |
//! | other tag                     | sanitized tag name                 |
//! | push to default branch        | `latest`                           |
//! | push to any other branch      | sanitized branch name              |
//! | pull request N                | `pr-N`                             |

use serde::{Deserialize, Serialize};

/// Maximum length of an image tag.
pub const MAX_TAG_LEN: usize = 128;

/// Branch used when `DEVIMG_DEFAULT_BRANCH` is not set.
pub const DEFAULT_BRANCH: &str = "main";

/// The event that triggered the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CiEvent {
    Push { branch: String },
    Tag { name: String },
    PullRequest { number: u64 },
}

impl CiEvent {
    /// Read the event from GitHub Actions variables.
    pub fn from_env() -> Option<Self> {
        // arch-lint: allow(no-silent-result-drop) reason="an unset variable means no CI event"
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Option<Self> {
        let is_pull_request =
            lookup("GITHUB_EVENT_NAME").is_some_and(|name| name.starts_with("pull_request"));
        let git_ref = lookup("GITHUB_REF");
        let git_ref = git_ref.as_deref();

        if is_pull_request {
            // refs/pull/<N>/merge
            let number = git_ref
                .and_then(|r| r.strip_prefix("refs/pull/"))
                .and_then(|rest| rest.split('/').next())
                .and_then(parse_number)?;
            return Some(Self::PullRequest { number });
        }

        if let Some(name) = git_ref.and_then(|r| r.strip_prefix("refs/tags/")) {
            return Some(Self::Tag {
                name: name.to_owned(),
            });
        }
        if let Some(branch) = git_ref.and_then(|r| r.strip_prefix("refs/heads/")) {
            return Some(Self::Push {
                branch: branch.to_owned(),
            });
        }

        // Fall back to the short ref name
        let ref_name = lookup("GITHUB_REF_NAME").filter(|n| !n.is_empty())?;
        match lookup("GITHUB_REF_TYPE").as_deref() {
            Some("tag") => Some(Self::Tag { name: ref_name }),
            _ => Some(Self::Push { branch: ref_name }),
        }
    }

    /// Destination tags for this event.
    pub fn tags(&self, default_branch: &str) -> Vec<String> {
        match self {
            Self::Tag { name } => match parse_semver(name) {
                Some(v) if v.pre.is_none() => vec![
                    format!("{}.{}.{}", v.major, v.minor, v.patch),
                    format!("{}.{}", v.major, v.minor),
                    v.major.to_string(),
                    "latest".to_owned(),
                ],
                Some(v) => vec![v.full],
                None => non_empty(sanitize_tag(name)),
            },
            Self::Push { branch } if branch == default_branch => vec!["latest".to_owned()],
            Self::Push { branch } => non_empty(sanitize_branch(branch)),
            Self::PullRequest { number } => vec![format!("pr-{number}")],
        }
    }
}

fn non_empty(tag: String) -> Vec<String> {
    if tag.is_empty() { vec![] } else { vec![tag] }
}

struct Semver {
    major: u64,
    minor: u64,
    patch: u64,
    pre: Option<String>,
    /// Version without the `v` prefix
    full: String,
}

fn parse_semver(tag: &str) -> Option<Semver> {
    let full = match tag.strip_prefix('v') {
        Some(rest) => rest,
        None => tag,
    };
    let (core, pre) = match full.split_once('-') {
        Some((core, pre)) => (core, Some(pre.to_owned())),
        None => (full, None),
    };
    // Build metadata is not representable in a tag
    let core = core.split('+').next()?;

    let mut parts = core.split('.');
    let major = parts.next().and_then(parse_number)?;
    let minor = parts.next().and_then(parse_number)?;
    let patch = parts.next().and_then(parse_number)?;
    if parts.next().is_some() {
        return None;
    }

    Some(Semver {
        major,
        minor,
        patch,
        pre,
        full: sanitize_tag(full),
    })
}

fn parse_number(s: &str) -> Option<u64> {
    // arch-lint: allow(no-silent-result-drop) reason="a non-numeric component means the ref is not a version"
    s.parse().ok()
}

/// Replace characters not allowed in an image tag with `-`, strip leading
/// `.`/`-`, and cap the length.
pub fn sanitize_tag(raw: &str) -> String {
    let replaced: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
                c
            } else {
                '-'
            }
        })
        .collect();
    let mut tag = replaced.trim_start_matches(['.', '-']).to_owned();
    tag.truncate(MAX_TAG_LEN);
    tag
}

/// Branch names are lowercased before sanitizing.
pub fn sanitize_branch(branch: &str) -> String {
    sanitize_tag(&branch.to_ascii_lowercase())
}

/// Remove duplicate tags, keeping the first occurrence, and drop blanks.
pub fn dedupe_tags(tags: &[String]) -> Vec<String> {
    let mut seen = Vec::with_capacity(tags.len());
    for tag in tags {
        let tag = tag.trim();
        if !tag.is_empty() && !seen.iter().any(|t: &String| t == tag) {
            seen.push(tag.to_owned());
        }
    }
    seen
}
