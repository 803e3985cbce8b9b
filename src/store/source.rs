//! Source descriptors and their cache policy
//!
//! A source is an origin (URI or local path) plus an optional version and
//! optional include/exclude file patterns. The normalized `origin@version`
//! string, suffixed with any patterns, is the reference recorded in the
//! store index.

use crate::error::ConvoyResult;
use crate::store::filter::PathFilter;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a component's files come from
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceDescriptor {
    /// Origin URI or path
    pub origin: String,

    /// Version, tag, branch or commit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Only files matching one of these globs are stored
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub include: Vec<String>,

    /// Files matching any of these globs are never stored
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude: Vec<String>,
}

/// How long a reference binding may be trusted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CachePolicy {
    /// Semver tag or commit SHA; the content behind it never changes
    Permanent,
    /// Branch or unversioned origin; binding goes stale after a TTL
    Mutable,
}

impl SourceDescriptor {
    pub fn new(origin: impl Into<String>, version: Option<&str>) -> Self {
        Self {
            origin: origin.into(),
            version: version.map(str::to_string),
            include: Vec::new(),
            exclude: Vec::new(),
        }
    }

    pub fn with_include<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.include.extend(patterns.into_iter().map(Into::into));
        self
    }

    pub fn with_exclude<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude.extend(patterns.into_iter().map(Into::into));
        self
    }

    /// Normalized reference string used as the index key.
    ///
    /// Patterns are part of the key: the same origin filtered two ways
    /// yields two different file sets.
    pub fn reference(&self) -> String {
        let origin = normalize_origin(&self.origin);
        let mut reference = match self.version.as_deref().map(str::trim) {
            Some(v) if !v.is_empty() => format!("{}@{}", origin, v),
            _ => origin,
        };
        for (label, patterns) in [("include", &self.include), ("exclude", &self.exclude)] {
            if !patterns.is_empty() {
                let mut sorted: Vec<&str> = patterns.iter().map(|p| p.trim()).collect();
                sorted.sort_unstable();
                sorted.dedup();
                reference.push_str(&format!("|{}={}", label, sorted.join(",")));
            }
        }
        reference
    }

    /// Compiled include/exclude patterns
    pub fn filter(&self) -> ConvoyResult<PathFilter> {
        PathFilter::new(&self.include, &self.exclude)
    }

    /// Version pinned either explicitly or via a `?ref=` query parameter
    pub fn effective_version(&self) -> Option<String> {
        self.version
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .or_else(|| extract_ref(&self.origin))
    }

    /// Classify whether the content behind this reference can change
    pub fn policy(&self) -> CachePolicy {
        match self.effective_version() {
            Some(v) if is_semver(&v) || is_commit_sha(&v) => CachePolicy::Permanent,
            _ => CachePolicy::Mutable,
        }
    }
}

impl fmt::Display for SourceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.reference())
    }
}

/// Lower-case the scheme (and any forced-getter prefix like `git::`),
/// trim whitespace, keep everything after the scheme as written.
///
/// A scheme only counts when it appears before the first `/` or `?`, so a
/// URI embedded in a query string leaves the path untouched.
pub fn normalize_origin(origin: &str) -> String {
    let trimmed = origin.trim();
    let boundary = trimmed.find(['/', '?']).unwrap_or(trimmed.len());
    let split_at = trimmed
        .find("://")
        .filter(|&idx| idx < boundary)
        .or_else(|| trimmed.find("::").filter(|&idx| idx < boundary));

    match split_at {
        Some(idx) => format!(
            "{}{}",
            trimmed[..idx].to_ascii_lowercase(),
            &trimmed[idx..]
        ),
        None => trimmed.to_string(),
    }
}

/// Extract the `ref` query parameter from an origin URI
fn extract_ref(origin: &str) -> Option<String> {
    let (_, query) = origin.split_once('?')?;
    let query = query.split('#').next().unwrap_or_default();
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == "ref")
        .map(|(_, value)| value.to_string())
        .filter(|value| !value.is_empty())
}

fn is_semver(version: &str) -> bool {
    let bare = version.strip_prefix('v').unwrap_or(version);
    semver::Version::parse(bare).is_ok()
}

fn is_commit_sha(version: &str) -> bool {
    (7..=40).contains(&version.len()) && version.chars().all(|c| c.is_ascii_hexdigit())
}
