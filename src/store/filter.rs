//! Include/exclude glob filtering for source file sets
//!
//! A pattern containing `/` is matched against the whole relative path
//! (`modules/**/*.tf`); any other pattern is matched against the file name
//! alone, so `*.tf` selects Terraform files at every depth. Excludes win
//! over includes, and an empty include list selects everything.

use crate::error::{ConvoyError, ConvoyResult};
use glob::{MatchOptions, Pattern};

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// Compiled include and exclude patterns
#[derive(Debug, Clone, Default)]
pub struct PathFilter {
    include: Vec<Pattern>,
    exclude: Vec<Pattern>,
}

impl PathFilter {
    /// Compile both pattern lists; any invalid pattern fails the whole filter
    pub fn new(include: &[String], exclude: &[String]) -> ConvoyResult<Self> {
        Ok(Self {
            include: compile(include)?,
            exclude: compile(exclude)?,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.include.is_empty() && self.exclude.is_empty()
    }

    /// Whether a normalized `/`-separated relative path passes the filter
    pub fn matches(&self, path: &str) -> bool {
        let included =
            self.include.is_empty() || self.include.iter().any(|p| pattern_matches(p, path));
        included && !self.exclude.iter().any(|p| pattern_matches(p, path))
    }
}

fn compile(patterns: &[String]) -> ConvoyResult<Vec<Pattern>> {
    patterns
        .iter()
        .map(|pattern| {
            Pattern::new(pattern).map_err(|e| ConvoyError::InvalidPattern {
                pattern: pattern.clone(),
                reason: e.msg.to_string(),
            })
        })
        .collect()
}

fn pattern_matches(pattern: &Pattern, path: &str) -> bool {
    if pattern.as_str().contains('/') {
        pattern.matches_with(path, MATCH_OPTIONS)
    } else {
        let name = path.rsplit('/').next().unwrap_or(path);
        pattern.matches_with(name, MATCH_OPTIONS)
    }
}
