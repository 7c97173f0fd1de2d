//! Path filtering for the event-source boundary
//!
//! The core aggregates whatever events it is handed; deciding *which* source
//! files generate line events is the embedding event source's job. This
//! filter implements the conventional contract: a comma-separated list of
//! glob patterns (`*` and `?` wildcards), typically supplied through the
//! `TRAZAR_FILTER` environment variable. An empty or absent list traces
//! everything.
//!
//! Patterns are compiled once to anchored regexes; matching on the per-event
//! path is then a scan with no allocation.

use anyhow::{Context, Result};
use regex::Regex;

/// Environment variable holding the comma-separated pattern list
pub const FILTER_ENV: &str = "TRAZAR_FILTER";

/// Compiled allow-list of path glob patterns
#[derive(Debug, Clone)]
pub struct PathFilter {
    patterns: Vec<Regex>,
}

impl PathFilter {
    /// A filter that matches every path
    pub fn all() -> Self {
        Self {
            patterns: Vec::new(),
        }
    }

    /// Parse a comma-separated glob list like `"/app/src/*.py,*/hot_*.py"`
    pub fn from_list(list: &str) -> Result<Self> {
        let mut patterns = Vec::new();
        for part in list.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let regex = glob_to_regex(part);
            patterns.push(
                Regex::new(&regex)
                    .with_context(|| format!("invalid filter pattern: {part}"))?,
            );
        }
        Ok(Self { patterns })
    }

    /// Build from `TRAZAR_FILTER`; unset or empty means match-all
    pub fn from_env() -> Result<Self> {
        match std::env::var(FILTER_ENV) {
            Ok(list) if !list.is_empty() => Self::from_list(&list),
            _ => Ok(Self::all()),
        }
    }

    /// Whether `path` should generate events
    pub fn matches(&self, path: &str) -> bool {
        self.patterns.is_empty() || self.patterns.iter().any(|p| p.is_match(path))
    }
}

// Anchored translation of fnmatch-style globs: `*` spans anything including
// separators, `?` matches one character, the rest is literal.
fn glob_to_regex(glob: &str) -> String {
    let mut out = String::with_capacity(glob.len() + 8);
    out.push('^');
    for ch in glob.chars() {
        match ch {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            other => out.push_str(&regex::escape(&other.to_string())),
        }
    }
    out.push('$');
    out
}
