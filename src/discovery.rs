//! Test unit discovery from file patterns.
//!
//! Patterns are shell-style globs relative to a root directory, matched with
//! `/` separators: `*` stays inside one directory, `**` crosses directories.
//!
//! | Pattern | Matches |
//! |---------|---------|
//! | `tests/test_*.py` | Test files directly under `tests/` |
//! | `tests/**/test_*.py` | Test files anywhere below `tests/` |
//! | `tests/unit` | The path itself, if it exists |
//!
//! Every pattern adds its matches in sorted order. A unit already added by
//! an earlier pattern is not added again.

use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};

use globset::GlobBuilder;
use tracing::debug;
use walkdir::WalkDir;

use crate::framework::TestUnit;

/// Errors raised while expanding patterns.
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    /// The pattern is not a valid glob.
    #[error("Invalid pattern `{pattern}`: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: globset::Error,
    },

    /// The pattern matched no file.
    #[error("Pattern `{0}` matched no files")]
    NoMatch(String),

    /// Walking the directory tree failed.
    #[error("Failed to walk directory: {0}")]
    Walk(#[from] walkdir::Error),
}

/// Accumulates test units from one or more patterns.
#[derive(Debug, Clone)]
pub struct Discovery {
    root: PathBuf,
    units: Vec<String>,
    seen: HashSet<String>,
}

impl Default for Discovery {
    fn default() -> Self {
        Self::new()
    }
}

impl Discovery {
    /// Creates a discovery rooted at the current directory.
    pub fn new() -> Self {
        Self::with_root(".")
    }

    /// Creates a discovery that resolves patterns against `root`.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            units: Vec::new(),
            seen: HashSet::new(),
        }
    }

    /// Expands `pattern` and adds the matches not seen yet.
    ///
    /// Returns the number of units added.
    ///
    /// # Errors
    ///
    /// - [`DiscoveryError::InvalidPattern`] if the glob does not parse
    /// - [`DiscoveryError::NoMatch`] if nothing matched
    pub fn add_pattern(&mut self, pattern: &str) -> Result<usize, DiscoveryError> {
        let pattern = pattern.strip_prefix("./").unwrap_or(pattern);
        let matches = if has_glob_meta(pattern) {
            self.expand(pattern)?
        } else if self.root.join(pattern).exists() {
            vec![pattern.to_string()]
        } else {
            Vec::new()
        };

        if matches.is_empty() {
            return Err(DiscoveryError::NoMatch(pattern.to_string()));
        }

        let before = self.units.len();
        for unit in matches {
            if self.seen.insert(unit.clone()) {
                self.units.push(unit);
            }
        }
        let added = self.units.len() - before;
        debug!("Pattern {} added {} units", pattern, added);
        Ok(added)
    }

    /// The units discovered so far, in discovery order.
    pub fn units(&self) -> &[String] {
        &self.units
    }

    pub fn into_units(self) -> Vec<TestUnit> {
        self.units.into_iter().map(TestUnit::new).collect()
    }

    fn expand(&self, pattern: &str) -> Result<Vec<String>, DiscoveryError> {
        let matcher = GlobBuilder::new(pattern)
            .literal_separator(true)
            .build()
            .map_err(|source| DiscoveryError::InvalidPattern {
                pattern: pattern.to_string(),
                source,
            })?
            .compile_matcher();

        let absolute = Path::new(pattern).is_absolute();
        let start = if absolute {
            literal_prefix(pattern)
        } else {
            self.root.join(literal_prefix(pattern))
        };
        if !start.exists() {
            return Ok(Vec::new());
        }

        let mut matches = Vec::new();
        for entry in WalkDir::new(&start).follow_links(true) {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let candidate = if absolute {
                to_slash(entry.path())
            } else {
                match entry.path().strip_prefix(&self.root) {
                    Ok(relative) => to_slash(relative),
                    Err(_) => continue,
                }
            };
            if matcher.is_match(&candidate) {
                matches.push(candidate);
            }
        }
        matches.sort();
        Ok(matches)
    }
}

fn has_glob_meta(pattern: &str) -> bool {
    pattern.contains(['*', '?', '[', '{'])
}

/// The leading directories of `pattern` that contain no glob syntax.
fn literal_prefix(pattern: &str) -> PathBuf {
    let (mut prefix, rest) = match pattern.strip_prefix('/') {
        Some(rest) => (PathBuf::from("/"), rest),
        None => (PathBuf::new(), pattern),
    };
    let mut parts = rest.split('/').peekable();
    while let Some(part) = parts.next() {
        // The last part names files, never a directory to start from.
        if parts.peek().is_none() || has_glob_meta(part) {
            break;
        }
        prefix.push(part);
    }
    prefix
}

fn to_slash(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::RootDir => Some("".into()),
            Component::Normal(part) => Some(part.to_string_lossy()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}
