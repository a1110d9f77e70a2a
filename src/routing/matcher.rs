//! Route matching logic.
//!
//! # Responsibilities
//! - Match a request path against a route prefix on `/` boundaries
//! - Remove exactly the matched prefix when a route strips it
//!
//! # Design Decisions
//! - Path matching is case-sensitive and works on the raw (escaped) path
//! - `/api` matches `/api` and `/api/x`, never `/apix`
//! - A trailing `/` on the configured prefix is not significant

/// Matches the request path prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPrefixMatcher {
    prefix: String,
    /// Prefix without trailing slashes; empty for the root prefix.
    stem: String,
}

impl PathPrefixMatcher {
    pub fn new(prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        let stem = prefix.trim_end_matches('/').to_string();
        Self { prefix, stem }
    }

    /// The prefix as configured.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Length used to rank overlapping prefixes.
    pub fn specificity(&self) -> usize {
        self.stem.len()
    }

    pub fn matches(&self, path: &str) -> bool {
        match path.strip_prefix(self.stem.as_str()) {
            Some(rest) => rest.is_empty() || rest.starts_with('/'),
            None => false,
        }
    }

    /// `path` with the matched prefix removed, always rooted.
    ///
    /// Returns `None` when the path does not match.
    pub fn strip(&self, path: &str) -> Option<String> {
        if !self.matches(path) {
            return None;
        }

        let rest = &path[self.stem.len()..];
        if rest.is_empty() {
            Some("/".to_string())
        } else {
            Some(rest.to_string())
        }
    }
}
