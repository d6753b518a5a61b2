//! Glob pattern sets for stale artifacts, shortcuts and user content.

use glob::{MatchOptions, Pattern};

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: false,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// A list of glob patterns matched case-insensitively.
///
/// Patterns without a `/` match the file name alone; patterns with one
/// match the whole `/`-separated relative path.
#[derive(Debug, Clone, Default)]
pub struct PatternSet {
    patterns: Vec<(String, Pattern)>,
}

impl PatternSet {
    /// Compile `patterns`, skipping (and logging) invalid ones.
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Self {
        let patterns = patterns
            .iter()
            .filter_map(|raw| {
                let raw = raw.as_ref().replace('\\', "/");
                match Pattern::new(&raw) {
                    Ok(p) => Some((raw, p)),
                    Err(e) => {
                        tracing::warn!(pattern = %raw, error = %e, "ignoring invalid glob pattern");
                        None
                    }
                }
            })
            .collect();
        Self { patterns }
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Whether `relative_path` (either separator) matches any pattern.
    pub fn matches(&self, relative_path: &str) -> bool {
        let normalized = relative_path.replace('\\', "/");
        let name = normalized.rsplit('/').next().unwrap_or(&normalized);
        self.patterns.iter().any(|(raw, pattern)| {
            let candidate = if raw.contains('/') {
                normalized.as_str()
            } else {
                name
            };
            pattern.matches_with(candidate, MATCH_OPTIONS)
        })
    }
}
