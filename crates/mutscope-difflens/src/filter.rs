//! Restricts diff extraction to source files of interest.

use glob::{MatchOptions, Pattern};
use mutscope_core::SourceConfig;

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// Include/exclude glob filter over repository-relative paths.
///
/// An empty include list accepts every path.
///
/// # Examples
///
/// ```
/// use mutscope_difflens::filter::SourceFilter;
///
/// let filter = SourceFilter::new(&["src/**/*.py"], &["src/vendor/**"]);
/// assert!(filter.matches("src/pkg/calc.py"));
/// assert!(!filter.matches("src/vendor/six.py"));
/// assert!(!filter.matches("README.md"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct SourceFilter {
    include: Vec<Pattern>,
    exclude: Vec<Pattern>,
}

impl SourceFilter {
    /// Build a filter from raw glob strings. Invalid patterns are skipped with a warning.
    pub fn new<S: AsRef<str>>(include: &[S], exclude: &[S]) -> Self {
        Self {
            include: compile(include),
            exclude: compile(exclude),
        }
    }

    /// Build a filter from the `[source]` configuration section.
    ///
    /// # Examples
    ///
    /// ```
    /// use mutscope_core::SourceConfig;
    /// use mutscope_difflens::filter::SourceFilter;
    ///
    /// let filter = SourceFilter::from_config(&SourceConfig::default());
    /// assert!(filter.matches("pkg/module.py"));
    /// assert!(!filter.matches("pkg/module.rs"));
    /// ```
    pub fn from_config(config: &SourceConfig) -> Self {
        Self::new(&config.include, &config.exclude)
    }

    /// A filter that accepts every path.
    pub fn accept_all() -> Self {
        Self::default()
    }

    /// Whether `path` is a source file of interest.
    pub fn matches(&self, path: &str) -> bool {
        let included = self.include.is_empty()
            || self
                .include
                .iter()
                .any(|p| p.matches_with(path, MATCH_OPTIONS));
        included && !self.exclude.iter().any(|p| p.matches_with(path, MATCH_OPTIONS))
    }
}

fn compile<S: AsRef<str>>(patterns: &[S]) -> Vec<Pattern> {
    let mut compiled = Vec::new();
    for raw in patterns {
        match Pattern::new(raw.as_ref()) {
            Ok(p) => compiled.push(p),
            Err(e) => tracing::warn!("invalid glob pattern '{}': {}", raw.as_ref(), e),
        }
    }
    compiled
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accept_all_matches_everything() {
        let filter = SourceFilter::accept_all();
        assert!(filter.matches("a"));
        assert!(filter.matches("deep/nested/file.txt"));
    }

    #[test]
    fn star_does_not_cross_directories() {
        let filter = SourceFilter::new(&["src/*.py"], &[]);
        assert!(filter.matches("src/a.py"));
        assert!(!filter.matches("src/sub/a.py"));
    }

    #[test]
    fn exclude_wins_over_include() {
        let filter = SourceFilter::new(&["**/*.py"], &["tests/**"]);
        assert!(filter.matches("pkg/a.py"));
        assert!(!filter.matches("tests/test_a.py"));
    }

    #[test]
    fn invalid_patterns_are_ignored() {
        let filter = SourceFilter::new(&["[", "lib/*.py"], &[]);
        assert!(filter.matches("lib/x.py"));
        assert!(!filter.matches("other/x.py"));
    }
}
