//! Path skip sets.
//!
//! # Responsibilities
//! - Hold the paths excluded from access logging (exact match)
//! - Hold the path prefixes excluded from request metrics (prefix match)
//!
//! # Design Decisions
//! - Built once at wiring time, then shared behind `Arc` read-only
//! - No interior locking: mutation needs `&mut self`, so the borrow checker
//!   enforces write-before-read
//! - No ordering guarantees

use std::collections::HashSet;

/// A set of path patterns.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StringSet {
    entries: HashSet<String>,
}

impl StringSet {
    /// Create a set from zero or more patterns.
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut set = Self::default();
        for pattern in patterns {
            set.add(pattern);
        }
        set
    }

    pub fn add(&mut self, pattern: impl Into<String>) {
        self.entries.insert(pattern.into());
    }

    pub fn remove(&mut self, pattern: &str) {
        self.entries.remove(pattern);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All stored patterns, in no particular order.
    pub fn to_vec(&self) -> Vec<String> {
        self.entries.iter().cloned().collect()
    }

    /// Exact membership.
    pub fn contains(&self, candidate: &str) -> bool {
        self.entries.contains(candidate)
    }

    /// True if `candidate` starts with any stored pattern.
    pub fn matches_prefix(&self, candidate: &str) -> bool {
        self.entries
            .iter()
            .any(|prefix| candidate.starts_with(prefix.as_str()))
    }
}

impl<S: Into<String>> FromIterator<S> for StringSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self::new(iter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contains_is_exact() {
        let set = StringSet::new(["/health"]);
        assert!(set.contains("/health"));
        assert!(!set.contains("/health/live"));
        assert!(!set.contains("/healt"));
    }

    #[test]
    fn test_matches_prefix() {
        let set = StringSet::new(["/metrics"]);
        assert!(set.matches_prefix("/metrics"));
        assert!(set.matches_prefix("/metrics/foo"));
        assert!(!set.matches_prefix("/metric"));
        assert!(!StringSet::default().matches_prefix("/anything"));
    }

    #[test]
    fn test_mutation() {
        let mut set = StringSet::new(["/a", "/b", "/a"]);
        assert_eq!(set.len(), 2);

        set.remove("/a");
        assert!(!set.contains("/a"));
        assert_eq!(set.len(), 1);

        set.add("/c");
        let mut entries = set.to_vec();
        entries.sort();
        assert_eq!(entries, vec!["/b".to_string(), "/c".to_string()]);

        set.clear();
        assert!(set.is_empty());
        assert_eq!(set.len(), 0);
    }
}
