//! Allow-list of header names accepted in chunked trailers.
//!
//! # Design Decisions
//! - Backed by a `DashSet`, so admission checks never wait on a full lock
//!   and observe every completed add/remove
//! - Bulk replacement adds the new names before removing the old ones, so a
//!   reader never sees an empty list while switching between two non-empty
//!   lists
//! - Names are trimmed and lowercased with a locale-independent mapping

use std::collections::HashSet;

use dashmap::DashSet;

fn normalize(name: &str) -> String {
    name.trim().to_ascii_lowercase()
}

fn parse_list(list: &str) -> HashSet<String> {
    list.split(',')
        .map(normalize)
        .filter(|name| !name.is_empty())
        .collect()
}

#[derive(Debug, Default)]
pub struct TrailerHeaderPolicy {
    allowed: DashSet<String>,
}

impl TrailerHeaderPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a policy from a comma-separated list.
    pub fn from_list(list: &str) -> Self {
        let policy = Self::new();
        policy.bulk_replace(list);
        policy
    }

    /// Replace the whole list with the names in `list`.
    pub fn bulk_replace(&self, list: &str) {
        let target = parse_list(list);
        let current: HashSet<String> = self.allowed.iter().map(|name| name.key().clone()).collect();

        for name in target.difference(&current) {
            self.allowed.insert(name.clone());
        }
        for name in current.difference(&target) {
            self.allowed.remove(name);
        }

        tracing::debug!(allowed = ?self.snapshot(), "Trailer allow-list replaced");
    }

    pub fn add(&self, name: &str) {
        let name = normalize(name);
        if !name.is_empty() {
            self.allowed.insert(name);
        }
    }

    pub fn remove(&self, name: &str) {
        self.allowed.remove(&normalize(name));
    }

    /// Admission check used while reading trailers.
    pub fn contains(&self, name: &str) -> bool {
        self.allowed.contains(&normalize(name))
    }

    pub fn is_empty(&self) -> bool {
        self.allowed.is_empty()
    }

    /// Sorted point-in-time copy for display.
    pub fn snapshot(&self) -> Vec<String> {
        let mut names: Vec<String> = self.allowed.iter().map(|name| name.key().clone()).collect();
        names.sort();
        names
    }

    /// The list in its configuration form.
    pub fn to_list_string(&self) -> String {
        self.snapshot().join(",")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_names() {
        let policy = TrailerHeaderPolicy::from_list(" X-Checksum , Server-Timing,,");
        assert_eq!(policy.snapshot(), vec!["server-timing", "x-checksum"]);
        assert!(policy.contains("x-CHECKSUM "));
        assert!(!policy.contains(""));
    }

    #[test]
    fn bulk_replace_diffs() {
        let policy = TrailerHeaderPolicy::from_list("a,b");
        policy.bulk_replace("b,c");
        assert_eq!(policy.snapshot(), vec!["b", "c"]);
        policy.bulk_replace("");
        assert!(policy.is_empty());
    }

    #[test]
    fn add_and_remove() {
        let policy = TrailerHeaderPolicy::new();
        policy.add(" Digest ");
        assert!(policy.contains("digest"));
        policy.remove("DIGEST");
        assert!(!policy.contains("digest"));
        policy.add("   ");
        assert!(policy.is_empty());
    }

    #[test]
    fn list_string_form() {
        let policy = TrailerHeaderPolicy::from_list("etag,digest");
        assert_eq!(policy.to_list_string(), "digest,etag");
    }

    #[test]
    fn lowercases_ascii_only() {
        let policy = TrailerHeaderPolicy::new();
        policy.add("X-ÄB");
        assert_eq!(policy.snapshot(), vec!["x-Äb"]);
        assert!(!policy.contains("x-äb"));
    }
}
