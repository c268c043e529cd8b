//! Host registry
//!
//! Hosts are given as `"name"` or `"name:weight"` strings. The weight is the
//! relative share of the sample a host receives: `["node-1", "node-3:2"]`
//! sends twice as many points to `node-3` as to `node-1`.
//!
//! Parsing never fails. A weight that is not a positive integer falls back to
//! [`DEFAULT_WEIGHT`], and a host listed twice keeps its first entry. Both cases
//! are logged and reported as [`HostSpecWarning`]s.

use crate::error::HostSpecWarning;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

/// Weight given to hosts without an explicit (or with an invalid) weight
pub const DEFAULT_WEIGHT: u32 = 1;

/// A named compute target and its relative share of work
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostSpec {
    pub name: String,
    pub weight: u32,
}

impl HostSpec {
    pub fn new(name: impl Into<String>, weight: u32) -> Self {
        Self {
            name: name.into(),
            weight: weight.max(DEFAULT_WEIGHT),
        }
    }

    /// Parse a `"name"` or `"name:weight"` specification
    ///
    /// Splits on the last colon. Returns the spec and, when the weight segment
    /// is not a positive integer, the warning describing the fallback.
    pub fn parse(spec: &str) -> (Self, Option<HostSpecWarning>) {
        match spec.rsplit_once(':') {
            None => (Self::new(spec, DEFAULT_WEIGHT), None),
            Some((name, weight)) => match weight.trim().parse::<u32>() {
                Ok(w) if w >= 1 => (Self::new(name, w), None),
                _ => (
                    Self::new(name, DEFAULT_WEIGHT),
                    Some(HostSpecWarning::InvalidWeight {
                        spec: spec.to_string(),
                        default: DEFAULT_WEIGHT,
                    }),
                ),
            },
        }
    }
}

impl fmt::Display for HostSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.weight)
    }
}

/// Ordered, deduplicated collection of hosts
///
/// Order of first appearance is preserved; dispatchers use it as the
/// tie-break when assigning work.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HostRegistry {
    hosts: Vec<HostSpec>,
}

impl HostRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add host specifications, returning the warnings raised while parsing
    pub fn add<I, S>(&mut self, specs: I) -> Vec<HostSpecWarning>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut warnings = Vec::new();

        for spec in specs {
            let (host, weight_warning) = HostSpec::parse(spec.as_ref());
            if let Some(w) = weight_warning {
                warn!("{}", w);
                warnings.push(w);
            }

            if self.contains(&host.name) {
                let w = HostSpecWarning::DuplicateHost { name: host.name };
                warn!("{}", w);
                warnings.push(w);
                continue;
            }

            self.hosts.push(host);
        }

        warnings
    }

    pub fn contains(&self, name: &str) -> bool {
        self.hosts.iter().any(|h| h.name == name)
    }

    pub fn get(&self, name: &str) -> Option<&HostSpec> {
        self.hosts.iter().find(|h| h.name == name)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, HostSpec> {
        self.hosts.iter()
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    /// Sum of all host weights
    pub fn total_weight(&self) -> u64 {
        self.hosts.iter().map(|h| h.weight as u64).sum()
    }

    /// `(name, weight)` pairs in registry order
    pub fn pairs(&self) -> Vec<(String, u32)> {
        self.hosts
            .iter()
            .map(|h| (h.name.clone(), h.weight))
            .collect()
    }
}

impl<'a> IntoIterator for &'a HostRegistry {
    type Item = &'a HostSpec;
    type IntoIter = std::slice::Iter<'a, HostSpec>;

    fn into_iter(self) -> Self::IntoIter {
        self.hosts.iter()
    }
}

impl fmt::Display for HostRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.hosts.is_empty() {
            return write!(f, "localhost");
        }
        let list = self
            .hosts
            .iter()
            .map(|h| h.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        write!(f, "{}", list)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_host() {
        let (host, warning) = HostSpec::parse("host");
        assert_eq!(host, HostSpec::new("host", 1));
        assert!(warning.is_none());
    }

    #[test]
    fn test_parse_weighted_host() {
        let (host, warning) = HostSpec::parse("host:3");
        assert_eq!(host.name, "host");
        assert_eq!(host.weight, 3);
        assert!(warning.is_none());
    }

    #[test]
    fn test_parse_invalid_weight_falls_back() {
        let (host, warning) = HostSpec::parse("host:x");
        assert_eq!(host, HostSpec::new("host", DEFAULT_WEIGHT));
        assert!(matches!(warning, Some(HostSpecWarning::InvalidWeight { .. })));

        let (host, warning) = HostSpec::parse("host:0");
        assert_eq!(host.weight, DEFAULT_WEIGHT);
        assert!(warning.is_some());

        let (host, warning) = HostSpec::parse("host:");
        assert_eq!(host.name, "host");
        assert!(warning.is_some());
    }

    #[test]
    fn test_parse_splits_on_last_colon() {
        let (host, warning) = HostSpec::parse("user@node:22:4");
        assert_eq!(host.name, "user@node:22");
        assert_eq!(host.weight, 4);
        assert!(warning.is_none());
    }

    #[test]
    fn test_add_deduplicates_first_wins() {
        let mut registry = HostRegistry::new();
        let warnings = registry.add(["a", "b:2", "a:5", "c", "b"]);

        assert_eq!(
            registry.pairs(),
            vec![
                ("a".to_string(), 1),
                ("b".to_string(), 2),
                ("c".to_string(), 1)
            ]
        );
        assert_eq!(warnings.len(), 2);
        assert!(warnings
            .iter()
            .all(|w| matches!(w, HostSpecWarning::DuplicateHost { .. })));
    }

    #[test]
    fn test_add_across_calls() {
        let mut registry = HostRegistry::new();
        assert!(registry.add(["a"]).is_empty());
        let warnings = registry.add(vec!["a:3".to_string()]);

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("a").map(|h| h.weight), Some(1));
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn test_invalid_weight_and_duplicate_both_reported() {
        let mut registry = HostRegistry::new();
        let warnings = registry.add(["a", "a:bad"]);
        assert_eq!(warnings.len(), 2);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_total_weight_and_display() {
        let mut registry = HostRegistry::new();
        assert_eq!(registry.to_string(), "localhost");

        registry.add(["a", "b:2"]);
        assert_eq!(registry.total_weight(), 3);
        assert_eq!(registry.to_string(), "a:1, b:2");
    }
}
