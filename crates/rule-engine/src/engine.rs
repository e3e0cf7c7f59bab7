use regex::Regex;
use tracing::debug;

use crate::schema::{RuleConfig, RuleError};

struct PathRule {
    pattern: Regex,
    upstream: String,
}

struct HostRule {
    pattern: Regex,
    entries: Vec<PathRule>,
}

/// Pre-compiled routing table.
///
/// Host patterns are compiled in lexicographic order so overlapping
/// patterns resolve the same way on every run; within a host the path
/// entries keep their declared order.
pub struct RuleSet {
    hosts: Vec<HostRule>,
}

impl RuleSet {
    /// Compile every pattern in `config`. Any invalid regex fails the
    /// whole set.
    pub fn compile(config: &RuleConfig) -> Result<Self, RuleError> {
        let mut host_patterns: Vec<&String> = config.keys().collect();
        host_patterns.sort();

        let mut hosts = Vec::with_capacity(host_patterns.len());
        for host_pattern in host_patterns {
            let pattern =
                Regex::new(host_pattern).map_err(|source| RuleError::InvalidHost {
                    pattern: host_pattern.clone(),
                    source,
                })?;

            let mut entries = Vec::new();
            for entry in &config[host_pattern] {
                // Each list element is a single-entry map in practice; sort
                // the keys so a multi-entry map still compiles
                // deterministically.
                let mut path_patterns: Vec<&String> = entry.keys().collect();
                path_patterns.sort();

                for path_pattern in path_patterns {
                    let compiled =
                        Regex::new(path_pattern).map_err(|source| RuleError::InvalidPath {
                            host: host_pattern.clone(),
                            pattern: path_pattern.clone(),
                            source,
                        })?;
                    entries.push(PathRule {
                        pattern: compiled,
                        upstream: entry[path_pattern].clone(),
                    });
                }
            }

            debug!(host = %host_pattern, entries = entries.len(), "compiled host rule");
            hosts.push(HostRule { pattern, entries });
        }

        Ok(Self { hosts })
    }

    /// Resolve `(host, path)` to an upstream URL.
    ///
    /// The first host pattern with a non-empty match selects the entry
    /// list; the first path pattern with a non-empty match selects the
    /// upstream. `None` when no host matches, or a host matches but no path
    /// does.
    pub fn resolve(&self, host: &str, path: &str) -> Option<&str> {
        let host_rule = self
            .hosts
            .iter()
            .find(|rule| matches_non_empty(&rule.pattern, host))?;

        host_rule
            .entries
            .iter()
            .find(|entry| matches_non_empty(&entry.pattern, path))
            .map(|entry| entry.upstream.as_str())
    }

    /// Number of compiled host rules.
    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }
}

/// Unanchored search where only a non-empty match counts, so a pattern like
/// `.*` on an empty input does not select a rule.
fn matches_non_empty(pattern: &Regex, input: &str) -> bool {
    pattern
        .find(input)
        .is_some_and(|m| !m.as_str().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(json: &str) -> RuleConfig {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn resolves_host_and_path() {
        let rules = RuleSet::compile(&config(
            r#"{"^api\\.example$": [{"^/v1/": "http://upstream:8080"}]}"#,
        ))
        .unwrap();

        assert_eq!(
            rules.resolve("api.example", "/v1/thing"),
            Some("http://upstream:8080")
        );
    }

    #[test]
    fn no_host_match_is_none() {
        let rules = RuleSet::compile(&config(
            r#"{"^api\\.example$": [{"^/v1/": "http://upstream:8080"}]}"#,
        ))
        .unwrap();

        assert_eq!(rules.resolve("other.example", "/v1/thing"), None);
    }

    #[test]
    fn host_match_without_path_match_is_none() {
        let rules = RuleSet::compile(&config(
            r#"{"^api\\.example$": [{"^/v1/": "http://upstream:8080"}]}"#,
        ))
        .unwrap();

        assert_eq!(rules.resolve("api.example", "/v2/thing"), None);
    }

    #[test]
    fn first_path_entry_wins() {
        let rules = RuleSet::compile(&config(
            r#"{"^api\\.example$": [
                {"^/v1/admin": "http://admin:9000"},
                {"^/v1/": "http://upstream:8080"}
            ]}"#,
        ))
        .unwrap();

        assert_eq!(
            rules.resolve("api.example", "/v1/admin/users"),
            Some("http://admin:9000")
        );
        assert_eq!(
            rules.resolve("api.example", "/v1/other"),
            Some("http://upstream:8080")
        );
    }

    #[test]
    fn overlapping_hosts_resolve_deterministically() {
        // Both patterns match "api.example"; lexicographic order picks
        // "api" before "example".
        let rules = RuleSet::compile(&config(
            r#"{
                "example": [{"/": "http://second:1"}],
                "api": [{"/": "http://first:1"}]
            }"#,
        ))
        .unwrap();

        for _ in 0..10 {
            assert_eq!(rules.resolve("api.example", "/x"), Some("http://first:1"));
        }
    }

    #[test]
    fn partial_matches_count() {
        let rules = RuleSet::compile(&config(
            r#"{"example": [{"v1": "http://upstream:8080"}]}"#,
        ))
        .unwrap();

        // Unanchored: "example" is found inside the host, "v1" inside the path.
        assert_eq!(
            rules.resolve("api.example.com", "/api/v1/thing"),
            Some("http://upstream:8080")
        );
    }

    #[test]
    fn empty_regex_match_does_not_select() {
        // ".*" happily matches the empty string; an empty match must not
        // count as a hit.
        let rules = RuleSet::compile(&config(r#"{".*": [{".*": "http://any:1"}]}"#)).unwrap();

        assert_eq!(rules.resolve("", "/x"), None);
        assert_eq!(rules.resolve("host", ""), None);
        assert_eq!(rules.resolve("host", "/x"), Some("http://any:1"));
    }

    #[test]
    fn invalid_host_pattern_fails_compile() {
        let mut cfg: RuleConfig = HashMap::new();
        cfg.insert("[broken".to_string(), vec![]);
        assert!(matches!(
            RuleSet::compile(&cfg),
            Err(RuleError::InvalidHost { .. })
        ));
    }

    #[test]
    fn invalid_path_pattern_fails_compile() {
        let mut entry = HashMap::new();
        entry.insert("[broken".to_string(), "http://x".to_string());
        let mut cfg: RuleConfig = HashMap::new();
        cfg.insert("host".to_string(), vec![entry]);
        assert!(matches!(
            RuleSet::compile(&cfg),
            Err(RuleError::InvalidPath { .. })
        ));
    }
}
