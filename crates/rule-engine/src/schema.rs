use std::collections::HashMap;

use thiserror::Error;

/// The configuration shape for proxy rules, exactly as it appears in the
/// JSON config file: host regex mapped to an ordered list of single-entry
/// `{path-regex: upstream-url}` maps.
pub type RuleConfig = HashMap<String, Vec<HashMap<String, String>>>;

/// Errors raised while compiling the rule table. All are fatal at startup.
#[derive(Debug, Error)]
pub enum RuleError {
    #[error("invalid host pattern '{pattern}': {source}")]
    InvalidHost {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("invalid path pattern '{pattern}' under host '{host}': {source}")]
    InvalidPath {
        host: String,
        pattern: String,
        #[source]
        source: regex::Error,
    },
}
