//! # rule-engine
//!
//! Host/path routing rules for the proxy. Rules arrive from configuration as
//! `map<host-regex, list<{path-regex: upstream-url}>>`, are pre-compiled at
//! startup, and resolve each inbound `(host, path)` pair to an upstream URL.
//!
//! Matching is an unanchored regex search, and only a non-empty match
//! counts. Hosts are tried in lexicographic pattern order, path entries in
//! declared order; the first match wins at both levels. Resolution is a pure
//! function of `(host, path)` and the compiled set.

mod engine;
mod schema;

pub use engine::RuleSet;
pub use schema::{RuleConfig, RuleError};
