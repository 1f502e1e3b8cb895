//! URI grammar and pattern matching
//!
//! URIs are dot-separated segments. A segment may not contain whitespace,
//! `.` or `#`. Only wildcard patterns may contain empty segments, and an
//! empty segment matches any single segment of a concrete URI.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::RoutingError;

/// Prefix reserved for router-generated events and router-provided procedures
pub const RESERVED_PREFIX: &str = "wamp.";

/// How a subscription or registration pattern is compared with a URI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchPolicy {
    /// Pattern and URI are identical
    #[default]
    Exact,
    /// Pattern segments are a leading run of the URI segments
    Prefix,
    /// Same segment count; empty pattern segments match anything
    Wildcard,
}

impl MatchPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchPolicy::Exact => "exact",
            MatchPolicy::Prefix => "prefix",
            MatchPolicy::Wildcard => "wildcard",
        }
    }

    /// Whether `uri` is matched by `pattern` under this policy
    pub fn matches(&self, pattern: &str, uri: &str) -> bool {
        match self {
            MatchPolicy::Exact => pattern == uri,
            MatchPolicy::Prefix => prefix_matches(pattern, uri),
            MatchPolicy::Wildcard => wildcard_matches(pattern, uri),
        }
    }
}

impl fmt::Display for MatchPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn valid_segment(segment: &str) -> bool {
    !segment.chars().any(|c| c.is_whitespace() || c == '#')
}

/// Validate a URI or pattern for the given policy
pub fn validate(uri: &str, policy: MatchPolicy) -> Result<(), RoutingError> {
    if uri.is_empty() {
        return Err(RoutingError::InvalidUri(uri.to_string()));
    }

    let allow_empty = policy == MatchPolicy::Wildcard;
    let ok = uri
        .split('.')
        .all(|segment| (allow_empty || !segment.is_empty()) && valid_segment(segment));

    if ok {
        Ok(())
    } else {
        Err(RoutingError::InvalidUri(uri.to_string()))
    }
}

/// Validate a concrete URI (topic of a publish, procedure of a call)
pub fn validate_concrete(uri: &str) -> Result<(), RoutingError> {
    validate(uri, MatchPolicy::Exact)
}

/// Whether the URI lives in the router's reserved namespace
pub fn is_reserved(uri: &str) -> bool {
    uri.starts_with(RESERVED_PREFIX)
}

/// Segment-wise prefix match
pub fn prefix_matches(pattern: &str, uri: &str) -> bool {
    let mut uri_segments = uri.split('.');
    pattern
        .split('.')
        .all(|segment| uri_segments.next() == Some(segment))
}

/// Segment-wise wildcard match
pub fn wildcard_matches(pattern: &str, uri: &str) -> bool {
    let pattern_segments: Vec<&str> = pattern.split('.').collect();
    let uri_segments: Vec<&str> = uri.split('.').collect();

    pattern_segments.len() == uri_segments.len()
        && pattern_segments
            .iter()
            .zip(uri_segments.iter())
            .all(|(p, u)| p.is_empty() || p == u)
}

/// Number of non-empty segments, used to rank competing wildcard patterns
pub fn specificity(pattern: &str) -> usize {
    pattern.split('.').filter(|s| !s.is_empty()).count()
}
