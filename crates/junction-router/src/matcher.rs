//! URI pattern tables
//!
//! `UriTable` indexes values by (pattern, match policy). Exact patterns are a
//! direct lookup, prefix patterns are found by walking the URI's segment
//! prefixes from longest to shortest, wildcard patterns are scanned in
//! insertion order.

use junction_core::uri::{self, MatchPolicy};
use std::collections::HashMap;

/// A value found for a URI together with the pattern that matched it
#[derive(Debug)]
pub struct Matched<'a, T> {
    pub pattern: &'a str,
    pub policy: MatchPolicy,
    pub value: &'a T,
}

#[derive(Debug)]
pub struct UriTable<T> {
    exact: HashMap<String, T>,
    prefix: HashMap<String, T>,
    wildcard: Vec<(String, T)>,
}

impl<T> Default for UriTable<T> {
    fn default() -> Self {
        Self {
            exact: HashMap::new(),
            prefix: HashMap::new(),
            wildcard: Vec::new(),
        }
    }
}

/// Segment prefixes of a URI, longest first: `a.b.c`, `a.b`, `a`
fn segment_prefixes(uri: &str) -> impl Iterator<Item = &str> {
    std::iter::once(uri).chain(uri.rmatch_indices('.').map(move |(pos, _)| &uri[..pos]))
}

impl<T> UriTable<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.exact.len() + self.prefix.len() + self.wildcard.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, pattern: &str, policy: MatchPolicy) -> Option<&T> {
        match policy {
            MatchPolicy::Exact => self.exact.get(pattern),
            MatchPolicy::Prefix => self.prefix.get(pattern),
            MatchPolicy::Wildcard => self
                .wildcard
                .iter()
                .find(|(p, _)| p == pattern)
                .map(|(_, v)| v),
        }
    }

    pub fn get_mut(&mut self, pattern: &str, policy: MatchPolicy) -> Option<&mut T> {
        match policy {
            MatchPolicy::Exact => self.exact.get_mut(pattern),
            MatchPolicy::Prefix => self.prefix.get_mut(pattern),
            MatchPolicy::Wildcard => self
                .wildcard
                .iter_mut()
                .find(|(p, _)| p == pattern)
                .map(|(_, v)| v),
        }
    }

    /// Insert or replace the value for a pattern
    pub fn insert(&mut self, pattern: &str, policy: MatchPolicy, value: T) {
        match policy {
            MatchPolicy::Exact => {
                self.exact.insert(pattern.to_string(), value);
            }
            MatchPolicy::Prefix => {
                self.prefix.insert(pattern.to_string(), value);
            }
            MatchPolicy::Wildcard => match self.wildcard.iter_mut().find(|(p, _)| p == pattern) {
                Some((_, existing)) => *existing = value,
                None => self.wildcard.push((pattern.to_string(), value)),
            },
        }
    }

    pub fn remove(&mut self, pattern: &str, policy: MatchPolicy) -> Option<T> {
        match policy {
            MatchPolicy::Exact => self.exact.remove(pattern),
            MatchPolicy::Prefix => self.prefix.remove(pattern),
            MatchPolicy::Wildcard => {
                let index = self.wildcard.iter().position(|(p, _)| p == pattern)?;
                Some(self.wildcard.remove(index).1)
            }
        }
    }

    /// Every entry matching a concrete URI: exact first, then prefixes from
    /// longest to shortest, then wildcards in insertion order
    pub fn matches<'a>(&'a self, uri: &'a str) -> Vec<Matched<'a, T>> {
        let mut found = Vec::new();

        if let Some((pattern, value)) = self.exact.get_key_value(uri) {
            found.push(Matched {
                pattern: pattern.as_str(),
                policy: MatchPolicy::Exact,
                value,
            });
        }

        if !self.prefix.is_empty() {
            for candidate in segment_prefixes(uri) {
                if let Some((pattern, value)) = self.prefix.get_key_value(candidate) {
                    found.push(Matched {
                        pattern: pattern.as_str(),
                        policy: MatchPolicy::Prefix,
                        value,
                    });
                }
            }
        }

        for (pattern, value) in &self.wildcard {
            if uri::wildcard_matches(pattern, uri) {
                found.push(Matched {
                    pattern: pattern.as_str(),
                    policy: MatchPolicy::Wildcard,
                    value,
                });
            }
        }

        found
    }

    /// The single entry that governs a concrete URI: exact, else the longest
    /// prefix, else the most specific wildcard (earliest inserted on ties)
    pub fn best_match<'a>(&'a self, uri: &'a str) -> Option<Matched<'a, T>> {
        if let Some((pattern, value)) = self.exact.get_key_value(uri) {
            return Some(Matched {
                pattern: pattern.as_str(),
                policy: MatchPolicy::Exact,
                value,
            });
        }

        for candidate in segment_prefixes(uri) {
            if let Some((pattern, value)) = self.prefix.get_key_value(candidate) {
                return Some(Matched {
                    pattern: pattern.as_str(),
                    policy: MatchPolicy::Prefix,
                    value,
                });
            }
        }

        let mut best: Option<(usize, &(String, T))> = None;
        for entry in &self.wildcard {
            if !uri::wildcard_matches(&entry.0, uri) {
                continue;
            }
            let score = uri::specificity(&entry.0);
            if best.map_or(true, |(top, _)| score > top) {
                best = Some((score, entry));
            }
        }

        best.map(|(_, (pattern, value))| Matched {
            pattern: pattern.as_str(),
            policy: MatchPolicy::Wildcard,
            value,
        })
    }

    pub fn values(&self) -> impl Iterator<Item = &T> {
        self.exact
            .values()
            .chain(self.prefix.values())
            .chain(self.wildcard.iter().map(|(_, v)| v))
    }
}
