//! Subscription patterns.

use std::fmt;

/// Wildcard pattern string.
pub const WILDCARD: &str = "*";

/// Key a subscription is registered under.
///
/// Either one exact event type or the wildcard, which matches every type.
/// There is no prefix or glob matching: `"org.billing.*"` is an exact
/// pattern that only matches an event whose type is literally that string.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Pattern {
    /// Matches envelopes whose `type` equals this string.
    Exact(String),
    /// Matches every envelope.
    Wildcard,
}

impl Pattern {
    /// Parse a pattern; `"*"` is the wildcard, anything else is exact.
    pub fn parse(pattern: &str) -> Self {
        if pattern == WILDCARD {
            Self::Wildcard
        } else {
            Self::Exact(pattern.to_owned())
        }
    }

    /// Whether an envelope of `event_type` is delivered to this pattern.
    pub fn matches(&self, event_type: &str) -> bool {
        match self {
            Self::Exact(t) => t == event_type,
            Self::Wildcard => true,
        }
    }

    /// Pattern as written by the subscriber.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Exact(t) => t,
            Self::Wildcard => WILDCARD,
        }
    }
}

impl From<&str> for Pattern {
    fn from(pattern: &str) -> Self {
        Self::parse(pattern)
    }
}

impl From<String> for Pattern {
    fn from(pattern: String) -> Self {
        if pattern == WILDCARD {
            Self::Wildcard
        } else {
            Self::Exact(pattern)
        }
    }
}

impl From<&String> for Pattern {
    fn from(pattern: &String) -> Self {
        Self::parse(pattern)
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
