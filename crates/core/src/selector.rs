//! Stream and property selection criteria.
//!
//! A selector string is parsed exactly once into a [`StreamSelector`]; nothing
//! downstream looks at the raw string again.

use regex::Regex;

use crate::error::{CoreError, CoreResult};
use crate::id::StreamName;

/// Selector string that matches every stream (as does `""`).
pub const MATCH_ALL: &str = "$all";

/// A selector containing this character is a pattern, anything else is an exact name.
pub const PATTERN_ANCHOR: char = '^';

/// Compiled stream-name pattern.
#[derive(Debug, Clone)]
pub struct StreamPattern(Regex);

impl StreamPattern {
    pub fn new(pattern: &str) -> CoreResult<Self> {
        Regex::new(pattern)
            .map(Self)
            .map_err(|e| CoreError::invalid_argument(format!("invalid stream pattern '{pattern}': {e}")))
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    pub fn is_match(&self, stream: &str) -> bool {
        self.0.is_match(stream)
    }
}

impl PartialEq for StreamPattern {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl Eq for StreamPattern {}

/// Which streams a continuous query considers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamSelector {
    All,
    Exact(StreamName),
    Pattern(StreamPattern),
}

impl StreamSelector {
    /// Parse a selector string.
    ///
    /// - `""` or [`MATCH_ALL`] selects every stream
    /// - a string containing [`PATTERN_ANCHOR`] is a regular expression
    /// - anything else is an exact stream name
    pub fn parse(selector: &str) -> CoreResult<Self> {
        if selector.is_empty() || selector == MATCH_ALL {
            return Ok(Self::All);
        }
        if selector.contains(PATTERN_ANCHOR) {
            return StreamPattern::new(selector).map(Self::Pattern);
        }
        StreamName::new(selector).map(Self::Exact)
    }

    pub fn matches(&self, stream: &str) -> bool {
        match self {
            Self::All => true,
            Self::Exact(name) => name.as_str() == stream,
            Self::Pattern(pattern) => pattern.is_match(stream),
        }
    }
}

impl core::str::FromStr for StreamSelector {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Full selection criterion of a continuous query: streams, or one metadata property.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuerySelector {
    Streams(StreamSelector),
    Property { name: String, value: String },
}

impl QuerySelector {
    pub fn all() -> Self {
        Self::Streams(StreamSelector::All)
    }

    pub fn streams(selector: &str) -> CoreResult<Self> {
        StreamSelector::parse(selector).map(Self::Streams)
    }

    /// Select commits carrying an event whose `metadata[name] == value`.
    ///
    /// The name becomes part of a dotted storage path, so it must be non-empty
    /// and free of dots.
    pub fn property(name: impl Into<String>, value: impl Into<String>) -> CoreResult<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(CoreError::invalid_argument("property name must not be empty"));
        }
        if name.contains('.') {
            return Err(CoreError::invalid_argument(format!(
                "property name '{name}' must not contain '.'"
            )));
        }
        Ok(Self::Property {
            name,
            value: value.into(),
        })
    }
}
