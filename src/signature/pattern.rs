//! String and frame patterns used by signature symptoms

use super::PatternError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A literal or `/regex/` string matcher
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum StringMatch {
    /// Plain text, compared for equality (frames) or containment (output)
    Literal(String),

    /// Regular expression, searched anywhere in the subject
    Regex(Regex),
}

impl StringMatch {
    /// Parse a pattern; `/.../` denotes a regular expression
    pub fn parse(value: &str) -> Result<Self, PatternError> {
        if value.len() >= 2 && value.starts_with('/') && value.ends_with('/') {
            let source = &value[1..value.len() - 1];
            let regex = Regex::new(source).map_err(|e| PatternError::InvalidRegex {
                pattern: source.to_string(),
                reason: e.to_string(),
            })?;
            Ok(StringMatch::Regex(regex))
        } else {
            Ok(StringMatch::Literal(value.to_string()))
        }
    }

    /// Literal matcher that is never mistaken for a regex or wildcard
    pub fn literal(value: &str) -> Self {
        StringMatch::Literal(value.to_string())
    }

    /// Exact match (literal) or regex search
    pub fn matches(&self, subject: &str) -> bool {
        match self {
            StringMatch::Literal(value) => value == subject,
            StringMatch::Regex(regex) => regex.is_match(subject),
        }
    }

    /// Substring match (literal) or regex search
    pub fn found_in(&self, subject: &str) -> bool {
        match self {
            StringMatch::Literal(value) => subject.contains(value.as_str()),
            StringMatch::Regex(regex) => regex.is_match(subject),
        }
    }

    pub fn is_regex(&self) -> bool {
        matches!(self, StringMatch::Regex(_))
    }
}

impl PartialEq for StringMatch {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (StringMatch::Literal(a), StringMatch::Literal(b)) => a == b,
            (StringMatch::Regex(a), StringMatch::Regex(b)) => a.as_str() == b.as_str(),
            _ => false,
        }
    }
}

impl Eq for StringMatch {}

impl fmt::Display for StringMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StringMatch::Literal(value) => write!(f, "{}", value),
            StringMatch::Regex(regex) => write!(f, "/{}/", regex.as_str()),
        }
    }
}

impl TryFrom<String> for StringMatch {
    type Error = PatternError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        StringMatch::parse(&value)
    }
}

impl From<StringMatch> for String {
    fn from(value: StringMatch) -> Self {
        value.to_string()
    }
}

/// One element of a stack frame pattern
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum FramePattern {
    /// `?`: exactly one arbitrary frame
    AnyOne,

    /// `*`: any run of frames, possibly empty
    AnyMany,

    /// Function name matcher
    Function(StringMatch),
}

impl FramePattern {
    pub fn parse(value: &str) -> Result<Self, PatternError> {
        match value {
            "?" => Ok(FramePattern::AnyOne),
            "*" => Ok(FramePattern::AnyMany),
            "" => Err(PatternError::EmptyFrame),
            other => Ok(FramePattern::Function(StringMatch::parse(other)?)),
        }
    }

    /// Pattern that matches exactly `function`, escaping names that would
    /// otherwise read as wildcards or regexes
    pub fn exact(function: &str) -> Self {
        let is_ambiguous = function == "?"
            || function == "*"
            || (function.len() >= 2 && function.starts_with('/') && function.ends_with('/'));

        if is_ambiguous {
            let escaped = format!("^{}$", regex::escape(function));
            match Regex::new(&escaped) {
                Ok(regex) => FramePattern::Function(StringMatch::Regex(regex)),
                Err(_) => FramePattern::Function(StringMatch::literal(function)),
            }
        } else {
            FramePattern::Function(StringMatch::literal(function))
        }
    }

    pub fn is_wildcard(&self) -> bool {
        !matches!(self, FramePattern::Function(_))
    }

    /// Whether this element accepts the given function name as a single frame
    pub fn accepts(&self, function: &str) -> bool {
        match self {
            FramePattern::AnyOne | FramePattern::AnyMany => true,
            FramePattern::Function(matcher) => matcher.matches(function),
        }
    }
}

impl fmt::Display for FramePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FramePattern::AnyOne => write!(f, "?"),
            FramePattern::AnyMany => write!(f, "*"),
            FramePattern::Function(matcher) => write!(f, "{}", matcher),
        }
    }
}

impl TryFrom<String> for FramePattern {
    type Error = PatternError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        FramePattern::parse(&value)
    }
}

impl From<FramePattern> for String {
    fn from(value: FramePattern) -> Self {
        value.to_string()
    }
}
