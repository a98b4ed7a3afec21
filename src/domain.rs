//! Normalized domain names.
//!
//! Every name that enters the filter (blocklist lines, wire requests,
//! resolver query names) goes through [`DomainName::parse`], so lookups
//! only ever compare lower-case, dot-stripped strings.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Reasons a string is not a usable domain name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomainError {
    #[error("domain name is empty")]
    Empty,

    #[error("domain name {0:?} contains an empty label")]
    EmptyLabel(String),

    #[error("domain name {0:?} contains whitespace")]
    Whitespace(String),
}

/// A lower-case, trailing-dot-stripped, non-empty domain name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DomainName(String);

impl DomainName {
    /// Normalize `raw` into a domain name.
    ///
    /// Surrounding whitespace and a single trailing dot (the root label)
    /// are removed, and ASCII letters are lower-cased.
    pub fn parse(raw: &str) -> Result<Self, DomainError> {
        let trimmed = raw.trim();
        let name = trimmed.strip_suffix('.').unwrap_or(trimmed);

        if name.is_empty() {
            return Err(DomainError::Empty);
        }
        if name.chars().any(char::is_whitespace) {
            return Err(DomainError::Whitespace(name.to_string()));
        }
        if name.split('.').any(str::is_empty) {
            return Err(DomainError::EmptyLabel(name.to_string()));
        }

        Ok(Self(name.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The name itself followed by each parent suffix, most specific first.
    ///
    /// `tracker.ads.example.com` yields `tracker.ads.example.com`,
    /// `ads.example.com`, `example.com`, `com`.
    pub fn suffixes(&self) -> Suffixes<'_> {
        Suffixes {
            rest: Some(self.0.as_str()),
        }
    }
}

/// Iterator returned by [`DomainName::suffixes`].
pub struct Suffixes<'a> {
    rest: Option<&'a str>,
}

impl<'a> Iterator for Suffixes<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.rest?;
        self.rest = current.find('.').map(|pos| &current[pos + 1..]);
        Some(current)
    }
}

impl FromStr for DomainName {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for DomainName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for DomainName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Serialize for DomainName {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for DomainName {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}
