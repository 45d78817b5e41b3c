//! Package identifiers.
//!
//! A package is a case-sensitive dotted name exposed by a distribution.
//! The pseudo-package `perl` denotes the target runtime itself; it is
//! never installed and is satisfied only by the runtime's own version.

use crate::error::Error;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use std::sync::Arc;

/// The pseudo-package naming the target runtime.
pub const PERL: &str = "perl";

/// An interned, case-sensitive package name.
#[derive(Clone)]
pub struct PackageName {
    name: Arc<str>,
}

impl PackageName {
    /// Create a package name.
    ///
    /// # Panics
    ///
    /// Panics if the name is empty or contains whitespace; use
    /// [`PackageName::parse`] for untrusted input.
    #[must_use]
    pub fn new(name: impl AsRef<str>) -> Self {
        Self::parse(name.as_ref()).expect("valid package name")
    }

    /// Parse a package name, rejecting empty and whitespace-bearing
    /// strings.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        if s.is_empty() || s.chars().any(char::is_whitespace) {
            return None;
        }
        Some(Self { name: Arc::from(s) })
    }

    /// Get the name as a string slice.
    #[must_use]
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.name
    }

    /// Is this the runtime pseudo-package?
    #[must_use]
    #[inline]
    pub fn is_perl(&self) -> bool {
        &*self.name == PERL
    }
}

impl fmt::Debug for PackageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PackageName").field(&self.name).finish()
    }
}

impl fmt::Display for PackageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

impl PartialEq for PackageName {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for PackageName {}

impl Hash for PackageName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl PartialOrd for PackageName {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PackageName {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.name.cmp(&other.name)
    }
}

impl FromStr for PackageName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| Error::InvalidPackageName {
            name: s.to_string(),
        })
    }
}

impl Serialize for PackageName {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.name)
    }
}

impl<'de> Deserialize<'de> for PackageName {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid package name: {s}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_case_sensitive() {
        assert_ne!(PackageName::new("HTTP.Tiny"), PackageName::new("http.tiny"));
        assert_eq!(PackageName::new("HTTP.Tiny"), PackageName::new("HTTP.Tiny"));
    }

    #[test]
    fn perl_pseudo_package() {
        assert!(PackageName::new("perl").is_perl());
        assert!(!PackageName::new("Perl.Tidy").is_perl());
    }

    #[test]
    fn rejects_empty_and_whitespace() {
        assert!(PackageName::parse("").is_none());
        assert!(PackageName::parse("Foo Bar").is_none());
    }
}
