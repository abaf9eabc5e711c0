//! Hierarchical item keys.
//!
//! An [`ItemKey`] names one parameter (or a group of parameters) inside a
//! step configuration. The first segment is always the system name, e.g.
//! `instrument:filter` or `telescope:base:name` for a nested parameter.

use crate::error::{Result, SequenceError};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Separator between key segments when written as text
pub const SEPARATOR: char = ':';

/// Immutable hierarchical path. Equality, ordering and hashing are structural.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ItemKey {
    segments: Vec<String>,
}

impl ItemKey {
    /// Create a single-segment key (a system name).
    /// Use [`ItemKey::parse`] for untrusted input.
    pub fn root(name: impl Into<String>) -> Self {
        Self {
            segments: vec![name.into()],
        }
    }

    /// Build a key from a system and parameter name.
    pub fn new(system: impl Into<String>, param: impl Into<String>) -> Self {
        Self {
            segments: vec![system.into(), param.into()],
        }
    }

    /// Parse a `a:b:c` path, rejecting empty segments.
    pub fn parse(text: &str) -> Result<Self> {
        let segments: Vec<String> = text.split(SEPARATOR).map(str::to_string).collect();
        if segments.iter().any(|s| s.trim().is_empty()) {
            return Err(SequenceError::InvalidKey(text.to_string()));
        }
        Ok(Self { segments })
    }

    /// Extend this key with one more segment.
    pub fn child(&self, name: impl Into<String>) -> Self {
        let mut segments = self.segments.clone();
        segments.push(name.into());
        Self { segments }
    }

    /// The parent key, or `None` for a single-segment key.
    pub fn parent(&self) -> Option<Self> {
        if self.segments.len() <= 1 {
            return None;
        }
        Some(Self {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    /// Last segment.
    pub fn name(&self) -> &str {
        self.segments.last().map(String::as_str).unwrap_or("")
    }

    /// First segment: the system this key belongs to.
    pub fn system(&self) -> &str {
        self.segments.first().map(String::as_str).unwrap_or("")
    }

    /// All segments in order.
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Number of segments.
    pub fn depth(&self) -> usize {
        self.segments.len()
    }

    /// True if `self` is a strict ancestor of `other`.
    pub fn is_ancestor_of(&self, other: &ItemKey) -> bool {
        other.segments.len() > self.segments.len()
            && other.segments[..self.segments.len()] == self.segments[..]
    }

    /// True if `self` is a strict descendant of `other`.
    pub fn is_descendant_of(&self, other: &ItemKey) -> bool {
        other.is_ancestor_of(self)
    }

    /// True if `self` equals `other` or descends from it.
    pub fn is_under(&self, other: &ItemKey) -> bool {
        self == other || self.is_descendant_of(other)
    }
}

impl fmt::Display for ItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.segments.join(":"))
    }
}

impl FromStr for ItemKey {
    type Err = SequenceError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for ItemKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ItemKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Self::parse(&text).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        let key = ItemKey::parse("instrument:filter").expect("valid key");
        assert_eq!(key.system(), "instrument");
        assert_eq!(key.name(), "filter");
        assert_eq!(key.depth(), 2);
        assert_eq!(key.to_string(), "instrument:filter");
    }

    #[test]
    fn test_parse_rejects_empty_segments() {
        assert!(ItemKey::parse("").is_err());
        assert!(ItemKey::parse("instrument:").is_err());
        assert!(ItemKey::parse("a::b").is_err());
    }

    #[test]
    fn test_parent_child_relationships() {
        let sys = ItemKey::root("telescope");
        let base = sys.child("base");
        let name = base.child("name");

        assert!(sys.is_ancestor_of(&name));
        assert!(name.is_descendant_of(&base));
        assert!(!base.is_ancestor_of(&base));
        assert!(base.is_under(&base));
        assert_eq!(name.parent(), Some(base.clone()));
        assert_eq!(sys.parent(), None);
    }

    #[test]
    fn test_structural_equality() {
        assert_eq!(
            ItemKey::new("observe", "lamp"),
            ItemKey::parse("observe:lamp").expect("valid key")
        );
        assert_ne!(ItemKey::new("observe", "lamp"), ItemKey::root("observe"));
    }

    #[test]
    fn test_serde_as_string() {
        let key = ItemKey::new("instrument", "filter");
        let json = serde_json::to_string(&key).expect("serialize");
        assert_eq!(json, "\"instrument:filter\"");
        let back: ItemKey = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, key);
    }
}
