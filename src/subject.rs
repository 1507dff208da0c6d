//! Typed principal identifiers with wildcard containment.
//!
//! A [`Subject`] addresses roles, policies, and limiter scopes. It is an
//! immutable `"kind:id"` pair where either side may be the `*` wildcard.

use serde::de::{self, Deserializer, Visitor};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

/// The wildcard component, matching any kind or id.
pub const WILDCARD: &str = "*";

/// A typed principal reference, serialized as `"kind:id"`.
///
/// Equality and hashing use the exact string form; wildcard-aware
/// comparison goes through [`Subject::matches`] instead.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Subject {
    kind: String,
    id: String,
}

impl Subject {
    /// Create a subject from a kind and id.
    pub fn new(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            id: id.into(),
        }
    }

    /// The `*:*` subject, matching every concrete subject.
    pub fn any() -> Self {
        Self::new(WILDCARD, WILDCARD)
    }

    /// A `user:<id>` subject.
    pub fn user(id: impl Into<String>) -> Self {
        Self::new("user", id)
    }

    /// A `group:<id>` subject.
    pub fn group(id: impl Into<String>) -> Self {
        Self::new("group", id)
    }

    /// A `bot:<id>` subject.
    pub fn bot(id: impl Into<String>) -> Self {
        Self::new("bot", id)
    }

    /// The subject kind (`*` is the wildcard).
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// The subject id (`*` is the wildcard).
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Whether `self`, read as a pattern, contains the concrete subject
    /// `other`.
    ///
    /// Matching is directional: the pattern side supplies the wildcards.
    pub fn matches(&self, other: &Subject) -> bool {
        self.kind == WILDCARD
            || (other.kind == self.kind || other.kind == WILDCARD)
                && (self.id == WILDCARD || other.id == self.id || other.id == WILDCARD)
    }

    /// Whether this subject is the `user` kind.
    pub fn is_user(&self) -> bool {
        self.kind == "user"
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

impl FromStr for Subject {
    type Err = Infallible;

    /// Permissive parse: a string without a `:` becomes a literal kind
    /// with an empty id. Well-formed strings round-trip exactly.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some((kind, id)) => Ok(Self::new(kind, id)),
            None => Ok(Self::new(s, "")),
        }
    }
}

impl From<&str> for Subject {
    fn from(s: &str) -> Self {
        s.parse().unwrap_or_else(|e| match e {})
    }
}

impl Serialize for Subject {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

struct SubjectVisitor;

impl Visitor<'_> for SubjectVisitor {
    type Value = Subject;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a \"kind:id\" subject string")
    }

    fn visit_str<E: de::Error>(self, value: &str) -> Result<Subject, E> {
        Ok(Subject::from(value))
    }
}

impl<'de> Deserialize<'de> for Subject {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_str(SubjectVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_any_matches_everything() {
        let any = Subject::any();
        assert!(any.matches(&Subject::user("123")));
        assert!(any.matches(&Subject::group("456")));
        assert!(any.matches(&Subject::new("weird", "")));
        assert!(any.matches(&any));
    }

    #[test]
    fn test_kind_wildcard_id_match() {
        let pattern = Subject::new("user", WILDCARD);
        assert!(pattern.matches(&Subject::user("1")));
        assert!(pattern.matches(&Subject::user("2")));
        assert!(!pattern.matches(&Subject::group("1")));
    }

    #[test]
    fn test_exact_match_is_directional() {
        let pattern = Subject::user("1");
        assert!(pattern.matches(&Subject::user("1")));
        assert!(!pattern.matches(&Subject::user("2")));
        // The concrete side may carry wildcards too.
        assert!(pattern.matches(&Subject::new("user", WILDCARD)));
    }

    #[test]
    fn test_roundtrip() {
        let subject = Subject::user("42");
        let parsed: Subject = subject.to_string().parse().unwrap();
        assert_eq!(subject, parsed);
        assert_eq!(parsed.to_string(), "user:42");
    }

    #[test]
    fn test_permissive_parse() {
        let subject = Subject::from("garbage");
        assert_eq!(subject.kind(), "garbage");
        assert_eq!(subject.id(), "");
    }

    #[test]
    fn test_exact_equality_ignores_wildcards() {
        // Hash/Eq are by string form; a pattern is not equal to what it matches.
        assert_ne!(Subject::any(), Subject::user("1"));
        assert_eq!(Subject::user("1"), Subject::user("1"));
    }

    #[test]
    fn test_serde_string_form() {
        let subject = Subject::group("99");
        let json = serde_json::to_string(&subject).unwrap();
        assert_eq!(json, "\"group:99\"");
        let back: Subject = serde_json::from_str(&json).unwrap();
        assert_eq!(back, subject);
    }
}
