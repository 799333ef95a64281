//! Journal record model and query predicates.
//!
//! A [`Journal`] is the passive data entity the store persists: a set of
//! display names plus a handful of optional identifier fields. Field layout
//! is declared once in a static table ([`Journal::FIELDS`]) consumed uniformly
//! by the codec, the merge engine, and predicate matching, so adding a field
//! is a one-line change in each consumer.

use std::collections::BTreeSet;
use std::fmt;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Opaque surrogate key for a stored journal.
///
/// Allocated monotonically by the store, never reused, and unrelated to any
/// display field.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct JournalId(pub u64);

impl fmt::Display for JournalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Whether a field holds a single value or a collection of values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Scalar,
    Collection,
}

/// One entry of the static field table.
#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
}

/// A bibliographic journal record.
///
/// Every field is optional; an absent field means "unknown" and is never the
/// same as an empty string. `names` holds raw display variants and is only
/// logically deduplicated by the sanitized name index, not by the set itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Journal {
    /// Display-name variants, as published.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub names: BTreeSet<String>,
    /// ISSN of the print edition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issn_print: Option<String>,
    /// ISSN of the online edition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issn_web: Option<String>,
    /// ISO 4 abbreviated title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iso4: Option<String>,
    /// CODEN identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coden: Option<String>,
}

impl Journal {
    /// Key of the indexed `names` field.
    pub const NAMES_KEY: &'static str = "names";

    /// Static field table consumed by the codec, the merge engine, and
    /// predicate matching.
    pub const FIELDS: &'static [FieldSpec] = &[
        FieldSpec { name: "names", kind: FieldKind::Collection },
        FieldSpec { name: "issn_print", kind: FieldKind::Scalar },
        FieldSpec { name: "issn_web", kind: FieldKind::Scalar },
        FieldSpec { name: "iso4", kind: FieldKind::Scalar },
        FieldSpec { name: "coden", kind: FieldKind::Scalar },
    ];

    /// Convenience constructor for a record with a single display name.
    pub fn with_name(name: impl Into<String>) -> Self {
        Self {
            names: BTreeSet::from([name.into()]),
            ..Self::default()
        }
    }

    /// Look up a field table entry by key.
    pub fn field(key: &str) -> Option<&'static FieldSpec> {
        Self::FIELDS.iter().find(|f| f.name == key)
    }

    /// Borrow a scalar field by key. Collection fields and unknown keys
    /// return `None`.
    pub fn scalar(&self, field: &str) -> Option<&str> {
        match field {
            "issn_print" => self.issn_print.as_deref(),
            "issn_web" => self.issn_web.as_deref(),
            "iso4" => self.iso4.as_deref(),
            "coden" => self.coden.as_deref(),
            _ => None,
        }
    }

    pub(crate) fn set_scalar(&mut self, field: &str, value: Option<String>) {
        match field {
            "issn_print" => self.issn_print = value,
            "issn_web" => self.issn_web = value,
            "iso4" => self.iso4 = value,
            "coden" => self.coden = value,
            _ => {}
        }
    }

    /// Whether every field is absent.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
            && Self::FIELDS
                .iter()
                .filter(|f| matches!(f.kind, FieldKind::Scalar))
                .all(|f| self.scalar(f.name).is_none())
    }

    /// Test this record against a query predicate.
    ///
    /// Collection fields match if any element satisfies the predicate; scalar
    /// fields compare their value directly. Absent fields match nothing, as
    /// do unknown keys.
    pub fn matches(&self, key: &str, query: &Query) -> bool {
        match Self::field(key) {
            Some(FieldSpec { kind: FieldKind::Collection, .. }) => {
                self.names.iter().any(|name| query.matches_str(name))
            }
            Some(FieldSpec { kind: FieldKind::Scalar, .. }) => {
                self.scalar(key).is_some_and(|value| query.matches_str(value))
            }
            None => false,
        }
    }
}

/// A query predicate for [`Journal::matches`] and the facade's `query`.
#[derive(Debug, Clone)]
pub enum Query {
    /// Exact case-insensitive string equality.
    Exact(String),
    /// Case-insensitive equality against any of the candidates.
    AnyOf(Vec<String>),
    /// Full match (entire string) against a pattern.
    Pattern(Regex),
}

impl Query {
    pub fn exact(value: impl Into<String>) -> Self {
        Self::Exact(value.into())
    }

    pub fn any_of<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::AnyOf(values.into_iter().map(Into::into).collect())
    }

    pub fn pattern(regex: Regex) -> Self {
        Self::Pattern(regex)
    }

    /// Test a single string against this predicate.
    pub fn matches_str(&self, candidate: &str) -> bool {
        match self {
            Query::Exact(value) => candidate.to_lowercase() == value.to_lowercase(),
            Query::AnyOf(values) => {
                let folded = candidate.to_lowercase();
                values.iter().any(|value| folded == value.to_lowercase())
            }
            Query::Pattern(regex) => full_match(regex, candidate),
        }
    }
}

/// Whether `regex` matches the whole of `text`, not just a substring.
pub(crate) fn full_match(regex: &Regex, text: &str) -> bool {
    regex
        .find(text)
        .is_some_and(|m| m.start() == 0 && m.end() == text.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Journal {
        Journal {
            names: BTreeSet::from(["Journal of Testing".to_string(), "J. Test".to_string()]),
            iso4: Some("J. Test.".to_string()),
            coden: Some("JTEST".to_string()),
            ..Journal::default()
        }
    }

    #[test]
    fn field_table_covers_all_fields() {
        assert_eq!(Journal::FIELDS.len(), 5);
        assert_eq!(Journal::field("names").map(|f| f.kind), Some(FieldKind::Collection));
        assert_eq!(Journal::field("iso4").map(|f| f.kind), Some(FieldKind::Scalar));
        assert!(Journal::field("publisher").is_none());
    }

    #[test]
    fn matches_collection_case_insensitive() {
        let journal = sample();
        assert!(journal.matches("names", &Query::exact("journal of testing")));
        assert!(journal.matches("names", &Query::exact("J. TEST")));
        assert!(!journal.matches("names", &Query::exact("Journal of Nothing")));
    }

    #[test]
    fn matches_scalar_and_absent_fields() {
        let journal = sample();
        assert!(journal.matches("coden", &Query::exact("jtest")));
        assert!(!journal.matches("issn_print", &Query::exact("1234-5678")));
        assert!(!journal.matches("no_such_key", &Query::exact("anything")));
    }

    #[test]
    fn matches_any_of() {
        let journal = sample();
        let query = Query::any_of(["Unknown", "j. test"]);
        assert!(journal.matches("names", &query));
        assert!(!journal.matches("names", &Query::any_of(["Unknown"])));
    }

    #[test]
    fn pattern_requires_full_match() {
        let journal = sample();
        let contains = Regex::new("Testing").unwrap();
        assert!(!journal.matches("names", &Query::Pattern(contains)));
        let full = Regex::new("Journal of .*").unwrap();
        assert!(journal.matches("names", &Query::Pattern(full)));
    }

    #[test]
    fn empty_field_is_unknown_not_empty_string() {
        let journal = Journal::default();
        assert!(journal.is_empty());
        assert!(!journal.matches("iso4", &Query::exact("")));
    }

    #[test]
    fn serde_skips_absent_fields() {
        let json = serde_json::to_value(&Journal::with_name("Foo")).unwrap();
        assert_eq!(json.as_object().unwrap().len(), 1);
        assert!(json.get("iso4").is_none());
    }
}
