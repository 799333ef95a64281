//! Three-way reconciliation of records arriving from multiple producers.
//!
//! The merge walks every field present in the incoming value against the
//! corresponding field of the base:
//!
//! - set-typed fields merge by union (commutative, idempotent)
//! - nested record-typed values recurse with a dotted field path
//! - scalar fields take whichever side is present; equal values are kept;
//!   unequal present values fail with a [`MergeConflict`] naming the field
//!   path and both values, never silently picking a winner
//!
//! Callers apply the merged result in the same batch as the read, or discard
//! it wholesale on conflict, so stored state is never half-merged.

use thiserror::Error;

use crate::codec::DbValue;
use crate::journal::{FieldKind, Journal};

/// Two present, unequal scalar values at the same field path.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("conflicting values at `{path}`: base `{base}`, incoming `{next}`")]
pub struct MergeConflict {
    /// Dotted path of the conflicting field.
    pub path: String,
    /// The value already stored.
    pub base: String,
    /// The incoming value.
    pub next: String,
}

/// Merge an incoming journal into a base journal.
pub fn merge_journals(base: &Journal, next: &Journal) -> Result<Journal, MergeConflict> {
    merge_journals_at("", base, next)
}

/// Merge two decoded storage values of the same shape.
///
/// Used wherever record values nest; the counter key in the metadata
/// namespace is combined by the engine's decode-and-sum operator instead.
pub fn merge_values(path: &str, base: &DbValue, next: &DbValue) -> Result<DbValue, MergeConflict> {
    match (base, next) {
        (DbValue::StrSet(b), DbValue::StrSet(n)) => {
            Ok(DbValue::StrSet(b.union(n).cloned().collect()))
        }
        (DbValue::Journal(b), DbValue::Journal(n)) => {
            Ok(DbValue::Journal(merge_journals_at(path, b, n)?))
        }
        (b, n) if b == n => Ok(b.clone()),
        (b, n) => Err(MergeConflict {
            path: path.to_string(),
            base: render(b),
            next: render(n),
        }),
    }
}

fn merge_journals_at(
    prefix: &str,
    base: &Journal,
    next: &Journal,
) -> Result<Journal, MergeConflict> {
    let mut merged = base.clone();
    for spec in Journal::FIELDS {
        match spec.kind {
            FieldKind::Collection => {
                merged.names = base.names.union(&next.names).cloned().collect();
            }
            FieldKind::Scalar => {
                let value = merge_scalar(
                    &field_path(prefix, spec.name),
                    base.scalar(spec.name),
                    next.scalar(spec.name),
                )?;
                merged.set_scalar(spec.name, value);
            }
        }
    }
    Ok(merged)
}

fn merge_scalar(
    path: &str,
    base: Option<&str>,
    next: Option<&str>,
) -> Result<Option<String>, MergeConflict> {
    match (base, next) {
        (None, None) => Ok(None),
        (Some(b), None) => Ok(Some(b.to_string())),
        (None, Some(n)) => Ok(Some(n.to_string())),
        (Some(b), Some(n)) if b == n => Ok(Some(b.to_string())),
        (Some(b), Some(n)) => Err(MergeConflict {
            path: path.to_string(),
            base: b.to_string(),
            next: n.to_string(),
        }),
    }
}

fn field_path(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}.{name}")
    }
}

fn render(value: &DbValue) -> String {
    match value {
        DbValue::Int(n) => n.to_string(),
        DbValue::Str(s) => s.clone(),
        other => format!("{other:?}"),
    }
}
