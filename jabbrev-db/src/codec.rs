//! Binary codec for everything the store persists.
//!
//! Values are MessagePack with two extension types layered on top:
//!
//! ```text
//! ┌───────────────┬──────────────────────────────────────────────┐
//! │ ext type 1    │ set of strings, packed as an array           │
//! │ ext type 10   │ journal record, packed as a field map        │
//! │ other ext     │ preserved opaquely (forward compatibility)   │
//! └───────────────┴──────────────────────────────────────────────┘
//! ```
//!
//! Decoding is recursive through the same extension hook, so the `names` set
//! nested inside a journal payload resolves like any top-level value. Set
//! element order is not preserved across a round trip, only membership.
//!
//! Unsigned integers pack minimally (fixint, then uint8/16/32/64 with
//! ascending marker bytes and big-endian payloads), so the raw byte order of
//! encoded IDs agrees with numeric order and the primary table can use the
//! engine's native key ordering.

use std::collections::BTreeSet;

use rmpv::Value;
use thiserror::Error;

use crate::journal::{FieldKind, FieldSpec, Journal, JournalId};

/// Extension code for a set of strings.
pub const EXT_STRING_SET: i8 = 1;
/// Extension code for a journal record.
pub const EXT_JOURNAL: i8 = 10;

/// Codec failures.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("failed to encode value: {0}")]
    Write(#[from] rmpv::encode::Error),
    #[error("failed to decode value: {0}")]
    Read(#[from] rmpv::decode::Error),
    /// The payload holds a msgpack type the store has no representation for.
    #[error("cannot represent msgpack value of type `{0}`")]
    UnsupportedType(&'static str),
    #[error("malformed payload: expected {expected}")]
    Malformed { expected: &'static str },
}

/// A decoded storage value.
#[derive(Debug, Clone, PartialEq)]
pub enum DbValue {
    /// Unsigned integer (IDs, the allocation counter).
    Int(u64),
    /// UTF-8 string (schema version, index keys).
    Str(String),
    /// Set of strings (extension type 1).
    StrSet(BTreeSet<String>),
    /// Journal record (extension type 10).
    Journal(Journal),
    /// Extension payload from a codec version newer than this build, carried
    /// through untouched so a round trip is byte-identical.
    Foreign { code: i8, data: Vec<u8> },
}

// ─── Encoding ────────────────────────────────────────────────────────────────

pub fn encode_value(value: &DbValue) -> Result<Vec<u8>, CodecError> {
    write_raw(&to_raw(value)?)
}

pub fn encode_id(id: JournalId) -> Result<Vec<u8>, CodecError> {
    write_raw(&Value::from(id.0))
}

pub fn encode_uint(n: u64) -> Result<Vec<u8>, CodecError> {
    write_raw(&Value::from(n))
}

pub fn encode_str(s: &str) -> Result<Vec<u8>, CodecError> {
    write_raw(&Value::from(s))
}

pub fn encode_journal(journal: &Journal) -> Result<Vec<u8>, CodecError> {
    write_raw(&journal_to_raw(journal)?)
}

fn write_raw(raw: &Value) -> Result<Vec<u8>, CodecError> {
    let mut buf = Vec::new();
    rmpv::encode::write_value(&mut buf, raw)?;
    Ok(buf)
}

fn to_raw(value: &DbValue) -> Result<Value, CodecError> {
    Ok(match value {
        DbValue::Int(n) => Value::from(*n),
        DbValue::Str(s) => Value::from(s.as_str()),
        DbValue::StrSet(set) => set_to_raw(set)?,
        DbValue::Journal(journal) => journal_to_raw(journal)?,
        DbValue::Foreign { code, data } => Value::Ext(*code, data.clone()),
    })
}

fn set_to_raw(set: &BTreeSet<String>) -> Result<Value, CodecError> {
    let elements = set.iter().map(|s| Value::from(s.as_str())).collect();
    Ok(Value::Ext(EXT_STRING_SET, write_raw(&Value::Array(elements))?))
}

/// Pack a journal as ext type 10: a map holding only the non-absent fields,
/// laid out per the static field table.
fn journal_to_raw(journal: &Journal) -> Result<Value, CodecError> {
    let mut fields = Vec::new();
    for spec in Journal::FIELDS {
        match spec.kind {
            FieldKind::Collection => {
                if !journal.names.is_empty() {
                    fields.push((Value::from(spec.name), set_to_raw(&journal.names)?));
                }
            }
            FieldKind::Scalar => {
                if let Some(value) = journal.scalar(spec.name) {
                    fields.push((Value::from(spec.name), Value::from(value)));
                }
            }
        }
    }
    Ok(Value::Ext(EXT_JOURNAL, write_raw(&Value::Map(fields))?))
}

// ─── Decoding ────────────────────────────────────────────────────────────────

pub fn decode_value(bytes: &[u8]) -> Result<DbValue, CodecError> {
    from_raw(read_raw(bytes)?)
}

pub fn decode_id(bytes: &[u8]) -> Result<JournalId, CodecError> {
    decode_uint(bytes).map(JournalId)
}

pub fn decode_uint(bytes: &[u8]) -> Result<u64, CodecError> {
    match decode_value(bytes)? {
        DbValue::Int(n) => Ok(n),
        _ => Err(CodecError::Malformed { expected: "unsigned integer" }),
    }
}

pub fn decode_str(bytes: &[u8]) -> Result<String, CodecError> {
    match decode_value(bytes)? {
        DbValue::Str(s) => Ok(s),
        _ => Err(CodecError::Malformed { expected: "string" }),
    }
}

pub fn decode_journal(bytes: &[u8]) -> Result<Journal, CodecError> {
    match decode_value(bytes)? {
        DbValue::Journal(journal) => Ok(journal),
        _ => Err(CodecError::Malformed { expected: "journal record" }),
    }
}

fn read_raw(mut bytes: &[u8]) -> Result<Value, CodecError> {
    Ok(rmpv::decode::read_value(&mut bytes)?)
}

fn from_raw(raw: Value) -> Result<DbValue, CodecError> {
    match raw {
        Value::Integer(n) => n
            .as_u64()
            .map(DbValue::Int)
            .ok_or(CodecError::UnsupportedType("negative integer")),
        Value::String(s) => s
            .into_str()
            .map(DbValue::Str)
            .ok_or(CodecError::UnsupportedType("non-utf8 string")),
        Value::Ext(EXT_STRING_SET, data) => Ok(DbValue::StrSet(decode_string_set(&data)?)),
        Value::Ext(EXT_JOURNAL, data) => Ok(DbValue::Journal(decode_journal_map(&data)?)),
        Value::Ext(code, data) => Ok(DbValue::Foreign { code, data }),
        other => Err(CodecError::UnsupportedType(raw_type_name(&other))),
    }
}

fn decode_string_set(data: &[u8]) -> Result<BTreeSet<String>, CodecError> {
    let Value::Array(elements) = read_raw(data)? else {
        return Err(CodecError::Malformed { expected: "string set payload" });
    };
    elements
        .into_iter()
        .map(|element| match element {
            Value::String(s) => s
                .into_str()
                .ok_or(CodecError::UnsupportedType("non-utf8 string")),
            _ => Err(CodecError::Malformed { expected: "string set element" }),
        })
        .collect()
}

fn decode_journal_map(data: &[u8]) -> Result<Journal, CodecError> {
    let Value::Map(entries) = read_raw(data)? else {
        return Err(CodecError::Malformed { expected: "journal field map" });
    };

    let mut journal = Journal::default();
    for (key, value) in entries {
        let Some(name) = key.as_str() else {
            return Err(CodecError::Malformed { expected: "journal field name" });
        };
        match Journal::field(name) {
            Some(FieldSpec { kind: FieldKind::Collection, .. }) => match from_raw(value)? {
                DbValue::StrSet(set) => journal.names = set,
                _ => return Err(CodecError::Malformed { expected: "name set" }),
            },
            Some(FieldSpec { kind: FieldKind::Scalar, .. }) => match value {
                Value::Nil => {}
                Value::String(s) => {
                    let text = s
                        .into_str()
                        .ok_or(CodecError::UnsupportedType("non-utf8 string"))?;
                    journal.set_scalar(name, Some(text));
                }
                _ => return Err(CodecError::Malformed { expected: "scalar field value" }),
            },
            // Field from a newer minor schema; migration owns renames.
            None => {}
        }
    }
    Ok(journal)
}

fn raw_type_name(raw: &Value) -> &'static str {
    match raw {
        Value::Nil => "nil",
        Value::Boolean(_) => "boolean",
        Value::Integer(_) => "integer",
        Value::F32(_) | Value::F64(_) => "float",
        Value::String(_) => "string",
        Value::Binary(_) => "binary",
        Value::Array(_) => "array",
        Value::Map(_) => "map",
        Value::Ext(..) => "ext",
    }
}
