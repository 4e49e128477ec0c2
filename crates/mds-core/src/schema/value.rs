//! Typed attribute values and records.

use super::{AttributeFormat, RelationDescriptor};
use crate::error::{MdsError, Result};
use rusqlite::types::{ToSql, ToSqlOutput, Value, ValueRef};

/// One attribute value, tagged with its storage format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeValue {
    String(String),
    Uint32(u32),
    MultiUint32(Vec<u32>),
    Blob(Vec<u8>),
}

impl AttributeValue {
    pub fn format(&self) -> AttributeFormat {
        match self {
            AttributeValue::String(_) => AttributeFormat::String,
            AttributeValue::Uint32(_) => AttributeFormat::Uint32,
            AttributeValue::MultiUint32(_) => AttributeFormat::MultiUint32,
            AttributeValue::Blob(_) => AttributeFormat::Blob,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttributeValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_u32(&self) -> Option<u32> {
        match self {
            AttributeValue::Uint32(v) => Some(*v),
            _ => None,
        }
    }

    /// Decode a column value stored in `format`.
    pub fn from_column(format: AttributeFormat, value: ValueRef<'_>) -> Result<Option<Self>> {
        let decoded = match (format, value) {
            (_, ValueRef::Null) => return Ok(None),
            (AttributeFormat::String, ValueRef::Text(bytes)) => {
                AttributeValue::String(String::from_utf8_lossy(bytes).into_owned())
            }
            (AttributeFormat::Uint32, ValueRef::Integer(i)) => {
                let v = u32::try_from(i).map_err(|_| MdsError::Database {
                    message: format!("uint32 column holds out-of-range value {}", i),
                    source: None,
                })?;
                AttributeValue::Uint32(v)
            }
            (AttributeFormat::MultiUint32, ValueRef::Blob(bytes)) => {
                AttributeValue::MultiUint32(decode_multi_uint32(bytes)?)
            }
            (AttributeFormat::Blob, ValueRef::Blob(bytes)) => AttributeValue::Blob(bytes.to_vec()),
            (format, other) => {
                return Err(MdsError::Database {
                    message: format!(
                        "column of type {:?} cannot hold a {:?} attribute",
                        other.data_type(),
                        format
                    ),
                    source: None,
                })
            }
        };
        Ok(Some(decoded))
    }
}

impl From<&str> for AttributeValue {
    fn from(s: &str) -> Self {
        AttributeValue::String(s.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(s: String) -> Self {
        AttributeValue::String(s)
    }
}

impl From<u32> for AttributeValue {
    fn from(v: u32) -> Self {
        AttributeValue::Uint32(v)
    }
}

impl ToSql for AttributeValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            AttributeValue::String(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            AttributeValue::Uint32(v) => ToSqlOutput::Owned(Value::Integer(i64::from(*v))),
            AttributeValue::MultiUint32(values) => {
                ToSqlOutput::Owned(Value::Blob(encode_multi_uint32(values)))
            }
            AttributeValue::Blob(bytes) => ToSqlOutput::Borrowed(ValueRef::Blob(bytes)),
        })
    }
}

/// Fixed-width little-endian concatenation.
pub fn encode_multi_uint32(values: &[u32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Inverse of [`encode_multi_uint32`]; the count is inferred from the length.
pub fn decode_multi_uint32(bytes: &[u8]) -> Result<Vec<u32>> {
    if bytes.len() % 4 != 0 {
        return Err(MdsError::Database {
            message: format!("multi-uint32 blob has length {}", bytes.len()),
            source: None,
        });
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

/// Ordered attribute values for one relation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub record_type: u32,
    pub attributes: Vec<(&'static str, AttributeValue)>,
}

impl Record {
    pub fn new(record_type: u32) -> Self {
        Self {
            record_type,
            attributes: Vec::new(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&AttributeValue> {
        self.attributes
            .iter()
            .find(|(attr, _)| *attr == name)
            .map(|(_, value)| value)
    }

    /// Build a record from caller-supplied names, checking them against the
    /// relation's schema.
    pub fn from_named(
        relation: &'static RelationDescriptor,
        attributes: Vec<(String, AttributeValue)>,
    ) -> Result<Self> {
        let mut record = Record::new(relation.record_type);
        for (name, value) in attributes {
            let descriptor = relation
                .attribute(&name)
                .ok_or_else(|| MdsError::InvalidAttribute {
                    relation: relation.name.to_string(),
                    attribute: name.clone(),
                })?;
            if descriptor.format != value.format() {
                return Err(MdsError::Other(format!(
                    "attribute {} expects {:?}, got {:?}",
                    name,
                    descriptor.format,
                    value.format()
                )));
            }
            record.attributes.push((descriptor.name, value));
        }
        Ok(record)
    }
}
