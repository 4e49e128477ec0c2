//! Descriptor documents as a closed value type.

use crate::error::{MdsError, Result};
use std::collections::BTreeMap;
use std::path::Path;

/// Key marking a JSON object as hex-encoded binary data.
const DATA_KEY: &str = "$data";

pub type Dictionary = BTreeMap<String, DescriptorValue>;

/// One value in a descriptor document.
#[derive(Debug, Clone, PartialEq)]
pub enum DescriptorValue {
    String(String),
    Integer(i64),
    Real(f64),
    Bool(bool),
    Data(Vec<u8>),
    Array(Vec<DescriptorValue>),
    Dict(Dictionary),
    Null,
}

impl DescriptorValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            DescriptorValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&Dictionary> {
        match self {
            DescriptorValue::Dict(dict) => Some(dict),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[DescriptorValue]> {
        match self {
            DescriptorValue::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Short name of the variant, for log messages.
    pub fn kind(&self) -> &'static str {
        match self {
            DescriptorValue::String(_) => "string",
            DescriptorValue::Integer(_) => "integer",
            DescriptorValue::Real(_) => "real",
            DescriptorValue::Bool(_) => "bool",
            DescriptorValue::Data(_) => "data",
            DescriptorValue::Array(_) => "array",
            DescriptorValue::Dict(_) => "dict",
            DescriptorValue::Null => "null",
        }
    }
}

impl TryFrom<serde_json::Value> for DescriptorValue {
    type Error = String;

    fn try_from(value: serde_json::Value) -> std::result::Result<Self, Self::Error> {
        use serde_json::Value;

        Ok(match value {
            Value::Null => DescriptorValue::Null,
            Value::Bool(b) => DescriptorValue::Bool(b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => DescriptorValue::Integer(i),
                None => DescriptorValue::Real(n.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(s) => DescriptorValue::String(s),
            Value::Array(items) => DescriptorValue::Array(
                items
                    .into_iter()
                    .map(DescriptorValue::try_from)
                    .collect::<std::result::Result<_, _>>()?,
            ),
            Value::Object(map) => {
                if map.len() == 1 {
                    if let Some(Value::String(encoded)) = map.get(DATA_KEY) {
                        let bytes = hex::decode(encoded.trim())
                            .map_err(|e| format!("invalid {} value: {}", DATA_KEY, e))?;
                        return Ok(DescriptorValue::Data(bytes));
                    }
                }
                let mut dict = Dictionary::new();
                for (key, value) in map {
                    dict.insert(key, DescriptorValue::try_from(value)?);
                }
                DescriptorValue::Dict(dict)
            }
        })
    }
}

/// Parse descriptor text into a value.
pub fn parse_document(content: &str, path: &Path) -> Result<DescriptorValue> {
    let json: serde_json::Value = serde_json::from_str(content).map_err(|e| MdsError::Json {
        message: format!("Failed to parse descriptor {}: {}", path.display(), e),
        source: Some(e),
    })?;
    DescriptorValue::try_from(json).map_err(|message| MdsError::descriptor(path, message))
}

/// Load a descriptor file.
pub fn load_document(path: &Path) -> Result<DescriptorValue> {
    let content = std::fs::read_to_string(path).map_err(|e| MdsError::io_with_path(e, path))?;
    parse_document(&content, path)
}

/// Load a descriptor file whose top level must be a dictionary.
pub fn load_dictionary(path: &Path) -> Result<Dictionary> {
    match load_document(path)? {
        DescriptorValue::Dict(dict) => Ok(dict),
        other => Err(MdsError::descriptor(
            path,
            format!("top level is a {}, expected a dict", other.kind()),
        )),
    }
}
