//! Schema-driven attribute extraction from descriptor dictionaries.
//!
//! Conversion rules per storage format:
//! - string: copied verbatim
//! - uint32: number, boolean, or string; strings are `|`/whitespace separated
//!   tokens OR'd together, each a symbolic name, decimal, or `0x` hex, and a
//!   `<<` prefix shifts that token left by 16 bits
//! - multi-uint32: an array of uint32 forms, or one bare value
//! - blob: `{"$data": ...}` bytes, or the UTF-8 bytes of a string
//!
//! A value that cannot be converted skips only its own attribute.

use super::value::{load_document, DescriptorValue, Dictionary};
use crate::config::DirectoryConfig;
use crate::error::{MdsError, Result};
use crate::schema::names::{self, NameTable};
use crate::schema::{AttributeDescriptor, AttributeFormat, AttributeValue};
use std::cell::RefCell;
use std::collections::HashMap;
use std::ops::Deref;
use std::path::PathBuf;
use std::rc::Rc;
use tracing::{debug, warn};

/// Prefix of a token shifted into the high half of a uint32.
const SHIFT_PREFIX: &str = "<<";

/// A looked-up value: borrowed from the dictionary, or shared from an
/// indirect resource loaded by a [`ResourceCache`].
#[derive(Debug, Clone)]
pub enum Resolved<'a> {
    Inline(&'a DescriptorValue),
    Resource(Rc<DescriptorValue>),
}

impl Deref for Resolved<'_> {
    type Target = DescriptorValue;

    fn deref(&self) -> &DescriptorValue {
        match self {
            Resolved::Inline(value) => value,
            Resolved::Resource(value) => value,
        }
    }
}

/// Resources named by `file:` values, each loaded at most once.
#[derive(Debug, Default)]
pub struct ResourceCache {
    search_dirs: Vec<PathBuf>,
    loaded: RefCell<HashMap<String, Rc<DescriptorValue>>>,
}

impl ResourceCache {
    /// Resolve names against `search_dirs`, first match wins.
    pub fn new(search_dirs: Vec<PathBuf>) -> Self {
        Self {
            search_dirs,
            loaded: RefCell::new(HashMap::new()),
        }
    }

    pub fn load(&self, name: &str) -> Result<Rc<DescriptorValue>> {
        if let Some(value) = self.loaded.borrow().get(name) {
            return Ok(Rc::clone(value));
        }

        let path = self
            .search_dirs
            .iter()
            .map(|dir| dir.join(name))
            .find(|path| path.is_file())
            .ok_or_else(|| MdsError::descriptor(name, "indirect resource not found"))?;

        let value = Rc::new(load_document(&path)?);
        debug!("Loaded indirect resource {}", path.display());
        self.loaded
            .borrow_mut()
            .insert(name.to_string(), Rc::clone(&value));
        Ok(value)
    }

    /// Number of distinct resources loaded so far.
    pub fn loaded_count(&self) -> usize {
        self.loaded.borrow().len()
    }
}

/// Look up `key`, following a `file:<name>` value to its resource.
pub fn lookup_with_indirect<'a>(
    dict: &'a Dictionary,
    key: &str,
    resources: &ResourceCache,
) -> Option<Resolved<'a>> {
    let value = dict.get(key)?;
    match value
        .as_str()
        .and_then(|s| s.strip_prefix(DirectoryConfig::INDIRECT_PREFIX))
    {
        Some(name) => match resources.load(name) {
            Ok(resource) => Some(Resolved::Resource(resource)),
            Err(e) => {
                warn!("Skipping {}: {}", key, e);
                None
            }
        },
        None => Some(Resolved::Inline(value)),
    }
}

/// Append every attribute of `attributes` found in `dict` to `out`.
///
/// Returns how many were appended.
pub fn lookup_attributes(
    dict: &Dictionary,
    attributes: impl IntoIterator<Item = &'static AttributeDescriptor>,
    resources: &ResourceCache,
    out: &mut Vec<(&'static str, AttributeValue)>,
) -> usize {
    let before = out.len();
    for attr in attributes {
        let Some(value) = lookup_with_indirect(dict, attr.name, resources) else {
            continue;
        };
        match convert(attr, &value) {
            Some(converted) => out.push((attr.name, converted)),
            None => debug!(
                "Skipping attribute {}: cannot convert {} to {:?}",
                attr.name,
                value.kind(),
                attr.format
            ),
        }
    }
    out.len() - before
}

/// Convert one descriptor value to the attribute's storage format.
pub fn convert(attr: &AttributeDescriptor, value: &DescriptorValue) -> Option<AttributeValue> {
    match attr.format {
        AttributeFormat::String => value
            .as_str()
            .map(|s| AttributeValue::String(s.to_string())),
        AttributeFormat::Uint32 => parse_uint32(value, attr.names).map(AttributeValue::Uint32),
        AttributeFormat::MultiUint32 => {
            parse_multi_uint32(value, attr.names).map(AttributeValue::MultiUint32)
        }
        AttributeFormat::Blob => match value {
            DescriptorValue::Data(bytes) => Some(AttributeValue::Blob(bytes.clone())),
            DescriptorValue::String(s) => Some(AttributeValue::Blob(s.as_bytes().to_vec())),
            _ => None,
        },
    }
}

/// Parse a uint32 from a number, boolean, or symbolic string.
pub fn parse_uint32(value: &DescriptorValue, names: Option<NameTable>) -> Option<u32> {
    match value {
        DescriptorValue::Integer(i) => u32::try_from(*i).ok(),
        DescriptorValue::Real(r) => {
            if r.fract() == 0.0 && *r >= 0.0 && *r <= f64::from(u32::MAX) {
                Some(*r as u32)
            } else {
                None
            }
        }
        DescriptorValue::Bool(b) => Some(u32::from(*b)),
        DescriptorValue::String(s) => parse_uint32_str(s, names),
        _ => None,
    }
}

/// Parse an array of uint32 forms; a bare value is a one-element array.
pub fn parse_multi_uint32(value: &DescriptorValue, names: Option<NameTable>) -> Option<Vec<u32>> {
    match value {
        DescriptorValue::Array(items) => items
            .iter()
            .map(|item| parse_uint32(item, names))
            .collect(),
        single => parse_uint32(single, names).map(|v| vec![v]),
    }
}

/// Parse `"A | B"`, `"0x10"`, `"42"`, `"<<NAME"` and combinations.
pub fn parse_uint32_str(text: &str, names: Option<NameTable>) -> Option<u32> {
    let mut result = 0u32;
    let mut parsed_any = false;
    let mut shift_next = false;

    for token in text
        .split(|c: char| c == '|' || c.is_whitespace())
        .filter(|token| !token.is_empty())
    {
        // "<< NAME" spelled with a space shifts the following token.
        if token == SHIFT_PREFIX {
            shift_next = true;
            continue;
        }
        let (shift, body) = match token.strip_prefix(SHIFT_PREFIX) {
            Some(rest) => (true, rest),
            None => (shift_next, token),
        };
        shift_next = false;

        let mut value = parse_scalar(body, names)?;
        if shift {
            value = u32::try_from(u64::from(value) << 16).ok()?;
        }
        result |= value;
        parsed_any = true;
    }

    if parsed_any && !shift_next {
        Some(result)
    } else {
        None
    }
}

fn parse_scalar(token: &str, names: Option<NameTable>) -> Option<u32> {
    if let Some(value) = names.and_then(|table| names::lookup(table, token)) {
        return Some(value);
    }
    if let Some(hex) = token
        .strip_prefix("0x")
        .or_else(|| token.strip_prefix("0X"))
    {
        return u32::from_str_radix(hex, 16).ok();
    }
    token.parse::<u32>().ok()
}
