//! Descriptor files: loading, attribute extraction, and bundle parsing.
//!
//! - `value` - JSON documents as [`DescriptorValue`]
//! - `extract` - Per-attribute conversion and `file:` indirection
//! - `expand` - Nested capability / policy-OID rows
//! - `parser` - Whole-bundle parsing into records

mod expand;
mod extract;
mod parser;
mod value;

pub use expand::expand_nested;
pub use extract::{
    convert, lookup_attributes, lookup_with_indirect, parse_multi_uint32, parse_uint32,
    parse_uint32_str, Resolved, ResourceCache,
};
pub use parser::{
    descriptor_dir, descriptor_files, normalize_guid, parse_bundle, write_bundle,
    BundleOutcome, BundleParser, FileError, FileKind, MdsInstallDefaults, ParsedBundle,
    FILE_TYPE_KEY, RECORD_TYPE_KEY,
};
pub use value::{load_dictionary, load_document, parse_document, DescriptorValue, Dictionary};
