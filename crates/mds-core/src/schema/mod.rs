//! Schema registry.
//!
//! Every relation the directory service stores is described by a static
//! [`RelationDescriptor`]: a record type id, the ordered attributes with
//! their storage formats, and the attributes to index. The registry is
//! compiled in and never changes for the life of the process.

pub mod names;
mod relations;
mod value;

pub use names::NameTable;
pub use relations::{record_type, RELATIONS, SUBSERVICE_RECORD_TYPES};
pub use value::{decode_multi_uint32, encode_multi_uint32, AttributeValue, Record};

/// Identity attribute present in every relation.
pub const MODULE_ID: &str = "ModuleID";
/// Sub-service identifier.
pub const SSID: &str = "SSID";
/// Bundle path in the Object relation.
pub const PATH: &str = "Path";
/// Synthesized index of a nested group.
pub const GROUP_ID: &str = "GroupId";

/// Storage format of one attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttributeFormat {
    String,
    Uint32,
    MultiUint32,
    Blob,
}

impl AttributeFormat {
    /// Column type used by the embedded engine.
    pub fn sql_type(&self) -> &'static str {
        match self {
            AttributeFormat::String => "TEXT",
            AttributeFormat::Uint32 => "INTEGER",
            AttributeFormat::MultiUint32 | AttributeFormat::Blob => "BLOB",
        }
    }
}

/// Which database of the pair a relation lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DirectoryKind {
    Object,
    Service,
}

#[derive(Debug)]
pub struct AttributeDescriptor {
    pub name: &'static str,
    pub format: AttributeFormat,
    /// Symbolic names accepted for uint32 values.
    pub names: Option<NameTable>,
}

/// Shape of a descriptor that expands into many rows.
#[derive(Debug)]
pub struct NestedLayout {
    /// Key holding the array of groups.
    pub groups_key: &'static str,
    pub group_attributes: &'static [&'static str],
    /// Key holding each group's array of entries, if any.
    pub entries_key: Option<&'static str>,
    pub entry_attributes: &'static [&'static str],
}

#[derive(Debug)]
pub struct RelationDescriptor {
    pub record_type: u32,
    /// Record type symbol used by `MdsRecordType` in descriptors.
    pub symbol: &'static str,
    /// Table name in the embedded engine.
    pub name: &'static str,
    pub directory: DirectoryKind,
    pub attributes: &'static [AttributeDescriptor],
    pub indexes: &'static [&'static str],
    pub nested: Option<NestedLayout>,
}

impl RelationDescriptor {
    pub fn attribute(&'static self, name: &str) -> Option<&'static AttributeDescriptor> {
        self.attributes.iter().find(|attr| attr.name == name)
    }

    pub fn has_attribute(&self, name: &str) -> bool {
        self.attributes.iter().any(|attr| attr.name == name)
    }

    /// Attributes read from the top level of a nested descriptor.
    pub fn top_level_attributes(&'static self) -> impl Iterator<Item = &'static AttributeDescriptor> {
        let nested = self.nested.as_ref();
        self.attributes.iter().filter(move |attr| {
            attr.name != GROUP_ID
                && nested.map_or(true, |layout| {
                    !layout.group_attributes.contains(&attr.name)
                        && !layout.entry_attributes.contains(&attr.name)
                })
        })
    }

    /// Look up attribute descriptors by name, in the given order.
    pub fn attributes_named(
        &'static self,
        names: &'static [&'static str],
    ) -> impl Iterator<Item = &'static AttributeDescriptor> {
        names.iter().filter_map(move |name| self.attribute(name))
    }
}

/// All compiled-in relations.
pub fn relations() -> &'static [RelationDescriptor] {
    RELATIONS
}

pub fn relation_by_type(record_type: u32) -> Option<&'static RelationDescriptor> {
    RELATIONS.iter().find(|rel| rel.record_type == record_type)
}

pub fn relation_by_symbol(symbol: &str) -> Option<&'static RelationDescriptor> {
    RELATIONS.iter().find(|rel| rel.symbol == symbol)
}

pub fn relations_in(directory: DirectoryKind) -> impl Iterator<Item = &'static RelationDescriptor> {
    RELATIONS.iter().filter(move |rel| rel.directory == directory)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_relation_carries_module_id() {
        for relation in relations() {
            assert!(
                relation.has_attribute(MODULE_ID),
                "{} lacks ModuleID",
                relation.name
            );
        }
    }

    #[test]
    fn test_record_types_and_symbols_are_unique() {
        for (i, a) in relations().iter().enumerate() {
            for b in &relations()[i + 1..] {
                assert_ne!(a.record_type, b.record_type);
                assert_ne!(a.symbol, b.symbol);
                assert_ne!(a.name, b.name);
            }
        }
    }

    #[test]
    fn test_indexes_and_layouts_name_real_attributes() {
        for relation in relations() {
            for index in relation.indexes {
                assert!(relation.has_attribute(index), "{}.{}", relation.name, index);
            }
            if let Some(layout) = &relation.nested {
                for attr in layout.group_attributes.iter().chain(layout.entry_attributes) {
                    assert!(relation.has_attribute(attr), "{}.{}", relation.name, attr);
                }
            }
        }
    }

    #[test]
    fn test_object_relation_is_alone_in_object_directory() {
        let object: Vec<_> = relations_in(DirectoryKind::Object).collect();
        assert_eq!(object.len(), 1);
        assert_eq!(object[0].record_type, record_type::OBJECT);
        assert!(object[0].has_attribute(PATH));
    }

    #[test]
    fn test_capability_top_level_excludes_nested_attributes() {
        let relation = relation_by_type(record_type::CSP_CAPABILITY).unwrap();
        let top: Vec<_> = relation.top_level_attributes().map(|a| a.name).collect();
        assert_eq!(top, vec![MODULE_ID, SSID]);
    }

    #[test]
    fn test_lookup_by_symbol() {
        let relation = relation_by_symbol("MDS_CDSADIR_TP_OIDS_RECORDTYPE").unwrap();
        assert_eq!(relation.record_type, record_type::TP_OIDS);
        assert!(relation_by_symbol("MDS_NOPE").is_none());
    }
}
