//! Expansion of nested descriptors into one row per innermost element.
//!
//! The capability relation is three levels deep (top, group, entry) and the
//! policy-OID relation two (top, group). Top-level attributes are extracted
//! once and shared by every row; each level truncates the buffer back to its
//! own prefix before repopulating it.

use super::extract::{lookup_attributes, lookup_with_indirect, ResourceCache};
use super::value::{DescriptorValue, Dictionary};
use crate::schema::{AttributeValue, NestedLayout, Record, RelationDescriptor, GROUP_ID};
use tracing::{debug, warn};

/// Expand `dict` into rows of `relation`, appending them to `out`.
///
/// Returns the number of rows appended. Malformed groups or entries are
/// skipped along with everything below them.
pub fn expand_nested(
    dict: &Dictionary,
    relation: &'static RelationDescriptor,
    layout: &'static NestedLayout,
    resources: &ResourceCache,
    out: &mut Vec<Record>,
) -> usize {
    let before = out.len();
    let mut buffer: Vec<(&'static str, AttributeValue)> =
        Vec::with_capacity(relation.attributes.len());

    lookup_attributes(dict, relation.top_level_attributes(), resources, &mut buffer);
    let top_len = buffer.len();

    let Some(groups) = lookup_with_indirect(dict, layout.groups_key, resources) else {
        debug!("{} has no {} array", relation.symbol, layout.groups_key);
        return 0;
    };
    let Some(groups) = groups.as_array() else {
        warn!(
            "{} in {} is a {}, expected an array",
            layout.groups_key,
            relation.symbol,
            groups.kind()
        );
        return 0;
    };
    let synthesize_group_id = relation.has_attribute(GROUP_ID);

    for (index, group) in groups.iter().enumerate() {
        let Ok(group_id) = u32::try_from(index) else {
            warn!("{} has more groups than a GroupId can number", relation.symbol);
            break;
        };
        let Some(group) = group.as_dict() else {
            warn!(
                "Skipping {} group {}: {} is not a dict",
                relation.symbol,
                index,
                group.kind()
            );
            continue;
        };

        buffer.truncate(top_len);
        lookup_attributes(
            group,
            relation.attributes_named(layout.group_attributes),
            resources,
            &mut buffer,
        );
        if synthesize_group_id {
            buffer.push((GROUP_ID, AttributeValue::Uint32(group_id)));
        }

        match layout.entries_key {
            None => out.push(Record {
                record_type: relation.record_type,
                attributes: buffer.clone(),
            }),
            Some(entries_key) => {
                expand_entries(group, relation, layout, entries_key, resources, &mut buffer, out);
            }
        }
    }

    out.len() - before
}

fn expand_entries(
    group: &Dictionary,
    relation: &'static RelationDescriptor,
    layout: &'static NestedLayout,
    entries_key: &str,
    resources: &ResourceCache,
    buffer: &mut Vec<(&'static str, AttributeValue)>,
    out: &mut Vec<Record>,
) {
    let group_len = buffer.len();
    let Some(entries) = lookup_with_indirect(group, entries_key, resources) else {
        return;
    };
    let Some(entries) = entries.as_array() else {
        warn!(
            "{} in {} is a {}, expected an array",
            entries_key,
            relation.symbol,
            entries.kind()
        );
        return;
    };

    for entry in entries {
        let DescriptorValue::Dict(entry) = entry else {
            warn!(
                "Skipping {} entry: {} is not a dict",
                relation.symbol,
                entry.kind()
            );
            continue;
        };
        buffer.truncate(group_len);
        lookup_attributes(
            entry,
            relation.attributes_named(layout.entry_attributes),
            resources,
            buffer,
        );
        out.push(Record {
            record_type: relation.record_type,
            attributes: buffer.clone(),
        });
    }
}
