//! Queries and keyset cursors over a directory store.

use crate::schema::{self, AttributeValue, DirectoryKind, RelationDescriptor};

/// Selection over one logical database.
///
/// `record_type == None` is the record-type wildcard: every relation in the
/// database that has all predicate attributes is searched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Query {
    pub record_type: Option<u32>,
    pub predicates: Vec<(String, AttributeValue)>,
}

impl Query {
    /// Every record of every relation.
    pub fn all() -> Self {
        Self::default()
    }

    /// Every record of one relation.
    pub fn of(record_type: u32) -> Self {
        Self {
            record_type: Some(record_type),
            predicates: Vec::new(),
        }
    }

    /// Add an equality predicate.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.predicates.push((name.into(), value.into()));
        self
    }

    /// Relations of `directory` this query can match, in registry order.
    pub(crate) fn relations(&self, directory: DirectoryKind) -> Vec<&'static RelationDescriptor> {
        schema::relations_in(directory)
            .filter(|rel| self.record_type.map_or(true, |rt| rel.record_type == rt))
            .filter(|rel| {
                self.predicates
                    .iter()
                    .all(|(name, _)| rel.has_attribute(name))
            })
            .collect()
    }
}

/// Position of a cursor: the relation being walked and the last row seen.
///
/// Cursors hold no engine statement between calls, so abandoning one is a
/// plain drop.
#[derive(Debug, Clone)]
pub struct CursorState {
    pub(crate) query: Query,
    pub(crate) relations: Vec<&'static RelationDescriptor>,
    pub(crate) position: usize,
    pub(crate) last_rowid: i64,
}

impl CursorState {
    pub(crate) fn new(query: Query, directory: DirectoryKind) -> Self {
        let relations = query.relations(directory);
        Self {
            query,
            relations,
            position: 0,
            last_rowid: 0,
        }
    }

    pub fn query(&self) -> &Query {
        &self.query
    }

    pub fn is_exhausted(&self) -> bool {
        self.position >= self.relations.len()
    }
}
