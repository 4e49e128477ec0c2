//! Adapter over the embedded database engine.
//!
//! A [`DirectoryStore`] is one SQLite connection on the Service Directory
//! file with the Object Directory file ATTACHed as `obj`, so a single
//! transaction can cover both databases of a pair. Relations map to tables,
//! attributes to columns; see [`crate::schema`].

mod query;

pub use query::{CursorState, Query};

use crate::error::{MdsError, Result};
use crate::schema::{
    self, AttributeValue, DirectoryKind, Record, RelationDescriptor, MODULE_ID, PATH, SSID,
    SUBSERVICE_RECORD_TYPES,
};
use rusqlite::types::ToSql;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

/// Schema name the Object Directory is attached under.
const OBJECT_SCHEMA: &str = "obj";

/// Identity of one stored row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordId {
    pub record_type: u32,
    pub row_id: i64,
}

/// (GUID, Path) pair read from the Object Directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleEntry {
    pub guid: String,
    pub path: String,
}

/// Open connection over one database pair.
pub struct DirectoryStore {
    conn: Connection,
    read_only: bool,
}

impl DirectoryStore {
    /// Create both files of a pair and lay down every relation.
    ///
    /// Existing files are reused; the schema statements are idempotent.
    pub fn create(object_db: &Path, directory_db: &Path, busy_timeout: Duration) -> Result<Self> {
        let conn = Connection::open(directory_db).map_err(|e| MdsError::Database {
            message: format!("Failed to create {}: {}", directory_db.display(), e),
            source: Some(e),
        })?;
        let store = Self::attach(conn, object_db, busy_timeout, false)?;
        store.create_schema()?;
        debug!(
            "Created directory schema in {} and {}",
            object_db.display(),
            directory_db.display()
        );
        Ok(store)
    }

    /// Open an existing pair.
    ///
    /// A read-only store rejects every mutation with `AccessDenied`.
    pub fn open(
        object_db: &Path,
        directory_db: &Path,
        read_only: bool,
        busy_timeout: Duration,
    ) -> Result<Self> {
        // ATTACH and open would both create missing files.
        for path in [object_db, directory_db] {
            if !path.is_file() {
                return Err(MdsError::Integrity {
                    path: path.to_path_buf(),
                    message: "database file is missing".to_string(),
                });
            }
        }

        let flags = if read_only {
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX
        } else {
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX
        };
        let conn = Connection::open_with_flags(directory_db, flags).map_err(|e| {
            MdsError::Database {
                message: format!("Failed to open {}: {}", directory_db.display(), e),
                source: Some(e),
            }
        })?;
        Self::attach(conn, object_db, busy_timeout, read_only)
    }

    fn attach(
        conn: Connection,
        object_db: &Path,
        busy_timeout: Duration,
        read_only: bool,
    ) -> Result<Self> {
        conn.busy_timeout(busy_timeout)?;
        conn.execute_batch("PRAGMA journal_mode=DELETE;")?;

        let object_path = object_db.to_string_lossy().to_string();
        conn.execute("ATTACH DATABASE ?1 AS obj", params![object_path])
            .map_err(|e| MdsError::Database {
                message: format!("Failed to attach {}: {}", object_db.display(), e),
                source: Some(e),
            })?;

        if read_only {
            conn.execute_batch("PRAGMA query_only=ON;")?;
        }

        Ok(Self { conn, read_only })
    }

    fn create_schema(&self) -> Result<()> {
        for relation in schema::relations() {
            let columns = relation
                .attributes
                .iter()
                .map(|attr| format!("\"{}\" {}", attr.name, attr.format.sql_type()))
                .collect::<Vec<_>>()
                .join(", ");
            let mut sql = format!(
                "CREATE TABLE IF NOT EXISTS {} ({});\n",
                qualified(relation),
                columns
            );
            for index in relation.indexes {
                sql.push_str(&format!(
                    "CREATE INDEX IF NOT EXISTS {}\"idx_{}_{}\" ON \"{}\"(\"{}\");\n",
                    schema_prefix(relation),
                    relation.name,
                    index.to_lowercase(),
                    relation.name,
                    index
                ));
            }
            self.conn.execute_batch(&sql)?;
        }
        Ok(())
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.read_only {
            return Err(MdsError::AccessDenied(
                "directory database is open read-only".to_string(),
            ));
        }
        Ok(())
    }

    /// Insert one record.
    pub fn insert(&self, record: &Record) -> Result<RecordId> {
        self.ensure_writable()?;
        insert_on(&self.conn, record)
    }

    /// Insert a set of records in one transaction spanning both databases.
    ///
    /// Either every record is stored or none is.
    pub fn write_records(&mut self, records: &[Record]) -> Result<usize> {
        self.ensure_writable()?;
        let tx = self.conn.transaction()?;
        for record in records {
            insert_on(&tx, record)?;
        }
        tx.commit()?;
        Ok(records.len())
    }

    /// Replace every row of `guid` with `records` in one transaction.
    pub fn replace_module(&mut self, guid: &str, records: &[Record]) -> Result<usize> {
        self.ensure_writable()?;
        let tx = self.conn.transaction()?;
        let mut replaced = 0;
        for relation in schema::relations() {
            replaced += delete_module_on(&tx, relation, guid)?;
        }
        for record in records {
            insert_on(&tx, record)?;
        }
        tx.commit()?;
        if replaced > 0 {
            debug!("Replaced {} rows of module {}", replaced, guid);
        }
        Ok(records.len())
    }

    /// Read one record back by id.
    pub fn get(&self, id: RecordId) -> Result<Option<Record>> {
        let relation = relation_for(id.record_type)?;
        let sql = format!(
            "SELECT {} FROM {} WHERE rowid = ?1",
            column_list(relation),
            qualified(relation)
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params![id.row_id])?;
        match rows.next()? {
            Some(row) => Ok(Some(decode_row(relation, row, 0)?)),
            None => Ok(None),
        }
    }

    pub fn delete(&self, id: RecordId) -> Result<bool> {
        self.ensure_writable()?;
        let relation = relation_for(id.record_type)?;
        let sql = format!("DELETE FROM {} WHERE rowid = ?1", qualified(relation));
        Ok(self.conn.execute(&sql, params![id.row_id])? > 0)
    }

    /// Delete every row carrying `guid`, in every relation of both databases.
    pub fn remove_module(&self, guid: &str) -> Result<usize> {
        self.ensure_writable()?;
        let mut removed = 0;
        for relation in schema::relations() {
            removed += delete_module_on(&self.conn, relation, guid)?;
        }
        debug!("Removed {} rows for module {}", removed, guid);
        Ok(removed)
    }

    /// Delete the rows of one sub-service from the relations a CSP or DL owns.
    pub fn remove_subservice(&self, guid: &str, ssid: u32) -> Result<usize> {
        self.ensure_writable()?;
        let mut removed = 0;
        for record_type in SUBSERVICE_RECORD_TYPES {
            let relation = relation_for(*record_type)?;
            let sql = format!(
                "DELETE FROM {} WHERE \"{}\" = ?1 AND \"{}\" = ?2",
                qualified(relation),
                MODULE_ID,
                SSID
            );
            removed += self.conn.execute(&sql, params![guid, ssid])?;
        }
        debug!(
            "Removed {} rows for module {} subservice {}",
            removed, guid, ssid
        );
        Ok(removed)
    }

    /// (GUID, Path) of every module in the Object Directory.
    pub fn modules(&self) -> Result<Vec<ModuleEntry>> {
        let relation = relation_for(schema::record_type::OBJECT)?;
        let sql = format!(
            "SELECT \"{}\", \"{}\" FROM {}",
            MODULE_ID,
            PATH,
            qualified(relation)
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, Option<String>>(0)?, row.get::<_, Option<String>>(1)?))
        })?;

        let mut entries = Vec::new();
        for row in rows {
            match row? {
                (Some(guid), Some(path)) => entries.push(ModuleEntry { guid, path }),
                (guid, path) => {
                    warn!("Skipping object row without identity: {:?} {:?}", guid, path)
                }
            }
        }
        Ok(entries)
    }

    /// Whether an Object row already records `path`.
    pub fn contains_path(&self, path: &str) -> Result<bool> {
        let relation = relation_for(schema::record_type::OBJECT)?;
        let sql = format!(
            "SELECT 1 FROM {} WHERE \"{}\" = ?1 LIMIT 1",
            qualified(relation),
            PATH
        );
        Ok(self
            .conn
            .query_row(&sql, params![path], |_| Ok(()))
            .optional()?
            .is_some())
    }

    /// Count the rows matching `query` in one logical database.
    pub fn count(&self, query: &Query, directory: DirectoryKind) -> Result<usize> {
        let mut total = 0;
        for relation in query.relations(directory) {
            let (clause, values) = where_clause(&query.predicates);
            let sql = format!(
                "SELECT COUNT(*) FROM {} WHERE 1 = 1{}",
                qualified(relation),
                clause
            );
            let params: Vec<&dyn ToSql> = values.iter().map(|v| *v as &dyn ToSql).collect();
            let count: i64 = self.conn.query_row(&sql, &params[..], |row| row.get(0))?;
            total += count as usize;
        }
        Ok(total)
    }

    /// Advance `cursor` to the next matching row.
    pub fn next_match(&self, cursor: &mut CursorState) -> Result<Option<(RecordId, Record)>> {
        while let Some(relation) = cursor.relations.get(cursor.position).copied() {
            let (clause, values) = where_clause(&cursor.query.predicates);
            let sql = format!(
                "SELECT rowid, {} FROM {} WHERE rowid > ?{}{} ORDER BY rowid LIMIT 1",
                column_list(relation),
                qualified(relation),
                values.len() + 1,
                clause
            );
            let mut params: Vec<&dyn ToSql> = values.iter().map(|v| *v as &dyn ToSql).collect();
            params.push(&cursor.last_rowid);

            let mut stmt = self.conn.prepare(&sql)?;
            let mut rows = stmt.query(&params[..])?;
            if let Some(row) = rows.next()? {
                let row_id: i64 = row.get(0)?;
                let record = decode_row(relation, row, 1)?;
                cursor.last_rowid = row_id;
                return Ok(Some((
                    RecordId {
                        record_type: relation.record_type,
                        row_id,
                    },
                    record,
                )));
            }

            cursor.position += 1;
            cursor.last_rowid = 0;
        }
        Ok(None)
    }
}

fn insert_on(conn: &Connection, record: &Record) -> Result<RecordId> {
    let relation = relation_for(record.record_type)?;
    if record.attributes.is_empty() {
        let sql = format!("INSERT INTO {} DEFAULT VALUES", qualified(relation));
        conn.execute(&sql, [])?;
    } else {
        let columns = record
            .attributes
            .iter()
            .map(|(name, _)| format!("\"{}\"", name))
            .collect::<Vec<_>>()
            .join(", ");
        let placeholders = (1..=record.attributes.len())
            .map(|i| format!("?{}", i))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            qualified(relation),
            columns,
            placeholders
        );
        let params: Vec<&dyn ToSql> = record
            .attributes
            .iter()
            .map(|(_, value)| value as &dyn ToSql)
            .collect();
        conn.execute(&sql, &params[..])?;
    }

    Ok(RecordId {
        record_type: relation.record_type,
        row_id: conn.last_insert_rowid(),
    })
}

fn delete_module_on(
    conn: &Connection,
    relation: &'static RelationDescriptor,
    guid: &str,
) -> Result<usize> {
    let sql = format!(
        "DELETE FROM {} WHERE \"{}\" = ?1",
        qualified(relation),
        MODULE_ID
    );
    Ok(conn.execute(&sql, params![guid])?)
}

fn decode_row(
    relation: &'static RelationDescriptor,
    row: &rusqlite::Row<'_>,
    offset: usize,
) -> Result<Record> {
    let mut record = Record::new(relation.record_type);
    for (i, attr) in relation.attributes.iter().enumerate() {
        if let Some(value) = AttributeValue::from_column(attr.format, row.get_ref(offset + i)?)? {
            record.attributes.push((attr.name, value));
        }
    }
    Ok(record)
}

fn where_clause(predicates: &[(String, AttributeValue)]) -> (String, Vec<&AttributeValue>) {
    let mut clause = String::new();
    let mut values = Vec::with_capacity(predicates.len());
    for (i, (name, value)) in predicates.iter().enumerate() {
        clause.push_str(&format!(" AND \"{}\" = ?{}", name.replace('"', ""), i + 1));
        values.push(value);
    }
    (clause, values)
}

fn relation_for(record_type: u32) -> Result<&'static RelationDescriptor> {
    schema::relation_by_type(record_type).ok_or(MdsError::InvalidRecordType(record_type))
}

fn schema_prefix(relation: &RelationDescriptor) -> &'static str {
    match relation.directory {
        DirectoryKind::Object => "obj.",
        DirectoryKind::Service => "main.",
    }
}

fn qualified(relation: &RelationDescriptor) -> String {
    match relation.directory {
        DirectoryKind::Object => format!("{}.\"{}\"", OBJECT_SCHEMA, relation.name),
        DirectoryKind::Service => format!("main.\"{}\"", relation.name),
    }
}

fn column_list(relation: &RelationDescriptor) -> String {
    relation
        .attributes
        .iter()
        .map(|attr| format!("\"{}\"", attr.name))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::record_type;
    use tempfile::TempDir;

    fn create_test_store() -> (DirectoryStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = DirectoryStore::create(
            &temp_dir.path().join("mdsObject.db"),
            &temp_dir.path().join("mdsDirectory.db"),
            Duration::from_secs(1),
        )
        .unwrap();
        (store, temp_dir)
    }

    fn object_record(guid: &str, path: &str) -> Record {
        Record {
            record_type: record_type::OBJECT,
            attributes: vec![
                ("ModuleID", AttributeValue::from(guid)),
                ("ModuleName", AttributeValue::from("Test Module")),
                ("Path", AttributeValue::from(path)),
            ],
        }
    }

    fn capability_record(guid: &str, ssid: u32, alg: u32) -> Record {
        Record {
            record_type: record_type::CSP_CAPABILITY,
            attributes: vec![
                ("ModuleID", AttributeValue::from(guid)),
                ("SSID", AttributeValue::Uint32(ssid)),
                ("AlgType", AttributeValue::Uint32(alg)),
                ("GroupId", AttributeValue::Uint32(0)),
            ],
        }
    }

    #[test]
    fn test_create_makes_both_files() {
        let (_store, temp_dir) = create_test_store();
        assert!(temp_dir.path().join("mdsObject.db").is_file());
        assert!(temp_dir.path().join("mdsDirectory.db").is_file());
    }

    #[test]
    fn test_open_missing_pair_is_integrity_error() {
        let temp_dir = TempDir::new().unwrap();
        let result = DirectoryStore::open(
            &temp_dir.path().join("mdsObject.db"),
            &temp_dir.path().join("mdsDirectory.db"),
            false,
            Duration::from_secs(1),
        );
        assert!(matches!(result, Err(MdsError::Integrity { .. })));
        assert!(!temp_dir.path().join("mdsObject.db").exists());
    }

    #[test]
    fn test_round_trip_every_format() {
        let (store, _temp_dir) = create_test_store();
        let record = Record {
            record_type: record_type::CSP_PRIMARY,
            attributes: vec![
                ("ModuleID", AttributeValue::from("87191ca0-0fc9-11d4-849a-000502b52122")),
                ("SSID", AttributeValue::Uint32(u32::MAX)),
                ("Manifest", AttributeValue::Blob(vec![0, 1, 2, 0xff])),
                ("UseeTags", AttributeValue::MultiUint32(vec![0, 7, u32::MAX])),
            ],
        };

        let id = store.insert(&record).unwrap();
        let read = store.get(id).unwrap().unwrap();
        assert_eq!(read, record);
    }

    #[test]
    fn test_empty_multi_uint32_round_trips() {
        let (store, _temp_dir) = create_test_store();
        let record = Record {
            record_type: record_type::DL_PRIMARY,
            attributes: vec![
                ("ModuleID", AttributeValue::from("g")),
                ("AuthTags", AttributeValue::MultiUint32(Vec::new())),
            ],
        };
        let id = store.insert(&record).unwrap();
        assert_eq!(store.get(id).unwrap().unwrap(), record);
    }

    #[test]
    fn test_remove_module_spans_both_databases() {
        let (mut store, _temp_dir) = create_test_store();
        store
            .write_records(&[
                object_record("guid-a", "/b/A.bundle"),
                capability_record("guid-a", 1, 42),
                capability_record("guid-a", 1, 43),
                object_record("guid-b", "/b/B.bundle"),
                capability_record("guid-b", 1, 42),
            ])
            .unwrap();

        let removed = store.remove_module("guid-a").unwrap();
        assert_eq!(removed, 3);

        let by_guid = Query::all().with("ModuleID", "guid-a");
        assert_eq!(store.count(&by_guid, DirectoryKind::Object).unwrap(), 0);
        assert_eq!(store.count(&by_guid, DirectoryKind::Service).unwrap(), 0);
        assert_eq!(
            store
                .count(&Query::all().with("ModuleID", "guid-b"), DirectoryKind::Service)
                .unwrap(),
            1
        );
    }

    #[test]
    fn test_write_records_is_all_or_nothing() {
        let (mut store, _temp_dir) = create_test_store();
        let bad = Record {
            record_type: 0xdead,
            attributes: Vec::new(),
        };
        let result = store.write_records(&[object_record("guid-a", "/b/A.bundle"), bad]);
        assert!(result.is_err());
        assert!(store.modules().unwrap().is_empty());
    }

    #[test]
    fn test_replace_module_leaves_one_generation() {
        let (mut store, _temp_dir) = create_test_store();
        store
            .write_records(&[
                object_record("guid-a", "/b/A.bundle"),
                capability_record("guid-a", 1, 42),
                capability_record("guid-a", 1, 43),
            ])
            .unwrap();

        store
            .replace_module(
                "guid-a",
                &[
                    object_record("guid-a", "/b/A.bundle"),
                    capability_record("guid-a", 1, 44),
                ],
            )
            .unwrap();

        let caps = Query::of(record_type::CSP_CAPABILITY).with("ModuleID", "guid-a");
        assert_eq!(store.count(&caps, DirectoryKind::Service).unwrap(), 1);
        assert_eq!(store.modules().unwrap().len(), 1);
    }

    #[test]
    fn test_remove_subservice_only_touches_csp_and_dl() {
        let (mut store, _temp_dir) = create_test_store();
        let tp = Record {
            record_type: record_type::TP_PRIMARY,
            attributes: vec![
                ("ModuleID", AttributeValue::from("guid-a")),
                ("SSID", AttributeValue::Uint32(1)),
            ],
        };
        store
            .write_records(&[
                capability_record("guid-a", 1, 42),
                capability_record("guid-a", 2, 42),
                tp,
            ])
            .unwrap();

        assert_eq!(store.remove_subservice("guid-a", 1).unwrap(), 1);
        let remaining = store
            .count(&Query::all().with("ModuleID", "guid-a"), DirectoryKind::Service)
            .unwrap();
        assert_eq!(remaining, 2);
    }

    #[test]
    fn test_cursor_walks_relations_in_order() {
        let (mut store, _temp_dir) = create_test_store();
        store
            .write_records(&[
                capability_record("guid-a", 1, 42),
                Record {
                    record_type: record_type::CSP_PRIMARY,
                    attributes: vec![("ModuleID", AttributeValue::from("guid-a"))],
                },
                capability_record("guid-a", 1, 43),
                capability_record("guid-b", 1, 44),
            ])
            .unwrap();

        let mut cursor = CursorState::new(
            Query::all().with("ModuleID", "guid-a"),
            DirectoryKind::Service,
        );
        let mut seen = Vec::new();
        while let Some((id, _record)) = store.next_match(&mut cursor).unwrap() {
            seen.push(id.record_type);
        }
        assert_eq!(
            seen,
            vec![
                record_type::CSP_PRIMARY,
                record_type::CSP_CAPABILITY,
                record_type::CSP_CAPABILITY
            ]
        );
        assert!(cursor.is_exhausted());
    }

    #[test]
    fn test_read_only_store_rejects_mutation() {
        let (store, temp_dir) = create_test_store();
        drop(store);

        let read_only = DirectoryStore::open(
            &temp_dir.path().join("mdsObject.db"),
            &temp_dir.path().join("mdsDirectory.db"),
            true,
            Duration::from_secs(1),
        )
        .unwrap();
        let result = read_only.insert(&object_record("guid-a", "/b/A.bundle"));
        assert!(matches!(result, Err(MdsError::AccessDenied(_))));
        assert!(read_only.is_read_only());
    }

    #[test]
    fn test_modules_and_contains_path() {
        let (store, _temp_dir) = create_test_store();
        store.insert(&object_record("guid-a", "/b/A.bundle")).unwrap();

        let modules = store.modules().unwrap();
        assert_eq!(
            modules,
            vec![ModuleEntry {
                guid: "guid-a".to_string(),
                path: "/b/A.bundle".to_string(),
            }]
        );
        assert!(store.contains_path("/b/A.bundle").unwrap());
        assert!(!store.contains_path("/b/B.bundle").unwrap());
    }

    #[test]
    fn test_delete_by_record_id() {
        let (store, _temp_dir) = create_test_store();
        let id = store.insert(&capability_record("guid-a", 1, 42)).unwrap();
        assert!(store.delete(id).unwrap());
        assert!(!store.delete(id).unwrap());
        assert!(store.get(id).unwrap().is_none());
    }
}
