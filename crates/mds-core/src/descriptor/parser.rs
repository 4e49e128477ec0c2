//! Bundle descriptor parsing.
//!
//! A bundle's descriptor files are read in name order. The first file that
//! names a `ModuleID` fixes the bundle's GUID, and every record the bundle
//! produces carries it. Each file's `MdsFileType` selects what it emits:
//!
//! - `CSSM`: the Object record and a CSSM record
//! - `PluginCommon`: the Object record and a common-plugin record
//! - `PluginSpecific`: one record of the relation named by `MdsRecordType`,
//!   or many for the nested capability and policy-OID relations

use super::expand::expand_nested;
use super::extract::{lookup_attributes, ResourceCache};
use super::value::{load_dictionary, DescriptorValue, Dictionary};
use crate::config::DirectoryConfig;
use crate::error::{MdsError, Result};
use crate::schema::{
    self, record_type, AttributeValue, DirectoryKind, Record, RelationDescriptor, MODULE_ID,
    PATH, SSID,
};
use crate::store::DirectoryStore;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Discriminator key naming the file kind.
pub const FILE_TYPE_KEY: &str = "MdsFileType";
/// Record type symbol of a `PluginSpecific` file.
pub const RECORD_TYPE_KEY: &str = "MdsRecordType";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Cssm,
    PluginCommon,
    PluginSpecific,
}

impl FileKind {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "CSSM" => Some(FileKind::Cssm),
            "PluginCommon" => Some(FileKind::PluginCommon),
            "PluginSpecific" => Some(FileKind::PluginSpecific),
            _ => None,
        }
    }
}

/// Values merged over every descriptor file of an install.
///
/// Supplied values override what the file says.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MdsInstallDefaults {
    pub guid: Option<String>,
    pub ssid: Option<u32>,
    pub serial_number: Option<String>,
    pub description: Option<String>,
}

impl MdsInstallDefaults {
    fn apply(&self, dict: &mut Dictionary) {
        if let Some(guid) = &self.guid {
            dict.insert(MODULE_ID.to_string(), DescriptorValue::String(guid.clone()));
        }
        if let Some(ssid) = self.ssid {
            dict.insert(SSID.to_string(), DescriptorValue::Integer(i64::from(ssid)));
        }
        if let Some(serial) = &self.serial_number {
            dict.insert(
                "ScSerialNumber".to_string(),
                DescriptorValue::String(serial.clone()),
            );
        }
        if let Some(description) = &self.description {
            dict.insert(
                "ScDesc".to_string(),
                DescriptorValue::String(description.clone()),
            );
        }
    }
}

/// An error confined to one descriptor file.
#[derive(Debug)]
pub struct FileError {
    pub path: PathBuf,
    pub error: MdsError,
}

/// Records produced by parsing one bundle, not yet written.
#[derive(Debug)]
pub struct ParsedBundle {
    pub bundle: PathBuf,
    pub guid: String,
    pub records: Vec<Record>,
    pub file_errors: Vec<FileError>,
}

/// Result of parsing and writing one bundle.
#[derive(Debug)]
pub struct BundleOutcome {
    pub bundle: PathBuf,
    pub guid: String,
    pub records_written: usize,
    pub file_errors: Vec<FileError>,
}

/// Normalize a GUID to lowercase hyphenated form.
///
/// Strings that are not UUIDs are kept as written, trimmed.
pub fn normalize_guid(raw: &str) -> String {
    match uuid::Uuid::parse_str(raw.trim()) {
        Ok(uuid) => uuid.hyphenated().to_string(),
        Err(_) => {
            debug!("ModuleID {:?} is not a UUID, keeping it verbatim", raw);
            raw.trim().to_string()
        }
    }
}

/// Directory holding a bundle's descriptor files.
pub fn descriptor_dir(bundle: &Path) -> PathBuf {
    resources_dir(bundle).join(DirectoryConfig::DESCRIPTOR_SUBDIR)
}

fn resources_dir(bundle: &Path) -> PathBuf {
    bundle.join("Contents").join("Resources")
}

/// Descriptor files in `dir`, sorted by name.
pub fn descriptor_files(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            let name = entry.file_name().to_string_lossy();
            !name.starts_with(DirectoryConfig::RESERVED_FILE_PREFIX)
        })
        .filter(|entry| {
            entry
                .path()
                .extension()
                .map_or(false, |ext| ext == DirectoryConfig::DESCRIPTOR_EXTENSION)
        })
        .map(|entry| entry.into_path())
        .collect();
    files.sort();
    files
}

/// Parses the descriptor files of one bundle.
pub struct BundleParser {
    bundle: PathBuf,
    stored_path: String,
    resources: ResourceCache,
    defaults: Option<MdsInstallDefaults>,
    guid: Option<String>,
    object_emitted: bool,
    records: Vec<Record>,
}

impl BundleParser {
    /// Parser for a bundle whose descriptors live in the standard location.
    ///
    /// A built-in bundle's Object path is stored with a marker so it is never
    /// swept as obsolete.
    pub fn new(bundle: &Path, builtin: bool) -> Self {
        Self::with_descriptor_dir(bundle, &descriptor_dir(bundle), builtin)
    }

    /// Parser whose `file:` resources resolve in `dir` first, then in the
    /// bundle's resources directory.
    pub fn with_descriptor_dir(bundle: &Path, dir: &Path, builtin: bool) -> Self {
        let mut stored_path = bundle.to_string_lossy().to_string();
        if builtin {
            stored_path.insert(0, DirectoryConfig::BUILTIN_PATH_MARKER);
        }
        Self {
            bundle: bundle.to_path_buf(),
            stored_path,
            resources: ResourceCache::new(vec![dir.to_path_buf(), resources_dir(bundle)]),
            defaults: None,
            guid: None,
            object_emitted: false,
            records: Vec::new(),
        }
    }

    pub fn defaults(mut self, defaults: MdsInstallDefaults) -> Self {
        self.defaults = Some(defaults);
        self
    }

    pub fn guid(&self) -> Option<&str> {
        self.guid.as_deref()
    }

    /// Parse every descriptor file in the standard location.
    pub fn parse_bundle(self) -> Result<ParsedBundle> {
        let files = descriptor_files(&descriptor_dir(&self.bundle));
        self.parse_files(&files)
    }

    /// Parse `files` in order, collecting per-file errors.
    ///
    /// Fails with `MissingIdentity` if no file before the first one needing a
    /// GUID supplies one.
    pub fn parse_files(mut self, files: &[PathBuf]) -> Result<ParsedBundle> {
        let mut file_errors = Vec::new();
        for file in files {
            match self.parse_file(file) {
                Ok(count) => debug!("Parsed {} records from {}", count, file.display()),
                Err(MdsError::MissingIdentity(path)) => {
                    return Err(MdsError::MissingIdentity(path));
                }
                Err(error) => {
                    warn!("Skipping descriptor {}: {}", file.display(), error);
                    file_errors.push(FileError {
                        path: file.clone(),
                        error,
                    });
                }
            }
        }

        let guid = self
            .guid
            .clone()
            .ok_or_else(|| MdsError::MissingIdentity(self.bundle.clone()))?;
        // Every identified bundle has an Object row.
        if !self.object_emitted {
            let mut dict = Dictionary::new();
            dict.insert(MODULE_ID.to_string(), DescriptorValue::String(guid.clone()));
            self.emit_object(&dict);
        }
        Ok(ParsedBundle {
            bundle: self.bundle,
            guid,
            records: self.records,
            file_errors,
        })
    }

    /// Parse one descriptor file, returning the number of records it added.
    pub fn parse_file(&mut self, path: &Path) -> Result<usize> {
        let mut dict = load_dictionary(path)?;
        if let Some(defaults) = &self.defaults {
            defaults.apply(&mut dict);
        }
        self.establish_identity(&mut dict, path)?;

        let kind = dict
            .get(FILE_TYPE_KEY)
            .and_then(|v| v.as_str())
            .ok_or_else(|| MdsError::descriptor(path, format!("missing {}", FILE_TYPE_KEY)))?;
        let kind = FileKind::parse(kind)
            .ok_or_else(|| MdsError::descriptor(path, format!("unknown file type {:?}", kind)))?;

        let before = self.records.len();
        match kind {
            FileKind::Cssm => {
                self.emit_object(&dict);
                self.emit_flat(&dict, relation(record_type::CSSM)?);
            }
            FileKind::PluginCommon => {
                self.emit_object(&dict);
                self.emit_flat(&dict, relation(record_type::COMMON)?);
            }
            FileKind::PluginSpecific => {
                let symbol = dict
                    .get(RECORD_TYPE_KEY)
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| {
                        MdsError::descriptor(path, format!("missing {}", RECORD_TYPE_KEY))
                    })?;
                let relation = schema::relation_by_symbol(symbol)
                    .filter(|rel| rel.directory == DirectoryKind::Service)
                    .ok_or_else(|| {
                        MdsError::descriptor(path, format!("unknown record type {}", symbol))
                    })?;

                match &relation.nested {
                    Some(layout) => {
                        expand_nested(&dict, relation, layout, &self.resources, &mut self.records);
                    }
                    None => self.emit_flat(&dict, relation),
                }
            }
        }
        Ok(self.records.len() - before)
    }

    fn establish_identity(&mut self, dict: &mut Dictionary, path: &Path) -> Result<()> {
        let declared = dict
            .get(MODULE_ID)
            .and_then(|v| v.as_str())
            .map(normalize_guid);

        let guid = match (&self.guid, declared) {
            (Some(fixed), Some(declared)) => {
                if *fixed != declared {
                    warn!(
                        "{} declares ModuleID {}, bundle is {}",
                        path.display(),
                        declared,
                        fixed
                    );
                }
                fixed.clone()
            }
            (Some(fixed), None) => fixed.clone(),
            (None, Some(declared)) => {
                info!("Bundle {} is module {}", self.bundle.display(), declared);
                self.guid = Some(declared.clone());
                declared
            }
            (None, None) => return Err(MdsError::MissingIdentity(path.to_path_buf())),
        };

        dict.insert(MODULE_ID.to_string(), DescriptorValue::String(guid));
        Ok(())
    }

    fn emit_object(&mut self, dict: &Dictionary) {
        if self.object_emitted {
            return;
        }
        let Ok(object) = relation(record_type::OBJECT) else {
            return;
        };
        let mut attributes = Vec::with_capacity(object.attributes.len());
        lookup_attributes(
            dict,
            object.attributes.iter().filter(|attr| attr.name != PATH),
            &self.resources,
            &mut attributes,
        );
        attributes.push((PATH, AttributeValue::String(self.stored_path.clone())));
        self.records.push(Record {
            record_type: object.record_type,
            attributes,
        });
        self.object_emitted = true;
    }

    fn emit_flat(&mut self, dict: &Dictionary, relation: &'static RelationDescriptor) {
        let mut attributes = Vec::with_capacity(relation.attributes.len());
        lookup_attributes(dict, relation.attributes.iter(), &self.resources, &mut attributes);
        self.records.push(Record {
            record_type: relation.record_type,
            attributes,
        });
    }
}

fn relation(record_type: u32) -> Result<&'static RelationDescriptor> {
    schema::relation_by_type(record_type)
        .ok_or_else(|| MdsError::Other(format!("record type {:#x} is not registered", record_type)))
}

/// Replace the module's rows with a parsed bundle in one transaction.
///
/// If the write fails the module's rows are removed from both databases so
/// no partial bundle remains.
pub fn write_bundle(parsed: ParsedBundle, store: &mut DirectoryStore) -> Result<BundleOutcome> {
    match store.replace_module(&parsed.guid, &parsed.records) {
        Ok(written) => {
            debug!(
                "Wrote {} records for {} from {}",
                written,
                parsed.guid,
                parsed.bundle.display()
            );
            Ok(BundleOutcome {
                bundle: parsed.bundle,
                guid: parsed.guid,
                records_written: written,
                file_errors: parsed.file_errors,
            })
        }
        Err(e) => {
            warn!(
                "Failed to write bundle {}, unregistering {}: {}",
                parsed.bundle.display(),
                parsed.guid,
                e
            );
            if let Err(cleanup) = store.remove_module(&parsed.guid) {
                warn!("Failed to unregister {}: {}", parsed.guid, cleanup);
            }
            Err(e)
        }
    }
}

/// Parse a bundle and write its records.
pub fn parse_bundle(
    bundle: &Path,
    builtin: bool,
    store: &mut DirectoryStore,
) -> Result<BundleOutcome> {
    let parsed = BundleParser::new(bundle, builtin).parse_bundle()?;
    write_bundle(parsed, store)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const GUID: &str = "87191ca0-0fc9-11d4-849a-000502b52122";

    fn write_descriptor(bundle: &Path, name: &str, content: &str) {
        let dir = descriptor_dir(bundle);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(name), content).unwrap();
    }

    fn sample_bundle(root: &Path) -> PathBuf {
        let bundle = root.join("AppleCSP.bundle");
        write_descriptor(
            &bundle,
            "AppleCSP-common.mdsinfo",
            &format!(
                r#"{{
                    "MdsFileType": "PluginCommon",
                    "MdsFileDescription": "common",
                    "ModuleID": "{{{}}}",
                    "ModuleName": "AppleCSP",
                    "ServiceMask": "CSSM_SERVICE_CSP | CSSM_SERVICE_DL",
                    "DynamicFlag": false
                }}"#,
                GUID.to_uppercase()
            ),
        );
        write_descriptor(
            &bundle,
            "AppleCSP-primary.mdsinfo",
            r#"{
                "MdsFileType": "PluginSpecific",
                "MdsRecordType": "MDS_CDSADIR_CSP_PRIMARY_RECORDTYPE",
                "SSID": 0,
                "CspType": "CSSM_CSP_SOFTWARE",
                "UseeTags": "file:usee.json"
            }"#,
        );
        write_descriptor(
            &bundle,
            "AppleCSP-caps.mdsinfo",
            r#"{
                "MdsFileType": "PluginSpecific",
                "MdsRecordType": "MDS_CDSADIR_CSP_CAPABILITY_RECORDTYPE",
                "SSID": 0,
                "Capabilities": [
                    {"AlgType": "CSSM_ALGID_SHA1", "Attributes": [{"AttributeType": 0}]}
                ]
            }"#,
        );
        write_descriptor(&bundle, "._AppleCSP-common.mdsinfo", "garbage");
        write_descriptor(&bundle, "notes.txt", "ignored");
        std::fs::write(
            bundle.join("Contents").join("Resources").join("usee.json"),
            "[0, 1]",
        )
        .unwrap();
        bundle
    }

    #[test]
    fn test_descriptor_files_are_filtered_and_sorted() {
        let temp_dir = TempDir::new().unwrap();
        let bundle = sample_bundle(temp_dir.path());
        let names: Vec<_> = descriptor_files(&descriptor_dir(&bundle))
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(
            names,
            vec![
                "AppleCSP-caps.mdsinfo",
                "AppleCSP-common.mdsinfo",
                "AppleCSP-primary.mdsinfo"
            ]
        );
    }

    #[test]
    fn test_first_file_without_identity_rejects_bundle() {
        // "caps" sorts first and names no ModuleID.
        let temp_dir = TempDir::new().unwrap();
        let bundle = sample_bundle(temp_dir.path());
        let result = BundleParser::new(&bundle, false).parse_bundle();
        assert!(matches!(result, Err(MdsError::MissingIdentity(_))));
    }

    #[test]
    fn test_parse_bundle_emits_identified_records() {
        let temp_dir = TempDir::new().unwrap();
        let bundle = sample_bundle(temp_dir.path());
        std::fs::rename(
            descriptor_dir(&bundle).join("AppleCSP-caps.mdsinfo"),
            descriptor_dir(&bundle).join("AppleCSP-zcaps.mdsinfo"),
        )
        .unwrap();

        let parsed = BundleParser::new(&bundle, false).parse_bundle().unwrap();
        assert_eq!(parsed.guid, GUID);
        assert!(parsed.file_errors.is_empty());

        let types: Vec<_> = parsed.records.iter().map(|r| r.record_type).collect();
        assert_eq!(
            types,
            vec![
                record_type::OBJECT,
                record_type::COMMON,
                record_type::CSP_PRIMARY,
                record_type::CSP_CAPABILITY
            ]
        );
        for record in &parsed.records {
            assert_eq!(record.get(MODULE_ID).and_then(|v| v.as_str()), Some(GUID));
        }

        let object = &parsed.records[0];
        assert_eq!(
            object.get(PATH).and_then(|v| v.as_str()),
            Some(&*bundle.to_string_lossy())
        );
        assert_eq!(
            parsed.records[1].get("ServiceMask"),
            Some(&AttributeValue::Uint32(0x2 | 0x4))
        );
        assert_eq!(
            parsed.records[1].get("DynamicFlag"),
            Some(&AttributeValue::Uint32(0))
        );
        assert_eq!(
            parsed.records[2].get("UseeTags"),
            Some(&AttributeValue::MultiUint32(vec![0, 1]))
        );
    }

    #[test]
    fn test_bad_file_is_skipped_not_fatal() {
        let temp_dir = TempDir::new().unwrap();
        let bundle = temp_dir.path().join("Broken.bundle");
        write_descriptor(
            &bundle,
            "a.mdsinfo",
            &format!(r#"{{"MdsFileType": "CSSM", "ModuleID": "{}"}}"#, GUID),
        );
        write_descriptor(&bundle, "b.mdsinfo", "{ not json");
        write_descriptor(
            &bundle,
            "c.mdsinfo",
            r#"{"MdsFileType": "PluginSpecific", "MdsRecordType": "MDS_NO_SUCH_RECORDTYPE"}"#,
        );
        write_descriptor(&bundle, "d.mdsinfo", r#"{"MdsFileType": "Mystery"}"#);

        let parsed = BundleParser::new(&bundle, true).parse_bundle().unwrap();
        assert_eq!(parsed.file_errors.len(), 3);
        assert_eq!(parsed.records.len(), 2);
        let path = parsed.records[0].get(PATH).and_then(|v| v.as_str()).unwrap();
        assert!(path.starts_with('*'));
    }

    #[test]
    fn test_plugin_specific_bundle_still_gets_object_row() {
        let temp_dir = TempDir::new().unwrap();
        let bundle = temp_dir.path().join("Policy.bundle");
        write_descriptor(
            &bundle,
            "tp.mdsinfo",
            &format!(
                r#"{{
                    "MdsFileType": "PluginSpecific",
                    "MdsRecordType": "MDS_CDSADIR_TP_PRIMARY_RECORDTYPE",
                    "ModuleID": "{}",
                    "SSID": 1
                }}"#,
                GUID
            ),
        );

        let parsed = BundleParser::new(&bundle, false).parse_bundle().unwrap();
        let types: Vec<_> = parsed.records.iter().map(|r| r.record_type).collect();
        assert_eq!(types, vec![record_type::TP_PRIMARY, record_type::OBJECT]);

        let object = &parsed.records[1];
        assert_eq!(object.get(MODULE_ID).and_then(|v| v.as_str()), Some(GUID));
        assert_eq!(
            object.get(PATH).and_then(|v| v.as_str()),
            Some(&*bundle.to_string_lossy())
        );
    }

    #[test]
    fn test_defaults_override_file_values() {
        let temp_dir = TempDir::new().unwrap();
        let bundle = temp_dir.path().join("Token.bundle");
        write_descriptor(
            &bundle,
            "sc.mdsinfo",
            r#"{
                "MdsFileType": "PluginSpecific",
                "MdsRecordType": "MDS_CDSADIR_CSP_SC_INFO_RECORDTYPE",
                "ModuleID": "guid-from-file",
                "SSID": 9,
                "ScDesc": "from file",
                "ScVendor": "Vendor"
            }"#,
        );

        let parsed = BundleParser::new(&bundle, false)
            .defaults(MdsInstallDefaults {
                guid: Some(GUID.to_string()),
                ssid: Some(3),
                serial_number: Some("SN-1".to_string()),
                description: Some("Reader 1".to_string()),
            })
            .parse_bundle()
            .unwrap();

        assert_eq!(parsed.guid, GUID);
        let record = &parsed.records[0];
        assert_eq!(record.get(SSID), Some(&AttributeValue::Uint32(3)));
        assert_eq!(record.get("ScDesc").and_then(|v| v.as_str()), Some("Reader 1"));
        assert_eq!(record.get("ScSerialNumber").and_then(|v| v.as_str()), Some("SN-1"));
        assert_eq!(record.get("ScVendor").and_then(|v| v.as_str()), Some("Vendor"));
    }

    #[test]
    fn test_normalize_guid_forms() {
        assert_eq!(normalize_guid(&format!("{{{}}}", GUID.to_uppercase())), GUID);
        assert_eq!(normalize_guid(&GUID.replace('-', "")), GUID);
        assert_eq!(normalize_guid(" not-a-uuid "), "not-a-uuid");
    }

    #[test]
    fn test_write_bundle_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let bundle = temp_dir.path().join("Simple.bundle");
        write_descriptor(
            &bundle,
            "a.mdsinfo",
            &format!(
                r#"{{"MdsFileType": "CSSM", "ModuleID": "{}", "Vendor": "Apple"}}"#,
                GUID
            ),
        );
        let mut store = DirectoryStore::create(
            &temp_dir.path().join("mdsObject.db"),
            &temp_dir.path().join("mdsDirectory.db"),
            std::time::Duration::from_secs(1),
        )
        .unwrap();

        let outcome = parse_bundle(&bundle, false, &mut store).unwrap();
        assert_eq!(outcome.records_written, 2);
        assert!(store.contains_path(&bundle.to_string_lossy()).unwrap());
    }
}
