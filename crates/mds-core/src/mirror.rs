//! Creation and copying of database pairs.
//!
//! Pairs are committed with:
//! 1. Build or copy into temp files in the destination directory
//! 2. fsync the temp files
//! 3. Rename the Object Directory into place, then the Service Directory
//!
//! The Service Directory is renamed last so a reader that sees it also sees
//! a matching Object Directory. Any failure removes what was renamed so the
//! pair is either whole or absent.

use crate::config::DirectoryConfig;
use crate::error::{MdsError, Result};
use crate::freshness;
use crate::lock::ScopeLock;
use crate::platform::{self, ScopeLayout};
use crate::store::DirectoryStore;
use std::fs::File;
use std::io;
use std::path::Path;
use std::time::Duration;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

/// How a scope's pair was made usable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MirrorOutcome {
    /// The pair was already present and current.
    Fresh,
    /// The pair was (re)built.
    Rebuilt,
    /// The user copy failed; use the system pair read-only.
    SystemFallback,
}

/// Remove both files of a pair. Missing files are not an error.
pub fn remove_pair(layout: &ScopeLayout) -> Result<()> {
    for path in [&layout.directory_db, &layout.object_db] {
        match std::fs::remove_file(path) {
            Ok(()) => debug!("Removed {}", path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(MdsError::io_with_path(e, path)),
        }
    }
    Ok(())
}

/// Create the system pair from the schema registry if it is not present.
///
/// The caller holds the system scope lock. Returns whether a pair was
/// created.
pub fn ensure_system_pair(layout: &ScopeLayout, busy_timeout: Duration) -> Result<bool> {
    if freshness::pair_is_sound(layout, None) {
        return Ok(false);
    }

    platform::ensure_dir(&layout.dir, DirectoryConfig::SYSTEM_DB_DIR_MODE)?;
    // A half-present pair is not trusted.
    remove_pair(layout)?;

    let object_tmp = temp_in(&layout.dir)?;
    let directory_tmp = temp_in(&layout.dir)?;
    {
        let _store = DirectoryStore::create(object_tmp.path(), directory_tmp.path(), busy_timeout)?;
    }
    for tmp in [&object_tmp, &directory_tmp] {
        tmp.as_file()
            .sync_all()
            .map_err(|e| MdsError::io_with_path(e, tmp.path()))?;
        platform::set_mode(tmp.path(), DirectoryConfig::SYSTEM_DB_FILE_MODE)?;
    }

    commit_pair(object_tmp, directory_tmp, layout)?;
    info!("Created system directory pair in {}", layout.dir.display());
    Ok(true)
}

/// Bring the user pair up to date with the system pair.
///
/// The caller holds the user scope lock. A failed copy is logged and
/// reported as [`MirrorOutcome::SystemFallback`] rather than failing the open.
pub fn ensure_user_pair(
    system: &ScopeLayout,
    user: &ScopeLayout,
    uid: u32,
    lock_timeout: Duration,
) -> Result<MirrorOutcome> {
    if !freshness::pair_is_sound(system, None) {
        return Err(MdsError::NotInstalled(system.dir.clone()));
    }
    if !freshness::needs_rebuild(system, user, uid) {
        return Ok(MirrorOutcome::Fresh);
    }

    match copy_pair(system, user, lock_timeout) {
        Ok(()) => {
            info!("Copied system directory pair to {}", user.dir.display());
            Ok(MirrorOutcome::Rebuilt)
        }
        Err(e) => {
            warn!(
                "Failed to copy directory pair to {}, using system pair read-only: {}",
                user.dir.display(),
                e
            );
            Ok(MirrorOutcome::SystemFallback)
        }
    }
}

fn copy_pair(system: &ScopeLayout, user: &ScopeLayout, lock_timeout: Duration) -> Result<()> {
    platform::ensure_dir(&user.dir, DirectoryConfig::USER_DB_DIR_MODE)?;

    // Readers of the system pair exclude a concurrent system writer.
    let _shared = ScopeLock::acquire_shared(&system.lock_file, lock_timeout)?;

    let object_tmp = copy_to_temp(&system.object_db, &user.dir)?;
    let directory_tmp = copy_to_temp(&system.directory_db, &user.dir)?;
    commit_pair(object_tmp, directory_tmp, user)
}

fn copy_to_temp(source: &Path, dir: &Path) -> Result<NamedTempFile> {
    let mut tmp = temp_in(dir)?;
    let mut input = File::open(source).map_err(|e| MdsError::io_with_path(e, source))?;
    io::copy(&mut input, tmp.as_file_mut()).map_err(|e| MdsError::Io {
        message: format!("Failed to copy {}: {}", source.display(), e),
        path: Some(source.to_path_buf()),
        source: Some(e),
    })?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| MdsError::io_with_path(e, tmp.path()))?;
    platform::set_mode(tmp.path(), DirectoryConfig::USER_DB_FILE_MODE)?;
    Ok(tmp)
}

fn temp_in(dir: &Path) -> Result<NamedTempFile> {
    NamedTempFile::new_in(dir).map_err(|e| MdsError::Io {
        message: format!("Failed to create temp file in {}: {}", dir.display(), e),
        path: Some(dir.to_path_buf()),
        source: Some(e),
    })
}

fn commit_pair(
    object_tmp: NamedTempFile,
    directory_tmp: NamedTempFile,
    layout: &ScopeLayout,
) -> Result<()> {
    object_tmp
        .persist(&layout.object_db)
        .map_err(|e| MdsError::io_with_path(e.error, &layout.object_db))?;

    if let Err(e) = directory_tmp.persist(&layout.directory_db) {
        let err = MdsError::io_with_path(e.error, &layout.directory_db);
        if let Err(cleanup) = remove_pair(layout) {
            warn!(
                "Failed to clean up half-written pair in {}: {}",
                layout.dir.display(),
                cleanup
            );
        }
        return Err(err);
    }

    debug!("Committed directory pair in {}", layout.dir.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{system_scope, user_scope};
    use crate::schema::{record_type, AttributeValue, Record};
    use tempfile::TempDir;

    const TIMEOUT: Duration = Duration::from_secs(2);

    #[test]
    fn test_ensure_system_pair_is_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let layout = system_scope(temp_dir.path());

        assert!(ensure_system_pair(&layout, TIMEOUT).unwrap());
        assert!(layout.object_db.is_file());
        assert!(layout.directory_db.is_file());

        let before = freshness::pair_mtime(&layout);
        assert!(!ensure_system_pair(&layout, TIMEOUT).unwrap());
        assert_eq!(freshness::pair_mtime(&layout), before);
    }

    #[test]
    fn test_half_present_pair_is_rebuilt() {
        let temp_dir = TempDir::new().unwrap();
        let layout = system_scope(temp_dir.path());
        std::fs::create_dir_all(&layout.dir).unwrap();
        std::fs::write(&layout.object_db, b"stale").unwrap();

        assert!(ensure_system_pair(&layout, TIMEOUT).unwrap());
        DirectoryStore::open(&layout.object_db, &layout.directory_db, true, TIMEOUT).unwrap();
    }

    #[test]
    fn test_no_temp_files_left_behind() {
        let temp_dir = TempDir::new().unwrap();
        let layout = system_scope(temp_dir.path());
        ensure_system_pair(&layout, TIMEOUT).unwrap();

        let mut names: Vec<_> = std::fs::read_dir(&layout.dir)
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        assert_eq!(names, vec!["mdsDirectory.db", "mdsObject.db"]);
    }

    #[test]
    fn test_user_pair_copies_system_rows() {
        let temp_dir = TempDir::new().unwrap();
        let uid = platform::effective_uid();
        let system = system_scope(temp_dir.path());
        let user = user_scope(temp_dir.path(), uid);
        ensure_system_pair(&system, TIMEOUT).unwrap();
        {
            let store =
                DirectoryStore::open(&system.object_db, &system.directory_db, false, TIMEOUT)
                    .unwrap();
            store
                .insert(&Record {
                    record_type: record_type::OBJECT,
                    attributes: vec![
                        ("ModuleID", AttributeValue::from("guid-a")),
                        ("Path", AttributeValue::from("/b/A.bundle")),
                    ],
                })
                .unwrap();
        }

        let outcome = ensure_user_pair(&system, &user, uid, TIMEOUT).unwrap();
        assert_eq!(outcome, MirrorOutcome::Rebuilt);

        let copy = DirectoryStore::open(&user.object_db, &user.directory_db, true, TIMEOUT).unwrap();
        let modules = copy.modules().unwrap();
        assert_eq!(modules.len(), 1);
        assert_eq!(modules[0].guid, "guid-a");

        assert_eq!(
            ensure_user_pair(&system, &user, uid, TIMEOUT).unwrap(),
            MirrorOutcome::Fresh
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_modes_follow_scope() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new().unwrap();
        let uid = platform::effective_uid();
        let system = system_scope(temp_dir.path());
        let user = user_scope(temp_dir.path(), uid);
        ensure_system_pair(&system, TIMEOUT).unwrap();
        ensure_user_pair(&system, &user, uid, TIMEOUT).unwrap();

        let mode = |p: &Path| std::fs::metadata(p).unwrap().permissions().mode() & 0o7777;
        assert_eq!(mode(&system.dir), 0o755);
        assert_eq!(mode(&system.directory_db), 0o644);
        assert_eq!(mode(&user.dir), 0o700);
        assert_eq!(mode(&user.object_db), 0o600);
        assert_eq!(mode(&user.directory_db), 0o600);
    }

    #[test]
    fn test_user_pair_without_system_pair_is_not_installed() {
        let temp_dir = TempDir::new().unwrap();
        let uid = platform::effective_uid();
        let result = ensure_user_pair(
            &system_scope(temp_dir.path()),
            &user_scope(temp_dir.path(), uid),
            uid,
            TIMEOUT,
        );
        assert!(matches!(result, Err(MdsError::NotInstalled(_))));
    }
}
