//! Physical layout of the directory databases.
//!
//! ```text
//! <root>/                      shared, sticky
//! <root>/mds.install.lock
//! <root>/system/               mdsObject.db, mdsDirectory.db, mds.lock
//! <root>/<uid>/                owner-only mirror of the system pair
//! ```

use crate::config::DirectoryConfig;
use std::path::{Path, PathBuf};

/// Where one scope keeps its lock file and database pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeLayout {
    pub dir: PathBuf,
    pub lock_file: PathBuf,
    pub object_db: PathBuf,
    pub directory_db: PathBuf,
}

impl ScopeLayout {
    fn in_dir(dir: PathBuf) -> Self {
        Self {
            lock_file: dir.join(DirectoryConfig::LOCK_FILE_NAME),
            object_db: dir.join(DirectoryConfig::OBJECT_DB_FILE_NAME),
            directory_db: dir.join(DirectoryConfig::DIRECTORY_DB_FILE_NAME),
            dir,
        }
    }
}

/// Layout of the canonical system scope.
pub fn system_scope(root: &Path) -> ScopeLayout {
    ScopeLayout::in_dir(root.join(DirectoryConfig::SYSTEM_DB_DIR_NAME))
}

/// Layout of the per-user scope for `uid`.
pub fn user_scope(root: &Path, uid: u32) -> ScopeLayout {
    ScopeLayout::in_dir(root.join(uid.to_string()))
}

/// Lock serializing whole-system installs.
pub fn install_lock_path(root: &Path) -> PathBuf {
    root.join(DirectoryConfig::INSTALL_LOCK_FILE_NAME)
}
