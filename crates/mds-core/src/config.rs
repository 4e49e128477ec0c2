//! Centralized configuration for the Module Directory Service.
//!
//! Fixed names and modes that other collaborators depend on live on
//! [`DirectoryConfig`]. Everything a deployment or a test may want to move
//! lives on [`MdsConfig`].

use crate::error::{MdsError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// On-disk names, modes and timing defaults.
pub struct DirectoryConfig;

impl DirectoryConfig {
    // Logical database names
    pub const OBJECT_DIRECTORY_NAME: &'static str = "MDS Object Directory";
    pub const CDSA_DIRECTORY_NAME: &'static str = "MDS CDSA Directory";

    // Physical layout
    pub const SYSTEM_ROOT: &'static str = "/var/db/mds";
    pub const SYSTEM_DB_DIR_NAME: &'static str = "system";
    pub const OBJECT_DB_FILE_NAME: &'static str = "mdsObject.db";
    pub const DIRECTORY_DB_FILE_NAME: &'static str = "mdsDirectory.db";
    pub const LOCK_FILE_NAME: &'static str = "mds.lock";
    pub const INSTALL_LOCK_FILE_NAME: &'static str = "mds.install.lock";

    // Permissions
    pub const SYSTEM_ROOT_MODE: u32 = 0o1777;
    pub const SYSTEM_DB_DIR_MODE: u32 = 0o755;
    pub const SYSTEM_DB_FILE_MODE: u32 = 0o644;
    pub const USER_DB_DIR_MODE: u32 = 0o700;
    pub const USER_DB_FILE_MODE: u32 = 0o600;

    // Bundle conventions
    pub const BUNDLE_EXTENSION: &'static str = "bundle";
    pub const DESCRIPTOR_EXTENSION: &'static str = "mdsinfo";
    pub const DESCRIPTOR_SUBDIR: &'static str = "MDS";
    pub const RESERVED_FILE_PREFIX: &'static str = "._";
    pub const BUILTIN_PATH_MARKER: char = '*';
    pub const INDIRECT_PREFIX: &'static str = "file:";

    // Canonical plugin locations
    pub const SYSTEM_BUNDLE_DIR: &'static str = "/System/Library/Security";
    pub const FRAMEWORK_BUNDLE: &'static str = "/System/Library/Frameworks/Security.framework";
    pub const USER_BUNDLE_SUBDIR: &'static str = "Library/Security";

    // Timing
    pub const SCAN_INTERVAL: Duration = Duration::from_secs(10);
    pub const LOCK_TIMEOUT: Duration = Duration::from_secs(15);
    pub const LOCK_BACKOFF_START: Duration = Duration::from_millis(10);
    pub const LOCK_BACKOFF_MAX: Duration = Duration::from_millis(100);
}

/// Runtime configuration, injected into [`crate::MdsContext`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct MdsConfig {
    /// Shared root holding the system scope and every user scope.
    pub system_root: PathBuf,
    /// Bundle describing the built-in modules; rows from it are never swept.
    pub framework_bundle: Option<PathBuf>,
    /// Directories scanned for `*.bundle` plugins in every scope.
    pub system_bundle_dirs: Vec<PathBuf>,
    /// Additional directories scanned only for the per-user scope.
    pub user_bundle_dirs: Vec<PathBuf>,
    pub scan_interval_secs: u64,
    pub lock_timeout_ms: u64,
    /// Whether this process may write the system scope.
    pub privileged: bool,
    /// Effective uid naming the per-user scope directory.
    pub uid: u32,
}

impl Default for MdsConfig {
    fn default() -> Self {
        let uid = crate::platform::effective_uid();
        let user_bundle_dirs = dirs::home_dir()
            .map(|home| vec![home.join(DirectoryConfig::USER_BUNDLE_SUBDIR)])
            .unwrap_or_default();

        Self {
            system_root: PathBuf::from(DirectoryConfig::SYSTEM_ROOT),
            framework_bundle: Some(PathBuf::from(DirectoryConfig::FRAMEWORK_BUNDLE)),
            system_bundle_dirs: vec![PathBuf::from(DirectoryConfig::SYSTEM_BUNDLE_DIR)],
            user_bundle_dirs,
            scan_interval_secs: DirectoryConfig::SCAN_INTERVAL.as_secs(),
            lock_timeout_ms: DirectoryConfig::LOCK_TIMEOUT.as_millis() as u64,
            privileged: uid == 0,
            uid,
        }
    }
}

impl MdsConfig {
    /// Configuration rooted at `system_root` with no plugin directories.
    ///
    /// Useful for tests and for tooling that stages its own bundles.
    pub fn rooted_at(system_root: impl Into<PathBuf>) -> Self {
        Self {
            system_root: system_root.into(),
            framework_bundle: None,
            system_bundle_dirs: Vec::new(),
            user_bundle_dirs: Vec::new(),
            ..Self::default()
        }
    }

    /// Load a JSON configuration file; missing keys take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| MdsError::io_with_path(e, path))?;
        let config: MdsConfig = serde_json::from_str(&content).map_err(|e| MdsError::Json {
            message: format!("Failed to parse config {}: {}", path.display(), e),
            source: Some(e),
        })?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if !self.system_root.is_absolute() {
            return Err(MdsError::Config {
                message: format!(
                    "systemRoot must be absolute: {}",
                    self.system_root.display()
                ),
            });
        }
        Ok(())
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}
