//! Directory and file modes for the scope layout.
//!
//! On non-Unix platforms modes and ownership are not enforced.

use crate::error::{MdsError, Result};
use std::path::Path;
use tracing::debug;

/// Set the permission bits of `path`.
///
/// # Platform Behavior
/// - **Linux/macOS**: `chmod(path, mode)`, independent of the umask
/// - **Other**: No-op
pub fn set_mode(path: &Path, mode: u32) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
            .map_err(|e| MdsError::io_with_path(e, path))?;
        debug!("Set mode {:o} on {}", mode, path.display());
    }

    #[cfg(not(unix))]
    {
        let _ = mode;
        debug!("Skipping mode change on {}", path.display());
    }

    Ok(())
}

/// Make sure `path` is a directory with exactly `mode`.
///
/// Creates it when absent. An existing non-directory is an integrity error;
/// callers decide whether to self-heal or fall back.
pub fn ensure_dir(path: &Path, mode: u32) -> Result<()> {
    match std::fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => {
            if current_mode(&meta) != Some(mode) {
                set_mode(path, mode)?;
            }
            Ok(())
        }
        Ok(_) => Err(MdsError::Integrity {
            path: path.to_path_buf(),
            message: "expected a directory".to_string(),
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            std::fs::create_dir_all(path).map_err(|e| MdsError::io_with_path(e, path))?;
            set_mode(path, mode)?;
            debug!("Created directory {}", path.display());
            Ok(())
        }
        Err(e) => Err(MdsError::io_with_path(e, path)),
    }
}

/// Check whether `path` exists and is owned by `uid`.
pub fn is_owned_by(path: &Path, uid: u32) -> bool {
    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        std::fs::symlink_metadata(path)
            .map(|meta| meta.uid() == uid)
            .unwrap_or(false)
    }

    #[cfg(not(unix))]
    {
        let _ = uid;
        path.exists()
    }
}

fn current_mode(meta: &std::fs::Metadata) -> Option<u32> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        Some(meta.permissions().mode() & 0o7777)
    }

    #[cfg(not(unix))]
    {
        let _ = meta;
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use tempfile::TempDir;

    #[test]
    fn test_ensure_dir_creates_with_mode() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("root");

        ensure_dir(&dir, 0o1777).unwrap();
        assert!(dir.is_dir());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&dir).unwrap().permissions().mode();
            assert_eq!(mode & 0o7777, 0o1777);
        }
    }

    #[test]
    fn test_ensure_dir_repairs_mode() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("user");
        std::fs::create_dir(&dir).unwrap();

        ensure_dir(&dir, 0o700).unwrap();

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&dir).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o700);
        }
    }

    #[test]
    fn test_ensure_dir_rejects_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("not-a-dir");
        File::create(&path).unwrap();

        assert!(matches!(
            ensure_dir(&path, 0o755),
            Err(MdsError::Integrity { .. })
        ));
    }

    #[test]
    fn test_is_owned_by_current_user() {
        let temp_dir = TempDir::new().unwrap();
        let uid = crate::platform::effective_uid();
        assert!(is_owned_by(temp_dir.path(), uid));
        assert!(!is_owned_by(&temp_dir.path().join("missing"), uid));
    }
}
