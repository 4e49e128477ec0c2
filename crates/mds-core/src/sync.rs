//! Obsolete-entry sweep and bundle rescan for one database pair.

use crate::config::DirectoryConfig;
use crate::descriptor::{self, BundleOutcome};
use crate::error::{MdsError, Result};
use crate::freshness;
use crate::platform::ScopeLayout;
use crate::store::{DirectoryStore, ModuleEntry};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Whether a cached module still matches its bundle on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Current,
    Obsolete,
}

/// A bundle the rescan could not register.
#[derive(Debug)]
pub struct BundleError {
    pub bundle: PathBuf,
    pub error: MdsError,
}

/// What one rescan did.
#[derive(Debug)]
pub struct ScanReport {
    pub removed: Vec<String>,
    pub parsed: Vec<BundleOutcome>,
    pub errors: Vec<BundleError>,
    pub finished_at: DateTime<Utc>,
}

impl ScanReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty() && self.parsed.iter().all(|b| b.file_errors.is_empty())
    }
}

/// Classify a stored Object path against the pair's modification time.
///
/// Built-in paths are never obsolete. Otherwise a path is obsolete when it
/// can no longer be stat'ed or was modified after the pair was.
pub fn classify(path: &str, pair_mtime: Option<SystemTime>) -> Classification {
    if path.starts_with(DirectoryConfig::BUILTIN_PATH_MARKER) {
        return Classification::Current;
    }
    let bundle_mtime = match std::fs::metadata(path).and_then(|m| m.modified()) {
        Ok(mtime) => mtime,
        Err(_) => return Classification::Obsolete,
    };
    match pair_mtime {
        Some(db_mtime) if bundle_mtime > db_mtime => Classification::Obsolete,
        _ => Classification::Current,
    }
}

/// Bundles directly inside `dir`, sorted by path.
pub fn find_bundles(dir: &Path) -> Vec<PathBuf> {
    let mut bundles: Vec<PathBuf> = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_dir())
        .filter(|entry| {
            entry
                .path()
                .extension()
                .map_or(false, |ext| ext == DirectoryConfig::BUNDLE_EXTENSION)
        })
        .map(|entry| entry.into_path())
        .collect();
    bundles.sort();
    bundles
}

/// Keeps one pair's rows in step with the bundles on disk.
pub struct RecordSynchronizer<'a> {
    store: &'a mut DirectoryStore,
    layout: &'a ScopeLayout,
}

impl<'a> RecordSynchronizer<'a> {
    pub fn new(store: &'a mut DirectoryStore, layout: &'a ScopeLayout) -> Self {
        Self { store, layout }
    }

    /// (GUID, Path) of every cached module.
    pub fn scan(&self) -> Result<Vec<ModuleEntry>> {
        self.store.modules()
    }

    /// Delete every row of `guid` from both databases.
    pub fn remove_all(&self, guid: &str) -> Result<usize> {
        self.store.remove_module(guid)
    }

    /// Remove every obsolete module, returning their GUIDs.
    pub fn sweep(&mut self) -> Result<Vec<String>> {
        // Taken before any write of this pass touches the files.
        let pair_mtime = freshness::pair_mtime(self.layout);
        let mut removed = Vec::new();

        for entry in self.scan()? {
            if classify(&entry.path, pair_mtime) == Classification::Current {
                continue;
            }
            if removed.contains(&entry.guid) {
                continue;
            }
            let rows = self.remove_all(&entry.guid)?;
            info!(
                "Removed obsolete module {} ({}), {} rows",
                entry.guid, entry.path, rows
            );
            removed.push(entry.guid);
        }
        Ok(removed)
    }

    /// Sweep obsolete modules, then register bundles not yet cached.
    ///
    /// The sweep completes before any bundle is parsed.
    pub fn rescan(
        &mut self,
        bundle_dirs: &[PathBuf],
        framework_bundle: Option<&Path>,
    ) -> Result<ScanReport> {
        let removed = self.sweep()?;
        let mut parsed = Vec::new();
        let mut errors = Vec::new();

        let mut candidates: Vec<(PathBuf, bool)> = Vec::new();
        if let Some(framework) = framework_bundle.filter(|path| path.is_dir()) {
            candidates.push((framework.to_path_buf(), true));
        }
        for dir in bundle_dirs {
            candidates.extend(find_bundles(dir).into_iter().map(|bundle| (bundle, false)));
        }

        for (bundle, builtin) in candidates {
            let mut stored = bundle.to_string_lossy().to_string();
            if builtin {
                stored.insert(0, DirectoryConfig::BUILTIN_PATH_MARKER);
            }
            if self.store.contains_path(&stored)? {
                continue;
            }

            match descriptor::parse_bundle(&bundle, builtin, self.store) {
                Ok(outcome) => {
                    debug!(
                        "Registered {} from {}",
                        outcome.guid,
                        outcome.bundle.display()
                    );
                    parsed.push(outcome);
                }
                Err(error) => {
                    warn!("Failed to register bundle {}: {}", bundle.display(), error);
                    errors.push(BundleError { bundle, error });
                }
            }
        }

        let report = ScanReport {
            removed,
            parsed,
            errors,
            finished_at: Utc::now(),
        };
        info!(
            "Rescan of {}: {} removed, {} registered, {} failed",
            self.layout.dir.display(),
            report.removed.len(),
            report.parsed.len(),
            report.errors.len()
        );
        Ok(report)
    }
}
