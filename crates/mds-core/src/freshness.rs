//! Scan timestamps and database-pair staleness checks.

use crate::platform::{self, ScopeLayout};
use chrono::{DateTime, Utc};
use std::path::Path;
use std::sync::Mutex;
use std::time::{Duration, SystemTime};
use tracing::debug;

/// Last completed rescan of one scope.
#[derive(Debug)]
pub struct FreshnessTracker {
    last_scan: Mutex<Option<DateTime<Utc>>>,
    interval: Duration,
}

impl FreshnessTracker {
    pub fn new(interval: Duration) -> Self {
        Self {
            last_scan: Mutex::new(None),
            interval,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn last_scan(&self) -> Option<DateTime<Utc>> {
        *self
            .last_scan
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// True when no scan has completed yet or the interval has elapsed.
    pub fn scan_due(&self) -> bool {
        if self.interval.is_zero() {
            return true;
        }
        match self.last_scan() {
            None => true,
            Some(last) => {
                let elapsed = Utc::now().signed_duration_since(last);
                // A clock step backwards makes the scan due again.
                elapsed
                    .to_std()
                    .map_or(true, |elapsed| elapsed > self.interval)
            }
        }
    }

    /// Record a completed scan.
    pub fn mark_scanned(&self) -> DateTime<Utc> {
        let now = Utc::now();
        *self
            .last_scan
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(now);
        now
    }

    /// Forget the last scan so the next check forces one.
    pub fn invalidate(&self) {
        *self
            .last_scan
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = None;
    }
}

/// Whether the user pair must be rebuilt from the system pair.
///
/// True when either user file is unusable, or when the system Service
/// Directory is newer than the user copy.
pub fn needs_rebuild(system: &ScopeLayout, user: &ScopeLayout, owner: u32) -> bool {
    if !is_sound(&user.object_db, Some(owner)) || !is_sound(&user.directory_db, Some(owner)) {
        debug!("User pair in {} is missing or malformed", user.dir.display());
        return true;
    }

    match (mtime(&system.directory_db), mtime(&user.directory_db)) {
        (Some(system_mtime), Some(user_mtime)) => system_mtime > user_mtime,
        // Without a system pair there is nothing newer to copy.
        (None, _) => false,
        (Some(_), None) => true,
    }
}

/// Whether both files of a pair are present and usable.
pub fn pair_is_sound(layout: &ScopeLayout, owner: Option<u32>) -> bool {
    is_sound(&layout.object_db, owner) && is_sound(&layout.directory_db, owner)
}

/// The later of the two database files' modification times.
pub fn pair_mtime(layout: &ScopeLayout) -> Option<SystemTime> {
    match (mtime(&layout.object_db), mtime(&layout.directory_db)) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    }
}

pub fn mtime(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

fn is_sound(path: &Path, owner: Option<u32>) -> bool {
    let metadata = match std::fs::metadata(path) {
        Ok(metadata) => metadata,
        Err(_) => return false,
    };
    if !metadata.is_file() || metadata.len() == 0 {
        return false;
    }
    owner.map_or(true, |uid| platform::is_owned_by(path, uid))
}
