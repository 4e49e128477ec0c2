//! Public session API.
//!
//! A [`MdsSession`] maps the two logical database names onto the physical
//! pair of its scope. Privileged sessions work on the system pair directly;
//! everyone else works on a private per-user copy that is rebuilt whenever
//! the system pair moves ahead of it. Every open and every first query
//! runs a freshness-checked rescan, at most once per scan interval.

use crate::config::{DirectoryConfig, MdsConfig};
use crate::descriptor::{self, BundleOutcome, BundleParser, MdsInstallDefaults};
use crate::error::{MdsError, Result};
use crate::freshness::{self, FreshnessTracker};
use crate::lock::ScopeLock;
use crate::mirror::{self, MirrorOutcome};
use crate::platform::{self, ScopeLayout};
use crate::schema::{self, AttributeValue, DirectoryKind, Record};
use crate::store::{CursorState, DirectoryStore, Query, RecordId};
use crate::sync::{RecordSynchronizer, ScanReport};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, TryLockError};
use tracing::{debug, info, warn};

/// Which pair a session reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    System,
    User,
}

/// Process-wide state shared by sessions.
#[derive(Debug)]
pub struct MdsContext {
    config: MdsConfig,
    system_freshness: FreshnessTracker,
    user_freshness: FreshnessTracker,
    scan_guard: Mutex<()>,
}

impl MdsContext {
    pub fn new(config: MdsConfig) -> Self {
        let interval = config.scan_interval();
        Self {
            config,
            system_freshness: FreshnessTracker::new(interval),
            user_freshness: FreshnessTracker::new(interval),
            scan_guard: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &MdsConfig {
        &self.config
    }

    pub fn system_layout(&self) -> ScopeLayout {
        platform::system_scope(&self.config.system_root)
    }

    pub fn user_layout(&self) -> ScopeLayout {
        platform::user_scope(&self.config.system_root, self.config.uid)
    }

    /// Finish time of the last completed rescan of `scope`.
    pub fn last_scan(&self, scope: Scope) -> Option<DateTime<Utc>> {
        self.tracker(scope).last_scan()
    }

    fn tracker(&self, scope: Scope) -> &FreshnessTracker {
        match scope {
            Scope::System => &self.system_freshness,
            Scope::User => &self.user_freshness,
        }
    }

    fn layout(&self, scope: Scope) -> ScopeLayout {
        match scope {
            Scope::System => self.system_layout(),
            Scope::User => self.user_layout(),
        }
    }

    fn bundle_dirs(&self, scope: Scope) -> Vec<PathBuf> {
        let mut dirs = self.config.system_bundle_dirs.clone();
        if scope == Scope::User {
            dirs.extend(self.config.user_bundle_dirs.iter().cloned());
        }
        dirs
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallOutcome {
    Created,
    AlreadyPresent,
}

/// Handle to one open logical database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DbHandle(u32);

/// A record returned by a query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoundRecord {
    pub id: RecordId,
    pub record: Record,
}

/// An in-progress query on one handle.
#[derive(Debug)]
pub struct Cursor {
    handle: DbHandle,
    state: CursorState,
}

impl Cursor {
    pub fn handle(&self) -> DbHandle {
        self.handle
    }
}

/// Where a scope ended up after its freshness check.
struct PreparedScope {
    scope: Scope,
    layout: ScopeLayout,
    writable: bool,
    /// The pair's files were replaced, so older connections are stale.
    replaced: bool,
}

struct OpenDatabase {
    kind: DirectoryKind,
    scope: Scope,
    layout: ScopeLayout,
    writable: bool,
    store: DirectoryStore,
}

/// One client's view of the directory.
pub struct MdsSession {
    context: Arc<MdsContext>,
    databases: HashMap<DbHandle, OpenDatabase>,
    next_handle: u32,
}

impl MdsSession {
    pub fn new(context: Arc<MdsContext>) -> Self {
        Self {
            context,
            databases: HashMap::new(),
            next_handle: 1,
        }
    }

    pub fn context(&self) -> &Arc<MdsContext> {
        &self.context
    }

    fn config(&self) -> &MdsConfig {
        &self.context.config
    }

    pub fn is_privileged(&self) -> bool {
        self.config().privileged
    }

    fn home_scope(&self) -> Scope {
        if self.is_privileged() {
            Scope::System
        } else {
            Scope::User
        }
    }

    fn require_privilege(&self, operation: &str) -> Result<()> {
        if !self.is_privileged() {
            return Err(MdsError::AccessDenied(format!(
                "{} requires a privileged session",
                operation
            )));
        }
        Ok(())
    }

    fn lock_scope(&self, scope: Scope, layout: &ScopeLayout) -> Result<ScopeLock> {
        let mode = match scope {
            Scope::System => DirectoryConfig::SYSTEM_DB_FILE_MODE,
            Scope::User => DirectoryConfig::USER_DB_FILE_MODE,
        };
        ScopeLock::acquire(&layout.lock_file, mode, self.config().lock_timeout())
    }

    fn open_store(&self, layout: &ScopeLayout, writable: bool) -> Result<DirectoryStore> {
        DirectoryStore::open(
            &layout.object_db,
            &layout.directory_db,
            !writable,
            self.config().lock_timeout(),
        )
    }

    /// Create the system pair and populate it, if it is not already there.
    ///
    /// Concurrent installs serialize on the install lock; only the first
    /// creates anything.
    pub fn install(&self) -> Result<InstallOutcome> {
        self.require_privilege("install")?;
        let config = self.config();
        let timeout = config.lock_timeout();

        platform::ensure_dir(&config.system_root, DirectoryConfig::SYSTEM_ROOT_MODE)?;
        let _install_lock = ScopeLock::acquire(
            &platform::install_lock_path(&config.system_root),
            DirectoryConfig::SYSTEM_DB_FILE_MODE,
            timeout,
        )?;

        let system = self.context.system_layout();
        platform::ensure_dir(&system.dir, DirectoryConfig::SYSTEM_DB_DIR_MODE)?;
        let _system_lock = self.lock_scope(Scope::System, &system)?;

        if !mirror::ensure_system_pair(&system, timeout)? {
            debug!("System directory already present in {}", system.dir.display());
            return Ok(InstallOutcome::AlreadyPresent);
        }

        let populated = self.open_store(&system, true).and_then(|mut store| {
            RecordSynchronizer::new(&mut store, &system).rescan(
                &self.context.bundle_dirs(Scope::System),
                config.framework_bundle.as_deref(),
            )
        });
        match populated {
            Ok(report) => {
                self.context.system_freshness.mark_scanned();
                info!(
                    "Installed directory in {} with {} modules",
                    system.dir.display(),
                    report.parsed.len()
                );
                Ok(InstallOutcome::Created)
            }
            Err(e) => {
                warn!("Initial population failed, removing system pair: {}", e);
                mirror::remove_pair(&system)?;
                Err(e)
            }
        }
    }

    /// Close every open database.
    pub fn terminate(mut self) {
        let count = self.databases.len();
        self.databases.clear();
        debug!("Session terminated, closed {} databases", count);
    }

    /// Logical names accepted by [`MdsSession::open`].
    pub fn db_names(&self) -> [&'static str; 2] {
        [
            DirectoryConfig::OBJECT_DIRECTORY_NAME,
            DirectoryConfig::CDSA_DIRECTORY_NAME,
        ]
    }

    /// The two logical databases are fixed; new ones cannot be created.
    pub fn create_db(&self, name: &str) -> Result<DbHandle> {
        Err(MdsError::NotImplemented(format!("create database {}", name)))
    }

    pub fn delete_db(&self, name: &str) -> Result<()> {
        Err(MdsError::NotImplemented(format!("delete database {}", name)))
    }

    /// Open a logical database after bringing its scope up to date.
    pub fn open(&mut self, name: &str) -> Result<DbHandle> {
        let kind = match name {
            DirectoryConfig::OBJECT_DIRECTORY_NAME => DirectoryKind::Object,
            DirectoryConfig::CDSA_DIRECTORY_NAME => DirectoryKind::Service,
            other => return Err(MdsError::InvalidDbName(other.to_string())),
        };

        let prepared = self.prepare_scope(false)?.0;
        if prepared.replaced {
            self.reopen_stale(prepared.scope)?;
        }
        let store = self.open_store(&prepared.layout, prepared.writable)?;

        let handle = DbHandle(self.next_handle);
        self.next_handle += 1;
        self.databases.insert(
            handle,
            OpenDatabase {
                kind,
                scope: prepared.scope,
                layout: prepared.layout,
                writable: prepared.writable,
                store,
            },
        );
        debug!("Opened {} as {:?}", name, handle);
        Ok(handle)
    }

    pub fn close(&mut self, handle: DbHandle) -> Result<()> {
        self.databases
            .remove(&handle)
            .map(|_| ())
            .ok_or_else(|| MdsError::InvalidHandle(format!("{:?}", handle)))
    }

    /// Force a freshness-checked rescan of this session's scope.
    ///
    /// Returns `None` when another rescan is already running in this process
    /// or the session fell back to the read-only system pair.
    pub fn rescan(&mut self) -> Result<Option<ScanReport>> {
        let (prepared, report) = self.prepare_scope(true)?;
        if prepared.replaced {
            self.reopen_stale(prepared.scope)?;
        }
        Ok(report)
    }

    /// Start a query, returning the first match.
    pub fn query_first(
        &mut self,
        handle: DbHandle,
        query: &Query,
    ) -> Result<Option<(Cursor, FoundRecord)>> {
        self.database(handle)?;
        let (prepared, _) = self.prepare_scope(false)?;
        if prepared.replaced {
            self.reopen_stale(prepared.scope)?;
        }

        let db = self.database(handle)?;
        let mut state = CursorState::new(query.clone(), db.kind);
        match db.store.next_match(&mut state)? {
            Some((id, record)) => Ok(Some((
                Cursor { handle, state },
                FoundRecord { id, record },
            ))),
            None => Ok(None),
        }
    }

    pub fn query_next(&mut self, cursor: &mut Cursor) -> Result<Option<FoundRecord>> {
        let db = self.database(cursor.handle)?;
        Ok(db
            .store
            .next_match(&mut cursor.state)?
            .map(|(id, record)| FoundRecord { id, record }))
    }

    /// Abandon a query. Cursors hold no engine state, so this only drops it.
    pub fn query_abort(&mut self, cursor: Cursor) {
        debug!("Aborted query on {:?}", cursor.handle);
    }

    /// Insert a record through an open handle.
    pub fn insert(
        &mut self,
        handle: DbHandle,
        record_type: u32,
        attributes: Vec<(String, AttributeValue)>,
    ) -> Result<RecordId> {
        let db = self.writable_database(handle)?;
        let relation = schema::relation_by_type(record_type)
            .ok_or(MdsError::InvalidRecordType(record_type))?;
        if relation.directory != db.kind {
            return Err(MdsError::InvalidRecordType(record_type));
        }
        let record = Record::from_named(relation, attributes)?;

        let _lock = self.lock_scope(db.scope, &db.layout)?;
        db.store.insert(&record)
    }

    /// Delete a record through an open handle. Returns whether it existed.
    pub fn delete(&mut self, handle: DbHandle, id: RecordId) -> Result<bool> {
        let db = self.writable_database(handle)?;
        let in_directory = schema::relation_by_type(id.record_type)
            .map_or(false, |relation| relation.directory == db.kind);
        if !in_directory {
            return Err(MdsError::InvalidRecordType(id.record_type));
        }

        let _lock = self.lock_scope(db.scope, &db.layout)?;
        db.store.delete(id)
    }

    /// Register one descriptor file directly into the system pair.
    ///
    /// `file` is looked up in `Contents/Resources/<subdir>` of `bundle`.
    /// Any rows already registered for the file's GUID are replaced.
    pub fn install_file(
        &mut self,
        bundle: &Path,
        subdir: Option<&str>,
        file: &str,
        defaults: Option<MdsInstallDefaults>,
    ) -> Result<BundleOutcome> {
        self.require_privilege("install_file")?;
        let system = self.context.system_layout();
        if !freshness::pair_is_sound(&system, None) {
            return Err(MdsError::NotInstalled(system.dir));
        }

        let mut dir = bundle.join("Contents").join("Resources");
        if let Some(subdir) = subdir {
            dir.push(subdir);
        }
        let path = dir.join(file);

        let mut parser = BundleParser::with_descriptor_dir(bundle, &dir, false);
        if let Some(defaults) = defaults {
            parser = parser.defaults(defaults);
        }
        let mut parsed = parser.parse_files(&[path])?;
        if let Some(failed) = parsed.file_errors.pop() {
            return Err(failed.error);
        }

        let _lock = self.lock_scope(Scope::System, &system)?;
        let mut store = self.open_store(&system, true)?;
        let outcome = descriptor::write_bundle(parsed, &mut store)?;
        info!(
            "Installed {} records for {} from {}",
            outcome.records_written,
            outcome.guid,
            file
        );
        Ok(outcome)
    }

    /// Remove one sub-service of one module from the system pair.
    pub fn remove_subservice(&mut self, guid: &str, ssid: u32) -> Result<usize> {
        self.require_privilege("remove_subservice")?;
        let system = self.context.system_layout();
        if !freshness::pair_is_sound(&system, None) {
            return Err(MdsError::NotInstalled(system.dir));
        }

        let _lock = self.lock_scope(Scope::System, &system)?;
        let store = self.open_store(&system, true)?;
        store.remove_subservice(&descriptor::normalize_guid(guid), ssid)
    }

    fn database(&self, handle: DbHandle) -> Result<&OpenDatabase> {
        self.databases
            .get(&handle)
            .ok_or_else(|| MdsError::InvalidHandle(format!("{:?}", handle)))
    }

    fn writable_database(&self, handle: DbHandle) -> Result<&OpenDatabase> {
        let db = self.database(handle)?;
        if !db.writable {
            return Err(MdsError::AccessDenied(format!(
                "{:?} is open read-only",
                handle
            )));
        }
        Ok(db)
    }

    /// Reconnect every handle on `scope` to the pair's current files.
    fn reopen_stale(&mut self, scope: Scope) -> Result<()> {
        let layout = self.context.layout(scope);
        let timeout = self.config().lock_timeout();
        for db in self.databases.values_mut().filter(|db| db.scope == scope) {
            db.store = DirectoryStore::open(
                &layout.object_db,
                &layout.directory_db,
                !db.writable,
                timeout,
            )?;
        }
        Ok(())
    }

    /// Make this session's scope usable and rescan it if due.
    fn prepare_scope(&self, force: bool) -> Result<(PreparedScope, Option<ScanReport>)> {
        let config = self.config();
        let system = self.context.system_layout();
        if !freshness::pair_is_sound(&system, None) {
            return Err(MdsError::NotInstalled(system.dir));
        }

        let scope = self.home_scope();
        let mut replaced = false;
        if scope == Scope::User {
            let user = self.context.user_layout();
            if freshness::needs_rebuild(&system, &user, config.uid) {
                let outcome = self.mirror_user_scope(&system, &user).unwrap_or_else(|e| {
                    warn!("Cannot prepare user databases in {}: {}", user.dir.display(), e);
                    MirrorOutcome::SystemFallback
                });
                match outcome {
                    MirrorOutcome::Fresh => {}
                    MirrorOutcome::Rebuilt => {
                        replaced = true;
                        self.context.user_freshness.invalidate();
                    }
                    MirrorOutcome::SystemFallback => {
                        return Ok((
                            PreparedScope {
                                scope: Scope::System,
                                layout: system,
                                writable: false,
                                replaced: false,
                            },
                            None,
                        ));
                    }
                }
            }
        }

        let layout = self.context.layout(scope);
        let report = self.refresh(scope, &layout, force)?;
        Ok((
            PreparedScope {
                scope,
                layout,
                writable: true,
                replaced,
            },
            report,
        ))
    }

    /// Create the user directory, take its lock and refresh the user pair.
    fn mirror_user_scope(&self, system: &ScopeLayout, user: &ScopeLayout) -> Result<MirrorOutcome> {
        let config = self.config();
        platform::ensure_dir(&user.dir, DirectoryConfig::USER_DB_DIR_MODE)?;
        let _lock = self.lock_scope(Scope::User, user)?;
        mirror::ensure_user_pair(system, user, config.uid, config.lock_timeout())
    }

    /// Rescan `layout` if its interval has elapsed or `force` is set.
    fn refresh(&self, scope: Scope, layout: &ScopeLayout, force: bool) -> Result<Option<ScanReport>> {
        let _guard = match self.context.scan_guard.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::WouldBlock) => {
                debug!("Rescan already running, skipping");
                return Ok(None);
            }
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
        };

        let tracker = self.context.tracker(scope);
        if !force && !tracker.scan_due() {
            return Ok(None);
        }

        let _lock = self.lock_scope(scope, layout)?;
        let mut store = self.open_store(layout, true)?;
        let report = RecordSynchronizer::new(&mut store, layout).rescan(
            &self.context.bundle_dirs(scope),
            self.config().framework_bundle.as_deref(),
        )?;
        tracker.mark_scanned();
        Ok(Some(report))
    }
}
