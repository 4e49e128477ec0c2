//! Error types for the Module Directory Service.
//!
//! Internally every failure is an [`MdsError`]. Callers that only care about
//! the public taxonomy (access denied, invalid name, not implemented, busy,
//! generic directory-service failure) use [`MdsError::kind`].

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Main error type for the directory service.
#[derive(Debug, Error)]
pub enum MdsError {
    // Contention
    #[error("Timed out after {timeout:?} waiting for lock {path}")]
    LockTimeout { path: PathBuf, timeout: Duration },

    // Caller errors
    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Invalid database name: {0}")]
    InvalidDbName(String),

    #[error("Unknown record type {0:#x}")]
    InvalidRecordType(u32),

    #[error("Unknown attribute {attribute} in {relation}")]
    InvalidAttribute { relation: String, attribute: String },

    #[error("Invalid handle: {0}")]
    InvalidHandle(String),

    #[error("Not implemented: {0}")]
    NotImplemented(String),

    // Scope integrity
    #[error("System directory databases are not installed at {0}")]
    NotInstalled(PathBuf),

    #[error("Integrity check failed for {path}: {message}")]
    Integrity { path: PathBuf, message: String },

    // Descriptor errors
    #[error("Invalid descriptor {path}: {message}")]
    Descriptor { path: PathBuf, message: String },

    #[error("Bundle {0} has no ModuleID")]
    MissingIdentity(PathBuf),

    // Database engine errors
    #[error("Database error: {message}")]
    Database {
        message: String,
        #[source]
        source: Option<rusqlite::Error>,
    },

    // File system errors
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    // Serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    // Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("{0}")]
    Other(String),
}

/// Result type alias for directory service operations.
pub type Result<T> = std::result::Result<T, MdsError>;

/// The small public error taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    AccessDenied,
    InvalidName,
    NotImplemented,
    /// A scope lock could not be taken in time; the caller may retry.
    Busy,
    DirectoryService,
}

impl From<std::io::Error> for MdsError {
    fn from(err: std::io::Error) -> Self {
        MdsError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for MdsError {
    fn from(err: serde_json::Error) -> Self {
        MdsError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<rusqlite::Error> for MdsError {
    fn from(err: rusqlite::Error) -> Self {
        MdsError::Database {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl MdsError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        if err.kind() == std::io::ErrorKind::PermissionDenied {
            return MdsError::AccessDenied(format!("{}: {}", path.display(), err));
        }
        MdsError::Io {
            message: err.to_string(),
            path: Some(path),
            source: Some(err),
        }
    }

    /// Create a descriptor error for one file.
    pub fn descriptor(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        MdsError::Descriptor {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Project onto the public taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            MdsError::AccessDenied(_) => ErrorKind::AccessDenied,
            MdsError::InvalidDbName(_)
            | MdsError::InvalidRecordType(_)
            | MdsError::InvalidAttribute { .. }
            | MdsError::InvalidHandle(_) => ErrorKind::InvalidName,
            MdsError::NotImplemented(_) => ErrorKind::NotImplemented,
            MdsError::LockTimeout { .. } => ErrorKind::Busy,
            _ => ErrorKind::DirectoryService,
        }
    }

    /// Check if the caller may retry the operation unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, MdsError::LockTimeout { .. })
    }
}
