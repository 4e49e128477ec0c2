//! MDS Core - Module Directory Service for security plugin bundles.
//!
//! The directory service keeps a local cache of metadata describing the
//! installed security plugins. It scans plugin bundles' descriptor files,
//! writes normalized rows into two logical databases (the Object Directory
//! and the CDSA Directory), and keeps one canonical system-wide copy plus a
//! private mirror per user, consistent through file locks and
//! modification-time freshness checks.
//!
//! # Example
//!
//! ```rust,ignore
//! use mds_core::{MdsConfig, MdsContext, MdsSession, Query};
//! use std::sync::Arc;
//!
//! fn main() -> mds_core::Result<()> {
//!     let context = Arc::new(MdsContext::new(MdsConfig::default()));
//!     let mut session = MdsSession::new(context);
//!
//!     let cdsa = session.open("MDS CDSA Directory")?;
//!     let query = Query::of(mds_core::record_type::CSP_PRIMARY);
//!     if let Some((mut cursor, first)) = session.query_first(cdsa, &query)? {
//!         println!("{:?}", first.record);
//!         while let Some(next) = session.query_next(&mut cursor)? {
//!             println!("{:?}", next.record);
//!         }
//!     }
//!     session.close(cdsa)?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod descriptor;
pub mod error;
pub mod freshness;
pub mod lock;
pub mod mirror;
pub mod platform;
pub mod schema;
pub mod store;
pub mod sync;

mod session;

// Re-export commonly used types
pub use config::{DirectoryConfig, MdsConfig};
pub use descriptor::{BundleOutcome, DescriptorValue, MdsInstallDefaults};
pub use error::{ErrorKind, MdsError, Result};
pub use lock::{LockMode, ScopeLock};
pub use schema::{record_type, AttributeFormat, AttributeValue, DirectoryKind, Record};
pub use session::{
    Cursor, DbHandle, FoundRecord, InstallOutcome, MdsContext, MdsSession, Scope,
};
pub use store::{DirectoryStore, Query, RecordId};
pub use sync::{ScanReport, RecordSynchronizer};
