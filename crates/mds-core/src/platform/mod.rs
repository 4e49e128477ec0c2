//! Platform abstraction layer.
//!
//! All `#[cfg]` blocks for OS-specific behavior live here rather than being
//! scattered through the directory service.
//!
//! - `paths` - Physical layout of the system and per-user scopes
//! - `permissions` - Directory/file modes and ownership checks

pub mod paths;
pub mod permissions;

pub use paths::{install_lock_path, system_scope, user_scope, ScopeLayout};
pub use permissions::{ensure_dir, is_owned_by, set_mode};

/// Effective uid of the current process.
pub fn effective_uid() -> u32 {
    #[cfg(unix)]
    {
        nix::unistd::geteuid().as_raw()
    }
    #[cfg(not(unix))]
    {
        0
    }
}
