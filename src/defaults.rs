//! Default values for gpo-resolver configuration.
//!
//! This module provides centralized default values used by the configuration
//! layer and the commands, ensuring consistency and avoiding duplication.

use std::path::{Path, PathBuf};

/// Distribution whose policies are resolved.
pub const DEFAULT_DISTRO_ID: &str = "Ubuntu";

/// Maximum duration of the transfers of one fetch cycle, in seconds.
pub const DEFAULT_TRANSFER_TIMEOUT_SECS: u64 = 30;

/// Directory of the sssd machine ticket caches.
const SSS_CCACHE_DIR: &str = "/var/lib/sss/db";

/// Returns the default cache directory.
///
/// Uses the platform-appropriate cache directory, `~/.cache/gpo-resolver` on
/// Linux, and falls back to `/var/cache/gpo-resolver` when it can't be
/// determined (system services usually have no home).
///
/// This can be overridden by the `--cache-dir` CLI flag or the
/// `GPO_RESOLVER_CACHE` environment variable.
pub fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("/var/cache"))
        .join("gpo-resolver")
}

/// Returns the default runtime directory, holding ticket symlinks.
///
/// Uses `$XDG_RUNTIME_DIR/gpo-resolver`, or `/run/gpo-resolver`.
pub fn default_run_dir() -> PathBuf {
    dirs::runtime_dir()
        .unwrap_or_else(|| PathBuf::from("/run"))
        .join("gpo-resolver")
}

/// Returns the machine ticket cache maintained by sssd for `domain`.
pub fn default_host_ticket(domain: &str) -> PathBuf {
    Path::new(SSS_CCACHE_DIR).join(format!("ccache_{}", domain.to_uppercase()))
}
