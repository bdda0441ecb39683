//! Directory backend abstraction
//!
//! The backend is the local agent joined to the directory (sssd, winbind…).
//! It knows the domain, which domain controller to talk to, whether the
//! directory is currently reachable and where the machine ticket lives.
//! Resolution only consumes this information; discovery is out of scope.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::Result;

/// Information provided by the directory backend.
pub trait Backend: Send + Sync {
    /// Directory domain of this host.
    fn domain(&self) -> &str;

    /// URL of the active directory server, `None` when there is none.
    fn server_url(&self) -> Result<Option<String>>;

    /// Absolute path of the machine ticket cache.
    fn host_ticket_path(&self) -> Result<PathBuf>;

    /// Suffix appended to bare user names. Empty when not configured.
    fn default_domain_suffix(&self) -> &str;

    /// Refreshes and returns the online state.
    fn is_online(&self) -> Result<bool>;

    /// Human readable configuration summary.
    fn config(&self) -> String {
        format!(
            "domain: {}\ndefault domain suffix: {}",
            self.domain(),
            self.default_domain_suffix()
        )
    }
}

/// A backend with fixed values, typically read from the configuration file.
#[derive(Debug)]
pub struct StaticBackend {
    domain: String,
    server_url: Option<String>,
    host_ticket: PathBuf,
    default_domain_suffix: String,
    online: AtomicBool,
}

impl StaticBackend {
    pub fn new(domain: impl Into<String>, host_ticket: impl Into<PathBuf>) -> Self {
        let domain = domain.into();
        Self {
            default_domain_suffix: domain.clone(),
            domain,
            server_url: None,
            host_ticket: host_ticket.into(),
            online: AtomicBool::new(true),
        }
    }

    pub fn with_server_url(mut self, url: impl Into<String>) -> Self {
        self.server_url = Some(url.into());
        self
    }

    pub fn with_default_domain_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.default_domain_suffix = suffix.into();
        self
    }

    pub fn with_online(self, online: bool) -> Self {
        self.set_online(online);
        self
    }

    /// Switches the reported online state.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }
}

impl Backend for StaticBackend {
    fn domain(&self) -> &str {
        &self.domain
    }

    fn server_url(&self) -> Result<Option<String>> {
        Ok(self.server_url.clone())
    }

    fn host_ticket_path(&self) -> Result<PathBuf> {
        Ok(self.host_ticket.clone())
    }

    fn default_domain_suffix(&self) -> &str {
        &self.default_domain_suffix
    }

    fn is_online(&self) -> Result<bool> {
        Ok(self.online.load(Ordering::SeqCst))
    }

    fn config(&self) -> String {
        format!(
            "domain: {}\nserver: {}\ndefault domain suffix: {}\nhost ticket: {}",
            self.domain,
            self.server_url.as_deref().unwrap_or("<none>"),
            self.default_domain_suffix,
            self.host_ticket.display()
        )
    }
}
