//! # Configuration
//!
//! This module defines the `Options` structure read from the optional YAML
//! configuration file of gpo-resolver, as well as the logic for parsing it.
//! Every field has a default, so an empty file or no file at all is a valid
//! configuration:
//!
//! ```yaml
//! cache_dir: /var/cache/gpo-resolver
//! run_dir: /run/gpo-resolver
//! distro_id: Ubuntu
//! version_id: "24.04"
//! transfer_timeout_secs: 30
//! share_root: /srv/sysvol-mirror
//! backend:
//!   domain: example.com
//!   default_domain_suffix: example.com
//!   server_url: ldap://dc.example.com
//!   offline: false
//! ```
//!
//! The CLI can then override the directories with flags or environment
//! variables.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backend::StaticBackend;
use crate::defaults::{
    default_cache_dir, default_host_ticket, default_run_dir, DEFAULT_DISTRO_ID,
    DEFAULT_TRANSFER_TIMEOUT_SECS,
};
use crate::error::{Error, Result};
use crate::release::version_id;

/// Resolver configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    /// Cache of GPOs, assets and policies snapshots.
    pub cache_dir: PathBuf,
    /// Runtime directory holding ticket symlinks.
    pub run_dir: PathBuf,
    /// Distribution identifier in policy keys (`Software/Policies/<id>/`).
    pub distro_id: String,
    /// Release to resolve overrides for. Read from `/etc/os-release` if unset.
    pub version_id: Option<String>,
    /// Maximum duration of the transfers of one fetch cycle.
    pub transfer_timeout_secs: u64,
    /// Local mirror of the remote share.
    pub share_root: Option<PathBuf>,
    pub backend: BackendOptions,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            run_dir: default_run_dir(),
            distro_id: DEFAULT_DISTRO_ID.to_string(),
            version_id: None,
            transfer_timeout_secs: DEFAULT_TRANSFER_TIMEOUT_SECS,
            share_root: None,
            backend: BackendOptions::default(),
        }
    }
}

/// Static directory backend settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendOptions {
    pub domain: String,
    /// Defaults to `domain`.
    pub default_domain_suffix: Option<String>,
    pub server_url: Option<String>,
    /// Defaults to the sssd ticket cache of `domain`.
    pub host_ticket: Option<PathBuf>,
    pub offline: bool,
}

impl Options {
    /// Release identifier, from the configuration or the running system.
    pub fn resolved_version_id(&self) -> Result<String> {
        match &self.version_id {
            Some(v) => Ok(v.clone()),
            None => version_id(Path::new("/")),
        }
    }

    pub fn transfer_timeout(&self) -> Duration {
        Duration::from_secs(self.transfer_timeout_secs)
    }

    /// Builds the static backend described by this configuration.
    pub fn backend(&self) -> StaticBackend {
        let b = &self.backend;
        let host_ticket = b
            .host_ticket
            .clone()
            .unwrap_or_else(|| default_host_ticket(&b.domain));

        let mut backend = StaticBackend::new(b.domain.clone(), host_ticket).with_online(!b.offline);
        if let Some(suffix) = &b.default_domain_suffix {
            backend = backend.with_default_domain_suffix(suffix.clone());
        }
        if let Some(url) = &b.server_url {
            backend = backend.with_server_url(url.clone());
        }
        backend
    }
}

/// Parses options from a YAML string.
pub fn parse(yaml_content: &str) -> Result<Options> {
    if yaml_content.trim().is_empty() {
        return Ok(Options::default());
    }
    serde_yaml::from_str(yaml_content).map_err(|e| Error::Config {
        message: e.to_string(),
    })
}

/// Parses options from a YAML file path.
pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Options> {
    let path = path.as_ref();
    let content = fs::read_to_string(path).map_err(|e| Error::Config {
        message: format!("can't read {}: {}", path.display(), e),
    })?;
    parse(&content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Backend;

    #[test]
    fn test_parse_empty_config() {
        assert_eq!(parse("").unwrap(), Options::default());
        assert_eq!(parse("\n  \n").unwrap(), Options::default());
    }

    #[test]
    fn test_parse_full_config() {
        let yaml = r#"
cache_dir: /tmp/cache
run_dir: /tmp/run
distro_id: Debian
version_id: "12"
transfer_timeout_secs: 5
share_root: /srv/share
backend:
  domain: example.com
  default_domain_suffix: corp.example.com
  server_url: ldap://dc.example.com
  host_ticket: /tmp/krb5cc_host
  offline: true
"#;

        let options = parse(yaml).unwrap();
        assert_eq!(options.cache_dir, PathBuf::from("/tmp/cache"));
        assert_eq!(options.run_dir, PathBuf::from("/tmp/run"));
        assert_eq!(options.distro_id, "Debian");
        assert_eq!(options.resolved_version_id().unwrap(), "12");
        assert_eq!(options.transfer_timeout(), Duration::from_secs(5));
        assert_eq!(options.share_root, Some(PathBuf::from("/srv/share")));

        let backend = options.backend();
        assert_eq!(backend.domain(), "example.com");
        assert_eq!(backend.default_domain_suffix(), "corp.example.com");
        assert_eq!(
            backend.server_url().unwrap(),
            Some("ldap://dc.example.com".to_string())
        );
        assert_eq!(
            backend.host_ticket_path().unwrap(),
            PathBuf::from("/tmp/krb5cc_host")
        );
        assert!(!backend.is_online().unwrap());
    }

    #[test]
    fn test_parse_partial_config_keeps_defaults() {
        let options = parse("backend:\n  domain: example.com\n").unwrap();
        assert_eq!(options.distro_id, DEFAULT_DISTRO_ID);
        assert_eq!(options.transfer_timeout_secs, DEFAULT_TRANSFER_TIMEOUT_SECS);
        assert_eq!(options.cache_dir, default_cache_dir());

        let backend = options.backend();
        assert_eq!(backend.default_domain_suffix(), "example.com");
        assert_eq!(
            backend.host_ticket_path().unwrap(),
            PathBuf::from("/var/lib/sss/db/ccache_EXAMPLE.COM")
        );
        assert!(backend.is_online().unwrap());
    }

    #[test]
    fn test_parse_invalid_config() {
        assert!(matches!(
            parse("transfer_timeout_secs: soon"),
            Err(Error::Config { .. })
        ));
        assert!(matches!(parse("[unclosed"), Err(Error::Config { .. })));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gpo-resolver.yaml");
        std::fs::write(&path, "distro_id: Debian\n").unwrap();
        assert_eq!(from_file(&path).unwrap().distro_id, "Debian");

        assert!(matches!(
            from_file(dir.path().join("missing.yaml")),
            Err(Error::Config { .. })
        ));
    }
}
