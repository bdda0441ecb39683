//! Kerberos ticket handling
//!
//! Tickets are never minted here. A user ticket is provided by the caller
//! (usually from its `KRB5CCNAME`), the machine ticket by the backend. Each
//! identity gets a symlink `<run>/krb5cc/<object>` to the ticket used for its
//! last resolution, so that later refreshes can run without the caller.

use std::env;
use std::fs;
use std::io::ErrorKind;
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};

use log::debug;

use crate::error::{Error, Result};

/// Environment variable holding the default ticket cache.
pub const KRB5CCNAME: &str = "KRB5CCNAME";

/// Resolves the default ticket of the current user.
pub trait TicketProvider: Send + Sync {
    fn default_ticket(&self) -> Result<PathBuf>;
}

/// Ticket provider reading `KRB5CCNAME`.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvTicketProvider;

impl TicketProvider for EnvTicketProvider {
    fn default_ticket(&self) -> Result<PathBuf> {
        let identity = |message: String| Error::Identity {
            object: KRB5CCNAME.to_string(),
            message,
        };

        let ccname = env::var(KRB5CCNAME).unwrap_or_default();
        let path = ccname.strip_prefix("FILE:").unwrap_or(&ccname);
        if path.is_empty() {
            return Err(identity("ticket path is empty".to_string()));
        }

        let metadata = fs::metadata(path)
            .map_err(|e| identity(format!("ticket not found or not accessible: {}", e)))?;
        if !metadata.is_file() {
            return Err(identity(format!("{:?} is not a regular file", path)));
        }
        Ok(PathBuf::from(path))
    }
}

/// Returns the path of the ticket symlink of `object_name`.
pub fn ticket_symlink_path(krb5_dir: &Path, object_name: &str) -> PathBuf {
    krb5_dir.join(object_name)
}

/// Makes `link` point to `ticket`.
///
/// The symlink is left untouched when it already targets the absolute path of
/// `ticket`.
pub fn ensure_ticket_symlink(ticket: &Path, link: &Path) -> Result<()> {
    let object = link
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let identity = |message: String| Error::Identity {
        object: object.clone(),
        message,
    };

    let target = std::path::absolute(ticket)
        .map_err(|e| identity(format!("can't get absolute path of ticket: {}", e)))?;

    match fs::read_link(link) {
        Ok(current) if current == target => return Ok(()),
        Ok(_) => {
            fs::remove_file(link)
                .map_err(|e| identity(format!("failed to remove existing symlink: {}", e)))?;
        }
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => {
            return Err(identity(format!("can't read existing symlink: {}", e)));
        }
    }

    if let Some(parent) = link.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| identity(format!("failed to create symlink directory: {}", e)))?;
    }
    debug!("Linking {} to {}", link.display(), target.display());
    symlink(&target, link).map_err(|e| identity(format!("failed to create symlink: {}", e)))
}

/// Returns the ticket `link` points to, failing on missing or dangling links.
pub fn linked_ticket(link: &Path, object_name: &str) -> Result<PathBuf> {
    let identity = |message: String| Error::Identity {
        object: object_name.to_string(),
        message,
    };

    let target = fs::read_link(link).map_err(|e| identity(format!("no ticket symlink: {}", e)))?;
    if !target.is_file() {
        return Err(identity(format!(
            "ticket {} is not available",
            target.display()
        )));
    }
    Ok(target)
}

/// Returns true if `link` is a symlink to an existing file.
pub fn is_active_ticket(link: &Path) -> bool {
    fs::symlink_metadata(link).is_ok_and(|m| m.file_type().is_symlink()) && link.is_file()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    fn ticket(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, "ticket").unwrap();
        path
    }

    #[test]
    fn test_ensure_ticket_symlink_creates_link() {
        let dir = TempDir::new().unwrap();
        let t = ticket(dir.path(), "krb5cc_1000");
        let link = ticket_symlink_path(&dir.path().join("krb5cc"), "bob@example.com");

        ensure_ticket_symlink(&t, &link).unwrap();
        assert_eq!(fs::read_link(&link).unwrap(), t);
        assert!(is_active_ticket(&link));
    }

    #[test]
    fn test_ensure_ticket_symlink_keeps_same_target() {
        let dir = TempDir::new().unwrap();
        let t = ticket(dir.path(), "krb5cc_1000");
        let link = dir.path().join("krb5cc/bob@example.com");

        ensure_ticket_symlink(&t, &link).unwrap();
        let before = fs::symlink_metadata(&link).unwrap().modified().unwrap();
        ensure_ticket_symlink(&t, &link).unwrap();
        let after = fs::symlink_metadata(&link).unwrap().modified().unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn test_ensure_ticket_symlink_replaces_other_target() {
        let dir = TempDir::new().unwrap();
        let old = ticket(dir.path(), "krb5cc_old");
        let new = ticket(dir.path(), "krb5cc_new");
        let link = dir.path().join("krb5cc/bob@example.com");

        ensure_ticket_symlink(&old, &link).unwrap();
        ensure_ticket_symlink(&new, &link).unwrap();
        assert_eq!(fs::read_link(&link).unwrap(), new);
    }

    #[test]
    fn test_linked_ticket() {
        let dir = TempDir::new().unwrap();
        let t = ticket(dir.path(), "krb5cc_1000");
        let link = dir.path().join("krb5cc/bob@example.com");

        assert!(matches!(
            linked_ticket(&link, "bob@example.com"),
            Err(Error::Identity { .. })
        ));

        ensure_ticket_symlink(&t, &link).unwrap();
        assert_eq!(linked_ticket(&link, "bob@example.com").unwrap(), t);

        // Dangling
        fs::remove_file(&t).unwrap();
        assert!(matches!(
            linked_ticket(&link, "bob@example.com"),
            Err(Error::Identity { .. })
        ));
        assert!(!is_active_ticket(&link));
    }

    #[test]
    #[serial]
    fn test_env_ticket_provider() {
        let dir = TempDir::new().unwrap();
        let t = ticket(dir.path(), "krb5cc_1000");

        env::set_var(KRB5CCNAME, format!("FILE:{}", t.display()));
        assert_eq!(EnvTicketProvider.default_ticket().unwrap(), t);

        env::set_var(KRB5CCNAME, &t);
        assert_eq!(EnvTicketProvider.default_ticket().unwrap(), t);

        env::set_var(KRB5CCNAME, dir.path());
        assert!(EnvTicketProvider.default_ticket().is_err());

        env::set_var(KRB5CCNAME, dir.path().join("missing"));
        assert!(EnvTicketProvider.default_ticket().is_err());

        env::remove_var(KRB5CCNAME);
        assert!(EnvTicketProvider.default_ticket().is_err());
    }
}
