//! # Remote File Tree Access
//!
//! GPOs and assets are published on a directory-backed file share, reached
//! through URLs such as `smb://dc.example.com/SYSVOL/example.com/Policies/{ID}`.
//! The transfer protocol itself is not implemented here: the fetch manager
//! only needs to list a remote directory and read a remote file, and gets
//! access to those operations through two traits:
//!
//! - **`RemoteTreeConnector`**: opens a session for one fetch cycle, under the
//!   identity of the given Kerberos ticket.
//! - **`RemoteTree`**: the session itself, used concurrently by every download
//!   of the cycle.
//!
//! `DirectoryRemoteTree` is the implementation shipped with the crate. It maps
//! remote URLs onto a local directory, which is what the CLI uses against a
//! mounted or mirrored SYSVOL share, and what tests use against fixtures.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Kind of an element of a remote directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteEntryKind {
    File,
    Directory,
}

/// One element of a remote directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    pub name: String,
    pub kind: RemoteEntryKind,
}

impl RemoteEntry {
    pub fn file(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: RemoteEntryKind::File,
        }
    }

    pub fn directory(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: RemoteEntryKind::Directory,
        }
    }
}

/// An open session on the remote share.
pub trait RemoteTree: Send + Sync {
    /// Lists the content of a remote directory, without `.` and `..`.
    fn list_dir(&self, url: &str) -> Result<Vec<RemoteEntry>>;

    /// Reads a whole remote file.
    fn read_file(&self, url: &str) -> Result<Vec<u8>>;
}

/// Opens sessions on the remote share.
pub trait RemoteTreeConnector: Send + Sync {
    /// Connects using the ticket cache at `ticket`. `None` means no
    /// authentication.
    fn connect(&self, ticket: Option<&Path>) -> Result<Box<dyn RemoteTree>>;
}

/// A remote share mirrored in a local directory.
///
/// The host part of `smb://` URLs is ignored: `smb://<host>/<path>` is read
/// from `<root>/<path>`. `file://` URLs are used as absolute local paths.
#[derive(Debug, Clone)]
pub struct DirectoryRemoteTree {
    root: PathBuf,
}

impl DirectoryRemoteTree {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the local path backing `url`.
    pub fn local_path(&self, url: &str) -> Result<PathBuf> {
        let (scheme, rest) = url.split_once("://").ok_or_else(|| Error::Transport {
            url: url.to_string(),
            message: "not an absolute URL".to_string(),
        })?;

        let relative = match scheme {
            "file" => return Ok(PathBuf::from(rest)),
            "smb" => rest.split_once('/').map(|(_host, path)| path).unwrap_or(""),
            _ => {
                return Err(Error::Transport {
                    url: url.to_string(),
                    message: format!("unsupported scheme {:?}", scheme),
                })
            }
        };

        let mut path = self.root.clone();
        for segment in relative.split('/').filter(|s| !s.is_empty()) {
            if segment == ".." {
                return Err(Error::Transport {
                    url: url.to_string(),
                    message: "path escapes the share".to_string(),
                });
            }
            path.push(segment);
        }
        Ok(path)
    }
}

impl RemoteTree for DirectoryRemoteTree {
    fn list_dir(&self, url: &str) -> Result<Vec<RemoteEntry>> {
        let path = self.local_path(url)?;
        let transport = |e: std::io::Error| Error::Transport {
            url: url.to_string(),
            message: e.to_string(),
        };

        let mut entries = Vec::new();
        for dirent in fs::read_dir(&path).map_err(transport)? {
            let dirent = dirent.map_err(transport)?;
            let name = dirent.file_name().to_string_lossy().into_owned();
            // Follow symlinks like a share would
            let metadata = fs::metadata(dirent.path()).map_err(transport)?;
            if metadata.is_dir() {
                entries.push(RemoteEntry::directory(name));
            } else if metadata.is_file() {
                entries.push(RemoteEntry::file(name));
            } else {
                return Err(Error::Transport {
                    url: url.to_string(),
                    message: format!("unsupported type for entry {}", name),
                });
            }
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    fn read_file(&self, url: &str) -> Result<Vec<u8>> {
        let path = self.local_path(url)?;
        fs::read(&path).map_err(|e| Error::Transport {
            url: url.to_string(),
            message: e.to_string(),
        })
    }
}

impl RemoteTreeConnector for DirectoryRemoteTree {
    fn connect(&self, _ticket: Option<&Path>) -> Result<Box<dyn RemoteTree>> {
        if !self.root.is_dir() {
            return Err(Error::Transport {
                url: self.root.display().to_string(),
                message: "share root is not a directory".to_string(),
            });
        }
        Ok(Box::new(self.clone()))
    }
}
