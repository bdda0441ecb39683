//! # GPO and Assets Fetching
//!
//! The `FetchManager` keeps a local copy of the GPOs and of the assets tree
//! published on the remote share, under `<cache>/sysvol`:
//!
//! - `Policies/<GPO ID>/`: one tree per GPO;
//! - `assets/`: the distribution assets tree.
//!
//! ## Fetch cycle
//!
//! A cycle refreshes a set of downloadables (name and remote URL) under one
//! Kerberos identity. Cycles are serialized: the identity in use is held by
//! the manager for the whole cycle. Inside a cycle every downloadable is
//! handled by its own task on the rayon pool:
//!
//! 1.  The local and remote `GPT.INI` versions are compared. A missing or
//!     corrupt local marker only means the tree is downloaded again.
//! 2.  Outdated trees are downloaded to a temporary sibling directory, which
//!     then replaces the cached tree. Readers see the old or the new tree,
//!     never a mix of both.
//!
//! A failing task never cancels the others. All failures are reported
//! together once every task has finished.
//!
//! ## Locking
//!
//! Each downloadable has a read/write lock guarding its local tree: downloads
//! take it for writing, `read_locked` for reading. Different GPOs never wait
//! on each other.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};

use ini::Ini;
use log::{debug, info, warn};

use crate::error::{Error, Result};
use crate::remote::{RemoteEntryKind, RemoteTree, RemoteTreeConnector};

/// Name of the downloadable holding the distribution assets.
pub const ASSETS: &str = "assets";

/// Name of the version marker of GPOs and assets.
pub const VERSION_MARKER: &str = "GPT.INI";

/// Bookkeeping for one downloadable.
#[derive(Debug)]
struct Downloadable {
    name: String,
    is_assets: bool,
    lock: RwLock<()>,
}

impl Downloadable {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            is_assets: name == ASSETS,
            lock: RwLock::new(()),
        }
    }
}

/// What a task did to its local tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Refresh {
    UpToDate,
    Downloaded,
    Removed,
}

/// Outcome of a fetch cycle.
#[derive(Debug, Default)]
pub struct FetchReport {
    /// The local assets tree changed, either downloaded or removed.
    pub assets_refreshed: bool,
    /// Names of the downloadables downloaded during this cycle.
    pub downloaded: Vec<String>,
    /// Failed downloadables with their error. Their local tree is untouched.
    pub failures: Vec<(String, Error)>,
}

impl FetchReport {
    /// Returns true if `name` could not be refreshed.
    pub fn failed(&self, name: &str) -> bool {
        self.failures.iter().any(|(n, _)| n == name)
    }

    /// Turns failures into one aggregated error.
    pub fn into_result(self) -> Result<bool> {
        if self.failures.is_empty() {
            Ok(self.assets_refreshed)
        } else {
            Err(Error::Fetch {
                failures: self.failures,
            })
        }
    }
}

/// Downloads and caches GPOs and assets.
pub struct FetchManager {
    sysvol_dir: PathBuf,
    connector: Box<dyn RemoteTreeConnector>,
    transfer_timeout: Duration,
    downloadables: Mutex<HashMap<String, Arc<Downloadable>>>,
    // Held for a whole cycle. Ticket of the last cycle.
    last_ticket: Mutex<Option<PathBuf>>,
}

impl FetchManager {
    /// Creates a manager caching under `sysvol_dir`.
    pub fn new(
        sysvol_dir: impl Into<PathBuf>,
        connector: Box<dyn RemoteTreeConnector>,
        transfer_timeout: Duration,
    ) -> Result<Self> {
        let sysvol_dir = sysvol_dir.into();
        fs::create_dir_all(sysvol_dir.join("Policies"))?;

        Ok(Self {
            sysvol_dir,
            connector,
            transfer_timeout,
            downloadables: Mutex::new(HashMap::new()),
            last_ticket: Mutex::new(None),
        })
    }

    /// Local directory of the assets tree.
    pub fn assets_dir(&self) -> PathBuf {
        self.sysvol_dir.join(ASSETS)
    }

    /// Local directory of the GPO published at `url`.
    pub fn gpo_dir(&self, url: &str) -> PathBuf {
        self.sysvol_dir.join("Policies").join(url_basename(url))
    }

    /// Refreshes `downloadables`, pairs of name and remote URL, using the
    /// ticket at `ticket`.
    ///
    /// Only errors preventing the whole cycle are returned as `Err`.
    /// Per-downloadable failures are listed in the report.
    pub fn fetch(
        &self,
        ticket: Option<&Path>,
        downloadables: &[(String, String)],
    ) -> Result<FetchReport> {
        let mut last_ticket = self
            .last_ticket
            .lock()
            .map_err(|_| Error::poisoned("fetch cycle"))?;
        if last_ticket.as_deref() != ticket {
            debug!("Switching fetch identity to {:?}", ticket);
            *last_ticket = ticket.map(Path::to_path_buf);
        }

        self.fetch_cycle(ticket, downloadables)
    }

    /// Runs `f` while holding the read lock of downloadable `name`.
    ///
    /// The local tree of `name` can't be replaced while `f` runs.
    pub fn read_locked<T>(&self, name: &str, f: impl FnOnce() -> Result<T>) -> Result<T> {
        let record = self.record(name)?;
        let _guard = record
            .lock
            .read()
            .map_err(|_| Error::poisoned(&record.name))?;
        f()
    }

    fn record(&self, name: &str) -> Result<Arc<Downloadable>> {
        let mut records = self
            .downloadables
            .lock()
            .map_err(|_| Error::poisoned("downloadables"))?;
        Ok(Arc::clone(
            records
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(Downloadable::new(name))),
        ))
    }

    fn fetch_cycle(
        &self,
        ticket: Option<&Path>,
        downloadables: &[(String, String)],
    ) -> Result<FetchReport> {
        let tree = self.connector.connect(ticket)?;
        let deadline = Instant::now() + self.transfer_timeout;

        let tasks = downloadables
            .iter()
            .map(|(name, url)| Ok((self.record(name)?, url.as_str())))
            .collect::<Result<Vec<_>>>()?;

        let failures: Mutex<Vec<(String, Error)>> = Mutex::new(Vec::new());
        let downloaded: Mutex<Vec<String>> = Mutex::new(Vec::new());
        let assets_refreshed = AtomicBool::new(false);

        rayon::scope(|s| {
            for (record, url) in &tasks {
                let tree = tree.as_ref();
                let failures = &failures;
                let downloaded = &downloaded;
                let assets_refreshed = &assets_refreshed;
                s.spawn(move |_| match self.refresh(tree, record, url, deadline) {
                    Ok(Refresh::UpToDate) => {}
                    Ok(refresh) => {
                        if record.is_assets {
                            assets_refreshed.store(true, Ordering::SeqCst);
                        }
                        if refresh == Refresh::Downloaded {
                            downloaded
                                .lock()
                                .unwrap_or_else(PoisonError::into_inner)
                                .push(record.name.clone());
                        }
                    }
                    Err(e) => failures
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .push((record.name.clone(), e)),
                });
            }
        });
        drop(tasks);
        self.prune(downloadables)?;

        let mut failures = failures.into_inner().unwrap_or_else(PoisonError::into_inner);
        failures.sort_by(|a, b| a.0.cmp(&b.0));
        let mut downloaded = downloaded
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner);
        downloaded.sort();

        Ok(FetchReport {
            assets_refreshed: assets_refreshed.load(Ordering::SeqCst),
            downloaded,
            failures,
        })
    }

    /// Forgets records nobody uses anymore.
    fn prune(&self, downloadables: &[(String, String)]) -> Result<()> {
        let keep: HashSet<&str> = downloadables.iter().map(|(n, _)| n.as_str()).collect();
        let mut records = self
            .downloadables
            .lock()
            .map_err(|_| Error::poisoned("downloadables"))?;
        records.retain(|name, record| keep.contains(name.as_str()) || Arc::strong_count(record) > 1);
        Ok(())
    }

    fn refresh(
        &self,
        tree: &dyn RemoteTree,
        record: &Downloadable,
        url: &str,
        deadline: Instant,
    ) -> Result<Refresh> {
        debug!("Analyzing {:?}", record.name);

        let dest = if record.is_assets {
            self.assets_dir()
        } else {
            self.gpo_dir(url)
        };

        let local_version = {
            let _guard = record
                .lock
                .read()
                .map_err(|_| Error::poisoned(&record.name))?;
            local_version(&dest)
        };

        self.check_deadline(url, deadline)?;
        let marker_url = format!("{}/{}", url, VERSION_MARKER);
        let remote_marker = match tree.read_file(&marker_url) {
            Ok(content) => content,
            Err(e) if record.is_assets => {
                debug!("No assets available: {}", e);
                info!("No assets directory with {} file found, skipping assets download", VERSION_MARKER);
                return self.remove_tree(record, &dest);
            }
            Err(e) => return Err(e),
        };
        let remote_version = gpt_version(&String::from_utf8_lossy(&remote_marker), &marker_url)?;

        if local_version >= remote_version {
            debug!("{:?} is up to date (version {})", record.name, local_version);
            return Ok(Refresh::UpToDate);
        }

        info!("Downloading {:?}", record.name);
        let _guard = record
            .lock
            .write()
            .map_err(|_| Error::poisoned(&record.name))?;
        self.download_dir(tree, url, &dest, deadline)?;
        Ok(Refresh::Downloaded)
    }

    fn remove_tree(&self, record: &Downloadable, dest: &Path) -> Result<Refresh> {
        let _guard = record
            .lock
            .write()
            .map_err(|_| Error::poisoned(&record.name))?;
        if !dest.exists() {
            return Ok(Refresh::UpToDate);
        }
        fs::remove_dir_all(dest)?;
        Ok(Refresh::Removed)
    }

    /// Downloads the remote directory `url` and atomically replaces `dest`.
    fn download_dir(
        &self,
        tree: &dyn RemoteTree,
        url: &str,
        dest: &Path,
        deadline: Instant,
    ) -> Result<()> {
        let parent = dest.parent().ok_or_else(|| Error::Transport {
            url: url.to_string(),
            message: format!("invalid destination {}", dest.display()),
        })?;
        let base = dest
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        fs::create_dir_all(parent)?;

        // Removed on drop, whatever happens
        let tmp = tempfile::Builder::new()
            .prefix(&format!("{}.", base))
            .tempdir_in(parent)?;

        self.download_recursive(tree, url, tmp.path(), deadline)?;

        if !dest.exists() {
            fs::rename(tmp.path(), dest)?;
            return Ok(());
        }

        // The previous tree stays on disk until the new one is in place
        let aside = tempfile::Builder::new()
            .prefix(&format!("{}.old.", base))
            .tempdir_in(parent)?;
        let old = aside.path().join(&base);
        fs::rename(dest, &old)?;
        if let Err(e) = fs::rename(tmp.path(), dest) {
            fs::rename(&old, dest)?;
            return Err(e.into());
        }
        Ok(())
    }

    fn download_recursive(
        &self,
        tree: &dyn RemoteTree,
        url: &str,
        dest: &Path,
        deadline: Instant,
    ) -> Result<()> {
        self.check_deadline(url, deadline)?;
        let entries = tree.list_dir(url)?;
        fs::create_dir_all(dest)?;

        for entry in entries {
            if entry.name == "." || entry.name == ".." {
                continue;
            }
            if entry.name.contains('/') {
                return Err(Error::Transport {
                    url: url.to_string(),
                    message: format!("invalid entry name {:?}", entry.name),
                });
            }

            let entry_url = format!("{}/{}", url, entry.name);
            let entry_dest = dest.join(&entry.name);
            match entry.kind {
                RemoteEntryKind::File => {
                    self.check_deadline(&entry_url, deadline)?;
                    debug!("Downloading {}", entry_url);
                    let data = tree.read_file(&entry_url)?;
                    fs::write(&entry_dest, data)?;
                }
                RemoteEntryKind::Directory => {
                    self.download_recursive(tree, &entry_url, &entry_dest, deadline)?;
                }
            }
        }
        Ok(())
    }

    fn check_deadline(&self, url: &str, deadline: Instant) -> Result<()> {
        if Instant::now() >= deadline {
            return Err(Error::Timeout {
                url: url.to_string(),
                seconds: self.transfer_timeout.as_secs(),
            });
        }
        Ok(())
    }
}

/// Last path segment of a remote URL.
pub fn url_basename(url: &str) -> &str {
    url.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(url)
}

/// Version recorded in the local marker of `dir`, 0 when unusable.
fn local_version(dir: &Path) -> i64 {
    let path = dir.join(VERSION_MARKER);
    let content = match fs::read(&path) {
        Ok(content) => content,
        Err(_) => return 0,
    };

    match gpt_version(&String::from_utf8_lossy(&content), &path.display().to_string()) {
        Ok(v) => v,
        Err(e) => {
            warn!("Invalid local {}: {}. Downloading it again", VERSION_MARKER, e);
            0
        }
    }
}

/// Parses the `Version=` value of a `GPT.INI` file.
pub fn gpt_version(content: &str, path: &str) -> Result<i64> {
    let marker_error = |message: String| Error::VersionMarker {
        path: path.to_string(),
        message,
    };

    let ini = Ini::load_from_str(content).map_err(|e| marker_error(e.to_string()))?;
    let version = ini
        .iter()
        .find_map(|(_, properties)| properties.get("Version"))
        .ok_or_else(|| marker_error("version not found".to_string()))?;

    version
        .trim()
        .parse::<i64>()
        .map_err(|e| marker_error(format!("version is not an int: {}", e)))
}
