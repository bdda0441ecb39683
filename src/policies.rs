//! # Policies Snapshots
//!
//! `Policies` is the result of a resolution: the GPOs applying to an object,
//! closest first, and optionally the compressed assets bundle they refer to.
//!
//! Every successful online resolution is saved under
//! `<cache>/policies/<object name>/`:
//!
//! - `policies`: the GPOs, serialized as YAML;
//! - `assets.db`: a zip archive of the assets tree, when there is one.
//!
//! When the directory is unreachable the last snapshot is served instead.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};

use log::debug;
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;
use zip::write::{FileOptions, ZipWriter};
use zip::{CompressionMethod, ZipArchive};

use crate::entry::{Entry, Gpo};
use crate::error::{Error, Result};
use crate::merge::merge;

/// Name of the cache subdirectory holding one snapshot per object.
pub const POLICIES_CACHE_DIR: &str = "policies";
const POLICIES_FILE: &str = "policies";
const ASSETS_FILE: &str = "assets.db";

/// GPOs applying to an object, with their assets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policies {
    #[serde(default)]
    pub gpos: Vec<Gpo>,
    #[serde(skip)]
    assets: Option<PathBuf>,
}

impl Policies {
    /// Creates policies from GPOs ordered closest first.
    ///
    /// `assets_db` must be a zip archive built by [`compress_assets`].
    pub fn new(gpos: Vec<Gpo>, assets_db: Option<PathBuf>) -> Result<Self> {
        if let Some(db) = &assets_db {
            open_assets(db)?;
        }
        Ok(Self {
            gpos,
            assets: assets_db,
        })
    }

    /// Loads the snapshot saved in `dir`.
    pub fn load(dir: &Path) -> Result<Self> {
        debug!("Loading policies from cache using {}", dir.display());

        let path = dir.join(POLICIES_FILE);
        let content = fs::read_to_string(&path).map_err(|e| snapshot_error(&path, e))?;
        let mut policies: Policies =
            serde_yaml::from_str(&content).map_err(|e| snapshot_error(&path, e))?;

        let db = dir.join(ASSETS_FILE);
        if db.exists() {
            open_assets(&db)?;
            policies.assets = Some(db);
        }
        Ok(policies)
    }

    /// Saves the snapshot to `dir`, created if needed.
    ///
    /// The assets bundle is copied next to the GPOs and used from there
    /// afterwards. A stale bundle is removed when there are no assets.
    pub fn save(&mut self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir)?;

        let path = dir.join(POLICIES_FILE);
        let content = serde_yaml::to_string(self)?;
        fs::write(&path, content).map_err(|e| snapshot_error(&path, e))?;

        let db = dir.join(ASSETS_FILE);
        let Some(src) = &self.assets else {
            return match fs::remove_file(&db) {
                Err(e) if e.kind() != ErrorKind::NotFound => Err(snapshot_error(&db, e)),
                _ => Ok(()),
            };
        };
        if *src == db {
            return Ok(());
        }

        let new = dir.join(format!("{}.new", ASSETS_FILE));
        fs::copy(src, &new).map_err(|e| snapshot_error(&new, e))?;
        fs::rename(&new, &db).map_err(|e| snapshot_error(&db, e))?;
        self.assets = Some(db);
        Ok(())
    }

    /// Path of the assets bundle, if any.
    pub fn assets(&self) -> Option<&Path> {
        self.assets.as_deref()
    }

    /// Names of the files and directories of the assets bundle.
    pub fn asset_names(&self) -> Result<Vec<String>> {
        let Some(db) = &self.assets else {
            return Ok(Vec::new());
        };
        let archive = open_assets(db)?;
        let mut names: Vec<String> = archive.file_names().map(str::to_string).collect();
        names.sort();
        Ok(names)
    }

    /// Rules of all GPOs, merged per domain.
    pub fn unique_rules(&self) -> BTreeMap<String, Vec<Entry>> {
        merge(&self.gpos)
    }
}

fn snapshot_error(path: &Path, e: impl std::fmt::Display) -> Error {
    Error::Snapshot {
        path: path.display().to_string(),
        message: e.to_string(),
    }
}

fn open_assets(db: &Path) -> Result<ZipArchive<File>> {
    let f = File::open(db)?;
    ZipArchive::new(f).map_err(|e| Error::Assets {
        message: format!("invalid zip db archive {}: {}", db.display(), e),
    })
}

/// Path of the bundle built from the assets tree `dir`.
pub fn assets_db_path(dir: &Path) -> PathBuf {
    let mut db = dir.as_os_str().to_owned();
    db.push(".db");
    PathBuf::from(db)
}

/// Compresses the assets tree `dir` into `<dir>.db`.
///
/// Entries are named relative to `dir`, directories with a trailing `/`.
/// The bundle is built aside and renamed over the previous one, so readers
/// always open a complete archive.
pub fn compress_assets(dir: &Path) -> Result<PathBuf> {
    debug!("Compressing assets from {}", dir.display());

    let db = assets_db_path(dir);
    let parent = db.parent().ok_or_else(|| Error::Assets {
        message: format!("invalid assets directory {}", dir.display()),
    })?;
    let tmp = tempfile::Builder::new()
        .prefix(&format!("{}.", ASSETS_FILE))
        .suffix(".new")
        .tempfile_in(parent)?;

    let mut zw = ZipWriter::new(tmp.reopen()?);
    let options = FileOptions::<()>::default().compression_method(CompressionMethod::Deflated);

    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.map_err(|e| Error::Assets {
            message: e.to_string(),
        })?;
        let path = entry.path();
        let rel = path
            .strip_prefix(dir)
            .map_err(|e| Error::Assets {
                message: e.to_string(),
            })?
            .to_string_lossy()
            .replace('\\', "/");
        if rel.is_empty() {
            continue;
        }

        if entry.file_type().is_dir() {
            zw.add_directory(format!("{}/", rel), options)?;
            continue;
        }
        zw.start_file(rel, options)?;
        let mut src = File::open(path)?;
        io::copy(&mut src, &mut zw)?;
    }

    zw.finish()?.sync_all()?;
    tmp.persist(&db).map_err(|e| e.error)?;
    Ok(db)
}
