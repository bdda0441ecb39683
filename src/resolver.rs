//! # Policy Resolution
//!
//! The `Resolver` ties the pipeline together for one host:
//!
//! 1.  The target is checked and its ticket symlink refreshed.
//! 2.  If the backend reports the directory as unreachable, the last saved
//!     snapshot of the target is returned as is.
//! 3.  Otherwise the GPOs of the listing and the assets are fetched.
//! 4.  The `Registry.pol` of each GPO for the target class is decoded and
//!     its per-release alternatives folded, while the assets bundle is
//!     rebuilt if needed.
//! 5.  The new snapshot is saved for offline use.
//!
//! GPOs which could not be fetched are left out of the result and reported
//! in `Resolution::error`. Such partial results are not saved.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use log::{debug, info, warn};

use crate::backend::Backend;
use crate::config::Options;
use crate::entry::{Entry, Gpo};
use crate::error::{Error, Result};
use crate::fetch::{FetchManager, FetchReport, ASSETS};
use crate::krb5::{ensure_ticket_symlink, is_active_ticket, linked_ticket, ticket_symlink_path};
use crate::listing::{GpoListing, GpoRef};
use crate::policies::{assets_db_path, compress_assets, Policies, POLICIES_CACHE_DIR};
use crate::registry::decode_policy;
use crate::release::resolve_releases;
use crate::remote::RemoteTreeConnector;
use crate::target::{normalize_target_name, validate_target, ObjectClass};

/// Prefix of all supported policy keys, before the distribution identifier.
pub const KEY_PREFIX: &str = "Software/Policies";

/// Certificate autoenrollment policy.
const CERT_AUTOENROLL_KEY: &str = "Software/Policies/Microsoft/Cryptography/AutoEnrollment/AEPolicy";

/// Prefix of the certificate enrollment policy servers settings.
const POLICY_SERVERS_PREFIX: &str = "Software/Policies/Microsoft/Cryptography/PolicyServers/";

const REGISTRY_FILE: &str = "Registry.pol";

/// Last known state of the directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerState {
    pub server_url: Option<String>,
    pub online: bool,
}

/// Result of a resolution.
#[derive(Debug)]
pub struct Resolution {
    pub policies: Policies,
    pub assets_refreshed: bool,
    /// Downloadables which could not be refreshed, aggregated.
    pub error: Option<Error>,
}

/// Resolves the policies of the users and the computer of this host.
pub struct Resolver {
    hostname: String,
    distro_id: String,
    version_id: String,
    backend: Box<dyn Backend>,
    fetcher: FetchManager,
    policies_dir: PathBuf,
    krb5_dir: PathBuf,
    state: RwLock<ServerState>,
}

impl Resolver {
    /// Creates a resolver, creating its cache directories.
    pub fn new(
        options: &Options,
        hostname: &str,
        backend: Box<dyn Backend>,
        connector: Box<dyn RemoteTreeConnector>,
    ) -> Result<Self> {
        let version_id = options.resolved_version_id()?;
        let krb5_dir = options.run_dir.join("krb5cc");
        let policies_dir = options.cache_dir.join(POLICIES_CACHE_DIR);
        fs::create_dir_all(&krb5_dir)?;
        fs::create_dir_all(&policies_dir)?;

        let fetcher = FetchManager::new(
            options.cache_dir.join("sysvol"),
            connector,
            options.transfer_timeout(),
        )?;

        debug!(
            "Resolver for {:?} on release {:?}, backend:\n{}",
            options.distro_id,
            version_id,
            backend.config()
        );

        Ok(Self {
            hostname: hostname.to_lowercase(),
            distro_id: options.distro_id.clone(),
            version_id,
            backend,
            fetcher,
            policies_dir,
            krb5_dir,
            state: RwLock::new(ServerState::default()),
        })
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// Prefix of the keys handled for this distribution.
    pub fn key_prefix(&self) -> String {
        format!("{}/{}/", KEY_PREFIX, self.distro_id)
    }

    /// Last server state seen by a resolution.
    pub fn server_state(&self) -> Result<ServerState> {
        let state = self
            .state
            .read()
            .map_err(|_| Error::poisoned("server state"))?;
        Ok(state.clone())
    }

    /// Resolves the policies of `object_name`.
    ///
    /// `ticket` is the caller ticket for users. Computers always use the
    /// machine ticket. Without ticket, the one of the previous resolution of
    /// this object is used.
    pub fn resolve(
        &self,
        object_name: &str,
        class: ObjectClass,
        ticket: Option<&Path>,
        listing: &GpoListing,
    ) -> Result<Resolution> {
        debug!("Resolving policies for {:?}, type {}", object_name, class);
        validate_target(object_name, class, &self.hostname)?;

        let ticket = self.ticket_for(object_name, class, ticket)?;

        if !self.refresh_state()? {
            let policies = self.cached_policies(object_name).map_err(|e| Error::Offline {
                object: object_name.to_string(),
                message: e.to_string(),
            })?;
            info!(
                "Can't reach the directory: {:?} policies are applied using previous online update",
                object_name
            );
            return Ok(Resolution {
                policies,
                assets_refreshed: false,
                error: None,
            });
        }

        let report = self.fetcher.fetch(Some(ticket.as_path()), &listing.downloadables())?;
        for (name, e) in &report.failures {
            warn!("Can't refresh {:?}: {}", name, e);
        }

        let fetched: Vec<GpoRef> = listing
            .gpos
            .iter()
            .filter(|g| !report.failed(&g.name))
            .cloned()
            .collect();
        let has_assets = listing.assets_url.is_some();

        let (gpos, assets_db) = rayon::join(
            || self.parse_gpos(&fetched, class),
            || self.assets_db(has_assets, &report),
        );
        let mut policies = Policies::new(gpos?, assets_db?)?;

        let assets_refreshed = report.assets_refreshed;
        let error = report.into_result().err();
        if error.is_none() {
            policies.save(&self.policies_dir.join(object_name))?;
        }

        Ok(Resolution {
            policies,
            assets_refreshed,
            error,
        })
    }

    /// Returns the last saved snapshot of `object_name`.
    pub fn cached_policies(&self, object_name: &str) -> Result<Policies> {
        Policies::load(&self.policies_dir.join(object_name))
    }

    /// Normalizes a target name for this host and backend.
    pub fn normalize_target_name(&self, target: &str, class: Option<ObjectClass>) -> Result<String> {
        normalize_target_name(
            target,
            class,
            &self.hostname,
            self.backend.default_domain_suffix(),
        )
    }

    /// Lists users with a saved snapshot or, if `active`, with a valid ticket.
    pub fn list_users(&self, active: bool) -> Result<Vec<String>> {
        if active {
            users_in(&self.krb5_dir, true)
        } else {
            users_in(&self.policies_dir, false)
        }
    }

    /// Decodes the cached GPOs, in order, for `class`.
    pub fn parse_gpos(&self, gpos: &[GpoRef], class: ObjectClass) -> Result<Vec<Gpo>> {
        let prefix = self.key_prefix();

        gpos.iter()
            .map(|g| {
                let entries = self
                    .fetcher
                    .read_locked(&g.name, || self.decode_gpo(g, class))?;
                let entries = entries.into_iter().map(|mut e| {
                    e.key = rewrite_key(&e.key, &prefix);
                    e
                });
                Ok(Gpo {
                    id: g.id().to_string(),
                    name: g.name.clone(),
                    rules: resolve_releases(entries, &prefix, &self.version_id),
                })
            })
            .collect()
    }

    fn decode_gpo(&self, g: &GpoRef, class: ObjectClass) -> Result<Vec<Entry>> {
        debug!("Parsing GPO {:?}", g.name);

        let dir = self.fetcher.gpo_dir(&g.url);
        let Some(path) = class
            .policy_dirs()
            .iter()
            .map(|d| dir.join(d).join(REGISTRY_FILE))
            .find(|p| p.is_file())
        else {
            debug!("Policy {:?} doesn't have any policy for class {}", g.name, class);
            return Ok(Vec::new());
        };

        let data = fs::read(&path)?;
        let decoded = decode_policy(&data).map_err(|e| Error::PolicyFormat {
            message: format!("{}: {}", path.display(), e),
        })?;

        Ok(decoded
            .into_iter()
            .filter_map(|e| match e {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!("{}: ignoring {:?}: {}", path.display(), e.entry.key, e);
                    None
                }
            })
            .collect())
    }

    /// Returns the assets bundle to attach, rebuilding it if needed.
    fn assets_db(&self, has_assets: bool, report: &FetchReport) -> Result<Option<PathBuf>> {
        let assets_dir = self.fetcher.assets_dir();
        let db = assets_db_path(&assets_dir);

        if !has_assets || !report.assets_refreshed || report.failed(ASSETS) {
            return Ok(db.is_file().then_some(db));
        }

        // A later cycle can't swap the assets tree while it is compressed
        self.fetcher.read_locked(ASSETS, || {
            if !assets_dir.exists() {
                return match fs::remove_file(&db) {
                    Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
                    _ => Ok(None),
                };
            }
            compress_assets(&assets_dir).map(Some)
        })
    }

    fn ticket_for(
        &self,
        object_name: &str,
        class: ObjectClass,
        ticket: Option<&Path>,
    ) -> Result<PathBuf> {
        let link = ticket_symlink_path(&self.krb5_dir, object_name);

        // Machine identity is not caller selectable
        let source = match class {
            ObjectClass::Computer => Some(self.backend.host_ticket_path()?),
            ObjectClass::User => ticket.map(Path::to_path_buf),
        };
        if let Some(source) = source {
            ensure_ticket_symlink(&source, &link)?;
        }

        linked_ticket(&link, object_name)
    }

    /// Refreshes the server state, returning whether the directory is online.
    fn refresh_state(&self) -> Result<bool> {
        let online = self.backend.is_online()?;
        let server_url = if online {
            self.backend.server_url()?
        } else {
            None
        };

        let mut state = self
            .state
            .write()
            .map_err(|_| Error::poisoned("server state"))?;
        if state.server_url != server_url {
            debug!("Directory server is now {:?}", server_url);
        }
        *state = ServerState { server_url, online };
        Ok(online)
    }
}

/// Lists the users known from the directories of `options`, see
/// [`Resolver::list_users`].
pub fn list_users(options: &Options, active: bool) -> Result<Vec<String>> {
    if active {
        users_in(&options.run_dir.join("krb5cc"), true)
    } else {
        users_in(&options.cache_dir.join(POLICIES_CACHE_DIR), false)
    }
}

fn users_in(dir: &Path, active: bool) -> Result<Vec<String>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut users = Vec::new();
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if !name.contains('@') {
            continue;
        }
        // Dangling symlinks are silently skipped
        if active && !is_active_ticket(&entry.path()) {
            continue;
        }
        users.push(name);
    }
    users.sort();
    Ok(users)
}

/// Moves certificate enrollment keys under the distribution prefix.
fn rewrite_key(key: &str, prefix: &str) -> String {
    if key == CERT_AUTOENROLL_KEY {
        return format!("{}certificate/autoenroll/all", prefix);
    }
    if key.starts_with(POLICY_SERVERS_PREFIX) {
        return format!("{}certificate/{}/all", prefix, key);
    }
    key.to_string()
}
