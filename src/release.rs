//! Per-release policy values
//!
//! A single GPO can carry different values for different releases of the
//! distribution. Decoded keys have the form
//! `<prefix><domain>/<key>/<release>` where `<release>` is one of:
//!
//! - `all`: the baseline value, applying to every release;
//! - `Override<release id>`: `"true"` when the following value must replace
//!   the baseline on that release;
//! - `<release id>`: the value to use on that release when its override is
//!   enabled.
//!
//! [`resolve_releases`] folds those alternatives into one entry per key and
//! groups them by policy domain.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use log::debug;

use crate::entry::Entry;
use crate::error::{Error, Result};

const BASELINE: &str = "all";
const OVERRIDE_PREFIX: &str = "Override";

/// Key of the policy whose override state is being tracked.
#[derive(Debug, PartialEq, Eq)]
struct CurrentKey {
    domain: String,
    key: String,
}

/// Folds release alternatives for the entries of one GPO.
///
/// Only entries whose key starts with `key_prefix` are considered and the
/// prefix is stripped. The first remaining segment is the policy domain and
/// the last one the release selector. Entries must be in decoding order: an
/// override only applies to the baseline entry of the same key immediately
/// preceding it.
pub fn resolve_releases<I>(entries: I, key_prefix: &str, release_id: &str) -> BTreeMap<String, Vec<Entry>>
where
    I: IntoIterator<Item = Entry>,
{
    let override_name = format!("{}{}", OVERRIDE_PREFIX, release_id);
    let mut rules: BTreeMap<String, Vec<Entry>> = BTreeMap::new();
    let mut current: Option<CurrentKey> = None;
    let mut override_enabled = false;

    for mut e in entries {
        let Some(relative) = e.key.strip_prefix(key_prefix) else {
            continue;
        };
        let Some((domain, rest)) = relative.split_once('/') else {
            debug!("Ignoring {:?}: no policy domain", e.key);
            continue;
        };
        let Some((key, release)) = rest.rsplit_once('/') else {
            debug!("Ignoring {:?}: no release selector", e.key);
            continue;
        };
        let domain = domain.to_string();
        let key = key.to_string();
        let release = release.to_string();

        if release == BASELINE {
            e.key = key.clone();
            rules.entry(domain.clone()).or_default().push(e);
            current = Some(CurrentKey { domain, key });
            override_enabled = false;
            continue;
        }

        // Alternatives must follow their baseline
        let matches_current = current
            .as_ref()
            .is_some_and(|c| c.domain == domain && c.key == key);
        if !matches_current {
            continue;
        }

        if release == override_name && e.value == "true" {
            override_enabled = true;
            continue;
        }
        if !override_enabled || release != release_id {
            continue;
        }

        if let Some(baseline) = rules.get_mut(&domain).and_then(|r| r.last_mut()) {
            baseline.value = e.value;
        }
    }

    rules
}

/// Returns the `VERSION_ID` of the os-release file under `root`.
pub fn version_id(root: &Path) -> Result<String> {
    let release_file = root.join("etc/os-release");
    let content = fs::read_to_string(&release_file)?;

    content
        .lines()
        .find_map(|l| l.strip_prefix("VERSION_ID="))
        .map(|v| v.replace('"', ""))
        .filter(|v| !v.is_empty())
        .ok_or_else(|| Error::Config {
            message: format!("can't read VERSION_ID from {}", release_file.display()),
        })
}
