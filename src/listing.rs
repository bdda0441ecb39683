//! GPO listing parsing
//!
//! The directory listing collaborator returns the GPOs applying to an object,
//! closest first, one `<name>\t<url>` line per GPO. GPOs live under
//! `<root>/Policies/<ID>` on the share and the distribution assets under
//! `<root>/<DistroID>`.

use log::debug;
use url::Url;

use crate::error::{Error, Result};
use crate::fetch::{url_basename, ASSETS};

/// A GPO to fetch and decode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GpoRef {
    pub name: String,
    pub url: String,
}

impl GpoRef {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
        }
    }

    /// GPO identifier, the last segment of its URL.
    pub fn id(&self) -> &str {
        url_basename(&self.url)
    }
}

/// A parsed GPO listing.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GpoListing {
    /// GPOs ordered closest first.
    pub gpos: Vec<GpoRef>,
    /// URL of the assets tree, derived from the first GPO.
    pub assets_url: Option<String>,
}

impl GpoListing {
    /// Name and URL of every downloadable, assets included.
    pub fn downloadables(&self) -> Vec<(String, String)> {
        let mut downloadables: Vec<(String, String)> = self
            .gpos
            .iter()
            .map(|g| (g.name.clone(), g.url.clone()))
            .collect();
        if let Some(url) = &self.assets_url {
            downloadables.push((ASSETS.to_string(), url.clone()));
        }
        downloadables
    }
}

/// Parses a GPO listing. Empty lines are ignored.
pub fn parse_gpo_listing(content: &str, distro_id: &str) -> Result<GpoListing> {
    let mut listing = GpoListing::default();

    for line in content.lines().filter(|l| !l.trim().is_empty()) {
        let (name, url) = line.split_once('\t').ok_or_else(|| Error::Listing {
            message: format!("missing tab separator in {:?}", line),
        })?;
        if name.is_empty() || url.is_empty() {
            return Err(Error::Listing {
                message: format!("empty GPO name or URL in {:?}", line),
            });
        }
        if name == ASSETS {
            return Err(Error::Listing {
                message: format!("{:?} is a reserved GPO name", ASSETS),
            });
        }
        debug!("GPO {:?} available at {:?}", name, url);

        if listing.assets_url.is_none() {
            listing.assets_url = Some(assets_url(url, distro_id)?);
        }
        listing.gpos.push(GpoRef::new(name, url));
    }

    Ok(listing)
}

/// Derives the assets URL from a GPO URL.
///
/// `smb://dc/SYSVOL/example.com/Policies/{ID}` gives
/// `smb://dc/SYSVOL/example.com/<distro_id>`.
pub fn assets_url(gpo_url: &str, distro_id: &str) -> Result<String> {
    let mut url = Url::parse(gpo_url)?;
    url.path_segments_mut()
        .map_err(|_| Error::Listing {
            message: format!("{:?} can't have a path", gpo_url),
        })?
        .pop_if_empty()
        .pop()
        .pop()
        .push(distro_id);
    Ok(url.to_string())
}
