//! # Resolve Command Implementation
//!
//! This module implements the `resolve` subcommand, which runs the whole
//! pipeline for a user or for this computer:
//!
//! - **Listing**: GPOs are read from a listing file of `<name>\t<url>` lines,
//!   closest first, as returned by the directory.
//! - **Fetch**: GPOs and assets are refreshed from a local mirror of the
//!   share (`--share-root` or `share_root` in the configuration).
//! - **Output**: The merged rules are printed per domain. `--details` prints
//!   the rules of every GPO instead, marking the overridden ones.
//!
//! When the directory is configured as offline, the last saved policies of
//! the object are printed.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::Args;
use log::{debug, warn};

use gpo_resolver::entry::Entry;
use gpo_resolver::krb5::{EnvTicketProvider, TicketProvider};
use gpo_resolver::listing::parse_gpo_listing;
use gpo_resolver::policies::Policies;
use gpo_resolver::remote::DirectoryRemoteTree;
use gpo_resolver::resolver::Resolver;
use gpo_resolver::target::ObjectClass;

use super::{local_hostname, GlobalArgs};

/// Resolve the policies of a user or of this computer
#[derive(Args, Debug)]
pub struct ResolveArgs {
    /// File listing the GPOs applying to the object, closest first.
    #[arg(value_name = "LISTING")]
    pub listing: PathBuf,

    /// User (`user@domain`, `DOMAIN\user` or `user`) or computer name.
    ///
    /// Defaults to this computer.
    #[arg(value_name = "OBJECT")]
    pub object: Option<String>,

    /// Class of the object. Guessed from its name when not provided.
    #[arg(long, value_name = "CLASS", value_parser = parse_class)]
    pub class: Option<ObjectClass>,

    /// Kerberos ticket of the user. Defaults to `KRB5CCNAME`.
    #[arg(long, value_name = "FILE")]
    pub ticket: Option<PathBuf>,

    /// Local directory mirroring the share the GPOs are fetched from.
    #[arg(long, value_name = "DIR")]
    pub share_root: Option<PathBuf>,

    /// Name of this host. Defaults to the system hostname.
    #[arg(long, value_name = "NAME", env = "GPO_RESOLVER_HOSTNAME")]
    pub hostname: Option<String>,

    /// Print the rules of each GPO instead of the merged rules.
    #[arg(long)]
    pub details: bool,

    /// Print the merged rules as JSON.
    #[arg(long, conflicts_with = "details")]
    pub json: bool,
}

fn parse_class(s: &str) -> std::result::Result<ObjectClass, String> {
    s.parse().map_err(|e: gpo_resolver::error::Error| e.to_string())
}

/// Execute the `resolve` command.
pub fn execute(args: ResolveArgs, global: &GlobalArgs) -> Result<()> {
    let mut options = global.load_options()?;
    if let Some(root) = &args.share_root {
        options.share_root = Some(root.clone());
    }
    let share_root = options
        .share_root
        .clone()
        .ok_or_else(|| anyhow!("No share root configured, use --share-root"))?;

    let hostname = match &args.hostname {
        Some(name) => name.to_lowercase(),
        None => local_hostname()?,
    };

    let resolver = Resolver::new(
        &options,
        &hostname,
        Box::new(options.backend()),
        Box::new(DirectoryRemoteTree::new(share_root)),
    )
    .context("Failed to initialize resolver")?;

    let object = args.object.as_deref().unwrap_or(&hostname);
    let object = resolver.normalize_target_name(object, args.class)?;
    let class = args.class.unwrap_or(if object == resolver.hostname() {
        ObjectClass::Computer
    } else {
        ObjectClass::User
    });

    let ticket = match (&args.ticket, class) {
        (Some(t), _) => Some(t.clone()),
        (None, ObjectClass::User) => match EnvTicketProvider.default_ticket() {
            Ok(t) => Some(t),
            Err(e) => {
                debug!("No default ticket: {}", e);
                None
            }
        },
        (None, ObjectClass::Computer) => None,
    };

    let content = fs::read_to_string(&args.listing)
        .with_context(|| format!("Failed to read listing {}", args.listing.display()))?;
    let listing = parse_gpo_listing(&content, &options.distro_id)?;

    let resolution = resolver
        .resolve(&object, class, ticket.as_deref(), &listing)
        .with_context(|| format!("Failed to resolve policies of {}", object))?;

    let stdout = io::stdout();
    let mut out = stdout.lock();
    if args.details {
        write_details(&mut out, &resolution.policies)?;
    } else if args.json {
        serde_json::to_writer_pretty(&mut out, &resolution.policies.unique_rules())?;
        writeln!(out)?;
    } else {
        write_rules(&mut out, &resolution.policies.unique_rules())?;
    }

    if let Some(e) = resolution.error {
        warn!("Policies were resolved without some GPOs");
        return Err(e).context("Some GPOs could not be refreshed");
    }
    Ok(())
}

fn write_details<W: Write>(w: &mut W, policies: &Policies) -> Result<()> {
    let mut processed = HashSet::new();
    for gpo in &policies.gpos {
        processed = gpo.format(w, true, true, processed)?;
    }
    if let Some(db) = policies.assets() {
        writeln!(w, "* assets: {}", db.display())?;
    }
    Ok(())
}

fn write_rules<W: Write>(w: &mut W, rules: &BTreeMap<String, Vec<Entry>>) -> Result<()> {
    for (domain, entries) in rules {
        writeln!(w, "{}:", domain)?;
        for e in entries {
            if e.disabled {
                writeln!(w, "  + {}", e.key)?;
            } else {
                writeln!(w, "  {}: {}", e.key, e.value.replace('\n', r"\n"))?;
            }
        }
    }
    Ok(())
}
