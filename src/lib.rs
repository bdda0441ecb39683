//! # GPO Resolver Library
//!
//! This library resolves the Group Policy Objects applying to a Linux host
//! joined to an Active Directory domain, or to one of its users. It is used by
//! the `gpo-resolver` command-line tool but the pipeline stages can be used on
//! their own.
//!
//! ## Quick Example
//!
//! ```
//! use gpo_resolver::entry::{Entry, Gpo};
//! use gpo_resolver::merge::merge;
//!
//! // GPOs are ordered closest first
//! let gpos = vec![
//!     Gpo::new("{GPO1}", "Workstations")
//!         .with_rules("dconf", vec![Entry::new("org/gnome/desktop/background/picture-uri", "ours")]),
//!     Gpo::new("{GPO2}", "Default Domain Policy")
//!         .with_rules("dconf", vec![
//!             Entry::new("org/gnome/desktop/background/picture-uri", "default"),
//!             Entry::new("org/gnome/desktop/background/picture-options", "zoom"),
//!         ]),
//! ];
//!
//! let rules = merge(&gpos);
//! assert_eq!(rules["dconf"].len(), 2);
//! assert_eq!(rules["dconf"][1].value, "ours");
//! ```
//!
//! ## Core Concepts
//!
//! - **Decoding (`registry`)**: Turns the binary `Registry.pol` files of GPOs
//!   into typed entries (`entry`).
//! - **Releases (`release`)**: Folds the per-release alternatives a GPO can
//!   carry into one value per key, for the running release.
//! - **Merging (`merge`)**: Combines the GPOs applying to an object into one
//!   rule set per policy domain, closest GPO winning.
//! - **Fetching (`fetch`, `remote`)**: Keeps a local copy of the GPOs and of
//!   the distribution assets, only downloading what changed.
//! - **Resolution (`resolver`)**: Runs the whole pipeline for a user or the
//!   computer, saving snapshots (`policies`) replayed when the directory is
//!   unreachable.
//!
//! ## Execution Flow
//!
//! 1.  **Listing**: The GPOs applying to the object are given as a listing
//!     (`listing`), closest first.
//! 2.  **Identity**: The Kerberos ticket of the object is tracked (`krb5`,
//!     `target`).
//! 3.  **Fetch**: Out of date GPOs and assets are downloaded in parallel.
//! 4.  **Decode**: Each GPO is decoded for the object class and release.
//! 5.  **Snapshot**: The result is saved, then merged on demand.

pub mod backend;
pub mod config;
pub mod defaults;
pub mod entry;
pub mod error;
pub mod fetch;
pub mod krb5;
pub mod listing;
pub mod merge;
pub mod policies;
pub mod registry;
pub mod release;
pub mod remote;
pub mod resolver;
pub mod target;

#[cfg(test)]
mod registry_proptest;
