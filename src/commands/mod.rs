//! # CLI Command Implementations
//!
//! This module contains the implementation for each subcommand of the
//! `gpo-resolver` command-line tool. Each subcommand is defined in its own
//! file to keep the logic separated and maintainable.
//!
//! ## Structure
//!
//! Each command module typically contains:
//! - An `Args` struct that defines the command-specific arguments and options,
//!   derived using `clap`.
//! - An `execute` function that takes the parsed `Args` and performs the
//!   command's logic, calling into the `gpo_resolver` library.
//!
//! Options shared by every command live in [`GlobalArgs`].

pub mod decode;
pub mod resolve;
pub mod users;

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use gpo_resolver::config::{self, Options};

/// Options shared by all commands
#[derive(Args, Debug, Default)]
pub struct GlobalArgs {
    /// Path to the YAML configuration file.
    ///
    /// Can also be set with the `GPO_RESOLVER_CONFIG` environment variable.
    /// Built-in defaults are used when not provided.
    #[arg(long, global = true, value_name = "FILE", env = "GPO_RESOLVER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Cache of GPOs, assets and policies snapshots.
    ///
    /// Can also be set with the `GPO_RESOLVER_CACHE` environment variable.
    #[arg(long, global = true, value_name = "DIR", env = "GPO_RESOLVER_CACHE")]
    pub cache_dir: Option<PathBuf>,

    /// Runtime directory holding the ticket symlinks.
    ///
    /// Can also be set with the `GPO_RESOLVER_RUN` environment variable.
    #[arg(long, global = true, value_name = "DIR", env = "GPO_RESOLVER_RUN")]
    pub run_dir: Option<PathBuf>,
}

impl GlobalArgs {
    /// Loads the configuration file, if any, and applies the CLI overrides.
    pub fn load_options(&self) -> Result<Options> {
        let mut options = match &self.config {
            Some(path) => config::from_file(path)
                .with_context(|| format!("Failed to load config from {}", path.display()))?,
            None => Options::default(),
        };

        if let Some(dir) = &self.cache_dir {
            options.cache_dir = dir.clone();
        }
        if let Some(dir) = &self.run_dir {
            options.run_dir = dir.clone();
        }
        Ok(options)
    }
}

/// Returns the short name of this host, lowercased.
pub fn local_hostname() -> Result<String> {
    let name = fs::read_to_string("/proc/sys/kernel/hostname")
        .or_else(|_| fs::read_to_string("/etc/hostname"))
        .context("Failed to read hostname")?;
    let name = name.trim().to_lowercase();
    Ok(name.split('.').next().unwrap_or_default().to_string())
}
