//! # Users Command Implementation
//!
//! Lists the users whose policies were resolved on this host, one per line.
//! With `--active`, only users whose last ticket is still available are
//! listed.

use std::io::{self, Write};

use anyhow::Result;
use clap::Args;

use gpo_resolver::resolver::list_users;

use super::GlobalArgs;

/// List users with cached policies
#[derive(Args, Debug)]
pub struct UsersArgs {
    /// Only list users with a valid ticket.
    #[arg(long)]
    pub active: bool,
}

/// Execute the `users` command.
pub fn execute(args: UsersArgs, global: &GlobalArgs) -> Result<()> {
    let options = global.load_options()?;
    let users = list_users(&options, args.active)?;

    let stdout = io::stdout();
    let mut out = stdout.lock();
    for user in users {
        writeln!(out, "{}", user)?;
    }
    Ok(())
}
