//! CLI argument parsing and command dispatch

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::commands;

/// GPO Resolver - Resolve Group Policy Objects for Linux hosts
#[derive(Parser, Debug)]
#[command(name = "gpo-resolver")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,

    /// Set log level (error, warn, info, debug, trace).
    ///
    /// `RUST_LOG` takes precedence when set.
    #[arg(long, global = true, value_name = "LEVEL", default_value = "info")]
    log_level: String,

    #[command(flatten)]
    global: commands::GlobalArgs,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Decode a Registry.pol file and print its entries
    Decode(commands::decode::DecodeArgs),

    /// Fetch, decode and merge the GPOs applying to a user or the computer
    Resolve(commands::resolve::ResolveArgs),

    /// List users with cached policies
    Users(commands::users::UsersArgs),
}

impl Cli {
    /// Execute the CLI command
    pub fn execute(self) -> Result<()> {
        init_logging(&self.log_level);

        match self.command {
            Commands::Decode(args) => commands::decode::execute(args),
            Commands::Resolve(args) => commands::resolve::execute(args, &self.global),
            Commands::Users(args) => commands::users::execute(args, &self.global),
        }
    }
}

fn init_logging(level: &str) {
    let env = env_logger::Env::default().default_filter_or(level);
    // Only fails if a logger is already installed
    let _ = env_logger::Builder::from_env(env)
        .format_timestamp(None)
        .try_init();
}
