//! # Decode Command Implementation
//!
//! This module implements the `decode` subcommand, which prints the entries
//! of a `Registry.pol` file as found in a GPO, before any release or merge
//! processing.
//!
//! Disabled entries are prefixed with `+`. Entries which could not be decoded
//! are prefixed with `!` and followed by the reason.
//!
//! This command is a safe, read-only operation that does not modify any files.

use std::fs::File;
use std::io::{self, BufReader, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;

use gpo_resolver::entry::{DecodedEntry, Entry};
use gpo_resolver::registry::decode_policy_from;

/// Decode a Registry.pol file
#[derive(Args, Debug)]
pub struct DecodeArgs {
    /// Path to the Registry.pol file.
    #[arg(value_name = "FILE")]
    pub path: PathBuf,

    /// Print entries as a JSON array.
    #[arg(long)]
    pub json: bool,
}

#[derive(Serialize)]
struct DecodedRecord<'a> {
    #[serde(flatten)]
    entry: &'a Entry,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// Execute the `decode` command.
pub fn execute(args: DecodeArgs) -> Result<()> {
    let f = File::open(&args.path)
        .with_context(|| format!("Failed to open {}", args.path.display()))?;
    let entries = decode_policy_from(BufReader::new(f))
        .with_context(|| format!("Failed to decode {}", args.path.display()))?;

    let stdout = io::stdout();
    let mut out = stdout.lock();
    if args.json {
        write_json(&mut out, &entries)?;
    } else {
        write_text(&mut out, &entries)?;
    }
    Ok(())
}

fn write_json<W: Write>(w: &mut W, entries: &[DecodedEntry]) -> Result<()> {
    let records: Vec<DecodedRecord> = entries
        .iter()
        .map(|e| match e {
            Ok(entry) => DecodedRecord { entry, error: None },
            Err(e) => DecodedRecord {
                entry: &e.entry,
                error: Some(e.to_string()),
            },
        })
        .collect();
    serde_json::to_writer_pretty(&mut *w, &records)?;
    writeln!(w)?;
    Ok(())
}

fn write_text<W: Write>(w: &mut W, entries: &[DecodedEntry]) -> Result<()> {
    for e in entries {
        match e {
            Ok(entry) if entry.disabled => writeln!(w, "+ {}", entry.key)?,
            Ok(entry) => writeln!(w, "{}: {}", entry.key, entry.value.replace('\n', r"\n"))?,
            Err(e) => writeln!(w, "! {}: {}", e.entry.key, e)?,
        }
    }
    Ok(())
}
