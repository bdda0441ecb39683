//! Shared test utilities for integration and E2E tests.
//!
//! This module provides a fixture laying out a share mirror, a cache and a
//! runtime directory, plus helpers to write `Registry.pol` files.
//!
//! ## Usage
//!
//! Add `mod common;` to your test file, then use the helpers:
//!
//! ```rust,ignore
//! mod common;
//! use common::prelude::*;
//!
//! #[test]
//! fn test_example() {
//!     let fixture = TestFixture::new();
//!     fixture.publish_gpo("{GPO1}", 1, "Machine", &[pol::string(DCONF, "all", "v")]);
//!     // ... test code
//! }
//! ```

#![allow(dead_code)]

use assert_fs::prelude::*;
use std::path::{Path, PathBuf};

/// Re-export commonly used test dependencies for convenience.
pub mod prelude {
    #[allow(unused_imports)]
    pub use assert_cmd::cargo::cargo_bin_cmd;
    #[allow(unused_imports)]
    pub use assert_fs::prelude::*;
    #[allow(unused_imports)]
    pub use predicates::prelude::*;

    #[allow(unused_imports)]
    pub use super::pol;
    pub use super::TestFixture;
    #[allow(unused_imports)]
    pub use super::{DCONF, HOST, POLICIES_URL, USER};
}

/// Name of the host in every fixture.
pub const HOST: &str = "testhost";

/// A user of the test domain.
pub const USER: &str = "bob@example.com";

/// URL of the GPOs directory on the share.
pub const POLICIES_URL: &str = "smb://dc.example.com/SYSVOL/example.com/Policies";

/// Registry path of a dconf key of the default distribution.
pub const DCONF: &str = r"Software\Policies\Ubuntu\dconf\org\gnome\desktop\background\picture-uri";

/// `Registry.pol` builders.
pub mod pol {
    pub fn utf16(s: &str) -> Vec<u8> {
        s.encode_utf16().flat_map(|u| u.to_le_bytes()).collect()
    }

    /// Encodes one record with raw data.
    pub fn record(path: &str, key: &str, data_type: u32, data: &[u8]) -> Vec<u8> {
        let mut b = utf16("[");
        b.extend(utf16(path));
        b.extend(utf16("\0;"));
        b.extend(utf16(key));
        b.extend(utf16("\0;"));
        b.extend_from_slice(&data_type.to_le_bytes());
        b.extend(utf16(";"));
        b.extend_from_slice(&(data.len() as u32).to_le_bytes());
        b.extend(utf16(";"));
        b.extend_from_slice(data);
        b.extend(utf16("]"));
        b
    }

    pub fn string(path: &str, key: &str, value: &str) -> Vec<u8> {
        record(path, key, 1, &utf16(&format!("{}\0", value)))
    }

    pub fn dword(path: &str, key: &str, value: u32) -> Vec<u8> {
        record(path, key, 4, &value.to_le_bytes())
    }

    /// Builds a complete file from records.
    pub fn file(records: &[Vec<u8>]) -> Vec<u8> {
        let mut b = Vec::new();
        b.extend_from_slice(&0x6765_5250_i32.to_le_bytes());
        b.extend_from_slice(&1_i32.to_le_bytes());
        for r in records {
            b.extend_from_slice(r);
        }
        b
    }
}

/// A share mirror, a cache, a runtime directory and a ticket.
pub struct TestFixture {
    temp_dir: assert_fs::TempDir,
}

impl TestFixture {
    /// Create a new test fixture with empty directories.
    pub fn new() -> Self {
        let temp_dir = assert_fs::TempDir::new().expect("Failed to create temp directory");
        for dir in ["share", "cache", "run"] {
            temp_dir
                .child(dir)
                .create_dir_all()
                .expect("Failed to create fixture directory");
        }
        temp_dir
            .child("tickets/host")
            .write_str("host ticket")
            .expect("Failed to write host ticket");
        Self { temp_dir }
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn share(&self) -> PathBuf {
        self.path().join("share")
    }

    pub fn cache(&self) -> PathBuf {
        self.path().join("cache")
    }

    pub fn run(&self) -> PathBuf {
        self.path().join("run")
    }

    pub fn host_ticket(&self) -> PathBuf {
        self.path().join("tickets/host")
    }

    /// Writes a user ticket and returns its path.
    pub fn ticket(&self, name: &str) -> PathBuf {
        let child = self.temp_dir.child(format!("tickets/{}", name));
        child.write_str("ticket").expect("Failed to write ticket");
        child.path().to_path_buf()
    }

    /// Publishes a GPO with a `Registry.pol` file in `class_dir`.
    pub fn publish_gpo(&self, id: &str, version: u32, class_dir: &str, records: &[Vec<u8>]) {
        let gpo = self
            .temp_dir
            .child(format!("share/SYSVOL/example.com/Policies/{}", id));
        gpo.child("GPT.INI")
            .write_str(&format!("[General]\nVersion={}\n", version))
            .expect("Failed to write GPT.INI");
        gpo.child(format!("{}/Registry.pol", class_dir))
            .write_binary(&pol::file(records))
            .expect("Failed to write Registry.pol");
    }

    /// Publishes the distribution assets.
    pub fn publish_assets(&self, version: u32) {
        let assets = self.temp_dir.child("share/SYSVOL/example.com/Ubuntu");
        assets
            .child("GPT.INI")
            .write_str(&format!("[General]\nVersion={}\n", version))
            .expect("Failed to write GPT.INI");
        assets
            .child("dconf/background.png")
            .write_str("png")
            .expect("Failed to write asset");
    }

    /// Writes a listing of the given GPO ids and returns its path.
    pub fn listing(&self, ids: &[&str]) -> PathBuf {
        let child = self.temp_dir.child("listing");
        child
            .write_str(&self.listing_content(ids))
            .expect("Failed to write listing");
        child.path().to_path_buf()
    }

    /// Listing content of the given GPO ids.
    pub fn listing_content(&self, ids: &[&str]) -> String {
        ids.iter()
            .map(|id| format!("{} name\t{}/{}\n", id, POLICIES_URL, id))
            .collect()
    }

    /// Writes the configuration file and returns its path.
    pub fn config(&self, offline: bool) -> PathBuf {
        let content = format!(
            "cache_dir: {cache}\n\
             run_dir: {run}\n\
             version_id: \"21.04\"\n\
             share_root: {share}\n\
             backend:\n\
             \x20 domain: example.com\n\
             \x20 host_ticket: {ticket}\n\
             \x20 offline: {offline}\n",
            cache = self.cache().display(),
            run = self.run().display(),
            share = self.share().display(),
            ticket = self.host_ticket().display(),
            offline = offline,
        );
        let child = self.temp_dir.child("gpo-resolver.yaml");
        child.write_str(&content).expect("Failed to write config file");
        child.path().to_path_buf()
    }

    /// Create a command running against this fixture.
    pub fn command(&self) -> assert_cmd::Command {
        self.command_with(false)
    }

    /// Create a command running against this fixture, optionally offline.
    pub fn command_with(&self, offline: bool) -> assert_cmd::Command {
        let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("gpo-resolver");
        cmd.current_dir(self.path())
            .env("GPO_RESOLVER_CONFIG", self.config(offline))
            .env("GPO_RESOLVER_HOSTNAME", HOST)
            .env_remove("GPO_RESOLVER_CACHE")
            .env_remove("GPO_RESOLVER_RUN")
            .env_remove("KRB5CCNAME")
            .env_remove("RUST_LOG");
        cmd
    }
}

impl Default for TestFixture {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixture_layout() {
        let fixture = TestFixture::new();
        assert!(fixture.share().is_dir());
        assert!(fixture.host_ticket().is_file());
    }

    #[test]
    fn test_config_is_valid_yaml() {
        let fixture = TestFixture::new();
        let content = std::fs::read_to_string(fixture.config(true)).unwrap();
        let value: serde_yaml::Value = serde_yaml::from_str(&content).unwrap();
        assert_eq!(value["backend"]["offline"], serde_yaml::Value::Bool(true));
    }
}
