//! # Error Handling
//!
//! This module defines the centralized error type for the GPO resolution
//! pipeline. It uses the `thiserror` library to build an `Error` enum whose
//! variants follow the failure classes of the pipeline:
//!
//! - **Format errors** (`PolicyFormat`): a `Registry.pol` file is unreadable
//!   and its decoding is aborted.
//! - **Soft entry errors** (`EntryDecode`): a single entry could not be
//!   decoded. These are stored next to the partially decoded entry rather than
//!   returned, so that decoding of the rest of the file continues.
//! - **Transport errors** (`Transport`, `VersionMarker`, `Timeout`): one
//!   downloadable could not be refreshed. Sibling downloads are unaffected and
//!   the failures of a fetch cycle are aggregated into `Fetch`.
//! - **Offline errors** (`Offline`): the directory is unreachable and no
//!   previous snapshot can be served.
//! - **Identity errors** (`Identity`, `InvalidTarget`): the ticket or the
//!   requested object cannot be used for this resolution.
//!
//! The `Result` type alias is used throughout the library.

use thiserror::Error;

/// Main error type for gpo-resolver operations
#[derive(Error, Debug)]
pub enum Error {
    /// A `Registry.pol` stream is malformed and cannot be decoded at all.
    #[error("Invalid policy file: {message}")]
    PolicyFormat { message: String },

    /// A single entry could not be decoded. Decoding of the file continues.
    #[error("Can't decode entry {key}: {message}")]
    EntryDecode { key: String, message: String },

    /// The remote tree could not be reached or read.
    #[error("Transport error for {url}: {message}")]
    Transport { url: String, message: String },

    /// A `GPT.INI` version marker is missing or unparsable.
    #[error("Invalid version marker {path}: {message}")]
    VersionMarker { path: String, message: String },

    /// The transfer deadline of a fetch cycle was exceeded.
    #[error("Transfer of {url} timed out after {seconds}s")]
    Timeout { url: String, seconds: u64 },

    /// One or more downloadables failed during a fetch cycle.
    ///
    /// Each failure is kept with the name of the downloadable it belongs to.
    #[error("One or more errors while fetching GPOs and assets: {}", format_failures(.failures))]
    Fetch { failures: Vec<(String, Error)> },

    /// The directory is unreachable and no cached policies can be used.
    #[error("Machine is offline and policies cache for {object} is unavailable: {message}")]
    Offline { object: String, message: String },

    /// The Kerberos ticket for an identity is missing or unusable.
    #[error("Identity error for {object}: {message}")]
    Identity { object: String, message: String },

    /// The requested object name doesn't match its object class.
    #[error("Invalid target {target}: {message}")]
    InvalidTarget { target: String, message: String },

    /// The list of GPOs provided by the directory listing is malformed.
    #[error("Invalid GPO listing: {message}")]
    Listing { message: String },

    /// The policies snapshot could not be loaded or saved.
    #[error("Policies snapshot error for {path}: {message}")]
    Snapshot { path: String, message: String },

    /// The assets bundle could not be compressed or attached.
    #[error("Assets error: {message}")]
    Assets { message: String },

    /// An error with the configuration of the resolver.
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// An error indicating that a mutex or other lock has been poisoned.
    #[error("Lock poisoned: {context}")]
    LockPoisoned { context: String },

    /// An I/O error, wrapped from `std::io::Error`.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A JSON parsing error, wrapped from `serde_json::Error`.
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    /// A YAML parsing error, wrapped from `serde_yaml::Error`.
    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// A URL parsing error, wrapped from `url::ParseError`.
    #[error("URL parsing error: {0}")]
    UrlParse(#[from] url::ParseError),

    /// A zip archive error, wrapped from `zip::result::ZipError`.
    #[error("Zip archive error: {0}")]
    Zip(#[from] zip::result::ZipError),
}

fn format_failures(failures: &[(String, Error)]) -> String {
    failures
        .iter()
        .map(|(name, e)| format!("can't download {:?}: {}", name, e))
        .collect::<Vec<_>>()
        .join("; ")
}

/// A convenient type alias for `Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Builds a `PolicyFormat` error from anything displayable.
    pub(crate) fn format(message: impl Into<String>) -> Self {
        Error::PolicyFormat {
            message: message.into(),
        }
    }

    /// Builds a `LockPoisoned` error for the given lock description.
    pub(crate) fn poisoned(context: &str) -> Self {
        Error::LockPoisoned {
            context: context.to_string(),
        }
    }
}
