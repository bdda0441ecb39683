//! Policy entries and GPOs
//!
//! An [`Entry`] is one key/value setting targeting a policy domain (dconf,
//! apparmor, privilege, scripts, mount…). A [`Gpo`] groups the entries of one
//! Group Policy Object by domain. Both are immutable once a GPO has been
//! decoded and are serialized as part of the policies snapshot.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::io::{self, Write};

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::Error;

/// How entries for the same key coming from several GPOs are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// The highest priority GPO defining the key wins.
    #[default]
    Override,
    /// Values of every enabled GPO are concatenated, highest priority first.
    Append,
}

impl Strategy {
    /// Parses a strategy name. Anything but `append` means override.
    pub fn from_name(name: &str) -> Self {
        if name.eq_ignore_ascii_case("append") {
            Strategy::Append
        } else {
            Strategy::Override
        }
    }
}

impl<'de> Deserialize<'de> for Strategy {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = Option::<String>::deserialize(deserializer)?;
        Ok(name.map(|n| Strategy::from_name(&n)).unwrap_or_default())
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::Override => write!(f, "override"),
            Strategy::Append => write!(f, "append"),
        }
    }
}

/// A key/value based policy entry
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Entry {
    /// Slash separated path to the setting, relative to its domain once
    /// resolved. Ex: `org/gnome/desktop/background/picture-uri`
    pub key: String,
    #[serde(default)]
    pub value: String,
    /// The setting is explicitly removed, which is different from absent.
    #[serde(default)]
    pub disabled: bool,
    /// Opaque UI/defaulting metadata, usually JSON.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub meta: String,
    #[serde(default)]
    pub strategy: Strategy,
}

impl Entry {
    /// Creates an enabled override entry.
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            ..Default::default()
        }
    }

    /// Marks this entry as disabled.
    pub fn disabled(mut self) -> Self {
        self.disabled = true;
        self
    }

    /// Sets the merge strategy of this entry.
    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Sets the metadata of this entry.
    pub fn with_meta(mut self, meta: impl Into<String>) -> Self {
        self.meta = meta.into();
        self
    }
}

/// An entry which could only be partially decoded.
///
/// The decoded fields are kept so that callers can report which key was
/// affected, but such entries never reach the merge engine.
#[derive(Debug)]
pub struct EntryError {
    pub entry: Entry,
    pub error: Error,
}

impl fmt::Display for EntryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)
    }
}

impl std::error::Error for EntryError {}

/// Result of decoding one record of a policy file.
pub type DecodedEntry = std::result::Result<Entry, EntryError>;

/// A Group Policy Object with the rules we support, grouped by domain.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Gpo {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub rules: BTreeMap<String, Vec<Entry>>,
}

impl Gpo {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            rules: BTreeMap::new(),
        }
    }

    /// Adds rules for a domain, keeping any rule already present.
    pub fn with_rules(mut self, domain: &str, entries: Vec<Entry>) -> Self {
        self.rules.entry(domain.to_string()).or_default().extend(entries);
        self
    }

    /// Writes a human readable dump of the GPO to `w`.
    ///
    /// Keys already present in `already_processed` are considered overridden
    /// by a higher priority GPO: they are skipped unless `with_overridden` is
    /// set, in which case they are prefixed with `-`. Disabled keys are
    /// prefixed with `+` and printed without value. The returned set must be
    /// passed to the next (lower priority) GPO.
    pub fn format<W: Write>(
        &self,
        w: &mut W,
        with_rules: bool,
        with_overridden: bool,
        mut already_processed: HashSet<String>,
    ) -> io::Result<HashSet<String>> {
        writeln!(w, "* {} ({})", self.name, self.id)?;

        if !with_rules {
            return Ok(already_processed);
        }

        for (domain, entries) in &self.rules {
            writeln!(w, "** {}:", domain)?;
            for e in entries {
                let k = format!("{}/{}", domain, e.key);
                let overridden = already_processed.contains(&k);
                if !with_overridden && overridden {
                    continue;
                }
                let mut prefix = String::from("***");
                if overridden {
                    prefix.push('-');
                }
                if e.disabled {
                    prefix.push('+');
                    writeln!(w, "{} {}", prefix, e.key)?;
                } else {
                    // One line per value
                    let v = e.value.trim().replace('\n', r"\n");
                    writeln!(w, "{} {}: {}", prefix, e.key, v)?;
                }

                if e.strategy == Strategy::Append {
                    continue;
                }
                already_processed.insert(k);
            }
        }

        Ok(already_processed)
    }
}
