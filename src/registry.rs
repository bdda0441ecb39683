//! # Registry.pol decoder
//!
//! Decodes the binary registry policy format carried by each GPO into typed
//! [`Entry`] values.
//!
//! ## Format
//!
//! The file starts with an 8 bytes header (signature `PReg` and version 1,
//! both little endian 32 bits integers), followed by UTF-16LE records:
//!
//! ```text
//! [key;value;type;size;data]
//! ```
//!
//! Fields are separated by a NUL character followed by `;`. A record ends
//! with a NUL character followed by `]`, or with `;]` when the data field is
//! empty.
//!
//! ## Reserved value names
//!
//! - `**del.<name>` marks the entry as disabled.
//! - `metaValues` (string type only) is a JSON object describing, for each
//!   sibling value name, its empty default value, its metadata and its merge
//!   strategy. A `DISABLED` key in that object disables every sibling.
//! - `basic` (string type only) describes a policy without children. It is
//!   emitted as a single `all` entry.
//!
//! Errors on a single entry (empty value name, unsupported type) are returned
//! as [`EntryError`] in place of the entry and don't stop decoding.

use std::collections::HashMap;
use std::io::Read;

use serde::Deserialize;

use crate::entry::{DecodedEntry, Entry, EntryError, Strategy};
use crate::error::{Error, Result};

const SIGNATURE: i32 = 0x6765_5250;
const VERSION: i32 = 1;
const HEADER_LEN: usize = 8;

/* From winnt.h */
const REG_SZ: u8 = 1;
const REG_DWORD: u8 = 4;
const REG_MULTI_SZ: u8 = 7;

const SECTION_START: &[u8] = b"[\x00";
const SECTION_END: &[u8] = b"\x00\x00]\x00";
const SECTION_END_EMPTY_DATA: &[u8] = b";\x00]\x00";
const FIELD_DELIMITER: &[u8] = b"\x00\x00;\x00";

const DISABLED_PREFIX: &str = "**del.";
const CONTAINER_NAME: &str = "metaValues";
const NO_CHILDREN_NAME: &str = "basic";
const DISABLED_MARKER: &str = "DISABLED";

/// Raw record as read from the file, before type interpretation.
#[derive(Debug, Clone, PartialEq, Eq)]
struct RawEntry {
    path: String,
    key: String,
    data_type: u8,
    data: Vec<u8>,
    /// Soft error found while reading the record.
    soft_error: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct MetaValue {
    #[serde(rename = "Empty", alias = "empty", default)]
    empty: String,
    #[serde(rename = "Meta", alias = "meta", default)]
    meta: String,
    #[serde(rename = "Strategy", alias = "strategy", default)]
    strategy: Strategy,
}

/// Metadata of the policy currently being decoded.
#[derive(Debug, Default)]
struct Container {
    path: String,
    values: HashMap<String, MetaValue>,
    disabled: bool,
}

impl Container {
    fn meta_for(&self, path: &str, key: &str) -> Option<&MetaValue> {
        if self.path != path {
            return None;
        }
        self.values.get(key)
    }

    fn disables(&self, path: &str) -> bool {
        self.disabled && self.path == path
    }
}

/// Decodes a policy stream, see [`decode_policy`].
pub fn decode_policy_from<R: Read>(mut r: R) -> Result<Vec<DecodedEntry>> {
    let mut data = Vec::new();
    r.read_to_end(&mut data)?;
    decode_policy(&data)
}

/// Decodes the content of a `Registry.pol` file.
///
/// Fatal format errors abort the whole decoding. Entries which can't be
/// decoded on their own are returned as `Err` at their position.
pub fn decode_policy(data: &[u8]) -> Result<Vec<DecodedEntry>> {
    let raw_entries = read_policy(data)?;

    let mut entries = Vec::with_capacity(raw_entries.len());
    let mut container = Container::default();

    for mut e in raw_entries {
        let mut disabled = false;
        if let Some(key) = e.key.strip_prefix(DISABLED_PREFIX) {
            e.key = key.to_string();
            disabled = true;
        }

        let name = e.key.clone();
        match name.as_str() {
            CONTAINER_NAME => {
                // Other policies may use the same name with other types,
                // those keep the current meta values
                if e.data_type != REG_SZ {
                    container.disabled = disabled;
                    continue;
                }
                container = Container {
                    path: e.path.clone(),
                    values: meta_values(&e.data, &e.path, &e.key)?,
                    disabled,
                };
                if container.values.contains_key(DISABLED_MARKER) {
                    container.disabled = true;
                }
                continue;
            }
            NO_CHILDREN_NAME => {
                container = Container {
                    path: e.path.clone(),
                    ..Default::default()
                };
                if e.data_type != REG_SZ {
                    continue;
                }
                container.values = meta_values(&e.data, &e.path, &e.key)?;
                if container.values.contains_key(DISABLED_MARKER) {
                    disabled = true;
                }
                // Single key applying to every release, without value
                e.key = "all".to_string();
                e.data.clear();
            }
            _ => {
                if container.disables(&e.path) {
                    disabled = true;
                }
            }
        }

        let meta = container.meta_for(&e.path, &e.key).cloned().unwrap_or_default();
        let key = join_key(&e.path.replace('\\', "/"), &e.key);

        let mut value = String::new();
        let mut soft_error = e.soft_error.take();
        if !disabled {
            match e.data_type {
                REG_SZ | REG_MULTI_SZ => {
                    value = decode_utf16(&e.data)?;
                    if value.is_empty() {
                        value = meta.empty.clone();
                    }
                    // Lines of multi lines text boxes are separated by NUL
                    if e.data_type == REG_MULTI_SZ {
                        value = value.replace('\0', "\n");
                    }
                }
                REG_DWORD => {
                    let bytes: [u8; 4] = e
                        .data
                        .get(..4)
                        .and_then(|b| b.try_into().ok())
                        .ok_or_else(|| {
                            Error::format(format!("invalid 32 bits integer value for {}", key))
                        })?;
                    value = u32::from_le_bytes(bytes).to_string();
                }
                t => {
                    soft_error.get_or_insert(format!("{} type is not supported", t));
                }
            }
        }

        let entry = Entry {
            key,
            value,
            disabled,
            meta: meta.meta,
            strategy: meta.strategy,
        };
        match soft_error {
            None => entries.push(Ok(entry)),
            Some(message) => entries.push(Err(EntryError {
                error: Error::EntryDecode {
                    key: entry.key.clone(),
                    message,
                },
                entry,
            })),
        }
    }

    Ok(entries)
}

/// Joins a registry path and value name like a cleaned filesystem path.
fn join_key(path: &str, key: &str) -> String {
    let path = path.trim_end_matches('/');
    if key.is_empty() {
        return path.to_string();
    }
    format!("{}/{}", path, key)
}

/// Reads the meta values JSON object of a container or basic policy.
fn meta_values(data: &[u8], path: &str, key: &str) -> Result<HashMap<String, MetaValue>> {
    let content = decode_utf16(data)?;
    if content.trim().is_empty() {
        return Ok(HashMap::new());
    }
    serde_json::from_str(&content).map_err(|e| {
        Error::format(format!(
            "can't decode meta value for {}\\{}: {}",
            path, key, e
        ))
    })
}

fn read_policy(data: &[u8]) -> Result<Vec<RawEntry>> {
    if data.is_empty() {
        return Err(Error::format("empty file"));
    }
    if data.len() < HEADER_LEN {
        return Err(Error::format("file header is truncated"));
    }
    let signature = i32::from_le_bytes([data[0], data[1], data[2], data[3]]);
    let version = i32::from_le_bytes([data[4], data[5], data[6], data[7]]);
    if signature != SIGNATURE || version != VERSION {
        return Err(Error::format(format!(
            "file header: {:x}{:x}",
            signature, version
        )));
    }

    let mut entries = Vec::new();
    let mut rest = &data[HEADER_LEN..];
    while !rest.is_empty() {
        let (record, advance) = next_record(rest)?;
        entries.push(parse_record(record)?);
        rest = &rest[advance..];
    }

    Ok(entries)
}

/// Finds the next `[...]` record, returning its content and how far to advance.
///
/// The content keeps the two bytes preceding `]`: either the NUL terminating
/// the data, or the `;` of an empty data field.
fn next_record(data: &[u8]) -> Result<(&[u8], usize)> {
    let start = find(data, SECTION_START, 0)
        .ok_or_else(|| Error::format("item does not start with '['"))?;
    let body = start + SECTION_START.len();

    let mut i = body;
    while i + SECTION_END.len() <= data.len() {
        let window = &data[i..i + SECTION_END.len()];
        if window == SECTION_END || window == SECTION_END_EMPTY_DATA {
            return Ok((&data[body..i + 2], i + SECTION_END.len()));
        }
        i += 1;
    }

    Err(Error::format("item does not end with ']'"))
}

fn parse_record(record: &[u8]) -> Result<RawEntry> {
    let fields = split_n(record, FIELD_DELIMITER, 5);
    if fields.len() != 5 {
        return Err(Error::format(format!(
            "item should contains 5 fields separated by ';': {}",
            String::from_utf8_lossy(record)
        )));
    }

    let path = decode_utf16(fields[0])?;
    let key = decode_utf16(fields[1])?;
    if path.is_empty() {
        return Err(Error::format(format!(
            "empty key in {}",
            String::from_utf8_lossy(record)
        )));
    }
    let soft_error = key.is_empty().then(|| format!("empty value name in {}", path));

    // Only the low bytes of the type are kept by the delimiter split
    let data_type = match fields[2] {
        [t, _] => *t,
        t => return Err(Error::format(format!("invalid type: {:?}", t))),
    };

    Ok(RawEntry {
        path,
        key,
        data_type,
        data: fields[4].to_vec(),
        soft_error,
    })
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if haystack.len() < needle.len() {
        return None;
    }
    (from..=haystack.len() - needle.len()).find(|&i| &haystack[i..i + needle.len()] == needle)
}

/// Splits `data` on `delimiter`, returning at most `n` fields.
fn split_n<'a>(data: &'a [u8], delimiter: &[u8], n: usize) -> Vec<&'a [u8]> {
    let mut fields = Vec::with_capacity(n);
    let mut rest = data;
    while fields.len() + 1 < n {
        match find(rest, delimiter, 0) {
            Some(i) => {
                fields.push(&rest[..i]);
                rest = &rest[i + delimiter.len()..];
            }
            None => break,
        }
    }
    fields.push(rest);
    fields
}

/// Decodes UTF-16LE bytes, dropping a single trailing NUL.
fn decode_utf16(b: &[u8]) -> Result<String> {
    if b.len() % 2 != 0 {
        return Err(Error::format(format!(
            "{:x?} is not a valid UTF-16 string",
            b
        )));
    }
    let mut units: Vec<u16> = b
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect();
    if units.last() == Some(&0) {
        units.pop();
    }
    String::from_utf16(&units).map_err(|e| Error::format(format!("invalid UTF-16 string: {}", e)))
}

/// Builds `Registry.pol` content in tests.
#[cfg(test)]
pub(crate) mod testutil {
    pub fn utf16(s: &str) -> Vec<u8> {
        s.encode_utf16().flat_map(|u| u.to_le_bytes()).collect()
    }

    pub fn header() -> Vec<u8> {
        let mut b = Vec::new();
        b.extend_from_slice(&0x6765_5250_i32.to_le_bytes());
        b.extend_from_slice(&1_i32.to_le_bytes());
        b
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

    /// Encodes a NUL terminated string record.
    pub fn string(path: &str, key: &str, value: &str) -> Vec<u8> {
        record(path, key, 1, &utf16(&format!("{}\0", value)))
    }

    pub fn dword(path: &str, key: &str, value: u32) -> Vec<u8> {
        record(path, key, 4, &value.to_le_bytes())
    }

    pub fn policy(records: &[Vec<u8>]) -> Vec<u8> {
        let mut b = header();
        for r in records {
            b.extend_from_slice(r);
        }
        b
    }
}
