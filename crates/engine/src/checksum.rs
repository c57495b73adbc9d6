//! Deterministic content identity for specs.
//!
//! A spec's resolved field values are rendered into a canonical text and digested with
//! SHA-256. The canonical text fixes every formatting choice that could otherwise vary:
//!
//! - fields appear in declaration order as `{"name": value, ...}`
//! - integers render in decimal, floats with the shortest round-trip form (`1.0`, `0.1`,
//!   `1e300`), `-0.0` renders as `0.0`, and every NaN renders as `nan`
//! - strings are JSON-escaped; paths render as `file("...")` / `dir("...")` (the path
//!   text, not the file contents); a path that is not valid UTF-8 renders its raw bytes
//!   in hex as `file(b"...")`, so distinct paths never collapse onto one text
//! - map keys are sorted
//!
//! Integers and floats render differently, so `1` and `1.0` never share a checksum.

use std::{fmt, fmt::Write as _, path::Path};

use flowcache_types::Value;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{error::ContractViolation, spec::Spec};

/// Hex-encoded digest identifying a spec (or a task, when prefixed with its kind).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Checksum(String);

impl Checksum {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Task identity: `<kind>_<spec checksum>`.
    pub fn for_task(kind: &str, spec_checksum: &Checksum) -> Self {
        Self(format!("{kind}_{}", spec_checksum.0))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.0)
    }
}

/// Compute the checksum of a fully resolved spec.
///
/// Composite specs digest the pair of their own field digest and the ordered checksums
/// of their sub-nodes, so their identity changes whenever any descendant changes.
pub fn compute_checksum(spec: &Spec) -> Result<Checksum, ContractViolation> {
    let values = spec.concrete_values()?;
    let own_digest = digest(&canonical_text(&values));

    let Some(sub_nodes) = spec.sub_nodes() else {
        return Ok(Checksum(own_digest));
    };

    let mut pair = String::new();
    write_json_string(&mut pair, &own_digest);
    let sub_node_list = sub_nodes
        .iter()
        .map(|checksum| {
            let mut quoted = String::new();
            write_json_string(&mut quoted, checksum.as_str());
            quoted
        })
        .collect::<Vec<_>>()
        .join(", ");
    Ok(Checksum(digest(&format!("({pair}, [{sub_node_list}])"))))
}

/// Canonical text of an ordered field mapping.
pub fn canonical_text(fields: &IndexMap<String, Value>) -> String {
    let mut text = String::from("{");
    for (index, (name, value)) in fields.iter().enumerate() {
        if index > 0 {
            text.push_str(", ");
        }
        write_json_string(&mut text, name);
        text.push_str(": ");
        write_value(&mut text, value);
    }
    text.push('}');
    text
}

/// Lowercase hex SHA-256 of `text`.
pub fn digest(text: &str) -> String {
    format!("{:x}", Sha256::digest(text.as_bytes()))
}

fn write_value(text: &mut String, value: &Value) {
    match value {
        Value::None => text.push_str("null"),
        Value::Bool(flag) => text.push_str(if *flag { "true" } else { "false" }),
        Value::Int(number) => {
            let _ = write!(text, "{number}");
        }
        Value::Float(number) => text.push_str(&canonical_float(*number)),
        Value::Str(string) => write_json_string(text, string),
        Value::File(path) => write_path(text, "file", path),
        Value::Directory(path) => write_path(text, "dir", path),
        Value::List(items) => {
            text.push('[');
            for (index, item) in items.iter().enumerate() {
                if index > 0 {
                    text.push_str(", ");
                }
                write_value(text, item);
            }
            text.push(']');
        }
        Value::Map(entries) => {
            text.push('{');
            for (index, (key, item)) in entries.iter().enumerate() {
                if index > 0 {
                    text.push_str(", ");
                }
                write_json_string(text, key);
                text.push_str(": ");
                write_value(text, item);
            }
            text.push('}');
        }
    }
}

fn write_path(text: &mut String, tag: &str, path: &Path) {
    text.push_str(tag);
    text.push('(');
    match path.to_str() {
        Some(utf8) => write_json_string(text, utf8),
        None => {
            text.push_str("b\"");
            for byte in path.as_os_str().as_encoded_bytes() {
                let _ = write!(text, "{byte:02x}");
            }
            text.push('"');
        }
    }
    text.push(')');
}

fn canonical_float(number: f64) -> String {
    if number.is_nan() {
        return "nan".to_string();
    }
    if number == 0.0 {
        return "0.0".to_string();
    }
    format!("{number:?}")
}

fn write_json_string(text: &mut String, raw: &str) {
    // serializing a str to JSON cannot fail
    match serde_json::to_string(raw) {
        Ok(quoted) => text.push_str(&quoted),
        Err(_) => {
            let _ = write!(text, "{raw:?}");
        }
    }
}
