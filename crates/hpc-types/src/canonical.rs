//! Deterministic, order-preserving encoding used for heartbeat signatures
//! and usage-record content hashes.
//!
//! `serde_json`'s `Map` is a `BTreeMap` unless the `preserve_order`
//! feature is enabled, which would silently re-sort fields alphabetically
//! and break the signature/hash round-trip this module exists to
//! guarantee. Canonical values are therefore built and rendered by hand.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, SecondsFormat, Utc};

/// A value in the canonical encoding. Field order inside [`CanonicalValue::Object`]
/// is caller-determined (insertion order) and is never re-sorted.
#[derive(Debug, Clone)]
pub enum CanonicalValue {
    Str(String),
    Int(i64),
    UInt(u64),
    /// Rendered via `ryu`-free `{}` formatting — finite values only, no NaN/inf.
    Float(f64),
    Bool(bool),
    Bytes(Vec<u8>),
    Time(DateTime<Utc>),
    Array(Vec<CanonicalValue>),
    Object(Vec<(&'static str, CanonicalValue)>),
}

impl CanonicalValue {
    /// Render to the canonical compact-JSON text: declared field order,
    /// no whitespace, plain-decimal integers, RFC3339-nanosecond times,
    /// standard base64 byte arrays, absent optionals omitted by the caller
    /// before constructing the `Object`.
    pub fn to_canonical_string(&self) -> String {
        let mut out = String::new();
        self.write(&mut out);
        out
    }

    fn write(&self, out: &mut String) {
        match self {
            CanonicalValue::Str(s) => {
                out.push('"');
                escape_into(s, out);
                out.push('"');
            }
            CanonicalValue::Int(i) => out.push_str(&i.to_string()),
            CanonicalValue::UInt(u) => out.push_str(&u.to_string()),
            CanonicalValue::Float(f) => out.push_str(&format!("{f}")),
            CanonicalValue::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
            CanonicalValue::Bytes(b) => {
                out.push('"');
                out.push_str(&BASE64.encode(b));
                out.push('"');
            }
            CanonicalValue::Time(t) => {
                out.push('"');
                out.push_str(&t.to_rfc3339_opts(SecondsFormat::Nanos, true));
                out.push('"');
            }
            CanonicalValue::Array(items) => {
                out.push('[');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    item.write(out);
                }
                out.push(']');
            }
            CanonicalValue::Object(fields) => {
                out.push('{');
                for (i, (key, value)) in fields.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    out.push('"');
                    out.push_str(key);
                    out.push_str("\":");
                    value.write(out);
                }
                out.push('}');
            }
        }
    }
}

fn escape_into(s: &str, out: &mut String) {
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
    }
}

/// Types that can render themselves into the canonical encoding.
pub trait Canonicalize {
    fn to_canonical(&self) -> CanonicalValue;

    fn canonical_bytes(&self) -> Vec<u8> {
        self.to_canonical().to_canonical_string().into_bytes()
    }
}

/// Raw concatenation (no delimiter, no braces) used for the usage-record
/// content hash, per the field list declared in spec §6. Each atom is
/// rendered with the same primitive formatting rules as the JSON encoder.
pub fn concat_atoms(atoms: &[CanonicalValue]) -> Vec<u8> {
    let mut out = String::new();
    for atom in atoms {
        match atom {
            CanonicalValue::Str(s) => out.push_str(s),
            CanonicalValue::Int(i) => out.push_str(&i.to_string()),
            CanonicalValue::UInt(u) => out.push_str(&u.to_string()),
            CanonicalValue::Float(f) => out.push_str(&format!("{f}")),
            CanonicalValue::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
            CanonicalValue::Bytes(b) => out.push_str(&BASE64.encode(b)),
            CanonicalValue::Time(t) => out.push_str(&t.to_rfc3339_opts(SecondsFormat::Nanos, true)),
            CanonicalValue::Array(_) | CanonicalValue::Object(_) => {
                out.push_str(&atom.to_canonical_string())
            }
        }
    }
    out.into_bytes()
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    let digest = Sha256::digest(bytes);
    hex::encode(digest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_preserves_declared_order_not_alphabetical() {
        let v = CanonicalValue::Object(vec![
            ("zebra", CanonicalValue::Int(1)),
            ("alpha", CanonicalValue::Int(2)),
        ]);
        assert_eq!(v.to_canonical_string(), r#"{"zebra":1,"alpha":2}"#);
    }

    #[test]
    fn no_whitespace_between_tokens() {
        let v = CanonicalValue::Array(vec![CanonicalValue::Int(1), CanonicalValue::Int(2)]);
        assert_eq!(v.to_canonical_string(), "[1,2]");
    }

    #[test]
    fn concat_has_no_delimiters() {
        let atoms = vec![
            CanonicalValue::Str("a".into()),
            CanonicalValue::UInt(7),
            CanonicalValue::Str("b".into()),
        ];
        assert_eq!(concat_atoms(&atoms), b"a7b".to_vec());
    }
}
