//! Entry and chain hashing.
//!
//! `entry_hash = SHA-256(canonical {timestamp, event_type, data, previous_hash})`
//! `chain_hash = HMAC-SHA256(key, "{entry_hash}:{previous_chain_hash}")`,
//! or `entry_hash` itself for the first entry of a chain.

use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::{Digest, Sha256};

use super::{AuditError, AuditResult};

type HmacSha256 = Hmac<Sha256>;

/// JSON with object keys sorted at every level, no insignificant whitespace.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                if let Some(v) = map.get(*key) {
                    write_canonical(v, out);
                }
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

pub fn entry_hash(
    timestamp: &str,
    event_type: &str,
    data: &Value,
    previous_hash: Option<&str>,
) -> String {
    let body = serde_json::json!({
        "timestamp": timestamp,
        "event_type": event_type,
        "data": data,
        "previous_hash": previous_hash,
    });
    hex::encode(Sha256::digest(canonical_json(&body).as_bytes()))
}

pub fn chain_hash(key: &[u8], entry_hash: &str, previous_chain: Option<&str>) -> AuditResult<String> {
    let Some(previous) = previous_chain else {
        return Ok(entry_hash.to_string());
    };
    let mut mac = HmacSha256::new_from_slice(key).map_err(|_| AuditError::InvalidKey)?;
    mac.update(entry_hash.as_bytes());
    mac.update(b":");
    mac.update(previous.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}
