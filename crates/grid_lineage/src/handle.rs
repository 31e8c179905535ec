//! Edit-handle codec.
//!
//! A handle is URL-safe base64 (no padding) over the byte string
//! `schema.table|col1=val1,col2=val2,…`. It deterministically identifies one
//! row of one base table, and round-trips to the decoded target. Separator
//! characters (`|`, `=`, `,`) inside values are not escaped; primary-key
//! values are expected to be plain text.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;

use crate::error::{LineageError, Result};

/// Decoded edit target: one row of one base table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditTarget {
    pub schema: String,
    pub table: String,
    /// Primary-key columns with their string-rendered values, preserving the
    /// order they were encoded in. Values decode as strings; their SQL type
    /// is recovered at update time by the database.
    pub keys: Vec<(String, String)>,
}

impl EditTarget {
    /// The `schema.table` form used in catalog lookups.
    pub fn qualified(&self) -> String {
        format!("{}.{}", self.schema, self.table)
    }
}

/// Encodes an edit handle from an ordered primary-key tuple.
pub fn encode_handle(schema: &str, table: &str, pk_cols: &[String], pk_vals: &[String]) -> String {
    let pairs: Vec<String> = pk_cols
        .iter()
        .zip(pk_vals.iter())
        .map(|(col, val)| format!("{col}={val}"))
        .collect();
    let raw = format!("{schema}.{table}|{}", pairs.join(","));
    URL_SAFE_NO_PAD.encode(raw.as_bytes())
}

/// Decodes a handle produced by [`encode_handle`].
pub fn decode_handle(handle: &str) -> Result<EditTarget> {
    let bytes = URL_SAFE_NO_PAD
        .decode(handle.as_bytes())
        .map_err(|err| LineageError::Handle(format!("invalid base64: {err}")))?;
    let raw = String::from_utf8(bytes)
        .map_err(|_| LineageError::Handle("handle is not valid utf-8".to_string()))?;

    let (target, key_part) = raw
        .split_once('|')
        .ok_or_else(|| LineageError::Handle("malformed handle".to_string()))?;
    let (schema, table) = target
        .split_once('.')
        .ok_or_else(|| LineageError::Handle("malformed table path".to_string()))?;

    let mut keys = Vec::new();
    for pair in key_part.split(',') {
        if pair.is_empty() {
            continue;
        }
        let Some((col, val)) = pair.split_once('=') else {
            continue;
        };
        keys.push((col.trim().to_string(), val.trim().to_string()));
    }

    Ok(EditTarget {
        schema: schema.to_string(),
        table: table.to_string(),
        keys,
    })
}
