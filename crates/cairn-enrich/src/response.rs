//! Tolerant parsing of enrichment replies.
//!
//! Providers are asked for a bare JSON array, but replies often wrap it in
//! prose or a fenced block. The whole reply is tried first; failing that, the
//! top-level `[...]` spans in the text are tried in order. Records inside the
//! array that do not have the expected shape are dropped one by one.

use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use crate::error::ParseResponseError;

/// One node's enrichment as returned by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EnrichmentRecord {
    pub node_id: String,
    pub summary: String,
    #[serde(default)]
    pub risks: Vec<String>,
}

/// Extract the records from a reply.
///
/// Fails only when no JSON array can be found at all. Malformed entries
/// within a found array are logged and skipped.
pub fn parse_reply(reply: &str) -> Result<Vec<EnrichmentRecord>, ParseResponseError> {
    let reply = reply.trim();
    if reply.is_empty() {
        return Err(ParseResponseError::Empty);
    }

    let items = serde_json::from_str::<Vec<Value>>(reply)
        .ok()
        .or_else(|| {
            array_spans(reply).find_map(|span| serde_json::from_str::<Vec<Value>>(span).ok())
        })
        .ok_or(ParseResponseError::NoArray)?;

    let records = items
        .into_iter()
        .enumerate()
        .filter_map(|(index, item)| match serde_json::from_value::<EnrichmentRecord>(item) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(index, error = %e, "Dropping malformed enrichment record");
                None
            }
        })
        .collect();
    Ok(records)
}

/// Top-level bracketed spans of `text`, in order of appearance.
///
/// Brackets inside JSON string literals do not count, so a summary that
/// mentions `a[i]` cannot end a span early. An unbalanced trailing span is
/// not returned.
fn array_spans(text: &str) -> impl Iterator<Item = &str> {
    let bytes = text.as_bytes();
    let mut pos = 0;

    std::iter::from_fn(move || {
        while pos < bytes.len() {
            let start = pos + bytes[pos..].iter().position(|&b| b == b'[')?;
            match matching_close(bytes, start) {
                Some(end) => {
                    pos = end + 1;
                    return Some(&text[start..=end]);
                }
                None => {
                    pos = bytes.len();
                }
            }
        }
        None
    })
}

/// Index of the `]` that closes the `[` at `start`.
fn matching_close(bytes: &[u8], start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &b) in bytes[start..].iter().enumerate() {
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'[' => depth += 1,
            b']' => {
                depth -= 1;
                if depth == 0 {
                    return Some(start + offset);
                }
            }
            _ => {}
        }
    }
    None
}
