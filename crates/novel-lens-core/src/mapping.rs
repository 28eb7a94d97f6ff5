//! Raw → canonical identifier mapping.
//!
//! Listing cards expose only a host-assigned *raw* id, while the review and
//! detail APIs require the *canonical* ("serie") id. The page ships an
//! embedded JSON payload (`__NEXT_DATA__`) from which the pairs can be read,
//! and client-side navigation can refresh them from the framework's data
//! endpoint. Two page types carry the pairs under different shapes:
//!
//! | Page type | Array | Raw field | Canonical field |
//! |-----------|-------|-----------|-----------------|
//! | feed ("for you") | `pageProps.list` | `raw_id` | `serie_id` |
//! | finder / search  | `pageProps.series` | `raw_id` | `id` |
//!
//! Ids may arrive as JSON numbers or strings; both are stored as strings.
//! Canonical ids are only trusted for network use once they pass
//! [`validate_entry`].

use std::collections::HashMap;

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use url::Url;

/// Lifecycle of the identifier map within one page context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappingState {
    Empty,
    Building,
    Populated,
    Failed,
}

#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("embedded payload element not found")]
    Missing,
    #[error("payload is not valid JSON: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("payload has no pageProps")]
    NoPageProps,
    #[error("payload contained no raw/canonical pairs")]
    NoPairs,
}

/// Mapping from raw id to canonical id.
///
/// Entries are only ever added; a later pair for the same raw id replaces
/// the earlier value.
#[derive(Debug, Clone, Default)]
pub struct IdentifierMap {
    entries: HashMap<String, String>,
}

impl IdentifierMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge pairs into the map, returning how many were applied.
    pub fn merge<I>(&mut self, pairs: I) -> usize
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut n = 0;
        for (raw, canonical) in pairs {
            self.entries.insert(raw, canonical);
            n += 1;
        }
        n
    }

    pub fn lookup(&self, raw_id: &str) -> Option<&str> {
        self.entries.get(raw_id).map(String::as_str)
    }

    pub fn has(&self, raw_id: &str) -> bool {
        self.entries.contains_key(raw_id)
    }

    pub fn size(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries sorted by raw id, for stable display.
    pub fn sorted_entries(&self) -> Vec<(&str, &str)> {
        let mut v: Vec<(&str, &str)> = self
            .entries
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        v.sort();
        v
    }
}

/// Check that a resolved canonical id is safe to put into a request URL.
///
/// Rejects a missing or empty value and anything that is not a pure
/// decimal-digit string, whatever the raw id is.
///
/// ```rust
/// use novel_lens_core::mapping::validate_entry;
///
/// assert!(validate_entry("abc", Some("12345")));
/// assert!(!validate_entry("abc", Some("12a45")));
/// assert!(!validate_entry("abc", None));
/// ```
pub fn validate_entry(_raw_id: &str, canonical_id: Option<&str>) -> bool {
    match canonical_id {
        Some(id) if !id.is_empty() => id.bytes().all(|b| b.is_ascii_digit()),
        _ => false,
    }
}

/// What one payload yielded: the framework build id (embedded payload only)
/// and the well-formed pairs found under either list shape.
#[derive(Debug, Clone, Default)]
pub struct PayloadPairs {
    pub build_id: Option<String>,
    pub pairs: Vec<(String, String)>,
}

#[derive(Deserialize)]
struct EmbeddedPayload {
    #[serde(rename = "buildId")]
    build_id: Option<String>,
    props: Option<Value>,
}

/// Parse the text of the embedded page payload.
///
/// # Errors
///
/// [`PayloadError::Malformed`] for invalid JSON, [`PayloadError::NoPageProps`]
/// when `props.pageProps` is absent, and [`PayloadError::NoPairs`] when
/// neither list shape produced a single well-formed pair.
pub fn parse_embedded_payload(text: &str) -> Result<PayloadPairs, PayloadError> {
    let payload: EmbeddedPayload = serde_json::from_str(text)?;
    let page_props = payload
        .props
        .as_ref()
        .and_then(|p| p.get("pageProps"))
        .ok_or(PayloadError::NoPageProps)?;

    let pairs = extract_pairs(page_props);
    if pairs.is_empty() {
        return Err(PayloadError::NoPairs);
    }
    Ok(PayloadPairs {
        build_id: payload.build_id,
        pairs,
    })
}

/// Parse a response from the framework's data endpoint.
///
/// The endpoint normally answers with `pageProps` at the top level; a body
/// shaped like the embedded payload (`props.pageProps`) is accepted too.
pub fn parse_data_payload(body: &str) -> Result<PayloadPairs, PayloadError> {
    let value: Value = serde_json::from_str(body)?;
    let page_props = value
        .get("pageProps")
        .or_else(|| value.get("props").and_then(|p| p.get("pageProps")))
        .ok_or(PayloadError::NoPageProps)?;

    let pairs = extract_pairs(page_props);
    if pairs.is_empty() {
        return Err(PayloadError::NoPairs);
    }
    Ok(PayloadPairs {
        build_id: None,
        pairs,
    })
}

/// Collect well-formed pairs from both known list shapes.
pub fn extract_pairs(page_props: &Value) -> Vec<(String, String)> {
    let mut pairs = Vec::new();

    if let Some(series) = page_props.get("series").and_then(Value::as_array) {
        for item in series {
            if let (Some(raw), Some(canonical)) = (id_field(item, "raw_id"), id_field(item, "id")) {
                pairs.push((raw, canonical));
            }
        }
    }

    if let Some(list) = page_props.get("list").and_then(Value::as_array) {
        for item in list {
            if let (Some(raw), Some(canonical)) =
                (id_field(item, "raw_id"), id_field(item, "serie_id"))
            {
                pairs.push((raw, canonical));
            }
        }
    }

    pairs
}

/// Read an id field as a string. Empty strings and zero count as absent.
fn id_field(item: &Value, key: &str) -> Option<String> {
    match item.get(key)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) if n.as_u64() != Some(0) && n.as_f64() != Some(0.0) => Some(n.to_string()),
        _ => None,
    }
}

/// Derive the framework data-endpoint URL for a page.
///
/// `https://host/en/for-you/?page=2` with build id `abc` becomes
/// `https://host/_next/data/abc/en/for-you.json?page=2`.
pub fn data_url(page_url: &str, build_id: &str) -> Option<String> {
    let url = Url::parse(page_url).ok()?;
    let origin = url.origin().ascii_serialization();
    let path = url.path().trim_end_matches('/');
    let query = url.query().map(|q| format!("?{}", q)).unwrap_or_default();
    Some(format!("{}/_next/data/{}{}.json{}", origin, build_id, path, query))
}
