//! Stable request-identity keys for caching and deduplication.
//!
//! Two requests that differ only in parameter ordering must produce the
//! same key, so parameters are serialized key-sorted. The wire shape is
//! `target::k1=v1&k2=v2`; a request without parameters keys as the bare
//! target. Existing stores depend on this exact shape, keep it stable.

use std::collections::BTreeMap;

/// Build the identity key for a request against `target` with the given
/// disambiguating parameters
///
/// Duplicate parameter names collapse to the last value provided.
pub fn request_key<I, K, V>(target: &str, params: I) -> String
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    let sorted: BTreeMap<String, String> =
        params.into_iter().map(|(k, v)| (k.into(), v.into())).collect();

    if sorted.is_empty() {
        return target.to_string();
    }

    let serialized = sorted
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&");

    format!("{target}::{serialized}")
}
