//! Song identity for duplicate suppression: a stable hash of either a
//! normalized URL or the raw bytes of an uploaded file.

use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// Known tracking query parameters stripped before hashing. Not exhaustive;
/// the point is to treat `?utm_source=...` variants of the same URL as the
/// same song, not to build a comprehensive tracker blocklist.
const TRACKING_PARAMS: &[&str] = &[
    "utm_source",
    "utm_medium",
    "utm_campaign",
    "utm_term",
    "utm_content",
    "si",
    "feature",
];

/// Strips query junk, lower-cases the host, and drops a trailing slash so
/// that equivalent URLs hash identically.
pub fn normalize_url(raw: &str) -> Result<String> {
    let mut url =
        url::Url::parse(raw).map_err(|e| Error::BadInput(format!("invalid url: {e}")))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(Error::BadInput(format!(
            "unsupported url scheme: {}",
            url.scheme()
        )));
    }

    url.set_fragment(None);

    let host = url
        .host_str()
        .ok_or_else(|| Error::BadInput("url has no host".to_string()))?
        .to_lowercase();
    url.set_host(Some(&host))
        .map_err(|e| Error::BadInput(format!("invalid host: {e}")))?;

    let retained_pairs: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !TRACKING_PARAMS.contains(&k.as_ref()))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    if retained_pairs.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(&retained_pairs);
    }

    let mut normalized = url.to_string();
    if normalized.ends_with('/') && url.path() == "/" {
        normalized.pop();
    }
    Ok(normalized)
}

/// Fingerprint of a URL-sourced song: sha256 of the normalized URL.
pub fn fingerprint_url(raw: &str) -> Result<String> {
    let normalized = normalize_url(raw)?;
    Ok(hex::encode(Sha256::digest(normalized.as_bytes())))
}

/// Fingerprint of an uploaded file: sha256 of its raw content.
#[must_use]
pub fn fingerprint_bytes(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_tracking_params_and_lowercases_host() {
        let a = normalize_url("https://Example.COM/track?utm_source=x&id=42").unwrap();
        let b = normalize_url("https://example.com/track?id=42").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn normalize_drops_fragment() {
        let a = normalize_url("https://example.com/track?id=42#t=30").unwrap();
        let b = normalize_url("https://example.com/track?id=42").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn normalize_rejects_non_http_scheme() {
        assert!(normalize_url("ftp://example.com/x").is_err());
    }

    #[test]
    fn fingerprint_is_stable_for_equivalent_urls() {
        let a = fingerprint_url("https://Example.com/track?utm_source=x&id=42").unwrap();
        let b = fingerprint_url("https://example.com/track?id=42").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn fingerprint_differs_for_different_urls() {
        let a = fingerprint_url("https://example.com/a").unwrap();
        let b = fingerprint_url("https://example.com/b").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn byte_fingerprint_is_content_addressed() {
        assert_eq!(fingerprint_bytes(b"hello"), fingerprint_bytes(b"hello"));
        assert_ne!(fingerprint_bytes(b"hello"), fingerprint_bytes(b"world"));
    }
}
