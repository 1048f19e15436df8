//! Store endpoint identity

use std::fmt;

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC};

use crate::{Error, Result};

/// Unreserved characters (RFC 3986) stay literal in a path segment
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Address and optional credential of one collection store.
///
/// Built once from settings at startup and never mutated afterwards.
#[derive(Clone, PartialEq, Eq)]
pub struct StoreEndpoint {
    base_url: String,
    api_key: Option<String>,
}

impl StoreEndpoint {
    /// Create an endpoint.
    ///
    /// A trailing `/` is dropped from `base_url`, and an empty credential is
    /// treated as no credential at all.
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Result<Self> {
        let base_url = base_url.into().trim().trim_end_matches('/').to_string();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(Error::InvalidUrl {
                url: base_url,
                message: "expected an http:// or https:// URL".to_string(),
            });
        }

        let api_key = api_key.filter(|key| !key.trim().is_empty());
        Ok(Self { base_url, api_key })
    }

    /// Base URL without trailing slash
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Credential sent as the `api-key` header, if any
    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref()
    }

    /// `{base}/collections`
    pub fn collections_url(&self) -> String {
        format!("{}/collections", self.base_url)
    }

    /// `{base}/collections/{name}`, with `name` encoded as a single path segment
    pub fn collection_url(&self, name: &str) -> String {
        let encoded = percent_encoding::utf8_percent_encode(name, PATH_SEGMENT);
        format!("{}/collections/{}", self.base_url, encoded)
    }
}

impl fmt::Debug for StoreEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreEndpoint")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl fmt::Display for StoreEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.base_url)
    }
}
