//! Persisted cache entry model.

use bytes::Bytes;
use time::OffsetDateTime;

/// A stored response: status, headers, creation instant, and either a
/// colocated body or a pointer (`body_key_prefix`) to a split body entry.
///
/// `headers` preserves insertion order and repeats names for multi-value
/// headers; `Age` is never stored and is synthesized on serve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResponse {
    pub body_key_prefix: String,
    pub created: OffsetDateTime,
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Option<Bytes>,
}

/// A response body stored under its own key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResponseBody {
    pub body: Bytes,
}

/// Vary rules entry redirecting a base-key probe to a variant key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedVaryRules {
    pub vary_key_prefix: String,
    /// Normalized vary-by header names.
    pub headers: Vec<String>,
    /// Normalized vary-by query parameter names.
    pub params: Vec<String>,
}

impl CachedVaryRules {
    /// True when the normalized lists match this rule set exactly.
    pub fn matches(&self, headers: &[String], params: &[String]) -> bool {
        self.headers == headers && self.params == params
    }
}

/// Tagged union over the three persisted entry kinds, mirroring the codec
/// discriminator byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEntry {
    Body(CachedResponseBody),
    Response(CachedResponse),
    VaryRules(CachedVaryRules),
}
