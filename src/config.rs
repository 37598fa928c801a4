//! Response cache configuration.

use std::time::Duration;

use serde::Deserialize;

// Default values for cache configuration
const DEFAULT_MAX_CACHED_BODY_BYTES: usize = 64 * 1024 * 1024;
const DEFAULT_MIN_SPLIT_BODY_BYTES: usize = 70 * 1024 - 1;
const DEFAULT_EXPIRATION_SECS: u64 = 10;

/// Tunables for the response cache middleware.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Enable the response cache; when false every request passes through.
    pub enabled: bool,
    /// Largest response body (bytes) the shim will shadow for storage.
    /// Responses that grow past this are forwarded but never cached.
    pub max_cached_body_bytes: usize,
    /// Bodies strictly larger than this (bytes) are persisted under their
    /// own store key instead of inside the response entry.
    pub min_split_body_bytes: usize,
    /// Freshness (seconds) assigned when the response carries no
    /// `s-maxage`, `max-age`, or `Expires` signal.
    pub default_expiration_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_cached_body_bytes: DEFAULT_MAX_CACHED_BODY_BYTES,
            min_split_body_bytes: DEFAULT_MIN_SPLIT_BODY_BYTES,
            default_expiration_secs: DEFAULT_EXPIRATION_SECS,
        }
    }
}

impl CacheConfig {
    /// Fallback freshness as a [`Duration`].
    pub fn default_expiration(&self) -> Duration {
        Duration::from_secs(self.default_expiration_secs)
    }
}
