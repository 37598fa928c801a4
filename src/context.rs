//! Per-request cache state.

use std::time::Duration;

use axum::body::Body;
use axum::http::{HeaderMap, Method, Request, Uri};
use time::OffsetDateTime;

use crate::entry::{CachedResponse, CachedVaryRules};
use crate::headers::ResponseHeaderView;

/// State accumulated over one request's trip through the middleware.
///
/// Constructed at request entry, dropped at request exit, never shared
/// between requests. Key and policy providers read it; only the middleware
/// writes it.
#[derive(Debug)]
pub struct CacheContext {
    method: Method,
    uri: Uri,
    request_headers: HeaderMap,
    pub(crate) response_time: Option<OffsetDateTime>,
    pub(crate) cached_response: Option<CachedResponse>,
    pub(crate) cached_headers: Option<ResponseHeaderView>,
    pub(crate) entry_age: Option<Duration>,
    pub(crate) vary_rules: Option<CachedVaryRules>,
    pub(crate) storage_base_key: Option<String>,
    pub(crate) storage_vary_key: Option<String>,
    pub(crate) valid_for: Option<Duration>,
    pub(crate) should_cache: bool,
    pub(crate) response_started: bool,
}

impl CacheContext {
    pub(crate) fn new(request: &Request<Body>) -> Self {
        Self {
            method: request.method().clone(),
            uri: request.uri().clone(),
            request_headers: request.headers().clone(),
            response_time: None,
            cached_response: None,
            cached_headers: None,
            entry_age: None,
            vary_rules: None,
            storage_base_key: None,
            storage_vary_key: None,
            valid_for: None,
            should_cache: false,
            response_started: false,
        }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn request_headers(&self) -> &HeaderMap {
        &self.request_headers
    }

    /// Instant the response started, once known.
    pub fn response_time(&self) -> Option<OffsetDateTime> {
        self.response_time
    }

    /// Parsed headers of the matched cached entry, on the serve path.
    pub fn cached_headers(&self) -> Option<&ResponseHeaderView> {
        self.cached_headers.as_ref()
    }

    /// Elapsed time since the matched entry was created, on the serve path.
    pub fn entry_age(&self) -> Option<Duration> {
        self.entry_age
    }

    /// Freshness lifetime governing the current entry or response.
    pub fn valid_for(&self) -> Option<Duration> {
        self.valid_for
    }

    /// Vary rules discovered during lookup or computed at header
    /// finalization.
    pub fn vary_rules(&self) -> Option<&CachedVaryRules> {
        self.vary_rules.as_ref()
    }
}
