//! Response cache middleware.
//!
//! Serves matching stored responses for cacheable requests and captures
//! upstream responses as they stream. Shared-cache semantics (RFC 7234)
//! restricted to the slice the policy module implements: a matched entry
//! that is no longer fresh reads as a miss, never as a revalidation.
//!
//! `Vary: *` receives no special treatment; it produces an ordinary vary
//! rule named `*`.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::State,
    http::{
        HeaderMap, HeaderName, HeaderValue, Request, StatusCode, header, response::Parts,
    },
    middleware::Next,
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::buffer::{BodyBuffer, BufferingBody, CompletionHook};
use crate::clock::{Clock, SystemClock};
use crate::config::CacheConfig;
use crate::context::CacheContext;
use crate::entry::{CacheEntry, CachedResponse, CachedResponseBody, CachedVaryRules};
use crate::headers::{
    self, CacheControl, ResponseHeaderView, TagMatch, format_http_date, parse_http_date,
};
use crate::keys::{DefaultKeyProvider, KeyProvider, normalize_vary_tokens};
use crate::policy::{self, DefaultPolicyProvider, PolicyProvider};
use crate::store::{CacheStore, TypedStore};

/// Application-declared vary-by-query-params, attached as a response
/// extension by handlers that need variants beyond the `Vary` header.
#[derive(Debug, Clone, Default)]
pub struct VaryParams(pub Vec<String>);

/// Shared middleware state for [`response_cache_layer`].
#[derive(Clone)]
pub struct ResponseCacheState {
    config: CacheConfig,
    store: TypedStore,
    keys: Arc<dyn KeyProvider>,
    policy: Arc<dyn PolicyProvider>,
    clock: Arc<dyn Clock>,
}

impl ResponseCacheState {
    pub fn new(config: CacheConfig, store: Arc<dyn CacheStore>) -> Self {
        Self {
            config,
            store: TypedStore::new(store),
            keys: Arc::new(DefaultKeyProvider),
            policy: Arc::new(DefaultPolicyProvider),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_key_provider(mut self, keys: Arc<dyn KeyProvider>) -> Self {
        self.keys = keys;
        self
    }

    pub fn with_policy_provider(mut self, policy: Arc<dyn PolicyProvider>) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

/// Middleware entry point for `axum::middleware::from_fn_with_state`.
#[instrument(skip_all, fields(method = %request.method(), path = %request.uri().path()))]
pub async fn response_cache_layer(
    State(cache): State<ResponseCacheState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if !cache.config.enabled {
        return next.run(request).await;
    }

    let mut ctx = CacheContext::new(&request);

    if !cache.policy.is_request_cacheable(&ctx) {
        debug!(outcome = "bypass", "request not cacheable");
        return next.run(request).await;
    }

    if let Some(response) = try_serve_from_cache(&cache, &mut ctx).await {
        return response;
    }

    debug!(outcome = "miss", "no usable cached response, executing handler");
    let response = next.run(request).await;
    capture_response(&cache, ctx, response).await
}

/// Probe the store for a servable entry. `Some` means the request has been
/// answered (a cached response, a 304, or an `only-if-cached` 504).
async fn try_serve_from_cache(
    cache: &ResponseCacheState,
    ctx: &mut CacheContext,
) -> Option<Response> {
    let mut candidate = None;
    'probe: for base_key in cache.keys.lookup_base_keys(ctx) {
        match cache.store.get_entry(&base_key).await {
            Some(CacheEntry::VaryRules(rules)) => {
                ctx.vary_rules = Some(rules.clone());
                for vary_key in cache.keys.lookup_vary_keys(ctx, &rules) {
                    if let Some(CacheEntry::Response(response)) =
                        cache.store.get_entry(&vary_key).await
                    {
                        candidate = Some(response);
                        break 'probe;
                    }
                }
            }
            Some(CacheEntry::Response(response)) => {
                candidate = Some(response);
                break 'probe;
            }
            Some(CacheEntry::Body(_)) => {
                debug!(key = %base_key, "ignoring body entry found under a base key");
            }
            None => {}
        }
    }

    if let Some(cached) = candidate {
        // A matched entry that cannot be served ends the probe: without a
        // revalidator, stale means miss, not "try the next key".
        if let Some(served) = serve_candidate(cache, ctx, cached).await {
            return Some(served);
        }
    }

    if CacheControl::from_headers(ctx.request_headers()).only_if_cached {
        debug!(outcome = "only-if-cached", "nothing served from cache; answering 504");
        return Some(StatusCode::GATEWAY_TIMEOUT.into_response());
    }

    None
}

/// Serve one matched entry, or `None` when it must be abandoned.
async fn serve_candidate(
    cache: &ResponseCacheState,
    ctx: &mut CacheContext,
    cached: CachedResponse,
) -> Option<Response> {
    let response_time = cache.clock.now_utc();
    ctx.response_time = Some(response_time);

    let view = ResponseHeaderView::from_stored(&cached.headers);
    let age: Duration = (response_time - cached.created).try_into().unwrap_or_default();
    ctx.entry_age = Some(age);
    ctx.valid_for = Some(
        policy::explicit_valid_for(&view, cached.created)
            .unwrap_or_else(|| cache.config.default_expiration()),
    );
    ctx.cached_headers = Some(view.clone());

    if !cache.policy.is_entry_fresh(ctx) {
        debug!(outcome = "stale", "matched entry is no longer fresh");
        return None;
    }

    if conditional_request_satisfied(ctx.request_headers(), &view) {
        debug!(outcome = "not-modified", "conditional request satisfied from cache");
        return Some(StatusCode::NOT_MODIFIED.into_response());
    }

    let status = StatusCode::from_u16(cached.status).ok()?;

    let body = match fetch_body(cache, &cached).await {
        Some(body) => body,
        None => {
            debug!(outcome = "body-miss", "cached body unavailable; abandoning entry");
            return None;
        }
    };

    let mut response_headers = HeaderMap::new();
    for (name, value) in &cached.headers {
        let Ok(name) = HeaderName::from_bytes(name.as_bytes()) else {
            continue;
        };
        let Ok(value) = HeaderValue::from_str(value) else {
            continue;
        };
        response_headers.append(name, value);
    }
    response_headers.insert(header::AGE, HeaderValue::from(age.as_secs()));
    if !response_headers.contains_key(header::CONTENT_LENGTH)
        && !response_headers.contains_key(header::TRANSFER_ENCODING)
    {
        response_headers.insert(header::CONTENT_LENGTH, HeaderValue::from(body.len() as u64));
    }

    ctx.cached_response = Some(cached);

    debug!(outcome = "hit", age_secs = age.as_secs(), "serving cached response");
    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;
    *response.headers_mut() = response_headers;
    Some(response)
}

/// Resolve the candidate's body: colocated, or fetched from its own key.
async fn fetch_body(cache: &ResponseCacheState, cached: &CachedResponse) -> Option<Bytes> {
    if let Some(body) = &cached.body {
        return Some(body.clone());
    }
    match cache.store.get_entry(&cached.body_key_prefix).await {
        Some(CacheEntry::Body(body)) => Some(body.body),
        _ => None,
    }
}

/// RFC 7232 precondition check against the cached entry. `If-None-Match`,
/// when present, overrides `If-Unmodified-Since` entirely.
fn conditional_request_satisfied(
    request_headers: &HeaderMap,
    cached: &ResponseHeaderView,
) -> bool {
    if let Some(tags) = headers::parse_if_none_match(request_headers) {
        return match tags {
            TagMatch::Any => true,
            TagMatch::Tags(tags) => cached
                .etag
                .as_ref()
                .is_some_and(|etag| tags.iter().any(|tag| tag.strong_eq(etag))),
        };
    }
    if let Some(unmodified_since) = request_headers
        .get(header::IF_UNMODIFIED_SINCE)
        .and_then(|value| value.to_str().ok())
        .and_then(parse_http_date)
    {
        return cached
            .last_modified
            .or(cached.date)
            .is_some_and(|instant| instant <= unmodified_since);
    }
    false
}

/// Finalize the response head and, when it is storable, install the
/// buffering shim whose completion persists the body.
async fn capture_response(
    cache: &ResponseCacheState,
    mut ctx: CacheContext,
    response: Response,
) -> Response {
    let (mut parts, body) = response.into_parts();
    finalize_headers(cache, &mut ctx, &mut parts).await;

    let (Some(stored), true) = (ctx.cached_response.take(), ctx.should_cache) else {
        return Response::from_parts(parts, body);
    };
    let Some(storage_key) = ctx.storage_vary_key.clone().or_else(|| ctx.storage_base_key.clone())
    else {
        return Response::from_parts(parts, body);
    };

    let declared_length = content_length(&parts.headers);
    let store = cache.store.clone();
    let valid_for = ctx
        .valid_for
        .unwrap_or_else(|| cache.config.default_expiration());
    let min_split = cache.config.min_split_body_bytes;

    let hook: CompletionHook = Box::new(move |buffer: &BodyBuffer| {
        finalize_body(store, stored, storage_key, declared_length, min_split, valid_for, buffer);
    });
    let body = BufferingBody::new(body, cache.config.max_cached_body_bytes, hook);
    Response::from_parts(parts, Body::new(body))
}

/// Response-start work, run exactly once per request: decide storability,
/// fix the freshness lifetime, reconcile vary rules, pin `Date`, and mint
/// the entry the body finalizer will fill.
async fn finalize_headers(cache: &ResponseCacheState, ctx: &mut CacheContext, parts: &mut Parts) {
    if ctx.response_started {
        return;
    }
    ctx.response_started = true;

    let response_time = cache.clock.now_utc();
    ctx.response_time = Some(response_time);

    if !cache.policy.is_response_cacheable(ctx, parts) {
        debug!(outcome = "skip", "response not cacheable");
        return;
    }
    ctx.should_cache = true;

    let view = ResponseHeaderView::from_header_map(&parts.headers);
    let valid_for =
        policy::response_valid_for(&view, response_time, cache.config.default_expiration());
    ctx.valid_for = Some(valid_for);

    let base_key = cache.keys.storage_base_key(ctx);

    let vary_headers = normalize_vary_tokens(
        parts
            .headers
            .get_all(header::VARY)
            .iter()
            .filter_map(|value| value.to_str().ok()),
    );
    let vary_params = normalize_vary_tokens(
        parts
            .extensions
            .get::<VaryParams>()
            .map(|params| params.0.as_slice())
            .unwrap_or_default()
            .iter()
            .map(String::as_str),
    );

    if !vary_headers.is_empty() || !vary_params.is_empty() {
        let rules = match ctx.vary_rules.take() {
            Some(existing) if existing.matches(&vary_headers, &vary_params) => existing,
            _ => {
                let rules = CachedVaryRules {
                    vary_key_prefix: fresh_key_prefix(),
                    headers: vary_headers,
                    params: vary_params,
                };
                cache
                    .store
                    .set_entry(&base_key, &CacheEntry::VaryRules(rules.clone()), valid_for)
                    .await;
                debug!(key = %base_key, "stored new vary rules");
                rules
            }
        };
        let vary_key = cache.keys.storage_vary_key(ctx, &rules);
        ctx.storage_vary_key = Some(vary_key);
        ctx.vary_rules = Some(rules);
    }

    // `created` mirrors the response `Date`; a missing or unreadable header
    // is pinned to the response time.
    let created = match parts
        .headers
        .get(header::DATE)
        .and_then(|value| value.to_str().ok())
        .and_then(parse_http_date)
    {
        Some(date) => date,
        None => {
            if let Ok(value) = HeaderValue::from_str(&format_http_date(response_time)) {
                parts.headers.insert(header::DATE, value);
            }
            response_time
        }
    };

    ctx.storage_base_key = Some(base_key);
    ctx.cached_response = Some(CachedResponse {
        body_key_prefix: fresh_key_prefix(),
        created,
        status: parts.status.as_u16(),
        headers: parts
            .headers
            .iter()
            .filter(|(name, _)| **name != header::AGE)
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_string(), value.to_string()))
            })
            .collect(),
        body: None,
    });
}

/// Body-completion work: persist the captured response unless buffering
/// gave up or the declared length disagrees with what was seen.
fn finalize_body(
    store: TypedStore,
    mut stored: CachedResponse,
    storage_key: String,
    declared_length: Option<u64>,
    min_split: usize,
    valid_for: Duration,
    buffer: &BodyBuffer,
) {
    if !buffer.is_enabled() {
        debug!(key = %storage_key, "buffering disabled; response not stored");
        return;
    }
    if let Some(declared) = declared_length
        && declared != buffer.len() as u64
    {
        debug!(
            key = %storage_key,
            declared,
            buffered = buffer.len(),
            "content-length mismatch; response not stored"
        );
        return;
    }

    let body = buffer.snapshot();
    let split = body.len() > min_split;
    tokio::spawn(async move {
        if split {
            let body_key = stored.body_key_prefix.clone();
            store
                .set_entry(&storage_key, &CacheEntry::Response(stored), valid_for)
                .await;
            store
                .set_entry(&body_key, &CacheEntry::Body(CachedResponseBody { body }), valid_for)
                .await;
        } else {
            stored.body = Some(body);
            store
                .set_entry(&storage_key, &CacheEntry::Response(stored), valid_for)
                .await;
        }
        debug!(key = %storage_key, split, "stored response");
    });
}

fn content_length(headers: &HeaderMap) -> Option<u64> {
    headers.get(header::CONTENT_LENGTH)?.to_str().ok()?.parse().ok()
}

fn fresh_key_prefix() -> String {
    Uuid::new_v4().simple().to_string()
}

#[cfg(test)]
mod tests {
    use crate::headers::EntityTag;

    use super::*;

    fn request_headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (name, value) in pairs {
            headers.append(
                HeaderName::from_bytes(name.as_bytes()).unwrap(),
                HeaderValue::from_str(value).unwrap(),
            );
        }
        headers
    }

    fn cached_view(pairs: &[(&str, &str)]) -> ResponseHeaderView {
        let stored: Vec<(String, String)> = pairs
            .iter()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect();
        ResponseHeaderView::from_stored(&stored)
    }

    #[test]
    fn wildcard_if_none_match_is_satisfied() {
        let request = request_headers(&[("if-none-match", "*")]);
        assert!(conditional_request_satisfied(&request, &cached_view(&[])));
    }

    #[test]
    fn matching_etag_is_satisfied_with_strong_comparison() {
        let cached = cached_view(&[("etag", "\"E1\"")]);
        let request = request_headers(&[("if-none-match", "\"E0\", \"E1\"")]);
        assert!(conditional_request_satisfied(&request, &cached));

        let request = request_headers(&[("if-none-match", "\"E2\"")]);
        assert!(!conditional_request_satisfied(&request, &cached));

        // Weak tags never match strongly.
        let request = request_headers(&[("if-none-match", "W/\"E1\"")]);
        assert!(!conditional_request_satisfied(&request, &cached));
    }

    #[test]
    fn if_none_match_overrides_if_unmodified_since() {
        let cached = cached_view(&[
            ("etag", "\"E1\""),
            ("last-modified", "Sun, 06 Nov 1994 08:49:37 GMT"),
        ]);
        // The date alone would be satisfied, but the tag list does not match.
        let request = request_headers(&[
            ("if-none-match", "\"other\""),
            ("if-unmodified-since", "Mon, 07 Nov 1994 08:49:37 GMT"),
        ]);
        assert!(!conditional_request_satisfied(&request, &cached));
    }

    #[test]
    fn if_unmodified_since_compares_last_modified_then_date() {
        let request = request_headers(&[("if-unmodified-since", "Mon, 07 Nov 1994 08:49:37 GMT")]);

        let cached = cached_view(&[("last-modified", "Sun, 06 Nov 1994 08:49:37 GMT")]);
        assert!(conditional_request_satisfied(&request, &cached));

        let cached = cached_view(&[("last-modified", "Tue, 08 Nov 1994 08:49:37 GMT")]);
        assert!(!conditional_request_satisfied(&request, &cached));

        // Falls back to Date when Last-Modified is absent.
        let cached = cached_view(&[("date", "Sun, 06 Nov 1994 08:49:37 GMT")]);
        assert!(conditional_request_satisfied(&request, &cached));

        assert!(!conditional_request_satisfied(&request, &cached_view(&[])));
    }

    #[test]
    fn unconditional_request_is_never_satisfied() {
        let cached = cached_view(&[("etag", "\"E1\"")]);
        assert!(!conditional_request_satisfied(&request_headers(&[]), &cached));
    }

    #[test]
    fn content_length_parses_valid_values_only() {
        assert_eq!(content_length(&request_headers(&[("content-length", "42")])), Some(42));
        assert_eq!(content_length(&request_headers(&[("content-length", "nope")])), None);
        assert_eq!(content_length(&request_headers(&[])), None);
    }

    #[test]
    fn key_prefixes_are_unique_and_hex() {
        let a = fresh_key_prefix();
        let b = fresh_key_prefix();
        assert_ne!(a, b);
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn strong_eq_requires_both_tags_strong() {
        let strong = EntityTag::parse("\"x\"").unwrap();
        let weak = EntityTag::parse("W/\"x\"").unwrap();
        assert!(!weak.strong_eq(&strong));
        assert!(!weak.strong_eq(&weak));
    }
}
