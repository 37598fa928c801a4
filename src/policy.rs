//! Cacheability and freshness policy for a shared cache.

use std::time::Duration;

use axum::http::response::Parts;
use axum::http::{HeaderMap, Method, header};
use time::OffsetDateTime;

use crate::context::CacheContext;
use crate::headers::{CacheControl, MaxStale, ResponseHeaderView};

/// Status codes cacheable by default (RFC 7231 §6.1).
const CACHEABLE_BY_DEFAULT: &[u16] = &[200, 203, 204, 206, 300, 301, 404, 405, 410, 414, 501];

/// The three predicates steering the middleware. Implementations are pure:
/// they read the context and never mutate it.
pub trait PolicyProvider: Send + Sync {
    /// May the request be answered from or captured into the cache at all?
    fn is_request_cacheable(&self, ctx: &CacheContext) -> bool;
    /// May the response about to be sent be stored?
    fn is_response_cacheable(&self, ctx: &CacheContext, response: &Parts) -> bool;
    /// Is the matched entry still usable for this request?
    fn is_entry_fresh(&self, ctx: &CacheContext) -> bool;
}

/// Shared-cache rules per RFC 7234.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultPolicyProvider;

impl PolicyProvider for DefaultPolicyProvider {
    fn is_request_cacheable(&self, ctx: &CacheContext) -> bool {
        let method = ctx.method();
        if method != Method::GET && method != Method::HEAD {
            return false;
        }
        let cc = CacheControl::from_headers(ctx.request_headers());
        if cc.no_cache || cc.no_store {
            return false;
        }
        if pragma_no_cache(ctx.request_headers()) {
            return false;
        }
        // Shared cache: authenticated requests are never served or stored.
        if ctx.request_headers().contains_key(header::AUTHORIZATION) {
            return false;
        }
        true
    }

    fn is_response_cacheable(&self, ctx: &CacheContext, response: &Parts) -> bool {
        let view = ResponseHeaderView::from_header_map(&response.headers);
        let cc = &view.cache_control;
        let status_allows = CACHEABLE_BY_DEFAULT.contains(&response.status.as_u16());
        let directives_allow = cc.public || cc.s_maxage.is_some() || cc.max_age.is_some();
        if !status_allows && !directives_allow {
            return false;
        }
        if cc.no_store || cc.no_cache || cc.private {
            return false;
        }
        if view.has_set_cookie {
            return false;
        }
        let Some(response_time) = ctx.response_time() else {
            return false;
        };
        // An explicit but exhausted signal (max-age=0, past Expires) means
        // there is no freshness to grant; absence falls back to the default.
        match explicit_valid_for(&view, response_time) {
            Some(valid_for) => valid_for > Duration::ZERO,
            None => true,
        }
    }

    fn is_entry_fresh(&self, ctx: &CacheContext) -> bool {
        let (Some(valid_for), Some(mut age)) = (ctx.valid_for(), ctx.entry_age()) else {
            return false;
        };
        let cc = CacheControl::from_headers(ctx.request_headers());
        if let Some(min_fresh) = cc.min_fresh {
            age += min_fresh;
        }
        let mut lifetime = valid_for;
        if let Some(request_max_age) = cc.max_age {
            lifetime = lifetime.min(request_max_age);
        }
        if age < lifetime {
            return true;
        }
        match cc.max_stale {
            Some(MaxStale::Unbounded) => true,
            Some(MaxStale::Limit(limit)) => age - lifetime < limit,
            None => false,
        }
    }
}

fn pragma_no_cache(headers: &HeaderMap) -> bool {
    headers.get_all(header::PRAGMA).iter().any(|value| {
        value
            .to_str()
            .is_ok_and(|value| value.to_ascii_lowercase().contains("no-cache"))
    })
}

/// Freshness from explicit signals: `s-maxage`, then `max-age`, then
/// `Expires − response_time`. `None` when no signal is present.
pub(crate) fn explicit_valid_for(
    view: &ResponseHeaderView,
    response_time: OffsetDateTime,
) -> Option<Duration> {
    if let Some(s_maxage) = view.cache_control.s_maxage {
        return Some(s_maxage);
    }
    if let Some(max_age) = view.cache_control.max_age {
        return Some(max_age);
    }
    let expires = view.expires?;
    Some((expires - response_time).try_into().unwrap_or(Duration::ZERO))
}

/// Freshness lifetime for a response, falling back to `default` when no
/// explicit signal is present.
pub(crate) fn response_valid_for(
    view: &ResponseHeaderView,
    response_time: OffsetDateTime,
    default: Duration,
) -> Duration {
    explicit_valid_for(view, response_time).unwrap_or(default)
}
