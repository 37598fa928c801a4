//! Parsed header views backing caching decisions.
//!
//! Covers the slice of `Cache-Control`, validator, and date headers the
//! middleware consumes. Parsing is tolerant: unknown directives are ignored
//! and malformed values read as absent.

use std::time::{Duration, SystemTime};

use axum::http::{HeaderMap, HeaderValue, header};
use time::OffsetDateTime;

/// `max-stale` request directive; the bare form accepts any staleness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaxStale {
    Unbounded,
    Limit(Duration),
}

/// Flattened view of the `Cache-Control` directives the cache acts on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheControl {
    pub public: bool,
    pub private: bool,
    pub no_cache: bool,
    pub no_store: bool,
    pub only_if_cached: bool,
    pub max_age: Option<Duration>,
    pub s_maxage: Option<Duration>,
    pub min_fresh: Option<Duration>,
    pub max_stale: Option<MaxStale>,
}

impl CacheControl {
    /// Parse every `Cache-Control` header present on the map.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let mut parsed = Self::default();
        for value in headers.get_all(header::CACHE_CONTROL) {
            if let Ok(value) = value.to_str() {
                parsed.merge(value);
            }
        }
        parsed
    }

    fn merge(&mut self, raw: &str) {
        for directive in raw.split(',') {
            let directive = directive.trim();
            if directive.is_empty() {
                continue;
            }
            let (name, value) = match directive.split_once('=') {
                Some((name, value)) => (name.trim(), Some(value.trim().trim_matches('"'))),
                None => (directive, None),
            };
            match name.to_ascii_lowercase().as_str() {
                "public" => self.public = true,
                "private" => self.private = true,
                "no-cache" => self.no_cache = true,
                "no-store" => self.no_store = true,
                "only-if-cached" => self.only_if_cached = true,
                "max-age" => self.max_age = parse_seconds(value),
                "s-maxage" => self.s_maxage = parse_seconds(value),
                "min-fresh" => self.min_fresh = parse_seconds(value),
                "max-stale" => {
                    self.max_stale = Some(match parse_seconds(value) {
                        Some(limit) => MaxStale::Limit(limit),
                        None => MaxStale::Unbounded,
                    });
                }
                _ => {}
            }
        }
    }
}

fn parse_seconds(value: Option<&str>) -> Option<Duration> {
    value?.parse::<u64>().ok().map(Duration::from_secs)
}

/// HTTP entity tag, strong or weak.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityTag {
    pub value: String,
    pub weak: bool,
}

impl EntityTag {
    /// Parse a single entity tag (`"v"` or `W/"v"`).
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        let (weak, rest) = match raw.strip_prefix("W/") {
            Some(rest) => (true, rest),
            None => (false, raw),
        };
        let value = rest.strip_prefix('"')?.strip_suffix('"')?;
        Some(Self {
            value: value.to_string(),
            weak,
        })
    }

    /// Strong comparison per RFC 7232 §2.3.2: both tags strong, octets equal.
    pub fn strong_eq(&self, other: &EntityTag) -> bool {
        !self.weak && !other.weak && self.value == other.value
    }
}

/// `If-None-Match` contents: the wildcard or the listed tags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TagMatch {
    Any,
    Tags(Vec<EntityTag>),
}

/// Gather `If-None-Match` from the request; `None` when the header is absent.
pub(crate) fn parse_if_none_match(headers: &HeaderMap) -> Option<TagMatch> {
    let mut present = false;
    let mut tags = Vec::new();
    for value in headers.get_all(header::IF_NONE_MATCH) {
        let Ok(value) = value.to_str() else { continue };
        present = true;
        for part in value.split(',') {
            let part = part.trim();
            if part == "*" {
                return Some(TagMatch::Any);
            }
            if let Some(tag) = EntityTag::parse(part) {
                tags.push(tag);
            }
        }
    }
    present.then_some(TagMatch::Tags(tags))
}

/// Cache-relevant view of a response's headers, live or stored.
#[derive(Debug, Clone, Default)]
pub struct ResponseHeaderView {
    pub cache_control: CacheControl,
    pub date: Option<OffsetDateTime>,
    pub expires: Option<OffsetDateTime>,
    pub etag: Option<EntityTag>,
    pub last_modified: Option<OffsetDateTime>,
    pub has_set_cookie: bool,
}

impl ResponseHeaderView {
    pub fn from_header_map(headers: &HeaderMap) -> Self {
        Self {
            cache_control: CacheControl::from_headers(headers),
            date: headers.get(header::DATE).and_then(parse_date_value),
            expires: headers.get(header::EXPIRES).and_then(parse_date_value),
            etag: headers
                .get(header::ETAG)
                .and_then(|value| value.to_str().ok())
                .and_then(EntityTag::parse),
            last_modified: headers.get(header::LAST_MODIFIED).and_then(parse_date_value),
            has_set_cookie: headers.contains_key(header::SET_COOKIE),
        }
    }

    /// Rebuild the view from a stored entry's header pairs.
    pub fn from_stored(headers: &[(String, String)]) -> Self {
        let mut view = Self::default();
        for (name, value) in headers {
            if name.eq_ignore_ascii_case("cache-control") {
                view.cache_control.merge(value);
            } else if name.eq_ignore_ascii_case("date") {
                view.date = parse_http_date(value);
            } else if name.eq_ignore_ascii_case("expires") {
                view.expires = parse_http_date(value);
            } else if name.eq_ignore_ascii_case("etag") {
                view.etag = EntityTag::parse(value);
            } else if name.eq_ignore_ascii_case("last-modified") {
                view.last_modified = parse_http_date(value);
            } else if name.eq_ignore_ascii_case("set-cookie") {
                view.has_set_cookie = true;
            }
        }
        view
    }
}

fn parse_date_value(value: &HeaderValue) -> Option<OffsetDateTime> {
    value.to_str().ok().and_then(parse_http_date)
}

/// Parse an IMF-fixdate header value.
pub fn parse_http_date(value: &str) -> Option<OffsetDateTime> {
    httpdate::parse_http_date(value).ok().map(OffsetDateTime::from)
}

/// Format an instant as an IMF-fixdate header value.
pub fn format_http_date(instant: OffsetDateTime) -> String {
    httpdate::fmt_http_date(SystemTime::from(instant))
}
