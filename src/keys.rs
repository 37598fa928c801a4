//! Cache key construction.
//!
//! Base keys identify a resource by method and path; vary keys extend a base
//! key with a rules prefix and the request's values for each vary-by header
//! and query parameter.

use axum::http::{HeaderMap, HeaderName};

use crate::context::CacheContext;
use crate::entry::CachedVaryRules;

/// Separator inside keys; not part of HTTP token syntax.
const KEY_DELIMITER: char = '\u{1f}';

/// Produces lookup key sequences and storage keys for a request.
///
/// `lookup_*` return keys in probe order; implementations may hedge with
/// several candidates. `storage_*` name the single key a new entry is
/// written under.
pub trait KeyProvider: Send + Sync {
    fn lookup_base_keys(&self, ctx: &CacheContext) -> Vec<String>;
    fn lookup_vary_keys(&self, ctx: &CacheContext, rules: &CachedVaryRules) -> Vec<String>;
    fn storage_base_key(&self, ctx: &CacheContext) -> String;
    fn storage_vary_key(&self, ctx: &CacheContext, rules: &CachedVaryRules) -> String;
}

/// Reference key shapes: `METHOD<US>PATH` base keys; vary keys append the
/// rules prefix and the upper-cased request values per rule.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultKeyProvider;

impl KeyProvider for DefaultKeyProvider {
    fn lookup_base_keys(&self, ctx: &CacheContext) -> Vec<String> {
        vec![self.storage_base_key(ctx)]
    }

    fn lookup_vary_keys(&self, ctx: &CacheContext, rules: &CachedVaryRules) -> Vec<String> {
        vec![self.storage_vary_key(ctx, rules)]
    }

    fn storage_base_key(&self, ctx: &CacheContext) -> String {
        format!(
            "{}{KEY_DELIMITER}{}",
            ctx.method().as_str().to_ascii_uppercase(),
            ctx.uri().path()
        )
    }

    fn storage_vary_key(&self, ctx: &CacheContext, rules: &CachedVaryRules) -> String {
        let mut key = self.storage_base_key(ctx);
        key.push_str(&rules.vary_key_prefix);
        let mut first_segment = true;
        for name in &rules.headers {
            if !first_segment {
                key.push(KEY_DELIMITER);
            }
            first_segment = false;
            key.push_str(name);
            key.push('=');
            push_header_values(&mut key, ctx.request_headers(), name);
        }
        for name in &rules.params {
            if !first_segment {
                key.push(KEY_DELIMITER);
            }
            first_segment = false;
            key.push_str(name);
            key.push('=');
            push_param_values(&mut key, ctx.uri().query(), name);
        }
        key
    }
}

/// Append the request's values for one vary-by header. A missing header
/// contributes the empty token; multiple values are joined with the key
/// delimiter.
fn push_header_values(key: &mut String, headers: &HeaderMap, name: &str) {
    let Ok(header_name) = HeaderName::from_bytes(name.as_bytes()) else {
        return;
    };
    let mut first = true;
    for value in headers.get_all(&header_name) {
        let Ok(value) = value.to_str() else { continue };
        if !first {
            key.push(KEY_DELIMITER);
        }
        first = false;
        key.push_str(&value.trim().to_uppercase());
    }
}

/// Append the request's values for one vary-by query parameter, decoded and
/// matched case-insensitively.
fn push_param_values(key: &mut String, query: Option<&str>, name: &str) {
    let Some(query) = query else { return };
    let mut first = true;
    for (param, value) in url::form_urlencoded::parse(query.as_bytes()) {
        if !param.eq_ignore_ascii_case(name) {
            continue;
        }
        if !first {
            key.push(KEY_DELIMITER);
        }
        first = false;
        key.push_str(&value.to_uppercase());
    }
}

/// Canonicalize a vary list: split comma-joined entries, trim, upper-case,
/// sort by byte order, drop empty tokens. Entries without a comma skip the
/// split; both paths yield identical output.
pub fn normalize_vary_tokens<I, S>(values: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut tokens = Vec::new();
    for value in values {
        let value = value.as_ref();
        if value.contains(',') {
            for part in value.split(',') {
                push_token(&mut tokens, part);
            }
        } else {
            push_token(&mut tokens, value);
        }
    }
    tokens.sort();
    tokens
}

fn push_token(tokens: &mut Vec<String>, raw: &str) {
    let trimmed = raw.trim();
    if !trimmed.is_empty() {
        tokens.push(trimmed.to_uppercase());
    }
}
