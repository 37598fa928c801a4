//! Shared-cache HTTP response caching middleware for axum.
//!
//! Intercepts requests in the middleware pipeline, serves matching stored
//! responses when RFC 7234 shared-cache rules permit, and captures fresh
//! upstream responses as they stream — without delaying or reordering a
//! single body byte. Entries live in any `(key → bytes, ttl)` store behind
//! the [`CacheStore`] trait; an in-memory LRU store is bundled.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use axum::{Router, middleware, routing::get};
//! use scorta::{CacheConfig, MemoryStore, ResponseCacheState, response_cache_layer};
//!
//! let state = ResponseCacheState::new(CacheConfig::default(), Arc::new(MemoryStore::new()));
//! let app: Router = Router::new()
//!     .route("/", get(|| async { "hello" }))
//!     .layer(middleware::from_fn_with_state(state, response_cache_layer));
//! ```
//!
//! Responses that vary by request header are handled through a two-step
//! lookup: the base key resolves to a vary-rules entry whose prefix and
//! normalized rule lists derive the variant key. Handlers can extend the
//! variant axis with query parameters by attaching a [`VaryParams`]
//! response extension.

mod buffer;
mod clock;
mod codec;
mod config;
mod context;
mod entry;
mod headers;
mod keys;
mod lock;
mod middleware;
mod policy;
mod store;

pub use buffer::{BodyBuffer, BufferingBody, CompletionHook};
pub use clock::{Clock, SystemClock};
pub use codec::{FORMAT_VERSION, deserialize, serialize};
pub use config::CacheConfig;
pub use context::CacheContext;
pub use entry::{CacheEntry, CachedResponse, CachedResponseBody, CachedVaryRules};
pub use headers::{
    CacheControl, EntityTag, MaxStale, ResponseHeaderView, format_http_date, parse_http_date,
};
pub use keys::{DefaultKeyProvider, KeyProvider, normalize_vary_tokens};
pub use middleware::{ResponseCacheState, VaryParams, response_cache_layer};
pub use policy::{DefaultPolicyProvider, PolicyProvider};
pub use store::{CacheStore, MemoryStore, StoreError, StoreResult};
