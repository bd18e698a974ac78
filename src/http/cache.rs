//! RFC 7234 response cache for speculative fetches.
//!
//! # Responsibilities
//! - Store complete 200 responses to GET requests that allow shared caching
//! - Serve fresh entries without touching the network
//! - Answer "is this resource fresh?" for the prefetch orchestrator
//!
//! # Design Decisions
//! - Freshness comes from `s-maxage`, then `max-age`, minus `Age`
//! - `no-store`, `no-cache` and `private` responses are never stored
//! - Bodies above the configured size stream through uncached
//! - No validation/revalidation: stale entries are simply refetched

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use http::header::{AGE, CACHE_CONTROL, RANGE};
use http::{HeaderMap, Method, Request, Response, StatusCode};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::cache::CacheKey;
use crate::config::HttpCacheConfig;
use crate::http::body::Body;
use crate::http::head::ResponseHead;
use crate::http::transport::{HttpTransport, TransportError};

struct StoredResponse {
    head: ResponseHead,
    body: Bytes,
    fresh_until: Instant,
}

/// In-memory shared HTTP cache.
pub struct HttpCache {
    entries: DashMap<CacheKey, StoredResponse>,
    max_body_bytes: usize,
}

impl HttpCache {
    pub fn new(config: &HttpCacheConfig) -> Self {
        Self {
            entries: DashMap::new(),
            max_body_bytes: config.max_body_bytes,
        }
    }

    /// Whether a fresh entry exists for `key`.
    pub fn is_fresh(&self, key: &CacheKey) -> bool {
        self.entries
            .get(key)
            .map(|entry| Instant::now() < entry.fresh_until)
            .unwrap_or(false)
    }

    /// A fresh response for `key`, dropping the entry if it went stale.
    pub fn lookup(&self, key: &CacheKey) -> Option<Response<Body>> {
        let now = Instant::now();
        if let Some(entry) = self.entries.get(key) {
            if now < entry.fresh_until {
                return Some(
                    entry
                        .head
                        .clone()
                        .into_response(Body::from_bytes(entry.body.clone())),
                );
            }
        }
        self.entries.remove_if(key, |_, entry| now >= entry.fresh_until);
        None
    }

    pub fn store(&self, key: CacheKey, head: ResponseHead, body: Bytes, lifetime: Duration) {
        self.entries.insert(
            key,
            StoredResponse {
                head,
                body,
                fresh_until: Instant::now() + lifetime,
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// How long a response may be served from a shared cache, if at all.
pub fn freshness_lifetime(status: StatusCode, headers: &HeaderMap) -> Option<Duration> {
    if status != StatusCode::OK {
        return None;
    }

    let mut max_age = None;
    let mut s_maxage = None;
    for directive in headers
        .get_all(CACHE_CONTROL)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
    {
        let directive = directive.trim();
        let (name, value) = match directive.split_once('=') {
            Some((name, value)) => (name.trim(), Some(value.trim().trim_matches('"'))),
            None => (directive, None),
        };
        if name.eq_ignore_ascii_case("no-store")
            || name.eq_ignore_ascii_case("no-cache")
            || name.eq_ignore_ascii_case("private")
        {
            return None;
        }
        let seconds = value.and_then(|v| v.parse::<u64>().ok());
        if name.eq_ignore_ascii_case("max-age") {
            max_age = seconds;
        } else if name.eq_ignore_ascii_case("s-maxage") {
            s_maxage = seconds;
        }
    }

    let age = headers
        .get(AGE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(0);
    let lifetime = s_maxage.or(max_age)?.checked_sub(age)?;
    if lifetime == 0 {
        None
    } else {
        Some(Duration::from_secs(lifetime))
    }
}

/// A transport that answers from, and fills, an [`HttpCache`].
pub struct CachingTransport<T> {
    inner: T,
    cache: std::sync::Arc<HttpCache>,
}

impl<T> CachingTransport<T> {
    pub fn new(inner: T, cache: std::sync::Arc<HttpCache>) -> Self {
        Self { inner, cache }
    }

    pub fn cache(&self) -> &std::sync::Arc<HttpCache> {
        &self.cache
    }
}

fn is_cacheable_request(request: &Request<Body>) -> bool {
    request.method() == Method::GET && !request.headers().contains_key(RANGE)
}

#[async_trait]
impl<T: HttpTransport> HttpTransport for CachingTransport<T> {
    async fn execute(
        &self,
        request: Request<Body>,
        cancel: CancellationToken,
    ) -> Result<Response<Body>, TransportError> {
        if !is_cacheable_request(&request) {
            return self.inner.execute(request, cancel).await;
        }

        let key = CacheKey::from_uri(request.uri());
        if let Some(response) = self.cache.lookup(&key) {
            tracing::debug!(url = %key, "HTTP cache hit");
            return Ok(response);
        }

        let response = self.inner.execute(request, cancel).await?;
        let Some(lifetime) = freshness_lifetime(response.status(), response.headers()) else {
            return Ok(response);
        };

        let head = ResponseHead::of(&response);
        let (prefix, rest) = response.into_body().collect_prefix(self.cache.max_body_bytes).await?;
        match rest {
            None => {
                tracing::debug!(url = %key, lifetime = ?lifetime, "HTTP cache store");
                self.cache.store(key, head.clone(), prefix.clone(), lifetime);
                Ok(head.into_response(Body::from_bytes(prefix)))
            }
            Some(rest) => {
                tracing::debug!(url = %key, "Response too large to cache");
                let body = std::io::Cursor::new(prefix);
                Ok(head.into_response(Body::from_reader(tokio::io::AsyncReadExt::chain(body, rest))))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingOrigin {
        calls: AtomicUsize,
        cache_control: &'static str,
    }

    #[async_trait]
    impl HttpTransport for CountingOrigin {
        async fn execute(
            &self,
            _request: Request<Body>,
            _cancel: CancellationToken,
        ) -> Result<Response<Body>, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Response::builder()
                .header(CACHE_CONTROL, self.cache_control)
                .body(Body::from("body { color: red }"))
                .unwrap())
        }
    }

    fn transport(cache_control: &'static str) -> CachingTransport<CountingOrigin> {
        CachingTransport::new(
            CountingOrigin {
                calls: AtomicUsize::new(0),
                cache_control,
            },
            Arc::new(HttpCache::new(&HttpCacheConfig::default())),
        )
    }

    fn get(url: &str) -> Request<Body> {
        Request::get(url).body(Body::empty()).unwrap()
    }

    #[test]
    fn lifetime_from_cache_control() {
        let mut headers = HeaderMap::new();
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("public, max-age=60"));
        assert_eq!(
            freshness_lifetime(StatusCode::OK, &headers),
            Some(Duration::from_secs(60))
        );

        headers.insert(CACHE_CONTROL, HeaderValue::from_static("max-age=60, s-maxage=10"));
        headers.insert(AGE, HeaderValue::from_static("4"));
        assert_eq!(
            freshness_lifetime(StatusCode::OK, &headers),
            Some(Duration::from_secs(6))
        );

        headers.insert(CACHE_CONTROL, HeaderValue::from_static("max-age=60, no-store"));
        assert_eq!(freshness_lifetime(StatusCode::OK, &headers), None);

        headers.insert(CACHE_CONTROL, HeaderValue::from_static("max-age=60"));
        assert_eq!(freshness_lifetime(StatusCode::NOT_FOUND, &headers), None);
    }

    #[tokio::test]
    async fn fresh_entry_served_without_origin() {
        let transport = transport("max-age=60");
        let url = "http://example.com/site.css";

        let first = transport.execute(get(url), CancellationToken::new()).await.unwrap();
        assert_eq!(&first.into_body().collect().await.unwrap()[..], b"body { color: red }");
        assert!(transport.cache().is_fresh(&CacheKey::new(url)));

        let second = transport.execute(get(url), CancellationToken::new()).await.unwrap();
        assert_eq!(&second.into_body().collect().await.unwrap()[..], b"body { color: red }");
        assert_eq!(transport.inner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_entry_is_refetched() {
        let transport = transport("max-age=2");
        let url = "http://example.com/site.css";

        transport.execute(get(url), CancellationToken::new()).await.unwrap();
        tokio::time::advance(Duration::from_secs(3)).await;
        assert!(!transport.cache().is_fresh(&CacheKey::new(url)));

        transport.execute(get(url), CancellationToken::new()).await.unwrap();
        assert_eq!(transport.inner.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn uncacheable_responses_are_not_stored() {
        let transport = transport("no-cache");
        let url = "http://example.com/site.css";

        transport.execute(get(url), CancellationToken::new()).await.unwrap();
        transport.execute(get(url), CancellationToken::new()).await.unwrap();
        assert!(transport.cache().is_empty());
        assert_eq!(transport.inner.calls.load(Ordering::SeqCst), 2);
    }
}
