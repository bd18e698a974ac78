//! Racing a direct fetch against a push.
//!
//! # Data Flow
//! ```text
//! execute(request)
//!     → ResponseCache::get_or_create_listener
//!         hit  → pushed response
//!         miss → race:
//!             direct fetch ──┐
//!             push listener ─┴─▶ first usable response
//!                 push wins        → cancel direct
//!                 direct usable    → drop listener
//!                 direct transient → wait for push (grace), then retry
//!                 direct failed    → wait for push (grace), then fail
//! ```
//!
//! # Design Decisions
//! - The transient in-flight status is never returned; it only means a
//!   push is on its way
//! - Waiting for a push after the direct path gave up is bounded by
//!   `push_grace`, and transient retries by `transient_retries`
//! - The listener is owned by the race and unregistered when it ends,
//!   whatever the outcome

use std::sync::Arc;
use std::time::Duration;

use http::{HeaderMap, Method, Request, Response, Uri, Version};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::cache::{CacheKey, Listener, Lookup, ResponseCache};
use crate::config::RacingConfig;
use crate::http::body::Body;
use crate::http::transport::{HttpTransport, TransportError};
use crate::observability::metrics;
use crate::prefetch::request::is_in_flight_status;

#[derive(Debug, Error)]
pub enum RaceError {
    #[error("direct fetch failed and no push arrived within {waited:?}: {direct}")]
    BothFailed {
        direct: TransportError,
        waited: Duration,
    },

    #[error("resource still being prefetched after {attempts} direct attempts and no push arrived")]
    StillInFlight { attempts: u32 },
}

/// Enough of a request to send it again.
pub(crate) struct RequestTemplate {
    method: Method,
    uri: Uri,
    version: Version,
    headers: HeaderMap,
}

impl RequestTemplate {
    pub(crate) fn of<B>(request: &Request<B>) -> Self {
        Self {
            method: request.method().clone(),
            uri: request.uri().clone(),
            version: request.version(),
            headers: request.headers().clone(),
        }
    }

    pub(crate) fn uri(&self) -> &Uri {
        &self.uri
    }

    pub(crate) fn build(&self) -> Request<Body> {
        let mut request = Request::new(Body::empty());
        *request.method_mut() = self.method.clone();
        *request.uri_mut() = self.uri.clone();
        *request.version_mut() = self.version;
        *request.headers_mut() = self.headers.clone();
        request
    }
}

enum DirectFailure {
    InFlight,
    Error(TransportError),
}

/// Client-side fetcher that takes whichever of a direct fetch and a push
/// answers first.
pub struct RacingHttpClient {
    transport: Arc<dyn HttpTransport>,
    cache: Arc<ResponseCache>,
    push_grace: Duration,
    transient_retries: u32,
}

impl RacingHttpClient {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        cache: Arc<ResponseCache>,
        config: &RacingConfig,
    ) -> Self {
        Self {
            transport,
            cache,
            push_grace: config.push_grace(),
            transient_retries: config.transient_retries,
        }
    }

    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.cache
    }

    pub async fn execute(&self, request: Request<Body>) -> Result<Response<Body>, RaceError> {
        let key = CacheKey::from_uri(request.uri());
        let mut listener = match self.cache.get_or_create_listener(&key) {
            Lookup::Hit(response) => {
                tracing::debug!(url = %key, "Served from push cache");
                metrics::record_race("cache");
                return Ok(response);
            }
            Lookup::Miss(listener) => listener,
        };

        let result = self.race(&key, request, &mut listener).await;
        listener.close();
        result
    }

    async fn race(
        &self,
        key: &CacheKey,
        request: Request<Body>,
        listener: &mut Listener,
    ) -> Result<Response<Body>, RaceError> {
        let template = RequestTemplate::of(&request);
        let mut next = Some(request);
        let mut attempts: u32 = 0;
        let mut push_open = true;

        loop {
            attempts += 1;
            let cancel = CancellationToken::new();
            let request = next.take().unwrap_or_else(|| template.build());
            let mut direct = self.transport.execute(request, cancel.clone());

            let failure = loop {
                tokio::select! {
                    biased;
                    notified = listener.notified(), if push_open => {
                        if !notified {
                            push_open = false;
                            continue;
                        }
                        if let Some(response) = self.cache.get(key) {
                            cancel.cancel();
                            tracing::debug!(url = %key, "Push won the race");
                            metrics::record_race("push");
                            return Ok(response);
                        }
                    }
                    result = &mut direct => match result {
                        Ok(response) if !is_in_flight_status(response.status()) => {
                            tracing::debug!(url = %key, "Direct fetch won the race");
                            metrics::record_race("direct");
                            return Ok(response);
                        }
                        Ok(_) => break DirectFailure::InFlight,
                        Err(e) => break DirectFailure::Error(e),
                    }
                }
            };

            if push_open {
                if let Some(response) = self.wait_for_push(key, listener).await {
                    metrics::record_race("push");
                    return Ok(response);
                }
            }

            match failure {
                DirectFailure::InFlight if attempts <= self.transient_retries => {
                    tracing::debug!(url = %key, attempts, "Resource in flight upstream, retrying");
                }
                DirectFailure::InFlight => {
                    metrics::record_race("failed");
                    return Err(RaceError::StillInFlight { attempts });
                }
                DirectFailure::Error(direct) => {
                    metrics::record_race("failed");
                    return Err(RaceError::BothFailed {
                        direct,
                        waited: self.push_grace,
                    });
                }
            }
        }
    }

    /// Wait up to the grace period for a push of `key`.
    async fn wait_for_push(&self, key: &CacheKey, listener: &mut Listener) -> Option<Response<Body>> {
        let deadline = tokio::time::sleep(self.push_grace);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                notified = listener.notified() => {
                    if !notified {
                        return None;
                    }
                    if let Some(response) = self.cache.get(key) {
                        tracing::debug!(url = %key, "Push arrived after direct fetch gave up");
                        return Some(response);
                    }
                }
                _ = &mut deadline => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::PushedResponse;
    use crate::config::RacingConfig;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Origin that answers with a scripted sequence of statuses, each after
    /// a delay, and records the cancellation tokens it was handed.
    struct ScriptedOrigin {
        script: Vec<(Duration, Result<u16, ()>)>,
        calls: AtomicUsize,
        tokens: Mutex<Vec<CancellationToken>>,
    }

    impl ScriptedOrigin {
        fn new(script: Vec<(Duration, Result<u16, ()>)>) -> Arc<Self> {
            Arc::new(Self {
                script,
                calls: AtomicUsize::new(0),
                tokens: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl HttpTransport for ScriptedOrigin {
        async fn execute(
            &self,
            _request: Request<Body>,
            cancel: CancellationToken,
        ) -> Result<Response<Body>, TransportError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            self.tokens.lock().unwrap().push(cancel.clone());
            let (delay, outcome) = self.script[call.min(self.script.len() - 1)];
            tokio::select! {
                _ = cancel.cancelled() => Err(TransportError::Cancelled),
                _ = tokio::time::sleep(delay) => match outcome {
                    Ok(status) => Ok(Response::builder()
                        .status(status)
                        .body(Body::from("direct"))
                        .unwrap()),
                    Err(()) => Err(TransportError::Upstream("refused".into())),
                },
            }
        }
    }

    const URL: &str = "http://example.com/app.js";

    fn request() -> Request<Body> {
        Request::get(URL).body(Body::empty()).unwrap()
    }

    fn pushed() -> PushedResponse {
        PushedResponse {
            key: CacheKey::new(URL),
            response: Response::new(Body::from("pushed")),
        }
    }

    fn client(origin: Arc<ScriptedOrigin>) -> (RacingHttpClient, Arc<ResponseCache>) {
        let cache = Arc::new(ResponseCache::new(Duration::from_secs(10)));
        let config = RacingConfig {
            push_grace_ms: 3000,
            transient_retries: 2,
        };
        (RacingHttpClient::new(origin, Arc::clone(&cache), &config), cache)
    }

    async fn body_of(response: Response<Body>) -> String {
        String::from_utf8(response.into_body().collect().await.unwrap().to_vec()).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn cached_push_skips_the_origin() {
        let origin = ScriptedOrigin::new(vec![(Duration::from_secs(1), Ok(200))]);
        let (client, cache) = client(origin.clone());
        cache.add(pushed());

        let response = client.execute(request()).await.unwrap();
        assert_eq!(body_of(response).await, "pushed");
        assert_eq!(origin.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn push_first_cancels_direct() {
        let origin = ScriptedOrigin::new(vec![(Duration::from_secs(5), Ok(200))]);
        let (client, cache) = client(origin.clone());

        let pusher = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                cache.add(pushed());
            })
        };
        let response = client.execute(request()).await.unwrap();
        pusher.await.unwrap();

        assert_eq!(body_of(response).await, "pushed");
        assert!(origin.tokens.lock().unwrap()[0].is_cancelled());
        assert_eq!(cache.listener_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn direct_first_unregisters_listener() {
        let origin = ScriptedOrigin::new(vec![(Duration::from_millis(50), Ok(200))]);
        let (client, cache) = client(origin.clone());

        let response = client.execute(request()).await.unwrap();
        assert_eq!(body_of(response).await, "direct");
        assert_eq!(cache.listener_count(), 0);
        assert!(!origin.tokens.lock().unwrap()[0].is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn transient_status_waits_for_push() {
        let origin = ScriptedOrigin::new(vec![(Duration::from_millis(10), Ok(599))]);
        let (client, cache) = client(origin.clone());

        let pusher = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(500)).await;
                cache.add(pushed());
            })
        };
        let response = client.execute(request()).await.unwrap();
        pusher.await.unwrap();

        assert_eq!(response.status(), 200);
        assert_eq!(body_of(response).await, "pushed");
        assert_eq!(origin.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_status_is_retried_then_given_up() {
        let origin = ScriptedOrigin::new(vec![(Duration::from_millis(10), Ok(599))]);
        let (client, cache) = client(origin.clone());

        let err = client.execute(request()).await.unwrap_err();
        assert!(matches!(err, RaceError::StillInFlight { attempts: 3 }));
        assert_eq!(origin.calls.load(Ordering::SeqCst), 3);
        assert_eq!(cache.listener_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_then_success_returns_direct() {
        let origin = ScriptedOrigin::new(vec![
            (Duration::from_millis(10), Ok(599)),
            (Duration::from_millis(10), Ok(200)),
        ]);
        let (client, _cache) = client(origin.clone());

        let response = client.execute(request()).await.unwrap();
        assert_eq!(body_of(response).await, "direct");
        assert_eq!(origin.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_direct_still_takes_a_late_push() {
        let origin = ScriptedOrigin::new(vec![(Duration::from_millis(10), Err(()))]);
        let (client, cache) = client(origin.clone());

        let pusher = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(500)).await;
                cache.add(pushed());
            })
        };
        let response = client.execute(request()).await.unwrap();
        pusher.await.unwrap();

        assert_eq!(body_of(response).await, "pushed");
        assert_eq!(origin.calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.listener_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn both_failing_surfaces_the_direct_error() {
        let origin = ScriptedOrigin::new(vec![(Duration::from_millis(10), Err(()))]);
        let (client, cache) = client(origin);

        let err = client.execute(request()).await.unwrap_err();
        match err {
            RaceError::BothFailed { direct, waited } => {
                assert!(matches!(direct, TransportError::Upstream(_)));
                assert_eq!(waited, Duration::from_secs(3));
            }
            other => panic!("unexpected error: {}", other),
        }
        assert_eq!(cache.listener_count(), 0);
    }
}
