//! Server-side prefetch orchestration.
//!
//! # Responsibilities
//! - Watch document responses flowing back to the client
//! - Discover their sub-resources and fetch each one speculatively
//! - Hand completed fetches to the push channel
//!
//! # Data Flow
//! ```text
//! observe(document response)
//!     → document filter → throttle (insert before work)
//!     → fork body: one replay to the browser, one to the extractor
//!     → spawn discover
//!         → extract → resolve against document URL
//!         → per resource, concurrently: dispatch
//!             → synthetic GET → HTTP cache fresh? → claim flying key
//!             → admission gate → fetch → push (or warm only)
//!             → flying key released on every path
//! ```
//!
//! # Design Decisions
//! - Nothing on the speculative path can fail the document: every error is
//!   logged and becomes a [`DispatchOutcome`]
//! - Concurrent fetches per orchestrator are bounded by a semaphore
//!   (`max_concurrent_fetches`, 0 = unbounded)

use std::sync::Arc;

use http::{Method, Response};
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::cache::{CacheKey, TtlCache};
use crate::config::PrefetchConfig;
use crate::http::body::{Body, RepeatableBody};
use crate::http::cache::{CachingTransport, HttpCache};
use crate::http::head::ResponseHead;
use crate::http::transport::HttpTransport;
use crate::observability::metrics;
use crate::prefetch::extract::ResourceExtractor;
use crate::prefetch::flying::FlyingSet;
use crate::prefetch::request::{self, build_prefetch_request, is_document_response, resolve};
use crate::push::{PushChannel, PushError};

/// What [`PrefetchOrchestrator::observe`] did with a response.
#[derive(Debug)]
pub enum Observation {
    /// Not a prefetchable document.
    NotDocument,
    /// The document was seen within the throttle window.
    Throttled,
    /// Discovery runs in the background; the handle yields its report.
    Scheduled(JoinHandle<DiscoveryReport>),
}

/// How one speculative fetch ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DispatchOutcome {
    /// Fetched and pushed to the client side.
    Pushed { status: u16, bytes: u64 },
    /// Fetched, but no push session was connected.
    Warmed { status: u16 },
    /// The HTTP cache already holds a fresh copy.
    AlreadyCached,
    /// Another fetch for the same URL is in flight.
    AlreadyInFlight,
    InvalidRequest { error: String },
    FetchFailed { error: String },
    PushFailed { error: String },
}

impl DispatchOutcome {
    fn label(&self) -> &'static str {
        match self {
            Self::Pushed { .. } => "pushed",
            Self::Warmed { .. } => "warmed",
            Self::AlreadyCached => "cached",
            Self::AlreadyInFlight => "flying",
            Self::InvalidRequest { .. } => "invalid",
            Self::FetchFailed { .. } => "fetch_failed",
            Self::PushFailed { .. } => "push_failed",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ResourceReport {
    pub url: String,
    #[serde(flatten)]
    pub outcome: DispatchOutcome,
}

/// Everything discovery did for one document.
#[derive(Debug, Clone, Serialize)]
pub struct DiscoveryReport {
    pub document: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub resources: Vec<ResourceReport>,
}

/// Server-side prefetch engine.
pub struct PrefetchOrchestrator {
    transport: Arc<dyn HttpTransport>,
    http_cache: Option<Arc<HttpCache>>,
    extractor: Arc<dyn ResourceExtractor>,
    channel: Arc<PushChannel>,
    throttle: TtlCache<CacheKey, ()>,
    flying: Arc<FlyingSet>,
    gate: Option<Arc<Semaphore>>,
}

impl PrefetchOrchestrator {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        extractor: Arc<dyn ResourceExtractor>,
        channel: Arc<PushChannel>,
        config: &PrefetchConfig,
    ) -> Self {
        let gate = (config.max_concurrent_fetches > 0)
            .then(|| Arc::new(Semaphore::new(config.max_concurrent_fetches)));
        Self {
            transport,
            http_cache: None,
            extractor,
            channel,
            throttle: TtlCache::new(config.document_throttle()),
            flying: Arc::new(FlyingSet::new()),
            gate,
        }
    }

    /// Route speculative fetches through an RFC 7234 cache and skip
    /// resources it holds fresh.
    pub fn with_http_cache(mut self, cache: Arc<HttpCache>) -> Self {
        self.transport = Arc::new(CachingTransport::new(
            Arc::clone(&self.transport),
            Arc::clone(&cache),
        ));
        self.http_cache = Some(cache);
        self
    }

    /// Inspect a response on its way to the client.
    ///
    /// For a document, the body is replaced by a replay of itself so the
    /// extractor can read it too; the client sees the same bytes. Must be
    /// called inside a Tokio runtime.
    pub fn observe(
        self: &Arc<Self>,
        method: &Method,
        document_url: &Url,
        response: &mut Response<Body>,
    ) -> Observation {
        if !is_document_response(method, response) {
            return Observation::NotDocument;
        }

        let document_key = CacheKey::from_url(document_url);
        if !self.throttle.insert_if_absent(document_key, ()) {
            tracing::debug!(url = %document_url, "Document throttled");
            metrics::record_document("throttled");
            return Observation::Throttled;
        }

        let source = std::mem::take(response.body_mut());
        let replay = RepeatableBody::new(source);
        *response.body_mut() = replay.fork();
        let scan = replay.fork();

        let head = ResponseHead::of(response);
        let this = Arc::clone(self);
        let document = document_url.clone();
        Observation::Scheduled(tokio::spawn(async move {
            this.discover(document, head, scan).await
        }))
    }

    async fn discover(self: Arc<Self>, document: Url, head: ResponseHead, body: Body) -> DiscoveryReport {
        self.throttle.purge_expired();

        let references = match self.extractor.extract(&head, body).await {
            Ok(references) => references,
            Err(e) => {
                tracing::warn!(url = %document, error = %e, "Resource extraction failed");
                metrics::record_document("extract_failed");
                return DiscoveryReport {
                    document: document.to_string(),
                    error: Some(e.to_string()),
                    resources: Vec::new(),
                };
            }
        };

        let targets: Vec<Url> = references
            .iter()
            .filter_map(|reference| {
                let resolved = resolve(&document, reference);
                if resolved.is_none() {
                    tracing::debug!(url = %document, reference = %reference, "Skipping unresolvable reference");
                }
                resolved
            })
            .collect();
        tracing::info!(url = %document, resources = targets.len(), "Prefetching document resources");
        metrics::record_document("prefetched");

        let mut tasks = JoinSet::new();
        for (index, target) in targets.into_iter().enumerate() {
            let this = Arc::clone(&self);
            tasks.spawn(async move {
                let outcome = this.dispatch(&target).await;
                (index, target, outcome)
            });
        }

        let mut finished = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(done) => finished.push(done),
                Err(e) => tracing::error!(url = %document, error = %e, "Dispatch task failed"),
            }
        }
        finished.sort_by_key(|(index, _, _)| *index);

        DiscoveryReport {
            document: document.to_string(),
            error: None,
            resources: finished
                .into_iter()
                .map(|(_, url, outcome)| ResourceReport {
                    url: url.to_string(),
                    outcome,
                })
                .collect(),
        }
    }

    /// Speculatively fetch one resource and push it.
    pub async fn dispatch(&self, url: &Url) -> DispatchOutcome {
        let outcome = self.fetch_and_push(url).await;
        metrics::record_fetch(outcome.label());
        outcome
    }

    async fn fetch_and_push(&self, url: &Url) -> DispatchOutcome {
        let key = CacheKey::from_url(url);
        let request = match build_prefetch_request(url) {
            Ok(request) => request,
            Err(e) => {
                tracing::debug!(url = %key, error = %e, "Invalid prefetch request");
                return DispatchOutcome::InvalidRequest { error: e.to_string() };
            }
        };

        if self.http_cache.as_ref().is_some_and(|cache| cache.is_fresh(&key)) {
            tracing::debug!(url = %key, "Resource cached");
            return DispatchOutcome::AlreadyCached;
        }

        let Some(_flying) = self.flying.try_claim(&key) else {
            tracing::debug!(url = %key, "Resource flying");
            return DispatchOutcome::AlreadyInFlight;
        };

        // A closed gate never happens; treat it as unbounded.
        let _permit = match &self.gate {
            Some(gate) => Arc::clone(gate).acquire_owned().await.ok(),
            None => None,
        };

        tracing::debug!(url = %key, "Fetching resource");
        let response = match self.transport.execute(request, CancellationToken::new()).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(url = %key, error = %e, "Speculative fetch failed");
                return DispatchOutcome::FetchFailed { error: e.to_string() };
            }
        };
        let status = response.status().as_u16();

        match self.channel.push(&key, response).await {
            Ok(bytes) => {
                tracing::debug!(url = %key, status, bytes, "Resource pushed");
                DispatchOutcome::Pushed { status, bytes }
            }
            Err(PushError::NoSession) => {
                tracing::debug!(url = %key, "No push session, fetched for cache warming only");
                DispatchOutcome::Warmed { status }
            }
            Err(e) => {
                tracing::warn!(url = %key, error = %e, "Push failed");
                DispatchOutcome::PushFailed { error: e.to_string() }
            }
        }
    }

    /// The transient answer for a real request whose resource is flying.
    pub fn in_flight_response(&self, key: &CacheKey) -> Option<Response<Body>> {
        self.flying
            .contains(key)
            .then(request::in_flight_response)
    }

    pub fn flying(&self) -> &Arc<FlyingSet> {
        &self.flying
    }

    pub fn channel(&self) -> &Arc<PushChannel> {
        &self.channel
    }
}
