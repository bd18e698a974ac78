//! Startup orchestration.
//!
//! # Responsibilities
//! - Build the server side (orchestrator, HTTP cache, push channel slot)
//! - Build the client side (response cache, push receiver, ingest loop,
//!   client entry point)
//! - Wire both into one process over an in-memory push session
//!
//! # Design Decisions
//! - Server side first: the client side dials as soon as it starts
//! - Background tasks all stop on the shared [`Shutdown`]

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use http::Method;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::cache::{ResponseCache, PREFETCH_MARKER};
use crate::config::PrefetchProxyConfig;
use crate::http::body::Body;
use crate::http::cache::HttpCache;
use crate::http::head::ResponseHead;
use crate::http::transport::{HttpTransport, TransportError};
use crate::lifecycle::Shutdown;
use crate::prefetch::request::{build_prefetch_request, resolve};
use crate::prefetch::{
    DiscoveryReport, Observation, PrefetchClient, PrefetchOrchestrator, RelayTransport,
    ResourceExtractor,
};
use crate::push::{run_ingest, MemoryDialer, PushChannel, PushReceiver, SessionDialer};

/// Per-stream buffer of the in-memory push transport.
const MEMORY_STREAM_BUFFER: usize = 4 * 1024 * 1024;

/// The server-side proxy's prefetch half.
pub struct ServerSide {
    pub orchestrator: Arc<PrefetchOrchestrator>,
    pub channel: Arc<PushChannel>,
    pub relay: Arc<RelayTransport>,
}

impl ServerSide {
    pub fn build(
        config: &PrefetchProxyConfig,
        origin: Arc<dyn HttpTransport>,
        extractor: Arc<dyn ResourceExtractor>,
    ) -> Self {
        let channel = Arc::new(PushChannel::new());
        let mut orchestrator = PrefetchOrchestrator::new(
            Arc::clone(&origin),
            extractor,
            Arc::clone(&channel),
            &config.prefetch,
        );
        if config.http_cache.enabled {
            orchestrator = orchestrator.with_http_cache(Arc::new(HttpCache::new(&config.http_cache)));
        }
        let orchestrator = Arc::new(orchestrator);
        let relay = Arc::new(RelayTransport::new(Arc::clone(&orchestrator), origin));
        tracing::debug!(
            max_concurrent_fetches = config.prefetch.max_concurrent_fetches,
            http_cache = config.http_cache.enabled,
            "Server side ready"
        );
        Self {
            orchestrator,
            channel,
            relay,
        }
    }
}

/// The client-side proxy's prefetch half.
pub struct ClientSide {
    pub client: Arc<PrefetchClient>,
    pub cache: Arc<ResponseCache>,
    tasks: Vec<JoinHandle<()>>,
}

impl ClientSide {
    /// Create the cache and client, and spawn the receiver and ingest tasks.
    pub fn start(
        config: &PrefetchProxyConfig,
        upstream: Arc<dyn HttpTransport>,
        dialer: Arc<dyn SessionDialer>,
        shutdown: &Shutdown,
    ) -> Self {
        let cache = Arc::new(ResponseCache::new(config.push.response_ttl()));
        let (queue_tx, queue_rx) = mpsc::channel(config.push.queue_capacity);

        let receiver = PushReceiver::new(dialer, queue_tx, &config.push);
        let tasks = vec![
            tokio::spawn(receiver.run(shutdown.subscribe())),
            tokio::spawn(run_ingest(
                Arc::clone(&cache),
                queue_rx,
                config.push.purge_interval(),
                shutdown.subscribe(),
            )),
        ];

        let client = Arc::new(PrefetchClient::new(
            upstream,
            Arc::clone(&cache),
            &config.prefetch,
            &config.racing,
        ));
        Self {
            client,
            cache,
            tasks,
        }
    }

    /// Wait for the background tasks to stop.
    pub async fn join(self) {
        for task in self.tasks {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "Client-side task failed");
            }
        }
    }
}

/// How the browser side got one resource during a warm run.
#[derive(Debug, Clone, Serialize)]
pub struct ServedResource {
    pub url: String,
    /// `push` or `direct`; `none` when the request failed.
    pub served_by: &'static str,
    pub status: u16,
    pub bytes: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WarmReport {
    pub document: String,
    pub status: u16,
    /// Server-side discovery, if it finished in time.
    pub discovery: Option<DiscoveryReport>,
    pub served: Vec<ServedResource>,
}

#[derive(Debug, Error)]
pub enum WarmError {
    #[error("invalid document request: {0}")]
    Request(#[from] http::Error),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("failed to read document: {0}")]
    Body(#[from] std::io::Error),
}

/// Both proxies in one process, joined by an in-memory push session.
pub struct Pipeline {
    pub server: ServerSide,
    pub client: ClientSide,
    extractor: Arc<dyn ResourceExtractor>,
    discovery_timeout: Duration,
    shutdown: Shutdown,
}

impl Pipeline {
    /// Build both sides; the client side dials the server side right away.
    pub fn start_in_process(
        config: &PrefetchProxyConfig,
        origin: Arc<dyn HttpTransport>,
        extractor: Arc<dyn ResourceExtractor>,
    ) -> Self {
        let shutdown = Shutdown::new();
        let server = ServerSide::build(config, origin, Arc::clone(&extractor));

        let channel = Arc::clone(&server.channel);
        let dialer: Arc<dyn SessionDialer> = Arc::new(MemoryDialer::new(
            MEMORY_STREAM_BUFFER,
            move |session| channel.replace(session),
        ));
        let upstream: Arc<dyn HttpTransport> = server.relay.clone();
        let client = ClientSide::start(config, upstream, dialer, &shutdown);

        Self {
            server,
            client,
            extractor,
            discovery_timeout: Duration::from_secs(config.timeouts.request_secs),
            shutdown,
        }
    }

    /// Wait until the push session is installed on the server side.
    pub async fn wait_connected(&self, timeout: Duration) -> bool {
        let channel = &self.server.channel;
        tokio::time::timeout(timeout, async {
            while !channel.is_connected() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .is_ok()
    }

    /// Load `document` the way a browser behind the client-side proxy would,
    /// and report how each of its resources was served.
    pub async fn warm(&self, document: &Url) -> Result<WarmReport, WarmError> {
        let request = build_prefetch_request(document)?;
        let (response, observation) = self
            .server
            .relay
            .relay(request, CancellationToken::new())
            .await?;
        let status = response.status().as_u16();
        let head = ResponseHead::of(&response);
        let html = response.into_body().collect().await?;

        // The browser parses what it received and asks for the resources.
        let references = match self.extractor.extract(&head, Body::from_bytes(html)).await {
            Ok(references) => references,
            Err(e) => {
                tracing::debug!(url = %document, error = %e, "Document has no scannable head");
                Vec::new()
            }
        };
        let mut urls: Vec<Url> = Vec::new();
        for url in references.iter().filter_map(|r| resolve(document, r)) {
            if !urls.contains(&url) {
                urls.push(url);
            }
        }
        let served = join_all(urls.iter().map(|url| self.fetch_as_browser(url))).await;

        let discovery = match observation {
            Observation::Scheduled(handle) => {
                match tokio::time::timeout(self.discovery_timeout, handle).await {
                    Ok(Ok(report)) => Some(report),
                    Ok(Err(e)) => {
                        tracing::error!(error = %e, "Discovery task failed");
                        None
                    }
                    Err(_) => {
                        tracing::warn!(url = %document, "Discovery did not finish in time");
                        None
                    }
                }
            }
            Observation::Throttled | Observation::NotDocument => None,
        };

        Ok(WarmReport {
            document: document.to_string(),
            status,
            discovery,
            served,
        })
    }

    async fn fetch_as_browser(&self, url: &Url) -> ServedResource {
        let failed = |error: String| ServedResource {
            url: url.to_string(),
            served_by: "none",
            status: 0,
            bytes: 0,
            error: Some(error),
        };

        let request = match build_prefetch_request(url) {
            Ok(request) => request,
            Err(e) => return failed(e.to_string()),
        };
        let response = match self.client.client.execute(request).await {
            Ok(response) => response,
            Err(e) => return failed(e.to_string()),
        };

        let served_by = if response.headers().contains_key(PREFETCH_MARKER) {
            "push"
        } else {
            "direct"
        };
        let status = response.status().as_u16();
        match response.into_body().collect().await {
            Ok(body) => ServedResource {
                url: url.to_string(),
                served_by,
                status,
                bytes: body.len(),
                error: None,
            },
            Err(e) => ServedResource {
                url: url.to_string(),
                served_by,
                status,
                bytes: 0,
                error: Some(e.to_string()),
            },
        }
    }

    /// Stop the background tasks and close the push session.
    pub async fn shutdown(self) {
        self.shutdown.trigger();
        self.server.channel.close();
        self.client.join().await;
        tracing::info!("Pipeline stopped");
    }
}
