//! Server-side relay of client requests.

use std::sync::Arc;

use async_trait::async_trait;
use http::{Method, Request, Response};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::cache::CacheKey;
use crate::http::body::Body;
use crate::http::transport::{HttpTransport, TransportError};
use crate::prefetch::orchestrator::{Observation, PrefetchOrchestrator};

/// Forwards client requests to the origin the way the server-side proxy
/// does: resources being prefetched are answered with the transient
/// in-flight status, and every response is shown to the orchestrator.
pub struct RelayTransport {
    orchestrator: Arc<PrefetchOrchestrator>,
    origin: Arc<dyn HttpTransport>,
}

impl RelayTransport {
    pub fn new(orchestrator: Arc<PrefetchOrchestrator>, origin: Arc<dyn HttpTransport>) -> Self {
        Self {
            orchestrator,
            origin,
        }
    }

    /// Relay `request`, also returning what the orchestrator did with the
    /// response.
    pub async fn relay(
        &self,
        request: Request<Body>,
        cancel: CancellationToken,
    ) -> Result<(Response<Body>, Observation), TransportError> {
        let method = request.method().clone();
        if method == Method::GET {
            let key = CacheKey::from_uri(request.uri());
            if let Some(transient) = self.orchestrator.in_flight_response(&key) {
                tracing::debug!(url = %key, "Answering with in-flight status");
                return Ok((transient, Observation::NotDocument));
            }
        }

        let url = Url::parse(&request.uri().to_string())
            .map_err(|e| TransportError::InvalidRequest(e.to_string()))?;
        let mut response = self.origin.execute(request, cancel).await?;
        let observation = self.orchestrator.observe(&method, &url, &mut response);
        Ok((response, observation))
    }
}

#[async_trait]
impl HttpTransport for RelayTransport {
    async fn execute(
        &self,
        request: Request<Body>,
        cancel: CancellationToken,
    ) -> Result<Response<Body>, TransportError> {
        self.relay(request, cancel).await.map(|(response, _)| response)
    }
}
